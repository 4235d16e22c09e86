use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::DescriptorError;

/// A meta-package: a named bundle of installable packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPackageDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<IndexMap<String, PackageEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Candidate install locations, first existing one wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<Dependency>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_mechanisms: Option<InstallationMechanisms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "meta-package")]
    pub meta_package: String,
    #[serde(rename = "package-regex")]
    pub package_regex: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationMechanisms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tar: Option<TarSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarSource {
    pub uri: String,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum MechanismKind {
    Git,
    Tar,
}

impl MetaPackageDescriptor {
    pub fn package(&self, name: &str) -> Option<&PackageEntry> {
        self.packages.as_ref()?.get(name)
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages
            .iter()
            .flat_map(|packages| packages.keys())
            .map(String::as_str)
    }

    /// A copy of this descriptor keeping only the named packages.
    pub fn restricted_to(&self, names: &[&str]) -> MetaPackageDescriptor {
        let packages = self.packages.as_ref().map(|packages| {
            packages
                .iter()
                .filter(|(name, _)| names.contains(&name.as_str()))
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect()
        });

        MetaPackageDescriptor {
            packages,
            ..self.clone()
        }
    }

    pub fn to_toml_string(&self) -> Result<String, DescriptorError> {
        toml::to_string(self).map_err(|err| DescriptorError::Serialize(err.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String, DescriptorError> {
        serde_json::to_string_pretty(self).map_err(|err| DescriptorError::Serialize(err.to_string()))
    }
}

impl InstallationMechanisms {
    /// The declared mechanisms, in preference order.
    pub fn kinds(&self) -> Vec<MechanismKind> {
        let mut kinds = Vec::new();
        if self.git.is_some() {
            kinds.push(MechanismKind::Git);
        }
        if self.tar.is_some() {
            kinds.push(MechanismKind::Tar);
        }
        kinds
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.meta_package, self.package_regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descriptor() -> MetaPackageDescriptor {
        toml::from_str(
            r#"
name = "dotfiles"

[packages.vim]
description = "editor"

[[packages.vim.dependencies]]
meta-package = "base"
package-regex = "^shell"

[packages.vim.installation_mechanisms.tar]
uri = "vim.tar.gz"

[packages.zsh]
[packages.tmux]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_package_lookup() {
        let descriptor = descriptor();
        assert_eq!(
            descriptor.package("vim").unwrap().description.as_deref(),
            Some("editor")
        );
        assert!(descriptor.package("emacs").is_none());
        assert!(MetaPackageDescriptor::default().package("vim").is_none());
    }

    #[test]
    fn test_package_names_keep_document_order() {
        assert_eq!(
            descriptor().package_names().collect::<Vec<_>>(),
            vec!["vim", "zsh", "tmux"]
        );
    }

    #[test]
    fn test_restricted_to() {
        let restricted = descriptor().restricted_to(&["tmux", "vim"]);
        assert_eq!(restricted.name.as_deref(), Some("dotfiles"));
        assert_eq!(restricted.package_names().collect::<Vec<_>>(), vec!["vim", "tmux"]);
    }

    #[test]
    fn test_mechanism_kinds() {
        let descriptor = descriptor();
        let mechanisms = descriptor
            .package("vim")
            .unwrap()
            .installation_mechanisms
            .as_ref()
            .unwrap();
        assert_eq!(mechanisms.kinds(), vec![MechanismKind::Tar]);
        assert!(InstallationMechanisms::default().kinds().is_empty());
    }

    #[test]
    fn test_dependency_display_uses_selector_syntax() {
        let descriptor = descriptor();
        let dependency = &descriptor.package("vim").unwrap().dependencies.as_ref().unwrap()[0];
        assert_eq!(dependency.to_string(), "base.^shell");
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let json = MetaPackageDescriptor {
            name: Some("x".into()),
            ..Default::default()
        }
        .to_json_string()
        .unwrap();
        assert_eq!(json, "{\n  \"name\": \"x\"\n}");
    }
}
