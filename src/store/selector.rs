use std::fmt;
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

use crate::descriptor::MetaPackageDescriptor;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("missing meta-package name in `{0}`, expected META_PACKAGE[.PACKAGE_REGEX]")]
    MissingMetaPackage(String),

    #[error("invalid package regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A `META_PACKAGE[.PACKAGE_REGEX]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSelector {
    pub meta_package: String,
    pub package_regex: Option<String>,
}

impl PackageSelector {
    /// Splits on the first `.`, so the regex itself may contain dots.
    pub fn parse(arg: &str) -> Result<Self, SelectorError> {
        let (meta_package, package_regex) = match arg.split_once('.') {
            Some((meta_package, regex)) => (meta_package, Some(regex.to_owned())),
            None => (arg, None),
        };

        if meta_package.is_empty() {
            return Err(SelectorError::MissingMetaPackage(arg.to_owned()));
        }

        Ok(Self {
            meta_package: meta_package.to_owned(),
            package_regex,
        })
    }

    /// Package names of `descriptor` matched by the regex, in document order. The regex must
    /// match at the start of a name; without one every package is selected.
    pub fn select<'d>(
        &self,
        descriptor: &'d MetaPackageDescriptor,
    ) -> Result<Vec<&'d str>, SelectorError> {
        let Some(pattern) = &self.package_regex else {
            return Ok(descriptor.package_names().collect());
        };

        let regex =
            Regex::new(&format!("^(?:{pattern})")).map_err(|source| SelectorError::InvalidRegex {
                pattern: pattern.clone(),
                source,
            })?;

        Ok(descriptor
            .package_names()
            .filter(|name| regex.is_match(name))
            .collect())
    }
}

impl FromStr for PackageSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package_regex {
            Some(regex) => write!(f, "{}.{regex}", self.meta_package),
            None => f.write_str(&self.meta_package),
        }
    }
}
