use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{CacheError, PackageCache, PackageStatus};
use crate::descriptor::{DescriptorError, Format, MetaPackageDescriptor, Validator};

/// Descriptors larger than this are refused.
pub const MAX_DESCRIPTOR_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("{} is too large ({size} bytes, limit is {limit})", path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("{}: meta-package has no name", path.display())]
    Unnamed { path: PathBuf },

    #[error(
        "cannot load meta-package {name}: {} already holds meta-package {occupant}",
        path.display()
    )]
    FileNameTaken {
        name: String,
        path: PathBuf,
        occupant: String,
    },

    #[error("cannot unload meta-package {name}: package {name}.{package} is {status}")]
    PackageDeployed {
        name: String,
        package: String,
        status: PackageStatus,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// What `load` did with a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { name: String, path: PathBuf },
    Replaced { name: String, path: PathBuf },
    /// A meta-package of the same name was already loaded.
    Skipped { name: String },
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded { name, path } => {
                write!(f, "loaded meta-package {name} into {}", path.display())
            }
            LoadOutcome::Replaced { name, path } => {
                write!(f, "replaced meta-package {name} with {}", path.display())
            }
            LoadOutcome::Skipped { name } => {
                write!(f, "meta-package {name} already loaded, skipped")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedMetaPackage {
    pub path: PathBuf,
    pub descriptor: MetaPackageDescriptor,
    pub modified: Option<DateTime<Utc>>,
}

impl LoadedMetaPackage {
    pub fn name(&self) -> &str {
        self.descriptor.name.as_deref().unwrap_or_default()
    }
}

/// Loaded meta-package descriptors, kept as files under `<data_dir>/configs`.
#[derive(Debug, Clone)]
pub struct MetaPackageStore {
    configs_dir: PathBuf,
    packages_dir: PathBuf,
    validator: Validator,
}

impl MetaPackageStore {
    pub fn new(data_dir: &Path, validator: Validator) -> Self {
        Self {
            configs_dir: data_dir.join("configs"),
            packages_dir: data_dir.join("packages"),
            validator,
        }
    }

    pub fn configs_dir(&self) -> &Path {
        &self.configs_dir
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Validates the descriptor at `path` and copies it into the configs directory under its
    /// own file name.
    pub async fn load(&self, path: &Path, replace: bool) -> Result<LoadOutcome, StoreError> {
        debug!("Loading meta-package: {}", path.display());

        let (text, loaded) = self.read(path).await?;
        let name = loaded.name().to_owned();
        let file_name = path.file_name().ok_or_else(|| StoreError::NotAFile {
            path: path.to_path_buf(),
        })?;
        let destination = self.configs_dir.join(file_name);

        let current = self.list().await?;
        if let Some(occupant) = current
            .iter()
            .find(|other| other.path == destination && other.name() != name)
        {
            return Err(StoreError::FileNameTaken {
                name,
                path: destination,
                occupant: occupant.name().to_owned(),
            });
        }

        let previous = current.into_iter().find(|other| other.name() == name);
        if previous.is_some() && !replace {
            warn!("Meta-package {name} already loaded, skipping");
            return Ok(LoadOutcome::Skipped { name });
        }

        self.ensure_dirs().await?;
        fs::write(&destination, text)
            .await
            .map_err(io_error(&destination))?;

        let outcome = match previous {
            Some(previous) => {
                if previous.path != destination {
                    fs::remove_file(&previous.path)
                        .await
                        .map_err(io_error(&previous.path))?;
                }
                LoadOutcome::Replaced {
                    name,
                    path: destination,
                }
            }
            None => LoadOutcome::Loaded {
                name,
                path: destination,
            },
        };
        info!("{}", outcome);
        Ok(outcome)
    }

    /// Removes a loaded meta-package and its cache records. Returns `false` if it was not
    /// loaded. Fails while any of its packages is deployed.
    pub async fn unload(&self, name: &str, cache: &mut PackageCache) -> Result<bool, StoreError> {
        let Some(loaded) = self.find(name).await? else {
            warn!("Meta-package {name} not loaded");
            return Ok(false);
        };

        let mut fetched = Vec::new();
        for package in loaded.descriptor.package_names() {
            let status = cache.status(name, package, &self.packages_dir)?;
            if status.is_deployed() {
                return Err(StoreError::PackageDeployed {
                    name: name.to_owned(),
                    package: package.to_owned(),
                    status,
                });
            }
            if status == PackageStatus::Loaded {
                fetched.push(package);
            }
        }

        for package in fetched {
            let package_dir = self.packages_dir.join(format!("{name}.{package}"));
            debug!("Removing package source {}", package_dir.display());
            fs::remove_dir_all(&package_dir)
                .await
                .map_err(io_error(&package_dir))?;
        }

        fs::remove_file(&loaded.path)
            .await
            .map_err(io_error(&loaded.path))?;
        if cache.remove_meta_package(name) {
            cache.save().await?;
        }

        info!("Unloaded meta-package {name}");
        Ok(true)
    }

    /// Every loaded meta-package, ordered by file name. Unreadable or invalid files are skipped
    /// with a warning, as are files repeating an earlier name.
    pub async fn list(&self) -> Result<Vec<LoadedMetaPackage>, StoreError> {
        if !fs::try_exists(&self.configs_dir)
            .await
            .map_err(io_error(&self.configs_dir))?
        {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.configs_dir)
            .await
            .map_err(io_error(&self.configs_dir))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error(&self.configs_dir))?
        {
            paths.push(entry.path());
        }
        paths.sort();

        let mut loaded: Vec<LoadedMetaPackage> = Vec::new();
        for path in paths {
            match self.read(&path).await {
                Ok((_, meta_package)) => {
                    if loaded.iter().any(|other| other.name() == meta_package.name()) {
                        warn!(
                            "Meta-package {} in {} is already loaded from another file, ignoring it",
                            meta_package.name(),
                            path.display()
                        );
                        continue;
                    }
                    loaded.push(meta_package);
                }
                Err(err) => warn!(
                    "Junk file {} in the configs dir {}: {err}",
                    path.display(),
                    self.configs_dir.display()
                ),
            }
        }

        Ok(loaded)
    }

    pub async fn find(&self, name: &str) -> Result<Option<LoadedMetaPackage>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|loaded| loaded.name() == name))
    }

    async fn read(&self, path: &Path) -> Result<(String, LoadedMetaPackage), StoreError> {
        let metadata = fs::metadata(path).await.map_err(io_error(path))?;
        if !metadata.is_file() {
            return Err(StoreError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        if metadata.len() > MAX_DESCRIPTOR_SIZE {
            return Err(StoreError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: MAX_DESCRIPTOR_SIZE,
            });
        }

        let text = fs::read_to_string(path).await.map_err(io_error(path))?;
        let descriptor = self
            .validator
            .validate_str(&text, Format::from_path(path))
            .map_err(|source| StoreError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        if descriptor.name.as_deref().unwrap_or_default().is_empty() {
            return Err(StoreError::Unnamed {
                path: path.to_path_buf(),
            });
        }

        let loaded = LoadedMetaPackage {
            path: path.to_path_buf(),
            descriptor,
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        };
        Ok((text, loaded))
    }

    async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [&self.configs_dir, &self.packages_dir] {
            fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Mode;
    use pretty_assertions::assert_eq;

    const DOTFILES: &str = r#"
name = "dotfiles"

[packages.vim]
description = "editor"

[packages.zsh]
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        store: MetaPackageStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store =
                MetaPackageStore::new(&dir.path().join("data"), Validator::new(Mode::Lenient).unwrap());
            Self { dir, store }
        }

        fn source(&self, file_name: &str, text: &str) -> PathBuf {
            let path = self.dir.path().join("incoming").join(file_name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, text).unwrap();
            path
        }

        async fn cache(&self) -> PackageCache {
            PackageCache::open(&self.dir.path().join("cache")).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_load_copies_descriptor() {
        let fixture = Fixture::new();
        let source = fixture.source("dotfiles.toml", DOTFILES);

        let outcome = fixture.store.load(&source, false).await.unwrap();

        let destination = fixture.store.configs_dir().join("dotfiles.toml");
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                name: "dotfiles".into(),
                path: destination.clone(),
            }
        );
        assert_eq!(std::fs::read_to_string(destination).unwrap(), DOTFILES);
        assert!(fixture.store.packages_dir().is_dir());
    }

    #[tokio::test]
    async fn test_load_same_name_skips_unless_replacing() {
        let fixture = Fixture::new();
        fixture
            .store
            .load(&fixture.source("dotfiles.toml", DOTFILES), false)
            .await
            .unwrap();
        let updated = "name = \"dotfiles\"\nversion = \"2\"\n";
        let source = fixture.source("dotfiles-v2.toml", updated);

        let skipped = fixture.store.load(&source, false).await.unwrap();
        assert_eq!(
            skipped,
            LoadOutcome::Skipped {
                name: "dotfiles".into()
            }
        );

        let replaced = fixture.store.load(&source, true).await.unwrap();
        assert!(matches!(replaced, LoadOutcome::Replaced { .. }));

        let loaded = fixture.store.list().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].descriptor.version.as_deref(), Some("2"));
        assert!(!fixture.store.configs_dir().join("dotfiles.toml").exists());
    }

    #[tokio::test]
    async fn test_load_refuses_file_name_held_by_other_meta_package() {
        let fixture = Fixture::new();
        fixture
            .store
            .load(&fixture.source("meta.toml", DOTFILES), false)
            .await
            .unwrap();
        let other = fixture.dir.path().join("other").join("meta.toml");
        std::fs::create_dir_all(other.parent().unwrap()).unwrap();
        std::fs::write(&other, "name = \"base\"\n").unwrap();

        let err = fixture.store.load(&other, false).await.unwrap_err();

        assert!(
            matches!(&err, StoreError::FileNameTaken { occupant, .. } if occupant == "dotfiles"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_descriptors() {
        let fixture = Fixture::new();

        let invalid = fixture.source(
            "broken.json",
            r#"{"name": "broken", "packages": {"x": {"dependencies": [{"meta-package": "y"}]}}}"#,
        );
        let err = fixture.store.load(&invalid, false).await.unwrap_err();
        match err {
            StoreError::Invalid { source, .. } => assert_eq!(source.violations().len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }

        let unnamed = fixture.source("unnamed.toml", "description = \"no name\"\n");
        let err = fixture.store.load(&unnamed, false).await.unwrap_err();
        assert!(matches!(err, StoreError::Unnamed { .. }), "{err:?}");

        let err = fixture.store.load(fixture.dir.path(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAFile { .. }), "{err:?}");

        assert!(fixture.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_oversized_file() {
        let fixture = Fixture::new();
        let mut text = String::from("name = \"big\"\n");
        text.push_str(&"#".repeat(MAX_DESCRIPTOR_SIZE as usize));
        let source = fixture.source("big.toml", &text);

        let err = fixture.store.load(&source, false).await.unwrap_err();

        assert!(matches!(err, StoreError::TooLarge { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_list_skips_junk_and_duplicates() {
        let fixture = Fixture::new();
        let configs_dir = fixture.store.configs_dir().to_path_buf();
        std::fs::create_dir_all(&configs_dir).unwrap();
        std::fs::write(configs_dir.join("a.toml"), DOTFILES).unwrap();
        std::fs::write(configs_dir.join("b.toml"), DOTFILES).unwrap();
        std::fs::write(configs_dir.join("c.json"), r#"{"name": "base"}"#).unwrap();
        std::fs::write(configs_dir.join("junk.toml"), "not = [valid").unwrap();

        let loaded = fixture.store.list().await.unwrap();

        let names: Vec<_> = loaded.iter().map(|m| (m.name(), m.path.clone())).collect();
        assert_eq!(
            names,
            vec![
                ("dotfiles", configs_dir.join("a.toml")),
                ("base", configs_dir.join("c.json")),
            ]
        );
        assert!(loaded[0].modified.is_some());
    }

    #[tokio::test]
    async fn test_list_without_configs_dir() {
        let fixture = Fixture::new();
        assert!(fixture.store.list().await.unwrap().is_empty());
        assert!(fixture.store.find("dotfiles").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unload_missing_meta_package() {
        let fixture = Fixture::new();
        let mut cache = fixture.cache().await;

        assert!(!fixture.store.unload("dotfiles", &mut cache).await.unwrap());
    }

    #[tokio::test]
    async fn test_unload_removes_descriptor_sources_and_cache_entries() {
        let fixture = Fixture::new();
        fixture
            .store
            .load(&fixture.source("dotfiles.toml", DOTFILES), false)
            .await
            .unwrap();
        let vim_dir = fixture.store.packages_dir().join("dotfiles.vim");
        std::fs::create_dir_all(&vim_dir).unwrap();
        let cache_dir = fixture.dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(
            cache_dir.join("cache.json"),
            r#"{"dotfiles": {"packages": {"vim": {"status": "loaded"}}}}"#,
        )
        .unwrap();
        let mut cache = fixture.cache().await;

        assert!(fixture.store.unload("dotfiles", &mut cache).await.unwrap());

        assert!(!vim_dir.exists());
        assert!(fixture.store.find("dotfiles").await.unwrap().is_none());
        assert_eq!(
            std::fs::read_to_string(cache_dir.join("cache.json")).unwrap(),
            "{}"
        );
    }

    #[tokio::test]
    async fn test_unload_refuses_installed_packages() {
        let fixture = Fixture::new();
        fixture
            .store
            .load(&fixture.source("dotfiles.toml", DOTFILES), false)
            .await
            .unwrap();
        std::fs::create_dir_all(fixture.store.packages_dir().join("dotfiles.zsh")).unwrap();
        let cache_dir = fixture.dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(
            cache_dir.join("cache.json"),
            r#"{"dotfiles": {"packages": {"zsh": {"status": "installed"}}}}"#,
        )
        .unwrap();
        let mut cache = fixture.cache().await;

        let err = fixture.store.unload("dotfiles", &mut cache).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "cannot unload meta-package dotfiles: package dotfiles.zsh is installed"
        );
        assert!(fixture.store.find("dotfiles").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unload_refuses_half_removed_packages() {
        let fixture = Fixture::new();
        fixture
            .store
            .load(&fixture.source("dotfiles.toml", DOTFILES), false)
            .await
            .unwrap();
        std::fs::create_dir_all(fixture.store.packages_dir().join("dotfiles.zsh")).unwrap();
        let cache_dir = fixture.dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(
            cache_dir.join("cache.json"),
            r#"{"dotfiles": {"packages": {"zsh": {"status": "midremove"}}}}"#,
        )
        .unwrap();
        let mut cache = fixture.cache().await;

        let err = fixture.store.unload("dotfiles", &mut cache).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::PackageDeployed {
                status: PackageStatus::MidRemove,
                ..
            }
        ));
        assert!(fixture.store.packages_dir().join("dotfiles.zsh").is_dir());
    }
}
