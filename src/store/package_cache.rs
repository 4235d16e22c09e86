use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

pub const CACHE_FILE: &str = "cache.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access package cache {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package cache {} is corrupt: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error(
        "can't determine the status of package {meta_package}.{package}: the package cache has been tampered with"
    )]
    Tampered {
        meta_package: String,
        package: String,
    },
}

/// Lifecycle of a package as recorded in the cache.
#[derive(
    Debug, Display, Clone, Copy, EnumString, PartialEq, Eq, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    NotLoaded,
    Loaded,
    MidInstall,
    MidRemove,
    Installed,
}

impl PackageStatus {
    /// Whether the package may have files outside its source directory.
    pub fn is_deployed(self) -> bool {
        matches!(
            self,
            PackageStatus::MidInstall | PackageStatus::MidRemove | PackageStatus::Installed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCacheEntry {
    pub status: PackageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl PackageCacheEntry {
    fn not_loaded() -> Self {
        Self {
            status: PackageStatus::NotLoaded,
            package_dir: None,
            packages_dir: None,
            target_dir: None,
            tags: Vec::new(),
            hostname: None,
        }
    }

    /// Key/value pairs worth showing to a user; source directories are left out.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![("status", self.status.to_string())];
        if let Some(target_dir) = &self.target_dir {
            attributes.push(("target_dir", target_dir.display().to_string()));
        }
        if !self.tags.is_empty() {
            attributes.push(("tags", self.tags.join(", ")));
        }
        if let Some(hostname) = &self.hostname {
            attributes.push(("hostname", hostname.clone()));
        }
        attributes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MetaPackageEntries {
    #[serde(default)]
    packages: IndexMap<String, PackageCacheEntry>,
}

/// The on-disk record of package statuses, keyed by meta-package then package name.
#[derive(Debug)]
pub struct PackageCache {
    path: PathBuf,
    meta_packages: IndexMap<String, MetaPackageEntries>,
}

impl PackageCache {
    /// Reads `<cache_dir>/cache.json`, creating an empty cache first if there is none.
    pub async fn open(cache_dir: &Path) -> Result<Self, CacheError> {
        let path = cache_dir.join(CACHE_FILE);
        let io_error = |source| CacheError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(cache_dir).await.map_err(io_error)?;
        if !fs::try_exists(&path).await.map_err(io_error)? {
            debug!("Creating package cache {}", path.display());
            fs::write(&path, "{}").await.map_err(io_error)?;
        }

        let text = fs::read_to_string(&path).await.map_err(io_error)?;
        let meta_packages = serde_json::from_str(&text).map_err(|err| CacheError::Corrupt {
            path: path.clone(),
            message: err.to_string(),
        })?;

        Ok(Self {
            path,
            meta_packages,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached record for a package. A package without a source directory under
    /// `packages_dir` is `notloaded`; one with a directory must have a cache entry.
    pub fn lookup(
        &self,
        meta_package: &str,
        package: &str,
        packages_dir: &Path,
    ) -> Result<PackageCacheEntry, CacheError> {
        if !packages_dir
            .join(format!("{meta_package}.{package}"))
            .is_dir()
        {
            return Ok(PackageCacheEntry::not_loaded());
        }

        self.meta_packages
            .get(meta_package)
            .and_then(|entries| entries.packages.get(package))
            .cloned()
            .ok_or_else(|| CacheError::Tampered {
                meta_package: meta_package.to_owned(),
                package: package.to_owned(),
            })
    }

    pub fn status(
        &self,
        meta_package: &str,
        package: &str,
        packages_dir: &Path,
    ) -> Result<PackageStatus, CacheError> {
        Ok(self.lookup(meta_package, package, packages_dir)?.status)
    }

    /// Forgets every package of `meta_package`. Returns whether anything was recorded.
    pub fn remove_meta_package(&mut self, meta_package: &str) -> bool {
        self.meta_packages.shift_remove(meta_package).is_some()
    }

    pub async fn save(&self) -> Result<(), CacheError> {
        let text =
            serde_json::to_string_pretty(&self.meta_packages).map_err(|err| CacheError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        fs::write(&self.path, text)
            .await
            .map_err(|source| CacheError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
