mod meta_package_store;
mod package_cache;
mod selector;

pub use meta_package_store::{LoadedMetaPackage, MetaPackageStore, StoreError};
pub use package_cache::{CacheError, PackageCache, PackageCacheEntry, PackageStatus};
pub use selector::{PackageSelector, SelectorError};
