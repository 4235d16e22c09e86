use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Command, ValidateArgs};
use crate::config::Config;
use crate::descriptor::{
    parse_document, DescriptorError, Format, Mode, Schema, Validator, ViolationReport,
};
use crate::errors::{AppError, AppResult};
use crate::store::{
    LoadedMetaPackage, MetaPackageStore, PackageCache, PackageCacheEntry, PackageSelector,
    StoreError,
};
use crate::util::Util;

const STDIN: &str = "-";

pub struct App {
    config: Config,
}

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<ViolationReport>,
}

#[derive(Debug, Serialize)]
struct ListedMetaPackage {
    path: PathBuf,
    modified: Option<DateTime<Utc>>,
    packages: IndexMap<String, PackageCacheEntry>,
}

impl App {
    /// Loads the layered configuration, then applies directory overrides from the command line.
    pub fn new(cli: &Cli) -> AppResult<Self> {
        let mut config = Config::new()?;
        if let Some(mcm_dir) = &cli.mcm_dir {
            config.config.data_dir = mcm_dir.clone();
        }
        if let Some(cache_dir) = &cli.cache_dir {
            config.config.cache_dir = cache_dir.clone();
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, command: Command) -> AppResult<ExitCode> {
        debug!(
            "data dir {}, config dir {}, cache dir {}",
            self.config.config.data_dir.display(),
            self.config.config.config_dir.display(),
            self.config.config.cache_dir.display()
        );

        match command {
            Command::Validate(args) => self.validate(args).await,
            Command::Load { replace, files } => self.load(&files, replace).await,
            Command::Unload { names } => self.unload(&names).await,
            Command::List { json } => self.list(json).await,
            Command::Show { json, selector } => self.show(&selector, json).await,
            Command::Schema => self.schema().await,
        }
    }

    async fn validate(&self, args: ValidateArgs) -> AppResult<ExitCode> {
        let mode = if args.strict {
            Mode::Strict
        } else if args.lenient {
            Mode::Lenient
        } else {
            self.config.validation.mode
        };
        let validator = self.validator(mode, args.schema.as_deref()).await?;
        debug!("Validating in {} mode", validator.mode());

        let mut reports = Vec::with_capacity(args.files.len());
        for file in &args.files {
            let label = file.display().to_string();
            let format = args.format.unwrap_or_else(|| Format::from_path(file));
            let report = match read_input(file).await {
                Ok(text) => match validator.validate_str(&text, format) {
                    Ok(_) => FileReport::valid(label),
                    Err(err) => FileReport::invalid(label, &err),
                },
                Err(err) => FileReport {
                    file: label,
                    valid: false,
                    error: Some(err.to_string()),
                    violations: Vec::new(),
                },
            };
            reports.push(report);
        }

        if args.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            for report in &reports {
                report.print();
            }
        }

        Ok(exit_code(reports.iter().all(|report| report.valid)))
    }

    async fn load(&self, files: &[PathBuf], replace: bool) -> AppResult<ExitCode> {
        let store = self.store().await?;
        let mut succeeded = true;
        for file in files {
            match store.load(file, replace).await {
                Ok(outcome) => println!("{outcome}"),
                Err(err) => {
                    succeeded = false;
                    eprintln!("error: {err}");
                    if let StoreError::Invalid { source, .. } = &err {
                        for violation in source.violations() {
                            eprintln!("  {violation}");
                        }
                    }
                }
            }
        }
        Ok(exit_code(succeeded))
    }

    async fn unload(&self, names: &[String]) -> AppResult<ExitCode> {
        let store = self.store().await?;
        let mut cache = PackageCache::open(&self.config.config.cache_dir).await?;
        debug!("Using package cache {}", cache.path().display());
        for name in names {
            if store.unload(name, &mut cache).await? {
                println!("unloaded meta-package {name}");
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn list(&self, json: bool) -> AppResult<ExitCode> {
        let store = self.store().await?;
        let cache = PackageCache::open(&self.config.config.cache_dir).await?;
        let loaded = store.list().await?;

        let mut listed = IndexMap::new();
        for meta_package in &loaded {
            let mut packages = IndexMap::new();
            for package in meta_package.descriptor.package_names() {
                let entry = cache.lookup(meta_package.name(), package, store.packages_dir())?;
                packages.insert(package.to_owned(), entry);
            }
            listed.insert(
                meta_package.name().to_owned(),
                ListedMetaPackage {
                    path: meta_package.path.clone(),
                    modified: meta_package.modified,
                    packages,
                },
            );
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&listed)?);
            return Ok(ExitCode::SUCCESS);
        }

        println!("data directory: {}", self.config.config.data_dir.display());
        println!("cache directory: {}", self.config.config.cache_dir.display());
        println!();

        let now = Utc::now();
        for (meta_package, listing) in loaded.iter().zip(listed.values()) {
            print_meta_package(meta_package, listing, now);
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn show(&self, selector: &PackageSelector, json: bool) -> AppResult<ExitCode> {
        let store = self.store().await?;
        let Some(loaded) = store.find(&selector.meta_package).await? else {
            return Err(AppError::Unknown(format!(
                "meta-package {} not loaded",
                selector.meta_package
            )));
        };

        let selected = selector.select(&loaded.descriptor)?;
        if selector.package_regex.is_some() && selected.is_empty() {
            warn!("No package of {} matches {selector}", selector.meta_package);
        }

        let descriptor = loaded.descriptor.restricted_to(&selected);
        let text = if json {
            descriptor.to_json_string()?
        } else {
            descriptor.to_toml_string()?
        };
        println!("{}", text.trim_end());
        Ok(ExitCode::SUCCESS)
    }

    async fn schema(&self) -> AppResult<ExitCode> {
        let validator = self.validator(self.config.validation.mode, None).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(validator.schema().document())?
        );
        Ok(ExitCode::SUCCESS)
    }

    /// A validator for `schema`, else the configured schema, else the built-in one.
    async fn validator(&self, mode: Mode, schema: Option<&Path>) -> AppResult<Validator> {
        let Some(path) = schema.or(self.config.validation.schema.as_deref()) else {
            return Ok(Validator::new(mode)?);
        };

        info!("Using schema {}", path.display());
        let invalid = |err: &dyn std::fmt::Display| {
            AppError::Unknown(format!("invalid schema file {}: {err}", path.display()))
        };
        let text = fs::read_to_string(path).await.map_err(|err| invalid(&err))?;
        let document = parse_document(&text, Format::Json).map_err(|err| invalid(&err))?;
        let schema = Schema::compile(document).map_err(DescriptorError::from)?;
        Ok(Validator::with_schema(schema, mode))
    }

    async fn store(&self) -> AppResult<MetaPackageStore> {
        let validator = self.validator(self.config.validation.mode, None).await?;
        let store = MetaPackageStore::new(&self.config.config.data_dir, validator);
        debug!("Using configs dir {}", store.configs_dir().display());
        Ok(store)
    }
}

impl FileReport {
    fn valid(file: String) -> Self {
        Self {
            file,
            valid: true,
            error: None,
            violations: Vec::new(),
        }
    }

    fn invalid(file: String, err: &DescriptorError) -> Self {
        let violations: Vec<_> = err.violations().iter().map(|v| v.report()).collect();
        Self {
            file,
            valid: false,
            error: violations.is_empty().then(|| err.to_string()),
            violations,
        }
    }

    fn print(&self) {
        if self.valid {
            println!("{}: ok", self.file);
        }
        if let Some(error) = &self.error {
            println!("{}: {error}", self.file);
        }
        for violation in &self.violations {
            println!("{}: {}", self.file, violation.message);
        }
    }
}

fn print_meta_package(
    meta_package: &LoadedMetaPackage,
    listing: &ListedMetaPackage,
    now: DateTime<Utc>,
) {
    match meta_package.modified {
        Some(modified) => println!(
            "{}: {} (loaded {})",
            meta_package.name(),
            listing.path.display(),
            Util::get_relative_time(modified, now)
        ),
        None => println!("{}: {}", meta_package.name(), listing.path.display()),
    }

    for (package, entry) in &listing.packages {
        match &entry.package_dir {
            Some(package_dir) => println!("    {package}: {}", package_dir.display()),
            None => println!("    {package}"),
        }
        for (key, value) in entry.attributes() {
            println!("        {key}: {value}");
        }

        let Some(declared) = meta_package.descriptor.package(package) else {
            continue;
        };
        if let Some(mechanisms) = &declared.installation_mechanisms {
            let kinds: Vec<_> = mechanisms.kinds().iter().map(|kind| kind.to_string()).collect();
            if !kinds.is_empty() {
                println!("        mechanisms: {}", kinds.join(", "));
            }
        }
        if let Some(dependencies) = declared.dependencies.as_ref().filter(|d| !d.is_empty()) {
            let dependencies: Vec<_> = dependencies.iter().map(|dep| dep.to_string()).collect();
            println!("        dependencies: {}", dependencies.join(", "));
        }
    }
}

async fn read_input(file: &Path) -> std::io::Result<String> {
    if file == Path::new(STDIN) {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        fs::read_to_string(file).await
    }
}

fn exit_code(succeeded: bool) -> ExitCode {
    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
