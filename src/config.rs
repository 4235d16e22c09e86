use std::env;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use config::{Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::descriptor::Mode;
use crate::errors::AppResult;

const CONFIG: &str = include_str!("../.config/config.json5");

pub static PROJECT_NAME: LazyLock<String> =
    LazyLock::new(|| env!("CARGO_CRATE_NAME").to_uppercase());
static DATA_FOLDER: LazyLock<Option<PathBuf>> = LazyLock::new(|| folder_from_env("DATA"));
static CONFIG_FOLDER: LazyLock<Option<PathBuf>> = LazyLock::new(|| folder_from_env("CONFIG"));
static CACHE_FOLDER: LazyLock<Option<PathBuf>> = LazyLock::new(|| folder_from_env("CACHE"));

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub config_dir: PathBuf,
    #[serde(default)]
    pub cache_dir: PathBuf,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Validate against this schema file instead of the built-in one.
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub config: AppConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Config {
    pub fn new() -> AppResult<Self> {
        Self::load(&get_data_dir(), &get_config_dir(), &get_cache_dir())
    }

    /// Layers, lowest first: directory defaults, the built-in config, `config.*` files in
    /// `config_dir`, then `MCM_*` environment variables (`__` separates nested keys).
    pub fn load(data_dir: &Path, config_dir: &Path, cache_dir: &Path) -> AppResult<Self> {
        let mut builder = config::Config::builder()
            .set_default("data_dir", data_dir.to_string_lossy().to_string())?
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .set_default("cache_dir", cache_dir.to_string_lossy().to_string())?
            .add_source(File::from_str(CONFIG, FileFormat::Json5));

        let config_files = [
            ("config.json5", FileFormat::Json5),
            ("config.json", FileFormat::Json),
            ("config.toml", FileFormat::Toml),
        ];
        let mut found_config = false;
        for (file, format) in &config_files {
            let path = config_dir.join(file);
            if path.exists() {
                found_config = true;
            }
            builder = builder.add_source(File::from(path).format(*format).required(false));
        }
        if !found_config {
            debug!(
                "No configuration file found in {}, using defaults",
                config_dir.display()
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&PROJECT_NAME)
                .prefix_separator("_")
                .separator("__"),
        );

        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }
}

fn folder_from_env(kind: &str) -> Option<PathBuf> {
    env::var(format!("{}_{kind}", &*PROJECT_NAME))
        .ok()
        .map(PathBuf::from)
}

pub fn get_data_dir() -> PathBuf {
    if let Some(s) = DATA_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn get_config_dir() -> PathBuf {
    if let Some(s) = CONFIG_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

pub fn get_cache_dir() -> PathBuf {
    if let Some(s) = CACHE_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.cache_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".cache")
    }
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
}
