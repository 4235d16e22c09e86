use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::LazyLock;

use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config;

static LOG_ENV: LazyLock<String> =
    LazyLock::new(|| format!("{}_LOGLEVEL", &*config::PROJECT_NAME));
static LOG_FILE: LazyLock<String> = LazyLock::new(|| format!("{}.log", env!("CARGO_PKG_NAME")));

/// Maps `-v` occurrences to the level shown on stderr.
fn stderr_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

pub fn init(verbosity: u8, data_dir: &Path) -> color_eyre::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join(&*LOG_FILE);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let env_filter = EnvFilter::builder().with_default_directive(tracing::Level::INFO.into());
    // `RUST_LOG` wins over `MCM_LOGLEVEL`; a malformed `MCM_LOGLEVEL` is an error.
    let env_filter = env_filter
        .try_from_env()
        .or_else(|_| env_filter.with_env_var(&*LOG_ENV).from_env())?;
    let file_subscriber = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);
    let stderr_subscriber = fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_filter(stderr_level(verbosity));
    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(stderr_subscriber)
        .with(ErrorLayer::default())
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stderr_level_follows_verbosity() {
        assert_eq!(stderr_level(0), LevelFilter::WARN);
        assert_eq!(stderr_level(1), LevelFilter::INFO);
        assert_eq!(stderr_level(2), LevelFilter::DEBUG);
        assert_eq!(stderr_level(7), LevelFilter::DEBUG);
    }
}
