use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{get_cache_dir, get_config_dir, get_data_dir};
use crate::descriptor::Format;
use crate::store::PackageSelector;

/// Meta configuration manager for scm.
#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
    /// Increase output verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// The mcm data directory
    #[arg(short = 'd', long = "mcm-dir", value_name = "MCM_DIR", global = true)]
    pub mcm_dir: Option<PathBuf>,

    /// The mcm cache directory
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Checks meta-package descriptors against the schema without loading them
    Validate(ValidateArgs),

    /// Loads new meta-packages into mcm
    Load {
        /// Replace an already loaded meta-package of the same name
        #[arg(long)]
        replace: bool,

        #[arg(required = true, value_name = "META_PACKAGE_FILE")]
        files: Vec<PathBuf>,
    },

    /// Unloads and removes existing meta-packages from mcm
    Unload {
        #[arg(required = true, value_name = "META_PACKAGE_NAME")]
        names: Vec<String>,
    },

    /// Lists all packages from all loaded meta-packages
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Prints a loaded meta-package, optionally restricted to some of its packages
    Show {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,

        #[arg(value_name = "META_PACKAGE[.PACKAGE_REGEX]")]
        selector: PackageSelector,
    },

    /// Prints the meta-package schema in effect
    Schema,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Report fields the schema does not declare
    #[arg(long, conflicts_with = "lenient")]
    pub strict: bool,

    /// Ignore fields the schema does not declare
    #[arg(long)]
    pub lenient: bool,

    /// Input format, inferred from the file extension by default
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<Format>,

    /// Validate against this JSON schema instead of the configured one
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,

    /// Print a JSON report
    #[arg(long)]
    pub json: bool,

    /// Descriptor files, `-` for stdin
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

static VERSION_MESSAGE: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"),
    )
});

pub fn version() -> String {
    let author = clap::crate_authors!();

    let config_dir_path = get_config_dir().display().to_string();
    let data_dir_path = get_data_dir().display().to_string();
    let cache_dir_path = get_cache_dir().display().to_string();

    format!(
        "\
{}

Authors: {author}

Config directory: {config_dir_path}
Data directory: {data_dir_path}
Cache directory: {cache_dir_path}",
        &*VERSION_MESSAGE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from([
            "mcm", "-vv", "validate", "--strict", "--format", "JSON5", "a.json5", "-",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert!(args.strict);
        assert_eq!(args.format, Some(Format::Json5));
        assert_eq!(args.files, vec![PathBuf::from("a.json5"), PathBuf::from("-")]);
    }

    #[test]
    fn test_strict_conflicts_with_lenient() {
        let result = Cli::try_parse_from(["mcm", "validate", "--strict", "--lenient", "a.toml"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_show_selector() {
        let cli = Cli::parse_from(["mcm", "show", "dotfiles.vim", "-d", "/tmp/mcm"]);
        assert_eq!(cli.mcm_dir, Some(PathBuf::from("/tmp/mcm")));
        let Command::Show { selector, json } = cli.command else {
            panic!("expected show");
        };
        assert!(!json);
        assert_eq!(selector.to_string(), "dotfiles.vim");
    }

    #[test]
    fn test_show_rejects_empty_meta_package() {
        assert!(Cli::try_parse_from(["mcm", "show", ".vim"]).is_err());
    }
}
