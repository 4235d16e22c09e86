mod app;
mod cli;
mod config;
mod descriptor;
mod errors;
mod logging;
mod store;
mod util;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use color_eyre::Result;

use crate::app::App;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    errors::init()?;

    let args = Cli::parse();
    let app = App::new(&args)?;
    logging::init(args.verbose, &app.config().config.data_dir)?;

    let code = app.run(args.command).await?;
    Ok(code)
}
