use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use infra_sim::cli::{self, Cli};
use infra_sim::error::{Error, Result};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => return Err(Error::Cli(err.to_string())),
    };
    init_tracing(cli.verbose);

    let output = cli::execute(&cli)?;
    print!("{}", output);

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "infra_sim=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
