mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    commands::SimulateOptions,
    config::load_config,
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_format = match &args.command {
        Commands::Inspect { output, .. } | Commands::Simulate { output, .. } => *output,
    };

    if let Err(e) = run(args).await {
        if output_format.is_json() {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config = load_config(args.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    match args.command {
        Commands::Inspect { master, output } => commands::inspect(&master, output),
        Commands::Simulate {
            master,
            duration,
            seed,
            fault_rate,
            tier,
            measured,
            override_index,
            output,
        } => {
            let options = SimulateOptions {
                duration: Duration::from_secs(duration),
                seed,
                fault_rate,
                tier,
                measured,
                override_index,
                output,
            };
            commands::simulate(config, &master, options).await
        }
    }
}

/// Logs go to stderr so JSON on stdout stays parseable.
fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;

    #[test]
    fn output_format_is_taken_from_either_command() {
        let args = Args::try_parse_from(["abr-sim", "inspect", "m.m3u8", "-o", "json-compact"])
            .unwrap();
        assert!(matches!(
            args.command,
            Commands::Inspect {
                output: OutputFormat::JsonCompact,
                ..
            }
        ));
    }
}
