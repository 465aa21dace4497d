mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use simbridge_core::{DisconnectReason, Gateway};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Completions need no gateway
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "simbridge", &mut std::io::stdout());
            Ok(())
        }

        // All other commands talk to the gateway
        cmd => {
            let mut gateway_config = config::resolve_gateway(&cli.global)?;
            // One-shot commands have no use for the push stream
            if !matches!(cmd, Command::Watch(_)) {
                gateway_config.push_enabled = false;
            }
            let gateway = Gateway::new(gateway_config)?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &gateway, &cli.global).await;

            // Close the session and stop background tasks before exiting
            let _ = gateway.disconnect(DisconnectReason::UserLogout).await;
            gateway.dispose().await;
            result
        }
    }
}
