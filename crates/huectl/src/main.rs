mod cli;
mod commands;
mod error;
mod output;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use huectl_config::FileStorage;
use huectl_core::BridgeConfig;

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
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(mut cli: Cli) -> Result<(), CliError> {
    // Completions need neither config nor bridge.
    if let Command::Completions(args) = &cli.command {
        use clap::CommandFactory;
        use clap_complete::generate;

        let mut cmd = Cli::command();
        generate(args.shell, &mut cmd, "huectl", &mut std::io::stdout());
        return Ok(());
    }

    let config = huectl_config::load_config()?;
    cli.global.apply_defaults(&config.defaults);
    let bridge_config = build_bridge_config(&config, &cli.global);
    let storage = Arc::new(FileStorage::open());

    match cli.command {
        Command::Pair(args) => {
            commands::pair::pair(args, bridge_config, storage, &cli.global).await
        }
        Command::Unlink => commands::pair::unlink(storage.as_ref(), &cli.global),
        Command::Status(args) => {
            commands::pair::status(args, bridge_config, storage, &cli.global).await
        }
        cmd => {
            let bridge = commands::connect(bridge_config, storage).await?;
            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &bridge, &cli.global).await;
            bridge.disconnect().await;
            result
        }
    }
}

/// Config file values with CLI overrides applied. One-shot commands never
/// need the live event stream; `watch` reads events directly.
fn build_bridge_config(config: &huectl_config::Config, global: &cli::GlobalOpts) -> BridgeConfig {
    let mut bridge_config = config.bridge_config();
    if let Some(secs) = global.timeout {
        bridge_config.transport.request_timeout = Duration::from_secs(secs);
    }
    bridge_config.event_stream = false;
    bridge_config
}
