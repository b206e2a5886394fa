//! carlinkd - Vehicle cloud connector daemon
//!
//! Polls the vehicle cloud on a fixed interval, keeps the vehicle state
//! model current and prints periodic state summaries. Remote commands are
//! available through the connector API when embedding; the daemon itself is
//! poll-only.
//!
//! Usage:
//!   carlinkd [OPTIONS] <config.toml>

use carlink_connector::{Connector, ConnectorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
struct Args {
    /// Connector config file (TOML)
    config_path: Option<String>,
    /// Dump one state snapshot as JSON on shutdown
    dump_state: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        dump_state: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dump-state" => {
                result.dump_state = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"carlinkd - Vehicle cloud connector daemon

Usage: carlinkd [OPTIONS] <config.toml>

Options:
      --dump-state  Print a JSON snapshot of all vehicles on shutdown
  -h, --help        Print this help message

The config file must at least set base_url; credentials come from the
config or from the netrc secret store (~/.netrc, machine carlink-<brand>).

Example config:

  base_url = "https://cloud.example.com"
  brand = "cupra"
  username = "user@example.com"
  password = "..."
  interval = 300
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let Some(config_path) = args.config_path else {
        print_help();
        anyhow::bail!("missing config file argument");
    };

    let config = ConnectorConfig::load(&config_path)?;

    // Level for our own crates from the config, wire log separately;
    // RUST_LOG overrides both.
    let default_filter = format!(
        "carlinkd={level},carlink_connector={level},carlink_client={level},carlink_core={level},carlink::api={api}",
        level = config.log_level,
        api = config.api_log_level,
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(config = %config_path, "starting carlinkd");

    let connector = Connector::start(config).await?;
    let model = connector.model();

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");

    connector.shutdown().await;

    if args.dump_state {
        let snapshot = model.snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}
