//! MACROFEED: macroeconomic time-series loader
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the source chain, then either runs a one-shot fetch or warms
//! the cache and serves the HTTP API with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use macrofeed::api::{self, ApiState};
use macrofeed::config::AppConfig;
use macrofeed::engine::DataService;

const BANNER: &str = r#"
 __  __    _    ____ ____   ___  _____ _____ _____ ____
|  \/  |  / \  / ___|  _ \ / _ \|  ___| ____| ____|  _ \
| |\/| | / _ \| |   | |_) | | | | |_  |  _| |  _| | | | |
| |  | |/ ___ \ |___|  _ <| |_| |  _| | |___| |___| |_| |
|_|  |_/_/   \_\____|_| \_\\___/|_|   |_____|_____|____/

  CPI / PPI / unemployment / GDP, cached and fault tolerant
"#;

const USAGE: &str = "usage: macrofeed [serve] | macrofeed fetch <ticker> [range]";

enum Command {
    Serve,
    Fetch { ticker: String, range: Option<String> },
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("serve") => Ok(Command::Serve),
        Some("fetch") => {
            let ticker = args.get(1).cloned().context(USAGE)?;
            Ok(Command::Fetch {
                ticker,
                range: args.get(2).cloned(),
            })
        }
        Some(other) => anyhow::bail!("unknown command '{other}'\n{USAGE}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    init_logging();
    let cfg = AppConfig::load_or_default("config.toml")?;

    let service = Arc::new(DataService::from_config(&cfg).await?);

    match command {
        Command::Fetch { ticker, range } => {
            let response = service.load_envelope(&ticker, range.as_deref(), false).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
        Command::Serve => {
            println!("{BANNER}");
            info!(
                name = %cfg.service.name,
                api_version = %cfg.service.api_version,
                backend = ?cfg.cache.backend,
                cache_dir = %cfg.cache.dir.display(),
                "MACROFEED starting up"
            );

            service.warmup(&cfg.service.warmup_tickers).await;

            // Periodic memory-tier sweep; disk snapshots are left alone.
            let sweeper = {
                let service = service.clone();
                let period = Duration::from_secs(cfg.cache.ttl_secs);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        service.evict_expired().await;
                    }
                })
            };

            let mut state = ApiState::new(
                service.clone(),
                cfg.service.name.clone(),
                cfg.service.api_version.clone(),
                cfg.server.max_results,
            );
            if !cfg.service.warmup_tickers.is_empty() {
                state.dashboard_tickers = cfg.service.warmup_tickers.clone();
            }

            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received.");
            };
            let served = api::serve(Arc::new(state), &cfg.server.host, cfg.server.port, shutdown).await;
            sweeper.abort();
            served?;

            let stats = service.stats().await;
            info!(
                memory_hits = stats.chain.memory_hits,
                disk_hits = stats.chain.disk_hits,
                live_fetches = stats.chain.live_fetches,
                failures = stats.chain.failures,
                "MACROFEED shut down cleanly."
            );
        }
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("macrofeed=info"));

    let json_logging = std::env::var("MACROFEED_LOG_JSON").is_ok();

    // Logs go to stderr so `fetch` output stays pipeable.
    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
