//! Card table server.
//!
//! Serves the table page on `/`, session sockets on `/events`, and runs until
//! Ctrl-C, at which point every open table is closed with a going-away code.

use std::path::PathBuf;

use anyhow::Context;
use card_table::{pages, CardTable};
use clap::Parser;
use fragcast_rt::tasks::{self as rt, TcpListener};
use fragcast_rt::LogFormat;
use fragcast_server::{serve_with, ServerConfig};
use fragcast_session::Registry;

#[derive(Parser, Debug)]
#[command(name = "card_table")]
#[command(version, about = "Two-player card table over server-pushed fragments")]
struct Args {
    /// JSON file with a full or partial server configuration.
    #[arg(long, env = "FRAGCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "FRAGCAST_BIND")]
    bind: Option<String>,

    /// Seconds an unattended table is kept before eviction.
    #[arg(long, env = "FRAGCAST_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    #[arg(long, env = "FRAGCAST_REAP_INTERVAL_SECS")]
    reap_interval_secs: Option<u64>,

    /// Fragments buffered per connection before it is dropped as too slow.
    #[arg(long, env = "FRAGCAST_OUTBOX_CAPACITY")]
    outbox_capacity: Option<usize>,

    /// Log output format (text or json).
    #[arg(long, default_value = "text", env = "FRAGCAST_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    /// File (or defaults) first, then explicit flags on top.
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.session.idle_timeout_secs = secs;
        }
        if let Some(secs) = self.reap_interval_secs {
            config.session.reap_interval_secs = secs;
        }
        if let Some(capacity) = self.outbox_capacity {
            config.session.outbox_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.server_config()?;
    rt::run(args.log_format, serve(config))?
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    let registry = Registry::new(CardTable, config.session.clone());
    let handle = serve_with(listener, &config, registry, pages())?;
    tracing::info!(addr = %handle.local_addr, "card table ready");

    rt::ctrl_c().await.context("waiting for Ctrl-C")?;
    handle.shutdown().await?;
    Ok(())
}
