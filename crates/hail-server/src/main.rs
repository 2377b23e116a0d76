//! hail server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `HAIL_*` environment variables, opens the SQLite location store, and
//! serves the websocket hub over HTTP.
//!
//! # Handshake tokens
//!
//! To print the token a client needs for `/ws`:
//!
//! ```text
//! cargo run -p hail-server --bin hail -- --issue-token D1 --role driver
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use hail_core::Role;
use hail_hub::Hub;
use hail_server::{AppState, PresenceBridge, ServerConfig, auth::issue_token};
use hail_store_sqlite::SqliteLocationStore;
use hail_tracker::{LocationTracker, MemoryCache};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "hail presence and broadcast server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the handshake token for SUBJECT and exit.
  #[arg(long, value_name = "SUBJECT")]
  issue_token: Option<String>,

  /// Role the issued token is bound to.
  #[arg(long, default_value = "driver", requires = "issue_token")]
  role: Role,
}

type Tracker = LocationTracker<SqliteLocationStore, MemoryCache>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config).context("failed to load configuration")?;
  server_cfg
    .validate()
    .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

  if let Some(subject) = cli.issue_token {
    let token = issue_token(&server_cfg.token_secret, &subject, cli.role)
      .context("failed to issue token")?;
    println!("{token}");
    return Ok(());
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteLocationStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let tracker: Arc<Tracker> = Arc::new(LocationTracker::new(
    store,
    MemoryCache::new(),
    server_cfg.tracker.tracker_config(),
  ));
  let hub = Hub::start(server_cfg.hub);

  let stop = CancellationToken::new();
  let pruner = tokio::spawn(prune_loop(
    tracker.clone(),
    server_cfg.tracker.prune_interval(),
    stop.clone(),
  ));

  let state = AppState {
    bridge: PresenceBridge::new(hub.clone(), tracker),
    config: Arc::new(server_cfg.clone()),
  };
  let app = hail_server::router(state);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(hub, stop.clone()))
    .await
    .context("server error")?;

  stop.cancel();
  pruner.await.context("prune task panicked")?;
  Ok(())
}

/// Resolves on ctrl-c after closing every live connection.
async fn shutdown_signal(hub: Hub, stop: CancellationToken) {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for ctrl-c");
  }
  tracing::info!("shutting down");
  stop.cancel();
  hub.shutdown();
}

async fn prune_loop(tracker: Arc<Tracker>, every: std::time::Duration, stop: CancellationToken) {
  let mut ticker = tokio::time::interval(every);
  loop {
    tokio::select! {
      () = stop.cancelled() => break,
      _ = ticker.tick() => match tracker.prune_history().await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "pruned location history"),
        Err(e) => tracing::warn!(error = %e, "history prune failed"),
      },
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
