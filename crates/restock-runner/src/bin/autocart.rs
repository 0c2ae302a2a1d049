//! autocart: merge due subscription items into user carts.
//!
//! Reads `restock.toml` (or the file given with `--cred`) and `RESTOCK_*`
//! environment variables, opens the SQLite document store, and runs one pass
//! over every eligible user. Command-line flags override both.
//!
//! ```text
//! autocart --cred restock.toml --dry --debug --limit 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use restock_runner::{Runner, RunnerConfig};
use restock_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Add due subscription items to user carts")]
struct Cli {
  /// Path to the TOML configuration file. Must exist when given.
  #[arg(long, value_name = "FILE")]
  cred: Option<PathBuf>,

  /// Days after which an item without its own frequency is due again.
  #[arg(long, value_name = "N")]
  days: Option<u32>,

  /// Plan and log every write without touching the store.
  #[arg(long)]
  dry: bool,

  /// Log at DEBUG, including every per-item decision.
  #[arg(long)]
  debug: bool,

  /// Process at most this many users.
  #[arg(long, value_name = "N")]
  limit: Option<usize>,

  /// Pause between users, in milliseconds.
  #[arg(long, value_name = "N")]
  delay_ms: Option<u64>,

  /// Process only this user.
  #[arg(long, value_name = "ID")]
  uid: Option<String>,

  /// Treat items with no purchase on record as due.
  #[arg(long)]
  include_never: bool,
}

impl Cli {
  /// Apply flags given on the command line on top of `cfg`.
  fn apply(&self, cfg: &mut RunnerConfig) {
    if let Some(days) = self.days {
      cfg.days = days;
    }
    if let Some(limit) = self.limit {
      cfg.limit = Some(limit);
    }
    if let Some(delay_ms) = self.delay_ms {
      cfg.delay_ms = delay_ms;
    }
    if let Some(uid) = &self.uid {
      cfg.uid = Some(uid.clone());
    }
    cfg.dry |= self.dry;
    cfg.debug |= self.debug;
    cfg.include_never |= self.include_never;
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  let mut cfg = RunnerConfig::load(cli.cred.as_deref()).context("failed to read configuration")?;
  cli.apply(&mut cfg);

  // Initialise tracing.
  let level = if cfg.debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy(),
    )
    .init();

  let store_path = expand_tilde(&cfg.store_path);
  anyhow::ensure!(store_path.exists(), "store not found at {store_path:?}");

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let runner = Runner::new(std::sync::Arc::new(store), cfg.run_options());
  let summary = runner.run(Utc::now()).await.context("run aborted")?;

  if summary.users_failed > 0 {
    tracing::warn!("{} user(s) failed; see errors above", summary.users_failed);
  }

  Ok(())
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
