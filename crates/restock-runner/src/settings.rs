//! Runner configuration: a TOML file overlaid with `RESTOCK_*` environment
//! variables, then turned into per-run options.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use config::{Config, ConfigError, Environment, File, FileFormat};
use restock_core::resolve::{DEFAULT_THRESHOLD_DAYS, DuePolicy};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "RESTOCK";

/// Read when no file is named on the command line; may be absent.
pub const DEFAULT_CONFIG_FILE: &str = "restock.toml";

pub const DEFAULT_DELAY_MS: u64 = 200;

fn default_days() -> u32 { DEFAULT_THRESHOLD_DAYS }

fn default_delay_ms() -> u64 { DEFAULT_DELAY_MS }

/// Settings deserialised from the config file and environment.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
  /// SQLite file holding the document store. Must already exist.
  pub store_path:    PathBuf,
  #[serde(default = "default_days")]
  pub days:          u32,
  #[serde(default)]
  pub dry:           bool,
  #[serde(default)]
  pub debug:         bool,
  pub limit:         Option<usize>,
  #[serde(default = "default_delay_ms")]
  pub delay_ms:      u64,
  pub uid:           Option<String>,
  #[serde(default)]
  pub include_never: bool,
}

impl RunnerConfig {
  /// Load from `path` (required to exist when given) or from
  /// [`DEFAULT_CONFIG_FILE`] if present, then from the environment.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
  }

  pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
    let file = match path {
      Some(path) => File::from(path).format(FileFormat::Toml).required(true),
      None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
    };

    Config::builder()
      .add_source(file)
      .add_source(env.try_parsing(true))
      .build()?
      .try_deserialize()
  }

  pub fn run_options(&self) -> RunOptions {
    RunOptions {
      policy:    DuePolicy {
        default_threshold_days:  self.days,
        include_never_purchased: self.include_never,
      },
      dry_run:   self.dry,
      limit:     self.limit,
      delay:     Duration::from_millis(self.delay_ms),
      only_user: self.uid.clone(),
    }
  }
}

/// Everything one run of the job needs to know besides the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
  pub policy:    DuePolicy,
  pub dry_run:   bool,
  /// Process at most this many users.
  pub limit:     Option<usize>,
  /// Pause between consecutive users.
  pub delay:     Duration,
  /// Process only this user.
  pub only_user: Option<String>,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      policy:    DuePolicy::default(),
      dry_run:   false,
      limit:     None,
      delay:     Duration::from_millis(DEFAULT_DELAY_MS),
      only_user: None,
    }
  }
}
