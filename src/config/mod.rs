//! Configuration module.
//!
//! Settings load from environment variables plus an optional TOML overlay
//! (spec.md §6). Per §9's "Global singletons -> explicit dependencies", this
//! produces an immutable `Config` that callers pass into component
//! constructors; account scoping is a constructor parameter, not a
//! module-level toggle.

mod execution_config;
mod queue_config;
mod regime_config;

pub use execution_config::{BackupOrderEnvConfig, ExecutionEnvConfig, SignalGeneratorEnvConfig};
pub use queue_config::QueueEnvConfig;
pub use regime_config::{RegimeEnvConfig, SoftExitEnvConfig};

use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct NotifierEnvConfig {
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl NotifierEnvConfig {
    pub fn from_env() -> Self {
        Self {
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
        }
    }
}

/// Aggregated configuration for one account's SG/OE process pair.
#[derive(Debug, Clone)]
pub struct Config {
    pub account_id: String,
    pub database_dsn: String,
    pub redis_url: String,

    pub queue: QueueEnvConfig,
    pub regime: RegimeEnvConfig,
    pub soft_exit: SoftExitEnvConfig,
    pub execution: ExecutionEnvConfig,
    pub backup_order: BackupOrderEnvConfig,
    pub signal_generator: SignalGeneratorEnvConfig,
    pub notifier: NotifierEnvConfig,

    pub fail_closed: bool,
}

impl Config {
    /// Load configuration from environment variables, optionally overlaid by
    /// a TOML file (`config.toml` by default, or `CONFIG_PATH`).
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            Self::apply_toml_overlay(Path::new(&path))?;
        } else if Path::new("config.toml").exists() {
            Self::apply_toml_overlay(Path::new("config.toml"))?;
        }

        let account_id = std::env::var("ACCOUNT_ID").unwrap_or_else(|_| "default".into());
        let database_dsn =
            std::env::var("DATABASE_DSN").unwrap_or_else(|_| "sqlite://tradecore.db".into());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());

        Ok(Self {
            account_id,
            database_dsn,
            redis_url,
            queue: QueueEnvConfig::from_env(),
            regime: RegimeEnvConfig::from_env(),
            soft_exit: SoftExitEnvConfig::from_env(),
            execution: ExecutionEnvConfig::from_env(),
            backup_order: BackupOrderEnvConfig::from_env(),
            signal_generator: SignalGeneratorEnvConfig::from_env(),
            notifier: NotifierEnvConfig::from_env(),
            fail_closed: queue_config::env_parse("PM_FAIL_CLOSED", false),
        })
    }

    /// Overlay values from a TOML file into the process environment before
    /// the per-domain sub-configs read them, so TOML keys share names with
    /// the environment variables documented in spec.md §6.
    fn apply_toml_overlay(path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config overlay {}", path.display()))?;
        let value: toml::Value = text
            .parse()
            .with_context(|| format!("parsing config overlay {}", path.display()))?;

        let table = value
            .as_table()
            .context("config overlay must be a TOML table")?;

        for (key, value) in table {
            if std::env::var(key).is_ok() {
                continue; // environment variables always take precedence
            }
            let as_str = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            // SAFETY: single-threaded startup path, before any component
            // reads the environment.
            unsafe {
                std::env::set_var(key, as_str);
            }
        }
        Ok(())
    }

    /// Namespace a Redis-style key by account id (spec.md §6 persisted state layout).
    pub fn keyed(&self, base: &str) -> String {
        format!("{base}:{}", self.account_id)
    }
}
