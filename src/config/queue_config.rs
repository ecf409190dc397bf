use std::env;
use std::time::Duration;

/// SQ namespacing and retry/backoff policy (spec.md §6, §4.1).
#[derive(Debug, Clone)]
pub struct QueueEnvConfig {
    pub redis_url: String,
    pub queue_key: String,
    pub processing_key: String,
    pub failed_key: String,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub zombie_timeout: Duration,
}

impl QueueEnvConfig {
    pub fn from_env() -> Self {
        let queue_key = env::var("SIGNAL_QUEUE_KEY").unwrap_or_else(|_| "trading:signals".into());
        let processing_key = env::var("SIGNAL_PROCESSING_KEY")
            .unwrap_or_else(|_| format!("{queue_key}:processing"));
        let failed_key =
            env::var("SIGNAL_FAILED_KEY").unwrap_or_else(|_| format!("{queue_key}:failed"));

        Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into()),
            queue_key,
            processing_key,
            failed_key,
            max_retries: env_parse("SIGNAL_MAX_RETRIES", 5),
            backoff_base_secs: env_parse("SIGNAL_BACKOFF_BASE_SECS", 30),
            backoff_cap_secs: env_parse("SIGNAL_BACKOFF_CAP_SECS", 3600),
            zombie_timeout: Duration::from_secs(env_parse("SIGNAL_ZOMBIE_TIMEOUT_SECS", 300)),
        }
    }

    /// `backoff(n)` per spec §4.1: monotone, capped at a configured ceiling.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(6);
        let secs = self.backoff_base_secs.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.backoff_cap_secs))
    }
}

pub(super) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
