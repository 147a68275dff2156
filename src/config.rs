//! Environment configuration for the demo binary. The library core never
//! reads the environment directly; callers build a [`ConnectionInfo`]
//! (see [`crate::connection`]) and pass it to [`crate::manager::Manager::connect`].

use std::env;
use std::time::Duration;

const DEFAULT_EXIT_DELAY_MS: u64 = 150;
const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 2_000;

/// CLI-facing configuration read from the environment. `url` supplies the
/// default connection string; the drain timings bound how long the launcher
/// waits for in-flight sends to land before exiting.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub url: Option<String>,
    pub exit_delay: Duration,
    pub flush_timeout: Duration,
}

impl CliConfig {
    pub fn from_env() -> Self {
        let url = env::var("OPENPULL_URL").ok();
        let exit_delay = env::var("OPENPULL_EXIT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(DEFAULT_EXIT_DELAY_MS));
        let flush_timeout = env::var("OPENPULL_FLUSH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS));

        Self {
            url,
            exit_delay,
            flush_timeout,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            url: None,
            exit_delay: Duration::from_millis(DEFAULT_EXIT_DELAY_MS),
            flush_timeout: Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let cfg = CliConfig::default();
        assert_eq!(cfg.exit_delay, Duration::from_millis(DEFAULT_EXIT_DELAY_MS));
        assert_eq!(cfg.flush_timeout, Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS));
        assert!(cfg.url.is_none());
    }
}
