//! Orchestrator Configuration Settings
//!
//! Configuration types for the optimization orchestrator, loaded from
//! environment variables. Every knob has a default so the service starts
//! with no environment at all; the only hard requirement is a shared
//! secret once remote delegation is configured.

use std::time::Duration;

/// Shared secret used to authenticate internal orchestrator traffic.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a non-empty secret, trimming surrounding whitespace.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the secret value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedSecret").field(&"[REDACTED]").finish()
    }
}

/// Scheduling and parameter-space limits.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Largest allowed combinatorial estimate for a parameter space.
    pub param_space_max: u64,
    /// Upper bound on a job's concurrency limit.
    pub concurrency_limit_max: usize,
    /// Leaderboard size kept per job.
    pub top_n_limit: usize,
    /// Retry attempts granted to a retryable task failure.
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_base: Duration,
    /// Hard cap on tasks materialized per job.
    pub task_cap: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            param_space_max: 500,
            concurrency_limit_max: 16,
            top_n_limit: 5,
            max_retries: 5,
            retry_base: Duration::from_secs(2),
            task_cap: 1000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Public and internal API port.
    pub http_port: u16,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Requests allowed per owner per minute on the status endpoint.
    pub status_rate_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            metrics_port: 9090,
            status_rate_limit: 90,
        }
    }
}

/// Remote orchestrator delegation settings.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    /// Base URL of the remote orchestrator; in-memory backend when unset.
    pub base_url: Option<String>,
    /// Secret presented to the remote orchestrator.
    pub secret: Option<SharedSecret>,
}

impl RemoteSettings {
    /// Whether delegation to a remote orchestrator is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Scheduling and parameter-space limits.
    pub scheduler: SchedulerSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Secret required on internal endpoints; open when unset.
    pub shared_secret: Option<SharedSecret>,
    /// Remote delegation settings.
    pub remote: RemoteSettings,
}

impl OrchestratorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a remote orchestrator URL is configured
    /// without the secret needed to talk to it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let scheduler = SchedulerSettings {
            param_space_max: parse_env_u64(
                "OPT_PARAM_SPACE_MAX",
                SchedulerSettings::default().param_space_max,
            )
            .max(1),
            concurrency_limit_max: parse_env_usize(
                "OPT_CONCURRENCY_LIMIT_MAX",
                SchedulerSettings::default().concurrency_limit_max,
            )
            .max(1),
            top_n_limit: parse_env_usize(
                "OPT_TOP_N_LIMIT",
                SchedulerSettings::default().top_n_limit,
            )
            .max(1),
            max_retries: parse_env_u32("OPT_MAX_RETRIES", SchedulerSettings::default().max_retries),
            retry_base: parse_env_duration_secs(
                "OPT_RETRY_BASE_SECONDS",
                SchedulerSettings::default().retry_base,
            )
            .max(Duration::from_secs(1)),
            task_cap: parse_env_usize("OPT_TASK_CAP", SchedulerSettings::default().task_cap)
                .max(1),
        };

        let server = ServerSettings {
            http_port: parse_env_u16("OPT_HTTP_PORT", ServerSettings::default().http_port),
            metrics_port: parse_env_u16("OPT_METRICS_PORT", ServerSettings::default().metrics_port),
            status_rate_limit: parse_env_usize(
                "OPT_STATUS_RATE_LIMIT",
                ServerSettings::default().status_rate_limit,
            )
            .max(1),
        };

        let shared_secret = std::env::var("OPT_SHARED_SECRET")
            .ok()
            .and_then(|raw| SharedSecret::new(&raw));

        let base_url = std::env::var("OPTIMIZATION_ORCHESTRATOR_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|url| !url.is_empty());
        let remote_secret = std::env::var("OPTIMIZATION_ORCHESTRATOR_SECRET")
            .ok()
            .and_then(|raw| SharedSecret::new(&raw));
        if base_url.is_some() && remote_secret.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "OPTIMIZATION_ORCHESTRATOR_SECRET".to_string(),
            ));
        }

        Ok(Self {
            scheduler,
            server,
            shared_secret,
            remote: RemoteSettings {
                base_url,
                secret: remote_secret,
            },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_trims_and_rejects_empty() {
        assert!(SharedSecret::new("").is_none());
        assert!(SharedSecret::new("   ").is_none());
        let secret = SharedSecret::new("  s3cret  ").unwrap();
        assert_eq!(secret.value(), "s3cret");
    }

    #[test]
    fn shared_secret_redacted_debug() {
        let secret = SharedSecret::new("s3cret").unwrap();
        let debug = format!("{secret:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn scheduler_defaults() {
        let defaults = SchedulerSettings::default();
        assert_eq!(defaults.param_space_max, 500);
        assert_eq!(defaults.concurrency_limit_max, 16);
        assert_eq!(defaults.top_n_limit, 5);
        assert_eq!(defaults.max_retries, 5);
        assert_eq!(defaults.retry_base, Duration::from_secs(2));
        assert_eq!(defaults.task_cap, 1000);
    }

    #[test]
    fn remote_settings_configured_only_with_url() {
        assert!(!RemoteSettings::default().is_configured());
        let remote = RemoteSettings {
            base_url: Some("http://orchestrator:8080".into()),
            secret: SharedSecret::new("s"),
        };
        assert!(remote.is_configured());
    }
}
