/**
 * Runtime configuration for the agent.
 *
 * Two constructors: explicit values (`Config { .. }` over `Default`) and
 * `Config::from_env()` which reads the `AIVORY_*` variables. Validation
 * happens once in `validate()`; after that the config is immutable and
 * shared behind an `Arc` for the life of the agent.
 *
 * | Variable                    | Field                 | Default                                  |
 * |-----------------------------|-----------------------|------------------------------------------|
 * | `AIVORY_API_KEY`            | `api_key`             | — (required)                             |
 * | `AIVORY_BACKEND_URL`        | `backend_url`         | `wss://api.aivory.net/ws/monitor/agent`  |
 * | `AIVORY_ENVIRONMENT`        | `environment`         | `production`                             |
 * | `AIVORY_APP_NAME`           | `application_name`    | none                                     |
 * | `AIVORY_SAMPLING_RATE`      | `sampling_rate`       | `1.0`                                    |
 * | `AIVORY_MAX_DEPTH`          | `max_variable_depth`  | `10`                                     |
 * | `AIVORY_DEBUG`              | `debug`               | `false`                                  |
 * | `AIVORY_ENABLE_BREAKPOINTS` | `enable_breakpoints`  | `true`                                   |
 */
use std::env;

use crate::error::{AgentError, Result};
use crate::protocol::constants::{
    DEFAULT_BACKEND_URL, DEFAULT_ENVIRONMENT, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_SAMPLING_RATE,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer credential presented during the transport handshake.
    pub api_key: String,

    /// Secure-websocket URL of the collector.
    pub backend_url: String,

    /// Environment label attached to every exception (`production`, `staging`, ...).
    pub environment: String,

    /// Optional application label reported at registration.
    pub application_name: Option<String>,

    /// Error-hook sampling rate in [0, 1]. Exception captures are never sampled.
    pub sampling_rate: f64,

    /// Variable tree depth bound in [0, 10].
    pub max_variable_depth: u32,

    /// When true, internal failures are logged to stderr.
    pub debug: bool,

    /// When false, the breakpoint registry ignores commands and hits.
    pub enable_breakpoints: bool,

    /// Intended heartbeat cadence, reported to the collector. The host
    /// drives the actual timing.
    pub heartbeat_interval_ms: u64,

    /// Reconnect attempts before the transport stays down. Forced to zero
    /// when the collector rejects our credentials.
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            application_name: None,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            max_variable_depth: DEFAULT_MAX_DEPTH,
            debug: false,
            enable_breakpoints: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl Config {
    /**
     * Builds a config from the `AIVORY_*` environment variables,
     * falling back to the documented defaults for anything unset.
     * Unparseable numeric/boolean values fall back to defaults too;
     * validation only rejects out-of-range values that were parsed.
     */
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            api_key: env::var("AIVORY_API_KEY").unwrap_or_default(),
            backend_url: env::var("AIVORY_BACKEND_URL").unwrap_or(defaults.backend_url),
            environment: env::var("AIVORY_ENVIRONMENT").unwrap_or(defaults.environment),
            application_name: env::var("AIVORY_APP_NAME").ok().filter(|v| !v.is_empty()),
            sampling_rate: env::var("AIVORY_SAMPLING_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sampling_rate),
            max_variable_depth: env::var("AIVORY_MAX_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_variable_depth),
            debug: env::var("AIVORY_DEBUG")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.debug),
            enable_breakpoints: env::var("AIVORY_ENABLE_BREAKPOINTS")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_breakpoints),
            heartbeat_interval_ms: defaults.heartbeat_interval_ms,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
        }
    }

    /**
     * Validates invariants that would otherwise corrupt downstream state:
     * a present api key, a sampling rate inside [0, 1], and a variable
     * depth inside [0, 10].
     */
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AgentError::ConfigInvalid {
                reason: "api_key must not be empty".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(AgentError::ConfigInvalid {
                reason: format!("sampling_rate {} outside [0, 1]", self.sampling_rate),
            });
        }

        if self.max_variable_depth > 10 {
            return Err(AgentError::ConfigInvalid {
                reason: format!("max_variable_depth {} outside [0, 10]", self.max_variable_depth),
            });
        }

        Ok(())
    }
}

/// Accepts the usual truthy spellings; anything else is false.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /**
     * Verifies the documented defaults.
     */
    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend_url, "wss://api.aivory.net/ws/monitor/agent");
        assert_eq!(config.environment, "production");
        assert_eq!(config.sampling_rate, 1.0);
        assert_eq!(config.max_variable_depth, 10);
        assert!(!config.debug);
        assert!(config.enable_breakpoints);
    }

    /**
     * Verifies an empty api key is rejected.
     */
    #[test]
    fn test_empty_api_key_rejected() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(AgentError::ConfigInvalid { .. })
        ));
    }

    /**
     * Verifies the sampling-rate range check.
     */
    #[test]
    fn test_sampling_rate_range() {
        let mut config = Config {
            api_key: "k".into(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.sampling_rate = 1.5;
        assert!(config.validate().is_err());

        config.sampling_rate = -0.1;
        assert!(config.validate().is_err());
    }

    /**
     * Verifies the depth range check.
     */
    #[test]
    fn test_max_depth_range() {
        let mut config = Config {
            api_key: "k".into(),
            ..Config::default()
        };

        config.max_variable_depth = 10;
        assert!(config.validate().is_ok());

        config.max_variable_depth = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool_spellings() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }
}
