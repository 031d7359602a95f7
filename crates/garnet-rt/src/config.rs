//! Runtime options.
//!
//! Options can be built in code, read from the environment, or parsed from
//! a JSON document. Unknown JSON keys are rejected so typos do not silently
//! fall back to defaults.

use serde::Deserialize;

/// Environment variable enabling autoload logging.
pub const ENV_LOG_AUTOLOAD: &str = "GARNET_LOG_AUTOLOAD";
/// Environment variable toggling optimization-caution warnings.
pub const ENV_PERFORMANCE_WARNINGS: &str = "GARNET_PERFORMANCE_WARNINGS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Log every autoload constant registration at `info` level.
    pub log_autoload: bool,
    /// Log optimization-caution events (e.g. refining an inlined builtin)
    /// at `warn` level.
    pub performance_warnings: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            log_autoload: false,
            performance_warnings: true,
        }
    }
}

impl RuntimeOptions {
    /// Defaults overridden by `GARNET_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse options from JSON, e.g. `{"log_autoload": true}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RuntimeOptions::default();
        RuntimeOptions {
            log_autoload: lookup(ENV_LOG_AUTOLOAD)
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.log_autoload),
            performance_warnings: lookup(ENV_PERFORMANCE_WARNINGS)
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.performance_warnings),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
