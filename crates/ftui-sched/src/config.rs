#![forbid(unsafe_code)]

//! Scheduler configuration.
//!
//! Defaults match the timings the scheduler was tuned with: a 360 ms
//! protection window after the last direct input event, and a 500 ms fallback
//! for transitions whose completion signal never arrives.
//!
//! Configuration can come from code, from `FTUI_SCHED_*` environment
//! variables, or (with the `policy-config` feature) from TOML/JSON policy
//! files.

use std::env;
#[cfg(feature = "policy-config")]
use std::fmt;
use std::time::Duration;

/// Default debounce window after the last direct input event.
pub const DEFAULT_PROTECTION_WINDOW: Duration = Duration::from_millis(360);

/// Default fallback delay for transition completion signals.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_millis(500);

const ENV_PROTECTION_MS: &str = "FTUI_SCHED_PROTECTION_MS";
const ENV_TRANSITION_TIMEOUT_MS: &str = "FTUI_SCHED_TRANSITION_TIMEOUT_MS";
const ENV_MAX_FRAME_DELAY_MS: &str = "FTUI_SCHED_MAX_FRAME_DELAY_MS";

/// Timing policy for a [`Scheduler`](crate::Scheduler) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long after the last direct event mutations and non-feedback
    /// transitions stay deferred.
    pub protection_window: Duration,
    /// Fallback delay used when a transition's completion signal never fires.
    pub transition_timeout: Duration,
    /// Upper bound on how long a continuously superseded frame callback may
    /// be pushed back. `None` keeps rescheduling on every event.
    pub max_frame_delay: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            protection_window: DEFAULT_PROTECTION_WINDOW,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            max_frame_delay: None,
        }
    }
}

impl SchedulerConfig {
    /// Set the protection window.
    #[must_use]
    pub fn with_protection_window(mut self, window: Duration) -> Self {
        self.protection_window = window;
        self
    }

    /// Set the default transition timeout.
    #[must_use]
    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = timeout;
        self
    }

    /// Bound frame-callback postponement under continuous input.
    #[must_use]
    pub fn with_max_frame_delay(mut self, delay: Option<Duration>) -> Self {
        self.max_frame_delay = delay;
        self
    }

    /// Defaults overridden by `FTUI_SCHED_*` environment variables.
    ///
    /// Unparsable values are ignored (logged at warn level).
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env_with(|key| env::var(key).ok())
    }

    fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_ms(ENV_PROTECTION_MS, lookup(ENV_PROTECTION_MS)) {
            self.protection_window = ms;
        }
        if let Some(ms) = parse_ms(ENV_TRANSITION_TIMEOUT_MS, lookup(ENV_TRANSITION_TIMEOUT_MS)) {
            self.transition_timeout = ms;
        }
        if let Some(ms) = parse_ms(ENV_MAX_FRAME_DELAY_MS, lookup(ENV_MAX_FRAME_DELAY_MS)) {
            self.max_frame_delay = Some(ms);
        }
        self
    }
}

fn parse_ms(key: &str, raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable scheduler setting");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Policy files
// ---------------------------------------------------------------------------

/// Error loading a scheduler policy file.
#[cfg(feature = "policy-config")]
#[derive(Debug)]
pub enum ConfigError {
    /// The policy file could not be read.
    Io(std::io::Error),
    /// The policy text is not valid for its format.
    Parse(String),
    /// The file extension is neither `.toml` nor `.json`.
    UnknownFormat(String),
}

#[cfg(feature = "policy-config")]
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read scheduler policy: {err}"),
            Self::Parse(msg) => write!(f, "invalid scheduler policy: {msg}"),
            Self::UnknownFormat(path) => {
                write!(f, "unknown scheduler policy format: {path}")
            }
        }
    }
}

#[cfg(feature = "policy-config")]
impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(feature = "policy-config")]
impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(feature = "policy-config")]
mod policy {
    use super::{ConfigError, SchedulerConfig};
    use std::path::Path;
    use std::time::Duration;

    /// On-disk shape of a policy file. Missing keys keep their defaults.
    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct PolicyFile {
        protection_window_ms: Option<u64>,
        transition_timeout_ms: Option<u64>,
        max_frame_delay_ms: Option<u64>,
    }

    impl PolicyFile {
        fn into_config(self) -> SchedulerConfig {
            let mut config = SchedulerConfig::default();
            if let Some(ms) = self.protection_window_ms {
                config.protection_window = Duration::from_millis(ms);
            }
            if let Some(ms) = self.transition_timeout_ms {
                config.transition_timeout = Duration::from_millis(ms);
            }
            config.max_frame_delay = self.max_frame_delay_ms.map(Duration::from_millis);
            config
        }
    }

    impl SchedulerConfig {
        /// Parse a TOML policy.
        ///
        /// # Errors
        ///
        /// [`ConfigError::Parse`] if the text is not a valid policy.
        pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
            let file: PolicyFile =
                toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
            Ok(file.into_config())
        }

        /// Parse a JSON policy.
        ///
        /// # Errors
        ///
        /// [`ConfigError::Parse`] if the text is not a valid policy.
        pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
            let file: PolicyFile =
                serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
            Ok(file.into_config())
        }

        /// Load a policy file, choosing the format by extension.
        ///
        /// # Errors
        ///
        /// - [`ConfigError::Io`] if the file cannot be read.
        /// - [`ConfigError::UnknownFormat`] for extensions other than
        ///   `toml`/`json`.
        /// - [`ConfigError::Parse`] if the contents are invalid.
        pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
            let path = path.as_ref();
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase);
            let loader: fn(&str) -> Result<Self, ConfigError> = match ext.as_deref() {
                Some("toml") => Self::from_toml_str,
                Some("json") => Self::from_json_str,
                _ => return Err(ConfigError::UnknownFormat(path.display().to_string())),
            };
            let text = std::fs::read_to_string(path)?;
            let config = loader(&text)?;
            tracing::debug!(path = %path.display(), ?config, "loaded scheduler policy");
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.protection_window, Duration::from_millis(360));
        assert_eq!(config.transition_timeout, Duration::from_millis(500));
        assert_eq!(config.max_frame_delay, None);
    }

    #[test]
    fn builders_override() {
        let config = SchedulerConfig::default()
            .with_protection_window(Duration::from_millis(100))
            .with_transition_timeout(Duration::from_millis(50))
            .with_max_frame_delay(Some(Duration::from_millis(64)));
        assert_eq!(config.protection_window, Duration::from_millis(100));
        assert_eq!(config.transition_timeout, Duration::from_millis(50));
        assert_eq!(config.max_frame_delay, Some(Duration::from_millis(64)));
    }

    #[test]
    fn env_overrides_apply() {
        let config = SchedulerConfig::default().apply_env_with(env_of(&[
            (ENV_PROTECTION_MS, "200"),
            (ENV_MAX_FRAME_DELAY_MS, " 48 "),
        ]));
        assert_eq!(config.protection_window, Duration::from_millis(200));
        assert_eq!(config.transition_timeout, DEFAULT_TRANSITION_TIMEOUT);
        assert_eq!(config.max_frame_delay, Some(Duration::from_millis(48)));
    }

    #[test]
    fn env_garbage_is_ignored() {
        let config = SchedulerConfig::default()
            .apply_env_with(env_of(&[(ENV_TRANSITION_TIMEOUT_MS, "soon")]));
        assert_eq!(config, SchedulerConfig::default());
    }

    #[cfg(feature = "policy-config")]
    #[test]
    fn config_error_display() {
        let err = ConfigError::UnknownFormat("policy.yaml".into());
        assert_eq!(err.to_string(), "unknown scheduler policy format: policy.yaml");
    }
}
