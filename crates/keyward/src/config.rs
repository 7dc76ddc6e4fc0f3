//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use keyward_refresh::RefreshConfig;
use serde::{Deserialize, Deserializer};

/// Everything a [`SessionController`](crate::SessionController) and its
/// transports need to know about their environment.
///
/// Deserializable (durations are whole seconds) and loadable from
/// `KEYWARD_*` environment variables via [`from_env`](Self::from_env).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Base URL of the application backend.
    pub backend_url: String,
    /// Path of the provider-token exchange endpoint.
    pub exchange_path: String,
    /// Period of background revalidation. Default: 10 minutes.
    #[serde(deserialize_with = "secs")]
    pub refresh_interval: Duration,
    /// Remaining token lifetime at or below which a request refreshes the
    /// token before being sent. Default: 5 minutes.
    #[serde(deserialize_with = "secs")]
    pub refresh_threshold: Duration,
    /// Bound on every identity-provider and exchange call.
    #[serde(deserialize_with = "secs")]
    pub call_timeout: Duration,
    /// Bound on outbound API calls.
    #[serde(deserialize_with = "secs")]
    pub request_timeout: Duration,
    /// Base URL of the placeholder avatar service.
    pub avatar_base: String,
    /// JSON file backing the durable session mirror. `None` keeps the
    /// mirror in memory.
    pub mirror_path: Option<PathBuf>,
}

impl Default for KeywardConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            exchange_path: "/auth/exchange".to_string(),
            refresh_interval: RefreshConfig::DEFAULT_INTERVAL,
            refresh_threshold: Duration::from_secs(5 * 60),
            call_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            avatar_base: "https://api.dicebear.com/7.x/avataaars/svg".to_string(),
            mirror_path: None,
        }
    }
}

impl KeywardConfig {
    pub const MAX_REFRESH_THRESHOLD: Duration = Duration::from_secs(60 * 60);
    pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

    /// Reads `KEYWARD_*` variables on top of the defaults.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("KEYWARD_BACKEND_URL") {
            cfg.backend_url = v;
        }
        if let Some(v) = lookup("KEYWARD_EXCHANGE_PATH") {
            cfg.exchange_path = v;
        }
        if let Some(v) = lookup("KEYWARD_AVATAR_BASE") {
            cfg.avatar_base = v;
        }
        if let Some(v) = lookup("KEYWARD_MIRROR_PATH") {
            cfg.mirror_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }

        let durations = [
            ("KEYWARD_REFRESH_INTERVAL_SECS", &mut cfg.refresh_interval),
            ("KEYWARD_REFRESH_THRESHOLD_SECS", &mut cfg.refresh_threshold),
            ("KEYWARD_CALL_TIMEOUT_SECS", &mut cfg.call_timeout),
            ("KEYWARD_REQUEST_TIMEOUT_SECS", &mut cfg.request_timeout),
        ];
        for (key, slot) in durations {
            let Some(raw) = lookup(key) else { continue };
            match raw.trim().parse::<u64>() {
                Ok(secs) => *slot = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                }
            }
        }

        cfg
    }

    /// Clamp and normalise values so the config is safe to use.
    ///
    /// - `refresh_interval` at least [`RefreshConfig::MIN_INTERVAL`].
    /// - `refresh_threshold` at most [`Self::MAX_REFRESH_THRESHOLD`].
    /// - Timeouts at least [`Self::MIN_TIMEOUT`].
    /// - `backend_url` without a trailing slash, `exchange_path` with a
    ///   leading one.
    pub fn validated(mut self) -> Self {
        if self.refresh_interval < RefreshConfig::MIN_INTERVAL {
            tracing::warn!(
                secs = self.refresh_interval.as_secs(),
                "refresh_interval below minimum, clamping"
            );
            self.refresh_interval = RefreshConfig::MIN_INTERVAL;
        }
        if self.refresh_threshold > Self::MAX_REFRESH_THRESHOLD {
            tracing::warn!(
                secs = self.refresh_threshold.as_secs(),
                "refresh_threshold above maximum, clamping"
            );
            self.refresh_threshold = Self::MAX_REFRESH_THRESHOLD;
        }
        self.call_timeout = self.call_timeout.max(Self::MIN_TIMEOUT);
        self.request_timeout = self.request_timeout.max(Self::MIN_TIMEOUT);

        let trimmed = self.backend_url.trim_end_matches('/').len();
        self.backend_url.truncate(trimmed);
        if !self.exchange_path.starts_with('/') {
            self.exchange_path.insert(0, '/');
        }
        self
    }

    /// Scheduler settings derived from this config.
    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig::with_interval(self.refresh_interval)
    }
}

fn secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = KeywardConfig::default();
        assert_eq!(cfg.refresh_interval, Duration::from_secs(600));
        assert_eq!(cfg.refresh_threshold, Duration::from_secs(300));
        assert_eq!(cfg.exchange_path, "/auth/exchange");
        assert!(cfg.mirror_path.is_none());
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let cfg = KeywardConfig::from_lookup(lookup(&[
            ("KEYWARD_BACKEND_URL", "https://api.example.com/"),
            ("KEYWARD_REFRESH_INTERVAL_SECS", "120"),
            ("KEYWARD_CALL_TIMEOUT_SECS", "soon"),
            ("KEYWARD_MIRROR_PATH", "/tmp/keyward.json"),
        ]));

        assert_eq!(cfg.backend_url, "https://api.example.com/");
        assert_eq!(cfg.refresh_interval, Duration::from_secs(120));
        assert_eq!(cfg.call_timeout, Duration::from_secs(30));
        assert_eq!(cfg.mirror_path, Some(PathBuf::from("/tmp/keyward.json")));
    }

    #[test]
    fn test_validated_clamps_and_normalises() {
        let cfg = KeywardConfig {
            backend_url: "http://localhost:8000//".into(),
            exchange_path: "auth/exchange".into(),
            refresh_interval: Duration::ZERO,
            refresh_threshold: Duration::from_secs(24 * 3600),
            call_timeout: Duration::ZERO,
            ..Default::default()
        }
        .validated();

        assert_eq!(cfg.backend_url, "http://localhost:8000");
        assert_eq!(cfg.exchange_path, "/auth/exchange");
        assert_eq!(cfg.refresh_interval, RefreshConfig::MIN_INTERVAL);
        assert_eq!(cfg.refresh_threshold, KeywardConfig::MAX_REFRESH_THRESHOLD);
        assert_eq!(cfg.call_timeout, KeywardConfig::MIN_TIMEOUT);
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let cfg: KeywardConfig = serde_json::from_str(
            r#"{"backend_url":"https://api.example.com","refresh_threshold":60}"#,
        )
        .unwrap();

        assert_eq!(cfg.backend_url, "https://api.example.com");
        assert_eq!(cfg.refresh_threshold, Duration::from_secs(60));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(600));
    }
}
