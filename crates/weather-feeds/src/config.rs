use std::collections::HashMap;
use std::path::PathBuf;

use crate::icons::DEFAULT_ICON_SET;

pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_UPSTREAM_TTL_SECS: u64 = 0;

pub const STATE_DIR_ENV: &str = "WEATHER_FEEDS_STATE_DIR";
pub const UPDATE_INTERVAL_SECS_ENV: &str = "WEATHER_FEEDS_UPDATE_INTERVAL_SECS";
pub const UPSTREAM_TTL_SECS_ENV: &str = "WEATHER_FEEDS_UPSTREAM_TTL_SECS";
pub const API_KEY_ENV: &str = "WEATHER_FEEDS_API_KEY";
pub const SHARED_KEY_ENV: &str = "WEATHER_FEEDS_SHARED_KEY";
pub const TESTING_ENV: &str = "WEATHER_FEEDS_TESTING";
pub const ROOT_ENV: &str = "WEATHER_FEEDS_ROOT";
pub const ICON_SET_ENV: &str = "WEATHER_FEEDS_ICON_SET";
pub const LOG_ENV: &str = "WEATHER_FEEDS_LOG";
const HOME_ENV: &str = "HOME";

pub const PROVIDER_TIMEOUT_SECS: u64 = 5;
pub const PROVIDER_RETRY_MAX_ATTEMPTS: usize = 2;
pub const PROVIDER_RETRY_BASE_BACKOFF_MS: u64 = 200;

/// API keys available to the update path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Key the user configured; updates are unrestricted.
    pub user_key: Option<String>,
    /// Fallback key; each location gets one fetch before further updates
    /// are disallowed.
    pub shared_key: Option<String>,
    /// Lifts the shared-key restriction.
    pub testing: bool,
}

impl Credentials {
    pub fn has_user_key(&self) -> bool {
        self.user_key.is_some()
    }

    /// The key a fetch should use: the user's, else the shared one.
    pub fn effective_key(&self) -> Option<&str> {
        self.user_key.as_deref().or(self.shared_key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub state_dir: PathBuf,
    pub weather_root: PathBuf,
    pub update_interval_secs: u64,
    pub upstream_ttl_secs: u64,
    pub credentials: Credentials,
    pub icon_set: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub(crate) fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let state_dir = resolve_path(&map, STATE_DIR_ENV)
            .unwrap_or_else(|| std::env::temp_dir().join("nils-weather-feeds"));
        let weather_root = resolve_path(&map, ROOT_ENV).unwrap_or_else(|| state_dir.clone());

        Self {
            weather_root,
            state_dir,
            update_interval_secs: resolve_secs(&map, UPDATE_INTERVAL_SECS_ENV)
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS),
            upstream_ttl_secs: resolve_secs(&map, UPSTREAM_TTL_SECS_ENV)
                .unwrap_or(DEFAULT_UPSTREAM_TTL_SECS),
            credentials: Credentials {
                user_key: non_empty(&map, API_KEY_ENV),
                shared_key: non_empty(&map, SHARED_KEY_ENV),
                testing: non_empty(&map, TESTING_ENV).is_some_and(|value| is_truthy(&value)),
            },
            icon_set: non_empty(&map, ICON_SET_ENV).unwrap_or_else(|| DEFAULT_ICON_SET.to_string()),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("locations.properties")
    }

    pub fn forecasts_dir(&self) -> PathBuf {
        self.state_dir.join("forecasts")
    }

    pub fn forecast_path(&self, location_id: &str) -> PathBuf {
        self.forecasts_dir()
            .join(format!("{location_id}.properties"))
    }
}

fn non_empty(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn resolve_path(env_map: &HashMap<String, String>, key: &str) -> Option<PathBuf> {
    let home = env_map.get(HOME_ENV).map(String::as_str);
    non_empty(env_map, key)
        .map(|value| expand_home_path(&value, home))
        .map(PathBuf::from)
}

fn resolve_secs(env_map: &HashMap<String, String>, key: &str) -> Option<u64> {
    non_empty(env_map, key).and_then(|value| value.parse::<u64>().ok())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn expand_home_path(raw: &str, home: Option<&str>) -> String {
    let trimmed = raw.trim();
    let Some(home) = home.map(str::trim).filter(|value| !value.is_empty()) else {
        return trimmed.to_string();
    };

    let home = home.trim_end_matches('/');
    let mut expanded = trimmed.replace("$HOME", home);

    if expanded == "~" {
        expanded = home.to_string();
    } else if let Some(rest) = expanded.strip_prefix("~/") {
        expanded = format!("{home}/{rest}");
    }

    expanded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: PROVIDER_RETRY_MAX_ATTEMPTS,
            base_backoff_ms: PROVIDER_RETRY_BASE_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for_attempt(self, attempt: usize) -> u64 {
        if attempt <= 1 {
            return 0;
        }

        let shift = (attempt - 2).min(8);
        self.base_backoff_ms.saturating_mul(1_u64 << shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_use_temp_state_dir() {
        let config = RuntimeConfig::from_pairs(Vec::<(String, String)>::new());
        assert!(config.state_dir.ends_with("nils-weather-feeds"));
        assert_eq!(config.weather_root, config.state_dir);
        assert_eq!(config.update_interval_secs, 1800);
        assert_eq!(config.upstream_ttl_secs, 0);
        assert_eq!(config.credentials, Credentials::default());
        assert_eq!(config.icon_set, "Gemstone");
    }

    #[test]
    fn config_expands_home_prefix_for_state_dir() {
        let config = RuntimeConfig::from_pairs(vec![
            (HOME_ENV, "/tmp/home"),
            (STATE_DIR_ENV, "~/.local/state/weather"),
            (ROOT_ENV, "$HOME/weather"),
        ]);

        assert_eq!(config.state_dir, PathBuf::from("/tmp/home/.local/state/weather"));
        assert_eq!(config.weather_root, PathBuf::from("/tmp/home/weather"));
        assert_eq!(
            config.forecast_path("42"),
            PathBuf::from("/tmp/home/.local/state/weather/forecasts/42.properties")
        );
    }

    #[test]
    fn config_ignores_zero_or_garbage_interval() {
        let config = RuntimeConfig::from_pairs(vec![(UPDATE_INTERVAL_SECS_ENV, "0")]);
        assert_eq!(config.update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);

        let config = RuntimeConfig::from_pairs(vec![
            (UPDATE_INTERVAL_SECS_ENV, "soon"),
            (UPSTREAM_TTL_SECS_ENV, "3600"),
        ]);
        assert_eq!(config.update_interval_secs, DEFAULT_UPDATE_INTERVAL_SECS);
        assert_eq!(config.upstream_ttl_secs, 3600);
    }

    #[test]
    fn credentials_prefer_user_key() {
        let config = RuntimeConfig::from_pairs(vec![
            (API_KEY_ENV, " user-key "),
            (SHARED_KEY_ENV, "shared-key"),
            (TESTING_ENV, "Yes"),
        ]);
        assert!(config.credentials.has_user_key());
        assert_eq!(config.credentials.effective_key(), Some("user-key"));
        assert!(config.credentials.testing);

        let shared_only = Credentials {
            shared_key: Some("shared-key".to_string()),
            ..Credentials::default()
        };
        assert_eq!(shared_only.effective_key(), Some("shared-key"));
        assert!(!shared_only.has_user_key());
    }

    #[test]
    fn retry_backoff_doubles_after_second_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for_attempt(1), 0);
        assert_eq!(policy.backoff_for_attempt(2), 200);
        assert_eq!(policy.backoff_for_attempt(3), 400);
    }
}
