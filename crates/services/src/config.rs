use std::env;
use std::time::Duration;

use reqwest::Url;
use uuid::Uuid;

use crate::error::ConfigError;

pub const DB_URL_VAR: &str = "FACTS_DB_URL";
pub const REMOTE_URL_VAR: &str = "FACTS_REMOTE_URL";
pub const REMOTE_KEY_VAR: &str = "FACTS_REMOTE_KEY";
pub const USER_ID_VAR: &str = "FACTS_USER_ID";
pub const HISTORY_LIMIT_VAR: &str = "FACTS_HISTORY_LIMIT";
pub const TARGET_SCORE_VAR: &str = "FACTS_TARGET_SCORE";
pub const RESPONSE_WINDOW_VAR: &str = "FACTS_RESPONSE_WINDOW_SECS";

pub const DEFAULT_DB_URL: &str = "sqlite:facts.sqlite3";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const DEFAULT_TARGET_SCORE: i64 = 300;
pub const DEFAULT_RESPONSE_WINDOW: Duration = Duration::from_secs(30);

/// Where and how to reach the remote store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub base_url: Url,
    pub api_key: String,
}

/// Runtime configuration for the practice services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_url: String,
    pub remote: Option<RemoteEndpoint>,
    pub user_id: Option<Uuid>,
    /// Completed runs kept in the local history.
    pub history_limit: u32,
    pub target_score: i64,
    pub response_window: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_owned(),
            remote: None,
            user_id: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            target_score: DEFAULT_TARGET_SCORE,
            response_window: DEFAULT_RESPONSE_WINDOW,
        }
    }
}

impl CoreConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`, treating blank values as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(db_url) = get(DB_URL_VAR) {
            config.db_url = db_url;
        }

        if let (Some(url), Some(api_key)) = (get(REMOTE_URL_VAR), get(REMOTE_KEY_VAR)) {
            let base_url = Url::parse(&url).map_err(|_| ConfigError::InvalidUrl {
                name: REMOTE_URL_VAR,
                value: url.clone(),
            })?;
            config.remote = Some(RemoteEndpoint { base_url, api_key });
        }

        if let Some(raw) = get(USER_ID_VAR) {
            config.user_id = Some(parse_uuid(USER_ID_VAR, &raw)?);
        }
        if let Some(raw) = get(HISTORY_LIMIT_VAR) {
            config.history_limit = parse_positive(HISTORY_LIMIT_VAR, &raw)?;
        }
        if let Some(raw) = get(TARGET_SCORE_VAR) {
            config.target_score = i64::from(parse_positive(TARGET_SCORE_VAR, &raw)?);
        }
        if let Some(raw) = get(RESPONSE_WINDOW_VAR) {
            config.response_window =
                Duration::from_secs(u64::from(parse_positive(RESPONSE_WINDOW_VAR, &raw)?));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_db_url(mut self, db_url: impl Into<String>) -> Self {
        self.db_url = db_url.into();
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Option<RemoteEndpoint>) -> Self {
        self.remote = remote;
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_history_limit(mut self, history_limit: u32) -> Self {
        self.history_limit = history_limit;
        self
    }

    #[must_use]
    pub fn with_target_score(mut self, target_score: i64) -> Self {
        self.target_score = target_score;
        self
    }

    #[must_use]
    pub fn with_response_window(mut self, response_window: Duration) -> Self {
        self.response_window = response_window;
        self
    }

    /// Endpoint and user to sync as; remote sync needs both.
    #[must_use]
    pub fn remote_sync(&self) -> Option<(&RemoteEndpoint, Uuid)> {
        Some((self.remote.as_ref()?, self.user_id?))
    }
}

/// Parse a `--user`-style value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidUuid` if `raw` is not a UUID.
pub fn parse_uuid(name: &'static str, raw: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ConfigError::InvalidUuid {
        name,
        value: raw.to_owned(),
    })
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_owned(),
        }),
    }
}
