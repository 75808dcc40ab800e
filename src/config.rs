use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const API_URL_VAR: &str = "CLEARCHART_API_URL";
pub const IDENTITY_KEY_VAR: &str = "CLEARCHART_IDENTITY_KEY";
pub const ENVIRONMENT_VAR: &str = "CLEARCHART_ENV";
pub const DATA_DIR_VAR: &str = "CLEARCHART_DATA_DIR";

/// Registry re-poll interval while any document is still processing.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Largest upload accepted client-side (15 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 15 * 1024 * 1024;

/// Where the client runs. Decides popup vs redirect sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Deployed,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Environment::Local),
            "deployed" | "prod" | "production" => Ok(Environment::Deployed),
            _ => Err(ConfigError::Invalid {
                name: ENVIRONMENT_VAR,
                value: value.to_string(),
            }),
        }
    }

    /// Local when the API itself is served from this machine.
    fn infer(api_base_url: &str) -> Self {
        let host = reqwest::Url::parse(api_base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        if host == "localhost" || host == "127.0.0.1" {
            Environment::Local
        } else {
            Environment::Deployed
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub identity_api_key: String,
    pub environment: Environment,
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_upload_bytes: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Required keys that are missing or blank
    /// are an error; nothing is silently defaulted.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let api_base_url = normalize_base_url(&required(API_URL_VAR)?)?;
        let identity_api_key = required(IDENTITY_KEY_VAR)?.trim().to_string();

        let environment = match lookup(ENVIRONMENT_VAR).filter(|v| !v.trim().is_empty()) {
            Some(v) => Environment::parse(&v)?,
            None => Environment::infer(&api_base_url),
        };

        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            api_base_url,
            identity_api_key,
            environment,
            data_dir,
            poll_interval: POLL_INTERVAL,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clearchart")
}

/// Trim trailing slashes and insist on an absolute http(s) URL.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    let invalid = || ConfigError::InvalidUrl {
        name: API_URL_VAR,
        value: raw.to_string(),
    };
    let url = reqwest::Url::parse(&trimmed).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(trimmed)
}
