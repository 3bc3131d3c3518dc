use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Source, StanceLabel};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for env var {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Process-wide configuration, built once at startup and passed by reference
/// to every component constructor. No component reads ambient env state.
#[derive(Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Base URL of the MTProto gateway sidecar. Required for Telegram runs,
    /// validated at run preflight rather than at load.
    pub telegram_gateway_url: Option<String>,
    pub telegram_request_delay_ms: u64,
    pub telegram_window_days: i64,
    pub telegram_posts_limit: usize,
    pub youtube_api_key: Option<String>,
    pub youtube_api_url: String,
    pub youtube_request_delay_ms: u64,
    pub youtube_window_days: i64,
    pub youtube_videos_limit: usize,
    /// Base URL of the local OpenAI-compatible classification endpoint.
    pub lm_api_url: String,
    pub batch_size: usize,
    pub stance_fallback: StanceLabel,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Update-window length for a source, in days.
    #[must_use]
    pub fn window_days(&self, source: Source) -> i64 {
        match source {
            Source::Telegram => self.telegram_window_days,
            Source::Youtube => self.youtube_window_days,
        }
    }

    /// Delay inserted before each collector call, in milliseconds.
    #[must_use]
    pub fn request_delay_ms(&self, source: Source) -> u64 {
        match source {
            Source::Telegram => self.telegram_request_delay_ms,
            Source::Youtube => self.youtube_request_delay_ms,
        }
    }

    /// Default number of parent items to check per run.
    #[must_use]
    pub fn default_limit(&self, source: Source) -> usize {
        match source {
            Source::Telegram => self.telegram_posts_limit,
            Source::Youtube => self.youtube_videos_limit,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("data_dir", &self.data_dir)
            .field("log_level", &self.log_level)
            .field("telegram_gateway_url", &self.telegram_gateway_url)
            .field(
                "telegram_request_delay_ms",
                &self.telegram_request_delay_ms,
            )
            .field("telegram_window_days", &self.telegram_window_days)
            .field("telegram_posts_limit", &self.telegram_posts_limit)
            .field(
                "youtube_api_key",
                &self.youtube_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("youtube_api_url", &self.youtube_api_url)
            .field("youtube_request_delay_ms", &self.youtube_request_delay_ms)
            .field("youtube_window_days", &self.youtube_window_days)
            .field("youtube_videos_limit", &self.youtube_videos_limit)
            .field("lm_api_url", &self.lm_api_url)
            .field("batch_size", &self.batch_size)
            .field("stance_fallback", &self.stance_fallback)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value fails to parse.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the
/// process, without touching `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value fails to parse.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build the configuration from the provided env-var lookup function.
///
/// Decoupled from the actual environment so tests can feed a plain `HashMap`
/// lookup instead of mutating process env.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_i64 = |var: &str, default: &str| -> Result<i64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<i64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let data_dir = PathBuf::from(or_default("CHANWATCH_DATA_DIR", "./data"));
    let log_level = or_default("CHANWATCH_LOG_LEVEL", "info");

    let telegram_gateway_url = lookup("TELEGRAM_GATEWAY_URL").ok();
    let telegram_request_delay_ms = parse_u64("TELEGRAM_REQUEST_DELAY_MS", "500")?;
    let telegram_window_days = parse_i64("TELEGRAM_WINDOW_DAYS", "7")?;
    let telegram_posts_limit = parse_usize("TELEGRAM_POSTS_LIMIT", "100")?;

    let youtube_api_key = lookup("YOUTUBE_API_KEY").ok();
    let youtube_api_url = or_default("YOUTUBE_API_URL", "https://www.googleapis.com/youtube/v3");
    let youtube_request_delay_ms = parse_u64("YOUTUBE_REQUEST_DELAY_MS", "100")?;
    let youtube_window_days = parse_i64("YOUTUBE_WINDOW_DAYS", "30")?;
    let youtube_videos_limit = parse_usize("YOUTUBE_VIDEOS_LIMIT", "50")?;

    let lm_api_url = or_default("LM_API_URL", "http://localhost:1234");
    let batch_size = parse_usize("CHANWATCH_BATCH_SIZE", "5")?;
    let stance_fallback = parse_stance(&or_default("CHANWATCH_STANCE_FALLBACK", "neutral"))?;
    let request_timeout_secs = parse_u64("CHANWATCH_REQUEST_TIMEOUT_SECS", "30")?;

    if batch_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "CHANWATCH_BATCH_SIZE".to_string(),
            reason: "batch size must be at least 1".to_string(),
        });
    }

    Ok(AppConfig {
        data_dir,
        log_level,
        telegram_gateway_url,
        telegram_request_delay_ms,
        telegram_window_days,
        telegram_posts_limit,
        youtube_api_key,
        youtube_api_url,
        youtube_request_delay_ms,
        youtube_window_days,
        youtube_videos_limit,
        lm_api_url,
        batch_size,
        stance_fallback,
        request_timeout_secs,
    })
}

fn parse_stance(s: &str) -> Result<StanceLabel, ConfigError> {
    match s {
        "neutral" => Ok(StanceLabel::Neutral),
        "pro_ukraine" => Ok(StanceLabel::ProUkraine),
        "pro_russia" => Ok(StanceLabel::ProRussia),
        other => Err(ConfigError::InvalidEnvVar {
            var: "CHANWATCH_STANCE_FALLBACK".to_string(),
            reason: format!("unknown stance label '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use super::*;

    fn lookup_from_map<'a>(
        map: &'a HashMap<&'a str, &'a str>,
    ) -> impl Fn(&str) -> Result<String, VarError> + 'a {
        move |key| {
            map.get(key)
                .map(|v| (*v).to_string())
                .ok_or(VarError::NotPresent)
        }
    }

    #[test]
    fn empty_env_yields_defaults() {
        let map: HashMap<&str, &str> = HashMap::new();
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.telegram_gateway_url.is_none());
        assert_eq!(cfg.telegram_request_delay_ms, 500);
        assert_eq!(cfg.telegram_window_days, 7);
        assert_eq!(cfg.telegram_posts_limit, 100);
        assert!(cfg.youtube_api_key.is_none());
        assert_eq!(cfg.youtube_request_delay_ms, 100);
        assert_eq!(cfg.youtube_window_days, 30);
        assert_eq!(cfg.youtube_videos_limit, 50);
        assert_eq!(cfg.lm_api_url, "http://localhost:1234");
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.stance_fallback, StanceLabel::Neutral);
        assert_eq!(cfg.request_timeout_secs, 30);
    }

    #[test]
    fn window_days_are_per_source() {
        let map: HashMap<&str, &str> = HashMap::new();
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.window_days(Source::Telegram), 7);
        assert_eq!(cfg.window_days(Source::Youtube), 30);
    }

    #[test]
    fn overrides_are_applied() {
        let mut map = HashMap::new();
        map.insert("TELEGRAM_WINDOW_DAYS", "14");
        map.insert("CHANWATCH_BATCH_SIZE", "20");
        map.insert("CHANWATCH_STANCE_FALLBACK", "pro_ukraine");
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.telegram_window_days, 14);
        assert_eq!(cfg.batch_size, 20);
        assert_eq!(cfg.stance_fallback, StanceLabel::ProUkraine);
    }

    #[test]
    fn invalid_delay_is_rejected() {
        let mut map = HashMap::new();
        map.insert("TELEGRAM_REQUEST_DELAY_MS", "soon");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "TELEGRAM_REQUEST_DELAY_MS"),
            "expected InvalidEnvVar(TELEGRAM_REQUEST_DELAY_MS), got: {result:?}"
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut map = HashMap::new();
        map.insert("CHANWATCH_BATCH_SIZE", "0");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "CHANWATCH_BATCH_SIZE"),
            "expected InvalidEnvVar(CHANWATCH_BATCH_SIZE), got: {result:?}"
        );
    }

    #[test]
    fn unknown_stance_fallback_is_rejected() {
        let mut map = HashMap::new();
        map.insert("CHANWATCH_STANCE_FALLBACK", "pro_mars");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "CHANWATCH_STANCE_FALLBACK"),
            "expected InvalidEnvVar(CHANWATCH_STANCE_FALLBACK), got: {result:?}"
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut map = HashMap::new();
        map.insert("YOUTUBE_API_KEY", "super-secret");
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[redacted]"));
    }
}
