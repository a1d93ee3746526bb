use crate::engine::{ElapsedMode, EngineConfig};
use crate::sync::SyncConfig;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Конфигурация бинаря из переменных окружения WORKTIMER_*
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub engine: EngineConfig,
    pub db_path: PathBuf,
    /// Нет WORKTIMER_API_URL - зеркало и записи живут в памяти процесса
    pub offline: bool,
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let user_id = get("WORKTIMER_USER_ID").ok_or(ConfigError::Missing("WORKTIMER_USER_ID"))?;

        let sync_defaults = SyncConfig::default();
        let api_url = get("WORKTIMER_API_URL");
        let offline = api_url.is_none();
        let sync = SyncConfig {
            api_base_url: api_url.unwrap_or(sync_defaults.api_base_url),
            http_timeout_secs: parse(
                "WORKTIMER_HTTP_TIMEOUT_SECS",
                get("WORKTIMER_HTTP_TIMEOUT_SECS"),
                sync_defaults.http_timeout_secs,
            )?,
            app_version: sync_defaults.app_version,
            auth_token: get("WORKTIMER_API_TOKEN"),
        };

        let engine_defaults = EngineConfig::default();
        let elapsed_mode = match get("WORKTIMER_ELAPSED_MODE") {
            None => engine_defaults.elapsed_mode,
            Some(value) => ElapsedMode::from_str(&value).map_err(|_| ConfigError::Invalid {
                key: "WORKTIMER_ELAPSED_MODE",
                value,
            })?,
        };
        let engine = EngineConfig {
            user_id,
            target_seconds: parse(
                "WORKTIMER_TARGET_SECS",
                get("WORKTIMER_TARGET_SECS"),
                engine_defaults.target_seconds,
            )?,
            push_every_secs: parse(
                "WORKTIMER_PUSH_EVERY_SECS",
                get("WORKTIMER_PUSH_EVERY_SECS"),
                engine_defaults.push_every_secs,
            )?,
            seed_elapsed_seconds: parse(
                "WORKTIMER_SEED_ELAPSED_SECS",
                get("WORKTIMER_SEED_ELAPSED_SECS"),
                engine_defaults.seed_elapsed_seconds,
            )?,
            elapsed_mode,
        };

        let db_path = get("WORKTIMER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("worktimer.db"));

        Ok(Self {
            sync,
            engine,
            db_path,
            offline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_only_user_id() {
        let config = AppConfig::from_lookup(lookup(&[("WORKTIMER_USER_ID", "u1")])).unwrap();
        assert!(config.offline);
        assert_eq!(config.engine.user_id, "u1");
        assert_eq!(config.engine.push_every_secs, 15);
        assert_eq!(config.engine.target_seconds, 8 * 3600);
        assert_eq!(config.engine.elapsed_mode, ElapsedMode::Ticks);
        assert_eq!(config.db_path, PathBuf::from("worktimer.db"));
        assert_eq!(config.sync.auth_token, None);
    }

    #[test]
    fn test_user_id_is_required() {
        let err = AppConfig::from_lookup(lookup(&[("WORKTIMER_USER_ID", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("WORKTIMER_USER_ID"));
    }

    #[test]
    fn test_full_environment() {
        let config = AppConfig::from_lookup(lookup(&[
            ("WORKTIMER_USER_ID", "u7"),
            ("WORKTIMER_API_URL", "https://timesheets.example.com/api"),
            ("WORKTIMER_API_TOKEN", "secret"),
            ("WORKTIMER_HTTP_TIMEOUT_SECS", "10"),
            ("WORKTIMER_TARGET_SECS", "27000"),
            ("WORKTIMER_PUSH_EVERY_SECS", "30"),
            ("WORKTIMER_SEED_ELAPSED_SECS", "600"),
            ("WORKTIMER_ELAPSED_MODE", "Anchored"),
            ("WORKTIMER_DB_PATH", "/tmp/wt.db"),
        ]))
        .unwrap();
        assert!(!config.offline);
        assert_eq!(config.sync.api_base_url, "https://timesheets.example.com/api");
        assert_eq!(config.sync.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.sync.http_timeout_secs, 10);
        assert_eq!(config.engine.target_seconds, 27000);
        assert_eq!(config.engine.push_every_secs, 30);
        assert_eq!(config.engine.seed_elapsed_seconds, 600);
        assert_eq!(config.engine.elapsed_mode, ElapsedMode::Anchored);
        assert_eq!(config.db_path, PathBuf::from("/tmp/wt.db"));
    }

    #[test]
    fn test_invalid_number() {
        let err = AppConfig::from_lookup(lookup(&[
            ("WORKTIMER_USER_ID", "u1"),
            ("WORKTIMER_PUSH_EVERY_SECS", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "WORKTIMER_PUSH_EVERY_SECS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn test_invalid_elapsed_mode() {
        let err = AppConfig::from_lookup(lookup(&[
            ("WORKTIMER_USER_ID", "u1"),
            ("WORKTIMER_ELAPSED_MODE", "wallclock"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "WORKTIMER_ELAPSED_MODE",
                ..
            }
        ));
    }
}
