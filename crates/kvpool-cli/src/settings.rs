//! Settings file and environment loading
//!
//! ```toml
//! [pool]
//! max_connections = 5
//! min_connections = 1
//!
//! [redis]
//! host = "127.0.0.1"
//! port = 6379
//!
//! [reconnect]
//! max_retries = 3
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use kvpool::{PoolConfig, ReconnectPolicy};
use kvpool_redis::RedisEndpoint;
use serde::{Deserialize, Serialize};

/// Everything needed to build a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pool: PoolConfig,
    pub redis: RedisEndpoint,
    pub reconnect: ReconnectPolicy,
}

/// Values given on the command line, applied over the loaded settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub max_connections: Option<usize>,
    pub min_connections: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
}

impl Settings {
    /// `<config dir>/kvpool/kvpool.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kvpool").join("kvpool.toml"))
    }

    /// Load from `path`, else the default settings file if it exists, else
    /// from `KVPOOL_REDIS_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        if let Some(path) = Self::default_path().filter(|path| path.is_file()) {
            return Self::from_file(&path);
        }

        let redis = RedisEndpoint::from_env().context("reading KVPOOL_REDIS_* variables")?;
        tracing::debug!("no settings file found, using environment");
        Ok(Self {
            redis,
            ..Self::default()
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings = Self::parse(&text)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command-line overrides and validate the result
    pub fn with_overrides(mut self, overrides: &Overrides) -> anyhow::Result<Self> {
        if let Some(url) = &overrides.url {
            self.redis = RedisEndpoint::from_url(url.clone());
        }
        if let Some(max) = overrides.max_connections {
            self.pool = self.pool.with_max_connections(max);
        }
        if let Some(min) = overrides.min_connections {
            self.pool = self.pool.with_min_connections(min);
        }
        if let Some(timeout_ms) = overrides.acquire_timeout_ms {
            self.pool = self.pool.with_acquire_timeout_ms(timeout_ms);
        }

        self.pool.validate().context("invalid pool settings")?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_full() {
        let settings = Settings::parse(
            r#"
            [pool]
            max_connections = 8
            min_connections = 2
            acquire_timeout_ms = 500

            [redis]
            host = "cache.internal"
            password = "pw"
            tls = true

            [reconnect]
            max_retries = 1
            connect_timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(settings.pool.max_connections(), 8);
        assert_eq!(settings.pool.min_connections(), 2);
        assert_eq!(settings.pool.acquire_timeout(), Duration::from_millis(500));
        assert_eq!(settings.pool.idle_timeout(), Duration::from_secs(120));
        assert_eq!(
            settings.redis.connection_url(),
            "rediss://:pw@cache.internal:6379/0"
        );
        assert_eq!(settings.reconnect.max_retries(), 1);
        assert_eq!(settings.reconnect.connect_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_rejects_unknown_types() {
        assert!(Settings::parse("[pool]\nmax_connections = \"many\"").is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = Overrides {
            url: Some("redis://10.1.1.1:6379/4".into()),
            max_connections: Some(3),
            min_connections: Some(0),
            acquire_timeout_ms: Some(250),
        };
        let settings = Settings::default().with_overrides(&overrides).unwrap();

        assert_eq!(settings.redis.connection_url(), "redis://10.1.1.1:6379/4");
        assert_eq!(settings.pool.max_connections(), 3);
        assert_eq!(settings.pool.min_connections(), 0);
        assert_eq!(settings.pool.acquire_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_overrides_are_validated() {
        let overrides = Overrides {
            max_connections: Some(1),
            min_connections: Some(4),
            ..Overrides::default()
        };
        let err = Settings::default().with_overrides(&overrides).unwrap_err();
        assert!(format!("{:#}", err).contains("cannot exceed"));
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir().join(format!("kvpool-settings-{}.toml", std::process::id()));
        std::fs::write(&path, "[pool]\nmax_connections = 2\nmin_connections = 0\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.pool.max_connections(), 2);
        assert_eq!(settings.redis, RedisEndpoint::default());
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let path = Path::new("/nonexistent/kvpool.toml");
        let err = Settings::load(Some(path)).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kvpool.toml"));
    }
}
