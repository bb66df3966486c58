//! Redis endpoint and credential settings

use std::fmt;

use kvpool_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding a full connection URL
pub const ENV_URL: &str = "KVPOOL_REDIS_URL";
pub const ENV_HOST: &str = "KVPOOL_REDIS_HOST";
pub const ENV_PORT: &str = "KVPOOL_REDIS_PORT";
pub const ENV_DATABASE: &str = "KVPOOL_REDIS_DB";
pub const ENV_USERNAME: &str = "KVPOOL_REDIS_USERNAME";
pub const ENV_PASSWORD: &str = "KVPOOL_REDIS_PASSWORD";
pub const ENV_TLS: &str = "KVPOOL_REDIS_TLS";

/// Where the cache service lives and how to authenticate to it.
///
/// A non-empty `url` takes precedence over the individual fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisEndpoint {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Database index (0-15)
    pub database: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connect with `rediss://`
    pub tls: bool,
}

impl RedisEndpoint {
    /// Endpoint for an explicit connection URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Read the endpoint from `KVPOOL_REDIS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the endpoint through an arbitrary variable lookup.
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut endpoint = Self::default();

        if let Some(url) = get(ENV_URL) {
            endpoint.url = Some(url);
        }
        if let Some(host) = get(ENV_HOST) {
            endpoint.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            endpoint.port = port.trim().parse().map_err(|_| {
                PoolError::Configuration(format!("{} is not a valid port: {}", ENV_PORT, port))
            })?;
        }
        if let Some(database) = get(ENV_DATABASE) {
            endpoint.database = database.trim().parse().map_err(|_| {
                PoolError::Configuration(format!(
                    "{} is not a valid database index: {}",
                    ENV_DATABASE, database
                ))
            })?;
        }
        endpoint.username = get(ENV_USERNAME);
        endpoint.password = get(ENV_PASSWORD);
        endpoint.tls = get(ENV_TLS)
            .map(|value| value == "true" || value == "1")
            .unwrap_or(false);

        Ok(endpoint)
    }

    /// Build the `redis[s]://[user:password@]host:port/db` connection URL.
    ///
    /// Credentials are percent-encoded, so reserved characters such as `@`
    /// or `:` in a password survive the round trip through URL parsing.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return url.to_string();
        }
        let password = self.password.as_deref().map(urlencoding::encode);
        self.build_url(password.as_deref())
    }

    /// The connection URL with any password masked, for logs
    pub fn redacted_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return redact_url(url);
        }
        self.build_url(self.password.as_ref().map(|_| "***"))
    }

    /// `password` is inserted as given and must already be encoded
    fn build_url(&self, password: Option<&str>) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let username = self
            .username
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(urlencoding::encode);
        let password = password.filter(|s| !s.is_empty());

        match (username, password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}/{}",
                scheme, user, pass, self.host, self.port, self.database
            ),
            (None, Some(pass)) => format!(
                "{}://:{}@{}:{}/{}",
                scheme, pass, self.host, self.port, self.database
            ),
            (Some(user), None) => format!(
                "{}://{}@{}:{}/{}",
                scheme, user, self.host, self.port, self.database
            ),
            (None, None) => format!("{}://{}:{}/{}", scheme, self.host, self.port, self.database),
        }
    }
}

impl Default for RedisEndpoint {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            username: None,
            password: None,
            tls: false,
        }
    }
}

impl fmt::Debug for RedisEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEndpoint")
            .field("url", &self.redacted_url())
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// Mask the password component of a URL, if any.
///
/// The userinfo ends at the last `@` and the user name at the first `:`, so
/// an unencoded password containing either character is still masked whole.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}
