use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Algorithm used to derive the `userAuthSign` cookie from the user id
#[derive(Clone, Copy, PartialEq, Eq, Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    /// Lower-case hex of HMAC-SHA256 over the user id, keyed with the secret
    #[default]
    HmacSha256,
    /// Lower-case hex of MD5 over `"<user_id>:<secret>"`
    ///
    /// Only for compatibility with signatures minted by legacy tooling.
    Md5,
}

impl std::str::FromStr for SignatureScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("hmac-sha256") {
            Ok(Self::HmacSha256)
        } else if s.eq_ignore_ascii_case("md5") {
            Ok(Self::Md5)
        } else {
            Err(ConfigError::Invalid {
                key: "cookie_sign_algorithm",
                reason: format!("unknown algorithm `{s}`"),
            })
        }
    }
}

/// Error while loading or validating the [`Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path of the configuration file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML or has wrongly typed keys
    #[error("malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),
    /// A required key is absent or empty
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    /// A key has an unusable value
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Name of the setting
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Configuration of the gateway
///
/// Keys mirror the names used in the configuration file. Every key can be
/// overridden from the environment as `SECKILL_<KEY>`.
#[derive(Clone, Deserialize, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address of the Redis instance used by the fulfilment side, unused here
    pub redis_addr: Option<String>,
    /// Comma-separated list of etcd endpoints
    pub etcd_addr: String,
    /// Prefix of the watched key
    pub etcd_sec_key_prefix: String,
    /// Name of the key holding the product list
    pub etcd_product_key: String,
    /// Timeout in seconds for unary etcd calls
    pub etcd_timeout: u64,
    /// File the log is appended to; stderr if unset
    pub log_path: Option<PathBuf>,
    /// Log filter, e.g. `info` or `seckill_gateway=debug`
    pub log_level: String,
    /// Secret used to verify user signatures
    pub cookie_secretkey: String,
    /// Algorithm used to verify user signatures
    pub cookie_sign_algorithm: SignatureScheme,
    /// Maximum number of requests per user and wall-clock second
    pub user_sec_access_limit: u32,
    /// Address the HTTP server listens on
    pub http_addr: String,
    /// Number of HTTP worker threads
    pub http_threads: u32,
    /// Consecutive failed reconnects after which the watcher gives up
    pub watch_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addr: None,
            etcd_addr: String::from("127.0.0.1:2379"),
            etcd_sec_key_prefix: String::from("/seckill/"),
            etcd_product_key: String::from("product"),
            etcd_timeout: 5,
            log_path: None,
            log_level: String::from("info"),
            cookie_secretkey: String::new(),
            cookie_sign_algorithm: SignatureScheme::HmacSha256,
            user_sec_access_limit: 1,
            http_addr: String::from("127.0.0.1:9091"),
            http_threads: 16,
            watch_max_retries: 30,
        }
    }
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read and parse the TOML file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `SECKILL_<KEY>` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by `lookup`, which receives the variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("SECKILL_{}", key.to_ascii_uppercase()));

        if let Some(v) = var("redis_addr") {
            self.redis_addr = Some(v);
        }
        if let Some(v) = var("etcd_addr") {
            self.etcd_addr = v;
        }
        if let Some(v) = var("etcd_sec_key_prefix") {
            self.etcd_sec_key_prefix = v;
        }
        if let Some(v) = var("etcd_product_key") {
            self.etcd_product_key = v;
        }
        if let Some(v) = var("etcd_timeout") {
            self.etcd_timeout = parse_number("etcd_timeout", &v)?;
        }
        if let Some(v) = var("log_path") {
            self.log_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("log_level") {
            self.log_level = v;
        }
        if let Some(v) = var("cookie_secretkey") {
            self.cookie_secretkey = v;
        }
        if let Some(v) = var("cookie_sign_algorithm") {
            self.cookie_sign_algorithm = v.parse()?;
        }
        if let Some(v) = var("user_sec_access_limit") {
            self.user_sec_access_limit = parse_number("user_sec_access_limit", &v)?;
        }
        if let Some(v) = var("http_addr") {
            self.http_addr = v;
        }
        if let Some(v) = var("http_threads") {
            self.http_threads = parse_number("http_threads", &v)?;
        }
        if let Some(v) = var("watch_max_retries") {
            self.watch_max_retries = parse_number("watch_max_retries", &v)?;
        }
        Ok(())
    }

    /// Check that the gateway can be started with this configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.etcd_endpoints().is_empty() {
            return Err(ConfigError::Missing("etcd_addr"));
        }
        if self.etcd_product_key.trim_matches('/').is_empty() {
            return Err(ConfigError::Missing("etcd_product_key"));
        }
        if self.cookie_secretkey.is_empty() {
            return Err(ConfigError::Missing("cookie_secretkey"));
        }
        if self.user_sec_access_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "user_sec_access_limit",
                reason: "must allow at least one request per second".into(),
            });
        }
        if self.etcd_timeout == 0 {
            return Err(ConfigError::Invalid {
                key: "etcd_timeout",
                reason: "must be at least one second".into(),
            });
        }
        if self.http_threads == 0 {
            return Err(ConfigError::Invalid {
                key: "http_threads",
                reason: "must be at least one".into(),
            });
        }
        Ok(())
    }

    /// The etcd endpoints listed in `etcd_addr`
    pub fn etcd_endpoints(&self) -> Vec<String> {
        self.etcd_addr
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Timeout for unary etcd calls
    pub fn etcd_timeout(&self) -> Duration {
        Duration::from_secs(self.etcd_timeout)
    }

    /// The watched key: the prefix, exactly one `/`, then the product key
    pub fn product_key(&self) -> String {
        let mut key = self.etcd_sec_key_prefix.clone();
        if !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(self.etcd_product_key.trim_start_matches('/'));
        key
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("`{value}`: {err}"),
    })
}
