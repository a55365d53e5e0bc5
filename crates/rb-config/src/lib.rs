//! # rb-config
//!
//! Layered settings for the Rusty-Board server: built-in defaults, then an
//! optional `config.{toml,yaml,json}` in the working directory or `/config/`,
//! then `RB__SECTION__KEY` environment variables. A `.env` file is read first.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Port of the standalone liveness listener
    pub live_port: u16,
    /// Report dependencies running on a fallback as unhealthy in `/ready`
    pub mark_fallbacks_unhealthy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub addr: String,
    pub timeout_ms: u64,
}

impl RedisSettings {
    /// How long bootstrap keeps trying before falling back to memory.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSettings {
    pub dir: String,
    pub group: String,
    pub url_prefix: String,
}

/// S3-compatible object store tried before falling back to `media.dir`.
#[derive(Debug, Deserialize)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    #[serde(deserialize_with = "secret")]
    pub secret_key: SecretString,
    /// Base URL objects are served from; URIs are `<public_url>/<bucket>/<name>`
    pub public_url: String,
    pub timeout_ms: u64,
}

impl S3Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct JwtSettings {
    #[serde(deserialize_with = "secret")]
    pub key: SecretString,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardSettings {
    pub id: String,
    /// `always`, `unless-sage` or `never`
    pub bump: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub media: MediaSettings,
    pub s3: S3Settings,
    pub jwt: JwtSettings,
    pub board: BoardSettings,
    pub log: LogSettings,
    /// Board directory: board id to the URL of the server hosting it
    pub boards: BTreeMap<String, String>,
}

impl Settings {
    /// Loads settings from every source.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", path.display());
        }

        let settings = defaults(Config::builder())?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("/config/config").required(false))
            .add_source(
                Environment::with_prefix("RB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<Self, SettingsError> {
        Ok(defaults(Config::builder())?.build()?.try_deserialize()?)
    }
}

fn defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080_i64)?
        .set_default("server.live_port", 8081_i64)?
        .set_default("server.mark_fallbacks_unhealthy", false)?
        .set_default("redis.addr", "redis://127.0.0.1:6379")?
        .set_default("redis.timeout_ms", 2000_i64)?
        .set_default("media.dir", "./data/images")?
        .set_default("media.group", "images")?
        .set_default("media.url_prefix", "/images")?
        .set_default("s3.endpoint", "http://localhost:9000")?
        .set_default("s3.region", "us-east-1")?
        .set_default("s3.access_key", "minio")?
        .set_default("s3.secret_key", "insecure")?
        .set_default("s3.public_url", "http://localhost:9000")?
        .set_default("s3.timeout_ms", 2000_i64)?
        .set_default("jwt.key", "KEYGOESHERE")?
        .set_default("jwt.ttl_hours", 24_i64)?
        .set_default("board.id", "/obj/")?
        .set_default("board.bump", "unless-sage")?
        .set_default("log.json", false)?
        .set_default(
            "boards",
            HashMap::from([("/obj/".to_string(), "http://localhost:8080".to_string())]),
        )
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}
