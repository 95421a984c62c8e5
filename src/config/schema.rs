use std::path::Path;
use std::str::FromStr;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer};
use sqlx::sqlite::SqliteJournalMode;

use crate::query::decode::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::query::DecodeOptions;

pub const ENV_PREFIX: &str = "TABULA";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TabulaConfig {
    pub catalog: Catalog,
    #[serde(default)]
    pub frontend: Frontend,
    #[serde(default)]
    pub misc: Misc,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Catalog {
    #[cfg(feature = "catalog-postgres")]
    Postgres(Postgres),
    Sqlite(Sqlite),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Postgres {
    pub dsn: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn: String,
    #[serde(
        default = "default_journal_mode",
        deserialize_with = "deserialize_journal_mode"
    )]
    pub journal_mode: SqliteJournalMode,
    #[serde(default)]
    pub read_only: bool,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_journal_mode() -> SqliteJournalMode {
    SqliteJournalMode::Wal
}

fn deserialize_journal_mode<'de, D>(deserializer: D) -> Result<SqliteJournalMode, D::Error>
where
    D: Deserializer<'de>,
{
    let mode = String::deserialize(deserializer)?;
    SqliteJournalMode::from_str(&mode).map_err(serde::de::Error::custom)
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Frontend {
    pub http: Option<HttpFrontend>,
}

impl Default for Frontend {
    fn default() -> Self {
        Self {
            http: Some(HttpFrontend::default()),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct HttpFrontend {
    pub bind_host: String,
    pub bind_port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for HttpFrontend {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8080,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Misc {
    pub default_query_limit: u64,
    pub max_query_limit: u64,
}

impl Default for Misc {
    fn default() -> Self {
        Self {
            default_query_limit: DEFAULT_LIMIT,
            max_query_limit: MAX_LIMIT,
        }
    }
}

impl Misc {
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            default_limit: self.default_query_limit,
            max_limit: self.max_query_limit,
        }
    }
}

pub fn validate_config(config: TabulaConfig) -> Result<TabulaConfig, ConfigError> {
    if config.misc.max_query_limit > MAX_LIMIT {
        return Err(ConfigError::Message(format!(
            "misc.max_query_limit can't be higher than {MAX_LIMIT}"
        )));
    }

    if config.misc.default_query_limit > config.misc.max_query_limit {
        return Err(ConfigError::Message(
            "misc.default_query_limit can't be higher than misc.max_query_limit"
                .to_string(),
        ));
    }

    if matches!(config.catalog, Catalog::Sqlite(Sqlite { ref dsn, read_only: true, .. }) if dsn.contains(":memory:"))
    {
        return Err(ConfigError::Message(
            "An in-memory SQLite catalog can't be opened in read-only mode".to_string(),
        ));
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<TabulaConfig, ConfigError> {
    let path = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Invalid config path {}", path.display()))
    })?;

    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<TabulaConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
