//! Engine configuration.
//!
//! Settings come from an optional TOML file, then environment variables,
//! then built-in defaults:
//!
//! ```toml
//! [engine]
//! backend = "elastic"
//! addresses = ["http://search-1:9200", "http://search-2:9200"]
//! username = "indexer"
//! password = "secret"
//! request_timeout_ms = 10000
//! ```
//!
//! Without any configuration the embedded engine is used, storing its
//! indexes under the data directory.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
};

/// Endpoint used by the elastic backend when no address is configured.
pub const DEFAULT_ADDRESS: &str = "http://localhost:9200";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

pub const ADDRESSES_ENV: &str = "DOCMIRROR_ES_ADDRESSES";
pub const USERNAME_ENV: &str = "DOCMIRROR_ES_USERNAME";
pub const PASSWORD_ENV: &str = "DOCMIRROR_ES_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// In-process tantivy indexes under `path`.
    Embedded { path: PathBuf },
    /// A remote document-index server reached over HTTP.
    Elastic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: Backend,
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Elastic,
            addresses: Vec::new(),
            username: None,
            password: None,
            request_timeout_ms: None,
            connect_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Embedded { path: path.into() },
            ..Self::default()
        }
    }

    /// Endpoints to use, falling back to [`DEFAULT_ADDRESS`].
    pub fn addresses(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            vec![DEFAULT_ADDRESS.to_string()]
        } else {
            self.addresses.clone()
        }
    }

    /// Per-call bound, if one was configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(
            self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "username and password must be given together".into(),
            ));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Error::Config(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.backend == Backend::Elastic {
            for address in self.addresses() {
                let url = reqwest::Url::parse(&address).map_err(|e| {
                    Error::Config(format!("invalid address '{address}': {e}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::Config(format!(
                        "address '{address}' must use http or https"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BackendKind {
    Embedded,
    Elastic,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    engine: EngineSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EngineSection {
    backend: Option<BackendKind>,
    path: Option<PathBuf>,
    addresses: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    request_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    /// Location of the relational store database.
    pub store_path: PathBuf,
}

impl Config {
    /// Load configuration for `data_dir`.
    ///
    /// An explicit file must exist; otherwise `<data_dir>/config.toml` is
    /// read when present.
    pub fn load(data_dir: &DataDir, explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => read_file(path)?,
            None => {
                let path = data_dir.config_file();
                if path.exists() {
                    read_file(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        let config =
            Self::resolve(data_dir, file, |key| std::env::var(key).ok())?;
        tracing::debug!(
            backend = ?config.engine.backend,
            "loaded configuration"
        );
        Ok(config)
    }

    fn resolve(
        data_dir: &DataDir,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let section = file.engine;
        let env_addresses: Vec<String> = env(ADDRESSES_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let kind = if !env_addresses.is_empty() {
            BackendKind::Elastic
        } else if let Some(kind) = section.backend {
            kind
        } else if !section.addresses.is_empty() {
            BackendKind::Elastic
        } else {
            BackendKind::Embedded
        };

        let backend = match kind {
            BackendKind::Elastic => Backend::Elastic,
            BackendKind::Embedded => Backend::Embedded {
                path: data_dir.indexes_dir(section.path.as_deref())?,
            },
        };

        let engine = EngineConfig {
            backend,
            addresses: if env_addresses.is_empty() {
                section.addresses
            } else {
                env_addresses
            },
            username: env(USERNAME_ENV).or(section.username),
            password: env(PASSWORD_ENV).or(section.password),
            request_timeout_ms: section.request_timeout_ms,
            connect_timeout_ms: section.connect_timeout_ms,
        };
        engine.validate()?;

        Ok(Self {
            engine,
            store_path: data_dir.store_path(),
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|e| {
        Error::Config(format!("invalid config {}: {e}", path.display()))
    })
}
