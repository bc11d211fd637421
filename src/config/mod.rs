use crate::acme::poll::FixedDelay;
use crate::config::toml::TomlConfiguration;
use crate::crypto::asymmetric::DEFAULT_RSA_BITS;
use crate::lock::{ClusterLock, FileLock, LocalLock};
use crate::manager::{DEFAULT_ISSUANCE_DEADLINE, ManagerConfig};
use crate::store::{CertificateStore, FileStore, MemoryStore, SqliteStore};
use crate::time::{deserialize_optional_duration, parse_duration};
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

mod toml;

pub const DEFAULT_POLL_INTERVAL: &str = "2s";
const DEFAULT_DATABASE_FILE: &str = "certkeeper.sqlite";

/// The public CA environments of Let's Encrypt (ACME v1).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Staging,
}

impl Environment {
    pub fn directory_url(self) -> Url {
        let url = match self {
            Environment::Production => "https://acme-v01.api.letsencrypt.org",
            Environment::Staging => "https://acme-staging.api.letsencrypt.org",
        };
        Url::parse(url).unwrap(/* constant */)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub environment: Environment,
    /// Overrides the URL derived from `environment`.
    pub directory_url: Option<Url>,
    /// Contact email of the CA account.
    pub account: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub storage: StorageConfiguration,
    #[serde(default)]
    pub lock: LockConfiguration,
    /// Default parent directory for storage and lock files without an explicit path.
    pub temp_dir: Option<PathBuf>,
    pub key_bits: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub poll_interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub issuance_deadline: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum StorageConfiguration {
    #[default]
    Memory,
    Files {
        path: Option<PathBuf>,
    },
    Sqlite {
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum LockConfiguration {
    #[default]
    Local,
    File {
        path: Option<PathBuf>,
    },
}

impl Configuration {
    pub fn directory_url(&self) -> Url {
        self.directory_url
            .clone()
            .unwrap_or_else(|| self.environment.directory_url())
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(crate::CRATE_NAME))
    }

    pub fn manager_config(&self) -> anyhow::Result<ManagerConfig> {
        let mut config = ManagerConfig::new(
            self.directory_url(),
            self.account.clone(),
            self.domains.clone(),
        );
        config.key_bits = self.key_bits.unwrap_or(DEFAULT_RSA_BITS);
        let poll_interval = match self.poll_interval {
            Some(interval) => interval,
            None => parse_duration(DEFAULT_POLL_INTERVAL).map_err(anyhow::Error::msg)?,
        };
        config.poll_strategy = Arc::new(FixedDelay(poll_interval));
        config.deadline = self.issuance_deadline.unwrap_or(DEFAULT_ISSUANCE_DEADLINE);
        config.allow_plain_http = config.directory_url.scheme() == "http";
        Ok(config)
    }

    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn CertificateStore>> {
        Ok(match &self.storage {
            StorageConfiguration::Memory => Arc::new(MemoryStore::new()),
            StorageConfiguration::Files { path } => {
                let path = path.clone().unwrap_or_else(|| self.temp_dir().join("store"));
                Arc::new(
                    FileStore::open(&path)
                        .await
                        .context(format!("Opening certificate store {} failed", path.display()))?,
                )
            }
            StorageConfiguration::Sqlite { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| self.temp_dir().join(DEFAULT_DATABASE_FILE));
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .context(format!("Failed to create directory {}", parent.display()))?;
                }
                Arc::new(
                    SqliteStore::open(&path)
                        .await
                        .context(format!("Opening database {} failed", path.display()))?,
                )
            }
        })
    }

    pub async fn open_lock(&self) -> anyhow::Result<Arc<dyn ClusterLock>> {
        Ok(match &self.lock {
            LockConfiguration::Local => Arc::new(LocalLock::new()),
            LockConfiguration::File { path } => {
                let path = path.clone().unwrap_or_else(|| self.temp_dir().join("locks"));
                Arc::new(
                    FileLock::open(&path)
                        .await
                        .context(format!("Opening lock directory {} failed", path.display()))?,
                )
            }
        })
    }

    fn validate(self) -> anyhow::Result<Self> {
        anyhow::ensure!(!self.account.is_empty(), "No account email configured");
        anyhow::ensure!(!self.domains.is_empty(), "No domains configured");
        Ok(self)
    }
}

pub fn load<P: AsRef<Path>>(file: P) -> anyhow::Result<Configuration> {
    let file = file.as_ref();
    TomlConfiguration::load(file)
        .context(format!("Loading configuration {} failed", file.display()))?
        .validate()
}

pub fn from_str(toml: &str) -> anyhow::Result<Configuration> {
    TomlConfiguration::parse(toml)?.validate()
}
