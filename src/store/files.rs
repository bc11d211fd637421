use crate::store::types::{Account, Certificate, Challenge};
use crate::store::{CertificateStore, StorageError, StorageResult};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ACCOUNTS: &str = "accounts";
const CERTIFICATES: &str = "certs";
const CHALLENGES: &str = "challenges";

/// Stores every record as a JSON file below a root directory:
/// `accounts/<email>.json`, `certs/<domain>.json` and `challenges/<token>.json`.
///
/// Several processes may share the same directory. Files are replaced atomically, so readers never
/// observe a partially written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn open<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for directory in [ACCOUNTS, CERTIFICATES, CHALLENGES] {
            let directory = root.join(directory);
            tokio::fs::create_dir_all(&directory)
                .await
                .map_err(|source| StorageError::Io {
                    path: directory,
                    source,
                })?;
        }
        Ok(Self { root })
    }

    fn record_path(&self, kind: &str, key: &str) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", file_name(key)))
    }

    async fn read<T: DeserializeOwned>(&self, kind: &str, key: &str) -> StorageResult<Option<T>> {
        let path = self.record_path(kind, key);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        match serde_json::from_slice(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable record {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(&self, kind: &str, key: &str, record: &T) -> StorageResult<()> {
        let path = self.record_path(kind, key);
        let contents = serde_json::to_vec_pretty(record)?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(|source| StorageError::Io {
                path: temp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    async fn delete(&self, kind: &str, key: &str) -> StorageResult<()> {
        let path = self.record_path(kind, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Keeps record keys from escaping their directory.
fn file_name(key: &str) -> String {
    key.chars()
        .enumerate()
        .map(|(i, c)| match c {
            '/' | '\\' | '\0' => '_',
            '.' if i == 0 => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl CertificateStore for FileStore {
    async fn get_account(&self, email: &str) -> StorageResult<Option<Account>> {
        self.read(ACCOUNTS, email).await
    }

    async fn save_account(&self, account: &Account) -> StorageResult<()> {
        self.write(ACCOUNTS, &account.email, account).await
    }

    async fn get_certificate(&self, domain: &str) -> StorageResult<Option<Certificate>> {
        self.read(CERTIFICATES, domain).await
    }

    async fn save_certificate(&self, certificate: &Certificate) -> StorageResult<()> {
        self.write(CERTIFICATES, &certificate.domain, certificate)
            .await
    }

    async fn get_challenge(&self, token: &str) -> StorageResult<Option<Challenge>> {
        self.read(CHALLENGES, token).await
    }

    async fn save_challenge(&self, challenge: &Challenge) -> StorageResult<()> {
        self.write(CHALLENGES, challenge.token.as_str(), challenge)
            .await
    }

    async fn remove_challenge(&self, token: &str) -> StorageResult<()> {
        self.delete(CHALLENGES, token).await
    }
}
