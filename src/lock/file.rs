use crate::CRATE_NAME;
use crate::lock::{ClusterLock, LockError, LockResult};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tracing::{debug, error, info};

/// Locks shared between processes on one host, one `<dir>/<token>.lock` file per name.
///
/// The lock is an OS advisory lock on the open file, so it disappears with its holder and
/// `duration_hint` is not needed.
#[derive(Debug)]
pub struct FileLock {
    directory: PathBuf,
    held: Mutex<HashMap<String, File>>,
}

impl FileLock {
    pub async fn open<P: AsRef<Path>>(directory: P) -> LockResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| LockError::Io {
                path: directory.clone(),
                source,
            })?;
        Ok(Self {
            directory,
            held: Mutex::new(HashMap::new()),
        })
    }

    fn lock_path(&self, token: &str) -> PathBuf {
        let name: String = token
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{name}.lock"))
    }

    async fn exclusive_lock(path: &Path, token: &str) -> LockResult<File> {
        let io_error = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let lock_file = File::create(path).await.map_err(io_error)?;
        if lock_file.try_lock_exclusive().map_err(io_error)? {
            Ok(lock_file)
        } else {
            info!("Another {CRATE_NAME} process holds lock {token}. Waiting for the other process to finish...");
            tokio::task::spawn_blocking(move || {
                lock_file.lock_exclusive()?;
                Ok::<File, std::io::Error>(lock_file)
            })
            .await?
            .map_err(io_error)
        }
    }
}

#[async_trait]
impl ClusterLock for FileLock {
    async fn lock(&self, token: &str, _duration_hint: Duration) -> LockResult<bool> {
        if self.held.lock().contains_key(token) {
            return Err(LockError::AlreadyHeld(token.to_string()));
        }
        let path = self.lock_path(token);
        let lock_file = Self::exclusive_lock(&path, token).await?;
        debug!("Acquired lock {}", path.display());
        let mut held = self.held.lock();
        if held.contains_key(token) {
            // Another task of this process won the race while we were waiting
            drop(lock_file);
            return Err(LockError::AlreadyHeld(token.to_string()));
        }
        held.insert(token.to_string(), lock_file);
        Ok(true)
    }

    async fn unlock(&self, token: &str) -> LockResult<bool> {
        let Some(lock_file) = self.held.lock().remove(token) else {
            return Err(LockError::NotHeld(token.to_string()));
        };
        if let Err(e) = lock_file.unlock() {
            error!("Failed to release lock {token}: {e}");
            return Err(LockError::Io {
                path: self.lock_path(token),
                source: e,
            });
        }
        debug!("Released lock {token}");
        Ok(true)
    }

    async fn clear(&self) -> LockResult<()> {
        let held = std::mem::take(&mut *self.held.lock());
        for (token, lock_file) in held {
            if let Err(e) = lock_file.unlock() {
                error!("Failed to release lock {token}: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HOLD: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_lock_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::open(dir.path()).await.unwrap();
        assert!(lock.lock("certkeeper-get-certs", HOLD).await.unwrap());
        assert!(dir.path().join("certkeeper-get-certs.lock").exists());
        assert!(lock.unlock("certkeeper-get-certs").await.unwrap());
    }

    #[tokio::test]
    async fn test_double_lock_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::open(dir.path()).await.unwrap();
        lock.lock("certs", HOLD).await.unwrap();
        let err = lock.lock("certs", HOLD).await.unwrap_err();
        assert!(matches!(err, LockError::AlreadyHeld(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unlock_not_held_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::open(dir.path()).await.unwrap();
        let err = lock.unlock("certs").await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_second_holder_waits() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileLock::open(dir.path()).await.unwrap();
        let second = Arc::new(FileLock::open(dir.path()).await.unwrap());
        first.lock("certs", HOLD).await.unwrap();

        let waiter = {
            let second = second.clone();
            tokio::spawn(async move { second.lock("certs", HOLD).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        first.unlock("certs").await.unwrap();
        let acquired = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("second holder was not woken")
            .unwrap()
            .unwrap();
        assert!(acquired);
        assert!(second.unlock("certs").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_path_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::open(dir.path()).await.unwrap();
        assert_eq!(lock.lock_path("../evil"), dir.path().join("___evil.lock"));
    }
}
