//! Named mutual exclusion shared by all processes that issue certificates for the same domains.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

mod file;
mod local;

pub use file::FileLock;
pub use local::LocalLock;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock file {} is unusable", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock {0} is already held by this process")]
    AlreadyHeld(String),
    #[error("lock {0} is not held by this process")]
    NotHeld(String),
    #[error("waiting for lock failed")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Waits until the lock named `token` is held by the caller. `duration_hint` is how long the
    /// caller expects to hold it; backends that cannot detect dead holders use it as expiry.
    /// Returns `true` once the lock is held.
    async fn lock(&self, token: &str, duration_hint: Duration) -> LockResult<bool>;
    /// Releases the lock. Returns `false` if the caller did not hold it.
    async fn unlock(&self, token: &str) -> LockResult<bool>;
    /// Forgets every lock. Only meant to be used at startup of the primary process, when no other
    /// process can be holding a lock yet.
    async fn clear(&self) -> LockResult<()>;
}
