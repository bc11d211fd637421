use crate::acme::object::Token;
use crate::store::types::{Account, Certificate, Challenge};
use crate::store::{CertificateStore, StorageError, StorageResult};
use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::warn;

const DATABASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Stores records in a SQLite database. Safe to share between processes on the same host.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(database_file: P) -> StorageResult<Self> {
        let connect_options = SqliteConnectOptions::new().filename(database_file.as_ref());
        Self::open_with(connect_options).await
    }

    pub async fn open_url(url: &str) -> StorageResult<Self> {
        Self::open_with(SqliteConnectOptions::from_str(url)?).await
    }

    async fn open_with(connect_options: SqliteConnectOptions) -> StorageResult<Self> {
        let connect_options = connect_options
            .create_if_missing(true)
            .auto_vacuum(SqliteAutoVacuum::Incremental)
            .busy_timeout(DATABASE_TIMEOUT)
            .optimize_on_close(true, None);

        #[cfg(debug_assertions)]
        let connect_options = sqlx::ConnectOptions::log_slow_statements(
            connect_options,
            tracing::log::LevelFilter::Debug,
            Duration::from_millis(500),
        );

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_options)
            .await?;
        create_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Brings the schema up to date. A database written by a newer release is used as is.
async fn create_schema(pool: &sqlx::SqlitePool) -> StorageResult<()> {
    match sqlx::migrate!("db/migrations").run(pool).await {
        Err(MigrateError::VersionMissing(version)) => {
            warn!("Database schema version {version} is unknown to this release, leaving the schema untouched");
            Ok(())
        }
        result => Ok(result?),
    }
}

#[async_trait]
impl CertificateStore for SqliteStore {
    async fn get_account(&self, email: &str) -> StorageResult<Option<Account>> {
        Ok(
            sqlx::query_as::<_, Account>("SELECT email, private_key_pem FROM accounts WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn save_account(&self, account: &Account) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO accounts (email, private_key_pem) VALUES ($1, $2) \
            ON CONFLICT(email) DO UPDATE SET private_key_pem = $2;",
        )
        .bind(&account.email)
        .bind(&account.private_key_pem)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_certificate(&self, domain: &str) -> StorageResult<Option<Certificate>> {
        Ok(sqlx::query_as::<_, Certificate>(
            "SELECT domain, csr, private_key_pem, cert_pem, renew_by FROM certificates WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn save_certificate(&self, certificate: &Certificate) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO certificates (domain, csr, private_key_pem, cert_pem, renew_by) VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT(domain) DO UPDATE \
            SET csr = $2, private_key_pem = $3, cert_pem = $4, renew_by = $5;",
        )
        .bind(&certificate.domain)
        .bind(&certificate.csr)
        .bind(&certificate.private_key_pem)
        .bind(&certificate.cert_pem)
        .bind(certificate.renew_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_challenge(&self, token: &str) -> StorageResult<Option<Challenge>> {
        let row = sqlx::query_as::<_, (String, String, String, OffsetDateTime)>(
            "SELECT domain, token, key_authorization, created_at FROM challenges WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        let Some((domain, token, key_authorization, created_at)) = row else {
            return Ok(None);
        };
        let token = Token::try_from(token)
            .map_err(|_| StorageError::Corrupt("challenge with invalid token".to_string()))?;
        Ok(Some(Challenge {
            domain,
            token,
            key_authorization,
            created_at,
        }))
    }

    async fn save_challenge(&self, challenge: &Challenge) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO challenges (token, domain, key_authorization, created_at) VALUES ($1, $2, $3, $4) \
            ON CONFLICT(token) DO UPDATE \
            SET domain = $2, key_authorization = $3, created_at = $4;",
        )
        .bind(challenge.token.as_str())
        .bind(&challenge.domain)
        .bind(&challenge.key_authorization)
        .bind(challenge.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_challenge(&self, token: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM challenges WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::test_helper::open_memory_db;
    use crate::store::tests::{exercise_store, test_certificate};

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = open_memory_db().await;
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("certkeeper.sqlite");
        let certificate = test_certificate("example.com");

        let store = SqliteStore::open(&file).await.unwrap();
        store.save_certificate(&certificate).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&file).await.unwrap();
        assert_eq!(
            reopened.get_certificate("example.com").await.unwrap(),
            Some(certificate)
        );
    }

    #[tokio::test]
    async fn test_databases_isolated_in_test() {
        let first = open_memory_db().await;
        let second = open_memory_db().await;
        first
            .save_certificate(&test_certificate("example.com"))
            .await
            .unwrap();
        assert_eq!(second.get_certificate("example.com").await.unwrap(), None);
    }
}
