use crate::store::types::{Account, Certificate, Challenge};
use crate::store::{CertificateStore, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps all records in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    certificates: RwLock<HashMap<String, Certificate>>,
    challenges: RwLock<HashMap<String, Challenge>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn get_account(&self, email: &str) -> StorageResult<Option<Account>> {
        Ok(self.accounts.read().get(email).cloned())
    }

    async fn save_account(&self, account: &Account) -> StorageResult<()> {
        self.accounts
            .write()
            .insert(account.email.clone(), account.clone());
        Ok(())
    }

    async fn get_certificate(&self, domain: &str) -> StorageResult<Option<Certificate>> {
        Ok(self.certificates.read().get(domain).cloned())
    }

    async fn save_certificate(&self, certificate: &Certificate) -> StorageResult<()> {
        self.certificates
            .write()
            .insert(certificate.domain.clone(), certificate.clone());
        Ok(())
    }

    async fn get_challenge(&self, token: &str) -> StorageResult<Option<Challenge>> {
        Ok(self.challenges.read().get(token).cloned())
    }

    async fn save_challenge(&self, challenge: &Challenge) -> StorageResult<()> {
        self.challenges
            .write()
            .insert(challenge.token.to_string(), challenge.clone());
        Ok(())
    }

    async fn remove_challenge(&self, token: &str) -> StorageResult<()> {
        self.challenges.write().remove(token);
        Ok(())
    }
}
