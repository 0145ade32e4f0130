//! In-memory store used by the test suite and for local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::account::{AccountId, UserAccount};
use crate::token::{OneTimeCodeRecord, SecurityTokenRecord, TokenPurpose};

use super::{CreateOutcome, CredentialStore, TokenStore, UpdateOutcome};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, UserAccount>,
    emails: HashMap<String, AccountId>,
    tokens: Vec<SecurityTokenRecord>,
    codes: HashMap<AccountId, OneTimeCodeRecord>,
}

/// Mutex-guarded maps behind both store traits.
///
/// A single lock covers all state, so token supersession and version
/// compare-and-swap behave atomically with respect to concurrent requests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<UserAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn create(&self, account: UserAccount) -> Result<CreateOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.emails.contains_key(&account.email) {
            return Ok(CreateOutcome::Conflict);
        }
        inner.emails.insert(account.email.clone(), account.id);
        inner.accounts.insert(account.id, account);
        Ok(CreateOutcome::Created)
    }

    async fn update(&self, account: UserAccount) -> Result<UpdateOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.accounts.get_mut(&account.id) else {
            return Ok(UpdateOutcome::Conflict);
        };
        if stored.version != account.version {
            return Ok(UpdateOutcome::Conflict);
        }
        let mut account = account;
        account.version += 1;
        *stored = account;
        Ok(UpdateOutcome::Updated)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, record: SecurityTokenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.push(record);
        Ok(())
    }

    async fn find_token(
        &self,
        purpose: TokenPurpose,
        token_hash: &[u8],
    ) -> Result<Option<SecurityTokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .iter()
            .find(|record| record.purpose == purpose && record.token_hash == token_hash)
            .cloned())
    }

    async fn consume_token(&self, token_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner
            .tokens
            .iter_mut()
            .find(|record| record.token_id == token_id)
        else {
            return Ok(false);
        };
        if record.consumed_at.is_some() {
            return Ok(false);
        }
        record.consumed_at = Some(Utc::now());
        Ok(true)
    }

    async fn revoke_tokens(&self, account_id: AccountId, purpose: TokenPurpose) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .tokens
            .retain(|record| !(record.account_id == account_id && record.purpose == purpose));
        Ok(())
    }

    async fn latest_token_issued_at(
        &self,
        account_id: AccountId,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .iter()
            .filter(|record| record.account_id == account_id && record.purpose == purpose)
            .map(|record| record.issued_at)
            .max())
    }

    async fn put_code(&self, record: OneTimeCodeRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Insert replaces any prior code: one active code per account.
        inner.codes.insert(record.account_id, record);
        Ok(())
    }

    async fn find_code(&self, account_id: AccountId) -> Result<Option<OneTimeCodeRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.codes.get(&account_id).cloned())
    }

    async fn consume_code(&self, account_id: AccountId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.codes.get_mut(&account_id) else {
            return Ok(false);
        };
        if record.consumed_at.is_some() {
            return Ok(false);
        }
        record.consumed_at = Some(Utc::now());
        Ok(true)
    }

    async fn revoke_code(&self, account_id: AccountId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.codes.remove(&account_id);
        Ok(())
    }
}
