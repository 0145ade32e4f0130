//! Storage seams for account and token state.
//!
//! The production credential store lives outside this crate (it only needs to
//! honor these traits); [`MemoryStore`] backs tests and local development.
//! Every account mutation is a compare-and-swap keyed on the record version so
//! concurrent logins never lose lockout increments.

mod memory;

pub use memory::MemoryStore;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{AccountId, UserAccount};
use crate::token::{OneTimeCodeRecord, SecurityTokenRecord, TokenPurpose};

/// Outcome of inserting a new account record.
#[derive(Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// An account with the same normalized email already exists.
    Conflict,
}

/// Outcome of a compare-and-swap account update.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The stored version no longer matches; re-read and retry.
    Conflict,
}

/// Persisted account records, looked up by id or normalized email.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<UserAccount>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>>;

    async fn create(&self, account: UserAccount) -> Result<CreateOutcome>;

    /// Atomic update keyed on `account.version`. On [`UpdateOutcome::Updated`]
    /// the store has bumped the persisted version by one.
    async fn update(&self, account: UserAccount) -> Result<UpdateOutcome>;
}

/// Persisted single-use tokens and one-time codes.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, record: SecurityTokenRecord) -> Result<()>;

    /// Look up a token by purpose and stored hash.
    async fn find_token(
        &self,
        purpose: TokenPurpose,
        token_hash: &[u8],
    ) -> Result<Option<SecurityTokenRecord>>;

    /// Mark a token consumed iff it is currently unconsumed.
    /// Returns `false` when some other request consumed it first.
    async fn consume_token(&self, token_id: Uuid) -> Result<bool>;

    /// Drop every outstanding token of one purpose for an account.
    async fn revoke_tokens(&self, account_id: AccountId, purpose: TokenPurpose) -> Result<()>;

    /// Issuance time of the most recent token of one purpose, for cooldowns.
    async fn latest_token_issued_at(
        &self,
        account_id: AccountId,
        purpose: TokenPurpose,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Store an account's one-time code, replacing any prior code.
    /// At most one code per account exists at any moment.
    async fn put_code(&self, record: OneTimeCodeRecord) -> Result<()>;

    async fn find_code(&self, account_id: AccountId) -> Result<Option<OneTimeCodeRecord>>;

    /// Mark the account's code consumed iff it is currently unconsumed.
    async fn consume_code(&self, account_id: AccountId) -> Result<bool>;

    /// Drop the account's code, consumed or not.
    async fn revoke_code(&self, account_id: AccountId) -> Result<()>;
}

/// Read-modify-write an account through the store's compare-and-swap update.
///
/// The mutation closure must be safe to re-run: on a version conflict the
/// account is re-read and the closure applied once more before giving up.
/// Persistent conflict is surfaced as a transient error the caller may retry.
///
/// Returns `None` when the account does not exist, otherwise the persisted
/// account and the closure's output from the winning attempt.
pub(crate) async fn mutate_account<T, F>(
    store: &dyn CredentialStore,
    id: AccountId,
    mutate: F,
) -> Result<Option<(UserAccount, T)>>
where
    F: Fn(&mut UserAccount) -> Result<T>,
{
    for _ in 0..2 {
        let Some(mut account) = store
            .find_by_id(id)
            .await
            .context("failed to read account for update")?
        else {
            return Ok(None);
        };
        let output = mutate(&mut account)?;
        match store.update(account.clone()).await? {
            UpdateOutcome::Updated => {
                account.version += 1;
                return Ok(Some((account, output)));
            }
            UpdateOutcome::Conflict => {}
        }
    }
    bail!("account update conflicted with a concurrent request; safe to retry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::UserAccount;

    fn account(email: &str) -> UserAccount {
        UserAccount::new(email, "Test", "phc".to_string(), true)
    }

    #[tokio::test]
    async fn mutate_account_applies_and_bumps_version() -> Result<()> {
        let store = MemoryStore::new();
        let record = account("a@example.com");
        let id = record.id;
        store.create(record).await?;

        let result = mutate_account(&store, id, |account| {
            account.failed_access_count += 1;
            Ok(())
        })
        .await?;
        let (updated, ()) = result.expect("account exists");
        assert_eq!(updated.failed_access_count, 1);
        assert_eq!(updated.version, 1);

        let stored = store.find_by_id(id).await?.expect("stored");
        assert_eq!(stored.failed_access_count, 1);
        assert_eq!(stored.version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn mutate_account_missing_returns_none() -> Result<()> {
        let store = MemoryStore::new();
        let result = mutate_account(&store, uuid::Uuid::new_v4(), |_| Ok(())).await?;
        assert!(result.is_none());
        Ok(())
    }

    /// Store whose `update` loses the CAS once before behaving normally,
    /// simulating a concurrent writer between read and write.
    struct ConflictOnce {
        inner: MemoryStore,
        conflicted: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CredentialStore for ConflictOnce {
        async fn find_by_id(&self, id: AccountId) -> Result<Option<UserAccount>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
            self.inner.find_by_email(email).await
        }

        async fn create(&self, account: UserAccount) -> Result<CreateOutcome> {
            self.inner.create(account).await
        }

        async fn update(&self, account: UserAccount) -> Result<UpdateOutcome> {
            if !self.conflicted.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(UpdateOutcome::Conflict);
            }
            self.inner.update(account).await
        }
    }

    #[tokio::test]
    async fn mutate_account_retries_once_after_conflict() -> Result<()> {
        let store = ConflictOnce {
            inner: MemoryStore::new(),
            conflicted: std::sync::atomic::AtomicBool::new(false),
        };
        let record = account("a@example.com");
        let id = record.id;
        store.create(record).await?;

        let result = mutate_account(&store, id, |account| {
            account.failed_access_count += 1;
            Ok(())
        })
        .await?;
        let (updated, ()) = result.expect("account exists");
        assert_eq!(updated.failed_access_count, 1);
        Ok(())
    }
}
