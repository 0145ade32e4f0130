//! Purpose-bound single-use tokens and login one-time codes.
//!
//! Raw token values are only ever handed to the notifier for delivery; the
//! store keeps SHA-256 hashes, so a leaked store dump cannot be replayed.
//! Comparisons against stored hashes go through `subtle` to stay
//! constant-time.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::account::{AccountId, UserAccount};
use crate::config::SecurityConfig;
use crate::store::TokenStore;

/// Number of digits in a login one-time code.
pub const ONE_TIME_CODE_DIGITS: usize = 6;

/// What a security token is allowed to prove.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenPurpose {
    EmailConfirmation,
    PasswordReset,
}

/// Stored form of a purpose-bound token. Only the hash is persisted.
#[derive(Clone, Debug)]
pub struct SecurityTokenRecord {
    pub token_id: Uuid,
    pub account_id: AccountId,
    pub purpose: TokenPurpose,
    pub token_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Stored form of a login one-time code (hash only, like tokens).
#[derive(Clone, Debug)]
pub struct OneTimeCodeRecord {
    pub account_id: AccountId,
    pub code_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// A freshly issued token: the raw value exists only here and in the
/// notification that delivers it.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token_id: Uuid,
    pub value: String,
}

/// Validation outcome for a purpose-bound token.
#[derive(Debug)]
pub enum TokenCheck {
    Valid(SecurityTokenRecord),
    Expired,
    AlreadyConsumed,
    NotFound,
}

/// Validation outcome for a one-time code.
#[derive(Debug, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    Expired,
    AlreadyConsumed,
    NotFound,
}

/// Issues and validates confirmation/reset tokens and 2FA codes.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    config: SecurityConfig,
}

impl TokenService {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, config: SecurityConfig) -> Self {
        Self { store, config }
    }

    /// Issue an email-confirmation token. Issuance is additive: prior
    /// unconsumed confirmation tokens stay valid until they expire.
    pub async fn issue_confirmation_token(&self, account: &UserAccount) -> Result<IssuedToken> {
        self.issue_token(
            account.id,
            TokenPurpose::EmailConfirmation,
            self.config.confirmation_token_ttl(),
        )
        .await
    }

    /// Issue a password-reset token.
    pub async fn issue_reset_token(&self, account: &UserAccount) -> Result<IssuedToken> {
        self.issue_token(
            account.id,
            TokenPurpose::PasswordReset,
            self.config.reset_token_ttl(),
        )
        .await
    }

    async fn issue_token(
        &self,
        account_id: AccountId,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let value = generate_token_value()?;
        let now = Utc::now();
        let record = SecurityTokenRecord {
            token_id: Uuid::new_v4(),
            account_id,
            purpose,
            token_hash: hash_token_value(&value),
            issued_at: now,
            expires_at: now + ttl,
            consumed_at: None,
        };
        let token_id = record.token_id;
        self.store
            .insert_token(record)
            .await
            .context("failed to persist security token")?;
        Ok(IssuedToken { token_id, value })
    }

    /// Issue a login one-time code, superseding the account's prior active
    /// code. Returns the raw code for delivery.
    pub async fn issue_one_time_code(&self, account: &UserAccount) -> Result<String> {
        let code = generate_one_time_code()?;
        let now = Utc::now();
        let record = OneTimeCodeRecord {
            account_id: account.id,
            code_hash: hash_token_value(&code),
            issued_at: now,
            expires_at: now + self.config.one_time_code_ttl(),
            consumed_at: None,
        };
        self.store
            .put_code(record)
            .await
            .context("failed to persist one-time code")?;
        Ok(code)
    }

    /// Check a provided token value against stored state without consuming it.
    pub async fn validate_token(
        &self,
        purpose: TokenPurpose,
        provided: &str,
    ) -> Result<TokenCheck> {
        let provided_hash = hash_token_value(provided.trim());
        let Some(record) = self
            .store
            .find_token(purpose, &provided_hash)
            .await
            .context("failed to look up security token")?
        else {
            return Ok(TokenCheck::NotFound);
        };
        // The store already matched on the hash; re-compare in constant time
        // so the decision never depends on a variable-time equality.
        if !bool::from(record.token_hash.ct_eq(&provided_hash)) {
            return Ok(TokenCheck::NotFound);
        }
        if record.consumed_at.is_some() {
            return Ok(TokenCheck::AlreadyConsumed);
        }
        if record.expires_at <= Utc::now() {
            return Ok(TokenCheck::Expired);
        }
        Ok(TokenCheck::Valid(record))
    }

    /// Mark a validated token consumed, after the transition it proves has
    /// committed. Returns `false` when a concurrent request consumed it
    /// first; exactly one caller ever sees `true`.
    pub async fn consume_token(&self, token_id: Uuid) -> Result<bool> {
        self.store
            .consume_token(token_id)
            .await
            .context("failed to consume security token")
    }

    /// Check a provided one-time code for an account without consuming it.
    /// A code mismatch reads as `NotFound`; callers must not disclose which.
    pub async fn validate_code(&self, account_id: AccountId, provided: &str) -> Result<CodeCheck> {
        let Some(record) = self
            .store
            .find_code(account_id)
            .await
            .context("failed to look up one-time code")?
        else {
            return Ok(CodeCheck::NotFound);
        };
        let provided_hash = hash_token_value(provided.trim());
        if !bool::from(record.code_hash.ct_eq(&provided_hash)) {
            return Ok(CodeCheck::NotFound);
        }
        if record.consumed_at.is_some() {
            return Ok(CodeCheck::AlreadyConsumed);
        }
        if record.expires_at <= Utc::now() {
            return Ok(CodeCheck::Expired);
        }
        Ok(CodeCheck::Valid)
    }

    /// Validate and consume the account's active code in one step.
    pub async fn redeem_code(&self, account_id: AccountId, provided: &str) -> Result<CodeCheck> {
        match self.validate_code(account_id, provided).await? {
            CodeCheck::Valid => {
                if self
                    .store
                    .consume_code(account_id)
                    .await
                    .context("failed to consume one-time code")?
                {
                    Ok(CodeCheck::Valid)
                } else {
                    Ok(CodeCheck::AlreadyConsumed)
                }
            }
            other => Ok(other),
        }
    }

    /// Whether a token of this purpose was issued within the cooldown window.
    pub async fn issued_within_cooldown(
        &self,
        account_id: AccountId,
        purpose: TokenPurpose,
    ) -> Result<bool> {
        let Some(issued_at) = self
            .store
            .latest_token_issued_at(account_id, purpose)
            .await
            .context("failed to check token cooldown")?
        else {
            return Ok(false);
        };
        Ok(issued_at > Utc::now() - self.config.resend_cooldown())
    }

    /// Revoke everything a completed password reset must invalidate:
    /// outstanding reset tokens and any active login code.
    pub async fn revoke_reset_artifacts(&self, account_id: AccountId) -> Result<()> {
        self.store
            .revoke_tokens(account_id, TokenPurpose::PasswordReset)
            .await
            .context("failed to revoke reset tokens")?;
        self.store
            .revoke_code(account_id)
            .await
            .context("failed to revoke one-time code")?;
        Ok(())
    }
}

/// 32 bytes from the OS CSPRNG, URL-safe base64 without padding.
fn generate_token_value() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token value")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Fixed-width numeric code from the OS CSPRNG.
fn generate_one_time_code() -> Result<String> {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    Ok(format!("{code:0width$}", width = ONE_TIME_CODE_DIGITS))
}

/// Hash a token/code value so raw values never touch the store.
fn hash_token_value(value: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service(config: SecurityConfig) -> TokenService {
        TokenService::new(Arc::new(MemoryStore::new()), config)
    }

    fn config() -> SecurityConfig {
        SecurityConfig::new("https://bank.example".to_string())
    }

    fn account() -> UserAccount {
        UserAccount::new("a@example.com", "A", "phc".to_string(), true)
    }

    #[test]
    fn generated_token_decodes_to_32_bytes() {
        let decoded_len = generate_token_value()
            .ok()
            .and_then(|value| {
                base64::engine::general_purpose::URL_SAFE_NO_PAD
                    .decode(value.as_bytes())
                    .ok()
            })
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generated_code_is_fixed_width_numeric() {
        let code = generate_one_time_code().expect("code");
        assert_eq!(code.len(), ONE_TIME_CODE_DIGITS);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn hash_token_value_stable() {
        assert_eq!(hash_token_value("token"), hash_token_value("token"));
        assert_ne!(hash_token_value("token"), hash_token_value("other"));
    }

    #[tokio::test]
    async fn token_round_trip_and_single_use() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let issued = tokens.issue_confirmation_token(&account).await?;

        let check = tokens
            .validate_token(TokenPurpose::EmailConfirmation, &issued.value)
            .await?;
        assert!(matches!(check, TokenCheck::Valid(_)));

        assert!(tokens.consume_token(issued.token_id).await?);
        // Only the first consumer wins.
        assert!(!tokens.consume_token(issued.token_id).await?);

        let again = tokens
            .validate_token(TokenPurpose::EmailConfirmation, &issued.value)
            .await?;
        assert!(matches!(again, TokenCheck::AlreadyConsumed));
        Ok(())
    }

    #[tokio::test]
    async fn token_purpose_is_isolated() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let issued = tokens.issue_confirmation_token(&account).await?;

        let check = tokens
            .validate_token(TokenPurpose::PasswordReset, &issued.value)
            .await?;
        assert!(matches!(check, TokenCheck::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> Result<()> {
        let tokens = service(config().with_confirmation_token_ttl_seconds(0));
        let account = account();
        let issued = tokens.issue_confirmation_token(&account).await?;

        let check = tokens
            .validate_token(TokenPurpose::EmailConfirmation, &issued.value)
            .await?;
        assert!(matches!(check, TokenCheck::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() -> Result<()> {
        let tokens = service(config());
        let check = tokens
            .validate_token(TokenPurpose::EmailConfirmation, "no-such-token")
            .await?;
        assert!(matches!(check, TokenCheck::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn additive_issuance_keeps_prior_token_valid() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let first = tokens.issue_reset_token(&account).await?;
        let second = tokens.issue_reset_token(&account).await?;

        let first_check = tokens
            .validate_token(TokenPurpose::PasswordReset, &first.value)
            .await?;
        assert!(matches!(first_check, TokenCheck::Valid(_)));
        let second_check = tokens
            .validate_token(TokenPurpose::PasswordReset, &second.value)
            .await?;
        assert!(matches!(second_check, TokenCheck::Valid(_)));
        Ok(())
    }

    #[tokio::test]
    async fn new_code_supersedes_prior_code() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let first = tokens.issue_one_time_code(&account).await?;
        let second = tokens.issue_one_time_code(&account).await?;

        if first != second {
            // Random collisions aside, the first code must be dead.
            assert_eq!(tokens.validate_code(account.id, &first).await?, CodeCheck::NotFound);
        }
        assert_eq!(tokens.validate_code(account.id, &second).await?, CodeCheck::Valid);
        Ok(())
    }

    #[tokio::test]
    async fn consumed_code_is_never_reaccepted() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let code = tokens.issue_one_time_code(&account).await?;

        assert_eq!(tokens.redeem_code(account.id, &code).await?, CodeCheck::Valid);
        assert_eq!(
            tokens.redeem_code(account.id, &code).await?,
            CodeCheck::AlreadyConsumed
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_is_rejected() -> Result<()> {
        let tokens = service(config().with_one_time_code_ttl_seconds(0));
        let account = account();
        let code = tokens.issue_one_time_code(&account).await?;
        assert_eq!(tokens.validate_code(account.id, &code).await?, CodeCheck::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn cooldown_tracks_latest_issuance() -> Result<()> {
        let tokens = service(config());
        let account = account();
        assert!(
            !tokens
                .issued_within_cooldown(account.id, TokenPurpose::EmailConfirmation)
                .await?
        );
        tokens.issue_confirmation_token(&account).await?;
        assert!(
            tokens
                .issued_within_cooldown(account.id, TokenPurpose::EmailConfirmation)
                .await?
        );
        // Purposes are tracked independently.
        assert!(
            !tokens
                .issued_within_cooldown(account.id, TokenPurpose::PasswordReset)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoke_reset_artifacts_kills_tokens_and_codes() -> Result<()> {
        let tokens = service(config());
        let account = account();
        let reset = tokens.issue_reset_token(&account).await?;
        let confirmation = tokens.issue_confirmation_token(&account).await?;
        let code = tokens.issue_one_time_code(&account).await?;

        tokens.revoke_reset_artifacts(account.id).await?;

        let reset_check = tokens
            .validate_token(TokenPurpose::PasswordReset, &reset.value)
            .await?;
        assert!(matches!(reset_check, TokenCheck::NotFound));
        assert_eq!(tokens.validate_code(account.id, &code).await?, CodeCheck::NotFound);
        // Confirmation tokens are untouched by a password reset.
        let confirmation_check = tokens
            .validate_token(TokenPurpose::EmailConfirmation, &confirmation.value)
            .await?;
        assert!(matches!(confirmation_check, TokenCheck::Valid(_)));
        Ok(())
    }
}
