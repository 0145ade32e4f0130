//! Account lifecycle transitions: confirmation, password reset and change,
//! and the two-factor toggles.
//!
//! Every transition is a single compare-and-swap against the credential
//! store, so an abrupt caller disconnect never leaves partial state behind.
//! The email-triggered operations (`resend_confirmation`,
//! `request_password_reset`) report success regardless of whether the account
//! exists; the true branch is only visible in logs.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::account::{AccountId, UserAccount, normalize_email, valid_email};
use crate::config::SecurityConfig;
use crate::notifier::{Notifier, confirmation_message, reset_message};
use crate::password::hash_password;
use crate::store::{CredentialStore, mutate_account};
use crate::token::{TokenCheck, TokenPurpose, TokenService};
use crate::verifier::{CredentialVerifier, PasswordCheck, RejectReason};

/// Why a token-driven transition was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenFailure {
    Expired,
    AlreadyConsumed,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Rejected(TokenFailure),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Completed,
    Rejected(TokenFailure),
}

/// Outcome of an authenticated, step-up-checked mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepUpOutcome {
    Applied,
    Rejected(RejectReason),
    /// The authenticated identifier no longer resolves to an account.
    UnknownAccount,
}

/// Coordinates legal account state transitions.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
    verifier: CredentialVerifier,
    notifier: Arc<dyn Notifier>,
    config: SecurityConfig,
}

impl LifecycleService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenService,
        verifier: CredentialVerifier,
        notifier: Arc<dyn Notifier>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            verifier,
            notifier,
            config,
        }
    }

    /// Consume a confirmation token and mark the account's email confirmed.
    ///
    /// An unknown account id reads as [`TokenFailure::NotFound`], same as an
    /// invalid token; the distinction only reaches the logs.
    pub async fn confirm_email(&self, account_id: AccountId, token: &str) -> Result<ConfirmOutcome> {
        let Some(account) = self
            .store
            .find_by_id(account_id)
            .await
            .context("failed to look up account for confirmation")?
        else {
            warn!(%account_id, "confirmation attempted for unknown account");
            return Ok(ConfirmOutcome::Rejected(TokenFailure::NotFound));
        };

        let record = match self
            .tokens
            .validate_token(TokenPurpose::EmailConfirmation, token)
            .await?
        {
            TokenCheck::Valid(record) => record,
            TokenCheck::Expired => return Ok(ConfirmOutcome::Rejected(TokenFailure::Expired)),
            TokenCheck::AlreadyConsumed => {
                return Ok(ConfirmOutcome::Rejected(TokenFailure::AlreadyConsumed));
            }
            TokenCheck::NotFound => return Ok(ConfirmOutcome::Rejected(TokenFailure::NotFound)),
        };

        if record.account_id != account.id {
            // A well-formed token presented against the wrong account; the
            // token stays usable by its real owner.
            warn!(%account_id, token_owner = %record.account_id, "confirmation token ownership mismatch");
            return Ok(ConfirmOutcome::Rejected(TokenFailure::NotFound));
        }

        let updated = mutate_account(self.store.as_ref(), account.id, |account| {
            account.email_confirmed = true;
            Ok(())
        })
        .await?;
        if updated.is_none() {
            warn!(%account_id, "account disappeared during confirmation");
            return Ok(ConfirmOutcome::Rejected(TokenFailure::NotFound));
        }

        // Consume only after the transition committed, so a rejected or
        // failed attempt never burns the token.
        if !self.tokens.consume_token(record.token_id).await? {
            return Ok(ConfirmOutcome::Rejected(TokenFailure::AlreadyConsumed));
        }
        Ok(ConfirmOutcome::Confirmed)
    }

    /// Issue and dispatch a fresh confirmation token.
    ///
    /// Always reports success: a missing or already-confirmed account is a
    /// silent no-op so callers cannot probe for registered addresses.
    pub async fn resend_confirmation(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(());
        }
        let Some(account) = self
            .store
            .find_by_email(&email)
            .await
            .context("failed to look up account for resend")?
        else {
            debug!("confirmation resend for unknown email");
            return Ok(());
        };
        if account.email_confirmed {
            debug!(account_id = %account.id, "confirmation resend for already-confirmed account");
            return Ok(());
        }
        if self
            .tokens
            .issued_within_cooldown(account.id, TokenPurpose::EmailConfirmation)
            .await?
        {
            debug!(account_id = %account.id, "confirmation resend within cooldown");
            return Ok(());
        }

        let issued = self.tokens.issue_confirmation_token(&account).await?;
        let (subject, body) = confirmation_message(self.config.frontend_base_url(), &issued.value);
        self.dispatch(&account.email, &subject, &body).await;
        Ok(())
    }

    /// Issue and dispatch a password-reset token.
    ///
    /// Same opaque semantics as [`Self::resend_confirmation`]; additionally,
    /// unconfirmed accounts never receive a reset token.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(());
        }
        let Some(account) = self
            .store
            .find_by_email(&email)
            .await
            .context("failed to look up account for reset request")?
        else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };
        if !account.email_confirmed {
            debug!(account_id = %account.id, "password reset requested for unconfirmed account");
            return Ok(());
        }
        if self
            .tokens
            .issued_within_cooldown(account.id, TokenPurpose::PasswordReset)
            .await?
        {
            debug!(account_id = %account.id, "password reset request within cooldown");
            return Ok(());
        }

        let issued = self.tokens.issue_reset_token(&account).await?;
        let (subject, body) = reset_message(self.config.frontend_base_url(), &issued.value);
        self.dispatch(&account.email, &subject, &body).await;
        Ok(())
    }

    /// Consume a reset token and replace the account's credential.
    ///
    /// A completed reset also clears the lockout counters and revokes every
    /// other outstanding reset token and active one-time code.
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &SecretString,
    ) -> Result<ResetOutcome> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(ResetOutcome::Rejected(TokenFailure::NotFound));
        }
        let Some(account) = self
            .store
            .find_by_email(&email)
            .await
            .context("failed to look up account for reset")?
        else {
            debug!("password reset for unknown email");
            return Ok(ResetOutcome::Rejected(TokenFailure::NotFound));
        };

        let record = match self
            .tokens
            .validate_token(TokenPurpose::PasswordReset, token)
            .await?
        {
            TokenCheck::Valid(record) => record,
            TokenCheck::Expired => return Ok(ResetOutcome::Rejected(TokenFailure::Expired)),
            TokenCheck::AlreadyConsumed => {
                return Ok(ResetOutcome::Rejected(TokenFailure::AlreadyConsumed));
            }
            TokenCheck::NotFound => return Ok(ResetOutcome::Rejected(TokenFailure::NotFound)),
        };
        if record.account_id != account.id {
            warn!(account_id = %account.id, token_owner = %record.account_id, "reset token ownership mismatch");
            return Ok(ResetOutcome::Rejected(TokenFailure::NotFound));
        }

        let new_hash = {
            use secrecy::ExposeSecret;
            hash_password(new_password.expose_secret())?
        };
        let updated = mutate_account(self.store.as_ref(), account.id, |account| {
            account.password_hash = new_hash.clone();
            account.failed_access_count = 0;
            account.lockout_ends_at = None;
            Ok(())
        })
        .await?;
        if updated.is_none() {
            return Ok(ResetOutcome::Rejected(TokenFailure::NotFound));
        }

        // Consumption happens after the credential update commits: a
        // transient store conflict leaves the token alive for the retry.
        if !self.tokens.consume_token(record.token_id).await? {
            return Ok(ResetOutcome::Rejected(TokenFailure::AlreadyConsumed));
        }
        self.tokens.revoke_reset_artifacts(account.id).await?;
        Ok(ResetOutcome::Completed)
    }

    /// Replace the credential of an authenticated caller after re-verifying
    /// the current password.
    pub async fn change_password(
        &self,
        account_id: AccountId,
        current_password: &SecretString,
        new_password: &SecretString,
    ) -> Result<StepUpOutcome> {
        let verifier = self.verifier.clone();
        let result = mutate_account(self.store.as_ref(), account_id, |account| {
            let check = verifier.verify(account, current_password)?;
            if check == PasswordCheck::Accepted {
                use secrecy::ExposeSecret;
                account.password_hash = hash_password(new_password.expose_secret())?;
            }
            Ok(check)
        })
        .await?;
        Ok(Self::step_up_outcome(account_id, result, "password change"))
    }

    /// Enable two-factor login after a step-up password check. Idempotent.
    pub async fn enable_two_factor(
        &self,
        account_id: AccountId,
        current_password: &SecretString,
    ) -> Result<StepUpOutcome> {
        self.set_two_factor(account_id, current_password, true).await
    }

    /// Disable two-factor login after a step-up password check. Idempotent.
    pub async fn disable_two_factor(
        &self,
        account_id: AccountId,
        current_password: &SecretString,
    ) -> Result<StepUpOutcome> {
        self.set_two_factor(account_id, current_password, false)
            .await
    }

    async fn set_two_factor(
        &self,
        account_id: AccountId,
        current_password: &SecretString,
        enabled: bool,
    ) -> Result<StepUpOutcome> {
        let verifier = self.verifier.clone();
        let result = mutate_account(self.store.as_ref(), account_id, |account| {
            let check = verifier.verify(account, current_password)?;
            if check == PasswordCheck::Accepted {
                account.two_factor_enabled = enabled;
            }
            Ok(check)
        })
        .await?;
        Ok(Self::step_up_outcome(account_id, result, "two-factor toggle"))
    }

    fn step_up_outcome(
        account_id: AccountId,
        result: Option<(UserAccount, PasswordCheck)>,
        operation: &str,
    ) -> StepUpOutcome {
        match result {
            None => {
                warn!(%account_id, operation, "step-up check against unknown account");
                StepUpOutcome::UnknownAccount
            }
            Some((_, PasswordCheck::Accepted)) => StepUpOutcome::Applied,
            Some((_, PasswordCheck::Rejected(reason))) => {
                debug!(%account_id, operation, ?reason, "step-up check rejected");
                StepUpOutcome::Rejected(reason)
            }
        }
    }

    /// Fire-and-forget dispatch: delivery failures are logged, never
    /// surfaced, so notification trouble cannot fail a security operation.
    async fn dispatch(&self, recipient: &str, subject: &str, body: &str) {
        if let Err(err) = self.notifier.send(recipient, subject, body).await {
            error!(recipient = %recipient, "failed to dispatch notification: {err:#}");
        }
    }
}
