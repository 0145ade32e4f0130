//! Password verification and lockout accounting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::account::UserAccount;
use crate::config::SecurityConfig;
use crate::password::verify_password;

/// Why a password check was rejected. Internal only: the boundary layer
/// must collapse everything except lockout into a generic failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    IncorrectCredential,
    AccountLockedOut { until: DateTime<Utc> },
    AccountInactive,
    EmailNotConfirmed,
}

/// Outcome of one password verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PasswordCheck {
    Accepted,
    Rejected(RejectReason),
}

/// Validates submitted passwords against an already-looked-up account and
/// applies the lockout bookkeeping to it.
///
/// The verifier never touches the store: it mutates the account record in
/// place and the caller persists the result through the store's
/// compare-and-swap update, so concurrent attempts cannot lose increments.
#[derive(Clone)]
pub struct CredentialVerifier {
    config: SecurityConfig,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// Check `submitted` against the account's stored hash.
    ///
    /// Check order is fixed: inactive, then lockout, then the hash
    /// comparison, then email confirmation. Inactive and locked accounts are
    /// rejected before any hash work; a correct password on an unconfirmed
    /// account still clears the failure counters before being rejected.
    ///
    /// # Errors
    /// Only infrastructure faults (malformed stored hash) are errors; every
    /// policy decision is a [`PasswordCheck`].
    pub fn verify(
        &self,
        account: &mut UserAccount,
        submitted: &SecretString,
    ) -> Result<PasswordCheck> {
        let now = Utc::now();

        if !account.is_active {
            return Ok(PasswordCheck::Rejected(RejectReason::AccountInactive));
        }

        if let Some(until) = account.lockout_ends_at {
            if until > now {
                return Ok(PasswordCheck::Rejected(RejectReason::AccountLockedOut {
                    until,
                }));
            }
            // Lockout elapsed; attempts start from a clean slate.
            account.lockout_ends_at = None;
            account.failed_access_count = 0;
        }

        if !verify_password(submitted.expose_secret(), &account.password_hash)? {
            account.failed_access_count += 1;
            if account.failed_access_count >= self.config.max_failed_attempts() {
                let until = now + self.config.lockout_duration();
                account.lockout_ends_at = Some(until);
                account.failed_access_count = 0;
                warn!(account_id = %account.id, %until, "account locked out after repeated failures");
                return Ok(PasswordCheck::Rejected(RejectReason::AccountLockedOut {
                    until,
                }));
            }
            return Ok(PasswordCheck::Rejected(RejectReason::IncorrectCredential));
        }

        account.failed_access_count = 0;
        account.lockout_ends_at = None;

        if !account.email_confirmed {
            return Ok(PasswordCheck::Rejected(RejectReason::EmailNotConfirmed));
        }

        Ok(PasswordCheck::Accepted)
    }
}
