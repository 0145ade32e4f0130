//! Account records and the helpers that keep email lookups consistent.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Opaque account identifier.
pub type AccountId = Uuid;

/// One principal (employee or customer) able to authenticate.
///
/// The record is the single source of truth for an account's security
/// posture; every mutation goes back through the credential store's
/// compare-and-swap update keyed on `version`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: AccountId,
    /// Normalized (trimmed, lowercased) email; unique across accounts.
    pub email: String,
    pub display_name: String,
    /// PHC-format password hash; opaque to everything but the verifier.
    pub password_hash: String,
    pub email_confirmed: bool,
    pub is_active: bool,
    pub two_factor_enabled: bool,
    pub failed_access_count: u32,
    pub lockout_ends_at: Option<DateTime<Utc>>,
    pub roles: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped by the store on every update.
    pub version: u64,
}

impl UserAccount {
    /// New unconfirmed account with no roles and two-factor disabled.
    #[must_use]
    pub fn new(email: &str, display_name: &str, password_hash: String, is_active: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            display_name: display_name.to_string(),
            password_hash,
            email_confirmed: false,
            is_active,
            two_factor_enabled: false,
            failed_access_count: 0,
            lockout_ends_at: None,
            roles: BTreeSet::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Whether a lockout is in force at `now`.
    #[must_use]
    pub fn locked_out_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_ends_at.is_some_and(|until| until > now)
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}
