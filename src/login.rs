//! The multi-step login protocol: password check, optional one-time-code
//! challenge, session issuance.
//!
//! External failure shape is deliberately flat. Wrong password, unknown
//! email, inactive and unconfirmed accounts all collapse to
//! [`LoginOutcome::Failed`]; only lockout is disclosed, since lockout timing
//! is not a secret in this design. The true reason goes to the logs.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::account::{AccountId, normalize_email, valid_email};
use crate::config::SecurityConfig;
use crate::notifier::{Notifier, one_time_code_message};
use crate::password::{hash_password, verify_password};
use crate::store::{CredentialStore, mutate_account};
use crate::token::{CodeCheck, TokenService};
use crate::verifier::{CredentialVerifier, PasswordCheck, RejectReason};

/// Session artifact returned after full authentication.
///
/// Immutable once issued: the role set is a snapshot taken at issuance, so
/// later role changes require re-authentication to take effect.
#[derive(Clone, Debug, Serialize)]
pub struct AuthenticatedSession {
    /// Opaque bearer value; validators store/compare only its hash.
    pub token: String,
    pub account_id: AccountId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub roles: BTreeSet<String>,
}

/// What one login step produced.
#[derive(Debug)]
pub enum LoginOutcome {
    SessionIssued(AuthenticatedSession),
    /// Password accepted; a one-time code was dispatched and must be
    /// presented to [`LoginService::verify_two_factor`]. No session yet.
    TwoFactorRequired { account_id: AccountId },
    /// Disclosed by policy; see crate docs.
    LockedOut { until: DateTime<Utc> },
    /// Generic, non-disclosing failure.
    Failed,
}

/// Orchestrates login attempts against the credential store.
#[derive(Clone)]
pub struct LoginService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
    verifier: CredentialVerifier,
    notifier: Arc<dyn Notifier>,
    config: SecurityConfig,
    /// Hash of a throwaway random value, verified against when the email is
    /// unknown so the response time does not reveal account existence.
    decoy_hash: String,
}

impl LoginService {
    /// # Errors
    /// Fails only if the decoy hash cannot be generated.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenService,
        verifier: CredentialVerifier,
        notifier: Arc<dyn Notifier>,
        config: SecurityConfig,
    ) -> Result<Self> {
        let decoy_hash = hash_password(&Uuid::new_v4().to_string())?;
        Ok(Self {
            store,
            tokens,
            verifier,
            notifier,
            config,
            decoy_hash,
        })
    }

    /// First step of the login protocol.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            // Malformed input never reaches the store; the response still
            // matches an unknown email.
            let _ = verify_password(password.expose_secret(), &self.decoy_hash);
            debug!("login attempt with malformed email");
            return Ok(LoginOutcome::Failed);
        }
        let Some(account) = self
            .store
            .find_by_email(&email)
            .await
            .context("failed to look up account for login")?
        else {
            // Burn a hash verification so unknown emails cost the same as
            // wrong passwords.
            let _ = verify_password(password.expose_secret(), &self.decoy_hash);
            info!("login attempt for unknown email");
            return Ok(LoginOutcome::Failed);
        };

        let verifier = self.verifier.clone();
        let result = mutate_account(self.store.as_ref(), account.id, |account| {
            verifier.verify(account, password)
        })
        .await?;
        let Some((account, check)) = result else {
            info!(account_id = %account.id, "account disappeared during login");
            return Ok(LoginOutcome::Failed);
        };

        match check {
            PasswordCheck::Accepted if account.two_factor_enabled => {
                let code = self.tokens.issue_one_time_code(&account).await?;
                let (subject, body) = one_time_code_message(&code);
                self.dispatch(&account.email, &subject, &body).await;
                Ok(LoginOutcome::TwoFactorRequired {
                    account_id: account.id,
                })
            }
            PasswordCheck::Accepted => Ok(LoginOutcome::SessionIssued(self.issue_session(
                account.id,
                &account.roles,
            )?)),
            PasswordCheck::Rejected(RejectReason::AccountLockedOut { until }) => {
                Ok(LoginOutcome::LockedOut { until })
            }
            PasswordCheck::Rejected(reason) => {
                info!(account_id = %account.id, ?reason, "login rejected");
                Ok(LoginOutcome::Failed)
            }
        }
    }

    /// Second step for two-factor accounts: redeem the dispatched code.
    ///
    /// Expired, consumed, mismatched and missing codes are indistinguishable
    /// to the caller.
    pub async fn verify_two_factor(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> Result<LoginOutcome> {
        match self.tokens.redeem_code(account_id, code).await? {
            CodeCheck::Valid => {}
            reason => {
                debug!(%account_id, ?reason, "two-factor verification rejected");
                return Ok(LoginOutcome::Failed);
            }
        }

        let Some(account) = self
            .store
            .find_by_id(account_id)
            .await
            .context("failed to look up account for two-factor verification")?
        else {
            info!(%account_id, "two-factor verification for unknown account");
            return Ok(LoginOutcome::Failed);
        };
        // The account may have been deactivated or locked since the password
        // step; a consumed code must not bypass that.
        if !account.is_active || account.locked_out_at(Utc::now()) {
            info!(account_id = %account.id, "two-factor verification against unauthenticable account");
            return Ok(LoginOutcome::Failed);
        }

        Ok(LoginOutcome::SessionIssued(
            self.issue_session(account.id, &account.roles)?,
        ))
    }

    fn issue_session(
        &self,
        account_id: AccountId,
        roles: &BTreeSet<String>,
    ) -> Result<AuthenticatedSession> {
        let now = Utc::now();
        Ok(AuthenticatedSession {
            token: generate_session_token()?,
            account_id,
            issued_at: now,
            expires_at: now + self.config.session_ttl(),
            roles: roles.clone(),
        })
    }

    async fn dispatch(&self, recipient: &str, subject: &str, body: &str) {
        if let Err(err) = self.notifier.send(recipient, subject, body).await {
            error!(recipient = %recipient, "failed to dispatch one-time code: {err:#}");
        }
    }
}

/// Opaque random session token. The raw value is only returned to the
/// caller; session validators are expected to store a hash.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_serializes_for_the_boundary_layer() {
        let now = Utc::now();
        let session = AuthenticatedSession {
            token: "opaque".to_string(),
            account_id: Uuid::new_v4(),
            issued_at: now,
            expires_at: now,
            roles: BTreeSet::from(["teller".to_string()]),
        };
        let json = serde_json::to_value(&session).expect("serialize");
        assert_eq!(json["token"], "opaque");
        assert_eq!(json["account_id"], session.account_id.to_string());
    }

    #[test]
    fn session_tokens_are_unique_and_32_bytes() {
        let first = generate_session_token().expect("token");
        let second = generate_session_token().expect("token");
        assert_ne!(first, second);
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first.as_bytes())
            .expect("decodes");
        assert_eq!(decoded.len(), 32);
    }
}
