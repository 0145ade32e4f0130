//! Outbound message delivery abstraction.
//!
//! The core treats delivery as fire-and-forget: a notifier failure is logged
//! and never fails the surrounding operation. Retries and real transports
//! (SMTP, broker, provider API) live behind the trait, outside this crate.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::token::ONE_TIME_CODE_DIGITS;

/// Message delivery abstraction consumed by the security core.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message or return an error to be logged by the caller.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Local dev notifier that logs the payload instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        info!(recipient = %recipient, subject = %subject, body = %body, "notifier send stub");
        Ok(())
    }
}

/// Build the frontend confirmation link included in outbound emails.
#[must_use]
pub fn build_confirmation_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/confirm-email#token={token}")
}

/// Build the frontend password-reset link included in outbound emails.
#[must_use]
pub fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}

/// Subject and body for a confirmation email.
#[must_use]
pub fn confirmation_message(frontend_base_url: &str, token: &str) -> (String, String) {
    let url = build_confirmation_url(frontend_base_url, token);
    (
        "Confirm your email address".to_string(),
        format!("Open the link below to confirm your email address:\n\n{url}\n"),
    )
}

/// Subject and body for a password-reset email.
#[must_use]
pub fn reset_message(frontend_base_url: &str, token: &str) -> (String, String) {
    let url = build_reset_url(frontend_base_url, token);
    (
        "Reset your password".to_string(),
        format!("Open the link below to choose a new password:\n\n{url}\n"),
    )
}

/// Subject and body for a login one-time code email.
#[must_use]
pub fn one_time_code_message(code: &str) -> (String, String) {
    (
        "Your sign-in code".to_string(),
        format!("Your {ONE_TIME_CODE_DIGITS}-digit sign-in code is {code}. It expires shortly.\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_url_trims_trailing_slash() {
        let url = build_confirmation_url("https://bank.example/", "token");
        assert_eq!(url, "https://bank.example/confirm-email#token=token");
    }

    #[test]
    fn reset_url_embeds_token() {
        let url = build_reset_url("https://bank.example", "abc123");
        assert_eq!(url, "https://bank.example/reset-password#token=abc123");
    }

    #[test]
    fn code_message_carries_the_code() {
        let (subject, body) = one_time_code_message("042137");
        assert_eq!(subject, "Your sign-in code");
        assert!(body.contains("042137"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert!(notifier.send("a@example.com", "s", "b").await.is_ok());
    }
}
