//! Security policy configuration.
//!
//! All windows and thresholds carry production defaults; tests and deployments
//! override them through the builder-style `with_*` methods.

use chrono::Duration;

const DEFAULT_CONFIRMATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_ONE_TIME_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;

/// Policy knobs for the security core.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    frontend_base_url: String,
    confirmation_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    one_time_code_ttl_seconds: i64,
    session_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    max_failed_attempts: u32,
    lockout_seconds: i64,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            confirmation_token_ttl_seconds: DEFAULT_CONFIRMATION_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            one_time_code_ttl_seconds: DEFAULT_ONE_TIME_CODE_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_confirmation_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.confirmation_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_one_time_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.one_time_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn confirmation_token_ttl(&self) -> Duration {
        Duration::seconds(self.confirmation_token_ttl_seconds)
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        Duration::seconds(self.reset_token_ttl_seconds)
    }

    #[must_use]
    pub fn one_time_code_ttl(&self) -> Duration {
        Duration::seconds(self.one_time_code_ttl_seconds)
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        Duration::seconds(self.resend_cooldown_seconds)
    }

    #[must_use]
    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        Duration::seconds(self.lockout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::SecurityConfig;
    use chrono::Duration;

    #[test]
    fn defaults_match_policy() {
        let config = SecurityConfig::new("https://bank.example".to_string());
        assert_eq!(config.confirmation_token_ttl(), Duration::hours(24));
        assert_eq!(config.reset_token_ttl(), Duration::hours(1));
        assert_eq!(config.one_time_code_ttl(), Duration::minutes(10));
        assert_eq!(config.max_failed_attempts(), 5);
        assert_eq!(config.lockout_duration(), Duration::minutes(15));
        assert_eq!(config.resend_cooldown(), Duration::seconds(60));
    }

    #[test]
    fn builders_override_defaults() {
        let config = SecurityConfig::new("https://bank.example".to_string())
            .with_max_failed_attempts(3)
            .with_lockout_seconds(30)
            .with_one_time_code_ttl_seconds(5);
        assert_eq!(config.max_failed_attempts(), 3);
        assert_eq!(config.lockout_duration(), Duration::seconds(30));
        assert_eq!(config.one_time_code_ttl(), Duration::seconds(5));
    }
}
