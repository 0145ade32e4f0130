//! # Sportello (Account Security Core)
//!
//! `sportello` is the authentication and account-security core for a
//! multi-service digital-banking platform. It owns the account security
//! state machine: password verification with lockout, email-confirmation and
//! password-reset token lifecycles, two-factor one-time codes, and session
//! issuance with a role snapshot.
//!
//! ## Collaborators
//!
//! Persistence and delivery are external. The crate consumes a
//! [`store::CredentialStore`] / [`store::TokenStore`] pair (any backend with
//! compare-and-swap update semantics) and a [`notifier::Notifier`] for
//! outbound email. An in-memory implementation backs tests and local runs.
//!
//! ## Security posture
//!
//! - **Enumeration resistance:** resend-confirmation, password-reset
//!   requests and login against unknown emails are indistinguishable from
//!   the successful paths. True reasons are logged, never returned.
//! - **Lockout:** five failed password checks lock the account for fifteen
//!   minutes (configurable). Lockout state is disclosed to callers; nothing
//!   else is.
//! - **Tokens:** purpose-bound, single-use, time-limited; stores only ever
//!   see SHA-256 hashes, and comparisons are constant-time.
//! - **Step-up checks:** password change and the two-factor toggles
//!   re-verify the caller's password, with the caller's identity passed
//!   explicitly rather than read from ambient context.
//!
//! ## Concurrency
//!
//! Requests are stateless units of work; all shared state lives in the
//! store. Account mutations go through a compare-and-swap update with one
//! internal retry, so simultaneous logins cannot lose lockout increments.

pub mod account;
pub mod config;
pub mod lifecycle;
pub mod login;
pub mod notifier;
pub mod password;
pub mod store;
pub mod token;
pub mod verifier;

pub use account::{AccountId, UserAccount};
pub use config::SecurityConfig;
pub use lifecycle::LifecycleService;
pub use login::{AuthenticatedSession, LoginOutcome, LoginService};
pub use notifier::{LogNotifier, Notifier};
pub use store::MemoryStore;
pub use token::TokenService;
pub use verifier::CredentialVerifier;
