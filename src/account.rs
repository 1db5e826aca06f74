//! The account directory the authenticators consult.
//!
//! Password hashing, directory binds and account creation live behind [`AccountManager`];
//! this crate only decides when to ask and what to do with the answer.

use crate::session::AccountId;
use async_trait::async_trait;

/// Scheme of external ids created for user name sign-ins.
pub const SCHEME_USERNAME: &str = "username";

/// What the directory knows about an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    /// The account.
    pub account_id: AccountId,
    /// The user name the account signs in with.
    pub username: String,
    /// Inactive accounts may not sign in.
    pub active: bool,
    /// The generated password used for git over HTTP, if one was set.
    pub http_password: Option<String>,
}

/// A sign-in attempt handed to the [`AccountManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// External identity, e.g. `username:jdoe`.
    pub external_id: String,
    /// User name, if known.
    pub username: Option<String>,
    /// Password to verify, if any.
    pub password: Option<String>,
    /// Preferred email address reported by an external provider.
    pub email: Option<String>,
    /// Display name reported by an external provider.
    pub display_name: Option<String>,
}

impl AuthRequest {
    /// A request for a user name sign-in.
    pub fn for_user(username: &str) -> Self {
        Self {
            external_id: format!("{SCHEME_USERNAME}:{username}"),
            username: Some(username.to_string()),
            password: None,
            email: None,
            display_name: None,
        }
    }

    /// A request for an identity asserted by an external provider.
    pub fn for_external(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            username: None,
            password: None,
            email: None,
            display_name: None,
        }
    }

    /// Attach the password to verify.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// A successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    /// The signed-in account.
    pub account_id: AccountId,
    /// The external identity that was used.
    pub external_id: String,
    /// The account was created by this sign-in.
    pub is_new: bool,
}

/// Why the [`AccountManager`] refused a sign-in.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// No account matches the request.
    #[error("no such user: {0}")]
    NoSuchUser(String),
    /// The account exists, but the credentials are wrong or the account is blocked.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The directory could not be asked.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// Looks up and authenticates accounts.
#[async_trait]
pub trait AccountManager: Send + Sync {
    /// The account that signs in with `username`.
    async fn by_username(&self, username: &str) -> anyhow::Result<Option<AccountState>>;

    /// Verify a sign-in attempt and return the account it resolves to.
    async fn authenticate(&self, request: AuthRequest) -> Result<AuthResult, AccountError>;
}
