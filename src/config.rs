//! Gateway configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```
//! use session_gateway::config::{AuthType, GatewayConfig};
//!
//! let config = GatewayConfig::from_toml_str(
//!     r#"
//!     [auth]
//!     type = "oauth"
//!     git_basic_auth = true
//!
//!     [sessions]
//!     max_age_secs = 3600
//!     "#,
//! ).unwrap();
//! assert_eq!(config.auth.auth_type, AuthType::OAuth);
//! assert_eq!(config.auth.realm, "Gerrit Code Review");
//! ```

use crate::Error;
use serde::Deserialize;
use std::time::Duration;

/// The realm announced in `WWW-Authenticate` challenges unless configured otherwise.
pub const DEFAULT_REALM: &str = "Gerrit Code Review";

/// Top level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Session cache settings.
    pub sessions: SessionConfig,
    /// Git smart-HTTP settings.
    pub git: GitConfig,
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|error| Error::Config(error.to_string()))
    }
}

/// How accounts sign in to the web UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Directory-backed user name and password.
    #[default]
    Ldap,
    /// The servlet container or a fronting proxy authenticates.
    Http,
    /// An OAuth provider authenticates.
    #[serde(rename = "oauth")]
    OAuth,
}

/// How passwords sent with HTTP Basic authentication are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitBasicAuthPolicy {
    /// Compare with the account's HTTP password.
    Http,
    /// Ask the account manager (typically a directory bind).
    #[default]
    Ldap,
    /// Accept a matching HTTP password, otherwise ask the account manager.
    HttpLdap,
}

/// `[auth]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// The web sign-in type.
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Trust the identity asserted by the container for git requests.
    pub trust_container_auth: bool,
    /// Use HTTP Basic instead of Digest for git requests.
    pub git_basic_auth: bool,
    /// Password check used by Basic authentication.
    pub git_basic_auth_policy: GitBasicAuthPolicy,
    /// Realm announced in challenges.
    pub realm: String,
    /// Public URL of the server, e.g. `https://review.example.com/r/`.
    pub canonical_web_url: Option<String>,
    /// Path the server is mounted at.
    pub context_path: String,
    /// Overrides the `Path` attribute of the session cookie.
    pub cookie_path: Option<String>,
    /// Always mark the session cookie `Secure`.
    pub cookie_secure: bool,
    /// Fold user names to lower case before looking up accounts.
    pub user_name_case_insensitive: bool,
    /// Header carrying the user name for container authentication.
    pub http_header: Option<String>,
    /// OAuth provider used for Basic credentials when several are installed.
    pub git_oauth_provider: Option<String>,
    /// Lifetime of Digest nonces.
    pub nonce_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: AuthType::default(),
            trust_container_auth: false,
            git_basic_auth: false,
            git_basic_auth_policy: GitBasicAuthPolicy::default(),
            realm: DEFAULT_REALM.to_string(),
            canonical_web_url: None,
            context_path: "/".to_string(),
            cookie_path: None,
            cookie_secure: false,
            user_name_case_insensitive: false,
            http_header: None,
            git_oauth_provider: None,
            nonce_lifetime_secs: 60 * 60,
        }
    }
}

impl AuthConfig {
    /// `Path` attribute of the session cookie.
    pub fn cookie_path(&self) -> &str {
        match self.cookie_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ if self.context_path.is_empty() => "/",
            _ => &self.context_path,
        }
    }

    /// Whether the session cookie carries the `Secure` attribute.
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
            || self
                .canonical_web_url
                .as_deref()
                .is_some_and(|url| url.starts_with("https:"))
    }

    /// `domain` parameter of Digest challenges.
    pub fn digest_domain(&self) -> &str {
        self.canonical_web_url
            .as_deref()
            .unwrap_or(&self.context_path)
    }

    /// Lifetime of Digest nonces.
    pub fn nonce_lifetime(&self) -> Duration {
        Duration::from_secs(self.nonce_lifetime_secs)
    }
}

/// `[sessions]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Time-to-live of a session since it was last seen.
    pub max_age_secs: u64,
    /// Upper bound on the number of sessions kept in memory.
    pub max_cached_sessions: usize,
    /// Interval of the background sweep over the persistent store.
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 12 * 60 * 60,
            max_cached_sessions: 4096,
            cleanup_interval_secs: 12 * 60 * 60,
        }
    }
}

impl SessionConfig {
    /// Time-to-live of a session.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Interval of the background sweep.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// `[git]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Serve `git-receive-pack`.
    pub receive_enabled: bool,
    /// How long advertised object ids are remembered for a retried push.
    pub advertised_objects_ttl_secs: u64,
    /// Upper bound on remembered advertisements.
    pub advertised_objects_max_entries: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            receive_enabled: true,
            advertised_objects_ttl_secs: 10 * 60,
            advertised_objects_max_entries: 4096,
        }
    }
}

impl GitConfig {
    /// How long advertised object ids are remembered.
    pub fn advertised_objects_ttl(&self) -> Duration {
        Duration::from_secs(self.advertised_objects_ttl_secs)
    }
}
