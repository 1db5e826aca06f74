//! OAuth authentication for git clients.
//!
//! Git credential helpers send the provider's access token either in a cookie named
//! `git-<url-encoded user name>` with the value `<token>@<provider id>`, or as the password of
//! Basic credentials. Basic credentials are checked against the default provider.

use super::{account_error, authorization, bind_account, decode_basic, lookup_name, AuthOutcome};
use crate::account::{AccountManager, AuthRequest};
use crate::config::AuthConfig;
use crate::session_store::SessionPersistence;
use crate::web_session::{request_cookies, WebSession};
use crate::{Error, Result};
use async_trait::async_trait;
use http::Request;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Prefix of the cookies carrying OAuth tokens.
pub const GIT_COOKIE_PREFIX: &str = "git-";

/// The identity an OAuth provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthUserInfo {
    /// Provider-scoped identity, e.g. `github-oauth:12345`.
    pub external_id: String,
    /// User name reported by the provider.
    pub username: Option<String>,
    /// Email address reported by the provider.
    pub email: Option<String>,
    /// Display name reported by the provider.
    pub display_name: Option<String>,
}

/// Why a provider refused a token.
#[derive(Debug, thiserror::Error)]
pub enum OAuthLoginError {
    /// The token is unknown, expired or belongs to someone else.
    #[error("token rejected: {0}")]
    Rejected(String),
    /// The provider could not be reached.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// An installed OAuth provider.
#[async_trait]
pub trait OAuthLoginProvider: Send + Sync {
    /// Verify `token` and return the identity it belongs to.
    async fn login(
        &self,
        username: Option<&str>,
        token: &str,
    ) -> std::result::Result<OAuthUserInfo, OAuthLoginError>;
}

/// Installed providers by id.
pub type OAuthProviders = BTreeMap<String, Arc<dyn OAuthLoginProvider>>;

/// Credentials found in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OAuthCredentials {
    username: String,
    token: String,
    provider_id: Option<String>,
}

/// Verifies OAuth tokens with the installed providers.
pub struct OAuthAuthenticator {
    accounts: Arc<dyn AccountManager>,
    providers: OAuthProviders,
    default_provider: Option<String>,
    realm: String,
    case_insensitive: bool,
}

impl OAuthAuthenticator {
    /// Create an authenticator for `config`.
    ///
    /// The default provider is the one named in the configuration, or the only installed one.
    /// Fails if the configured provider is not installed.
    pub fn new(
        accounts: Arc<dyn AccountManager>,
        providers: OAuthProviders,
        config: &AuthConfig,
    ) -> Result<Self> {
        let default_provider = match &config.git_oauth_provider {
            Some(id) if providers.contains_key(id) => Some(id.clone()),
            Some(id) => {
                return Err(Error::Config(format!("OAuth provider {id:?} is not installed")));
            }
            None if providers.len() == 1 => providers.keys().next().cloned(),
            None => {
                if !providers.is_empty() {
                    log::warn!(
                        "several OAuth providers installed, Basic credentials will be refused"
                    );
                }
                None
            }
        };
        Ok(Self {
            accounts,
            providers,
            default_provider,
            realm: config.realm.clone(),
            case_insensitive: config.user_name_case_insensitive,
        })
    }

    /// The provider Basic credentials are checked with.
    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// The `WWW-Authenticate` challenge.
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    /// Verify the request's OAuth token, if it carries one.
    pub async fn authenticate<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> Result<AuthOutcome> {
        let credentials = match credentials_from_cookie(request) {
            Some(credentials) => credentials?,
            None => match authorization(request).and_then(decode_basic) {
                Some(basic) => {
                    let (username, token) = basic?;
                    OAuthCredentials {
                        username,
                        token,
                        provider_id: None,
                    }
                }
                None => return Ok(AuthOutcome::Anonymous),
            },
        };

        let username = lookup_name(&credentials.username, self.case_insensitive);
        let provider_id = credentials
            .provider_id
            .as_deref()
            .or(self.default_provider.as_deref())
            .ok_or_else(|| Error::BadCredentials {
                username: username.clone(),
            })?;
        let Some(provider) = self.providers.get(provider_id) else {
            log::debug!("unknown OAuth provider {provider_id:?}");
            return Err(Error::BadCredentials { username });
        };

        self.accounts
            .by_username(&username)
            .await?
            .filter(|account| account.active)
            .ok_or_else(|| Error::UnknownOrInactiveAccount {
                username: username.clone(),
            })?;

        let user_info = provider
            .login(Some(username.as_str()), &credentials.token)
            .await
            .map_err(|error| match error {
                OAuthLoginError::Rejected(reason) => {
                    log::debug!("{provider_id} rejected token of {username}: {reason}");
                    Error::BadCredentials {
                        username: username.clone(),
                    }
                }
                OAuthLoginError::Unavailable(error) => Error::Internal(error),
            })?;

        let auth_request = AuthRequest {
            username: Some(username.clone()),
            email: user_info.email,
            display_name: user_info.display_name,
            ..AuthRequest::for_external(user_info.external_id)
        };
        let result = self
            .accounts
            .authenticate(auth_request)
            .await
            .map_err(|error| account_error(&username, error))?;
        bind_account(session, result.account_id);
        Ok(AuthOutcome::Authenticated(result.account_id))
    }
}

impl Debug for OAuthAuthenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthAuthenticator")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default_provider", &self.default_provider)
            .finish_non_exhaustive()
    }
}

/// The credentials of the first `git-` cookie, if the request carries one.
fn credentials_from_cookie<B>(request: &Request<B>) -> Option<Result<OAuthCredentials>> {
    let cookie = request_cookies(request)
        .find(|cookie| cookie.name().starts_with(GIT_COOKIE_PREFIX))?;
    Some(parse_git_cookie(cookie.name(), cookie.value()))
}

fn parse_git_cookie(name: &str, value: &str) -> Result<OAuthCredentials> {
    let malformed = || Error::BadCredentials {
        username: String::new(),
    };
    let encoded = name.strip_prefix(GIT_COOKIE_PREFIX).ok_or_else(malformed)?;
    let username = urlencoding::decode(encoded).map_err(|_| malformed())?;
    match value.rsplit_once('@') {
        Some((token, provider_id))
            if !username.is_empty() && !token.is_empty() && !provider_id.is_empty() =>
        {
            Ok(OAuthCredentials {
                username: username.into_owned(),
                token: token.to_string(),
                provider_id: Some(provider_id.to_string()),
            })
        }
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_names_user_and_provider() {
        let credentials = parse_git_cookie("git-jane%40example.com", "tok@en@github").unwrap();
        assert_eq!(credentials.username, "jane@example.com");
        assert_eq!(credentials.token, "tok@en");
        assert_eq!(credentials.provider_id.as_deref(), Some("github"));
    }

    #[test]
    fn cookie_without_provider_is_refused() {
        assert!(parse_git_cookie("git-jane", "token").is_err());
        assert!(parse_git_cookie("git-jane", "token@").is_err());
        assert!(parse_git_cookie("git-", "token@github").is_err());
    }
}
