//! Authentication of requests routed through the authentication filter.
//!
//! Exactly one [`Authenticator`] is selected from the configuration at startup.
//! Each strategy resolves the request's credentials to an account and binds it to the request's
//! [`WebSession`] with the synthetic `id:<account>` key, allowing the git and REST API access paths.

use crate::account::{AccountError, AccountManager};
use crate::config::AuthConfig;
use crate::response::PendingResponse;
use crate::session::AccountId;
use crate::session_store::SessionPersistence;
use crate::token_signer::TokenSigner;
use crate::user::AccessPath;
use crate::web_session::WebSession;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{Request, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub mod basic;
pub mod container;
pub mod digest;
pub mod oauth;

pub use basic::BasicAuthenticator;
pub use container::ContainerAuthenticator;
pub use digest::DigestAuthenticator;
pub use oauth::{OAuthAuthenticator, OAuthLoginProvider, OAuthProviders};

/// Prefix of REST API paths that require authentication.
pub const AUTHENTICATED_PREFIX: &str = "/a/";

/// Git LFS batch requests, which are authenticated like git requests.
pub const LFS_URL_WO_AUTH_REGEX: &str = r"^(?:/(?:a/)?)(?:p/)?(.+)(?:/info/lfs/objects/batch)$";

static LFS_URL: Lazy<Regex> = Lazy::new(|| Regex::new(LFS_URL_WO_AUTH_REGEX).expect("valid regex"));

/// Returns true if a request for `path` is routed through the authentication filter:
/// git smart-HTTP, LFS batch requests and everything under `/a/`.
pub fn is_filtered_path(path: &str) -> bool {
    path.starts_with(AUTHENTICATED_PREFIX)
        || crate::gateway::GitRoute::matches(path)
        || LFS_URL.is_match(path)
}

/// Address of the connected client, inserted into the request's extensions by the server.
///
/// Digest nonces are bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub IpAddr);

/// The client address as text, or an empty string if the server did not record it.
pub(crate) fn remote_addr<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<RemoteAddr>()
        .map(|addr| addr.0.to_string())
        .unwrap_or_default()
}

/// Result of running an authenticator over a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The request carries no credentials of the configured kind.
    Anonymous,
    /// The credentials verified and the account was bound to the session.
    Authenticated(AccountId),
}

/// The authentication strategy used for git and REST API requests.
#[derive(Debug)]
pub enum Authenticator {
    /// HTTP Basic, verified by the account manager or the HTTP password.
    Basic(BasicAuthenticator),
    /// HTTP Digest with signed nonces.
    Digest(DigestAuthenticator),
    /// OAuth tokens in `git-` cookies or Basic credentials.
    OAuth(OAuthAuthenticator),
    /// Identity asserted by the container or a fronting proxy.
    Container(ContainerAuthenticator),
}

impl Authenticator {
    /// Select the strategy for `config`.
    ///
    /// Container trust wins; otherwise git Basic authentication selects OAuth for OAuth sites and
    /// Basic elsewhere; without it Digest is used.
    /// Fails if the OAuth provider named in the configuration is not installed.
    pub fn from_config(
        config: &AuthConfig,
        accounts: Arc<dyn AccountManager>,
        signer: Arc<dyn TokenSigner>,
        oauth_providers: OAuthProviders,
    ) -> Result<Self> {
        use crate::config::AuthType;

        let authenticator = if config.trust_container_auth {
            Self::Container(ContainerAuthenticator::new(accounts, config))
        } else if config.git_basic_auth {
            if config.auth_type == AuthType::OAuth {
                Self::OAuth(OAuthAuthenticator::new(accounts, oauth_providers, config)?)
            } else {
                Self::Basic(BasicAuthenticator::new(accounts, config))
            }
        } else {
            Self::Digest(DigestAuthenticator::new(accounts, signer, config))
        };
        log::info!("git and REST API requests use {} authentication", authenticator.name());
        Ok(authenticator)
    }

    /// Short name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::Digest(_) => "digest",
            Self::OAuth(_) => "oauth",
            Self::Container(_) => "container",
        }
    }

    /// Resolve the request's credentials and bind the account to `session`.
    pub async fn authenticate<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> Result<AuthOutcome> {
        match self {
            Self::Basic(basic) => basic.authenticate(request, session).await,
            Self::Digest(digest) => digest.authenticate(request, session).await,
            Self::OAuth(oauth) => oauth.authenticate(request, session).await,
            Self::Container(container) => container.authenticate(request, session).await,
        }
    }

    /// Authenticate a request routed through the filter.
    ///
    /// Anonymous requests under `/a/` without a signed-in browser session are refused.
    /// On refusal the returned response already carries the strategy's challenge.
    pub async fn filter<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> std::result::Result<AuthOutcome, PendingResponse> {
        match self.authenticate(request, session).await {
            Ok(AuthOutcome::Anonymous)
                if request.uri().path().starts_with(AUTHENTICATED_PREFIX)
                    && !session.is_signed_in() =>
            {
                Err(self.reject(request, Error::AuthenticationRequired))
            }
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                log::debug!("{} authentication failed: {error}", self.name());
                Err(self.reject(request, error))
            }
        }
    }

    /// The response for a failed authentication.
    pub fn reject<B>(&self, request: &Request<B>, error: Error) -> PendingResponse {
        let stale = matches!(error, Error::StaleNonce);
        let mut response = error.into_response();
        if response.status() == StatusCode::UNAUTHORIZED {
            self.add_challenge(request, &mut response, stale);
        }
        response
    }

    /// Add the strategy's challenge to a pending `401` that does not carry one yet.
    ///
    /// Call this once, right before the response is flushed.
    pub fn finish<B>(&self, request: &Request<B>, response: &mut PendingResponse) {
        if response.status() == StatusCode::UNAUTHORIZED && response.www_authenticate().is_none() {
            self.add_challenge(request, response, false);
        }
    }

    fn add_challenge<B>(&self, request: &Request<B>, response: &mut PendingResponse, stale: bool) {
        let challenge = match self {
            Self::Basic(basic) => Ok(Some(basic.challenge())),
            Self::OAuth(oauth) => Ok(Some(oauth.challenge())),
            Self::Digest(digest) => digest
                .challenge(request, stale)
                .map(|challenge| Some(challenge.to_string())),
            Self::Container(_) => Ok(None),
        };
        match challenge {
            Ok(Some(challenge)) => response.insert_header(WWW_AUTHENTICATE, &challenge),
            Ok(None) => {}
            Err(error) => *response = error.into_response(),
        }
    }
}

/// The `Authorization` header, if present and valid text.
pub(crate) fn authorization<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// Decode the credentials of a `Basic` authorization header value.
///
/// Returns `None` if the value is not a Basic header at all.
pub(crate) fn decode_basic(value: &str) -> Option<Result<(String, String)>> {
    let encoded = value.strip_prefix("Basic ")?;
    let bad = || Error::BadCredentials {
        username: String::new(),
    };
    let decoded = match STANDARD.decode(encoded.trim()) {
        Ok(decoded) => decoded,
        Err(_) => return Some(Err(bad())),
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Some(Err(bad()));
    };
    Some(match decoded.split_once(':') {
        Some((username, password)) if !username.is_empty() => {
            Ok((username.to_string(), password.to_string()))
        }
        _ => Err(bad()),
    })
}

/// The user name used for account lookups.
pub(crate) fn lookup_name(username: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        username.to_lowercase()
    } else {
        username.to_string()
    }
}

/// Compare secrets without leaking the position of the first difference.
pub(crate) fn secrets_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Bind `account_id` to the request and allow the git and REST API access paths.
pub(crate) fn bind_account<P: SessionPersistence>(
    session: &mut WebSession<P>,
    account_id: AccountId,
) {
    session.set_user_account_id(account_id);
    session.set_access_path_ok(AccessPath::Git, true);
    session.set_access_path_ok(AccessPath::RestApi, true);
}

/// Map a refusal of the account manager to the request's error.
pub(crate) fn account_error(username: &str, error: AccountError) -> Error {
    match error {
        AccountError::NoSuchUser(_) => Error::UnknownOrInactiveAccount {
            username: username.to_string(),
        },
        AccountError::AuthenticationFailed(_) => Error::BadCredentials {
            username: username.to_string(),
        },
        AccountError::Unavailable(error) => Error::Internal(error),
    }
}
