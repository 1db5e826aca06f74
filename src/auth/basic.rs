//! HTTP Basic authentication for git and REST API requests.

use super::{
    account_error, authorization, bind_account, decode_basic, lookup_name, secrets_match,
    AuthOutcome,
};
use crate::account::{AccountManager, AuthRequest};
use crate::config::{AuthConfig, GitBasicAuthPolicy};
use crate::session_store::SessionPersistence;
use crate::web_session::WebSession;
use crate::{Error, Result};
use http::Request;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Verifies `Authorization: Basic` credentials according to the configured
/// [`GitBasicAuthPolicy`].
pub struct BasicAuthenticator {
    accounts: Arc<dyn AccountManager>,
    policy: GitBasicAuthPolicy,
    realm: String,
    case_insensitive: bool,
}

impl BasicAuthenticator {
    /// Create an authenticator for `config`.
    pub fn new(accounts: Arc<dyn AccountManager>, config: &AuthConfig) -> Self {
        Self {
            accounts,
            policy: config.git_basic_auth_policy,
            realm: config.realm.clone(),
            case_insensitive: config.user_name_case_insensitive,
        }
    }

    /// The `WWW-Authenticate` challenge.
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    /// Verify the request's Basic credentials, if it carries any.
    pub async fn authenticate<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> Result<AuthOutcome> {
        let Some(credentials) = authorization(request).and_then(decode_basic) else {
            return Ok(AuthOutcome::Anonymous);
        };
        let (username, password) = credentials?;
        let username = lookup_name(&username, self.case_insensitive);

        let account = self
            .accounts
            .by_username(&username)
            .await?
            .filter(|account| account.active)
            .ok_or_else(|| Error::UnknownOrInactiveAccount {
                username: username.clone(),
            })?;

        if self.policy != GitBasicAuthPolicy::Ldap {
            let http_password_matches = account
                .http_password
                .as_deref()
                .is_some_and(|expected| secrets_match(expected, &password));
            if http_password_matches {
                log::debug!("{username} authenticated with the HTTP password");
                bind_account(session, account.account_id);
                return Ok(AuthOutcome::Authenticated(account.account_id));
            }
            if self.policy == GitBasicAuthPolicy::Http {
                return Err(Error::BadCredentials { username });
            }
        }

        let result = self
            .accounts
            .authenticate(AuthRequest::for_user(&username).with_password(password))
            .await
            .map_err(|error| account_error(&username, error))?;
        log::debug!("{username} authenticated by the account manager");
        bind_account(session, result.account_id);
        Ok(AuthOutcome::Authenticated(result.account_id))
    }
}

impl Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("policy", &self.policy)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}
