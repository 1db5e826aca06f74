//! Authentication asserted by the servlet container or a fronting proxy.

use super::{authorization, bind_account, decode_basic, lookup_name, AuthOutcome};
use crate::account::AccountManager;
use crate::config::AuthConfig;
use crate::session_store::SessionPersistence;
use crate::web_session::WebSession;
use crate::{Error, Result};
use http::header::AUTHORIZATION;
use http::{HeaderName, Request};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Trusts the user name in a configured header.
///
/// If the header is `Authorization`, the user part of Basic credentials is taken and the
/// password is ignored; the proxy in front already checked it.
pub struct ContainerAuthenticator {
    accounts: Arc<dyn AccountManager>,
    header: HeaderName,
    case_insensitive: bool,
}

impl ContainerAuthenticator {
    /// Create an authenticator for `config`.
    /// Without a valid `http_header` the user name is taken from `Authorization`.
    pub fn new(accounts: Arc<dyn AccountManager>, config: &AuthConfig) -> Self {
        let header = match config.http_header.as_deref().map(HeaderName::try_from) {
            Some(Ok(header)) => header,
            Some(Err(error)) => {
                log::warn!("invalid http_header, using Authorization: {error}");
                AUTHORIZATION
            }
            None => AUTHORIZATION,
        };
        Self {
            accounts,
            header,
            case_insensitive: config.user_name_case_insensitive,
        }
    }

    /// Bind the account named by the container.
    ///
    /// Requests the container did not authenticate are refused.
    pub async fn authenticate<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> Result<AuthOutcome> {
        let Some(username) = self.remote_user(request) else {
            return Err(Error::NotAuthorized(
                "Request was not authenticated by the container".to_string(),
            ));
        };
        let username = lookup_name(&username, self.case_insensitive);
        let account = self
            .accounts
            .by_username(&username)
            .await?
            .filter(|account| account.active)
            .ok_or(Error::UnknownOrInactiveAccount { username })?;
        bind_account(session, account.account_id);
        Ok(AuthOutcome::Authenticated(account.account_id))
    }

    fn remote_user<B>(&self, request: &Request<B>) -> Option<String> {
        if self.header == AUTHORIZATION {
            let (username, _) = authorization(request).and_then(decode_basic)?.ok()?;
            return Some(username);
        }
        let value = request.headers().get(&self.header)?.to_str().ok()?.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

impl Debug for ContainerAuthenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerAuthenticator")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
