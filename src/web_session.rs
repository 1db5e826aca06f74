//! The session of one request.
//!
//! A [`WebSession`] is built from the request's `GerritAccount` cookie, may be changed by an
//! authenticator or a sign-in handler, and finally writes any cookie change into the response.
//!
//! ```
//! # use std::sync::Arc;
//! # use session_gateway::config::{AuthConfig, SessionConfig};
//! # use session_gateway::{AccountId, MemoryStore, PendingResponse, SessionStore, WebSession, CookieSettings};
//! # fn main() -> session_gateway::Result { async_std::task::block_on(async {
//! let store = Arc::new(SessionStore::new(MemoryStore::new(), &SessionConfig::default()));
//! let settings = CookieSettings::from_config(&AuthConfig::default());
//!
//! let request = http::Request::get("/").body(()).unwrap();
//! let mut session = WebSession::from_request(store.clone(), settings, &request, chrono::Utc::now()).await?;
//! assert!(!session.is_signed_in());
//!
//! session.login(AccountId::new(1000), true, None, chrono::Utc::now()).await?;
//! let mut response = PendingResponse::ok();
//! session.apply(&mut response);
//! assert!(response.set_cookies()[0].starts_with("GerritAccount="));
//! # Ok(()) }) }
//! ```

use crate::config::AuthConfig;
use crate::response::PendingResponse;
use crate::session::{AccountId, SessionKey, SessionRecord};
use crate::session_store::{SessionPersistence, SessionStore};
use crate::user::{AccessPath, AccessPaths, CurrentUser};
use crate::Result;
use chrono::{DateTime, Utc};
use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::Request;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Name of the session cookie.
pub const ACCOUNT_COOKIE: &str = "GerritAccount";

/// Attributes of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    /// `Path` attribute.
    pub path: String,
    /// Whether the `Secure` attribute is set.
    pub secure: bool,
}

impl CookieSettings {
    /// Derive the cookie attributes from the authentication settings.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            path: config.cookie_path().to_string(),
            secure: config.cookie_secure(),
        }
    }
}

/// The session state of one request.
pub struct WebSession<P> {
    store: Arc<SessionStore<P>>,
    settings: CookieSettings,
    key: Option<SessionKey>,
    record: Option<SessionRecord>,
    access_paths: AccessPaths,
    access_path: AccessPath,
    pending_cookie: Option<Cookie<'static>>,
}

impl<P: SessionPersistence> WebSession<P> {
    /// Load the session named by the request's `GerritAccount` cookie.
    ///
    /// A session whose cookie is due for a refresh is refreshed, and the cookie is sent again
    /// with the same value and a new `Max-Age`.
    pub async fn from_request<B>(
        store: Arc<SessionStore<P>>,
        settings: CookieSettings,
        request: &Request<B>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut session = Self::anonymous(store, settings);
        let Some(token) = read_account_cookie(request) else {
            return Ok(session);
        };

        let key = SessionKey::from_token(token);
        if let Some(mut record) = session.store.lookup(&key, now).await? {
            if record.needs_cookie_refresh(now) {
                log::debug!("refreshing cookie of session for account {}", record.account_id);
                record = session.store.refresh(&key, &record, now).await;
                let max_age = session.store.cookie_age(&record);
                session.pending_cookie = Some(session.cookie(key.token().to_string(), max_age));
            }
            session.access_paths.set(AccessPath::WebBrowser, true);
            session.key = Some(key);
            session.record = Some(record);
        }
        Ok(session)
    }

    /// A session without a signed-in account.
    pub fn anonymous(store: Arc<SessionStore<P>>, settings: CookieSettings) -> Self {
        Self {
            store,
            settings,
            key: None,
            record: None,
            access_paths: AccessPaths::none(),
            access_path: AccessPath::WebBrowser,
            pending_cookie: None,
        }
    }

    /// Returns true if an account is bound to this session.
    pub fn is_signed_in(&self) -> bool {
        self.record.is_some()
    }

    /// The key of the session, if there is one.
    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// The session record, if there is one.
    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// The bound account, if any.
    pub fn account_id(&self) -> Option<AccountId> {
        self.record.as_ref().map(|record| record.account_id)
    }

    /// The session's XSRF token.
    pub fn xsrf_token(&self) -> Option<&str> {
        self.record.as_ref()?.xsrf_token.as_deref()
    }

    /// Returns true if `token` is the XSRF token of this session.
    pub fn is_valid_xsrf(&self, token: &str) -> bool {
        self.xsrf_token().is_some_and(|expected| expected == token)
    }

    /// The path the request arrived on.
    pub fn access_path(&self) -> AccessPath {
        self.access_path
    }

    /// Record the path the request arrived on.
    pub fn set_access_path(&mut self, path: AccessPath) {
        self.access_path = path;
    }

    /// Returns true if the bound account may act through `path`.
    pub fn is_access_path_ok(&self, path: AccessPath) -> bool {
        self.access_paths.contains(path)
    }

    /// Allow or forbid the bound account to act through `path`.
    pub fn set_access_path_ok(&mut self, path: AccessPath, ok: bool) {
        self.access_paths.set(path, ok);
    }

    /// The user the request acts for.
    ///
    /// An account is only returned if it may act through the request's access path; a browser
    /// cookie alone does not authorize git or REST requests.
    pub fn current_user(&self) -> CurrentUser {
        match &self.record {
            Some(record) if self.access_paths.contains(self.access_path) => {
                CurrentUser::Identified {
                    account_id: record.account_id,
                    access_path: self.access_path,
                }
            }
            _ => CurrentUser::Anonymous,
        }
    }

    /// Sign `account_id` in, replacing any existing session, and send the new cookie.
    pub async fn login(
        &mut self,
        account_id: AccountId,
        remember: bool,
        external_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result {
        if let Some(old) = self.key.take() {
            if let Err(error) = self.store.destroy(&old).await {
                log::warn!("cannot destroy replaced session: {error}");
            }
        }
        self.record = None;

        let (key, record) = self.store.create(account_id, remember, external_id, now).await?;
        let max_age = self.store.cookie_age(&record);
        self.pending_cookie = Some(self.cookie(key.token().to_string(), max_age));
        self.key = Some(key);
        self.record = Some(record);
        self.access_paths = AccessPaths::none();
        self.access_paths.set(AccessPath::WebBrowser, true);
        Ok(())
    }

    /// Act as `account_id` for the rest of this request only.
    ///
    /// The session gets the synthetic key `id:<account>`; nothing is stored and no cookie is sent.
    /// Access paths are reset and must be granted by the caller.
    pub fn set_user_account_id(&mut self, account_id: AccountId) {
        self.key = Some(SessionKey::for_account(account_id));
        self.record = Some(SessionRecord::synthetic(account_id));
        self.access_paths = AccessPaths::none();
        self.pending_cookie = None;
    }

    /// Sign out: delete the stored session and clear the cookie.
    pub async fn logout(&mut self) {
        if let Some(key) = self.key.take() {
            if let Err(error) = self.store.destroy(&key).await {
                log::warn!("cannot destroy session on logout: {error}");
            }
            if !key.is_synthetic() {
                self.pending_cookie = Some(self.cookie(String::new(), 0));
            }
        }
        self.record = None;
        self.access_paths = AccessPaths::none();
    }

    /// Write the pending cookie change, if any, into `response`.
    pub fn apply(&mut self, response: &mut PendingResponse) {
        if let Some(cookie) = self.pending_cookie.take() {
            response.append_header(SET_COOKIE, &cookie.to_string());
        }
    }

    fn cookie(&self, value: String, max_age: i64) -> Cookie<'static> {
        let mut builder = Cookie::build((ACCOUNT_COOKIE, value))
            .path(self.settings.path.clone())
            .http_only(true)
            .secure(self.settings.secure);
        if max_age >= 0 {
            builder = builder.max_age(time::Duration::seconds(max_age));
        }
        builder.build()
    }
}

impl<P> Debug for WebSession<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSession")
            .field("key", &self.key)
            .field("account_id", &self.record.as_ref().map(|record| record.account_id))
            .field("access_paths", &self.access_paths)
            .field("access_path", &self.access_path)
            .finish_non_exhaustive()
    }
}

/// The value of the `GerritAccount` cookie, if the request carries a non-empty one.
pub fn read_account_cookie<B>(request: &Request<B>) -> Option<String> {
    request_cookies(request)
        .find(|cookie| cookie.name() == ACCOUNT_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

/// All cookies sent with the request.
pub(crate) fn request_cookies<B>(request: &Request<B>) -> impl Iterator<Item = Cookie<'_>> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(|cookie| cookie.ok())
}
