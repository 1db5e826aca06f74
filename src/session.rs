use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Prefix of synthetic session keys that bind a request to an account without a stored session.
const SYNTHETIC_KEY_PREFIX: &str = "id:";

/// Numeric identity of an account.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u32);

impl AccountId {
    /// Wrap a raw account number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw account number.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// The token a browser presents in its session cookie.
///
/// Keys minted at sign-in are random (see [`crate::session_store::key_generator`]).
/// Keys created with [`SessionKey::for_account`] have the shape `id:<account>`; they mark a
/// request as acting for an account and are never stored or found by a lookup.
/// Keys compare by exact string equality.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap a token received from a client.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The synthetic key `id:<account_id>`.
    pub fn for_account(account_id: AccountId) -> Self {
        Self(format!("{SYNTHETIC_KEY_PREFIX}{account_id}"))
    }

    /// The token as sent in the cookie.
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Returns true for `id:<account>` keys.
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_KEY_PREFIX)
    }

    /// The identifier the persistent store files this session under.
    pub fn session_id(&self) -> SessionId {
        SessionId::from_cookie_value(&self.0)
    }
}

impl Debug for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Random keys are credentials.
        if self.is_synthetic() {
            write!(f, "SessionKey({:?})", self.0)
        } else {
            write!(f, "SessionKey(..)")
        }
    }
}

/// The type of a session id.
pub type SessionIdType = [u8; blake3::OUT_LEN];

/// Storage identifier of a session.
///
/// The persistent store keys sessions by a hash of the cookie value instead of the value itself,
/// so a leaked store does not hand out working cookies.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(Box<SessionIdType>);

impl SessionId {
    /// Applies a cryptographic hash function on a cookie value to obtain the session id for that cookie.
    pub fn from_cookie_value(cookie_value: &str) -> Self {
        let hash = blake3::hash(cookie_value.as_bytes());
        Self(Box::new(hash.into()))
    }
}

impl From<SessionId> for SessionIdType {
    fn from(id: SessionId) -> Self {
        *id.0
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", hex::encode(&self.0[..8]))
    }
}

/// Server-side state of a signed-in browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The signed-in account.
    pub account_id: AccountId,
    /// When the session was created or last refreshed.
    pub last_seen: DateTime<Utc>,
    /// Once this point is passed, the cookie is issued again on the next request.
    pub refresh_cookie_at: DateTime<Utc>,
    /// The session is gone after this point.
    pub expires_at: DateTime<Utc>,
    /// The user asked to be remembered, so the cookie outlives the browser session.
    pub persistent: bool,
    /// The external identity used for the last sign-in, e.g. `username:jdoe`.
    pub external_id: Option<String>,
    /// Opaque identifier of the session that is safe to log.
    pub session_id: Option<String>,
    /// Token that must accompany state-changing requests.
    /// Assigned once; refreshes keep it.
    pub xsrf_token: Option<String>,
}

impl SessionRecord {
    /// A record for a session seen at `now` with the given time-to-live.
    pub fn new(
        account_id: AccountId,
        now: DateTime<Utc>,
        ttl: Duration,
        persistent: bool,
        external_id: Option<String>,
        session_id: Option<String>,
        xsrf_token: Option<String>,
    ) -> Self {
        let mut record = Self {
            account_id,
            last_seen: now,
            refresh_cookie_at: now,
            expires_at: now,
            persistent,
            external_id,
            session_id,
            xsrf_token,
        };
        record.renew(now, ttl);
        record
    }

    /// The in-memory record behind a synthetic `id:<account>` key.
    pub fn synthetic(account_id: AccountId) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            account_id,
            last_seen: epoch,
            refresh_cookie_at: epoch,
            expires_at: DateTime::<Utc>::MAX_UTC,
            persistent: false,
            external_id: None,
            session_id: None,
            xsrf_token: None,
        }
    }

    /// Restart the record's timers at `now`, as done when the cookie is issued.
    ///
    /// The cookie is refreshed after half the time-to-live, but at least once per hour.
    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.mark_seen(now, ttl);
        self.refresh_cookie_at = now + std::cmp::min(ttl / 2, Duration::hours(1));
    }

    /// Slide the expiry without touching the cookie refresh point.
    pub fn mark_seen(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_seen = now;
        self.expires_at = now + ttl;
    }

    /// Returns true if the cookie should be issued again.
    pub fn needs_cookie_refresh(&self, now: DateTime<Utc>) -> bool {
        self.refresh_cookie_at <= now
    }

    /// Returns true if the record has not been seen for longer than `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_seen > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_point_is_half_ttl_capped_at_one_hour() {
        let now = Utc::now();
        let short = SessionRecord::new(
            AccountId::new(1),
            now,
            Duration::minutes(30),
            false,
            None,
            None,
            None,
        );
        assert_eq!(short.refresh_cookie_at, now + Duration::minutes(15));
        assert_eq!(short.expires_at, now + Duration::minutes(30));

        let long = SessionRecord::new(
            AccountId::new(1),
            now,
            Duration::hours(12),
            true,
            None,
            None,
            None,
        );
        assert_eq!(long.refresh_cookie_at, now + Duration::hours(1));
        assert!(!long.needs_cookie_refresh(now));
        assert!(long.needs_cookie_refresh(now + Duration::hours(1)));
    }

    #[test]
    fn expiry_is_measured_from_last_seen() {
        let now = Utc::now();
        let ttl = Duration::hours(12);
        let mut record = SessionRecord::new(AccountId::new(1), now, ttl, false, None, None, None);
        assert!(!record.is_expired(now + Duration::hours(11), ttl));
        assert!(record.is_expired(now + Duration::hours(13), ttl));
        record.mark_seen(now + Duration::hours(11), ttl);
        assert!(!record.is_expired(now + Duration::hours(13), ttl));
        assert_eq!(record.refresh_cookie_at, now + Duration::hours(1));
    }

    #[test]
    fn synthetic_keys() {
        let key = SessionKey::for_account(AccountId::new(1000));
        assert_eq!(key.token(), "id:1000");
        assert!(key.is_synthetic());
        assert!(!SessionKey::from_token("AbC-.").is_synthetic());
        assert_eq!(format!("{:?}", SessionKey::from_token("secret")), "SessionKey(..)");
    }

    #[test]
    fn session_id_hashes_the_token() {
        let key = SessionKey::from_token("abc");
        assert_eq!(key.session_id(), SessionId::from_cookie_value("abc"));
        assert_ne!(key.session_id(), SessionId::from_cookie_value("abd"));
    }
}
