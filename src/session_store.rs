//! The session cache and its persistent backend.
//!
//! Records are looked up by the blake3 hash of the cookie value ([`SessionId`]), never by the value itself.

use crate::config::SessionConfig;
use crate::session::{AccountId, SessionId, SessionKey, SessionRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use key_generator::{DefaultSessionKeyGenerator, SessionKeyGenerator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

pub mod key_generator;

/// How long a cached record may go without being written back with a fresh `last_seen`.
/// Independent of the cookie refresh point.
pub const CACHE_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// The session store.
///
/// This is the user-facing interface of the session store.
/// It keeps a bounded in-memory cache of session records in front of a [`SessionPersistence`]
/// implementation, which lets sessions survive a restart.
/// The cache is authoritative for the running process; the persistent store is written through
/// and consulted on cache misses.
pub struct SessionStore<P> {
    persistence: P,
    cache: Mutex<SessionCache>,
    key_generator: Box<dyn SessionKeyGenerator>,
    max_age: Duration,
    cache_refresh_interval: Duration,
}

struct SessionCache {
    entries: HashMap<SessionId, SessionRecord>,
    capacity: usize,
    /// Bumped by every `destroy`, so a lookup that raced with it does not re-insert the session.
    destroy_epoch: u64,
}

impl<P: SessionPersistence> SessionStore<P> {
    /// Create a new session store with the given persistence backend.
    pub fn new(persistence: P, config: &SessionConfig) -> Self {
        let max_age =
            Duration::from_std(config.max_age()).unwrap_or_else(|_| Duration::weeks(5200));
        Self {
            persistence,
            cache: Mutex::new(SessionCache {
                entries: HashMap::new(),
                capacity: config.max_cached_sessions.max(1),
                destroy_epoch: 0,
            }),
            key_generator: Box::new(DefaultSessionKeyGenerator),
            max_age,
            cache_refresh_interval: Duration::seconds(CACHE_REFRESH_INTERVAL.as_secs() as i64),
        }
    }

    /// Replace the generator of session keys, session ids and XSRF tokens.
    pub fn with_key_generator(mut self, key_generator: impl SessionKeyGenerator + 'static) -> Self {
        self.key_generator = Box::new(key_generator);
        self
    }

    /// The time-to-live of a session since it was last seen.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// The persistence backend.
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Number of sessions currently cached in memory.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().entries.len()
    }

    /// Get the record of the session identified by `key`.
    ///
    /// The return value is `Ok(Some(_))` if there is a session for the key that is not expired.
    /// Expired sessions are deleted from the cache and the persistent store on the way.
    /// Synthetic `id:<account>` keys are never stored and always yield `Ok(None)`.
    pub async fn lookup(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        if key.is_synthetic() {
            return Ok(None);
        }
        let id = key.session_id();

        let (cached, epoch) = {
            let cache = self.cache.lock();
            (cache.entries.get(&id).cloned(), cache.destroy_epoch)
        };
        let (mut record, from_cache) = match cached {
            Some(record) => (record, true),
            None => match self.persistence.read_session(&id).await? {
                Some(record) => {
                    log::debug!("session {id:?} loaded from the persistent store");
                    (record, false)
                }
                None => return Ok(None),
            },
        };

        if record.is_expired(now, self.max_age) {
            log::debug!("session {id:?} expired");
            self.cache.lock().entries.remove(&id);
            if let Err(error) = self.persistence.delete_session(&id).await {
                log::warn!("cannot delete expired session {id:?}: {error:#}");
            }
            return Ok(None);
        }

        let needs_cache_refresh = now - record.last_seen > self.cache_refresh_interval;
        if needs_cache_refresh {
            record.mark_seen(now, self.max_age);
        }
        if needs_cache_refresh || !from_cache {
            let inserted = {
                let mut cache = self.cache.lock();
                if cache.destroy_epoch == epoch || cache.entries.contains_key(&id) {
                    cache.insert(id.clone(), record.clone(), now, self.max_age);
                    true
                } else {
                    false
                }
            };
            if !inserted {
                // Some session was destroyed while this one was read; check it was not this one.
                let still_stored = self.persistence.read_session(&id).await?.is_some();
                return Ok(still_stored.then_some(record));
            }
            if needs_cache_refresh {
                self.write_back(&id, &record).await;
                self.forget_if_destroyed(&id, epoch).await;
            }
        }

        Ok(Some(record))
    }

    /// Create a new session for `account_id`.
    ///
    /// A fresh random key, session id and XSRF token are generated.
    /// The record is written to the persistent store before it is cached; if that fails, no session is created.
    pub async fn create(
        &self,
        account_id: AccountId,
        remember: bool,
        external_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(SessionKey, SessionRecord)> {
        let key = self.key_generator.generate_key(account_id);
        let record = SessionRecord::new(
            account_id,
            now,
            self.max_age,
            remember,
            external_id,
            Some(self.key_generator.generate_token(account_id)),
            Some(self.key_generator.generate_token(account_id)),
        );
        let id = key.session_id();
        self.persistence.upsert_session(&id, &record).await?;
        self.cache
            .lock()
            .insert(id, record.clone(), now, self.max_age);
        log::debug!("created session for account {account_id}");
        Ok((key, record))
    }

    /// Restart the timers of a session whose cookie is due for a refresh.
    ///
    /// Account, persistence flag, external id, session id and XSRF token are kept, and so is the key:
    /// requests that are in flight with the current cookie stay valid.
    /// A failing write to the persistent store is logged; the cached record is used regardless.
    ///
    /// A session destroyed since `old` was looked up stays destroyed: the renewed record is
    /// returned but neither cached nor written.
    pub async fn refresh(
        &self,
        key: &SessionKey,
        old: &SessionRecord,
        now: DateTime<Utc>,
    ) -> SessionRecord {
        let mut record = old.clone();
        record.renew(now, self.max_age);
        if key.is_synthetic() {
            return record;
        }

        let id = key.session_id();
        let cached_epoch = {
            let mut cache = self.cache.lock();
            match cache.entries.get(&id) {
                Some(current) => {
                    // Another request may have refreshed first; never let the XSRF token diverge.
                    record.xsrf_token = current.xsrf_token.clone();
                    let epoch = cache.destroy_epoch;
                    cache.insert(id.clone(), record.clone(), now, self.max_age);
                    Some(epoch)
                }
                None => None,
            }
        };
        let epoch = match cached_epoch {
            Some(epoch) => epoch,
            None => match self.reinsert_stored(&id, &mut record, now).await {
                Some(epoch) => epoch,
                None => return record,
            },
        };

        self.write_back(&id, &record).await;
        self.forget_if_destroyed(&id, epoch).await;
        record
    }

    /// Delete the session identified by `key` from the cache and the persistent store.
    /// Deleting a session that does not exist is not an error.
    pub async fn destroy(&self, key: &SessionKey) -> Result {
        if key.is_synthetic() {
            return Ok(());
        }
        let id = key.session_id();
        {
            let mut cache = self.cache.lock();
            cache.entries.remove(&id);
            cache.destroy_epoch += 1;
        }
        self.persistence.delete_session(&id).await?;
        Ok(())
    }

    /// The `Max-Age` of the cookie for `record`, in seconds.
    ///
    /// Remembered sessions live as long as the store's time-to-live; all others get `-1`,
    /// i.e. a cookie that is dropped when the browser closes.
    pub fn cookie_age(&self, record: &SessionRecord) -> i64 {
        if record.persistent {
            self.max_age.num_seconds()
        } else {
            -1
        }
    }

    /// Drop expired sessions from the cache and from the persistent store.
    ///
    /// Returns the number of sessions deleted from the persistent store.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let evicted = {
            let mut cache = self.cache.lock();
            let before = cache.entries.len();
            let max_age = self.max_age;
            cache.entries.retain(|_, record| !record.is_expired(now, max_age));
            before - cache.entries.len()
        };
        if evicted > 0 {
            log::debug!("evicted {evicted} expired sessions from the cache");
        }
        let deleted = self
            .persistence
            .delete_sessions_seen_before(now - self.max_age)
            .await?;
        Ok(deleted)
    }

    /// Cache `record` again after it fell out of the cache, unless it was destroyed.
    ///
    /// Returns the destroy epoch the insert happened under.
    async fn reinsert_stored(
        &self,
        id: &SessionId,
        record: &mut SessionRecord,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let epoch = self.cache.lock().destroy_epoch;
        match self.persistence.read_session(id).await {
            Ok(Some(stored)) => record.xsrf_token = stored.xsrf_token,
            Ok(None) => {
                log::debug!("session {id:?} was destroyed before its refresh");
                return None;
            }
            Err(error) => {
                log::warn!("cannot read session {id:?} for a refresh: {error:#}");
                return None;
            }
        }

        let mut cache = self.cache.lock();
        if cache.destroy_epoch != epoch && !cache.entries.contains_key(id) {
            log::debug!("session {id:?} was destroyed during its refresh");
            return None;
        }
        cache.insert(id.clone(), record.clone(), now, self.max_age);
        Some(epoch)
    }

    /// Undo a write-back that raced with `destroy`.
    async fn forget_if_destroyed(&self, id: &SessionId, epoch: u64) {
        let destroyed = {
            let cache = self.cache.lock();
            cache.destroy_epoch != epoch && !cache.entries.contains_key(id)
        };
        if destroyed {
            if let Err(error) = self.persistence.delete_session(id).await {
                log::warn!("cannot delete destroyed session {id:?}: {error:#}");
            }
        }
    }

    async fn write_back(&self, id: &SessionId, record: &SessionRecord) {
        if let Err(error) = self.persistence.upsert_session(id, record).await {
            log::warn!("cannot write session {id:?} to the persistent store: {error:#}");
        }
    }
}

impl SessionCache {
    fn insert(
        &mut self,
        id: SessionId,
        record: SessionRecord,
        now: DateTime<Utc>,
        max_age: Duration,
    ) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&id) {
            self.entries.retain(|_, record| !record.is_expired(now, max_age));
            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, record)| record.last_seen)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(id, record);
    }
}

impl<P: Debug> Debug for SessionStore<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("persistence", &self.persistence)
            .field("cached", &self.cache.lock().entries.len())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// This is the backend-facing interface of the session store.
/// It defines simple [CRUD]-methods on session records.
///
/// The session id is the primary key. Writes are upserts, so writing the same record twice is harmless.
/// Within one process a read must observe earlier writes.
///
/// [CRUD]: https://en.wikipedia.org/wiki/Create,_read,_update_and_delete
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Insert or replace the record stored under `id`.
    async fn upsert_session(&self, id: &SessionId, record: &SessionRecord) -> anyhow::Result<()>;

    /// Read the record stored under `id`.
    async fn read_session(&self, id: &SessionId) -> anyhow::Result<Option<SessionRecord>>;

    /// Delete the record stored under `id`, if any.
    async fn delete_session(&self, id: &SessionId) -> anyhow::Result<()>;

    /// Delete all records last seen before `cutoff`, returning how many were deleted.
    async fn delete_sessions_seen_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;
}
