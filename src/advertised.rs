//! Objects advertised to a pushing client, kept across the two requests of a smart-HTTP push.
//!
//! Over HTTP a push is a `GET info/refs` followed by a separate `POST git-receive-pack`.
//! The objects advertised by the GET are remembered for a short time so that the POST can
//! treat them as advertised, even if the refs moved in between.

use crate::session::AccountId;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// A git object id (SHA-1).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Wrap raw id bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).with_context(|| format!("invalid object id {s:?}"))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| anyhow!("object id {s:?} is not 40 hex digits"))?;
        Ok(Self(bytes))
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// Identifies the push negotiation of one account on one project.
///
/// Hashing only looks at the account, equality at both fields, so all projects an account
/// pushes to share a bucket.
#[derive(Debug, Clone, Eq)]
pub struct AdvertisedObjectsCacheKey {
    /// The pushing account.
    pub account_id: AccountId,
    /// The project pushed to.
    pub project: String,
}

impl AdvertisedObjectsCacheKey {
    /// Create a key.
    pub fn new(account_id: AccountId, project: impl Into<String>) -> Self {
        Self {
            account_id,
            project: project.into(),
        }
    }
}

impl PartialEq for AdvertisedObjectsCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id && self.project == other.project
    }
}

impl Hash for AdvertisedObjectsCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.account_id.hash(state);
    }
}

#[derive(Debug)]
struct Entry {
    objects: Arc<HashSet<ObjectId>>,
    stored_at: DateTime<Utc>,
}

/// Short-lived map from push negotiations to the objects advertised in them.
///
/// Entries expire a fixed time after they were stored. When the cache is full, expired entries
/// are dropped first, then the oldest one.
#[derive(Debug)]
pub struct AdvertisedObjectsCache {
    entries: Mutex<HashMap<AdvertisedObjectsCacheKey, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl AdvertisedObjectsCache {
    /// Create an empty cache.
    pub fn new(ttl: std::time::Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(10)),
            max_entries: max_entries.max(1),
        }
    }

    /// Remember `objects` for `key`, replacing any previous entry.
    pub fn put(
        &self,
        key: AdvertisedObjectsCacheKey,
        objects: HashSet<ObjectId>,
        now: DateTime<Utc>,
    ) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, entry| now - entry.stored_at <= ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                objects: Arc::new(objects),
                stored_at: now,
            },
        );
    }

    /// The objects remembered for `key`, if they have not expired.
    pub fn get_if_present(
        &self,
        key: &AdvertisedObjectsCacheKey,
        now: DateTime<Utc>,
    ) -> Option<Arc<HashSet<ObjectId>>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| now - entry.stored_at <= self.ttl)
            .map(|entry| entry.objects.clone())
    }

    /// Forget `key`.
    pub fn invalidate(&self, key: &AdvertisedObjectsCacheKey) {
        self.entries.lock().remove(key);
    }

    /// Remove and return the objects remembered for `key`.
    ///
    /// Of several concurrent callers at most one gets the entry.
    pub fn take(
        &self,
        key: &AdvertisedObjectsCacheKey,
        now: DateTime<Utc>,
    ) -> Option<Arc<HashSet<ObjectId>>> {
        let entry = self.entries.lock().remove(key)?;
        (now - entry.stored_at <= self.ttl).then_some(entry.objects)
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
