use crate::session::{SessionId, SessionRecord};
use crate::session_store::SessionPersistence;
use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// # in-memory session persistence
/// Because there is no external
/// persistence, this backend is ephemeral and will be cleared
/// on server restart.
///
/// # ***READ THIS BEFORE USING IN A PRODUCTION DEPLOYMENT***
///
/// Keeping the "persistent" copy of sessions in memory brings the following problems:
///
/// 1. All sessions must fit in available memory (important for high load services)
/// 2. Records are removed only by `destroy`, by expiry on lookup, or by the janitor's sweep.
///    If the janitor is not running, abandoned sessions accumulate
/// 3. All sessions will be lost on shutdown, so every user has to sign in again
/// 4. If the service is clustered a particular session will be known to a single instance only.
///    This might be solved by using load balancers with sticky sessions.
///
/// With [`MemoryStore::new_with_logger`] every call is recorded as an [`Operation`],
/// which is what tests use to check the traffic between the session cache and its backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session_map: Mutex<HashMap<SessionId, SessionRecord>>,
    logger: Option<Mutex<Vec<Operation>>>,
    failing: AtomicBool,
}

/// A call made to a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operation {
    UpsertSession { id: SessionId, record: SessionRecord },
    ReadSession { id: SessionId },
    DeleteSession { id: SessionId },
    DeleteSessionsSeenBefore { cutoff: DateTime<Utc> },
}

#[async_trait]
impl SessionPersistence for MemoryStore {
    async fn upsert_session(&self, id: &SessionId, record: &SessionRecord) -> anyhow::Result<()> {
        self.log(Operation::UpsertSession {
            id: id.clone(),
            record: record.clone(),
        });
        self.check_available()?;
        self.session_map.lock().insert(id.clone(), record.clone());
        Ok(())
    }

    async fn read_session(&self, id: &SessionId) -> anyhow::Result<Option<SessionRecord>> {
        self.log(Operation::ReadSession { id: id.clone() });
        self.check_available()?;
        Ok(self.session_map.lock().get(id).cloned())
    }

    async fn delete_session(&self, id: &SessionId) -> anyhow::Result<()> {
        self.log(Operation::DeleteSession { id: id.clone() });
        self.check_available()?;
        self.session_map.lock().remove(id);
        Ok(())
    }

    async fn delete_sessions_seen_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        self.log(Operation::DeleteSessionsSeenBefore { cutoff });
        self.check_available()?;
        let mut session_map = self.session_map.lock();
        let initial_len = session_map.len();
        session_map.retain(|_, record| record.last_seen >= cutoff);
        let deleted = initial_len - session_map.len();
        log::trace!("Deleted {deleted} expired sessions");
        Ok(deleted)
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a new empty memory store that records every call.
    pub fn new_with_logger() -> Self {
        Self {
            logger: Some(Mutex::new(Vec::new())),
            ..Default::default()
        }
    }

    /// The calls recorded so far. Empty unless created with [`MemoryStore::new_with_logger`].
    pub fn operations(&self) -> Vec<Operation> {
        self.logger
            .as_ref()
            .map(|logger| logger.lock().clone())
            .unwrap_or_default()
    }

    /// Forget the calls recorded so far.
    pub fn clear_operations(&self) {
        if let Some(logger) = &self.logger {
            logger.lock().clear();
        }
    }

    /// Make every following call fail as if the backing database were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the stored record for `id`, bypassing the logger.
    pub fn get(&self, id: &SessionId) -> Option<SessionRecord> {
        self.session_map.lock().get(id).cloned()
    }

    /// Returns the number of elements in the memory store.
    pub fn len(&self) -> usize {
        self.session_map.lock().len()
    }

    /// Returns true if the memory store is empty.
    pub fn is_empty(&self) -> bool {
        self.session_map.lock().is_empty()
    }

    fn log(&self, operation: Operation) {
        if let Some(logger) = &self.logger {
            logger.lock().push(operation);
        }
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store is switched to failing");
        }
        Ok(())
    }
}
