//! Periodic cleanup of expired sessions.

use crate::config::SessionConfig;
use crate::session_store::{SessionPersistence, SessionStore};
use async_std::task::{self, JoinHandle};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Sweep `store` every `interval` until the returned task is cancelled.
///
/// A failed sweep is logged and retried on the next tick; it only delays eviction.
pub fn spawn_janitor<P>(store: Arc<SessionStore<P>>, interval: Duration) -> JoinHandle<()>
where
    P: SessionPersistence + 'static,
{
    task::spawn(async move {
        loop {
            task::sleep(interval).await;
            match store.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(deleted) => log::info!("deleted {deleted} expired sessions"),
                Err(error) => log::error!("session cleanup failed: {error}"),
            }
        }
    })
}

/// Sweep `store` every `cleanup_interval_secs` of `config`.
pub fn spawn_configured_janitor<P>(
    store: Arc<SessionStore<P>>,
    config: &SessionConfig,
) -> JoinHandle<()>
where
    P: SessionPersistence + 'static,
{
    log::debug!("sweeping sessions every {:?}", config.cleanup_interval());
    spawn_janitor(store, config.cleanup_interval())
}
