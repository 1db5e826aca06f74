mod common;

use chrono::Duration;
use common::{session_store, t0, USER};
use session_gateway::config::SessionConfig;
use session_gateway::session_store::key_generator::DebugSessionKeyGenerator;
use session_gateway::{
    Error, MemoryStore, Operation, SessionKey, SessionPersistence, SessionRecord, SessionStore,
};
use std::collections::HashSet;
use std::sync::Arc;

/// A new session is written to the persistent store once and served from the cache afterwards.
#[async_std::test]
async fn test_create_session() {
    let store = session_store();
    let (key, record) = store
        .create(USER, true, Some("username:user".to_string()), t0())
        .await
        .unwrap();

    assert_eq!(key.token(), DebugSessionKeyGenerator::token_at(USER, 0));
    assert_eq!(
        record.session_id.as_deref(),
        Some(DebugSessionKeyGenerator::token_at(USER, 1).as_str())
    );
    assert_eq!(
        record.xsrf_token.as_deref(),
        Some(DebugSessionKeyGenerator::token_at(USER, 2).as_str())
    );
    assert_eq!(record.refresh_cookie_at, t0() + Duration::hours(1));
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::UpsertSession {
            id: key.session_id(),
            record: record.clone(),
        }]
    );
    assert_eq!(store.cached_len(), 1);
    assert_eq!(store.cookie_age(&record), 12 * 60 * 60);
}

/// Sessions that are not remembered get a browser-session cookie.
#[async_std::test]
async fn test_cookie_age_of_session_cookie() {
    let store = session_store();
    let (_, record) = store.create(USER, false, None, t0()).await.unwrap();
    assert_eq!(store.cookie_age(&record), -1);
}

/// A cached session is found without touching the persistent store.
#[async_std::test]
async fn test_lookup_hits_cache() {
    let store = session_store();
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();
    store.persistence().clear_operations();

    let found = store.lookup(&key, t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(found, Some(record));
    assert_eq!(store.persistence().operations(), vec![]);
}

/// Once the cache refresh interval has passed, `last_seen` is written back,
/// but the cookie refresh point stays where it was.
#[async_std::test]
async fn test_lookup_writes_back_last_seen() {
    let store = session_store();
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();
    store.persistence().clear_operations();

    let now = t0() + Duration::minutes(6);
    let found = store.lookup(&key, now).await.unwrap().unwrap();
    assert_eq!(found.last_seen, now);
    assert_eq!(found.expires_at, now + Duration::hours(12));
    assert_eq!(found.refresh_cookie_at, record.refresh_cookie_at);
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::UpsertSession {
            id: key.session_id(),
            record: found,
        }]
    );
}

/// Sessions survive a restart: a cache miss falls through to the persistent store.
#[async_std::test]
async fn test_lookup_reads_persistent_store() {
    let store = session_store();
    let key = SessionKey::from_token(DebugSessionKeyGenerator::token_at(USER, 42));
    let record = SessionRecord::new(
        USER,
        t0(),
        store.max_age(),
        true,
        None,
        None,
        Some("xsrf".to_string()),
    );
    store
        .persistence()
        .upsert_session(&key.session_id(), &record)
        .await
        .unwrap();
    store.persistence().clear_operations();

    let found = store.lookup(&key, t0()).await.unwrap();
    assert_eq!(found, Some(record));
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::ReadSession { id: key.session_id() }]
    );
    assert_eq!(store.cached_len(), 1);
}

/// Expired sessions are deleted on lookup.
#[async_std::test]
async fn test_expired_session_is_deleted() {
    let store = session_store();
    let (key, _) = store.create(USER, true, None, t0()).await.unwrap();
    store.persistence().clear_operations();

    let found = store.lookup(&key, t0() + Duration::hours(13)).await.unwrap();
    assert_eq!(found, None);
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::DeleteSession { id: key.session_id() }]
    );
    assert!(store.persistence().is_empty());
    assert_eq!(store.cached_len(), 0);
}

/// Synthetic keys never reach the persistent store.
#[async_std::test]
async fn test_synthetic_key_is_never_stored() {
    let store = session_store();
    let key = SessionKey::for_account(USER);
    assert_eq!(store.lookup(&key, t0()).await.unwrap(), None);
    store.destroy(&key).await.unwrap();
    assert_eq!(store.persistence().operations(), vec![]);
}

/// Refreshing twice keeps account, XSRF token and session id.
#[async_std::test]
async fn test_refresh_is_idempotent() {
    let store = session_store();
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();

    let now = t0() + Duration::hours(1);
    let first = store.refresh(&key, &record, now).await;
    let second = store.refresh(&key, &first, now).await;

    for refreshed in [&first, &second] {
        assert_eq!(refreshed.account_id, USER);
        assert_eq!(refreshed.xsrf_token, record.xsrf_token);
        assert_eq!(refreshed.session_id, record.session_id);
        assert_eq!(refreshed.refresh_cookie_at, now + Duration::hours(1));
    }
    assert_eq!(store.lookup(&key, now).await.unwrap(), Some(second));
}

/// A failing write-back during refresh is not fatal; the cache keeps serving the session.
#[async_std::test]
async fn test_refresh_survives_persistence_failure() {
    let store = session_store();
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();
    store.persistence().set_failing(true);

    let now = t0() + Duration::hours(1);
    let refreshed = store.refresh(&key, &record, now).await;
    assert_eq!(refreshed.last_seen, now);
    assert_eq!(store.lookup(&key, now).await.unwrap(), Some(refreshed));
}

/// Without a persistent copy no session is handed out.
#[async_std::test]
async fn test_create_fails_with_persistence() {
    let store = session_store();
    store.persistence().set_failing(true);
    let result = store.create(USER, true, None, t0()).await;
    assert!(matches!(result, Err(Error::Internal(_))));
    assert_eq!(store.cached_len(), 0);
}

/// Destroying is idempotent.
#[async_std::test]
async fn test_destroy_session() {
    let store = session_store();
    let (key, _) = store.create(USER, true, None, t0()).await.unwrap();

    store.destroy(&key).await.unwrap();
    store.destroy(&key).await.unwrap();
    assert_eq!(store.lookup(&key, t0()).await.unwrap(), None);
    assert!(store.persistence().is_empty());
}

/// The cache is bounded; evicted sessions are still found in the persistent store.
#[async_std::test]
async fn test_cache_is_bounded() {
    let config = SessionConfig {
        max_cached_sessions: 2,
        ..SessionConfig::default()
    };
    let store = SessionStore::new(MemoryStore::new_with_logger(), &config);
    let mut keys = Vec::new();
    for minute in 0..3 {
        let (key, _) = store
            .create(USER, true, None, t0() + Duration::minutes(minute))
            .await
            .unwrap();
        keys.push(key);
    }
    assert_eq!(store.cached_len(), 2);
    assert_eq!(store.persistence().len(), 3);

    store.persistence().clear_operations();
    assert!(store.lookup(&keys[0], t0() + Duration::minutes(3)).await.unwrap().is_some());
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::ReadSession {
            id: keys[0].session_id()
        }]
    );
}

/// The sweep deletes everything not seen within the time-to-live.
#[async_std::test]
async fn test_sweep() {
    let store = session_store();
    let (old, _) = store.create(USER, true, None, t0()).await.unwrap();
    let (recent, _) = store
        .create(USER, true, None, t0() + Duration::hours(10))
        .await
        .unwrap();
    store.persistence().clear_operations();

    let now = t0() + Duration::hours(13);
    assert_eq!(store.sweep(now).await.unwrap(), 1);
    assert_eq!(
        store.persistence().operations(),
        vec![Operation::DeleteSessionsSeenBefore {
            cutoff: t0() + Duration::hours(1)
        }]
    );
    assert!(store.persistence().get(&old.session_id()).is_none());
    assert!(store.persistence().get(&recent.session_id()).is_some());
    assert_eq!(store.cached_len(), 1);
}

/// A failed sweep reports the error and leaves the sessions alone.
#[async_std::test]
async fn test_sweep_failure() {
    let store = session_store();
    store.create(USER, true, None, t0()).await.unwrap();
    store.persistence().set_failing(true);
    assert!(store.sweep(t0() + Duration::hours(13)).await.is_err());
    store.persistence().set_failing(false);
    assert_eq!(store.persistence().len(), 1);
}

/// Concurrent lookups and refreshes of one session never produce a second XSRF token.
#[async_std::test]
async fn test_concurrent_refresh_keeps_xsrf_token() {
    let store = session_store();
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();
    let now = t0() + Duration::hours(1);

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let store = Arc::clone(&store);
            let key = key.clone();
            let record = record.clone();
            async_std::task::spawn(async move {
                if i % 2 == 0 {
                    store.refresh(&key, &record, now).await
                } else {
                    match store.lookup(&key, now).await.unwrap() {
                        Some(found) if found.needs_cookie_refresh(now) => {
                            store.refresh(&key, &found, now).await
                        }
                        Some(found) => found,
                        None => panic!("session vanished"),
                    }
                }
            })
        })
        .collect();

    let mut tokens = HashSet::new();
    for task in tasks {
        tokens.insert(task.await.xsrf_token);
    }
    let current = store.lookup(&key, now).await.unwrap().unwrap();
    tokens.insert(current.xsrf_token);
    assert_eq!(tokens.len(), 1);
    assert!(tokens.contains(&record.xsrf_token));
}

/// Records are stored with plain field names and the account as a number.
#[test]
fn test_record_serialization() {
    let record = SessionRecord::new(
        USER,
        t0(),
        Duration::hours(12),
        true,
        Some("username:user".to_string()),
        None,
        Some("xsrf".to_string()),
    );
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["account_id"], 1000);
    assert_eq!(json["persistent"], true);
    assert_eq!(json["xsrf_token"], "xsrf");
    let back: SessionRecord = serde_json::from_value(json).unwrap();
    assert_eq!(back, record);
}

/// The janitor sweeps in the background until it is cancelled.
#[async_std::test]
async fn test_janitor_sweeps() {
    let store = session_store();
    // Sessions seen long before the real clock's now.
    store.create(USER, true, None, t0()).await.unwrap();
    assert_eq!(store.persistence().len(), 1);

    let interval = std::time::Duration::from_millis(10);
    let janitor = session_gateway::janitor::spawn_janitor(store.clone(), interval);
    async_std::task::sleep(std::time::Duration::from_millis(200)).await;
    janitor.cancel().await;

    assert!(store.persistence().is_empty());
    assert_eq!(store.cached_len(), 0);
}

/// A logout between lookup and cookie refresh is final.
#[async_std::test]
async fn test_refresh_after_destroy_keeps_session_destroyed() {
    let store = session_store();
    let (key, _) = store.create(USER, true, None, t0()).await.unwrap();

    let now = t0() + Duration::hours(1);
    let seen = store.lookup(&key, now).await.unwrap().unwrap();
    assert!(seen.needs_cookie_refresh(now));
    store.destroy(&key).await.unwrap();

    let refreshed = store.refresh(&key, &seen, now).await;
    assert_eq!(refreshed.account_id, USER);
    assert_eq!(store.lookup(&key, now).await.unwrap(), None);
    assert!(store.persistence().is_empty());
    assert_eq!(store.cached_len(), 0);
}

/// A session evicted from the cache is still refreshed through the persistent store.
#[async_std::test]
async fn test_refresh_of_evicted_session() {
    let config = SessionConfig {
        max_cached_sessions: 1,
        ..SessionConfig::default()
    };
    let store = SessionStore::new(MemoryStore::new_with_logger(), &config)
        .with_key_generator(DebugSessionKeyGenerator::default());
    let (key, record) = store.create(USER, true, None, t0()).await.unwrap();
    store
        .create(USER, true, None, t0() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(store.cached_len(), 1);

    let now = t0() + Duration::hours(1);
    let refreshed = store.refresh(&key, &record, now).await;
    assert_eq!(refreshed.xsrf_token, record.xsrf_token);
    assert_eq!(
        store.persistence().get(&key.session_id()),
        Some(refreshed.clone())
    );
    assert_eq!(store.lookup(&key, now).await.unwrap(), Some(refreshed));
}

/// The janitor's interval is taken from the `[sessions]` section.
#[async_std::test]
async fn test_janitor_uses_configured_interval() {
    let config = SessionConfig {
        cleanup_interval_secs: 1,
        ..SessionConfig::default()
    };
    let store = Arc::new(
        SessionStore::new(MemoryStore::new_with_logger(), &config)
            .with_key_generator(DebugSessionKeyGenerator::default()),
    );
    store.create(USER, true, None, t0()).await.unwrap();

    let janitor = session_gateway::janitor::spawn_configured_janitor(store.clone(), &config);
    async_std::task::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(store.persistence().len(), 1);
    async_std::task::sleep(std::time::Duration::from_millis(1300)).await;
    janitor.cancel().await;

    assert!(store.persistence().is_empty());
}
