//! Background sync of the remote container with a (mocked) backend
#![cfg(feature = "mock")]

use std::sync::Arc;
use std::time::Duration;

use synced_tasks::config::{SyncActions, SyncSettings};
use synced_tasks::mock_backend::MockBackend;
use synced_tasks::mock_behaviour::MockBehaviour;
use synced_tasks::persistence::MemoryPersistence;
use synced_tasks::store::sync_progress::SyncEvent;
use synced_tasks::traits::{Persistence, TaskBackend};
use synced_tasks::{Task, TaskStore};

fn test_settings() -> SyncSettings {
    SyncSettings {
        poll_interval: Duration::from_millis(20),
        retry_interval: Duration::from_millis(10),
        ..SyncSettings::default()
    }
}

fn connection(backend: &Arc<MockBackend>) -> Option<Arc<dyn TaskBackend>> {
    let connection: Arc<dyn TaskBackend> = backend.clone();
    Some(connection)
}

async fn flush(store: &TaskStore) {
    tokio::time::timeout(Duration::from_secs(5), store.wait_for_pending_writes())
        .await
        .expect("pending writes have not been flushed in time");
}

/// Wait until `condition` holds, or panic after a few seconds
async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was never met");
}


#[tokio::test]
async fn added_tasks_reach_the_backend() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());

    store.enable_sync(connection(&backend), "user_1");
    let id = store.add_task("buy bread").unwrap();
    assert_eq!(store.pending_writes(), 1);

    flush(&store).await;
    assert_eq!(store.pending_writes(), 0);

    let rows = backend.rows();
    let row = rows.get(&id).unwrap();
    assert_eq!(row.text(), "buy bread");
    assert_eq!(row.owner_id(), Some("user_1"));
    assert_eq!(store.has_logged_error(), false);

    let events = store.sync_events().unwrap();
    eventually(|| *events.borrow() == SyncEvent::UpToDate).await;
}

#[tokio::test]
async fn failures_are_retried() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::with_behaviour(MockBehaviour {
        upsert_tasks_behaviour: (0, 3),
        ..MockBehaviour::default()
    }));
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());

    store.enable_sync(connection(&backend), "user_1");
    let id = store.add_task("eventually synced").unwrap();

    flush(&store).await;
    assert!(backend.rows().contains_key(&id));
    assert_eq!(backend.upsert_requests(), 1);
    assert!(store.has_logged_error());
}

#[tokio::test]
async fn changes_from_other_clients_are_pulled() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());
    store.enable_sync(connection(&backend), "user_1");

    let other = backend.insert_from_elsewhere(Task::new("added on another phone".to_string(), Some("user_1".to_string())));
    eventually(|| store.get_tasks_array().iter().any(|t| t.id() == other.id())).await;

    let mut changed = other.clone();
    changed.toggle_done();
    backend.insert_from_elsewhere(changed);
    eventually(|| store.get_tasks_array().iter().any(|t| t.id() == other.id() && t.is_done())).await;
    assert_eq!(store.get_tasks_array().len(), 1);
}

#[tokio::test]
async fn error_log_is_shared_by_successive_users() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());

    store.enable_sync(connection(&backend), "user_1");
    store.add_task("fine");
    flush(&store).await;
    assert_eq!(store.has_logged_error(), false);

    // Only the container of user_2 is alive when the backend starts failing
    backend.set_behaviour(MockBehaviour::fail_now(u32::MAX));
    store.disable_sync();
    store.enable_sync(connection(&backend), "user_2");
    store.add_task("not sent");
    eventually(|| store.has_logged_error()).await;
    assert_eq!(store.pending_writes(), 1);
}

#[tokio::test]
async fn no_polling_without_realtime() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let initial = backend.insert_from_elsewhere(Task::new("already there".to_string(), Some("user_1".to_string())));

    let settings = SyncSettings { realtime: false, ..test_settings() };
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), settings);
    store.enable_sync(connection(&backend), "user_1");

    // The initial pull still happens
    eventually(|| store.get_tasks_array().iter().any(|t| t.id() == initial.id())).await;

    backend.insert_from_elsewhere(Task::new("added later".to_string(), Some("user_1".to_string())));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get_tasks_array().len(), 1);
}

#[tokio::test]
async fn read_only_sync_keeps_writes_pending() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let settings = SyncSettings { actions: SyncActions::READ, ..test_settings() };
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), settings);
    store.enable_sync(connection(&backend), "user_1");

    store.add_task("never sent");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.pending_writes(), 1);
    assert!(backend.rows().is_empty());
}

#[tokio::test]
async fn restarting_only_resends_unacknowledged_tasks() {
    let _ = env_logger::builder().is_test(true).try_init();
    let persistence = Arc::new(MemoryPersistence::new());

    let first_backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(persistence.clone(), test_settings());
    store.enable_sync(connection(&first_backend), "user_1");
    let acknowledged = store.add_task("acknowledged").unwrap();
    flush(&store).await;

    first_backend.set_behaviour(MockBehaviour::fail_now(u32::MAX));
    let unacknowledged = store.add_task("not acknowledged").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.pending_writes(), 1);
    drop(store);

    let persisted = persistence.load("tasks_user_1").unwrap().unwrap();
    assert_eq!(persisted.tasks.len(), 2);
    assert_eq!(persisted.unsynced.len(), 1);
    assert!(persisted.unsynced.contains(&unacknowledged));

    // The process restarts, and connects to an empty backend
    let second_backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(persistence.clone(), test_settings());
    store.enable_sync(connection(&second_backend), "user_1");
    assert_eq!(store.get_tasks_array().len(), 2);
    assert_eq!(store.pending_writes(), 1);

    flush(&store).await;
    let rows = second_backend.rows();
    assert_eq!(rows.len(), 1);
    assert!(rows.contains_key(&unacknowledged));
    assert_eq!(rows.contains_key(&acknowledged), false);
}

#[tokio::test]
async fn sync_now_sends_everything_again() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::new());
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());
    store.enable_sync(connection(&backend), "user_1");
    store.add_task("one");
    store.add_task("two");
    flush(&store).await;
    let requests = backend.upsert_requests();

    store.sync_tasks_now();
    assert_eq!(store.pending_writes(), 2);
    flush(&store).await;
    assert_eq!(backend.upsert_requests(), requests + 1);
    assert_eq!(backend.rows().len(), 2);
}

#[tokio::test]
async fn remote_container_keeps_syncing_after_sign_out() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockBackend::with_behaviour(MockBehaviour {
        upsert_tasks_behaviour: (0, 2),
        ..MockBehaviour::default()
    }));
    let mut store = TaskStore::new(Arc::new(MemoryPersistence::new()), test_settings());
    store.enable_sync(connection(&backend), "user_1");
    let id = store.add_task("sent later").unwrap();
    store.disable_sync();
    assert_eq!(store.pending_writes(), 0);

    let remote = store.remote().unwrap();
    tokio::time::timeout(Duration::from_secs(5), remote.wait_until_flushed()).await.unwrap();
    assert!(backend.rows().contains_key(&id));
}
