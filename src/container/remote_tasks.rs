//! A task container that is persisted on-device and synced with a backend in the background

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{self, SyncActions, SyncSettings};
use crate::error::ErrorReporter;
use crate::persistence::PersistedTasks;
use crate::store::sync_progress::{feedback_channel, FeedbackReceiver, SyncEvent, SyncProgress};
use crate::task::{Task, TaskId, UserId};
use crate::traits::{Persistence, TaskBackend, TaskContainer};

/// How many tasks are sent to the backend in a single request
#[cfg(not(test))]
const UPLOAD_BATCH_SIZE: usize = 50;
/// How many tasks are sent to the backend in a single request
#[cfg(test)]
const UPLOAD_BATCH_SIZE: usize = 3;


#[derive(Debug, Default)]
struct RemoteState {
    tasks: HashMap<TaskId, Task>,
    /// Tasks with local writes the backend has not acknowledged yet, along with the generation of their latest write
    unsynced: HashMap<TaskId, u64>,
    deleted: HashSet<TaskId>,
    last_sync: Option<DateTime<Utc>>,
    generation: u64,
}

impl RemoteState {
    fn from_persisted(data: PersistedTasks) -> Self {
        let mut state = Self::default();
        for (key, task) in data.tasks {
            if task.is_well_formed() == false {
                log::warn!("Ignoring persisted task {:?} that has no id", key);
                continue;
            }
            if task.id() != &key {
                log::warn!("Persisted task {} was stored under key {}", task.id(), key);
            }
            state.tasks.insert(task.id().clone(), task);
        }
        for id in data.unsynced {
            if state.tasks.contains_key(&id) {
                state.mark_unsynced(id);
            }
        }
        state.deleted = data.deleted;
        state.last_sync = data.last_sync;
        state
    }

    fn to_persisted(&self) -> PersistedTasks {
        PersistedTasks {
            tasks: self.tasks.clone(),
            unsynced: self.unsynced.keys().cloned().collect(),
            deleted: self.deleted.clone(),
            last_sync: self.last_sync,
        }
    }

    fn mark_unsynced(&mut self, id: TaskId) {
        self.generation += 1;
        self.deleted.remove(&id);
        self.unsynced.insert(id, self.generation);
    }

    fn has_pending_write(&self, id: &TaskId) -> bool {
        self.unsynced.contains_key(id) || self.deleted.contains(id)
    }

    fn pending(&self) -> usize {
        self.unsynced.len() + self.deleted.len()
    }
}


/// What the container shares with its background workers
struct Shared {
    persistence_key: String,
    persistence: Arc<dyn Persistence>,
    state: Mutex<RemoteState>,
    save_lock: Mutex<()>,
    pending_writes: watch::Sender<usize>,
    sync_wake: Notify,
    persist_wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    fn publish_pending(&self, state: &RemoteState) {
        self.pending_writes.send_replace(state.pending());
    }

    fn save_now(&self) {
        let _saving = self.save_lock.lock().unwrap();
        let snapshot = self.lock().to_persisted();
        if let Err(err) = self.persistence.save(&self.persistence_key, &snapshot) {
            log::warn!("Unable to persist {}: {}", self.persistence_key, err);
        }
    }
}


/// A task container bound to a backend connection and a user.
///
/// Reads and writes are served from memory. Two Tokio tasks run in the background for as long as this container lives:
/// one persists the container under `tasks_{user_id}`, the other one pushes local changes to the backend and pulls remote ones,
/// retrying forever in case of failures.
pub struct RemoteTasks {
    session_id: Uuid,
    user_id: UserId,
    backend: Arc<dyn TaskBackend>,
    shared: Arc<Shared>,
    pending_rx: watch::Receiver<usize>,
    feedback_rx: FeedbackReceiver,
    workers: Vec<JoinHandle<()>>,
}

impl RemoteTasks {
    /// Create a container and start syncing it.
    ///
    /// Previously persisted data for this user is loaded first. Writes that had not been acknowledged are sent again.
    /// This must be called from a Tokio runtime, otherwise the container is only persisted and never synced.
    pub fn new(backend: Arc<dyn TaskBackend>, user_id: &str, persistence: Arc<dyn Persistence>,
               settings: SyncSettings, reporter: Arc<ErrorReporter>) -> Self
    {
        let persistence_key = config::persistence_key(user_id);
        let state = match persistence.load(&persistence_key) {
            Ok(Some(data)) => {
                log::debug!("Loaded {} persisted task(s) from {}", data.tasks.len(), persistence_key);
                RemoteState::from_persisted(data)
            },
            Ok(None) => RemoteState::default(),
            Err(err) => {
                log::warn!("Invalid persisted data for {}: {}. Starting from an empty container", persistence_key, err);
                RemoteState::default()
            },
        };

        let (pending_tx, pending_rx) = watch::channel(state.pending());
        let (feedback_tx, feedback_rx) = feedback_channel();
        let shared = Arc::new(Shared {
            persistence_key,
            persistence,
            state: Mutex::new(state),
            save_lock: Mutex::new(()),
            pending_writes: pending_tx,
            sync_wake: Notify::new(),
            persist_wake: Notify::new(),
        });

        let workers = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let progress = SyncProgress::new(user_id, reporter, feedback_tx);
                vec![
                    handle.spawn(sync_worker(Arc::clone(&shared), Arc::clone(&backend), settings, progress)),
                    handle.spawn(persistence_worker(Arc::clone(&shared))),
                ]
            },
            Err(_) => {
                log::error!("No Tokio runtime is running: tasks of {} will be persisted but never synced", user_id);
                Vec::new()
            },
        };

        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            backend,
            shared,
            pending_rx,
            feedback_rx,
            workers,
        }
    }

    /// A random identifier of this container instance
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether this container has been built for this exact connection handle and user
    pub fn is_bound_to(&self, backend: &Arc<dyn TaskBackend>, user_id: &str) -> bool {
        let same_backend = Arc::as_ptr(&self.backend) as *const () == Arc::as_ptr(backend) as *const ();
        same_backend && self.user_id == user_id
    }

    /// Whether background workers are running
    pub fn is_syncing(&self) -> bool {
        self.workers.is_empty() == false
    }

    /// The number of local writes that the backend has not acknowledged yet
    pub fn pending_writes(&self) -> usize {
        *self.pending_rx.borrow()
    }

    /// A channel that tells the number of local writes that the backend has not acknowledged yet
    pub fn pending_writes_watch(&self) -> watch::Receiver<usize> {
        self.pending_rx.clone()
    }

    /// A channel that tells how the background sync is going
    pub fn feedback(&self) -> FeedbackReceiver {
        self.feedback_rx.clone()
    }

    /// Resolves once every local write has been acknowledged by the backend.
    ///
    /// This never resolves in case this container is not syncing and has pending writes.
    pub async fn wait_until_flushed(&self) {
        wait_for_zero(self.pending_writes_watch()).await
    }

    /// Insert several tasks at once
    pub fn assign_batch(&mut self, tasks: Vec<Task>) {
        self.write(|state| {
            for task in tasks {
                let id = task.id().clone();
                state.tasks.insert(id.clone(), task);
                state.mark_unsynced(id);
            }
        })
    }

    /// Mark every task as changed, so that the whole collection is sent again to the backend
    pub fn touch_all(&mut self) {
        self.write(|state| {
            let ids: Vec<TaskId> = state.tasks.keys().cloned().collect();
            for id in ids {
                state.mark_unsynced(id);
            }
        })
    }

    fn write<T, F>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut RemoteState) -> T,
    {
        let result = {
            let mut state = self.shared.lock();
            let result = f(&mut *state);
            self.shared.publish_pending(&state);
            result
        };

        if self.is_syncing() {
            self.shared.sync_wake.notify_one();
            self.shared.persist_wake.notify_one();
        } else {
            self.shared.save_now();
        }
        result
    }
}

impl TaskContainer for RemoteTasks {
    fn get_tasks(&self) -> Vec<Task> {
        self.shared.lock().tasks.values().cloned().collect()
    }

    fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.shared.lock().tasks.get(id).cloned()
    }

    fn assign(&mut self, task: Task) {
        self.assign_batch(vec![task])
    }

    fn toggle_done(&mut self, id: &TaskId) -> bool {
        self.write(|state| {
            match state.tasks.get_mut(id) {
                None => false,
                Some(task) => {
                    task.toggle_done();
                    state.mark_unsynced(id.clone());
                    true
                },
            }
        })
    }

    fn remove(&mut self, id: &TaskId) -> bool {
        self.write(|state| {
            match state.tasks.remove(id) {
                None => false,
                Some(_) => {
                    state.unsynced.remove(id);
                    state.deleted.insert(id.clone());
                    true
                },
            }
        })
    }

    fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }
}

impl Drop for RemoteTasks {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
        self.shared.save_now();
    }
}


/// Resolves when the watched value reaches zero (or when its sender is gone)
pub(crate) async fn wait_for_zero(mut rx: watch::Receiver<usize>) {
    loop {
        if *rx.borrow_and_update() == 0 {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}


async fn persistence_worker(shared: Arc<Shared>) {
    loop {
        shared.persist_wake.notified().await;
        shared.save_now();
    }
}

async fn sync_worker(shared: Arc<Shared>, backend: Arc<dyn TaskBackend>, settings: SyncSettings, progress: SyncProgress) {
    progress.info("Starting background sync");

    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pulled_once = false;
    let mut needs_retry = false;

    loop {
        let mut should_pull = false;
        tokio::select! {
            _ = shared.sync_wake.notified() => {},
            _ = ticker.tick(), if settings.realtime || pulled_once == false => {
                should_pull = true;
            },
            _ = tokio::time::sleep(settings.retry_interval), if needs_retry => {
                should_pull = pulled_once == false;
            },
        }

        let mut success = true;
        if should_pull {
            if settings.actions.contains(SyncActions::READ) {
                success = pull(&shared, backend.as_ref(), &progress).await;
            }
            pulled_once = pulled_once || success;
        }
        if push(&shared, backend.as_ref(), &settings, &progress).await == false {
            success = false;
        }

        needs_retry = success == false;
        if success && shared.lock().pending() == 0 {
            progress.feedback(SyncEvent::UpToDate);
        }
    }
}

/// Fetch the rows that changed on the backend since the last pull.
/// Rows that have pending local writes are left untouched.
async fn pull(shared: &Shared, backend: &dyn TaskBackend, progress: &SyncProgress) -> bool {
    let since = shared.lock().last_sync;
    progress.feedback(SyncEvent::Pulling);

    let rows = match backend.fetch_tasks(since).await {
        Err(err) => {
            progress.failure("fetching tasks", &err);
            return false;
        },
        Ok(rows) => rows,
    };

    let mut n_applied = 0;
    {
        let mut state = shared.lock();
        for row in rows {
            if let Some(updated_at) = row.updated_at() {
                if state.last_sync.map_or(true, |last| *updated_at > last) {
                    state.last_sync = Some(*updated_at);
                }
            }
            if row.is_well_formed() == false || state.has_pending_write(row.id()) {
                continue;
            }
            state.tasks.insert(row.id().clone(), row);
            n_applied += 1;
        }
    }

    if n_applied > 0 {
        progress.debug(&format!("{} task(s) pulled from the backend", n_applied));
    }
    shared.persist_wake.notify_one();
    true
}

/// Send unsynced tasks and local deletions to the backend
async fn push(shared: &Shared, backend: &dyn TaskBackend, settings: &SyncSettings, progress: &SyncProgress) -> bool {
    let (upserts, deletions) = {
        let state = shared.lock();
        let upserts: Vec<(Task, u64)> = match settings.actions.intersects(SyncActions::CREATE | SyncActions::UPDATE) {
            false => Vec::new(),
            true => state.unsynced.iter()
                .filter_map(|(id, generation)| state.tasks.get(id).map(|task| (task.clone(), *generation)))
                .collect(),
        };
        let deletions: Vec<TaskId> = match settings.actions.contains(SyncActions::DELETE) {
            false => Vec::new(),
            true => state.deleted.iter().cloned().collect(),
        };
        (upserts, deletions)
    };

    if upserts.is_empty() && deletions.is_empty() {
        return true;
    }
    progress.feedback(SyncEvent::Pushing{ pending: upserts.len() + deletions.len() });

    for batch in upserts.chunks(UPLOAD_BATCH_SIZE) {
        let tasks: Vec<Task> = batch.iter().map(|(task, _)| task.clone()).collect();
        match backend.upsert_tasks(&tasks).await {
            Err(err) => {
                progress.failure("sending tasks", &err);
                shared.persist_wake.notify_one();
                return false;
            },
            Ok(stored) => {
                let mut state = shared.lock();
                for (task, generation) in batch {
                    if state.unsynced.get(task.id()) == Some(generation) {
                        state.unsynced.remove(task.id());
                    }
                }
                // Keep the backend timestamps, unless the task has been modified in the meantime
                for row in stored {
                    if row.is_well_formed() && state.has_pending_write(row.id()) == false && state.tasks.contains_key(row.id()) {
                        state.tasks.insert(row.id().clone(), row);
                    }
                }
                shared.publish_pending(&state);
                progress.debug(&format!("{} task(s) sent to the backend", tasks.len()));
            },
        }
    }

    for id in deletions {
        if shared.lock().deleted.contains(&id) == false {
            continue;
        }
        match backend.delete_task(&id).await {
            Err(err) => {
                progress.failure("deleting tasks", &err);
                shared.persist_wake.notify_one();
                return false;
            },
            Ok(()) => {
                let mut state = shared.lock();
                state.deleted.remove(&id);
                shared.publish_pending(&state);
                progress.debug(&format!("Task {} deleted from the backend", id));
            },
        }
    }

    shared.persist_wake.notify_one();
    true
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::mock_backend::MockBackend;
    use crate::mock_behaviour::MockBehaviour;
    use crate::persistence::MemoryPersistence;

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(20),
            retry_interval: Duration::from_millis(10),
            ..SyncSettings::default()
        }
    }

    #[tokio::test]
    async fn batches_are_pushed() {
        let backend = Arc::new(MockBackend::new());
        let persistence = Arc::new(MemoryPersistence::new());
        let mut remote = RemoteTasks::new(backend.clone(), "user", persistence, fast_settings(), Arc::new(ErrorReporter::new()));

        let tasks: Vec<Task> = (0..7).map(|i| Task::new(format!("task {}", i), Some("user".to_string()))).collect();
        remote.assign_batch(tasks);
        assert_eq!(remote.pending_writes(), 7);

        tokio::time::timeout(Duration::from_secs(5), remote.wait_until_flushed()).await.unwrap();
        assert_eq!(backend.rows().len(), 7);
        // 7 tasks are split in 3 requests
        assert_eq!(backend.upsert_requests(), 3);
        // Backend timestamps are kept
        assert!(remote.get_tasks().iter().all(|t| t.updated_at().is_some()));
    }

    #[tokio::test]
    async fn malformed_persisted_tasks_are_dropped() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut data = PersistedTasks::default();
        let good = Task::new("good".to_string(), Some("user".to_string()));
        let bad: Task = serde_json::from_str(r#"{"task": "bad"}"#).unwrap();
        data.tasks.insert(good.id().clone(), good.clone());
        data.tasks.insert(TaskId::from("some_key"), bad);
        persistence.save("tasks_user", &data).unwrap();

        let backend = Arc::new(MockBackend::with_behaviour(MockBehaviour::fail_now(u32::MAX)));
        let remote = RemoteTasks::new(backend, "user", persistence, fast_settings(), Arc::new(ErrorReporter::new()));
        assert_eq!(remote.get_tasks(), vec![good]);
    }

    #[test]
    fn without_runtime() {
        let backend: Arc<dyn TaskBackend> = Arc::new(MockBackend::new());
        let persistence = Arc::new(MemoryPersistence::new());
        let mut remote = RemoteTasks::new(backend.clone(), "user", persistence.clone(), fast_settings(), Arc::new(ErrorReporter::new()));
        assert_eq!(remote.is_syncing(), false);
        assert!(remote.is_bound_to(&backend, "user"));
        assert_eq!(remote.is_bound_to(&backend, "someone else"), false);

        remote.assign(Task::new("offline".to_string(), Some("user".to_string())));
        // Persisted synchronously
        let persisted = persistence.load("tasks_user").unwrap().unwrap();
        assert_eq!(persisted.tasks.len(), 1);
        assert_eq!(persisted.unsynced.len(), 1);
    }
}
