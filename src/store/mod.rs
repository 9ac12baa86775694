//! This modules holds the task store used by the app
//!
//! It switches between a local-only container and a background-synced container depending on whether a user is signed in.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::container::{LocalTasks, RemoteTasks};
use crate::container::remote_tasks::wait_for_zero;
use crate::error::ErrorReporter;
use crate::persistence::MemoryPersistence;
use crate::task::{Task, TaskId, UserId};
use crate::traits::{Persistence, TaskBackend, TaskContainer};

pub mod sync_progress;
use sync_progress::FeedbackReceiver;


/// Which container currently serves reads and writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveContainer {
    Local,
    Remote,
}


/// The single entry point to read and write tasks, whatever the sync state.
///
/// A store is built once when the app starts, and told about sign-ins ([`TaskStore::enable_sync`]) and sign-outs ([`TaskStore::disable_sync`]).
/// Every operation returns as soon as memory has been updated. Remote containers persist and sync in the background,
/// use [`TaskStore::pending_writes`] and [`TaskStore::wait_for_pending_writes`] to know when the backend has acknowledged the changes.
pub struct TaskStore {
    active: ActiveContainer,
    local: LocalTasks,
    remote: Option<RemoteTasks>,
    current_user_id: Option<UserId>,

    persistence: Arc<dyn Persistence>,
    settings: SyncSettings,
    error_reporter: Arc<ErrorReporter>,
}

impl TaskStore {
    /// Create a store. Remote containers it creates will be persisted to `persistence`
    pub fn new(persistence: Arc<dyn Persistence>, settings: SyncSettings) -> Self {
        Self {
            active: ActiveContainer::Local,
            local: LocalTasks::new(),
            remote: None,
            current_user_id: None,
            persistence,
            settings,
            error_reporter: Arc::new(ErrorReporter::new()),
        }
    }

    /// Create a store that does not persist anything on-device
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::new()), SyncSettings::default())
    }

    /// Switch to the container synced for `user_id`. This is meant to be called when a user has signed in.
    ///
    /// Nothing happens if there is no connection, or if `user_id` is empty.
    /// The first time a connection and user are given, a remote container is built and every local task is moved into it.
    /// Calling this again with the same connection and user only re-activates that container.
    pub fn enable_sync(&mut self, connection: Option<Arc<dyn TaskBackend>>, user_id: &str) {
        let connection = match connection {
            None => {
                log::debug!("No backend connection, task sync stays disabled");
                return;
            },
            Some(c) => c,
        };
        if user_id.is_empty() {
            log::warn!("Refusing to enable task sync for an empty user id");
            return;
        }

        log::info!("Enabling task sync for user {}", user_id);
        self.current_user_id = Some(user_id.to_string());

        let is_reusable = match &self.remote {
            Some(remote) => remote.is_bound_to(&connection, user_id),
            None => false,
        };
        if is_reusable == false {
            if let Some(previous) = self.remote.take() {
                log::info!("Stopping the task sync of user {}", previous.user_id());
                drop(previous);
            }

            let mut remote = RemoteTasks::new(
                connection,
                user_id,
                Arc::clone(&self.persistence),
                self.settings.clone(),
                Arc::clone(&self.error_reporter),
            );
            self.migrate_local_tasks(&mut remote, user_id);
            self.remote = Some(remote);
        }

        self.active = ActiveContainer::Remote;
    }

    /// Move every local task into `remote`, as a single batch
    fn migrate_local_tasks(&mut self, remote: &mut RemoteTasks, user_id: &str) {
        if self.local.is_empty() {
            return;
        }

        let migrated: Vec<Task> = self.local.drain()
            .into_iter()
            .map(|task| task.reowned(user_id))
            .collect();
        log::info!("Migrating {} local task(s) to the synced store of {}", migrated.len(), user_id);
        remote.assign_batch(migrated);
    }

    /// Switch back to the local container. This is meant to be called when the user has signed out.
    ///
    /// The remote container is kept (and keeps syncing), it is just not used anymore.
    pub fn disable_sync(&mut self) {
        if self.active == ActiveContainer::Remote {
            log::info!("Disabling task sync");
        }
        self.active = ActiveContainer::Local;
        self.current_user_id = None;
    }

    fn active_container(&self) -> &dyn TaskContainer {
        match (self.active, &self.remote) {
            (ActiveContainer::Remote, Some(remote)) => remote,
            _ => &self.local,
        }
    }

    fn active_container_mut(&mut self) -> &mut dyn TaskContainer {
        match (self.active, &mut self.remote) {
            (ActiveContainer::Remote, Some(remote)) => remote,
            _ => &mut self.local,
        }
    }

    fn active_remote(&self) -> Option<&RemoteTasks> {
        match self.active {
            ActiveContainer::Remote => self.remote.as_ref(),
            ActiveContainer::Local => None,
        }
    }

    /// Add a new, uncompleted task to the active container.
    ///
    /// Returns the id of the new task, or `None` if `text` is blank
    pub fn add_task(&mut self, text: &str) -> Option<TaskId> {
        if text.trim().is_empty() {
            log::warn!("Ignoring a task with an empty text");
            return None;
        }

        let task = Task::new(text.to_string(), self.current_user_id.clone());
        let id = task.id().clone();
        self.active_container_mut().assign(task);
        Some(id)
    }

    /// Flip the completion flag of a task of the active container.
    ///
    /// Returns `false` (and does nothing) in case there is no such task
    pub fn toggle_done(&mut self, id: &TaskId) -> bool {
        let found = self.active_container_mut().toggle_done(id);
        if found == false {
            log::debug!("Unable to toggle task {}: no such task", id);
        }
        found
    }

    /// Delete a task from the active container.
    ///
    /// Returns `false` (and does nothing) in case there is no such task
    pub fn delete_task(&mut self, id: &TaskId) -> bool {
        self.active_container_mut().remove(id)
    }

    /// Returns every task of the active container. Malformed records (without an id) are skipped
    pub fn get_tasks_array(&self) -> Vec<Task> {
        self.active_container()
            .get_tasks()
            .into_iter()
            .filter(|task| task.is_well_formed())
            .collect()
    }

    /// Whether the active container is the synced one
    pub fn is_sync_enabled(&self) -> bool {
        self.active_remote().is_some()
    }

    /// Send the whole synced collection to the backend again. This does nothing if sync is disabled
    pub fn sync_tasks_now(&mut self) {
        if self.active != ActiveContainer::Remote {
            return;
        }
        if let Some(remote) = self.remote.as_mut() {
            log::info!("Forcing a sync of tasks");
            remote.touch_all();
        }
    }

    pub fn active(&self) -> ActiveContainer {
        self.active
    }

    /// The user that owns the tasks added from now on
    pub fn current_user_id(&self) -> Option<&str> {
        self.current_user_id.as_deref()
    }

    /// An identifier of the remote container, which changes every time a new one is built
    pub fn remote_session_id(&self) -> Option<Uuid> {
        self.remote.as_ref().map(|remote| remote.session_id())
    }

    /// The remote container, even when it is not the active one
    pub fn remote(&self) -> Option<&RemoteTasks> {
        self.remote.as_ref()
    }

    /// The local container, even when it is not the active one
    pub fn local(&self) -> &LocalTasks {
        &self.local
    }

    /// The number of writes of the active container that the backend has not acknowledged yet
    pub fn pending_writes(&self) -> usize {
        self.active_remote().map(|remote| remote.pending_writes()).unwrap_or(0)
    }

    /// A channel that tells the number of pending writes of the active remote container.
    /// Returns `None` when sync is disabled
    pub fn pending_writes_watch(&self) -> Option<watch::Receiver<usize>> {
        self.active_remote().map(|remote| remote.pending_writes_watch())
    }

    /// Resolves once every write of the active container has been acknowledged by the backend.
    /// Resolves immediately when sync is disabled, since local writes are durable as soon as they are made.
    pub async fn wait_for_pending_writes(&self) {
        if let Some(rx) = self.pending_writes_watch() {
            wait_for_zero(rx).await;
        }
    }

    /// A channel that tells how the background sync of the active remote container is going
    pub fn sync_events(&self) -> Option<FeedbackReceiver> {
        self.active_remote().map(|remote| remote.feedback())
    }

    /// Whether a sync error has been logged already
    pub fn has_logged_error(&self) -> bool {
        self.error_reporter.has_logged()
    }
}
