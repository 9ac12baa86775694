use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::persistence::PersistedTasks;
use crate::task::{Task, TaskId};

/// A collection of tasks, keyed by their ids.
///
/// Every operation only touches memory and returns immediately.
pub trait TaskContainer {
    /// Returns every record this container holds, in storage order
    fn get_tasks(&self) -> Vec<Task>;
    /// Returns the task matching this id
    fn get_task(&self, id: &TaskId) -> Option<Task>;
    /// Insert a task, or replace the task that has the same id
    fn assign(&mut self, task: Task);
    /// Flip the completion flag of a task. Returns `false` in case there is no such task
    fn toggle_done(&mut self, id: &TaskId) -> bool;
    /// Remove a task. Returns `false` in case there is no such task
    fn remove(&mut self, id: &TaskId) -> bool;
    /// The number of records in this container
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// A connection to a hosted backend that stores a task collection
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Returns the rows that have been updated after `since` (or every row if `since` is `None`), oldest first
    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, BackendError>;
    /// Create or update rows (matched by id).
    /// Returns the rows as they are now stored (with backend timestamps)
    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>, BackendError>;
    /// Delete a row. Deleting a row that does not exist is not an error
    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError>;
}


/// Something that can provide a bearer token for the signed-in user
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the current token, or `None` when there is no session
    async fn bearer_token(&self) -> Option<String>;
}

#[async_trait]
impl<F, Fut> TokenSource for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    async fn bearer_token(&self) -> Option<String> {
        (self)().await
    }
}


/// On-device storage for the tasks of a remote container
pub trait Persistence: Send + Sync {
    /// Returns the data stored under `key`, or `None` if nothing has been stored yet
    fn load(&self, key: &str) -> Result<Option<PersistedTasks>, Box<dyn Error>>;
    /// Store `data` under `key`, replacing any previous data
    fn save(&self, key: &str, data: &PersistedTasks) -> Result<(), Box<dyn Error>>;
}
