//! To-do tasks, as stored in the `tasks` collection

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Identity of a signed-in user, as given by the authentication provider
pub type UserId = String;

/// The unique identifier of a task.
///
/// An empty `TaskId` denotes a malformed record (e.g. a persisted row without any `id` field)
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId {
    content: String,
}

impl TaskId {
    /// Generate a random TaskId.
    pub fn random() -> Self {
        let random = Uuid::new_v4().to_hyphenated().to_string();
        Self { content: random }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl From<String> for TaskId {
    fn from(content: String) -> Self {
        Self { content }
    }
}
impl From<&str> for TaskId {
    fn from(content: &str) -> Self {
        Self { content: content.to_string() }
    }
}
impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.content)
    }
}


/// A to-do task
///
/// Field names match the columns of the backend table, so that this struct can be (de)serialized as a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    id: TaskId,
    /// The text of the task
    task: String,
    #[serde(default)]
    is_done: bool,
    /// `None` for tasks that are owned locally and have never been synced
    #[serde(default)]
    owner_id: Option<UserId>,

    /// Set by the backend. Never modified locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    /// Set by the backend. Never modified locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a brand new Task that is not on a server yet.
    /// This will pick a new (random) task ID.
    pub fn new(text: String, owner_id: Option<UserId>) -> Self {
        Self::new_with_parameters(TaskId::random(), text, false, owner_id, None, None)
    }

    /// Create a new Task instance, that may be synced on the server already
    pub fn new_with_parameters(id: TaskId, text: String, is_done: bool, owner_id: Option<UserId>,
                               created_at: Option<DateTime<Utc>>, updated_at: Option<DateTime<Utc>>) -> Self
    {
        Self { id, task: text, is_done, owner_id, created_at, updated_at }
    }

    pub fn id(&self) -> &TaskId                   { &self.id        }
    pub fn text(&self) -> &str                    { &self.task      }
    pub fn is_done(&self) -> bool                 { self.is_done    }
    pub fn owner_id(&self) -> Option<&str>        { self.owner_id.as_deref() }
    pub fn created_at(&self) -> Option<&DateTime<Utc>> { self.created_at.as_ref() }
    pub fn updated_at(&self) -> Option<&DateTime<Utc>> { self.updated_at.as_ref() }

    /// Whether this record can be shown and synced (i.e. it has an id)
    pub fn is_well_formed(&self) -> bool {
        self.id.is_empty() == false
    }

    /// Flip the completion flag. No other field is changed
    pub fn toggle_done(&mut self) {
        self.is_done = !self.is_done;
    }

    /// Hand this task over to `owner_id`.
    /// Malformed tasks get a fresh id, other ones keep theirs.
    pub fn reowned(mut self, owner_id: &str) -> Self {
        if self.id.is_empty() {
            self.id = TaskId::random();
        }
        self.owner_id = Some(owner_id.to_string());
        self
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_and_unowned() {
        let task = Task::new("buy milk".to_string(), None);
        assert!(task.is_well_formed());
        assert_eq!(task.text(), "buy milk");
        assert_eq!(task.is_done(), false);
        assert_eq!(task.owner_id(), None);
        assert!(task.created_at().is_none());
    }

    #[test]
    fn reowning_keeps_existing_ids() {
        let task = Task::new("walk the dog".to_string(), None);
        let id = task.id().clone();
        let reowned = task.reowned("user_1");
        assert_eq!(reowned.id(), &id);
        assert_eq!(reowned.owner_id(), Some("user_1"));
    }

    #[test]
    fn reowning_fills_missing_ids() {
        let row: Task = serde_json::from_str(r#"{"task": "no id here"}"#).unwrap();
        assert_eq!(row.is_well_formed(), false);

        let reowned = row.reowned("user_1");
        assert!(reowned.is_well_formed());
        assert_eq!(reowned.text(), "no id here");
    }

    #[test]
    fn toggling_only_flips_completion() {
        let mut task = Task::new("water plants".to_string(), Some("u".to_string()));
        let before = task.clone();
        task.toggle_done();
        assert_eq!(task.is_done(), true);
        assert_eq!(task.id(), before.id());
        assert_eq!(task.owner_id(), before.owner_id());
        task.toggle_done();
        assert_eq!(task, before);
    }

    #[test]
    fn rows_from_the_backend() {
        let row = r#"{
            "id": "0b7f4d4e-7a57-4b8a-a0a0-8b4c3f1b2b11",
            "task": "call mum",
            "is_done": true,
            "owner_id": "user_2",
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-02T08:30:00.123456Z"
        }"#;
        let task: Task = serde_json::from_str(row).unwrap();
        assert_eq!(task.id().as_str(), "0b7f4d4e-7a57-4b8a-a0a0-8b4c3f1b2b11");
        assert!(task.is_done());
        assert_eq!(task.owner_id(), Some("user_2"));
        assert!(task.updated_at().unwrap() > task.created_at().unwrap());
    }
}
