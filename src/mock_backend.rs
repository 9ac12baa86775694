//! An in-memory [`TaskBackend`], used in tests and in the demo binary
#![cfg(any(test, feature = "mock"))]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::mock_behaviour::MockBehaviour;
use crate::task::{Task, TaskId};
use crate::traits::TaskBackend;


/// A backend that keeps its rows in memory, and sets timestamps the way the hosted backend does
#[derive(Debug, Default)]
pub struct MockBackend {
    rows: Mutex<HashMap<TaskId, Task>>,
    behaviour: Mutex<MockBehaviour>,
    upsert_requests: AtomicUsize,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self { behaviour: Mutex::new(behaviour), ..Self::default() }
    }

    /// Change the behaviour of subsequent requests
    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// Returns a copy of the stored rows
    pub fn rows(&self) -> HashMap<TaskId, Task> {
        self.rows.lock().unwrap().clone()
    }

    /// The number of upsert requests that have succeeded
    pub fn upsert_requests(&self) -> usize {
        self.upsert_requests.load(Ordering::SeqCst)
    }

    /// Store a row, as if another client had created or modified it
    pub fn insert_from_elsewhere(&self, task: Task) -> Task {
        let stored = self.stamp(task);
        self.rows.lock().unwrap().insert(stored.id().clone(), stored.clone());
        stored
    }

    /// Strictly increasing timestamps, so that incremental fetches never miss a row
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock().unwrap();
        let mut now = Utc::now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    fn stamp(&self, task: Task) -> Task {
        let now = self.next_timestamp();
        let created_at = {
            let rows = self.rows.lock().unwrap();
            rows.get(task.id())
                .and_then(|existing| existing.created_at().cloned())
                .unwrap_or(now)
        };
        Task::new_with_parameters(
            task.id().clone(),
            task.text().to_string(),
            task.is_done(),
            task.owner_id().map(|o| o.to_string()),
            Some(created_at),
            Some(now),
        )
    }
}

#[async_trait]
impl TaskBackend for MockBackend {
    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, BackendError> {
        self.behaviour.lock().unwrap().can_fetch_tasks()?;

        let rows = self.rows.lock().unwrap();
        let mut result: Vec<Task> = rows.values()
            .filter(|row| match (since, row.updated_at()) {
                (None, _) => true,
                (Some(since), Some(updated_at)) => *updated_at > since,
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        result.sort_by_key(|row| row.updated_at().cloned());
        Ok(result)
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>, BackendError> {
        self.behaviour.lock().unwrap().can_upsert_tasks()?;

        let mut stored = Vec::new();
        for task in tasks {
            if task.is_well_formed() == false {
                return Err(BackendError::new("null value in column \"id\" violates not-null constraint").with_code("23502"));
            }
            stored.push(self.stamp(task.clone()));
        }

        let mut rows = self.rows.lock().unwrap();
        for row in &stored {
            rows.insert(row.id().clone(), row.clone());
        }
        self.upsert_requests.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        self.behaviour.lock().unwrap().can_delete_task()?;

        self.rows.lock().unwrap().remove(id);
        Ok(())
    }
}
