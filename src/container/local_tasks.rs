use std::collections::HashMap;

use crate::task::{Task, TaskId};
use crate::traits::TaskContainer;


/// The container used while nobody is signed in.
///
/// It only lives in memory, and exists for the whole lifetime of a [`TaskStore`](crate::store::TaskStore).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalTasks {
    tasks: HashMap<TaskId, Task>,
}

impl LocalTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every task
    pub fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain().map(|(_, task)| task).collect()
    }
}

impl TaskContainer for LocalTasks {
    fn get_tasks(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    fn assign(&mut self, task: Task) {
        self.tasks.insert(task.id().clone(), task);
    }

    fn toggle_done(&mut self, id: &TaskId) -> bool {
        match self.tasks.get_mut(id) {
            None => false,
            Some(task) => {
                task.toggle_done();
                true
            }
        }
    }

    fn remove(&mut self, id: &TaskId) -> bool {
        self.tasks.remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
