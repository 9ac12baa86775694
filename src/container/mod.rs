//! The two kinds of task containers a [`TaskStore`](crate::store::TaskStore) switches between

pub mod local_tasks;
pub mod remote_tasks;

pub use local_tasks::LocalTasks;
pub use remote_tasks::RemoteTasks;
