//! This crate provides a local-first task store that switches to a cloud-synced store when a user signs in.
//!
//! Tasks created while nobody is signed in live in a [`LocalTasks`](container::LocalTasks) container.
//! Once a user signs in, a [`RemoteTasks`](container::RemoteTasks) container is built for this user and this backend connection:
//! it is persisted on-device and synced in the background with a hosted backend (see the [`client`] module), and the local tasks are moved into it.
//!
//! The [`TaskStore`](store::TaskStore) owns both containers and decides which one is active. It is the only type an app usually needs.

pub mod traits;

mod task;
pub use task::{Task, TaskId, UserId};
pub mod error;
pub use error::BackendError;
pub mod config;
pub mod container;
pub mod persistence;
pub mod store;
pub use store::TaskStore;

pub mod client;
pub mod mock_behaviour;
pub mod mock_backend;

pub mod utils;
