//! This module provides ways to tweak mocked backends, so that they can return errors on some tests
#![cfg(any(test, feature = "mock"))]

use crate::error::BackendError;

/// This stores some behaviour tweaks, that describe how a mocked instance will behave during a given test
///
/// So that a functions fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    pub fetch_tasks_behaviour: (u32, u32),
    pub upsert_tasks_behaviour: (u32, u32),
    pub delete_task_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            fetch_tasks_behaviour: (0, n_fails),
            upsert_tasks_behaviour: (0, n_fails),
            delete_task_behaviour: (0, n_fails),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_fetch_tasks(&mut self) -> Result<(), BackendError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.fetch_tasks_behaviour, "fetch_tasks")
    }
    pub fn can_upsert_tasks(&mut self) -> Result<(), BackendError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.upsert_tasks_behaviour, "upsert_tasks")
    }
    pub fn can_delete_task(&mut self) -> Result<(), BackendError> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.delete_task_behaviour, "delete_task")
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), BackendError> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(BackendError::new(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value))
                .with_code("MOCK"))
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}
