//! Utilities to compare custom types
//!
//! These can be used to sort results, e.g. the output of [`crate::store::TaskStore::get_tasks_array`]

use std::cmp::Ordering;

use crate::task::Task;

/// Compare tasks alphabetically (ignoring case), then by id so that the order is stable
pub fn compare_tasks_alpha(left: &&Task, right: &&Task) -> Ordering {
    Ord::cmp(&left.text().to_lowercase(), &right.text().to_lowercase())
        .then_with(|| left.id().cmp(right.id()))
}
