//! Some utility functions

use std::io::{stdout, Write};

use crate::task::Task;

pub mod comparison;

/// A debug utility that pretty-prints a list of tasks, sorted alphabetically
pub fn print_task_list(tasks: &[Task]) {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(comparison::compare_tasks_alpha);
    for task in sorted {
        print_task(task);
    }
}

pub fn print_task(task: &Task) {
    let completion = if task.is_done() { "✓" } else { " " };
    let sync = match task.owner_id() {
        None => ".",
        Some(_) => "=",
    };
    println!("    {}{} {}\t{}", completion, sync, task.text(), task.id());
}

/// Print a prompt, without a trailing newline
pub fn prompt(text: &str) {
    let mut stdout = stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}
