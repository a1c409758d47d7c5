//! Task execution seams.
//!
//! The engine never spawns threads of its own for the hot path; it hands
//! tasks to a [`TaskExecutor`] supplied by the node. The split between
//! `try_execute` and `execute_forced` matters: a loaded executor may shed a
//! fresh primary request, but a replica op arrives *after* the primary has
//! committed, and dropping it would leave the copy stale. Replica handlers
//! therefore always go through the forced path.

use std::thread;

use crate::error::{ReplicationError, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the task, or rejects it under load.
    fn try_execute(&self, task: Task) -> Result<()>;

    /// Runs the task unconditionally. Must not shed work.
    fn execute_forced(&self, task: Task);
}

/// Runs tasks inline on the calling thread.
///
/// Used where a pool hop would only add latency: transport reply handling
/// and the outermost request entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerThreadExecutor;

impl TaskExecutor for CallerThreadExecutor {
    fn name(&self) -> &str {
        "same"
    }

    fn try_execute(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }

    fn execute_forced(&self, task: Task) {
        task();
    }
}

/// Runs every task on a fresh background thread.
///
/// A stand-in for a real pool: unbounded, so it never rejects. Nodes with a
/// proper thread pool wire their own [`TaskExecutor`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundExecutor;

impl TaskExecutor for BackgroundExecutor {
    fn name(&self) -> &str {
        "background"
    }

    fn try_execute(&self, task: Task) -> Result<()> {
        self.execute_forced(task);
        Ok(())
    }

    fn execute_forced(&self, task: Task) {
        thread::spawn(task);
    }
}

/// An executor that sheds all load. Only useful to exercise rejection paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingExecutor;

impl TaskExecutor for RejectingExecutor {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn try_execute(&self, _task: Task) -> Result<()> {
        Err(ReplicationError::Rejected {
            executor: self.name().to_string(),
        })
    }

    fn execute_forced(&self, task: Task) {
        task();
    }
}
