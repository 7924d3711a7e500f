//! Keyed async tasks that report back with an action
//!
//! Each task runs on the tokio runtime and, when it completes, sends the
//! action it produced to the dispatch loop. Keys make tasks exclusive:
//! starting `load:track-7` again aborts the earlier load before it can
//! report a stale result.
//!
//! ```ignore
//! let mut tasks = dispatch_loop.task_manager();
//!
//! tasks.spawn("load", async move {
//!     match library.fetch(id).await {
//!         Ok(track) => PlayerAction::TrackLoaded(track),
//!         Err(e) => PlayerAction::TrackFailed(e.to_string()),
//!     }
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::Action;

/// Name of a task slot
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    /// Create a new task key
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the key name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Owner of in-flight async work
///
/// Dropping the manager aborts everything it still owns.
pub struct TaskManager<A> {
    tasks: HashMap<TaskKey, AbortHandle>,
    action_tx: mpsc::UnboundedSender<A>,
}

impl<A> fmt::Debug for TaskManager<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<A> TaskManager<A>
where
    A: Action + Send,
{
    /// Create a manager sending completions to `action_tx`
    pub fn new(action_tx: mpsc::UnboundedSender<A>) -> Self {
        Self {
            tasks: HashMap::new(),
            action_tx,
        }
    }

    /// Start `future` under `key`, aborting the task previously started with it
    ///
    /// The produced action is sent only if the task was not aborted first.
    pub fn spawn<F>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        let key = key.into();
        if self.cancel(&key) {
            debug!(task = %key, "Replaced running task");
        }
        self.tasks.retain(|_, handle| !handle.is_finished());

        let tx = self.action_tx.clone();
        let handle = tokio::spawn(async move {
            let action = future.await;
            let _ = tx.send(action);
        });

        self.tasks.insert(key, handle.abort_handle());
        self
    }

    /// Abort the task under `key`; returns whether it was still running
    pub fn cancel(&mut self, key: &TaskKey) -> bool {
        match self.tasks.remove(key) {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Abort every task
    pub fn cancel_all(&mut self) {
        for (key, handle) in self.tasks.drain() {
            if !handle.is_finished() {
                debug!(task = %key, "Cancelled task");
            }
            handle.abort();
        }
    }

    /// Whether the task under `key` has been started and not yet finished
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of unfinished tasks
    pub fn len(&self) -> usize {
        self.tasks.values().filter(|h| !h.is_finished()).count()
    }

    /// Whether no task is running
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Drop for TaskManager<A> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
