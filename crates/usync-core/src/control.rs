//! Task control for pause/cancel: shared abort tokens.
//!
//! When a queue runs with a `TaskControl`, each in-flight task is registered
//! with an abort token. A caller (e.g. the CLI handling Ctrl-C) can request
//! abort for a task; the worker checks the token between segments, persists
//! progress, and returns the task to a recoverable state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Shared registry of task id -> abort token, plus a stop-all latch so an
/// abort raised while no task is registered (e.g. Ctrl-C between claims)
/// still stops whatever runs next.
#[derive(Default)]
pub struct TaskControl {
    tasks: RwLock<HashMap<String, Arc<AtomicBool>>>,
    stop_all: AtomicBool,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight task; returns the abort token the worker polls.
    /// After `abort_all`, tokens are born already set.
    pub fn register(&self, task_id: &str) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(self.stop_all.load(Ordering::Relaxed)));
        self.tasks
            .write()
            .unwrap()
            .insert(task_id.to_string(), Arc::clone(&token));
        token
    }

    /// Unregister a task (call when the task finishes, success or failure).
    pub fn unregister(&self, task_id: &str) {
        self.tasks.write().unwrap().remove(task_id);
    }

    /// Request abort for one task. The worker will see the token set, persist
    /// checkpointed progress, and stop.
    pub fn request_abort(&self, task_id: &str) {
        if let Some(token) = self.tasks.read().unwrap().get(task_id) {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Request abort for every registered task and latch the stop flag so
    /// tasks registered afterwards abort immediately.
    pub fn abort_all(&self) {
        self.stop_all.store(true, Ordering::Relaxed);
        for token in self.tasks.read().unwrap().values() {
            token.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_token_roundtrip() {
        let control = TaskControl::new();
        let token = control.register("t-1");
        assert!(!token.load(Ordering::Relaxed));
        control.request_abort("t-1");
        assert!(token.load(Ordering::Relaxed));
        control.unregister("t-1");
        // Abort on an unknown id is a no-op.
        control.request_abort("t-1");
    }

    #[test]
    fn abort_all_sets_every_token() {
        let control = TaskControl::new();
        let a = control.register("a");
        let b = control.register("b");
        control.abort_all();
        assert!(a.load(Ordering::Relaxed));
        assert!(b.load(Ordering::Relaxed));
    }

    #[test]
    fn abort_all_latches_for_later_registrations() {
        let control = TaskControl::new();
        control.abort_all();
        let token = control.register("late");
        assert!(token.load(Ordering::Relaxed));
    }
}
