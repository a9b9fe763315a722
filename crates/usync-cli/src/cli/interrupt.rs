//! Ctrl-C → cooperative abort of the running transfer.
//!
//! The queues poll per-task abort tokens between segments; this arms a
//! signal listener that trips every token (and the stop-all latch) so an
//! interrupted publish or consume parks its tasks with progress saved
//! instead of dying mid-article.

use std::sync::Arc;

use usync_core::control::TaskControl;

/// Detaches the signal listener on drop so it cannot outlive the command.
pub struct InterruptGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Build a `TaskControl` wired to Ctrl-C. Pass the control into
/// `publish_folder`/`consume_share`; keep the guard alive for the duration.
pub fn armed_control() -> (Arc<TaskControl>, InterruptGuard) {
    let control = Arc::new(TaskControl::new());
    let for_signal = Arc::clone(&control);
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received; parking in-flight tasks (progress is saved)");
            for_signal.abort_all();
        }
    });
    (control, InterruptGuard { handle })
}
