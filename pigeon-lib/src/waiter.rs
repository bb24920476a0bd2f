//! Facility to wait for a dynamic set of delivery tasks to complete, with
//! any number of waiters and multiple waitees (things that are waited for).
//!
//! # Implementation Details
//!
//! The implementation of waiting in this module is just a wrapper around
//! [`tokio::sync::watch`]. A [`WaitGroup`] holds a [`watch::Sender`] with
//! the number of outstanding [`TaskGuard`]s; handing out a guard bumps the
//! counter and dropping one decrements it. Waiting means watching the
//! counter until it reads zero. Keeping the count in the channel (instead
//! of closing it) makes the group reusable: new guards can be handed out
//! after a wait has finished, and several waiters can watch at once.

use std::sync::Arc;

use tokio::sync::watch;

/// Manager for a particular wait group. This can hand out a number of
/// [`TaskGuard`]s and wait, repeatedly, until all of them have been
/// dropped.
#[derive(Clone, Debug)]
pub(crate) struct WaitGroup {
    outstanding: Arc<watch::Sender<usize>>,
}

/// RAII guard held by a task which is being waited for.
///
/// The existence of values of this type represents outstanding work for
/// the corresponding [`WaitGroup`]. Guards must be taken *before* the task
/// is spawned, so a wait racing the spawn still sees the work coming.
#[derive(Debug)]
pub(crate) struct TaskGuard {
    outstanding: Arc<watch::Sender<usize>>,
}

impl WaitGroup {
    pub(crate) fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            outstanding: Arc::new(outstanding),
        }
    }

    /// Registers one unit of outstanding work
    pub(crate) fn guard(&self) -> TaskGuard {
        self.outstanding.send_modify(|count| *count += 1);
        TaskGuard {
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    /// Waits, asynchronously, until every [`TaskGuard`] has been dropped.
    /// Resolves immediately when nothing is outstanding
    pub(crate) async fn wait(&self) {
        let mut observer = self.outstanding.subscribe();
        // cannot fail: `self` keeps the sender side alive for the whole wait
        let _ = observer.wait_for(|count| *count == 0).await;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.outstanding.send_modify(|count| *count -= 1);
    }
}
