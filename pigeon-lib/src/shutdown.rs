//! One-shot stop signal shared between a [`crate::Client`] and its delivery
//! workers, with a single raiser side and any number of observers.
//!
//! # Implementation Details
//!
//! The implementation is just a wrapper around [`tokio::sync::watch`]. The
//! [`StopSignal`] holds the [`watch::Sender`] carrying a boolean; observers
//! subscribe a fresh receiver whenever they need to wait. The wrapper exists
//! to make the one-shot, irreversible nature of the signal explicit: there
//! is a `raise` but deliberately no way back to the lowered state.

use std::sync::Arc;

use tokio::sync::watch;

/// Clonable stop flag. Starts lowered; [`StopSignal::raise`] trips it for
/// every clone at once, permanently.
#[derive(Clone, Debug)]
pub(crate) struct StopSignal {
    raised: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (raised, _) = watch::channel(false);
        Self {
            raised: Arc::new(raised),
        }
    }

    /// Trips the signal and wakes everyone inside [`StopSignal::raised`].
    /// Idempotent
    pub(crate) fn raise(&self) {
        self.raised.send_replace(true);
    }

    /// Current state, without waiting
    pub(crate) fn is_raised(&self) -> bool {
        *self.raised.borrow()
    }

    /// Resolves once the signal is raised, immediately if it already was.
    /// Meant for `select!` arms racing shutdown against slow work
    pub(crate) async fn raised(&self) {
        let mut observer = self.raised.subscribe();
        // cannot fail: `self` keeps the sender side alive for the whole wait
        let _ = observer.wait_for(|raised| *raised).await;
    }
}
