//! Effect Tracker
//!
//! Counts the operations a scope still has in progress: running effects and
//! active drains. Waiters park on a `watch` channel until the count drops to
//! zero.

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct EffectTracker {
    pending: watch::Sender<usize>,
}

impl EffectTracker {
    pub(crate) fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self { pending }
    }

    pub(crate) fn begin(&self) {
        self.pending.send_modify(|count| *count += 1);
    }

    pub(crate) fn end(&self) {
        self.pending.send_modify(|count| {
            debug_assert!(*count > 0, "EffectTracker::end without a matching begin");
            *count = count.saturating_sub(1);
        });
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolve once nothing is pending.
    ///
    /// Always yields to the runtime first, so work spawned just before the
    /// call gets a chance to register.
    pub(crate) async fn settled(&self) {
        tokio::task::yield_now().await;
        let mut pending = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}
