use std::sync::Arc;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Wake-up shared by the correlator and waiting workflows. Polling stays the baseline; the
/// signal only shortens the time until the next store read.
#[derive(Clone, Debug, Default)]
pub struct ReplySignal {
    notify: Arc<Notify>,
}

impl ReplySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes every workflow currently waiting.
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
