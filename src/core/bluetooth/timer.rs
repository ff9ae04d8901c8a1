//! Deferred work for the command context
//! A scheduled timer sleeps on its own task and posts its event back to the
//! command context, which is the only place the event is acted on.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    /// Next connection attempt for a session
    RetryConnect { address: String, session: u64 },
    /// Post-connect settle delay elapsed
    DiscoverServices { address: String, session: u64 },
    /// Scan duration elapsed
    ScanTimeout { generation: u64 },
}

#[derive(Debug, Clone)]
pub(crate) struct TimerQueue {
    tx: mpsc::UnboundedSender<TimerEvent>,
}

impl TimerQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Posts `event` after `delay` unless `cancel` fires first.
    pub(crate) fn schedule(&self, delay: Duration, event: TimerEvent, cancel: CancellationToken) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = tx.send(event);
                }
            }
        });
    }
}
