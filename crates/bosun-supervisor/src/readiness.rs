use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::sync::Notify;

use crate::diagnosis::DiagnosisSink;

/// Single-fire completion token for one launch attempt.
///
/// `fire` is idempotent: the first call wins, later calls are no-ops. The
/// waiter observes exactly one outcome, ready-before-deadline or timeout.
/// The atomic swap before the notify gives the waiter a happens-before edge
/// on everything the firing task wrote first.
#[derive(Debug, Default)]
pub struct ReadySignal {
    fired: AtomicBool,
    notify: Notify,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal complete. Returns false if it had already fired.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Blocks until fired or the deadline passes. Never polls.
    pub async fn wait(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, async {
            loop {
                // Register interest before checking the flag, so a fire
                // between the check and the await cannot be lost.
                let notified = self.notify.notified();
                if self.fired.load(Ordering::Acquire) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Per-line callback shared by both capture tasks of one attempt: record the
/// line verbatim, then complete the attempt's signal on the first line that
/// contains any success marker (case-sensitive substring match).
#[derive(Clone)]
pub struct ReadyWatcher {
    sink: DiagnosisSink,
    markers: Arc<Vec<String>>,
    signal: Arc<ReadySignal>,
}

impl ReadyWatcher {
    pub fn new(sink: DiagnosisSink, markers: Vec<String>, signal: Arc<ReadySignal>) -> Self {
        Self {
            sink,
            markers: Arc::new(markers),
            signal,
        }
    }

    pub async fn observe(&self, line: String) {
        let ready = self.markers.iter().any(|m| line.contains(m.as_str()));
        self.sink.emit(line).await;
        if ready {
            self.signal.fire();
        }
    }
}
