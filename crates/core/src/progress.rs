use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Receives progress percentages in `[0, 100]` as long-running work
/// advances. Reports are best-effort and may repeat nearby values.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, percent: f64);
}

/// Discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _percent: f64) {}
}

/// Forwards reports over a channel. A dropped receiver is not an error;
/// the sender keeps working and the reports go nowhere.
pub struct ChannelSink {
    tx: Sender<f64>,
}

impl ChannelSink {
    pub fn new(tx: Sender<f64>) -> ChannelSink {
        ChannelSink { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, percent: f64) {
        let _ = self.tx.send(percent);
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// solver. Cancellation is one-way and sticky.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn cancellation_is_visible_across_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn channel_sink_forwards_and_survives_drop() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.emit(50.0);
        assert_eq!(rx.recv().ok(), Some(50.0));
        drop(rx);
        sink.emit(100.0);
    }
}
