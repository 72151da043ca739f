use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// How a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Still being delivered, or dropped before any outcome was recorded
    Open,
    /// Upstream body delivered in full
    Completed,
    /// Upstream body failed mid-stream (reset, idle timeout, decode error)
    UpstreamFailed,
    /// Client stopped reading before the upstream finished
    ClientDisconnected,
}

impl StreamOutcome {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Completed,
            2 => Self::UpstreamFailed,
            3 => Self::ClientDisconnected,
            _ => Self::Open,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Completed => 1,
            Self::UpstreamFailed => 2,
            Self::ClientDisconnected => 3,
        }
    }
}

/// Shared record of a stream's outcome.
///
/// The first terminal outcome sticks; later attempts to record another one
/// are ignored.
#[derive(Clone, Debug, Default)]
pub struct StreamTracker {
    state: Arc<AtomicU8>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(&self) -> StreamOutcome {
        StreamOutcome::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Record `outcome` unless one was recorded already.
    ///
    /// Returns `true` if this call set it.
    pub fn finish(&self, outcome: StreamOutcome) -> bool {
        self.state
            .compare_exchange(
                StreamOutcome::Open.as_u8(),
                outcome.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome() != StreamOutcome::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_open() {
        let tracker = StreamTracker::new();
        assert_eq!(tracker.outcome(), StreamOutcome::Open);
        assert!(!tracker.is_finished());
    }

    #[test]
    fn test_first_outcome_sticks() {
        let tracker = StreamTracker::new();
        assert!(tracker.finish(StreamOutcome::Completed));
        assert!(!tracker.finish(StreamOutcome::ClientDisconnected));
        assert_eq!(tracker.outcome(), StreamOutcome::Completed);
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = StreamTracker::new();
        let observer = tracker.clone();
        tracker.finish(StreamOutcome::UpstreamFailed);
        assert_eq!(observer.outcome(), StreamOutcome::UpstreamFailed);
        assert!(observer.is_finished());
    }
}
