//! Adaptive sleep interval for the connection loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a [`ConnectionLoop`](crate::ConnectionLoop) sleeps between ticks.
///
/// The loop polls rather than waits for readiness, so the interval trades
/// latency for idle CPU. It tightens while there is work in flight and
/// relaxes once the socket goes quiet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pacing {
    /// Interval when the last tick neither found pending work nor blocked.
    pub base: Duration,
    /// Interval while buffers hold unsent/unprocessed bytes, or after a
    /// read that filled a whole chunk.
    pub fast: Duration,
    /// Interval after a read that would have blocked with nothing pending.
    pub idle: Duration,
    /// Bytes requested per read.
    pub read_chunk: usize,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(33),
            fast: Duration::from_millis(16),
            idle: Duration::from_millis(41),
            read_chunk: 4096,
        }
    }
}

impl Pacing {
    /// Picks the sleep for the tick that just finished.
    ///
    /// `pending`: either buffer still holds bytes.
    /// `full_read`: the last read returned at least a whole chunk.
    /// `would_block`: the last read found nothing to read.
    pub fn next_interval(&self, pending: bool, full_read: bool, would_block: bool) -> Duration {
        if pending || full_read {
            self.fast
        } else if would_block {
            self.idle
        } else {
            self.base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_interval_pending_data_is_fast() {
        let p = Pacing::default();
        assert_eq!(p.next_interval(true, false, true), p.fast);
    }

    #[test]
    fn test_next_interval_full_read_is_fast() {
        let p = Pacing::default();
        assert_eq!(p.next_interval(false, true, false), p.fast);
    }

    #[test]
    fn test_next_interval_would_block_is_slower_than_base() {
        let p = Pacing::default();
        let idle = p.next_interval(false, false, true);
        assert_eq!(idle, p.idle);
        assert!(idle > p.base);
    }

    #[test]
    fn test_next_interval_partial_read_is_base() {
        let p = Pacing::default();
        assert_eq!(p.next_interval(false, false, false), p.base);
    }
}
