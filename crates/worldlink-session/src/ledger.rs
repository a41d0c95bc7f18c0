//! Client-side bookkeeping for outstanding broadcasts.
//!
//! Every BROADCAST a client sends gets a fresh id. The server answers with
//! `GOT_BROADCAST(id, server_time)`; matching that answer against the
//! ledger gives a round-trip sample, which feeds a smoothed latency
//! estimate, and fires the callback registered for the broadcast.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

/// Generates a broadcast id: 16 random bytes as 32 lowercase hex chars.
pub fn generate_broadcast_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Exponentially smoothed round-trip time.
///
/// The first sample is taken as-is. Every later sample is blended in at
/// one fifth weight: `estimate = (sample + 4 * estimate) / 5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyEstimate {
    estimate: Option<Duration>,
}

impl LatencyEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one sample and returns the new estimate.
    pub fn record(&mut self, sample: Duration) -> Duration {
        let next = match self.estimate {
            None => sample,
            Some(prev) => (sample + prev * 4) / 5,
        };
        self.estimate = Some(next);
        next
    }

    /// `None` until the first sample.
    pub fn get(&self) -> Option<Duration> {
        self.estimate
    }
}

/// A server's acknowledgement of one broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub broadcast_id: String,
    /// The server clock when it handled the broadcast, in seconds since
    /// the Unix epoch.
    pub server_time: f64,
    /// Time from sending the broadcast to receiving this ack.
    pub round_trip: Duration,
}

/// Runs once when the broadcast it was registered with is acknowledged.
pub type AckCallback = Box<dyn FnOnce(&Ack) + Send>;

/// A matched acknowledgement whose callback has not run yet.
///
/// The ledger hands the callback back instead of running it, so callers
/// holding the ledger behind a lock can release it first.
#[must_use = "the broadcast's callback only runs through `notify`"]
pub struct Acknowledged {
    pub ack: Ack,
    callback: Option<AckCallback>,
}

impl Acknowledged {
    /// Runs the callback registered with the broadcast, if any.
    pub fn notify(self) -> Ack {
        if let Some(callback) = self.callback {
            callback(&self.ack);
        }
        self.ack
    }
}

impl std::fmt::Debug for Acknowledged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acknowledged")
            .field("ack", &self.ack)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

struct Pending {
    sent_at: Instant,
    callback: Option<AckCallback>,
}

/// Broadcasts that have been sent but not yet acknowledged.
#[derive(Default)]
pub struct BroadcastLedger {
    pending: HashMap<String, Pending>,
    latency: LatencyEstimate,
}

impl BroadcastLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a broadcast that is about to be sent. Returns its id.
    pub fn register(&mut self, callback: Option<AckCallback>) -> String {
        self.register_at(Instant::now(), callback)
    }

    /// Like [`register`](Self::register), with an explicit send time.
    pub fn register_at(&mut self, sent_at: Instant, callback: Option<AckCallback>) -> String {
        let id = generate_broadcast_id();
        self.pending.insert(id.clone(), Pending { sent_at, callback });
        id
    }

    /// Matches an acknowledgement received now.
    pub fn acknowledge(&mut self, broadcast_id: &str, server_time: f64) -> Option<Acknowledged> {
        self.acknowledge_at(broadcast_id, server_time, Instant::now())
    }

    /// Matches an acknowledgement received at `now`.
    ///
    /// Returns `None` for an id the ledger doesn't know, either because it
    /// was never sent or because it was acknowledged already. Unknown acks
    /// don't touch the latency estimate.
    pub fn acknowledge_at(
        &mut self,
        broadcast_id: &str,
        server_time: f64,
        now: Instant,
    ) -> Option<Acknowledged> {
        let Some(pending) = self.pending.remove(broadcast_id) else {
            tracing::debug!(broadcast_id, "ack for unknown broadcast");
            return None;
        };
        let round_trip = now.saturating_duration_since(pending.sent_at);
        let estimate = self.latency.record(round_trip);
        tracing::trace!(broadcast_id, ?round_trip, ?estimate, "broadcast acknowledged");

        Some(Acknowledged {
            ack: Ack {
                broadcast_id: broadcast_id.to_string(),
                server_time,
                round_trip,
            },
            callback: pending.callback,
        })
    }

    /// Drops a pending broadcast without running its callback.
    pub fn forget(&mut self, broadcast_id: &str) -> bool {
        self.pending.remove(broadcast_id).is_some()
    }

    /// Number of broadcasts still waiting for an ack.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The current latency estimate, `None` before the first ack.
    pub fn latency(&self) -> Option<Duration> {
        self.latency.get()
    }
}

impl std::fmt::Debug for BroadcastLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastLedger")
            .field("pending", &self.pending.len())
            .field("latency", &self.latency)
            .finish()
    }
}
