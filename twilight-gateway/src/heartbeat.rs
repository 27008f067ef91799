//! Liveness tracking for a shard's heartbeat loop.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Number of recent round-trips retained for [`Latency::recent`].
const RECENT_LEN: usize = 5;

/// Snapshot of a shard's heartbeat latency.
#[derive(Clone, Debug)]
pub struct Latency {
    average: Option<Duration>,
    heartbeats: u32,
    recent: VecDeque<Duration>,
}

impl Latency {
    /// Average round-trip time between a heartbeat and its acknowledgement,
    /// across the life of the current session.
    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    /// Total number of acknowledged heartbeats sent this session.
    pub const fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    /// The most recent round-trip times, oldest first.
    pub const fn recent(&self) -> &VecDeque<Duration> {
        &self.recent
    }
}

#[derive(Debug)]
struct Inner {
    sent: Option<Instant>,
    total: Duration,
    heartbeats: u32,
    recent: VecDeque<Duration>,
}

/// Tracks when heartbeats were sent and acknowledged, to report latency and
/// to support detecting a missed acknowledgement.
#[derive(Debug)]
pub struct Heartbeats {
    inner: Mutex<Inner>,
}

impl Heartbeats {
    /// Create an empty tracker for a fresh session.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sent: None,
                total: Duration::ZERO,
                heartbeats: 0,
                recent: VecDeque::with_capacity(RECENT_LEN),
            }),
        }
    }

    /// Record that a heartbeat was just sent.
    pub fn record_sent(&self) {
        self.inner.lock().unwrap().sent = Some(Instant::now());
    }

    /// Record that the corresponding acknowledgement arrived, folding the
    /// round-trip time into the running average.
    pub fn record_ack(&self) {
        let mut inner = self.inner.lock().unwrap();

        let Some(sent) = inner.sent.take() else {
            return;
        };

        let elapsed = sent.elapsed();
        inner.total += elapsed;
        inner.heartbeats += 1;

        if inner.recent.len() == RECENT_LEN {
            inner.recent.pop_front();
        }
        inner.recent.push_back(elapsed);
    }

    /// Current latency snapshot.
    pub fn latency(&self) -> Latency {
        let inner = self.inner.lock().unwrap();

        let average = (inner.heartbeats > 0).then(|| inner.total / inner.heartbeats);

        Latency {
            average,
            heartbeats: inner.heartbeats,
            recent: inner.recent.clone(),
        }
    }
}

impl Default for Heartbeats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Heartbeats;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(Heartbeats: Send, Sync);

    #[test]
    fn tracks_average_across_acks() {
        let heartbeats = Heartbeats::new();
        heartbeats.record_sent();
        std::thread::sleep(Duration::from_millis(5));
        heartbeats.record_ack();

        let latency = heartbeats.latency();
        assert_eq!(1, latency.heartbeats());
        assert!(latency.average().unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn ack_without_a_pending_send_is_ignored() {
        let heartbeats = Heartbeats::new();
        heartbeats.record_ack();
        assert_eq!(0, heartbeats.latency().heartbeats());
    }

    #[test]
    fn no_heartbeats_yields_no_average() {
        let heartbeats = Heartbeats::new();
        assert!(heartbeats.latency().average().is_none());
    }
}
