//! Event-count / broadcast governor (spec component C7).
//!
//! Decides *when* to broadcast aggregate data, request a sample frame, and
//! emit a speed report, as a set of pure predicates over monotonically
//! increasing counters — side effects (actually sending something) stay
//! external to this type, matching spec.md §4.7's "each is pure over
//! current counters."

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    Every(u32),
    Disabled,
}

impl Cadence {
    fn fires(&self, count: u64) -> bool {
        match self {
            Cadence::Disabled => false,
            Cadence::Every(n) => *n > 0 && count % *n as u64 == 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GovernorParams {
    pub speed_report_interval: Cadence,
    pub data_broadcast_interval: Cadence,
    pub hit_frame_interval: Cadence,
    pub non_hit_frame_interval: Cadence,
}

/// Tracks event/hit counters and wall-clock report timing, and exposes the
/// broadcast/report/sample-frame cadence as pure predicates.
pub struct BroadcastGovernor {
    params: GovernorParams,
    pool_size: u32,
    n_events: u64,
    n_hits: u64,
    last_report_at: Instant,
    last_report_n_events: u64,
    next_sample_rank: u32,
}

impl BroadcastGovernor {
    pub fn new(params: GovernorParams, pool_size: u32) -> Self {
        assert!(pool_size >= 2, "pool must have at least one worker");
        Self {
            params,
            pool_size,
            n_events: 0,
            n_hits: 0,
            last_report_at: Instant::now(),
            last_report_n_events: 0,
            next_sample_rank: 1,
        }
    }

    /// Records one aggregated event. Call once per `collect_data` invocation
    /// that represents a real event (not an `end` signal).
    pub fn record_event(&mut self, is_hit: bool) {
        self.n_events += 1;
        if is_hit {
            self.n_hits += 1;
        }
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    pub fn n_hits(&self) -> u64 {
        self.n_hits
    }

    /// True exactly when `n_events mod data_broadcast_interval == 0`
    /// (testable property 9).
    pub fn should_broadcast(&self) -> bool {
        self.params.data_broadcast_interval.fires(self.n_events)
    }

    pub fn should_send_hit_frame(&self) -> bool {
        self.n_hits > 0 && self.params.hit_frame_interval.fires(self.n_hits)
    }

    pub fn should_send_non_hit_frame(&self) -> bool {
        let n_non_hits = self.n_events - self.n_hits;
        n_non_hits > 0 && self.params.non_hit_frame_interval.fires(n_non_hits)
    }

    pub fn should_report_speed(&self) -> bool {
        self.params.speed_report_interval.fires(self.n_events)
    }

    /// Distributes sample-frame requests round-robin across worker ranks
    /// `1..pool_size`, delivered via the `FeedbackDict` mechanism of §4.6.
    pub fn next_sample_source(&mut self) -> u32 {
        let rank = self.next_sample_rank;
        self.next_sample_rank = if self.next_sample_rank + 1 >= self.pool_size {
            1
        } else {
            self.next_sample_rank + 1
        };
        rank
    }

    /// Formats the `"Processed: N in T seconds (H Hz)"` speed report line
    /// spec.md §7 mandates, and resets the reporting window.
    pub fn speed_report(&mut self) -> (u64, Duration, f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_report_at);
        let events_since = self.n_events - self.last_report_n_events;
        let hz = if elapsed.as_secs_f64() > 0.0 {
            events_since as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        self.last_report_at = now;
        self.last_report_n_events = self.n_events;
        (events_since, elapsed, hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(broadcast_every: u32, pool_size: u32) -> BroadcastGovernor {
        BroadcastGovernor::new(
            GovernorParams {
                speed_report_interval: Cadence::Disabled,
                data_broadcast_interval: Cadence::Every(broadcast_every),
                hit_frame_interval: Cadence::Every(5),
                non_hit_frame_interval: Cadence::Disabled,
            },
            pool_size,
        )
    }

    /// Property 9: should_broadcast fires exactly on multiples of the interval.
    #[test]
    fn broadcasts_on_exact_multiples() {
        let mut gov = governor(3, 4);
        let mut fired = Vec::new();
        for i in 1..=9u64 {
            gov.record_event(false);
            if gov.should_broadcast() {
                fired.push(i);
            }
        }
        assert_eq!(fired, vec![3, 6, 9]);
    }

    #[test]
    fn sample_source_round_robins_over_workers() {
        let mut gov = governor(100, 4);
        let sources: Vec<u32> = (0..6).map(|_| gov.next_sample_source()).collect();
        assert_eq!(sources, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn hit_frame_cadence_only_counts_hits() {
        let mut gov = governor(1000, 4);
        for i in 0..20 {
            gov.record_event(i % 2 == 0); // every other event is a hit
        }
        // 10 hits recorded, interval 5 -> fires at hit counts 5 and 10
        assert_eq!(gov.n_hits(), 10);
    }

    #[test]
    fn disabled_cadence_never_fires() {
        let gov = governor(1000, 4);
        assert!(!gov.should_report_speed());
    }
}
