//! Request bookkeeping: statistics counters, last activity, live requests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tandem_core::{Timestamp, now_millis};

use crate::socket::RequestId;

/// Find and transaction counts for one period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticalData {
    /// Completed find calls.
    pub find: u64,
    /// Completed transaction calls.
    pub tx: u64,
}

impl StatisticalData {
    fn add(&mut self, other: Self) {
        self.find += other.find;
        self.tx += other.tx;
    }
}

/// All counters of a session at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Since the session started; never reset.
    pub total: StatisticalData,
    /// Since the last period roll.
    pub current: StatisticalData,
    /// Trailing window of rolled periods.
    pub mins5: StatisticalData,
}

/// A request that has been dispatched but not yet answered.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    /// Client request id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// When dispatch started.
    pub started: Instant,
}

impl SessionRequest {
    /// Time since dispatch.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Counters and live-request map owned by one session.
#[derive(Debug)]
pub struct RequestTracker {
    stats: Mutex<StatsSnapshot>,
    last_request: AtomicI64,
    requests: DashMap<RequestId, SessionRequest>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    /// Tracker with zeroed counters and last activity set to now.
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(StatsSnapshot::default()),
            last_request: AtomicI64::new(now_millis()),
            requests: DashMap::new(),
        }
    }

    /// Mark activity now. Never moves the timestamp backwards.
    pub fn touch(&self) {
        let _ = self.last_request.fetch_max(now_millis(), Ordering::AcqRel);
    }

    /// Last activity time in milliseconds.
    pub fn last_request(&self) -> Timestamp {
        self.last_request.load(Ordering::Acquire)
    }

    /// Count one find call.
    pub fn record_find(&self) {
        let mut stats = self.stats.lock();
        stats.total.find += 1;
        stats.current.find += 1;
    }

    /// Count one transaction call.
    pub fn record_tx(&self) {
        let mut stats = self.stats.lock();
        stats.total.tx += 1;
        stats.current.tx += 1;
    }

    /// Consistent copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.stats.lock()
    }

    /// Fold the current period into the trailing window and start a new period.
    pub fn roll_period(&self) {
        let mut stats = self.stats.lock();
        let current = std::mem::take(&mut stats.current);
        stats.mins5.add(current);
    }

    /// Clear the trailing window.
    pub fn reset_window(&self) {
        self.stats.lock().mins5 = StatisticalData::default();
    }

    /// Register a dispatched request.
    ///
    /// Returns `false`, leaving the live entry untouched, when `id` is
    /// already in flight.
    pub fn begin(&self, id: RequestId, method: impl Into<String>) -> bool {
        match self.requests.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let request = SessionRequest {
                    id: slot.key().clone(),
                    method: method.into(),
                    started: Instant::now(),
                };
                let _ = slot.insert(request);
                true
            }
        }
    }

    /// Remove an answered request; returns how long it was live.
    pub fn finish(&self, id: &RequestId) -> Option<Duration> {
        self.requests.remove(id).map(|(_, req)| req.elapsed())
    }

    /// Requests currently in flight, oldest first.
    pub fn live_requests(&self) -> Vec<SessionRequest> {
        let mut live: Vec<_> = self.requests.iter().map(|r| r.value().clone()).collect();
        live.sort_by_key(|r| r.started);
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let t = RequestTracker::new();
        assert_eq!(t.snapshot(), StatsSnapshot::default());
        assert!(t.live_requests().is_empty());
    }

    #[test]
    fn record_increments_total_and_current() {
        let t = RequestTracker::new();
        t.record_find();
        t.record_find();
        t.record_tx();
        let s = t.snapshot();
        assert_eq!(s.total, StatisticalData { find: 2, tx: 1 });
        assert_eq!(s.current, StatisticalData { find: 2, tx: 1 });
        assert_eq!(s.mins5, StatisticalData::default());
    }

    #[test]
    fn roll_moves_current_into_window() {
        let t = RequestTracker::new();
        t.record_find();
        t.record_tx();
        t.roll_period();
        t.record_tx();
        t.roll_period();
        let s = t.snapshot();
        assert_eq!(s.current, StatisticalData::default());
        assert_eq!(s.mins5, StatisticalData { find: 1, tx: 2 });
        assert_eq!(s.total, StatisticalData { find: 1, tx: 2 });

        t.reset_window();
        let s = t.snapshot();
        assert_eq!(s.mins5, StatisticalData::default());
        assert_eq!(s.total, StatisticalData { find: 1, tx: 2 });
    }

    #[test]
    fn touch_is_monotonic() {
        let t = RequestTracker::new();
        let before = t.last_request();
        t.touch();
        assert!(t.last_request() >= before);
        t.last_request.store(i64::MAX, Ordering::Release);
        t.touch();
        assert_eq!(t.last_request(), i64::MAX);
    }

    #[test]
    fn live_request_lifecycle() {
        let t = RequestTracker::new();
        assert!(t.begin(RequestId::Num(1), "findAll"));
        assert!(t.begin(RequestId::from("b"), "tx"));
        let live = t.live_requests();
        assert_eq!(live.len(), 2);
        assert!(live.iter().any(|r| r.method == "findAll"));

        assert!(t.finish(&RequestId::Num(1)).is_some());
        assert!(t.finish(&RequestId::Num(1)).is_none());
        assert_eq!(t.live_requests().len(), 1);
    }

    #[test]
    fn duplicate_live_id_is_refused() {
        let t = RequestTracker::new();
        assert!(t.begin(RequestId::Num(7), "findAll"));
        assert!(!t.begin(RequestId::Num(7), "tx"));

        let live = t.live_requests();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].method, "findAll");

        assert!(t.finish(&RequestId::Num(7)).is_some());
        assert!(t.begin(RequestId::Num(7), "tx"));
    }

    #[test]
    fn snapshot_wire_names() {
        let v = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert_eq!(v["mins5"]["find"], 0);
        assert_eq!(v["total"]["tx"], 0);
    }
}
