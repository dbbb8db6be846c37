//! EventLog: the bounded, deduplicated, newest-first list of detected events.
//!
//! Two sources feed it:
//!
//! ```text
//!  poll snapshot  ──► apply_snapshot   replaces everything (authoritative)
//!  push message   ──► apply_push       prepends one event unless its id is known
//! ```
//!
//! Those two operations plus `clear` are the only mutators.  Whatever
//! sequence of them is applied, the log holds at most `capacity` entries and
//! never two entries with the same id.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use eventwatch_proto::protocol::Event;
use tracing::{debug, warn};

/// A full event list fetched by the poller.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// When the request that produced this snapshot was issued.
    pub requested_at: Instant,
    pub events: Vec<Event>,
}

/// What `apply_snapshot` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// The request predates the log (e.g. issued before `clear`).
    Stale,
}

#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<Event>,
    ids: HashSet<i64>,
    capacity: usize,
    initialized_at: Instant,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
            initialized_at: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn to_vec(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }

    /// Replace the log with a poll snapshot.
    ///
    /// The server already returns newest first and bounded by `limit`; a
    /// snapshot that repeats an id or exceeds capacity anyway is trimmed
    /// (first occurrence wins) rather than allowed to break the invariants.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> SnapshotOutcome {
        if snapshot.requested_at < self.initialized_at {
            debug!(
                "reconciler: ignoring snapshot of {} events requested before init",
                snapshot.events.len()
            );
            return SnapshotOutcome::Stale;
        }

        let mut entries = VecDeque::with_capacity(self.capacity);
        let mut ids = HashSet::with_capacity(self.capacity);
        let mut duplicates = 0usize;
        let mut overflow = 0usize;

        for event in snapshot.events {
            if ids.contains(&event.id) {
                duplicates += 1;
                continue;
            }
            if entries.len() == self.capacity {
                overflow += 1;
                continue;
            }
            ids.insert(event.id);
            entries.push_back(event);
        }

        if duplicates > 0 {
            warn!("reconciler: snapshot repeated {} event id(s), kept first", duplicates);
        }
        if overflow > 0 {
            warn!(
                "reconciler: snapshot exceeded capacity {}, dropped {} oldest",
                self.capacity, overflow
            );
        }

        self.entries = entries;
        self.ids = ids;
        SnapshotOutcome::Applied
    }

    /// Prepend a pushed event.  Returns `false` when the id is already
    /// present (redelivery, or the poll got there first).
    pub fn apply_push(&mut self, event: Event) -> bool {
        if self.ids.contains(&event.id) {
            debug!("reconciler: push for known event {} ignored", event.id);
            return false;
        }
        self.ids.insert(event.id);
        self.entries.push_front(event);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    /// Empty the log.  Snapshots requested before this call are stale.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.initialized_at = Instant::now();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::Rng;

    pub(crate) fn event(id: i64) -> Event {
        Event {
            id,
            timestamp: format!("2024-05-01T12:00:{:02}+00:00", id.rem_euclid(60)),
            code: "E1".to_string(),
            description: format!("event {id}"),
            explanation: String::new(),
            clip_reference: format!("/chunks/{id}.mp4"),
        }
    }

    fn snapshot(ids: &[i64]) -> Snapshot {
        Snapshot {
            requested_at: Instant::now(),
            events: ids.iter().map(|&id| event(id)).collect(),
        }
    }

    fn ids(log: &EventLog) -> Vec<i64> {
        log.entries.iter().map(|e| e.id).collect()
    }

    fn assert_invariants(log: &EventLog) {
        let all = ids(log);
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "duplicate ids in {:?}", all);
        assert!(log.len() <= log.capacity());
        assert_eq!(log.ids, unique);
    }

    #[test]
    fn test_push_is_idempotent() {
        let mut log = EventLog::new(200);
        log.apply_snapshot(snapshot(&[3, 2, 1]));
        assert!(log.apply_push(event(4)));
        let after_first = log.to_vec();
        assert!(!log.apply_push(event(4)));
        assert_eq!(log.to_vec(), after_first);
    }

    #[test]
    fn test_poll_then_duplicate_push() {
        let mut log = EventLog::new(200);
        assert_eq!(log.apply_snapshot(snapshot(&[5, 4])), SnapshotOutcome::Applied);
        assert!(!log.apply_push(event(5)));
        assert_eq!(ids(&log), vec![5, 4]);
    }

    #[test]
    fn test_push_overflow_keeps_most_recent() {
        let mut log = EventLog::new(200);
        for id in 1..=201 {
            log.apply_push(event(id));
        }
        assert_eq!(log.len(), 200);
        let expected: Vec<i64> = (2..=201).rev().collect();
        assert_eq!(ids(&log), expected);
        assert!(!log.ids.contains(&1));
    }

    #[test]
    fn test_overflow_evicts_only_the_tail() {
        let mut log = EventLog::new(3);
        log.apply_snapshot(snapshot(&[30, 20, 10]));
        log.apply_push(event(40));
        assert_eq!(ids(&log), vec![40, 30, 20]);
    }

    #[test]
    fn test_push_order_is_arrival_not_timestamp() {
        let mut log = EventLog::new(10);
        let mut late = event(7);
        late.timestamp = "2020-01-01T00:00:00+00:00".to_string();
        log.apply_push(event(8));
        log.apply_push(late);
        assert_eq!(ids(&log), vec![7, 8]);
    }

    #[test]
    fn test_snapshot_supersedes_pushes() {
        let mut log = EventLog::new(200);
        log.apply_push(event(10));
        log.apply_push(event(11));
        log.apply_snapshot(snapshot(&[11, 9, 8]));
        assert_eq!(ids(&log), vec![11, 9, 8]);
        assert!(!log.ids.contains(&10));
        // a later push of an evicted id is new again
        assert!(log.apply_push(event(10)));
        assert_eq!(ids(&log), vec![10, 11, 9, 8]);
    }

    #[test]
    fn test_snapshot_normalized() {
        let mut log = EventLog::new(3);
        log.apply_snapshot(snapshot(&[6, 5, 6, 4, 3, 2]));
        assert_eq!(ids(&log), vec![6, 5, 4]);
        assert_invariants(&log);
    }

    #[test]
    fn test_stale_snapshot_rejected_after_clear() {
        let mut log = EventLog::new(10);
        let early = snapshot(&[1, 2]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        log.clear();
        assert_eq!(log.apply_snapshot(early), SnapshotOutcome::Stale);
        assert!(log.entries.is_empty());
        assert_eq!(log.apply_snapshot(snapshot(&[3])), SnapshotOutcome::Applied);
        assert_eq!(ids(&log), vec![3]);
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let capacity = rng.gen_range(1..20);
            let mut log = EventLog::new(capacity);
            for _ in 0..200 {
                if rng.gen_bool(0.2) {
                    let n = rng.gen_range(0..30);
                    let ids: Vec<i64> = (0..n).map(|_| rng.gen_range(0..40)).collect();
                    log.apply_snapshot(snapshot(&ids));
                } else {
                    let before = log.to_vec();
                    let e = event(rng.gen_range(0..40));
                    let known = log.ids.contains(&e.id);
                    let applied = log.apply_push(e.clone());
                    assert_eq!(applied, !known);
                    if applied {
                        assert_eq!(log.entries.front(), Some(&e));
                        // everything else shifted by one, tail trimmed
                        let rest: Vec<Event> = log.entries.iter().skip(1).cloned().collect();
                        let keep = before.len().min(capacity - 1);
                        assert_eq!(rest, before[..keep].to_vec());
                    } else {
                        assert_eq!(log.to_vec(), before);
                    }
                }
                assert_invariants(&log);
            }
        }
    }
}
