use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// Delay used when no backoff schedule is configured
const FALLBACK_BACKOFF: Duration = Duration::from_secs(1);

/// A queued change to one key: `Some` writes the value, `None` deletes the key
pub type Write = Option<Value>;

/// Pending and failed writes, keyed by storage key
///
/// A key is in at most one of the two maps at any time. Deletions travel
/// through the same maps as writes, so whichever was queued last wins.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: HashMap<String, Write>,
    failed: HashMap<String, FailedWrite>,
    /// Bumped by `clear()`; failures of older batches are discarded
    epoch: u64,
}

/// Pending writes taken for one flush
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub epoch: u64,
    pub writes: Vec<(String, Write)>,
}

/// A write the backend rejected, waiting for its next retry
#[derive(Debug, Clone)]
pub struct FailedWrite {
    pub key: String,
    /// Value captured when the write first failed
    pub value: Write,
    /// Retry attempts that have failed so far
    pub retries: u32,
    pub last_attempt: Instant,
    epoch: u64,
}

impl FailedWrite {
    /// Total failed attempts, the original flush included
    pub fn failures(&self) -> u32 {
        self.retries + 1
    }

    /// When this write becomes eligible for its next retry
    pub fn retry_at(&self, backoff: &[Duration]) -> Instant {
        self.last_attempt + backoff_delay(backoff, self.retries)
    }
}

/// Backoff delay for the given retry count; the last step repeats
pub fn backoff_delay(backoff: &[Duration], retries: u32) -> Duration {
    if backoff.is_empty() {
        return FALLBACK_BACKOFF;
    }
    let index = (retries as usize).min(backoff.len() - 1);
    backoff[index]
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write, superseding any pending or failed write for the same key
    ///
    /// Returns true if a stuck failed write was dropped in favour of this one.
    pub fn enqueue(&mut self, key: String, value: Value) -> bool {
        self.push(key, Some(value))
    }

    /// Queue the deletion of a key
    pub fn enqueue_delete(&mut self, key: String) -> bool {
        self.push(key, None)
    }

    fn push(&mut self, key: String, write: Write) -> bool {
        let superseded = self.failed.remove(&key).is_some();
        self.pending.insert(key, write);
        superseded
    }

    /// Take every pending write for a batched flush
    pub fn take_pending(&mut self) -> Batch {
        Batch {
            epoch: self.epoch,
            writes: self.pending.drain().collect(),
        }
    }

    /// Take the failed writes whose backoff has elapsed
    pub fn take_due_failures(&mut self, now: Instant, backoff: &[Duration]) -> Vec<FailedWrite> {
        let due: Vec<String> = self
            .failed
            .values()
            .filter(|w| w.retry_at(backoff) <= now)
            .map(|w| w.key.clone())
            .collect();

        due.into_iter()
            .filter_map(|key| self.failed.remove(&key))
            .collect()
    }

    /// Move the failed part of a flush batch into the retry cycle
    ///
    /// Keys that were written again while the batch was in flight are
    /// skipped: the newer pending value supersedes them. A batch taken
    /// before the last `clear()` is dropped entirely. Returns the writes
    /// that are already out of attempts.
    pub fn record_batch_failure(
        &mut self,
        epoch: u64,
        writes: Vec<(String, Write)>,
        now: Instant,
        max_retries: u32,
    ) -> Vec<FailedWrite> {
        let mut exhausted = Vec::new();
        if epoch != self.epoch {
            return exhausted;
        }
        for (key, value) in writes {
            if self.pending.contains_key(&key) {
                continue;
            }
            let write = FailedWrite {
                key: key.clone(),
                value,
                retries: 0,
                last_attempt: now,
                epoch,
            };
            if write.failures() >= max_retries {
                exhausted.push(write);
            } else {
                self.failed.insert(key, write);
            }
        }
        exhausted
    }

    /// Record another failed attempt for a retried write
    ///
    /// Returns the write if it has now run out of attempts.
    pub fn record_retry_failure(
        &mut self,
        mut write: FailedWrite,
        now: Instant,
        max_retries: u32,
    ) -> Option<FailedWrite> {
        if write.epoch != self.epoch || self.pending.contains_key(&write.key) {
            return None;
        }
        write.retries += 1;
        write.last_attempt = now;
        if write.failures() >= max_retries {
            return Some(write);
        }
        self.failed.insert(write.key.clone(), write);
        None
    }

    /// Earliest instant any failed write becomes eligible for retry
    pub fn next_retry_at(&self, backoff: &[Duration]) -> Option<Instant> {
        self.failed.values().map(|w| w.retry_at(backoff)).min()
    }

    /// Drop everything queued and disown batches still in flight
    pub fn clear(&mut self) {
        self.pending.clear();
        self.failed.clear();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn is_failed(&self, key: &str) -> bool {
        self.failed.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schedule() -> Vec<Duration> {
        vec![
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(15),
        ]
    }

    fn fail(queue: &mut WriteQueue, key: &str, value: Value, now: Instant) {
        let epoch = queue.epoch();
        queue.record_batch_failure(epoch, vec![(key.to_string(), Some(value))], now, 3);
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let mut queue = WriteQueue::new();

        queue.enqueue("k".to_string(), json!(1));
        queue.enqueue("k".to_string(), json!(2));

        let batch = queue.take_pending();
        assert_eq!(batch.writes, vec![("k".to_string(), Some(json!(2)))]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_enqueue_supersedes_failed_write() {
        let mut queue = WriteQueue::new();
        fail(&mut queue, "k", json!(1), Instant::now());
        assert!(queue.is_failed("k"));

        let superseded = queue.enqueue("k".to_string(), json!(2));
        assert!(superseded);
        assert!(!queue.is_failed("k"));
        assert!(queue.is_pending("k"));
    }

    #[test]
    fn test_delete_supersedes_failed_write() {
        let mut queue = WriteQueue::new();
        fail(&mut queue, "k", json!(1), Instant::now());

        assert!(queue.enqueue_delete("k".to_string()));
        assert!(!queue.is_failed("k"));
        let batch = queue.take_pending();
        assert_eq!(batch.writes, vec![("k".to_string(), None)]);
    }

    #[test]
    fn test_batch_failure_skips_rewritten_keys() {
        let mut queue = WriteQueue::new();
        let now = Instant::now();

        queue.enqueue("a".to_string(), json!(1));
        let batch = queue.take_pending();
        // Deleted while the batch was in flight
        queue.enqueue_delete("a".to_string());

        queue.record_batch_failure(batch.epoch, batch.writes, now, 3);
        assert!(!queue.is_failed("a"));
        assert!(queue.is_pending("a"));
    }

    #[test]
    fn test_clear_discards_in_flight_failures() {
        let mut queue = WriteQueue::new();
        let now = Instant::now();

        queue.enqueue("a".to_string(), json!(1));
        let batch = queue.take_pending();
        fail(&mut queue, "b", json!(2), now);
        let retry = queue.take_due_failures(now + Duration::from_secs(1), &schedule());

        queue.clear();

        assert!(queue
            .record_batch_failure(batch.epoch, batch.writes, now, 1)
            .is_empty());
        assert!(queue.record_retry_failure(retry[0].clone(), now, 1).is_none());
        assert_eq!(queue.failed_len(), 0);
        assert_eq!(queue.next_retry_at(&schedule()), None);
    }

    #[test]
    fn test_due_failures_respect_backoff() {
        let mut queue = WriteQueue::new();
        let start = Instant::now();
        let backoff = schedule();

        fail(&mut queue, "a", json!(1), start);

        assert!(queue
            .take_due_failures(start + Duration::from_millis(500), &backoff)
            .is_empty());
        assert_eq!(queue.next_retry_at(&backoff), Some(start + Duration::from_secs(1)));

        let due = queue.take_due_failures(start + Duration::from_secs(1), &backoff);
        assert_eq!(due.len(), 1);
        assert_eq!(queue.failed_len(), 0);
    }

    #[test]
    fn test_only_elapsed_keys_are_due() {
        let mut queue = WriteQueue::new();
        let start = Instant::now();
        let backoff = schedule();

        fail(&mut queue, "a", json!(1), start);
        fail(&mut queue, "b", json!(2), start + Duration::from_millis(300));
        assert_eq!(queue.next_retry_at(&backoff), Some(start + Duration::from_secs(1)));

        let due = queue.take_due_failures(start + Duration::from_secs(1), &backoff);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "a");
        assert_eq!(
            queue.next_retry_at(&backoff),
            Some(start + Duration::from_millis(1300))
        );
    }

    #[test]
    fn test_retry_failure_escalates_backoff_and_exhausts() {
        let mut queue = WriteQueue::new();
        let backoff = schedule();
        let mut now = Instant::now();

        fail(&mut queue, "a", json!(1), now);

        now += Duration::from_secs(1);
        let write = queue.take_due_failures(now, &backoff).remove(0);
        assert!(queue.record_retry_failure(write, now, 3).is_none());
        // Second step of the schedule applies now
        assert_eq!(queue.next_retry_at(&backoff), Some(now + Duration::from_secs(5)));

        now += Duration::from_secs(5);
        let write = queue.take_due_failures(now, &backoff).remove(0);
        let exhausted = queue.record_retry_failure(write, now, 3).unwrap();
        assert_eq!(exhausted.failures(), 3);
        assert_eq!(exhausted.value, Some(json!(1)));
        assert_eq!(queue.failed_len(), 0);
    }

    #[test]
    fn test_backoff_delay_clamps_to_last_step() {
        let backoff = schedule();
        assert_eq!(backoff_delay(&backoff, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&backoff, 7), Duration::from_secs(15));
        assert_eq!(backoff_delay(&[], 2), FALLBACK_BACKOFF);
    }
}
