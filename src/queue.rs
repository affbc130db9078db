//! The bounded, coalescing job queue that decouples user threads from the
//! protocol worker thread (§4.3).
//!
//! A job is `(kind, tweak_id)`: the cookie dimension named in §4.3's source
//! triple is not threaded through the queue in this design, because every
//! job in this crate is drained by re-reading the live item from the model
//! by id at pull time (see `context::Worker::run`) rather than carrying a
//! stashed value. Coalescing on `(kind, id)` is exactly as strong as
//! coalescing on the full `(procedure, id, cookie)` triple once the cookie
//! is dropped from the key, since within one context a given id never
//! carries two different cookies.

#[cfg(test)]
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::model::TweakId;

const MIN_BATCH_CAPACITY: usize = 10;
const DEFAULT_MAX_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Server: announce a newly added item to the connected client.
    Append,
    /// Server: announce a removed item.
    Remove,
    /// Either side: push the current value of an item that already exists
    /// on the peer.
    Change,
    /// Client: (re)send `Subscribe` plus this side's `AnnounceFeatures`.
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    pub id: TweakId,
}

struct Inner {
    batches: [Vec<Job>; 2],
    current: usize,
    max_size: usize,
    stopped: bool,
}

impl Inner {
    fn current_batch(&mut self) -> &mut Vec<Job> {
        &mut self.batches[self.current]
    }
}

/// §4.3: `(current_batch_index, batch[0], batch[1], max_size, stopped,
/// mutex, cond)`, modeled as a `Mutex<Inner>` plus one `Condvar` that both
/// "batch became non-empty" and "batch has room" waiters sleep on. A
/// second condvar backs `wait_empty`.
pub struct JobQueue {
    inner: Mutex<Inner>,
    not_empty_or_room: Condvar,
    empty: Condvar,
}

/// Outcome of `pull`: either the drained batch, or a flag that the queue
/// has been stopped and will never yield another batch.
pub enum Pulled {
    Batch(Vec<Job>),
    Stopped,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        JobQueue {
            inner: Mutex::new(Inner {
                batches: [
                    Vec::with_capacity(MIN_BATCH_CAPACITY),
                    Vec::with_capacity(MIN_BATCH_CAPACITY),
                ],
                current: 0,
                max_size,
                stopped: false,
            }),
            not_empty_or_room: Condvar::new(),
            empty: Condvar::new(),
        }
    }

    /// Blocks while the current batch is full and the queue isn't stopped.
    /// Coalesces: a job with an identical `(kind, id)` already in the
    /// current batch makes this call a no-op. Once stopped, the queue is a
    /// sink — `push` returns immediately without blocking or enqueuing.
    pub fn push(&self, job: Job) {
        let mut guard = self.inner.lock();
        loop {
            if guard.stopped {
                return;
            }
            if guard.current_batch().len() < guard.max_size {
                break;
            }
            self.not_empty_or_room.wait(&mut guard);
        }
        let batch = guard.current_batch();
        if !batch.contains(&job) {
            batch.push(job);
        }
        self.not_empty_or_room.notify_all();
    }

    /// Blocks until the current batch is non-empty or the queue is
    /// stopped. On success, atomically rotates to the other (empty) batch
    /// and returns everything that was in the drained one, preserving push
    /// order.
    pub fn pull(&self) -> Pulled {
        let mut guard = self.inner.lock();
        loop {
            if guard.stopped {
                return Pulled::Stopped;
            }
            if !guard.current_batch().is_empty() {
                break;
            }
            self.not_empty_or_room.wait(&mut guard);
        }
        let drained_index = guard.current;
        guard.current = 1 - guard.current;
        // Keep the drained slot's grown capacity rather than resetting it to
        // `MIN_BATCH_CAPACITY`: capacity only ever grows geometrically as
        // jobs are pushed, never shrinks within the queue's lifetime (§4.3).
        let next_capacity = guard.batches[drained_index].capacity().max(MIN_BATCH_CAPACITY);
        let batch = std::mem::replace(&mut guard.batches[drained_index], Vec::with_capacity(next_capacity));
        self.not_empty_or_room.notify_all();
        self.empty.notify_all();
        Pulled::Batch(batch)
    }

    /// Unblocks every waiter; subsequent `pull`s return `Stopped` and
    /// `push` becomes a no-op sink rather than blocking forever.
    pub fn stop(&self) {
        let mut guard = self.inner.lock();
        guard.stopped = true;
        self.not_empty_or_room.notify_all();
        self.empty.notify_all();
    }

    pub fn wait_empty(&self) {
        let mut guard = self.inner.lock();
        while !guard.current_batch().is_empty() && !guard.stopped {
            self.empty.wait(&mut guard);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Test-only helper mirroring `pull` but with a timeout, so coalescing
/// tests don't hang forever if a bug makes the queue never signal.
#[cfg(test)]
impl JobQueue {
    fn pull_timeout(&self, timeout: Duration) -> Option<Pulled> {
        let mut guard = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if guard.stopped {
                return Some(Pulled::Stopped);
            }
            if !guard.current_batch().is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let result = self.not_empty_or_room.wait_for(&mut guard, remaining);
            if result.timed_out() && guard.current_batch().is_empty() && !guard.stopped {
                return None;
            }
        }
        let drained_index = guard.current;
        guard.current = 1 - guard.current;
        let next_capacity = guard.batches[drained_index].capacity().max(MIN_BATCH_CAPACITY);
        let batch = std::mem::replace(&mut guard.batches[drained_index], Vec::with_capacity(next_capacity));
        self.not_empty_or_room.notify_all();
        self.empty.notify_all();
        Some(Pulled::Batch(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(pulled: Pulled) -> Vec<Job> {
        match pulled {
            Pulled::Batch(b) => b,
            Pulled::Stopped => panic!("expected a batch, got Stopped"),
        }
    }

    #[test]
    fn push_then_pull_returns_exactly_the_push() {
        let q = JobQueue::new();
        q.push(Job { kind: JobKind::Change, id: 1 });
        let batch = batch_of(q.pull_timeout(Duration::from_secs(1)).unwrap());
        assert_eq!(batch, vec![Job { kind: JobKind::Change, id: 1 }]);
    }

    #[test]
    fn repeated_identical_jobs_coalesce() {
        let q = JobQueue::new();
        for _ in 0..1000 {
            q.push(Job { kind: JobKind::Change, id: 42 });
        }
        let batch = batch_of(q.pull_timeout(Duration::from_secs(1)).unwrap());
        assert_eq!(batch, vec![Job { kind: JobKind::Change, id: 42 }]);
    }

    #[test]
    fn distinct_ids_preserve_push_order() {
        let q = JobQueue::new();
        q.push(Job { kind: JobKind::Change, id: 1 });
        q.push(Job { kind: JobKind::Change, id: 2 });
        q.push(Job { kind: JobKind::Change, id: 3 });
        let batch = batch_of(q.pull_timeout(Duration::from_secs(1)).unwrap());
        assert_eq!(
            batch,
            vec![
                Job { kind: JobKind::Change, id: 1 },
                Job { kind: JobKind::Change, id: 2 },
                Job { kind: JobKind::Change, id: 3 },
            ]
        );
    }

    #[test]
    fn pull_rotates_to_a_fresh_empty_batch() {
        let q = JobQueue::new();
        q.push(Job { kind: JobKind::Append, id: 1 });
        let _ = q.pull_timeout(Duration::from_secs(1)).unwrap();
        q.push(Job { kind: JobKind::Append, id: 2 });
        let batch = batch_of(q.pull_timeout(Duration::from_secs(1)).unwrap());
        assert_eq!(batch, vec![Job { kind: JobKind::Append, id: 2 }]);
    }

    #[test]
    fn stop_unblocks_pull() {
        let q = JobQueue::new();
        q.stop();
        assert!(matches!(q.pull(), Pulled::Stopped));
        assert!(q.is_stopped());
    }

    #[test]
    fn stop_makes_push_a_sink_not_a_block() {
        let q = JobQueue::with_max_size(1);
        q.push(Job { kind: JobKind::Change, id: 1 });
        q.stop();
        // Would block forever pre-stop since batch is already at max_size 1.
        q.push(Job { kind: JobKind::Change, id: 2 });
    }

    #[test]
    fn batch_capacity_never_shrinks_across_pull_cycles() {
        let q = JobQueue::new();
        for id in 0..25u64 {
            q.push(Job { kind: JobKind::Change, id });
        }
        let grown_index = q.inner.lock().current;
        let grown_capacity = q.inner.lock().batches[grown_index].capacity();
        assert!(grown_capacity > MIN_BATCH_CAPACITY, "batch should have grown past the minimum");

        let _ = q.pull_timeout(Duration::from_secs(1)).unwrap();
        // The slot just drained must keep at least the capacity it grew to,
        // not reset back down to `MIN_BATCH_CAPACITY`.
        let preserved_capacity = q.inner.lock().batches[grown_index].capacity();
        assert!(preserved_capacity >= grown_capacity);

        // A second growth-and-pull cycle on the other slot shows the same.
        for id in 100..130u64 {
            q.push(Job { kind: JobKind::Change, id });
        }
        let second_index = q.inner.lock().current;
        let second_capacity = q.inner.lock().batches[second_index].capacity();
        let _ = q.pull_timeout(Duration::from_secs(1)).unwrap();
        let preserved_second = q.inner.lock().batches[second_index].capacity();
        assert!(preserved_second >= second_capacity);
    }

    #[test]
    fn wait_empty_returns_once_batch_drained() {
        let q = JobQueue::new();
        q.push(Job { kind: JobKind::Change, id: 1 });
        let q2 = std::sync::Arc::new(q);
        let q3 = q2.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = q3.pull();
        });
        q2.wait_empty();
        handle.join().unwrap();
    }
}
