//! Single-slot frame mailbox between the hardware callback and the
//! capture worker.
//!
//! Overwrite, not queue: only the latest undelivered frame is kept. A new
//! arrival replaces an unconsumed predecessor, whose buffer goes straight
//! back to the hardware, so the producer never waits on the consumer and
//! a slow consumer only ever costs staleness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::capture::pool::{FramePool, PooledBuffer};
use crate::device::CameraDevice;

/// What became of one producer submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Recorded as the pending frame; the slot was empty
    Accepted,
    /// Recorded as the pending frame after recycling an undelivered one
    ReplacedPending,
    /// Buffer does not belong to the current pool; dropped, no frame
    /// recorded and no id consumed
    Unrecognized,
}

/// A frame waiting for the worker, still owning its buffer
pub(crate) struct PendingFrame {
    pub id: u64,
    pub timestamp_ms: u64,
    pub buffer: PooledBuffer,
}

struct MailboxState {
    active: bool,
    started_at: Instant,
    frame_id: u64,
    pool: Option<FramePool>,
    pending: Option<PendingFrame>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    replaced: AtomicU64,
    unrecognized: AtomicU64,
    consumer_failures: AtomicU64,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames accepted into the slot
    pub submitted: u64,
    /// Frames handed to the consumer
    pub delivered: u64,
    /// Frames overwritten in the slot before delivery
    pub replaced: u64,
    /// Submissions dropped because the buffer was not registered
    pub unrecognized: u64,
    /// Deliveries the consumer failed or panicked on
    pub consumer_failures: u64,
}

/// Shared pending-frame slot plus the session's buffer registry.
///
/// One mutex guards all mutable pipeline state; the paired condvar wakes
/// the worker for new frames and for deactivation. Counters live outside
/// the lock.
pub(crate) struct FrameMailbox {
    state: Mutex<MailboxState>,
    frame_ready: Condvar,
    counters: CachePadded<Counters>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                active: false,
                started_at: Instant::now(),
                frame_id: 0,
                pool: None,
                pending: None,
            }),
            frame_ready: Condvar::new(),
            counters: CachePadded::new(Counters::default()),
        }
    }

    /// A panicking lock holder must not wedge the hardware callback
    /// thread, so poisoning is stripped rather than propagated.
    fn lock_state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm for a new preview session: install the pool and restart the
    /// frame clock. Frame ids keep counting across sessions.
    pub fn arm(&self, pool: FramePool) {
        let mut state = self.lock_state();
        state.active = true;
        state.started_at = Instant::now();
        state.pool = Some(pool);
        state.pending = None;
    }

    /// Tell the worker loop to exit and wake it if it is waiting.
    pub fn deactivate(&self) {
        let mut state = self.lock_state();
        state.active = false;
        self.frame_ready.notify_all();
    }

    /// Drop the registry and any unconsumed pending frame. Called after
    /// the worker has been joined; late hardware callbacks will find
    /// their buffers unrecognized from here on.
    pub fn clear_pool(&self) {
        let mut state = self.lock_state();
        if let Some(mut pool) = state.pool.take() {
            pool.clear();
        }
        state.pending = None;
    }

    /// Record `buffer` as the pending frame (producer side).
    ///
    /// An undelivered predecessor is recycled to `device` first and its id
    /// stays consumed. Unrecognized buffers are dropped without taking an
    /// id, so a recycled buffer arriving late cannot perturb numbering.
    pub fn submit(
        &self,
        buffer: PooledBuffer,
        device: Option<&dyn CameraDevice>,
    ) -> SubmitOutcome {
        let mut state = self.lock_state();
        let mut replaced = false;
        if let Some(prev) = state.pending.take() {
            trace!(
                frame_id = prev.id,
                buffer = ?prev.buffer.tag(),
                "recycling undelivered frame"
            );
            self.counters.replaced.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_replaced").increment(1);
            match device {
                Some(device) => device.enqueue_buffer(prev.buffer),
                None => drop(prev.buffer),
            }
            replaced = true;
        }
        let recognized = state
            .pool
            .as_ref()
            .is_some_and(|pool| pool.recognizes(&buffer));
        if !recognized {
            debug!(
                buffer = ?buffer.tag(),
                "skipping frame: buffer is not registered with the pool"
            );
            self.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_unrecognized").increment(1);
            return SubmitOutcome::Unrecognized;
        }
        state.frame_id += 1;
        let pending = PendingFrame {
            id: state.frame_id,
            timestamp_ms: state.started_at.elapsed().as_millis() as u64,
            buffer,
        };
        state.pending = Some(pending);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.frame_ready.notify_one();
        if replaced {
            SubmitOutcome::ReplacedPending
        } else {
            SubmitOutcome::Accepted
        }
    }

    /// Block until a frame is pending or the mailbox is deactivated
    /// (consumer side). `None` means the worker should exit.
    pub fn next_frame(&self) -> Option<PendingFrame> {
        let mut state = self.lock_state();
        while state.active && state.pending.is_none() {
            state = self
                .frame_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !state.active {
            return None;
        }
        state.pending.take()
    }

    pub fn mark_delivered(&self) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_consumer_failure(&self) {
        self.counters.consumer_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative counters since the mailbox was built
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            replaced: self.counters.replaced.load(Ordering::Relaxed),
            unrecognized: self.counters.unrecognized.load(Ordering::Relaxed),
            consumer_failures: self.counters.consumer_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FpsRange, PreviewConfiguration, Size};

    fn armed_mailbox() -> (FrameMailbox, Vec<PooledBuffer>) {
        let config = PreviewConfiguration {
            preview: Size::new(4, 4),
            picture: None,
            fps: FpsRange::new(30_000, 30_000),
            rotation_degrees: 0,
        };
        let (pool, buffers) = FramePool::for_preview(&config);
        let mailbox = FrameMailbox::new();
        mailbox.arm(pool);
        (mailbox, buffers)
    }

    #[test]
    fn submit_without_pool_is_unrecognized() {
        let (_, mut buffers) = armed_mailbox();
        let unarmed = FrameMailbox::new();
        assert_eq!(
            unarmed.submit(buffers.remove(0), None),
            SubmitOutcome::Unrecognized
        );
        assert_eq!(unarmed.stats().unrecognized, 1);
    }

    #[test]
    fn overwrite_skips_the_replaced_id() {
        let (mailbox, mut buffers) = armed_mailbox();
        assert_eq!(
            mailbox.submit(buffers.remove(0), None),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            mailbox.submit(buffers.remove(0), None),
            SubmitOutcome::ReplacedPending
        );
        let pending = mailbox.next_frame().unwrap();
        assert_eq!(pending.id, 2);
        let stats = mailbox.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.replaced, 1);
    }

    #[test]
    fn deactivated_mailbox_wakes_worker_with_none() {
        let (mailbox, mut buffers) = armed_mailbox();
        mailbox.submit(buffers.remove(0), None);
        mailbox.deactivate();
        // Even with a frame pending, deactivation wins
        assert!(mailbox.next_frame().is_none());
    }

    #[test]
    fn cleared_pool_rejects_late_arrivals() {
        let (mailbox, mut buffers) = armed_mailbox();
        mailbox.clear_pool();
        assert_eq!(
            mailbox.submit(buffers.remove(0), None),
            SubmitOutcome::Unrecognized
        );
        // The dropped submission consumed no id
        let (pool, mut fresh) = FramePool::for_preview(&PreviewConfiguration {
            preview: Size::new(4, 4),
            picture: None,
            fps: FpsRange::new(30_000, 30_000),
            rotation_degrees: 0,
        });
        mailbox.arm(pool);
        mailbox.submit(fresh.remove(0), None);
        assert_eq!(mailbox.next_frame().unwrap().id, 1);
    }
}
