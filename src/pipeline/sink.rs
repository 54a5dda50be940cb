//! Sink stage: batch transformed bytes and commit them on a timer.
//!
//! # Cycle
//!
//! ```text
//!            elapsed < W
//!   +------+ ----------> (yield)
//!   | IDLE |
//!   +------+ elapsed >= W +----------+  pending empty
//!      ^  ---------------> | DRAINING | ---------------> IDLE
//!      |                   +----------+
//!      |                        | pending non-empty
//!      |   commit ok / failed   v
//!      +--------------------- +----------+
//!                             | FLUSHING |
//!                             +----------+
//! ```
//!
//! A successful commit advances `write_offset` by exactly the committed
//! length and empties the pending buffer. A failed commit leaves both
//! untouched; the same bytes are offered again next window. If the storage
//! wrote a prefix before failing, that prefix is written twice (at-least-once).
//!
//! Notifications from the transform stage only wake the loop early. The
//! drain loop stops when the ring reports empty or after one ring capacity
//! of bytes, so any number of bytes (or none) may be waiting when a window
//! opens.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::config::SinkConfig;
use crate::data::ring_buffer::RingConsumer;
use crate::data::storage::LogStorage;
use crate::error::AppResult;
use crate::ipc::{ChannelId, NotificationSet};

/// Where the sink is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Waiting for the flush window to elapse
    Idle,
    /// Moving bytes from the ring into the pending buffer
    Draining,
    /// Committing the pending buffer
    Flushing,
}

/// What one call to [`SinkStage::poll_cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The window had not elapsed; nothing was touched.
    Idle,
    /// The window elapsed but there was nothing to commit.
    DrainedEmpty,
    /// `bytes` were committed.
    Flushed {
        /// Length of the commit
        bytes: usize,
    },
    /// The commit failed; `pending` bytes are kept for the next window.
    FlushFailed {
        /// Bytes still pending
        pending: usize,
    },
}

/// Bounded append-only accumulator owned by the sink.
#[derive(Debug, Clone)]
pub struct PendingBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl PendingBuffer {
    /// Empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one byte. Returns `false`, leaving the buffer unchanged, when full.
    pub fn append(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes.push(byte);
        true
    }

    /// Pending bytes in arrival order.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of pending bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when further appends are rejected.
    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.capacity
    }

    /// Capacity P.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget everything pending.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Counters kept by the sink stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Bytes moved from the ring into the pending buffer
    pub bytes_drained: u64,
    /// Bytes popped from the ring but lost to a full pending buffer
    pub bytes_dropped: u64,
    /// Successful commits
    pub flushes: u64,
    /// Failed commits
    pub failed_flushes: u64,
    /// Bytes durably committed
    pub bytes_committed: u64,
    /// Notifications received on the expected channel
    pub notifications: u64,
    /// Read-backs that did not match what was committed
    pub verify_mismatches: u64,
}

/// State owned by the sink domain.
pub struct SinkStage<S> {
    consumer: RingConsumer,
    notifications: NotificationSet,
    notify_channel: ChannelId,
    storage: S,
    pending: PendingBuffer,
    write_offset: u64,
    last_flush: Instant,
    flush_window: Duration,
    idle_interval: Duration,
    verify_commits: bool,
    flush_on_shutdown: bool,
    state: SinkState,
    stats: SinkStats,
}

impl<S> std::fmt::Debug for SinkStage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkStage")
            .field("state", &self.state)
            .field("write_offset", &self.write_offset)
            .field("pending", &self.pending.len())
            .field("flush_window", &self.flush_window)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<S: LogStorage> SinkStage<S> {
    /// Reinitialize storage and prepare the sink.
    ///
    /// Any previous log is erased so `write_offset` starts at zero. The first
    /// window is measured from now.
    pub async fn start(
        consumer: RingConsumer,
        notifications: NotificationSet,
        notify_channel: ChannelId,
        mut storage: S,
        config: &SinkConfig,
    ) -> AppResult<Self> {
        if let Err(e) = storage.erase().await {
            tracing::warn!(error = %e, "Could not erase previous log; overwriting from offset 0");
        }
        tracing::info!(
            flush_window = ?config.flush_window,
            pending_capacity = config.pending_capacity,
            notify_channel,
            "Sink stage ready"
        );

        Ok(Self {
            consumer,
            notifications,
            notify_channel,
            storage,
            pending: PendingBuffer::new(config.pending_capacity),
            write_offset: 0,
            last_flush: Instant::now(),
            flush_window: config.flush_window,
            idle_interval: config.idle_interval,
            verify_commits: config.verify_commits,
            flush_on_shutdown: config.flush_on_shutdown,
            state: SinkState::Idle,
            stats: SinkStats::default(),
        })
    }

    /// Current cycle state.
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Bytes durably committed so far.
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Bytes waiting for the next commit.
    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    /// Counters so far.
    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Move every byte currently in the ring into the pending buffer.
    ///
    /// Bytes that do not fit are discarded. Returns the number kept.
    pub fn drain(&mut self) -> usize {
        let mut kept = 0usize;
        let mut dropped = 0u64;
        for byte in self.consumer.drain() {
            if self.pending.append(byte) {
                kept += 1;
            } else {
                dropped += 1;
            }
        }

        self.stats.bytes_drained += kept as u64;
        if dropped > 0 {
            self.stats.bytes_dropped += dropped;
            tracing::warn!(
                dropped,
                capacity = self.pending.capacity(),
                "Pending buffer full; discarded drained bytes"
            );
        }
        kept
    }

    /// Commit the pending buffer at the current offset.
    ///
    /// On success returns the committed length. On failure the pending
    /// buffer and offset are left exactly as they were.
    pub async fn flush(&mut self) -> AppResult<usize> {
        let len = self.pending.len();
        if len == 0 {
            return Ok(0);
        }

        let offset = self.write_offset;
        if let Err(e) = self.storage.commit(self.pending.as_slice(), offset).await {
            self.stats.failed_flushes += 1;
            tracing::warn!(
                error = %e,
                offset,
                pending = len,
                "Commit failed; keeping pending bytes for the next window"
            );
            return Err(e);
        }

        if self.verify_commits {
            self.verify(offset).await;
        }

        self.write_offset += len as u64;
        self.pending.clear();
        self.stats.flushes += 1;
        self.stats.bytes_committed += len as u64;
        tracing::info!(offset, bytes = len, write_offset = self.write_offset, "Committed pending bytes");
        Ok(len)
    }

    async fn verify(&mut self, offset: u64) {
        let expected = self.pending.as_slice();
        match self.storage.read(expected.len(), offset).await {
            Ok(read_back) if read_back == expected => {
                tracing::debug!(offset, bytes = read_back.len(), "Read-back matches commit");
            }
            Ok(read_back) => {
                self.stats.verify_mismatches += 1;
                tracing::warn!(
                    offset,
                    expected = expected.len(),
                    got = read_back.len(),
                    "Read-back differs from committed bytes"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, offset, "Read-back after commit failed");
            }
        }
    }

    /// Run one IDLE -> DRAINING -> FLUSHING -> IDLE cycle as of `now`.
    ///
    /// `now` only decides whether the window has elapsed. After a commit
    /// attempt the next window starts from the moment the attempt finished,
    /// so time spent in a slow commit does not count toward the next window.
    pub async fn poll_cycle(&mut self, now: Instant) -> CycleOutcome {
        if now.saturating_duration_since(self.last_flush) < self.flush_window {
            self.state = SinkState::Idle;
            return CycleOutcome::Idle;
        }

        self.state = SinkState::Draining;
        self.drain();
        if self.pending.is_empty() {
            self.state = SinkState::Idle;
            return CycleOutcome::DrainedEmpty;
        }

        self.state = SinkState::Flushing;
        let outcome = match self.flush().await {
            Ok(bytes) => CycleOutcome::Flushed { bytes },
            Err(_) => CycleOutcome::FlushFailed {
                pending: self.pending.len(),
            },
        };
        // Measured after the commit. A failed attempt also restarts the window.
        self.last_flush = Instant::now();
        self.state = SinkState::Idle;
        outcome
    }

    /// Record a notification on `channel`.
    pub fn notified(&mut self, channel: ChannelId) {
        if channel == self.notify_channel {
            self.stats.notifications += 1;
            tracing::trace!(channel, "Sink notified");
        } else {
            tracing::warn!(channel, "Sink received unexpected notification");
        }
    }

    fn dispatch_notifications(&mut self) {
        for channel in self.notifications.take_pending() {
            self.notified(channel);
        }
    }

    /// Cycle until `shutdown` flips to `true`, then return the counters.
    #[tracing::instrument(name = "sink", skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SinkStats {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.dispatch_notifications();

            match self.poll_cycle(Instant::now()).await {
                CycleOutcome::Idle | CycleOutcome::DrainedEmpty => {
                    if !idle(self.idle_interval, &self.notifications, &mut shutdown).await {
                        break;
                    }
                }
                CycleOutcome::Flushed { .. } | CycleOutcome::FlushFailed { .. } => {}
            }
        }

        self.dispatch_notifications();
        if self.flush_on_shutdown {
            self.drain();
            if !self.pending.is_empty() && self.flush().await.is_err() {
                tracing::warn!(
                    lost = self.pending.len(),
                    "Final commit failed; pending bytes are lost"
                );
            }
        }
        tracing::info!(
            write_offset = self.write_offset,
            committed = self.stats.bytes_committed,
            "Sink stage stopped"
        );
        self.stats
    }
}

/// Wait for the next cycle. Returns `false` when the loop should stop.
async fn idle(
    interval: Duration,
    notifications: &NotificationSet,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if interval.is_zero() {
        tokio::task::yield_now().await;
        return !*shutdown.borrow();
    }
    tokio::select! {
        _ = sleep(interval) => true,
        _ = notifications.wait() => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
