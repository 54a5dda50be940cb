#![allow(unsafe_code)]
//! Memory-mapped single-producer/single-consumer byte ring.
//!
//! `RingChannel` is the only memory shared between the transform and sink
//! domains. The backing region is a `memmap2` mapping, either anonymous (both
//! stages in one process) or file-backed so a second process can attach with
//! [`RingChannel::open`].
//!
//! # Memory Layout
//! ```text
//! [128-byte header] [capacity-byte data region]
//!
//! Header:
//!   magic: u64              (0x4B_50_52_49_4E_47_00_01)
//!   capacity: u64           (size of data region, C)
//!   write_head: AtomicU64   (bytes ever published by the producer)
//!   _pad0: [u8; 40]         (keeps the cursors on separate cache lines)
//!   read_tail: AtomicU64    (bytes ever consumed by the consumer)
//!   _pad1: [u8; 56]
//! ```
//!
//! # Publication protocol
//!
//! Both cursors increase monotonically and are reduced modulo C only to index
//! the data region. The count held is `write_head - read_tail`.
//!
//! - The producer keeps its own copy of `write_head`, writes the slot, then
//!   publishes the new head with a Release store. It reads `read_tail` with
//!   Acquire, so it never reuses a slot the consumer has not finished reading.
//! - The consumer keeps its own copy of `read_tail`, reads `write_head` with
//!   Acquire before touching a slot, and publishes its tail with Release.
//!
//! Neither side ever reads its own cursor back from shared memory after
//! attaching, and the other side's cursor is only used to derive the count,
//! clamped to `[0, C]`. A full ring drops the new byte.

use crate::error::{AppResult, PipelineError};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Magic number for ring header validation
const MAGIC: u64 = 0x4B_50_52_49_4E_47_00_01;

/// Size of the ring header in bytes (two cache lines)
const HEADER_SIZE: usize = 128;

#[repr(C)]
struct RingHeader {
    magic: u64,
    capacity: u64,
    write_head: AtomicU64,
    _pad0: [u8; 40],
    read_tail: AtomicU64,
    _pad1: [u8; 56],
}

const _: () = assert!(
    std::mem::size_of::<RingHeader>() == HEADER_SIZE,
    "RingHeader size must equal HEADER_SIZE (128 bytes)"
);

/// Result of a producer push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The byte is now visible to the consumer.
    Accepted,
    /// The ring held C bytes; the byte was discarded.
    Dropped,
}

/// The mapped region both handles point into.
struct SharedRing {
    path: Option<PathBuf>,
    // Keeps the mapping alive for the raw pointers below.
    _mmap: MmapMut,
    /// SAFETY: points to the start of the mapping, valid while `_mmap` lives
    header: *const RingHeader,
    /// SAFETY: points HEADER_SIZE bytes into the mapping, `capacity` bytes long
    data_ptr: *mut u8,
    capacity: u64,
}

// SAFETY: the mapping is owned by SharedRing. Header fields are only touched
// through atomics, and each data slot is written by the producer strictly
// before the Release store that hands it to the consumer (and vice versa).
unsafe impl Send for SharedRing {}

// SAFETY: see above; shared access never produces overlapping non-atomic
// reads and writes of the same slot.
unsafe impl Sync for SharedRing {}

impl SharedRing {
    fn header(&self) -> &RingHeader {
        // SAFETY: header is valid and aligned for the lifetime of self
        unsafe { &*self.header }
    }

    fn slot(&self, position: u64) -> *mut u8 {
        let index = (position % self.capacity) as usize;
        debug_assert!(index < self.capacity as usize);
        // SAFETY: index < capacity and the data region is capacity bytes long
        unsafe { self.data_ptr.add(index) }
    }

    fn initialize(mut mmap: MmapMut, capacity: u64, path: Option<PathBuf>) -> Self {
        debug_assert!(mmap.len() >= HEADER_SIZE + capacity as usize);
        // Mappings are page aligned, so the header is suitably aligned.
        let header = mmap.as_mut_ptr() as *mut RingHeader;
        // SAFETY: the mapping is at least HEADER_SIZE bytes and exclusively ours
        unsafe {
            header.write(RingHeader {
                magic: MAGIC,
                capacity,
                write_head: AtomicU64::new(0),
                _pad0: [0; 40],
                read_tail: AtomicU64::new(0),
                _pad1: [0; 56],
            });
        }
        // SAFETY: the mapping is HEADER_SIZE + capacity bytes
        let data_ptr = unsafe { mmap.as_mut_ptr().add(HEADER_SIZE) };

        Self {
            path,
            _mmap: mmap,
            header,
            data_ptr,
            capacity,
        }
    }

    /// Bytes currently held, as seen from outside either handle.
    fn len(&self) -> u64 {
        let head = self.header().write_head.load(Ordering::Acquire);
        let tail = self.header().read_tail.load(Ordering::Acquire);
        head.saturating_sub(tail).min(self.capacity)
    }
}

/// Fixed-capacity shared byte ring, before it is split into its two ends.
///
/// # Example
/// ```
/// use keypipe::data::ring_buffer::{PushOutcome, RingChannel};
///
/// let (mut tx, mut rx) = RingChannel::anonymous(4)?.split();
/// assert_eq!(tx.push(b'U'), PushOutcome::Accepted);
/// assert_eq!(rx.pop(), Some(b'U'));
/// assert!(rx.is_empty());
/// # Ok::<(), keypipe::error::PipelineError>(())
/// ```
pub struct RingChannel {
    shared: Arc<SharedRing>,
}

impl std::fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingChannel")
            .field("path", &self.shared.path)
            .field("capacity", &self.shared.capacity)
            .field("len", &self.shared.len())
            .finish()
    }
}

impl RingChannel {
    /// Create a ring in an anonymous mapping.
    pub fn anonymous(capacity: usize) -> AppResult<Self> {
        check_capacity(capacity)?;
        let mmap = MmapOptions::new()
            .len(HEADER_SIZE + capacity)
            .map_anon()?;
        Ok(Self {
            shared: Arc::new(SharedRing::initialize(mmap, capacity as u64, None)),
        })
    }

    /// Create a fresh ring backed by a file.
    ///
    /// Any existing file is truncated: in-flight bytes never survive a restart.
    pub fn create(path: &Path, capacity: usize) -> AppResult<Self> {
        check_capacity(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((HEADER_SIZE + capacity) as u64)?;

        // SAFETY: we just sized the file; other mappings of it go through the
        // same header protocol
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        tracing::debug!(path = %path.display(), capacity, "Created ring backing file");
        Ok(Self {
            shared: Arc::new(SharedRing::initialize(
                mmap,
                capacity as u64,
                Some(path.to_path_buf()),
            )),
        })
    }

    /// Attach to a ring previously made by [`RingChannel::create`].
    pub fn open(path: &Path) -> AppResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(PipelineError::RingLayout(format!(
                "{} is {file_len} bytes, smaller than the {HEADER_SIZE}-byte header",
                path.display()
            )));
        }

        // SAFETY: length checked above; the header is validated before use
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = mmap.as_mut_ptr() as *const RingHeader;
        // SAFETY: at least HEADER_SIZE bytes are mapped
        let (magic, capacity) = unsafe { ((*header).magic, (*header).capacity) };

        if magic != MAGIC {
            return Err(PipelineError::RingLayout(format!(
                "Invalid ring magic number: expected 0x{MAGIC:016X}, got 0x{magic:016X}"
            )));
        }
        if capacity == 0 || HEADER_SIZE as u64 + capacity > file_len {
            return Err(PipelineError::RingLayout(format!(
                "Ring capacity {capacity} does not fit a {file_len}-byte region"
            )));
        }

        // SAFETY: HEADER_SIZE + capacity <= mapping length
        let data_ptr = unsafe { mmap.as_mut_ptr().add(HEADER_SIZE) };

        Ok(Self {
            shared: Arc::new(SharedRing {
                path: Some(path.to_path_buf()),
                _mmap: mmap,
                header,
                data_ptr,
                capacity,
            }),
        })
    }

    /// Capacity C in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.shared.len() as usize
    }

    /// True when nothing is waiting to be consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into the producer and consumer ends.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let consumer = RingConsumer::attach(Arc::clone(&self.shared));
        (self.into_producer(), consumer)
    }

    /// Keep only the producer end (the consumer lives in another process).
    pub fn into_producer(self) -> RingProducer {
        let head = self.shared.header().write_head.load(Ordering::Acquire);
        RingProducer {
            shared: self.shared,
            head,
        }
    }

    /// Keep only the consumer end (the producer lives in another process).
    pub fn into_consumer(self) -> RingConsumer {
        RingConsumer::attach(self.shared)
    }
}

fn check_capacity(capacity: usize) -> AppResult<()> {
    if capacity == 0 {
        return Err(PipelineError::Configuration(
            "ring capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Writing end of a [`RingChannel`]. Owned by the transform stage.
pub struct RingProducer {
    shared: Arc<SharedRing>,
    head: u64,
}

impl std::fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingProducer")
            .field("head", &self.head)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl RingProducer {
    /// Push one byte, dropping it if the ring is full.
    pub fn push(&mut self, byte: u8) -> PushOutcome {
        let header = self.shared.header();
        let tail = header.read_tail.load(Ordering::Acquire);
        if self.head.wrapping_sub(tail) >= self.shared.capacity {
            return PushOutcome::Dropped;
        }

        // SAFETY: the slot at `head` is outside [tail, head), so the consumer
        // is not reading it
        unsafe { self.shared.slot(self.head).write(byte) };

        self.head = self.head.wrapping_add(1);
        header.write_head.store(self.head, Ordering::Release);
        PushOutcome::Accepted
    }

    /// Bytes currently held, from the producer's point of view.
    pub fn len(&self) -> usize {
        let tail = self.shared.header().read_tail.load(Ordering::Acquire);
        self.head.saturating_sub(tail).min(self.shared.capacity) as usize
    }

    /// True when nothing is waiting to be consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the next push would be dropped.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Capacity C in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }
}

/// Reading end of a [`RingChannel`]. Owned by the sink stage.
pub struct RingConsumer {
    shared: Arc<SharedRing>,
    tail: u64,
}

impl std::fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingConsumer")
            .field("tail", &self.tail)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl RingConsumer {
    fn attach(shared: Arc<SharedRing>) -> Self {
        let tail = shared.header().read_tail.load(Ordering::Acquire);
        Self { shared, tail }
    }

    /// Pop the oldest byte, or `None` when the ring is empty.
    ///
    /// An empty pop leaves the cursors untouched.
    pub fn pop(&mut self) -> Option<u8> {
        let header = self.shared.header();
        let head = header.write_head.load(Ordering::Acquire);
        if head.saturating_sub(self.tail).min(self.shared.capacity) == 0 {
            return None;
        }

        // SAFETY: the Acquire load of `head` makes the producer's write of this
        // slot visible, and the producer will not touch it until we publish
        let byte = unsafe { self.shared.slot(self.tail).read() };

        self.tail = self.tail.wrapping_add(1);
        header.read_tail.store(self.tail, Ordering::Release);
        Some(byte)
    }

    /// Bytes available to pop, clamped to `[0, C]`.
    pub fn len(&self) -> usize {
        let head = self.shared.header().write_head.load(Ordering::Acquire);
        head.saturating_sub(self.tail).min(self.shared.capacity) as usize
    }

    /// True when a pop would report empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity C in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Pop everything currently available, at most C bytes.
    pub fn drain(&mut self) -> Drain<'_> {
        let remaining = self.capacity();
        Drain {
            consumer: self,
            remaining,
        }
    }
}

/// Iterator returned by [`RingConsumer::drain`].
///
/// Stops at the first empty observation, so bytes pushed while draining may or
/// may not be included. A well-behaved producer can never have more than C
/// bytes outstanding, so a drain that reaches C pops ends there even if the
/// peer's head claims otherwise.
pub struct Drain<'a> {
    consumer: &'a mut RingConsumer,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let byte = self.consumer.pop()?;
        self.remaining -= 1;
        Some(byte)
    }
}
