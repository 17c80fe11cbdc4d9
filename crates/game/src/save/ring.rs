use std::cell::UnsafeCell;
use std::ops::Deref;
use std::ptr;
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use super::SaveCursor;

/// Edge-triggered notification channel attached to a ring. Signals coalesce
/// into a pending count; a waiter that arrives after a signal still wakes.
#[derive(Debug, Default)]
pub struct Wake {
    pending: AtomicU64,
    notify: Notify,
}

impl Wake {
    pub fn signal(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        self.notify.notify_one();
    }

    /// Returns how many signals arrived since the last drain.
    pub fn drain(&self) -> u64 {
        self.pending.swap(0, Ordering::Acquire)
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

/// Bounded single-producer single-consumer byte ring.
///
/// Positions only ever grow; the slot for a position is `pos % capacity`.
/// Bytes in `[read, write)` belong to the reader, bytes in
/// `[write, read + capacity)` belong to the writer.
pub struct SaveRing {
    buf: Box<[UnsafeCell<u8>]>,
    read: AtomicU64,
    write: AtomicU64,
    closed: AtomicBool,
    wake: Wake,
}

// SAFETY: the writer and reader halves touch disjoint byte ranges and hand
// ranges over through the release stores in `commit` paired with the
// acquire loads when a cursor is opened.
unsafe impl Sync for SaveRing {}

impl SaveRing {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (RingWriter, RingReader) {
        let capacity = capacity.max(1);
        let ring = Arc::new(Self {
            buf: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            read: AtomicU64::new(0),
            write: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake: Wake::default(),
        });
        (
            RingWriter {
                ring: Arc::clone(&ring),
            },
            RingReader { ring },
        )
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes committed by the writer and not yet retired by the reader.
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.saturating_sub(read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-way latch; the other side is expected to tear down on seeing it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.signal();
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn wake(&self) -> &Wake {
        &self.wake
    }

    pub fn wake_signal(&self) {
        self.wake.signal();
    }

    pub fn wake_drain(&self) -> u64 {
        self.wake.drain()
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.buf.as_ptr())
    }

    fn index(&self, pos: u64) -> usize {
        (pos % self.buf.len() as u64) as usize
    }

    /// Length of the contiguous run starting at `pos`, capped at `len`.
    fn run(&self, pos: u64, len: u64) -> usize {
        let idx = self.index(pos);
        (self.buf.len() - idx).min(len as usize)
    }

    // SAFETY: caller must own `[pos, pos + src.len())` and `src.len()` must
    // not exceed the capacity.
    unsafe fn copy_in(&self, pos: u64, src: &[u8]) {
        let idx = self.index(pos);
        let first = src.len().min(self.buf.len() - idx);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(idx), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.base(), src.len() - first);
        }
    }

    // SAFETY: caller must own `[pos, pos + dst.len())` and `dst.len()` must
    // not exceed the capacity.
    unsafe fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let idx = self.index(pos);
        let first = dst.len().min(self.buf.len() - idx);
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(idx), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.base(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }
}

/// Producer half of a [`SaveRing`].
pub struct RingWriter {
    ring: Arc<SaveRing>,
}

impl RingWriter {
    /// Opens a cursor over the free space available right now. Nothing
    /// becomes visible to the reader until the cursor is committed.
    pub fn write(&mut self) -> WriteCursor<'_> {
        let ring = &*self.ring;
        let write = ring.write.load(Ordering::Relaxed);
        let read = ring.read.load(Ordering::Acquire);
        WriteCursor {
            ring,
            base: write,
            it: write,
            end: read + ring.capacity() as u64,
        }
    }

    pub fn free(&self) -> usize {
        self.ring.capacity() - self.ring.len()
    }
}

impl Deref for RingWriter {
    type Target = SaveRing;

    fn deref(&self) -> &SaveRing {
        &self.ring
    }
}

/// Consumer half of a [`SaveRing`].
pub struct RingReader {
    ring: Arc<SaveRing>,
}

impl RingReader {
    /// Opens a cursor over the bytes available right now. Reading through it
    /// is non-destructive until the cursor is committed.
    pub fn read(&mut self) -> ReadCursor<'_> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        let write = ring.write.load(Ordering::Acquire);
        ReadCursor {
            ring,
            base: read,
            it: read,
            end: write,
        }
    }
}

impl Deref for RingReader {
    type Target = SaveRing;

    fn deref(&self) -> &SaveRing {
        &self.ring
    }
}

pub struct WriteCursor<'a> {
    ring: &'a SaveRing,
    base: u64,
    it: u64,
    end: u64,
}

impl WriteCursor<'_> {
    /// Contiguous free bytes at the cursor, for writing in place.
    pub fn chunk_mut(&mut self) -> &mut [u8] {
        let len = self.ring.run(self.it, self.end - self.it);
        let idx = self.ring.index(self.it);
        // SAFETY: `[it, it + len)` lies inside the writer-owned range and the
        // returned borrow is tied to the cursor's exclusive borrow.
        unsafe { slice::from_raw_parts_mut(self.ring.base().add(idx), len) }
    }

    /// Marks `n` bytes written through [`WriteCursor::chunk_mut`].
    pub fn advance(&mut self, n: usize) {
        self.it = (self.it + n as u64).min(self.end);
    }

    /// Publishes everything written so far and returns the byte count.
    pub fn commit(self) -> usize {
        self.ring.write.store(self.it, Ordering::Release);
        (self.it - self.base) as usize
    }
}

impl SaveCursor for WriteCursor<'_> {
    fn write(&mut self, src: &[u8]) -> usize {
        let len = src.len().min((self.end - self.it) as usize);
        // SAFETY: `[it, it + len)` lies inside the writer-owned range.
        unsafe { self.ring.copy_in(self.it, &src[..len]) };
        self.it += len as u64;
        len
    }

    fn read(&mut self, _: &mut [u8]) -> usize {
        0
    }

    fn len(&self) -> usize {
        (self.it - self.base) as usize
    }

    fn cap(&self) -> usize {
        (self.end - self.base) as usize
    }
}

pub struct ReadCursor<'a> {
    ring: &'a SaveRing,
    base: u64,
    it: u64,
    end: u64,
}

impl ReadCursor<'_> {
    /// Contiguous readable bytes at the cursor.
    pub fn chunk(&self) -> &[u8] {
        let len = self.ring.run(self.it, self.end - self.it);
        let idx = self.ring.index(self.it);
        // SAFETY: `[it, it + len)` lies inside the reader-owned range, which
        // the writer won't touch until it is retired by a commit.
        unsafe { slice::from_raw_parts(self.ring.base().add(idx), len) }
    }

    /// Skips up to `n` bytes and returns how many were skipped.
    pub fn consume(&mut self, n: usize) -> usize {
        let len = n.min((self.end - self.it) as usize);
        self.it += len as u64;
        len
    }

    /// Retires everything read or consumed so far and returns the byte count.
    pub fn commit(self) -> usize {
        self.ring.read.store(self.it, Ordering::Release);
        (self.it - self.base) as usize
    }
}

impl SaveCursor for ReadCursor<'_> {
    fn write(&mut self, _: &[u8]) -> usize {
        0
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len().min((self.end - self.it) as usize);
        // SAFETY: `[it, it + len)` lies inside the reader-owned range.
        unsafe { self.ring.copy_out(self.it, &mut dst[..len]) };
        self.it += len as u64;
        len
    }

    fn len(&self) -> usize {
        (self.it - self.base) as usize
    }

    fn cap(&self) -> usize {
        (self.end - self.base) as usize
    }
}
