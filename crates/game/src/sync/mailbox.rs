use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Latest-wins hand-off of whole buffers from one writer to one reader over
/// a fixed pool of two.
///
/// A buffer is owned by exactly one of: the writer (between
/// [`Mailbox::acquire_write`] and [`Mailbox::publish`]), the mailbox (while
/// sitting in a slot) or the reader (while a [`SnapshotGuard`] is alive).
pub struct Mailbox<T> {
    read_slot: AtomicPtr<T>,
    write_slot: AtomicPtr<T>,
    shutdown: AtomicBool,
}

// SAFETY: buffers move between threads only through the atomic slot swaps and
// are never reachable from two owners at once.
unsafe impl<T: Send> Send for Mailbox<T> {}
unsafe impl<T: Send> Sync for Mailbox<T> {}

impl<T> Mailbox<T> {
    /// `published` is readable right away, `spare` is the writer's first
    /// buffer.
    pub fn new(published: T, spare: T) -> Self {
        Self {
            read_slot: AtomicPtr::new(Box::into_raw(Box::new(published))),
            write_slot: AtomicPtr::new(Box::into_raw(Box::new(spare))),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Takes the free buffer, spinning until the reader hands one back.
    /// Returns `None` once the mailbox is shut down.
    pub fn acquire_write(&self) -> Option<Box<T>> {
        loop {
            let buf = self.write_slot.swap(ptr::null_mut(), Ordering::Acquire);
            if !buf.is_null() {
                // SAFETY: non-null slot values always come from Box::into_raw
                // and the swap made us their only owner.
                return Some(unsafe { Box::from_raw(buf) });
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Makes `buf` the readable snapshot. An unread snapshot it replaces is
    /// recycled into the write slot. The writer is expected to call
    /// [`Mailbox::acquire_write`] right after publishing so it always holds
    /// one of the two buffers.
    pub fn publish(&self, buf: Box<T>) {
        let old = self.read_slot.swap(Box::into_raw(buf), Ordering::AcqRel);
        if old.is_null() {
            return;
        }
        let prev = self.write_slot.swap(old, Ordering::Release);
        debug_assert!(prev.is_null(), "mailbox pool exceeded two buffers");
        if !prev.is_null() {
            // SAFETY: see `acquire_write`.
            drop(unsafe { Box::from_raw(prev) });
        }
    }

    pub fn try_read(&self) -> Option<SnapshotGuard<'_, T>> {
        let buf = self.read_slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if buf.is_null() {
            return None;
        }
        Some(SnapshotGuard {
            mailbox: self,
            // SAFETY: see `acquire_write`.
            buf: Some(unsafe { Box::from_raw(buf) }),
        })
    }

    /// Releases a spinning writer and makes every further acquire fail.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Returns a read buffer to the pool. The write slot can still hold the
    /// other buffer for the few instructions between a publish and the
    /// writer's next acquire, so this waits for it to drain.
    fn release(&self, buf: Box<T>) {
        let buf = Box::into_raw(buf);
        loop {
            match self.write_slot.compare_exchange_weak(
                ptr::null_mut(),
                buf,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(_) if self.is_shutdown() => {
                    // SAFETY: the failed exchange left us the only owner.
                    drop(unsafe { Box::from_raw(buf) });
                    return;
                }
                Err(_) => {
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        for slot in [&mut self.read_slot, &mut self.write_slot] {
            let buf = *slot.get_mut();
            if !buf.is_null() {
                // SAFETY: we have exclusive access and the pointer came from
                // Box::into_raw.
                drop(unsafe { Box::from_raw(buf) });
            }
        }
    }
}

/// Read access to a published snapshot; returns the buffer to the pool on
/// drop.
pub struct SnapshotGuard<'a, T> {
    mailbox: &'a Mailbox<T>,
    buf: Option<Box<T>>,
}

impl<T> SnapshotGuard<'_, T> {
    pub fn release(self) {}
}

impl<T> Deref for SnapshotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.buf {
            Some(buf) => buf,
            None => unreachable!("snapshot guard used after release"),
        }
    }
}

impl<T> DerefMut for SnapshotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.buf {
            Some(buf) => buf,
            None => unreachable!("snapshot guard used after release"),
        }
    }
}

impl<T> Drop for SnapshotGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.mailbox.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn initial_snapshot_is_readable_once() {
        let mailbox = Mailbox::new(1u32, 0u32);
        assert_eq!(*mailbox.try_read().unwrap(), 1);
        assert!(mailbox.try_read().is_none());
    }

    #[test]
    fn second_publish_wins_and_recycles_the_first() {
        let mailbox = Mailbox::new(0u32, 0u32);

        let mut buf = mailbox.acquire_write().unwrap();
        *buf = 1;
        let first = &*buf as *const u32;
        mailbox.publish(buf);

        let mut buf = mailbox.acquire_write().unwrap();
        *buf = 2;
        mailbox.publish(buf);

        let snapshot = mailbox.try_read().unwrap();
        assert_eq!(*snapshot, 2);
        assert!(mailbox.try_read().is_none());

        let next = mailbox.acquire_write().unwrap();
        assert_eq!(&*next as *const u32, first);
        assert_eq!(*next, 1);

        snapshot.release();
        mailbox.publish(next);
        assert!(mailbox.acquire_write().is_some());
    }

    #[test]
    fn writer_spins_until_reader_releases() {
        let mailbox = Arc::new(Mailbox::new(0u32, 0u32));
        let held = mailbox.try_read().unwrap();
        let buf = mailbox.acquire_write().unwrap();
        mailbox.publish(buf);

        let writer = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || mailbox.acquire_write().is_some())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!writer.is_finished());

        drop(held);
        assert!(writer.join().unwrap());
    }

    #[test]
    fn shutdown_releases_a_spinning_writer() {
        let mailbox = Arc::new(Mailbox::new(0u32, 0u32));
        let _held = mailbox.acquire_write().unwrap();

        let writer = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || mailbox.acquire_write().is_none())
        };
        mailbox.shutdown();
        assert!(writer.join().unwrap());
    }
}
