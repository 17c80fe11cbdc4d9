use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Queue<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: a slot is written only by the producer before the release store
// of `tail` and read only by the consumer after the acquire load of `tail`;
// the symmetric handoff on `head` returns the slot to the producer.
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Drop for Queue<T, N> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        for pos in head..tail {
            // SAFETY: slots in `[head, tail)` hold initialized values that
            // were never popped.
            unsafe { self.slots[pos % N].get_mut().assume_init_drop() };
        }
    }
}

/// Creates a bounded single-producer single-consumer queue with `N` slots.
pub fn bounded<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let queue = Arc::new(Queue {
        slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        Producer {
            queue: Arc::clone(&queue),
        },
        Consumer { queue },
    )
}

pub struct Producer<T, const N: usize> {
    queue: Arc<Queue<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Hands the value back when every slot is taken.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let queue = &*self.queue;
        let tail = queue.tail.load(Ordering::Relaxed);
        let head = queue.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == N {
            return Err(value);
        }

        // SAFETY: the slot at `tail` is outside `[head, tail)` so the consumer
        // does not touch it until the store below publishes it.
        unsafe { (*queue.slots[tail % N].get()).write(value) };
        queue.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub fn len(&self) -> usize {
        len(&self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

pub struct Consumer<T, const N: usize> {
    queue: Arc<Queue<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    pub fn pop(&mut self) -> Option<T> {
        let queue = &*self.queue;
        let head = queue.head.load(Ordering::Relaxed);
        let tail = queue.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        // SAFETY: the slot at `head` was initialized by the producer before
        // the release store we just observed and isn't reused until `head`
        // moves past it.
        let value = unsafe { (*queue.slots[head % N].get()).assume_init_read() };
        queue.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        len(&self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the producer half has been dropped.
    pub fn is_detached(&self) -> bool {
        Arc::strong_count(&self.queue) == 1
    }
}

fn len<T, const N: usize>(queue: &Queue<T, N>) -> usize {
    let tail = queue.tail.load(Ordering::Acquire);
    let head = queue.head.load(Ordering::Acquire);
    tail.wrapping_sub(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_to_capacity_then_reports_full() {
        let (mut tx, mut rx) = bounded::<u32, 8>();
        for i in 0..8 {
            assert!(tx.push(i).is_ok());
        }
        assert!(tx.is_full());
        assert_eq!(tx.push(8), Err(8));

        assert_eq!(rx.pop(), Some(0));
        assert!(tx.push(8).is_ok());
        assert_eq!(tx.push(9), Err(9));
    }

    #[test]
    fn pops_in_submission_order() {
        let (mut tx, mut rx) = bounded::<String, 4>();
        for word in ["a", "b", "c"] {
            tx.push(word.to_string()).unwrap();
        }
        assert_eq!(rx.pop().as_deref(), Some("a"));
        tx.push("d".to_string()).unwrap();
        let rest: Vec<_> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(rest, ["b", "c", "d"]);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn unpopped_values_are_dropped_with_the_queue() {
        let marker = Arc::new(());
        let (mut tx, rx) = bounded::<Arc<()>, 4>();
        tx.push(Arc::clone(&marker)).unwrap();
        tx.push(Arc::clone(&marker)).unwrap();
        assert_eq!(Arc::strong_count(&marker), 3);

        drop(tx);
        assert!(rx.is_detached());
        drop(rx);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn crosses_threads_without_loss() {
        let (mut tx, mut rx) = bounded::<u64, 16>();
        let producer = std::thread::spawn(move || {
            for i in 0..10_000u64 {
                let mut value = i;
                while let Err(back) = tx.push(value) {
                    value = back;
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(value) = rx.pop() {
                assert_eq!(value, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
