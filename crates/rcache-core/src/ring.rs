//! Single-producer single-consumer ring queue.
//!
//! Used to hand accepted connections from the acceptor thread to the worker
//! thread. One slot is kept as a sentinel so full and empty are
//! distinguishable without a separate counter:
//!
//! - empty: `rpos == wpos`
//! - full: `(wpos + 1) % nslot == rpos`
//!
//! The producer publishes a slot by storing `wpos` with release ordering;
//! the consumer observing the new `wpos` with an acquire load is guaranteed
//! to observe the slot contents. Push and pop are O(1) and never block.
//!
//! The producer/consumer handles returned by [`ring_pair`] are the only way
//! to touch the ring, which pins the single-producer single-consumer
//! contract into the type system.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default hand-off capacity; also the worker's per-wakeup drain bound.
pub const RING_DEFAULT_CAP: usize = 1024;

struct RingArray<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    rpos: AtomicUsize,
    wpos: AtomicUsize,
}

// The handles guarantee one pusher and one popper; slot hand-off is ordered
// by the release/acquire pair on wpos (and rpos for reuse).
unsafe impl<T: Send> Send for RingArray<T> {}
unsafe impl<T: Send> Sync for RingArray<T> {}

impl<T> RingArray<T> {
    fn new(cap: usize) -> Self {
        assert!(cap > 0);
        let slots = (0..cap + 1)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RingArray {
            slots,
            rpos: AtomicUsize::new(0),
            wpos: AtomicUsize::new(0),
        }
    }

    fn push(&self, elem: T) -> Result<(), T> {
        let wpos = self.wpos.load(Ordering::Relaxed);
        let rpos = self.rpos.load(Ordering::Acquire);
        let next = (wpos + 1) % self.slots.len();
        if next == rpos {
            return Err(elem);
        }
        unsafe {
            (*self.slots[wpos].get()).write(elem);
        }
        self.wpos.store(next, Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        let rpos = self.rpos.load(Ordering::Relaxed);
        let wpos = self.wpos.load(Ordering::Acquire);
        if rpos == wpos {
            return None;
        }
        let elem = unsafe { (*self.slots[rpos].get()).assume_init_read() };
        self.rpos.store((rpos + 1) % self.slots.len(), Ordering::Release);
        Some(elem)
    }

    fn len(&self) -> usize {
        let rpos = self.rpos.load(Ordering::Acquire);
        let wpos = self.wpos.load(Ordering::Acquire);
        if rpos <= wpos {
            wpos - rpos
        } else {
            wpos + self.slots.len() - rpos
        }
    }
}

impl<T> Drop for RingArray<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

/// Write half; exactly one exists per ring.
pub struct RingProducer<T> {
    inner: Arc<RingArray<T>>,
}

/// Read half; exactly one exists per ring.
pub struct RingConsumer<T> {
    inner: Arc<RingArray<T>>,
}

impl<T: Send> RingProducer<T> {
    /// Fails when the ring is full, handing the element back.
    pub fn push(&self, elem: T) -> Result<(), T> {
        self.inner.push(elem)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> RingConsumer<T> {
    /// Fails (returns `None`) when the ring is empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create an SPSC ring with `cap` usable slots.
pub fn ring_pair<T: Send>(cap: usize) -> (RingProducer<T>, RingConsumer<T>) {
    let inner = Arc::new(RingArray::new(cap));
    (
        RingProducer {
            inner: inner.clone(),
        },
        RingConsumer { inner },
    )
}
