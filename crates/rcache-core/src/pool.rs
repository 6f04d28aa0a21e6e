//! Free pools for hot, reusable objects.
//!
//! Buffers, buffered sockets and requests are allocated once and recycled
//! instead of round-tripping through the allocator per connection or per
//! request. Ownership moves through [`Pool::acquire`]/[`Pool::release`], so
//! a double release cannot be expressed.
//!
//! A pool with `nmax == 0` is unbounded and creates on demand; a bounded
//! pool stops creating once `nmax` objects exist, and drops releases beyond
//! `nmax` free objects.

use log::trace;

/// Restore an object to its pristine state before reuse.
pub trait Reset {
    fn reset(&mut self);
}

#[derive(Debug)]
pub struct Pool<T> {
    free: Vec<T>,
    nmax: usize,
    nused: usize,
}

impl<T: Reset> Pool<T> {
    /// `nmax == 0` means unbounded.
    pub fn new(nmax: usize) -> Self {
        Pool {
            free: Vec::new(),
            nmax,
            nused: 0,
        }
    }

    /// Eagerly fill the pool with `n` objects.
    pub fn prealloc(&mut self, n: usize, mut create: impl FnMut() -> T) {
        for _ in 0..n {
            self.free.push(create());
        }
    }

    /// Take an object, creating one with `create` when the free list is
    /// empty and the bound allows. Returns `None` when exhausted.
    pub fn acquire(&mut self, create: impl FnOnce() -> T) -> Option<T> {
        let obj = match self.free.pop() {
            Some(mut obj) => {
                obj.reset();
                obj
            }
            None => {
                if self.nmax != 0 && self.nused >= self.nmax {
                    trace!("pool exhausted: nused {} nmax {}", self.nused, self.nmax);
                    return None;
                }
                create()
            }
        };
        self.nused += 1;
        Some(obj)
    }

    /// Return an object for reuse. Dropped if the pool already holds `nmax`
    /// free objects.
    pub fn release(&mut self, mut obj: T) {
        debug_assert!(self.nused > 0);
        self.nused = self.nused.saturating_sub(1);
        if self.nmax == 0 || self.free.len() < self.nmax {
            obj.reset();
            self.free.push(obj);
        }
    }

    #[inline]
    pub fn nfree(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn nused(&self) -> usize {
        self.nused
    }

    #[inline]
    pub fn nmax(&self) -> usize {
        self.nmax
    }
}
