//! # rcache-slab
//!
//! Slab storage engine: a size-class allocator over preallocated memory
//! with a chained hash index, per-item TTL, CAS tokens and slab-level
//! eviction.
//!
//! Memory is carved into `slab_size` slabs, each belonging to one size
//! class; items are fixed-size cells within a slab. When a class runs out
//! of cells and the heap is at `maxbytes`, the eviction policy either
//! fails the allocation ([`Evict::None`]), clears a random slab of the
//! class ([`Evict::RandomSlab`]), or clears its least recently assigned
//! slab ([`Evict::LeastRecentlyCreated`]).
//!
//! The engine is single-threaded by design: it is owned by the worker
//! thread and never locked.

mod hashtable;
mod item;
mod slab;

use std::sync::Arc;

use log::{debug, info, trace, warn};

use rcache_core::ascii::{fmt_u64, is_numeric, parse_u64};
use rcache_core::metrics;
use rcache_core::store::{DataStore, StoreStatus, ValRef, Value};
use rcache_core::time::{self, RelTime};

use hashtable::HashTable;
use item::ItemPtr;
use slab::SlabHeap;

/// Largest value the item header can describe.
pub const VAL_MAXLEN: u32 = item::VLEN_MAX;

/// What to do when a class needs memory and the heap is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evict {
    /// Fail the allocation.
    None,
    /// Clear a random slab of the class.
    RandomSlab,
    /// Clear the class's least recently assigned slab.
    LeastRecentlyCreated,
}

#[derive(Debug, Clone)]
pub struct SlabOptions {
    /// Carve all slabs at setup.
    pub prealloc: bool,
    pub evict: Evict,
    /// Reuse freed cells before touching never-allocated ones.
    pub use_freeq: bool,
    /// Attach an 8-byte CAS to every item.
    pub use_cas: bool,
    pub slab_size: usize,
    /// Smallest class cell size.
    pub item_min: usize,
    /// Geometric growth factor between classes.
    pub factor: f64,
    /// Upper bound on slab memory.
    pub maxbytes: usize,
    /// Explicit class cell sizes, overriding the geometric progression.
    pub profile: Option<Vec<usize>>,
    /// log2 of the hash bucket count.
    pub hash_power: u8,
}

impl Default for SlabOptions {
    fn default() -> Self {
        SlabOptions {
            prealloc: true,
            evict: Evict::None,
            use_freeq: true,
            use_cas: true,
            slab_size: 1024 * 1024,
            item_min: 88,
            factor: 1.25,
            maxbytes: 64 * 1024 * 1024,
            profile: None,
            hash_power: 16,
        }
    }
}

metrics! {
    pub struct SlabMetrics {
        item_curr: Gauge => "current linked items",
        item_keyval_byte: Gauge => "current key plus value bytes",
        item_alloc: Counter => "items allocated",
        item_alloc_ex: Counter => "item allocation errors",
        item_link: Counter => "items linked",
        item_unlink: Counter => "items unlinked",
        item_expire: Counter => "items expired on access",
        item_evict: Counter => "items evicted with their slab",
        slab_curr: Gauge => "slabs in use by classes",
        slab_evict: Counter => "slab evictions",
    }
}

pub struct SlabEngine {
    heap: SlabHeap,
    table: HashTable,
    evict: Evict,
    use_freeq: bool,
    use_cas: bool,
    cas_id: u64,
    flush_at: RelTime,
    metrics: Arc<SlabMetrics>,
}

impl SlabEngine {
    pub fn new(opts: &SlabOptions) -> Self {
        let sizes = match &opts.profile {
            Some(profile) => profile.clone(),
            None => slab::size_classes(opts.item_min, opts.factor, opts.slab_size),
        };
        info!(
            "slab engine: {} classes, evict {:?}, cas {}",
            sizes.len(),
            opts.evict,
            opts.use_cas
        );
        SlabEngine {
            heap: SlabHeap::new(
                opts.slab_size,
                opts.maxbytes,
                opts.prealloc,
                opts.use_cas,
                &sizes,
            ),
            table: HashTable::new(opts.hash_power),
            evict: opts.evict,
            use_freeq: opts.use_freeq,
            use_cas: opts.use_cas,
            cas_id: 0,
            flush_at: 0,
            metrics: Arc::new(SlabMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SlabMetrics> {
        self.metrics.clone()
    }

    /// Number of linked items.
    pub fn nitem(&self) -> u32 {
        self.table.nitem()
    }

    fn is_valid(&self, p: ItemPtr) -> bool {
        let cell = self.heap.cell(p);
        item::expire_at(cell) > time::now() && item::create_at(cell) > self.flush_at
    }

    // ── Allocation ───────────────────────────────────────────────────

    /// Reserve a cell big enough for `klen + vlen` per the allocation
    /// order: class free queue, current slab, new slab, eviction.
    fn reserve(&mut self, klen: usize, vlen: usize) -> Result<ItemPtr, StoreStatus> {
        if vlen as u64 > item::VLEN_MAX as u64 {
            return Err(StoreStatus::Oversized);
        }
        let ntotal = item::ntotal(klen, vlen, self.use_cas);
        let id = match self.heap.slab_id(ntotal) {
            Some(id) => id,
            None => {
                self.metrics.item_alloc_ex.incr();
                return Err(StoreStatus::Oversized);
            }
        };

        if self.use_freeq {
            if let Some(p) = self.heap.take_free(id) {
                self.metrics.item_alloc.incr();
                return Ok(p);
            }
        }
        if let Some(p) = self.heap.take_next(id) {
            self.metrics.item_alloc.incr();
            return Ok(p);
        }
        if self.heap.grow(id, time::now()) {
            self.metrics.slab_curr.incr();
            let p = self.heap.take_next(id).ok_or(StoreStatus::NoMem)?;
            self.metrics.item_alloc.incr();
            return Ok(p);
        }

        // heap is full: evict a whole slab of this class, or give up
        let random = match self.evict {
            Evict::None => {
                self.metrics.item_alloc_ex.incr();
                return Err(StoreStatus::NoMem);
            }
            Evict::RandomSlab => true,
            Evict::LeastRecentlyCreated => false,
        };
        let victim = match self.heap.pick_victim(id, random) {
            Some(v) => v,
            None => {
                self.metrics.item_alloc_ex.incr();
                return Err(StoreStatus::NoMem);
            }
        };
        self.evict_slab(victim);

        let p = self.heap.take_next(id).ok_or(StoreStatus::NoMem)?;
        self.metrics.item_alloc.incr();
        Ok(p)
    }

    /// Unlink every linked item in `victim` and reinitialize it empty.
    fn evict_slab(&mut self, victim: u32) {
        let id = self.heap.slabs[victim as usize].id;
        let size = self.heap.cell_size(id);
        let nitem = self.heap.classes[id as usize].nitem;
        debug!("evicting slab {} of class {}", victim, id);

        let mut key = Vec::with_capacity(u8::MAX as usize);
        for i in 0..nitem {
            let p = ItemPtr::new(victim, i * size as u32);
            let cell = self.heap.cell(p);
            if !item::has_bit(cell, item::BIT_LINKED) {
                continue;
            }
            key.clear();
            key.extend_from_slice(item::key(cell));
            let nbyte = (key.len() + item::vlen(cell) as usize) as i64;

            if hashtable::unlink(&mut self.heap, &mut self.table, &key).is_some() {
                self.metrics.item_unlink.incr();
                self.metrics.item_evict.incr();
                self.metrics.item_curr.decr();
                self.metrics.item_keyval_byte.decr_n(nbyte);
            }
        }

        self.heap.reinit_slab(victim, time::now());
        self.metrics.slab_evict.incr();
    }

    // ── Item life cycle ──────────────────────────────────────────────

    fn fill(&mut self, p: ItemPtr, key: &[u8], val: &[u8], expire_at: RelTime) {
        let numeric = is_numeric(val);
        let cell = self.heap.cell_mut(p);
        item::set_key(cell, key);
        item::set_val(cell, val, numeric);
        item::set_expire_at(cell, expire_at);
    }

    /// Link `p` under its key, replacing (and recycling) any predecessor.
    fn link(&mut self, p: ItemPtr) {
        let mut key = Vec::with_capacity(u8::MAX as usize);
        key.extend_from_slice(item::key(self.heap.cell(p)));

        if let Some(old) = hashtable::unlink(&mut self.heap, &mut self.table, &key) {
            self.unlink_accounting(old);
            self.heap.free_cell(old);
        }

        {
            let cell = self.heap.cell_mut(p);
            item::set_create_at(cell, time::now());
        }
        if self.use_cas {
            self.cas_id += 1;
            item::set_cas(self.heap.cell_mut(p), self.cas_id);
        }
        hashtable::link(&mut self.heap, &mut self.table, p);

        let cell = self.heap.cell(p);
        self.metrics.item_link.incr();
        self.metrics.item_curr.incr();
        self.metrics
            .item_keyval_byte
            .incr_n((item::klen(cell) + item::vlen(cell) as usize) as i64);
    }

    fn unlink_accounting(&self, p: ItemPtr) {
        let cell = self.heap.cell(p);
        self.metrics.item_unlink.incr();
        self.metrics.item_curr.decr();
        self.metrics
            .item_keyval_byte
            .decr_n((item::klen(cell) + item::vlen(cell) as usize) as i64);
    }

    /// Look up a live item; expired or flushed items found on the way are
    /// unlinked and recycled.
    fn get_item(&mut self, key: &[u8]) -> Option<ItemPtr> {
        let p = hashtable::get(&self.heap, &self.table, key)?;
        if self.is_valid(p) {
            trace!("hit for {:?}", String::from_utf8_lossy(key));
            return Some(p);
        }
        if let Some(dead) = hashtable::unlink(&mut self.heap, &mut self.table, key) {
            self.unlink_accounting(dead);
            self.metrics.item_expire.incr();
            self.heap.free_cell(dead);
        }
        None
    }

    fn set_item(&mut self, key: &[u8], val: &[u8], expire_at: RelTime) -> Result<(), StoreStatus> {
        let p = self.reserve(key.len(), val.len())?;
        self.fill(p, key, val, expire_at);
        self.link(p);
        Ok(())
    }

    /// Rewrite an item's value: in place when the cell can hold it,
    /// through a fresh allocation otherwise. The CAS token advances either
    /// way.
    fn update_item(&mut self, p: ItemPtr, val: &[u8]) -> Result<(), StoreStatus> {
        let (klen, id, expire_at) = {
            let cell = self.heap.cell(p);
            (item::klen(cell), item::id(cell), item::expire_at(cell))
        };

        if item::ntotal(klen, val.len(), self.use_cas) <= self.heap.cell_size(id) {
            let numeric = is_numeric(val);
            let old_vlen = item::vlen(self.heap.cell(p)) as i64;
            let cell = self.heap.cell_mut(p);
            item::set_val(cell, val, numeric);
            if self.use_cas {
                self.cas_id += 1;
                item::set_cas(self.heap.cell_mut(p), self.cas_id);
            }
            self.metrics
                .item_keyval_byte
                .incr_n(val.len() as i64 - old_vlen);
            return Ok(());
        }

        let mut key = Vec::with_capacity(u8::MAX as usize);
        key.extend_from_slice(item::key(self.heap.cell(p)));
        let np = self.reserve(key.len(), val.len())?;
        self.fill(np, &key, val, expire_at);
        self.link(np);
        Ok(())
    }

    /// Logically expire everything linked so far. No scan: validity checks
    /// compare link time against this barrier, so items linked in the same
    /// second as the flush are gone too.
    pub fn flush_all(&mut self) {
        warn!("flushing all {} items", self.table.nitem());
        self.flush_at = time::now();
    }
}

impl DataStore for SlabEngine {
    fn get(&mut self, key: &[u8]) -> Option<ValRef<'_>> {
        let p = self.get_item(key)?;
        let cell = self.heap.cell(p);
        Some(ValRef {
            val: Value::Bytes(item::val(cell)),
            cas: item::cas(cell),
        })
    }

    fn set(&mut self, key: &[u8], val: &[u8], expire_at: RelTime) -> Result<(), StoreStatus> {
        self.set_item(key, val, expire_at)
    }

    fn cas(
        &mut self,
        key: &[u8],
        val: &[u8],
        expire_at: RelTime,
        cas: u64,
    ) -> Result<(), StoreStatus> {
        let p = self.get_item(key).ok_or(StoreStatus::NotFound)?;
        let stored = item::cas(self.heap.cell(p));
        // 0 is "disabled/unset" and never matches
        if stored == 0 || stored != cas {
            return Err(StoreStatus::Exists);
        }
        self.set_item(key, val, expire_at)
    }

    fn annex(&mut self, key: &[u8], val: &[u8], append: bool) -> Result<(), StoreStatus> {
        let p = self.get_item(key).ok_or(StoreStatus::NotFound)?;

        let (klen, id, old_vlen, expire_at) = {
            let cell = self.heap.cell(p);
            (
                item::klen(cell),
                item::id(cell),
                item::vlen(cell) as usize,
                item::expire_at(cell),
            )
        };
        let nvlen = old_vlen + val.len();
        if nvlen as u64 > item::VLEN_MAX as u64 {
            return Err(StoreStatus::Oversized);
        }

        if append && item::ntotal(klen, nvlen, self.use_cas) <= self.heap.cell_size(id) {
            // grow the value in place
            let cell = self.heap.cell_mut(p);
            let vpos = item::val_pos(cell);
            cell[vpos + old_vlen..vpos + nvlen].copy_from_slice(val);
            item::set_vlen(cell, nvlen as u32);
            let numeric = is_numeric(item::val(cell));
            item::set_bit(cell, item::BIT_VNUM, numeric);
            if self.use_cas {
                self.cas_id += 1;
                item::set_cas(self.heap.cell_mut(p), self.cas_id);
            }
            self.metrics.item_keyval_byte.incr_n(val.len() as i64);
            return Ok(());
        }

        // build the concatenation first: the fresh allocation may evict
        // the slab holding the old item
        let mut nval = Vec::with_capacity(nvlen);
        let mut okey = Vec::with_capacity(klen);
        {
            let cell = self.heap.cell(p);
            okey.extend_from_slice(item::key(cell));
            if append {
                nval.extend_from_slice(item::val(cell));
                nval.extend_from_slice(val);
            } else {
                nval.extend_from_slice(val);
                nval.extend_from_slice(item::val(cell));
            }
        }

        let np = self.reserve(okey.len(), nval.len())?;
        self.fill(np, &okey, &nval, expire_at);
        self.link(np);
        Ok(())
    }

    fn delta(&mut self, key: &[u8], delta: u64, incr: bool) -> Result<u64, StoreStatus> {
        let p = self.get_item(key).ok_or(StoreStatus::NotFound)?;

        let old = {
            let cell = self.heap.cell(p);
            if !item::has_bit(cell, item::BIT_VNUM) {
                return Err(StoreStatus::NotNumeric);
            }
            parse_u64(item::val(cell)).ok_or(StoreStatus::NotNumeric)?
        };

        let new = if incr {
            old.wrapping_add(delta)
        } else {
            old.wrapping_sub(delta)
        };

        let mut tmp = [0u8; 20];
        let nval = fmt_u64(new, &mut tmp);
        // numeric strings always fit the cell that held a numeric string,
        // except at the smallest class sizes
        self.update_item(p, nval)?;
        Ok(new)
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        if self.get_item(key).is_none() {
            return false;
        }
        if let Some(p) = hashtable::unlink(&mut self.heap, &mut self.table, key) {
            self.unlink_accounting(p);
            self.heap.free_cell(p);
            true
        } else {
            false
        }
    }

    fn flush(&mut self) {
        self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts_small() -> SlabOptions {
        SlabOptions {
            prealloc: false,
            evict: Evict::None,
            use_freeq: true,
            use_cas: true,
            slab_size: 256,
            maxbytes: 512,
            profile: Some(vec![64]),
            hash_power: 4,
            ..SlabOptions::default()
        }
    }

    fn engine() -> SlabEngine {
        time::setup();
        SlabEngine::new(&SlabOptions {
            prealloc: false,
            slab_size: 4096,
            maxbytes: 64 * 4096,
            item_min: 64,
            hash_power: 8,
            ..SlabOptions::default()
        })
    }

    const NEVER: RelTime = time::TIME_NEVER;

    fn get_bytes(e: &mut SlabEngine, key: &[u8]) -> Option<Vec<u8>> {
        e.get(key).map(|v| match v.val {
            Value::Bytes(b) => b.to_vec(),
            Value::Num(n) => n.to_string().into_bytes(),
        })
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut e = engine();
        e.set(b"foo", b"bar", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"foo").unwrap(), b"bar");
        assert_eq!(e.nitem(), 1);
    }

    #[test]
    fn test_set_overwrites_single_linked_copy() {
        let mut e = engine();
        e.set(b"foo", b"one", NEVER).unwrap();
        e.set(b"foo", b"two", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"foo").unwrap(), b"two");
        assert_eq!(e.nitem(), 1);
    }

    #[test]
    fn test_delete_then_miss() {
        let mut e = engine();
        e.set(b"foo", b"bar", NEVER).unwrap();
        assert!(e.delete(b"foo"));
        assert!(!e.delete(b"foo"));
        assert!(e.get(b"foo").is_none());
    }

    #[test]
    fn test_expired_item_is_invisible() {
        let mut e = engine();
        // expiry 1 is below the clock's start offset, so already dead
        e.set(b"foo", b"bar", 1).unwrap();
        assert!(e.get(b"foo").is_none());
        // lazy reclamation unlinked it
        assert_eq!(e.nitem(), 0);
    }

    #[test]
    fn test_cas_match_and_mismatch() {
        let mut e = engine();
        e.set(b"foo", b"bar", NEVER).unwrap();
        let cas = e.get(b"foo").unwrap().cas;
        assert!(cas >= 1);

        assert_eq!(e.cas(b"foo", b"qux", NEVER, cas + 1), Err(StoreStatus::Exists));
        assert_eq!(e.cas(b"foo", b"qux", NEVER, 0), Err(StoreStatus::Exists));
        e.cas(b"foo", b"qux", NEVER, cas).unwrap();
        assert_eq!(get_bytes(&mut e, b"foo").unwrap(), b"qux");

        assert_eq!(
            e.cas(b"missing", b"x", NEVER, 1),
            Err(StoreStatus::NotFound)
        );
    }

    #[test]
    fn test_cas_disabled_always_rejects() {
        time::setup();
        let mut e = SlabEngine::new(&SlabOptions {
            use_cas: false,
            prealloc: false,
            slab_size: 4096,
            maxbytes: 64 * 4096,
            item_min: 64,
            hash_power: 8,
            ..SlabOptions::default()
        });
        e.set(b"k", b"v", NEVER).unwrap();
        assert_eq!(e.get(b"k").unwrap().cas, 0);
        assert_eq!(e.cas(b"k", b"w", NEVER, 0), Err(StoreStatus::Exists));
        assert_eq!(e.cas(b"k", b"w", NEVER, 1), Err(StoreStatus::Exists));
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"v");
    }

    #[test]
    fn test_cas_advances_on_every_write() {
        let mut e = engine();
        e.set(b"foo", b"v1", NEVER).unwrap();
        let c1 = e.get(b"foo").unwrap().cas;
        e.set(b"foo", b"v2", NEVER).unwrap();
        let c2 = e.get(b"foo").unwrap().cas;
        assert!(c2 > c1);
    }

    #[test]
    fn test_annex_append_and_prepend() {
        let mut e = engine();
        e.set(b"k", b"mid", NEVER).unwrap();
        e.annex(b"k", b"-end", true).unwrap();
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"mid-end");
        e.annex(b"k", b"start-", false).unwrap();
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"start-mid-end");
        assert_eq!(e.annex(b"nope", b"x", true), Err(StoreStatus::NotFound));
    }

    #[test]
    fn test_annex_crossing_class_boundary() {
        let mut e = engine();
        e.set(b"k", b"a", NEVER).unwrap();
        let big = vec![b'x'; 500];
        e.annex(b"k", &big, true).unwrap();
        let got = get_bytes(&mut e, b"k").unwrap();
        assert_eq!(got.len(), 501);
        assert_eq!(&got[..1], b"a");
    }

    #[test]
    fn test_delta_incr_decr() {
        let mut e = engine();
        e.set(b"n", b"4", NEVER).unwrap();
        assert_eq!(e.delta(b"n", 3, true).unwrap(), 7);
        assert_eq!(get_bytes(&mut e, b"n").unwrap(), b"7");
        assert_eq!(e.delta(b"n", 2, false).unwrap(), 5);
        assert_eq!(e.delta(b"missing", 1, true), Err(StoreStatus::NotFound));
    }

    #[test]
    fn test_delta_on_string_value_rejected() {
        let mut e = engine();
        e.set(b"s", b"abc", NEVER).unwrap();
        assert_eq!(e.delta(b"s", 1, true), Err(StoreStatus::NotNumeric));
    }

    #[test]
    fn test_delta_wraps() {
        let mut e = engine();
        e.set(b"n", b"0", NEVER).unwrap();
        assert_eq!(e.delta(b"n", 1, false).unwrap(), u64::MAX);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut e = SlabEngine::new(&opts_small());
        let big = vec![b'x'; 300];
        assert_eq!(e.set(b"k", &big, NEVER), Err(StoreStatus::Oversized));
    }

    #[test]
    fn test_evict_none_returns_nomem() {
        time::setup();
        let mut e = SlabEngine::new(&opts_small());
        // 2 slabs x 4 cells of 64
        for i in 0..8 {
            e.set(format!("key{}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        assert_eq!(e.set(b"key8", b"v", NEVER), Err(StoreStatus::NoMem));
    }

    #[test]
    fn test_evict_lrc_clears_oldest_slab() {
        time::setup();
        let mut e = SlabEngine::new(&SlabOptions {
            evict: Evict::LeastRecentlyCreated,
            ..opts_small()
        });
        for i in 0..8 {
            e.set(format!("key{}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        // forces eviction of the first-assigned slab, holding key0..key3
        e.set(b"key8", b"v", NEVER).unwrap();
        for i in 0..4 {
            assert!(e.get(format!("key{}", i).as_bytes()).is_none());
        }
        for i in 4..9 {
            assert!(e.get(format!("key{}", i).as_bytes()).is_some());
        }
        assert_eq!(e.metrics().slab_evict.value(), 1);
        assert_eq!(e.metrics().item_evict.value(), 4);
    }

    #[test]
    fn test_evict_random_keeps_capacity_bound() {
        time::setup();
        let mut e = SlabEngine::new(&SlabOptions {
            evict: Evict::RandomSlab,
            ..opts_small()
        });
        for i in 0..32 {
            e.set(format!("key{:02}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        assert!(e.nitem() <= 8);
        assert!(e.metrics().slab_evict.value() >= 6);
    }

    #[test]
    fn test_freed_cells_are_reused() {
        time::setup();
        let mut e = SlabEngine::new(&opts_small());
        for i in 0..8 {
            e.set(format!("key{}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        assert!(e.delete(b"key0"));
        // the freed cell satisfies the next allocation of the class
        e.set(b"fresh", b"v", NEVER).unwrap();
        assert!(e.get(b"fresh").is_some());
    }

    #[test]
    fn test_flush_hides_everything() {
        let mut e = engine();
        e.set(b"a", b"1", NEVER).unwrap();
        e.set(b"b", b"2", NEVER).unwrap();
        e.flush();
        assert!(e.get(b"a").is_none());
        assert!(e.get(b"b").is_none());
    }

    #[test]
    fn test_item_accounting_balances() {
        let mut e = engine();
        e.set(b"foo", b"barbar", NEVER).unwrap();
        assert_eq!(e.metrics().item_curr.value(), 1);
        assert_eq!(e.metrics().item_keyval_byte.value(), 9);
        assert!(e.delete(b"foo"));
        assert_eq!(e.metrics().item_curr.value(), 0);
        assert_eq!(e.metrics().item_keyval_byte.value(), 0);
    }
}
