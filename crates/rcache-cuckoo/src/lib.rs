//! # rcache-cuckoo
//!
//! Cuckoo storage engine: a fixed-capacity array of equal-size cells
//! doubling as its own hash table. Four seeded hashes give every key four
//! candidate cells; inserting into a full neighborhood displaces an
//! occupant to one of its own alternates, up to a bounded number of moves,
//! after which the policy picks a victim to evict outright.
//!
//! There is no allocator and no index to maintain: memory use is exactly
//! `nitem * item_size`, lookups are at most four probes, and a delete is
//! one store (the expiry doubles as the empty/deleted sentinel). The whole
//! table can live in a file-backed mapping and be picked up again after a
//! restart.
//!
//! Like the slab engine, this is single-threaded and owned by the worker.

mod datapool;
mod item;

use std::sync::Arc;

use log::{debug, info, trace, warn};
use rand::Rng;

use rcache_core::ascii::parse_u64;
use rcache_core::metrics;
use rcache_core::store::{DataStore, StoreStatus, ValRef, Value};
use rcache_core::time::{self, RelTime};

use datapool::Datapool;
pub use datapool::{DatapoolError, SIGNATURE_MAX};

/// Candidate positions per key.
const D: usize = 4;

/// Seeds for the four key hashes; arbitrary but fixed and distinct.
const SEEDS: [u32; D] = [0x9e37_79b9, 0x7f4a_7c15, 0x85eb_ca6b, 0xc2b2_ae35];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuckooPolicy {
    /// Displace/evict a uniformly random candidate.
    Random,
    /// Displace/evict the candidate closest to expiry.
    Expire,
}

#[derive(Debug, Clone)]
pub struct CuckooOptions {
    /// Displacements allowed per insert.
    pub displace: usize,
    pub use_cas: bool,
    /// Cell size; every item (header, cas, key, value) must fit one cell.
    pub item_size: usize,
    pub nitem: u32,
    pub policy: CuckooPolicy,
    /// Hard cap on item lifetime; "never expires" becomes now + max_ttl,
    /// because a zero expiry is the empty sentinel.
    pub max_ttl: u32,
    /// Optional file-backed data pool.
    pub datapool: Option<std::path::PathBuf>,
    /// Signature stamped into the pool header.
    pub datapool_name: String,
    pub prefault: bool,
}

impl Default for CuckooOptions {
    fn default() -> Self {
        CuckooOptions {
            displace: 2,
            use_cas: true,
            item_size: 64,
            nitem: 1024,
            policy: CuckooPolicy::Random,
            max_ttl: 30 * 24 * 60 * 60,
            datapool: None,
            datapool_name: "cuckoo_datapool".to_string(),
            prefault: false,
        }
    }
}

metrics! {
    pub struct CuckooMetrics {
        item_curr: Gauge => "current live items",
        item_keyval_byte: Gauge => "current key plus value bytes",
        item_insert: Counter => "item inserts",
        item_update: Counter => "in-place value updates",
        item_delete: Counter => "item deletes",
        item_displace: Counter => "displacements",
        item_evict: Counter => "forced evictions",
        item_expire: Counter => "expired cells reclaimed",
    }
}

pub struct CuckooEngine {
    pool: Datapool,
    item_size: usize,
    nitem: u32,
    policy: CuckooPolicy,
    displace: usize,
    use_cas: bool,
    cas_id: u64,
    max_ttl: u32,
    metrics: Arc<CuckooMetrics>,
}

fn hash_seeded(key: &[u8], seed: u32) -> u32 {
    let mut h = 0x811c_9dc5u32 ^ seed;
    for &b in key {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

impl CuckooEngine {
    pub fn new(opts: &CuckooOptions) -> Result<Self, DatapoolError> {
        debug_assert!(opts.item_size >= item::overhead(opts.use_cas) + 2);
        let size = opts.item_size * opts.nitem as usize;

        let (pool, fresh) = match &opts.datapool {
            Some(path) => {
                let (mmap, fresh) =
                    datapool::MmapPool::open(path, &opts.datapool_name, size, opts.prefault)?;
                (Datapool::File(mmap), fresh)
            }
            None => (Datapool::heap(size), true),
        };

        info!(
            "cuckoo engine: {} cells of {}B, policy {:?}, displace {}, {}",
            opts.nitem,
            opts.item_size,
            opts.policy,
            opts.displace,
            if fresh { "fresh" } else { "reused" }
        );

        Ok(CuckooEngine {
            pool,
            item_size: opts.item_size,
            nitem: opts.nitem,
            policy: opts.policy,
            displace: opts.displace,
            use_cas: opts.use_cas,
            cas_id: 0,
            max_ttl: opts.max_ttl,
            metrics: Arc::new(CuckooMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<CuckooMetrics> {
        self.metrics.clone()
    }

    #[inline]
    fn cell(&self, i: u32) -> &[u8] {
        let at = i as usize * self.item_size;
        &self.pool.as_slice()[at..at + self.item_size]
    }

    #[inline]
    fn cell_mut(&mut self, i: u32) -> &mut [u8] {
        let at = i as usize * self.item_size;
        &mut self.pool.as_mut_slice()[at..at + self.item_size]
    }

    fn copy_cell(&mut self, src: u32, dst: u32) {
        let size = self.item_size;
        let data = self.pool.as_mut_slice();
        data.copy_within(
            src as usize * size..(src as usize + 1) * size,
            dst as usize * size,
        );
    }

    fn positions(&self, key: &[u8]) -> [u32; D] {
        let mut offsets = [0u32; D];
        for (i, &seed) in SEEDS.iter().enumerate() {
            offsets[i] = hash_seeded(key, seed) % self.nitem;
        }
        offsets
    }

    /// Cap the expiry below the empty sentinel and the max TTL.
    fn clamp_expire(&self, expire_at: RelTime) -> RelTime {
        expire_at.min(time::now().saturating_add(self.max_ttl))
    }

    fn lookup(&self, key: &[u8]) -> Option<u32> {
        for &o in &self.positions(key) {
            let cell = self.cell(o);
            if item::is_valid(cell) && item::matches(cell, key, self.use_cas) {
                return Some(o);
            }
        }
        None
    }

    fn fits(&self, klen: usize, val: &[u8], numeric: bool) -> bool {
        if !numeric && val.len() > u8::MAX as usize {
            return false;
        }
        klen <= u8::MAX as usize
            && klen + item::store_vlen(val, numeric) + item::overhead(self.use_cas)
                <= self.item_size
    }

    fn account_insert(&self, klen: usize, vlen: usize) {
        self.metrics.item_curr.incr();
        self.metrics.item_keyval_byte.incr_n((klen + vlen) as i64);
    }

    fn account_remove(&self, i: u32) {
        let cell = self.cell(i);
        self.metrics.item_curr.decr();
        self.metrics
            .item_keyval_byte
            .decr_n((item::klen(cell) + item::vlen(cell)) as i64);
    }

    /// Order candidates by eviction preference.
    fn order_candidates(&self, offsets: &[u32; D]) -> [u32; D] {
        let mut ordered = *offsets;
        match self.policy {
            CuckooPolicy::Random => {
                let j = rand::thread_rng().gen_range(0..D);
                for (i, slot) in ordered.iter_mut().enumerate() {
                    *slot = offsets[(j + i) % D];
                }
            }
            CuckooPolicy::Expire => {
                ordered.sort_by_key(|&o| item::expire(self.cell(o)));
            }
        }
        ordered
    }

    fn select_candidate(&self, offsets: &[u32; D]) -> u32 {
        match self.policy {
            CuckooPolicy::Random => offsets[rand::thread_rng().gen_range(0..D)],
            CuckooPolicy::Expire => {
                let mut best = offsets[0];
                let mut min = u32::MAX;
                for &o in offsets {
                    let e = item::expire(self.cell(o));
                    if e < min {
                        min = e;
                        best = o;
                    }
                }
                best
            }
        }
    }

    /// Free the cell at `displaced` by walking occupants to their
    /// alternate positions, up to the displacement budget; a walk that
    /// never reaches an empty cell evicts its tail.
    fn displace_from(&mut self, displaced: u32) {
        let mut path: Vec<u32> = Vec::with_capacity(self.displace + 1);
        path.push(displaced);
        let mut evict = true;

        'walk: while path.len() <= self.displace {
            let cur = *path.last().unwrap();
            let mut keybuf = [0u8; 256];
            let klen = {
                let cell = self.cell(cur);
                let k = item::key(cell, self.use_cas);
                keybuf[..k.len()].copy_from_slice(k);
                k.len()
            };
            let offsets = self.positions(&keybuf[..klen]);

            // an empty (or dead) cell ends the walk without eviction
            for &o in &offsets {
                if !item::is_valid(self.cell(o)) {
                    if item::is_expired(self.cell(o)) {
                        self.metrics.item_expire.incr();
                        self.account_remove(o);
                    }
                    path.push(o);
                    self.metrics.item_displace.incr();
                    evict = false;
                    break 'walk;
                }
            }

            // no empty cell: displace the preferred candidate that is not
            // already on the path (no cycles)
            let ordered = self.order_candidates(&offsets);
            match ordered.iter().copied().find(|o| !path.contains(o)) {
                Some(o) => {
                    path.push(o);
                    self.metrics.item_displace.incr();
                }
                None => break,
            }
        }

        if evict {
            let tail = *path.last().unwrap();
            debug!("cuckoo evicting cell {}", tail);
            if item::is_valid(self.cell(tail)) {
                self.account_remove(tail);
            }
            self.metrics.item_evict.incr();
        }

        for i in (1..path.len()).rev() {
            self.copy_cell(path[i - 1], path[i]);
        }
        item::delete(self.cell_mut(path[0]));
    }

    /// Insert a key that has no valid copy in the table.
    fn insert_item(
        &mut self,
        key: &[u8],
        val: &[u8],
        num: Option<u64>,
        expire_at: RelTime,
    ) -> Result<(), StoreStatus> {
        if !self.fits(key.len(), val, num.is_some()) {
            return Err(StoreStatus::Oversized);
        }

        let offsets = self.positions(key);
        let mut target = None;
        for &o in &offsets {
            if !item::is_valid(self.cell(o)) {
                if item::is_expired(self.cell(o)) {
                    self.metrics.item_expire.incr();
                    self.account_remove(o);
                }
                target = Some(o);
                break;
            }
        }

        let target = match target {
            Some(o) => o,
            None => {
                let victim = self.select_candidate(&offsets);
                self.displace_from(victim);
                victim
            }
        };

        trace!("cuckoo insert into cell {}", target);
        let use_cas = self.use_cas;
        item::set(self.cell_mut(target), key, val, num, expire_at, use_cas);
        if use_cas {
            self.cas_id += 1;
            let cas = self.cas_id;
            item::set_cas(self.cell_mut(target), cas, use_cas);
        }
        self.metrics.item_insert.incr();
        self.account_insert(key.len(), item::store_vlen(val, num.is_some()));
        Ok(())
    }

    /// Rewrite a live cell's value in place.
    fn update_at(
        &mut self,
        i: u32,
        val: &[u8],
        num: Option<u64>,
        expire_at: RelTime,
    ) -> Result<(), StoreStatus> {
        let klen = item::klen(self.cell(i));
        if !self.fits(klen, val, num.is_some()) {
            return Err(StoreStatus::Oversized);
        }

        let old_vlen = item::vlen(self.cell(i)) as i64;
        let use_cas = self.use_cas;
        item::update(self.cell_mut(i), val, num, expire_at, use_cas);
        if use_cas {
            self.cas_id += 1;
            let cas = self.cas_id;
            item::set_cas(self.cell_mut(i), cas, use_cas);
        }
        self.metrics.item_update.incr();
        self.metrics
            .item_keyval_byte
            .incr_n(item::vlen(self.cell(i)) as i64 - old_vlen);
        Ok(())
    }

    #[cfg(test)]
    fn count_valid_copies(&self, key: &[u8]) -> usize {
        (0..self.nitem)
            .filter(|&i| {
                let cell = self.cell(i);
                item::is_valid(cell) && item::matches(cell, key, self.use_cas)
            })
            .count()
    }
}

impl DataStore for CuckooEngine {
    fn get(&mut self, key: &[u8]) -> Option<ValRef<'_>> {
        let i = self.lookup(key)?;
        let use_cas = self.use_cas;
        let cell = self.cell(i);
        let val = if item::vtype(cell) == item::VTYPE_NUM {
            Value::Num(item::val_num(cell, use_cas))
        } else {
            Value::Bytes(item::val_str(cell, use_cas))
        };
        Some(ValRef {
            val,
            cas: item::cas(cell, use_cas),
        })
    }

    fn set(&mut self, key: &[u8], val: &[u8], expire_at: RelTime) -> Result<(), StoreStatus> {
        let expire_at = self.clamp_expire(expire_at);
        let num = parse_u64(val);
        match self.lookup(key) {
            Some(i) => self.update_at(i, val, num, expire_at),
            None => self.insert_item(key, val, num, expire_at),
        }
    }

    fn cas(
        &mut self,
        key: &[u8],
        val: &[u8],
        expire_at: RelTime,
        cas: u64,
    ) -> Result<(), StoreStatus> {
        let i = self.lookup(key).ok_or(StoreStatus::NotFound)?;
        let stored = item::cas(self.cell(i), self.use_cas);
        // 0 is "disabled/unset" and never matches
        if stored == 0 || stored != cas {
            return Err(StoreStatus::Exists);
        }
        let expire_at = self.clamp_expire(expire_at);
        let num = parse_u64(val);
        self.update_at(i, val, num, expire_at)
    }

    fn annex(&mut self, key: &[u8], val: &[u8], append: bool) -> Result<(), StoreStatus> {
        let i = self.lookup(key).ok_or(StoreStatus::NotFound)?;

        let (nval, expire_at) = {
            let use_cas = self.use_cas;
            let cell = self.cell(i);
            let old: Vec<u8> = if item::vtype(cell) == item::VTYPE_NUM {
                item::val_num(cell, use_cas).to_string().into_bytes()
            } else {
                item::val_str(cell, use_cas).to_vec()
            };
            let mut nval = Vec::with_capacity(old.len() + val.len());
            if append {
                nval.extend_from_slice(&old);
                nval.extend_from_slice(val);
            } else {
                nval.extend_from_slice(val);
                nval.extend_from_slice(&old);
            }
            (nval, item::expire(cell))
        };

        let num = parse_u64(&nval);
        self.update_at(i, &nval, num, expire_at)
    }

    fn delta(&mut self, key: &[u8], delta: u64, incr: bool) -> Result<u64, StoreStatus> {
        let i = self.lookup(key).ok_or(StoreStatus::NotFound)?;
        let use_cas = self.use_cas;

        let old = {
            let cell = self.cell(i);
            if item::vtype(cell) != item::VTYPE_NUM {
                return Err(StoreStatus::NotNumeric);
            }
            item::val_num(cell, use_cas)
        };
        let new = if incr {
            old.wrapping_add(delta)
        } else {
            old.wrapping_sub(delta)
        };

        let expire_at = item::expire(self.cell(i));
        item::update(self.cell_mut(i), &[], Some(new), expire_at, use_cas);
        if use_cas {
            self.cas_id += 1;
            let cas = self.cas_id;
            item::set_cas(self.cell_mut(i), cas, use_cas);
        }
        self.metrics.item_update.incr();
        Ok(new)
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        match self.lookup(key) {
            Some(i) => {
                self.account_remove(i);
                item::delete(self.cell_mut(i));
                self.metrics.item_delete.incr();
                true
            }
            None => false,
        }
    }

    fn flush(&mut self) {
        warn!("cuckoo flush: clearing all {} cells", self.nitem);
        self.pool.as_mut_slice().fill(0);
        let curr = self.metrics.item_curr.value();
        self.metrics.item_curr.decr_n(curr);
        let bytes = self.metrics.item_keyval_byte.value();
        self.metrics.item_keyval_byte.decr_n(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEVER: RelTime = rcache_core::time::TIME_NEVER;

    fn engine(nitem: u32, policy: CuckooPolicy, displace: usize) -> CuckooEngine {
        time::setup();
        CuckooEngine::new(&CuckooOptions {
            nitem,
            policy,
            displace,
            item_size: 64,
            ..CuckooOptions::default()
        })
        .unwrap()
    }

    fn get_bytes(e: &mut CuckooEngine, key: &[u8]) -> Option<Vec<u8>> {
        e.get(key).map(|v| match v.val {
            Value::Bytes(b) => b.to_vec(),
            Value::Num(n) => n.to_string().into_bytes(),
        })
    }

    #[test]
    fn test_set_get_delete_roundtrip() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"foo", b"bar", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"foo").unwrap(), b"bar");
        assert!(e.delete(b"foo"));
        assert!(!e.delete(b"foo"));
        assert!(e.get(b"foo").is_none());
    }

    #[test]
    fn test_set_updates_in_place() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"k", b"one", NEVER).unwrap();
        e.set(b"k", b"twotwo", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"twotwo");
        assert_eq!(e.count_valid_copies(b"k"), 1);
        assert_eq!(e.metrics().item_insert.value(), 1);
        assert_eq!(e.metrics().item_update.value(), 1);
    }

    #[test]
    fn test_numeric_fast_path() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"n", b"4", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"n").unwrap(), b"4");
        assert_eq!(e.delta(b"n", 3, true).unwrap(), 7);
        assert_eq!(get_bytes(&mut e, b"n").unwrap(), b"7");
        assert_eq!(e.delta(b"n", 7, false).unwrap(), 0);
    }

    #[test]
    fn test_delta_on_string_rejected() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"s", b"abc", NEVER).unwrap();
        assert_eq!(e.delta(b"s", 1, true), Err(StoreStatus::NotNumeric));
        assert_eq!(e.delta(b"gone", 1, true), Err(StoreStatus::NotFound));
    }

    #[test]
    fn test_cas_semantics() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"k", b"v", NEVER).unwrap();
        let cas = e.get(b"k").unwrap().cas;
        assert_eq!(e.cas(b"k", b"w", NEVER, cas + 1), Err(StoreStatus::Exists));
        assert_eq!(e.cas(b"k", b"w", NEVER, 0), Err(StoreStatus::Exists));
        e.cas(b"k", b"w", NEVER, cas).unwrap();
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"w");
        assert_eq!(e.cas(b"gone", b"x", NEVER, 1), Err(StoreStatus::NotFound));
    }

    #[test]
    fn test_cas_disabled_always_rejects() {
        time::setup();
        let mut e = CuckooEngine::new(&CuckooOptions {
            nitem: 64,
            item_size: 64,
            use_cas: false,
            ..CuckooOptions::default()
        })
        .unwrap();
        e.set(b"k", b"v", NEVER).unwrap();
        // no token is stored, so the reserved 0 is reported and every
        // compare fails
        assert_eq!(e.get(b"k").unwrap().cas, 0);
        assert_eq!(e.cas(b"k", b"w", NEVER, 0), Err(StoreStatus::Exists));
        assert_eq!(e.cas(b"k", b"w", NEVER, 7), Err(StoreStatus::Exists));
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b"v");
    }

    #[test]
    fn test_annex_append_prepend() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"k", b"mid", NEVER).unwrap();
        e.annex(b"k", b"!", true).unwrap();
        e.annex(b"k", b">", false).unwrap();
        assert_eq!(get_bytes(&mut e, b"k").unwrap(), b">mid!");
    }

    #[test]
    fn test_oversized_rejected() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        let big = vec![b'x'; 64];
        assert_eq!(e.set(b"key", &big, NEVER), Err(StoreStatus::Oversized));
    }

    #[test]
    fn test_expired_cell_reused() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"dead", b"v", 1).unwrap();
        assert!(e.get(b"dead").is_none());
        e.set(b"dead", b"new", NEVER).unwrap();
        assert_eq!(get_bytes(&mut e, b"dead").unwrap(), b"new");
        assert_eq!(e.count_valid_copies(b"dead"), 1);
    }

    #[test]
    fn test_forced_eviction_single_cell() {
        let mut e = engine(1, CuckooPolicy::Expire, 2);
        e.set(b"first", b"1", NEVER).unwrap();
        e.set(b"second", b"2", NEVER).unwrap();
        assert!(e.get(b"first").is_none());
        assert_eq!(get_bytes(&mut e, b"second").unwrap(), b"2");
        assert_eq!(e.metrics().item_evict.value(), 1);
    }

    #[test]
    fn test_random_policy_hit_rate_after_fill() {
        let mut e = engine(1024, CuckooPolicy::Random, 2);
        let n = 1024;
        for i in 0..n {
            e.set(format!("key:{:05}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        let hits = (0..n)
            .filter(|i| e.get(format!("key:{:05}", i).as_bytes()).is_some())
            .count();
        assert!(
            hits as f64 >= n as f64 * 0.9,
            "hit rate too low: {}/{}",
            hits,
            n
        );
    }

    #[test]
    fn test_expire_policy_keeps_younger_items() {
        let mut e = engine(64, CuckooPolicy::Expire, 2);
        let now = time::now();
        for i in 0..65u32 {
            let key = format!("key:{:03}", i);
            e.set(key.as_bytes(), b"v", now + 100 + 10 * i).unwrap();
        }

        // the newest item was placed by the final insert
        assert!(e.get(b"key:064").is_some());

        let live: Vec<u32> = (0..65)
            .filter(|&i| e.get(format!("key:{:03}", i).as_bytes()).is_some())
            .collect();
        assert!(live.len() >= 58, "too many casualties: {}", live.len());

        // losses concentrate at the short-expiry end
        let upper_live = live.iter().filter(|&&i| i >= 33).count();
        assert!(upper_live >= 28, "upper half lost too much: {}", upper_live);
    }

    #[test]
    fn test_displacement_counts() {
        let mut e = engine(16, CuckooPolicy::Random, 2);
        for i in 0..64u32 {
            e.set(format!("k{:02}", i).as_bytes(), b"v", NEVER).unwrap();
        }
        assert!(e.metrics().item_displace.value() > 0);
    }

    #[test]
    fn test_flush_clears_table() {
        let mut e = engine(64, CuckooPolicy::Random, 2);
        e.set(b"a", b"1", NEVER).unwrap();
        e.set(b"b", b"2", NEVER).unwrap();
        e.flush();
        assert!(e.get(b"a").is_none());
        assert!(e.get(b"b").is_none());
        assert_eq!(e.metrics().item_curr.value(), 0);
    }

    #[test]
    fn test_datapool_persistence_roundtrip() {
        time::setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuckoo.pool");
        let opts = CuckooOptions {
            nitem: 64,
            datapool: Some(path.clone()),
            datapool_name: "test_pool".to_string(),
            ..CuckooOptions::default()
        };

        {
            let mut e = CuckooEngine::new(&opts).unwrap();
            e.set(b"persist", b"me", NEVER).unwrap();
        }

        let mut e = CuckooEngine::new(&opts).unwrap();
        assert_eq!(get_bytes(&mut e, b"persist").unwrap(), b"me");

        let bad = CuckooOptions {
            datapool_name: "other_pool".to_string(),
            ..opts
        };
        assert!(matches!(
            CuckooEngine::new(&bad),
            Err(DatapoolError::SignatureMismatch { .. })
        ));
    }
}
