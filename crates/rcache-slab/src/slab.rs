//! Slabs, size classes and the slab heap.
//!
//! The heap owns every slab. A slab is one `slab_size` allocation carved
//! into equal-size cells belonging to one size class; a class tracks its
//! slabs, its cross-slab free queue, and the next never-allocated cell in
//! its current slab. Class ids are 1-based; id 0 is reserved for
//! aggregation and 255 marks "no class fits".
//!
//! Total memory is bounded by `maxbytes`: at most `maxbytes / slab_size`
//! slabs ever exist. With preallocation they are all carved at setup and
//! parked in the free-slab pool until a class claims them.

use log::{debug, info};

use crate::item::{self, ItemPtr};

pub(crate) const SLABCLASS_MIN_ID: u8 = 1;
pub(crate) const SLABCLASS_MAX_ID: u8 = u8::MAX - 1;
pub(crate) const SLABCLASS_INVALID_ID: u8 = u8::MAX;

pub(crate) struct Slab {
    pub(crate) data: Box<[u8]>,
    pub(crate) id: u8,
    pub(crate) utime: u32,
}

pub(crate) struct SlabClass {
    /// Cell size (const).
    pub(crate) size: usize,
    /// Cells per slab (const).
    pub(crate) nitem: u32,
    /// Reusable cells across all slabs of this class.
    pub(crate) free_q: Vec<ItemPtr>,
    /// Next never-allocated cell in the current slab.
    pub(crate) next_item: ItemPtr,
    /// Never-allocated cells left in the current slab.
    pub(crate) nfree_item: u32,
    /// Slabs owned by this class, in assignment order.
    pub(crate) slabs: Vec<u32>,
}

/// Generate class cell sizes: geometric progression from `item_min` by
/// `factor`, 8-byte aligned, capped by one full-slab class.
pub(crate) fn size_classes(item_min: usize, factor: f64, slab_size: usize) -> Vec<usize> {
    debug_assert!(factor > 1.0);
    let mut sizes = Vec::new();
    let mut size = item_min.max(item::ntotal(1, 1, true)).next_multiple_of(8);
    while size < slab_size && sizes.len() < (SLABCLASS_MAX_ID - 1) as usize {
        sizes.push(size);
        let nsize = ((size as f64 * factor) as usize).next_multiple_of(8);
        size = nsize.max(size + 8);
    }
    sizes.push(slab_size);
    sizes
}

pub(crate) struct SlabHeap {
    pub(crate) slab_size: usize,
    pub(crate) use_cas: bool,
    pub(crate) classes: Vec<SlabClass>,
    pub(crate) slabs: Vec<Slab>,
    free_slabs: Vec<u32>,
    nslab_max: usize,
}

impl SlabHeap {
    pub(crate) fn new(
        slab_size: usize,
        maxbytes: usize,
        prealloc: bool,
        use_cas: bool,
        cell_sizes: &[usize],
    ) -> Self {
        let nslab_max = (maxbytes / slab_size).max(1);
        // classes[0] is the aggregation placeholder
        let mut classes = Vec::with_capacity(cell_sizes.len() + 1);
        classes.push(SlabClass {
            size: 0,
            nitem: 0,
            free_q: Vec::new(),
            next_item: ItemPtr::NULL,
            nfree_item: 0,
            slabs: Vec::new(),
        });
        for &size in cell_sizes {
            debug_assert!(size <= slab_size);
            classes.push(SlabClass {
                size,
                nitem: (slab_size / size) as u32,
                free_q: Vec::new(),
                next_item: ItemPtr::NULL,
                nfree_item: 0,
                slabs: Vec::new(),
            });
        }

        let mut heap = SlabHeap {
            slab_size,
            use_cas,
            classes,
            slabs: Vec::new(),
            free_slabs: Vec::new(),
            nslab_max,
        };

        if prealloc {
            for _ in 0..nslab_max {
                let idx = heap.carve_slab();
                heap.free_slabs.push(idx);
            }
        }

        info!(
            "slab heap: slab_size {} nslab_max {} nclass {} prealloc {}",
            slab_size,
            nslab_max,
            heap.classes.len() - 1,
            prealloc
        );
        heap
    }

    fn carve_slab(&mut self) -> u32 {
        let idx = self.slabs.len() as u32;
        self.slabs.push(Slab {
            data: vec![0; self.slab_size].into_boxed_slice(),
            id: SLABCLASS_INVALID_ID,
            utime: 0,
        });
        idx
    }

    pub(crate) fn nslab(&self) -> usize {
        self.slabs.len()
    }

    pub(crate) fn nclass(&self) -> usize {
        self.classes.len() - 1
    }

    /// Smallest class whose cells hold `size` bytes.
    pub(crate) fn slab_id(&self, size: usize) -> Option<u8> {
        (SLABCLASS_MIN_ID as usize..self.classes.len())
            .find(|&i| self.classes[i].size >= size)
            .map(|i| i as u8)
    }

    pub(crate) fn cell_size(&self, id: u8) -> usize {
        self.classes[id as usize].size
    }

    pub(crate) fn cell(&self, p: ItemPtr) -> &[u8] {
        let slab = &self.slabs[p.slab()];
        let size = self.classes[slab.id as usize].size;
        &slab.data[p.offset()..p.offset() + size]
    }

    pub(crate) fn cell_mut(&mut self, p: ItemPtr) -> &mut [u8] {
        let slab_id = self.slabs[p.slab()].id as usize;
        let size = self.classes[slab_id].size;
        let slab = &mut self.slabs[p.slab()];
        &mut slab.data[p.offset()..p.offset() + size]
    }

    /// Pop a reusable cell off the class free queue.
    pub(crate) fn take_free(&mut self, id: u8) -> Option<ItemPtr> {
        let p = self.classes[id as usize].free_q.pop()?;
        let use_cas = self.use_cas;
        let cell = self.cell_mut(p);
        item::init_hdr(cell, p.offset() as u32, id, use_cas);
        Some(p)
    }

    /// Take the next never-allocated cell in the class's current slab.
    pub(crate) fn take_next(&mut self, id: u8) -> Option<ItemPtr> {
        let (p, size) = {
            let c = &self.classes[id as usize];
            if c.next_item.is_null() {
                return None;
            }
            (c.next_item, c.size)
        };

        let use_cas = self.use_cas;
        item::init_hdr(self.cell_mut(p), p.offset() as u32, id, use_cas);

        let c = &mut self.classes[id as usize];
        c.nfree_item -= 1;
        c.next_item = if c.nfree_item == 0 {
            ItemPtr::NULL
        } else {
            ItemPtr::new(p.slab() as u32, (p.offset() + size) as u32)
        };
        Some(p)
    }

    /// Assign a slab (pooled or newly carved) to `id` as its current slab.
    /// Fails when the heap is at `maxbytes`.
    pub(crate) fn grow(&mut self, id: u8, now: u32) -> bool {
        debug_assert_eq!(self.classes[id as usize].nfree_item, 0);
        let idx = match self.free_slabs.pop() {
            Some(idx) => idx,
            None => {
                if self.slabs.len() >= self.nslab_max {
                    return false;
                }
                self.carve_slab()
            }
        };

        let slab = &mut self.slabs[idx as usize];
        slab.id = id;
        slab.utime = now;

        let c = &mut self.classes[id as usize];
        c.slabs.push(idx);
        c.next_item = ItemPtr::new(idx, 0);
        c.nfree_item = c.nitem;
        debug!("slab {} assigned to class {}", idx, id);
        true
    }

    /// Choose the eviction victim among the class's slabs: either uniformly
    /// at random or the least recently assigned one.
    pub(crate) fn pick_victim(&self, id: u8, random: bool) -> Option<u32> {
        let c = &self.classes[id as usize];
        if c.slabs.is_empty() {
            return None;
        }
        if random {
            use rand::Rng;
            let i = rand::thread_rng().gen_range(0..c.slabs.len());
            Some(c.slabs[i])
        } else {
            c.slabs
                .iter()
                .copied()
                .min_by_key(|&i| self.slabs[i as usize].utime)
        }
    }

    /// Reset an evicted slab to empty and make it the class's current slab.
    /// Free-queue entries pointing into it are dropped.
    pub(crate) fn reinit_slab(&mut self, victim: u32, now: u32) {
        let id = self.slabs[victim as usize].id as usize;
        self.slabs[victim as usize].utime = now;
        let c = &mut self.classes[id];
        c.free_q.retain(|p| p.slab() != victim as usize);
        debug_assert_eq!(c.nfree_item, 0);
        c.next_item = ItemPtr::new(victim, 0);
        c.nfree_item = c.nitem;
    }

    /// Put a cell on its class free queue.
    pub(crate) fn free_cell(&mut self, p: ItemPtr) {
        let cell = self.cell_mut(p);
        debug_assert!(!item::has_bit(cell, item::BIT_LINKED));
        item::set_bit(cell, item::BIT_IN_FREEQ, true);
        item::set_next(cell, ItemPtr::NULL);
        item::set_refcount(cell, 0);
        let id = item::id(cell) as usize;
        self.classes[id].free_q.push(p);
    }
}
