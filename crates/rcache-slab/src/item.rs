//! Item cell layout and the packed item handle.
//!
//! An item is a cell carved out of a slab:
//!
//! ```text
//!   <--------------------- class item size ------------------->
//!   +-------------+-----------+----------+--------------------+
//!   | item header | cas (opt) |   key    |       value        |
//!   +-------------+-----------+----------+--------------------+
//! ```
//!
//! The header is a fixed little-endian record; the hash index chains items
//! intrusively through its `next` field. All field access goes through the
//! helpers here so the byte layout lives in exactly one place.
//!
//! Header record:
//!
//! ```text
//!   0..8    next        intrusive hash-chain link (ItemPtr raw)
//!   8..12   expire_at   relative expiry time in secs
//!   12..16  create_at   time the item was last linked
//!   16..20  bits        flag bits | 27-bit value length
//!   20..24  offset      byte offset of this cell within its slab
//!   24      id          slab class id
//!   25      klen        key length
//!   26..28  refcount    concurrent users (owned-but-unlinked marker)
//! ```

pub(crate) const ITEM_HDR_SIZE: usize = 28;
pub(crate) const CAS_SIZE: usize = 8;

/// 27 bits of value length, as in the bit layout above.
pub(crate) const VLEN_MAX: u32 = (1 << 27) - 1;

const OFF_NEXT: usize = 0;
const OFF_EXPIRE: usize = 8;
const OFF_CREATE: usize = 12;
const OFF_BITS: usize = 16;
const OFF_OFFSET: usize = 20;
const OFF_ID: usize = 24;
const OFF_KLEN: usize = 25;
const OFF_REFCOUNT: usize = 26;

pub(crate) const BIT_LINKED: u32 = 1 << 31;
pub(crate) const BIT_HAS_CAS: u32 = 1 << 30;
pub(crate) const BIT_IN_FREEQ: u32 = 1 << 29;
pub(crate) const BIT_VNUM: u32 = 1 << 28;
pub(crate) const VLEN_MASK: u32 = VLEN_MAX;

/// Packed (slab index, byte offset) handle to one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ItemPtr(u64);

impl ItemPtr {
    pub(crate) const NULL: ItemPtr = ItemPtr(u64::MAX);

    pub(crate) fn new(slab: u32, offset: u32) -> Self {
        ItemPtr(((slab as u64) << 32) | offset as u64)
    }

    #[inline]
    pub(crate) fn slab(self) -> usize {
        (self.0 >> 32) as usize
    }

    #[inline]
    pub(crate) fn offset(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    #[inline]
    pub(crate) fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Self {
        ItemPtr(raw)
    }
}

#[inline]
fn get_u32(cell: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(cell[off..off + 4].try_into().unwrap())
}

#[inline]
fn put_u32(cell: &mut [u8], off: usize, v: u32) {
    cell[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn get_u64(cell: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(cell[off..off + 8].try_into().unwrap())
}

#[inline]
fn put_u64(cell: &mut [u8], off: usize, v: u64) {
    cell[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

// ── Header field access ──────────────────────────────────────────────

pub(crate) fn next(cell: &[u8]) -> ItemPtr {
    ItemPtr::from_raw(get_u64(cell, OFF_NEXT))
}

pub(crate) fn set_next(cell: &mut [u8], p: ItemPtr) {
    put_u64(cell, OFF_NEXT, p.raw());
}

pub(crate) fn expire_at(cell: &[u8]) -> u32 {
    get_u32(cell, OFF_EXPIRE)
}

pub(crate) fn set_expire_at(cell: &mut [u8], t: u32) {
    put_u32(cell, OFF_EXPIRE, t);
}

pub(crate) fn create_at(cell: &[u8]) -> u32 {
    get_u32(cell, OFF_CREATE)
}

pub(crate) fn set_create_at(cell: &mut [u8], t: u32) {
    put_u32(cell, OFF_CREATE, t);
}

pub(crate) fn bits(cell: &[u8]) -> u32 {
    get_u32(cell, OFF_BITS)
}

pub(crate) fn set_bits(cell: &mut [u8], b: u32) {
    put_u32(cell, OFF_BITS, b);
}

pub(crate) fn vlen(cell: &[u8]) -> u32 {
    bits(cell) & VLEN_MASK
}

pub(crate) fn set_vlen(cell: &mut [u8], n: u32) {
    debug_assert!(n <= VLEN_MAX);
    let b = bits(cell) & !VLEN_MASK;
    set_bits(cell, b | n);
}

pub(crate) fn has_bit(cell: &[u8], bit: u32) -> bool {
    bits(cell) & bit != 0
}

pub(crate) fn set_bit(cell: &mut [u8], bit: u32, on: bool) {
    let b = bits(cell);
    set_bits(cell, if on { b | bit } else { b & !bit });
}

pub(crate) fn offset(cell: &[u8]) -> u32 {
    get_u32(cell, OFF_OFFSET)
}

pub(crate) fn id(cell: &[u8]) -> u8 {
    cell[OFF_ID]
}

pub(crate) fn klen(cell: &[u8]) -> usize {
    cell[OFF_KLEN] as usize
}

pub(crate) fn refcount(cell: &[u8]) -> u16 {
    u16::from_le_bytes(cell[OFF_REFCOUNT..OFF_REFCOUNT + 2].try_into().unwrap())
}

pub(crate) fn set_refcount(cell: &mut [u8], n: u16) {
    cell[OFF_REFCOUNT..OFF_REFCOUNT + 2].copy_from_slice(&n.to_le_bytes());
}

/// Initialize a cell header for a freshly reserved item.
pub(crate) fn init_hdr(cell: &mut [u8], slab_offset: u32, class_id: u8, has_cas: bool) {
    set_next(cell, ItemPtr::NULL);
    set_expire_at(cell, 0);
    set_create_at(cell, 0);
    set_bits(cell, if has_cas { BIT_HAS_CAS } else { 0 });
    put_u32(cell, OFF_OFFSET, slab_offset);
    cell[OFF_ID] = class_id;
    cell[OFF_KLEN] = 0;
    set_refcount(cell, 1);
}

// ── Payload access ───────────────────────────────────────────────────

pub(crate) fn cas(cell: &[u8]) -> u64 {
    if has_bit(cell, BIT_HAS_CAS) {
        get_u64(cell, ITEM_HDR_SIZE)
    } else {
        0
    }
}

pub(crate) fn set_cas(cell: &mut [u8], v: u64) {
    if has_bit(cell, BIT_HAS_CAS) {
        put_u64(cell, ITEM_HDR_SIZE, v);
    }
}

pub(crate) fn key_pos(cell: &[u8]) -> usize {
    ITEM_HDR_SIZE + if has_bit(cell, BIT_HAS_CAS) { CAS_SIZE } else { 0 }
}

pub(crate) fn key(cell: &[u8]) -> &[u8] {
    let kpos = key_pos(cell);
    &cell[kpos..kpos + klen(cell)]
}

pub(crate) fn set_key(cell: &mut [u8], k: &[u8]) {
    debug_assert!(k.len() <= u8::MAX as usize);
    cell[OFF_KLEN] = k.len() as u8;
    let kpos = key_pos(cell);
    cell[kpos..kpos + k.len()].copy_from_slice(k);
}

pub(crate) fn val_pos(cell: &[u8]) -> usize {
    key_pos(cell) + klen(cell)
}

pub(crate) fn val(cell: &[u8]) -> &[u8] {
    let vpos = val_pos(cell);
    let n = vlen(cell) as usize;
    &cell[vpos..vpos + n]
}

pub(crate) fn set_val(cell: &mut [u8], v: &[u8], numeric: bool) {
    let vpos = val_pos(cell);
    cell[vpos..vpos + v.len()].copy_from_slice(v);
    set_vlen(cell, v.len() as u32);
    set_bit(cell, BIT_VNUM, numeric);
}

/// Bytes this item occupies inside its cell.
pub(crate) fn ntotal(klen: usize, vlen: usize, has_cas: bool) -> usize {
    ITEM_HDR_SIZE + if has_cas { CAS_SIZE } else { 0 } + klen + vlen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_packs_and_unpacks() {
        let p = ItemPtr::new(3, 4096);
        assert_eq!(p.slab(), 3);
        assert_eq!(p.offset(), 4096);
        assert!(!p.is_null());
        assert!(ItemPtr::NULL.is_null());
    }

    #[test]
    fn test_header_roundtrip() {
        let mut cell = vec![0u8; 256];
        init_hdr(&mut cell, 512, 7, true);
        assert_eq!(id(&cell), 7);
        assert_eq!(offset(&cell), 512);
        assert!(has_bit(&cell, BIT_HAS_CAS));
        assert!(!has_bit(&cell, BIT_LINKED));
        assert_eq!(refcount(&cell), 1);

        set_expire_at(&mut cell, 1000);
        set_create_at(&mut cell, 5);
        set_next(&mut cell, ItemPtr::new(1, 2));
        assert_eq!(expire_at(&cell), 1000);
        assert_eq!(create_at(&cell), 5);
        assert_eq!(next(&cell), ItemPtr::new(1, 2));
    }

    #[test]
    fn test_key_val_layout_with_cas() {
        let mut cell = vec![0u8; 256];
        init_hdr(&mut cell, 0, 1, true);
        set_key(&mut cell, b"foo");
        set_val(&mut cell, b"barbar", false);
        set_cas(&mut cell, 99);

        assert_eq!(key(&cell), b"foo");
        assert_eq!(val(&cell), b"barbar");
        assert_eq!(cas(&cell), 99);
        assert_eq!(key_pos(&cell), ITEM_HDR_SIZE + CAS_SIZE);
    }

    #[test]
    fn test_no_cas_layout_is_tighter() {
        let mut cell = vec![0u8; 256];
        init_hdr(&mut cell, 0, 1, false);
        set_key(&mut cell, b"k");
        set_val(&mut cell, b"v", false);
        assert_eq!(key_pos(&cell), ITEM_HDR_SIZE);
        assert_eq!(cas(&cell), 0);
        set_cas(&mut cell, 5);
        assert_eq!(cas(&cell), 0);
    }

    #[test]
    fn test_vlen_and_flags_share_bits() {
        let mut cell = vec![0u8; 64];
        init_hdr(&mut cell, 0, 1, false);
        set_vlen(&mut cell, 12345);
        set_bit(&mut cell, BIT_LINKED, true);
        set_bit(&mut cell, BIT_VNUM, true);
        assert_eq!(vlen(&cell), 12345);
        assert!(has_bit(&cell, BIT_LINKED));
        set_vlen(&mut cell, 7);
        assert!(has_bit(&cell, BIT_LINKED));
        assert!(has_bit(&cell, BIT_VNUM));
        assert_eq!(vlen(&cell), 7);
    }

    #[test]
    fn test_ntotal() {
        assert_eq!(ntotal(3, 5, false), ITEM_HDR_SIZE + 8);
        assert_eq!(ntotal(3, 5, true), ITEM_HDR_SIZE + CAS_SIZE + 8);
    }
}
