//! Cuckoo cell layout.
//!
//! All cells have the same size. A cell is valid while `expire > now`;
//! `expire == 0` doubles as the delete sentinel. Numeric values are kept
//! as a raw little-endian u64 so arithmetic commands mutate them in place.
//!
//! ```text
//!   0..4   expire     relative expiry in secs; 0 = empty/deleted
//!   4      klen
//!   5      vlen       string length (numeric values store 8 raw bytes)
//!   6      vtype      0 = string, 1 = u64
//!   7      (pad)
//!   8..16  cas        (only when cas is enabled)
//!   ...    key, value
//! ```

use rcache_core::time;

pub(crate) const CELL_HDR_SIZE: usize = 8;
pub(crate) const CAS_SIZE: usize = 8;

pub(crate) const VTYPE_STR: u8 = 0;
pub(crate) const VTYPE_NUM: u8 = 1;

const OFF_EXPIRE: usize = 0;
const OFF_KLEN: usize = 4;
const OFF_VLEN: usize = 5;
const OFF_VTYPE: usize = 6;

/// Fixed per-item bytes in a cell.
pub(crate) fn overhead(use_cas: bool) -> usize {
    CELL_HDR_SIZE + if use_cas { CAS_SIZE } else { 0 }
}

pub(crate) fn expire(cell: &[u8]) -> u32 {
    u32::from_le_bytes(cell[OFF_EXPIRE..OFF_EXPIRE + 4].try_into().unwrap())
}

pub(crate) fn set_expire(cell: &mut [u8], t: u32) {
    cell[OFF_EXPIRE..OFF_EXPIRE + 4].copy_from_slice(&t.to_le_bytes());
}

pub(crate) fn klen(cell: &[u8]) -> usize {
    cell[OFF_KLEN] as usize
}

pub(crate) fn vlen(cell: &[u8]) -> usize {
    cell[OFF_VLEN] as usize
}

pub(crate) fn vtype(cell: &[u8]) -> u8 {
    cell[OFF_VTYPE]
}

pub(crate) fn is_valid(cell: &[u8]) -> bool {
    expire(cell) > time::now()
}

/// Occupied once but no longer live (and not deleted).
pub(crate) fn is_expired(cell: &[u8]) -> bool {
    let e = expire(cell);
    e > 0 && e <= time::now()
}

pub(crate) fn key_pos(use_cas: bool) -> usize {
    overhead(use_cas)
}

pub(crate) fn key(cell: &[u8], use_cas: bool) -> &[u8] {
    let kpos = key_pos(use_cas);
    &cell[kpos..kpos + klen(cell)]
}

pub(crate) fn matches(cell: &[u8], k: &[u8], use_cas: bool) -> bool {
    klen(cell) == k.len() && key(cell, use_cas) == k
}

pub(crate) fn val_pos(cell: &[u8], use_cas: bool) -> usize {
    key_pos(use_cas) + klen(cell)
}

pub(crate) fn val_str(cell: &[u8], use_cas: bool) -> &[u8] {
    let vpos = val_pos(cell, use_cas);
    &cell[vpos..vpos + vlen(cell)]
}

pub(crate) fn val_num(cell: &[u8], use_cas: bool) -> u64 {
    let vpos = val_pos(cell, use_cas);
    u64::from_le_bytes(cell[vpos..vpos + 8].try_into().unwrap())
}

pub(crate) fn cas(cell: &[u8], use_cas: bool) -> u64 {
    if use_cas {
        u64::from_le_bytes(cell[CELL_HDR_SIZE..CELL_HDR_SIZE + 8].try_into().unwrap())
    } else {
        // 0 is "disabled/unset"; compares against it always fail
        0
    }
}

pub(crate) fn set_cas(cell: &mut [u8], v: u64, use_cas: bool) {
    if use_cas {
        cell[CELL_HDR_SIZE..CELL_HDR_SIZE + 8].copy_from_slice(&v.to_le_bytes());
    }
}

/// Stored byte length of a value.
pub(crate) fn store_vlen(val: &[u8], numeric: bool) -> usize {
    if numeric {
        8
    } else {
        val.len()
    }
}

/// Overwrite the value (and expiry) of a cell in place.
pub(crate) fn update(cell: &mut [u8], val: &[u8], num: Option<u64>, expire_at: u32, use_cas: bool) {
    set_expire(cell, expire_at);
    let vpos = val_pos(cell, use_cas);
    match num {
        Some(n) => {
            cell[OFF_VLEN] = 8;
            cell[OFF_VTYPE] = VTYPE_NUM;
            cell[vpos..vpos + 8].copy_from_slice(&n.to_le_bytes());
        }
        None => {
            cell[OFF_VLEN] = val.len() as u8;
            cell[OFF_VTYPE] = VTYPE_STR;
            cell[vpos..vpos + val.len()].copy_from_slice(val);
        }
    }
}

/// Write a whole item into a cell.
pub(crate) fn set(
    cell: &mut [u8],
    k: &[u8],
    val: &[u8],
    num: Option<u64>,
    expire_at: u32,
    use_cas: bool,
) {
    cell[OFF_KLEN] = k.len() as u8;
    let kpos = key_pos(use_cas);
    cell[kpos..kpos + k.len()].copy_from_slice(k);
    update(cell, val, num, expire_at, use_cas);
}

pub(crate) fn delete(cell: &mut [u8]) {
    set_expire(cell, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_item_roundtrip() {
        rcache_core::time::setup();
        let mut cell = vec![0u8; 64];
        set(&mut cell, b"key", b"value", None, 100, true);
        assert!(matches(&cell, b"key", true));
        assert!(!matches(&cell, b"other", true));
        assert_eq!(val_str(&cell, true), b"value");
        assert_eq!(vtype(&cell), VTYPE_STR);
        assert!(is_valid(&cell));
    }

    #[test]
    fn test_numeric_item_stores_raw_u64() {
        let mut cell = vec![0u8; 64];
        set(&mut cell, b"n", b"12345", Some(12345), 100, true);
        assert_eq!(vtype(&cell), VTYPE_NUM);
        assert_eq!(vlen(&cell), 8);
        assert_eq!(val_num(&cell, true), 12345);
    }

    #[test]
    fn test_delete_sentinel() {
        let mut cell = vec![0u8; 64];
        set(&mut cell, b"k", b"v", None, 100, true);
        delete(&mut cell);
        assert!(!is_valid(&cell));
        assert!(!is_expired(&cell));
        assert_eq!(expire(&cell), 0);
    }

    #[test]
    fn test_cas_disabled_reads_zero() {
        let mut cell = vec![0u8; 64];
        set(&mut cell, b"k", b"v", None, 100, false);
        set_cas(&mut cell, 42, false);
        assert_eq!(cas(&cell, false), 0);
        assert_eq!(key_pos(false), CELL_HDR_SIZE);
    }
}
