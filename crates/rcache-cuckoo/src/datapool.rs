//! Backing storage for the cuckoo table: anonymous heap memory, or a
//! file-backed mapping that survives a restart.
//!
//! The file layout is a 4 KiB header followed by the raw cell array:
//!
//! ```text
//!   0..8    magic        "RCCKPOOL"
//!   8..12   version
//!   12..16  (reserved)
//!   16..24  data size in bytes
//!   24..72  signature, NUL-padded
//! ```
//!
//! On open, a wrong magic or size means the file is from another world and
//! is silently reinitialized; a right magic with a wrong signature means
//! the operator pointed two differently-configured servers at one file,
//! which is a hard error.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::ptr;

use log::{info, warn};
use thiserror::Error;

const DATAPOOL_MAGIC: &[u8; 8] = b"RCCKPOOL";
const DATAPOOL_VERSION: u32 = 1;
const DATAPOOL_HDR_SIZE: usize = 4096;

/// Longest signature the header can hold.
pub const SIGNATURE_MAX: usize = 47;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_SIZE: usize = 16;
const OFF_SIGNATURE: usize = 24;

#[derive(Debug, Error)]
pub enum DatapoolError {
    #[error("signature longer than {SIGNATURE_MAX} bytes")]
    SignatureTooLong,
    #[error("data pool signature mismatch: file has {found:?}, expected {expected:?}")]
    SignatureMismatch { found: String, expected: String },
    #[error("data pool io: {0}")]
    Io(#[from] io::Error),
}

pub(crate) enum Datapool {
    Heap(Box<[u8]>),
    File(MmapPool),
}

impl Datapool {
    pub(crate) fn heap(size: usize) -> Datapool {
        Datapool::Heap(vec![0; size].into_boxed_slice())
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Datapool::Heap(b) => b,
            Datapool::File(m) => m.data(),
        }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Datapool::Heap(b) => b,
            Datapool::File(m) => m.data_mut(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MmapPool {
    base: *mut u8,
    map_len: usize,
    data_len: usize,
}

// Exactly one engine owns the mapping; it never aliases across threads.
unsafe impl Send for MmapPool {}

impl MmapPool {
    /// Map `path`, creating or reinitializing as needed. Returns the pool
    /// and whether its contents are fresh (zeroed) rather than reused.
    pub(crate) fn open(
        path: &Path,
        signature: &str,
        size: usize,
        prefault: bool,
    ) -> Result<(MmapPool, bool), DatapoolError> {
        if signature.len() > SIGNATURE_MAX {
            return Err(DatapoolError::SignatureTooLong);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let old_len = file.metadata()?.len();
        let map_len = DATAPOOL_HDR_SIZE + size;
        file.set_len(map_len as u64)?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                std::os::fd::AsRawFd::as_raw_fd(&file),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(DatapoolError::Io(io::Error::last_os_error()));
        }

        let mut pool = MmapPool {
            base: base as *mut u8,
            map_len,
            data_len: size,
        };

        let fresh = if old_len < DATAPOOL_HDR_SIZE as u64 {
            true
        } else {
            let hdr = pool.header();
            &hdr[OFF_MAGIC..OFF_MAGIC + 8] != DATAPOOL_MAGIC
                || u64::from_le_bytes(hdr[OFF_SIZE..OFF_SIZE + 8].try_into().unwrap())
                    != size as u64
        };

        if fresh {
            warn!("data pool {:?} is new or incompatible, starting fresh", path);
            pool.data_mut().fill(0);
            pool.write_header(signature, size);
        } else {
            let found = pool.signature();
            if found != signature {
                unsafe {
                    libc::munmap(pool.base as *mut libc::c_void, pool.map_len);
                }
                std::mem::forget(pool);
                return Err(DatapoolError::SignatureMismatch {
                    found,
                    expected: signature.to_string(),
                });
            }
            info!("data pool {:?} reattached, contents preserved", path);
        }

        if prefault {
            let data = pool.data_mut();
            let mut i = 0;
            while i < data.len() {
                // touch one byte per page to fault the mapping in
                let b = data[i];
                data[i] = b;
                i += 4096;
            }
        }

        Ok((pool, fresh))
    }

    fn header(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, DATAPOOL_HDR_SIZE) }
    }

    fn header_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, DATAPOOL_HDR_SIZE) }
    }

    fn write_header(&mut self, signature: &str, size: usize) {
        let hdr = self.header_mut();
        hdr.fill(0);
        hdr[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(DATAPOOL_MAGIC);
        hdr[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&DATAPOOL_VERSION.to_le_bytes());
        hdr[OFF_SIZE..OFF_SIZE + 8].copy_from_slice(&(size as u64).to_le_bytes());
        hdr[OFF_SIGNATURE..OFF_SIGNATURE + signature.len()]
            .copy_from_slice(signature.as_bytes());
    }

    fn signature(&self) -> String {
        let hdr = self.header();
        let raw = &hdr[OFF_SIGNATURE..OFF_SIGNATURE + SIGNATURE_MAX + 1];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub(crate) fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.add(DATAPOOL_HDR_SIZE), self.data_len) }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.add(DATAPOOL_HDR_SIZE), self.data_len) }
    }
}

impl Drop for MmapPool {
    fn drop(&mut self) {
        unsafe {
            if libc::msync(self.base as *mut libc::c_void, self.map_len, libc::MS_SYNC) < 0 {
                warn!("msync on data pool failed: {}", io::Error::last_os_error());
            }
            libc::munmap(self.base as *mut libc::c_void, self.map_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_pool_is_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        let (pool, fresh) = MmapPool::open(&path, "sig", 8192, false).unwrap();
        assert!(fresh);
        assert!(pool.data().iter().all(|&b| b == 0));
        assert_eq!(pool.data().len(), 8192);
    }

    #[test]
    fn test_reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        {
            let (mut pool, fresh) = MmapPool::open(&path, "sig", 4096, false).unwrap();
            assert!(fresh);
            pool.data_mut()[0..4].copy_from_slice(b"abcd");
        }
        let (pool, fresh) = MmapPool::open(&path, "sig", 4096, false).unwrap();
        assert!(!fresh);
        assert_eq!(&pool.data()[0..4], b"abcd");
    }

    #[test]
    fn test_size_mismatch_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        {
            let (mut pool, _) = MmapPool::open(&path, "sig", 4096, false).unwrap();
            pool.data_mut()[0] = 0xff;
        }
        let (pool, fresh) = MmapPool::open(&path, "sig", 8192, false).unwrap();
        assert!(fresh);
        assert_eq!(pool.data()[0], 0);
    }

    #[test]
    fn test_signature_mismatch_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        drop(MmapPool::open(&path, "one", 4096, false).unwrap());
        let err = MmapPool::open(&path, "two", 4096, false).unwrap_err();
        assert!(matches!(err, DatapoolError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_signature_length_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        let long = "s".repeat(SIGNATURE_MAX + 1);
        assert!(matches!(
            MmapPool::open(&path, &long, 4096, false),
            Err(DatapoolError::SignatureTooLong)
        ));
        let ok = "s".repeat(SIGNATURE_MAX);
        assert!(MmapPool::open(&path, &ok, 4096, false).is_ok());
    }
}
