//! Unnamed pipe used to wake the worker after a connection hand-off.
//!
//! Both ends are non-blocking. The acceptor writes one byte per handed-off
//! connection; the worker reads exactly as many bytes as connections it
//! drains from the ring, so the pipe level always mirrors the ring level.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::debug;
use nix::fcntl::OFlag;
use nix::unistd;

/// Read half, owned by the worker.
#[derive(Debug)]
pub struct PipeRx {
    fd: OwnedFd,
}

/// Write half, owned by the acceptor.
#[derive(Debug)]
pub struct PipeTx {
    fd: OwnedFd,
}

/// Create a non-blocking pipe pair.
pub fn pipe_pair() -> io::Result<(PipeRx, PipeTx)> {
    let (rd, wr) = unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    debug!(
        "created pipe pair: read fd {} write fd {}",
        rd.as_raw_fd(),
        wr.as_raw_fd()
    );
    Ok((PipeRx { fd: rd }, PipeTx { fd: wr }))
}

impl PipeRx {
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Drain up to `buf.len()` bytes; `WouldBlock` when the pipe is empty.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::read(self.fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }
}

impl PipeTx {
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Write `buf`; short writes and `WouldBlock` are the caller's problem
    /// (it registers a write event and retries).
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n =
                unsafe { libc::write(self.fd(), buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_recv_one_byte() {
        let (rx, tx) = pipe_pair().unwrap();
        assert_eq!(tx.send(b"x").unwrap(), 1);
        let mut buf = [0u8; 4];
        assert_eq!(rx.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn test_recv_would_block_when_empty() {
        let (rx, _tx) = pipe_pair().unwrap();
        let mut buf = [0u8; 1];
        let err = rx.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_level_matches_bytes_written() {
        let (rx, tx) = pipe_pair().unwrap();
        for _ in 0..3 {
            tx.send(b"x").unwrap();
        }
        let mut buf = [0u8; 2];
        assert_eq!(rx.recv(&mut buf).unwrap(), 2);
        let mut rest = [0u8; 8];
        assert_eq!(rx.recv(&mut rest).unwrap(), 1);
    }
}
