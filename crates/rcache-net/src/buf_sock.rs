//! Buffered socket: one TCP connection bound to a read/write buffer pair.
//!
//! `BufSock`s are pool-backed. The acceptor borrows one per accepted
//! connection and hands it to the worker through the ring; the worker
//! releases it into its own pool on close. Reset closes any lingering
//! descriptor and restores both buffers to their initial size.

use rcache_core::buf::Buf;
use rcache_core::pool::Reset;

use crate::tcp::TcpConn;

#[derive(Debug)]
pub struct BufSock {
    pub ch: TcpConn,
    pub rbuf: Buf,
    pub wbuf: Buf,
}

impl BufSock {
    pub fn new(rbuf_size: usize, wbuf_size: usize) -> Self {
        BufSock {
            ch: TcpConn::detached(),
            rbuf: Buf::new(rbuf_size),
            wbuf: Buf::new(wbuf_size),
        }
    }

    /// Bind an established connection to this socket's buffers.
    pub fn attach(&mut self, ch: TcpConn) {
        debug_assert!(!self.ch.is_open());
        self.ch = ch;
    }
}

impl Reset for BufSock {
    fn reset(&mut self) {
        self.ch.close();
        self.rbuf.reset();
        self.rbuf.shrink();
        self.wbuf.reset();
        self.wbuf.shrink();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcache_core::pool::Pool;

    #[test]
    fn test_new_is_detached() {
        let s = BufSock::new(64, 64);
        assert!(!s.ch.is_open());
        assert_eq!(s.rbuf.capacity(), 64);
        assert_eq!(s.wbuf.capacity(), 64);
    }

    #[test]
    fn test_reset_clears_buffers() {
        let mut s = BufSock::new(64, 64);
        s.rbuf.write(b"leftover");
        s.wbuf.write(b"partial");
        s.reset();
        assert!(s.rbuf.is_empty());
        assert!(s.wbuf.is_empty());
    }

    #[test]
    fn test_pool_recycles_buf_sock() {
        let mut pool: Pool<BufSock> = Pool::new(2);
        let mut s = pool.acquire(|| BufSock::new(64, 64)).unwrap();
        s.rbuf.write(b"junk");
        pool.release(s);
        let s = pool.acquire(|| BufSock::new(64, 64)).unwrap();
        assert!(s.rbuf.is_empty());
    }
}
