//! Acceptor thread: owns the listening socket, hands connections off.
//!
//! The only jobs here are accept, borrow a buffered socket, push it onto
//! the SPSC ring, and write one wake-up byte into the pipe. Anything that
//! cannot be handed off (full ring) is rejected by closing the connection;
//! the acceptor never touches storage or parses a byte of protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use rcache_core::metrics;
use rcache_core::pool::Pool;
use rcache_core::ring::{RingConsumer, RingProducer};
use rcache_core::time;
use rcache_net::buf_sock::BufSock;
use rcache_net::event::{EventBase, EVENT_READ, EVENT_WRITE};
use rcache_net::pipe::PipeTx;
use rcache_net::tcp::TcpConn;

const TOKEN_LISTENER: u64 = 0;
const TOKEN_PIPE: u64 = 1;

metrics! {
    pub struct ServerMetrics {
        server_event_loop: Counter => "event loop returns",
        server_accept: Counter => "connections accepted",
        server_reject: Counter => "connections rejected",
    }
}

#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    pub timeout_ms: i32,
    pub nevent: usize,
    pub backlog: i32,
    pub buf_init_size: usize,
    /// Bound on pooled idle sockets (0 = unbounded, create on borrow).
    pub buf_sock_poolsize: usize,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        AcceptorConfig {
            timeout_ms: 100,
            nevent: 1024,
            backlog: 1024,
            buf_init_size: rcache_core::buf::BUF_INIT_SIZE,
            buf_sock_poolsize: 0,
        }
    }
}

pub struct Acceptor {
    evb: EventBase,
    listener: TcpConn,
    pool: Pool<BufSock>,
    ring: RingProducer<BufSock>,
    /// Sockets the worker has closed and emptied, coming back for reuse.
    back: RingConsumer<BufSock>,
    pipe: PipeTx,
    /// Wake-up bytes that still need to reach the pipe.
    pending_wake: usize,
    wake_armed: bool,
    ready: Vec<(u64, u32)>,
    cfg: AcceptorConfig,
    metrics: Arc<ServerMetrics>,
}

impl Acceptor {
    pub fn new(
        addr: &SocketAddr,
        cfg: AcceptorConfig,
        ring: RingProducer<BufSock>,
        back: RingConsumer<BufSock>,
        pipe: PipeTx,
    ) -> std::io::Result<Acceptor> {
        let listener = TcpConn::listen(addr, cfg.backlog)?;
        let evb = EventBase::new(cfg.nevent)?;
        evb.add_read(listener.fd(), TOKEN_LISTENER)?;
        info!("server core ready on {}", addr);
        Ok(Acceptor {
            evb,
            listener,
            pool: Pool::new(cfg.buf_sock_poolsize),
            ring,
            back,
            pipe,
            pending_wake: 0,
            wake_armed: false,
            ready: Vec::new(),
            cfg,
            metrics: Arc::new(ServerMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// The bound address, useful when listening on port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(mut self) {
        loop {
            if self.run_once() < 0 {
                error!("server event loop failed, exiting");
                return;
            }
        }
    }

    pub fn run_once(&mut self) -> i32 {
        let timeout = self.cfg.timeout_ms;
        let Acceptor { evb, ready, .. } = &mut *self;
        ready.clear();
        let n = evb.wait(timeout, |token, events| {
            ready.push((token, events));
        });
        if n < 0 {
            return n;
        }

        time::update();
        self.metrics.server_event_loop.incr();

        // recycle sockets the worker is done with
        while let Some(sock) = self.back.pop() {
            self.pool.release(sock);
        }

        for i in 0..self.ready.len() {
            let (token, events) = self.ready[i];
            match token {
                TOKEN_LISTENER => {
                    if events & EVENT_READ != 0 {
                        self.accept_all();
                    }
                }
                TOKEN_PIPE => {
                    if events & EVENT_WRITE != 0 {
                        self.flush_wake();
                    }
                }
                _ => {}
            }
        }
        n
    }

    fn accept_all(&mut self) {
        loop {
            let conn = match self.listener.accept() {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            };

            let buf_init = self.cfg.buf_init_size;
            let Some(mut sock) = self.pool.acquire(|| BufSock::new(buf_init, buf_init)) else {
                warn!("buf_sock pool exhausted, rejecting connection");
                self.metrics.server_reject.incr();
                drop(conn);
                continue;
            };
            sock.attach(conn);

            match self.ring.push(sock) {
                Ok(()) => {
                    self.metrics.server_accept.incr();
                    self.pending_wake += 1;
                }
                Err(mut sock) => {
                    warn!("connection ring full, rejecting");
                    self.metrics.server_reject.incr();
                    sock.ch.close();
                    self.pool.release(sock);
                }
            }
        }
        self.flush_wake();
    }

    /// Write one byte per handed-off socket; on a full pipe, arm a write
    /// event and finish later.
    fn flush_wake(&mut self) {
        let wake = [0u8; 64];
        while self.pending_wake > 0 {
            let n = self.pending_wake.min(wake.len());
            match self.pipe.send(&wake[..n]) {
                Ok(sent) => {
                    self.pending_wake -= sent;
                    if sent < n {
                        self.arm_wake();
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.arm_wake();
                    return;
                }
                Err(e) => {
                    error!("pipe write failed: {}", e);
                    return;
                }
            }
        }
        if self.wake_armed {
            let _ = self.evb.del(self.pipe.fd());
            self.wake_armed = false;
        }
        debug!("wake-up pipe drained");
    }

    fn arm_wake(&mut self) {
        if !self.wake_armed {
            let _ = self.evb.add_write(self.pipe.fd(), TOKEN_PIPE);
            self.wake_armed = true;
        }
    }
}
