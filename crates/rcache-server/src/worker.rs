//! Worker thread: the I/O reactor over all accepted connections.
//!
//! One event base, one connection table, one storage engine. Tokens in the
//! event base are connection-table indices, with a reserved token for the
//! wake-up pipe. Per readable connection the loop is: fill the read
//! buffer, parse and process every complete request in it, compose replies
//! into the write buffer, drain it, shift buffers.
//!
//! Ordering: requests on one connection are parsed, processed and
//! answered strictly in arrival order; the read buffer is only shifted
//! once no parked request holds spans into it.

use std::sync::Arc;

use log::{debug, error, info, warn};

use rcache_core::buf::BufError;
use rcache_core::metrics;
use rcache_core::pool::{Pool, Reset};
use rcache_core::ring::{RingConsumer, RingProducer, RING_DEFAULT_CAP};
use rcache_core::store::DataStore;
use rcache_core::time;
use rcache_net::buf_sock::BufSock;
use rcache_net::event::{EventBase, EVENT_ERR, EVENT_READ, EVENT_WRITE};
use rcache_net::pipe::PipeRx;
use rcache_protocol::parse::{parse_req, ParseResult};
use rcache_protocol::request::{ParseState, Request};
use rcache_protocol::response::{compose, Response, RspMsg};

use crate::process::{PostAction, Processor, ERR_OVERSIZED};

/// Token of the wake-up pipe in the worker's event base.
const TOKEN_PIPE: u64 = u64::MAX;

metrics! {
    pub struct WorkerMetrics {
        worker_event_loop: Counter => "event loop returns",
        worker_event_total: Counter => "events handled",
        conn_active: Gauge => "connections on this worker",
        conn_total: Counter => "connections ever taken",
        conn_close: Counter => "connections closed",
        bytes_read: Counter => "bytes received",
        bytes_sent: Counter => "bytes sent",
        request_parse: Counter => "requests parsed",
        request_parse_ex: Counter => "protocol errors",
        request_swallow: Counter => "oversized payloads swallowed",
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub timeout_ms: i32,
    pub nevent: usize,
    /// Doubling cap for both connection buffers.
    pub dbuf_max_power: u32,
    /// Largest value payload buffered before swallowing.
    pub max_vlen: u32,
    /// Bound on pooled idle requests (0 = unbounded).
    pub request_poolsize: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            timeout_ms: 100,
            nevent: 1024,
            dbuf_max_power: rcache_core::buf::DBUF_MAX_POWER,
            max_vlen: 512 * 1024,
            request_poolsize: 0,
        }
    }
}

struct Conn {
    sock: BufSock,
    /// Request parked mid-value; its spans pin the read buffer layout.
    req: Option<Request>,
    /// Oversized payload bytes still to discard.
    swallow: usize,
    close_after_write: bool,
    peer: String,
}

pub struct Worker<S: DataStore> {
    evb: EventBase,
    conns: Vec<Option<Conn>>,
    free: Vec<usize>,
    /// Slots freed during the current event batch; reusable only after the
    /// batch so stale events cannot land on a fresh connection.
    freed: Vec<usize>,
    ring: RingConsumer<BufSock>,
    /// Emptied sockets flow back to the acceptor's pool through here.
    back: RingProducer<BufSock>,
    pipe: PipeRx,
    processor: Processor<S>,
    req_pool: Pool<Request>,
    ready: Vec<(u64, u32)>,
    cfg: WorkerConfig,
    metrics: Arc<WorkerMetrics>,
}

impl<S: DataStore> Worker<S> {
    pub fn new(
        cfg: WorkerConfig,
        ring: RingConsumer<BufSock>,
        back: RingProducer<BufSock>,
        pipe: PipeRx,
        processor: Processor<S>,
    ) -> std::io::Result<Self> {
        let evb = EventBase::new(cfg.nevent)?;
        evb.add_read(pipe.fd(), TOKEN_PIPE)?;
        info!("worker core ready, timeout {}ms", cfg.timeout_ms);
        Ok(Worker {
            evb,
            conns: Vec::new(),
            free: Vec::new(),
            freed: Vec::new(),
            ring,
            back,
            pipe,
            processor,
            req_pool: Pool::new(cfg.request_poolsize),
            ready: Vec::new(),
            cfg,
            metrics: Arc::new(WorkerMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    pub fn run(mut self) {
        loop {
            if self.run_once() < 0 {
                error!("worker event loop failed, exiting");
                return;
            }
        }
    }

    /// One event-wait round. Exposed separately so tests can drive the
    /// loop by hand.
    pub fn run_once(&mut self) -> i32 {
        let timeout = self.cfg.timeout_ms;
        let Worker { evb, ready, .. } = &mut *self;
        ready.clear();
        let n = evb.wait(timeout, |token, events| {
            ready.push((token, events));
        });
        if n < 0 {
            return n;
        }

        time::update();
        self.metrics.worker_event_loop.incr();
        self.metrics.worker_event_total.incr_n(n as u64);

        for i in 0..self.ready.len() {
            let (token, events) = self.ready[i];
            self.handle(token, events);
        }

        // stale events for this batch are gone; slots may be reused
        self.free.append(&mut self.freed);
        n
    }

    fn handle(&mut self, token: u64, events: u32) {
        if token == TOKEN_PIPE {
            if events & EVENT_READ != 0 {
                self.add_conns();
            }
            return;
        }

        let idx = token as usize;
        if self.conns.get(idx).map_or(true, |c| c.is_none()) {
            return;
        }

        if events & EVENT_ERR != 0 {
            self.close(idx);
            return;
        }
        if events & EVENT_READ != 0 {
            self.read(idx);
        }
        if events & EVENT_WRITE != 0 && self.conns[idx].is_some() {
            self.flush_wbuf(idx);
        }
    }

    /// Drain newly handed-off sockets: up to the ring capacity per wakeup,
    /// and exactly as many pipe bytes as sockets taken.
    fn add_conns(&mut self) {
        let mut taken = 0;
        while taken < RING_DEFAULT_CAP {
            let sock = match self.ring.pop() {
                Some(s) => s,
                None => break,
            };
            taken += 1;

            let idx = match self.free.pop() {
                Some(i) => i,
                None => {
                    self.conns.push(None);
                    self.conns.len() - 1
                }
            };
            let fd = sock.ch.fd();
            let peer = sock
                .ch
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "-".to_string());
            debug!("worker takes fd {} from {} as conn {}", fd, peer, idx);

            self.conns[idx] = Some(Conn {
                sock,
                req: None,
                swallow: 0,
                close_after_write: false,
                peer,
            });
            self.metrics.conn_total.incr();
            self.metrics.conn_active.incr();

            if self.evb.add_read(fd, idx as u64).is_err() {
                warn!("cannot register fd {}, dropping connection", fd);
                self.close(idx);
            }
        }

        if taken > 0 {
            let mut drain = vec![0u8; taken];
            let _ = self.pipe.recv(&mut drain);
        }
    }

    fn close(&mut self, idx: usize) {
        let Some(mut conn) = self.conns[idx].take() else {
            return;
        };
        debug!("closing conn {} ({})", idx, conn.peer);
        let _ = self.evb.del(conn.sock.ch.fd());
        if let Some(req) = conn.req.take() {
            self.req_pool.release(req);
        }
        // hand the emptied socket back to the acceptor; dropping it is
        // fine when the return ring is full
        let mut sock = conn.sock;
        sock.reset();
        let _ = self.back.push(sock);
        self.freed.push(idx);
        self.metrics.conn_active.decr();
        self.metrics.conn_close.incr();
    }

    fn read(&mut self, idx: usize) {
        loop {
            let Some(conn) = self.conns[idx].as_mut() else {
                return;
            };
            if conn.sock.rbuf.wsize() == 0 {
                match conn.sock.rbuf.double(self.cfg.dbuf_max_power) {
                    Ok(()) => {}
                    Err(BufError::ExceedsMax) | Err(BufError::WontFit) => {
                        // a single request larger than the buffer cap can
                        // never complete
                        warn!("conn {}: request exceeds buffer limit", idx);
                        self.close(idx);
                        return;
                    }
                }
            }

            let conn = match self.conns[idx].as_mut() {
                Some(c) => c,
                None => return,
            };
            let r = {
                let buf = conn.sock.rbuf.writable();
                conn.sock.ch.recv(buf)
            };
            match r {
                Ok(0) => {
                    self.close(idx);
                    return;
                }
                Ok(n) => {
                    conn.sock.rbuf.produce(n);
                    self.metrics.bytes_read.incr_n(n as u64);
                    if conn.sock.rbuf.wsize() > 0 {
                        break; // short read, socket drained
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("recv on conn {} failed: {}", idx, e);
                    self.close(idx);
                    return;
                }
            }
        }

        self.process_rbuf(idx);
        if self.conns[idx].is_some() {
            self.flush_wbuf(idx);
        }
    }

    fn process_rbuf(&mut self, idx: usize) {
        loop {
            // discard any oversized payload in transit
            {
                let Some(conn) = self.conns[idx].as_mut() else {
                    return;
                };
                if conn.swallow > 0 {
                    let n = conn.swallow.min(conn.sock.rbuf.rsize());
                    conn.sock.rbuf.consume(n);
                    conn.swallow -= n;
                    self.metrics.request_swallow.incr_n(n as u64);
                    if conn.swallow > 0 {
                        break;
                    }
                }
                if conn.sock.rbuf.rsize() == 0 {
                    break;
                }
            }

            let mut req = {
                let parked = self.conns[idx].as_mut().and_then(|c| c.req.take());
                match parked {
                    Some(r) => r,
                    None => match self.req_pool.acquire(Request::new) {
                        Some(r) => r,
                        None => {
                            self.reply_and_close(idx, RspMsg::ServerError("out of requests"));
                            return;
                        }
                    },
                }
            };

            let result = {
                let Some(conn) = self.conns[idx].as_mut() else {
                    return;
                };
                parse_req(&mut req, &mut conn.sock.rbuf, self.cfg.max_vlen)
            };

            match result {
                ParseResult::Unfinished => {
                    let Some(conn) = self.conns[idx].as_mut() else {
                        return;
                    };
                    if req.pstate == ParseState::Val {
                        // value spans are recorded; pin the buffer layout
                        conn.req = Some(req);
                    } else {
                        self.req_pool.release(req);
                    }
                    return;
                }

                ParseResult::Invalid(reason) => {
                    self.metrics.request_parse_ex.incr();
                    self.req_pool.release(req);
                    self.reply_and_close(idx, RspMsg::ClientError(reason));
                    return;
                }

                ParseResult::Oversize { swallow } => {
                    self.metrics.request_parse_ex.incr();
                    let noreply = req.noreply;
                    {
                        let Some(conn) = self.conns[idx].as_mut() else {
                            return;
                        };
                        conn.swallow = swallow;
                        let _ = compose(
                            &mut conn.sock.wbuf,
                            &Response::Msg(RspMsg::ClientError(ERR_OVERSIZED)),
                            noreply,
                        );
                    }
                    self.req_pool.release(req);
                    continue;
                }

                ParseResult::Ok => {
                    self.metrics.request_parse.incr();
                    if !self.dispatch(idx, &req) {
                        self.req_pool.release(req);
                        return;
                    }
                    self.req_pool.release(req);
                }
            }
        }

        // safe to reclaim consumed bytes only with no parked spans
        let Some(conn) = self.conns[idx].as_mut() else {
            return;
        };
        if conn.req.is_none() {
            conn.sock.rbuf.lshift();
        }
    }

    /// Process one complete request; returns false when the connection is
    /// gone afterwards.
    fn dispatch(&mut self, idx: usize, req: &Request) -> bool {
        let Some(conn) = self.conns[idx].as_mut() else {
            return false;
        };
        let BufSock { rbuf, wbuf, .. } = &mut conn.sock;

        loop {
            let mark = wbuf.wmark();
            match self.processor.process(req, rbuf.data(), wbuf, &conn.peer) {
                Ok(PostAction::Keep) => return true,
                Ok(PostAction::Close) => {
                    // quit: drain what is already composed, then close;
                    // anything after quit in the buffer is ignored
                    conn.close_after_write = true;
                    if wbuf.is_empty() {
                        self.close(idx);
                    }
                    return false;
                }
                Err(_) => {
                    // reply didn't fit: roll back and grow
                    wbuf.wreset(mark);
                    if wbuf.double(self.cfg.dbuf_max_power).is_err() {
                        warn!("conn {}: reply exceeds write buffer limit", idx);
                        self.close(idx);
                        return false;
                    }
                }
            }
        }
    }

    /// Compose a final error reply and close once it drains.
    fn reply_and_close(&mut self, idx: usize, msg: RspMsg) {
        let Some(conn) = self.conns[idx].as_mut() else {
            return;
        };
        let _ = compose(&mut conn.sock.wbuf, &Response::Msg(msg), false);
        conn.close_after_write = true;
        self.flush_wbuf(idx);
    }

    fn flush_wbuf(&mut self, idx: usize) {
        let Some(conn) = self.conns[idx].as_mut() else {
            return;
        };

        while conn.sock.wbuf.rsize() > 0 {
            let r = {
                let data = conn.sock.wbuf.unread();
                conn.sock.ch.send(data)
            };
            match r {
                Ok(n) => {
                    conn.sock.wbuf.consume(n);
                    self.metrics.bytes_sent.incr_n(n as u64);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let fd = conn.sock.ch.fd();
                    let _ = self.evb.add_write(fd, idx as u64);
                    return;
                }
                Err(e) => {
                    debug!("send on conn {} failed: {}", idx, e);
                    self.close(idx);
                    return;
                }
            }
        }

        if conn.close_after_write {
            self.close(idx);
            return;
        }

        // fully drained: back to read interest, reclaim buffer space
        let fd = conn.sock.ch.fd();
        conn.sock.wbuf.reset();
        conn.sock.wbuf.shrink();
        if conn.req.is_none() {
            conn.sock.rbuf.lshift();
            conn.sock.rbuf.shrink();
        }
        let _ = self.evb.add_read(fd, idx as u64);
    }
}
