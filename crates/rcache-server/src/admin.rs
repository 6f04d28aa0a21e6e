//! Admin thread: stats endpoint and recurring maintenance.
//!
//! Serves a separate listener with a tiny line protocol (`stats`,
//! `version`, `quit`) and owns the timing wheel that fires the log and
//! command-log flushes. The wheel is driven once per event-wait round, so
//! maintenance latency is bounded by the admin timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use rcache_core::ascii::fmt_u64;
use rcache_core::buf::Buf;
use rcache_core::time;
use rcache_core::wheel::TimingWheel;
use rcache_net::event::{EventBase, EVENT_ERR, EVENT_READ};
use rcache_net::tcp::TcpConn;

use crate::stats::StatsRegistry;

const TOKEN_LISTENER: u64 = u64::MAX;
const ADMIN_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub nevent: usize,
    pub backlog: i32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            nevent: 128,
            backlog: 128,
        }
    }
}

struct AdminConn {
    ch: TcpConn,
    rbuf: Buf,
    wbuf: Buf,
}

pub struct Admin {
    evb: EventBase,
    listener: TcpConn,
    wheel: TimingWheel,
    conns: Vec<Option<AdminConn>>,
    free: Vec<usize>,
    stats: Arc<StatsRegistry>,
    version: String,
    ready: Vec<(u64, u32)>,
}

impl Admin {
    pub fn new(
        addr: &SocketAddr,
        cfg: AdminConfig,
        mut wheel: TimingWheel,
        stats: Arc<StatsRegistry>,
        version: String,
    ) -> std::io::Result<Admin> {
        let listener = TcpConn::listen(addr, cfg.backlog)?;
        let evb = EventBase::new(cfg.nevent)?;
        evb.add_read(listener.fd(), TOKEN_LISTENER)?;
        wheel.start();
        info!("admin endpoint ready on {}", addr);
        Ok(Admin {
            evb,
            listener,
            wheel,
            conns: Vec::new(),
            free: Vec::new(),
            stats,
            version,
            ready: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(mut self) {
        loop {
            if self.run_once() < 0 {
                error!("admin event loop failed, exiting");
                self.wheel.flush();
                return;
            }
        }
    }

    pub fn run_once(&mut self) -> i32 {
        let timeout = (self.wheel.tick().as_millis() as i32).max(1);
        let Admin { evb, ready, .. } = &mut *self;
        ready.clear();
        let n = evb.wait(timeout, |token, events| {
            ready.push((token, events));
        });
        if n < 0 {
            return n;
        }

        time::update();
        for i in 0..self.ready.len() {
            let (token, events) = self.ready[i];
            self.handle(token, events);
        }
        self.wheel.execute();
        n
    }

    fn handle(&mut self, token: u64, events: u32) {
        if token == TOKEN_LISTENER {
            if events & EVENT_READ != 0 {
                self.accept_all();
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
    }

    fn accept_all(&mut self) {
        loop {
            let conn = match self.listener.accept() {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    warn!("admin accept failed: {}", e);
                    break;
                }
            };
            let idx = match self.free.pop() {
                Some(i) => i,
                None => {
                    self.conns.push(None);
                    self.conns.len() - 1
                }
            };
            let fd = conn.fd();
            self.conns[idx] = Some(AdminConn {
                ch: conn,
                rbuf: Buf::new(1024),
                wbuf: Buf::new(ADMIN_BUF_SIZE),
            });
            if self.evb.add_read(fd, idx as u64).is_err() {
                self.close(idx);
            }
        }
    }

    fn close(&mut self, idx: usize) {
        if let Some(mut conn) = self.conns[idx].take() {
            let _ = self.evb.del(conn.ch.fd());
            conn.ch.close();
            self.free.push(idx);
        }
    }

    fn read(&mut self, idx: usize) {
        let Some(conn) = self.conns[idx].as_mut() else {
            return;
        };
        match conn.ch.recv(conn.rbuf.writable()) {
            Ok(0) => {
                self.close(idx);
                return;
            }
            Ok(n) => conn.rbuf.produce(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => {
                self.close(idx);
                return;
            }
        }

        while self.process_line(idx) {}
        self.flush(idx);
    }

    /// Handle one CRLF-terminated command, if complete.
    fn process_line(&mut self, idx: usize) -> bool {
        let line = {
            let Some(conn) = self.conns[idx].as_mut() else {
                return false;
            };
            let data = conn.rbuf.unread();
            let Some(end) = data.windows(2).position(|w| w == b"\r\n") else {
                if conn.rbuf.wsize() == 0 {
                    // no command is this long
                    self.close(idx);
                }
                return false;
            };
            let line = data[..end].to_vec();
            conn.rbuf.consume(end + 2);
            line
        };

        debug!("admin command: {:?}", String::from_utf8_lossy(&line));
        match line.as_slice() {
            b"stats" => {
                let snapshot = self.stats.snapshot();
                let Some(conn) = self.conns[idx].as_mut() else {
                    return false;
                };
                for (name, value) in snapshot {
                    let mut tmp = [0u8; 20];
                    conn.wbuf.write(b"STAT ");
                    conn.wbuf.write(name.as_bytes());
                    conn.wbuf.write(b" ");
                    conn.wbuf.write(fmt_u64(value, &mut tmp));
                    conn.wbuf.write(b"\r\n");
                }
                conn.wbuf.write(b"END\r\n");
                true
            }
            b"version" => {
                let Some(conn) = self.conns[idx].as_mut() else {
                    return false;
                };
                conn.wbuf.write(b"VERSION ");
                conn.wbuf.write(self.version.as_bytes());
                conn.wbuf.write(b"\r\n");
                true
            }
            b"quit" => {
                self.close(idx);
                false
            }
            _ => {
                let Some(conn) = self.conns[idx].as_mut() else {
                    return false;
                };
                conn.wbuf.write(b"CLIENT_ERROR unknown command\r\n");
                true
            }
        }
    }

    fn flush(&mut self, idx: usize) {
        let Some(conn) = self.conns[idx].as_mut() else {
            return;
        };
        while conn.wbuf.rsize() > 0 {
            match conn.ch.send(conn.wbuf.unread()) {
                Ok(n) => conn.wbuf.consume(n),
                // the admin endpoint is low-volume; just drop stragglers
                Err(_) => break,
            }
        }
        conn.wbuf.reset();
        conn.rbuf.lshift();
    }
}
