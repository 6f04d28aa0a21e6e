//! # rcache-server
//!
//! Everything the server binaries share: the config loader, the debug-log
//! backend, stats aggregation, the protocol process loop, and the three
//! thread cores (acceptor, worker, admin).
//!
//! A binary supplies a storage engine and its settings; [`Instance`] wires
//! up the ring, the wake-up pipe, the pools, the timing wheel and the
//! threads around it:
//!
//! ```text
//!   acceptor ──ring+pipe──► worker ──► storage engine
//!       │                      │
//!       └───── metrics ◄───────┘
//!                 │
//!               admin (stats endpoint, timing wheel: log/klog flush)
//! ```

pub mod admin;
pub mod config;
pub mod debug_log;
pub mod process;
pub mod server;
pub mod stats;
pub mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use rcache_core::metrics::MetricGroup;
use rcache_core::ring::ring_pair;
use rcache_core::store::DataStore;
use rcache_core::time;
use rcache_core::wheel::TimingWheel;
use rcache_net::buf_sock::BufSock;
use rcache_net::pipe::pipe_pair;
use rcache_protocol::klog::Klog;

use admin::{Admin, AdminConfig};
use config::{parse_uint, Apply, Options};
use process::Processor;
use server::{Acceptor, AcceptorConfig};
use stats::StatsRegistry;
use worker::{Worker, WorkerConfig};

/// BSD sysexits-style process exit codes.
pub mod exits {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const DATAERR: i32 = 65;
    pub const CANTCREAT: i32 = 73;
    pub const IOERR: i32 = 74;
    pub const CONFIG: i32 = 78;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum BootError {
    #[error("cannot set up logging: {0}")]
    Log(std::io::Error),
    #[error("cannot write pid file: {0}")]
    PidFile(std::io::Error),
    #[error("cannot open command log: {0}")]
    Klog(std::io::Error),
    #[error("cannot bind: {0}")]
    Bind(std::io::Error),
    #[error("cannot spawn thread: {0}")]
    Spawn(std::io::Error),
}

/// Options shared by every server binary.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub server_host: String,
    pub server_port: u16,
    pub admin_host: String,
    pub admin_port: u16,
    pub backlog: i32,
    pub timeout_ms: i32,
    pub nevent: usize,
    pub buf_init_size: usize,
    pub dbuf_max_power: u32,
    pub ring_cap: usize,
    pub request_poolsize: usize,
    pub buf_sock_poolsize: usize,
    pub pid_filename: Option<PathBuf>,
    pub log_filename: Option<PathBuf>,
    pub log_level: String,
    pub klog_filename: Option<PathBuf>,
    pub klog_sample: u32,
    pub maintenance_intvl_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            server_host: "0.0.0.0".to_string(),
            server_port: 12321,
            admin_host: "127.0.0.1".to_string(),
            admin_port: 9999,
            backlog: 1024,
            timeout_ms: 100,
            nevent: 1024,
            buf_init_size: rcache_core::buf::BUF_INIT_SIZE,
            dbuf_max_power: rcache_core::buf::DBUF_MAX_POWER,
            ring_cap: rcache_core::ring::RING_DEFAULT_CAP,
            request_poolsize: 0,
            buf_sock_poolsize: 0,
            pid_filename: None,
            log_filename: None,
            log_level: "info".to_string(),
            klog_filename: None,
            klog_sample: 100,
            maintenance_intvl_ms: 500,
        }
    }
}

impl Options for ServerOptions {
    fn apply(&mut self, name: &str, value: &str) -> Apply {
        macro_rules! uint {
            ($field:expr, $ty:ty) => {
                match parse_uint(value).and_then(|v| <$ty>::try_from(v).ok()) {
                    Some(v) => {
                        $field = v;
                        Apply::Applied
                    }
                    None => Apply::BadValue("expected unsigned integer"),
                }
            };
        }

        match name {
            "server_host" => {
                self.server_host = value.to_string();
                Apply::Applied
            }
            "server_port" => uint!(self.server_port, u16),
            "admin_host" => {
                self.admin_host = value.to_string();
                Apply::Applied
            }
            "admin_port" => uint!(self.admin_port, u16),
            "backlog" => uint!(self.backlog, i32),
            "timeout" => uint!(self.timeout_ms, i32),
            "nevent" => uint!(self.nevent, usize),
            "buf_init_size" => uint!(self.buf_init_size, usize),
            "dbuf_max_power" => uint!(self.dbuf_max_power, u32),
            "ring_cap" => uint!(self.ring_cap, usize),
            "request_poolsize" => uint!(self.request_poolsize, usize),
            "buf_sock_poolsize" => uint!(self.buf_sock_poolsize, usize),
            "pid_filename" => {
                self.pid_filename = Some(PathBuf::from(value));
                Apply::Applied
            }
            "log_filename" => {
                self.log_filename = Some(PathBuf::from(value));
                Apply::Applied
            }
            "log_level" => match debug_log::parse_level(value) {
                Some(_) => {
                    self.log_level = value.to_string();
                    Apply::Applied
                }
                None => Apply::BadValue("expected off/error/warn/info/debug/trace"),
            },
            "klog_filename" => {
                self.klog_filename = Some(PathBuf::from(value));
                Apply::Applied
            }
            "klog_sample" => uint!(self.klog_sample, u32),
            "maintenance_intvl" => uint!(self.maintenance_intvl_ms, u64),
            _ => Apply::UnknownName,
        }
    }
}

fn ignore_sigpipe() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    // a peer resetting mid-write must surface as EPIPE, not kill us
    if unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }.is_err() {
        warn!("cannot ignore SIGPIPE");
    }
}

fn write_pid_file(path: &PathBuf) -> std::io::Result<()> {
    std::fs::write(path, std::process::id().to_string())
}

/// A fully wired server: worker and admin threads running, acceptor ready.
pub struct Instance {
    acceptor: Acceptor,
    data_addr: SocketAddr,
    admin_addr: SocketAddr,
}

impl Instance {
    /// Bind sockets, build pools and queues, spawn the worker and admin
    /// threads, and return with the acceptor ready to run.
    pub fn setup<S>(
        opts: &ServerOptions,
        store: S,
        engine_metrics: Vec<Arc<dyn MetricGroup>>,
    ) -> Result<Instance, BootError>
    where
        S: DataStore + Send + 'static,
    {
        time::setup();
        ignore_sigpipe();

        if let Some(path) = &opts.pid_filename {
            write_pid_file(path).map_err(BootError::PidFile)?;
        }

        let klog = match &opts.klog_filename {
            Some(path) => Some(Arc::new(
                Klog::create(path, opts.klog_sample).map_err(BootError::Klog)?,
            )),
            None => None,
        };

        let (ring_tx, ring_rx) = ring_pair::<BufSock>(opts.ring_cap);
        let (back_tx, back_rx) = ring_pair::<BufSock>(opts.ring_cap);
        let (pipe_rx, pipe_tx) = pipe_pair().map_err(BootError::Bind)?;

        // a value must fit the fully doubled read buffer with headroom
        // for its command line
        let rbuf_cap = opts.buf_init_size << opts.dbuf_max_power;
        let max_vlen = rbuf_cap.saturating_sub(1024).max(1024).min(512 * 1024 * 1024) as u32;

        let registry = Arc::new(StatsRegistry::new());

        let worker_cfg = WorkerConfig {
            timeout_ms: opts.timeout_ms,
            nevent: opts.nevent,
            dbuf_max_power: opts.dbuf_max_power,
            max_vlen,
            request_poolsize: opts.request_poolsize,
        };

        let acceptor_cfg = AcceptorConfig {
            timeout_ms: opts.timeout_ms,
            nevent: opts.nevent,
            backlog: opts.backlog,
            buf_init_size: opts.buf_init_size,
            buf_sock_poolsize: opts.buf_sock_poolsize,
        };

        let data_addr: SocketAddr = format!("{}:{}", opts.server_host, opts.server_port)
            .parse()
            .map_err(|_| {
                BootError::Bind(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "bad server address",
                ))
            })?;
        let admin_addr: SocketAddr = format!("{}:{}", opts.admin_host, opts.admin_port)
            .parse()
            .map_err(|_| {
                BootError::Bind(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "bad admin address",
                ))
            })?;

        // worker owns the storage engine and the process loop
        let processor = Processor::new(store, klog.clone(), registry.clone());
        let process_metrics = processor.metrics();
        let worker = Worker::new(worker_cfg, ring_rx, back_tx, pipe_rx, processor)
            .map_err(BootError::Bind)?;

        let acceptor = Acceptor::new(&data_addr, acceptor_cfg, ring_tx, back_rx, pipe_tx)
            .map_err(BootError::Bind)?;

        registry.register(acceptor.metrics());
        registry.register(worker.metrics());
        registry.register(process_metrics);
        for group in engine_metrics {
            registry.register(group);
        }

        // maintenance wheel: debug-log flush plus klog flush
        let tick = Duration::from_millis(opts.maintenance_intvl_ms.max(10));
        let mut wheel = TimingWheel::new(tick, 64, 16);
        wheel
            .insert(tick, true, Box::new(|| log::logger().flush()))
            .ok();
        if let Some(klog) = klog.clone() {
            wheel
                .insert(tick * 2, true, Box::new(move || klog.flush()))
                .ok();
        }

        let admin = Admin::new(
            &admin_addr,
            AdminConfig::default(),
            wheel,
            registry.clone(),
            VERSION.to_string(),
        )
        .map_err(BootError::Bind)?;

        let data_addr = acceptor.local_addr().map_err(BootError::Bind)?;
        let admin_addr = admin.local_addr().map_err(BootError::Bind)?;

        thread::Builder::new()
            .name("rcache-worker".to_string())
            .spawn(move || worker.run())
            .map_err(BootError::Spawn)?;
        thread::Builder::new()
            .name("rcache-admin".to_string())
            .spawn(move || admin.run())
            .map_err(BootError::Spawn)?;

        info!(
            "rcache {} serving data on {} and admin on {}",
            VERSION, data_addr, admin_addr
        );
        Ok(Instance {
            acceptor,
            data_addr,
            admin_addr,
        })
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// Run the acceptor loop on the calling thread, forever.
    pub fn run(self) {
        self.acceptor.run()
    }
}
