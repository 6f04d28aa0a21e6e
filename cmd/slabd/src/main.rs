//! slabd — cache server over the slab storage engine.
//!
//! Speaks the memcached ASCII protocol on the data port and a small
//! stats/version protocol on the admin port.
//!
//! Usage:
//!     slabd                 run with defaults
//!     slabd <config file>   run with options from a config file
//!     slabd -h | --help
//!     slabd -v | --version

use std::env;
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use log::LevelFilter;

use rcache_core::metrics::MetricGroup;
use rcache_server::config::{self, parse_bool, parse_float, parse_uint, Apply, Options};
use rcache_server::{debug_log, exits, BootError, Instance, ServerOptions, VERSION};
use rcache_slab::{Evict, SlabEngine, SlabOptions};

struct SlabSettings(SlabOptions);

impl Options for SlabSettings {
    fn apply(&mut self, name: &str, value: &str) -> Apply {
        match name {
            "slab_prealloc" => match parse_bool(value) {
                Some(v) => {
                    self.0.prealloc = v;
                    Apply::Applied
                }
                None => Apply::BadValue("expected yes/no"),
            },
            "slab_evict_opt" => match parse_uint(value) {
                Some(0) => {
                    self.0.evict = Evict::None;
                    Apply::Applied
                }
                Some(1) => {
                    self.0.evict = Evict::RandomSlab;
                    Apply::Applied
                }
                Some(2) => {
                    self.0.evict = Evict::LeastRecentlyCreated;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected 0 (none), 1 (random) or 2 (oldest)"),
            },
            "slab_use_freeq" => match parse_bool(value) {
                Some(v) => {
                    self.0.use_freeq = v;
                    Apply::Applied
                }
                None => Apply::BadValue("expected yes/no"),
            },
            "slab_use_cas" => match parse_bool(value) {
                Some(v) => {
                    self.0.use_cas = v;
                    Apply::Applied
                }
                None => Apply::BadValue("expected yes/no"),
            },
            "slab_size" => match parse_uint(value) {
                Some(v) if v >= 512 => {
                    self.0.slab_size = v as usize;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected unsigned integer >= 512"),
            },
            "slab_item_min" => match parse_uint(value) {
                Some(v) if v > 0 => {
                    self.0.item_min = v as usize;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected positive unsigned integer"),
            },
            "slab_factor" => match parse_float(value) {
                Some(v) if v > 1.0 => {
                    self.0.factor = v;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected float > 1.0"),
            },
            "slab_maxbytes" => match parse_uint(value) {
                Some(v) if v > 0 => {
                    self.0.maxbytes = v as usize;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected positive unsigned integer"),
            },
            "slab_profile" => {
                let mut sizes = Vec::new();
                for tok in value.split_whitespace() {
                    match parse_uint(tok) {
                        Some(v) if v > 0 => sizes.push(v as usize),
                        _ => return Apply::BadValue("expected space-separated sizes"),
                    }
                }
                if sizes.is_empty() {
                    return Apply::BadValue("expected at least one size");
                }
                self.0.profile = Some(sizes);
                Apply::Applied
            }
            "slab_hash_power" => match parse_uint(value) {
                Some(v) if (1..32).contains(&v) => {
                    self.0.hash_power = v as u8;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected integer in 1..32"),
            },
            _ => Apply::UnknownName,
        }
    }
}

fn usage() {
    println!(
        "slabd {} — memcached-ASCII cache server, slab storage\n\n\
         Usage:\n  slabd [-h | --help | -v | --version | <config file>]\n\n\
         The config file holds one 'name: value' pair per line; '#' starts\n\
         a comment. See the option lists in rcache-server and rcache-slab.",
        VERSION
    );
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut server_opts = ServerOptions::default();
    let mut slab = SlabSettings(SlabOptions::default());

    match args.len() {
        1 => {}
        2 => match args[1].as_str() {
            "-h" | "--help" => {
                usage();
                exit(exits::OK);
            }
            "-v" | "--version" => {
                println!("slabd {}", VERSION);
                exit(exits::OK);
            }
            path => {
                if let Err(e) =
                    config::load(Path::new(path), &mut [&mut server_opts, &mut slab])
                {
                    eprintln!("slabd: {}", e);
                    exit(exits::CONFIG);
                }
            }
        },
        _ => {
            usage();
            exit(exits::USAGE);
        }
    }

    let level = debug_log::parse_level(&server_opts.log_level).unwrap_or(LevelFilter::Info);
    if let Err(e) = debug_log::setup(server_opts.log_filename.as_deref(), level) {
        eprintln!("slabd: cannot set up logging: {}", e);
        exit(exits::CANTCREAT);
    }

    let engine = SlabEngine::new(&slab.0);
    let groups: Vec<Arc<dyn MetricGroup>> = vec![engine.metrics()];

    match Instance::setup(&server_opts, engine, groups) {
        Ok(instance) => instance.run(),
        Err(e) => {
            eprintln!("slabd: {}", e);
            let code = match e {
                BootError::Log(_) | BootError::PidFile(_) | BootError::Klog(_) => {
                    exits::CANTCREAT
                }
                _ => exits::IOERR,
            };
            exit(code);
        }
    }
}
