//! cuckood — cache server over the cuckoo storage engine.
//!
//! The cuckoo table has a fixed memory footprint and predictable lookup
//! cost, at the price of a hard per-item size cap. With a configured data
//! pool the table lives in a file-backed mapping and survives a restart.
//!
//! Usage:
//!     cuckood                 run with defaults
//!     cuckood <config file>   run with options from a config file
//!     cuckood -h | --help
//!     cuckood -v | --version

use std::env;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use log::LevelFilter;

use rcache_core::metrics::MetricGroup;
use rcache_cuckoo::{CuckooEngine, CuckooOptions, CuckooPolicy};
use rcache_server::config::{self, parse_bool, parse_uint, Apply, Options};
use rcache_server::{debug_log, exits, BootError, Instance, ServerOptions, VERSION};

struct CuckooSettings(CuckooOptions);

impl Options for CuckooSettings {
    fn apply(&mut self, name: &str, value: &str) -> Apply {
        match name {
            "cuckoo_displace" => match parse_uint(value) {
                Some(v) if v <= 16 => {
                    self.0.displace = v as usize;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected integer <= 16"),
            },
            "cuckoo_item_cas" => match parse_bool(value) {
                Some(v) => {
                    self.0.use_cas = v;
                    Apply::Applied
                }
                None => Apply::BadValue("expected yes/no"),
            },
            "cuckoo_item_size" => match parse_uint(value) {
                Some(v) if v >= 32 => {
                    self.0.item_size = v as usize;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected unsigned integer >= 32"),
            },
            "cuckoo_nitem" => match parse_uint(value).and_then(|v| u32::try_from(v).ok()) {
                Some(v) if v > 0 => {
                    self.0.nitem = v;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected positive unsigned integer"),
            },
            "cuckoo_policy" => match parse_uint(value) {
                Some(1) => {
                    self.0.policy = CuckooPolicy::Random;
                    Apply::Applied
                }
                Some(2) => {
                    self.0.policy = CuckooPolicy::Expire;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected 1 (random) or 2 (expire)"),
            },
            "cuckoo_max_ttl" => match parse_uint(value).and_then(|v| u32::try_from(v).ok()) {
                Some(v) if v > 0 => {
                    self.0.max_ttl = v;
                    Apply::Applied
                }
                _ => Apply::BadValue("expected positive unsigned integer"),
            },
            "cuckoo_datapool" => {
                self.0.datapool = Some(PathBuf::from(value));
                Apply::Applied
            }
            "cuckoo_datapool_name" => {
                if value.len() > rcache_cuckoo::SIGNATURE_MAX {
                    return Apply::BadValue("signature too long");
                }
                self.0.datapool_name = value.to_string();
                Apply::Applied
            }
            "cuckoo_datapool_prefault" => match parse_bool(value) {
                Some(v) => {
                    self.0.prefault = v;
                    Apply::Applied
                }
                None => Apply::BadValue("expected yes/no"),
            },
            _ => Apply::UnknownName,
        }
    }
}

fn usage() {
    println!(
        "cuckood {} — memcached-ASCII cache server, cuckoo storage\n\n\
         Usage:\n  cuckood [-h | --help | -v | --version | <config file>]\n\n\
         The config file holds one 'name: value' pair per line; '#' starts\n\
         a comment. See the option lists in rcache-server and rcache-cuckoo.",
        VERSION
    );
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut server_opts = ServerOptions::default();
    let mut cuckoo = CuckooSettings(CuckooOptions::default());

    match args.len() {
        1 => {}
        2 => match args[1].as_str() {
            "-h" | "--help" => {
                usage();
                exit(exits::OK);
            }
            "-v" | "--version" => {
                println!("cuckood {}", VERSION);
                exit(exits::OK);
            }
            path => {
                if let Err(e) =
                    config::load(Path::new(path), &mut [&mut server_opts, &mut cuckoo])
                {
                    eprintln!("cuckood: {}", e);
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
        eprintln!("cuckood: cannot set up logging: {}", e);
        exit(exits::CANTCREAT);
    }

    let engine = match CuckooEngine::new(&cuckoo.0) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("cuckood: {}", e);
            exit(exits::DATAERR);
        }
    };
    let groups: Vec<Arc<dyn MetricGroup>> = vec![engine.metrics()];

    match Instance::setup(&server_opts, engine, groups) {
        Ok(instance) => instance.run(),
        Err(e) => {
            eprintln!("cuckood: {}", e);
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
