//! Process-wide stats aggregation.
//!
//! Each module keeps its own metrics struct; at boot the binary registers
//! every group here, and both the data-port `stats` command and the admin
//! endpoint render a snapshot. Registration uses interior mutability
//! because consumers (the worker's process loop) hold the registry before
//! all groups exist. Counters are read with relaxed loads, so a snapshot
//! is consistent enough for reporting, not a linearizable view.

use std::sync::{Arc, Mutex};

use rcache_core::metrics::MetricGroup;

#[derive(Default)]
pub struct StatsRegistry {
    groups: Mutex<Vec<Arc<dyn MetricGroup>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        StatsRegistry {
            groups: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, group: Arc<dyn MetricGroup>) {
        if let Ok(mut groups) = self.groups.lock() {
            groups.push(group);
        }
    }

    /// Name/value pairs across all groups, in registration order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut out = Vec::new();
        if let Ok(groups) = self.groups.lock() {
            for group in groups.iter() {
                group.visit(&mut |name, value| out.push((name, value)));
            }
        }
        out
    }
}
