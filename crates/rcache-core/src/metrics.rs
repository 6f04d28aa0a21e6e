//! Relaxed atomic counters and gauges, plus the `metrics!` declaration
//! macro.
//!
//! Counters and gauges are updated with relaxed increments on the hot path;
//! the admin thread reads them for the `stats` command and tolerates the
//! resulting skew. Each module declares one metrics struct:
//!
//! ```
//! use rcache_core::metrics;
//!
//! metrics! {
//!     pub struct WorkerMetrics {
//!         event_loop: Counter => "event loop returns",
//!         conn_active: Gauge => "active connections",
//!     }
//! }
//! ```
//!
//! The macro generates the struct, a `new()`, and a [`MetricGroup`]
//! implementation that visits `(name, value)` pairs for stats reporting.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Counter(AtomicU64::new(0))
    }

    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_n(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub const fn new() -> Self {
        Gauge(AtomicI64::new(0))
    }

    #[inline]
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn decr(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_n(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn decr_n(&self, n: i64) {
        self.0.fetch_sub(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A named group of metrics that can enumerate itself for the `stats`
/// command.
pub trait MetricGroup: Send + Sync {
    fn visit(&self, f: &mut dyn FnMut(&'static str, u64));
}

/// Declare a metrics struct. Every field is a [`Counter`] or [`Gauge`];
/// the description becomes the field's doc comment and the field name is
/// the metric name reported by `stats`.
#[macro_export]
macro_rules! metrics {
    (
        $(#[$attr:meta])*
        pub struct $name:ident {
            $( $field:ident : $kind:ident => $desc:literal ),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Default)]
        pub struct $name {
            $(
                #[doc = $desc]
                pub $field: $crate::metrics::$kind,
            )+
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl $crate::metrics::MetricGroup for $name {
            fn visit(&self, f: &mut dyn FnMut(&'static str, u64)) {
                $( f(stringify!($field), self.$field.value() as u64); )+
            }
        }
    };
}
