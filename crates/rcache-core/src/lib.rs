//! # rcache-core
//!
//! Leaf utilities shared by every rcache crate. Nothing in here knows about
//! sockets, protocols or storage layouts; the modules are the plumbing the
//! rest of the workspace is built from:
//!
//! - [`ascii`] — decimal ASCII parsing/rendering helpers
//! - [`buf`] — contiguous read/write buffers with a doubling/shrinking layer
//! - [`pool`] — free pools for hot, reusable objects
//! - [`ring`] — single-producer single-consumer ring queue
//! - [`wheel`] — slotted timing wheel for recurring maintenance callbacks
//! - [`time`] — process-relative second clock used for TTL bookkeeping
//! - [`metrics`] — relaxed atomic counters/gauges plus the `metrics!` macro
//! - [`store`] — the storage-engine trait the process loop dispatches to

pub mod ascii;
pub mod buf;
pub mod metrics;
pub mod pool;
pub mod ring;
pub mod store;
pub mod time;
pub mod wheel;

pub use buf::{Buf, BufError};
pub use pool::{Pool, Reset};
pub use ring::{ring_pair, RingConsumer, RingProducer, RING_DEFAULT_CAP};
pub use store::{DataStore, StoreStatus, ValRef, Value};
pub use time::RelTime;
pub use wheel::{TimingWheel, WheelError};
