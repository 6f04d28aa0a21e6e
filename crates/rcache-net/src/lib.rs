//! # rcache-net
//!
//! The transport layer of the rcache servers: an edge-free (level-triggered)
//! event reactor over epoll/kqueue, non-blocking TCP and pipe channels, and
//! the buffered socket that binds a connection to its read/write buffer
//! pair.
//!
//! All syscalls go through `libc` directly; fds are plain `RawFd`s owned by
//! the channel structs, closed on `close()`/drop. The reactor identifies
//! ready channels by a caller-chosen `u64` token, so no pointers cross the
//! kernel boundary.

pub mod buf_sock;
pub mod event;
pub mod pipe;
pub mod tcp;

pub use buf_sock::BufSock;
pub use event::{EventBase, EVENT_ERR, EVENT_READ, EVENT_WRITE};
pub use pipe::{pipe_pair, PipeRx, PipeTx};
pub use tcp::TcpConn;
