//! Parsed request object.
//!
//! Requests are pool-backed and reused across commands on a connection.
//! Key and value fields are [`Span`]s into the read buffer rather than
//! slices, so a parked request (waiting for more value bytes) does not pin
//! a borrow of the buffer.

use std::ops::Range;

use rcache_core::pool::Reset;

/// Longest key the protocol accepts, in bytes.
pub const KEY_MAXLEN: usize = 250;

/// Most keys a single `get`/`gets` may carry.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Unknown,
    Get,
    Gets,
    Delete,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Incr,
    Decr,
    Stats,
    Quit,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Unknown => "unknown",
            Verb::Get => "get",
            Verb::Gets => "gets",
            Verb::Delete => "delete",
            Verb::Set => "set",
            Verb::Add => "add",
            Verb::Replace => "replace",
            Verb::Append => "append",
            Verb::Prepend => "prepend",
            Verb::Cas => "cas",
            Verb::Incr => "incr",
            Verb::Decr => "decr",
            Verb::Stats => "stats",
            Verb::Quit => "quit",
        }
    }

    /// Verbs that carry a value payload after the command line.
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Verb::Set | Verb::Add | Verb::Replace | Verb::Append | Verb::Prepend | Verb::Cas
        )
    }
}

/// Absolute byte range into the read buffer's written region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub at: u32,
    pub len: u32,
}

impl Span {
    pub fn new(at: usize, len: usize) -> Self {
        Span {
            at: at as u32,
            len: len as u32,
        }
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.at as usize..(self.at + self.len) as usize
    }

    #[inline]
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.range()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Expecting a command line.
    Hdr,
    /// Command line consumed, waiting for the value payload.
    Val,
}

#[derive(Debug)]
pub struct Request {
    pub verb: Verb,
    pub pstate: ParseState,
    pub keys: Vec<Span>,
    pub vstr: Span,
    pub flag: u32,
    pub expiry: i64,
    pub vlen: u32,
    pub delta: u64,
    pub cas: u64,
    pub noreply: bool,
}

impl Request {
    pub fn new() -> Self {
        Request {
            verb: Verb::Unknown,
            pstate: ParseState::Hdr,
            keys: Vec::with_capacity(MAX_BATCH_SIZE),
            vstr: Span::default(),
            flag: 0,
            expiry: 0,
            vlen: 0,
            delta: 0,
            cas: 0,
            noreply: false,
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for Request {
    fn reset(&mut self) {
        self.verb = Verb::Unknown;
        self.pstate = ParseState::Hdr;
        self.keys.clear();
        self.vstr = Span::default();
        self.flag = 0;
        self.expiry = 0;
        self.vlen = 0;
        self.delta = 0;
        self.cas = 0;
        self.noreply = false;
    }
}
