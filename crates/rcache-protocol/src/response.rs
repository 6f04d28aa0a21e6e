//! Response composition.
//!
//! A [`Response`] is a tagged value describing one reply unit; multi-key
//! GET replies are a sequence of `Value` responses terminated by one
//! `Msg(End)`. [`compose`] emits the wire form into the write buffer and
//! either writes the whole reply or nothing: on insufficient space it
//! returns [`NoSpace`] and the caller grows the buffer and retries.

use rcache_core::ascii::{fmt_u64, ndigits};
use rcache_core::buf::Buf;
use rcache_core::store::Value;

pub const CRLF: &[u8] = b"\r\n";

/// Fixed-string reply kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RspMsg {
    Ok,
    End,
    Stored,
    Exists,
    Deleted,
    NotFound,
    NotStored,
    ClientError(&'static str),
    ServerError(&'static str),
}

impl RspMsg {
    fn head(&self) -> &'static [u8] {
        match self {
            RspMsg::Ok => b"OK\r\n",
            RspMsg::End => b"END\r\n",
            RspMsg::Stored => b"STORED\r\n",
            RspMsg::Exists => b"EXISTS\r\n",
            RspMsg::Deleted => b"DELETED\r\n",
            RspMsg::NotFound => b"NOT_FOUND\r\n",
            RspMsg::NotStored => b"NOT_STORED\r\n",
            RspMsg::ClientError(_) => b"CLIENT_ERROR ",
            RspMsg::ServerError(_) => b"SERVER_ERROR ",
        }
    }
}

/// One reply unit.
#[derive(Debug, Clone, Copy)]
pub enum Response<'a> {
    Msg(RspMsg),
    Value {
        key: &'a [u8],
        flag: u32,
        val: Value<'a>,
        cas: Option<u64>,
    },
    Numeric(u64),
    Stat { name: &'a str, value: u64 },
}

impl Response<'_> {
    /// Stable numeric code for the command log.
    pub fn code(&self) -> u32 {
        match self {
            Response::Msg(RspMsg::Ok) => 1,
            Response::Msg(RspMsg::End) => 2,
            Response::Stat { .. } => 3,
            Response::Value { .. } => 4,
            Response::Msg(RspMsg::Stored) => 5,
            Response::Msg(RspMsg::Exists) => 6,
            Response::Msg(RspMsg::Deleted) => 7,
            Response::Msg(RspMsg::NotFound) => 8,
            Response::Msg(RspMsg::NotStored) => 9,
            Response::Msg(RspMsg::ClientError(_)) => 10,
            Response::Msg(RspMsg::ServerError(_)) => 11,
            Response::Numeric(_) => 12,
        }
    }
}

/// Insufficient space in the write buffer; nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSpace;

fn write_uint(buf: &mut Buf, v: u64) {
    let mut tmp = [0u8; 20];
    buf.write(fmt_u64(v, &mut tmp));
}

fn write_val(buf: &mut Buf, val: &Value<'_>) {
    match val {
        Value::Bytes(b) => {
            buf.write(b);
        }
        Value::Num(n) => write_uint(buf, *n),
    }
}

/// Compose one reply unit into `buf`. Returns the number of bytes written;
/// zero for a suppressed (`noreply`) reply.
pub fn compose(buf: &mut Buf, rsp: &Response<'_>, noreply: bool) -> Result<usize, NoSpace> {
    if noreply {
        return Ok(0);
    }

    let needed = match rsp {
        Response::Msg(m) => match m {
            RspMsg::ClientError(s) | RspMsg::ServerError(s) => m.head().len() + s.len() + 2,
            _ => m.head().len(),
        },
        Response::Value { key, flag, val, cas } => {
            let vlen = val.wire_len();
            6 + key.len()
                + 1
                + ndigits(*flag as u64)
                + 1
                + ndigits(vlen as u64)
                + cas.map_or(0, |c| 1 + ndigits(c))
                + 2
                + vlen
                + 2
        }
        Response::Numeric(v) => ndigits(*v) + 2,
        Response::Stat { name, value } => 5 + name.len() + 1 + ndigits(*value) + 2,
    };

    if buf.wsize() < needed {
        return Err(NoSpace);
    }

    match rsp {
        Response::Msg(m) => {
            buf.write(m.head());
            if let RspMsg::ClientError(s) | RspMsg::ServerError(s) = m {
                buf.write(s.as_bytes());
                buf.write(CRLF);
            }
        }
        Response::Value { key, flag, val, cas } => {
            buf.write(b"VALUE ");
            buf.write(key);
            buf.write(b" ");
            write_uint(buf, *flag as u64);
            buf.write(b" ");
            write_uint(buf, val.wire_len() as u64);
            if let Some(c) = cas {
                buf.write(b" ");
                write_uint(buf, *c);
            }
            buf.write(CRLF);
            write_val(buf, val);
            buf.write(CRLF);
        }
        Response::Numeric(v) => {
            write_uint(buf, *v);
            buf.write(CRLF);
        }
        Response::Stat { name, value } => {
            buf.write(b"STAT ");
            buf.write(name.as_bytes());
            buf.write(b" ");
            write_uint(buf, *value);
            buf.write(CRLF);
        }
    }

    Ok(needed)
}
