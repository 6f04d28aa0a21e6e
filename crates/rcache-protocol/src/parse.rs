//! Request parser.
//!
//! Consumes bytes from the read buffer and advances its read position only
//! when a complete framing unit has been recognized: the command line for
//! line-only verbs, the command line plus `vlen + CRLF` payload bytes for
//! storage verbs. On [`ParseResult::Unfinished`] nothing is consumed unless
//! the request is parked in [`ParseState::Val`], in which case the header
//! has been consumed and the request resumes at the recorded value span.
//!
//! Parse errors cannot be resynchronized, so [`ParseResult::Invalid`] is
//! fatal to the connection. Oversized values are the exception: the header
//! is sound, so the parser reports the exact payload length to discard and
//! the connection survives.

use log::trace;
use rcache_core::ascii::parse_u64 as atou64;
use rcache_core::buf::Buf;

use crate::request::{ParseState, Request, Span, Verb, KEY_MAXLEN, MAX_BATCH_SIZE};

#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// One complete request parsed and consumed.
    Ok,
    /// More bytes needed.
    Unfinished,
    /// Malformed request; report and close the connection.
    Invalid(&'static str),
    /// Well-formed header but the value exceeds the configured maximum;
    /// discard `swallow` payload bytes and keep the connection.
    Oversize { swallow: usize },
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn tokenize(data: &[u8], start: usize, end: usize) -> Vec<Span> {
    let mut toks = Vec::new();
    let mut i = start;
    while i < end {
        if data[i] == b' ' {
            i += 1;
            continue;
        }
        let t0 = i;
        while i < end && data[i] != b' ' {
            i += 1;
        }
        toks.push(Span::new(t0, i - t0));
    }
    toks
}

fn atoi64(b: &[u8]) -> Option<i64> {
    if let Some(rest) = b.strip_prefix(b"-") {
        let v = atou64(rest)?;
        if v > i64::MAX as u64 {
            return None;
        }
        Some(-(v as i64))
    } else {
        let v = atou64(b)?;
        if v > i64::MAX as u64 {
            return None;
        }
        Some(v as i64)
    }
}

fn valid_key(key: &[u8]) -> bool {
    !key.is_empty() && key.len() <= KEY_MAXLEN && key.iter().all(|&b| (0x21..0x7f).contains(&b))
}

fn verb_of(tok: &[u8]) -> Verb {
    match tok {
        b"get" => Verb::Get,
        b"gets" => Verb::Gets,
        b"delete" => Verb::Delete,
        b"set" => Verb::Set,
        b"add" => Verb::Add,
        b"replace" => Verb::Replace,
        b"append" => Verb::Append,
        b"prepend" => Verb::Prepend,
        b"cas" => Verb::Cas,
        b"incr" => Verb::Incr,
        b"decr" => Verb::Decr,
        b"stats" => Verb::Stats,
        b"quit" => Verb::Quit,
        _ => Verb::Unknown,
    }
}

/// Parse one request out of `buf`. `max_vlen` bounds the value payload a
/// storage command may carry before it is swallowed instead of buffered.
pub fn parse_req(req: &mut Request, buf: &mut Buf, max_vlen: u32) -> ParseResult {
    if req.pstate == ParseState::Val {
        return parse_val(req, buf);
    }

    // a fresh header parse starts from a clean request; a previous
    // Unfinished attempt may have left partial fields behind
    let keys_cap = req.keys.capacity();
    rcache_core::pool::Reset::reset(req);
    debug_assert_eq!(req.keys.capacity(), keys_cap);

    let start = buf.rpos();
    let line_end = {
        let data = buf.data();
        match find_crlf(data, start) {
            Some(i) => i,
            None => return ParseResult::Unfinished,
        }
    };

    let toks = tokenize(buf.data(), start, line_end);
    if toks.is_empty() {
        return ParseResult::Invalid("empty command line");
    }

    let verb = verb_of(toks[0].slice(buf.data()));
    if verb == Verb::Unknown {
        return ParseResult::Invalid("unknown command");
    }
    req.verb = verb;
    trace!("parsing {} request with {} tokens", verb.as_str(), toks.len());

    let nline = line_end + 2 - start;

    match verb {
        Verb::Get | Verb::Gets => {
            if toks.len() < 2 {
                return ParseResult::Invalid("bad command line format");
            }
            if toks.len() - 1 > MAX_BATCH_SIZE {
                return ParseResult::Invalid("request has too many keys");
            }
            for t in &toks[1..] {
                if !valid_key(t.slice(buf.data())) {
                    return ParseResult::Invalid("bad key");
                }
                req.keys.push(*t);
            }
            buf.consume(nline);
            ParseResult::Ok
        }

        Verb::Delete => {
            if toks.len() < 2 || toks.len() > 3 {
                return ParseResult::Invalid("bad command line format");
            }
            if !valid_key(toks[1].slice(buf.data())) {
                return ParseResult::Invalid("bad key");
            }
            req.keys.push(toks[1]);
            if toks.len() == 3 {
                if toks[2].slice(buf.data()) != b"noreply" {
                    return ParseResult::Invalid("bad command line format");
                }
                req.noreply = true;
            }
            buf.consume(nline);
            ParseResult::Ok
        }

        Verb::Incr | Verb::Decr => {
            if toks.len() < 3 || toks.len() > 4 {
                return ParseResult::Invalid("bad command line format");
            }
            if !valid_key(toks[1].slice(buf.data())) {
                return ParseResult::Invalid("bad key");
            }
            req.keys.push(toks[1]);
            req.delta = match atou64(toks[2].slice(buf.data())) {
                Some(d) => d,
                None => {
                    return ParseResult::Invalid("invalid numeric delta argument");
                }
            };
            if toks.len() == 4 {
                if toks[3].slice(buf.data()) != b"noreply" {
                    return ParseResult::Invalid("bad command line format");
                }
                req.noreply = true;
            }
            buf.consume(nline);
            ParseResult::Ok
        }

        Verb::Set | Verb::Add | Verb::Replace | Verb::Append | Verb::Prepend | Verb::Cas => {
            let nfixed = if verb == Verb::Cas { 6 } else { 5 };
            if toks.len() < nfixed || toks.len() > nfixed + 1 {
                return ParseResult::Invalid("bad command line format");
            }
            if !valid_key(toks[1].slice(buf.data())) {
                return ParseResult::Invalid("bad key");
            }
            req.keys.push(toks[1]);

            req.flag = match atou64(toks[2].slice(buf.data())).and_then(|v| u32::try_from(v).ok())
            {
                Some(f) => f,
                None => return ParseResult::Invalid("bad command line format"),
            };
            req.expiry = match atoi64(toks[3].slice(buf.data())) {
                Some(e) => e,
                None => return ParseResult::Invalid("bad command line format"),
            };
            req.vlen = match atou64(toks[4].slice(buf.data())).and_then(|v| u32::try_from(v).ok())
            {
                Some(n) => n,
                None => return ParseResult::Invalid("bad command line format"),
            };
            if verb == Verb::Cas {
                req.cas = match atou64(toks[5].slice(buf.data())) {
                    Some(c) => c,
                    None => return ParseResult::Invalid("bad command line format"),
                };
            }
            if toks.len() == nfixed + 1 {
                if toks[nfixed].slice(buf.data()) != b"noreply" {
                    return ParseResult::Invalid("bad command line format");
                }
                req.noreply = true;
            }

            // header is sound from here on; consume it
            buf.consume(nline);

            if req.vlen > max_vlen {
                trace!("oversized value: {} > {}", req.vlen, max_vlen);
                return ParseResult::Oversize {
                    swallow: req.vlen as usize + 2,
                };
            }

            req.vstr = Span::new(buf.rpos(), req.vlen as usize);
            req.pstate = ParseState::Val;
            parse_val(req, buf)
        }

        Verb::Stats | Verb::Quit => {
            if toks.len() != 1 {
                return ParseResult::Invalid("bad command line format");
            }
            buf.consume(nline);
            ParseResult::Ok
        }

        Verb::Unknown => unreachable!(),
    }
}

fn parse_val(req: &mut Request, buf: &mut Buf) -> ParseResult {
    let end = req.vstr.at as usize + req.vstr.len as usize;
    if buf.wpos() < end + 2 {
        return ParseResult::Unfinished;
    }
    if &buf.data()[end..end + 2] != b"\r\n" {
        return ParseResult::Invalid("bad data chunk");
    }
    buf.consume(end + 2 - buf.rpos());
    req.pstate = ParseState::Hdr;
    ParseResult::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> (Request, Buf) {
        let mut buf = Buf::new(4096);
        buf.write(bytes);
        (Request::new(), buf)
    }

    fn key_at<'a>(req: &Request, buf: &'a Buf, i: usize) -> &'a [u8] {
        req.keys[i].slice(buf.data())
    }

    #[test]
    fn test_get_single_key() {
        let (mut req, mut buf) = feed(b"get foo\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Get);
        assert_eq!(req.keys.len(), 1);
        assert_eq!(key_at(&req, &buf, 0), b"foo");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_gets_multi_key() {
        let (mut req, mut buf) = feed(b"gets a bb ccc\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Gets);
        assert_eq!(req.keys.len(), 3);
        assert_eq!(key_at(&req, &buf, 0), b"a");
        assert_eq!(key_at(&req, &buf, 1), b"bb");
        assert_eq!(key_at(&req, &buf, 2), b"ccc");
    }

    #[test]
    fn test_set_with_value() {
        let (mut req, mut buf) = feed(b"set foo 7 100 3\r\nbar\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Set);
        assert_eq!(key_at(&req, &buf, 0), b"foo");
        assert_eq!(req.flag, 7);
        assert_eq!(req.expiry, 100);
        assert_eq!(req.vlen, 3);
        assert_eq!(req.vstr.slice(buf.data()), b"bar");
        assert!(!req.noreply);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_set_noreply() {
        let (mut req, mut buf) = feed(b"set foo 0 0 1 noreply\r\nx\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert!(req.noreply);
    }

    #[test]
    fn test_cas_carries_token() {
        let (mut req, mut buf) = feed(b"cas foo 0 0 3 42\r\nqux\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Cas);
        assert_eq!(req.cas, 42);
        assert_eq!(req.vstr.slice(buf.data()), b"qux");
    }

    #[test]
    fn test_delete_with_noreply() {
        let (mut req, mut buf) = feed(b"delete foo noreply\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Delete);
        assert!(req.noreply);
    }

    #[test]
    fn test_incr_parses_delta() {
        let (mut req, mut buf) = feed(b"incr n 3\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Incr);
        assert_eq!(req.delta, 3);
    }

    #[test]
    fn test_negative_exptime_accepted() {
        let (mut req, mut buf) = feed(b"set foo 0 -1 1\r\nx\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.expiry, -1);
    }

    #[test]
    fn test_unfinished_header_consumes_nothing() {
        let (mut req, mut buf) = feed(b"get fo");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Unfinished);
        assert_eq!(buf.rpos(), 0);
        assert_eq!(buf.rsize(), 6);
    }

    #[test]
    fn test_value_split_across_feeds() {
        let (mut req, mut buf) = feed(b"set foo 0 0 5\r\nab");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Unfinished);
        assert_eq!(req.pstate, ParseState::Val);

        buf.write(b"cde\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.vstr.slice(buf.data()), b"abcde");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_value_missing_crlf_is_invalid() {
        let (mut req, mut buf) = feed(b"set foo 0 0 3\r\nbarXX");
        assert!(matches!(
            parse_req(&mut req, &mut buf, 1024),
            ParseResult::Invalid(_)
        ));
    }

    #[test]
    fn test_unknown_verb_is_invalid() {
        let (mut req, mut buf) = feed(b"frobnicate foo\r\n");
        assert!(matches!(
            parse_req(&mut req, &mut buf, 1024),
            ParseResult::Invalid(_)
        ));
    }

    #[test]
    fn test_get_without_key_is_invalid() {
        let (mut req, mut buf) = feed(b"get\r\n");
        assert!(matches!(
            parse_req(&mut req, &mut buf, 1024),
            ParseResult::Invalid(_)
        ));
    }

    #[test]
    fn test_key_too_long_is_invalid() {
        let mut line = b"get ".to_vec();
        line.extend(std::iter::repeat(b'k').take(KEY_MAXLEN + 1));
        line.extend(b"\r\n");
        let (mut req, mut buf) = feed(&line);
        assert!(matches!(
            parse_req(&mut req, &mut buf, 1024),
            ParseResult::Invalid(_)
        ));
    }

    #[test]
    fn test_key_at_max_len_is_fine() {
        let mut line = b"get ".to_vec();
        line.extend(std::iter::repeat(b'k').take(KEY_MAXLEN));
        line.extend(b"\r\n");
        let (mut req, mut buf) = feed(&line);
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
    }

    #[test]
    fn test_oversize_value_reports_swallow() {
        let (mut req, mut buf) = feed(b"set big 0 0 5000\r\n");
        let r = parse_req(&mut req, &mut buf, 1024);
        assert_eq!(r, ParseResult::Oversize { swallow: 5002 });
        // header is consumed so the worker can start discarding payload
        assert!(buf.is_empty());
        assert_eq!(req.verb, Verb::Set);
    }

    #[test]
    fn test_two_pipelined_requests() {
        let (mut req, mut buf) = feed(b"set a 0 0 1\r\nx\r\nget a\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Set);
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Get);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_quit_and_stats_take_no_args() {
        let (mut req, mut buf) = feed(b"quit\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Quit);

        let (mut req, mut buf) = feed(b"stats\r\n");
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.verb, Verb::Stats);

        let (mut req, mut buf) = feed(b"stats slabs\r\n");
        assert!(matches!(
            parse_req(&mut req, &mut buf, 1024),
            ParseResult::Invalid(_)
        ));
    }

    #[test]
    fn test_binary_value_bytes_allowed() {
        let mut bytes = b"set bin 0 0 4\r\n".to_vec();
        bytes.extend([0u8, 13, 10, 255]);
        bytes.extend(b"\r\n");
        let (mut req, mut buf) = feed(&bytes);
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        assert_eq!(req.vstr.slice(buf.data()), &[0u8, 13, 10, 255][..]);
    }
}
