//! Sampled per-command access log.
//!
//! One line per sampled command, written after the command finishes
//! processing:
//!
//! ```text
//! 127.0.0.1:52134 - [01/Aug/2026:12:00:00 +0000] "set foo 0 0 3" 5 8
//! ```
//!
//! The quoted section is the command with its arguments (value payloads are
//! never logged), followed by the reply code and the reply size in bytes.
//! The writer is buffered; the admin thread's timing wheel fires
//! [`Klog::flush`] periodically so the worker never blocks on the log file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{info, warn};
use rcache_core::time;

use crate::request::{Request, Verb};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

struct KlogInner {
    w: BufWriter<File>,
    ncmd: u64,
}

pub struct Klog {
    inner: Mutex<KlogInner>,
    sample: u64,
}

impl Klog {
    /// Open (append) the log file. `sample` must be non-zero; a sample of
    /// `n` logs one in every `n` commands.
    pub fn create(path: &Path, sample: u32) -> io::Result<Klog> {
        if sample == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "klog sample rate cannot be 0",
            ));
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("klog writing to {:?}, sampling 1/{}", path, sample);
        Ok(Klog {
            inner: Mutex::new(KlogInner {
                w: BufWriter::new(file),
                ncmd: 0,
            }),
            sample: sample as u64,
        })
    }

    /// Record one finished command. `rdata` is the read buffer contents the
    /// request's spans index into.
    pub fn log(&self, peer: &str, req: &Request, rdata: &[u8], code: u32, rsp_len: usize) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let n = inner.ncmd;
        inner.ncmd += 1;
        if n % self.sample != 0 {
            return;
        }

        let (y, mon, d, h, min, s) = time::unix_to_civil(time::now_unix());
        let key = req
            .keys
            .first()
            .map(|k| k.slice(rdata))
            .unwrap_or(b"");
        let key = String::from_utf8_lossy(key);

        let detail = match req.verb {
            Verb::Cas => format!(
                "{} {} {} {} {} {}",
                req.verb.as_str(),
                key,
                req.flag,
                req.expiry,
                req.vlen,
                req.cas
            ),
            v if v.is_store() => format!(
                "{} {} {} {} {}",
                req.verb.as_str(),
                key,
                req.flag,
                req.expiry,
                req.vlen
            ),
            Verb::Incr | Verb::Decr => {
                format!("{} {} {}", req.verb.as_str(), key, req.delta)
            }
            Verb::Get | Verb::Gets | Verb::Delete => {
                format!("{} {}", req.verb.as_str(), key)
            }
            _ => req.verb.as_str().to_string(),
        };

        let status = writeln!(
            inner.w,
            "{} - [{:02}/{}/{}:{:02}:{:02}:{:02} +0000] \"{}\" {} {}",
            peer,
            d,
            MONTHS[(mon - 1) as usize],
            y,
            h,
            min,
            s,
            detail,
            code,
            rsp_len
        );
        if status.is_err() {
            warn!("klog write failed, line dropped");
        }
    }

    /// Push buffered lines out to the file.
    pub fn flush(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.w.flush().is_err() {
                warn!("klog flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_req, ParseResult};
    use rcache_core::buf::Buf;

    fn parsed(bytes: &[u8]) -> (Request, Buf) {
        let mut req = Request::new();
        let mut buf = Buf::new(1024);
        buf.write(bytes);
        assert_eq!(parse_req(&mut req, &mut buf, 1024), ParseResult::Ok);
        (req, buf)
    }

    #[test]
    fn test_log_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let klog = Klog::create(&path, 1).unwrap();

        let (req, buf) = parsed(b"set foo 0 0 3\r\nbar\r\n");
        klog.log("127.0.0.1:9", &req, buf.data(), 5, 8);
        klog.flush();

        let line = std::fs::read_to_string(&path).unwrap();
        assert!(line.starts_with("127.0.0.1:9 - ["));
        assert!(line.contains("\"set foo 0 0 3\" 5 8"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_sampling_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let klog = Klog::create(&path, 10).unwrap();

        let (req, buf) = parsed(b"get foo\r\n");
        for _ in 0..100 {
            klog.log("c", &req, buf.data(), 2, 5);
        }
        klog.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 10);
    }

    #[test]
    fn test_zero_sample_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        assert!(Klog::create(&path, 0).is_err());
    }

    #[test]
    fn test_delta_and_get_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let klog = Klog::create(&path, 1).unwrap();

        let (req, buf) = parsed(b"incr n 3\r\n");
        klog.log("c", &req, buf.data(), 12, 3);
        let (req, buf) = parsed(b"get foo\r\n");
        klog.log("c", &req, buf.data(), 2, 5);
        klog.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"incr n 3\" 12 3"));
        assert!(contents.contains("\"get foo\" 2 5"));
    }
}
