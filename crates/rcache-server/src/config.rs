//! Config file loader.
//!
//! One `name: value` pair per line; `#` starts a comment; blank lines are
//! skipped. Values are typed by the option they set: bool (`yes`/`no`),
//! unsigned integer (with `+`, `*` and parentheses, so sizes read as
//! `16 * (1024 + 0)`), float, or string. Unknown option names are errors —
//! a typo in a config should stop the server, not silently run with a
//! default.
//!
//! Each consumer (the server core, each storage engine's settings adapter)
//! implements [`Options`]; the loader offers every pair to each consumer in
//! turn.

use std::fs;
use std::path::Path;

use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: malformed line, expected 'name: value'")]
    Malformed { line: usize },
    #[error("line {line}: unknown option '{name}'")]
    UnknownOption { line: usize, name: String },
    #[error("line {line}: invalid value for '{name}': {reason}")]
    BadValue {
        line: usize,
        name: String,
        reason: &'static str,
    },
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of offering one `name: value` pair to an option consumer.
pub enum Apply {
    Applied,
    UnknownName,
    BadValue(&'static str),
}

pub trait Options {
    fn apply(&mut self, name: &str, value: &str) -> Apply;
}

/// Load `path`, offering each pair to the consumers in order.
pub fn load(path: &Path, consumers: &mut [&mut dyn Options]) -> Result<(), ConfigError> {
    let contents = fs::read_to_string(path)?;
    info!("loading config from {:?}", path);

    for (lineno, raw) in contents.lines().enumerate() {
        let line = lineno + 1;
        let text = match raw.find('#') {
            Some(i) => &raw[..i],
            None => raw,
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let (name, value) = text.split_once(':').ok_or(ConfigError::Malformed { line })?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(ConfigError::Malformed { line });
        }

        let mut known = false;
        for consumer in consumers.iter_mut() {
            match consumer.apply(name, value) {
                Apply::Applied => {
                    known = true;
                    break;
                }
                Apply::UnknownName => continue,
                Apply::BadValue(reason) => {
                    return Err(ConfigError::BadValue {
                        line,
                        name: name.to_string(),
                        reason,
                    });
                }
            }
        }
        if !known {
            return Err(ConfigError::UnknownOption {
                line,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

// ── Typed value parsers ──────────────────────────────────────────────

pub fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

pub fn parse_float(v: &str) -> Option<f64> {
    v.parse().ok()
}

/// Unsigned integer with `+`, `*` and parentheses; `*` binds tighter.
pub fn parse_uint(v: &str) -> Option<u64> {
    let toks = lex(v)?;
    let mut pos = 0;
    let value = expr(&toks, &mut pos)?;
    if pos != toks.len() {
        return None;
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    Num(u64),
    Plus,
    Star,
    Open,
    Close,
}

fn lex(v: &str) -> Option<Vec<Tok>> {
    let mut toks = Vec::new();
    let bytes = v.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => i += 1,
            b'+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            b'*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            b'(' => {
                toks.push(Tok::Open);
                i += 1;
            }
            b')' => {
                toks.push(Tok::Close);
                i += 1;
            }
            b'0'..=b'9' => {
                let mut n: u64 = 0;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    n = n
                        .checked_mul(10)?
                        .checked_add((bytes[i] - b'0') as u64)?;
                    i += 1;
                }
                toks.push(Tok::Num(n));
            }
            _ => return None,
        }
    }
    if toks.is_empty() {
        return None;
    }
    Some(toks)
}

fn expr(toks: &[Tok], pos: &mut usize) -> Option<u64> {
    let mut v = term(toks, pos)?;
    while toks.get(*pos) == Some(&Tok::Plus) {
        *pos += 1;
        v = v.checked_add(term(toks, pos)?)?;
    }
    Some(v)
}

fn term(toks: &[Tok], pos: &mut usize) -> Option<u64> {
    let mut v = factor(toks, pos)?;
    while toks.get(*pos) == Some(&Tok::Star) {
        *pos += 1;
        v = v.checked_mul(factor(toks, pos)?)?;
    }
    Some(v)
}

fn factor(toks: &[Tok], pos: &mut usize) -> Option<u64> {
    match toks.get(*pos)? {
        Tok::Num(n) => {
            *pos += 1;
            Some(*n)
        }
        Tok::Open => {
            *pos += 1;
            let v = expr(toks, pos)?;
            if toks.get(*pos) != Some(&Tok::Close) {
                return None;
            }
            *pos += 1;
            Some(v)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Fake {
        port: u16,
        cas: bool,
        factor: f64,
        name: String,
    }

    impl Options for Fake {
        fn apply(&mut self, name: &str, value: &str) -> Apply {
            match name {
                "port" => match parse_uint(value).and_then(|v| u16::try_from(v).ok()) {
                    Some(v) => {
                        self.port = v;
                        Apply::Applied
                    }
                    None => Apply::BadValue("expected uint"),
                },
                "use_cas" => match parse_bool(value) {
                    Some(v) => {
                        self.cas = v;
                        Apply::Applied
                    }
                    None => Apply::BadValue("expected yes/no"),
                },
                "factor" => match parse_float(value) {
                    Some(v) => {
                        self.factor = v;
                        Apply::Applied
                    }
                    None => Apply::BadValue("expected float"),
                },
                "name" => {
                    self.name = value.to_string();
                    Apply::Applied
                }
                _ => Apply::UnknownName,
            }
        }
    }

    fn fake() -> Fake {
        Fake {
            port: 0,
            cas: false,
            factor: 0.0,
            name: String::new(),
        }
    }

    fn load_str(contents: &str, f: &mut Fake) -> Result<(), ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        load(file.path(), &mut [f])
    }

    #[test]
    fn test_basic_types() {
        let mut f = fake();
        load_str(
            "# a comment\nport: 12321\nuse_cas: yes\nfactor: 1.25\nname: mycache\n",
            &mut f,
        )
        .unwrap();
        assert_eq!(f.port, 12321);
        assert!(f.cas);
        assert_eq!(f.factor, 1.25);
        assert_eq!(f.name, "mycache");
    }

    #[test]
    fn test_uint_arithmetic() {
        assert_eq!(parse_uint("16"), Some(16));
        assert_eq!(parse_uint("1024 * 1024"), Some(1 << 20));
        assert_eq!(parse_uint("2 + 3 * 4"), Some(14));
        assert_eq!(parse_uint("(2 + 3) * 4"), Some(20));
        assert_eq!(parse_uint("16 * (1024 + 512)"), Some(16 * 1536));
    }

    #[test]
    fn test_uint_rejects_garbage() {
        assert_eq!(parse_uint(""), None);
        assert_eq!(parse_uint("abc"), None);
        assert_eq!(parse_uint("1 +"), None);
        assert_eq!(parse_uint("(1"), None);
        assert_eq!(parse_uint("1 - 2"), None);
        assert_eq!(parse_uint("1 2"), None);
    }

    #[test]
    fn test_unknown_option_is_error() {
        let mut f = fake();
        let err = load_str("bogus: 1\n", &mut f).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { line: 1, .. }));
    }

    #[test]
    fn test_bad_value_is_error() {
        let mut f = fake();
        let err = load_str("use_cas: maybe\n", &mut f).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }));
    }

    #[test]
    fn test_malformed_line_is_error() {
        let mut f = fake();
        let err = load_str("port 12321\n", &mut f).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 1 }));
    }

    #[test]
    fn test_trailing_comment_and_blank_lines() {
        let mut f = fake();
        load_str("\nport: 80 # inline comment\n\n", &mut f).unwrap();
        assert_eq!(f.port, 80);
    }
}
