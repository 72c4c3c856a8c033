//! Parses memcached text-protocol reply lines.

use super::error::OpError;

/// Strip a trailing `\r\n` or `\n`. Tolerates servers that only send `\n`.
pub(crate) fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Any line matching `^(CLIENT_|SERVER_)?ERROR(.*)` raises a protocol
/// error carrying the trailing message, whitespace-trimmed. These are
/// surfaced to the caller, never retried.
pub(crate) fn check_error_line(line: &[u8]) -> Result<(), OpError> {
    let text = String::from_utf8_lossy(trim_crlf(line));
    if text.starts_with("ERROR") || text.starts_with("CLIENT_ERROR") || text.starts_with("SERVER_ERROR") {
        return Err(OpError::Protocol(text.trim().to_string()));
    }
    Ok(())
}

/// The literal token a storage command (`set`/`add`/`replace`/`cas`)
/// replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

pub(crate) fn parse_storage_line(line: &[u8]) -> Result<StorageResult, OpError> {
    check_error_line(line)?;
    match trim_crlf(line) {
        b"STORED" => Ok(StorageResult::Stored),
        b"NOT_STORED" => Ok(StorageResult::NotStored),
        b"EXISTS" => Ok(StorageResult::Exists),
        b"NOT_FOUND" => Ok(StorageResult::NotFound),
        other => Err(OpError::Protocol(format!(
            "unexpected storage reply: {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Counter replies may have trailing spaces before the CRLF; tolerate
/// that (`trim_end`).
pub(crate) fn parse_counter_line(line: &[u8]) -> Result<Option<u64>, OpError> {
    check_error_line(line)?;
    let text = std::str::from_utf8(trim_crlf(line))
        .map_err(|_| OpError::Protocol("invalid utf8 in counter reply".into()))?
        .trim_end();
    if text == "NOT_FOUND" {
        return Ok(None);
    }
    text.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| OpError::Protocol(format!("unexpected counter reply: {}", text)))
}

/// A parsed `VALUE <key> <flags> <bytelen>[ <cas>]` header.
pub(crate) struct ValueHeader {
    pub(crate) key: Vec<u8>,
    pub(crate) flags: u32,
    pub(crate) len: usize,
    pub(crate) cas: Option<u64>,
}

/// `None` means the line was `END` (end of the value stream, or a miss
/// on a single-key `get`).
pub(crate) fn parse_value_header(line: &[u8]) -> Result<Option<ValueHeader>, OpError> {
    check_error_line(line)?;
    let trimmed = trim_crlf(line);
    if trimmed == b"END" {
        return Ok(None);
    }
    let text = std::str::from_utf8(trimmed)
        .map_err(|_| OpError::Protocol("invalid utf8 in VALUE line".into()))?;
    let mut parts = text.split_ascii_whitespace();
    if parts.next() != Some("VALUE") {
        return Err(OpError::Protocol(format!("unexpected reply: {}", text)));
    }
    let key = parts
        .next()
        .ok_or_else(|| OpError::Protocol("missing key in VALUE line".into()))?
        .as_bytes()
        .to_vec();
    let flags = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| OpError::Protocol("missing/invalid flags in VALUE line".into()))?;
    let len = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| OpError::Protocol("missing/invalid length in VALUE line".into()))?;
    let cas = match parts.next() {
        Some(s) => Some(
            s.parse::<u64>()
                .map_err(|_| OpError::Protocol("invalid cas token in VALUE line".into()))?,
        ),
        None => None,
    };
    Ok(Some(ValueHeader { key, flags, len, cas }))
}

/// A coerced `stats` value, per the coercion rules in the design notes:
/// `version` stays a string, `rusage_*` become seconds-as-float, all-digit
/// values become integers, everything else stays a string.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Str(String),
    Int(i64),
    Float(f64),
}

/// `None` means the line was `END`.
pub(crate) fn parse_stat_line(line: &[u8]) -> Result<Option<(String, StatValue)>, OpError> {
    check_error_line(line)?;
    let trimmed = trim_crlf(line);
    if trimmed == b"END" {
        return Ok(None);
    }
    let text = std::str::from_utf8(trimmed)
        .map_err(|_| OpError::Protocol("invalid utf8 in STAT line".into()))?;
    let mut parts = text.splitn(3, ' ');
    if parts.next() != Some("STAT") {
        return Err(OpError::Protocol(format!("unexpected reply: {}", text)));
    }
    let name = parts
        .next()
        .ok_or_else(|| OpError::Protocol("missing stat name".into()))?
        .to_string();
    let raw = parts.next().unwrap_or("");
    Ok(Some((name.clone(), coerce_stat_value(&name, raw))))
}

fn coerce_stat_value(name: &str, raw: &str) -> StatValue {
    if name == "version" {
        return StatValue::Str(raw.to_string());
    }
    if name == "rusage_user" || name == "rusage_system" {
        if let Some((secs, usecs)) = raw.split_once(':') {
            if let (Ok(s), Ok(u)) = (secs.parse::<f64>(), usecs.parse::<f64>()) {
                return StatValue::Float(s + u / 1_000_000.0);
            }
        }
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = raw.parse::<i64>() {
            return StatValue::Int(i);
        }
    }
    StatValue::Str(raw.to_string())
}
