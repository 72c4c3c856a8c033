//! Ties [`Server`], [`BufferedReader`], and the command/response modules
//! together into the retry state machine described in the design notes:
//! `FRESH -> ATTEMPT -> (SUCCESS | RECOVERABLE -> FRESH once more | FATAL)`.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;

use crate::buffered_reader::BufferedReader;
use crate::error::{Error, Result};
use crate::server::Server;

use super::command;
use super::error::OpError;
use super::response::{
    check_error_line, parse_counter_line, parse_stat_line, parse_storage_line, parse_value_header,
    trim_crlf, StatValue, StorageResult,
};

/// Run one socket operation against `server`, acquiring its socket and
/// retrying at most once.
///
/// - If the socket can't be acquired at all (dead/quarantined), that's a
///   routing failure — the caller (the client facade) may retry on a
///   different group.
/// - A timeout or would-block condition marks the server dead immediately
///   with no retry.
/// - Any other I/O error gets one retry against a freshly reconnected
///   socket; a second failure marks the server dead.
/// - A protocol-level error (malformed reply, explicit `ERROR` line)
///   closes the socket (without quarantining it) and is surfaced
///   immediately, never retried.
fn with_socket<R>(
    server: &mut Server,
    mut op: impl FnMut(&mut TcpStream) -> std::result::Result<R, OpError>,
) -> Result<R> {
    let mut attempt = 0;
    loop {
        let endpoint = server.endpoint();
        let socket = server
            .acquire_socket()
            .ok_or_else(|| Error::Routing(format!("server {} is unavailable", endpoint)))?;

        match op(socket) {
            Ok(value) => return Ok(value),
            Err(OpError::Protocol(msg)) => {
                server.close();
                return Err(Error::Protocol(msg));
            }
            Err(OpError::Io(err)) => {
                attempt += 1;
                let is_timeout = matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                );
                if is_timeout || attempt >= 2 {
                    server.mark_dead(err.to_string());
                    return Err(Error::Transport(err));
                }
                // First generic I/O failure: close and loop back to
                // FRESH once, reconnecting on the next iteration.
                server.close();
            }
        }
    }
}

fn read_single_value(
    reader: &mut BufferedReader<'_, TcpStream>,
) -> std::result::Result<Option<(Vec<u8>, u32, Option<u64>)>, OpError> {
    let line = reader.read_line()?;
    match parse_value_header(&line)? {
        None => Ok(None),
        Some(header) => {
            let mut value = reader.read_exact(header.len)?;
            reader.read_exact(2)?; // trailing \r\n after the value bytes
            value.truncate(header.len);
            let end_line = reader.read_line()?;
            if trim_crlf(&end_line) != b"END" {
                return Err(OpError::Protocol("expected END after value".into()));
            }
            Ok(Some((value, header.flags, header.cas)))
        }
    }
}

pub(crate) fn get(server: &mut Server, key: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
    with_socket(server, |socket| {
        socket.write_all(&command::get(key))?;
        let mut reader = BufferedReader::new(socket);
        Ok(read_single_value(&mut reader)?.map(|(v, f, _)| (v, f)))
    })
}

pub(crate) fn gets(server: &mut Server, key: &[u8]) -> Result<Option<(Vec<u8>, u32, u64)>> {
    with_socket(server, |socket| {
        socket.write_all(&command::gets(key))?;
        let mut reader = BufferedReader::new(socket);
        match read_single_value(&mut reader)? {
            None => Ok(None),
            Some((v, f, Some(cas))) => Ok(Some((v, f, cas))),
            Some((_, _, None)) => Err(OpError::Protocol("gets reply missing cas token".into())),
        }
    })
}

pub(crate) fn multi_get(
    server: &mut Server,
    keys: &[Vec<u8>],
) -> Result<HashMap<Vec<u8>, (Vec<u8>, u32)>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    with_socket(server, |socket| {
        socket.write_all(&command::multi_get(keys))?;
        let mut reader = BufferedReader::new(socket);
        let mut out = HashMap::new();
        loop {
            let line = reader.read_line()?;
            match parse_value_header(&line)? {
                None => break,
                Some(header) => {
                    let mut value = reader.read_exact(header.len)?;
                    reader.read_exact(2)?;
                    value.truncate(header.len);
                    out.insert(header.key, (value, header.flags));
                }
            }
        }
        Ok(out)
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn store(
    server: &mut Server,
    verb: &str,
    key: &[u8],
    flags: u32,
    expiry: u32,
    payload: &[u8],
    noreply: bool,
    cas: Option<u64>,
) -> Result<Option<StorageResult>> {
    with_socket(server, |socket| {
        socket.write_all(&command::storage(verb, key, flags, expiry, payload, noreply, cas))?;
        if noreply {
            return Ok(None);
        }
        let mut reader = BufferedReader::new(socket);
        let line = reader.read_line()?;
        Ok(Some(parse_storage_line(&line)?))
    })
}

pub(crate) fn append_prepend(
    server: &mut Server,
    verb: &str,
    key: &[u8],
    payload: &[u8],
    noreply: bool,
) -> Result<Option<StorageResult>> {
    with_socket(server, |socket| {
        socket.write_all(&command::append_prepend(verb, key, payload, noreply))?;
        if noreply {
            return Ok(None);
        }
        let mut reader = BufferedReader::new(socket);
        let line = reader.read_line()?;
        Ok(Some(parse_storage_line(&line)?))
    })
}

pub(crate) fn incr_decr(
    server: &mut Server,
    verb: &str,
    key: &[u8],
    amount: u64,
    noreply: bool,
) -> Result<Option<u64>> {
    with_socket(server, |socket| {
        socket.write_all(&command::incr_decr(verb, key, amount, noreply))?;
        if noreply {
            return Ok(None);
        }
        let mut reader = BufferedReader::new(socket);
        let line = reader.read_line()?;
        parse_counter_line(&line)
    })
}

pub(crate) fn delete(server: &mut Server, key: &[u8], noreply: bool) -> Result<Option<()>> {
    with_socket(server, |socket| {
        socket.write_all(&command::delete(key, noreply))?;
        if noreply {
            return Ok(None);
        }
        let mut reader = BufferedReader::new(socket);
        let line = reader.read_line()?;
        check_error_line(&line)?;
        match trim_crlf(&line) {
            b"DELETED" => Ok(Some(())),
            b"NOT_FOUND" => Ok(None),
            other => Err(OpError::Protocol(format!(
                "unexpected delete reply: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    })
}

pub(crate) fn stats(server: &mut Server) -> Result<HashMap<String, StatValue>> {
    with_socket(server, |socket| {
        socket.write_all(&command::stats())?;
        let mut reader = BufferedReader::new(socket);
        let mut out = HashMap::new();
        loop {
            let line = reader.read_line()?;
            match parse_stat_line(&line)? {
                None => break,
                Some((name, value)) => {
                    out.insert(name, value);
                }
            }
        }
        Ok(out)
    })
}
