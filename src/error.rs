//! The unified error type returned by every public operation.
//!
//! Internally the client distinguishes more states than this (a dead
//! server, a protocol parse failure, a timeout), but by the time an error
//! crosses the public API it has been folded into one of the kinds below,
//! matching the error taxonomy in the design notes.

use std::fmt::{self, Display, Formatter};
use std::io;

/// An error produced while talking to a memcachedb cluster.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument was invalid: an illegal key, a write
    /// attempted on a readonly client, a `cas` call with no producer, or a
    /// malformed constructor argument.
    Argument(String),
    /// No group or server could be found to serve a key: no groups are
    /// configured, every candidate server is dead, or no master could be
    /// elected for a group.
    Routing(String),
    /// A socket-level failure: connect, read, write, or a timeout. The
    /// offending server has already been marked dead by the time this is
    /// returned.
    Transport(io::Error),
    /// The server sent something that doesn't parse as the memcached text
    /// protocol, or replied with an explicit `ERROR`/`CLIENT_ERROR`/
    /// `SERVER_ERROR` line.
    Protocol(String),
    /// A value exceeded the configured size limit before anything was
    /// written to a socket.
    Size(String),
    /// A non-owning thread touched a client constructed with
    /// `multithread(false)`.
    ThreadDiscipline,
    /// The configured payload serializer failed to encode or decode a
    /// value.
    Serialize(bincode::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialize(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Argument(msg) => write!(f, "argument error: {}", msg),
            Error::Routing(msg) => write!(f, "routing error: {}", msg),
            Error::Transport(err) => write!(f, "transport error: {}", err),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Size(msg) => write!(f, "size error: {}", msg),
            Error::ThreadDiscipline => write!(
                f,
                "this client was constructed with multithread(false) and may only be used from the thread that created it"
            ),
            Error::Serialize(err) => write!(f, "serialize error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(err) => Some(err),
            Error::Serialize(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
