use std::io;

/// Internal error produced while performing one socket operation. Not
/// part of the public API — [`crate::error::Error`] is what callers see.
#[derive(Debug)]
pub(crate) enum OpError {
    /// A socket-level failure (connect, read, write, timeout).
    Io(io::Error),
    /// The server sent a reply that doesn't parse as the memcached text
    /// protocol, or an explicit `ERROR`/`CLIENT_ERROR`/`SERVER_ERROR`
    /// line.
    Protocol(String),
}

impl From<io::Error> for OpError {
    fn from(err: io::Error) -> Self {
        OpError::Io(err)
    }
}
