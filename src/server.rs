//! A single TCP endpoint: lazy connect, dead/alive bookkeeping, and the
//! 30-second quarantine window used after any I/O failure.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How long a server stays quarantined after being marked dead.
pub(crate) const QUARANTINE: Duration = Duration::from_secs(30);

/// The current connection state of a [`Server`], replacing the
/// stringly-typed status of the source implementation with a small
/// enumeration (see REDESIGN FLAGS).
#[derive(Debug, Clone)]
pub(crate) enum ServerStatus {
    NotConnected,
    Connected,
    Dead { reason: String, retry_after: Instant },
}

/// One memcachedb server within a [`Group`](crate::group::Group). Opens its
/// socket lazily on first use and quarantines itself for 30 seconds after
/// any connect or I/O failure.
#[derive(Debug)]
pub(crate) struct Server {
    host: String,
    port: u16,
    weight: u32,
    timeout: Option<Duration>,
    socket: Option<TcpStream>,
    status: ServerStatus,
}

impl Server {
    pub(crate) fn new(host: String, port: u16, weight: u32, timeout: Option<Duration>) -> Self {
        Self {
            host,
            port,
            weight,
            timeout,
            socket: None,
            status: ServerStatus::NotConnected,
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True if this server is usable right now: either already connected,
    /// never connected, or past its quarantine window.
    pub(crate) fn alive(&self) -> bool {
        match &self.status {
            ServerStatus::Dead { retry_after, .. } => Instant::now() >= *retry_after,
            ServerStatus::NotConnected | ServerStatus::Connected => true,
        }
    }

    /// Return the open socket, connecting lazily if necessary. Returns
    /// `None` if the server is currently quarantined or the connect
    /// attempt itself failed (in which case the server is re-quarantined).
    pub(crate) fn acquire_socket(&mut self) -> Option<&mut TcpStream> {
        if let ServerStatus::Dead { retry_after, .. } = &self.status {
            if Instant::now() < *retry_after {
                return None;
            }
        }

        if self.socket.is_none() {
            match self.connect() {
                Ok(stream) => {
                    self.socket = Some(stream);
                    self.status = ServerStatus::Connected;
                    debug!(host = %self.host, port = self.port, "connected");
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.mark_dead(reason);
                    return None;
                }
            }
        }

        self.socket.as_mut()
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let stream = match self.timeout {
            Some(timeout) => {
                let addr = (self.host.as_str(), self.port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "could not resolve server address")
                    })?;
                TcpStream::connect_timeout(&addr, timeout)?
            }
            None => TcpStream::connect((self.host.as_str(), self.port))?,
        };

        stream.set_nodelay(true)?;
        // Best-effort: some platforms reject SO_RCVTIMEO/SO_SNDTIMEO on
        // certain socket kinds. Silently tolerate that rather than fail
        // the whole connect.
        let _ = stream.set_read_timeout(self.timeout);
        let _ = stream.set_write_timeout(self.timeout);

        Ok(stream)
    }

    /// Close the socket and quarantine this server for [`QUARANTINE`].
    pub(crate) fn mark_dead(&mut self, reason: String) {
        self.close();
        let retry_after = Instant::now() + QUARANTINE;
        warn!(host = %self.host, port = self.port, reason = %reason, "server marked dead");
        self.status = ServerStatus::Dead { reason, retry_after };
    }

    /// Close the socket without quarantining. The server remains eligible
    /// for the very next [`acquire_socket`](Self::acquire_socket) call.
    pub(crate) fn close(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_lazy_connect_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0_u8; 16];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(b"pong\r\n").unwrap();
            n
        });

        let mut server = Server::new("127.0.0.1".into(), port, 1, Some(Duration::from_secs(1)));
        assert!(server.alive());
        let socket = server.acquire_socket().unwrap();
        socket.write_all(b"ping").unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_mark_dead_quarantines() {
        let mut server = Server::new("127.0.0.1".into(), 1, 1, Some(Duration::from_millis(50)));
        // Nothing is listening on port 1, so the connect attempt fails.
        assert!(server.acquire_socket().is_none());
        assert!(!server.alive());
    }

    #[test]
    fn test_close_does_not_quarantine() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
        });
        let mut server = Server::new("127.0.0.1".into(), port, 1, Some(Duration::from_secs(1)));
        assert!(server.acquire_socket().is_some());
        server.close();
        assert!(server.alive());
        handle.join().unwrap();
    }
}
