//! A line- and byte-framed reader over a socket, used by the protocol
//! engine to parse memcached's CRLF-terminated text replies.

use std::io::{self, Read};

const CAPACITY: usize = 16 * 1024;

/// Buffers reads off of `R` in [`CAPACITY`]-sized chunks and exposes
/// line- and exact-length framing on top. The socket's own read deadline
/// (set via `SO_RCVTIMEO` on [`Server::connect`](crate::server::Server))
/// is what actually bounds each underlying read; a deadline that elapses
/// surfaces here as an ordinary `io::Error`.
pub(crate) struct BufferedReader<'a, R: Read> {
    stream: &'a mut R,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a, R: Read> BufferedReader<'a, R> {
    pub(crate) fn new(stream: &'a mut R) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        if self.pos < self.buf.len() {
            return Ok(());
        }
        self.buf.clear();
        self.pos = 0;
        let mut chunk = vec![0_u8; CAPACITY];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }
        chunk.truncate(n);
        self.buf = chunk;
        Ok(())
    }

    /// Read bytes up to and including the next `\n`.
    pub(crate) fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            if self.pos >= self.buf.len() {
                self.fill()?;
            }
            while self.pos < self.buf.len() {
                let byte = self.buf[self.pos];
                self.pos += 1;
                line.push(byte);
                if byte == b'\n' {
                    return Ok(line);
                }
            }
        }
    }

    /// Read exactly `n` bytes, blocking (up to the read deadline) until
    /// they are available.
    pub(crate) fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos >= self.buf.len() {
                self.fill()?;
            }
            let take = std::cmp::min(n - out.len(), self.buf.len() - self.pos);
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }
}
