use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError, TimeoutKind};
use crate::protocol::response::MAX_RESPONSE_SIZE;
use crate::protocol::{RtspRequest, RtspResponse};

/// The RTSP TCP connection to one camera.
///
/// Reads go through a `BufReader` that is kept for the whole life of the
/// connection: bytes the server sends right after a response (e.g. the
/// first interleaved frames following PLAY) stay buffered and are handed
/// to the frame reader with [`into_parts`](Self::into_parts).
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer_addr: SocketAddr,
    debug: bool,
}

impl Connection {
    /// Dial `addr` (`host:port`), trying every resolved address in turn.
    pub fn connect(addr: &str, timeout: Duration, debug: bool) -> Result<Self> {
        let resolved: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|source| RtspError::Connect {
                addr: addr.to_string(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for candidate in resolved {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::from_stream(stream, debug),
                Err(e) => {
                    tracing::debug!(addr = %candidate, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let source = last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
        });
        if matches!(
            source.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) {
            return Err(RtspError::Timeout(TimeoutKind::Connect));
        }
        Err(RtspError::Connect {
            addr: addr.to_string(),
            source,
        })
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, debug: bool) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;

        tracing::info!(%peer_addr, "connected");

        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            peer_addr,
            debug,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one request and read its response under a single deadline.
    ///
    /// The deadline is absolute: time spent writing is taken from the
    /// time left for reading.
    pub fn exchange(&mut self, request: &RtspRequest, timeout: Duration) -> Result<RtspResponse> {
        let deadline = Instant::now() + timeout;
        self.write_request(request, deadline)?;

        let writer = &self.writer;
        let response = RtspResponse::read_from(&mut self.reader, MAX_RESPONSE_SIZE, || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RtspError::Timeout(TimeoutKind::Read));
            }
            writer.set_read_timeout(Some(remaining))?;
            Ok(())
        })?;

        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            status = response.status_code,
            cseq = ?response.cseq(),
            "response"
        );
        if self.debug {
            tracing::debug!(
                "<<< {} {}\n{:?}\n{}",
                response.status_code,
                response.reason,
                response.headers,
                response.body.as_deref().unwrap_or("")
            );
        }

        Ok(response)
    }

    fn write_request(&mut self, request: &RtspRequest, deadline: Instant) -> Result<()> {
        let text = request.serialize();
        if self.debug {
            tracing::debug!(">>> {}", text.trim_end());
        }
        write_with_deadline(&mut self.writer, text.as_bytes(), deadline)
    }

    /// Split into the buffered read half and the write half.
    pub fn into_parts(self) -> (BufReader<TcpStream>, TcpStream) {
        (self.reader, self.writer)
    }

    pub fn close(&self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

/// Write all bytes with the socket's write timeout set to what is left
/// of `deadline`.
pub fn write_with_deadline(stream: &mut TcpStream, bytes: &[u8], deadline: Instant) -> Result<()> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(RtspError::Timeout(TimeoutKind::Write));
    }
    stream.set_write_timeout(Some(remaining))?;
    stream
        .write_all(bytes)
        .and_then(|_| stream.flush())
        .map_err(|e| RtspError::from_io(e, TimeoutKind::Write))
}
