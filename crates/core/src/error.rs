//! Error types for the RTSP client library.

use std::fmt;
use std::io;

/// Errors that can occur while pulling a stream from an RTSP source.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Startup**: [`InvalidUrl`](Self::InvalidUrl), [`Connect`](Self::Connect),
///   [`AuthFailed`](Self::AuthFailed), [`BadStatus`](Self::BadStatus),
///   [`Protocol`](Self::Protocol), [`InvalidState`](Self::InvalidState).
/// - **Transport**: [`Timeout`](Self::Timeout), [`Io`](Self::Io),
///   [`Closed`](Self::Closed).
/// - **Streaming**: [`DesyncFatal`](Self::DesyncFatal),
///   [`KeepaliveSendFailure`](Self::KeepaliveSendFailure),
///   [`Sink`](Self::Sink).
/// - **Recoverable**: [`CorruptFrame`](Self::CorruptFrame) is skipped by the
///   frame reader and only ever surfaces as a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// The URL scheme or host could not be parsed.
    #[error("invalid RTSP URL: {0}")]
    InvalidUrl(String),

    /// TCP dial to the camera failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A connect, read or write deadline expired.
    #[error("{0} timed out")]
    Timeout(TimeoutKind),

    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not valid RTSP.
    #[error("RTSP protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// The server answered 401 again after credentials were supplied.
    #[error("{method} authorization failed")]
    AuthFailed { method: String },

    /// The server answered with a status other than 200 or 401.
    #[error("{method} returned bad status code {code}")]
    BadStatus { method: String, code: u16 },

    /// The resync scan did not find an interleaved header within its budget.
    #[error("interleaved stream desynchronized after scanning {scanned} bytes")]
    DesyncFatal { scanned: usize },

    /// Interleaved header with a length outside the accepted range.
    #[error("corrupt frame on channel {channel}: length {length}")]
    CorruptFrame { channel: u8, length: usize },

    /// A keepalive OPTIONS could not be written.
    #[error("keepalive send failed: {0}")]
    KeepaliveSendFailure(#[source] io::Error),

    /// The connection was closed by the peer or torn down locally.
    #[error("connection closed")]
    Closed,

    /// The downstream media sink rejected a sample.
    #[error("media sink error: {0}")]
    Sink(String),

    /// A handshake step was issued out of order (e.g. SETUP before DESCRIBE).
    #[error("invalid handshake state: {0}")]
    InvalidState(&'static str),
}

impl RtspError {
    /// Map a socket error, turning deadline expiry and EOF into their
    /// dedicated variants.
    pub(crate) fn from_io(err: io::Error, kind: TimeoutKind) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout(kind),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Self::Closed,
            _ => Self::Io(err),
        }
    }

    pub(crate) fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::Protocol { kind }
    }
}

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Read,
    /// The first interleaved read after PLAY (uses the longer timeout).
    FirstRead,
    Write,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Read => write!(f, "read"),
            Self::FirstRead => write!(f, "first read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Specific kind of RTSP protocol failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Connection delivered no bytes before the blank line.
    EmptyResponse,
    /// Status line did not look like `RTSP/1.0 <code> <reason>`.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Headers plus body exceeded the response buffer bound.
    ResponseTooLarge,
    /// DESCRIBE succeeded without an SDP body.
    MissingSdp,
    /// SDP contained no media section.
    NoTracks,
    /// SETUP succeeded without a Session header.
    MissingSession,
    /// RTP packet shorter than its fixed header and CSRC list.
    TruncatedRtp,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::ResponseTooLarge => write!(f, "response too large"),
            Self::MissingSdp => write!(f, "SDP body not found"),
            Self::NoTracks => write!(f, "SDP has no media tracks"),
            Self::MissingSession => write!(f, "missing Session header"),
            Self::TruncatedRtp => write!(f, "truncated RTP packet"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
