//! RTSP protocol implementation, client side (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: parsing the
//! camera URL, building requests, parsing responses, answering
//! authentication challenges and reading the SDP track list.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://10.0.0.5:554/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Methods issued
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability query, keepalive |
//! | DESCRIBE | §10.2 | Retrieve SDP and track list |
//! | SETUP | §10.4 | Bind a track to an interleaved channel pair |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Best-effort goodbye on close |

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;
pub mod url;

pub use auth::{Authenticator, Challenge};
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
pub use sdp::{MediaDescription, SessionDescription};
pub use url::RtspUrl;
