//! Socket plumbing for the single RTSP control connection.
//!
//! Everything runs over one TCP connection (RFC 2326 §10.12):
//!
//! - **Signaling** ([`tcp`]): request/response exchanges during the
//!   handshake, each under one absolute deadline.
//!
//! - **Media** ([`interleaved`]): after PLAY the same connection carries
//!   `$`-framed RTP, read by a dedicated thread.
//!
//! - **Keepalive** ([`keepalive`]): periodic fire-and-forget OPTIONS written
//!   concurrently with the media reads.

pub mod interleaved;
pub mod keepalive;
pub mod tcp;

pub use interleaved::{Frame, FrameReader};
pub use tcp::Connection;
