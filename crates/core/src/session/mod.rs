//! Client-side RTSP session state (RFC 2326 §3, §12.37).
//!
//! A [`Session`] holds everything the client learns while talking to one
//! camera:
//!
//! - The canonical request URI and credentials from the URL.
//! - The authentication challenge (realm/nonce) once a 401 was seen.
//! - The server-assigned session ID (from the first successful SETUP).
//! - The request sequence counter (`CSeq`), strictly increasing.
//! - The track list from DESCRIBE and the interleaved channels from SETUP.
//! - The initial RTP timestamps announced in PLAY's `RTP-Info`.
//!
//! A session belongs to exactly one client. It is mutated only by the
//! sequential handshake and, after PLAY, by the keepalive path.
//!
//! ## Handshake lifecycle
//!
//! ```text
//! Init -> Connected -> OptionsSent -> Described -> Setup(0) .. Setup(n-1) -> Playing
//! ```

pub mod transport;

use crate::error::{ProtocolErrorKind, Result, RtspError};
use crate::protocol::sdp::{MediaDescription, SessionDescription};
use crate::protocol::{Authenticator, Method, RtspRequest, RtspResponse, RtspUrl};
pub use transport::InterleavedTransport;

/// Handshake state machine. Transitions are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Connected,
    OptionsSent,
    Described,
    /// SETUP for the track at this index succeeded.
    Setup(usize),
    Playing,
}

/// One SDP media section the client intends to receive.
#[derive(Debug, Clone)]
pub struct Track {
    /// `a=control` value identifying the track.
    pub control: String,
    pub media: MediaDescription,
    /// Channel pair confirmed by the server's SETUP reply.
    pub transport: Option<InterleavedTransport>,
}

/// Per-camera signaling state.
#[derive(Debug)]
pub struct Session {
    pub url: RtspUrl,
    auth: Authenticator,
    user_agent: String,
    cseq: u32,
    session_id: Option<String>,
    /// Timeout advertised in the `Session` header, in seconds.
    pub session_timeout: Option<u64>,
    /// `Content-Base` of the DESCRIBE reply, base for relative controls.
    content_base: Option<String>,
    pub tracks: Vec<Track>,
    /// `rtptime` from `RTP-Info`, one entry per announced track.
    pub first_timestamps: Vec<Option<u32>>,
}

impl Session {
    pub fn new(url: RtspUrl, user_agent: &str) -> Self {
        let auth = Authenticator::new(&url.login, &url.password);
        Self {
            url,
            auth,
            user_agent: user_agent.to_string(),
            cseq: 0,
            session_id: None,
            session_timeout: None,
            content_base: None,
            tracks: Vec::new(),
            first_timestamps: Vec::new(),
        }
    }

    pub fn request_uri(&self) -> &str {
        &self.url.request_uri
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut Authenticator {
        &mut self.auth
    }

    /// Build the next request: bumps `CSeq` and attaches the session,
    /// authorization and user-agent headers.
    ///
    /// The Digest `uri` field always carries the canonical request URI,
    /// even when the request line targets a track.
    pub fn build_request(&mut self, method: Method, uri: &str) -> RtspRequest {
        self.cseq += 1;
        let authorization = self.auth.authorization(method.as_str(), &self.url.request_uri);
        RtspRequest::new(method, uri, self.cseq)
            .add_optional_header("Session", self.session_id.as_deref())
            .add_optional_header("Authorization", authorization.as_deref())
            .add_header("User-Agent", &self.user_agent)
    }

    /// Request URI for a track control path.
    ///
    /// Absolute controls are used verbatim, `*` or an empty control means
    /// the aggregate URI, anything else is appended with `/`.
    pub fn track_uri(&self, control: &str) -> String {
        let base = self
            .content_base
            .as_deref()
            .unwrap_or(&self.url.request_uri);
        if control.starts_with("rtsp://") || control.starts_with("rtsps://") {
            control.to_string()
        } else if control.is_empty() || control == "*" {
            base.to_string()
        } else if base.ends_with('/') {
            format!("{}{}", base, control)
        } else {
            format!("{}/{}", base, control)
        }
    }

    /// Record tracks from a successful DESCRIBE.
    pub fn apply_describe(&mut self, response: &RtspResponse) -> Result<()> {
        let body = response
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or(RtspError::protocol(ProtocolErrorKind::MissingSdp))?;

        let sdp = SessionDescription::parse(body)?;

        if let Some(base) = response.get_header("Content-Base") {
            let base = base.trim();
            if !base.is_empty() && base != self.url.request_uri {
                tracing::debug!(content_base = base, "using Content-Base for track URIs");
                self.content_base = Some(base.to_string());
            }
        }

        self.tracks = sdp
            .media
            .into_iter()
            .map(|media| Track {
                control: media.control.clone(),
                media,
                transport: None,
            })
            .collect();

        tracing::info!(
            tracks = ?self.tracks.iter().map(|t| t.control.as_str()).collect::<Vec<_>>(),
            "tracks discovered"
        );
        Ok(())
    }

    /// Record the session ID and confirmed channels from a successful SETUP.
    pub fn apply_setup(
        &mut self,
        index: usize,
        requested: InterleavedTransport,
        response: &RtspResponse,
    ) -> Result<()> {
        let header = response
            .get_header("Session")
            .ok_or(RtspError::protocol(ProtocolErrorKind::MissingSession))?;
        let (id, timeout) = parse_session_header(header);
        if id.is_empty() {
            return Err(RtspError::protocol(ProtocolErrorKind::MissingSession));
        }

        if self.session_id.as_deref() != Some(id) {
            tracing::debug!(session_id = id, timeout = ?timeout, "session established");
        }
        self.session_id = Some(id.to_string());
        if timeout.is_some() {
            self.session_timeout = timeout;
        }

        let confirmed = response
            .get_header("Transport")
            .and_then(InterleavedTransport::parse)
            .unwrap_or(requested);
        if confirmed != requested {
            tracing::warn!(
                requested = ?requested,
                confirmed = ?confirmed,
                "server changed interleaved channels"
            );
        }
        if let Some(track) = self.tracks.get_mut(index) {
            track.transport = Some(confirmed);
        }
        Ok(())
    }

    /// Record initial RTP timestamps from a successful PLAY.
    pub fn apply_play(&mut self, response: &RtspResponse) {
        if let Some(info) = response.get_header("RTP-Info") {
            self.first_timestamps = parse_rtp_info(info)
                .into_iter()
                .map(|entry| entry.rtptime)
                .collect();
            tracing::debug!(first_timestamps = ?self.first_timestamps, "RTP-Info parsed");
        }
    }

    /// Interleaved channel carrying H.264 video.
    ///
    /// The first video track's confirmed RTP channel, falling back to its
    /// requested pair, and to channel 0 when the SDP lists no video.
    pub fn video_channel(&self) -> u8 {
        self.tracks
            .iter()
            .enumerate()
            .find(|(_, t)| t.media.is_video())
            .and_then(|(i, t)| t.transport.or_else(|| InterleavedTransport::for_track(i)))
            .map(|t| t.rtp_channel)
            .unwrap_or(0)
    }

    /// SPS/PPS advertised in the video track's `sprop-parameter-sets`.
    pub fn video_parameter_sets(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.tracks
            .iter()
            .find(|t| t.media.is_video())
            .and_then(|t| t.media.parameter_sets())
    }
}

/// Split a `Session` header into ID and optional timeout (RFC 2326 §12.37).
///
/// `"47112344;timeout=60"` -> `("47112344", Some(60))`
pub fn parse_session_header(value: &str) -> (&str, Option<u64>) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or("").trim();
    let timeout = parts
        .filter_map(|p| p.trim().strip_prefix("timeout="))
        .find_map(|t| t.trim().parse().ok());
    (id, timeout)
}

/// One entry of an `RTP-Info` header (RFC 2326 §12.33).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpInfo {
    pub url: String,
    pub seq: Option<u16>,
    pub rtptime: Option<u32>,
}

/// Parse `url=...;seq=...;rtptime=...` entries separated by commas.
pub fn parse_rtp_info(value: &str) -> Vec<RtpInfo> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let mut info = RtpInfo {
                url: String::new(),
                seq: None,
                rtptime: None,
            };
            for param in entry.split(';') {
                match param.trim().split_once('=') {
                    Some(("url", v)) => info.url = v.trim().to_string(),
                    Some(("seq", v)) => info.seq = v.trim().parse().ok(),
                    Some(("rtptime", v)) => info.rtptime = v.trim().parse().ok(),
                    _ => {}
                }
            }
            info
        })
        .collect()
}
