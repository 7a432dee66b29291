//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Reads the body of a DESCRIBE response. Only the lines needed to set up
//! and decode the stream are interpreted:
//!
//! ```text
//! m=video 0 RTP/AVP 96                          ← media section starts
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAH5WoFAFuQA==,aM48gA==
//! a=control:trackID=1                           ← track control URL
//! ```
//!
//! Every `m=` line opens a new [`MediaDescription`]; attributes before the
//! first `m=` line are session-level and ignored.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{ProtocolErrorKind, Result, RtspError};

/// One `m=` section of the session description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media kind (`video`, `audio`, `application`, ...).
    pub media: String,
    /// First payload type listed on the `m=` line.
    pub payload_type: Option<u8>,
    /// `a=control` value; empty when the section has none.
    pub control: String,
    /// Encoding name from `a=rtpmap` (e.g. `H264`).
    pub encoding: Option<String>,
    /// Clock rate from `a=rtpmap` (e.g. 90000).
    pub clock_rate: Option<u32>,
    /// Raw `sprop-parameter-sets` from `a=fmtp` (RFC 6184 §8.1).
    pub sprop_parameter_sets: Option<String>,
}

impl MediaDescription {
    pub fn is_video(&self) -> bool {
        self.media.eq_ignore_ascii_case("video")
    }

    pub fn is_h264(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("H264"))
    }

    /// Decode `sprop-parameter-sets` into `(SPS, PPS)`.
    ///
    /// Returns `None` unless both entries are present and valid base64.
    pub fn parameter_sets(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let sprop = self.sprop_parameter_sets.as_deref()?;
        let mut sps = None;
        let mut pps = None;
        for part in sprop.split(',') {
            let Ok(nal) = BASE64_STANDARD.decode(part.trim()) else {
                tracing::debug!(part, "ignoring undecodable sprop-parameter-sets entry");
                continue;
            };
            match nal.first().map(|b| b & 0x1f) {
                Some(7) if sps.is_none() => sps = Some(nal),
                Some(8) if pps.is_none() => pps = Some(nal),
                _ => {}
            }
        }
        Some((sps?, pps?))
    }
}

/// The media sections of an SDP body, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn parse(body: &str) -> Result<Self> {
        let mut media: Vec<MediaDescription> = Vec::new();

        for line in body.lines() {
            let line = line.trim();
            if let Some(m) = line.strip_prefix("m=") {
                let mut fields = m.split_whitespace();
                let kind = fields.next().unwrap_or("").to_string();
                let payload_type = fields.nth(2).and_then(|pt| pt.parse().ok());
                media.push(MediaDescription {
                    media: kind,
                    payload_type,
                    ..Default::default()
                });
                continue;
            }

            let Some(current) = media.last_mut() else {
                continue;
            };

            if let Some(control) = line.strip_prefix("a=control:") {
                current.control = control.trim().to_string();
            } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
                // a=rtpmap:96 H264/90000
                if let Some((_, codec)) = rtpmap.split_once(' ') {
                    let mut parts = codec.trim().split('/');
                    current.encoding = parts.next().map(str::to_string);
                    current.clock_rate = parts.next().and_then(|r| r.parse().ok());
                }
            } else if let Some(fmtp) = line.strip_prefix("a=fmtp:") {
                let params = fmtp.split_once(' ').map(|(_, p)| p).unwrap_or("");
                for param in params.split(';') {
                    if let Some((key, value)) = param.trim().split_once('=')
                        && key.trim().eq_ignore_ascii_case("sprop-parameter-sets")
                    {
                        current.sprop_parameter_sets = Some(value.trim().to_string());
                    }
                }
            }
        }

        if media.is_empty() {
            return Err(RtspError::protocol(ProtocolErrorKind::NoTracks));
        }

        tracing::debug!(tracks = media.len(), "SDP parsed");
        Ok(Self { media })
    }

    /// Control paths of every media section, in SDP order.
    pub fn tracks(&self) -> Vec<String> {
        self.media.iter().map(|m| m.control.clone()).collect()
    }

    /// Index of the first video section, if any.
    pub fn video_track_index(&self) -> Option<usize> {
        self.media.iter().position(MediaDescription::is_video)
    }
}
