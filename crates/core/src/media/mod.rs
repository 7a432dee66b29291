//! RTP depacketization and the outbound media sink.
//!
//! This module provides the [`Depacketizer`] trait, the H.264
//! implementation and the [`MediaSink`] capability the stream pushes
//! samples into.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every interleaved frame on the video channel carries one RTP packet:
//! a 12-byte fixed header ([`rtp::RtpPacket`]), `4 × CC` bytes of CSRC
//! identifiers, then the codec payload. The 32-bit timestamp runs on the
//! codec clock (90 kHz for video) and is what sample durations derive from.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Status |
//! |-------|--------|-----|--------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Implemented |
//!
//! Channels other than the video channel are counted and discarded.

pub mod h264;
pub mod rtp;

use std::sync::mpsc::SyncSender;

use crate::error::{Result, RtspError};
use rtp::RtpPacket;

/// One decodable unit produced by a depacketizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// NAL bytes; keyframes are start-code prefixed `SPS PPS IDR`.
    pub data: Vec<u8>,
    pub rtp_timestamp: u32,
    /// Clock ticks since the previous access unit, `None` for the first.
    pub duration: Option<u32>,
    pub keyframe: bool,
}

/// Codec-specific RTP depacketizer.
///
/// Owned by the single consumer of the frame queue, so implementations
/// keep their reassembly and parameter-set state as plain fields.
pub trait Depacketizer: Send {
    /// Feed one RTP packet; returns an access unit when one completes.
    fn depacketize(&mut self, packet: &RtpPacket<'_>) -> Option<AccessUnit>;

    /// Codec name as it appears in `a=rtpmap` (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;
}

/// A payload and its duration in RTP clock ticks, as handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub duration: u32,
}

/// Downstream consumer of samples (e.g. a WebRTC video track).
///
/// Called from the stream's consumer thread. Implementations must not
/// block indefinitely or the frame queue fills and the socket reader
/// stalls behind it. Returning an error ends the stream.
pub trait MediaSink: Send {
    fn write_sample(&mut self, sample: Sample) -> Result<()>;
}

impl MediaSink for SyncSender<Sample> {
    fn write_sample(&mut self, sample: Sample) -> Result<()> {
        self.send(sample)
            .map_err(|_| RtspError::Sink("sample receiver dropped".to_string()))
    }
}

/// Adapts a closure into a [`MediaSink`].
pub struct FnSink<F>(pub F);

impl<F> MediaSink for FnSink<F>
where
    F: FnMut(Sample) -> Result<()> + Send,
{
    fn write_sample(&mut self, sample: Sample) -> Result<()> {
        (self.0)(sample)
    }
}
