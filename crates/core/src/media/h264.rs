use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};

/// Default bound on one reassembled FU-A NAL unit.
pub const DEFAULT_MAX_REASSEMBLY: usize = 2 * 1024 * 1024;

const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

const NAL_SLICE_IDR: u8 = 5;
const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_FU_A: u8 = 28;

/// Reassembles one NAL unit from FU-A fragments (RFC 6184 §5.8).
///
/// ```text
/// FU indicator:  [F|NRI|Type=28]     (1 byte)
/// FU header:     [S|E|R|NAL_Type]    (1 byte)
/// Fragment data: [...]
/// ```
///
/// A start fragment opens a fresh buffer holding a one-byte placeholder
/// for the NAL header. Every fragment (start included) appends its data
/// after the 2-byte FU header. The end fragment writes the reconstructed
/// header `F|NRI` (from the indicator) `| Type` (from the FU header) into
/// the placeholder and hands the buffer back.
///
/// A buffer that would grow past `max_size` is discarded and the rest of
/// that fragment run is ignored until the next start fragment.
#[derive(Debug)]
pub struct FuReassembly {
    buffer: Option<Vec<u8>>,
    max_size: usize,
}

impl FuReassembly {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: None,
            max_size,
        }
    }

    /// Feed the payload of one FU-A packet (indicator and header included).
    ///
    /// Returns the complete NAL unit when `payload` carries the end flag.
    pub fn push(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 2 {
            tracing::debug!(len = payload.len(), "FU-A packet too short");
            return None;
        }

        let indicator = payload[0];
        let header = payload[1];
        let is_start = header & 0x80 != 0;
        let is_end = header & 0x40 != 0;
        let fragment = &payload[2..];

        if is_start {
            if self.buffer.is_some() {
                tracing::debug!("FU-A start before previous end, dropping partial NAL");
            }
            let mut buffer = Vec::with_capacity(1 + fragment.len());
            buffer.push(0);
            self.buffer = Some(buffer);
        }

        let Some(buffer) = self.buffer.as_mut() else {
            tracing::trace!("FU-A continuation without start, dropped");
            return None;
        };

        if buffer.len() + fragment.len() > self.max_size {
            tracing::warn!(
                size = buffer.len() + fragment.len(),
                max = self.max_size,
                "FU-A reassembly exceeds bound, dropping NAL"
            );
            self.buffer = None;
            return None;
        }
        buffer.extend_from_slice(fragment);

        if !is_end {
            return None;
        }

        let mut nal = self.buffer.take()?;
        nal[0] = (indicator & 0xe0) | (header & 0x1f);
        Some(nal)
    }

    /// Bytes accumulated for the in-flight NAL (placeholder included).
    pub fn pending_len(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    pub fn reset(&mut self) {
        self.buffer = None;
    }
}

/// H.264 RTP depacketizer (RFC 6184).
///
/// Turns the RTP payloads of one video track into access units ready for
/// a WebRTC-style sink:
///
/// - **SPS (7) / PPS (8)** are cached on first sighting and never
///   overwritten. They are not forwarded on their own.
/// - **IDR (5)** is emitted as `00 00 01 SPS 00 00 01 PPS 00 00 01 IDR`
///   so every keyframe is independently decodable. Keyframes are held back
///   until both parameter sets are known.
/// - **Other single NALs (1–23)** are forwarded raw once a keyframe has
///   been emitted. SEI (6) is always dropped.
/// - **FU-A (28)** fragments are reassembled with [`FuReassembly`] and the
///   completed NAL is dispatched through the same rules.
/// - STAP/MTAP/FU-B and reserved types are dropped.
///
/// ## Timestamps
///
/// Each access unit carries the RTP timestamp of the packet that completed
/// it and the delta to the previously emitted one (wrapping 32-bit
/// arithmetic). The first access unit has no predecessor, so its
/// `duration` is `None`.
#[derive(Debug)]
pub struct H264Depacketizer {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    fu: FuReassembly,
    keyframe_seen: bool,
    last_timestamp: Option<u32>,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::with_max_reassembly(DEFAULT_MAX_REASSEMBLY)
    }

    pub fn with_max_reassembly(max_reassembly: usize) -> Self {
        Self {
            sps: None,
            pps: None,
            fu: FuReassembly::new(max_reassembly),
            keyframe_seen: false,
            last_timestamp: None,
        }
    }

    /// Seed the parameter-set cache (e.g. from SDP `sprop-parameter-sets`).
    ///
    /// Counts as a sighting: values already cached are kept.
    pub fn prime(&mut self, sps: Vec<u8>, pps: Vec<u8>) {
        self.cache_parameter_set(NAL_SPS, sps);
        self.cache_parameter_set(NAL_PPS, pps);
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    pub fn keyframe_seen(&self) -> bool {
        self.keyframe_seen
    }

    /// Process one RTP packet of the video channel.
    pub fn push(&mut self, packet: &RtpPacket<'_>) -> Option<AccessUnit> {
        let payload = packet.payload;
        let Some(&first) = payload.first() else {
            tracing::trace!(seq = packet.sequence, "empty RTP payload");
            return None;
        };

        match first & 0x1f {
            1..=23 => self.handle_nal(payload.to_vec(), packet.timestamp),
            NAL_FU_A => {
                let nal = self.fu.push(payload)?;
                self.handle_nal(nal, packet.timestamp)
            }
            other => {
                tracing::trace!(nal_type = other, "unsupported NAL packetization, dropped");
                None
            }
        }
    }

    /// Dispatch one complete NAL unit.
    fn handle_nal(&mut self, nal: Vec<u8>, timestamp: u32) -> Option<AccessUnit> {
        let nal_type = nal.first()? & 0x1f;
        match nal_type {
            NAL_SPS | NAL_PPS => {
                self.cache_parameter_set(nal_type, nal);
                None
            }
            NAL_SLICE_IDR => {
                let (Some(sps), Some(pps)) = (self.sps.as_deref(), self.pps.as_deref()) else {
                    tracing::debug!(
                        has_sps = self.sps.is_some(),
                        has_pps = self.pps.is_some(),
                        "keyframe before parameter sets, dropped"
                    );
                    return None;
                };

                let mut data =
                    Vec::with_capacity(3 * START_CODE.len() + sps.len() + pps.len() + nal.len());
                data.extend_from_slice(&START_CODE);
                data.extend_from_slice(sps);
                data.extend_from_slice(&START_CODE);
                data.extend_from_slice(pps);
                data.extend_from_slice(&START_CODE);
                data.extend_from_slice(&nal);

                if !self.keyframe_seen {
                    tracing::info!(timestamp, "first keyframe");
                }
                self.keyframe_seen = true;
                Some(self.emit(data, timestamp, true))
            }
            NAL_SEI => None,
            1..=23 => {
                if !self.keyframe_seen {
                    tracing::trace!(nal_type, "waiting for keyframe, dropped");
                    return None;
                }
                Some(self.emit(nal, timestamp, false))
            }
            _ => None,
        }
    }

    fn cache_parameter_set(&mut self, nal_type: u8, nal: Vec<u8>) {
        let slot = if nal_type == NAL_SPS {
            &mut self.sps
        } else {
            &mut self.pps
        };
        if slot.is_none() {
            tracing::debug!(nal_type, len = nal.len(), "H.264 parameter set cached");
            *slot = Some(nal);
        }
    }

    fn emit(&mut self, data: Vec<u8>, timestamp: u32, keyframe: bool) -> AccessUnit {
        let duration = self
            .last_timestamp
            .map(|previous| timestamp.wrapping_sub(previous));
        self.last_timestamp = Some(timestamp);

        tracing::trace!(
            len = data.len(),
            timestamp,
            duration = ?duration,
            keyframe,
            "access unit"
        );

        AccessUnit {
            data,
            rtp_timestamp: timestamp,
            duration,
            keyframe,
        }
    }
}

impl Depacketizer for H264Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket<'_>) -> Option<AccessUnit> {
        self.push(packet)
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90000
    }
}
