//! Interleaved RTP over the RTSP TCP connection (RFC 2326 §10.12).
//!
//! After PLAY the server multiplexes RTP/RTCP onto the control connection:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   "$" = 36    |   Channel ID  |        Length in octets       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! :         Binary data (Length according to Length field)        :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Cameras are not always well behaved: replies to keepalive requests
//! arrive in the same byte stream, and some firmware emits stray bytes or
//! truncated chunks. [`FrameReader`] recovers from both:
//!
//! - Any header without the `$` magic starts a bounded [`Resync`] scan for
//!   `$` followed by a channel in `0..=3`.
//! - When that header spells `RTSP` the scanned bytes are also tracked as an
//!   in-band response and counted as one once its blank line is seen. They
//!   still go through the same scan and budget.
//! - A well-formed header whose length is outside `[12, 16384]` is skipped
//!   without reading its payload.

use std::io::{BufRead, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, RtspError, TimeoutKind};

pub const INTERLEAVED_MAGIC: u8 = b'$';
/// Smallest accepted payload: one bare RTP fixed header.
pub const MIN_FRAME_LEN: usize = 12;
pub const MAX_FRAME_LEN: usize = 16384;
/// Bytes the resync scan may consume before giving up.
pub const MAX_RESYNC_LOOKAHEAD: usize = 4096;
/// Highest channel id accepted while resynchronizing.
const MAX_RESYNC_CHANNEL: u8 = 3;

/// Decoded 4-byte interleaved header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u8,
    pub length: usize,
}

impl FrameHeader {
    /// Parse a header, `None` unless it starts with the `$` magic.
    pub fn parse(bytes: [u8; 4]) -> Option<Self> {
        if bytes[0] != INTERLEAVED_MAGIC {
            return None;
        }
        Some(Self {
            channel: bytes[1],
            length: u16::from_be_bytes([bytes[2], bytes[3]]) as usize,
        })
    }

    pub fn is_valid_length(&self) -> bool {
        (MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&self.length)
    }
}

/// One interleaved chunk, alive only between the socket and the
/// depacketizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResyncState {
    SeekMagic,
    SeekChannel,
    SeekLengthHi { channel: u8 },
    SeekLengthLo { channel: u8, hi: u8 },
}

/// Byte-at-a-time scan for the next interleaved header.
///
/// ```text
/// SeekMagic --'$'--> SeekChannel --0..=3--> SeekLengthHi --> SeekLengthLo --> header
///     ^                   |
///     +----other byte-----+   ('$' stays in SeekChannel)
/// ```
///
/// Every byte fed counts against the budget; exceeding it is fatal.
#[derive(Debug)]
pub struct Resync {
    state: ResyncState,
    scanned: usize,
    budget: usize,
}

impl Resync {
    pub fn new(budget: usize) -> Self {
        Self {
            state: ResyncState::SeekMagic,
            scanned: 0,
            budget,
        }
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Advance by one byte. Returns the header once all four bytes of a
    /// plausible one have been seen.
    pub fn step(&mut self, byte: u8) -> Result<Option<FrameHeader>> {
        self.scanned += 1;
        if self.scanned > self.budget {
            return Err(RtspError::DesyncFatal {
                scanned: self.scanned - 1,
            });
        }

        self.state = match self.state {
            ResyncState::SeekMagic if byte == INTERLEAVED_MAGIC => ResyncState::SeekChannel,
            ResyncState::SeekMagic => ResyncState::SeekMagic,
            ResyncState::SeekChannel if byte <= MAX_RESYNC_CHANNEL => {
                ResyncState::SeekLengthHi { channel: byte }
            }
            ResyncState::SeekChannel if byte == INTERLEAVED_MAGIC => ResyncState::SeekChannel,
            ResyncState::SeekChannel => ResyncState::SeekMagic,
            ResyncState::SeekLengthHi { channel } => ResyncState::SeekLengthLo { channel, hi: byte },
            ResyncState::SeekLengthLo { channel, hi } => {
                self.state = ResyncState::SeekMagic;
                return Ok(Some(FrameHeader {
                    channel,
                    length: u16::from_be_bytes([hi, byte]) as usize,
                }));
            }
        };
        Ok(None)
    }
}

/// Counters shared between the reader thread and the stream handle.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub frames: AtomicU64,
    pub corrupt_frames: AtomicU64,
    pub resyncs: AtomicU64,
    pub inband_responses: AtomicU64,
    pub access_units: AtomicU64,
    pub discarded_frames: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub corrupt_frames: u64,
    pub resyncs: u64,
    pub inband_responses: u64,
    pub access_units: u64,
    pub discarded_frames: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            inband_responses: self.inband_responses.load(Ordering::Relaxed),
            access_units: self.access_units.load(Ordering::Relaxed),
            discarded_frames: self.discarded_frames.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Tracks an RTSP response read byte by byte inside the interleaved
/// stream, typically the reply to a keepalive.
#[derive(Debug)]
struct InbandReply {
    status_line: Vec<u8>,
    in_status_line: bool,
    tail: u32,
    complete: bool,
}

impl InbandReply {
    const END_OF_HEADERS: u32 = u32::from_be_bytes(*b"\r\n\r\n");
    const MAX_STATUS_LINE: usize = 128;

    fn new() -> Self {
        Self {
            status_line: b"RTSP".to_vec(),
            in_status_line: true,
            tail: 0,
            complete: false,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.complete {
            return;
        }
        if self.in_status_line {
            if byte == b'\r' || byte == b'\n' {
                self.in_status_line = false;
            } else if self.status_line.len() < Self::MAX_STATUS_LINE {
                self.status_line.push(byte);
            }
        }
        self.tail = (self.tail << 8) | u32::from(byte);
        self.complete = self.tail == Self::END_OF_HEADERS;
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn status_line(&self) -> String {
        String::from_utf8_lossy(&self.status_line).into_owned()
    }
}

/// Reads `$`-framed chunks off the RTSP connection.
pub struct FrameReader<R> {
    inner: R,
    stats: Arc<StreamStats>,
    debug: bool,
    frames_read: u64,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_stats(inner, Arc::new(StreamStats::default()), false)
    }

    pub fn with_stats(inner: R, stats: Arc<StreamStats>, debug: bool) -> Self {
        Self {
            inner,
            stats,
            debug,
            frames_read: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Frames successfully returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next valid frame.
    ///
    /// Corrupt lengths, in-band responses and garbage are skipped here;
    /// only fatal conditions (timeout, closed socket, exhausted resync
    /// budget) are returned as errors.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let header = self.read_header()?;

            if !header.is_valid_length() {
                let err = RtspError::CorruptFrame {
                    channel: header.channel,
                    length: header.length,
                };
                StreamStats::bump(&self.stats.corrupt_frames);
                tracing::debug!(error = %err, "skipping frame");
                continue;
            }

            let mut payload = vec![0u8; header.length];
            self.inner
                .read_exact(&mut payload)
                .map_err(|e| RtspError::from_io(e, self.timeout_kind()))?;

            self.frames_read += 1;
            StreamStats::bump(&self.stats.frames);
            return Ok(Frame {
                channel: header.channel,
                payload,
            });
        }
    }

    /// Read a 4-byte header, recovering framing when it is not one.
    ///
    /// Every byte after a bad header goes through one [`Resync`] budget,
    /// in-band responses included, so no `$` in between is ever skipped.
    fn read_header(&mut self) -> Result<FrameHeader> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;

        if let Some(header) = FrameHeader::parse(bytes) {
            return Ok(header);
        }

        let mut reply = (&bytes == b"RTSP").then(InbandReply::new);
        if reply.is_none() && self.debug {
            tracing::debug!(?bytes, "desync, scanning for interleaved header");
        }

        // The bad header's tail may already hold the magic.
        let mut resync = Resync::new(MAX_RESYNC_LOOKAHEAD);
        let mut found = None;
        for &byte in &bytes[1..] {
            if let Some(reply) = reply.as_mut() {
                reply.push(byte);
            }
            found = resync.step(byte)?;
        }
        while found.is_none() {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte)?;
            if let Some(reply) = reply.as_mut() {
                reply.push(byte[0]);
            }
            found = match resync.step(byte[0]) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(scanned = resync.scanned(), "desync fatal, no interleaved header found");
                    return Err(e);
                }
            };
        }

        match reply {
            Some(reply) if reply.is_complete() => {
                StreamStats::bump(&self.stats.inband_responses);
                tracing::debug!(status = %reply.status_line(), "in-band RTSP response skipped");
            }
            _ => {
                StreamStats::bump(&self.stats.resyncs);
                tracing::debug!(scanned = resync.scanned(), "desync repaired");
            }
        }

        found.ok_or(RtspError::DesyncFatal {
            scanned: resync.scanned(),
        })
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| RtspError::from_io(e, self.timeout_kind()))
    }

    fn timeout_kind(&self) -> TimeoutKind {
        if self.frames_read == 0 {
            TimeoutKind::FirstRead
        } else {
            TimeoutKind::Read
        }
    }
}
