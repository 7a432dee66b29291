use crate::error::{ProtocolErrorKind, Result, RtspError};

/// Size of the fixed RTP header in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// A borrowed view of one RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                 CSRC list (CC × 4 bytes)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The payload starts after the fixed header and the CSRC list. Header
/// extensions and padding are not interpreted.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_count: u8,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse an RTP packet, failing when it is shorter than its header.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(RtspError::protocol(ProtocolErrorKind::TruncatedRtp));
        }

        let csrc_count = data[0] & 0x0f;
        let header_len = RTP_HEADER_LEN + 4 * csrc_count as usize;
        if data.len() < header_len {
            return Err(RtspError::protocol(ProtocolErrorKind::TruncatedRtp));
        }

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            csrc_count,
            payload: &data[header_len..],
        })
    }

    pub fn header_len(&self) -> usize {
        RTP_HEADER_LEN + 4 * self.csrc_count as usize
    }
}

#[cfg(test)]
pub(crate) fn build_packet(timestamp: u32, csrc_count: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; RTP_HEADER_LEN + 4 * csrc_count as usize];
    packet[0] = (2 << 6) | (csrc_count & 0x0f);
    packet[1] = 96;
    packet[4..8].copy_from_slice(&timestamp.to_be_bytes());
    packet[8..12].copy_from_slice(&0xAABBCCDDu32.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}
