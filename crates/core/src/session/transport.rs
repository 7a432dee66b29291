/// Interleaved channel pair for one track (RFC 2326 §10.12, §12.39).
///
/// RTP and RTCP for a track share the RTSP TCP connection, distinguished
/// by the channel byte of each `$` frame. Track `i` asks for channels
/// `2i` (RTP) and `2i+1` (RTCP).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=5D1F0A3B;mode="play"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleavedTransport {
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
}

impl InterleavedTransport {
    /// Channel pair requested for the track at `index` in SDP order.
    ///
    /// `None` past track 127, where `2i` no longer fits the channel byte.
    pub fn for_track(index: usize) -> Option<Self> {
        let rtp_channel = index.checked_mul(2).and_then(|c| u8::try_from(c).ok())?;
        Some(Self {
            rtp_channel,
            rtcp_channel: rtp_channel + 1,
        })
    }

    /// `Transport` header value sent with SETUP.
    pub fn header_value(&self) -> String {
        format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            self.rtp_channel, self.rtcp_channel
        )
    }

    /// Parse the `interleaved=RTP-RTCP` pair out of a `Transport` header.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::InterleavedTransport;
    ///
    /// let t = InterleavedTransport::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(t.rtp_channel, 2);
    /// assert_eq!(t.rtcp_channel, 3);
    ///
    /// assert!(InterleavedTransport::parse("RTP/AVP;unicast;client_port=8000-8001").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();
            if let Some(channels) = part.strip_prefix("interleaved=") {
                let mut channels = channels.split('-');
                let rtp_channel: u8 = channels.next()?.trim().parse().ok()?;
                let rtcp_channel = match channels.next() {
                    Some(c) => c.trim().parse().ok()?,
                    None => rtp_channel.wrapping_add(1),
                };
                return Some(Self {
                    rtp_channel,
                    rtcp_channel,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_per_track() {
        let first = InterleavedTransport::for_track(0).unwrap();
        assert_eq!((first.rtp_channel, first.rtcp_channel), (0, 1));
        let second = InterleavedTransport::for_track(1).unwrap();
        assert_eq!((second.rtp_channel, second.rtcp_channel), (2, 3));
    }

    #[test]
    fn channels_run_out_after_track_127() {
        let last = InterleavedTransport::for_track(127).unwrap();
        assert_eq!((last.rtp_channel, last.rtcp_channel), (254, 255));
        assert!(InterleavedTransport::for_track(128).is_none());
        assert!(InterleavedTransport::for_track(usize::MAX).is_none());
    }

    #[test]
    fn header_value_format() {
        assert_eq!(
            InterleavedTransport::for_track(1).unwrap().header_value(),
            "RTP/AVP/TCP;unicast;interleaved=2-3"
        );
    }

    #[test]
    fn parse_server_reply() {
        let t = InterleavedTransport::parse(
            "RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=5D1F0A3B;mode=\"play\"",
        )
        .unwrap();
        assert_eq!(Some(t), InterleavedTransport::for_track(0));
    }

    #[test]
    fn parse_single_channel() {
        let t = InterleavedTransport::parse("RTP/AVP/TCP;interleaved=4").unwrap();
        assert_eq!(t.rtp_channel, 4);
        assert_eq!(t.rtcp_channel, 5);
    }

    #[test]
    fn parse_no_interleaved() {
        assert!(InterleavedTransport::parse("RTP/AVP;unicast").is_none());
    }
}
