use std::fmt;

/// RTSP methods issued by the client (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// SETUP rtsp://10.0.0.5:554/stream/trackID=1 RTSP/1.0\r\n
/// CSeq: 3\r\n
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n
/// Authorization: Digest username="admin", ...\r\n
/// User-Agent: rtsp-bridge/0.1\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize). Requests never carry a body.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: &str, cseq: u32) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a header only when a value is present.
    pub fn add_optional_header(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.add_header(name, v),
            None => self,
        }
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);

        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }

        request.push_str("\r\n");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_options() {
        let req = RtspRequest::new(Method::Options, "rtsp://h:554/p", 1)
            .add_header("User-Agent", "rtsp-bridge/0.1");
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://h:554/p RTSP/1.0\r\nCSeq: 1\r\n"));
        assert!(s.contains("User-Agent: rtsp-bridge/0.1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn optional_header_skipped_when_absent() {
        let req = RtspRequest::new(Method::Play, "rtsp://h:554/p", 5)
            .add_optional_header("Session", None)
            .add_optional_header("Authorization", Some("Basic YTpi"));
        assert_eq!(req.get_header("session"), None);
        assert_eq!(req.get_header("authorization"), Some("Basic YTpi"));
        assert_eq!(req.get_header("cseq"), Some("5"));
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::Describe.to_string(), "DESCRIBE");
        assert_eq!(Method::Setup.as_str(), "SETUP");
    }
}
