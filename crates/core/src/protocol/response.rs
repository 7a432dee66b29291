use std::io::{BufRead, Read};

use crate::error::{ProtocolErrorKind, Result, RtspError, TimeoutKind};

/// Upper bound on a single response (status line, headers and body).
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 401 Unauthorized\r\n
/// CSeq: 2\r\n
/// WWW-Authenticate: Digest realm="IP Camera", nonce="a1b2c3"\r\n
/// \r\n
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body is only
/// read when a `Content-Length` header announces one.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub reason: String,
    /// Headers as ordered (name, value) pairs, names stored as received.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    /// Parse the status line and headers of a response.
    ///
    /// Anything after the first blank line is taken as the body.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, Some(body)),
            None => (raw, None),
        };

        let mut lines = head.lines();
        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::protocol(ProtocolErrorKind::EmptyResponse))?;

        let (status_code, reason) = parse_status_line(status_line)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RtspError::protocol(ProtocolErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspResponse {
            status_code,
            reason,
            headers,
            body: body.filter(|b| !b.is_empty()).map(str::to_string),
        })
    }

    /// Read exactly one response off a buffered stream.
    ///
    /// `arm` is invoked before every blocking read so the caller can keep
    /// an absolute deadline across the whole exchange. At most `limit`
    /// bytes are consumed; a longer response fails with
    /// [`ProtocolErrorKind::ResponseTooLarge`].
    pub fn read_from<R, F>(reader: &mut R, limit: usize, mut arm: F) -> Result<Self>
    where
        R: BufRead,
        F: FnMut() -> Result<()>,
    {
        let mut head = String::new();
        loop {
            let remaining = limit.saturating_sub(head.len());
            if remaining == 0 {
                return Err(RtspError::protocol(ProtocolErrorKind::ResponseTooLarge));
            }

            arm()?;
            let mut line = String::new();
            let n = reader
                .by_ref()
                .take(remaining as u64)
                .read_line(&mut line)
                .map_err(|e| RtspError::from_io(e, TimeoutKind::Read))?;
            if n == 0 {
                if head.is_empty() {
                    return Err(RtspError::Closed);
                }
                break;
            }
            // Tolerate stray CRLFs between messages.
            if head.is_empty() && line.trim().is_empty() {
                continue;
            }
            head.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
            if !line.ends_with('\n') && head.len() >= limit {
                return Err(RtspError::protocol(ProtocolErrorKind::ResponseTooLarge));
            }
        }

        let mut response = Self::parse(&head)?;

        let content_length = response
            .get_header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if content_length > 0 {
            if head.len() + content_length > limit {
                return Err(RtspError::protocol(ProtocolErrorKind::ResponseTooLarge));
            }
            let mut body = vec![0u8; content_length];
            arm()?;
            reader
                .read_exact(&mut body)
                .map_err(|e| RtspError::from_io(e, TimeoutKind::Read))?;
            response.body = Some(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(response)
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values of a repeatable header (e.g. several `WWW-Authenticate`).
    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// `RTSP/1.0 200 OK` -> `(200, "OK")`.
fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.trim().splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("RTSP/") {
        return Err(RtspError::protocol(ProtocolErrorKind::InvalidStatusLine));
    }
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or(RtspError::protocol(ProtocolErrorKind::InvalidStatusLine))?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((code, reason))
}
