//! RTSP authentication (RFC 2326 §16.4, RFC 2617).
//!
//! Cameras answer an unauthenticated request with `401 Unauthorized` and a
//! `WWW-Authenticate` challenge:
//!
//! ```text
//! WWW-Authenticate: Digest realm="IP Camera(21385)", nonce="8b2f1a..."
//! WWW-Authenticate: Basic realm="IP Camera(21385)"
//! ```
//!
//! The Digest response used here is the RFC 2069 form without `qop`:
//!
//! ```text
//! HA1      = MD5(login:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:HA2)
//! ```
//!
//! All hashes are rendered as lowercase hex.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use md5::{Digest, Md5};

/// Parameters extracted from a `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
}

impl Challenge {
    /// Extract `realm` and `nonce` from every challenge header value.
    ///
    /// Returns `None` when none of the values carry a realm or a nonce.
    pub fn parse<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut challenge = Challenge::default();
        for value in values {
            if challenge.realm.is_empty() {
                if let Some(realm) = parse_directive(value, "realm") {
                    challenge.realm = realm;
                }
            }
            if challenge.nonce.is_empty() {
                if let Some(nonce) = parse_directive(value, "nonce") {
                    challenge.nonce = nonce;
                }
            }
        }

        if challenge.realm.is_empty() && challenge.nonce.is_empty() {
            None
        } else {
            Some(challenge)
        }
    }

    pub fn is_digest(&self) -> bool {
        !self.nonce.is_empty()
    }
}

/// Computes `Authorization` header values once a challenge was received.
#[derive(Debug, Clone)]
pub struct Authenticator {
    login: String,
    password: String,
    challenge: Option<Challenge>,
}

impl Authenticator {
    pub fn new(login: &str, password: &str) -> Self {
        Self {
            login: login.to_string(),
            password: password.to_string(),
            challenge: None,
        }
    }

    /// Remember the server's challenge; later requests carry credentials.
    pub fn set_challenge(&mut self, challenge: Challenge) {
        tracing::debug!(realm = %challenge.realm, digest = challenge.is_digest(), "auth challenge received");
        self.challenge = Some(challenge);
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    /// `Basic base64(login:password)`.
    pub fn basic_header(&self) -> String {
        let token = BASE64_STANDARD.encode(format!("{}:{}", self.login, self.password));
        format!("Basic {}", token)
    }

    /// `Digest username=..., realm=..., nonce=..., uri=..., response=...`
    pub fn digest_header(&self, challenge: &Challenge, method: &str, uri: &str) -> String {
        let response = digest_response(
            &self.login,
            &self.password,
            &challenge.realm,
            &challenge.nonce,
            method,
            uri,
        );
        format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.login, challenge.realm, challenge.nonce, uri, response
        )
    }

    /// `Authorization` value for the next request, or `None` before any
    /// challenge. Digest is preferred whenever the server sent a nonce.
    pub fn authorization(&self, method: &str, uri: &str) -> Option<String> {
        let challenge = self.challenge.as_ref()?;
        if challenge.is_digest() {
            Some(self.digest_header(challenge, method, uri))
        } else {
            Some(self.basic_header())
        }
    }
}

/// Lowercase-hex Digest response without quality-of-protection.
pub fn digest_response(
    login: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&format!("{login}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

fn md5_hex(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Value of a quoted directive (`name="value"`) inside a header value.
///
/// The name must start a parameter, so `nonce` does not match inside
/// `cnonce`. Unquoted values (`stale=FALSE`) are accepted too.
pub fn parse_directive(header: &str, name: &str) -> Option<String> {
    let mut search = header;
    loop {
        let idx = search.find(name)?;
        let before = search[..idx].chars().next_back();
        let after = &search[idx + name.len()..];
        let at_boundary = before.is_none_or(|c| c == ' ' || c == ',' || c == '\t');
        let after = after.trim_start();
        if at_boundary && let Some(rest) = after.strip_prefix('=') {
            let rest = rest.trim_start();
            let value = if let Some(quoted) = rest.strip_prefix('"') {
                &quoted[..quoted.find('"')?]
            } else {
                rest.split([',', ' ']).next().unwrap_or("")
            };
            return Some(value.trim().to_string());
        }
        search = &search[idx + name.len()..];
    }
}
