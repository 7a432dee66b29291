use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::MediaSink;
use crate::media::h264::{DEFAULT_MAX_REASSEMBLY, H264Depacketizer};
use crate::protocol::{Challenge, Method, RtspResponse, RtspUrl};
use crate::session::{HandshakeState, InterleavedTransport, Session, Track};
use crate::stream::{Stream, StreamOptions};
use crate::transport::keepalive::Signaling;
use crate::transport::tcp::Connection;

/// Resends allowed after a `401 Unauthorized`.
const MAX_AUTH_RETRIES: usize = 1;

/// Client-level configuration, fixed for the life of one session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP dial timeout.
    pub connect_timeout: Duration,
    /// Deadline for one request/response exchange during the handshake.
    pub request_timeout: Duration,
    /// Steady-state read timeout while streaming.
    pub read_timeout: Duration,
    /// Timeout of the first interleaved read after PLAY. Cameras can take
    /// a long time to produce the first keyframe.
    pub first_read_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Dump full RTSP messages and desync diagnostics at debug level.
    pub debug: bool,
    /// Frames buffered between the socket reader and the depacketizer.
    pub queue_capacity: usize,
    /// Upper bound on one reassembled FU-A NAL unit.
    pub max_reassembly_size: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(10),
            first_read_timeout: Duration::from_secs(50),
            keepalive_interval: Duration::from_secs(20),
            debug: false,
            queue_capacity: 1024,
            max_reassembly_size: DEFAULT_MAX_REASSEMBLY,
            user_agent: concat!("rtsp-bridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// RTSP pull client for one camera.
///
/// Drives the handshake one step at a time:
///
/// ```text
/// connect -> options -> describe -> setup(0) .. setup(n-1) -> play
/// ```
///
/// Steps must be issued in order; anything else fails with
/// [`RtspError::InvalidState`]. The first failing step aborts the whole
/// handshake and closes the connection. [`play`](Self::play) consumes the
/// client and hands the connection to a [`Stream`].
///
/// [`RtspClient::start`] runs the whole sequence in one call.
pub struct RtspClient {
    config: ClientConfig,
    session: Session,
    connection: Option<Connection>,
    state: HandshakeState,
    aborted: bool,
}

impl RtspClient {
    /// Parse `url` and prepare a client. No I/O happens here.
    pub fn new(url: &str, config: ClientConfig) -> Result<Self> {
        let url = RtspUrl::parse(url)?;
        let session = Session::new(url, &config.user_agent);
        Ok(Self {
            config,
            session,
            connection: None,
            state: HandshakeState::Init,
            aborted: false,
        })
    }

    /// Run the full handshake and start streaming into `sink`.
    pub fn start<S>(url: &str, config: ClientConfig, sink: S) -> Result<Stream>
    where
        S: MediaSink + 'static,
    {
        let mut client = Self::new(url, config)?;
        client.connect()?;
        client.options()?;
        client.describe()?;
        client.setup_all()?;
        client.play(sink)
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dial the camera.
    pub fn connect(&mut self) -> Result<()> {
        self.expect_state(HandshakeState::Init, "connect requires a fresh client")?;

        let addr = self.session.url.socket_addr();
        tracing::info!(%addr, uri = %self.session.request_uri(), "connecting");
        let connection = self.step(|client| {
            Connection::connect(&addr, client.config.connect_timeout, client.config.debug)
        })?;

        self.connection = Some(connection);
        self.state = HandshakeState::Connected;
        Ok(())
    }

    pub fn options(&mut self) -> Result<RtspResponse> {
        self.expect_state(HandshakeState::Connected, "OPTIONS requires a connection")?;

        let uri = self.session.request_uri().to_string();
        let response = self.step(|client| client.execute(Method::Options, &uri, &[]))?;
        if let Some(public) = response.get_header("Public") {
            tracing::debug!(public, "server methods");
        }

        self.state = HandshakeState::OptionsSent;
        Ok(response)
    }

    /// Fetch the SDP and record the track list.
    pub fn describe(&mut self) -> Result<&[Track]> {
        self.expect_state(HandshakeState::OptionsSent, "DESCRIBE requires OPTIONS first")?;

        let uri = self.session.request_uri().to_string();
        self.step(|client| {
            let response =
                client.execute(Method::Describe, &uri, &[("Accept", "application/sdp")])?;
            client.session.apply_describe(&response)
        })?;

        self.state = HandshakeState::Described;
        Ok(&self.session.tracks)
    }

    /// SETUP the track at `index` on interleaved channels `2·index`,
    /// `2·index + 1`. Tracks must be set up in SDP order.
    pub fn setup(&mut self, index: usize) -> Result<InterleavedTransport> {
        let in_order = match self.state {
            HandshakeState::Described => index == 0,
            HandshakeState::Setup(previous) => index == previous + 1,
            _ => false,
        };
        if self.aborted || !in_order {
            return Err(RtspError::InvalidState("SETUP out of order"));
        }
        let Some(track) = self.session.tracks.get(index) else {
            return Err(RtspError::InvalidState("SETUP for unknown track"));
        };

        let uri = self.session.track_uri(&track.control);
        let requested = self.step(|_| {
            InterleavedTransport::for_track(index)
                .ok_or(RtspError::InvalidState("too many tracks for interleaved channels"))
        })?;
        let transport = requested.header_value();
        tracing::debug!(index, %uri, transport = %transport, "setting up track");

        self.step(|client| {
            let response =
                client.execute(Method::Setup, &uri, &[("Transport", transport.as_str())])?;
            client.session.apply_setup(index, requested, &response)
        })?;

        self.state = HandshakeState::Setup(index);
        Ok(self.session.tracks[index].transport.unwrap_or(requested))
    }

    /// SETUP every track discovered by DESCRIBE.
    pub fn setup_all(&mut self) -> Result<()> {
        let first = match self.state {
            HandshakeState::Setup(previous) => previous + 1,
            _ => 0,
        };
        for index in first..self.session.tracks.len() {
            self.setup(index)?;
        }
        Ok(())
    }

    /// Send PLAY and hand the connection over to a [`Stream`] feeding `sink`.
    pub fn play<S>(mut self, sink: S) -> Result<Stream>
    where
        S: MediaSink + 'static,
    {
        let last = self.session.tracks.len().checked_sub(1);
        if self.aborted || last.is_none() || last.map(HandshakeState::Setup) != Some(self.state) {
            return Err(RtspError::InvalidState("PLAY requires every track set up"));
        }

        let uri = self.session.request_uri().to_string();
        self.step(|client| {
            let response = client.execute(Method::Play, &uri, &[("Range", "npt=0.000-")])?;
            client.session.apply_play(&response);
            Ok(())
        })?;
        self.state = HandshakeState::Playing;

        let mut depacketizer = H264Depacketizer::with_max_reassembly(self.config.max_reassembly_size);
        if let Some((sps, pps)) = self.session.video_parameter_sets() {
            tracing::debug!(sps_len = sps.len(), pps_len = pps.len(), "priming parameter sets from SDP");
            depacketizer.prime(sps, pps);
        }

        let options = StreamOptions {
            video_channel: self.session.video_channel(),
            read_timeout: self.config.read_timeout,
            first_read_timeout: self.config.first_read_timeout,
            keepalive_interval: self.config.keepalive_interval,
            queue_capacity: self.config.queue_capacity,
            debug: self.config.debug,
        };

        let connection = self
            .connection
            .take()
            .ok_or(RtspError::InvalidState("not connected"))?;
        let (reader, writer) = connection.into_parts();
        let signaling = Signaling::new(
            self.session,
            writer,
            self.config.request_timeout,
            self.config.debug,
        );

        Stream::start(
            reader,
            signaling,
            Box::new(depacketizer),
            Box::new(sink),
            options,
        )
    }

    /// One request/response exchange with a bounded 401 retry.
    ///
    /// Only `200` counts as success. A `401` records the challenge and
    /// resends the request with credentials; a second one is
    /// [`RtspError::AuthFailed`].
    fn execute(
        &mut self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        let mut retries_left = MAX_AUTH_RETRIES;
        loop {
            let mut request = self.session.build_request(method, uri);
            for (name, value) in headers {
                request = request.add_header(name, value);
            }

            tracing::debug!(%method, uri, cseq = self.session.cseq(), "request");
            let connection = self
                .connection
                .as_mut()
                .ok_or(RtspError::InvalidState("not connected"))?;
            let response = connection.exchange(&request, self.config.request_timeout)?;

            match response.status_code {
                200 => return Ok(response),
                401 if retries_left > 0 && self.session.url.has_credentials() => {
                    retries_left -= 1;
                    let challenge =
                        Challenge::parse(response.get_headers("WWW-Authenticate")).unwrap_or_default();
                    self.session.auth_mut().set_challenge(challenge);
                    tracing::debug!(%method, "401 received, retrying with credentials");
                }
                401 => {
                    tracing::warn!(%method, "authorization rejected");
                    return Err(RtspError::AuthFailed {
                        method: method.to_string(),
                    });
                }
                code => {
                    tracing::warn!(%method, code, reason = %response.reason, "unexpected status");
                    return Err(RtspError::BadStatus {
                        method: method.to_string(),
                        code,
                    });
                }
            }
        }
    }

    /// Run one handshake step, aborting the handshake if it fails.
    fn step<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(state = ?self.state, error = %e, "handshake aborted");
                self.aborted = true;
                if let Some(connection) = self.connection.take() {
                    connection.close();
                }
                Err(e)
            }
        }
    }

    fn expect_state(&self, expected: HandshakeState, message: &'static str) -> Result<()> {
        if self.aborted || self.state != expected {
            return Err(RtspError::InvalidState(message));
        }
        Ok(())
    }
}
