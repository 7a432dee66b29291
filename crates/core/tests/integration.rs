//! End-to-end tests against a scripted fake camera.
//!
//! Each test binds a listener on an ephemeral port, plays the camera side
//! of the conversation from a thread, and drives the real client at it.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtsp::error::TimeoutKind;
use rtsp::protocol::auth::digest_response;
use rtsp::session::HandshakeState;
use rtsp::{ClientConfig, RtspClient, RtspError, Sample};

const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Fake Camera\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:trackID=1\r\n\
m=audio 0 RTP/AVP 8\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=control:trackID=2\r\n";

const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1f];
const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

/// One parsed request as seen by the camera.
struct Request {
    method: String,
    uri: String,
    head: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    fn cseq(&self) -> &str {
        self.header("CSeq").unwrap_or("0")
    }
}

/// Camera side of one connection.
struct Camera {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
    addr: SocketAddr,
}

impl Camera {
    fn request_uri(&self) -> String {
        format!("rtsp://{}/live", self.addr)
    }

    fn read_request(&mut self) -> Request {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).unwrap();
            assert!(n > 0, "client closed mid-request");
            if line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let mut parts = head.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let uri = parts.next().unwrap_or_default().to_string();
        Request { method, uri, head }
    }

    fn respond(&mut self, request: &Request, status: &str, headers: &[(&str, &str)], body: &str) {
        let mut text = format!("RTSP/1.0 {}\r\nCSeq: {}\r\n", status, request.cseq());
        for (name, value) in headers {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !body.is_empty() {
            text.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        text.push_str("\r\n");
        text.push_str(body);
        self.stream.write_all(text.as_bytes()).unwrap();
    }

    fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// OPTIONS, DESCRIBE, two SETUPs and PLAY without authentication.
    fn accept_handshake(&mut self) {
        let options = self.read_request();
        assert_eq!(options.method, "OPTIONS");
        self.respond(&options, "200 OK", &[("Public", "OPTIONS, DESCRIBE, SETUP, PLAY")], "");

        let describe = self.read_request();
        assert_eq!(describe.method, "DESCRIBE");
        self.respond(&describe, "200 OK", &[("Content-Type", "application/sdp")], SDP);

        for channels in ["0-1", "2-3"] {
            let setup = self.read_request();
            assert_eq!(setup.method, "SETUP");
            let transport = format!("RTP/AVP/TCP;unicast;interleaved={}", channels);
            self.respond(
                &setup,
                "200 OK",
                &[("Session", "12345678;timeout=60"), ("Transport", &transport)],
                "",
            );
        }

        let play = self.read_request();
        assert_eq!(play.method, "PLAY");
        assert_eq!(play.header("Session"), Some("12345678"));
        self.respond(&play, "200 OK", &[], "");
    }
}

fn fake_camera<T, F>(script: F) -> (SocketAddr, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(Camera) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let camera = Camera {
            reader: BufReader::new(stream.try_clone().unwrap()),
            stream,
            addr,
        };
        script(camera)
    });
    (addr, handle)
}

fn interleaved(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![b'$', channel];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn rtp(sequence: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x80, 96];
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&0x1234_5678u32.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn annexb_keyframe(slice: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in [&SPS[..], &PPS[..], slice] {
        out.extend_from_slice(&[0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        first_read_timeout: Duration::from_secs(2),
        keepalive_interval: Duration::from_secs(60),
        ..ClientConfig::default()
    }
}

#[test]
fn digest_handshake_and_depacketized_stream() {
    let (addr, camera) = fake_camera(|mut cam| {
        let uri = cam.request_uri();

        let first = cam.read_request();
        assert_eq!(first.method, "OPTIONS");
        assert_eq!(first.uri, uri);
        assert_eq!(first.cseq(), "1");
        assert!(first.header("Authorization").is_none());
        cam.respond(
            &first,
            "401 Unauthorized",
            &[("WWW-Authenticate", "Digest realm=\"cam\", nonce=\"abc123\"")],
            "",
        );

        let retry = cam.read_request();
        assert_eq!(retry.method, "OPTIONS");
        assert_eq!(retry.cseq(), "2");
        let expected = digest_response("admin", "secret", "cam", "abc123", "OPTIONS", &uri);
        let authorization = retry.header("Authorization").unwrap_or_default().to_string();
        assert!(authorization.starts_with("Digest username=\"admin\""));
        assert!(authorization.contains(&format!("response=\"{}\"", expected)));
        cam.respond(&retry, "200 OK", &[("Public", "OPTIONS, DESCRIBE, SETUP, PLAY")], "");

        let describe = cam.read_request();
        assert_eq!(describe.method, "DESCRIBE");
        assert!(describe.header("Authorization").is_some());
        cam.respond(&describe, "200 OK", &[("Content-Type", "application/sdp")], SDP);

        let mut setup_uris = Vec::new();
        for channels in ["0-1", "2-3"] {
            let setup = cam.read_request();
            assert_eq!(setup.method, "SETUP");
            assert_eq!(
                setup.header("Transport"),
                Some(format!("RTP/AVP/TCP;unicast;interleaved={}", channels).as_str())
            );
            setup_uris.push(setup.uri.clone());
            let transport = format!("RTP/AVP/TCP;unicast;interleaved={}", channels);
            cam.respond(
                &setup,
                "200 OK",
                &[("Session", "12345678;timeout=60"), ("Transport", &transport)],
                "",
            );
        }

        let play = cam.read_request();
        assert_eq!(play.method, "PLAY");
        assert_eq!(play.cseq(), "6");
        assert_eq!(play.header("Session"), Some("12345678"));
        let rtp_info = format!("url={}/trackID=1;seq=1;rtptime=1000", uri);
        cam.respond(&play, "200 OK", &[("RTP-Info", &rtp_info)], "");

        let mut media = vec![0x01, 0x02, 0x03];
        media.extend(interleaved(0, &rtp(1, 1000, &SPS)));
        media.extend(interleaved(0, &rtp(2, 1000, &PPS)));
        media.extend(interleaved(2, &[0xD5; 40]));
        // Declared length below the minimum: skipped without a payload.
        media.extend([b'$', 0, 0, 5]);
        media.extend(interleaved(0, &rtp(3, 1000, &[0x7c, 0x85, 0xAA, 0xBB])));
        media.extend(interleaved(0, &rtp(4, 1000, &[0x7c, 0x05, 0xCC])));
        media.extend(interleaved(0, &rtp(5, 1000, &[0x7c, 0x45, 0xDD])));
        media.extend(interleaved(0, &rtp(6, 4000, &[0x41, 0x9a, 0x01])));
        media.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 7\r\n\r\n");
        media.extend(interleaved(0, &rtp(7, 7000, &[0x41, 0x9a, 0x02])));
        media.extend(interleaved(0, &rtp(8, 10000, &[0x65, 0x88])));
        cam.write(&media);

        setup_uris
    });

    let (tx, rx) = mpsc::sync_channel::<Sample>(16);
    let stream = RtspClient::start(
        &format!("rtsp://admin:secret@{}/live", addr),
        test_config(),
        tx,
    )
    .unwrap();
    assert_eq!(stream.session_id().as_deref(), Some("12345678"));

    let setup_uris = camera.join().unwrap();
    assert_eq!(
        setup_uris,
        vec![
            format!("rtsp://{}/live/trackID=1", addr),
            format!("rtsp://{}/live/trackID=2", addr),
        ]
    );

    // The camera thread returned, so its socket is closed.
    let reason = stream.wait_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(*reason, RtspError::Closed));

    let stats = stream.stats();
    let end = stream.join();
    assert!(matches!(*end, RtspError::Closed));

    let samples: Vec<Sample> = rx.iter().collect();
    assert_eq!(
        samples,
        vec![
            Sample {
                data: vec![0x41, 0x9a, 0x01],
                duration: 3000,
            },
            Sample {
                data: vec![0x41, 0x9a, 0x02],
                duration: 3000,
            },
            Sample {
                data: annexb_keyframe(&[0x65, 0x88]),
                duration: 3000,
            },
        ]
    );

    assert_eq!(stats.frames, 9);
    assert_eq!(stats.corrupt_frames, 1);
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.inband_responses, 1);
}

#[test]
fn handshake_steps_one_at_a_time() {
    let (addr, camera) = fake_camera(|mut cam| {
        cam.accept_handshake();
        // Hold the connection until the client tears down.
        let teardown = cam.read_request();
        assert_eq!(teardown.method, "TEARDOWN");
        assert_eq!(teardown.header("Session"), Some("12345678"));
    });

    let mut client = RtspClient::new(&format!("rtsp://{}/live", addr), test_config()).unwrap();
    client.connect().unwrap();
    assert_eq!(client.state(), HandshakeState::Connected);

    let options = client.options().unwrap();
    assert_eq!(options.status_code, 200);

    let tracks = client.describe().unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].control, "trackID=1");
    assert!(tracks[0].media.is_h264());
    assert_eq!(tracks[1].media.media, "audio");

    // Tracks go in order.
    assert!(matches!(client.setup(1), Err(RtspError::InvalidState(_))));
    let first = client.setup(0).unwrap();
    assert_eq!((first.rtp_channel, first.rtcp_channel), (0, 1));
    assert_eq!(client.session().session_id(), Some("12345678"));
    assert_eq!(client.session().session_timeout, Some(60));
    let second = client.setup(1).unwrap();
    assert_eq!((second.rtp_channel, second.rtcp_channel), (2, 3));
    assert_eq!(client.state(), HandshakeState::Setup(1));

    let stream = client.play(rtsp::FnSink(|_: Sample| Ok(()))).unwrap();
    assert!(!stream.is_finished());
    stream.close();
    assert!(matches!(*stream.wait(), RtspError::Closed));

    camera.join().unwrap();
}

#[test]
fn second_unauthorized_fails() {
    let (addr, camera) = fake_camera(|mut cam| {
        for _ in 0..2 {
            let request = cam.read_request();
            cam.respond(
                &request,
                "401 Unauthorized",
                &[("WWW-Authenticate", "Basic realm=\"cam\"")],
                "",
            );
        }
    });

    let err = RtspClient::start(
        &format!("rtsp://admin:wrong@{}/live", addr),
        test_config(),
        rtsp::FnSink(|_: Sample| Ok(())),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RtspError::AuthFailed { ref method } if method == "OPTIONS"));
    camera.join().unwrap();
}

#[test]
fn bad_status_aborts_startup() {
    let (addr, camera) = fake_camera(|mut cam| {
        let options = cam.read_request();
        cam.respond(&options, "200 OK", &[], "");
        let describe = cam.read_request();
        cam.respond(&describe, "404 Not Found", &[], "");
    });

    let err = RtspClient::start(
        &format!("rtsp://{}/missing", addr),
        test_config(),
        rtsp::FnSink(|_: Sample| Ok(())),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        RtspError::BadStatus { ref method, code: 404 } if method == "DESCRIBE"
    ));
    camera.join().unwrap();
}

#[test]
fn keepalive_sends_options_while_streaming() {
    let (addr, camera) = fake_camera(|mut cam| {
        cam.accept_handshake();
        let keepalive = cam.read_request();
        assert_eq!(keepalive.method, "OPTIONS");
        assert_eq!(keepalive.header("Session"), Some("12345678"));
        keepalive.cseq().parse::<u32>().unwrap()
    });

    let config = ClientConfig {
        keepalive_interval: Duration::from_millis(50),
        ..test_config()
    };
    let stream = RtspClient::start(
        &format!("rtsp://{}/live", addr),
        config,
        rtsp::FnSink(|_: Sample| Ok(())),
    )
    .unwrap();

    // OPTIONS, DESCRIBE, SETUP x2 and PLAY used CSeq 1 to 5.
    assert_eq!(camera.join().unwrap(), 6);
    drop(stream);
}

#[test]
fn silent_camera_hits_first_read_timeout() {
    let (addr, camera) = fake_camera(|mut cam| {
        cam.accept_handshake();
        thread::sleep(Duration::from_millis(600));
    });

    let config = ClientConfig {
        first_read_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let stream = RtspClient::start(
        &format!("rtsp://{}/live", addr),
        config,
        rtsp::FnSink(|_: Sample| Ok(())),
    )
    .unwrap();

    let reason = stream.wait();
    assert!(matches!(*reason, RtspError::Timeout(TimeoutKind::FirstRead)));
    camera.join().unwrap();
}

#[test]
fn silence_after_first_frame_hits_read_timeout() {
    let (addr, camera) = fake_camera(|mut cam| {
        cam.accept_handshake();
        cam.write(&interleaved(0, &rtp(1, 1000, &SPS)));
        thread::sleep(Duration::from_millis(800));
    });

    let config = ClientConfig {
        first_read_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let stream = RtspClient::start(
        &format!("rtsp://{}/live", addr),
        config,
        rtsp::FnSink(|_: Sample| Ok(())),
    )
    .unwrap();

    let reason = stream.wait_timeout(Duration::from_secs(3)).unwrap();
    assert!(matches!(*reason, RtspError::Timeout(TimeoutKind::Read)));
    assert_eq!(stream.stats().frames, 1);
    camera.join().unwrap();
}
