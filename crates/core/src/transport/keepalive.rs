//! Session keepalive (RFC 2326 §10.2, §12.37).
//!
//! Cameras drop a session that stays silent for longer than its timeout
//! (commonly 60 s). While streaming, the client sends an `OPTIONS`
//! request every `interval` on the control connection. The request is
//! fire-and-forget: the reply shows up inside the interleaved stream and is
//! skipped there by the frame reader, so the keepalive never reads from the
//! socket and cannot contend with the streaming read.

use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::protocol::Method;
use crate::session::Session;
use crate::stream::Completion;

/// Shortest interval the worker will honor.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);

/// The write half of the control connection plus the session state needed
/// to build requests after PLAY.
///
/// Shared by the keepalive worker and the stream handle (for TEARDOWN)
/// behind a mutex, so CSeq stays strictly increasing.
pub struct Signaling {
    session: Session,
    writer: TcpStream,
    timeout: Duration,
    debug: bool,
}

impl Signaling {
    pub fn new(session: Session, writer: TcpStream, timeout: Duration, debug: bool) -> Self {
        Self {
            session,
            writer,
            timeout,
            debug,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Write a request for `method` on the session URI, not waiting for
    /// any reply.
    pub fn send(&mut self, method: Method) -> io::Result<()> {
        let uri = self.session.request_uri().to_string();
        let request = self.session.build_request(method, &uri);
        let text = request.serialize();
        if self.debug {
            tracing::debug!(">>> {}", text.trim_end());
        }

        self.writer.set_write_timeout(Some(self.timeout))?;
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;

        tracing::trace!(%method, cseq = self.session.cseq(), "fire-and-forget request sent");
        Ok(())
    }
}

/// Spawn the keepalive worker.
///
/// The worker sleeps on the stream's completion signal, so it exits as soon
/// as the stream ends for any reason. A failed send ends the stream with
/// [`RtspError::KeepaliveSendFailure`]. Intervals below
/// [`MIN_KEEPALIVE_INTERVAL`] are raised to it.
pub fn spawn(
    signaling: Arc<Mutex<Signaling>>,
    interval: Duration,
    completion: Arc<Completion>,
) -> Result<JoinHandle<()>> {
    let interval = clamp_interval(interval);
    let handle = thread::Builder::new()
        .name("rtsp-keepalive".to_string())
        .spawn(move || run(&signaling, interval, &completion))?;
    Ok(handle)
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_KEEPALIVE_INTERVAL {
        tracing::warn!(
            requested_ms = interval.as_millis() as u64,
            min_ms = MIN_KEEPALIVE_INTERVAL.as_millis() as u64,
            "keepalive interval raised to minimum"
        );
        return MIN_KEEPALIVE_INTERVAL;
    }
    interval
}

fn run(signaling: &Mutex<Signaling>, interval: Duration, completion: &Completion) {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "keepalive started");

    while completion.wait_timeout(interval).is_none() {
        if let Err(e) = signaling.lock().send(Method::Options) {
            tracing::warn!(error = %e, "keepalive send failed");
            completion.terminate(RtspError::KeepaliveSendFailure(e));
            break;
        }
        tracing::debug!("keepalive sent");
    }

    tracing::debug!("keepalive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RtspUrl;
    use std::io::Read;
    use std::net::TcpListener;

    fn signaling_pair() -> (Signaling, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let url = RtspUrl::parse("rtsp://127.0.0.1/live").unwrap();
        let session = Session::new(url, "test-agent");
        (
            Signaling::new(session, client, Duration::from_secs(1), false),
            server,
        )
    }

    #[test]
    fn sends_options_until_completion() {
        let (signaling, mut server) = signaling_pair();
        let completion = Arc::new(Completion::new());
        let signaling = Arc::new(Mutex::new(signaling));

        let handle = spawn(
            signaling.clone(),
            Duration::from_millis(20),
            completion.clone(),
        )
        .unwrap();

        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut received = String::new();
        let mut buf = [0u8; 1024];
        while received.matches("OPTIONS").count() < 2 {
            let n = server.read(&mut buf).unwrap();
            assert!(n > 0);
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        completion.terminate(RtspError::Closed);
        handle.join().unwrap();

        assert!(received.starts_with("OPTIONS rtsp://127.0.0.1:554/live RTSP/1.0\r\nCSeq: 1\r\n"));
        assert!(received.contains("CSeq: 2\r\n"));
        assert!(signaling.lock().session().cseq() >= 2);
    }

    #[test]
    fn short_intervals_are_raised() {
        assert_eq!(clamp_interval(Duration::ZERO), MIN_KEEPALIVE_INTERVAL);
        assert_eq!(clamp_interval(Duration::from_millis(1)), MIN_KEEPALIVE_INTERVAL);
        assert_eq!(clamp_interval(Duration::from_secs(20)), Duration::from_secs(20));
    }

    #[test]
    fn zero_interval_does_not_spin() {
        let (signaling, _server) = signaling_pair();
        let completion = Arc::new(Completion::new());
        let signaling = Arc::new(Mutex::new(signaling));

        let handle = spawn(signaling.clone(), Duration::ZERO, completion.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        completion.terminate(RtspError::Closed);
        handle.join().unwrap();

        // At most one send per 10 ms window, plus slack for wakeup jitter.
        assert!(signaling.lock().session().cseq() <= 8);
    }

    #[test]
    fn send_failure_terminates_stream() {
        let (signaling, server) = signaling_pair();
        signaling
            .writer
            .shutdown(std::net::Shutdown::Write)
            .unwrap();
        drop(server);

        let completion = Arc::new(Completion::new());
        let handle = spawn(
            Arc::new(Mutex::new(signaling)),
            Duration::from_millis(10),
            completion.clone(),
        )
        .unwrap();

        let reason = completion.wait();
        handle.join().unwrap();
        assert!(matches!(*reason, RtspError::KeepaliveSendFailure(_)));
    }
}
