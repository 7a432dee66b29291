//! The streaming phase: everything that runs after PLAY succeeded.
//!
//! Three threads share one control connection:
//!
//! ```text
//!             +------------------+   bounded queue   +-------------------+
//!  socket --> |  reader thread   | ----------------> |  consumer thread  | --> MediaSink
//!  (read)     |  FrameReader     |   (backpressure)  |  RtpPacket parse  |
//!             +------------------+                   |  Depacketizer     |
//!                                                    +-------------------+
//!             +------------------+
//!  socket <-- | keepalive thread |  OPTIONS every interval, fire-and-forget
//!  (write)    +------------------+
//! ```
//!
//! Every fatal condition funnels into one [`Completion`]. The first call to
//! [`Completion::terminate`] records the reason and shuts the socket down,
//! which unblocks the reader; later calls are ignored. That makes the
//! end-of-stream signal fire exactly once whatever triggered it.

use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, RtspError};
use crate::media::rtp::RtpPacket;
use crate::media::{Depacketizer, MediaSink, Sample};
use crate::protocol::Method;
use crate::transport::interleaved::{Frame, FrameReader, StatsSnapshot, StreamStats};
use crate::transport::keepalive::{self, Signaling};

/// Terminal reason of a stream, shared by every waiter.
pub type StreamEnd = Arc<RtspError>;

/// One-shot completion event.
#[derive(Debug, Default)]
pub struct Completion {
    reason: Mutex<Option<StreamEnd>>,
    cond: Condvar,
    socket: Option<TcpStream>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// A completion that shuts `socket` down when it fires.
    pub fn with_socket(socket: TcpStream) -> Self {
        Self {
            socket: Some(socket),
            ..Self::default()
        }
    }

    /// Fire with `reason`. Returns `false` if it had already fired.
    pub fn terminate(&self, reason: RtspError) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                tracing::trace!(ignored = %reason, "stream already ended");
                return false;
            }
            tracing::info!(reason = %reason, "stream ended");
            *slot = Some(Arc::new(reason));
        }
        self.cond.notify_all();
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
        true
    }

    pub fn is_fired(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<StreamEnd> {
        self.reason.lock().clone()
    }

    /// Block until fired.
    pub fn wait(&self) -> StreamEnd {
        let mut slot = self.reason.lock();
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            self.cond.wait(&mut slot);
        }
    }

    /// Block until fired or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StreamEnd> {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            // Spurious wakeups only shorten one keepalive period.
            let _ = self.cond.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

/// Per-stream settings taken from the client configuration.
#[derive(Debug, Clone)]
pub(crate) struct StreamOptions {
    pub video_channel: u8,
    pub read_timeout: Duration,
    pub first_read_timeout: Duration,
    pub keepalive_interval: Duration,
    pub queue_capacity: usize,
    pub debug: bool,
}

/// Handle to a playing stream.
///
/// Dropping the handle closes the stream.
pub struct Stream {
    completion: Arc<Completion>,
    signaling: Arc<Mutex<Signaling>>,
    stats: Arc<StreamStats>,
    threads: Vec<JoinHandle<()>>,
}

impl Stream {
    /// Spawn the reader, consumer and keepalive threads.
    pub(crate) fn start(
        reader: BufReader<TcpStream>,
        signaling: Signaling,
        depacketizer: Box<dyn Depacketizer>,
        sink: Box<dyn MediaSink>,
        options: StreamOptions,
    ) -> Result<Self> {
        let completion = Arc::new(Completion::with_socket(reader.get_ref().try_clone()?));
        let stats = Arc::new(StreamStats::default());
        let signaling = Arc::new(Mutex::new(signaling));
        let (tx, rx) = mpsc::sync_channel(options.queue_capacity.max(1));

        let mut stream = Self {
            completion: completion.clone(),
            signaling: signaling.clone(),
            stats: stats.clone(),
            threads: Vec::with_capacity(3),
        };

        let codec = depacketizer.codec_name();
        let clock_rate = depacketizer.clock_rate();

        let frames = FrameReader::with_stats(reader, stats.clone(), options.debug);
        let reader_completion = completion.clone();
        let reader_options = options.clone();
        stream.spawn("rtsp-reader", move || {
            read_loop(frames, tx, &reader_completion, &reader_options)
        })?;

        let consumer_completion = completion.clone();
        let consumer_stats = stats;
        let video_channel = options.video_channel;
        stream.spawn("rtsp-depacketizer", move || {
            consume_loop(
                rx,
                depacketizer,
                sink,
                video_channel,
                &consumer_stats,
                &consumer_completion,
            )
        })?;

        let handle = keepalive::spawn(signaling, options.keepalive_interval, completion)?;
        stream.threads.push(handle);

        tracing::info!(
            codec,
            clock_rate,
            video_channel = options.video_channel,
            keepalive_ms = options.keepalive_interval.as_millis() as u64,
            "streaming"
        );
        Ok(stream)
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.completion.terminate(RtspError::Closed);
                Err(e.into())
            }
        }
    }

    /// Block until the stream ends and return why.
    pub fn wait(&self) -> StreamEnd {
        self.completion.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<StreamEnd> {
        self.completion.wait_timeout(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_fired()
    }

    /// Send a best-effort TEARDOWN and end the stream with
    /// [`RtspError::Closed`]. No-op if it already ended.
    pub fn close(&self) {
        if self.completion.is_fired() {
            return;
        }
        if let Err(e) = self.signaling.lock().send(Method::Teardown) {
            tracing::debug!(error = %e, "TEARDOWN not sent");
        }
        self.completion.terminate(RtspError::Closed);
    }

    pub fn session_id(&self) -> Option<String> {
        self.signaling.lock().session().session_id().map(str::to_string)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the stream and wait for its threads to exit.
    ///
    /// Must not be called from inside the sink.
    pub fn join(mut self) -> StreamEnd {
        self.close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("stream thread panicked");
            }
        }
        self.completion.wait()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(
    mut frames: FrameReader<BufReader<TcpStream>>,
    tx: SyncSender<Frame>,
    completion: &Completion,
    options: &StreamOptions,
) {
    if let Err(e) = frames.get_ref().get_ref().set_read_timeout(Some(options.first_read_timeout)) {
        completion.terminate(e.into());
        return;
    }

    loop {
        let frame = match frames.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // After a local close this is only the echo of the shutdown.
                completion.terminate(e);
                return;
            }
        };

        if frames.frames_read() == 1 {
            tracing::debug!("first interleaved frame received");
            if let Err(e) = frames.get_ref().get_ref().set_read_timeout(Some(options.read_timeout)) {
                completion.terminate(e.into());
                return;
            }
        }

        if tx.send(frame).is_err() {
            // Consumer gone; it already recorded why.
            return;
        }
    }
}

fn consume_loop(
    rx: Receiver<Frame>,
    mut depacketizer: Box<dyn Depacketizer>,
    mut sink: Box<dyn MediaSink>,
    video_channel: u8,
    stats: &StreamStats,
    completion: &Completion,
) {
    for frame in rx {
        if frame.channel != video_channel {
            StreamStats::bump(&stats.discarded_frames);
            continue;
        }

        let packet = match RtpPacket::parse(&frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(error = %e, len = frame.payload.len(), "RTP packet dropped");
                StreamStats::bump(&stats.discarded_frames);
                continue;
            }
        };

        let Some(unit) = depacketizer.depacketize(&packet) else {
            continue;
        };
        StreamStats::bump(&stats.access_units);

        // The first access unit has no predecessor to derive a duration from.
        let Some(duration) = unit.duration else {
            tracing::debug!(timestamp = unit.rtp_timestamp, "first access unit held back");
            continue;
        };

        if let Err(e) = sink.write_sample(Sample {
            data: unit.data,
            duration,
        }) {
            tracing::warn!(error = %e, "sink rejected sample");
            completion.terminate(e);
            return;
        }
    }
}
