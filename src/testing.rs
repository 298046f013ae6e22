//! In-memory devices and connector for driving a session without hardware
//! or network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::{AudioBackend, AudioOutput, CaptureStream, PlaybackBuffer, SegmentId};
use crate::net_link::{Connector, LinkRequest, NetCommand, NetEvent};
use crate::protocol::ServerMessage;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StartRecord {
    pub id: SegmentId,
    pub when: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputLog {
    clock: f64,
    starts: Vec<StartRecord>,
    stops: Vec<SegmentId>,
    playing: HashSet<SegmentId>,
    closed: bool,
    opens: usize,
    done: Option<mpsc::UnboundedSender<SegmentId>>,
}

/// Test-side view of a fake speaker. The clock only moves when told to.
#[derive(Default)]
pub struct OutputProbe {
    log: Mutex<OutputLog>,
}

impl OutputProbe {
    fn log(&self) -> std::sync::MutexGuard<'_, OutputLog> {
        self.log.lock().unwrap()
    }

    pub fn set_time(&self, seconds: f64) {
        self.log().clock = seconds;
    }

    pub fn starts(&self) -> Vec<StartRecord> {
        self.log().starts.clone()
    }

    pub fn stops(&self) -> Vec<SegmentId> {
        self.log().stops.clone()
    }

    pub fn playing_count(&self) -> usize {
        self.log().playing.len()
    }

    pub fn is_closed(&self) -> bool {
        self.log().closed
    }

    pub fn opens(&self) -> usize {
        self.log().opens
    }

    /// Device finished a segment on its own.
    pub fn finish(&self, id: SegmentId) {
        let mut log = self.log();
        log.playing.remove(&id);
        if let Some(done) = &log.done {
            let _ = done.send(id);
        }
    }

    /// Make subsequent starts fail.
    pub fn close_device(&self) {
        self.log().closed = true;
    }

    /// The device thread died: completions stop and the channel closes.
    pub fn lose_device(&self) {
        self.log().done = None;
    }
}

pub struct FakeOutput {
    probe: Arc<OutputProbe>,
}

impl FakeOutput {
    pub fn new() -> (Self, Arc<OutputProbe>) {
        let probe = Arc::new(OutputProbe::default());
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.probe.log().clock
    }

    fn start(&mut self, id: SegmentId, buffer: &PlaybackBuffer, when: f64) -> Result<()> {
        let mut log = self.probe.log();
        if log.closed {
            bail!("output closed");
        }
        log.starts.push(StartRecord {
            id,
            when,
            duration: buffer.duration(),
        });
        log.playing.insert(id);
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        let mut log = self.probe.log();
        if !log.playing.remove(&id) {
            bail!("segment {} already finished", id);
        }
        log.stops.push(id);
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.probe.log();
        log.closed = true;
        log.playing.clear();
        log.done = None;
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CaptureProbe {
    sender: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    stopped_on: Mutex<Option<ThreadId>>,
}

impl CaptureProbe {
    pub fn is_started(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    /// Times the microphone was acquired.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Whether every acquisition has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst) >= self.acquired()
    }

    /// Thread that last released the microphone.
    pub fn stopped_on(&self) -> Option<ThreadId> {
        *self.stopped_on.lock().unwrap()
    }

    /// The capture thread died and dropped its sender.
    pub fn lose_device(&self) {
        *self.sender.lock().unwrap() = None;
    }

    /// Emit one block as the capture thread would.
    pub fn push_block(&self, block: Vec<f32>) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.try_send(block).is_ok(),
            None => false,
        }
    }
}

pub struct FakeCapture {
    probe: Arc<CaptureProbe>,
    released: bool,
}

impl CaptureStream for FakeCapture {
    fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.released {
            bail!("capture already released");
        }
        *self.probe.sender.lock().unwrap() = Some(blocks);
        Ok(())
    }

    fn stop(&mut self) {
        *self.probe.sender.lock().unwrap() = None;
        *self.probe.stopped_on.lock().unwrap() = Some(thread::current().id());
        if !self.released {
            self.released = true;
            self.probe.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBackend {
    pub output: Arc<OutputProbe>,
    pub capture: Arc<CaptureProbe>,
    deny_mic: bool,
    fail_output: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying_mic(mut self) -> Self {
        self.deny_mic = true;
        self
    }

    pub fn failing_output(mut self) -> Self {
        self.fail_output = true;
        self
    }
}

impl AudioBackend for FakeBackend {
    fn open_output(&self, done: mpsc::UnboundedSender<SegmentId>) -> Result<Box<dyn AudioOutput>> {
        if self.fail_output {
            bail!("no playback device");
        }
        {
            let mut log = self.output.log();
            log.closed = false;
            log.opens += 1;
            log.done = Some(done);
        }
        Ok(Box::new(FakeOutput {
            probe: self.output.clone(),
        }))
    }

    fn open_input(&self) -> Result<Box<dyn CaptureStream>> {
        if self.deny_mic {
            bail!("EACCES: access to the capture device was denied");
        }
        self.capture.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            probe: self.capture.clone(),
            released: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Handshake {
    Accept,
    Reject(String),
    /// Never completes.
    Hang,
}

pub struct FakeConnector {
    handshake: Mutex<Handshake>,
    remote: Mutex<Option<mpsc::Sender<NetEvent>>>,
    outbound: mpsc::UnboundedSender<NetCommand>,
    requests: Mutex<Vec<LinkRequest>>,
}

impl FakeConnector {
    pub fn new(handshake: Handshake) -> (Arc<Self>, mpsc::UnboundedReceiver<NetCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            handshake: Mutex::new(handshake),
            remote: Mutex::new(None),
            outbound: tx,
            requests: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock().unwrap() = handshake;
    }

    pub fn requests(&self) -> Vec<LinkRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Push a raw event into the session as the link task would.
    pub async fn emit(&self, event: NetEvent) {
        let tx = self
            .remote
            .lock()
            .unwrap()
            .clone()
            .expect("link not connected");
        tx.send(event).await.expect("session dropped its link");
    }

    pub async fn deliver(&self, msg: ServerMessage) {
        self.emit(NetEvent::Message(msg)).await;
    }

    pub async fn deliver_json(&self, value: serde_json::Value) {
        let msg = serde_json::from_value(value).expect("valid server message");
        self.deliver(msg).await;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn run(
        &self,
        request: LinkRequest,
        events: mpsc::Sender<NetEvent>,
        mut commands: mpsc::Receiver<NetCommand>,
    ) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        let handshake = self.handshake.lock().unwrap().clone();
        match handshake {
            Handshake::Accept => {}
            Handshake::Reject(reason) => bail!("{}", reason),
            Handshake::Hang => std::future::pending::<()>().await,
        }

        *self.remote.lock().unwrap() = Some(events.clone());
        events.send(NetEvent::Connected).await?;

        while let Some(cmd) = commands.recv().await {
            let close = matches!(cmd, NetCommand::Close);
            let _ = self.outbound.send(cmd);
            if close {
                break;
            }
        }
        Ok(())
    }
}
