//! The duplex session manager.
//!
//! One `SessionManager` owns at most one live session. All mutation happens on
//! the task that calls `connect`, `disconnect` and `pump`; capture blocks,
//! network events and playback completions arrive through channels and are
//! applied one at a time by `pump`, in the order each source produced them.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::codec;
use crate::audio::{
    AudioBackend, CaptureStream, PLAYBACK_SAMPLE_RATE, PlaybackScheduler, SegmentId,
};
use crate::config::Config;
use crate::error::SessionError;
use crate::events::{SessionListener, SessionState, Transcript};
use crate::net_link::{Connector, LinkHandle, LinkRequest, NetCommand, NetEvent};
use crate::persona::Persona;
use crate::protocol::{ServerMessage, SetupMessage};

/// Captured blocks waiting to be sent. About one second of audio.
const CAPTURE_QUEUE_DEPTH: usize = 4;

struct ActiveSession {
    id: Uuid,
    persona: Persona,
    /// Output-clock time at which the next segment may start.
    next_start_time: f64,
    scheduler: PlaybackScheduler,
    capture: Box<dyn CaptureStream>,
    /// Handed to the capture stream once the handshake completes. After that
    /// the stream holds the only sender, so a closed queue means it died.
    blocks_tx: Option<mpsc::Sender<Vec<f32>>>,
    blocks_rx: mpsc::Receiver<Vec<f32>>,
    /// Closed by the output when its device thread exits.
    finished_rx: mpsc::UnboundedReceiver<SegmentId>,
    link: Option<LinkHandle>,
    blocks_sent: u64,
}

enum Work {
    Net(Option<NetEvent>),
    Finished(SegmentId),
    OutputLost,
    Captured(Vec<f32>),
    CaptureLost,
}

impl ActiveSession {
    async fn next_work(&mut self) -> Work {
        let Some(link) = self.link.as_mut() else {
            return Work::Net(None);
        };
        tokio::select! {
            event = link.recv() => Work::Net(event),
            id = self.finished_rx.recv() => id.map_or(Work::OutputLost, Work::Finished),
            block = self.blocks_rx.recv() => block.map_or(Work::CaptureLost, Work::Captured),
        }
    }

    /// Decode one inbound chunk and queue it right after the previous one.
    fn schedule_audio(&mut self, data: &str) -> Result<(), SessionError> {
        let buffer = codec::decode(data, PLAYBACK_SAMPLE_RATE)?;

        // Never schedule in the past.
        let start = self.next_start_time.max(self.scheduler.now());
        self.scheduler
            .schedule(&buffer, start)
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        self.next_start_time = start + buffer.duration();
        Ok(())
    }

    fn interrupt(&mut self) {
        let cut = self.scheduler.stop_all();
        self.next_start_time = 0.0;
        log::info!("Session {}: interrupted, {} segment(s) cut", self.id, cut);
    }

    /// Join the device threads. Blocks for up to one period per device.
    fn release(mut self) {
        self.capture.stop();
        self.scheduler.close();
    }
}

pub struct SessionManager {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    listener: Box<dyn SessionListener>,
    state: SessionState,
    mic_muted: bool,
    session: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        listener: Box<dyn SessionListener>,
    ) -> Self {
        Self {
            config,
            backend,
            connector,
            listener,
            state: SessionState::Disconnected,
            mic_muted: false,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// 0 when no session is active.
    pub fn next_start_time(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.next_start_time)
    }

    /// Segments started on the output and not yet finished or stopped.
    pub fn scheduled_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.scheduler.active_count())
    }

    pub fn persona(&self) -> Option<&Persona> {
        self.session.as_ref().map(|s| &s.persona)
    }

    /// While muted, captured blocks are discarded instead of sent.
    pub fn set_mic_muted(&mut self, muted: bool) {
        if self.mic_muted != muted {
            log::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        }
        self.mic_muted = muted;
    }

    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted
    }

    /// Start a session. Failures are reported through the listener, never
    /// returned; the manager is back in a clean DISCONNECTED state afterwards.
    pub async fn connect(&mut self, persona: Persona) {
        if self.session.is_some() {
            log::warn!("connect() with a session already active, replacing it");
            self.teardown().await;
        }

        self.set_state(SessionState::Connecting);
        match self.open_session(persona).await {
            Ok(session) => {
                log::info!("Session {}: devices ready, waiting for handshake", session.id);
                self.session = Some(session);
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn open_session(&self, persona: Persona) -> Result<ActiveSession, SessionError> {
        if self.config.api_key.trim().is_empty() {
            return Err(SessionError::Configuration("API key is missing".to_string()));
        }

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let backend = self.backend.clone();
        let output = open_device(move || backend.open_output(finished_tx))
            .await
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        let mut scheduler = PlaybackScheduler::new(output);

        let backend = self.backend.clone();
        let capture = match open_device(move || backend.open_input()).await {
            Ok(capture) => capture,
            Err(e) => {
                if tokio::task::spawn_blocking(move || scheduler.close()).await.is_err() {
                    log::error!("Speaker release task failed");
                }
                return Err(SessionError::Permission(format!("{:#}", e)));
            }
        };

        let id = Uuid::new_v4();
        let request = LinkRequest {
            session_id: id,
            api_key: self.config.api_key.clone(),
            setup: SetupMessage::new(&self.config.model, &persona),
        };
        let link = LinkHandle::spawn(self.connector.clone(), request, self.config.outbound_queue);
        let (blocks_tx, blocks_rx) = mpsc::channel(CAPTURE_QUEUE_DEPTH);

        Ok(ActiveSession {
            id,
            persona,
            next_start_time: 0.0,
            scheduler,
            capture,
            blocks_tx: Some(blocks_tx),
            blocks_rx,
            finished_rx,
            link: Some(link),
            blocks_sent: 0,
        })
    }

    /// Stop capture and playback, release both devices, drop the remote
    /// session and report DISCONNECTED. Safe in any state.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Disconnected);
    }

    /// Wait for the next work item and apply it. Returns false when there is
    /// no active session to drive.
    pub async fn pump(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let work = session.next_work().await;
        self.apply(work).await;
        true
    }

    async fn apply(&mut self, work: Work) {
        match work {
            Work::Net(Some(NetEvent::Connected)) => self.on_open().await,
            Work::Net(Some(NetEvent::Message(msg))) => self.handle_message(&msg).await,
            Work::Net(Some(NetEvent::Closed)) | Work::Net(None) => {
                log::info!("Remote side closed the session");
                self.teardown().await;
                self.set_state(SessionState::Disconnected);
            }
            Work::Net(Some(NetEvent::Failed(reason))) => {
                let err = if self.state == SessionState::Connected {
                    SessionError::Transport(reason)
                } else {
                    SessionError::Handshake(reason)
                };
                self.fail(err).await;
            }
            Work::Finished(id) => {
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.finished(id);
                }
            }
            Work::OutputLost => {
                self.fail(SessionError::Device("speaker stopped unexpectedly".to_string()))
                    .await
            }
            Work::Captured(block) => self.send_block(block),
            Work::CaptureLost => {
                self.fail(SessionError::Permission(
                    "microphone stopped delivering audio".to_string(),
                ))
                .await
            }
        }
    }

    async fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            log::warn!("Handshake completed in state {}, ignoring", self.state);
            return;
        }
        self.set_state(SessionState::Connected);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let started = match session.blocks_tx.take() {
            Some(blocks) => session.capture.start(blocks),
            None => Err(anyhow::anyhow!("capture already started")),
        };
        let (id, voice) = (session.id, session.persona.voice);
        match started {
            Ok(()) => log::info!(
                "Session {}: connected to {} with voice {}",
                id,
                self.config.model,
                voice
            ),
            Err(e) => self.fail(SessionError::Permission(format!("{:#}", e))).await,
        }
    }

    fn send_block(&mut self, block: Vec<f32>) {
        // Stale microphone audio is worthless; nothing is buffered for later.
        if self.state != SessionState::Connected || self.mic_muted {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(link) = session.link.as_ref() else {
            return;
        };
        let chunk = codec::encode_block(&block);
        if link.try_send(NetCommand::SendAudio(chunk)) {
            session.blocks_sent += 1;
        }
    }

    async fn handle_message(&mut self, msg: &ServerMessage) {
        if self.state != SessionState::Connected {
            log::debug!("Ignoring server message in state {}", self.state);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // Cut stale playback before anything in this message is scheduled.
        if msg.interrupted() {
            session.interrupt();
        }

        let scheduled = msg.audio_payload().map(|data| session.schedule_audio(data));

        if let Some(text) = msg.input_transcript() {
            self.listener.on_transcript(&Transcript {
                text: text.to_string(),
                is_user: true,
                is_final: false,
            });
        }

        if let Some(text) = msg.output_transcript() {
            self.listener.on_transcript(&Transcript {
                text: text.to_string(),
                is_user: false,
                is_final: false,
            });
        }

        if msg.turn_complete() {
            log::debug!("Session {}: turn complete", session.id);
        }

        if let Some(go_away) = &msg.go_away {
            log::warn!(
                "Session {}: server is going away (time left: {})",
                session.id,
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }

        if let Some(Err(e)) = scheduled {
            self.report(e).await;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("Session state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.listener.on_state_change(state);
    }

    /// Recoverable errors are logged and the session carries on.
    async fn report(&mut self, err: SessionError) {
        if err.is_fatal() {
            self.fail(err).await;
        } else {
            log::warn!("{}", err);
        }
    }

    /// Tear down first, then report, so a retry starts clean.
    async fn fail(&mut self, err: SessionError) {
        log::error!("{}", err);
        self.teardown().await;
        self.listener.on_error(&err.to_string());
        self.set_state(SessionState::Disconnected);
    }

    /// Silence playback and drop the link right away. The caller releases
    /// the devices.
    fn detach(&mut self) -> Option<ActiveSession> {
        let mut session = self.session.take()?;
        let cut = session.scheduler.stop_all();
        if let Some(link) = session.link.take() {
            link.shutdown(self.state == SessionState::Connected);
        }
        log::info!(
            "Session {}: torn down ({} block(s) sent, {} segment(s) cut)",
            session.id,
            session.blocks_sent,
            cut
        );
        Some(session)
    }

    async fn teardown(&mut self) {
        let Some(session) = self.detach() else {
            return;
        };
        // 关闭设备需要等待音频线程退出
        if let Err(e) = tokio::task::spawn_blocking(move || session.release()).await {
            log::error!("Device release task failed: {}", e);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(session) = self.detach() {
            session.release();
        }
    }
}

/// Device opens may block on the driver; keep them off the async workers.
async fn open_device<T, F>(open: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(open)
        .await
        .context("Device open task failed")?
}
