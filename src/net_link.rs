use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::audio::EncodedChunk;
use crate::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};

// 会话任务 -> 会话管理器
#[derive(Debug)]
pub enum NetEvent {
    /// Handshake acknowledged by the server.
    Connected,
    Message(ServerMessage),
    /// Remote side closed the session cleanly.
    Closed,
    Failed(String),
}

// 会话管理器 -> 会话任务
#[derive(Debug)]
pub enum NetCommand {
    SendAudio(EncodedChunk),
    Close,
}

/// Everything needed to open one remote session.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub session_id: Uuid,
    pub api_key: String,
    pub setup: SetupMessage,
}

/// Opens a remote session and pumps it until it ends.
///
/// Implementations send `NetEvent::Connected` once the handshake succeeds,
/// then forward inbound messages. `Ok(())` means a clean close; an error is
/// reported to the session as `NetEvent::Failed`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn run(
        &self,
        request: LinkRequest,
        events: mpsc::Sender<NetEvent>,
        commands: mpsc::Receiver<NetCommand>,
    ) -> anyhow::Result<()>;
}

/// The session's end of a running link task.
pub struct LinkHandle {
    commands: mpsc::Sender<NetCommand>,
    events: mpsc::Receiver<NetEvent>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Spawn the link task. `queue` bounds the outbound audio backlog.
    pub fn spawn(connector: Arc<dyn Connector>, request: LinkRequest, queue: usize) -> Self {
        let (tx_event, rx_event) = mpsc::channel::<NetEvent>(100);
        let (tx_cmd, rx_cmd) = mpsc::channel::<NetCommand>(queue.max(1));

        let task = tokio::spawn(async move {
            let session_id = request.session_id;
            let outcome = connector.run(request, tx_event.clone(), rx_cmd).await;
            let event = match outcome {
                Ok(()) => NetEvent::Closed,
                Err(e) => {
                    log::warn!("Link {} ended with error: {:#}", session_id, e);
                    NetEvent::Failed(format!("{:#}", e))
                }
            };
            let _ = tx_event.send(event).await;
        });

        Self {
            commands: tx_cmd,
            events: rx_event,
            task,
        }
    }

    /// Queue an outbound command without waiting. Returns false if it was
    /// dropped because the queue is full or the link is gone.
    pub fn try_send(&self, cmd: NetCommand) -> bool {
        match self.commands.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Outbound queue full, dropping command");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn recv(&mut self) -> Option<NetEvent> {
        self.events.recv().await
    }

    /// End the link. A connected link gets a chance to send a close frame;
    /// one still in its handshake is aborted.
    pub fn shutdown(self, graceful: bool) {
        if !(graceful && self.commands.try_send(NetCommand::Close).is_ok()) {
            self.task.abort();
        }
    }
}

/// WebSocket connector for the live endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }

    /// Endpoint with the credential appended as the `key` query parameter.
    pub fn endpoint(&self, api_key: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .with_context(|| format!("Invalid endpoint URL: {}", self.ws_url))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

enum Inbound {
    Message(ServerMessage),
    Close(String),
    Ignored,
}

fn parse_frame(msg: Message) -> anyhow::Result<Inbound> {
    let parsed = match msg {
        Message::Text(text) => ServerMessage::parse(text.as_bytes()),
        // 服务端也可能用二进制帧下发 JSON
        Message::Binary(data) => ServerMessage::parse(&data),
        Message::Close(frame) => {
            let reason = frame
                .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                .unwrap_or_else(|| "no reason".to_string());
            return Ok(Inbound::Close(reason));
        }
        _ => return Ok(Inbound::Ignored),
    };
    Ok(Inbound::Message(parsed.context("Malformed server message")?))
}

#[async_trait]
impl Connector for WsConnector {
    async fn run(
        &self,
        request: LinkRequest,
        events: mpsc::Sender<NetEvent>,
        mut commands: mpsc::Receiver<NetCommand>,
    ) -> anyhow::Result<()> {
        let url = self.endpoint(&request.api_key)?;

        // 日志中不打印凭据
        log::info!("Session {}: connecting to {}", request.session_id, self.ws_url);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("WebSocket connection failed")?;

        let (mut write, mut read) = ws_stream.split();

        let setup_json = serde_json::to_string(&request.setup)?;
        log::debug!("Sending setup: {}", setup_json);
        write.send(Message::Text(setup_json.into())).await?;

        // 等待服务端确认 setup
        loop {
            match read.next().await {
                Some(Ok(msg)) => match parse_frame(msg)? {
                    Inbound::Message(m) if m.is_setup_complete() => break,
                    Inbound::Message(m) => log::debug!("Ignoring pre-setup message: {:?}", m),
                    Inbound::Close(reason) => bail!("Server closed during setup: {}", reason),
                    Inbound::Ignored => {}
                },
                Some(Err(e)) => return Err(e.into()),
                None => bail!("Connection closed during setup"),
            }
        }

        log::info!("Session {}: setup complete", request.session_id);
        events.send(NetEvent::Connected).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => match parse_frame(msg) {
                            Ok(Inbound::Message(m)) => events.send(NetEvent::Message(m)).await?,
                            Ok(Inbound::Close(reason)) => {
                                log::info!("Server closed connection: {}", reason);
                                return Ok(());
                            }
                            Ok(Inbound::Ignored) => {}
                            // 单条消息解析失败不终止会话
                            Err(e) => log::warn!("{:#}", e),
                        },
                        Some(Err(e)) => return Err(e.into()),
                        None => bail!("Connection closed unexpectedly"),
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(NetCommand::SendAudio(chunk)) => {
                            let body = serde_json::to_string(&RealtimeInputMessage::new(chunk))?;
                            write.send(Message::Text(body.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            log::info!("Session {}: closed by client", request.session_id);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
