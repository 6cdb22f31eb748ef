//! Lyria RealTime client over WebSocket.
//!
//! Protocol, as used here:
//!
//! ```text
//! client                                   service
//!   │── {"setup":{"model":…}} ─────────────▶ │
//!   │◀──────────────── {"setupComplete":{}} ─│
//!   │── {"clientContent":{"weightedPrompts":[…]}} ▶
//!   │── {"musicGenerationConfig":{"bpm":…,"temperature":…}} ▶
//!   │── {"playbackControl":"PLAY"} ─────────▶ │
//!   │◀── {"serverContent":{"audioChunks":[{"data":<base64 PCM>,"mimeType":…}]}}
//!   │◀── …
//! ```
//!
//! The service only honours a tempo change after `RESET_CONTEXT`, so an
//! update that changes `bpm` is followed by one.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::{AudioChunk, AudioFormat};
use crate::config::GenerationSettings;
use crate::generation::channel::{
    ConfigError, ConnectError, GenerationConfig, GenerationService, GenerationSession,
    SessionState, StreamError,
};

const SERVICE_PATH: &str =
    "/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    filtered_prompt: Option<FilteredPrompt>,
    warning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    audio_chunks: Vec<WireChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChunk {
    data: String,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredPrompt {
    text: Option<String>,
    filtered_reason: Option<String>,
}

fn setup_message(model: &str) -> Value {
    json!({ "setup": { "model": model } })
}

fn prompts_message(config: &GenerationConfig) -> Value {
    let prompts: Vec<Value> = config
        .prompts
        .iter()
        .map(|p| json!({ "text": p.text, "weight": p.weight }))
        .collect();
    json!({ "clientContent": { "weightedPrompts": prompts } })
}

fn music_config_message(config: &GenerationConfig) -> Value {
    json!({
        "musicGenerationConfig": {
            "bpm": config.bpm,
            "temperature": config.temperature,
        }
    })
}

fn playback_message(control: &str) -> Value {
    json!({ "playbackControl": control })
}

fn parse_server_message(payload: &[u8]) -> Result<ServerMessage, StreamError> {
    serde_json::from_slice(payload).map_err(|e| StreamError::Protocol(e.to_string()))
}

/// Decode every audio chunk in a `serverContent` message.
fn decode_chunks(content: ServerContent, fallback: AudioFormat) -> Result<Vec<AudioChunk>, StreamError> {
    content
        .audio_chunks
        .into_iter()
        .filter(|c| !c.data.is_empty())
        .map(|c| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(c.data.as_bytes())
                .map_err(|e| StreamError::Protocol(format!("bad audio payload: {e}")))?;
            let format = c
                .mime_type
                .as_deref()
                .and_then(AudioFormat::from_mime)
                .unwrap_or(fallback);
            Ok(AudioChunk::from_le_bytes(&bytes, format))
        })
        .collect()
}

fn map_handshake_error(e: tokio_tungstenite::tungstenite::Error) -> ConnectError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            ConnectError::Rejected(format!("HTTP {}", response.status()))
        }
        Error::Http(response) => ConnectError::Transport(format!("HTTP {}", response.status())),
        other => ConnectError::Transport(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// LyriaService
// ---------------------------------------------------------------------------

/// Opens Lyria RealTime sessions.
pub struct LyriaService {
    settings: GenerationSettings,
    api_key: String,
}

impl LyriaService {
    pub fn new(settings: GenerationSettings, api_key: impl Into<String>) -> Self {
        Self {
            settings,
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}{}?key={}",
            self.settings.endpoint.trim_end_matches('/'),
            SERVICE_PATH,
            self.api_key
        )
    }

    async fn connect(&self, config: &GenerationConfig) -> Result<LyriaSession, ConnectError> {
        let (ws, _response) = connect_async(self.url()).await.map_err(map_handshake_error)?;
        let (write, mut read) = ws.split();
        let mut session = LyriaSession {
            write,
            read: None,
            pending: VecDeque::new(),
            state: SessionState::Connecting,
            applied: None,
            update_timeout: Duration::from_secs(self.settings.update_timeout_secs),
        };

        session
            .send(setup_message(&self.settings.model))
            .await
            .map_err(ConnectError::Transport)?;
        await_setup_complete(&mut read).await?;
        session.read = Some(read);

        for message in [
            prompts_message(config),
            music_config_message(config),
            playback_message("PLAY"),
        ] {
            session.send(message).await.map_err(ConnectError::Transport)?;
        }
        session.applied = Some(config.clone());
        session.state = SessionState::Streaming;
        Ok(session)
    }
}

async fn await_setup_complete(read: &mut SplitStream<WsStream>) -> Result<(), ConnectError> {
    while let Some(message) = read.next().await {
        let payload = match message.map_err(|e| ConnectError::Transport(e.to_string()))? {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed during setup".into());
                return Err(ConnectError::Rejected(reason));
            }
            _ => continue,
        };
        let parsed: ServerMessage = serde_json::from_slice(&payload)
            .map_err(|e| ConnectError::Transport(format!("bad setup reply: {e}")))?;
        if parsed.setup_complete.is_some() {
            return Ok(());
        }
    }
    Err(ConnectError::Rejected("closed during setup".into()))
}

#[async_trait]
impl GenerationService for LyriaService {
    async fn open(
        &self,
        config: &GenerationConfig,
    ) -> Result<Box<dyn GenerationSession>, ConnectError> {
        config.validate().map_err(ConnectError::InvalidConfig)?;

        log::info!("lyria: connecting (model {})", self.settings.model);
        let timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let session = tokio::time::timeout(timeout, self.connect(config))
            .await
            .map_err(|_| ConnectError::Timeout)??;
        log::info!("lyria: streaming at {} BPM", config.bpm);
        Ok(Box::new(session))
    }
}

// ---------------------------------------------------------------------------
// LyriaSession
// ---------------------------------------------------------------------------

struct LyriaSession {
    write: SplitSink<WsStream, Message>,
    read: Option<SplitStream<WsStream>>,
    /// Decoded chunks not yet handed out; one message can carry several.
    pending: VecDeque<AudioChunk>,
    state: SessionState,
    /// Last configuration the service accepted.
    applied: Option<GenerationConfig>,
    update_timeout: Duration,
}

impl LyriaSession {
    async fn send(&mut self, message: Value) -> Result<(), String> {
        self.write
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| e.to_string())
    }

    async fn apply(&mut self, config: &GenerationConfig) -> Result<(), String> {
        let previous = self.applied.as_ref();
        let tempo_changed = previous.map_or(true, |p| p.bpm != config.bpm);
        let controls_changed =
            tempo_changed || previous.map_or(true, |p| p.temperature != config.temperature);

        self.send(prompts_message(config)).await?;
        if controls_changed {
            self.send(music_config_message(config)).await?;
        }
        if tempo_changed {
            self.send(playback_message("RESET_CONTEXT")).await?;
            log::info!("lyria: tempo → {} BPM (context reset)", config.bpm);
        }
        Ok(())
    }

    fn handle_payload(&mut self, payload: &[u8]) -> Result<(), StreamError> {
        let message = parse_server_message(payload)?;
        if let Some(filtered) = message.filtered_prompt {
            log::warn!(
                "lyria: prompt {:?} filtered: {}",
                filtered.text.unwrap_or_default(),
                filtered.filtered_reason.unwrap_or_default()
            );
        }
        if let Some(warning) = message.warning {
            log::warn!("lyria: service warning: {warning}");
        }
        if let Some(content) = message.server_content {
            self.pending
                .extend(decode_chunks(content, AudioFormat::STUDIO)?);
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationSession for LyriaSession {
    fn format(&self) -> AudioFormat {
        AudioFormat::STUDIO
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn update_config(&mut self, config: &GenerationConfig) -> Result<(), ConfigError> {
        if self.state != SessionState::Streaming {
            return Err(ConfigError::Closed);
        }
        config.validate().map_err(ConfigError::Invalid)?;

        match tokio::time::timeout(self.update_timeout, self.apply(config)).await {
            Ok(Ok(())) => {
                self.applied = Some(config.clone());
                Ok(())
            }
            Ok(Err(e)) => Err(ConfigError::Send(e)),
            Err(_) => Err(ConfigError::Timeout),
        }
    }

    async fn receive(&mut self) -> Result<Option<AudioChunk>, StreamError> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.state != SessionState::Streaming {
                return Ok(None);
            }
            let Some(read) = self.read.as_mut() else {
                return Ok(None);
            };

            let next = read.next().await;
            match next {
                None => {
                    self.state = SessionState::Disconnected;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.state = SessionState::Failed;
                    return Err(StreamError::Transport(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!(
                        "lyria: service closed the stream{}",
                        frame.map(|f| format!(": {}", f.reason)).unwrap_or_default()
                    );
                    self.state = SessionState::Disconnected;
                    return Ok(None);
                }
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.handle_payload(text.as_bytes()) {
                        self.state = SessionState::Failed;
                        return Err(e);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Err(e) = self.handle_payload(&bytes) {
                        self.state = SessionState::Failed;
                        return Err(e);
                    }
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.read.is_none() && self.state == SessionState::Disconnected {
            return;
        }
        if self.state == SessionState::Streaming {
            self.state = SessionState::Closing;
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                let _ = self.send(playback_message("STOP")).await;
                let _ = self.write.close().await;
            })
            .await;
        }
        self.pending.clear();
        self.read = None;
        self.state = SessionState::Disconnected;
        log::debug!("lyria: session closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
