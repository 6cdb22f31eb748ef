//! The duplex session with the music-generation service.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──open──▶ Connecting ──setup ok──▶ Streaming
//!                             │                      │
//!                          rejected             close / EOF ──▶ Closing ──▶ Disconnected
//!                             ▼                      │
//!                           Failed ◀──transport error┘
//! ```
//!
//! [`GenerationService::open`] fails fast; retrying is the caller's policy.
//! Any error from [`GenerationSession::receive`] is terminal for that
//! session: close it and open a new one.  A [`ConfigError`] from
//! [`GenerationSession::update_config`] is not; the previous configuration
//! stays active.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::audio::{AudioChunk, AudioFormat};
use crate::prompts::WeightedPrompt;

/// Tempo range the service accepts.
pub const BPM_RANGE: RangeInclusive<u16> = 60..=180;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Opening a session failed.  Never retried inside `open`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectError {
    #[error("session rejected by the service: {0}")]
    Rejected(String),

    #[error("initial configuration is invalid: {0}")]
    InvalidConfig(String),

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("connection timed out")]
    Timeout,
}

/// A configuration update was not applied.  The session keeps playing with
/// the previous configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("configuration is invalid: {0}")]
    Invalid(String),

    #[error("failed to send configuration: {0}")]
    Send(String),

    #[error("configuration update timed out")]
    Timeout,

    #[error("session is not streaming")]
    Closed,
}

/// The audio stream broke.  Terminal for the session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("stream transport failed: {0}")]
    Transport(String),

    #[error("unexpected message from service: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// GenerationConfig
// ---------------------------------------------------------------------------

/// Everything the service is steered by: prompts plus numeric controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub prompts: Vec<WeightedPrompt>,
    pub bpm: u16,
    pub temperature: f32,
}

impl GenerationConfig {
    /// Reject configurations the service cannot play.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompts.is_empty() {
            return Err("prompt list is empty".into());
        }
        if let Some(p) = self
            .prompts
            .iter()
            .find(|p| !(p.weight.is_finite() && p.weight > 0.0))
        {
            return Err(format!("prompt {:?} has non-positive weight {}", p.text, p.weight));
        }
        if self.prompts.iter().any(|p| p.text.trim().is_empty()) {
            return Err("prompt text is empty".into());
        }
        if !BPM_RANGE.contains(&self.bpm) {
            return Err(format!(
                "bpm {} outside {}..={}",
                self.bpm,
                BPM_RANGE.start(),
                BPM_RANGE.end()
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(format!("temperature {} is invalid", self.temperature));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Closing,
    Failed,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Factory for generation sessions.
///
/// Held as `Arc<dyn GenerationService>` by the orchestrator so tests can
/// swap in a scripted service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Establish a session already configured with `config` and playing.
    async fn open(
        &self,
        config: &GenerationConfig,
    ) -> Result<Box<dyn GenerationSession>, ConnectError>;
}

/// One open-to-close lifetime of the duplex stream.
#[async_trait]
pub trait GenerationSession: Send {
    /// Format of every chunk this session yields.
    fn format(&self) -> AudioFormat;

    fn state(&self) -> SessionState;

    /// Apply a new configuration without interrupting the audio.
    async fn update_config(&mut self, config: &GenerationConfig) -> Result<(), ConfigError>;

    /// Wait for the next chunk.  `Ok(None)` is end of stream.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// audio.
    async fn receive(&mut self) -> Result<Option<AudioChunk>, StreamError>;

    /// Release the transport.  Idempotent.
    async fn close(&mut self);
}

// Compile-time assertion: both traits stay object-safe.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn GenerationService>, _: Box<dyn GenerationSession>) {}
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
