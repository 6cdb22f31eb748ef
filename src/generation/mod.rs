//! Streaming music-generation service boundary.
//!
//! This module provides:
//! * [`GenerationService`] / [`GenerationSession`]: the async seam the
//!   orchestrator drives (open, update config, receive chunks, close).
//! * [`GenerationConfig`]: prompts + tempo + temperature, validated before
//!   anything is sent.
//! * [`LyriaService`]: the Lyria RealTime WebSocket client.
//! * [`ConnectError`], [`ConfigError`], [`StreamError`]: one error type per
//!   failure class.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use wanderfm::config::GenerationSettings;
//! use wanderfm::generation::{GenerationConfig, GenerationService, LyriaService};
//! use wanderfm::prompts::WeightedPrompt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = LyriaService::new(GenerationSettings::default(), "api-key");
//! let config = GenerationConfig {
//!     prompts: vec![WeightedPrompt::new("ambient", 1.0)],
//!     bpm: 80,
//!     temperature: 0.9,
//! };
//! let mut session = service.open(&config).await?;
//! while let Some(chunk) = session.receive().await? {
//!     println!("{} frames", chunk.frames());
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod lyria;
#[cfg(test)]
pub mod mock;

pub use channel::{
    ConfigError, ConnectError, GenerationConfig, GenerationService, GenerationSession,
    SessionState, StreamError, BPM_RANGE,
};
pub use lyria::LyriaService;
