//! Session orchestration for WanderFM.
//!
//! This module ties the generation service and the playback sink together
//! and exposes the shared state that control surfaces write and read.
//!
//! # Architecture
//!
//! ```text
//! control surface ──set_*()──▶ SharedState ──revision (watch)──┐
//!        │                        ▲                            │
//!        │                     status                          ▼
//!        └──start()/stop()──▶ Orchestrator ── session task (tokio)
//!                                              │
//!                                              ├─ PromptBuilder::build(snapshot)
//!                                              ├─ GenerationSession::update_config
//!                                              ├─ GenerationSession::receive ──▶ PlaybackSink::enqueue
//!                                              └─ Backoff on stream loss
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wanderfm::audio::NullOutput;
//! use wanderfm::config::AppConfig;
//! use wanderfm::generation::LyriaService;
//! use wanderfm::pipeline::{Orchestrator, SharedState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let state = SharedState::new(&config.control);
//!     let service = Arc::new(LyriaService::new(config.generation.clone(), "api-key"));
//!     let orchestrator = Orchestrator::new(state.clone(), service, Arc::new(NullOutput), &config);
//!
//!     state.set_weather("rain", None, None).unwrap();
//!     if let Err(e) = orchestrator.start().await {
//!         eprintln!("could not start: {e}");
//!         return;
//!     }
//!     println!("{:?}", orchestrator.status().active_prompts);
//!     orchestrator.stop().await;
//! }
//! ```

pub mod backoff;
pub mod runner;
pub mod state;

pub use backoff::Backoff;
pub use runner::{Orchestrator, OrchestratorError};
pub use state::{Phase, SharedState, StatusSnapshot, ValidationError};
