//! WanderFM: context-steered real-time music generation and playback.
//!
//! Control inputs (tempo, weather, place, genre, mood, style hints) are
//! written to a [`pipeline::SharedState`].  The [`pipeline::Orchestrator`]
//! turns them into weighted prompts, keeps one streaming generation session
//! open, and plays the returned PCM through a bounded queue on the local
//! audio device.

pub mod audio;
pub mod config;
pub mod context;
pub mod control;
pub mod generation;
pub mod pipeline;
pub mod prompts;
