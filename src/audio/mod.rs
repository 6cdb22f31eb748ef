//! Audio playback: chunk format, bounded queue, sink and output devices.
//!
//! # Pipeline
//!
//! ```text
//! GenerationSession::receive → AudioChunk → PlaybackSink::enqueue
//!     → ChunkQueue (bounded, overflow policy) → SampleFeeder::fill
//!     → AudioOutput (cpal device / null device)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wanderfm::audio::{AudioChunk, AudioFormat, CpalOutput, PlaybackSink};
//! use wanderfm::config::PlaybackConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sink = PlaybackSink::new(Arc::new(CpalOutput), &PlaybackConfig::default());
//! sink.start(AudioFormat::STUDIO).await?;
//! sink.enqueue(AudioChunk::new(vec![0; 1920], AudioFormat::STUDIO))?;
//! sink.stop();
//! # Ok(())
//! # }
//! ```

pub mod format;
pub mod output;
pub mod queue;
pub mod sink;

pub use format::{AudioChunk, AudioFormat};
pub use output::{AudioOutput, CpalOutput, DeviceError, NullOutput, OutputHandle};
pub use queue::{ChunkQueue, QueueFull};
pub use sink::{EnqueueError, FaultReporter, PlaybackSink, SampleFeeder, SinkStats};
