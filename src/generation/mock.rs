//! Scripted generation service for tests.
//!
//! Each call to `open` takes the next queued outcome, in the order they were
//! queued: a session script or a [`ConnectError`].  Sessions without a
//! script, or whose script has run out, stay silent until cancelled.
//! Everything the orchestrator does to the service is recorded for
//! assertions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::audio::{AudioChunk, AudioFormat};
use crate::generation::channel::{
    ConfigError, ConnectError, GenerationConfig, GenerationService, GenerationSession,
    SessionState, StreamError,
};

/// One scripted event of a session.
#[derive(Debug, Clone)]
pub enum Step {
    /// Yield this chunk.
    Chunk(AudioChunk),
    /// Yield a copy of the chunk every interval, forever.
    Every(Duration, AudioChunk),
    /// Wait before the next step.
    Delay(Duration),
    /// End of stream.
    End,
    /// Transport failure.
    Fail(StreamError),
}

/// 20 ms of 48 kHz stereo filled with `value`.
pub fn test_chunk(value: i16) -> AudioChunk {
    AudioChunk::new(vec![value; 1_920], AudioFormat::STUDIO)
}

enum Outcome {
    Session(Vec<Step>),
    Fail(ConnectError),
}

#[derive(Default)]
struct Record {
    outcomes: VecDeque<Outcome>,
    update_failure: Option<ConfigError>,
    open_delay: Option<Duration>,
    opened: Vec<(Instant, GenerationConfig)>,
    updates: Vec<GenerationConfig>,
    closes: usize,
    live: usize,
}

#[derive(Default, Clone)]
pub struct ScriptedService {
    record: Arc<Mutex<Record>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Record) -> R) -> R {
        f(&mut self.record.lock().unwrap())
    }

    /// Queue a session script for an upcoming `open`.
    pub fn script(&self, steps: Vec<Step>) {
        self.with(|r| r.outcomes.push_back(Outcome::Session(steps)));
    }

    /// Queue a failure for an upcoming `open`.
    pub fn fail_open(&self, error: ConnectError) {
        self.with(|r| r.outcomes.push_back(Outcome::Fail(error)));
    }

    /// Fail every `update_config` with `error` until cleared with `None`.
    pub fn fail_updates(&self, error: Option<ConfigError>) {
        self.with(|r| r.update_failure = error);
    }

    /// Make every `open` take `delay` before resolving.
    pub fn delay_open(&self, delay: Duration) {
        self.with(|r| r.open_delay = Some(delay));
    }

    /// Attempts to open, successful or not.
    pub fn opens(&self) -> usize {
        self.with(|r| r.opened.len())
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.with(|r| r.opened.iter().map(|(t, _)| *t).collect())
    }

    pub fn open_configs(&self) -> Vec<GenerationConfig> {
        self.with(|r| r.opened.iter().map(|(_, c)| c.clone()).collect())
    }

    pub fn updates(&self) -> Vec<GenerationConfig> {
        self.with(|r| r.updates.clone())
    }

    pub fn closes(&self) -> usize {
        self.with(|r| r.closes)
    }

    /// Sessions opened and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.with(|r| r.live)
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn open(
        &self,
        config: &GenerationConfig,
    ) -> Result<Box<dyn GenerationSession>, ConnectError> {
        if let Some(delay) = self.with(|r| r.open_delay) {
            tokio::time::sleep(delay).await;
        }
        config.validate().map_err(ConnectError::InvalidConfig)?;

        let script = self.with(|r| {
            r.opened.push((Instant::now(), config.clone()));
            match r.outcomes.pop_front() {
                Some(Outcome::Fail(err)) => Err(err),
                Some(Outcome::Session(steps)) => {
                    r.live += 1;
                    Ok(steps)
                }
                None => {
                    r.live += 1;
                    Ok(Vec::new())
                }
            }
        })?;

        Ok(Box::new(ScriptedSession {
            record: Arc::clone(&self.record),
            steps: script.into(),
            state: SessionState::Streaming,
            closed: false,
        }))
    }
}

struct ScriptedSession {
    record: Arc<Mutex<Record>>,
    steps: VecDeque<Step>,
    state: SessionState,
    closed: bool,
}

#[async_trait]
impl GenerationSession for ScriptedSession {
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
        let mut record = self.record.lock().unwrap();
        if let Some(err) = record.update_failure.clone() {
            return Err(err);
        }
        record.updates.push(config.clone());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<AudioChunk>, StreamError> {
        loop {
            match self.steps.front().cloned() {
                Some(Step::Chunk(chunk)) => {
                    self.steps.pop_front();
                    return Ok(Some(chunk));
                }
                Some(Step::Every(interval, chunk)) => {
                    tokio::time::sleep(interval).await;
                    return Ok(Some(chunk));
                }
                Some(Step::Delay(delay)) => {
                    tokio::time::sleep(delay).await;
                    self.steps.pop_front();
                }
                Some(Step::End) => {
                    self.steps.pop_front();
                    self.state = SessionState::Disconnected;
                    return Ok(None);
                }
                Some(Step::Fail(err)) => {
                    self.steps.pop_front();
                    self.state = SessionState::Failed;
                    return Err(err);
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.steps.clear();
        self.state = SessionState::Disconnected;
        let mut record = self.record.lock().unwrap();
        record.closes += 1;
        record.live -= 1;
    }
}
