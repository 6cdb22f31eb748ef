//! Orchestrator: owns one generation session and one playback sink at a
//! time and keeps them in step with [`SharedState`].
//!
//! # Session task
//!
//! ```text
//! start()
//!   └─▶ spawn session task ─▶ open(config from snapshot)       [Starting]
//!         ├─ Err → lastError, Idle; start() returns the error
//!         └─ Ok  → sink.start(format), begin_session          [Running]
//!               loop select!
//!                 ├─ cancelled          → clean exit
//!                 ├─ sink fault         → fatal, lastError
//!                 ├─ control revision   → rebuild prompts, update_config
//!                 ├─ receive chunk      → count, enqueue (drops counted)
//!                 ├─ EOF / StreamError  → close, backoff, reopen   [Reconnecting]
//!                 └─ stats tick         → publish sink counters
//!         cleanup on every exit: close session, stop sink, running=false  [Idle]
//! stop()
//!   └─▶ cancel token, await the task                          [Stopping → Idle]
//! ```
//!
//! Cancellation is observed at every await of the session task: opening,
//! receiving, applying an update and sleeping between reconnect attempts.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioChunk, AudioOutput, DeviceError, EnqueueError, PlaybackSink, SinkStats};
use crate::config::{AppConfig, PlaybackConfig, ReconnectConfig};
use crate::context::TimeOfDay;
use crate::generation::{
    ConnectError, GenerationConfig, GenerationService, GenerationSession, StreamError,
};
use crate::prompts::PromptBuilder;

use super::backoff::Backoff;
use super::state::{Phase, SharedState, StatusSnapshot};

/// How often sink counters are copied into the shared status.
const STATS_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Why a session could not start or had to end.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `start` was called while a session task is still alive.
    #[error("playback is already running")]
    AlreadyRunning,

    /// `stop` arrived before the session finished opening.
    #[error("start was cancelled by stop")]
    Cancelled,

    /// The generation service refused or failed the initial open.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The output device failed to open or faulted while playing.
    #[error("audio device failed: {0}")]
    Device(#[from] DeviceError),

    /// Every reconnect attempt allowed by the backoff failed.
    #[error("gave up after {attempts} reconnect attempts: {last}")]
    GaveUp { attempts: u32, last: String },
}

// ---------------------------------------------------------------------------
// SinkReport
// ---------------------------------------------------------------------------

/// Sink counters already written to the log.
#[derive(Debug, Default)]
struct SinkReport {
    underruns: u64,
    dropped: u64,
}

impl SinkReport {
    /// Log the counters that grew since the last call and return the number
    /// of new underruns.
    fn update(&mut self, stats: &SinkStats) -> u64 {
        let underruns = stats.underruns.saturating_sub(self.underruns);
        let dropped = stats.dropped.saturating_sub(self.dropped);
        if underruns > 0 {
            log::warn!(
                "orchestrator: playback ran dry {underruns} time(s), {} underruns this session",
                stats.underruns
            );
        }
        if dropped > 0 {
            log::warn!(
                "orchestrator: queue full, {dropped} chunk(s) dropped, {} this session",
                stats.dropped
            );
        }
        self.underruns = self.underruns.max(stats.underruns);
        self.dropped = self.dropped.max(stats.dropped);
        underruns
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    state: SharedState,
    service: Arc<dyn GenerationService>,
    output: Arc<dyn AudioOutput>,
    builder: PromptBuilder,
    playback: PlaybackConfig,
    reconnect: ReconnectConfig,
    temperature: f32,
    lifecycle: Mutex<Option<ActiveSession>>,
}

/// Single authority over the generation session and the playback sink.
///
/// Cheap to clone; clones drive the same session.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wanderfm::audio::CpalOutput;
/// use wanderfm::config::AppConfig;
/// use wanderfm::generation::LyriaService;
/// use wanderfm::pipeline::{Orchestrator, SharedState};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::default();
/// let state = SharedState::new(&config.control);
/// let service = Arc::new(LyriaService::new(config.generation.clone(), "api-key"));
/// let orchestrator = Orchestrator::new(state.clone(), service, Arc::new(CpalOutput), &config);
///
/// orchestrator.start().await?;
/// state.set_bpm(120); // picked up by the running session
/// orchestrator.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        state: SharedState,
        service: Arc<dyn GenerationService>,
        output: Arc<dyn AudioOutput>,
        config: &AppConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                service,
                output,
                builder: PromptBuilder::from_config(&config.prompts),
                playback: config.playback.clone(),
                reconnect: config.reconnect.clone(),
                temperature: config.generation.temperature,
                lifecycle: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.inner.state
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.state.status()
    }

    /// Open a session and begin playback.
    ///
    /// Returns once the session is streaming and the device is open, or with
    /// the reason it could not be.  On failure the state is back in `Idle`
    /// with `lastError` set.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(active) = lifecycle.take() {
            if !active.task.is_finished() {
                *lifecycle = Some(active);
                return Err(OrchestratorError::AlreadyRunning);
            }
            if let Err(e) = active.task.await {
                log::error!("orchestrator: previous session task failed: {e}");
            }
        }

        log::info!("orchestrator: starting");
        self.inner.state.set_phase(Phase::Starting);
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone(), ready_tx));
        *lifecycle = Some(ActiveSession { cancel, task });
        drop(lifecycle);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Cancelled),
        }
    }

    /// Stop playback and release the session and the device.
    ///
    /// Safe from any phase; a no-op when idle.  Returns after every resource
    /// has been released.
    pub async fn stop(&self) {
        let Some(active) = self.inner.lifecycle.lock().await.take() else {
            return;
        };
        if !active.task.is_finished() {
            log::info!("orchestrator: stopping");
            self.inner.state.set_phase(Phase::Stopping);
        }
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            log::error!("orchestrator: session task failed: {e}");
        }
        self.inner.state.end_session();
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

enum Event {
    Update,
    Received(Result<Option<AudioChunk>, StreamError>),
    Tick,
}

impl Inner {
    fn current_config(&self) -> GenerationConfig {
        let snapshot = self.state.snapshot();
        GenerationConfig {
            prompts: self.builder.build(&snapshot),
            bpm: snapshot.bpm,
            temperature: self.temperature,
        }
    }

    async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: oneshot::Sender<Result<(), OrchestratorError>>,
    ) {
        let mut sink = PlaybackSink::new(Arc::clone(&self.output), &self.playback);
        let mut updates = self.state.subscribe();
        updates.borrow_and_update();
        let config = self.current_config();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.service.open(&config) => Some(result),
        };
        let mut session = match opened {
            None => {
                log::info!("orchestrator: start cancelled");
                self.state.end_session();
                return;
            }
            Some(Err(e)) => {
                log::error!("orchestrator: failed to open session: {e}");
                self.state.set_error(e.to_string());
                self.state.end_session();
                let _ = ready.send(Err(e.into()));
                return;
            }
            Some(Ok(session)) => session,
        };

        if let Err(e) = sink.start(session.format()).await {
            log::error!("orchestrator: failed to open audio device: {e}");
            session.close().await;
            self.state.set_error(e.to_string());
            self.state.end_session();
            let _ = ready.send(Err(e.into()));
            return;
        }

        self.state.begin_session(config.prompts.clone(), config.bpm);
        log::info!(
            "orchestrator: running at {} BPM with {} prompts",
            config.bpm,
            config.prompts.len()
        );
        let _ = ready.send(Ok(()));

        let mut report = SinkReport::default();
        let outcome = self
            .stream(&mut session, &mut sink, &mut updates, &cancel, &mut report, config)
            .await;

        self.state.set_phase(Phase::Stopping);
        session.close().await;
        sink.stop();
        let stats = sink.stats();
        report.update(&stats);
        self.state.publish_sink(stats);
        log::info!(
            "orchestrator: session played {} samples; {} chunks dropped, {} underruns",
            stats.played_samples,
            stats.dropped,
            stats.underruns
        );
        if let Err(e) = outcome {
            log::error!("orchestrator: session ended: {e}");
            self.state.set_error(e.to_string());
        }
        self.state.end_session();
        log::info!("orchestrator: idle");
    }

    /// The Running loop.  `Ok` means cancelled; `Err` is fatal.
    async fn stream(
        &self,
        session: &mut Box<dyn GenerationSession>,
        sink: &mut PlaybackSink,
        updates: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
        report: &mut SinkReport,
        mut applied: GenerationConfig,
    ) -> Result<(), OrchestratorError> {
        let mut backoff = Backoff::from_config(&self.reconnect);
        let mut awaiting_first_chunk = false;
        let mut time_of_day = TimeOfDay::now();
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                fault = sink.fault() => return Err(fault.into()),
                Ok(()) = updates.changed() => Event::Update,
                received = session.receive() => Event::Received(received),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Tick => {
                    let stats = sink.stats();
                    report.update(&stats);
                    self.state.publish_sink(stats);
                    let now = TimeOfDay::now();
                    if now != time_of_day {
                        time_of_day = now;
                        log::info!("orchestrator: time of day is now {}", now.label());
                        if let Some(config) = self.apply_latest(session, &applied, cancel).await? {
                            applied = config;
                        }
                    }
                }
                Event::Update => {
                    updates.borrow_and_update();
                    if let Some(config) = self.apply_latest(session, &applied, cancel).await? {
                        applied = config;
                    }
                }
                Event::Received(Ok(Some(chunk))) => {
                    self.state.record_chunk();
                    if awaiting_first_chunk {
                        awaiting_first_chunk = false;
                        backoff.reset();
                    }
                    match sink.enqueue(chunk) {
                        Ok(()) | Err(EnqueueError::Full) => {}
                        Err(e) => log::warn!("orchestrator: chunk not played: {e}"),
                    }
                }
                Event::Received(result) => {
                    let reason = match result {
                        Err(e) => e.to_string(),
                        _ => "service ended the stream".to_string(),
                    };
                    match self
                        .reconnect(session, sink, updates, cancel, &mut backoff, reason)
                        .await?
                    {
                        Some(config) => {
                            applied = config;
                            awaiting_first_chunk = true;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Send the configuration for the latest snapshot if it differs from
    /// `applied`.  A rejected update is reported but not fatal.
    ///
    /// `Ok(None)` also covers "nothing to send"; `Err` only on cancellation.
    async fn apply_latest(
        &self,
        session: &mut Box<dyn GenerationSession>,
        applied: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<GenerationConfig>, OrchestratorError> {
        let config = self.current_config();
        if &config == applied {
            return Ok(None);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            result = session.update_config(&config) => result,
        };
        match result {
            Ok(()) => {
                log::debug!(
                    "orchestrator: applied {} prompts at {} BPM",
                    config.prompts.len(),
                    config.bpm
                );
                self.state.config_applied(config.prompts.clone(), config.bpm);
                Ok(Some(config))
            }
            Err(e) => {
                log::warn!("orchestrator: configuration update rejected: {e}");
                self.state.set_error(e.to_string());
                Ok(None)
            }
        }
    }

    /// Replace a dead session.  `Ok(None)` when cancelled while waiting.
    async fn reconnect(
        &self,
        session: &mut Box<dyn GenerationSession>,
        sink: &mut PlaybackSink,
        updates: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
        reason: String,
    ) -> Result<Option<GenerationConfig>, OrchestratorError> {
        session.close().await;
        self.state.set_phase(Phase::Reconnecting);
        log::warn!("orchestrator: stream lost ({reason}); reconnecting");

        let mut last = reason;
        loop {
            let Some(delay) = backoff.next_delay() else {
                return Err(OrchestratorError::GaveUp {
                    attempts: backoff.failures(),
                    last,
                });
            };
            self.state.set_error(format!("reconnecting: {last}"));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            updates.borrow_and_update();
            let config = self.current_config();
            self.state.record_reconnect();
            log::info!(
                "orchestrator: reconnect attempt {} after {:?}",
                backoff.failures(),
                delay
            );

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                result = self.service.open(&config) => result,
            };
            match opened {
                Ok(mut fresh) => {
                    if sink.format() != Some(fresh.format()) {
                        if let Err(e) = sink.start(fresh.format()).await {
                            fresh.close().await;
                            return Err(e.into());
                        }
                    }
                    *session = fresh;
                    self.state.config_applied(config.prompts.clone(), config.bpm);
                    self.state.set_phase(Phase::Running);
                    log::info!("orchestrator: reconnected");
                    return Ok(Some(config));
                }
                Err(e) => {
                    log::warn!("orchestrator: reconnect failed: {e}");
                    last = e.to_string();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
