//! Shared control inputs and derived playback status.
//!
//! [`SharedState`] is the one record mutated from more than one context:
//! control surfaces write inputs, the orchestrator writes status.  It is
//! split into two field groups, each behind its own mutex, and no method
//! ever holds both locks at once:
//!
//! ```text
//! controls  bpm, weather, place, genre, experience, style hints
//! status    phase, running, counters, active prompts, last error
//! ```
//!
//! Every accepted control change bumps a revision published on a
//! `tokio::sync::watch` channel.  The orchestrator only ever looks at the
//! latest revision, which is what coalesces bursts of changes into a single
//! configuration update.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::audio::SinkStats;
use crate::config::ControlConfig;
use crate::context::{Place, TimeOfDay, Weather, WeatherCondition};
use crate::generation::BPM_RANGE;
use crate::prompts::{ContextSnapshot, WeightedPrompt};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Orchestrator lifecycle.
///
/// ```text
/// Idle ──start──▶ Starting ──open ok──▶ Running ◀──▶ Reconnecting
///  ▲                 │                     │              │
///  │              open failed            stop / fatal    stop / gave up
///  │                 ▼                     ▼              ▼
///  └──────────────────────────────── Stopping ◀───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Running,
    /// Transient stream failure; still logically running.
    Reconnecting,
    Stopping,
}

impl Phase {
    /// ```
    /// use wanderfm::pipeline::Phase;
    ///
    /// assert!(!Phase::Idle.is_active());
    /// assert!(Phase::Running.is_active());
    /// assert!(Phase::Reconnecting.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        !matches!(self, Phase::Idle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Starting => "Starting",
            Phase::Running => "Running",
            Phase::Reconnecting => "Reconnecting",
            Phase::Stopping => "Stopping",
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A control input was rejected; state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("at most {max} style hints are allowed")]
    TooManyHints { max: usize },

    #[error("unknown weather condition: {0}")]
    UnknownCondition(String),
}

// ---------------------------------------------------------------------------
// Field groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct Controls {
    bpm: u16,
    weather: Option<Weather>,
    place: Option<Place>,
    genre: Option<String>,
    experience: Option<String>,
    style_hints: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Status {
    phase: Phase,
    running: bool,
    chunks_received: u64,
    active_prompts: Vec<WeightedPrompt>,
    applied_bpm: Option<u16>,
    last_error: Option<String>,
    reconnects: u64,
    sink: SinkStats,
}

/// Point-in-time copy of everything a status reader needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub phase: Phase,
    pub bpm: u16,
    /// Tempo of the last configuration the service accepted.
    pub applied_bpm: Option<u16>,
    pub chunks_received: u64,
    pub active_prompts: Vec<WeightedPrompt>,
    pub last_error: Option<String>,
    pub dropped_chunks: u64,
    pub underruns: u64,
    pub queued_chunks: usize,
    pub reconnects: u64,
    pub weather: Option<Weather>,
    pub place: Option<Place>,
    pub genre: Option<String>,
    pub experience: Option<String>,
    pub style_hints: Vec<String>,
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

struct Inner {
    limits: ControlConfig,
    controls: Mutex<Controls>,
    status: Mutex<Status>,
    revision: watch::Sender<u64>,
}

/// Process-wide state handle.  Cheap to clone; all clones share one record.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Inner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(&ControlConfig::default())
    }
}

impl SharedState {
    pub fn new(limits: &ControlConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                limits: limits.clone(),
                controls: Mutex::new(Controls {
                    bpm: clamp_bpm(limits.initial_bpm),
                    ..Controls::default()
                }),
                status: Mutex::new(Status::default()),
                revision,
            }),
        }
    }

    /// Receiver that observes every accepted control change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Apply `f` to the controls and bump the revision if anything changed.
    fn update_controls(&self, f: impl FnOnce(&mut Controls)) {
        let changed = {
            let mut controls = lock(&self.inner.controls);
            let before = controls.clone();
            f(&mut controls);
            *controls != before
        };
        if changed {
            self.inner.revision.send_modify(|rev| *rev += 1);
        }
    }

    fn normalize_text(
        &self,
        field: &'static str,
        value: &str,
    ) -> Result<Option<String>, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let max = self.inner.limits.max_text_len;
        if trimmed.chars().count() > max {
            return Err(ValidationError::TooLong { field, max });
        }
        Ok(Some(trimmed.to_string()))
    }

    // -----------------------------------------------------------------------
    // Control inputs
    // -----------------------------------------------------------------------

    /// Store the tempo clamped into the supported range and return it.
    pub fn set_bpm(&self, bpm: i32) -> u16 {
        let bpm = clamp_bpm(bpm);
        self.update_controls(|c| c.bpm = bpm);
        bpm
    }

    pub fn bpm(&self) -> u16 {
        lock(&self.inner.controls).bpm
    }

    /// Empty after trimming clears the override.
    pub fn set_genre(&self, genre: &str) -> Result<(), ValidationError> {
        let genre = self.normalize_text("genre", genre)?;
        self.update_controls(|c| c.genre = genre);
        Ok(())
    }

    /// Empty after trimming clears the override.
    pub fn set_experience(&self, experience: &str) -> Result<(), ValidationError> {
        let experience = self.normalize_text("experience", experience)?;
        self.update_controls(|c| c.experience = experience);
        Ok(())
    }

    /// Parse `condition` (a word such as `"rain"` or a WMO code) and store it.
    pub fn set_weather(
        &self,
        condition: &str,
        description: Option<&str>,
        temperature_c: Option<f32>,
    ) -> Result<(), ValidationError> {
        let parsed: WeatherCondition = condition
            .parse()
            .map_err(|_| ValidationError::UnknownCondition(condition.trim().to_string()))?;
        let description = match description {
            Some(d) => self.normalize_text("weather description", d)?,
            None => None,
        };
        let weather = Weather {
            condition: parsed,
            description: description.unwrap_or_else(|| parsed.describe().to_string()),
            temperature_c,
        };
        self.update_controls(|c| c.weather = Some(weather));
        Ok(())
    }

    /// Store a weather value produced by a lookup.
    pub fn set_weather_value(&self, weather: Weather) {
        self.update_controls(|c| c.weather = Some(weather));
    }

    pub fn clear_weather(&self) {
        self.update_controls(|c| c.weather = None);
    }

    /// An empty name clears the place.
    pub fn set_place(&self, name: &str, category: Option<&str>) -> Result<(), ValidationError> {
        let place = match self.normalize_text("place", name)? {
            Some(name) => {
                let category = match category {
                    Some(c) => self
                        .normalize_text("place category", c)?
                        .map(|c| c.to_lowercase()),
                    None => None,
                };
                Some(Place { name, category })
            }
            None => None,
        };
        self.update_controls(|c| c.place = place);
        Ok(())
    }

    /// Replace the listening-taste hints.  Blank hints are dropped.
    pub fn set_style_hints<S: AsRef<str>>(&self, hints: &[S]) -> Result<(), ValidationError> {
        let mut cleaned = Vec::with_capacity(hints.len());
        for hint in hints {
            if let Some(hint) = self.normalize_text("style hint", hint.as_ref())? {
                cleaned.push(hint);
            }
        }
        let max = self.inner.limits.max_style_hints;
        if cleaned.len() > max {
            return Err(ValidationError::TooManyHints { max });
        }
        self.update_controls(|c| c.style_hints = cleaned);
        Ok(())
    }

    /// Copy of the inputs with time of day taken from the wall clock now.
    pub fn snapshot(&self) -> ContextSnapshot {
        let controls = lock(&self.inner.controls).clone();
        ContextSnapshot {
            bpm: controls.bpm,
            time_of_day: Some(TimeOfDay::now()),
            weather: controls.weather,
            place: controls.place,
            genre: controls.genre,
            experience: controls.experience,
            style_hints: controls.style_hints,
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> StatusSnapshot {
        let controls = lock(&self.inner.controls).clone();
        let status = lock(&self.inner.status).clone();
        StatusSnapshot {
            running: status.running,
            phase: status.phase,
            bpm: controls.bpm,
            applied_bpm: status.applied_bpm,
            chunks_received: status.chunks_received,
            active_prompts: status.active_prompts,
            last_error: status.last_error,
            dropped_chunks: status.sink.dropped,
            underruns: status.sink.underruns,
            queued_chunks: status.sink.queued,
            reconnects: status.reconnects,
            weather: controls.weather,
            place: controls.place,
            genre: controls.genre,
            experience: controls.experience,
            style_hints: controls.style_hints,
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner.status).phase
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.status).running
    }

    // The writers below belong to the orchestrator.

    pub(crate) fn set_phase(&self, phase: Phase) {
        lock(&self.inner.status).phase = phase;
    }

    /// A session is live: reset the per-session counters and clear the error.
    pub(crate) fn begin_session(&self, prompts: Vec<WeightedPrompt>, bpm: u16) {
        let mut status = lock(&self.inner.status);
        status.phase = Phase::Running;
        status.running = true;
        status.chunks_received = 0;
        status.reconnects = 0;
        status.sink = SinkStats::default();
        status.active_prompts = prompts;
        status.applied_bpm = Some(bpm);
        status.last_error = None;
    }

    /// A configuration was accepted by the service.
    pub(crate) fn config_applied(&self, prompts: Vec<WeightedPrompt>, bpm: u16) {
        let mut status = lock(&self.inner.status);
        status.active_prompts = prompts;
        status.applied_bpm = Some(bpm);
        status.last_error = None;
    }

    pub(crate) fn record_chunk(&self) {
        lock(&self.inner.status).chunks_received += 1;
    }

    pub(crate) fn record_reconnect(&self) {
        lock(&self.inner.status).reconnects += 1;
    }

    pub(crate) fn publish_sink(&self, stats: SinkStats) {
        lock(&self.inner.status).sink = stats;
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        lock(&self.inner.status).last_error = Some(message.into());
    }

    /// No session is live any more.
    pub(crate) fn end_session(&self) {
        let mut status = lock(&self.inner.status);
        status.running = false;
        status.phase = Phase::Idle;
    }
}

fn clamp_bpm(bpm: i32) -> u16 {
    bpm.clamp(*BPM_RANGE.start() as i32, *BPM_RANGE.end() as i32) as u16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::default()
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();
    }

    #[test]
    fn initial_bpm_comes_from_config() {
        assert_eq!(state().bpm(), 80);
        let low = SharedState::new(&ControlConfig {
            initial_bpm: 10,
            ..ControlConfig::default()
        });
        assert_eq!(low.bpm(), 60);
    }

    #[test]
    fn bpm_is_clamped_to_range() {
        let s = state();
        for (input, expected) in [(-5, 60), (0, 60), (59, 60), (60, 60), (72, 72), (180, 180), (181, 180), (i32::MAX, 180)] {
            assert_eq!(s.set_bpm(input), expected);
            assert_eq!(s.bpm(), expected);
        }
    }

    #[test]
    fn empty_override_clears_instead_of_failing() {
        let s = state();
        s.set_genre("  jazz ").unwrap();
        assert_eq!(s.snapshot().genre.as_deref(), Some("jazz"));

        s.set_genre("   ").unwrap();
        assert_eq!(s.snapshot().genre, None);
    }

    #[test]
    fn over_long_text_is_rejected_and_state_unchanged() {
        let s = state();
        s.set_experience("focus").unwrap();
        let err = s.set_experience(&"x".repeat(121)).unwrap_err();

        assert_eq!(
            err,
            ValidationError::TooLong {
                field: "experience",
                max: 120
            }
        );
        assert_eq!(s.snapshot().experience.as_deref(), Some("focus"));
    }

    #[test]
    fn weather_parses_words_and_rejects_unknown() {
        let s = state();
        s.set_weather("rain", None, Some(12.0)).unwrap();
        let weather = s.snapshot().weather.unwrap();
        assert_eq!(weather.condition, WeatherCondition::Rain);
        assert_eq!(weather.temperature_c, Some(12.0));

        assert_eq!(
            s.set_weather("hail of frogs", None, None),
            Err(ValidationError::UnknownCondition("hail of frogs".into()))
        );
        assert_eq!(s.snapshot().weather.unwrap().condition, WeatherCondition::Rain);
    }

    #[test]
    fn place_with_empty_name_clears() {
        let s = state();
        s.set_place("Hyde Park", Some("Park")).unwrap();
        assert_eq!(
            s.snapshot().place,
            Some(Place {
                name: "Hyde Park".into(),
                category: Some("park".into())
            })
        );
        s.set_place("", Some("park")).unwrap();
        assert_eq!(s.snapshot().place, None);
    }

    #[test]
    fn style_hints_drop_blanks_and_enforce_limit() {
        let s = state();
        s.set_style_hints(&["dream pop", " ", "shoegaze"]).unwrap();
        assert_eq!(s.snapshot().style_hints, vec!["dream pop", "shoegaze"]);

        let many: Vec<String> = (0..9).map(|i| format!("hint {i}")).collect();
        assert_eq!(
            s.set_style_hints(&many),
            Err(ValidationError::TooManyHints { max: 8 })
        );
        assert_eq!(s.snapshot().style_hints.len(), 2);
    }

    #[test]
    fn revision_bumps_only_on_change() {
        let s = state();
        let rx = s.subscribe();
        let start = *rx.borrow();

        s.set_bpm(100);
        s.set_bpm(100);
        s.set_genre("jazz").unwrap();
        s.set_genre("jazz").unwrap();
        let _ = s.set_genre(&"x".repeat(500));

        assert_eq!(*rx.borrow(), start + 2);
    }

    #[test]
    fn snapshot_carries_time_of_day() {
        assert!(state().snapshot().time_of_day.is_some());
    }

    #[test]
    fn session_lifecycle_updates_status() {
        let s = state();
        s.set_error("boom");
        s.begin_session(vec![WeightedPrompt::new("ambient", 1.0)], 72);
        s.record_chunk();
        s.record_chunk();

        let st = s.status();
        assert!(st.running);
        assert_eq!(st.phase, Phase::Running);
        assert_eq!(st.chunks_received, 2);
        assert_eq!(st.applied_bpm, Some(72));
        assert_eq!(st.last_error, None);

        s.end_session();
        let st = s.status();
        assert!(!st.running);
        assert_eq!(st.phase, Phase::Idle);
        assert_eq!(st.chunks_received, 2);

        s.begin_session(vec![WeightedPrompt::new("ambient", 1.0)], 72);
        assert_eq!(s.status().chunks_received, 0);
    }

    #[test]
    fn clones_share_one_record() {
        let a = state();
        let b = a.clone();
        a.set_bpm(150);
        assert_eq!(b.bpm(), 150);
    }

    #[test]
    fn status_serializes_to_json() {
        let json = serde_json::to_value(state().status()).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["phase"], "Idle");
        assert_eq!(json["bpm"], 80);
    }
}
