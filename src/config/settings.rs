//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variables consulted (in order) when no API key is configured.
const API_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Environment variable holding the Google Maps Platform key.
const PLACES_KEY_VAR: &str = "GOOGLE_API_KEY";

// ---------------------------------------------------------------------------
// OverflowPolicy
// ---------------------------------------------------------------------------

/// What the playback queue does with a chunk that arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the incoming chunk; queued audio plays out untouched.
    DropNewest,
    /// Evict the oldest queued chunk to make room, favouring fresh audio.
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropNewest
    }
}

// ---------------------------------------------------------------------------
// GenerationSettings
// ---------------------------------------------------------------------------

/// Connection settings for the streaming music-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// WebSocket base URL of the service.
    pub endpoint: String,
    /// Model identifier sent in the session setup message.
    pub model: String,
    /// API key. `None` falls back to `GOOGLE_API_KEY` / `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    /// Sampling temperature forwarded with every configuration.
    pub temperature: f32,
    /// Seconds allowed for the handshake + setup exchange.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for a single configuration update to be written.
    pub update_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com".into(),
            model: "models/lyria-realtime-exp".into(),
            api_key: None,
            temperature: 0.9,
            connect_timeout_secs: 10,
            update_timeout_secs: 5,
        }
    }
}

impl GenerationSettings {
    /// The configured key, or the first non-empty key found in the
    /// environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_VARS
                    .iter()
                    .filter_map(|var| std::env::var(var).ok())
                    .find(|k| !k.trim().is_empty())
            })
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Local playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Play through the default output device. `false` swaps in a null
    /// device that consumes audio at real-time pace (headless runs).
    pub enabled: bool,
    /// Maximum number of chunks buffered between network and device.
    pub queue_capacity: usize,
    /// Behaviour when the queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            overflow: OverflowPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Exponential-backoff parameters for re-opening a failed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay after a failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive failed attempts tolerated before the session gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 6,
        }
    }
}

// ---------------------------------------------------------------------------
// PromptConfig
// ---------------------------------------------------------------------------

/// Prompt assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum number of weighted prompts sent in one configuration.
    pub max_entries: usize,
    /// Add the wall-clock time-of-day phrases.
    pub include_time_of_day: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_entries: 8,
            include_time_of_day: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ControlConfig
// ---------------------------------------------------------------------------

/// Limits applied to control inputs at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Tempo on startup (clamped into the supported range).
    pub initial_bpm: i32,
    /// Maximum characters in a free-text override or hint.
    pub max_text_len: usize,
    /// Maximum number of listening-taste style hints.
    pub max_style_hints: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_bpm: 80,
            max_text_len: 120,
            max_style_hints: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// WeatherConfig
// ---------------------------------------------------------------------------

/// Settings for the Open-Meteo weather lookup used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Allow network weather lookups at all.
    pub enabled: bool,
    /// City resolved on startup, e.g. `"London"`.
    pub city: Option<String>,
    /// HTTP timeout per request, in seconds.
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            city: None,
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaceConfig
// ---------------------------------------------------------------------------

/// Google Places lookups for `locate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceConfig {
    pub enabled: bool,
    /// Maps Platform key. `None` falls back to `GOOGLE_API_KEY`.
    pub api_key: Option<String>,
    /// Nearby-search radius in metres.
    pub radius_m: f64,
    pub timeout_secs: u64,
}

impl Default for PlaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            radius_m: 100.0,
            timeout_secs: 5,
        }
    }
}

impl PlaceConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(PLACES_KEY_VAR).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use wanderfm::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let mut config = AppConfig::load().unwrap();
///
/// // Modify and save
/// config.control.initial_bpm = 96;
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Generation service connection settings.
    pub generation: GenerationSettings,
    /// Playback queue / device settings.
    pub playback: PlaybackConfig,
    /// Reconnect backoff settings.
    pub reconnect: ReconnectConfig,
    /// Prompt assembly settings.
    pub prompts: PromptConfig,
    /// Control-input limits.
    pub control: ControlConfig,
    /// Weather lookup settings.
    pub weather: WeatherConfig,
    /// Place lookup settings.
    pub place: PlaceConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
