//! Value types for the control inputs that describe the listener's context.

use std::str::FromStr;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// Coarse part of the day.
///
/// ```text
/// Morning    05:00 – 11:59
/// Afternoon  12:00 – 16:59
/// Evening    17:00 – 22:59
/// Night      23:00 – 04:59
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Classify an hour of the day (`0..=23`).
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=22 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Part of the day according to the local wall clock right now.
    pub fn now() -> Self {
        Self::from_hour(current_hour())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Local wall-clock hour (`0..=23`).
pub fn current_hour() -> u32 {
    chrono::Local::now().hour()
}

// ---------------------------------------------------------------------------
// WeatherCondition
// ---------------------------------------------------------------------------

/// Weather condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    Clear,
    Cloudy,
    Rain,
    Snow,
    Storm,
    Fog,
}

impl WeatherCondition {
    /// Map a WMO weather interpretation code (as reported by Open-Meteo).
    ///
    /// Codes outside the table are treated as clear skies.
    pub fn from_wmo_code(code: u32) -> Self {
        match code {
            0 | 1 => Self::Clear,
            2 | 3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 | 61 | 63 | 65 | 66 | 67 | 80 | 81 | 82 => Self::Rain,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Storm,
            _ => Self::Clear,
        }
    }

    /// Default human description for the condition.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Clear => "sunny and clear",
            Self::Cloudy => "cloudy and overcast",
            Self::Rain => "rainy",
            Self::Snow => "snowy",
            Self::Storm => "stormy with thunder",
            Self::Fog => "foggy and misty",
        }
    }
}

impl FromStr for WeatherCondition {
    type Err = String;

    /// Accepts condition words in either noun or adjective form, or a
    /// numeric WMO code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.trim().to_ascii_lowercase();
        if let Ok(code) = word.parse::<u32>() {
            return Ok(Self::from_wmo_code(code));
        }
        match word.as_str() {
            "clear" | "sunny" | "sun" => Ok(Self::Clear),
            "cloudy" | "clouds" | "overcast" => Ok(Self::Cloudy),
            "rain" | "rainy" | "drizzle" | "showers" => Ok(Self::Rain),
            "snow" | "snowy" => Ok(Self::Snow),
            "storm" | "stormy" | "thunderstorm" => Ok(Self::Storm),
            "fog" | "foggy" | "mist" | "misty" => Ok(Self::Fog),
            other => Err(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Current weather as seen by the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub condition: WeatherCondition,
    /// Free-text description, shown in status output.
    pub description: String,
    /// Air temperature in °C, when known.
    pub temperature_c: Option<f32>,
}

impl Weather {
    /// Weather with the condition's default description and no temperature.
    pub fn new(condition: WeatherCondition) -> Self {
        Self {
            condition,
            description: condition.describe().to_string(),
            temperature_c: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Place
// ---------------------------------------------------------------------------

/// Nearest notable place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    /// Place category such as `"park"` or `"cafe"`; `None` when unknown.
    pub category: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
