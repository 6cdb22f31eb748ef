//! Priority merge of context signals into weighted prompts.
//!
//! Resolution order, highest priority first:
//!
//! ```text
//! genre / experience overrides
//!   > style hints (listening taste)
//!     > weather phrases
//!       > place phrases
//!         > time-of-day phrases
//! ```
//!
//! Entries with identical text (case-insensitive) are merged by summing their
//! weights and keep the position of the first occurrence.  The merged list is
//! then capped at `max_entries`, dropping the lowest-priority entries.  Tempo
//! is never turned into text; it travels separately as a numeric control.

use serde::{Deserialize, Serialize};

use crate::config::PromptConfig;
use crate::context::{Place, TimeOfDay, Weather};
use crate::prompts::tables;

/// Neutral prompt used when no context produces any entry.
pub const FALLBACK_PROMPT: &str = "ambient";

const GENRE_WEIGHT: f32 = 2.0;
const EXPERIENCE_WEIGHT: f32 = 1.8;
const STYLE_HINT_WEIGHT: f32 = 1.2;
const STYLE_HINT_STEP: f32 = 0.1;
const STYLE_HINT_FLOOR: f32 = 0.6;

// ---------------------------------------------------------------------------
// WeightedPrompt
// ---------------------------------------------------------------------------

/// One stylistic influence sent to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub text: String,
    /// Relative mix strength, always `> 0`.
    pub weight: f32,
}

impl WeightedPrompt {
    pub fn new(text: impl Into<String>, weight: f32) -> Self {
        Self {
            text: text.into(),
            weight,
        }
    }
}

// ---------------------------------------------------------------------------
// ContextSnapshot
// ---------------------------------------------------------------------------

/// Immutable copy of the control inputs at one instant.
///
/// `time_of_day` is derived from the wall clock when the snapshot is taken,
/// never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub bpm: u16,
    pub time_of_day: Option<TimeOfDay>,
    pub weather: Option<Weather>,
    pub place: Option<Place>,
    pub genre: Option<String>,
    pub experience: Option<String>,
    pub style_hints: Vec<String>,
}

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

/// Builds the prompt list for a [`ContextSnapshot`].
///
/// Holds only settings; [`build`](Self::build) is a pure function of the
/// snapshot and performs no I/O.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_entries: usize,
    include_time_of_day: bool,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}

impl PromptBuilder {
    pub fn from_config(config: &PromptConfig) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            include_time_of_day: config.include_time_of_day,
        }
    }

    /// Merge every present context source into an ordered prompt list.
    ///
    /// Never returns an empty list and never returns a non-positive weight.
    pub fn build(&self, snapshot: &ContextSnapshot) -> Vec<WeightedPrompt> {
        let mut candidates: Vec<(String, f32)> = Vec::new();

        if let Some(genre) = &snapshot.genre {
            candidates.push((genre.clone(), GENRE_WEIGHT));
        }
        if let Some(experience) = &snapshot.experience {
            candidates.push((experience.clone(), EXPERIENCE_WEIGHT));
        }
        for (i, hint) in snapshot.style_hints.iter().enumerate() {
            let weight = (STYLE_HINT_WEIGHT - STYLE_HINT_STEP * i as f32).max(STYLE_HINT_FLOOR);
            candidates.push((hint.clone(), weight));
        }
        if let Some(weather) = &snapshot.weather {
            candidates.extend(tables::weather_phrases(weather));
        }
        if let Some(place) = &snapshot.place {
            candidates.extend(tables::place_phrases(place));
        }
        if let Some(time) = snapshot.time_of_day.filter(|_| self.include_time_of_day) {
            candidates.extend(tables::time_of_day_phrases(time));
        }

        let mut merged = merge_by_text(candidates);
        merged.truncate(self.max_entries);

        if merged.is_empty() {
            merged.push(WeightedPrompt::new(FALLBACK_PROMPT, 1.0));
        }
        merged
    }
}

/// Collapse entries with the same (trimmed, case-insensitive) text.
fn merge_by_text(candidates: Vec<(String, f32)>) -> Vec<WeightedPrompt> {
    let mut merged: Vec<WeightedPrompt> = Vec::with_capacity(candidates.len());
    for (text, weight) in candidates {
        let text = text.trim();
        if text.is_empty() || !(weight.is_finite() && weight > 0.0) {
            continue;
        }
        match merged
            .iter_mut()
            .find(|p| p.text.eq_ignore_ascii_case(text))
        {
            Some(existing) => existing.weight += weight,
            None => merged.push(WeightedPrompt::new(text, weight)),
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WeatherCondition;

    fn texts(prompts: &[WeightedPrompt]) -> Vec<&str> {
        prompts.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn empty_context_falls_back_to_neutral_prompt() {
        let prompts = PromptBuilder::default().build(&ContextSnapshot::default());
        assert_eq!(prompts, vec![WeightedPrompt::new(FALLBACK_PROMPT, 1.0)]);
    }

    #[test]
    fn overrides_come_before_derived_entries() {
        let snapshot = ContextSnapshot {
            genre: Some("synthwave".into()),
            experience: Some("night drive".into()),
            style_hints: vec!["dream pop".into()],
            weather: Some(Weather::new(WeatherCondition::Clear)),
            place: Some(Place {
                name: "Hyde Park".into(),
                category: Some("park".into()),
            }),
            time_of_day: Some(TimeOfDay::Night),
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);

        assert_eq!(
            &texts(&prompts)[..5],
            &[
                "synthwave",
                "night drive",
                "dream pop",
                "bright cheerful",
                "sunny acoustic"
            ]
        );
        assert_eq!(prompts[0].weight, GENRE_WEIGHT);
        assert_eq!(prompts[1].weight, EXPERIENCE_WEIGHT);
    }

    #[test]
    fn weather_then_place_then_time() {
        let snapshot = ContextSnapshot {
            bpm: 72,
            weather: Some(Weather::new(WeatherCondition::Rain)),
            place: Some(Place {
                name: "Hyde Park".into(),
                category: Some("park".into()),
            }),
            time_of_day: Some(TimeOfDay::Afternoon),
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);

        assert_eq!(
            texts(&prompts),
            vec![
                "rainy day ambient",
                "cozy indoor",
                "relaxing rain sounds texture",
                "open-air park stroll",
                "birdsong textures",
                "afternoon warmth",
                "relaxed groove",
                "sunny vibes",
            ]
        );
        assert_eq!(prompts[0].weight, 1.5);
        assert_eq!(prompts[3].weight, 1.0);
    }

    #[test]
    fn time_of_day_can_be_switched_off() {
        let snapshot = ContextSnapshot {
            time_of_day: Some(TimeOfDay::Morning),
            ..ContextSnapshot::default()
        };
        let builder = PromptBuilder::from_config(&PromptConfig {
            max_entries: 8,
            include_time_of_day: false,
        });
        assert_eq!(texts(&builder.build(&snapshot)), vec![FALLBACK_PROMPT]);
    }

    #[test]
    fn bpm_never_becomes_text() {
        let snapshot = ContextSnapshot {
            bpm: 140,
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);
        assert!(prompts.iter().all(|p| !p.text.contains("140")));
    }

    #[test]
    fn identical_text_merges_by_summing_weights() {
        // Cloudy weather and morning both contribute "soft ambient".
        let snapshot = ContextSnapshot {
            weather: Some(Weather::new(WeatherCondition::Cloudy)),
            time_of_day: Some(TimeOfDay::Morning),
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);

        let soft: Vec<_> = prompts.iter().filter(|p| p.text == "soft ambient").collect();
        assert_eq!(soft.len(), 1);
        assert!((soft[0].weight - (1.0 + 1.0 * tables::TIME_WEIGHT_SCALE)).abs() < 1e-6);
        // Keeps the weather position (index 1), not the time position.
        assert_eq!(prompts[1].text, "soft ambient");
    }

    #[test]
    fn override_matching_derived_text_merges_case_insensitively() {
        let snapshot = ContextSnapshot {
            genre: Some("Lo-Fi Beats".into()),
            time_of_day: Some(TimeOfDay::Evening),
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);

        assert_eq!(prompts[0].text, "Lo-Fi Beats");
        assert!((prompts[0].weight - (GENRE_WEIGHT + 1.0 * tables::TIME_WEIGHT_SCALE)).abs() < 1e-6);
        assert_eq!(prompts.len(), 3);
    }

    #[test]
    fn style_hint_weights_decrease_to_floor() {
        let hints: Vec<String> = (0..10).map(|i| format!("hint {i}")).collect();
        let snapshot = ContextSnapshot {
            style_hints: hints,
            ..ContextSnapshot::default()
        };
        let builder = PromptBuilder::from_config(&PromptConfig {
            max_entries: 10,
            include_time_of_day: false,
        });
        let prompts = builder.build(&snapshot);

        assert!((prompts[0].weight - 1.2).abs() < 1e-6);
        assert!((prompts[1].weight - 1.1).abs() < 1e-6);
        assert!((prompts[9].weight - STYLE_HINT_FLOOR).abs() < 1e-6);
        assert!(prompts.windows(2).all(|w| w[0].weight >= w[1].weight));
    }

    #[test]
    fn cap_drops_lowest_priority_first() {
        let snapshot = ContextSnapshot {
            genre: Some("ambient techno".into()),
            weather: Some(Weather::new(WeatherCondition::Rain)),
            time_of_day: Some(TimeOfDay::Night),
            ..ContextSnapshot::default()
        };
        let builder = PromptBuilder::from_config(&PromptConfig {
            max_entries: 3,
            include_time_of_day: true,
        });
        let prompts = builder.build(&snapshot);

        assert_eq!(
            texts(&prompts),
            vec!["ambient techno", "rainy day ambient", "cozy indoor"]
        );
    }

    #[test]
    fn all_weights_positive() {
        let snapshot = ContextSnapshot {
            genre: Some("jazz".into()),
            style_hints: vec!["  ".into(), "bossa nova".into()],
            weather: Some(Weather::new(WeatherCondition::Storm)),
            time_of_day: Some(TimeOfDay::Morning),
            ..ContextSnapshot::default()
        };
        let prompts = PromptBuilder::default().build(&snapshot);

        assert!(!prompts.is_empty());
        assert!(prompts.iter().all(|p| p.weight > 0.0 && !p.text.is_empty()));
    }
}
