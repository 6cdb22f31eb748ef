//! Prompt assembly: context snapshot → ordered, weighted prompt list.
//!
//! This module provides:
//! * [`PromptBuilder`]: pure, deterministic priority merge of every context
//!   source into a list of [`WeightedPrompt`]s.
//! * [`ContextSnapshot`]: the immutable input the builder reads.
//! * [`tables`]: the phrase tables for time of day, weather and place.
//!
//! # Quick start
//!
//! ```rust
//! use wanderfm::context::{TimeOfDay, Weather, WeatherCondition};
//! use wanderfm::prompts::{ContextSnapshot, PromptBuilder};
//!
//! let snapshot = ContextSnapshot {
//!     weather: Some(Weather::new(WeatherCondition::Rain)),
//!     time_of_day: Some(TimeOfDay::Evening),
//!     ..ContextSnapshot::default()
//! };
//! let prompts = PromptBuilder::default().build(&snapshot);
//! assert_eq!(prompts[0].text, "rainy day ambient");
//! ```

pub mod builder;
pub mod tables;

pub use builder::{ContextSnapshot, PromptBuilder, WeightedPrompt, FALLBACK_PROMPT};
