//! Contextual signals that steer the music.
//!
//! * [`TimeOfDay`]: derived from the wall clock whenever a snapshot is taken.
//! * [`Weather`] / [`WeatherCondition`]: current conditions, set by an
//!   external updater (see [`WeatherClient`] for the Open-Meteo lookup).
//! * [`Place`]: nearest place name + category, set by an external updater
//!   (see [`PlaceClient`] for the Google Places lookup).
//!
//! These are plain values: nothing in this module touches shared state.

pub mod place;
pub mod signals;
pub mod weather;

pub use place::{PlaceClient, PlaceError};
pub use signals::{Place, TimeOfDay, Weather, WeatherCondition};
pub use weather::{WeatherClient, WeatherError};
