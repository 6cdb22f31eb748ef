//! Phrase tables mapping each context signal to weighted prompt text.
//!
//! Weights are relative mix strengths; the generation service normalises
//! them across the whole configuration.

use crate::context::{Place, TimeOfDay, Weather, WeatherCondition};

/// Scale applied to time-of-day entries so the ambient time colour is not
/// drowned out by richer sources.
pub const TIME_WEIGHT_SCALE: f32 = 1.2;

pub fn time_of_day_phrases(time: TimeOfDay) -> Vec<(String, f32)> {
    let table: &[(&str, f32)] = match time {
        TimeOfDay::Morning => &[
            ("gentle morning atmosphere", 1.5),
            ("soft ambient", 1.0),
            ("peaceful awakening", 0.8),
        ],
        TimeOfDay::Afternoon => &[
            ("afternoon warmth", 1.2),
            ("relaxed groove", 1.0),
            ("sunny vibes", 0.8),
        ],
        TimeOfDay::Evening => &[
            ("golden hour", 1.3),
            ("evening chill", 1.2),
            ("lo-fi beats", 1.0),
        ],
        TimeOfDay::Night => &[
            ("late night ambient", 1.5),
            ("dreamy atmospheric", 1.0),
            ("soft drone", 0.8),
        ],
    };
    table
        .iter()
        .map(|(text, weight)| (text.to_string(), weight * TIME_WEIGHT_SCALE))
        .collect()
}

pub fn weather_phrases(weather: &Weather) -> Vec<(String, f32)> {
    let table: &[(&str, f32)] = match weather.condition {
        WeatherCondition::Clear => &[("bright cheerful", 1.2), ("sunny acoustic", 1.0)],
        WeatherCondition::Cloudy => &[("mellow overcast", 1.2), ("soft ambient", 1.0)],
        WeatherCondition::Rain => &[
            ("rainy day ambient", 1.5),
            ("cozy indoor", 1.0),
            ("relaxing rain sounds texture", 0.8),
        ],
        WeatherCondition::Snow => &[("winter ambient", 1.3), ("peaceful cold", 1.0)],
        WeatherCondition::Storm => &[("dramatic atmospheric", 1.3), ("intense ambient", 1.0)],
        WeatherCondition::Fog => &[("misty ambient", 1.3), ("ethereal drone", 1.0)],
    };
    let mut phrases: Vec<(String, f32)> = table
        .iter()
        .map(|(text, weight)| (text.to_string(), *weight))
        .collect();

    match weather.temperature_c {
        Some(t) if t > 30.0 => phrases.push(("hot summer vibes".into(), 0.6)),
        Some(t) if t < 0.0 => phrases.push(("cold winter".into(), 0.5)),
        _ => {}
    }
    phrases
}

pub fn place_phrases(place: &Place) -> Vec<(String, f32)> {
    let category = place
        .category
        .as_deref()
        .map(|c| c.trim().to_ascii_lowercase().replace([' ', '-'], "_"))
        .unwrap_or_default();

    let table: &[(&str, f32)] = match category.as_str() {
        "park" | "garden" | "national_park" => {
            &[("open-air park stroll", 1.0), ("birdsong textures", 0.6)]
        }
        "cafe" | "coffee_shop" | "bakery" => &[("coffee shop jazz", 1.0), ("warm acoustic", 0.7)],
        "beach" => &[("beach waves ambient", 1.0), ("breezy tropical", 0.7)],
        "museum" | "art_gallery" => &[("contemplative classical", 1.0)],
        "library" | "book_store" => &[("quiet study ambient", 1.0)],
        "gym" | "fitness_center" | "stadium" => &[("driving workout beat", 1.0)],
        "bar" | "night_club" | "pub" => &[("nightclub deep house", 1.0), ("late bar lounge", 0.7)],
        "restaurant" => &[("dinner lounge", 1.0)],
        "shopping_mall" | "store" | "market" => &[("upbeat pop", 0.8)],
        _ => {
            let name = place.name.trim();
            if name.is_empty() {
                return Vec::new();
            }
            return vec![(format!("ambience of {name}"), 0.8)];
        }
    };
    table
        .iter()
        .map(|(text, weight)| (text.to_string(), *weight))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_entries_are_scaled() {
        let night = time_of_day_phrases(TimeOfDay::Night);
        assert_eq!(night[0].0, "late night ambient");
        assert!((night[0].1 - 1.8).abs() < 1e-6);
    }

    #[test]
    fn hot_weather_adds_temperature_phrase() {
        let mut w = Weather::new(WeatherCondition::Clear);
        w.temperature_c = Some(34.0);
        let phrases = weather_phrases(&w);
        assert!(phrases.iter().any(|(t, w)| t == "hot summer vibes" && *w == 0.6));
    }

    #[test]
    fn freezing_weather_adds_cold_phrase() {
        let mut w = Weather::new(WeatherCondition::Snow);
        w.temperature_c = Some(-4.0);
        let phrases = weather_phrases(&w);
        assert_eq!(phrases.last().map(|(t, _)| t.as_str()), Some("cold winter"));
    }

    #[test]
    fn place_category_is_normalised() {
        let place = Place {
            name: "Blue Bottle".into(),
            category: Some("Coffee Shop".into()),
        };
        assert_eq!(place_phrases(&place)[0].0, "coffee shop jazz");
    }

    #[test]
    fn unknown_category_falls_back_to_name() {
        let place = Place {
            name: "Old Harbour".into(),
            category: Some("harbour".into()),
        };
        assert_eq!(
            place_phrases(&place),
            vec![("ambience of Old Harbour".to_string(), 0.8)]
        );
    }

    #[test]
    fn nameless_unknown_place_contributes_nothing() {
        let place = Place {
            name: "  ".into(),
            category: None,
        };
        assert!(place_phrases(&place).is_empty());
    }
}
