//! Google Places lookup for coordinate-based place context.
//!
//! [`PlaceClient::locate`] asks the Places Nearby Search API for the closest
//! named place and falls back to the Geocoding API's neighbourhood or city
//! when nothing notable is close by.  Both endpoints take the key from
//! `place.api_key` or `GOOGLE_API_KEY`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PlaceConfig;
use crate::context::Place;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const NEARBY_URL: &str = "https://places.googleapis.com/v1/places:searchNearby";
const NEARBY_FIELD_MASK: &str = "places.displayName,places.primaryType,places.types";

// ---------------------------------------------------------------------------
// PlaceError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("place lookups are disabled in settings")]
    Disabled,

    #[error("no Google API key: set place.api_key or GOOGLE_API_KEY")]
    MissingKey,

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("place request timed out")]
    Timeout,

    #[error("geocoding returned status {0}")]
    Status(String),

    #[error("nothing found near ({0:.4}, {1:.4})")]
    NotFound(f64, f64),

    #[error("failed to parse place response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for PlaceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PlaceError::Timeout
        } else if e.is_decode() {
            PlaceError::Parse(e.to_string())
        } else {
            PlaceError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearbyRequest {
    max_result_count: u32,
    location_restriction: LocationRestriction,
}

#[derive(Debug, Serialize)]
struct LocationRestriction {
    circle: Circle,
}

#[derive(Debug, Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Debug, Serialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Default, Deserialize)]
struct NearbyResponse {
    #[serde(default)]
    places: Vec<NearbyPlace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyPlace {
    display_name: Option<LocalizedText>,
    primary_type: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl NearbyResponse {
    /// The first result with a non-empty display name.
    fn nearest(self) -> Option<Place> {
        self.places.into_iter().find_map(|p| {
            let name = p.display_name.map(|n| n.text.trim().to_string())?;
            if name.is_empty() {
                return None;
            }
            let category = p.primary_type.or_else(|| p.types.into_iter().next());
            Some(Place { name, category })
        })
    }
}

impl GeocodeResponse {
    /// The most specific area name: neighbourhood, then city, then region,
    /// then the formatted address.
    fn area(self) -> Result<Option<Place>, PlaceError> {
        match self.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            other => return Err(PlaceError::Status(other.to_string())),
        }
        let Some(first) = self.results.into_iter().next() else {
            return Ok(None);
        };
        for kind in ["neighborhood", "locality", "administrative_area_level_1"] {
            if let Some(component) = first
                .address_components
                .iter()
                .find(|c| c.types.iter().any(|t| t == kind))
            {
                return Ok(Some(Place {
                    name: component.long_name.clone(),
                    category: Some(kind.to_string()),
                }));
            }
        }
        let address = first.formatted_address.trim();
        Ok((!address.is_empty()).then(|| Place {
            name: address.to_string(),
            category: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// PlaceClient
// ---------------------------------------------------------------------------

/// Async client for the Google Places and Geocoding endpoints.
pub struct PlaceClient {
    client: reqwest::Client,
    api_key: Option<String>,
    enabled: bool,
    radius_m: f64,
}

impl PlaceClient {
    /// Build a client with the key from `config` or `GOOGLE_API_KEY`.
    pub fn from_config(config: &PlaceConfig) -> Self {
        Self::with_api_key(config, config.resolved_api_key())
    }

    /// Build a client with an explicit key (`None` disables lookups).
    pub fn with_api_key(config: &PlaceConfig, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key,
            enabled: config.enabled,
            radius_m: config.radius_m,
        }
    }

    fn key(&self) -> Result<&str, PlaceError> {
        if !self.enabled {
            return Err(PlaceError::Disabled);
        }
        self.api_key.as_deref().ok_or(PlaceError::MissingKey)
    }

    /// Closest named place within the configured radius.
    pub async fn nearby(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, PlaceError> {
        let key = self.key()?;
        let body = NearbyRequest {
            max_result_count: 3,
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: LatLng {
                        latitude,
                        longitude,
                    },
                    radius: self.radius_m,
                },
            },
        };
        let response: NearbyResponse = self
            .client
            .post(NEARBY_URL)
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", NEARBY_FIELD_MASK)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.nearest())
    }

    /// Neighbourhood or city containing the coordinates.
    pub async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Place>, PlaceError> {
        let key = self.key()?;
        let response: GeocodeResponse = self
            .client
            .get(GEOCODE_URL)
            .query(&[("latlng", format!("{latitude},{longitude}")), ("key", key.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.area()
    }

    /// Nearby place if there is one, otherwise the surrounding area.
    pub async fn locate(&self, latitude: f64, longitude: f64) -> Result<Place, PlaceError> {
        let place = match self.nearby(latitude, longitude).await {
            Ok(Some(place)) => Some(place),
            Ok(None) => None,
            Err(e @ (PlaceError::Disabled | PlaceError::MissingKey)) => return Err(e),
            Err(e) => {
                log::warn!("place: nearby search failed ({e}); trying reverse geocoding");
                None
            }
        };
        let place = match place {
            Some(place) => place,
            None => self
                .reverse_geocode(latitude, longitude)
                .await?
                .ok_or(PlaceError::NotFound(latitude, longitude))?,
        };
        log::info!(
            "place: ({latitude:.4}, {longitude:.4}) → {} [{}]",
            place.name,
            place.category.as_deref().unwrap_or("-")
        );
        Ok(place)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_picks_first_named_place_and_primary_type() {
        let json = r#"{"places":[
            {"displayName":{"text":"  "},"primaryType":"route"},
            {"displayName":{"text":"Hyde Park","languageCode":"en"},
             "primaryType":"park","types":["park","tourist_attraction"]},
            {"displayName":{"text":"Serpentine Bar"},"primaryType":"bar"}
        ]}"#;
        let parsed: NearbyResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(
            parsed.nearest(),
            Some(Place {
                name: "Hyde Park".into(),
                category: Some("park".into())
            })
        );
    }

    #[test]
    fn nearby_falls_back_to_first_type() {
        let json = r#"{"places":[{"displayName":{"text":"Corner Shop"},"types":["store"]}]}"#;
        let parsed: NearbyResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.nearest().unwrap().category.as_deref(), Some("store"));

        let empty: NearbyResponse = serde_json::from_str("{}").expect("parse");
        assert!(empty.nearest().is_none());
    }

    #[test]
    fn geocode_prefers_neighbourhood_then_city() {
        let json = r#"{"status":"OK","results":[{
            "formatted_address":"Alfama, 1100 Lisboa, Portugal",
            "address_components":[
                {"long_name":"Lisboa","short_name":"Lisboa","types":["locality","political"]},
                {"long_name":"Alfama","short_name":"Alfama","types":["neighborhood","political"]}
            ]}]}"#;
        let parsed: GeocodeResponse = serde_json::from_str(json).expect("parse");
        let place = parsed.area().unwrap().unwrap();
        assert_eq!(place.name, "Alfama");
        assert_eq!(place.category.as_deref(), Some("neighborhood"));

        let json = r#"{"status":"OK","results":[{"formatted_address":"Middle of nowhere"}]}"#;
        let parsed: GeocodeResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(
            parsed.area().unwrap(),
            Some(Place {
                name: "Middle of nowhere".into(),
                category: None
            })
        );
    }

    #[test]
    fn geocode_status_is_checked() {
        let parsed: GeocodeResponse =
            serde_json::from_str(r#"{"status":"ZERO_RESULTS","results":[]}"#).expect("parse");
        assert_eq!(parsed.area().unwrap(), None);

        let parsed: GeocodeResponse =
            serde_json::from_str(r#"{"status":"REQUEST_DENIED"}"#).expect("parse");
        assert!(matches!(parsed.area(), Err(PlaceError::Status(s)) if s == "REQUEST_DENIED"));
    }

    #[test]
    fn nearby_request_uses_places_field_names() {
        let body = NearbyRequest {
            max_result_count: 3,
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: LatLng {
                        latitude: 51.5,
                        longitude: -0.16,
                    },
                    radius: 100.0,
                },
            },
        };
        let value = serde_json::to_value(&body).expect("serialise");
        assert_eq!(value["maxResultCount"], 3);
        assert_eq!(value["locationRestriction"]["circle"]["center"]["latitude"], 51.5);
        assert_eq!(value["locationRestriction"]["circle"]["radius"], 100.0);
    }

    #[tokio::test]
    async fn lookups_need_a_key_and_enabled_setting() {
        let client = PlaceClient::with_api_key(&PlaceConfig::default(), None);
        assert!(matches!(
            client.locate(51.5, -0.16).await,
            Err(PlaceError::MissingKey)
        ));

        let config = PlaceConfig {
            enabled: false,
            ..PlaceConfig::default()
        };
        let client = PlaceClient::with_api_key(&config, Some("key".into()));
        assert!(matches!(
            client.locate(51.5, -0.16).await,
            Err(PlaceError::Disabled)
        ));
    }
}
