use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{GeocodeError, Geocoder};
use crate::scraper::Coordinates;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Google Geocoding API client.
pub struct GoogleGeocoder {
    http: reqwest::Client,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: String) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("comercios_etl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, api_key })
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    status: String,
    #[serde(default)]
    results: Vec<ResponseResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

fn interpret(response: Response) -> Result<Coordinates, GeocodeError> {
    match response.status.as_str() {
        "OK" => response
            .results
            .into_iter()
            .next()
            .map(|r| Coordinates {
                lat: r.geometry.location.lat,
                lng: r.geometry.location.lng,
            })
            .ok_or(GeocodeError::NotFound),
        "ZERO_RESULTS" => Err(GeocodeError::NotFound),
        "UNKNOWN_ERROR" => Err(GeocodeError::Connection("provider reported UNKNOWN_ERROR".into())),
        other => Err(GeocodeError::Provider(match response.error_message {
            Some(msg) => format!("{other}: {msg}"),
            None => other.to_string(),
        })),
    }
}

fn classify(err: reqwest::Error) -> GeocodeError {
    if err.is_timeout() {
        GeocodeError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        GeocodeError::Connection(err.to_string())
    } else if err.status().is_some_and(|s| s.is_server_error()) {
        GeocodeError::Connection(err.to_string())
    } else {
        GeocodeError::Provider(err.to_string())
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, query: &str, timeout: Duration) -> Result<Coordinates, GeocodeError> {
        let response: Response = self
            .http
            .get(GEOCODE_URL)
            .query(&[("address", query), ("key", self.api_key.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?
            .json()
            .await
            .map_err(classify)?;
        interpret(response)
    }
}
