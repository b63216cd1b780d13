//! Geocoding: offense addresses to coordinates.
//!
//! The only latency-bound step of a batch. Calls are strictly sequential
//! with a fixed pause between them (provider rate limit), each bounded by
//! a timeout, and retried a bounded number of times. An address that never
//! resolves is stored with the sentinel coordinate and is not retried on
//! later runs.
//!
//! RULE: a geocoding failure is never fatal. Only the cache (the store)
//! can fail a batch from here.

use crate::{
    config::GeocoderConfig,
    error::{BatchError, BatchResult, GeocodeError},
    event::BatchEvent,
    record::{non_blank, normalize_code, CaseRow},
    store::DashboardStore,
    types::Coordinate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Address → coordinate capability.
pub trait Geocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeError>;
}

// ── Address normalisation ────────────────────────────────────────────────────

/// Canonical form of a comma-separated address: components trimmed,
/// blank and "nan" components dropped, spreadsheet ".0" suffixes removed.
/// `None` if nothing is left.
pub fn normalize_address(raw: &str) -> Option<String> {
    let parts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && !part.eq_ignore_ascii_case("nan"))
        .map(normalize_code)
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Normalised offense address of a case row.
pub fn case_address(row: &CaseRow) -> Option<String> {
    non_blank(&row.offense_address).and_then(normalize_address)
}

// ── LocationIQ client ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

pub struct LocationIqClient {
    http_client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl LocationIqClient {
    pub fn new(config: &GeocoderConfig, api_key: impl Into<String>) -> BatchResult<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("docket-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BatchError::Other(anyhow::anyhow!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
        })
    }

    /// Client keyed from `config.api_key_env`, or `None` if the variable is unset.
    pub fn from_env(config: &GeocoderConfig) -> BatchResult<Option<Self>> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(Self::new(config, key.trim())?)),
            _ => Ok(None),
        }
    }
}

impl Geocoder for LocationIqClient {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeError> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::Timeout
                } else {
                    GeocodeError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GeocodeError::NoMatch);
        }
        if !status.is_success() {
            return Err(GeocodeError::Http(format!("status {status}")));
        }

        let places: Vec<Place> = response
            .json()
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;
        let place = places.first().ok_or(GeocodeError::NoMatch)?;
        let latitude = place
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::Parse(format!("lat '{}': {e}", place.lat)))?;
        let longitude = place
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::Parse(format!("lon '{}': {e}", place.lon)))?;
        Ok(Coordinate::new(latitude, longitude))
    }
}

// ── Cached batch geocoding ───────────────────────────────────────────────────

/// A geocode_cache row. `resolved == false` means `coordinate` is the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedGeocode {
    pub coordinate: Coordinate,
    pub resolved: bool,
    pub attempts: u32,
}

#[derive(Debug, Default)]
pub struct GeocodeOutcome {
    /// Normalised address → coordinate, for resolved addresses only.
    pub coordinates: HashMap<String, Coordinate>,
    /// Addresses holding the sentinel. They are never placed on the map.
    pub unresolved: BTreeSet<String>,
    pub from_cache: usize,
    pub resolved: usize,
    pub ungeocodable: usize,
    /// Addresses left alone because no geocoder was available.
    pub skipped: usize,
    pub events: Vec<BatchEvent>,
}

impl GeocodeOutcome {
    fn record(&mut self, address: &str, entry: &CachedGeocode) {
        if entry.resolved {
            self.coordinates.insert(address.to_string(), entry.coordinate);
        } else {
            self.unresolved.insert(address.to_string());
        }
    }
}

/// Retries are only worth it for transport failures.
fn is_retryable(err: &GeocodeError) -> bool {
    matches!(err, GeocodeError::Timeout | GeocodeError::Http(_))
}

/// Resolve `addresses` through the cache, calling `geocoder` for the rest.
///
/// Addresses are processed in sorted order. With no geocoder, uncached
/// addresses are skipped and stay uncached.
pub fn geocode_addresses(
    geocoder: Option<&dyn Geocoder>,
    store: &DashboardStore,
    config: &GeocoderConfig,
    addresses: &BTreeSet<String>,
) -> BatchResult<GeocodeOutcome> {
    let mut outcome = GeocodeOutcome::default();
    let delay = Duration::from_millis(config.delay_ms);
    let mut calls_made = 0u64;

    for address in addresses {
        if let Some(cached) = store.cached_geocode(address)? {
            outcome.record(address, &cached);
            outcome.from_cache += 1;
            continue;
        }
        let Some(geocoder) = geocoder else {
            outcome.skipped += 1;
            continue;
        };

        let mut attempts = 0u32;
        let mut last_error = GeocodeError::NoMatch;
        let mut found = None;
        while attempts < config.max_attempts {
            if calls_made > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            calls_made += 1;
            attempts += 1;
            match geocoder.geocode(address) {
                Ok(point) => {
                    found = Some(point);
                    break;
                }
                Err(e) => {
                    log::debug!("geocode '{address}' attempt {attempts}: {e}");
                    let retry = is_retryable(&e);
                    last_error = e;
                    if !retry {
                        break;
                    }
                }
            }
        }

        let entry = match found {
            Some(point) => {
                outcome.resolved += 1;
                outcome.events.push(BatchEvent::AddressGeocoded {
                    address: address.clone(),
                    latitude: point.latitude,
                    longitude: point.longitude,
                    attempts,
                });
                CachedGeocode { coordinate: point, resolved: true, attempts }
            }
            None => {
                log::warn!("ungeocodable address '{address}' after {attempts} attempt(s): {last_error}");
                outcome.ungeocodable += 1;
                outcome.events.push(BatchEvent::AddressUngeocodable {
                    address: address.clone(),
                    attempts,
                    last_error: last_error.to_string(),
                });
                CachedGeocode { coordinate: config.sentinel, resolved: false, attempts }
            }
        };
        store.put_geocode(address, &entry)?;
        outcome.record(address, &entry);
    }

    log::info!(
        "geocoding: {} cached, {} resolved, {} ungeocodable, {} skipped",
        outcome.from_cache,
        outcome.resolved,
        outcome.ungeocodable,
        outcome.skipped,
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_drop_blank_parts_and_spreadsheet_decimals() {
        assert_eq!(
            normalize_address("415 E 12th St, , Kansas City, MO, 64106.0").as_deref(),
            Some("415 E 12th St, Kansas City, MO, 64106"),
        );
        assert_eq!(normalize_address(" , nan, ").as_deref(), None);
    }

    #[test]
    fn only_transport_failures_are_retried() {
        assert!(is_retryable(&GeocodeError::Timeout));
        assert!(is_retryable(&GeocodeError::Http("502".into())));
        assert!(!is_retryable(&GeocodeError::NoMatch));
        assert!(!is_retryable(&GeocodeError::Parse("x".into())));
    }
}
