//! Integration tests for cached batch geocoding.
//!
//! A scripted geocoder stands in for the HTTP client so retry, sentinel
//! and cache behaviour can be checked without a network.

use docket_core::{
    config::{BatchConfig, GeocoderConfig},
    error::GeocodeError,
    event::BatchEvent,
    geocode::{geocode_addresses, CachedGeocode, Geocoder},
    store::DashboardStore,
    types::Coordinate,
};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// Replays a fixed list of answers per address, then repeats the last one.
struct ScriptedGeocoder {
    script: HashMap<String, Vec<Result<Coordinate, GeocodeError>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedGeocoder {
    fn new() -> Self {
        Self {
            script: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    fn answer(mut self, address: &str, answers: Vec<Result<Coordinate, GeocodeError>>) -> Self {
        self.script.insert(address.to_string(), answers);
        self
    }

    fn calls_for(&self, address: &str) -> usize {
        self.calls.borrow().iter().filter(|a| *a == address).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Geocoder for ScriptedGeocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeError> {
        let n = self.calls_for(address);
        self.calls.borrow_mut().push(address.to_string());
        match self.script.get(address) {
            Some(answers) if !answers.is_empty() => answers[n.min(answers.len() - 1)].clone(),
            _ => Err(GeocodeError::NoMatch),
        }
    }
}

fn store() -> DashboardStore {
    let store = DashboardStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn config() -> GeocoderConfig {
    BatchConfig::default_test().geocoder
}

fn addresses(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

const HOME: Coordinate = Coordinate { latitude: 39.0997, longitude: -94.5786 };

#[test]
fn resolved_addresses_are_cached() {
    let store = store();
    let geocoder = ScriptedGeocoder::new().answer("1 Main St", vec![Ok(HOME)]);
    let outcome = geocode_addresses(Some(&geocoder), &store, &config(), &addresses(&["1 Main St"])).unwrap();

    assert_eq!(outcome.resolved, 1);
    assert_eq!(outcome.coordinates["1 Main St"], HOME);
    assert_eq!(
        store.cached_geocode("1 Main St").unwrap(),
        Some(CachedGeocode { coordinate: HOME, resolved: true, attempts: 1 })
    );
    assert!(matches!(outcome.events[0], BatchEvent::AddressGeocoded { attempts: 1, .. }));
}

#[test]
fn timeouts_are_retried_up_to_the_attempt_limit() {
    let store = store();
    let cfg = config();
    let geocoder = ScriptedGeocoder::new().answer("2 Oak St", vec![Err(GeocodeError::Timeout)]);
    let outcome = geocode_addresses(Some(&geocoder), &store, &cfg, &addresses(&["2 Oak St"])).unwrap();

    assert_eq!(geocoder.calls_for("2 Oak St"), cfg.max_attempts as usize);
    assert_eq!(outcome.ungeocodable, 1);
    assert!(outcome.unresolved.contains("2 Oak St"));
    assert!(!outcome.coordinates.contains_key("2 Oak St"), "the sentinel is never handed out");

    let cached = store.cached_geocode("2 Oak St").unwrap().expect("sentinel cached");
    assert!(!cached.resolved);
    assert_eq!(cached.coordinate, cfg.sentinel);
    match &outcome.events[0] {
        BatchEvent::AddressUngeocodable { attempts, last_error, .. } => {
            assert_eq!(*attempts, cfg.max_attempts);
            assert_eq!(last_error, "geocoder timed out");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn a_transient_failure_then_success_resolves() {
    let store = store();
    let geocoder = ScriptedGeocoder::new().answer(
        "3 Elm St",
        vec![Err(GeocodeError::Http("status 502".into())), Ok(HOME)],
    );
    let outcome = geocode_addresses(Some(&geocoder), &store, &config(), &addresses(&["3 Elm St"])).unwrap();

    assert_eq!(outcome.resolved, 1);
    assert_eq!(geocoder.calls_for("3 Elm St"), 2);
    assert_eq!(store.cached_geocode("3 Elm St").unwrap().map(|c| c.attempts), Some(2));
}

#[test]
fn no_match_is_not_retried() {
    let store = store();
    let geocoder = ScriptedGeocoder::new();
    let outcome = geocode_addresses(Some(&geocoder), &store, &config(), &addresses(&["Nowhere"])).unwrap();

    assert_eq!(geocoder.calls_for("Nowhere"), 1);
    assert_eq!(outcome.ungeocodable, 1);
}

#[test]
fn cached_addresses_make_no_calls_even_when_ungeocodable() {
    let store = store();
    let cfg = config();
    let first = ScriptedGeocoder::new().answer("1 Main St", vec![Ok(HOME)]);
    let wanted = addresses(&["1 Main St", "Nowhere"]);
    geocode_addresses(Some(&first), &store, &cfg, &wanted).unwrap();
    assert_eq!(store.geocode_cache_size().unwrap(), 2);

    let second = ScriptedGeocoder::new();
    let outcome = geocode_addresses(Some(&second), &store, &cfg, &wanted).unwrap();
    assert_eq!(second.total_calls(), 0);
    assert_eq!(outcome.from_cache, 2);
    assert_eq!(outcome.coordinates["1 Main St"], HOME);
    assert!(outcome.unresolved.contains("Nowhere"));
    assert!(!outcome.coordinates.contains_key("Nowhere"));
    assert!(outcome.events.is_empty());
}

#[test]
fn without_a_geocoder_only_the_cache_is_used() {
    let store = store();
    store
        .put_geocode("1 Main St", &CachedGeocode { coordinate: HOME, resolved: true, attempts: 1 })
        .unwrap();
    let outcome = geocode_addresses(None, &store, &config(), &addresses(&["1 Main St", "2 Oak St"])).unwrap();

    assert_eq!(outcome.from_cache, 1);
    assert_eq!(outcome.skipped, 1);
    assert!(!outcome.coordinates.contains_key("2 Oak St"));
    assert!(outcome.unresolved.is_empty());
    assert_eq!(store.cached_geocode("2 Oak St").unwrap(), None, "skipped addresses stay uncached");
}
