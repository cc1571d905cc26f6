//! Tests for Config builder validation

use std::sync::Arc;
use std::time::Duration;

use diffuse::config::{Config, Error, StrategyKind};
use diffuse::context::Context;
use diffuse::dispatcher::Dispatcher;
use diffuse::remote::PeerTable;
use diffuse::store::EvictionPolicy;
use diffuse::strategy::{EndpointSet, EndpointStrategy};

// --- Happy Path Tests ---

#[test]
fn test_full_builder() {
    let config = Config::builder()
        .load_threshold(0.75)
        .endpoints(EndpointSet::new().with_weight("a:7100", 2.0).with("b:7100"))
        .strategy(StrategyKind::Weighted)
        .seed(9)
        .serializer("json")
        .redundancy(3)
        .max_redundancy(3)
        .poll_timeout(Duration::from_millis(20))
        .result_capacity(8)
        .max_workers(2)
        .eviction(EvictionPolicy::PreferRetrieved)
        .build()
        .expect("valid config");

    assert_eq!(config.redundancy, 3);
    assert_eq!(config.endpoints.len(), 2);
    let strategy = config.build_strategy().expect("weighted strategy");
    assert_eq!(strategy.select().expect("draw").len(), 3);
}

#[test]
fn test_small_threshold_is_allowed() {
    assert!(Config::builder().load_threshold(0.01).build().is_ok());
}

// --- Rejections ---

#[test]
fn test_bad_threshold() {
    assert!(matches!(Config::builder().load_threshold(0.0).build(), Err(Error::InvalidThreshold(_))));
    assert!(matches!(Config::builder().load_threshold(-1.0).build(), Err(Error::InvalidThreshold(_))));
    assert!(matches!(Config::builder().load_threshold(f64::NAN).build(), Err(Error::InvalidThreshold(_))));
}

#[test]
fn test_redundancy_bounds() {
    assert!(matches!(
        Config::builder().redundancy(0).build(),
        Err(Error::InvalidRedundancy { redundancy: 0, .. })
    ));
    assert!(matches!(
        Config::builder().redundancy(5).max_redundancy(4).build(),
        Err(Error::InvalidRedundancy { redundancy: 5, max: 4 })
    ));
}

#[test]
fn test_zero_sizes() {
    assert_eq!(Config::builder().poll_timeout(Duration::ZERO).build().unwrap_err(), Error::ZeroPollTimeout);
    assert_eq!(Config::builder().result_capacity(0).build().unwrap_err(), Error::ZeroCapacity);
    assert_eq!(Config::builder().max_workers(0).build().unwrap_err(), Error::ZeroWorkers);
    assert_eq!(Config::builder().serializer("").build().unwrap_err(), Error::EmptySerializerName);
}

#[test]
fn test_bad_weights() {
    let endpoints = EndpointSet::new().with_weight("a", 1.0).with_weight("b", 0.0);
    let err = Config::builder().endpoints(endpoints).build().unwrap_err();
    assert!(matches!(err, Error::InvalidWeight { ref endpoint, .. } if endpoint == "b"));
}

#[test]
fn test_dispatcher_revalidates() {
    let mut config = Config::default();
    config.redundancy = 0;
    let result = Dispatcher::new(Context::new(), &config, Arc::new(PeerTable::new()));
    assert!(matches!(result, Err(Error::InvalidRedundancy { .. })));
}
