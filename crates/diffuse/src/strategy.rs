//! # Endpoint selection
//!
//! A strategy draws `redundancy` peers from an endpoint set for each remote
//! execution. Draws are independent, so the same peer may come up more than once.

use std::sync::Mutex;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config;
use crate::error::{Error, Result};

/// The address of a peer, as understood by a [`crate::remote::PeerConnector`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Candidate peers with their selection weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointSet {
    entries: Vec<(Endpoint, f64)>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer with weight 1.
    pub fn with(self, endpoint: impl Into<Endpoint>) -> Self {
        self.with_weight(endpoint, 1.0)
    }

    pub fn with_weight(mut self, endpoint: impl Into<Endpoint>, weight: f64) -> Self {
        self.entries.push((endpoint.into(), weight));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Endpoint, f64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The set in wire form.
    pub fn to_pairs(&self) -> Vec<(String, f64)> {
        self.entries.iter().map(|(e, w)| (e.address().to_string(), *w)).collect()
    }

    pub fn from_pairs(pairs: Vec<(String, f64)>) -> Self {
        Self { entries: pairs.into_iter().map(|(a, w)| (Endpoint(a), w)).collect() }
    }

    /// Every weight must be finite and strictly positive.
    pub fn validate(&self) -> std::result::Result<(), config::Error> {
        match self.entries.iter().find(|(_, w)| !(w.is_finite() && *w > 0.0)) {
            Some((endpoint, weight)) => {
                Err(config::Error::InvalidWeight { endpoint: endpoint.to_string(), weight: *weight })
            }
            None => Ok(()),
        }
    }
}

pub trait EndpointStrategy: Send + Sync + 'static {
    /// Draws the peers for one execution.
    ///
    /// # Errors
    /// `Error::EmptyEndpointSet` when there is nothing to draw from.
    fn select(&self) -> Result<Vec<Endpoint>>;

    fn endpoints(&self) -> &EndpointSet;

    fn is_empty(&self) -> bool {
        self.endpoints().is_empty()
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

/// Every peer equally likely.
pub struct UniformStrategy {
    endpoints: EndpointSet,
    redundancy: usize,
    rng: Mutex<StdRng>,
}

impl UniformStrategy {
    pub fn new(endpoints: EndpointSet, redundancy: usize, seed: Option<u64>) -> Self {
        Self { endpoints, redundancy, rng: Mutex::new(rng_from(seed)) }
    }
}

impl EndpointStrategy for UniformStrategy {
    fn select(&self) -> Result<Vec<Endpoint>> {
        let len = self.endpoints.len();
        if len == 0 {
            return Err(Error::EmptyEndpointSet);
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Ok((0..self.redundancy).map(|_| self.endpoints.entries[rng.gen_range(0..len)].0.clone()).collect())
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }
}

/// Peers drawn in proportion to their weight.
pub struct WeightedStrategy {
    endpoints: EndpointSet,
    index: Option<WeightedIndex<f64>>,
    redundancy: usize,
    rng: Mutex<StdRng>,
}

impl WeightedStrategy {
    pub fn new(endpoints: EndpointSet, redundancy: usize, seed: Option<u64>) -> std::result::Result<Self, config::Error> {
        endpoints.validate()?;
        let index = if endpoints.is_empty() {
            None
        } else {
            let weights = endpoints.iter().map(|(_, w)| *w);
            Some(WeightedIndex::new(weights).map_err(|e| config::Error::InvalidWeights(e.to_string()))?)
        };
        Ok(Self { endpoints, index, redundancy, rng: Mutex::new(rng_from(seed)) })
    }
}

impl EndpointStrategy for WeightedStrategy {
    fn select(&self) -> Result<Vec<Endpoint>> {
        let index = self.index.as_ref().ok_or(Error::EmptyEndpointSet)?;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Ok((0..self.redundancy).map(|_| self.endpoints.entries[index.sample(&mut *rng)].0.clone()).collect())
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }
}
