//! # Configuration
//!
//! Everything tunable about a node, with a fluent builder that validates on
//! `build()`.

use std::sync::Arc;
use std::time::Duration;

use crate::serializer::PACK;
use crate::store::EvictionPolicy;
use crate::strategy::{EndpointSet, EndpointStrategy, UniformStrategy, WeightedStrategy};

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidThreshold(f64),
    InvalidRedundancy { redundancy: usize, max: usize },
    ZeroPollTimeout,
    ZeroCapacity,
    ZeroWorkers,
    InvalidWeight { endpoint: String, weight: f64 },
    InvalidWeights(String),
    EmptySerializerName,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidThreshold(t) => write!(f, "load threshold must be a finite, positive number, got {}", t),
            Self::InvalidRedundancy { redundancy, max } => {
                write!(f, "redundancy must be between 1 and {}, got {}", max, redundancy)
            }
            Self::ZeroPollTimeout => write!(f, "poll timeout must be non-zero"),
            Self::ZeroCapacity => write!(f, "result capacity must be non-zero"),
            Self::ZeroWorkers => write!(f, "worker count must be non-zero"),
            Self::InvalidWeight { endpoint, weight } => {
                write!(f, "weight of {} must be finite and positive, got {}", endpoint, weight)
            }
            Self::InvalidWeights(msg) => write!(f, "invalid weights: {}", msg),
            Self::EmptySerializerName => write!(f, "serializer name is empty"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrategyKind {
    #[default]
    Uniform,
    Weighted,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Calls run locally while the load estimate is below this.
    pub load_threshold: f64,
    pub endpoints: EndpointSet,
    pub strategy: StrategyKind,
    /// Seeds endpoint selection; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub serializer: String,
    /// Peers raced per remote execution.
    pub redundancy: usize,
    /// Upper bound on concurrent peer setups.
    pub max_redundancy: usize,
    /// How long one result poll waits before moving to the next peer.
    pub poll_timeout: Duration,
    pub result_capacity: usize,
    pub max_workers: usize,
    pub eviction: EvictionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_threshold: 1.0,
            endpoints: EndpointSet::new(),
            strategy: StrategyKind::Uniform,
            seed: None,
            serializer: PACK.to_string(),
            redundancy: 1,
            max_redundancy: 4,
            poll_timeout: Duration::from_millis(500),
            result_capacity: 1024,
            max_workers: 16,
            eviction: EvictionPolicy::Fifo,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { config: Config::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.load_threshold.is_finite() && self.load_threshold > 0.0) {
            return Err(Error::InvalidThreshold(self.load_threshold));
        }
        if self.redundancy == 0 || self.redundancy > self.max_redundancy {
            return Err(Error::InvalidRedundancy { redundancy: self.redundancy, max: self.max_redundancy });
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::ZeroPollTimeout);
        }
        if self.result_capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.max_workers == 0 {
            return Err(Error::ZeroWorkers);
        }
        if self.serializer.is_empty() {
            return Err(Error::EmptySerializerName);
        }
        self.endpoints.validate()
    }

    /// Builds the endpoint strategy this configuration describes.
    pub fn build_strategy(&self) -> Result<Arc<dyn EndpointStrategy>> {
        let endpoints = self.endpoints.clone();
        let strategy: Arc<dyn EndpointStrategy> = match self.strategy {
            StrategyKind::Uniform => Arc::new(UniformStrategy::new(endpoints, self.redundancy, self.seed)),
            StrategyKind::Weighted => Arc::new(WeightedStrategy::new(endpoints, self.redundancy, self.seed)?),
        };
        Ok(strategy)
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn load_threshold(mut self, threshold: f64) -> Self {
        self.config.load_threshold = threshold;
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointSet) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn strategy(mut self, kind: StrategyKind) -> Self {
        self.config.strategy = kind;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.config.serializer = name.into();
        self
    }

    pub fn redundancy(mut self, k: usize) -> Self {
        self.config.redundancy = k;
        self
    }

    pub fn max_redundancy(mut self, max: usize) -> Self {
        self.config.max_redundancy = max;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn result_capacity(mut self, capacity: usize) -> Self {
        self.config.result_capacity = capacity;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn eviction(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction = policy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
