pub mod class;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod invoker;
pub mod load;
pub mod loopback;
pub mod registry;
pub mod remote;
pub mod serializer;
pub mod service;
pub mod signature;
pub mod store;
pub mod strategy;
pub mod tcp;
pub mod transport;
pub mod types;

pub use diffpack::{Array, Object, Value};
pub use error::{Error, Result};
