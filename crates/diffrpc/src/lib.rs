//! # DiffRPC
//!
//! The frames exchanged between a dispatching caller and a peer hosting
//! diffusers, encoded with `diffpack`.
//!
//! ## Architecture
//!
//! Every exchange is one request frame answered by one reply frame, correlated
//! by a `seq` number. Requests mirror the diffuser wire surface: create,
//! execute, status, result, delete, plus class lookup for peers that need a
//! class they cannot resolve locally. Payloads that belong to a serializer
//! (arguments, targets, results, class bytes) travel as opaque blobs.

pub mod error;
pub mod frame;

pub use error::Error;
pub use error::Failure;
pub use error::FailureKind;
pub use error::Result;
pub use frame::Reply;
pub use frame::ReplyFrame;
pub use frame::Request;
pub use frame::RequestFrame;
pub use frame::decode_seq;
