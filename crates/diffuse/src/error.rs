//! # Error taxonomy
//!
//! One `Error` for the whole engine. It is `Clone` because a failed invocation
//! is stored in a result handle and may be handed to several waiters.

use diffrpc::Failure;
use diffrpc::FailureKind;

use crate::signature::ParseError;
use crate::transport::TransportError;

/// A failed attempt against one peer, kept for the exhaustion report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub peer: String,
    pub kind: FailureKind,
    pub message: String,
}

impl PeerFailure {
    pub fn new(peer: impl Into<String>, error: &Error) -> Self {
        Self { peer: peer.into(), kind: error.kind(), message: error.to_string() }
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    SignatureParse(ParseError),
    /// Argument count or argument types do not match the declared ones.
    ArgumentMismatch { signature: String, detail: String },
    ReturnTypeMismatch { signature: String, expected: String, found: String },
    MethodNotFound { class: String, method: String, arg_types: Vec<String> },
    /// The invoked method itself failed.
    Invocation { signature: String, message: String },
    Serialization { serializer: String, message: String },
    ClassResolution { class: String, tried: Vec<String> },
    DiffuserNotFound { signature: String },
    DispatchExhausted { signature: String, failures: Vec<PeerFailure> },
    ResultLost { signature: String, request_id: String },
    EmptyEndpointSet,
    Transport { peer: String, error: TransportError },
    /// A peer answered with frames we could not make sense of.
    Protocol { peer: String, message: String },
    /// A peer reported a failure of its own.
    Remote { peer: String, kind: FailureKind, message: String },
}

impl Error {
    /// The wire-level kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SignatureParse(_) => FailureKind::SignatureParse,
            Self::ArgumentMismatch { .. } => FailureKind::ArgumentMismatch,
            Self::ReturnTypeMismatch { .. } => FailureKind::ReturnTypeMismatch,
            Self::MethodNotFound { .. } => FailureKind::MethodNotFound,
            Self::Invocation { .. } => FailureKind::Invocation,
            Self::Serialization { .. } => FailureKind::Serialization,
            Self::ClassResolution { .. } => FailureKind::ClassResolution,
            Self::DiffuserNotFound { .. } => FailureKind::DiffuserNotFound,
            Self::DispatchExhausted { .. } => FailureKind::DispatchExhausted,
            Self::ResultLost { .. } => FailureKind::ResultLost,
            Self::EmptyEndpointSet => FailureKind::EmptyEndpointSet,
            Self::Transport { .. } => FailureKind::Transport,
            Self::Protocol { .. } => FailureKind::Protocol,
            Self::Remote { kind, .. } => *kind,
        }
    }

    /// The form in which this error is reported to a remote caller.
    pub fn to_failure(&self) -> Failure {
        match self {
            // don't nest "remote failure" prefixes across hops
            Self::Remote { kind, message, .. } => Failure::new(*kind, message.clone()),
            other => Failure::new(other.kind(), other.to_string()),
        }
    }

    pub(crate) fn serialization(serializer: &str, message: impl std::fmt::Display) -> Self {
        Self::Serialization { serializer: serializer.to_string(), message: message.to_string() }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignatureParse(e) => write!(f, "{}", e),
            Self::ArgumentMismatch { signature, detail } => {
                write!(f, "argument mismatch for {}: {}", signature, detail)
            }
            Self::ReturnTypeMismatch { signature, expected, found } => {
                write!(f, "return type mismatch for {}: expected {}, found {}", signature, expected, found)
            }
            Self::MethodNotFound { class, method, arg_types } => {
                write!(f, "no method {}({}) on {}", method, arg_types.join(","), class)
            }
            Self::Invocation { signature, message } => write!(f, "{} raised: {}", signature, message),
            Self::Serialization { serializer, message } => {
                write!(f, "serializer '{}' failed: {}", serializer, message)
            }
            Self::ClassResolution { class, tried } => {
                write!(f, "cannot resolve class {} (local, {})", class, tried.join(", "))
            }
            Self::DiffuserNotFound { signature } => write!(f, "no diffuser for {}", signature),
            Self::DispatchExhausted { signature, failures } => {
                write!(f, "all peers failed for {}", signature)?;
                for failure in failures {
                    write!(f, "; {}: {}", failure.peer, failure.message)?;
                }
                Ok(())
            }
            Self::ResultLost { signature, request_id } => {
                write!(f, "no result for {} request {}", signature, request_id)
            }
            Self::EmptyEndpointSet => write!(f, "cannot select from an empty endpoint set"),
            Self::Transport { peer, error } => write!(f, "transport to {} failed: {}", peer, error),
            Self::Protocol { peer, message } => write!(f, "protocol error with {}: {}", peer, message),
            Self::Remote { peer, kind, message } => write!(f, "{} reported {}: {}", peer, kind, message),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::SignatureParse(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
