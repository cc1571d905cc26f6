//! # Error Definitions
//!
//! Protocol failures on one side, remote failure reports on the other.

use diffpack::Error as PackError;

/// Operational failures of the framing itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying diffpack encoding failed.
    Codec(PackError),
    /// A frame was missing a required field.
    MissingField(&'static str),
    /// An unknown frame, request or failure kind was encountered.
    UnknownVariant(String),
    /// The frame was structurally valid but not what the exchange expected.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::MissingField(name) => write!(f, "missing field: {}", name),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Codec(e) }
}

/// A specialized Result type for framing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of failure a peer reports in a reply.
///
/// These are the remote side's verdicts, as opposed to `Error`, which means
/// the frames themselves could not be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    SignatureParse,
    ArgumentMismatch,
    ReturnTypeMismatch,
    MethodNotFound,
    Invocation,
    Serialization,
    ClassResolution,
    DiffuserNotFound,
    DispatchExhausted,
    ResultLost,
    EmptyEndpointSet,
    Transport,
    /// The request frame could not be understood.
    Protocol,
}

impl FailureKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::SignatureParse => "SignatureParse",
            Self::ArgumentMismatch => "ArgumentMismatch",
            Self::ReturnTypeMismatch => "ReturnTypeMismatch",
            Self::MethodNotFound => "MethodNotFound",
            Self::Invocation => "Invocation",
            Self::Serialization => "Serialization",
            Self::ClassResolution => "ClassResolution",
            Self::DiffuserNotFound => "DiffuserNotFound",
            Self::DispatchExhausted => "DispatchExhausted",
            Self::ResultLost => "ResultLost",
            Self::EmptyEndpointSet => "EmptyEndpointSet",
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        let kind = match tag {
            "SignatureParse" => Self::SignatureParse,
            "ArgumentMismatch" => Self::ArgumentMismatch,
            "ReturnTypeMismatch" => Self::ReturnTypeMismatch,
            "MethodNotFound" => Self::MethodNotFound,
            "Invocation" => Self::Invocation,
            "Serialization" => Self::Serialization,
            "ClassResolution" => Self::ClassResolution,
            "DiffuserNotFound" => Self::DiffuserNotFound,
            "DispatchExhausted" => Self::DispatchExhausted,
            "ResultLost" => Self::ResultLost,
            "EmptyEndpointSet" => Self::EmptyEndpointSet,
            "Transport" => Self::Transport,
            "Protocol" => Self::Protocol,
            other => return Err(Error::UnknownVariant(format!("failure kind: {}", other))),
        };
        Ok(kind)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// The "Err" side of a reply: a failure kind plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}
