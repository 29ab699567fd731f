//! Relay error taxonomy

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use thiserror::Error;

use crate::feed::FeedId;

/// Coarse error classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RecordNotInitialized,
    NetworkUnavailable,
    FeedNotFound,
    DecodeError,
    PrecisionOverflow,
    InvalidRequest,
    SubmissionRejected,
    TransactionTooLarge,
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("price record {0} has never been posted")]
    RecordNotInitialized(Pubkey),

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("no price update available for feed {0}")]
    FeedNotFound(FeedId),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("price {mantissa} * 10^{exponent} exceeds decimal precision")]
    PrecisionOverflow { mantissa: i128, exponent: i32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("operation group needs {instructions} instructions / {bytes} bytes, unit limit is {max_instructions} / {max_bytes}")]
    TransactionTooLarge {
        instructions: usize,
        bytes: usize,
        max_instructions: usize,
        max_bytes: usize,
    },

    #[error("deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecordNotInitialized(_) => ErrorKind::RecordNotInitialized,
            Self::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            Self::FeedNotFound(_) => ErrorKind::FeedNotFound,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::PrecisionOverflow { .. } => ErrorKind::PrecisionOverflow,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            Self::TransactionTooLarge { .. } => ErrorKind::TransactionTooLarge,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    pub(crate) fn decode(msg: impl fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    pub(crate) fn network(msg: impl fmt::Display) -> Self {
        Self::NetworkUnavailable(msg.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Orchestration stage at which a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FreshnessCheck,
    Fetch,
    Compose,
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FreshnessCheck => "freshness-check",
            Stage::Fetch => "fetch",
            Stage::Compose => "compose",
            Stage::Submit => "submit",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a relay run
///
/// `landed` holds the signatures of execution units that were already
/// confirmed before the failing one, so a caller can tell "update posted,
/// read failed" apart from "nothing happened". `in_flight` is the failing
/// unit itself when it was broadcast but its outcome is unknown.
#[derive(Debug, Error)]
#[error("relay failed at {stage}: {error}")]
pub struct RelayFailure {
    pub stage: Stage,
    #[source]
    pub error: RelayError,
    pub landed: Vec<Signature>,
    pub in_flight: Option<Signature>,
}

impl RelayFailure {
    pub fn new(stage: Stage, error: RelayError) -> Self {
        Self {
            stage,
            error,
            landed: Vec::new(),
            in_flight: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Some units executed, or may have, before the failure
    pub fn is_partial(&self) -> bool {
        !self.landed.is_empty() || self.in_flight.is_some()
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
