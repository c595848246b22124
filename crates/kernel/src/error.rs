/// Errors raised by kernel operations.
///
/// Every variant is raised synchronously by the call that detected it. The
/// kernel never retries and never partially applies an operation that
/// returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("unknown phase: {0}")]
    UnknownPhase(String),
    #[error("entity id already registered by a different handle: {0}")]
    DuplicateId(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid stream name: {0:?}")]
    InvalidStreamName(String),
    #[error("empty range: low {low} is greater than high {high}")]
    EmptyRange { low: i64, high: i64 },
    #[error("invalid phase list: {0}")]
    InvalidPhases(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("CBOR serialization error: {0}")]
    Encode(String),
}
