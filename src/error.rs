use thiserror::Error;

/// Failures surfaced by the consensus engine and its collaborators.
///
/// Malformed datagrams and stale rounds are not errors: they are logged and
/// dropped at the point of receipt.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Subscription on a seqn that has already been garbage-collected.
    #[error("seqn {seqn} is below the retention floor {floor}")]
    TooLate { seqn: i64, floor: i64 },

    #[error("collaborator channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
