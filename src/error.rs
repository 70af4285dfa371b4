//! Error types for the engagement core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngagementError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or one-way invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record exists but is in the wrong lifecycle stage.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any backend failure. Only some of these are worth retrying; see
    /// [`EngagementError::is_transient`]. Never retried here.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngagementError {
    /// Whether the caller may simply re-invoke the operation.
    ///
    /// Connection and pool failures, lock-wait timeouts, serialization
    /// failures and deadlocks qualify. Decode errors and constraint
    /// violations do not: retrying them fails the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            EngagementError::Storage(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

/// lock_not_available, serialization_failure, deadlock_detected
const TRANSIENT_SQLSTATES: [&str; 3] = ["55P03", "40001", "40P01"];

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_SQLSTATES.contains(&&*code))
            .unwrap_or(false),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, EngagementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_transient() {
        assert!(EngagementError::Storage(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!EngagementError::Conflict("code already used".into()).is_transient());
        assert!(!EngagementError::NotFound("application".into()).is_transient());
    }

    #[test]
    fn connection_failures_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(EngagementError::Storage(sqlx::Error::Io(io)).is_transient());
        assert!(EngagementError::Storage(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn decode_and_lookup_failures_are_permanent() {
        assert!(!EngagementError::Storage(sqlx::Error::ColumnNotFound("tier".into())).is_transient());
        assert!(!EngagementError::Storage(sqlx::Error::RowNotFound).is_transient());
        let decode: Box<dyn std::error::Error + Send + Sync> = "unknown status".into();
        assert!(!EngagementError::Storage(sqlx::Error::Decode(decode)).is_transient());
    }
}
