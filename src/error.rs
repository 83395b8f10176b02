//! Error taxonomy for the wire client, sweep scheduler and verification driver

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the oracle protocol client and the components built on it.
///
/// Transport errors (`FrameTimeout`, `ProtocolDesync`, `MalformedFrame`,
/// `Decode`) are scoped to one unit of work. `Connection`, `CorruptStream`
/// and `InsufficientBalance` are fatal to the whole run.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },

    #[error("no complete frame within {0:?}")]
    FrameTimeout(Duration),

    #[error("protocol desync: skipped {0} gossip frames without an answer")]
    ProtocolDesync(usize),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("stream framing lost: {0}")]
    CorruptStream(String),

    #[error("insufficient_balance: have {balance} QU, need {required} QU")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("ledger gateway error: {0}")]
    Gateway(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl OracleError {
    /// True for errors that only invalidate the current tick or query id.
    pub fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            OracleError::FrameTimeout(_)
                | OracleError::ProtocolDesync(_)
                | OracleError::MalformedFrame(_)
                | OracleError::Decode(_)
                | OracleError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scoped_errors_exclude_fatal_ones() {
        assert!(OracleError::FrameTimeout(Duration::from_secs(8)).is_unit_scoped());
        assert!(OracleError::ProtocolDesync(10).is_unit_scoped());
        assert!(!OracleError::Cancelled.is_unit_scoped());
        assert!(!OracleError::CorruptStream("bad header".into()).is_unit_scoped());
        assert!(!OracleError::InsufficientBalance {
            balance: 1,
            required: 2
        }
        .is_unit_scoped());
    }

    #[test]
    fn insufficient_balance_message_names_the_reason() {
        let err = OracleError::InsufficientBalance {
            balance: 50,
            required: 130,
        };
        assert!(err.to_string().starts_with("insufficient_balance"));
    }
}
