use std::io;

use crate::resource::resource::ResourceRole;

/// Failure taxonomy of the replication core. None of these is fatal to the process: each one is
///  confined to the connection or link it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// socket level failure - the connection is closed, reconnecting is up to the application
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("connection was closed by the peer")]
    ConnectionClosed,

    /// a delta was received that does not directly follow the replica's current sequence number
    #[error("out-of-order update: expected seq {expected:?}, got {got}")]
    OutOfOrderUpdate {
        /// `None` if the replica has no baseline yet
        expected: Option<u64>,
        got: u64,
    },

    /// the requested backfill range was evicted from the update log, the caller must fall back
    ///  to a full snapshot
    #[error("snapshot required: deltas after seq {requested} are not retained (oldest retained delta is {oldest_retained:?})")]
    SnapshotRequired {
        requested: u64,
        oldest_retained: Option<u64>,
    },

    #[error("malformed frame: {0}")]
    ProtocolDecode(#[source] anyhow::Error),

    #[error("frame of {len} bytes exceeds the maximum frame length of {max} bytes")]
    FrameTooLarge {
        len: usize,
        max: u32,
    },

    #[error("unknown resource {0:?}")]
    UnknownResource(String),

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("delta does not apply to the local replica: {0}")]
    InvalidDelta(String),

    #[error("operation is not valid for resource {name:?} in role {role:?}")]
    WrongRole {
        name: String,
        role: ResourceRole,
    },

    #[error("outbound buffer holds {len} bytes, exceeding the maximum of {max} - the peer does not drain its connection")]
    OutboundBufferFull {
        len: usize,
        max: usize,
    },
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
