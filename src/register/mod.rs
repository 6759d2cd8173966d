//! Register protocol data types: identities, timestamps, wire messages, and
//! quorum bookkeeping shared by replicas and clients.

mod messages;
mod quorum;
mod timestamp;

pub use messages::{
    OperationId, ReadRequest, ReadResponse, RegisterMsg, WriteAck,
    WriteRequest,
};
pub use quorum::{quorum_size, QuorumTracker};
pub use timestamp::Timestamp;

/// Server replica ID type.
pub type ReplicaId = u8;

/// Client ID type; doubles as the writer identity in timestamps.
pub type ClientId = u64;

/// Benchmark run ID type.
pub type RunId = u32;

/// Per-client request ID type, monotonically increasing.
pub type RequestId = u64;

/// Register key type.
pub type Key = u64;

/// Register value type.
pub type Value = u64;
