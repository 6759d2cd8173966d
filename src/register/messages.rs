//! Wire messages exchanged between client coordinators and replicas.

use std::fmt;

use crate::register::{Key, RequestId, RunId, Timestamp, Value};

use serde::{Deserialize, Serialize};

/// Identifies one client operation within a run. Replies are correlated to
/// the in-flight operation by this pair.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize,
)]
pub struct OperationId {
    pub run_id: RunId,
    pub rid: RequestId,
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.rid)
    }
}

/// Client-initiated READ of a register key. Carries no value.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub run_id: RunId,
    pub key: Key,
    pub rid: RequestId,
}

/// A replica's current slot contents for the requested key.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub run_id: RunId,
    pub key: Key,
    pub rid: RequestId,
    pub timestamp: Timestamp,
    pub value: Value,
}

/// Timestamped write; used both for client writes and for the write-back
/// phase of reads.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub run_id: RunId,
    pub key: Key,
    pub rid: RequestId,
    pub timestamp: Timestamp,
    pub value: Value,
}

/// Acknowledgment of a write, sent whether the write was applied or
/// superseded by a newer slot timestamp.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct WriteAck {
    pub run_id: RunId,
    pub key: Key,
    pub rid: RequestId,
}

/// Closed set of register protocol messages.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum RegisterMsg {
    Read(ReadRequest),
    ReadResp(ReadResponse),
    Write(WriteRequest),
    WriteAck(WriteAck),
}

impl RegisterMsg {
    /// Operation this message belongs to.
    pub fn op_id(&self) -> OperationId {
        let (run_id, rid) = match self {
            Self::Read(m) => (m.run_id, m.rid),
            Self::ReadResp(m) => (m.run_id, m.rid),
            Self::Write(m) => (m.run_id, m.rid),
            Self::WriteAck(m) => (m.run_id, m.rid),
        };
        OperationId { run_id, rid }
    }

    /// Register key this message is about.
    pub fn key(&self) -> Key {
        match self {
            Self::Read(m) => m.key,
            Self::ReadResp(m) => m.key,
            Self::Write(m) => m.key,
            Self::WriteAck(m) => m.key,
        }
    }

    /// Whether this is a replica-to-client reply kind.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::ReadResp(_) | Self::WriteAck(_))
    }
}

#[cfg(test)]
mod messages_tests {
    use super::*;

    use rmp_serde::decode::from_slice as decode_from_slice;
    use rmp_serde::encode::to_vec as encode_to_vec;

    #[test]
    fn correlation_fields() {
        let msg = RegisterMsg::ReadResp(ReadResponse {
            run_id: 3,
            key: 11,
            rid: 42,
            timestamp: Timestamp::new(1, 7),
            value: 99,
        });
        assert_eq!(msg.op_id(), OperationId { run_id: 3, rid: 42 });
        assert_eq!(msg.key(), 11);
        assert!(msg.is_reply());
        let read = RegisterMsg::Read(ReadRequest {
            run_id: 3,
            key: 11,
            rid: 43,
        });
        assert!(!read.is_reply());
        assert_ne!(read.op_id(), msg.op_id());
    }

    #[test]
    fn write_survives_wire() {
        let msg = RegisterMsg::Write(WriteRequest {
            run_id: 1,
            key: 5,
            rid: 2,
            timestamp: Timestamp::new(9, 4),
            value: u64::MAX,
        });
        let bytes = encode_to_vec(&msg).unwrap();
        let decoded: RegisterMsg = decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }
}
