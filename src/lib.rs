//! Atomreg core library crate: a quorum-replicated atomic register.

#[macro_use]
mod utils;

mod client;
mod cluster;
mod register;
mod server;

// public interface exports
pub use crate::utils::{
    logger_init, logger_set_me, AtomRegError, ReplicaMap, Timer, ME,
};

pub use crate::register::{
    quorum_size, ClientId, Key, OperationId, QuorumTracker, ReadRequest,
    ReadResponse, RegisterMsg, ReplicaId, RequestId, RunId, Timestamp, Value,
    WriteAck, WriteRequest,
};

pub use crate::server::{
    ClientFacing, Envelope, RegisterReplica, RegisterSlot, ReplicaConfig,
    ReplicaHandle, ReplicaNode, ReplicaServer,
};

pub use crate::client::{
    ClientConfig, ClientEndpoint, ClusterConfig, Coordinator, OpOutcome,
    OperationFailed, Phase, ReplicaLink, Step, TcpLink,
};

pub use crate::cluster::{FaultPolicy, LocalCluster, LocalLink};
