//! Client side: the operation coordinator, replica links, and the endpoint
//! driving them.

mod coordinator;
mod endpoint;
mod link;
mod membership;
mod tcplink;

pub use coordinator::{Coordinator, OpOutcome, OperationFailed, Phase, Step};
pub use endpoint::{ClientConfig, ClientEndpoint};
pub use link::ReplicaLink;
pub use membership::ClusterConfig;
pub use tcplink::TcpLink;
