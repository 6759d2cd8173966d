//! Replica side: register state, the actor running it, and its TCP front.

mod external;
mod node;
mod replica;

use std::net::SocketAddr;

use crate::register::ReplicaId;
use crate::utils::AtomRegError;

use serde::Deserialize;

use tokio::sync::watch;

pub use external::ClientFacing;
pub use node::{Envelope, ReplicaHandle, ReplicaNode};
pub use replica::{RegisterReplica, RegisterSlot};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfig {
    /// Capacity of the replica mailbox channel.
    pub chan_mailbox_cap: usize,

    /// Capacity of each client's reply channel.
    pub chan_reply_cap: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            chan_mailbox_cap: 100_000,
            chan_reply_cap: 10_000,
        }
    }
}

impl ReplicaConfig {
    /// Parses from an optional TOML string on top of the defaults.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let config = parsed_config!(config_str => ReplicaConfig;
                                    chan_mailbox_cap, chan_reply_cap)?;
        if config.chan_reply_cap == 0 {
            return logged_err!(
                "invalid config.chan_reply_cap '{}'",
                config.chan_reply_cap
            );
        }
        Ok(config)
    }
}

/// A replica process: the replica actor plus its client-facing TCP front.
pub struct ReplicaServer {
    /// My replica ID.
    id: ReplicaId,

    /// The replica actor, run by `run()`.
    node: ReplicaNode,

    /// Client-facing TCP acceptor.
    facing: ClientFacing,
}

impl ReplicaServer {
    /// Creates the replica actor and starts accepting clients on
    /// `bind_addr`.
    pub async fn new_and_setup(
        id: ReplicaId,
        bind_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let config = ReplicaConfig::from_config_str(config_str)?;
        let (node, handle) = ReplicaNode::new_and_setup(id, &config)?;
        let facing = ClientFacing::new_and_setup(
            id,
            bind_addr,
            handle,
            config.chan_reply_cap,
        )
        .await?;
        pf_info!(
            "replica {} listening on '{}' config {:?}",
            id,
            facing.local_addr(),
            config
        );

        Ok(ReplicaServer { id, node, facing })
    }

    #[inline]
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.facing.local_addr()
    }

    /// Runs the replica actor until termination is signalled.
    pub async fn run(
        self,
        rx_term: watch::Receiver<bool>,
    ) -> Result<RegisterReplica, AtomRegError> {
        let replica = self.node.run(rx_term).await;
        self.facing.stop_accepting();
        replica
    }
}

#[cfg(test)]
mod server_config_tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() -> Result<(), AtomRegError> {
        let config = ReplicaConfig::from_config_str(None)?;
        assert_eq!(config.chan_mailbox_cap, 100_000);
        let config =
            ReplicaConfig::from_config_str(Some("chan_reply_cap = 16"))?;
        assert_eq!(config.chan_reply_cap, 16);
        assert_eq!(config.chan_mailbox_cap, 100_000);
        Ok(())
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(ReplicaConfig::from_config_str(Some("chan_reply_cap = 0"))
            .is_err());
        assert!(ReplicaConfig::from_config_str(Some("batch_size = 3"))
            .is_err());
    }
}
