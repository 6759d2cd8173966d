//! Immutable cluster membership given to clients at startup.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::register::{quorum_size, ReplicaId};
use crate::utils::AtomRegError;

/// Replica set of a cluster. Replica IDs are the indices into the address
/// list; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Client-facing address of each replica, indexed by replica ID.
    replicas: Vec<SocketAddr>,
}

impl ClusterConfig {
    /// Builds a membership from replica addresses in ID order.
    pub fn new(replicas: Vec<SocketAddr>) -> Result<Self, AtomRegError> {
        if replicas.is_empty() {
            return Err(AtomRegError::msg("empty replicas list"));
        }
        if replicas.len() > ReplicaId::MAX as usize {
            return Err(AtomRegError::msg(format!(
                "too many replicas {}",
                replicas.len()
            )));
        }
        let mut seen = HashSet::new();
        for addr in &replicas {
            if !seen.insert(addr) {
                return Err(AtomRegError::msg(format!(
                    "duplicate replica address '{}'",
                    addr
                )));
            }
        }
        Ok(ClusterConfig { replicas })
    }

    /// Number of replicas.
    #[inline]
    pub fn population(&self) -> u8 {
        self.replicas.len() as u8
    }

    /// Majority quorum size of this cluster.
    #[inline]
    pub fn quorum_cnt(&self) -> u8 {
        quorum_size(self.population())
    }

    pub fn addr(&self, id: ReplicaId) -> Option<SocketAddr> {
        self.replicas.get(id as usize).copied()
    }

    /// Iterates over `(id, addr)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, SocketAddr)> + '_ {
        self.replicas
            .iter()
            .enumerate()
            .map(|(id, &addr)| (id as ReplicaId, addr))
    }
}
