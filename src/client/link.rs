//! Client-side connection to the full replica set.

use crate::register::{RegisterMsg, ReplicaId};
use crate::utils::AtomRegError;

use async_trait::async_trait;

/// Message channel from one client to every replica of a cluster. Sends are
/// best-effort: a message to an unreachable or congested replica may be
/// dropped silently, just like on a lossy network.
#[async_trait]
pub trait ReplicaLink: Send {
    /// Number of replicas reachable through this link, counting those
    /// currently down.
    fn population(&self) -> u8;

    /// Sends a message to one replica without blocking. Returns `Ok(false)`
    /// if the message got dropped.
    fn send(
        &mut self,
        replica: ReplicaId,
        msg: &RegisterMsg,
    ) -> Result<bool, AtomRegError>;

    /// Sends a message to every replica.
    fn bcast(&mut self, msg: &RegisterMsg) -> Result<(), AtomRegError> {
        for replica in 0..self.population() {
            self.send(replica, msg)?;
        }
        Ok(())
    }

    /// Receives the next reply from any replica, tagged with its sender.
    ///
    /// CANCELLATION SAFETY: must be safe to use as a `tokio::select!` branch.
    async fn recv(&mut self) -> Result<(ReplicaId, RegisterMsg), AtomRegError>;
}
