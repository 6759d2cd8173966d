//! In-process cluster of replica actors, with lossy client links for testing
//! and benchmarking without sockets.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::client::ReplicaLink;
use crate::register::{ClientId, RegisterMsg, ReplicaId};
use crate::server::{
    Envelope, RegisterReplica, ReplicaConfig, ReplicaHandle, ReplicaNode,
};
use crate::utils::AtomRegError;

use async_trait::async_trait;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Message loss and duplication applied independently to every message on
/// a `LocalLink`, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaultPolicy {
    /// Probability of dropping a message.
    pub drop_rate: f64,

    /// Probability of delivering a request twice.
    pub dup_rate: f64,
}

impl FaultPolicy {
    /// A perfect network.
    pub const RELIABLE: FaultPolicy = FaultPolicy {
        drop_rate: 0.0,
        dup_rate: 0.0,
    };

    fn validate(&self) -> Result<(), AtomRegError> {
        if !(0.0..1.0).contains(&self.drop_rate) {
            return logged_err!("invalid drop_rate {}", self.drop_rate);
        }
        if !(0.0..=1.0).contains(&self.dup_rate) {
            return logged_err!("invalid dup_rate {}", self.dup_rate);
        }
        Ok(())
    }
}

/// Client-replica pairs currently cut off from each other.
type Partitions = Arc<Mutex<HashSet<(ClientId, ReplicaId)>>>;

fn is_cut(
    partitions: &Partitions,
    client: ClientId,
    replica: ReplicaId,
) -> Result<bool, AtomRegError> {
    let cut = partitions
        .lock()
        .map_err(|e| AtomRegError::msg(e.to_string()))?;
    Ok(cut.contains(&(client, replica)))
}

/// In-process `ReplicaLink` delivering straight into replica mailboxes.
pub struct LocalLink {
    /// My client ID.
    me: ClientId,

    /// Mailbox handles of all replicas, indexed by ID.
    replicas: Vec<ReplicaHandle>,

    /// Sender side of my reply channel, cloned into every envelope.
    tx_reply: mpsc::Sender<(ReplicaId, RegisterMsg)>,

    /// Receiver side of my reply channel.
    rx_reply: mpsc::Receiver<(ReplicaId, RegisterMsg)>,

    /// Fault injection policy.
    faults: FaultPolicy,

    /// Partitions shared with the owning cluster.
    partitions: Partitions,

    /// Randomness source for fault injection.
    rng: StdRng,
}

impl LocalLink {
    fn deliver(
        &self,
        replica: &ReplicaHandle,
        msg: &RegisterMsg,
    ) -> Result<bool, AtomRegError> {
        match replica.deliver(Envelope {
            client: self.me,
            msg: msg.clone(),
            reply_to: self.tx_reply.clone(),
        }) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // mailbox closed: replica crashed
                pf_trace!(
                    "client {} send to crashed replica {}",
                    self.me,
                    replica.id()
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ReplicaLink for LocalLink {
    fn population(&self) -> u8 {
        self.replicas.len() as u8
    }

    fn send(
        &mut self,
        replica: ReplicaId,
        msg: &RegisterMsg,
    ) -> Result<bool, AtomRegError> {
        let Some(handle) = self.replicas.get(replica as usize) else {
            return logged_err!("replica {} not in cluster", replica);
        };
        if is_cut(&self.partitions, self.me, replica)? {
            return Ok(false);
        }
        if self.rng.gen_bool(self.faults.drop_rate) {
            pf_trace!("client {} dropped send to {}", self.me, replica);
            return Ok(false);
        }

        let delivered = self.deliver(handle, msg)?;
        if delivered && self.rng.gen_bool(self.faults.dup_rate) {
            pf_trace!("client {} duplicated send to {}", self.me, replica);
            self.deliver(handle, msg)?;
        }
        Ok(delivered)
    }

    async fn recv(&mut self) -> Result<(ReplicaId, RegisterMsg), AtomRegError> {
        loop {
            // always holds a sender itself, so never closes
            let Some((replica, msg)) = self.rx_reply.recv().await else {
                return logged_err!("client {} reply channel closed", self.me);
            };
            if is_cut(&self.partitions, self.me, replica)? {
                continue;
            }
            if self.rng.gen_bool(self.faults.drop_rate) {
                pf_trace!("client {} dropped reply from {}", self.me, replica);
                continue;
            }
            return Ok((replica, msg));
        }
    }
}

/// A cluster of replica actors running as tasks of the current runtime.
pub struct LocalCluster {
    /// Mailbox handles of all replicas, indexed by ID.
    handles: Vec<ReplicaHandle>,

    /// Join handles of replica tasks; `None` once crashed.
    node_tasks: Vec<Option<JoinHandle<Result<RegisterReplica, AtomRegError>>>>,

    /// Sender side of the termination signal.
    tx_term: watch::Sender<bool>,

    /// Replica configuration parameters.
    config: ReplicaConfig,

    /// Fault policy given to every new link.
    faults: FaultPolicy,

    /// Partitions shared with all links.
    partitions: Partitions,
}

impl LocalCluster {
    /// Spawns `population` replica actors.
    pub async fn new_and_setup(
        population: u8,
        config_str: Option<&str>,
        faults: FaultPolicy,
    ) -> Result<Self, AtomRegError> {
        if population == 0 {
            return logged_err!("invalid population {}", population);
        }
        faults.validate()?;
        let config = ReplicaConfig::from_config_str(config_str)?;

        let (tx_term, rx_term) = watch::channel(false);
        let mut handles = Vec::with_capacity(population as usize);
        let mut node_tasks = Vec::with_capacity(population as usize);
        for id in 0..population {
            let (node, handle) = ReplicaNode::new_and_setup(id, &config)?;
            node_tasks.push(Some(tokio::spawn(node.run(rx_term.clone()))));
            handles.push(handle);
        }
        pf_info!("local cluster of {} replicas up", population);

        Ok(LocalCluster {
            handles,
            node_tasks,
            tx_term,
            config,
            faults,
            partitions: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    #[inline]
    pub fn population(&self) -> u8 {
        self.handles.len() as u8
    }

    /// Creates a new client link into the cluster.
    pub fn link(&self, client: ClientId) -> LocalLink {
        let (tx_reply, rx_reply) = mpsc::channel(self.config.chan_reply_cap);
        LocalLink {
            me: client,
            replicas: self.handles.clone(),
            tx_reply,
            rx_reply,
            faults: self.faults,
            partitions: self.partitions.clone(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Cuts off (or heals) the connection between `client` and `replica`.
    pub fn isolate(
        &self,
        client: ClientId,
        replica: ReplicaId,
        cut: bool,
    ) -> Result<(), AtomRegError> {
        let mut partitions = self
            .partitions
            .lock()
            .map_err(|e| AtomRegError::msg(e.to_string()))?;
        if cut {
            partitions.insert((client, replica));
        } else {
            partitions.remove(&(client, replica));
        }
        Ok(())
    }

    /// Crash-stops a replica; its register state is lost. Once this
    /// returns, sends to the replica are dropped.
    pub async fn crash(
        &mut self,
        replica: ReplicaId,
    ) -> Result<(), AtomRegError> {
        let Some(task) = self.node_tasks.get_mut(replica as usize) else {
            return logged_err!("replica {} not in cluster", replica);
        };
        if let Some(task) = task.take() {
            task.abort();
            // wait until the actor and its mailbox are gone
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    return Err(e.into());
                }
            }
            pf_info!("replica {} crashed", replica);
        }
        Ok(())
    }

    pub fn is_alive(&self, replica: ReplicaId) -> bool {
        matches!(self.node_tasks.get(replica as usize), Some(Some(_)))
    }

    /// Terminates all replicas, returning the final state of every replica
    /// that had not crashed.
    pub async fn shutdown(
        self,
    ) -> Result<Vec<Option<RegisterReplica>>, AtomRegError> {
        self.tx_term.send_replace(true);

        let mut replicas = Vec::with_capacity(self.node_tasks.len());
        for task in self.node_tasks {
            match task {
                Some(task) => replicas.push(Some(task.await??)),
                None => replicas.push(None),
            }
        }
        Ok(replicas)
    }
}

#[cfg(test)]
mod cluster_tests {
    use super::*;
    use crate::register::{ReadRequest, Timestamp, WriteRequest};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn link_roundtrip() -> Result<(), AtomRegError> {
        let cluster =
            LocalCluster::new_and_setup(3, None, FaultPolicy::RELIABLE).await?;
        let mut link = cluster.link(5);
        assert_eq!(link.population(), 3);

        link.bcast(&RegisterMsg::Write(WriteRequest {
            run_id: 0,
            key: 1,
            rid: 0,
            timestamp: Timestamp::new(1, 5),
            value: 9,
        }))?;
        let mut acked = HashSet::new();
        while acked.len() < 3 {
            let (replica, msg) = link.recv().await?;
            assert!(matches!(msg, RegisterMsg::WriteAck(_)));
            acked.insert(replica);
        }

        let replicas = cluster.shutdown().await?;
        for replica in replicas {
            assert_eq!(replica.unwrap().slot(1).value, 9);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn isolated_and_crashed() -> Result<(), AtomRegError> {
        let mut cluster =
            LocalCluster::new_and_setup(3, None, FaultPolicy::RELIABLE).await?;
        let mut link = cluster.link(1);
        cluster.isolate(1, 0, true)?;
        cluster.crash(2).await?;
        assert!(!cluster.is_alive(2));
        assert!(cluster.is_alive(0));

        let read = RegisterMsg::Read(ReadRequest {
            run_id: 0,
            key: 0,
            rid: 0,
        });
        assert!(!link.send(0, &read)?);
        assert!(!link.send(2, &read)?);
        assert!(link.send(1, &read)?);
        assert!(link.send(3, &read).is_err());
        let (replica, _) = link.recv().await?;
        assert_eq!(replica, 1);

        let replicas = cluster.shutdown().await?;
        assert!(replicas[2].is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_setup() {
        assert!(LocalCluster::new_and_setup(0, None, FaultPolicy::RELIABLE)
            .await
            .is_err());
        let faults = FaultPolicy {
            drop_rate: 1.0,
            dup_rate: 0.0,
        };
        assert!(LocalCluster::new_and_setup(3, None, faults).await.is_err());
    }
}
