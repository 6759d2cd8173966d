//! TCP implementation of `ReplicaLink`: one messenger task per replica
//! connection.

use std::net::SocketAddr;

use crate::client::{ClusterConfig, ReplicaLink};
use crate::register::{ClientId, RegisterMsg, ReplicaId};
use crate::utils::{
    safe_tcp_read, tcp_connect_with_retry, tcp_write_obj, AtomRegError,
};

use async_trait::async_trait;

use bytes::BytesMut;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Client link to a cluster over TCP. Replicas that cannot be reached at
/// setup time are treated as crashed for the lifetime of the link.
pub struct TcpLink {
    /// My client ID.
    me: ClientId,

    /// Number of replicas in the cluster.
    population: u8,

    /// Per-replica sender side of the outgoing message channel; `None` if
    /// the replica is unreachable.
    tx_sends: Vec<Option<mpsc::Sender<RegisterMsg>>>,

    /// Receiver side of the shared incoming reply channel.
    rx_recv: mpsc::Receiver<(ReplicaId, RegisterMsg)>,

    /// Own sender side of the reply channel, so that `rx_recv` stays open
    /// after every messenger thread has exited.
    _tx_recv: mpsc::Sender<(ReplicaId, RegisterMsg)>,

    /// Join handles of the messenger threads.
    messenger_handles: Vec<JoinHandle<()>>,
}

impl TcpLink {
    /// Connects to every replica in `cluster`, announcing `me` as client ID.
    /// Fails only if no replica at all is reachable.
    pub async fn new_and_setup(
        me: ClientId,
        cluster: &ClusterConfig,
        chan_cap: usize,
        connect_retries: u8,
    ) -> Result<Self, AtomRegError> {
        if chan_cap == 0 {
            return logged_err!("invalid chan_cap {}", chan_cap);
        }

        let (tx_recv, rx_recv) = mpsc::channel(chan_cap);
        let mut tx_sends = Vec::with_capacity(cluster.population() as usize);
        let mut messenger_handles = vec![];

        for (id, addr) in cluster.iter() {
            match Self::connect_to(me, addr, connect_retries).await {
                Ok(conn) => {
                    let (tx_send, rx_send) = mpsc::channel(chan_cap);
                    messenger_handles.push(tokio::spawn(
                        Self::messenger_thread(
                            me,
                            id,
                            conn,
                            rx_send,
                            tx_recv.clone(),
                        ),
                    ));
                    tx_sends.push(Some(tx_send));
                    pf_debug!("client {} connected to replica {}", me, id);
                }
                Err(e) => {
                    pf_warn!(
                        "client {} cannot reach replica {} '{}': {}",
                        me,
                        id,
                        addr,
                        e
                    );
                    tx_sends.push(None);
                }
            }
        }

        if messenger_handles.is_empty() {
            return logged_err!("client {} reached no replica at all", me);
        }

        Ok(TcpLink {
            me,
            population: cluster.population(),
            tx_sends,
            rx_recv,
            _tx_recv: tx_recv,
            messenger_handles,
        })
    }

    /// Connects to a replica and sends the client ID handshake.
    async fn connect_to(
        me: ClientId,
        addr: SocketAddr,
        connect_retries: u8,
    ) -> Result<TcpStream, AtomRegError> {
        let mut stream = tcp_connect_with_retry(addr, connect_retries).await?;
        stream.write_u64(me).await?; // send my client ID
        Ok(stream)
    }

    /// Number of replicas that were reachable at setup time.
    pub fn num_connected(&self) -> usize {
        self.tx_sends.iter().filter(|tx| tx.is_some()).count()
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        for handle in &self.messenger_handles {
            handle.abort();
        }
    }
}

#[async_trait]
impl ReplicaLink for TcpLink {
    fn population(&self) -> u8 {
        self.population
    }

    fn send(
        &mut self,
        replica: ReplicaId,
        msg: &RegisterMsg,
    ) -> Result<bool, AtomRegError> {
        let Some(slot) = self.tx_sends.get_mut(replica as usize) else {
            return logged_err!("replica {} not in cluster", replica);
        };
        let Some(tx_send) = slot else {
            return Ok(false);
        };

        match tx_send.try_send(msg.clone()) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                pf_debug!("client {} send to {} dropped", self.me, replica);
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // messenger exited; replica is gone from now on
                pf_warn!("client {} lost connection to {}", self.me, replica);
                *slot = None;
                Ok(false)
            }
        }
    }

    async fn recv(&mut self) -> Result<(ReplicaId, RegisterMsg), AtomRegError> {
        // with every replica lost this pends, leaving the phase to time out
        match self.rx_recv.recv().await {
            Some(reply) => Ok(reply),
            None => logged_err!("client {} lost all replicas", self.me),
        }
    }
}

// TcpLink messenger thread implementation
impl TcpLink {
    /// Per-replica messenger thread function: writes outgoing messages and
    /// forwards incoming replies.
    async fn messenger_thread(
        me: ClientId,
        id: ReplicaId,
        mut conn: TcpStream,
        mut rx_send: mpsc::Receiver<RegisterMsg>,
        tx_recv: mpsc::Sender<(ReplicaId, RegisterMsg)>,
    ) {
        pf_debug!("client {} messenger thread for {} spawned", me, id);

        let (mut conn_read, mut conn_write) = conn.split();
        let mut read_buf = BytesMut::with_capacity(8 + 1024);

        loop {
            tokio::select! {
                // gets a message to send out
                msg = rx_send.recv() => {
                    let Some(msg) = msg else {
                        break;
                    };
                    if let Err(e) = tcp_write_obj(&msg, &mut conn_write).await {
                        pf_warn!("client {} error sending to {}: {}", me, id, e);
                        break;
                    }
                },

                // receives a reply
                reply = safe_tcp_read::<RegisterMsg, _>(
                    &mut read_buf, &mut conn_read
                ) => {
                    match reply {
                        Ok(reply) => {
                            if tx_recv.send((id, reply)).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => {
                            pf_warn!(
                                "client {} connection to {} ended: {}",
                                me, id, e
                            );
                            break;
                        }
                    }
                },
            }
        }

        pf_debug!("client {} messenger thread for {} exited", me, id);
    }
}
