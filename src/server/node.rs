//! Replica actor: drains a mailbox of protocol messages one at a time.

use crate::register::{ClientId, RegisterMsg, ReplicaId};
use crate::server::{RegisterReplica, ReplicaConfig};
use crate::utils::AtomRegError;

use tokio::sync::{mpsc, watch};

/// A protocol message together with where its reply should go.
#[derive(Debug)]
pub struct Envelope {
    /// Sending client.
    pub client: ClientId,

    /// The protocol message.
    pub msg: RegisterMsg,

    /// Reply channel of the sending client. Replies are tagged with the
    /// answering replica's ID.
    pub reply_to: mpsc::Sender<(ReplicaId, RegisterMsg)>,
}

/// Cloneable handle for delivering envelopes into a replica's mailbox.
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    /// ID of the replica behind this handle.
    id: ReplicaId,

    /// Sender side of the mailbox channel.
    tx_mailbox: mpsc::Sender<Envelope>,
}

impl ReplicaHandle {
    #[inline]
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Delivers an envelope without waiting for mailbox space. Returns
    /// `Ok(false)` if the mailbox is full and the envelope got dropped.
    pub fn deliver(&self, envelope: Envelope) -> Result<bool, AtomRegError> {
        match self.tx_mailbox.try_send(envelope) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(
                AtomRegError::msg(format!("replica {} mailbox closed", self.id)),
            ),
        }
    }
}

/// Replica actor owning a `RegisterReplica`.
#[derive(Debug)]
pub struct ReplicaNode {
    /// Register state, touched by nobody else.
    replica: RegisterReplica,

    /// Receiver side of the mailbox channel.
    rx_mailbox: mpsc::Receiver<Envelope>,
}

impl ReplicaNode {
    /// Creates a replica actor and the handle for feeding its mailbox.
    pub fn new_and_setup(
        id: ReplicaId,
        config: &ReplicaConfig,
    ) -> Result<(Self, ReplicaHandle), AtomRegError> {
        if config.chan_mailbox_cap == 0 {
            return logged_err!(
                "invalid config.chan_mailbox_cap '{}'",
                config.chan_mailbox_cap
            );
        }

        let (tx_mailbox, rx_mailbox) = mpsc::channel(config.chan_mailbox_cap);
        Ok((
            ReplicaNode {
                replica: RegisterReplica::new(id),
                rx_mailbox,
            },
            ReplicaHandle { id, tx_mailbox },
        ))
    }

    /// Handles one envelope; the reply, if any, is sent without blocking.
    fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope {
            client,
            msg,
            reply_to,
        } = envelope;
        pf_trace!(
            "replica {} recv <- client {} {:?}",
            self.replica.id(),
            client,
            msg
        );

        if let Some(reply) = self.replica.handle(msg) {
            // a reply that cannot be queued right now is as good as lost
            if let Err(e) = reply_to.try_send((self.replica.id(), reply)) {
                pf_debug!(
                    "replica {} reply to client {} dropped: {}",
                    self.replica.id(),
                    client,
                    e
                );
            }
        }
    }

    /// Main event loop. Returns the final register state once termination
    /// is signalled through `rx_term` or every mailbox handle is dropped.
    pub async fn run(
        mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<RegisterReplica, AtomRegError> {
        pf_info!("replica {} up and running", self.replica.id());

        loop {
            tokio::select! {
                // drain pending messages before noticing termination
                biased;

                envelope = self.rx_mailbox.recv() => {
                    match envelope {
                        Some(envelope) => self.handle_envelope(envelope),
                        None => {
                            pf_debug!(
                                "replica {} mailbox closed",
                                self.replica.id()
                            );
                            break;
                        }
                    }
                },

                changed = rx_term.changed() => {
                    if changed.is_err() || *rx_term.borrow() {
                        pf_info!(
                            "replica {} terminating with {} slots",
                            self.replica.id(),
                            self.replica.num_slots()
                        );
                        break;
                    }
                },
            }
        }

        Ok(self.replica)
    }
}

#[cfg(test)]
mod node_tests {
    use super::*;
    use crate::register::{ReadRequest, Timestamp, WriteRequest};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mailbox_write_then_read() -> Result<(), AtomRegError> {
        let (node, handle) =
            ReplicaNode::new_and_setup(1, &ReplicaConfig::default())?;
        let (tx_term, rx_term) = watch::channel(false);
        let node_handle = tokio::spawn(node.run(rx_term));

        let (tx_reply, mut rx_reply) = mpsc::channel(10);
        assert!(handle.deliver(Envelope {
            client: 7,
            msg: RegisterMsg::Write(WriteRequest {
                run_id: 0,
                key: 3,
                rid: 0,
                timestamp: Timestamp::new(1, 7),
                value: 42,
            }),
            reply_to: tx_reply.clone(),
        })?);
        assert!(handle.deliver(Envelope {
            client: 7,
            msg: RegisterMsg::Read(ReadRequest {
                run_id: 0,
                key: 3,
                rid: 1,
            }),
            reply_to: tx_reply,
        })?);

        let (from, reply) = rx_reply.recv().await.unwrap();
        assert_eq!(from, 1);
        assert!(matches!(reply, RegisterMsg::WriteAck(_)));
        let (_, reply) = rx_reply.recv().await.unwrap();
        match reply {
            RegisterMsg::ReadResp(resp) => {
                assert_eq!(resp.rid, 1);
                assert_eq!(resp.timestamp, Timestamp::new(1, 7));
                assert_eq!(resp.value, 42);
            }
            _ => panic!("unexpected reply {:?}", reply),
        }

        tx_term.send(true)?;
        let replica = node_handle.await??;
        assert_eq!(replica.slot(3).value, 42);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_mailbox_cap() {
        let config = ReplicaConfig {
            chan_mailbox_cap: 0,
            ..Default::default()
        };
        assert!(ReplicaNode::new_and_setup(0, &config).is_err());
    }
}
