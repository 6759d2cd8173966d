//! Client-facing TCP acceptor of a replica server.

use std::net::SocketAddr;

use crate::register::{ClientId, RegisterMsg, ReplicaId};
use crate::server::{Envelope, ReplicaHandle};
use crate::utils::{
    safe_tcp_read, tcp_bind_with_retry, tcp_write_obj, AtomRegError,
};

use bytes::BytesMut;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The external client-facing module. Every accepted client gets a servant
/// task that feeds its messages into the replica's mailbox and writes the
/// replies back.
pub struct ClientFacing {
    /// My replica ID.
    me: ReplicaId,

    /// Actual address the listener is bound to.
    local_addr: SocketAddr,

    /// Join handle of the client acceptor thread.
    client_acceptor_handle: JoinHandle<()>,
}

impl ClientFacing {
    /// Binds the client listener and spawns the client acceptor thread.
    pub async fn new_and_setup(
        me: ReplicaId,
        bind_addr: SocketAddr,
        replica: ReplicaHandle,
        chan_reply_cap: usize,
    ) -> Result<Self, AtomRegError> {
        if chan_reply_cap == 0 {
            return logged_err!("invalid chan_reply_cap {}", chan_reply_cap);
        }

        let client_listener = tcp_bind_with_retry(bind_addr, 10).await?;
        let local_addr = client_listener.local_addr()?;

        let client_acceptor_handle =
            tokio::spawn(Self::client_acceptor_thread(
                me,
                client_listener,
                replica,
                chan_reply_cap,
            ));

        Ok(ClientFacing {
            me,
            local_addr,
            client_acceptor_handle,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new clients. Existing servants run until their
    /// clients disconnect or the replica mailbox closes.
    pub fn stop_accepting(&self) {
        self.client_acceptor_handle.abort();
        pf_debug!("replica {} stopped accepting clients", self.me);
    }
}

// ClientFacing client_acceptor thread implementation
impl ClientFacing {
    /// Client acceptor thread function.
    async fn client_acceptor_thread(
        me: ReplicaId,
        client_listener: TcpListener,
        replica: ReplicaHandle,
        chan_reply_cap: usize,
    ) {
        pf_info!("replica {} accepting clients", me);

        loop {
            let (mut stream, addr) = match client_listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    pf_warn!("error accepting client connection: {}", e);
                    continue;
                }
            };

            // receive client ID first
            let client = match stream.read_u64().await {
                Ok(client) => client,
                Err(e) => {
                    pf_error!("error receiving new client ID: {}", e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                pf_warn!("error setting nodelay for {}: {}", client, e);
            }
            pf_debug!("replica {} accepted client {} ({})", me, client, addr);

            tokio::spawn(Self::client_servant_thread(
                me,
                client,
                addr,
                stream,
                replica.clone(),
                chan_reply_cap,
            ));
        }
    }
}

// ClientFacing client_servant thread implementation
impl ClientFacing {
    /// Client message listener and reply sender thread function.
    async fn client_servant_thread(
        me: ReplicaId,
        client: ClientId,
        addr: SocketAddr,
        mut conn: TcpStream,
        replica: ReplicaHandle,
        chan_reply_cap: usize,
    ) {
        pf_debug!("client_servant thread for {} ({}) spawned", client, addr);

        let (tx_reply, mut rx_reply) = mpsc::channel(chan_reply_cap);
        let (mut conn_read, mut conn_write) = conn.split();
        let mut read_buf = BytesMut::with_capacity(8 + 1024);

        loop {
            tokio::select! {
                // select between getting a new reply to send back and
                // receiving a new client message, prioritizing the former
                biased;

                // gets a reply to send back
                reply = rx_reply.recv() => {
                    let Some((_, reply)) = reply else {
                        break;
                    };
                    if let Err(e) = tcp_write_obj::<RegisterMsg, _>(
                        &reply, &mut conn_write
                    ).await {
                        pf_error!("error replying to {}: {}", client, e);
                        break;
                    }
                },

                // receives client message
                msg = safe_tcp_read::<RegisterMsg, _>(
                    &mut read_buf, &mut conn_read
                ) => {
                    match msg {
                        Ok(msg) => {
                            let envelope = Envelope {
                                client,
                                msg,
                                reply_to: tx_reply.clone(),
                            };
                            match replica.deliver(envelope) {
                                Ok(true) => {}
                                Ok(false) => {
                                    pf_debug!(
                                        "replica {} mailbox full, msg from {} dropped",
                                        me, client
                                    );
                                }
                                Err(e) => {
                                    pf_error!("error delivering msg: {}", e);
                                    break;
                                }
                            }
                        },

                        Err(e) => {
                            // probably the client has exited
                            pf_debug!("client {} connection ended: {}", client, e);
                            break;
                        }
                    }
                },
            }
        }

        pf_debug!("client_servant thread for {} ({}) exited", client, addr);
    }
}
