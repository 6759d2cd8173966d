//! Register operations over TCP between replica servers and clients on
//! loopback.

use std::net::SocketAddr;

use atomreg::{
    AtomRegError, ClientEndpoint, ClusterConfig, OpOutcome, OperationFailed,
    Phase, RegisterReplica, ReplicaServer, Timestamp,
};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type ServerTask = JoinHandle<Result<RegisterReplica, AtomRegError>>;

/// Starts `population` replica servers on ephemeral loopback ports.
async fn start_servers(
    population: u8,
    rx_term: &watch::Receiver<bool>,
) -> Result<(Vec<SocketAddr>, Vec<ServerTask>), AtomRegError> {
    let mut addrs = vec![];
    let mut tasks = vec![];
    for id in 0..population {
        let server =
            ReplicaServer::new_and_setup(id, "127.0.0.1:0".parse()?, None)
                .await?;
        assert_eq!(server.id(), id);
        addrs.push(server.local_addr());
        tasks.push(tokio::spawn(server.run(rx_term.clone())));
    }
    Ok((addrs, tasks))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_write_then_read() -> Result<(), AtomRegError> {
    let (tx_term, rx_term) = watch::channel(false);
    let (addrs, tasks) = start_servers(3, &rx_term).await?;
    let cluster = ClusterConfig::new(addrs)?;

    let mut writer =
        ClientEndpoint::new_and_connect(1, 0, &cluster, None).await?;
    let mut reader =
        ClientEndpoint::new_and_connect(2, 0, &cluster, None).await?;

    let outcome = writer.invoke_write(3, 42).await?;
    assert_eq!(
        outcome,
        OpOutcome::Write {
            rid: 0,
            timestamp: Timestamp::new(1, 1),
        }
    );
    let outcome = reader.invoke_read(3).await?;
    assert_eq!(
        outcome,
        OpOutcome::Read {
            rid: 0,
            value: 42,
            timestamp: Timestamp::new(1, 1),
        }
    );
    assert_eq!(reader.invoke_read(4).await?.read_value(), Some(0));

    tx_term.send(true)?;
    let mut up_to_date = 0;
    for task in tasks {
        if task.await??.slot(3).value == 42 {
            up_to_date += 1;
        }
    }
    assert!(up_to_date >= cluster.quorum_cnt());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_one_replica_unreachable() -> Result<(), AtomRegError> {
    let (tx_term, rx_term) = watch::channel(false);
    let (mut addrs, tasks) = start_servers(2, &rx_term).await?;

    // an address nobody listens on anymore
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    addrs.push(dead_addr);
    let cluster = ClusterConfig::new(addrs)?;

    let config = Some("connect_retries = 0");
    let mut writer =
        ClientEndpoint::new_and_connect(1, 0, &cluster, config).await?;
    let mut reader =
        ClientEndpoint::new_and_connect(2, 0, &cluster, config).await?;

    writer.invoke_write(0, 5).await?;
    writer.invoke_write(0, 6).await?;
    assert_eq!(reader.invoke_read(0).await?.read_value(), Some(6));

    tx_term.send(true)?;
    for task in tasks {
        assert_eq!(task.await??.slot(0).value, 6);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tcp_all_replicas_down_fails_operations() -> Result<(), AtomRegError> {
    let (tx_term, rx_term) = watch::channel(false);
    let (addrs, tasks) = start_servers(3, &rx_term).await?;
    let cluster = ClusterConfig::new(addrs)?;

    let config = Some("timeout_ms = 20\nmax_retries = 2");
    let mut client =
        ClientEndpoint::new_and_connect(1, 0, &cluster, config).await?;
    assert!(!client.invoke_write(0, 8).await?.is_failed());

    tx_term.send(true)?;
    for task in tasks {
        task.await??;
    }

    // losing every replica ends operations as failed, not as link errors
    let outcome = client.invoke_read(0).await?;
    assert_eq!(
        outcome,
        OpOutcome::Failed(OperationFailed {
            key: 0,
            rid: 1,
            phase: Phase::AwaitingReadQuorum,
        })
    );
    let outcome = client.invoke_write(0, 9).await?;
    assert_eq!(
        outcome,
        OpOutcome::Failed(OperationFailed {
            key: 0,
            rid: 2,
            phase: Phase::AwaitingTimestampQuorum,
        })
    );
    Ok(())
}
