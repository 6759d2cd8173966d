//! Atomreg client side executable.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

use tokio::runtime::Builder;

use atomreg::{
    logger_init, logger_set_me, pf_error, pf_info, AtomRegError, ClientEndpoint,
    ClientId, ClusterConfig, FaultPolicy, LocalCluster, RunId,
};

mod clients;

use crate::clients::{ClientBench, ClientMode, ClientRepl};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Client-facing addresses of all replicas in replica ID order
    /// (e.g., '-r host0:52700 -r host1:52700 -r host2:52700').
    #[arg(short, long)]
    replicas: Vec<SocketAddr>,

    /// If non-zero, run against an in-process cluster of this many
    /// replicas instead of connecting to `replicas`.
    #[arg(long, default_value_t = 0)]
    local: u8,

    /// Writer identity of this client; must be unique among clients.
    #[arg(short, long)]
    writer: ClientId,

    /// Run ID to stamp onto operations.
    #[arg(long, default_value_t = 0)]
    run_id: RunId,

    /// Client configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Client utility mode to run: repl|bench.
    #[arg(short, long)]
    utility: String,

    /// Mode-specific client parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(AtomRegError)` on any error.
    fn sanitize(&self) -> Result<ClientMode, AtomRegError> {
        if self.threads < 2 {
            Err(AtomRegError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else if self.local == 0 && self.replicas.is_empty() {
            Err(AtomRegError::msg("no replicas given"))
        } else if self.local > 0 && !self.replicas.is_empty() {
            Err(AtomRegError::msg("both --local and --replicas given"))
        } else {
            ClientMode::parse_name(&self.utility).ok_or(AtomRegError::msg(
                format!("utility mode '{}' unrecognized", self.utility),
            ))
        }
    }
}

/// Actual main function of the client executable.
fn client_main() -> Result<(), AtomRegError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let mode = args.sanitize()?;
    let (writer, run_id, local) = (args.writer, args.run_id, args.local);
    logger_set_me(format!("c{}", writer));

    let cluster = if local == 0 {
        Some(ClusterConfig::new(args.replicas.clone())?)
    } else {
        None
    };

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };

    // parse optional params string if given
    let params_str = if args.params.is_empty() {
        None
    } else {
        args.params = args.params.replace('+', "\n");
        Some(&args.params[..])
    };

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime, connect to the service, and do work
    runtime.block_on(async move {
        let (endpoint, local_cluster) = match cluster {
            Some(cluster) => (
                ClientEndpoint::new_and_connect(
                    writer, run_id, &cluster, config_str,
                )
                .await?,
                None,
            ),
            None => {
                let local_cluster =
                    LocalCluster::new_and_setup(local, None, FaultPolicy::RELIABLE)
                        .await?;
                let link = local_cluster.link(writer);
                (
                    ClientEndpoint::new(
                        writer,
                        run_id,
                        Box::new(link),
                        config_str,
                    )?,
                    Some(local_cluster),
                )
            }
        };

        match mode {
            ClientMode::Repl => {
                // run interactive REPL loop
                let mut repl = ClientRepl::new(endpoint);
                repl.run().await?;
            }
            ClientMode::Bench => {
                // run benchmarking client
                let mut bench = ClientBench::new(endpoint, params_str)?;
                bench.run().await?;
            }
        }

        if let Some(local_cluster) = local_cluster {
            let replicas = local_cluster.shutdown().await?;
            pf_info!("local cluster of {} replicas shut down", replicas.len());
        }

        Ok::<(), AtomRegError>(()) // give type hint for this async closure
    })
}

/// Main function of the client executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
