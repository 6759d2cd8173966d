//! Atomreg register replica server executable.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use tokio::runtime::Builder;
use tokio::sync::watch;

use atomreg::{
    logger_init, logger_set_me, pf_error, pf_info, AtomRegError, ReplicaId,
    ReplicaServer,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Replica ID of this server; also its index in clients' replica lists.
    #[arg(short, long)]
    id: ReplicaId,

    /// Local IP to use for binding the listening socket.
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind_ip: Ipv4Addr,

    /// Client-facing API port.
    /// This port must be available at process launch.
    #[arg(short, long, default_value_t = 52700)]
    port: u16,

    /// Replica configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(bind_addr)` on success
    /// or `Err(AtomRegError)` on any error.
    fn sanitize(&self) -> Result<SocketAddr, AtomRegError> {
        if self.port <= 1024 {
            Err(AtomRegError::msg(format!("invalid port {}", self.port)))
        } else if self.threads < 2 {
            Err(AtomRegError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(SocketAddr::new(self.bind_ip.into(), self.port))
        }
    }
}

/// Actual main function of the replica server.
fn server_main() -> Result<(), AtomRegError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let bind_addr = args.sanitize()?;
    let id = args.id;
    logger_set_me(format!("r{}", id));

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-replica")
            .build()?;

        // enter tokio runtime, setup the replica, and start the main event
        // loop logic
        runtime.block_on(async move {
            let server =
                ReplicaServer::new_and_setup(id, bind_addr, config_str)
                    .await?;

            let replica = server.run(rx_term).await?;
            pf_info!("exiting with {} register slots", replica.num_slots());

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), AtomRegError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the replica server.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = server_main() {
        pf_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    #[test]
    fn sanitize_valid() -> Result<(), AtomRegError> {
        let args = CliArgs {
            id: 0,
            bind_ip: "127.0.0.1".parse()?,
            port: 52700,
            config: "".into(),
            threads: 2,
        };
        assert_eq!(args.sanitize(), Ok("127.0.0.1:52700".parse()?));
        Ok(())
    }

    #[test]
    fn sanitize_invalid_port() -> Result<(), AtomRegError> {
        let args = CliArgs {
            id: 0,
            bind_ip: "127.0.0.1".parse()?,
            port: 1023,
            config: "".into(),
            threads: 2,
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }

    #[test]
    fn sanitize_invalid_threads() -> Result<(), AtomRegError> {
        let args = CliArgs {
            id: 0,
            bind_ip: "127.0.0.1".parse()?,
            port: 52700,
            config: "".into(),
            threads: 1,
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }
}
