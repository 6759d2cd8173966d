//! Client endpoint: drives one coordinator over a replica link, handling
//! phase timeouts and retries.

use crate::client::{
    ClusterConfig, Coordinator, OpOutcome, Phase, ReplicaLink, Step, TcpLink,
};
use crate::register::{ClientId, Key, RegisterMsg, RunId, Value};
use crate::utils::{AtomRegError, Timer};

use serde::Deserialize;

use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Per-phase timeout in millisecs.
    pub timeout_ms: u64,

    /// Timeouts tolerated per phase before an operation is abandoned.
    pub max_retries: u32,

    /// Capacity of the reply receiving channel.
    pub chan_recv_cap: usize,

    /// Connection attempts per replica at setup time.
    pub connect_retries: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout_ms: 300,
            max_retries: 5,
            chan_recv_cap: 10_000,
            connect_retries: 10,
        }
    }
}

impl ClientConfig {
    /// Parses from an optional TOML string on top of the defaults.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let config = parsed_config!(config_str => ClientConfig;
                                    timeout_ms, max_retries,
                                    chan_recv_cap, connect_retries)?;
        if config.timeout_ms == 0 {
            return logged_err!(
                "invalid config.timeout_ms '{}'",
                config.timeout_ms
            );
        }
        if config.chan_recv_cap == 0 {
            return logged_err!(
                "invalid config.chan_recv_cap '{}'",
                config.chan_recv_cap
            );
        }
        Ok(config)
    }
}

/// A register client. Issues one operation at a time; each `invoke_*` call
/// runs the operation to completion or failure.
pub struct ClientEndpoint {
    /// My client ID.
    id: ClientId,

    /// Run ID stamped onto every operation.
    run_id: RunId,

    /// Connection to the replicas.
    link: Box<dyn ReplicaLink>,

    /// Operation state machine.
    coord: Coordinator,

    /// Per-phase timeout timer.
    timer: Timer,

    /// Configuration parameters struct.
    config: ClientConfig,
}

impl ClientEndpoint {
    /// Creates an endpoint on top of an established link.
    pub fn new(
        id: ClientId,
        run_id: RunId,
        link: Box<dyn ReplicaLink>,
        config_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let config = ClientConfig::from_config_str(config_str)?;
        let coord =
            Coordinator::new(id, link.population(), config.max_retries)?;

        Ok(ClientEndpoint {
            id,
            run_id,
            link,
            coord,
            timer: Timer::default(),
            config,
        })
    }

    /// Connects to the replicas of `cluster` over TCP and creates an
    /// endpoint on top.
    pub async fn new_and_connect(
        id: ClientId,
        run_id: RunId,
        cluster: &ClusterConfig,
        config_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let config = ClientConfig::from_config_str(config_str)?;
        let link = TcpLink::new_and_setup(
            id,
            cluster,
            config.chan_recv_cap,
            config.connect_retries,
        )
        .await?;
        pf_info!(
            "client {} connected to {}/{} replicas",
            id,
            link.num_connected(),
            cluster.population()
        );

        Self::new(id, run_id, Box::new(link), config_str)
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Switches to a new run. Replicas wipe their registers upon seeing the
    /// first message of a newer run.
    pub fn set_run_id(&mut self, run_id: RunId) {
        self.run_id = run_id;
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.coord.phase()
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Reads `key`.
    pub async fn invoke_read(
        &mut self,
        key: Key,
    ) -> Result<OpOutcome, AtomRegError> {
        let msg = self.coord.begin_read(self.run_id, key);
        self.drive(msg).await
    }

    /// Writes `value` to `key`.
    pub async fn invoke_write(
        &mut self,
        key: Key,
        value: Value,
    ) -> Result<OpOutcome, AtomRegError> {
        let msg = self.coord.begin_write(self.run_id, key, value);
        self.drive(msg).await
    }

    /// Broadcasts a phase message and restarts the phase timer.
    fn start_phase(&mut self, msg: &RegisterMsg) -> Result<(), AtomRegError> {
        self.link.bcast(msg)?;
        self.timer
            .kickoff(Duration::from_millis(self.config.timeout_ms))?;
        Ok(())
    }

    /// Runs the in-flight operation until the coordinator finishes it.
    async fn drive(
        &mut self,
        first: RegisterMsg,
    ) -> Result<OpOutcome, AtomRegError> {
        self.start_phase(&first)?;

        loop {
            let step = tokio::select! {
                reply = self.link.recv() => {
                    let (replica, msg) = reply?;
                    self.coord.handle_reply(replica, msg)?
                },

                _ = self.timer.timeout() => {
                    self.coord.handle_timeout()
                },
            };

            match step {
                Step::Pending => {}
                Step::Broadcast(msg) => self.start_phase(&msg)?,
                Step::Finished(outcome) => {
                    self.timer.cancel();
                    return Ok(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod endpoint_tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() -> Result<(), AtomRegError> {
        let config = ClientConfig::from_config_str(None)?;
        assert_eq!(config.timeout_ms, 300);
        assert_eq!(config.max_retries, 5);
        let config = ClientConfig::from_config_str(Some(
            "timeout_ms = 50\nmax_retries = 1",
        ))?;
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.chan_recv_cap, 10_000);
        Ok(())
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(ClientConfig::from_config_str(Some("timeout_ms = 0")).is_err());
        assert!(ClientConfig::from_config_str(Some("max_retries = -1")).is_err());
        assert!(ClientConfig::from_config_str(Some("leader = 1")).is_err());
    }
}
