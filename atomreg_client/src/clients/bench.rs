//! Closed-loop benchmarking client.

use rand::rngs::ThreadRng;
use rand::Rng;

use serde::Deserialize;

use tokio::time::Instant;

use atomreg::{
    logged_err, parsed_config, pf_info, pf_warn, AtomRegError, ClientEndpoint,
    OpOutcome,
};

/// Mode parameters struct.
#[derive(Debug, Deserialize)]
pub struct ModeParamsBench {
    /// Number of operations to issue.
    pub num_ops: u64,

    /// Keys are drawn uniformly from `0..num_keys`.
    pub num_keys: u64,

    /// Percentage of read operations.
    pub read_ratio: u8,
}

impl Default for ModeParamsBench {
    fn default() -> Self {
        ModeParamsBench {
            num_ops: 10_000,
            num_keys: 8,
            read_ratio: 50,
        }
    }
}

/// Benchmarking client struct.
pub struct ClientBench {
    /// Register client endpoint.
    endpoint: ClientEndpoint,

    /// Mode parameters struct.
    params: ModeParamsBench,

    /// Random number generator.
    rng: ThreadRng,

    /// Number of completed reads.
    read_cnt: u64,

    /// Number of completed writes.
    write_cnt: u64,

    /// Number of failed operations.
    failed_cnt: u64,
}

impl ClientBench {
    /// Creates a new benchmarking client.
    pub fn new(
        endpoint: ClientEndpoint,
        params_str: Option<&str>,
    ) -> Result<Self, AtomRegError> {
        let params = parsed_config!(params_str => ModeParamsBench;
                                    num_ops, num_keys, read_ratio)?;
        if params.num_ops == 0 {
            return logged_err!("invalid params.num_ops '{}'", params.num_ops);
        }
        if params.num_keys == 0 {
            return logged_err!(
                "invalid params.num_keys '{}'",
                params.num_keys
            );
        }
        if params.read_ratio > 100 {
            return logged_err!(
                "invalid params.read_ratio '{}'",
                params.read_ratio
            );
        }

        Ok(ClientBench {
            endpoint,
            params,
            rng: rand::thread_rng(),
            read_cnt: 0,
            write_cnt: 0,
            failed_cnt: 0,
        })
    }

    /// Issues one randomly chosen operation and waits for its outcome.
    async fn issue_one(&mut self, seq: u64) -> Result<(), AtomRegError> {
        let key = self.rng.gen_range(0..self.params.num_keys);
        let outcome = if self.rng.gen_range(0..100) < self.params.read_ratio {
            self.endpoint.invoke_read(key).await?
        } else {
            self.endpoint.invoke_write(key, seq).await?
        };

        match outcome {
            OpOutcome::Read { .. } => self.read_cnt += 1,
            OpOutcome::Write { .. } => self.write_cnt += 1,
            OpOutcome::Failed(failed) => {
                pf_warn!("{}", failed);
                self.failed_cnt += 1;
            }
        }
        Ok(())
    }

    /// Runs the benchmark to completion, logging a summary at the end.
    pub async fn run(&mut self) -> Result<(), AtomRegError> {
        pf_info!(
            "bench client {} run {} params {:?}",
            self.endpoint.id(),
            self.endpoint.run_id(),
            self.params
        );

        let start = Instant::now();
        for seq in 1..=self.params.num_ops {
            self.issue_one(seq).await?;
        }
        let elapsed_s = start.elapsed().as_secs_f64();

        let done = self.read_cnt + self.write_cnt;
        pf_info!(
            "done {} ops ({} reads, {} writes), {} failed in {:.2} s, {:.1} ops/s",
            done,
            self.read_cnt,
            self.write_cnt,
            self.failed_cnt,
            elapsed_s,
            done as f64 / elapsed_s
        );
        Ok(())
    }
}
