//! Per-operation coordinator state machine for reads and writes.
//!
//! The coordinator does no I/O itself: `begin_read()`/`begin_write()` return
//! the message to broadcast, and every incoming reply or timeout is fed back
//! through `handle_reply()`/`handle_timeout()`, which tell the caller what to
//! do next via a `Step`.
//!
//! Reads go `Idle -> AwaitingReadQuorum -> AwaitingWriteBackQuorum -> Done`;
//! the write-back re-propagates the highest timestamped value to a majority
//! before returning it, so that no later read can observe an older value.
//! Writes go `Idle -> AwaitingTimestampQuorum -> AwaitingWriteQuorum -> Done`.

use std::fmt;

use crate::register::{
    ClientId, Key, OperationId, QuorumTracker, ReadRequest, RegisterMsg,
    ReplicaId, RequestId, RunId, Timestamp, Value, WriteRequest,
};
use crate::utils::AtomRegError;

/// Coordinator phase.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Idle,
    AwaitingReadQuorum,
    AwaitingWriteBackQuorum,
    AwaitingTimestampQuorum,
    AwaitingWriteQuorum,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An operation abandoned after exhausting its retries in `phase`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OperationFailed {
    pub key: Key,
    pub rid: RequestId,
    pub phase: Phase,
}

impl fmt::Display for OperationFailed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "operation {} on key {} failed in {}",
            self.rid, self.key, self.phase
        )
    }
}

/// Result of one operation as delivered to the run controller.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpOutcome {
    /// Read completed with the selected value and its timestamp.
    Read {
        rid: RequestId,
        value: Value,
        timestamp: Timestamp,
    },

    /// Write completed with the timestamp it was ordered at.
    Write {
        rid: RequestId,
        timestamp: Timestamp,
    },

    /// Operation abandoned.
    Failed(OperationFailed),
}

impl OpOutcome {
    /// Value returned by a completed read.
    pub fn read_value(&self) -> Option<Value> {
        match self {
            Self::Read { value, .. } => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What the caller should do after feeding an event to the coordinator.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Step {
    /// Nothing to do; keep waiting.
    Pending,

    /// Broadcast this message to every replica and restart the phase timer.
    Broadcast(RegisterMsg),

    /// Operation finished.
    Finished(OpOutcome),
}

/// Kind of the in-flight operation.
#[derive(Debug, Clone, Copy)]
enum OpKind {
    Read,
    Write { value: Value },
}

/// Bookkeeping of the in-flight operation.
#[derive(Debug)]
struct InFlight {
    op_id: OperationId,
    key: Key,
    kind: OpKind,

    /// Timeouts suffered in the current phase.
    retries: u32,

    /// Message of the current phase, re-broadcast on timeout.
    phase_msg: RegisterMsg,
}

/// Client coordinator; runs one operation at a time.
#[derive(Debug)]
pub struct Coordinator {
    /// My client ID, used as writer identity.
    me: ClientId,

    /// Timeouts tolerated per phase before giving up.
    max_retries: u32,

    /// Next request ID to assign.
    next_rid: RequestId,

    /// Current phase.
    phase: Phase,

    /// The in-flight operation, if any.
    op: Option<InFlight>,

    /// Read replies of the current phase.
    read_replies: QuorumTracker<(Timestamp, Value)>,

    /// Write acks of the current phase.
    write_acks: QuorumTracker<()>,
}

impl Coordinator {
    /// Creates a coordinator for a cluster of `population` replicas.
    pub fn new(
        me: ClientId,
        population: u8,
        max_retries: u32,
    ) -> Result<Self, AtomRegError> {
        Ok(Coordinator {
            me,
            max_retries,
            next_rid: 0,
            phase: Phase::Idle,
            op: None,
            read_replies: QuorumTracker::new(population)?,
            write_acks: QuorumTracker::new(population)?,
        })
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// ID of the in-flight operation, if any.
    pub fn in_flight(&self) -> Option<OperationId> {
        self.op.as_ref().map(|op| op.op_id)
    }

    /// Starts a new operation, superseding whatever was in flight, and
    /// returns the phase-1 read broadcast.
    fn begin(&mut self, run_id: RunId, key: Key, kind: OpKind) -> RegisterMsg {
        if let Some(old) = self.op.take() {
            pf_debug!(
                "client {} op {} superseded in {}",
                self.me,
                old.op_id,
                self.phase
            );
        }

        let op_id = OperationId {
            run_id,
            rid: self.next_rid,
        };
        self.next_rid += 1;

        let phase_msg = RegisterMsg::Read(ReadRequest {
            run_id,
            key,
            rid: op_id.rid,
        });
        self.phase = match kind {
            OpKind::Read => Phase::AwaitingReadQuorum,
            OpKind::Write { .. } => Phase::AwaitingTimestampQuorum,
        };
        self.read_replies.reset();
        self.write_acks.reset();
        self.op = Some(InFlight {
            op_id,
            key,
            kind,
            retries: 0,
            phase_msg: phase_msg.clone(),
        });

        pf_debug!(
            "client {} op {} key {} enter {}",
            self.me,
            op_id,
            key,
            self.phase
        );
        phase_msg
    }

    /// Starts a read of `key`.
    pub fn begin_read(&mut self, run_id: RunId, key: Key) -> RegisterMsg {
        self.begin(run_id, key, OpKind::Read)
    }

    /// Starts a write of `value` to `key`.
    pub fn begin_write(
        &mut self,
        run_id: RunId,
        key: Key,
        value: Value,
    ) -> RegisterMsg {
        self.begin(run_id, key, OpKind::Write { value })
    }

    /// Moves the in-flight operation into its write phase, broadcasting
    /// `(timestamp, value)`.
    fn enter_write_phase(
        &mut self,
        next: Phase,
        timestamp: Timestamp,
        value: Value,
    ) -> Step {
        let Some(op) = self.op.as_mut() else {
            return Step::Pending;
        };
        let phase_msg = RegisterMsg::Write(WriteRequest {
            run_id: op.op_id.run_id,
            key: op.key,
            rid: op.op_id.rid,
            timestamp,
            value,
        });
        op.retries = 0;
        op.phase_msg = phase_msg.clone();
        self.phase = next;
        self.write_acks.reset();

        pf_debug!(
            "client {} op {} enter {} with {} value {}",
            self.me,
            op.op_id,
            next,
            timestamp,
            value
        );
        Step::Broadcast(phase_msg)
    }

    /// Wraps up the in-flight operation.
    fn finish(&mut self, outcome: OpOutcome) -> Step {
        self.op = None;
        self.phase = Phase::Done;
        Step::Finished(outcome)
    }

    /// Abandons the in-flight operation in its current phase.
    fn fail(&mut self) -> Step {
        let Some(op) = self.op.take() else {
            return Step::Pending;
        };
        let failed = OperationFailed {
            key: op.key,
            rid: op.op_id.rid,
            phase: self.phase,
        };
        pf_warn!("client {} {}", self.me, failed);
        self.phase = Phase::Idle;
        Step::Finished(OpOutcome::Failed(failed))
    }

    /// Feeds a reply from `replica`. Replies not belonging to the in-flight
    /// operation and phase are discarded.
    pub fn handle_reply(
        &mut self,
        replica: ReplicaId,
        msg: RegisterMsg,
    ) -> Result<Step, AtomRegError> {
        let Some(op) = self.op.as_ref() else {
            pf_trace!("client {} idle, discarding {:?}", self.me, msg);
            return Ok(Step::Pending);
        };
        if msg.op_id() != op.op_id || msg.key() != op.key {
            pf_trace!(
                "client {} discarding stale reply {} from {}",
                self.me,
                msg.op_id(),
                replica
            );
            return Ok(Step::Pending);
        }
        let (op_id, key, kind) = (op.op_id, op.key, op.kind);

        match (self.phase, msg) {
            (
                Phase::AwaitingReadQuorum | Phase::AwaitingTimestampQuorum,
                RegisterMsg::ReadResp(resp),
            ) => {
                self.read_replies
                    .record(replica, (resp.timestamp, resp.value))?;
                if !self.read_replies.is_satisfied() {
                    return Ok(Step::Pending);
                }
                let Some((max_ts, max_value)) =
                    self.read_replies.max_timestamped()
                else {
                    return Ok(Step::Pending);
                };

                Ok(match kind {
                    OpKind::Read => self.enter_write_phase(
                        Phase::AwaitingWriteBackQuorum,
                        max_ts,
                        max_value,
                    ),
                    OpKind::Write { value } => {
                        match max_ts.successor(self.me) {
                            Some(timestamp) => self.enter_write_phase(
                                Phase::AwaitingWriteQuorum,
                                timestamp,
                                value,
                            ),
                            None => {
                                pf_warn!(
                                    "client {} key {} seq exhausted at {}",
                                    self.me,
                                    key,
                                    max_ts
                                );
                                self.fail()
                            }
                        }
                    }
                })
            }

            (
                Phase::AwaitingWriteBackQuorum | Phase::AwaitingWriteQuorum,
                RegisterMsg::WriteAck(_),
            ) => {
                self.write_acks.record(replica, ())?;
                if !self.write_acks.is_satisfied() {
                    return Ok(Step::Pending);
                }

                let Some(RegisterMsg::Write(written)) =
                    self.op.as_ref().map(|op| &op.phase_msg)
                else {
                    return Ok(Step::Pending);
                };
                let timestamp = written.timestamp;
                let value = written.value;
                pf_debug!(
                    "client {} op {} done at {}",
                    self.me,
                    op_id,
                    timestamp
                );

                Ok(self.finish(match kind {
                    OpKind::Read => OpOutcome::Read {
                        rid: op_id.rid,
                        value,
                        timestamp,
                    },
                    OpKind::Write { .. } => OpOutcome::Write {
                        rid: op_id.rid,
                        timestamp,
                    },
                }))
            }

            (phase, msg) => {
                // late reply of an earlier phase, or not a reply at all
                pf_trace!(
                    "client {} in {} discarding {:?} from {}",
                    self.me,
                    phase,
                    msg,
                    replica
                );
                Ok(Step::Pending)
            }
        }
    }

    /// Handles a phase timeout: re-broadcasts the current phase's message,
    /// or abandons the operation once retries are exhausted.
    pub fn handle_timeout(&mut self) -> Step {
        let phase = self.phase;
        let max_retries = self.max_retries;
        let Some(op) = self.op.as_mut() else {
            return Step::Pending;
        };

        if op.retries >= max_retries {
            return self.fail();
        }

        op.retries += 1;
        pf_debug!(
            "client {} op {} timed out in {}, retry {}/{}",
            self.me,
            op.op_id,
            phase,
            op.retries,
            max_retries
        );
        Step::Broadcast(op.phase_msg.clone())
    }
}
