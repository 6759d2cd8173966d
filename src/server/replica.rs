//! Register replica state: one slot per key, answered reactively.

use std::collections::HashMap;

use crate::register::{
    Key, ReadRequest, ReadResponse, RegisterMsg, ReplicaId, RunId, Timestamp,
    Value, WriteAck, WriteRequest,
};

/// Latest `(timestamp, value)` a replica has accepted for one key.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct RegisterSlot {
    pub timestamp: Timestamp,
    pub value: Value,
}

/// Register replica state machine. Owns its slots exclusively; every
/// mutation goes through `on_write()`.
///
/// Keys that have never been written have no slot and read as the sentinel
/// `RegisterSlot::default()`.
#[derive(Debug)]
pub struct RegisterReplica {
    /// My replica ID.
    id: ReplicaId,

    /// Highest run ID seen so far; `None` before the first message.
    run_id: Option<RunId>,

    /// Map from key -> slot, populated on first applied write.
    slots: HashMap<Key, RegisterSlot>,
}

impl RegisterReplica {
    /// Creates a replica with no slots.
    pub fn new(id: ReplicaId) -> Self {
        RegisterReplica {
            id,
            run_id: None,
            slots: HashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    #[inline]
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Current contents of the slot for `key`, or the sentinel if the key
    /// has never been written.
    pub fn slot(&self, key: Key) -> RegisterSlot {
        self.slots.get(&key).copied().unwrap_or_default()
    }

    /// Number of keys with a slot.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Answers a read with the slot's current contents. Never mutates state.
    pub fn on_read(&self, req: &ReadRequest) -> ReadResponse {
        let slot = self.slot(req.key);
        ReadResponse {
            run_id: req.run_id,
            key: req.key,
            rid: req.rid,
            timestamp: slot.timestamp,
            value: slot.value,
        }
    }

    /// Applies a write iff its timestamp is strictly newer than the slot's,
    /// then acknowledges in either case.
    pub fn on_write(&mut self, req: &WriteRequest) -> WriteAck {
        let current = self.slot(req.key).timestamp;
        if req.timestamp > current {
            pf_trace!(
                "replica {} key {} slot {} -> {} value {}",
                self.id,
                req.key,
                current,
                req.timestamp,
                req.value
            );
            // slot created only by the first applied write
            self.slots.insert(
                req.key,
                RegisterSlot {
                    timestamp: req.timestamp,
                    value: req.value,
                },
            );
        } else {
            pf_trace!(
                "replica {} key {} write {} superseded by {}",
                self.id,
                req.key,
                req.timestamp,
                current
            );
        }

        WriteAck {
            run_id: req.run_id,
            key: req.key,
            rid: req.rid,
        }
    }

    /// Checks a message's run ID against the current run. A newer run
    /// starts from fresh register state; messages from an older run are
    /// leftovers and get dropped. Returns whether the message is admitted.
    fn admit_run(&mut self, run_id: RunId) -> bool {
        match self.run_id {
            Some(current) if run_id < current => false,
            Some(current) if run_id == current => true,
            _ => {
                if !self.slots.is_empty() {
                    pf_debug!(
                        "replica {} entering run {}, clearing {} slots",
                        self.id,
                        run_id,
                        self.slots.len()
                    );
                }
                self.slots.clear();
                self.run_id = Some(run_id);
                true
            }
        }
    }

    /// Dispatches a protocol message, returning the reply to send back if
    /// any.
    pub fn handle(&mut self, msg: RegisterMsg) -> Option<RegisterMsg> {
        let op_id = msg.op_id();
        if !self.admit_run(op_id.run_id) {
            pf_debug!(
                "replica {} dropping msg of stale run {}",
                self.id,
                op_id
            );
            return None;
        }

        match msg {
            RegisterMsg::Read(req) => {
                Some(RegisterMsg::ReadResp(self.on_read(&req)))
            }
            RegisterMsg::Write(req) => {
                Some(RegisterMsg::WriteAck(self.on_write(&req)))
            }
            RegisterMsg::ReadResp(_) | RegisterMsg::WriteAck(_) => {
                pf_warn!(
                    "replica {} ignoring unexpected reply kind {:?}",
                    self.id,
                    msg
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod replica_tests {
    use super::*;

    fn read(run_id: RunId, key: Key, rid: u64) -> RegisterMsg {
        RegisterMsg::Read(ReadRequest { run_id, key, rid })
    }

    fn write(
        run_id: RunId,
        key: Key,
        rid: u64,
        timestamp: Timestamp,
        value: Value,
    ) -> WriteRequest {
        WriteRequest {
            run_id,
            key,
            rid,
            timestamp,
            value,
        }
    }

    #[test]
    fn unknown_key_reads_sentinel() {
        let mut replica = RegisterReplica::new(0);
        let reply = replica.handle(read(1, 77, 0));
        assert_eq!(
            reply,
            Some(RegisterMsg::ReadResp(ReadResponse {
                run_id: 1,
                key: 77,
                rid: 0,
                timestamp: Timestamp::ZERO,
                value: 0,
            }))
        );
        assert_eq!(replica.num_slots(), 0);
    }

    #[test]
    fn newer_write_applies() {
        let mut replica = RegisterReplica::new(1);
        let ack = replica.on_write(&write(0, 5, 3, Timestamp::new(1, 9), 42));
        assert_eq!(
            ack,
            WriteAck {
                run_id: 0,
                key: 5,
                rid: 3
            }
        );
        assert_eq!(
            replica.slot(5),
            RegisterSlot {
                timestamp: Timestamp::new(1, 9),
                value: 42
            }
        );
    }

    #[test]
    fn older_write_superseded_but_acked() {
        let mut replica = RegisterReplica::new(0);
        replica.on_write(&write(0, 5, 1, Timestamp::new(2, 1), 20));
        let reply = replica
            .handle(RegisterMsg::Write(write(0, 5, 2, Timestamp::new(1, 4), 10)));
        assert!(matches!(reply, Some(RegisterMsg::WriteAck(_))));
        assert_eq!(replica.slot(5).value, 20);
        // equal timestamp does not overwrite either
        replica.on_write(&write(0, 5, 3, Timestamp::new(2, 1), 99));
        assert_eq!(replica.slot(5).value, 20);
    }

    #[test]
    fn sentinel_write_back_creates_no_slot() {
        let mut replica = RegisterReplica::new(0);
        let ack = replica.on_write(&write(0, 6, 1, Timestamp::ZERO, 0));
        assert_eq!(ack.key, 6);
        assert_eq!(replica.num_slots(), 0);
        replica.on_write(&write(0, 6, 2, Timestamp::new(1, 2), 5));
        assert_eq!(replica.num_slots(), 1);
    }

    #[test]
    fn duplicate_write_idempotent() {
        let req = write(0, 8, 4, Timestamp::new(3, 2), 33);
        let mut once = RegisterReplica::new(0);
        once.on_write(&req);
        let mut twice = RegisterReplica::new(0);
        twice.on_write(&req);
        twice.on_write(&req);
        assert_eq!(once.slot(8), twice.slot(8));
        assert_eq!(once.num_slots(), twice.num_slots());
    }

    #[test]
    fn read_does_not_mutate() {
        let mut replica = RegisterReplica::new(2);
        replica.on_write(&write(0, 1, 0, Timestamp::new(1, 1), 11));
        let before = replica.slot(1);
        let resp = replica.on_read(&ReadRequest {
            run_id: 0,
            key: 1,
            rid: 9,
        });
        assert_eq!(resp.timestamp, before.timestamp);
        assert_eq!(resp.value, 11);
        assert_eq!(replica.slot(1), before);
    }

    #[test]
    fn keys_independent() {
        let mut replica = RegisterReplica::new(0);
        replica.on_write(&write(0, 1, 0, Timestamp::new(5, 1), 50));
        replica.on_write(&write(0, 2, 1, Timestamp::new(1, 1), 10));
        assert_eq!(replica.slot(1).value, 50);
        assert_eq!(replica.slot(2).value, 10);
        assert_eq!(replica.slot(3), RegisterSlot::default());
    }

    #[test]
    fn run_scoping() {
        let mut replica = RegisterReplica::new(0);
        replica.handle(RegisterMsg::Write(write(
            2,
            1,
            0,
            Timestamp::new(1, 1),
            10,
        )));
        assert_eq!(replica.run_id(), Some(2));
        assert_eq!(replica.slot(1).value, 10);

        // leftover from an earlier run is dropped
        assert_eq!(replica.handle(read(1, 1, 0)), None);
        assert_eq!(replica.slot(1).value, 10);

        // a newer run starts from scratch
        let reply = replica.handle(read(3, 1, 0));
        match reply {
            Some(RegisterMsg::ReadResp(resp)) => {
                assert_eq!(resp.timestamp, Timestamp::ZERO);
                assert_eq!(resp.value, 0);
            }
            _ => panic!("unexpected reply {:?}", reply),
        }
        assert_eq!(replica.run_id(), Some(3));
    }

    #[test]
    fn reply_kinds_ignored() {
        let mut replica = RegisterReplica::new(0);
        let ack = RegisterMsg::WriteAck(WriteAck {
            run_id: 0,
            key: 1,
            rid: 0,
        });
        assert_eq!(replica.handle(ack), None);
    }
}
