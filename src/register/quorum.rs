//! Majority quorum bookkeeping for one protocol phase.

use crate::register::{ReplicaId, Timestamp, Value};
use crate::utils::{AtomRegError, ReplicaMap};

/// Majority quorum size for a cluster of `population` replicas, i.e.
/// `ceil((N + 1) / 2)`.
#[inline]
pub fn quorum_size(population: u8) -> u8 {
    population / 2 + 1
}

/// Collects replies of one phase, counting each replica at most once.
#[derive(Debug, Clone)]
pub struct QuorumTracker<P> {
    /// Replicas that have replied in the current phase.
    acks: ReplicaMap,

    /// Number of distinct replies that satisfies the phase.
    quorum_cnt: u8,

    /// First payload received from each replied replica.
    payloads: Vec<(ReplicaId, P)>,
}

impl<P> QuorumTracker<P> {
    /// Creates a tracker for a cluster of `population` replicas.
    pub fn new(population: u8) -> Result<Self, AtomRegError> {
        Ok(QuorumTracker {
            acks: ReplicaMap::new(population, false)?,
            quorum_cnt: quorum_size(population),
            payloads: Vec::with_capacity(population as usize),
        })
    }

    /// Records a reply from `replica`. Returns `Ok(false)` if that replica
    /// had already been counted in this phase, in which case the payload is
    /// dropped.
    pub fn record(
        &mut self,
        replica: ReplicaId,
        payload: P,
    ) -> Result<bool, AtomRegError> {
        if self.acks.get(replica)? {
            return Ok(false);
        }
        self.acks.set(replica, true)?;
        self.payloads.push((replica, payload));
        Ok(true)
    }

    /// Whether a majority of distinct replicas has replied.
    #[inline]
    pub fn is_satisfied(&self) -> bool {
        self.acks.count() >= self.quorum_cnt
    }

    /// Forgets all replies, for the start of a new phase.
    pub fn reset(&mut self) {
        self.acks.clear();
        self.payloads.clear();
    }

    /// Number of distinct replicas counted so far.
    #[inline]
    pub fn count(&self) -> u8 {
        self.acks.count()
    }

    #[inline]
    pub fn quorum_cnt(&self) -> u8 {
        self.quorum_cnt
    }

    /// Replicas counted so far.
    pub fn replied(&self) -> &ReplicaMap {
        &self.acks
    }

    pub fn payloads(&self) -> impl Iterator<Item = &(ReplicaId, P)> {
        self.payloads.iter()
    }
}

impl QuorumTracker<(Timestamp, Value)> {
    /// Returns the `(timestamp, value)` pair with the highest timestamp
    /// among recorded replies, or `None` if nothing was recorded.
    pub fn max_timestamped(&self) -> Option<(Timestamp, Value)> {
        self.payloads
            .iter()
            .map(|(_, pair)| *pair)
            .fold(None, |best, pair| match best {
                Some(b) if b.0 >= pair.0 => Some(b),
                _ => Some(pair),
            })
    }
}
