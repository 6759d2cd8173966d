//! Write timestamps: `(seq, writer)` pairs ordered lexicographically.

use std::fmt;

use crate::register::ClientId;

use serde::{Deserialize, Serialize};

/// Logical write timestamp. The derived ordering compares `seq` first and
/// breaks ties by `writer`, which makes concurrent writes by different
/// clients totally ordered.
#[derive(
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
)]
pub struct Timestamp {
    /// Logical clock.
    pub seq: u64,

    /// Identity of the writer that produced it.
    pub writer: ClientId,
}

impl Timestamp {
    /// Sentinel timestamp held by every slot before its first write.
    pub const ZERO: Timestamp = Timestamp { seq: 0, writer: 0 };

    pub fn new(seq: u64, writer: ClientId) -> Self {
        Timestamp { seq, writer }
    }

    /// Returns the timestamp a writer uses to order its write after `self`,
    /// or `None` if the sequence number space is exhausted.
    #[inline]
    pub fn successor(&self, writer: ClientId) -> Option<Self> {
        Some(Timestamp {
            seq: self.seq.checked_add(1)?,
            writer,
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.seq, self.writer)
    }
}

#[cfg(test)]
mod timestamp_tests {
    use super::*;

    #[test]
    fn seq_dominates_writer() {
        assert!(Timestamp::new(2, 0) > Timestamp::new(1, 9));
        assert!(Timestamp::new(1, 3) > Timestamp::new(1, 2));
        assert_eq!(Timestamp::new(4, 4), Timestamp::new(4, 4));
    }

    #[test]
    fn sentinel_is_minimum() {
        assert_eq!(Timestamp::default(), Timestamp::ZERO);
        assert!(Timestamp::new(0, 1) > Timestamp::ZERO);
        assert!(Timestamp::new(1, 0) > Timestamp::ZERO);
    }

    #[test]
    fn successor_orders_after() {
        let observed = Timestamp::new(7, 12);
        let next = observed.successor(3).unwrap();
        assert_eq!(next, Timestamp::new(8, 3));
        assert!(next > observed);
        assert_eq!(format!("{}", next), "(8,3)");
    }

    #[test]
    fn successor_exhausted() {
        assert_eq!(Timestamp::new(u64::MAX, 1).successor(2), None);
        assert_eq!(
            Timestamp::new(u64::MAX - 1, 1).successor(2),
            Some(Timestamp::new(u64::MAX, 2))
        );
    }
}
