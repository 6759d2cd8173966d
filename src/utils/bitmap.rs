//! Compact replica-set bitmap.

use std::fmt;

use crate::register::ReplicaId;
use crate::utils::AtomRegError;

use fixedbitset::FixedBitSet;

/// Compact bitmap for replica ID -> bool mapping, sized to the cluster
/// population.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicaMap(FixedBitSet);

impl ReplicaMap {
    /// Creates a new bitmap for `population` replicas. If `ones` is true, all
    /// replicas are marked initially; otherwise none is.
    pub fn new(population: u8, ones: bool) -> Result<Self, AtomRegError> {
        if population == 0 {
            return Err(AtomRegError::msg(format!(
                "invalid bitmap population {}",
                population
            )));
        }
        let mut bitset = FixedBitSet::with_capacity(population as usize);
        if ones {
            bitset.set_range(.., true);
        }
        Ok(ReplicaMap(bitset))
    }

    /// Creates a new bitmap with exactly the given replicas marked.
    pub fn from_ids(
        population: u8,
        ids: impl IntoIterator<Item = ReplicaId>,
    ) -> Result<Self, AtomRegError> {
        let mut map = Self::new(population, false)?;
        for id in ids {
            map.set(id, true)?;
        }
        Ok(map)
    }

    /// Marks or unmarks the given replica.
    #[inline]
    pub fn set(&mut self, id: ReplicaId, flag: bool) -> Result<(), AtomRegError> {
        if id as usize >= self.0.len() {
            return Err(AtomRegError::msg(format!(
                "replica {} out of bound {}",
                id,
                self.0.len()
            )));
        }
        self.0.set(id as usize, flag);
        Ok(())
    }

    /// Gets whether the given replica is marked.
    #[inline]
    pub fn get(&self, id: ReplicaId) -> Result<bool, AtomRegError> {
        if id as usize >= self.0.len() {
            return Err(AtomRegError::msg(format!(
                "replica {} out of bound {}",
                id,
                self.0.len()
            )));
        }
        Ok(self.0[id as usize])
    }

    /// Returns the population this bitmap covers.
    #[inline]
    pub fn population(&self) -> u8 {
        self.0.len() as u8
    }

    /// Returns the number of marked replicas.
    #[inline]
    pub fn count(&self) -> u8 {
        self.0.count_ones(..) as u8
    }

    /// Unmarks every replica.
    #[inline]
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over the IDs of marked replicas in ascending order.
    #[inline]
    pub fn marked(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.0.ones().map(|idx| idx as ReplicaId)
    }
}

// Implement `Debug` trait manually for better trace printing.
impl fmt::Debug for ReplicaMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}; {:?}}}", self.population(), {
            self.marked().collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod bitmap_tests {
    use super::*;

    #[test]
    fn bitmap_new_invalid() {
        assert!(ReplicaMap::new(0, true).is_err());
    }

    #[test]
    fn bitmap_set_get() -> Result<(), AtomRegError> {
        let mut map = ReplicaMap::new(5, false)?;
        map.set(0, true)?;
        map.set(1, false)?;
        map.set(4, true)?;
        assert!(map.set(5, true).is_err());
        assert_eq!(map.get(0), Ok(true));
        assert_eq!(map.get(1), Ok(false));
        assert_eq!(map.get(4), Ok(true));
        assert!(map.get(5).is_err());
        Ok(())
    }

    #[test]
    fn bitmap_count_clear() -> Result<(), AtomRegError> {
        let mut map = ReplicaMap::from_ids(7, [0, 2, 3])?;
        assert_eq!(map.count(), 3);
        map.set(2, true)?;
        assert_eq!(map.count(), 3);
        map.clear();
        assert_eq!(map.count(), 0);
        assert_eq!(map.population(), 7);
        Ok(())
    }

    #[test]
    fn bitmap_marked() -> Result<(), AtomRegError> {
        let map = ReplicaMap::from_ids(5, [4, 1])?;
        assert_eq!(map.marked().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(format!("{:?}", map), "{5; [1, 4]}");
        Ok(())
    }
}
