//! Sorted, duplicate-free set of stream component identifiers.

use std::fmt;

/// Set of component ids (pids), always kept in ascending order.
///
/// The sorted representation makes listing deterministic and lets two
/// snapshots be diffed with a linear merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidSet {
    pids: Vec<u16>,
}

impl PidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `pid` unless already present.
    pub fn add(&mut self, pid: u16) {
        if let Err(pos) = self.pids.binary_search(&pid) {
            self.pids.insert(pos, pid);
        }
    }

    /// Remove `pid` if present.
    pub fn remove(&mut self, pid: u16) {
        if let Ok(pos) = self.pids.binary_search(&pid) {
            self.pids.remove(pos);
        }
    }

    pub fn contains(&self, pid: u16) -> bool {
        self.pids.binary_search(&pid).is_ok()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn clear(&mut self) {
        self.pids.clear();
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.pids
    }

    pub fn iter(&self) -> impl Iterator<Item = &u16> {
        self.pids.iter()
    }

    /// Comma separated ascending listing, empty string for an empty set.
    pub fn list(&self) -> String {
        self.pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Elements of `self` missing from `other`.
    pub fn difference(&self, other: &PidSet) -> PidSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.pids.len() {
            if j >= other.pids.len() || self.pids[i] < other.pids[j] {
                out.push(self.pids[i]);
                i += 1;
            } else if self.pids[i] == other.pids[j] {
                i += 1;
                j += 1;
            } else {
                j += 1;
            }
        }
        PidSet { pids: out }
    }

    /// Elements present in both sets.
    pub fn intersection(&self, other: &PidSet) -> PidSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.pids.len() && j < other.pids.len() {
            match self.pids[i].cmp(&other.pids[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(self.pids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        PidSet { pids: out }
    }
}

impl FromIterator<u16> for PidSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut set = PidSet::new();
        for pid in iter {
            set.add(pid);
        }
        set
    }
}

impl fmt::Display for PidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_sorted_unique() {
        let mut set = PidSet::new();
        for pid in [17, 0, 16, 17, 8191, 0] {
            set.add(pid);
        }
        assert_eq!(set.list(), "0,16,17,8191");
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut set: PidSet = [101, 102].into_iter().collect();
        let original = set.clone();

        set.add(103);
        set.remove(103);
        assert_eq!(set, original);

        set.add(101);
        assert_eq!(set, original);

        set.remove(999);
        assert_eq!(set, original);
    }

    #[test]
    fn test_empty_listing() {
        let mut set = PidSet::new();
        assert_eq!(set.list(), "");
        set.add(5);
        set.remove(5);
        assert_eq!(set.list(), "");
        assert!(set.is_empty());
    }

    #[test]
    fn test_difference_and_intersection() {
        let a: PidSet = [0, 16, 101, 102].into_iter().collect();
        let b: PidSet = [16, 102, 103].into_iter().collect();
        assert_eq!(a.difference(&b).list(), "0,101");
        assert_eq!(b.difference(&a).list(), "103");
        assert_eq!(a.intersection(&b).list(), "16,102");
    }

    #[test]
    fn test_arbitrary_sequence_stays_ordered() {
        let mut set = PidSet::new();
        let mut seed: u32 = 12345;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let pid = ((seed >> 8) % 64) as u16;
            if seed & 1 == 0 {
                set.add(pid);
            } else {
                set.remove(pid);
            }
            assert!(set.as_slice().windows(2).all(|w| w[0] < w[1]));
        }
    }
}
