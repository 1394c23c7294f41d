/*!
 * Unit Groups
 * Ordered sets of global unit ids, the input to team creation
 */

use crate::core::types::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered set of units
///
/// Team-local ranks follow the ascending order of global ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    members: BTreeSet<UnitId>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_units<I: IntoIterator<Item = UnitId>>(units: I) -> Self {
        Self {
            members: units.into_iter().collect(),
        }
    }

    /// Units `0..size`
    pub fn all(size: usize) -> Self {
        Self::from_units((0..size as u32).map(UnitId))
    }

    pub fn add_member(&mut self, unit: UnitId) -> bool {
        self.members.insert(unit)
    }

    pub fn remove_member(&mut self, unit: UnitId) -> bool {
        self.members.remove(&unit)
    }

    pub fn is_member(&self, unit: UnitId) -> bool {
        self.members.contains(&unit)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in rank order
    pub fn members(&self) -> Vec<UnitId> {
        self.members.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.members.iter().copied()
    }

    pub fn union(&self, other: &Group) -> Group {
        Group {
            members: self.members.union(&other.members).copied().collect(),
        }
    }

    pub fn intersect(&self, other: &Group) -> Group {
        Group {
            members: self.members.intersection(&other.members).copied().collect(),
        }
    }

    pub fn is_subset_of(&self, other: &Group) -> bool {
        self.members.is_subset(&other.members)
    }

    /// Split into `n` contiguous groups whose sizes differ by at most one.
    /// Trailing groups are empty when `n` exceeds the member count.
    pub fn split(&self, n: usize) -> Vec<Group> {
        if n == 0 {
            return Vec::new();
        }
        let members = self.members();
        let base = members.len() / n;
        let extra = members.len() % n;

        let mut groups = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let len = base + usize::from(i < extra);
            groups.push(Group::from_units(members[start..start + len].iter().copied()));
            start += len;
        }
        groups
    }
}

impl FromIterator<UnitId> for Group {
    fn from_iter<I: IntoIterator<Item = UnitId>>(iter: I) -> Self {
        Group::from_units(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(ids: &[u32]) -> Group {
        ids.iter().copied().map(UnitId).collect()
    }

    #[test]
    fn test_members_are_ordered() {
        let group = units(&[5, 1, 3]);
        assert_eq!(group.members(), vec![UnitId(1), UnitId(3), UnitId(5)]);
        assert!(group.is_member(UnitId(3)));
        assert!(!group.is_member(UnitId(2)));
    }

    #[test]
    fn test_union_and_intersect() {
        let a = units(&[0, 1, 2]);
        let b = units(&[2, 3]);
        assert_eq!(a.union(&b), units(&[0, 1, 2, 3]));
        assert_eq!(a.intersect(&b), units(&[2]));
        assert!(units(&[2]).is_subset_of(&a));
    }

    #[test]
    fn test_split_balanced() {
        let groups = Group::all(5).split(2);
        assert_eq!(groups, vec![units(&[0, 1, 2]), units(&[3, 4])]);

        let groups = Group::all(2).split(3);
        assert_eq!(groups.len(), 3);
        assert!(groups[2].is_empty());
        assert!(Group::all(4).split(0).is_empty());
    }

    #[test]
    fn test_add_remove() {
        let mut group = Group::new();
        assert!(group.add_member(UnitId(4)));
        assert!(!group.add_member(UnitId(4)));
        assert!(group.remove_member(UnitId(4)));
        assert!(group.is_empty());
    }
}
