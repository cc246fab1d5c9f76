//! Partitioning siblings into priority waves.

use std::collections::BTreeMap;

/// Order in which waves run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Load: lowest priority first.
    Ascending,
    /// Unload: highest priority first.
    Descending,
}

/// Siblings sharing one priority value.
#[derive(Debug)]
pub struct Wave<T> {
    pub priority: i32,
    pub members: Vec<T>,
}

/// Group `members` by priority and order the groups by `direction`.
///
/// Members keep their input order inside a wave.
pub fn partition<T>(members: Vec<(i32, T)>, direction: Direction) -> Vec<Wave<T>> {
    let mut grouped: BTreeMap<i32, Vec<T>> = BTreeMap::new();
    for (priority, member) in members {
        grouped.entry(priority).or_default().push(member);
    }
    let waves = grouped
        .into_iter()
        .map(|(priority, members)| Wave { priority, members });
    match direction {
        Direction::Ascending => waves.collect(),
        Direction::Descending => waves.rev().collect(),
    }
}
