//! 库所吞吐统计：无锁计数器与按标识排序的快照。
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::net::ids::PlaceId;

/// Point-in-time copy of one place's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Tokens received from inbound transitions.
    pub accepted: u64,
    /// Tokens forwarded into the place's input.
    pub processing: u64,
    /// Tokens handed to outbound transitions.
    pub sent: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"{{"Accepted": {}, "Processing": {}, "Sent": {}}}"#,
            self.accepted, self.processing, self.sent
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    accepted: AtomicU64,
    processing: AtomicU64,
    sent: AtomicU64,
}

impl Counters {
    pub(crate) fn accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processing(&self) {
        self.processing.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// No consistency across the three fields.
    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            accepted: self.accepted.load(Ordering::Relaxed),
            processing: self.processing.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

/// Stats of every place of a net, ordered by place id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NetStats(BTreeMap<PlaceId, Stats>);

impl NetStats {
    pub fn get(&self, place: &str) -> Option<Stats> {
        self.0.get(place).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlaceId, &Stats)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PlaceId, Stats)> for NetStats {
    fn from_iter<I: IntoIterator<Item = (PlaceId, Stats)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NetStats {
    type Item = (&'a PlaceId, &'a Stats);
    type IntoIter = std::collections::btree_map::Iter<'a, PlaceId, Stats>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for NetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (place, stats) in &self.0 {
            writeln!(f, "{place} {stats}")?;
        }
        Ok(())
    }
}
