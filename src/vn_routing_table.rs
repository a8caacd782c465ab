// Routing Table
//
// One entry per destination. Sequence numbers never move backwards; a broken
// route is marked with the next odd number.

use std::collections::BTreeMap;

use crate::vn_interface::{HopCount, NodeId, SeqNo, SimTime, INFINITE_HOPS};

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum RouteState {
    Valid,
    /// Route broken or timed out, kept for its sequence number
    Stale,
    Unreachable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RouteEntry {
    pub dest: NodeId,
    pub next_hop: NodeId,
    pub hop_count: HopCount,
    pub seq: SeqNo,
    pub state: RouteState,
    pub expires_at: SimTime,
}

impl RouteEntry {
    pub fn valid(dest: NodeId, next_hop: NodeId, hop_count: HopCount, seq: SeqNo, expires_at: SimTime) -> Self {
        Self {
            dest,
            next_hop,
            hop_count,
            seq,
            state: RouteState::Valid,
            expires_at,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == RouteState::Valid
    }

    /// Valid and not timed out
    pub fn is_active(&self, now: SimTime) -> bool {
        self.is_valid() && self.expires_at > now
    }

    fn same_route(&self, other: &RouteEntry) -> bool {
        self.next_hop == other.next_hop
            && self.hop_count == other.hop_count
            && self.seq == other.seq
            && self.state == other.state
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouteUpdate {
    Inserted,
    Replaced,
    /// Same route, new lifetime
    Refreshed,
    /// Older sequence number than the installed entry
    Rejected,
}

impl RouteUpdate {
    pub fn changed(&self) -> bool {
        matches!(self, RouteUpdate::Inserted | RouteUpdate::Replaced)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    entries: BTreeMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dest: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&dest)
    }

    pub fn active_route(&self, dest: NodeId, now: SimTime) -> Option<&RouteEntry> {
        self.entries.get(&dest).filter(|entry| entry.is_active(now))
    }

    /// Install `entry` unless it carries an older sequence number.
    /// Which of two equally fresh routes is better is up to the protocol.
    pub fn update(&mut self, entry: RouteEntry) -> RouteUpdate {
        match self.entries.get_mut(&entry.dest) {
            None => {
                self.entries.insert(entry.dest, entry);
                RouteUpdate::Inserted
            }
            Some(existing) if entry.seq < existing.seq => RouteUpdate::Rejected,
            Some(existing) if existing.same_route(&entry) => {
                existing.expires_at = existing.expires_at.max(entry.expires_at);
                RouteUpdate::Refreshed
            }
            Some(existing) => {
                *existing = entry;
                RouteUpdate::Replaced
            }
        }
    }

    /// Extend the lifetime of a valid route
    pub fn refresh(&mut self, dest: NodeId, expires_at: SimTime) -> bool {
        match self.entries.get_mut(&dest) {
            Some(entry) if entry.is_valid() => {
                entry.expires_at = entry.expires_at.max(expires_at);
                true
            }
            _ => false,
        }
    }

    pub fn mark_stale(&mut self, dest: NodeId) -> bool {
        match self.entries.get_mut(&dest) {
            Some(entry) if entry.is_valid() => {
                entry.state = RouteState::Stale;
                true
            }
            _ => false,
        }
    }

    /// Forced-odd marking: an even sequence number moves to the next odd one,
    /// an odd one stays. Returns the resulting sequence number.
    pub fn mark_unreachable(&mut self, dest: NodeId) -> Option<SeqNo> {
        let entry = self.entries.get_mut(&dest)?;
        if entry.seq % 2 == 0 {
            entry.seq = entry.seq.wrapping_add(1);
        }
        entry.hop_count = INFINITE_HOPS;
        entry.state = RouteState::Unreachable;
        Some(entry.seq)
    }

    /// Destinations currently routed through `next_hop` (in any state)
    pub fn entries_via(&self, next_hop: NodeId) -> Vec<NodeId> {
        self.entries
            .values()
            .filter(|entry| entry.next_hop == next_hop)
            .map(|entry| entry.dest)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_update_outcomes() {
        let mut table = RoutingTable::new();
        assert_eq!(table.update(RouteEntry::valid(5, 1, 3, 10, 100)), RouteUpdate::Inserted);
        assert_eq!(table.update(RouteEntry::valid(5, 1, 3, 10, 200)), RouteUpdate::Refreshed);
        assert_eq!(table.get(5).unwrap().expires_at, 200);
        assert_eq!(table.update(RouteEntry::valid(5, 2, 2, 10, 200)), RouteUpdate::Replaced);
        assert_eq!(table.update(RouteEntry::valid(5, 3, 1, 8, 300)), RouteUpdate::Rejected);

        let entry = table.get(5).unwrap();
        assert_eq!((entry.next_hop, entry.hop_count, entry.seq), (2, 2, 10));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forced_odd_marking() {
        let mut table = RoutingTable::new();
        table.update(RouteEntry::valid(1, 1, 1, 4, 100));
        table.update(RouteEntry::valid(2, 1, 2, 7, 100));

        assert_eq!(table.mark_unreachable(1), Some(5));
        assert_eq!(table.mark_unreachable(2), Some(7));
        // marking twice keeps the odd number
        assert_eq!(table.mark_unreachable(1), Some(5));
        assert_eq!(table.get(1).unwrap().hop_count, INFINITE_HOPS);
        assert_eq!(table.get(1).unwrap().state, RouteState::Unreachable);
        assert_eq!(table.mark_unreachable(9), None);
    }

    #[test]
    fn test_active_route_expires() {
        let mut table = RoutingTable::new();
        table.update(RouteEntry::valid(3, 2, 2, 0, 1_000));
        assert!(table.active_route(3, 999).is_some());
        assert!(table.active_route(3, 1_000).is_none());

        assert!(table.refresh(3, 5_000));
        assert!(table.active_route(3, 1_000).is_some());

        assert!(table.mark_stale(3));
        assert!(table.active_route(3, 1_000).is_none());
        assert!(!table.refresh(3, 9_000));
    }

    #[test]
    fn test_entries_via() {
        let mut table = RoutingTable::new();
        table.update(RouteEntry::valid(1, 1, 1, 0, 100));
        table.update(RouteEntry::valid(2, 1, 2, 0, 100));
        table.update(RouteEntry::valid(3, 4, 2, 0, 100));
        assert_eq!(table.entries_via(1), vec![1, 2]);
        assert_eq!(table.entries_via(4), vec![3]);
        assert!(table.entries_via(7).is_empty());
    }

    #[test]
    fn test_sequence_numbers_never_decrease() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut table = RoutingTable::new();
        let mut last_seen = [0u32; 4];

        for _ in 0..2_000 {
            let dest = rng.gen_range(0..4u32);
            match rng.gen_range(0..4) {
                0 => {
                    table.mark_unreachable(dest);
                }
                1 => {
                    table.mark_stale(dest);
                }
                _ => {
                    let seq = rng.gen_range(0..50);
                    table.update(RouteEntry::valid(dest, rng.gen_range(0..4), rng.gen_range(1..5), seq, 0));
                }
            }
            if let Some(entry) = table.get(dest) {
                assert!(entry.seq >= last_seen[dest as usize]);
                last_seen[dest as usize] = entry.seq;
            }
        }
    }
}
