//! The prototype route table.
//!
//! Accumulates hop-counted announcements from peers. Rebuilt from
//! scratch on reset; the reconciliation pass snapshots it into the
//! realised table (`State::realised`) after pushing deltas to the
//! kernel.

use ulamesh_proto::PublicKey;

/// One known route: the destination's identity, the number of overlay
/// forwards to reach it, and the tunnel it is reached through.
/// `tunnel` is `None` only for the self-route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub owner: PublicKey,
    pub hops: u32,
    pub tunnel: Option<usize>,
}

/// Routes in ascending hop order, self-route first, capped at the
/// configured view limit.
pub struct RouteTable {
    self_key: PublicKey,
    limit: usize,
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(self_key: PublicKey, limit: usize) -> Self {
        let mut table = Self {
            self_key,
            limit,
            entries: Vec::new(),
        };
        table.init();
        table
    }

    /// Reset to only the self-route.
    pub fn init(&mut self) {
        self.entries.clear();
        self.entries.push(RouteEntry {
            owner: self.self_key,
            hops: 0,
            tunnel: None,
        });
    }

    /// Absorb one announcement.
    ///
    /// Routes to ourselves via peers are ignored. A `(owner, tunnel)`
    /// pair occurs at most once; a repeat announcement keeps the
    /// minimum hop count. Novel pairs are dropped silently once the
    /// table is full.
    pub fn add(&mut self, owner: PublicKey, hops: u32, tunnel: Option<usize>) {
        if owner == self.self_key && hops > 0 {
            return;
        }
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.owner == owner && e.tunnel == tunnel)
        {
            if hops >= self.entries[pos].hops {
                return;
            }
            // Shorter path through the same tunnel. Reinsert so the
            // hop ordering holds.
            self.entries.remove(pos);
            self.insert_ordered(RouteEntry { owner, hops, tunnel });
            return;
        }
        if self.entries.len() >= self.limit {
            log::debug!("route table full, dropping announcement at {} hops", hops);
            return;
        }
        self.insert_ordered(RouteEntry { owner, hops, tunnel });
    }

    // Ascending hops; equal hop counts keep insertion order.
    fn insert_ordered(&mut self, entry: RouteEntry) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.hops > entry.hops)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> PublicKey {
        PublicKey([tag; 64])
    }

    fn table(limit: usize) -> RouteTable {
        RouteTable::new(key(0), limit)
    }

    fn hops_of(table: &RouteTable) -> Vec<u32> {
        table.entries().iter().map(|e| e.hops).collect()
    }

    #[test]
    fn starts_with_the_self_route() {
        let table = table(10);
        assert_eq!(
            table.entries(),
            &[RouteEntry {
                owner: key(0),
                hops: 0,
                tunnel: None
            }]
        );
    }

    #[test]
    fn keeps_ascending_hop_order() {
        let mut table = table(10);
        table.add(key(1), 5, Some(0));
        table.add(key(2), 2, Some(1));
        table.add(key(3), 3, Some(0));
        table.add(key(4), 2, Some(2));
        assert_eq!(hops_of(&table), vec![0, 2, 2, 3, 5]);
        // Equal hop counts stay in insertion order.
        assert_eq!(table.entries()[1].owner, key(2));
        assert_eq!(table.entries()[2].owner, key(4));
    }

    #[test]
    fn same_owner_and_tunnel_takes_the_minimum() {
        let mut table = table(10);
        table.add(key(1), 5, Some(0));
        table.add(key(1), 3, Some(0));
        table.add(key(1), 7, Some(0));
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[1].hops, 3);
    }

    #[test]
    fn reduction_restores_ordering() {
        let mut table = table(10);
        table.add(key(1), 2, Some(0));
        table.add(key(2), 6, Some(1));
        table.add(key(2), 1, Some(1));
        assert_eq!(hops_of(&table), vec![0, 1, 2]);
        assert_eq!(table.entries()[1].owner, key(2));
    }

    #[test]
    fn same_owner_through_distinct_tunnels_is_two_entries() {
        let mut table = table(10);
        table.add(key(1), 4, Some(0));
        table.add(key(1), 4, Some(1));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn self_routes_via_peers_are_ignored() {
        let mut table = table(10);
        table.add(key(0), 3, Some(0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_table_drops_new_entries() {
        let mut table = table(3);
        table.add(key(1), 1, Some(0));
        table.add(key(2), 2, Some(1));
        table.add(key(3), 3, Some(2));
        assert_eq!(table.len(), 3);
        // Reductions of existing entries still land.
        table.add(key(2), 1, Some(1));
        assert_eq!(table.entries()[1].hops, 1);
    }

    #[test]
    fn adding_is_idempotent() {
        let mut table = table(10);
        table.add(key(1), 4, Some(2));
        let once = table.entries().to_vec();
        table.add(key(1), 4, Some(2));
        assert_eq!(table.entries(), &once[..]);
    }

    #[test]
    fn replay_is_deterministic() {
        let announcements = [
            (key(1), 4, Some(0)),
            (key(2), 2, Some(1)),
            (key(1), 3, Some(0)),
            (key(3), 2, Some(0)),
        ];
        let mut a = table(10);
        let mut b = table(10);
        for (owner, hops, tunnel) in announcements {
            a.add(owner, hops, tunnel);
            b.add(owner, hops, tunnel);
        }
        assert_eq!(a.entries(), b.entries());

        b.init();
        for (owner, hops, tunnel) in announcements {
            b.add(owner, hops, tunnel);
        }
        assert_eq!(a.entries(), b.entries());
    }
}
