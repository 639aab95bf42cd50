//! Route table and duplicate suppression
//!
//! Routes are learned passively from route discovery traffic: whenever a
//! SEARCH_REQUEST or SEARCH_RESPONSE arrives, the node that handed it to us
//! becomes the next hop toward its original sender. There is no hop count
//! and no metric; the most recently learned route wins. Routes live until a
//! delivery failure invalidates them.

use super::address::NodeAddress;
use std::collections::{HashMap, VecDeque};

/// A learned route to a destination node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Destination node
    pub destination: NodeAddress,
    /// Neighbour to hand frames for `destination` to
    pub next_hop: NodeAddress,
    /// Time (ms) the route was learned or last replaced
    pub learned_at: u64,
}

/// Outcome of [`RoutingTable::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// New destination
    Added,
    /// Existing destination now uses a different next hop
    Replaced { previous: NodeAddress },
    /// Same next hop as before
    Unchanged,
}

/// Destination to next-hop map with a capacity bound
#[derive(Debug)]
pub struct RoutingTable {
    /// Routes indexed by destination
    routes: HashMap<NodeAddress, Route>,
    /// Maximum number of routes
    max_routes: usize,
}

impl RoutingTable {
    /// Default route capacity
    pub const DEFAULT_MAX_ROUTES: usize = 64;

    /// Create a new routing table
    pub fn new(max_routes: usize) -> Self {
        Self {
            routes: HashMap::with_capacity(max_routes.min(Self::DEFAULT_MAX_ROUTES)),
            max_routes: max_routes.max(1),
        }
    }

    /// Next hop toward `destination`, if known
    pub fn lookup(&self, destination: NodeAddress) -> Option<NodeAddress> {
        self.routes.get(&destination).map(|r| r.next_hop)
    }

    /// Full route entry for `destination`
    pub fn get(&self, destination: &NodeAddress) -> Option<&Route> {
        self.routes.get(destination)
    }

    /// Add or overwrite the route to `destination`.
    ///
    /// Inserting a new destination into a full table evicts the route
    /// learned longest ago.
    pub fn upsert(&mut self, destination: NodeAddress, next_hop: NodeAddress, now: u64) -> RouteUpdate {
        if let Some(existing) = self.routes.get_mut(&destination) {
            let previous = existing.next_hop;
            existing.next_hop = next_hop;
            existing.learned_at = now;
            return if previous == next_hop {
                RouteUpdate::Unchanged
            } else {
                RouteUpdate::Replaced { previous }
            };
        }

        if self.routes.len() >= self.max_routes {
            self.evict_oldest();
        }
        self.routes.insert(
            destination,
            Route {
                destination,
                next_hop,
                learned_at: now,
            },
        );
        RouteUpdate::Added
    }

    /// Remove the route to `destination`
    pub fn invalidate(&mut self, destination: NodeAddress) -> Option<Route> {
        self.routes.remove(&destination)
    }

    /// Iterate over all routes
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route capacity
    pub fn capacity(&self) -> usize {
        self.max_routes
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .routes
            .values()
            .min_by_key(|r| r.learned_at)
            .map(|r| r.destination)
        {
            self.routes.remove(&oldest);
        }
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ROUTES)
    }
}

/// Recently seen message ids, most recent first.
///
/// Keyed on the message id alone: ids are random, and the window is short
/// enough that collisions between distinct live messages are rare.
#[derive(Debug, Clone)]
pub struct DuplicateCache {
    ids: VecDeque<u16>,
    capacity: usize,
}

impl DuplicateCache {
    /// Window size used by the receive path
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a cache remembering up to `capacity` ids
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Check if `id` is in the window
    pub fn seen(&self, id: u16) -> bool {
        self.ids.contains(&id)
    }

    /// Push `id` to the front, dropping the oldest id when full
    pub fn remember(&mut self, id: u16) {
        if self.ids.len() == self.capacity {
            self.ids.pop_back();
        }
        self.ids.push_front(id);
    }

    /// Returns true if this is a NEW id (and records it)
    pub fn check_and_add(&mut self, id: u16) -> bool {
        if self.seen(id) {
            return false;
        }
        self.remember(id);
        true
    }

    /// Ids from most to least recent
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ids.iter().copied()
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for DuplicateCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> NodeAddress {
        NodeAddress::from_bytes([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_upsert_and_lookup() {
        let mut table = RoutingTable::new(8);
        assert_eq!(table.lookup(addr(1)), None);

        assert_eq!(table.upsert(addr(1), addr(2), 10), RouteUpdate::Added);
        assert_eq!(table.lookup(addr(1)), Some(addr(2)));

        assert_eq!(table.upsert(addr(1), addr(2), 20), RouteUpdate::Unchanged);
        assert_eq!(table.get(&addr(1)).unwrap().learned_at, 20);

        assert_eq!(
            table.upsert(addr(1), addr(3), 30),
            RouteUpdate::Replaced { previous: addr(2) }
        );
        assert_eq!(table.lookup(addr(1)), Some(addr(3)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let mut table = RoutingTable::default();
        table.upsert(addr(1), addr(2), 0);
        let removed = table.invalidate(addr(1)).unwrap();
        assert_eq!(removed.next_hop, addr(2));
        assert!(table.is_empty());
        assert!(table.invalidate(addr(1)).is_none());
    }

    #[test]
    fn test_full_table_evicts_oldest() {
        let mut table = RoutingTable::new(2);
        table.upsert(addr(1), addr(9), 100);
        table.upsert(addr(2), addr(9), 50);
        // refreshing an existing destination never evicts
        table.upsert(addr(1), addr(8), 200);
        assert_eq!(table.len(), 2);

        table.upsert(addr(3), addr(9), 300);
        assert_eq!(table.len(), 2);
        assert!(table.lookup(addr(2)).is_none());
        assert_eq!(table.lookup(addr(1)), Some(addr(8)));
        assert_eq!(table.lookup(addr(3)), Some(addr(9)));
    }

    #[test]
    fn test_duplicate_cache() {
        let mut cache = DuplicateCache::default();

        // First id - not duplicate
        assert!(cache.check_and_add(1));

        // Same id - duplicate
        assert!(!cache.check_and_add(1));

        // Different id - not duplicate
        assert!(cache.check_and_add(2));
        assert_eq!(cache.iter().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_duplicate_cache_window() {
        let mut cache = DuplicateCache::default();
        for id in 0..DuplicateCache::DEFAULT_CAPACITY as u16 {
            cache.remember(id);
        }
        assert!(cache.seen(0));

        // eleventh id pushes the oldest out
        cache.remember(100);
        assert_eq!(cache.len(), DuplicateCache::DEFAULT_CAPACITY);
        assert!(!cache.seen(0));
        assert!(cache.seen(1));
        assert_eq!(cache.iter().next(), Some(100));
    }
}
