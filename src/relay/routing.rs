//! Routing collaborator boundary

use parking_lot::RwLock;
use std::collections::HashMap;

/// Reachability information consulted after a message is committed
pub trait RoutingTable: Send + Sync {
    /// Peers that can carry messages toward `recipient`, or `None` when the
    /// recipient is unreachable
    fn next_hops(&self, recipient: &str) -> Option<Vec<String>>;
}

/// Routing table backed by an in-memory map of recipient to peers
#[derive(Default)]
pub struct StaticRoutes {
    routes: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` as a next hop toward `recipient`
    pub fn add_route(&self, recipient: impl Into<String>, peer: impl Into<String>) {
        let peer = peer.into();
        let mut routes = self.routes.write();
        let peers = routes.entry(recipient.into()).or_default();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    /// Remove every route toward `recipient`
    pub fn remove_routes(&self, recipient: &str) -> Option<Vec<String>> {
        self.routes.write().remove(recipient)
    }
}

impl RoutingTable for StaticRoutes {
    fn next_hops(&self, recipient: &str) -> Option<Vec<String>> {
        self.routes
            .read()
            .get(recipient)
            .filter(|peers| !peers.is_empty())
            .cloned()
    }
}
