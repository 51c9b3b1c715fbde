use crate::tree::Node;

/// The assignment of every guest-tree node to the host-tree lineage it
/// occupies at its own height.
///
/// The engine only reads a reconciliation during a likelihood evaluation;
/// mutation is reserved for the proposal operators of the surrounding
/// inference machinery.
#[derive(Clone, Debug)]
pub struct Reconciliation {
    hosts: Vec<Node>,
}

impl Reconciliation {
    /// Builds a reconciliation from per-guest-node host assignments,
    /// indexed by guest node.
    #[must_use]
    pub fn from_hosts(hosts: Vec<Node>) -> Self {
        Self { hosts }
    }

    #[must_use]
    #[debug_requires(guest.index() < self.len(), "guest node is reconciled")]
    pub fn host(&self, guest: Node) -> Node {
        self.hosts[guest.index()]
    }

    #[debug_requires(guest.index() < self.len(), "guest node is reconciled")]
    pub fn set_host(&mut self, guest: Node, host: Node) {
        self.hosts[guest.index()] = host;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
