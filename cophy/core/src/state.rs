use fnv::FnvHashMap;

use cophy_core_bond::PositiveF64;

use crate::{
    event::EventFailure,
    tree::{LineageTree, Node},
};

/// The latent snapshot carried by one particle: at a single time height, how
/// many guest lineages are evolving inside each living host lineage, and
/// which host currently carries each *observed* guest lineage.
///
/// Counts include the observed lineages. The load-bearing invariant of the
/// whole engine is that the set of host entries (zero counts included — a
/// host whose guests all died is still alive) always matches the host
/// lineages alive at the state's height; see
/// [`TrajectoryState::assert_consistent`].
#[derive(Clone, Debug)]
pub struct TrajectoryState {
    height: f64,
    guest_counts: FnvHashMap<Node, usize>,
    guest_count: usize,
    observed_hosts: FnvHashMap<Node, Node>,
}

impl TrajectoryState {
    /// A fresh trajectory at the origin: a single guest lineage, the
    /// observed guest root, inside the host root.
    #[must_use]
    pub fn new(origin_height: PositiveF64, guest_root: Node, host_root: Node) -> Self {
        let mut state = Self {
            height: origin_height.get(),
            guest_counts: FnvHashMap::default(),
            guest_count: 0,
            observed_hosts: FnvHashMap::default(),
        };

        state.increment(host_root);
        state.set_observed_host(guest_root, host_root);

        state
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.height
    }

    #[debug_requires(height <= self.height(), "time only runs towards the present")]
    pub fn set_height(&mut self, height: f64) {
        self.height = height;
    }

    #[must_use]
    pub fn guest_count(&self, host: Node) -> usize {
        self.guest_counts.get(&host).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_guest_count(&self) -> usize {
        self.guest_count
    }

    pub fn set_guest_count(&mut self, host: Node, count: usize) {
        let previous = self.guest_counts.insert(host, count).unwrap_or(0);
        self.guest_count = self.guest_count - previous + count;
    }

    #[debug_ensures(
        self.total_guest_count() == old(self.total_guest_count()) + 1,
        "one guest lineage is born"
    )]
    pub fn increment(&mut self, host: Node) {
        self.set_guest_count(host, self.guest_count(host) + 1);
    }

    /// # Errors
    ///
    /// Fails with [`EventFailure::NegativeGuestCount`] if the host carries
    /// no guest lineage to remove.
    #[debug_ensures(
        ret.is_ok() -> self.total_guest_count() == old(self.total_guest_count()) - 1,
        "one guest lineage has died"
    )]
    pub fn decrement(&mut self, host: Node) -> Result<(), EventFailure> {
        match self.guest_count(host) {
            0 => Err(EventFailure::NegativeGuestCount { host }),
            count => {
                self.set_guest_count(host, count - 1);
                Ok(())
            },
        }
    }

    /// Clears the host's entry entirely, returning the count it held; used
    /// by cospeciation to retire the diverging host lineage.
    #[debug_ensures(!self.contains_host(host), "host entry is gone")]
    pub fn remove_guests(&mut self, host: Node) -> usize {
        let count = self.guest_counts.remove(&host).unwrap_or(0);
        self.guest_count -= count;
        count
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.guest_counts.len()
    }

    #[must_use]
    pub fn contains_host(&self, host: Node) -> bool {
        self.guest_counts.contains_key(&host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = Node> + '_ {
        self.guest_counts.keys().copied()
    }

    pub fn host_guest_counts(&self) -> impl Iterator<Item = (Node, usize)> + '_ {
        self.guest_counts.iter().map(|(host, count)| (*host, *count))
    }

    #[must_use]
    pub fn observed_host(&self, guest: Node) -> Option<Node> {
        self.observed_hosts.get(&guest).copied()
    }

    /// The observed guest lineages currently inside the given host, in
    /// guest-node order so random choices consume draws deterministically.
    #[must_use]
    pub fn observed_lineages_at(&self, host: Node) -> Vec<Node> {
        let mut lineages: Vec<Node> = self
            .observed_hosts
            .iter()
            .filter(|(_, at)| **at == host)
            .map(|(guest, _)| *guest)
            .collect();
        lineages.sort_unstable();
        lineages
    }

    #[must_use]
    pub fn observed_count_at(&self, host: Node) -> usize {
        self.observed_hosts.values().filter(|at| **at == host).count()
    }

    pub fn set_observed_host(&mut self, guest: Node, host: Node) {
        self.observed_hosts.insert(guest, host);
    }

    pub fn remove_observed(&mut self, guest: Node) -> Option<Node> {
        self.observed_hosts.remove(&guest)
    }

    /// Validates the lineage-count invariant against the host tree at the
    /// given height.
    ///
    /// # Panics
    ///
    /// Panics on violation. Correct event application cannot violate the
    /// invariant, so a mismatch is an internal defect and must never be
    /// converted into a plausible-looking probability.
    pub fn assert_consistent(&self, host_tree: &LineageTree, height: f64) {
        assert_eq!(
            self.host_count(),
            host_tree.lineage_count_at_height(height),
            "host entries disagree with the host lineages alive at height {height}",
        );
    }
}

#[cfg(test)]
mod tests {
    use cophy_core_bond::PositiveF64;

    use crate::tree::{LineageTree, Node};

    use super::TrajectoryState;

    fn two_taxon_host_tree() -> LineageTree {
        LineageTree::from_parents(&[Some(2), Some(2), None], &[0.0, 0.0, 1.0]).unwrap()
    }

    fn fresh_state() -> TrajectoryState {
        TrajectoryState::new(
            PositiveF64::new(2.0).unwrap(),
            Node::from(2),
            Node::from(2),
        )
    }

    #[test]
    fn starts_with_one_guest_at_the_host_root() {
        let state = fresh_state();

        assert!((state.height() - 2.0).abs() < f64::EPSILON);
        assert_eq!(state.guest_count(Node::from(2)), 1);
        assert_eq!(state.total_guest_count(), 1);
        assert_eq!(state.host_count(), 1);
        assert_eq!(state.observed_host(Node::from(2)), Some(Node::from(2)));
    }

    #[test]
    fn counts_stay_consistent_under_mutation() {
        let mut state = fresh_state();
        let root = Node::from(2);

        state.increment(root);
        state.increment(root);
        assert_eq!(state.guest_count(root), 3);
        assert_eq!(state.total_guest_count(), 3);

        state.decrement(root).unwrap();
        assert_eq!(state.total_guest_count(), 2);

        assert_eq!(state.remove_guests(root), 2);
        assert_eq!(state.total_guest_count(), 0);
        assert!(!state.contains_host(root));
    }

    #[test]
    fn decrement_fails_on_an_empty_host() {
        let mut state = fresh_state();
        assert!(state.decrement(Node::from(0)).is_err());
    }

    #[test]
    fn invariant_holds_at_the_origin() {
        let state = fresh_state();
        state.assert_consistent(&two_taxon_host_tree(), state.height());
    }

    #[test]
    #[should_panic(expected = "host entries disagree")]
    fn invariant_violation_fails_loudly() {
        let mut state = fresh_state();
        // a second host entry above the host root divergence is inconsistent
        state.increment(Node::from(0));
        state.assert_consistent(&two_taxon_host_tree(), state.height());
    }

    #[test]
    fn copies_are_independent() {
        let mut state = fresh_state();
        let copy = state.clone();

        state.increment(Node::from(2));
        state.set_observed_host(Node::from(0), Node::from(2));

        assert_eq!(copy.guest_count(Node::from(2)), 1);
        assert_eq!(copy.observed_host(Node::from(0)), None);
        assert_eq!(copy.total_guest_count(), 1);
    }

    #[test]
    fn observed_lineage_tracking() {
        let mut state = fresh_state();
        let root = Node::from(2);

        state.set_observed_host(Node::from(0), root);
        state.set_observed_host(Node::from(1), Node::from(0));

        assert_eq!(state.observed_count_at(root), 2);
        assert_eq!(
            state.observed_lineages_at(root),
            vec![Node::from(0), Node::from(2)]
        );

        assert_eq!(state.remove_observed(Node::from(0)), Some(root));
        assert_eq!(state.observed_count_at(root), 1);
    }
}
