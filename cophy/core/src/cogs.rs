use cophy_core_bond::{ClosedUnitF64, NonNegativeF64, PositiveF64};

use crate::tree::{LineageTree, Node};

/// The seam between a parameterised cophylogeny model and the simulator.
///
/// Rates are per guest lineage; the simulator scales them by the number of
/// latent lineages currently eligible for each event class.
pub trait CophylogenyModel {
    fn host_tree(&self) -> &LineageTree;

    /// The upper time bound of the process; no event may occur above it.
    fn origin_height(&self) -> PositiveF64;

    fn duplication_rate(&self) -> NonNegativeF64;

    fn host_switch_rate(&self) -> NonNegativeF64;

    fn loss_rate(&self) -> NonNegativeF64;

    #[must_use]
    fn birth_rate(&self) -> NonNegativeF64 {
        self.duplication_rate() + self.host_switch_rate()
    }

    /// The probability that an extant guest lineage in the given host leaf
    /// was sampled into the observed guest tree.
    fn sampling_probability(&self, host_leaf: Node) -> ClosedUnitF64;
}
