use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cophy_core::{
    cogs::CophylogenyModel,
    tree::{LineageTree, Node},
};
use cophy_core_bond::{ClosedOpenUnitF64, ClosedUnitF64, NonNegativeF64, PositiveF64};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("the birth rate diverges as the relative death rate approaches one")]
    NonFiniteBirthRate,
    #[error("expected {expected} per-host-leaf sampling probabilities, got {actual}")]
    SamplingProbabilityCount { expected: usize, actual: usize },
}

/// The underlying scalars of the duplication / host-switch / loss model:
/// a net diversification (birth minus death) rate, a relative extinction
/// rate, the proportion of births that are host-switches, the origin height,
/// and one sampling probability per host leaf (in external-node order).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DhslParameters {
    pub birth_diff_rate: NonNegativeF64,
    pub relative_death_rate: ClosedOpenUnitF64,
    pub host_switch_proportion: ClosedUnitF64,
    pub origin_height: PositiveF64,
    pub sampling_probabilities: Vec<ClosedUnitF64>,
}

/// The duplication / host-switch / loss cophylogeny model: owns the host
/// tree and the per-lineage event rates derived once from the underlying
/// scalars.
pub struct DhslModel {
    host_tree: LineageTree,
    origin_height: PositiveF64,
    duplication_rate: NonNegativeF64,
    host_switch_rate: NonNegativeF64,
    loss_rate: NonNegativeF64,
    sampling_probabilities: FnvHashMap<Node, ClosedUnitF64>,
}

impl DhslModel {
    /// Derives the per-lineage event rates:
    /// birth = birth-diff / (1 − relative-death), death = birth ×
    /// relative-death, with births split between duplications and
    /// host-switches by the host-switch proportion.
    ///
    /// # Errors
    ///
    /// Fails if the derived birth rate is not finite, or if the sampling
    /// probabilities do not match the host tree's external nodes.
    pub fn new(host_tree: LineageTree, parameters: DhslParameters) -> Result<Self, ModelError> {
        if parameters.sampling_probabilities.len() != host_tree.external_node_count() {
            return Err(ModelError::SamplingProbabilityCount {
                expected: host_tree.external_node_count(),
                actual: parameters.sampling_probabilities.len(),
            });
        }

        let birth_rate = NonNegativeF64::new(
            parameters.birth_diff_rate.get() / (1.0 - parameters.relative_death_rate.get()),
        )
        .map_err(|_| ModelError::NonFiniteBirthRate)?;

        let sampling_probabilities = host_tree
            .external_nodes()
            .iter()
            .copied()
            .zip(parameters.sampling_probabilities.iter().copied())
            .collect();

        Ok(Self {
            origin_height: parameters.origin_height,
            duplication_rate: birth_rate * parameters.host_switch_proportion.one_minus(),
            host_switch_rate: birth_rate * parameters.host_switch_proportion,
            loss_rate: birth_rate * ClosedUnitF64::from(parameters.relative_death_rate),
            sampling_probabilities,
            host_tree,
        })
    }
}

impl CophylogenyModel for DhslModel {
    fn host_tree(&self) -> &LineageTree {
        &self.host_tree
    }

    fn origin_height(&self) -> PositiveF64 {
        self.origin_height
    }

    fn duplication_rate(&self) -> NonNegativeF64 {
        self.duplication_rate
    }

    fn host_switch_rate(&self) -> NonNegativeF64 {
        self.host_switch_rate
    }

    fn loss_rate(&self) -> NonNegativeF64 {
        self.loss_rate
    }

    #[debug_requires(
        self.host_tree.is_external(host_leaf),
        "sampling probabilities attach to host leaves"
    )]
    fn sampling_probability(&self, host_leaf: Node) -> ClosedUnitF64 {
        self.sampling_probabilities[&host_leaf]
    }
}
