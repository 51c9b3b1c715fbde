use float_next_after::NextAfter;
use thiserror::Error;

use cophy_core_bond::ClosedUnitF64;

use crate::{
    combinatorics::{extended_binomial_coefficient, factorial, permutation_ratio},
    rng::RngSampler,
    state::TrajectoryState,
    tree::{LineageTree, Node},
};

/// A recoverable failure to apply an event to a trajectory: the affected
/// particle's importance weight collapses to zero, the evaluation carries
/// on.
#[derive(Debug, Error)]
pub enum EventFailure {
    #[error("event height {height} lies below the present")]
    NegativeHeight { height: f64 },
    #[error("guest count at host lineage {host:?} would become negative")]
    NegativeGuestCount { host: Node },
    #[error("loss would remove an observed guest lineage at host {host:?}")]
    ObservedLineageLoss { host: Node },
    #[error("observed guest lineage {guest:?} sits at host {actual:?}, expected {expected:?}")]
    ObservedHostMismatch {
        guest: Node,
        actual: Option<Node>,
        expected: Node,
    },
}

/// The closed set of events of the duplication / host-switch / loss process.
///
/// Every event knows the height at which it occurs and the host lineage(s)
/// it touches.
#[derive(Clone, Debug, PartialEq)]
pub enum CophylogeneticEvent {
    /// The forced split of a diverging host lineage: every guest lineage
    /// inside it is distributed between the two child host lineages, each
    /// choice independent and uniform.
    Cospeciation { host: Node, height: f64 },
    /// A birth within the same host lineage.
    Duplication { host: Node, height: f64 },
    /// A birth into a different host lineage than the one that produced it.
    HostSwitch {
        source: Node,
        destination: Node,
        height: f64,
    },
    /// The death of one guest lineage; fails if the removed lineage would
    /// have been an observed one, which is required to survive.
    Loss { host: Node, height: f64 },
}

impl CophylogeneticEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cospeciation { .. } => "cospeciation",
            Self::Duplication { .. } => "duplication",
            Self::HostSwitch { .. } => "host-switch",
            Self::Loss { .. } => "loss",
        }
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        match self {
            Self::Cospeciation { height, .. }
            | Self::Duplication { height, .. }
            | Self::HostSwitch { height, .. }
            | Self::Loss { height, .. } => *height,
        }
    }

    #[must_use]
    pub fn is_speciation(&self) -> bool {
        !matches!(self, Self::Loss { .. })
    }

    /// Applies the event: moves the state to the event's height, mutates the
    /// guest counts, then re-validates the lineage-count invariant.
    ///
    /// # Errors
    ///
    /// Fails with an [`EventFailure`] when the event cannot make a valid
    /// change to the state; the caller treats this as the particle's weight
    /// collapsing to zero.
    ///
    /// # Panics
    ///
    /// Panics if the mutated state disagrees with the host tree's lineage
    /// count, which correct event generation cannot produce.
    pub fn apply<G: RngSampler>(
        &self,
        state: &mut TrajectoryState,
        host_tree: &LineageTree,
        rng: &mut G,
    ) -> Result<(), EventFailure> {
        let height = self.height();

        if height < 0.0 {
            return Err(EventFailure::NegativeHeight { height });
        }

        state.set_height(height);

        match self {
            Self::Cospeciation { host, .. } => Self::split_host(state, host_tree, *host, rng),
            Self::Duplication { host, .. } => state.increment(*host),
            Self::HostSwitch { destination, .. } => state.increment(*destination),
            Self::Loss { host, .. } => {
                let count = state.guest_count(*host);
                if count == 0 {
                    return Err(EventFailure::NegativeGuestCount { host: *host });
                }
                // the victim is uniform among the lineages present; an
                // observed lineage is required to survive
                if rng.sample_index(count) < state.observed_count_at(*host) {
                    return Err(EventFailure::ObservedLineageLoss { host: *host });
                }
                state.decrement(*host)?;
            },
        }

        // A cospeciation leaves the state describing the interval just below
        // the divergence, all other events sit strictly between divergences.
        let reference_height = match self {
            Self::Cospeciation { .. } => height.next_after(f64::NEG_INFINITY),
            _ => height,
        };
        state.assert_consistent(host_tree, reference_height);

        Ok(())
    }

    fn split_host<G: RngSampler>(
        state: &mut TrajectoryState,
        host_tree: &LineageTree,
        host: Node,
        rng: &mut G,
    ) {
        let Some((left, right)) = host_tree.children(host) else {
            unreachable!("cospeciation at an external host lineage");
        };

        let count = state.remove_guests(host);
        let observed = state.observed_lineages_at(host);
        assert!(
            observed.len() <= count,
            "observed guest lineages exceed the latent count at host {host:?}",
        );

        let mut left_count = 0_usize;
        let mut right_count = 0_usize;

        for guest in &observed {
            if rng.sample_event(ClosedUnitF64::one_half()) {
                state.set_observed_host(*guest, left);
                left_count += 1;
            } else {
                state.set_observed_host(*guest, right);
                right_count += 1;
            }
        }

        for _ in 0..(count - observed.len()) {
            if rng.sample_event(ClosedUnitF64::one_half()) {
                left_count += 1;
            } else {
                right_count += 1;
            }
        }

        state.set_guest_count(left, left_count);
        state.set_guest_count(right, right_count);
    }

    /// The probability that the resolution of this event is consistent with
    /// the guest lineages *not* being observed to speciate here, evaluated
    /// against the counts in effect as the event occurs (before its
    /// mutation).
    ///
    /// Only a cospeciation with observed residents carries distinguishing
    /// information; a divergence of an unoccupied host branch, births, and
    /// losses contribute a factor of one.
    #[must_use]
    #[debug_ensures(ret >= 0.0 && ret <= 1.0, "is a probability")]
    pub fn probability_unobserved(&self, state: &TrajectoryState) -> f64 {
        match self {
            Self::Cospeciation { host, .. } => {
                let total = state.guest_count(*host);
                let observed = state.observed_count_at(*host);

                if observed == 0 {
                    1.0
                } else {
                    1.0 - permutation_ratio(observed, total)
                }
            },
            _ => 1.0,
        }
    }

    /// The probability of the exact resolution realised in the
    /// reconstructed tree: one over the number of equally-likely
    /// combinations.
    ///
    /// For a cospeciation this is evaluated against the counts in effect as
    /// the event occurs; for a birth, against the counts after its mutation.
    #[must_use]
    #[debug_ensures(ret >= 0.0 && ret <= 1.0, "is a probability")]
    pub fn probability_observed(&self, state: &TrajectoryState) -> f64 {
        match self {
            Self::Cospeciation { host, .. } => factorial(state.guest_count(*host)).recip(),
            Self::Duplication { host, .. } => {
                reciprocal_combinations(extended_binomial_coefficient(state.guest_count(*host), 2))
            },
            Self::HostSwitch {
                source,
                destination,
                ..
            } => reciprocal_combinations(
                (state.guest_count(*source) * state.guest_count(*destination)) as u64,
            ),
            Self::Loss { .. } => 1.0,
        }
    }
}

/// An impossible resolution (zero combinations) has probability zero rather
/// than dividing by zero.
#[allow(clippy::cast_precision_loss)]
fn reciprocal_combinations(combinations: u64) -> f64 {
    if combinations == 0 {
        0.0
    } else {
        (combinations as f64).recip()
    }
}

#[cfg(test)]
mod tests {
    use cophy_core_bond::PositiveF64;

    use crate::{
        state::TrajectoryState,
        test_rng::TestRng,
        tree::{LineageTree, Node},
    };

    use super::{CophylogeneticEvent, EventFailure};

    // ((A:1,B:1):1,C:2) with the root at height 2
    fn host_tree() -> LineageTree {
        LineageTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0.0, 0.0, 0.0, 1.0, 2.0],
        )
        .unwrap()
    }

    fn state_at_origin() -> TrajectoryState {
        TrajectoryState::new(
            PositiveF64::new(3.0).unwrap(),
            Node::from(0),
            Node::from(4),
        )
    }

    #[test]
    fn cospeciation_conserves_and_retires() {
        let tree = host_tree();
        let mut rng = TestRng::seed_from_u64(42);

        for seed in 0..64 {
            let mut rng_inner = TestRng::seed_from_u64(seed);
            let mut state = state_at_origin();
            for _ in 0..4 {
                state.increment(Node::from(4));
            }

            let event = CophylogeneticEvent::Cospeciation {
                host: Node::from(4),
                height: 2.0,
            };
            event.apply(&mut state, &tree, &mut rng_inner).unwrap();

            // counts sum to the parent's count, the parent entry is gone
            assert_eq!(
                state.guest_count(Node::from(2)) + state.guest_count(Node::from(3)),
                5
            );
            assert!(!state.contains_host(Node::from(4)));
            assert_eq!(state.host_count(), 2);
        }

        // the observed lineage is retagged to one of the children
        let mut state = state_at_origin();
        let event = CophylogeneticEvent::Cospeciation {
            host: Node::from(4),
            height: 2.0,
        };
        event.apply(&mut state, &tree, &mut rng).unwrap();
        let tagged = state.observed_host(Node::from(0)).unwrap();
        assert!(tagged == Node::from(2) || tagged == Node::from(3));
    }

    #[test]
    fn births_increment_their_destination() {
        let tree = host_tree();
        let mut rng = TestRng::seed_from_u64(7);

        let mut state = state_at_origin();
        CophylogeneticEvent::Duplication {
            host: Node::from(4),
            height: 2.5,
        }
        .apply(&mut state, &tree, &mut rng)
        .unwrap();

        assert_eq!(state.guest_count(Node::from(4)), 2);
        assert!((state.height() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn loss_fails_on_an_observed_lineage() {
        let tree = host_tree();
        let mut rng = TestRng::seed_from_u64(7);

        // the only guest lineage is the observed root, so any loss must fail
        let mut state = state_at_origin();
        let result = CophylogeneticEvent::Loss {
            host: Node::from(4),
            height: 2.5,
        }
        .apply(&mut state, &tree, &mut rng);

        assert!(matches!(
            result,
            Err(EventFailure::ObservedLineageLoss { .. })
        ));
    }

    #[test]
    fn loss_fails_on_an_empty_host() {
        let tree = host_tree();
        let mut rng = TestRng::seed_from_u64(7);

        let mut state = state_at_origin();
        state.set_guest_count(Node::from(4), 0);
        state.remove_observed(Node::from(0));

        let result = CophylogeneticEvent::Loss {
            host: Node::from(4),
            height: 2.5,
        }
        .apply(&mut state, &tree, &mut rng);

        assert!(matches!(
            result,
            Err(EventFailure::NegativeGuestCount { .. })
        ));
    }

    #[test]
    fn negative_heights_fail() {
        let tree = host_tree();
        let mut rng = TestRng::seed_from_u64(7);

        let mut state = state_at_origin();
        let result = CophylogeneticEvent::Duplication {
            host: Node::from(4),
            height: -0.5,
        }
        .apply(&mut state, &tree, &mut rng);

        assert!(matches!(result, Err(EventFailure::NegativeHeight { .. })));
    }

    #[test]
    fn probability_factors() {
        let mut state = state_at_origin();
        for _ in 0..2 {
            state.increment(Node::from(4));
        }

        // three latent lineages, one of them observed
        let cospeciation = CophylogeneticEvent::Cospeciation {
            host: Node::from(4),
            height: 2.0,
        };
        assert!((cospeciation.probability_observed(&state) - 1.0 / 6.0).abs() < 1e-12);
        assert!((cospeciation.probability_unobserved(&state) - (1.0 - 1.0 / 6.0)).abs() < 1e-12);

        let duplication = CophylogeneticEvent::Duplication {
            host: Node::from(4),
            height: 2.0,
        };
        assert!((duplication.probability_unobserved(&state) - 1.0).abs() < 1e-12);
        // evaluated post-mutation by the caller: C(3, 2) = 3 pairs
        assert!((duplication.probability_observed(&state) - 1.0 / 3.0).abs() < 1e-12);

        // a divergence of a host without observed residents distinguishes
        // nothing
        state.remove_observed(Node::from(0));
        assert!((cospeciation.probability_unobserved(&state) - 1.0).abs() < 1e-12);
    }
}
