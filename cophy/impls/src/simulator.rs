use cophy_core::{
    cogs::CophylogenyModel,
    combinatorics::factorial,
    event::{CophylogeneticEvent, EventFailure},
    rng::RngSampler,
    state::TrajectoryState,
    tree::{LineageTree, Node},
};
use cophy_core_bond::{ClosedUnitF64, NonNegativeF64, PositiveF64};
use float_next_after::NextAfter;

use crate::weighted::WeightedSampler;

#[derive(Copy, Clone)]
enum SpontaneousKind {
    Duplication,
    HostSwitch,
    Loss,
}

#[derive(Copy, Clone)]
enum BirthKind {
    Duplication,
    HostSwitch,
}

/// Runs the duplication / host-switch / loss process backward in time over a
/// trajectory state: competing exponential waiting times between the forced
/// cospeciation heights of the host tree.
pub struct CophylogenySimulator<M: CophylogenyModel> {
    model: M,
    /// Host-tree divergences, oldest first. A divergence stays pending for a
    /// trajectory as long as the trajectory still holds an entry for its
    /// host lineage.
    cospeciations: Vec<(NonNegativeF64, Node)>,
}

impl<M: CophylogenyModel> CophylogenySimulator<M> {
    pub fn new(model: M) -> Self {
        let mut cospeciations: Vec<(NonNegativeF64, Node)> = model
            .host_tree()
            .internal_nodes()
            .iter()
            .map(|host| (model.host_tree().height(*host), *host))
            .collect();
        cospeciations.sort_unstable_by(|a, b| b.cmp(a));

        Self {
            model,
            cospeciations,
        }
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// A fresh trajectory at the origin: one guest lineage, the observed
    /// guest root, inside the host root.
    #[must_use]
    pub fn create_state(&self, guest_tree: &LineageTree) -> TrajectoryState {
        TrajectoryState::new(
            self.model.origin_height(),
            guest_tree.root(),
            self.model.host_tree().root(),
        )
    }

    fn next_pending_cospeciation(&self, state: &TrajectoryState) -> Option<(f64, Node)> {
        self.cospeciations
            .iter()
            .find(|(height, host)| height.get() <= state.height() && state.contains_host(*host))
            .map(|(height, host)| (height.get(), *host))
    }

    /// The total competing rate: each per-lineage rate scales linearly with
    /// the number of latent lineages, and host-switching needs an
    /// alternative host to exist.
    fn total_event_rate(&self, state: &TrajectoryState) -> NonNegativeF64 {
        let mut per_lineage = self.model.duplication_rate() + self.model.loss_rate();

        if state.host_count() > 1 {
            per_lineage = per_lineage + self.model.host_switch_rate();
        }

        NonNegativeF64::from(state.total_guest_count()) * per_lineage
    }

    /// Advances the trajectory from its current height down to `until`,
    /// applying spontaneous events and forced cospeciations as they occur,
    /// and returns the product of the events' likelihood contributions.
    ///
    /// # Errors
    ///
    /// Fails with the first [`EventFailure`]; the caller treats the failure
    /// as the particle's weight collapsing to zero.
    #[debug_requires(
        until >= 0.0 && until <= state.height(),
        "the horizon lies between the present and the state"
    )]
    #[debug_ensures(ret.is_ok() -> state.height() == until, "the state reaches the horizon")]
    #[debug_ensures(ret.is_ok() -> *ret.as_ref().unwrap() >= 0.0, "factors are non-negative")]
    pub fn advance<G: RngSampler>(
        &self,
        state: &mut TrajectoryState,
        until: f64,
        rng: &mut G,
    ) -> Result<f64, EventFailure> {
        let host_tree = self.model.host_tree();

        let mut factor = 1.0_f64;

        loop {
            let pending = self.next_pending_cospeciation(state);

            // a divergence left over at exactly the current height (from a
            // checkpoint that coincided with another host's divergence)
            // splits before any waiting time is drawn
            if let Some((height, host)) = pending {
                if height >= state.height() && state.height() > until {
                    let event = CophylogeneticEvent::Cospeciation { host, height };
                    factor *= event.probability_unobserved(state);
                    event.apply(state, host_tree, rng)?;
                    continue;
                }
            }

            let candidate = match PositiveF64::try_from(self.total_event_rate(state)) {
                Ok(rate) => state.height() - rng.sample_exponential(rate),
                // no spontaneous event can ever fire
                Err(_) => f64::NEG_INFINITY,
            };

            // forced divergences above the horizon pre-empt any spontaneous
            // event drawn at or below them
            if let Some((height, host)) = pending.filter(|(height, _)| *height > until) {
                if candidate <= height {
                    let event = CophylogeneticEvent::Cospeciation { host, height };
                    factor *= event.probability_unobserved(state);
                    event.apply(state, host_tree, rng)?;
                    continue;
                }
            }

            if candidate <= until {
                state.set_height(until);
                return Ok(factor);
            }

            let event = self.sample_spontaneous_event(state, candidate, rng);
            factor *= event.probability_unobserved(state);
            event.apply(state, host_tree, rng)?;
        }
    }

    /// Draws the next spontaneous event at the given height: the affected
    /// host weighted by its latent guest count, the event class by its
    /// scaled rate, and a host-switch destination uniform over the other
    /// living hosts.
    fn sample_spontaneous_event<G: RngSampler>(
        &self,
        state: &TrajectoryState,
        height: f64,
        rng: &mut G,
    ) -> CophylogeneticEvent {
        let mut hosts: Vec<(Node, NonNegativeF64)> = state
            .host_guest_counts()
            .map(|(host, count)| (host, NonNegativeF64::from(count)))
            .collect();
        hosts.sort_unstable_by_key(|(host, _)| *host);

        let host = *WeightedSampler::new(hosts).sample(rng);

        let mut kinds = vec![
            (SpontaneousKind::Duplication, self.model.duplication_rate()),
            (SpontaneousKind::Loss, self.model.loss_rate()),
        ];
        if state.host_count() > 1 {
            kinds.push((SpontaneousKind::HostSwitch, self.model.host_switch_rate()));
        }

        match *WeightedSampler::new(kinds).sample(rng) {
            SpontaneousKind::Duplication => CophylogeneticEvent::Duplication { host, height },
            SpontaneousKind::Loss => CophylogeneticEvent::Loss { host, height },
            SpontaneousKind::HostSwitch => CophylogeneticEvent::HostSwitch {
                source: host,
                destination: Self::sample_destination(state, host, rng),
                height,
            },
        }
    }

    fn sample_destination<G: RngSampler>(
        state: &TrajectoryState,
        source: Node,
        rng: &mut G,
    ) -> Node {
        let mut candidates: Vec<Node> = state.hosts().filter(|host| *host != source).collect();
        candidates.sort_unstable();

        candidates[rng.sample_index(candidates.len())]
    }

    /// Resolves the forced cospeciation at a checkpoint: every guest node
    /// speciating at this host divergence co-diverges (one child follows
    /// each child host lineage), all other lineages distribute uniformly,
    /// and the resolution is charged once with its observed probability.
    ///
    /// # Errors
    ///
    /// Fails if a speciating guest lineage is not currently inside the
    /// diverging host.
    pub fn simulate_cospeciation_event<G: RngSampler>(
        &self,
        state: &mut TrajectoryState,
        host: Node,
        speciating: &[(Node, (Node, Node))],
        rng: &mut G,
    ) -> Result<f64, EventFailure> {
        let host_tree = self.model.host_tree();
        let height = host_tree.height(host).get();

        let Some((left, right)) = host_tree.children(host) else {
            unreachable!("cospeciation at an external host lineage");
        };

        for (guest, _) in speciating {
            match state.observed_host(*guest) {
                Some(actual) if actual == host => {},
                actual => {
                    return Err(EventFailure::ObservedHostMismatch {
                        guest: *guest,
                        actual,
                        expected: host,
                    })
                },
            }
        }

        let probability = factorial(state.guest_count(host)).recip();

        state.set_height(height);

        let count = state.remove_guests(host);

        let mut left_count = 0_usize;
        let mut right_count = 0_usize;

        for (guest, (first, second)) in speciating {
            state.remove_observed(*guest);

            let (to_left, to_right) = if rng.sample_event(ClosedUnitF64::one_half()) {
                (*first, *second)
            } else {
                (*second, *first)
            };
            state.set_observed_host(to_left, left);
            state.set_observed_host(to_right, right);

            left_count += 1;
            right_count += 1;
        }

        let observed = state.observed_lineages_at(host);
        for guest in &observed {
            if rng.sample_event(ClosedUnitF64::one_half()) {
                state.set_observed_host(*guest, left);
                left_count += 1;
            } else {
                state.set_observed_host(*guest, right);
                right_count += 1;
            }
        }

        let latent = count
            .checked_sub(speciating.len() + observed.len())
            .expect("observed guest lineages exceed the latent count");
        for _ in 0..latent {
            if rng.sample_event(ClosedUnitF64::one_half()) {
                left_count += 1;
            } else {
                right_count += 1;
            }
        }

        state.set_guest_count(left, left_count);
        state.set_guest_count(right, right_count);

        state.assert_consistent(host_tree, height.next_after(f64::NEG_INFINITY));

        Ok(probability)
    }

    /// Resolves an observed duplication or host-switch at a checkpoint: the
    /// speciating guest lineage splits into its two children, and the
    /// resolution is charged with the birth rate times its observed
    /// probability.
    ///
    /// # Errors
    ///
    /// Fails if the speciating guest lineage is not currently inside its
    /// reconciled host.
    pub fn simulate_birth_event<G: RngSampler>(
        &self,
        state: &mut TrajectoryState,
        guest: Node,
        children: (Node, Node),
        host: Node,
        height: f64,
        rng: &mut G,
    ) -> Result<f64, EventFailure> {
        let host_tree = self.model.host_tree();

        match state.observed_host(guest) {
            Some(actual) if actual == host => {},
            actual => {
                return Err(EventFailure::ObservedHostMismatch {
                    guest,
                    actual,
                    expected: host,
                })
            },
        }

        let birth_rate = self.model.birth_rate();
        if birth_rate == NonNegativeF64::zero() {
            // a birth cannot be observed under a zero birth rate
            return Ok(0.0);
        }

        let kind = if state.host_count() > 1 {
            *WeightedSampler::new(vec![
                (BirthKind::Duplication, self.model.duplication_rate()),
                (BirthKind::HostSwitch, self.model.host_switch_rate()),
            ])
            .sample(rng)
        } else {
            BirthKind::Duplication
        };

        let event = match kind {
            BirthKind::Duplication => CophylogeneticEvent::Duplication { host, height },
            BirthKind::HostSwitch => CophylogeneticEvent::HostSwitch {
                source: host,
                destination: Self::sample_destination(state, host, rng),
                height,
            },
        };

        event.apply(state, host_tree, rng)?;

        state.remove_observed(guest);
        let (first, second) = children;

        match event {
            CophylogeneticEvent::Duplication { .. } => {
                state.set_observed_host(first, host);
                state.set_observed_host(second, host);
            },
            CophylogeneticEvent::HostSwitch { destination, .. } => {
                let (stays, jumps) = if rng.sample_event(ClosedUnitF64::one_half()) {
                    (first, second)
                } else {
                    (second, first)
                };
                state.set_observed_host(stays, host);
                state.set_observed_host(jumps, destination);
            },
            _ => unreachable!("a birth is a duplication or a host-switch"),
        }

        Ok(birth_rate.get() * event.probability_observed(state))
    }
}
