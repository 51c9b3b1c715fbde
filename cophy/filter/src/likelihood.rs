use core::num::NonZeroUsize;
use std::collections::BTreeMap;

use fnv::FnvHashMap;
use typed_builder::TypedBuilder;

use cophy_core::{
    cogs::CophylogenyModel,
    reconciliation::Reconciliation,
    rng::RngSampler,
    tree::{LineageTree, Node},
};
use cophy_core_bond::NonNegativeF64;
use cophy_impls::simulator::CophylogenySimulator;

use crate::particle::Particle;

/// Estimates the log-likelihood of an observed guest tree and its
/// reconciliation under the cophylogeny model by sequential Monte Carlo:
/// particles simulate the latent process between guest-node heights and are
/// reweighted against the observed topology at each checkpoint.
///
/// A filter holds no state between evaluations: every call to
/// [`TrajectoryParticleFilter::log_likelihood`] builds fresh particles and a
/// fresh checkpoint schedule, so repeated evaluations are independent up to
/// the injected pseudo-random stream.
#[derive(TypedBuilder)]
pub struct TrajectoryParticleFilter<'a, M: CophylogenyModel> {
    simulator: &'a CophylogenySimulator<M>,
    guest_tree: &'a LineageTree,
    reconciliation: &'a Reconciliation,
    particle_count: NonZeroUsize,
}

impl<'a, M: CophylogenyModel> TrajectoryParticleFilter<'a, M> {
    /// The estimated log-likelihood, or `-inf` for invalid configurations —
    /// proposed states are routinely invalid during sampling, so this is a
    /// normal outcome, never an error.
    #[must_use]
    pub fn log_likelihood<G: RngSampler>(&self, rng: &mut G) -> f64 {
        if !self.is_valid() {
            debug!("configuration is invalid, the likelihood vanishes");
            return f64::NEG_INFINITY;
        }

        let particle_count = self.particle_count.get();

        let mut particles: Vec<Particle> = (0..particle_count)
            .map(|_| Particle::new(self.simulator.create_state(self.guest_tree)))
            .collect();

        let mut log_likelihood = 0.0_f64;

        // guest divergences, oldest first
        for (height, nodes) in self.checkpoint_schedule().iter().rev() {
            let until = height.get();
            debug!("processing checkpoint at height {until}");

            for particle in &mut particles {
                self.step_particle(particle, until, nodes, rng);
            }

            match Self::mean_weight(&particles) {
                Some(mean) => log_likelihood += mean.ln(),
                None => {
                    warn!("all particles collapsed at checkpoint height {until}");
                    return f64::NEG_INFINITY;
                },
            }

            Particle::resample(&mut particles, rng);
        }

        for particle in &mut particles {
            self.finish_particle(particle, rng);
        }

        match Self::mean_weight(&particles) {
            Some(mean) => log_likelihood + mean.ln(),
            None => {
                warn!("all particles collapsed under the tip sampling correction");
                f64::NEG_INFINITY
            },
        }
    }

    /// Checked once before any particle work: the origin must predate both
    /// roots, and every reconciled host lineage must have existed at its
    /// guest node's height.
    fn is_valid(&self) -> bool {
        let host_tree = self.simulator.model().host_tree();
        let origin_height = self.simulator.model().origin_height().get();

        if self.reconciliation.len() != self.guest_tree.node_count() {
            return false;
        }

        if self.guest_tree.height(self.guest_tree.root()).get() >= origin_height
            || host_tree.height(host_tree.root()).get() >= origin_height
        {
            return false;
        }

        self.guest_tree.nodes().all(|guest| {
            let host = self.reconciliation.host(guest);

            host.index() < host_tree.node_count()
                && host_tree.lineage_existed_at_height(host, self.guest_tree.height(guest).get())
        })
    }

    /// Guest internal nodes grouped by their exact height; simultaneous
    /// divergences share one checkpoint.
    fn checkpoint_schedule(&self) -> BTreeMap<NonNegativeF64, Vec<Node>> {
        let mut schedule: BTreeMap<NonNegativeF64, Vec<Node>> = BTreeMap::new();

        for node in self.guest_tree.internal_nodes() {
            schedule
                .entry(self.guest_tree.height(*node))
                .or_default()
                .push(*node);
        }

        schedule
    }

    /// Advances one particle to the checkpoint and resolves the guest
    /// divergences observed there, multiplying the weight by every
    /// likelihood factor; any event failure collapses the weight to zero.
    fn step_particle<G: RngSampler>(
        &self,
        particle: &mut Particle,
        until: f64,
        nodes: &[Node],
        rng: &mut G,
    ) {
        // zero is absorbing, a dead particle does no further work
        if particle.weight() == 0.0 {
            return;
        }

        match self.simulator.advance(particle.state_mut(), until, rng) {
            Ok(factor) => particle.multiply_weight(factor),
            Err(failure) => {
                trace!("particle collapsed while advancing: {failure}");
                particle.collapse_weight();
                return;
            },
        }

        if particle.weight() == 0.0 {
            return;
        }

        let host_tree = self.simulator.model().host_tree();

        // nodes speciating at one host divergence resolve together and are
        // charged once
        let mut groups: BTreeMap<Node, Vec<Node>> = BTreeMap::new();
        for node in nodes {
            groups
                .entry(self.reconciliation.host(*node))
                .or_default()
                .push(*node);
        }

        for (host, group) in &groups {
            let result = if host_tree.height(*host).get() == until && !host_tree.is_external(*host)
            {
                let speciating: Vec<(Node, (Node, Node))> = group
                    .iter()
                    .map(|guest| {
                        let children = self
                            .guest_tree
                            .children(*guest)
                            .expect("speciating guest nodes are internal");
                        (*guest, children)
                    })
                    .collect();

                self.simulator
                    .simulate_cospeciation_event(particle.state_mut(), *host, &speciating, rng)
                    .map(|probability| particle.multiply_weight(probability))
            } else {
                group.iter().try_for_each(|guest| {
                    let children = self
                        .guest_tree
                        .children(*guest)
                        .expect("speciating guest nodes are internal");

                    self.simulator
                        .simulate_birth_event(
                            particle.state_mut(),
                            *guest,
                            children,
                            *host,
                            until,
                            rng,
                        )
                        .map(|probability| particle.multiply_weight(probability))
                })
            };

            if let Err(failure) = result {
                trace!("particle collapsed at a checkpoint divergence: {failure}");
                particle.collapse_weight();
            }

            if particle.weight() == 0.0 {
                return;
            }
        }
    }

    /// Runs the particle down to the present and applies the terminal tip
    /// sampling correction: for every host leaf,
    /// `rho^observed * (1 - rho)^(complete - observed)` accounts for extant
    /// latent lineages that were never sampled.
    fn finish_particle<G: RngSampler>(&self, particle: &mut Particle, rng: &mut G) {
        if particle.weight() == 0.0 {
            return;
        }

        match self.simulator.advance(particle.state_mut(), 0.0, rng) {
            Ok(factor) => particle.multiply_weight(factor),
            Err(failure) => {
                trace!("particle collapsed while reaching the present: {failure}");
                particle.collapse_weight();
                return;
            },
        }

        let model = self.simulator.model();
        let host_tree = model.host_tree();

        let mut observed_leaf_counts: FnvHashMap<Node, usize> = FnvHashMap::default();
        for guest_leaf in self.guest_tree.external_nodes() {
            *observed_leaf_counts
                .entry(self.reconciliation.host(*guest_leaf))
                .or_default() += 1;
        }

        for host_leaf in host_tree.external_nodes() {
            let complete = particle.state().guest_count(*host_leaf);
            let observed = observed_leaf_counts
                .get(host_leaf)
                .copied()
                .unwrap_or_default();

            // the complete process must at least cover the sampled leaves
            let Some(unsampled) = complete.checked_sub(observed) else {
                particle.collapse_weight();
                return;
            };

            let rho = model.sampling_probability(*host_leaf).get();

            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            particle
                .multiply_weight(rho.powi(observed as i32) * (1.0 - rho).powi(unsampled as i32));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_weight(particles: &[Particle]) -> Option<f64> {
        let total: f64 = particles.iter().map(Particle::weight).sum();
        let mean = total / (particles.len() as f64);

        (mean > 0.0).then_some(mean)
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroUsize;

    use cophy_core::{
        reconciliation::Reconciliation,
        tree::{LineageTree, Node},
    };
    use cophy_core_bond::{ClosedOpenUnitF64, ClosedUnitF64, NonNegativeF64, PositiveF64};
    use cophy_impls::{
        model::{DhslModel, DhslParameters},
        rng::StdRng,
        simulator::CophylogenySimulator,
    };

    use super::TrajectoryParticleFilter;

    fn two_taxon_tree() -> LineageTree {
        LineageTree::from_parents(&[Some(2), Some(2), None], &[0.0, 0.0, 1.0]).unwrap()
    }

    fn dhsl_simulator(
        birth_diff: f64,
        relative_death: f64,
        host_switch: f64,
        origin_height: f64,
        sampling: Vec<f64>,
        host_tree: LineageTree,
    ) -> CophylogenySimulator<DhslModel> {
        let model = DhslModel::new(
            host_tree,
            DhslParameters {
                birth_diff_rate: NonNegativeF64::new(birth_diff).unwrap(),
                relative_death_rate: ClosedOpenUnitF64::new(relative_death).unwrap(),
                host_switch_proportion: ClosedUnitF64::new(host_switch).unwrap(),
                origin_height: PositiveF64::new(origin_height).unwrap(),
                sampling_probabilities: sampling
                    .into_iter()
                    .map(|rho| ClosedUnitF64::new(rho).unwrap())
                    .collect(),
            },
        )
        .unwrap();

        CophylogenySimulator::new(model)
    }

    fn log_likelihood(
        simulator: &CophylogenySimulator<DhslModel>,
        guest_tree: &LineageTree,
        reconciliation: &Reconciliation,
        particle_count: usize,
        seed: u64,
    ) -> f64 {
        let filter = TrajectoryParticleFilter::builder()
            .simulator(simulator)
            .guest_tree(guest_tree)
            .reconciliation(reconciliation)
            .particle_count(NonZeroUsize::new(particle_count).unwrap())
            .build();

        filter.log_likelihood(&mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn forced_cospeciation_is_deterministic() {
        // a fully congruent pair of two-taxon trees: with zero rates the
        // forced cospeciation is the only possible history
        let simulator =
            dhsl_simulator(0.0, 0.0, 0.0, 2.0, vec![1.0, 1.0], two_taxon_tree());
        let guest_tree = two_taxon_tree();
        let reconciliation =
            Reconciliation::from_hosts(vec![Node::from(0), Node::from(1), Node::from(2)]);

        for (particle_count, seed) in [(1, 7), (10, 11), (100, 13)] {
            let result =
                log_likelihood(&simulator, &guest_tree, &reconciliation, particle_count, seed);
            assert!(
                result.abs() < 1e-12,
                "expected a deterministic log-likelihood of zero, got {result}",
            );
        }
    }

    #[test]
    fn a_host_that_never_existed_is_impossible() {
        let simulator =
            dhsl_simulator(0.0, 0.0, 0.0, 2.0, vec![1.0, 1.0], two_taxon_tree());
        let guest_tree = two_taxon_tree();

        // the first guest leaf sits at height zero, where the host root no
        // longer exists
        let reconciliation =
            Reconciliation::from_hosts(vec![Node::from(2), Node::from(1), Node::from(2)]);

        assert_eq!(
            log_likelihood(&simulator, &guest_tree, &reconciliation, 10, 7),
            f64::NEG_INFINITY,
        );
    }

    #[test]
    fn an_origin_below_the_roots_is_impossible() {
        let simulator =
            dhsl_simulator(0.0, 0.0, 0.0, 0.5, vec![1.0, 1.0], two_taxon_tree());
        let guest_tree = two_taxon_tree();
        let reconciliation =
            Reconciliation::from_hosts(vec![Node::from(0), Node::from(1), Node::from(2)]);

        assert_eq!(
            log_likelihood(&simulator, &guest_tree, &reconciliation, 10, 7),
            f64::NEG_INFINITY,
        );
    }

    #[test]
    fn an_incomplete_reconciliation_is_impossible() {
        let simulator =
            dhsl_simulator(0.0, 0.0, 0.0, 2.0, vec![1.0, 1.0], two_taxon_tree());
        let guest_tree = two_taxon_tree();
        let reconciliation = Reconciliation::from_hosts(vec![Node::from(0)]);

        assert_eq!(
            log_likelihood(&simulator, &guest_tree, &reconciliation, 10, 7),
            f64::NEG_INFINITY,
        );
    }

    #[test]
    fn an_observed_birth_under_zero_rates_collapses_every_particle() {
        // the guest divergence at height 1.5 cannot be a cospeciation (the
        // host divergence sits at 1.0), and with a zero birth rate no birth
        // can be observed either
        let simulator =
            dhsl_simulator(0.0, 0.0, 0.0, 2.0, vec![1.0, 1.0], two_taxon_tree());
        let guest_tree =
            LineageTree::from_parents(&[Some(2), Some(2), None], &[0.0, 0.0, 1.5]).unwrap();
        let reconciliation =
            Reconciliation::from_hosts(vec![Node::from(0), Node::from(1), Node::from(2)]);

        assert_eq!(
            log_likelihood(&simulator, &guest_tree, &reconciliation, 10, 7),
            f64::NEG_INFINITY,
        );
    }

    #[test]
    fn a_single_lineage_pair_has_a_finite_likelihood() {
        // one guest lineage on one host lineage: no checkpoints, only the
        // latent process between the origin and the present
        let host_tree = LineageTree::from_parents(&[None], &[0.0]).unwrap();
        let guest_tree = LineageTree::from_parents(&[None], &[0.0]).unwrap();
        let reconciliation = Reconciliation::from_hosts(vec![Node::from(0)]);

        let simulator = dhsl_simulator(0.1, 0.5, 0.0, 1.0, vec![1.0], host_tree);

        let result = log_likelihood(&simulator, &guest_tree, &reconciliation, 500, 98_321);

        assert!(result.is_finite());
        // surviving histories are a strict subset of all histories
        assert!(result < 0.0);
    }
}
