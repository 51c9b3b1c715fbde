use cophy_core::{rng::RngSampler, state::TrajectoryState};
use cophy_core_bond::NonNegativeF64;
use cophy_impls::weighted::WeightedSampler;

/// One trajectory of the latent process paired with its importance weight.
///
/// A particle owns its state exclusively; copies are deep clones, so no two
/// particles ever share mutable structure.
pub struct Particle {
    state: TrajectoryState,
    weight: f64,
}

impl Particle {
    #[must_use]
    pub fn new(state: TrajectoryState) -> Self {
        Self { state, weight: 1.0 }
    }

    #[must_use]
    pub fn state(&self) -> &TrajectoryState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TrajectoryState {
        &mut self.state
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[debug_requires(factor >= 0.0, "likelihood factors are non-negative")]
    pub fn multiply_weight(&mut self, factor: f64) {
        self.weight *= factor;
    }

    /// Zero is absorbing: no later factor can restore a collapsed weight.
    pub fn collapse_weight(&mut self) {
        self.weight = 0.0;
    }

    /// An independent deep copy with a fresh unit weight.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            state: self.state.clone(),
            weight: 1.0,
        }
    }

    /// Multinomial resampling: replaces every slot by an independent copy of
    /// a particle drawn with probability proportional to its weight, and
    /// resets all weights to one.
    #[debug_requires(
        particles.iter().any(|particle| particle.weight() > 0.0),
        "some particle has positive weight"
    )]
    pub fn resample<G: RngSampler>(particles: &mut Vec<Self>, rng: &mut G) {
        let sampler = WeightedSampler::new(
            particles
                .iter()
                .enumerate()
                .map(|(index, particle)| {
                    (
                        index,
                        NonNegativeF64::new(particle.weight())
                            .unwrap_or_else(|_| NonNegativeF64::zero()),
                    )
                })
                .collect(),
        );

        let resampled: Vec<Self> = (0..particles.len())
            .map(|_| particles[*sampler.sample(rng)].copy())
            .collect();

        *particles = resampled;
    }
}
