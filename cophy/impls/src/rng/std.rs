use rand::{rngs::StdRng as StdRngImpl, Rng, SeedableRng};

use cophy_core::rng::RngCore;

#[allow(clippy::module_name_repetitions)]
#[derive(Clone)]
pub struct StdRng(StdRngImpl);

impl StdRng {
    #[must_use]
    pub fn from_seed(seed: <StdRngImpl as SeedableRng>::Seed) -> Self {
        Self(StdRngImpl::from_seed(seed))
    }

    #[must_use]
    pub fn seed_from_u64(seed: u64) -> Self {
        Self(StdRngImpl::seed_from_u64(seed))
    }
}

impl RngCore for StdRng {
    #[must_use]
    #[inline]
    fn sample_uniform(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}
