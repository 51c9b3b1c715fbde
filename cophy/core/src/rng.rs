use cophy_core_bond::{ClosedUnitF64, PositiveF64};

/// The primitive random source: every stochastic component of the engine
/// takes one as an explicit dependency, so runs are seedable and
/// reproducible and particles can be sharded across independent streams.
pub trait RngCore {
    /// Samples a uniform value in `[0.0, 1.0)`.
    fn sample_uniform(&mut self) -> f64;
}

#[allow(clippy::module_name_repetitions)]
pub trait RngSampler: RngCore {
    #[debug_requires(length > 0, "length is non-zero")]
    #[debug_ensures(ret < length, "samples U(0, length - 1)")]
    fn sample_index(&mut self, length: usize) -> usize {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = (self.sample_uniform() * (length as f64)).floor() as usize;
        index
    }

    #[debug_ensures(ret >= 0.0, "samples Exp(lambda)")]
    fn sample_exponential(&mut self, lambda: PositiveF64) -> f64 {
        -self.sample_uniform().ln() / lambda.get()
    }

    fn sample_event(&mut self, probability: ClosedUnitF64) -> bool {
        self.sample_uniform() < probability.get()
    }
}

impl<G: RngCore> RngSampler for G {}
