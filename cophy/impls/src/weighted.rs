use cophy_core::rng::RngSampler;
use cophy_core_bond::NonNegativeF64;

/// A cumulative-weight table for drawing one of a fixed set of events with
/// probability proportional to its weight.
///
/// The tables in this engine are rebuilt from a mutating trajectory before
/// every draw, so construction is the hot path and stays a single linear
/// pass.
pub struct WeightedSampler<E> {
    events: Vec<E>,
    cumulative: Vec<f64>,
    total: f64,
}

impl<E> WeightedSampler<E> {
    #[must_use]
    #[debug_requires(!event_weights.is_empty(), "event_weights is non-empty")]
    pub fn new(event_weights: Vec<(E, NonNegativeF64)>) -> Self {
        let mut events = Vec::with_capacity(event_weights.len());
        let mut cumulative = Vec::with_capacity(event_weights.len());

        let mut total = 0.0_f64;

        for (event, weight) in event_weights {
            total += weight.get();
            events.push(event);
            cumulative.push(total);
        }

        Self {
            events,
            cumulative,
            total,
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Draws an event with probability proportional to its weight;
    /// zero-weight events are never drawn.
    #[debug_requires(self.total() > 0.0, "some event has positive weight")]
    pub fn sample<G: RngSampler>(&self, rng: &mut G) -> &E {
        let target = rng.sample_uniform() * self.total;

        let index = self.cumulative.partition_point(|bound| *bound <= target);

        &self.events[index.min(self.events.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use cophy_core_bond::NonNegativeF64;

    use crate::rng::StdRng;

    use super::WeightedSampler;

    fn weight(value: f64) -> NonNegativeF64 {
        NonNegativeF64::new(value).unwrap()
    }

    #[test]
    fn respects_weight_proportions() {
        const SAMPLES: usize = 100_000;

        let sampler = WeightedSampler::new(vec![
            (0_usize, weight(3.0)),
            (1_usize, weight(1.0)),
            (2_usize, weight(0.0)),
        ]);

        let mut rng = StdRng::seed_from_u64(20_498);

        let mut tally = [0_usize; 3];
        for _ in 0..SAMPLES {
            tally[*sampler.sample(&mut rng)] += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let frequency = |count: usize| (count as f64) / (SAMPLES as f64);

        assert!((frequency(tally[0]) - 0.75).abs() < 0.01);
        assert!((frequency(tally[1]) - 0.25).abs() < 0.01);
        assert_eq!(tally[2], 0);
    }

    #[test]
    fn single_event_is_certain() {
        let sampler = WeightedSampler::new(vec![("only", weight(0.125))]);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            assert_eq!(*sampler.sample(&mut rng), "only");
        }
    }

    #[test]
    fn leading_zero_weights_are_skipped() {
        let sampler = WeightedSampler::new(vec![
            (0_usize, weight(0.0)),
            (1_usize, weight(2.0)),
        ]);
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..100 {
            assert_eq!(*sampler.sample(&mut rng), 1);
        }
    }
}
