//! Factorial and binomial helpers over latent lineage counts.

/// `n!` as a double; overflows to infinity for large `n`, which downstream
/// reciprocal probabilities map to zero weight.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |product, i| product * i as f64)
}

/// The binomial coefficient under the extended convention that choosing
/// more elements than exist yields zero combinations rather than an error,
/// so requesting more lineages than are currently latent simply contributes
/// nothing.
#[must_use]
#[debug_ensures(n >= k -> ret > 0, "a realisable choice has combinations")]
pub fn extended_binomial_coefficient(n: usize, k: usize) -> u64 {
    if n < k {
        return 0;
    }

    let k = k.min(n - k);

    let mut coefficient = 1_u64;
    for i in 1..=k {
        // multiply before dividing: C(n-k+i, i) is integral at every step
        coefficient = coefficient * ((n - k + i) as u64) / (i as u64);
    }
    coefficient
}

/// `observed! / total!` without forming either factorial, keeping the ratio
/// well-conditioned for counts far beyond where `total!` overflows.
#[must_use]
#[debug_requires(observed <= total, "observed lineages are a subset")]
#[debug_ensures(ret >= 0.0 && ret <= 1.0, "a ratio of nested permutations")]
#[allow(clippy::cast_precision_loss)]
pub fn permutation_ratio(observed: usize, total: usize) -> f64 {
    ((observed + 1)..=total).fold(1.0, |ratio, i| ratio / i as f64)
}
