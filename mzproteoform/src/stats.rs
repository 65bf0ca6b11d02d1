//! Weighted summary statistics. Empty or zero-weight inputs summarize to zero.
use num_traits::Float;

/// Compute the weighted mean of `values`. Returns zero when the total weight is zero.
pub fn weighted_mean<F: Float, I: IntoIterator<Item = (F, F)>>(pairs: I) -> F {
    let (acc, total) = pairs
        .into_iter()
        .fold((F::zero(), F::zero()), |(acc, total), (value, weight)| {
            (acc + value * weight, total + weight)
        });
    if total == F::zero() {
        F::zero()
    } else {
        acc / total
    }
}

/// Compute the weighted mean and weighted (population) variance of `pairs` of
/// `(value, weight)`.
///
/// The variance is `sum(w * (x - mean)^2) / sum(w)`.
pub fn weighted_mean_variance<F: Float>(pairs: &[(F, F)]) -> (F, F) {
    let total = pairs.iter().fold(F::zero(), |acc, (_, w)| acc + *w);
    if total == F::zero() {
        return (F::zero(), F::zero());
    }
    let mean = weighted_mean(pairs.iter().copied());
    let spread = pairs.iter().fold(F::zero(), |acc, (x, w)| {
        let d = *x - mean;
        acc + *w * d * d
    });
    (mean, spread / total)
}

/// The arithmetic mean and population standard deviation of `values`
pub fn mean_stddev<F: Float>(values: &[F]) -> (F, F) {
    if values.is_empty() {
        return (F::zero(), F::zero());
    }
    let n = F::from(values.len()).unwrap_or_else(F::one);
    let mean = values.iter().fold(F::zero(), |acc, v| acc + *v) / n;
    let var = values.iter().fold(F::zero(), |acc, v| {
        let d = *v - mean;
        acc + d * d
    }) / n;
    (mean, var.sqrt())
}
