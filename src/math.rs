use statrs::distribution::{Continuous, Gamma, Normal, Uniform};

/// Log density of a normal distribution parameterized by its precision.
#[inline]
pub fn normal_logpdf(x: f64, mean: f64, precision: f64) -> f64 {
    if !(precision > 0.) {
        return f64::NEG_INFINITY;
    }
    Normal::new(mean, precision.sqrt().recip()).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(x))
}

/// Log density of a gamma distribution with shape and rate.
#[inline]
pub fn gamma_logpdf(x: f64, shape: f64, rate: f64) -> f64 {
    if !(x > 0.) {
        return f64::NEG_INFINITY;
    }
    Gamma::new(shape, rate).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(x))
}

#[inline]
pub fn uniform_logpdf(x: f64, lower: f64, upper: f64) -> f64 {
    if !(x >= lower && x <= upper) {
        return f64::NEG_INFINITY;
    }
    Uniform::new(lower, upper).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(x))
}

/// The logistic link `1 / (1 + exp(-rate * (t - midpoint)))`.
///
/// Both the logistic likelihood and the predictor go through this function.
#[inline]
pub fn logistic(t: f64, rate: f64, midpoint: f64) -> f64 {
    1. / (1. + (-rate * (t - midpoint)).exp())
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with `n - 1` in the denominator.
pub(crate) fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1) as f64
}

/// Quantile of already sorted values with linear interpolation (R type 7).
pub(crate) fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0., 1.) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
