//! Closed-form full conditionals for normal models.

use rand::RngCore;
use rand_distr::{Distribution, Gamma, StandardNormal};

use crate::error::DegenerateConditional;

/// Normal full conditional of a mean, parameterized by precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalPosterior {
    pub mean: f64,
    pub precision: f64,
}

impl NormalPosterior {
    /// Update a `N(prior_mean, 1 / prior_precision)` prior with `n` observations
    /// of known precision `data_precision` whose values add up to `sum`.
    pub fn update(
        prior_mean: f64,
        prior_precision: f64,
        data_precision: f64,
        n: usize,
        sum: f64,
    ) -> Self {
        let precision = prior_precision + n as f64 * data_precision;
        let mean = (prior_precision * prior_mean + data_precision * sum) / precision;
        Self { mean, precision }
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<f64, DegenerateConditional> {
        if !(self.mean.is_finite() && self.precision.is_finite() && self.precision > 0.) {
            return Err(DegenerateConditional(format!(
                "normal conditional with mean {} and precision {}",
                self.mean, self.precision
            )));
        }
        let z: f64 = StandardNormal.sample(rng);
        Ok(self.mean + z / self.precision.sqrt())
    }
}

/// Gamma full conditional of a normal precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaPosterior {
    pub shape: f64,
    pub rate: f64,
}

impl GammaPosterior {
    /// Update a `Gamma(prior_shape, prior_rate)` prior with `n` normal residuals
    /// whose squares add up to `sum_sq`.
    pub fn update(prior_shape: f64, prior_rate: f64, n: usize, sum_sq: f64) -> Self {
        Self {
            shape: prior_shape + 0.5 * n as f64,
            rate: prior_rate + 0.5 * sum_sq,
        }
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<f64, DegenerateConditional> {
        let gamma = Gamma::new(self.shape, 1. / self.rate).map_err(|err| {
            DegenerateConditional(format!(
                "gamma conditional with shape {} and rate {}: {}",
                self.shape, self.rate, err
            ))
        })?;
        let value = gamma.sample(rng);
        // Tiny shapes can underflow to zero, which is outside the support.
        if value > 0. && value.is_finite() {
            Ok(value)
        } else {
            Err(DegenerateConditional(format!(
                "gamma conditional produced {}",
                value
            )))
        }
    }
}
