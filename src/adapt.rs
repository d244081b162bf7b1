//! Burn-in tuning of Metropolis proposal scales by dual averaging.
//!
//! The log scale is the dual-averaging iterate. Its running weighted average
//! is frozen into the proposal once burn-in ends.

/// Settings for proposal scale adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    /// Decay exponent of the iterate averaging weights.
    pub k: f64,
    /// Offset that damps the first few error terms.
    pub t0: f64,
    /// Step size of the dual iterate on the log scale.
    pub gamma: f64,
    /// The iterate is shrunk toward `bias * initial_scale`.
    ///
    /// A random-walk proposal starts from a scale the model declared, so the
    /// default shrinks toward that scale itself.
    pub bias: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
            bias: 1.,
        }
    }
}

/// Dual averaging of one block's log proposal scale toward a target
/// acceptance probability.
#[derive(Debug, Clone)]
pub struct DualAverage {
    settings: DualAverageOptions,
    target: f64,
    shrink_toward: f64,
    /// Weighted mean of `target - accept_prob` so far.
    error_mean: f64,
    iterate: f64,
    averaged: f64,
    step: u64,
}

impl DualAverage {
    pub fn new(settings: DualAverageOptions, initial_scale: f64, target: f64) -> DualAverage {
        let log_scale = initial_scale.ln();
        DualAverage {
            settings,
            target,
            shrink_toward: settings.bias.ln() + log_scale,
            error_mean: 0.,
            iterate: log_scale,
            averaged: log_scale,
            step: 0,
        }
    }

    /// Feed the acceptance probability of one Metropolis step.
    pub fn advance(&mut self, accept_prob: f64) {
        self.step += 1;
        let t = self.step as f64;
        let DualAverageOptions { k, t0, gamma, .. } = self.settings;

        let weight = (t + t0).recip();
        self.error_mean += weight * (self.target - accept_prob - self.error_mean);
        self.iterate = self.shrink_toward - self.error_mean * t.sqrt() / gamma;

        let eta = t.powf(-k);
        self.averaged += eta * (self.iterate - self.averaged);
    }

    /// Number of acceptance probabilities seen.
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Scale to use for the next proposal during burn-in.
    pub fn current_scale(&self) -> f64 {
        self.iterate.exp()
    }

    /// Averaged scale, used once burn-in is over.
    pub fn current_scale_adapted(&self) -> f64 {
        self.averaged.exp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn shrinks_scale_when_acceptance_is_low() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 1., 0.44);
        for _ in 0..200 {
            adapt.advance(0.05);
        }
        assert!(adapt.current_scale_adapted() < 1.);
        assert_eq!(adapt.steps(), 200);
    }

    #[test]
    fn grows_scale_when_acceptance_is_high() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 1., 0.44);
        for _ in 0..200 {
            adapt.advance(1.);
        }
        assert!(adapt.current_scale_adapted() > 1.);
    }

    #[test]
    fn settles_where_acceptance_meets_the_target() {
        // Acceptance exp(-scale) reaches 0.44 at scale -ln(0.44).
        let settled = -(0.44f64).ln();
        for (initial, bias) in [(1., 1.), (0.05, 1.), (5., 1.), (1., 10.)] {
            let settings = DualAverageOptions {
                bias,
                ..Default::default()
            };
            let mut adapt = DualAverage::new(settings, initial, 0.44);
            for _ in 0..5000 {
                let accept_prob = (-adapt.current_scale()).exp();
                adapt.advance(accept_prob);
            }
            assert_abs_diff_eq!(adapt.current_scale_adapted(), settled, epsilon = 0.02);
        }
    }

    #[test]
    fn first_step_starts_from_the_shrinkage_point() {
        let settings = DualAverageOptions {
            bias: 10.,
            ..Default::default()
        };
        let mut adapt = DualAverage::new(settings, 0.5, 0.44);
        assert_abs_diff_eq!(adapt.current_scale(), 0.5, epsilon = 1e-12);
        // At the target the error term vanishes and only the shrinkage remains.
        adapt.advance(0.44);
        assert_abs_diff_eq!(adapt.current_scale(), 5., epsilon = 1e-9);
    }

    #[test]
    fn running_mean() {
        let mut mean = RunningMean::default();
        assert!(mean.current().is_nan());
        mean.add(1.);
        mean.add(0.);
        assert_eq!(mean.current(), 0.5);
    }
}
