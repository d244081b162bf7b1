//! Posterior summaries of a [`PosteriorSampleSet`].

use std::collections::HashMap;

use crate::{
    math::{mean, sorted_quantile, variance},
    trace::PosteriorSampleSet,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q2_5: f64,
    pub q50: f64,
    pub q97_5: f64,
    /// Split-chain potential scale reduction factor.
    pub rhat: f64,
}

/// Summaries of every output column, in column order.
pub fn summarize(samples: &PosteriorSampleSet) -> Vec<ParameterSummary> {
    samples
        .columns()
        .iter()
        .filter_map(|name| {
            let by_chain = samples.column_by_chain(name)?;
            let mut all: Vec<f64> = by_chain.iter().flatten().copied().collect();
            let mean = mean(&all);
            let sd = variance(&all).sqrt();
            all.sort_unstable_by(f64::total_cmp);
            Some(ParameterSummary {
                name: name.clone(),
                mean,
                sd,
                q2_5: sorted_quantile(&all, 0.025),
                q50: sorted_quantile(&all, 0.5),
                q97_5: sorted_quantile(&all, 0.975),
                rhat: split_rhat(&by_chain),
            })
        })
        .collect()
}

/// Gelman-Rubin diagnostic over chains split in half.
///
/// Returns 1 if there are fewer than two chains or fewer than four draws per
/// chain. Chains of unequal length are truncated to the shortest one.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let n_draws = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    if chains.len() < 2 || n_draws < 4 {
        return 1.;
    }

    let half = n_draws / 2;
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[n_draws - half..n_draws]])
        .collect();

    let n = half as f64;
    let means: Vec<f64> = splits.iter().map(|s| mean(s)).collect();
    let within = splits.iter().map(|s| variance(s)).sum::<f64>() / splits.len() as f64;
    let between = n * variance(&means);

    if within <= 0. {
        return if between <= 0. { 1. } else { f64::INFINITY };
    }
    let var_plus = (n - 1.) / n * within + between / n;
    (var_plus / within).sqrt()
}

/// Posterior mean of every output column, addressed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosteriorMeans(HashMap<String, f64>);

impl PosteriorMeans {
    pub fn from_samples(samples: &PosteriorSampleSet) -> Self {
        Self(
            samples
                .columns()
                .iter()
                .filter_map(|name| Some((name.clone(), mean(&samples.column(name)?))))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for PosteriorMeans {
    fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    use super::*;
    use crate::{
        chain::{ChainStats, Draw},
        trace::ChainOutput,
    };

    fn samples_from(chains: &[Vec<f64>]) -> PosteriorSampleSet {
        let outputs = chains
            .iter()
            .enumerate()
            .map(|(chain, values)| ChainOutput {
                chain_id: chain as u64,
                draws: values
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| Draw {
                        chain: chain as u64,
                        iteration: i as u64 + 1,
                        values: vec![v].into(),
                    })
                    .collect(),
                stats: ChainStats::default(),
            })
            .collect();
        PosteriorSampleSet::new(vec!["x".into()], outputs)
    }

    #[test]
    fn quantiles_and_moments() {
        let values: Vec<f64> = (1..=101).map(|v| v as f64).collect();
        let summary = summarize(&samples_from(&[values]));
        assert_eq!(summary.len(), 1);
        let x = &summary[0];
        assert_eq!(x.name, "x");
        assert_eq!(x.mean, 51.);
        assert_eq!(x.q50, 51.);
        assert_abs_diff_eq!(x.q2_5, 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(x.q97_5, 98.5, epsilon = 1e-12);
        assert_eq!(x.rhat, 1.);
    }

    #[test]
    fn rhat_detects_disagreeing_chains() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut draw = |offset: f64| -> Vec<f64> {
            (0..500)
                .map(|_| {
                    let z: f64 = StandardNormal.sample(&mut rng);
                    offset + z
                })
                .collect()
        };
        let mixed = vec![draw(0.), draw(0.), draw(0.)];
        let rhat = split_rhat(&mixed);
        assert!(rhat < 1.05, "rhat {}", rhat);

        let stuck = vec![draw(0.), draw(5.)];
        assert!(split_rhat(&stuck) > 1.5);
    }

    #[test]
    fn rhat_of_a_trend_within_one_chain_pair() {
        let trend: Vec<f64> = (0..100).map(|v| v as f64).collect();
        assert!(split_rhat(&[trend.clone(), trend]) > 1.5);
    }

    #[test]
    fn constant_chains() {
        assert_eq!(split_rhat(&[vec![1.; 10], vec![1.; 10]]), 1.);
        assert_eq!(split_rhat(&[vec![1.; 10], vec![2.; 10]]), f64::INFINITY);
    }

    #[test]
    fn means_by_name() {
        let means = PosteriorMeans::from_samples(&samples_from(&[vec![1., 2.], vec![3.]]));
        assert_eq!(means.get("x"), Some(2.));
        assert_eq!(means.get("y"), None);
    }
}
