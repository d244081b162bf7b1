use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use itertools::Itertools;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ThreadPoolBuilder};

use crate::{
    chain::GibbsChain,
    data::Dataset,
    error::{SamplerError, SetupError},
    model::ModelSpec,
    trace::PosteriorSampleSet,
};

/// Settings for a multi-chain run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Number of independent chains.
    pub n_chains: usize,
    /// Sweeps discarded at the start of each chain.
    pub n_burnin: u64,
    /// Sweeps after burn-in. Each chain retains `n_iter / thin` draws.
    pub n_iter: u64,
    /// Keep every `thin`-th sweep after burn-in.
    pub thin: u64,
    /// Master seed. Chain `i` uses stream `i` of a ChaCha8 generator with this seed.
    pub seed: u64,
    /// Attempts per parameter to draw an initial value inside its support.
    pub max_init_tries: usize,
    /// Tune Metropolis proposal scales during burn-in.
    pub tune_proposals: bool,
    /// Acceptance probability the proposal tuning aims for.
    pub target_accept: f64,
    /// Worker threads. Defaults to one per chain.
    pub num_threads: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_chains: 3,
            n_burnin: 1000,
            n_iter: 50_000,
            thin: 5,
            seed: 0,
            max_init_tries: 500,
            tune_proposals: true,
            target_accept: 0.44,
            num_threads: None,
        }
    }
}

impl SamplerConfig {
    /// Configure with a total iteration count that includes burn-in.
    ///
    /// Each chain then retains `(n_total - n_burnin) / thin` draws.
    pub fn from_total(n_total: u64, n_burnin: u64, thin: u64) -> Result<Self, SetupError> {
        if n_total <= n_burnin {
            return Err(SetupError::InvalidConfig(format!(
                "total iterations ({}) must exceed burn-in ({})",
                n_total, n_burnin
            )));
        }
        let config = Self {
            n_burnin,
            n_iter: n_total - n_burnin,
            thin,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        let fail = |msg: &str| Err(SetupError::InvalidConfig(msg.to_string()));
        if self.n_chains == 0 {
            return fail("n_chains must be at least 1");
        }
        if self.n_iter == 0 {
            return fail("n_iter must be positive");
        }
        if self.thin == 0 {
            return fail("thin must be at least 1");
        }
        if self.max_init_tries == 0 {
            return fail("max_init_tries must be at least 1");
        }
        if !(self.target_accept > 0. && self.target_accept < 1.) {
            return fail("target_accept must lie in (0, 1)");
        }
        if self.num_threads == Some(0) {
            return fail("num_threads must be at least 1");
        }
        Ok(())
    }

    /// Retained draws per chain.
    pub fn draws_per_chain(&self) -> u64 {
        self.n_iter / self.thin
    }

    /// Retained draws over all chains.
    pub fn total_draws(&self) -> u64 {
        self.draws_per_chain() * self.n_chains as u64
    }
}

/// Cooperative cancellation flag, checked by every chain between sweeps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The random stream of one chain.
///
/// All chains share the master seed and differ in the ChaCha stream, so no two
/// chains ever consume the same random numbers.
pub fn chain_rng(seed: u64, chain: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chain);
    rng
}

/// Runs independent chains in parallel and collects their draws.
#[derive(Debug, Clone)]
pub struct ChainManager {
    config: SamplerConfig,
    cancel: Option<CancelToken>,
}

impl ChainManager {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Run all chains to completion.
    ///
    /// Chains share the model and the data read-only. Each owns its parameter
    /// state and random stream, so results do not depend on scheduling.
    /// The first chain error aborts the run.
    pub fn run(&self, spec: &ModelSpec, data: &Dataset) -> Result<PosteriorSampleSet, SamplerError> {
        let config = self.config;
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads.unwrap_or(config.n_chains))
            .thread_name(|i| format!("gibbs-worker-{}", i))
            .build()?;

        log::info!(
            "sampling {} chains: {} burn-in + {} sweeps, thin {}",
            config.n_chains,
            config.n_burnin,
            config.n_iter,
            config.thin
        );
        let start = Instant::now();
        let cancel = self.cancel.as_ref();

        let results: Vec<_> = pool.install(|| {
            (0..config.n_chains as u64)
                .into_par_iter()
                .map(|chain| {
                    let rng = chain_rng(config.seed, chain);
                    GibbsChain::new(spec, data, config, chain, rng).run(cancel)
                })
                .collect()
        });

        let (outputs, errors): (Vec<_>, Vec<_>) = results.into_iter().partition_result();
        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }

        let samples = PosteriorSampleSet::new(spec.columns(), outputs);
        log::info!(
            "sampling finished: {} draws in {:?}",
            samples.len(),
            start.elapsed()
        );
        Ok(samples)
    }
}

/// Run `config.n_chains` chains of `spec` on `data`.
pub fn sample(
    spec: &ModelSpec,
    data: &Dataset,
    config: SamplerConfig,
) -> Result<PosteriorSampleSet, SamplerError> {
    ChainManager::new(config).run(spec, data)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::RngCore;

    use super::*;
    use crate::{
        model::{Init, ParamSpec, Prior, Proposal},
        params::ParameterVector,
    };

    fn standard_normal_model() -> ModelSpec {
        let mut builder = ModelSpec::builder();
        let x = builder.add(
            ParamSpec::scalar("x")
                .prior(Prior::Flat)
                .metropolis(Proposal::Normal, 1.)
                .init(Init::Uniform {
                    lower: -2.,
                    upper: 2.,
                }),
        );
        builder.likelihood(move |p: &ParameterVector, _: &Dataset| -> f64 {
            -0.5 * p.scalar(x).powi(2)
        });
        builder.build().unwrap()
    }

    #[test]
    fn default_matches_reference_run() {
        let config = SamplerConfig::default();
        assert_eq!(config.n_chains, 3);
        assert_eq!(config.draws_per_chain(), 10_000);
        assert_eq!(config.total_draws(), 30_000);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let base = SamplerConfig::default();
        for config in [
            SamplerConfig { n_chains: 0, ..base },
            SamplerConfig { n_iter: 0, ..base },
            SamplerConfig { thin: 0, ..base },
            SamplerConfig { target_accept: 1., ..base },
            SamplerConfig { num_threads: Some(0), ..base },
        ] {
            assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
        }
        assert!(SamplerConfig::from_total(10, 10, 1).is_err());

        let err = sample(
            &standard_normal_model(),
            &Dataset::default(),
            SamplerConfig { thin: 0, ..base },
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::Setup(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn chains_use_distinct_streams() {
        let mut a = chain_rng(42, 0);
        let mut b = chain_rng(42, 1);
        let mut a2 = chain_rng(42, 0);
        let x = a.next_u64();
        assert_ne!(x, b.next_u64());
        assert_eq!(x, a2.next_u64());
    }

    #[test]
    fn run_is_reproducible() {
        let spec = standard_normal_model();
        let data = Dataset::default();
        let config = SamplerConfig {
            n_chains: 3,
            n_burnin: 50,
            n_iter: 200,
            thin: 3,
            seed: 17,
            ..Default::default()
        };
        let first = sample(&spec, &data, config).unwrap();
        let second = sample(
            &spec,
            &data,
            SamplerConfig {
                num_threads: Some(1),
                ..config
            },
        )
        .unwrap();
        for (a, b) in first.chains().iter().zip(second.chains()) {
            assert_eq!(a.chain_id, b.chain_id);
            assert_eq!(a.draws, b.draws);
        }
        assert_eq!(first.len(), 3 * 66);
        assert_ne!(first.chains()[0].draws, first.chains()[1].draws);
    }

    #[test]
    fn cancelled_run_fails() {
        let token = CancelToken::new();
        token.cancel();
        let manager = ChainManager::new(SamplerConfig {
            n_chains: 2,
            ..Default::default()
        })
        .with_cancel_token(token);
        let err = manager
            .run(&standard_normal_model(), &Dataset::default())
            .unwrap_err();
        assert!(matches!(err, SamplerError::Cancelled { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn retained_draws_follow_thinning(
            n_total in 1u64..120,
            burn_frac in 0f64..1.,
            thin_pick in 0u64..1000,
        ) {
            let n_burnin = ((n_total as f64) * burn_frac) as u64;
            prop_assume!(n_burnin < n_total);
            let n_iter = n_total - n_burnin;
            let thin = 1 + thin_pick % n_total;

            let config = SamplerConfig {
                n_chains: 1,
                seed: 3,
                ..SamplerConfig::from_total(n_total, n_burnin, thin).unwrap()
            };
            let samples = sample(&standard_normal_model(), &Dataset::default(), config).unwrap();
            prop_assert_eq!(samples.len() as u64, n_iter / thin);
            prop_assert_eq!(samples.len() as u64, config.draws_per_chain());
        }
    }

    #[test]
    fn thinning_boundaries() {
        let spec = standard_normal_model();
        let data = Dataset::default();
        let cases = [
            // (n_total, n_burnin, thin)
            (40, 0, 1),
            (40, 0, 40),
            (40, 10, 1),
            (40, 10, 30),
            (40, 10, 31),
            (1, 0, 1),
        ];
        for (n_total, n_burnin, thin) in cases {
            let config = SamplerConfig {
                n_chains: 2,
                ..SamplerConfig::from_total(n_total, n_burnin, thin).unwrap()
            };
            let samples = sample(&spec, &data, config).unwrap();
            let expected = (n_total - n_burnin) / thin;
            for chain in samples.chains() {
                assert_eq!(chain.draws.len() as u64, expected);
            }
        }
    }
}
