//! Metropolis-within-Gibbs sampling for hierarchical regression models.
//!
//! A model is declared as a list of parameter blocks, each with a prior, an
//! update rule and an initial-value generator, plus one log-likelihood
//! function. [`ChainManager`] runs independent chains of the resulting
//! [`ModelSpec`] in parallel and collects their retained draws into a
//! [`PosteriorSampleSet`].
//!
//! ```no_run
//! use gibbs_rs::{sample, Dataset, GrowthModel, PosteriorMeans, SamplerConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut data = Dataset::new(&["dose"]);
//! data.push(1, 0., &[15.], 1.2)?;
//! data.push(1, 3., &[15.], 1.6)?;
//! data.push(2, 0., &[30.], 0.9)?;
//! data.push(2, 3., &[30.], 1.4)?;
//!
//! let model = GrowthModel::linear_quadratic(&["dose"]);
//! let samples = sample(&model.spec(&data)?, &data, SamplerConfig::default())?;
//! let means = PosteriorMeans::from_samples(&samples);
//! println!("b_time = {:?}", means.get("b_time"));
//! # Ok(())
//! # }
//! ```

pub(crate) mod adapt;
pub(crate) mod chain;
pub(crate) mod conjugate;
pub(crate) mod data;
pub(crate) mod error;
pub(crate) mod growth;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod params;
pub(crate) mod sampler;
pub(crate) mod summary;
pub(crate) mod trace;

pub use adapt::{DualAverage, DualAverageOptions};
pub use chain::{BlockStats, ChainPhase, ChainStats, Draw, GibbsChain};
pub use conjugate::{GammaPosterior, NormalPosterior};
pub use data::{Dataset, Observation};
pub use error::{DegenerateConditional, PredictError, SamplerError, SetupError};
pub use growth::{mean_response, GridPoint, GrowthCurve, GrowthModel, GrowthPriors, TimeTrend};
pub use math::{gamma_logpdf, logistic, normal_logpdf, uniform_logpdf};
pub use model::{
    Block, FullConditional, Init, LogLikelihood, ModelBuilder, ModelSpec, ParamSpec, Prior,
    Proposal, UpdateRule,
};
pub use params::{ParamId, ParameterLayout, ParameterVector, Support};
pub use sampler::{chain_rng, sample, CancelToken, ChainManager, SamplerConfig};
pub use summary::{split_rhat, summarize, ParameterSummary, PosteriorMeans};
pub use trace::{ChainOutput, PosteriorSampleSet};
