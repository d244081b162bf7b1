//! Longitudinal growth models with a random intercept per subject.
//!
//! ```text
//! y[j]  ~ N(b0[subject[j]] + f(time[j]) + sum_k b_k * x[j, k], 1 / tau)
//! b0[i] ~ N(mu_b0, 1 / tau_b0)
//! ```
//!
//! The time trend `f` is either `b_time * t + b_time2 * t^2` or the logistic
//! curve `delta / (1 + exp(-rate * (t - midpoint)))`. The intercepts, their
//! hyperparameters and the residual precision are drawn from their conjugate
//! full conditionals, everything else by random-walk Metropolis.

use std::sync::Arc;

use rand::RngCore;

use crate::{
    conjugate::{GammaPosterior, NormalPosterior},
    data::{Dataset, Observation},
    error::{DegenerateConditional, PredictError, SetupError},
    math::{logistic, mean, normal_logpdf, variance},
    model::{FullConditional, Init, LogLikelihood, ModelSpec, ParamSpec, Prior, Proposal},
    params::{ParamId, ParameterVector},
    summary::PosteriorMeans,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthCurve {
    LinearQuadratic,
    Logistic,
}

/// Time trend at fixed coefficient values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeTrend {
    LinearQuadratic { b_time: f64, b_time2: f64 },
    Logistic { delta: f64, rate: f64, midpoint: f64 },
}

impl TimeTrend {
    pub fn eval(&self, time: f64) -> f64 {
        match *self {
            TimeTrend::LinearQuadratic { b_time, b_time2 } => {
                b_time * time + b_time2 * time * time
            }
            TimeTrend::Logistic {
                delta,
                rate,
                midpoint,
            } => delta * logistic(time, rate, midpoint),
        }
    }
}

/// Mean response of one observation.
///
/// The likelihood and [`GrowthModel::predict`] both evaluate this, so fitted
/// and predicted curves cannot drift apart.
pub fn mean_response<I>(
    intercept: f64,
    trend: &TimeTrend,
    coefficients: &[f64],
    time: f64,
    covariates: I,
) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let linear: f64 = coefficients
        .iter()
        .zip(covariates)
        .map(|(b, x)| b * x)
        .sum();
    intercept + trend.eval(time) + linear
}

/// Prior constants. Normal priors are given by precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthPriors {
    /// Prior mean of `mu_b0`, the time terms and the covariate coefficients.
    pub coefficient_mean: f64,
    pub coefficient_precision: f64,
    /// Gamma prior of `tau` and `tau_b0`.
    pub precision_shape: f64,
    pub precision_rate: f64,
    /// Upper end of the uniform prior of the logistic `rate`.
    pub max_rate: f64,
}

impl Default for GrowthPriors {
    fn default() -> Self {
        Self {
            coefficient_mean: 0.,
            coefficient_precision: 1e-4,
            precision_shape: 1e-3,
            precision_rate: 1e-3,
            max_rate: 5.,
        }
    }
}

/// A point at which to evaluate the fitted mean function.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub time: f64,
    /// Values of the model's covariates, ordered like [`GrowthModel::covariates`].
    pub covariates: Vec<f64>,
    /// Dense subject index whose intercept `b0[i]` to use. The population
    /// intercept `mu_b0` is used if this is `None`.
    pub subject: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrowthModel {
    curve: GrowthCurve,
    covariates: Vec<String>,
    priors: GrowthPriors,
    proposal_scale: f64,
}

impl GrowthModel {
    pub fn new<S: AsRef<str>>(curve: GrowthCurve, covariates: &[S]) -> Self {
        Self {
            curve,
            covariates: covariates.iter().map(|s| s.as_ref().to_string()).collect(),
            priors: GrowthPriors::default(),
            proposal_scale: 0.1,
        }
    }

    pub fn linear_quadratic<S: AsRef<str>>(covariates: &[S]) -> Self {
        Self::new(GrowthCurve::LinearQuadratic, covariates)
    }

    pub fn logistic<S: AsRef<str>>(covariates: &[S]) -> Self {
        Self::new(GrowthCurve::Logistic, covariates)
    }

    pub fn with_priors(mut self, priors: GrowthPriors) -> Self {
        self.priors = priors;
        self
    }

    /// Initial random-walk scale of every Metropolis parameter.
    pub fn with_proposal_scale(mut self, scale: f64) -> Self {
        self.proposal_scale = scale;
        self
    }

    pub fn curve(&self) -> GrowthCurve {
        self.curve
    }

    /// Names of the dataset covariates that enter the mean linearly.
    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    pub fn coefficient_name(covariate: &str) -> String {
        format!("b_{}", covariate)
    }

    /// Build the model for `data`.
    pub fn spec(&self, data: &Dataset) -> Result<ModelSpec, SetupError> {
        if data.is_empty() {
            return Err(SetupError::EmptyDataset);
        }
        let columns = self
            .covariates
            .iter()
            .map(|name| data.covariate_index(name))
            .collect::<Result<Vec<_>, _>>()?;

        let responses: Vec<f64> = data.observations().iter().map(|o| o.response).collect();
        let y_mean = mean(&responses);
        let y_sd = match variance(&responses).sqrt() {
            sd if sd.is_finite() && sd > 0. => sd,
            _ => 1.,
        };

        let priors = &self.priors;
        let coefficient_prior = Prior::Normal {
            mean: priors.coefficient_mean,
            precision: priors.coefficient_precision,
        };
        let precision_prior = Prior::Gamma {
            shape: priors.precision_shape,
            rate: priors.precision_rate,
        };
        let near_data = Init::Normal {
            mean: y_mean,
            sd: y_sd,
        };
        let unit = Init::Uniform {
            lower: 0.,
            upper: 1.,
        };

        let mut builder = ModelSpec::builder();
        let mu_b0 = builder.add(
            ParamSpec::scalar("mu_b0")
                .prior(coefficient_prior)
                .init(near_data.clone()),
        );
        let tau_b0 = builder.add(
            ParamSpec::scalar("tau_b0")
                .prior(precision_prior)
                .init(unit.clone()),
        );
        let b0 = builder.add(
            ParamSpec::vector("b0", data.num_subjects())
                .prior(Prior::HierarchicalNormal {
                    mean: mu_b0,
                    precision: tau_b0,
                })
                .init(near_data),
        );
        let tau = builder.add(
            ParamSpec::scalar("tau")
                .prior(precision_prior)
                .init(unit),
        );

        let fixed_effect = |name: &str| {
            ParamSpec::scalar(name)
                .prior(coefficient_prior)
                .metropolis(Proposal::Normal, self.proposal_scale)
                .init(Init::Normal { mean: 0., sd: 0.1 })
        };
        let trend = match self.curve {
            GrowthCurve::LinearQuadratic => TrendIds::LinearQuadratic {
                b_time: builder.add(fixed_effect("b_time")),
                b_time2: builder.add(fixed_effect("b_time2")),
            },
            GrowthCurve::Logistic => {
                let (first, last) = data.time_range().ok_or(SetupError::EmptyDataset)?;
                let delta = builder.add(fixed_effect("delta"));
                let rate = builder.add(
                    ParamSpec::scalar("rate")
                        .prior(Prior::Uniform {
                            lower: 0.,
                            upper: priors.max_rate,
                        })
                        .metropolis(Proposal::Normal, self.proposal_scale)
                        .init(Init::Uniform {
                            lower: 0.,
                            upper: priors.max_rate.min(1.),
                        }),
                );
                let midpoint = builder.add(
                    ParamSpec::scalar("midpoint")
                        .prior(Prior::Uniform {
                            lower: first,
                            upper: last,
                        })
                        .metropolis(Proposal::Normal, self.proposal_scale * (last - first))
                        .init(Init::Uniform {
                            lower: first,
                            upper: last,
                        }),
                );
                TrendIds::Logistic {
                    delta,
                    rate,
                    midpoint,
                }
            }
        };
        let coefficients = self
            .covariates
            .iter()
            .map(|name| builder.add(fixed_effect(&Self::coefficient_name(name))))
            .collect();

        let terms = Arc::new(Terms {
            mu_b0,
            tau_b0,
            b0,
            tau,
            trend,
            coefficients,
            columns,
        });
        builder
            .set_conjugate(
                mu_b0,
                PopulationIntercept {
                    terms: terms.clone(),
                    prior_mean: priors.coefficient_mean,
                    prior_precision: priors.coefficient_precision,
                },
            )
            .set_conjugate(
                tau_b0,
                InterceptPrecision {
                    terms: terms.clone(),
                    shape: priors.precision_shape,
                    rate: priors.precision_rate,
                },
            )
            .set_conjugate(
                b0,
                SubjectIntercepts {
                    terms: terms.clone(),
                },
            )
            .set_conjugate(
                tau,
                ResidualPrecision {
                    terms: terms.clone(),
                    shape: priors.precision_shape,
                    rate: priors.precision_rate,
                },
            )
            .likelihood(GrowthLikelihood { terms })
            .derived("sigma", move |p| 1. / p.scalar(tau).sqrt())
            .derived("sigma_b0", move |p| 1. / p.scalar(tau_b0).sqrt());

        log::debug!(
            "{:?} growth model over {} subjects, {} observations, covariates {:?}",
            self.curve,
            data.num_subjects(),
            data.len(),
            self.covariates
        );
        builder.build()
    }

    /// Evaluate the mean function at posterior means on a grid.
    pub fn predict(
        &self,
        means: &PosteriorMeans,
        grid: &[GridPoint],
    ) -> Result<Vec<f64>, PredictError> {
        let get = |name: &str| {
            means
                .get(name)
                .ok_or_else(|| PredictError::MissingMean(name.to_string()))
        };
        let trend = match self.curve {
            GrowthCurve::LinearQuadratic => TimeTrend::LinearQuadratic {
                b_time: get("b_time")?,
                b_time2: get("b_time2")?,
            },
            GrowthCurve::Logistic => TimeTrend::Logistic {
                delta: get("delta")?,
                rate: get("rate")?,
                midpoint: get("midpoint")?,
            },
        };
        let coefficients = self
            .covariates
            .iter()
            .map(|name| get(&Self::coefficient_name(name)))
            .collect::<Result<Vec<_>, _>>()?;

        grid.iter()
            .enumerate()
            .map(|(i, point)| -> Result<f64, PredictError> {
                if point.covariates.len() != coefficients.len() {
                    return Err(PredictError::CovariateCount {
                        point: i,
                        expected: coefficients.len(),
                        found: point.covariates.len(),
                    });
                }
                let intercept = match point.subject {
                    None => get("mu_b0")?,
                    Some(subject) => get(&format!("b0[{}]", subject + 1))?,
                };
                Ok(mean_response(
                    intercept,
                    &trend,
                    &coefficients,
                    point.time,
                    point.covariates.iter().copied(),
                ))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum TrendIds {
    LinearQuadratic {
        b_time: ParamId,
        b_time2: ParamId,
    },
    Logistic {
        delta: ParamId,
        rate: ParamId,
        midpoint: ParamId,
    },
}

/// Parameter handles shared by the likelihood and the full conditionals.
#[derive(Debug)]
struct Terms {
    mu_b0: ParamId,
    tau_b0: ParamId,
    b0: ParamId,
    tau: ParamId,
    trend: TrendIds,
    coefficients: Vec<ParamId>,
    /// Dataset covariate column of each coefficient.
    columns: Vec<usize>,
}

impl Terms {
    fn trend(&self, params: &ParameterVector) -> TimeTrend {
        match self.trend {
            TrendIds::LinearQuadratic { b_time, b_time2 } => TimeTrend::LinearQuadratic {
                b_time: params.scalar(b_time),
                b_time2: params.scalar(b_time2),
            },
            TrendIds::Logistic {
                delta,
                rate,
                midpoint,
            } => TimeTrend::Logistic {
                delta: params.scalar(delta),
                rate: params.scalar(rate),
                midpoint: params.scalar(midpoint),
            },
        }
    }

    fn coefficients(&self, params: &ParameterVector) -> Vec<f64> {
        self.coefficients
            .iter()
            .map(|&id| params.scalar(id))
            .collect()
    }

    fn mean(&self, intercept: f64, trend: &TimeTrend, coefficients: &[f64], obs: &Observation) -> f64 {
        mean_response(
            intercept,
            trend,
            coefficients,
            obs.time,
            self.columns.iter().map(|&c| obs.covariates[c]),
        )
    }
}

struct GrowthLikelihood {
    terms: Arc<Terms>,
}

impl LogLikelihood for GrowthLikelihood {
    fn log_likelihood(&self, params: &ParameterVector, data: &Dataset) -> f64 {
        let terms = &self.terms;
        let trend = terms.trend(params);
        let coefficients = terms.coefficients(params);
        let b0 = params.get(terms.b0);
        let tau = params.scalar(terms.tau);
        data.observations()
            .iter()
            .map(|obs| {
                let mu = terms.mean(b0[obs.subject], &trend, &coefficients, obs);
                normal_logpdf(obs.response, mu, tau)
            })
            .sum()
    }
}

/// `mu_b0 | b0, tau_b0`
struct PopulationIntercept {
    terms: Arc<Terms>,
    prior_mean: f64,
    prior_precision: f64,
}

impl PopulationIntercept {
    fn posterior(&self, params: &ParameterVector) -> NormalPosterior {
        let b0 = params.get(self.terms.b0);
        NormalPosterior::update(
            self.prior_mean,
            self.prior_precision,
            params.scalar(self.terms.tau_b0),
            b0.len(),
            b0.iter().sum(),
        )
    }
}

impl FullConditional for PopulationIntercept {
    fn sample(
        &self,
        params: &ParameterVector,
        _data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        out[0] = self.posterior(params).sample(rng)?;
        Ok(())
    }
}

/// `tau_b0 | b0, mu_b0`
struct InterceptPrecision {
    terms: Arc<Terms>,
    shape: f64,
    rate: f64,
}

impl InterceptPrecision {
    fn posterior(&self, params: &ParameterVector) -> GammaPosterior {
        let b0 = params.get(self.terms.b0);
        let mu = params.scalar(self.terms.mu_b0);
        let sum_sq = b0.iter().map(|b| (b - mu) * (b - mu)).sum();
        GammaPosterior::update(self.shape, self.rate, b0.len(), sum_sq)
    }
}

impl FullConditional for InterceptPrecision {
    fn sample(
        &self,
        params: &ParameterVector,
        _data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        out[0] = self.posterior(params).sample(rng)?;
        Ok(())
    }
}

/// `b0[i] | everything else`, independently per subject.
struct SubjectIntercepts {
    terms: Arc<Terms>,
}

impl SubjectIntercepts {
    /// One conditional per dense subject index.
    fn posteriors<'a>(
        &'a self,
        params: &'a ParameterVector,
        data: &'a Dataset,
    ) -> impl Iterator<Item = NormalPosterior> + 'a {
        let terms = &self.terms;
        let trend = terms.trend(params);
        let coefficients = terms.coefficients(params);
        let mu = params.scalar(terms.mu_b0);
        let tau_b0 = params.scalar(terms.tau_b0);
        let tau = params.scalar(terms.tau);
        let observations = data.observations();

        (0..data.num_subjects()).map(move |subject| {
            let rows = data.subject_rows(subject);
            let residuals: f64 = rows
                .iter()
                .map(|&row| {
                    let obs = &observations[row];
                    obs.response - terms.mean(0., &trend, &coefficients, obs)
                })
                .sum();
            NormalPosterior::update(mu, tau_b0, tau, rows.len(), residuals)
        })
    }
}

impl FullConditional for SubjectIntercepts {
    fn sample(
        &self,
        params: &ParameterVector,
        data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        for (out, posterior) in out.iter_mut().zip(self.posteriors(params, data)) {
            *out = posterior.sample(rng)?;
        }
        Ok(())
    }
}

/// `tau | everything else`
struct ResidualPrecision {
    terms: Arc<Terms>,
    shape: f64,
    rate: f64,
}

impl ResidualPrecision {
    fn posterior(&self, params: &ParameterVector, data: &Dataset) -> GammaPosterior {
        let terms = &self.terms;
        let trend = terms.trend(params);
        let coefficients = terms.coefficients(params);
        let b0 = params.get(terms.b0);
        let sum_sq = data
            .observations()
            .iter()
            .map(|obs| {
                let r = obs.response - terms.mean(b0[obs.subject], &trend, &coefficients, obs);
                r * r
            })
            .sum();
        GammaPosterior::update(self.shape, self.rate, data.len(), sum_sq)
    }
}

impl FullConditional for ResidualPrecision {
    fn sample(
        &self,
        params: &ParameterVector,
        data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        out[0] = self.posterior(params, data).sample(rng)?;
        Ok(())
    }
}
