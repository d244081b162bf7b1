//! Declarative description of a Bayesian model.
//!
//! A [`ModelSpec`] lists the model parameters in sweep order. Every parameter
//! carries a prior, an update rule (closed-form full conditional or random-walk
//! Metropolis) and a generator for its initial value. The likelihood is a single
//! function of the full parameter vector and the data.

use std::{fmt::Debug, sync::Arc};

use rand::{distr::StandardUniform, RngCore};
use rand_distr::{Distribution, StandardNormal};

use crate::{
    data::Dataset,
    error::{DegenerateConditional, SetupError},
    math::{gamma_logpdf, normal_logpdf, uniform_logpdf},
    params::{ParamId, ParameterLayout, ParameterVector, Support},
};

/// Log-likelihood of the data given all parameters.
///
/// Implemented for every `Fn(&ParameterVector, &Dataset) -> f64`.
pub trait LogLikelihood: Send + Sync {
    fn log_likelihood(&self, params: &ParameterVector, data: &Dataset) -> f64;
}

impl<F> LogLikelihood for F
where
    F: Fn(&ParameterVector, &Dataset) -> f64 + Send + Sync,
{
    fn log_likelihood(&self, params: &ParameterVector, data: &Dataset) -> f64 {
        self(params, data)
    }
}

/// Draws one parameter block from its closed-form full conditional.
///
/// `out` has the length of the block and must be completely overwritten on
/// success. On error the block keeps its current value.
pub trait FullConditional: Send + Sync {
    fn sample(
        &self,
        params: &ParameterVector,
        data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional>;
}

impl<F> FullConditional for F
where
    F: Fn(&ParameterVector, &Dataset, &mut dyn RngCore, &mut [f64]) -> Result<(), DegenerateConditional>
        + Send
        + Sync,
{
    fn sample(
        &self,
        params: &ParameterVector,
        data: &Dataset,
        rng: &mut dyn RngCore,
        out: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        self(params, data, rng, out)
    }
}

/// Prior distribution of a parameter, applied independently to each element.
///
/// Normal priors use precision, as in BUGS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Normal { mean: f64, precision: f64 },
    Gamma { shape: f64, rate: f64 },
    Uniform { lower: f64, upper: f64 },
    Flat,
    /// Normal with mean and precision taken from other (scalar) parameters.
    HierarchicalNormal { mean: ParamId, precision: ParamId },
}

impl Prior {
    pub fn log_density(&self, values: &[f64], params: &ParameterVector) -> f64 {
        match *self {
            Prior::Normal { mean, precision } => values
                .iter()
                .map(|&x| normal_logpdf(x, mean, precision))
                .sum(),
            Prior::Gamma { shape, rate } => {
                values.iter().map(|&x| gamma_logpdf(x, shape, rate)).sum()
            }
            Prior::Uniform { lower, upper } => values
                .iter()
                .map(|&x| uniform_logpdf(x, lower, upper))
                .sum(),
            Prior::Flat => 0.,
            Prior::HierarchicalNormal { mean, precision } => {
                let mean = params.scalar(mean);
                let precision = params.scalar(precision);
                values
                    .iter()
                    .map(|&x| normal_logpdf(x, mean, precision))
                    .sum()
            }
        }
    }

    pub fn default_support(&self) -> Support {
        match *self {
            Prior::Gamma { .. } => Support::Positive,
            Prior::Uniform { lower, upper } => Support::Interval { lower, upper },
            _ => Support::Real,
        }
    }

    fn validate(&self, param: &str, layout: &ParameterLayout) -> Result<(), SetupError> {
        let invalid = |reason: &str| SetupError::InvalidPrior {
            param: param.to_string(),
            reason: reason.to_string(),
        };
        match *self {
            Prior::Normal { mean, precision } => {
                if !mean.is_finite() || !precision.is_finite() || precision <= 0. {
                    return Err(invalid("normal prior needs a finite mean and positive precision"));
                }
            }
            Prior::Gamma { shape, rate } => {
                if !(shape > 0. && rate > 0. && shape.is_finite() && rate.is_finite()) {
                    return Err(invalid("gamma prior needs positive shape and rate"));
                }
            }
            Prior::Uniform { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite() && lower < upper) {
                    return Err(invalid("uniform prior needs finite lower < upper"));
                }
            }
            Prior::Flat => {}
            Prior::HierarchicalNormal { mean, precision } => {
                for id in [mean, precision] {
                    if id.0 >= layout.num_params() {
                        return Err(SetupError::UnknownParameter {
                            param: param.to_string(),
                            reference: id.0,
                        });
                    }
                    if layout.len(id) != 1 {
                        return Err(invalid(
                            "hierarchical mean and precision must be scalar parameters",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Generator for the starting value of a parameter.
#[derive(Clone)]
pub enum Init {
    /// Either one value per element or a single value used for all elements.
    Fixed(Vec<f64>),
    Uniform { lower: f64, upper: f64 },
    Normal { mean: f64, sd: f64 },
    Custom(Arc<dyn Fn(&mut dyn RngCore, &mut [f64]) + Send + Sync>),
}

impl Debug for Init {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Init::Fixed(values) => f.debug_tuple("Fixed").field(values).finish(),
            Init::Uniform { lower, upper } => f
                .debug_struct("Uniform")
                .field("lower", lower)
                .field("upper", upper)
                .finish(),
            Init::Normal { mean, sd } => f
                .debug_struct("Normal")
                .field("mean", mean)
                .field("sd", sd)
                .finish(),
            Init::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Init {
    pub fn generate(&self, rng: &mut dyn RngCore, out: &mut [f64]) {
        match self {
            Init::Fixed(values) if values.len() == 1 => out.fill(values[0]),
            Init::Fixed(values) => out.copy_from_slice(values),
            Init::Uniform { lower, upper } => out.iter_mut().for_each(|x| {
                let u: f64 = StandardUniform.sample(rng);
                *x = lower + (upper - lower) * u;
            }),
            Init::Normal { mean, sd } => out.iter_mut().for_each(|x| {
                let z: f64 = StandardNormal.sample(rng);
                *x = mean + sd * z;
            }),
            Init::Custom(func) => func(rng, out),
        }
    }

    fn validate(&self, param: &str, len: usize) -> Result<(), SetupError> {
        let bad = |reason: String| SetupError::InvalidPrior {
            param: param.to_string(),
            reason,
        };
        match self {
            Init::Fixed(values) if values.len() != 1 && values.len() != len => Err(bad(format!(
                "fixed initial value has {} elements, expected 1 or {}",
                values.len(),
                len
            ))),
            Init::Uniform { lower, upper } if !(lower < upper) => {
                Err(bad("uniform initial range is empty".to_string()))
            }
            Init::Normal { sd, .. } if !(*sd >= 0.) => {
                Err(bad("normal initial sd is negative".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Symmetric random-walk proposal of a Metropolis block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    /// `current + scale * N(0, 1)` per element.
    Normal,
    /// `current + U(-scale, scale)` per element.
    Uniform,
    /// Proposes the current value. Every step is accepted and nothing moves.
    Degenerate,
}

impl Proposal {
    pub fn propose(&self, rng: &mut dyn RngCore, scale: f64, current: &[f64], out: &mut [f64]) {
        match self {
            Proposal::Normal => {
                for (out, &cur) in out.iter_mut().zip(current) {
                    let z: f64 = StandardNormal.sample(rng);
                    *out = cur + scale * z;
                }
            }
            Proposal::Uniform => {
                for (out, &cur) in out.iter_mut().zip(current) {
                    let u: f64 = StandardUniform.sample(rng);
                    *out = cur + scale * (2. * u - 1.);
                }
            }
            Proposal::Degenerate => out.copy_from_slice(current),
        }
    }
}

/// How a parameter block is updated in each sweep.
#[derive(Clone)]
pub enum UpdateRule {
    Conjugate(Arc<dyn FullConditional>),
    Metropolis { proposal: Proposal, scale: f64 },
}

impl Debug for UpdateRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateRule::Conjugate(_) => f.write_str("Conjugate(..)"),
            UpdateRule::Metropolis { proposal, scale } => f
                .debug_struct("Metropolis")
                .field("proposal", proposal)
                .field("scale", scale)
                .finish(),
        }
    }
}

/// Declaration of one parameter, consumed by [`ModelBuilder::add`].
#[derive(Debug, Clone)]
pub struct ParamSpec {
    name: String,
    len: usize,
    scalar: bool,
    prior: Option<Prior>,
    update: Option<UpdateRule>,
    init: Option<Init>,
    support: Option<Support>,
}

impl ParamSpec {
    pub fn scalar(name: &str) -> Self {
        Self::new(name, 1, true)
    }

    pub fn vector(name: &str, len: usize) -> Self {
        Self::new(name, len, false)
    }

    fn new(name: &str, len: usize, scalar: bool) -> Self {
        Self {
            name: name.to_string(),
            len,
            scalar,
            prior: None,
            update: None,
            init: None,
            support: None,
        }
    }

    pub fn prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn conjugate<F: FullConditional + 'static>(mut self, full_conditional: F) -> Self {
        self.update = Some(UpdateRule::Conjugate(Arc::new(full_conditional)));
        self
    }

    pub fn metropolis(mut self, proposal: Proposal, scale: f64) -> Self {
        self.update = Some(UpdateRule::Metropolis { proposal, scale });
        self
    }

    pub fn init(mut self, init: Init) -> Self {
        self.init = Some(init);
        self
    }

    /// Override the support implied by the prior.
    pub fn support(mut self, support: Support) -> Self {
        self.support = Some(support);
        self
    }
}

/// A validated parameter block.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: ParamId,
    pub prior: Prior,
    pub update: UpdateRule,
    pub init: Init,
    pub support: Support,
}

type DerivedFn = Arc<dyn Fn(&ParameterVector) -> f64 + Send + Sync>;

/// Immutable model description shared read-only by all chains.
#[derive(Clone)]
pub struct ModelSpec {
    layout: Arc<ParameterLayout>,
    blocks: Vec<Block>,
    likelihood: Arc<dyn LogLikelihood>,
    derived: Vec<(String, DerivedFn)>,
}

impl Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("layout", &self.layout)
            .field("blocks", &self.blocks)
            .field(
                "derived",
                &self.derived.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ModelSpec {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    pub fn layout(&self) -> &Arc<ParameterLayout> {
        &self.layout
    }

    /// Parameter blocks in sweep order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn log_prior(&self, params: &ParameterVector) -> f64 {
        self.blocks
            .iter()
            .map(|block| block.prior.log_density(params.get(block.id), params))
            .sum()
    }

    pub fn log_likelihood(&self, params: &ParameterVector, data: &Dataset) -> f64 {
        self.likelihood.log_likelihood(params, data)
    }

    /// Output columns: every parameter element followed by derived quantities.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.layout.column_names();
        columns.extend(self.derived.iter().map(|(name, _)| name.clone()));
        columns
    }

    pub fn num_derived(&self) -> usize {
        self.derived.len()
    }

    pub(crate) fn write_derived(&self, params: &ParameterVector, out: &mut Vec<f64>) {
        out.extend(self.derived.iter().map(|(_, func)| func(params)));
    }
}

/// Collects parameter declarations, a likelihood and derived quantities.
#[derive(Default)]
pub struct ModelBuilder {
    layout: Option<ParameterLayout>,
    specs: Vec<ParamSpec>,
    likelihood: Option<Arc<dyn LogLikelihood>>,
    derived: Vec<(String, DerivedFn)>,
    /// Ids passed to `set_conjugate` that this builder never returned.
    unknown_ids: Vec<usize>,
}

impl ModelBuilder {
    /// Declare the next parameter. Declaration order is the sweep order.
    pub fn add(&mut self, spec: ParamSpec) -> ParamId {
        let id = self
            .layout
            .get_or_insert_with(ParameterLayout::new)
            .push(&spec.name, spec.len, spec.scalar);
        self.specs.push(spec);
        id
    }

    /// Attach a full conditional to an already declared parameter.
    ///
    /// Needed when the conditional refers to parameters declared after it.
    /// An id this builder did not return makes [`ModelBuilder::build`] fail.
    pub fn set_conjugate<F: FullConditional + 'static>(
        &mut self,
        id: ParamId,
        full_conditional: F,
    ) -> &mut Self {
        match self.specs.get_mut(id.0) {
            Some(spec) => spec.update = Some(UpdateRule::Conjugate(Arc::new(full_conditional))),
            None => self.unknown_ids.push(id.0),
        }
        self
    }

    pub fn likelihood<L: LogLikelihood + 'static>(&mut self, likelihood: L) -> &mut Self {
        self.likelihood = Some(Arc::new(likelihood));
        self
    }

    /// Add a deterministic quantity that is recorded with every retained draw.
    pub fn derived<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&ParameterVector) -> f64 + Send + Sync + 'static,
    {
        self.derived.push((name.to_string(), Arc::new(func)));
        self
    }

    pub fn build(self) -> Result<ModelSpec, SetupError> {
        if let Some(&id) = self.unknown_ids.first() {
            return Err(SetupError::UnknownParameterId(id));
        }
        let layout = self.layout.unwrap_or_else(ParameterLayout::new);
        let num_params = self.specs.len();
        let mut names = std::collections::HashSet::new();
        let mut blocks = Vec::with_capacity(num_params);

        for (id, spec) in layout.ids().zip(self.specs) {
            if !names.insert(spec.name.clone()) {
                return Err(SetupError::DuplicateParameter(spec.name));
            }
            if spec.len == 0 {
                return Err(SetupError::EmptyParameter(spec.name));
            }
            let prior = spec
                .prior
                .ok_or_else(|| SetupError::MissingPrior(spec.name.clone()))?;
            prior.validate(&spec.name, &layout)?;
            let update = spec
                .update
                .ok_or_else(|| SetupError::MissingUpdateRule(spec.name.clone()))?;
            if let UpdateRule::Metropolis { scale, .. } = &update {
                if !(scale.is_finite() && *scale > 0.) {
                    return Err(SetupError::InvalidProposalScale {
                        param: spec.name,
                        scale: *scale,
                    });
                }
            }
            let init = spec
                .init
                .ok_or_else(|| SetupError::MissingInit(spec.name.clone()))?;
            init.validate(&spec.name, spec.len)?;
            let support = spec.support.unwrap_or_else(|| prior.default_support());
            blocks.push(Block {
                id,
                prior,
                update,
                init,
                support,
            });
        }

        for (name, _) in self.derived.iter() {
            if !names.insert(name.clone()) {
                return Err(SetupError::DuplicateParameter(name.clone()));
            }
        }

        let likelihood = self.likelihood.ok_or(SetupError::MissingLikelihood)?;

        Ok(ModelSpec {
            layout: Arc::new(layout),
            blocks,
            likelihood,
            derived: self.derived,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn normal_param(name: &str) -> ParamSpec {
        ParamSpec::scalar(name)
            .prior(Prior::Normal {
                mean: 0.,
                precision: 1e-2,
            })
            .metropolis(Proposal::Normal, 0.5)
            .init(Init::Fixed(vec![0.]))
    }

    fn zero_likelihood(_: &ParameterVector, _: &Dataset) -> f64 {
        0.
    }

    #[test]
    fn builds_in_declaration_order() {
        let mut builder = ModelSpec::builder();
        let a = builder.add(normal_param("a"));
        let tau = builder.add(
            ParamSpec::scalar("tau")
                .prior(Prior::Gamma {
                    shape: 1.,
                    rate: 1.,
                })
                .metropolis(Proposal::Normal, 0.1)
                .init(Init::Uniform {
                    lower: 0.,
                    upper: 1.,
                }),
        );
        builder
            .likelihood(zero_likelihood)
            .derived("sigma", move |p| 1. / p.scalar(tau).sqrt());
        let spec = builder.build().unwrap();

        assert_eq!(spec.blocks().len(), 2);
        assert_eq!(spec.blocks()[0].id, a);
        assert_eq!(spec.blocks()[1].support, Support::Positive);
        assert_eq!(spec.columns(), vec!["a", "tau", "sigma"]);
    }

    #[test]
    fn missing_prior_is_a_setup_error() {
        let mut builder = ModelSpec::builder();
        builder.add(
            ParamSpec::scalar("beta")
                .metropolis(Proposal::Normal, 1.)
                .init(Init::Fixed(vec![0.])),
        );
        builder.likelihood(zero_likelihood);
        assert_eq!(
            builder.build().unwrap_err(),
            SetupError::MissingPrior("beta".into())
        );
    }

    #[test]
    fn non_positive_scale_is_a_setup_error() {
        for scale in [0., -1., f64::NAN] {
            let mut builder = ModelSpec::builder();
            builder.add(normal_param("beta").metropolis(Proposal::Normal, scale));
            builder.likelihood(zero_likelihood);
            assert!(matches!(
                builder.build(),
                Err(SetupError::InvalidProposalScale { .. })
            ));
        }
    }

    #[test]
    fn other_setup_errors() {
        let mut builder = ModelSpec::builder();
        builder.add(normal_param("a"));
        builder.add(normal_param("a"));
        builder.likelihood(zero_likelihood);
        assert_eq!(
            builder.build().unwrap_err(),
            SetupError::DuplicateParameter("a".into())
        );

        let mut builder = ModelSpec::builder();
        builder.add(normal_param("a"));
        assert_eq!(builder.build().unwrap_err(), SetupError::MissingLikelihood);

        let mut builder = ModelSpec::builder();
        builder.add(
            ParamSpec::vector("b", 3)
                .prior(Prior::HierarchicalNormal {
                    mean: ParamId(7),
                    precision: ParamId(0),
                })
                .metropolis(Proposal::Normal, 1.)
                .init(Init::Fixed(vec![0.])),
        );
        builder.likelihood(zero_likelihood);
        assert!(matches!(
            builder.build(),
            Err(SetupError::UnknownParameter { reference: 7, .. })
        ));

        let mut builder = ModelSpec::builder();
        builder.add(normal_param("a").prior(Prior::Gamma {
            shape: -1.,
            rate: 1.,
        }));
        builder.likelihood(zero_likelihood);
        assert!(matches!(
            builder.build(),
            Err(SetupError::InvalidPrior { .. })
        ));
    }

    fn keep_current(
        _: &ParameterVector,
        _: &Dataset,
        _: &mut dyn RngCore,
        _: &mut [f64],
    ) -> Result<(), DegenerateConditional> {
        Ok(())
    }

    #[test]
    fn hierarchical_prior_needs_scalar_hyperparameters() {
        let mut builder = ModelSpec::builder();
        let v = builder.add(
            ParamSpec::vector("v", 3)
                .prior(Prior::Flat)
                .conjugate(keep_current)
                .init(Init::Fixed(vec![1.])),
        );
        let tau = builder.add(
            ParamSpec::scalar("tau")
                .prior(Prior::Gamma {
                    shape: 1.,
                    rate: 1.,
                })
                .conjugate(keep_current)
                .init(Init::Fixed(vec![1.])),
        );
        builder.add(
            ParamSpec::scalar("x")
                .prior(Prior::HierarchicalNormal {
                    mean: v,
                    precision: tau,
                })
                .metropolis(Proposal::Normal, 1.)
                .init(Init::Fixed(vec![0.])),
        );
        builder.likelihood(zero_likelihood);
        assert_eq!(
            builder.build().unwrap_err(),
            SetupError::InvalidPrior {
                param: "x".into(),
                reason: "hierarchical mean and precision must be scalar parameters".into(),
            }
        );
    }

    #[test]
    fn conjugate_for_undeclared_id_is_a_setup_error() {
        let mut builder = ModelSpec::builder();
        let a = builder.add(normal_param("a"));
        builder
            .set_conjugate(ParamId(4), keep_current)
            .likelihood(zero_likelihood);
        assert_eq!(
            builder.build().unwrap_err(),
            SetupError::UnknownParameterId(4)
        );

        let mut builder = ModelSpec::builder();
        let a2 = builder.add(normal_param("a"));
        assert_eq!(a, a2);
        builder
            .set_conjugate(a2, keep_current)
            .likelihood(zero_likelihood);
        let spec = builder.build().unwrap();
        assert!(matches!(spec.blocks()[0].update, UpdateRule::Conjugate(_)));
    }

    #[test]
    fn proposals() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let current = [1., 2.];
        let mut out = [0.; 2];
        Proposal::Degenerate.propose(&mut rng, 10., &current, &mut out);
        assert_eq!(out, current);
        Proposal::Uniform.propose(&mut rng, 0.5, &current, &mut out);
        assert!(out.iter().zip(&current).all(|(o, c)| (o - c).abs() <= 0.5));
        Proposal::Normal.propose(&mut rng, 1., &current, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn init_generators() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut out = [0.; 3];
        Init::Fixed(vec![2.]).generate(&mut rng, &mut out);
        assert_eq!(out, [2.; 3]);
        Init::Uniform {
            lower: 0.,
            upper: 1.,
        }
        .generate(&mut rng, &mut out);
        assert!(out.iter().all(|&v| (0. ..1.).contains(&v)));
        let custom = Init::Custom(Arc::new(|_: &mut dyn RngCore, out: &mut [f64]| out.fill(-1.)));
        custom.generate(&mut rng, &mut out);
        assert_eq!(out, [-1.; 3]);
    }
}
