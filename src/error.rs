use thiserror::Error;

/// A malformed model specification or sampler configuration.
///
/// These are always reported before any chain starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SetupError {
    #[error("parameter `{0}` has no prior")]
    MissingPrior(String),
    #[error("parameter `{0}` has no update rule")]
    MissingUpdateRule(String),
    #[error("parameter `{0}` has no initial-value generator")]
    MissingInit(String),
    #[error("proposal scale for `{param}` must be positive and finite, got {scale}")]
    InvalidProposalScale { param: String, scale: f64 },
    #[error("parameter `{0}` is declared more than once")]
    DuplicateParameter(String),
    #[error("parameter `{0}` has zero length")]
    EmptyParameter(String),
    #[error("parameter `{param}` refers to an undeclared parameter (id {reference})")]
    UnknownParameter { param: String, reference: usize },
    #[error("model has no likelihood")]
    MissingLikelihood,
    #[error("invalid prior for `{param}`: {reason}")]
    InvalidPrior { param: String, reason: String },
    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),
    #[error("dataset has no covariate named `{0}`")]
    UnknownCovariate(String),
    #[error("dataset contains no observations")]
    EmptyDataset,
    #[error("no parameter with id {0} is declared")]
    UnknownParameterId(usize),
    #[error("row has {found} covariates, the dataset has {expected} columns")]
    CovariateCount { expected: usize, found: usize },
}

/// Errors that abort a sampling run.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("chain {chain}: no initial value for `{param}` inside its support after {tries} tries")]
    InitialSupport {
        chain: u64,
        param: String,
        tries: usize,
    },
    #[error("chain {chain}: log density at the initial values is not finite ({value})")]
    InitialLikelihood { chain: u64, value: f64 },
    #[error("chain {chain} was cancelled")]
    Cancelled { chain: u64 },
    #[error("could not start worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A closed-form full conditional could not be formed from the current state,
/// for example because a precision became non-finite.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("degenerate full conditional: {0}")]
pub struct DegenerateConditional(pub String);

/// A prediction could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("no posterior mean for `{0}`")]
    MissingMean(String),
    #[error("grid point {point} has {found} covariates, the model uses {expected}")]
    CovariateCount {
        point: usize,
        expected: usize,
        found: usize,
    },
}
