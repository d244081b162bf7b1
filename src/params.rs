//! Parameter storage shared by the model description and the chains.
//!
//! All parameters of a model live in one flat arena of `f64`. A [`ParamId`]
//! addresses a contiguous block in that arena, so a vector parameter like a
//! per-subject random intercept is a dense slice indexed by subject.

use std::sync::Arc;

/// Handle of a declared parameter, returned by `ModelBuilder::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Domain a parameter value must lie in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    Real,
    Positive,
    Interval { lower: f64, upper: f64 },
}

impl Support {
    pub fn contains(&self, value: f64) -> bool {
        match *self {
            Support::Real => value.is_finite(),
            Support::Positive => value.is_finite() && value > 0.,
            Support::Interval { lower, upper } => value >= lower && value <= upper,
        }
    }

    pub fn contains_all(&self, values: &[f64]) -> bool {
        values.iter().all(|&v| self.contains(v))
    }
}

/// Names and offsets of all parameters of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    names: Vec<String>,
    offsets: Vec<usize>,
    lens: Vec<usize>,
    scalar: Vec<bool>,
    total: usize,
}

impl ParameterLayout {
    pub(crate) fn new() -> Self {
        Self {
            names: Vec::new(),
            offsets: Vec::new(),
            lens: Vec::new(),
            scalar: Vec::new(),
            total: 0,
        }
    }

    pub(crate) fn push(&mut self, name: &str, len: usize, scalar: bool) -> ParamId {
        let id = ParamId(self.names.len());
        self.names.push(name.to_string());
        self.offsets.push(self.total);
        self.lens.push(len);
        self.scalar.push(scalar);
        self.total += len;
        id
    }

    pub fn num_params(&self) -> usize {
        self.names.len()
    }

    /// Number of scalar values over all parameters.
    pub fn dim(&self) -> usize {
        self.total
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.names[id.0]
    }

    pub fn len(&self, id: ParamId) -> usize {
        self.lens[id.0]
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = ParamId> + '_ {
        (0..self.names.len()).map(ParamId)
    }

    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.names.iter().position(|n| n == name).map(ParamId)
    }

    pub(crate) fn range(&self, id: ParamId) -> std::ops::Range<usize> {
        let start = self.offsets[id.0];
        start..start + self.lens[id.0]
    }

    /// Column names in arena order. Vector elements are `name[i]`, 1-based.
    pub fn column_names(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.total);
        for (i, name) in self.names.iter().enumerate() {
            if self.scalar[i] {
                columns.push(name.clone());
            } else {
                columns.extend((1..=self.lens[i]).map(|j| format!("{}[{}]", name, j)));
            }
        }
        columns
    }
}

/// Current values of all parameters of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    layout: Arc<ParameterLayout>,
    values: Vec<f64>,
}

impl ParameterVector {
    pub(crate) fn zeros(layout: Arc<ParameterLayout>) -> Self {
        let values = vec![0f64; layout.dim()];
        Self { layout, values }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn get(&self, id: ParamId) -> &[f64] {
        &self.values[self.layout.range(id)]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut [f64] {
        let range = self.layout.range(id);
        &mut self.values[range]
    }

    /// The first element of a parameter. Intended for scalar parameters.
    #[inline]
    pub fn scalar(&self, id: ParamId) -> f64 {
        self.values[self.layout.offsets[id.0]]
    }

    pub fn set_scalar(&mut self, id: ParamId, value: f64) {
        let offset = self.layout.offsets[id.0];
        self.values[offset] = value;
    }

    pub fn by_name(&self, name: &str) -> Option<&[f64]> {
        self.layout.find(name).map(|id| self.get(id))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
