//! Read-only observation table shared by all chains.

use std::collections::HashMap;

use crate::SetupError;

/// One row of the longitudinal dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Dense subject index in `0..num_subjects`.
    pub subject: usize,
    pub time: f64,
    /// Covariate values, ordered like `Dataset::covariate_names`.
    pub covariates: Vec<f64>,
    pub response: f64,
}

/// Observations grouped by subject.
///
/// External subject ids are remapped to a dense index in order of first
/// appearance, so per-subject parameters can be stored as plain slices.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    covariate_names: Vec<String>,
    observations: Vec<Observation>,
    subject_ids: Vec<i64>,
    subject_index: HashMap<i64, usize>,
    subject_rows: Vec<Vec<usize>>,
}

impl Dataset {
    pub fn new<S: AsRef<str>>(covariate_names: &[S]) -> Self {
        Self {
            covariate_names: covariate_names
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            ..Default::default()
        }
    }

    /// Append a row and return the dense index of its subject.
    ///
    /// Rows whose covariate count differs from the dataset's columns are
    /// rejected and leave the dataset unchanged.
    pub fn push(
        &mut self,
        subject_id: i64,
        time: f64,
        covariates: &[f64],
        response: f64,
    ) -> Result<usize, SetupError> {
        if covariates.len() != self.covariate_names.len() {
            return Err(SetupError::CovariateCount {
                expected: self.covariate_names.len(),
                found: covariates.len(),
            });
        }
        let next = self.subject_ids.len();
        let subject = *self.subject_index.entry(subject_id).or_insert(next);
        if subject == next {
            self.subject_ids.push(subject_id);
            self.subject_rows.push(Vec::new());
        }
        self.subject_rows[subject].push(self.observations.len());
        self.observations.push(Observation {
            subject,
            time,
            covariates: covariates.to_vec(),
            response,
        });
        Ok(subject)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn num_subjects(&self) -> usize {
        self.subject_ids.len()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Row indices belonging to one dense subject index.
    pub fn subject_rows(&self, subject: usize) -> &[usize] {
        &self.subject_rows[subject]
    }

    /// The external id of a dense subject index.
    pub fn subject_id(&self, subject: usize) -> i64 {
        self.subject_ids[subject]
    }

    pub fn subject_index(&self, subject_id: i64) -> Option<usize> {
        self.subject_index.get(&subject_id).copied()
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn covariate_index(&self, name: &str) -> Result<usize, SetupError> {
        self.covariate_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SetupError::UnknownCovariate(name.to_string()))
    }

    /// Smallest and largest observation time.
    pub fn time_range(&self) -> Option<(f64, f64)> {
        self.observations.iter().fold(None, |acc, obs| match acc {
            None => Some((obs.time, obs.time)),
            Some((lo, hi)) => Some((lo.min(obs.time), hi.max(obs.time))),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn subjects_are_remapped_densely() {
        let mut data = Dataset::new(&["dose"]);
        assert_eq!(data.push(1017, 0., &[15.], 1.2), Ok(0));
        assert_eq!(data.push(4, 0., &[30.], 0.8), Ok(1));
        assert_eq!(data.push(1017, 3., &[15.], 1.5), Ok(0));

        assert_eq!(data.num_subjects(), 2);
        assert_eq!(data.subject_rows(0), &[0, 2]);
        assert_eq!(data.subject_id(1), 4);
        assert_eq!(data.subject_index(1017), Some(0));
        assert_eq!(data.time_range(), Some((0., 3.)));
        assert_eq!(data.covariate_index("dose"), Ok(0));
        assert_eq!(
            data.covariate_index("bmi"),
            Err(SetupError::UnknownCovariate("bmi".into()))
        );
    }

    #[test]
    fn rows_with_wrong_covariate_count_are_rejected() {
        let mut data = Dataset::new(&["dose", "bmi"]);
        assert_eq!(
            data.push(3, 0., &[15.], 1.2),
            Err(SetupError::CovariateCount {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            data.push(3, 0., &[15., 24., 1.], 1.2),
            Err(SetupError::CovariateCount {
                expected: 2,
                found: 3
            })
        );
        assert!(data.is_empty());
        assert_eq!(data.num_subjects(), 0);
        assert_eq!(data.push(3, 0., &[15., 24.], 1.2), Ok(0));
    }
}
