//! Posterior draws of all chains and their export as a table.
//!
//! The table has one row per retained draw: `chain`, `iteration`, and one
//! column per parameter element and derived quantity, named exactly as the
//! model declares them.

use std::{fs::File, io::Write, path::Path, sync::Arc};

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, UInt64Array},
    csv::WriterBuilder,
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
};

use crate::chain::{ChainStats, Draw};

/// Retained draws and update statistics of one finished chain.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub chain_id: u64,
    pub draws: Vec<Draw>,
    pub stats: ChainStats,
}

/// Draws of all chains, ordered by chain id and then iteration.
#[derive(Debug, Clone)]
pub struct PosteriorSampleSet {
    columns: Vec<String>,
    chains: Vec<ChainOutput>,
}

impl PosteriorSampleSet {
    pub fn new(columns: Vec<String>, mut chains: Vec<ChainOutput>) -> Self {
        chains.sort_unstable_by_key(|chain| chain.chain_id);
        Self { columns, chains }
    }

    /// Total number of retained draws.
    pub fn len(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Parameter and derived column names, without `chain` and `iteration`.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn chains(&self) -> &[ChainOutput] {
        &self.chains
    }

    pub fn stats(&self) -> impl Iterator<Item = &ChainStats> {
        self.chains.iter().map(|c| &c.stats)
    }

    pub fn draws(&self) -> impl Iterator<Item = &Draw> {
        self.chains.iter().flat_map(|c| c.draws.iter())
    }

    /// All draws of one column, chains concatenated.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.column_index(name)?;
        Some(self.draws().map(|d| d.values[index]).collect())
    }

    /// Draws of one column, split by chain.
    pub fn column_by_chain(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let index = self.column_index(name)?;
        Some(
            self.chains
                .iter()
                .map(|c| c.draws.iter().map(|d| d.values[index]).collect())
                .collect(),
        )
    }

    pub fn chain_column(&self, chain_id: u64, name: &str) -> Option<Vec<f64>> {
        let index = self.column_index(name)?;
        let chain = self.chains.iter().find(|c| c.chain_id == chain_id)?;
        Some(chain.draws.iter().map(|d| d.values[index]).collect())
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let mut fields = vec![
            Field::new("chain", DataType::UInt64, false),
            Field::new("iteration", DataType::UInt64, false),
        ];
        fields.extend(
            self.columns
                .iter()
                .map(|name| Field::new(name, DataType::Float64, false)),
        );

        let chain: UInt64Array = self.draws().map(|d| d.chain).collect::<Vec<_>>().into();
        let iteration: UInt64Array = self.draws().map(|d| d.iteration).collect::<Vec<_>>().into();
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(chain), Arc::new(iteration)];
        for index in 0..self.columns.len() {
            let values: Float64Array = self
                .draws()
                .map(|d| d.values[index])
                .collect::<Vec<_>>()
                .into();
            arrays.push(Arc::new(values));
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
    }

    /// Write the draws as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let batch = self
            .to_record_batch()
            .context("Failed to assemble posterior table")?;
        let mut writer = WriterBuilder::new().with_header(true).build(writer);
        writer
            .write(&batch)
            .context("Failed to write posterior table")?;
        Ok(())
    }

    pub fn write_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}
