//! A single Metropolis-within-Gibbs chain.
//!
//! Each sweep visits all parameter blocks in declaration order. Conjugate
//! blocks are replaced by a draw from their full conditional, Metropolis blocks
//! propose a random-walk candidate and accept it with probability
//! `min(1, exp(log p(candidate) - log p(current)))`, where `log p` is the joint
//! log prior plus the log-likelihood.

use std::time::{Duration, Instant};

use itertools::Itertools;
use rand::distr::Open01;
use rand_chacha::ChaCha8Rng;
use rand_distr::Distribution;

use crate::{
    adapt::{DualAverage, DualAverageOptions, RunningMean},
    data::Dataset,
    error::SamplerError,
    model::{ModelSpec, Proposal, UpdateRule},
    params::ParameterVector,
    sampler::{CancelToken, SamplerConfig},
    trace::ChainOutput,
};

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Uninitialized,
    BurningIn,
    Sampling,
    Terminated,
}

/// Snapshot of all parameter values and derived quantities after one
/// retained sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub chain: u64,
    /// Sweep index, counted from 1 and including burn-in sweeps.
    pub iteration: u64,
    pub values: Box<[f64]>,
}

/// Update counters of one parameter block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockStats {
    pub name: String,
    pub proposed: u64,
    pub accepted: u64,
    /// Steps that hit a non-finite log density or a degenerate full conditional.
    pub non_finite: u64,
    /// Candidates outside the parameter support.
    pub out_of_support: u64,
    /// Proposal scale used after burn-in, for Metropolis blocks.
    pub scale: Option<f64>,
    /// Mean acceptance probability during burn-in, for Metropolis blocks.
    pub burnin_accept: Option<f64>,
}

impl BlockStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            return f64::NAN;
        }
        self.accepted as f64 / self.proposed as f64
    }

    pub fn rejection_rate(&self) -> f64 {
        1. - self.acceptance_rate()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainStats {
    pub chain: u64,
    pub blocks: Vec<BlockStats>,
    /// Initial-value draws needed per block until one was inside the support.
    pub init_attempts: Vec<usize>,
    pub iterations: u64,
    pub runtime: Duration,
}

impl ChainStats {
    /// Total count of numeric degeneracies over all blocks.
    pub fn degeneracies(&self) -> u64 {
        self.blocks.iter().map(|b| b.non_finite).sum()
    }

    pub fn support_violations(&self) -> u64 {
        self.blocks.iter().map(|b| b.out_of_support).sum()
    }

    pub fn block(&self, name: &str) -> Option<&BlockStats> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// `name=rate` for every Metropolis block, in sweep order.
    pub fn acceptance_summary(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.scale.is_some())
            .map(|b| format!("{}={:.2}", b.name, b.acceptance_rate()))
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Accepted,
    Rejected,
    NonFinite,
    OutOfSupport,
}

pub struct GibbsChain<'model> {
    spec: &'model ModelSpec,
    data: &'model Dataset,
    config: SamplerConfig,
    chain: u64,
    rng: ChaCha8Rng,
    params: ParameterVector,
    phase: ChainPhase,
    iteration: u64,
    scales: Vec<f64>,
    adapters: Vec<Option<(DualAverage, RunningMean)>>,
    stats: ChainStats,
    current: Vec<f64>,
    candidate: Vec<f64>,
}

impl<'model> GibbsChain<'model> {
    pub fn new(
        spec: &'model ModelSpec,
        data: &'model Dataset,
        config: SamplerConfig,
        chain: u64,
        rng: ChaCha8Rng,
    ) -> Self {
        let layout = spec.layout();
        let scales = spec
            .blocks()
            .iter()
            .map(|block| match block.update {
                UpdateRule::Metropolis { scale, .. } => scale,
                UpdateRule::Conjugate(_) => f64::NAN,
            })
            .collect();
        let adapters = spec
            .blocks()
            .iter()
            .map(|block| match block.update {
                UpdateRule::Metropolis { proposal, scale }
                    if config.tune_proposals && proposal != Proposal::Degenerate =>
                {
                    Some((
                        DualAverage::new(DualAverageOptions::default(), scale, config.target_accept),
                        RunningMean::default(),
                    ))
                }
                _ => None,
            })
            .collect();
        let blocks = spec
            .blocks()
            .iter()
            .map(|block| BlockStats {
                name: layout.name(block.id).to_string(),
                ..Default::default()
            })
            .collect();

        Self {
            spec,
            data,
            config,
            chain,
            rng,
            params: ParameterVector::zeros(layout.clone()),
            phase: ChainPhase::Uninitialized,
            iteration: 0,
            scales,
            adapters,
            stats: ChainStats {
                chain,
                blocks,
                ..Default::default()
            },
            current: Vec::new(),
            candidate: Vec::new(),
        }
    }

    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    pub fn chain_id(&self) -> u64 {
        self.chain
    }

    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    pub fn stats(&self) -> &ChainStats {
        &self.stats
    }

    /// Completed sweeps, burn-in included.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Draw initial values for every block and check the starting density.
    ///
    /// Values outside the support are redrawn up to `max_init_tries` times.
    /// A non-finite log density at the starting point is fatal.
    pub fn initialize(&mut self) -> Result<(), SamplerError> {
        let spec = self.spec;
        let mut attempts = Vec::with_capacity(spec.blocks().len());
        for block in spec.blocks() {
            let len = spec.layout().len(block.id);
            self.candidate.resize(len, 0.);
            let mut tries = 0;
            loop {
                tries += 1;
                block.init.generate(&mut self.rng, &mut self.candidate);
                if block.support.contains_all(&self.candidate) {
                    break;
                }
                if tries >= self.config.max_init_tries {
                    return Err(SamplerError::InitialSupport {
                        chain: self.chain,
                        param: spec.layout().name(block.id).to_string(),
                        tries,
                    });
                }
            }
            self.params.get_mut(block.id).copy_from_slice(&self.candidate);
            attempts.push(tries);
        }
        self.stats.init_attempts = attempts;

        let value = self.log_density();
        if !value.is_finite() {
            return Err(SamplerError::InitialLikelihood {
                chain: self.chain,
                value,
            });
        }

        self.phase = if self.config.n_burnin > 0 {
            ChainPhase::BurningIn
        } else {
            self.finish_burnin();
            ChainPhase::Sampling
        };
        log::debug!(
            "chain {}: initialized with log density {:.3}, phase {:?}",
            self.chain,
            value,
            self.phase
        );
        Ok(())
    }

    /// Run one sweep over all blocks.
    ///
    /// Returns the draw if this sweep is retained. An uninitialized chain is
    /// initialized first; a terminated chain does nothing.
    pub fn step(&mut self) -> Result<Option<Draw>, SamplerError> {
        match self.phase {
            ChainPhase::Uninitialized => self.initialize()?,
            ChainPhase::Terminated => return Ok(None),
            _ => {}
        }

        self.sweep();
        self.iteration += 1;

        let n_burnin = self.config.n_burnin;
        if self.phase == ChainPhase::BurningIn {
            if self.iteration == n_burnin {
                self.finish_burnin();
                self.phase = ChainPhase::Sampling;
                log::debug!("chain {}: burn-in finished", self.chain);
            }
            return Ok(None);
        }

        let sampling_index = self.iteration - n_burnin;
        let draw = if sampling_index % self.config.thin == 0 {
            Some(self.snapshot())
        } else {
            None
        };
        if sampling_index == self.config.n_iter {
            self.phase = ChainPhase::Terminated;
        }
        Ok(draw)
    }

    /// Drive the chain to termination and hand out its retained draws.
    pub fn run(mut self, cancel: Option<&CancelToken>) -> Result<ChainOutput, SamplerError> {
        let start = Instant::now();
        if self.phase == ChainPhase::Uninitialized {
            self.initialize()?;
        }
        let mut draws = Vec::with_capacity(self.config.draws_per_chain() as usize);
        while self.phase != ChainPhase::Terminated {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(SamplerError::Cancelled { chain: self.chain });
            }
            if let Some(draw) = self.step()? {
                draws.push(draw);
            }
        }
        self.stats.iterations = self.iteration;
        self.stats.runtime = start.elapsed();

        for block in self.stats.blocks.iter() {
            if block.non_finite > 0 {
                log::warn!(
                    "chain {}: block `{}` hit {} non-finite updates",
                    self.chain,
                    block.name,
                    block.non_finite
                );
            }
        }
        log::info!(
            "chain {}: {} draws retained from {} sweeps in {:?}, acceptance {}",
            self.chain,
            draws.len(),
            self.iteration,
            self.stats.runtime,
            self.stats.acceptance_summary()
        );

        Ok(ChainOutput {
            chain_id: self.chain,
            draws,
            stats: self.stats,
        })
    }

    fn log_density(&self) -> f64 {
        let prior = self.spec.log_prior(&self.params);
        if !prior.is_finite() {
            return prior;
        }
        prior + self.spec.log_likelihood(&self.params, self.data)
    }

    fn sweep(&mut self) {
        let spec = self.spec;
        for (index, block) in spec.blocks().iter().enumerate() {
            match &block.update {
                UpdateRule::Conjugate(full_conditional) => {
                    let len = spec.layout().len(block.id);
                    self.candidate.resize(len, 0.);
                    let stats = &mut self.stats.blocks[index];
                    stats.proposed += 1;
                    match full_conditional.sample(
                        &self.params,
                        self.data,
                        &mut self.rng,
                        &mut self.candidate,
                    ) {
                        Ok(()) if block.support.contains_all(&self.candidate) => {
                            self.params.get_mut(block.id).copy_from_slice(&self.candidate);
                            stats.accepted += 1;
                        }
                        Ok(()) => stats.out_of_support += 1,
                        Err(err) => {
                            log::trace!("chain {}: {}", self.chain, err);
                            stats.non_finite += 1;
                        }
                    }
                }
                UpdateRule::Metropolis { proposal, .. } => {
                    self.metropolis_step(index, *proposal);
                }
            }
        }
    }

    fn metropolis_step(&mut self, index: usize, proposal: Proposal) -> StepOutcome {
        let spec = self.spec;
        let block = &spec.blocks()[index];
        let scale = self.scales[index];

        let log_current = self.log_density();
        self.current.clear();
        self.current.extend_from_slice(self.params.get(block.id));
        self.candidate.resize(self.current.len(), 0.);
        proposal.propose(&mut self.rng, scale, &self.current, &mut self.candidate);

        let (outcome, accept_prob) = if !block.support.contains_all(&self.candidate) {
            (StepOutcome::OutOfSupport, 0.)
        } else {
            self.params.get_mut(block.id).copy_from_slice(&self.candidate);
            let log_candidate = self.log_density();
            if !(log_current.is_finite() && log_candidate.is_finite()) {
                (StepOutcome::NonFinite, 0.)
            } else {
                let accept_prob = (log_candidate - log_current).min(0.).exp();
                let u: f64 = Open01.sample(&mut self.rng);
                if u < accept_prob {
                    (StepOutcome::Accepted, accept_prob)
                } else {
                    (StepOutcome::Rejected, accept_prob)
                }
            }
        };

        if outcome != StepOutcome::Accepted {
            self.params.get_mut(block.id).copy_from_slice(&self.current);
        }

        let stats = &mut self.stats.blocks[index];
        stats.proposed += 1;
        match outcome {
            StepOutcome::Accepted => stats.accepted += 1,
            StepOutcome::Rejected => {}
            StepOutcome::NonFinite => stats.non_finite += 1,
            StepOutcome::OutOfSupport => stats.out_of_support += 1,
        }

        if self.phase == ChainPhase::BurningIn {
            if let Some((adapt, mean_accept)) = self.adapters[index].as_mut() {
                adapt.advance(accept_prob);
                mean_accept.add(accept_prob);
                self.scales[index] = adapt.current_scale();
            }
        }
        outcome
    }

    /// Freeze adapted proposal scales and record them.
    fn finish_burnin(&mut self) {
        for (index, adapter) in self.adapters.iter().enumerate() {
            if let Some((adapt, mean_accept)) = adapter {
                self.scales[index] = adapt.current_scale_adapted();
                self.stats.blocks[index].burnin_accept = Some(mean_accept.current());
            }
        }
        for (stats, &scale) in self.stats.blocks.iter_mut().zip(self.scales.iter()) {
            if scale.is_finite() {
                stats.scale = Some(scale);
            }
        }
    }

    fn snapshot(&self) -> Draw {
        let mut values = Vec::with_capacity(self.params.as_slice().len() + self.spec.num_derived());
        values.extend_from_slice(self.params.as_slice());
        self.spec.write_derived(&self.params, &mut values);
        Draw {
            chain: self.chain,
            iteration: self.iteration,
            values: values.into(),
        }
    }
}
