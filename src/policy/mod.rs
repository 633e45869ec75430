//! Pluggable policies for the sampling engine
//!
//! This module contains the three strategies a variable consults while it samples:
//! - Sampling policies: which value to try next and which value currently leads
//! - Termination conditions: when the statistics of a node are good enough
//! - Bound formulas: the optimism bound added to each value's estimate
//!
//! Each concern is a closed set of variants ([`SamplingMethod`],
//! [`TerminationKind`], [`BoundKind`]) parsed from configuration strings and
//! resolved once into a boxed strategy.

use std::{fmt, str::FromStr};

use rand::RngCore;

use crate::{bandit::BanditNode, DuctError};

pub mod bound;
pub mod sampling;
pub mod termination;

pub use bound::{LogBound, LogSizeBound};
pub use sampling::{BestSampling, MeanSampling, RandomSampling};
pub use termination::{BestTermination, MeanTermination, RegretTermination};

/// Trait for policies that decide which value a bandit node samples
pub trait SamplingPolicy: Send + Sync {
    /// Recomputes the leading value and the value to sample next after a sample
    fn process_sample(&self, node: &mut BanditNode);

    /// Returns the value to sample next, or `None` if no value is feasible
    fn select(&self, node: &BanditNode, rng: &mut dyn RngCore) -> Option<usize>;
}

/// Trait for the convergence test of a bandit node
pub trait TerminationCondition: Send + Sync {
    /// Returns true when the leading value is known with the requested precision
    fn converged(&self, node: &BanditNode, error: f64, delta: f64) -> bool;
}

/// Trait for the optimism bound of a single value
pub trait BoundFormula: Send + Sync {
    /// Returns the bound for value `index` of `node`
    fn sample_bound(&self, index: usize, node: &BanditNode) -> f64;
}

/// How the next value is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMethod {
    /// Optimistic mean cost
    #[default]
    Mean,
    /// Optimistic best observed cost
    Best,
    /// Uniformly random feasible value
    Random,
}

impl SamplingMethod {
    pub fn build(&self) -> Box<dyn SamplingPolicy> {
        match self {
            SamplingMethod::Mean => Box::new(MeanSampling::new()),
            SamplingMethod::Best => Box::new(BestSampling::new()),
            SamplingMethod::Random => Box::new(RandomSampling::new()),
        }
    }
}

impl FromStr for SamplingMethod {
    type Err = DuctError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(SamplingMethod::Mean),
            "best" => Ok(SamplingMethod::Best),
            "random" => Ok(SamplingMethod::Random),
            other => Err(DuctError::InvalidConfiguration(format!(
                "unknown sampling method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingMethod::Mean => "mean",
            SamplingMethod::Best => "best",
            SamplingMethod::Random => "random",
        };
        f.write_str(name)
    }
}

/// When a variable stops sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationKind {
    /// Compare optimistic means against the leader's mean
    #[default]
    Mean,
    /// Compare optimistic best costs against the leader's best cost
    Best,
    /// Stop when the best possible improvement over the leader is within the error
    Regret,
}

impl TerminationKind {
    pub fn build(&self) -> Box<dyn TerminationCondition> {
        match self {
            TerminationKind::Mean => Box::new(MeanTermination::new()),
            TerminationKind::Best => Box::new(BestTermination::new()),
            TerminationKind::Regret => Box::new(RegretTermination::new()),
        }
    }
}

impl FromStr for TerminationKind {
    type Err = DuctError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(TerminationKind::Mean),
            "best" => Ok(TerminationKind::Best),
            "regret" => Ok(TerminationKind::Regret),
            other => Err(DuctError::InvalidConfiguration(format!(
                "unknown termination condition: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationKind::Mean => "mean",
            TerminationKind::Best => "best",
            TerminationKind::Regret => "regret",
        };
        f.write_str(name)
    }
}

/// Which optimism bound is used while sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundKind {
    /// `sqrt(ln(2N) / n_i)`
    #[default]
    Log,
    /// `sqrt((size + 1) ln(2N) / n_i)`
    LogSize,
}

impl BoundKind {
    /// Builds the formula for a variable whose subtree has size measure `size`
    pub fn build(&self, size: u64) -> Box<dyn BoundFormula> {
        match self {
            BoundKind::Log => Box::new(LogBound::new()),
            BoundKind::LogSize => Box::new(LogSizeBound::new(size)),
        }
    }
}

impl FromStr for BoundKind {
    type Err = DuctError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(BoundKind::Log),
            "log-size" | "logsize" | "log_size" => Ok(BoundKind::LogSize),
            other => Err(DuctError::InvalidConfiguration(format!(
                "unknown bound formula: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoundKind::Log => "log",
            BoundKind::LogSize => "log-size",
        };
        f.write_str(name)
    }
}
