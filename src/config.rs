//! Configuration options for the DUCT search
//!
//! This module defines the parameters that control the precision of the
//! search, the pluggable policies and the orchestrator.

use std::{str::FromStr, time::Duration};

use crate::{
    policy::{BoundKind, SamplingMethod, TerminationKind},
    DuctError, Result,
};

/// Default penalty magnitude for infeasible assignments
pub const DEFAULT_PENALTY: f64 = 1000.0;

/// How agents are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// One OS thread per agent, each draining its own channel
    Threaded,

    /// A single deterministic discrete-event loop
    ///
    /// Messages are delivered in timestamp order using per-agent logical
    /// clocks, so a fixed seed reproduces a run exactly.
    #[default]
    Simulated,
}

impl FromStr for Backend {
    type Err = DuctError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" | "threads" => Ok(Backend::Threaded),
            "simulated" | "simulation" => Ok(Backend::Simulated),
            other => Err(DuctError::InvalidConfiguration(format!(
                "unknown backend: {}",
                other
            ))),
        }
    }
}

/// Configuration for the DUCT search
///
/// Use the builder methods to create a customized configuration.
///
/// # Example
///
/// ```
/// use duct_dcop::{DuctConfig, config::Backend, policy::TerminationKind};
/// use std::time::Duration;
///
/// let config = DuctConfig::default()
///     .with_error(0.05)
///     .with_delta(0.05)
///     .with_termination(TerminationKind::Regret)
///     .with_timeout(Duration::from_secs(5))
///     .with_backend(Backend::Threaded);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DuctConfig {
    /// Precision requested from the termination condition
    pub error: f64,

    /// Confidence parameter: bounds hold with probability `1 - delta`
    pub delta: f64,

    /// Cost substituted for infeasible assignments
    ///
    /// `None` uses `DEFAULT_PENALTY` when minimizing and its negation when
    /// maximizing.
    pub penalty: Option<f64>,

    /// Keep infeasible entries infeasible instead of replacing them by the penalty
    ///
    /// Infeasible values are then dropped from sampling for good.
    pub ignore_infeasible: bool,

    /// Prune a value for good once its subtree reports no feasible assignment
    ///
    /// Without pruning the report counts as the penalty and the value stays
    /// in play.
    pub pruning: bool,

    pub sampling_method: SamplingMethod,
    pub termination: TerminationKind,
    pub bound: BoundKind,

    /// Run seed; `None` draws one at random
    pub seed: Option<u64>,

    /// Wall-clock limit for the run
    pub timeout: Option<Duration>,

    /// Limit on the number of delivered messages
    pub max_messages: Option<u64>,

    pub backend: Backend,
}

impl Default for DuctConfig {
    fn default() -> Self {
        DuctConfig {
            error: 0.1,
            delta: 0.1,
            penalty: None,
            ignore_infeasible: false,
            pruning: false,
            sampling_method: SamplingMethod::Mean,
            termination: TerminationKind::Mean,
            bound: BoundKind::Log,
            seed: None,
            timeout: None,
            max_messages: None,
            backend: Backend::Simulated,
        }
    }
}

impl DuctConfig {
    /// Sets the requested precision
    pub fn with_error(mut self, error: f64) -> Self {
        self.error = error;
        self
    }

    /// Sets the confidence parameter
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    /// Sets the penalty for infeasible assignments
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = Some(penalty);
        self
    }

    /// Sets whether infeasible entries are kept infeasible
    pub fn with_ignore_infeasible(mut self, ignore: bool) -> Self {
        self.ignore_infeasible = ignore;
        self
    }

    /// Sets whether infeasible subtrees prune the sampled value
    pub fn with_pruning(mut self, pruning: bool) -> Self {
        self.pruning = pruning;
        self
    }

    /// Sets the sampling method
    pub fn with_sampling_method(mut self, method: SamplingMethod) -> Self {
        self.sampling_method = method;
        self
    }

    /// Sets the termination condition
    pub fn with_termination(mut self, termination: TerminationKind) -> Self {
        self.termination = termination;
        self
    }

    /// Sets the bound formula
    pub fn with_bound(mut self, bound: BoundKind) -> Self {
        self.bound = bound;
        self
    }

    /// Sets the run seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the wall-clock limit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the limit on delivered messages
    pub fn with_max_messages(mut self, max: u64) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Sets the execution backend
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Penalty in the optimization direction of the problem
    pub fn penalty_for(&self, maximize: bool) -> f64 {
        self.penalty.unwrap_or(if maximize {
            -DEFAULT_PENALTY
        } else {
            DEFAULT_PENALTY
        })
    }

    /// Checks that the parameters are usable
    pub fn validate(&self) -> Result<()> {
        if !(self.error > 0.0 && self.error.is_finite()) {
            return Err(DuctError::InvalidConfiguration(format!(
                "error must be positive, got {}",
                self.error
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(DuctError::InvalidConfiguration(format!(
                "delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if let Some(penalty) = self.penalty {
            if !penalty.is_finite() {
                return Err(DuctError::InvalidConfiguration(
                    "penalty must be finite".to_string(),
                ));
            }
        }
        if self.max_messages == Some(0) {
            return Err(DuctError::InvalidConfiguration(
                "maxMessages must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a configuration from string key/value options
    ///
    /// Recognized keys: `error`, `delta`, `penalty`, `ignoreInfeasible`,
    /// `pruning`, `samplingMethod`, `terminationCondition`, `boundFormula`, `seed`,
    /// `timeout` (milliseconds), `maxMessages` and `backend`. Unknown keys
    /// and malformed values are rejected.
    pub fn from_params<'a, I>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = DuctConfig::default();
        for (key, value) in params {
            match key {
                "error" => config.error = parse(key, value)?,
                "delta" => config.delta = parse(key, value)?,
                "penalty" => config.penalty = Some(parse(key, value)?),
                "ignoreInfeasible" => config.ignore_infeasible = parse(key, value)?,
                "pruning" => config.pruning = parse(key, value)?,
                "samplingMethod" => config.sampling_method = value.parse()?,
                "terminationCondition" => config.termination = value.parse()?,
                "boundFormula" => config.bound = value.parse()?,
                "seed" => config.seed = Some(parse(key, value)?),
                "timeout" => config.timeout = Some(Duration::from_millis(parse(key, value)?)),
                "maxMessages" => config.max_messages = Some(parse(key, value)?),
                "backend" => config.backend = value.parse()?,
                other => {
                    return Err(DuctError::InvalidConfiguration(format!(
                        "unknown option: {}",
                        other
                    )))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        DuctError::InvalidConfiguration(format!("invalid value for {}: {}", key, value))
    })
}
