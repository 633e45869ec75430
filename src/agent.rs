//! A single-threaded, message-reactive agent
//!
//! An [`Agent`] owns the normalization and sampling engines for the
//! variables of one agent name. It processes one message at a time and
//! returns the messages to send; delivering them is up to the backend.

use std::sync::Arc;

use log::{debug, trace};

use crate::{
    config::DuctConfig,
    message::{Message, Outgoing},
    normalize::{NormStep, Normalizer},
    problem::Problem,
    sampling::Sampler,
    DuctError, Result,
};

/// An agent of the distributed search
#[derive(Debug)]
pub struct Agent {
    name: String,
    problem: Arc<Problem>,
    normalizer: Normalizer,
    sampler: Sampler,
    started: bool,
}

impl Agent {
    /// Creates the agent `name` for `problem`
    ///
    /// `seed` is the run seed; the agent derives its own generator from it.
    pub fn new(name: impl Into<String>, problem: Arc<Problem>, config: &DuctConfig, seed: u64) -> Self {
        let name = name.into();
        let maximize = problem.maximize();
        Agent {
            normalizer: Normalizer::new(
                name.clone(),
                config.penalty_for(maximize),
                config.ignore_infeasible,
            ),
            sampler: Sampler::new(name.clone(), &problem, config, seed),
            name,
            problem,
            started: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once every variable of the agent has terminated
    pub fn is_finished(&self) -> bool {
        self.sampler.is_finished()
    }

    /// Returns the sampling engine, for inspection
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Processes one message to completion
    pub fn handle(&mut self, message: Message) -> Result<Vec<Outgoing>> {
        trace!("{} <- {}", self.name, message.kind());
        match message {
            Message::Start => {
                self.started = true;
                debug!("{} started", self.name);
                Ok(Vec::new())
            }
            _ if !self.started => Err(DuctError::Protocol(format!(
                "{} received {} before START",
                self.name,
                message.kind()
            ))),
            Message::DfsOutput { variable, view } => {
                self.sampler.register(&self.problem, &variable, &view)?;
                let step = self
                    .normalizer
                    .handle(&self.problem, Message::DfsOutput { variable, view })?;
                self.apply(step)
            }
            message @ (Message::Bound { .. } | Message::Norm { .. }) => {
                let step = self.normalizer.handle(&self.problem, message)?;
                self.apply(step)
            }
            message @ (Message::Value { .. } | Message::ValueFinal { .. } | Message::Cost { .. }) => {
                self.sampler.handle(&self.problem, message)
            }
            other => Err(DuctError::UnexpectedMessage {
                agent: self.name.clone(),
                message: other.kind().to_string(),
            }),
        }
    }

    /// Sends the normalization messages first, then starts sampling for
    /// every variable whose normalization completed
    fn apply(&mut self, step: NormStep) -> Result<Vec<Outgoing>> {
        let mut out = step.outgoing;
        for output in step.completed {
            debug!(
                "{}: {} normalized with scaling factor {}",
                self.name, output.variable, output.scaling_factor
            );
            out.extend(self.sampler.on_normalized(&self.problem, output)?);
        }
        Ok(out)
    }
}
