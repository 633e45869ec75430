//! Normalization of the local cost spaces
//!
//! Before sampling starts, every cost space is rescaled so that the optimum
//! of each connected component lies in `[0, 1]`. Bounds travel bottom-up in
//! `BOUND` messages; once the root knows the range of its whole component it
//! sends the divisor back down in `NORM` messages.
//!
//! Each variable waits for `children + 1` events (one `BOUND` per child and
//! its own `DFS_OUTPUT`) before reporting to its parent. The events may
//! arrive in any order.

use std::collections::BTreeSet;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::{
    message::{Message, Outgoing},
    problem::{CostSpace, Problem},
    pseudo_tree::DfsView,
    DuctError, Result,
};

/// Result of normalization for one variable
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationOutput {
    pub variable: String,

    /// Divisor applied to the variable's spaces
    pub scaling_factor: f64,

    /// The rescaled spaces the variable enforces
    pub spaces: Vec<CostSpace>,

    /// Separator of the variable, in name order
    pub separator: Vec<String>,

    /// Size measure of the subtree rooted at the variable
    ///
    /// The largest domain size in the subtree, plus one per level of
    /// descendants below the variable. A leaf reports its domain size.
    pub size: u64,
}

/// Messages to send and variables whose normalization finished
#[derive(Debug, Default)]
pub struct NormStep {
    pub outgoing: Vec<Outgoing>,
    pub completed: Vec<NormalizationOutput>,
}

impl NormStep {
    fn extend(&mut self, other: NormStep) {
        self.outgoing.extend(other.outgoing);
        self.completed.extend(other.completed);
    }
}

#[derive(Debug)]
struct NormState {
    view: Option<DfsView>,
    received: usize,
    lower: f64,
    upper: f64,
    space_count: usize,
    size: u64,
    separator: BTreeSet<String>,
    spaces: Vec<CostSpace>,
    /// Shift applied to each space; its blind-projected minimum
    shifts: Vec<f64>,
    reported: bool,
    done: bool,
}

impl Default for NormState {
    fn default() -> Self {
        NormState {
            view: None,
            received: 0,
            lower: 0.0,
            upper: 0.0,
            space_count: 0,
            size: 0,
            separator: BTreeSet::new(),
            spaces: Vec::new(),
            shifts: Vec::new(),
            reported: false,
            done: false,
        }
    }
}

/// Normalization engine of one agent
#[derive(Debug)]
pub struct Normalizer {
    agent: String,
    penalty: f64,
    ignore_infeasible: bool,
    states: FxHashMap<String, NormState>,
}

impl Normalizer {
    /// Creates the engine for `agent`
    ///
    /// `penalty` replaces infeasible utilities unless `ignore_infeasible` is set.
    pub fn new(agent: impl Into<String>, penalty: f64, ignore_infeasible: bool) -> Self {
        Normalizer {
            agent: agent.into(),
            penalty,
            ignore_infeasible,
            states: FxHashMap::default(),
        }
    }

    /// Handles a `DFS_OUTPUT`, `BOUND` or `NORM` message
    pub fn handle(&mut self, problem: &Problem, message: Message) -> Result<NormStep> {
        match message {
            Message::DfsOutput { variable, view } => self.on_dfs_output(problem, variable, view),
            Message::Bound {
                receiver,
                lower,
                upper,
                space_count,
                size,
                separator,
            } => {
                self.check_owned(problem, &receiver)?;
                let state = self.states.entry(receiver.clone()).or_default();
                trace!(
                    "{}: BOUND for {} [{}, {}] size {}",
                    self.agent,
                    receiver,
                    lower,
                    upper,
                    size
                );
                state.received += 1;
                state.lower += lower;
                state.upper += upper;
                state.space_count += space_count;
                state.size = state.size.max(size);
                state.separator.extend(separator);
                self.try_report(problem, &receiver)
            }
            Message::Norm { receiver, divide } => {
                self.check_owned(problem, &receiver)?;
                self.normalize(problem, &receiver, divide)
            }
            other => Err(DuctError::UnexpectedMessage {
                agent: self.agent.clone(),
                message: other.kind().to_string(),
            }),
        }
    }

    /// Returns true once every owned variable has been normalized
    pub fn is_done(&self, problem: &Problem) -> bool {
        problem
            .variables_of(&self.agent)
            .iter()
            .all(|v| self.states.get(v).map_or(false, |s| s.done))
    }

    fn check_owned(&self, problem: &Problem, variable: &str) -> Result<()> {
        if problem.owner(variable)? != self.agent {
            return Err(DuctError::Protocol(format!(
                "{} received a message for {} which it does not own",
                self.agent, variable
            )));
        }
        Ok(())
    }

    fn on_dfs_output(&mut self, problem: &Problem, variable: String, view: DfsView) -> Result<NormStep> {
        self.check_owned(problem, &variable)?;
        let spaces = problem.spaces_enforced_by(&variable, &view.below());
        let domain_size = problem.domain(&variable)?.len() as u64;

        let state = self.states.entry(variable.clone()).or_default();
        if state.view.is_some() {
            return Err(DuctError::Protocol(format!(
                "{} received a second DFS_OUTPUT for {}",
                self.agent, variable
            )));
        }

        for space in &spaces {
            let (min, max) = if self.ignore_infeasible {
                match (
                    space.blind_project(false, true),
                    space.blind_project(true, true),
                ) {
                    (Some(min), Some(max)) => (min, max),
                    _ => {
                        state.shifts.push(0.0);
                        continue;
                    }
                }
            } else {
                let replace = |u: Option<f64>| match u {
                    Some(u) if u.is_finite() => u,
                    _ => self.penalty,
                };
                let a = replace(space.blind_project(false, false));
                let b = replace(space.blind_project(true, false));
                (a.min(b), a.max(b))
            };
            state.shifts.push(min);
            state.lower += min;
            state.upper += max;
        }
        state.space_count += spaces.len();
        state.size = state.size.max(domain_size);
        state.separator.extend(view.separator());
        state.spaces = spaces;
        state.view = Some(view);
        state.received += 1;

        debug!(
            "{}: DFS_OUTPUT for {} with {} local spaces",
            self.agent,
            variable,
            state.spaces.len()
        );
        self.try_report(problem, &variable)
    }

    /// Reports to the parent, or starts the top-down pass at a root, once
    /// every expected event has arrived
    fn try_report(&mut self, problem: &Problem, variable: &str) -> Result<NormStep> {
        let state = match self.states.get_mut(variable) {
            Some(state) => state,
            None => return Ok(NormStep::default()),
        };
        let view = match &state.view {
            Some(view) => view,
            None => return Ok(NormStep::default()),
        };
        if state.reported || state.received < view.children.len() + 1 {
            return Ok(NormStep::default());
        }
        state.reported = true;
        if !view.children.is_empty() {
            state.size += 1;
        }
        state.separator.remove(variable);

        match view.parent.clone() {
            Some(parent) => {
                let owner = problem.owner(&parent)?.to_string();
                trace!("{}: {} reports bounds to {}", self.agent, variable, parent);
                Ok(NormStep {
                    outgoing: vec![Outgoing::agent(
                        owner,
                        Message::Bound {
                            receiver: parent,
                            lower: state.lower,
                            upper: state.upper,
                            space_count: state.space_count,
                            size: state.size,
                            separator: state.separator.clone(),
                        },
                    )],
                    completed: Vec::new(),
                })
            }
            None => {
                let mut divide = state.upper - state.lower;
                if divide == 0.0 {
                    divide = state.lower.abs();
                }
                if divide == 0.0 || !divide.is_finite() {
                    divide = 1.0;
                }
                debug!(
                    "{}: root {} spans [{}, {}] over {} spaces, divide by {}",
                    self.agent, variable, state.lower, state.upper, state.space_count, divide
                );
                self.normalize(problem, variable, divide)
            }
        }
    }

    fn normalize(&mut self, problem: &Problem, variable: &str, divide: f64) -> Result<NormStep> {
        let substitute = if self.ignore_infeasible {
            None
        } else {
            Some(self.penalty)
        };
        let agent = &self.agent;
        let state = self
            .states
            .get_mut(variable)
            .ok_or_else(|| DuctError::UnknownVariable(variable.to_string()))?;
        let view = state.view.as_ref().ok_or_else(|| {
            DuctError::Protocol(format!("{}: NORM for {} before its DFS_OUTPUT", agent, variable))
        })?;
        if state.done {
            return Err(DuctError::Protocol(format!(
                "{}: {} normalized twice",
                agent, variable
            )));
        }
        state.done = true;

        for (space, shift) in state.spaces.iter_mut().zip(&state.shifts) {
            space.rescale(*shift, divide, substitute);
        }

        let mut step = NormStep::default();
        for child in &view.children {
            step.outgoing.push(Outgoing::agent(
                problem.owner(child)?,
                Message::Norm {
                    receiver: child.clone(),
                    divide,
                },
            ));
        }
        step.completed.push(NormalizationOutput {
            variable: variable.to_string(),
            scaling_factor: divide,
            spaces: state.spaces.clone(),
            separator: state.separator.iter().cloned().collect(),
            size: state.size,
        });
        Ok(step)
    }

    /// Handles a batch of messages, merging the steps
    pub fn handle_all<I>(&mut self, problem: &Problem, messages: I) -> Result<NormStep>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut step = NormStep::default();
        for message in messages {
            step.extend(self.handle(problem, message)?);
        }
        Ok(step)
    }
}
