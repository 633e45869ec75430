//! Distributed sampling search
//!
//! Each variable runs a bandit process over its domain. The root samples a
//! value and sends its context down the pseudo-tree in `VALUE` messages;
//! every non-leaf samples in turn, leaves solve their local problem exactly,
//! and the sampled costs flow back up in `COST` messages. Once the root's
//! statistics satisfy the termination condition it sends `VALUE_FINAL`, and
//! every variable below keeps sampling on its own until it converges too.
//!
//! Statistics are kept per separator context: a variable owns one
//! [`BanditNode`] for every distinct assignment of its separator it has seen.

use log::{debug, trace};
use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::{
    bandit::BanditNode,
    config::DuctConfig,
    message::{Message, Outgoing},
    normalize::NormalizationOutput,
    policy::{BoundFormula, BoundKind, SamplingPolicy, TerminationCondition},
    problem::{CostSpace, Problem, Value},
    pseudo_tree::DfsView,
    utils, DuctError, Result,
};

/// Lifecycle of a variable in the sampling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for normalization; at most one `VALUE` is buffered
    AwaitingNormalization,
    /// Normalized, waiting for the first context from the parent
    AwaitingParentValue,
    Sampling,
    Converged,
}

/// State shared by all variables of an agent
struct Shared {
    agent: String,
    maximize: bool,
    ignore_infeasible: bool,
    pruning: bool,
    error: f64,
    delta: f64,
    penalty: f64,
    bound_kind: BoundKind,
    sampling: Box<dyn SamplingPolicy>,
    termination: Box<dyn TerminationCondition>,
    rng: StdRng,
}

struct VariableState {
    name: String,
    domain: Vec<Value>,
    parent: Option<String>,
    children: Vec<String>,
    phase: Phase,
    parent_finished: bool,
    buffered: Option<Message>,

    /// Separator variables in name order, then the variable itself
    context_vars: Vec<String>,
    /// Known separator values, aligned with `context_vars` minus the last slot
    context: Vec<Option<Value>>,
    pointer: FxHashMap<String, usize>,
    current: Option<usize>,

    spaces: Vec<CostSpace>,
    nodes: Vec<BanditNode>,
    index: FxHashMap<Vec<Value>, usize>,
    active: Option<usize>,

    child_sum: f64,
    costs_received: usize,
    /// Some child reported an infeasible subtree in the current round
    child_infeasible: bool,
    penalty: f64,
    scaling_factor: f64,
    bound: Box<dyn BoundFormula>,
}

impl VariableState {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The full context with `own` in the last slot
    fn values_with(&self, own: Value) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.context.len() + 1);
        for (var, value) in self.context_vars.iter().zip(&self.context) {
            let value = value.ok_or_else(|| {
                DuctError::Protocol(format!("{} has no value for {} in its context", self.name, var))
            })?;
            values.push(value);
        }
        values.push(own);
        Ok(values)
    }

    /// Cost of `own` in the variable's spaces under the current context
    fn local_cost(&self, own: Value) -> Result<f64> {
        let values = self.values_with(own)?;
        let mut total = 0.0;
        for space in &self.spaces {
            total += space.utility(&self.context_vars, &values).ok_or_else(|| {
                DuctError::Protocol(format!(
                    "{} cannot evaluate space {} under its context",
                    self.name,
                    space.name()
                ))
            })?;
        }
        Ok(total)
    }

    fn separator_key(&self) -> Result<Vec<Value>> {
        self.context
            .iter()
            .zip(&self.context_vars)
            .map(|(value, var)| {
                value.ok_or_else(|| {
                    DuctError::Protocol(format!("{} has no value for {} in its context", self.name, var))
                })
            })
            .collect()
    }

    /// Merges an ancestor assignment into the context and activates the
    /// bandit node of the resulting context
    fn set_context(&mut self, shared: &Shared, variables: &[String], values: &[Value]) -> Result<()> {
        for (var, value) in variables.iter().zip(values) {
            if let Some(&slot) = self.pointer.get(var) {
                self.context[slot] = Some(*value);
            }
        }
        if self.is_leaf() {
            return Ok(());
        }

        let key = self.separator_key()?;
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let local_costs = self
                    .domain
                    .iter()
                    .map(|&v| self.local_cost(v))
                    .collect::<Result<Vec<f64>>>()?;
                self.nodes.push(BanditNode::new(
                    local_costs,
                    shared.maximize,
                    shared.ignore_infeasible,
                ));
                let slot = self.nodes.len() - 1;
                trace!("{}: new node {} for context {:?}", self.name, slot, key);
                self.index.insert(key, slot);
                slot
            }
        };
        self.active = Some(slot);
        Ok(())
    }

    fn node_mut(&mut self) -> Result<&mut BanditNode> {
        let slot = self
            .active
            .ok_or_else(|| DuctError::Protocol(format!("{} has no active context", self.name)))?;
        Ok(&mut self.nodes[slot])
    }

    fn node(&self) -> Option<&BanditNode> {
        self.active.map(|slot| &self.nodes[slot])
    }

    /// Samples a value in the active node; `None` if no value is feasible
    fn sample(&mut self, shared: &mut Shared) -> Result<Option<usize>> {
        let slot = self
            .active
            .ok_or_else(|| DuctError::Protocol(format!("{} has no active context", self.name)))?;
        let node = &mut self.nodes[slot];
        let chosen = node.choose_value(shared.sampling.as_ref(), &mut shared.rng);
        if let Some(index) = chosen {
            node.record_visit(self.bound.as_ref());
            self.current = Some(index);
        }
        Ok(chosen)
    }

    /// Picks the best value given the context; `None` if none is feasible
    fn solve_leaf(&mut self, maximize: bool) -> Result<Option<f64>> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &value) in self.domain.iter().enumerate() {
            let cost = self.local_cost(value)?;
            if best.map_or(true, |(_, b)| utils::improves(cost, b, maximize)) {
                best = Some((i, cost));
            }
        }
        let (index, cost) = best.unwrap_or((0, utils::infeasible_utility(maximize)));
        self.current = Some(index);
        if utils::is_infeasible(cost) {
            Ok(None)
        } else {
            Ok(Some(cost))
        }
    }

    fn has_converged(&self, shared: &Shared) -> bool {
        self.node().map_or(true, |node| {
            node.has_converged(shared.termination.as_ref(), shared.error, shared.delta)
        })
    }

    fn current_value(&self) -> Value {
        self.domain[self.current.unwrap_or(0)]
    }

    fn value_messages(&self, problem: &Problem, terminal: bool) -> Result<Vec<Outgoing>> {
        let values = self.values_with(self.current_value())?;
        let mut out = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let variables = self.context_vars.clone();
            let values = values.clone();
            let message = if terminal {
                Message::ValueFinal {
                    sender: self.name.clone(),
                    receiver: child.clone(),
                    variables,
                    values,
                }
            } else {
                Message::Value {
                    sender: self.name.clone(),
                    receiver: child.clone(),
                    variables,
                    values,
                }
            };
            out.push(Outgoing::agent(problem.owner(child)?, message));
        }
        Ok(out)
    }

    fn cost_message(&self, problem: &Problem, cost: Option<f64>) -> Result<Outgoing> {
        let parent = self
            .parent
            .as_ref()
            .ok_or_else(|| DuctError::Protocol(format!("root {} cannot report a cost", self.name)))?;
        Ok(Outgoing::agent(
            problem.owner(parent)?,
            Message::Cost {
                receiver: parent.clone(),
                cost,
            },
        ))
    }

    /// Final convergence bound of a root, in the original cost units;
    /// `None` when no value leads
    fn final_bound(&self, delta: f64) -> Option<f64> {
        let node = self.node()?;
        let index = node.max_value_index()?;
        Some(self.scaling_factor * node.convergence_bound(index, delta))
    }

    /// Adopts the leading value of the active node, if any
    fn adopt_leader(&mut self) {
        if let Some(index) = self.node().and_then(BanditNode::max_value_index) {
            self.current = Some(index);
        }
    }

    /// Marks the variable converged and produces its final messages
    fn terminate(&mut self, problem: &Problem, delta: f64) -> Result<Vec<Outgoing>> {
        self.phase = Phase::Converged;
        let mut out = Vec::new();
        if !self.is_leaf() {
            out.extend(self.value_messages(problem, true)?);
        }
        out.push(Outgoing::collector(Message::Assignment {
            variable: self.name.clone(),
            value: self.current_value(),
        }));
        if self.is_root() && !self.is_leaf() {
            if let Some(bound) = self.final_bound(delta) {
                out.push(Outgoing::collector(Message::BoundStats { bound }));
            }
        }
        debug!(
            "{} converged to {} after {} contexts",
            self.name,
            self.current_value(),
            self.nodes.len()
        );
        Ok(out)
    }
}

/// Sampling engine of one agent
pub struct Sampler {
    shared: Shared,
    variables: FxHashMap<String, VariableState>,
    remaining: usize,
}

impl Sampler {
    /// Creates the engine for `agent`
    ///
    /// The random generator is seeded from the configured seed and the agent
    /// name, so runs are reproducible under the simulated backend.
    pub fn new(agent: impl Into<String>, problem: &Problem, config: &DuctConfig, seed: u64) -> Self {
        let agent = agent.into();
        let maximize = problem.maximize();
        Sampler {
            remaining: problem.variables_of(&agent).len(),
            shared: Shared {
                rng: StdRng::seed_from_u64(utils::agent_seed(seed, &agent)),
                agent,
                maximize,
                ignore_infeasible: config.ignore_infeasible,
                pruning: config.pruning,
                error: config.error,
                delta: config.delta,
                penalty: config.penalty_for(maximize),
                bound_kind: config.bound,
                sampling: config.sampling_method.build(),
                termination: config.termination.build(),
            },
            variables: FxHashMap::default(),
        }
    }

    /// Registers a variable from its pseudo-tree view
    pub fn register(&mut self, problem: &Problem, variable: &str, view: &DfsView) -> Result<()> {
        if self.variables.contains_key(variable) {
            return Err(DuctError::Protocol(format!(
                "{} registered {} twice",
                self.shared.agent, variable
            )));
        }
        let domain = problem.domain(variable)?.to_vec();
        self.variables.insert(
            variable.to_string(),
            VariableState {
                name: variable.to_string(),
                domain,
                parent: view.parent.clone(),
                children: view.children.clone(),
                phase: Phase::AwaitingNormalization,
                parent_finished: view.is_root(),
                buffered: None,
                context_vars: vec![variable.to_string()],
                context: Vec::new(),
                pointer: FxHashMap::default(),
                current: None,
                spaces: Vec::new(),
                nodes: Vec::new(),
                index: FxHashMap::default(),
                active: None,
                child_sum: 0.0,
                costs_received: 0,
                child_infeasible: false,
                penalty: self.shared.penalty,
                scaling_factor: 1.0,
                bound: self.shared.bound_kind.build(1),
            },
        );
        Ok(())
    }

    /// Starts sampling for a variable whose normalization completed
    pub fn on_normalized(&mut self, problem: &Problem, output: NormalizationOutput) -> Result<Vec<Outgoing>> {
        let state = Self::state_mut(&mut self.variables, &output.variable)?;
        if state.phase != Phase::AwaitingNormalization {
            return Err(DuctError::Protocol(format!(
                "{} normalized while {:?}",
                output.variable, state.phase
            )));
        }

        state.context_vars = output.separator.clone();
        state.context_vars.push(state.name.clone());
        state.context = vec![None; output.separator.len()];
        state.pointer = output
            .separator
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();
        state.spaces = output.spaces;
        state.scaling_factor = output.scaling_factor;
        state.penalty = self.shared.penalty / output.scaling_factor;
        state.bound = self.shared.bound_kind.build(output.size);

        if state.is_root() {
            state.phase = Phase::Sampling;
            let shared = &mut self.shared;
            state.set_context(shared, &[], &[])?;
            if state.is_leaf() {
                state.solve_leaf(shared.maximize)?;
                let out = state.terminate(problem, shared.delta)?;
                return Ok(self.variable_done(out));
            }
            return match state.sample(shared)? {
                Some(_) => state.value_messages(problem, false),
                None => {
                    let out = state.terminate(problem, shared.delta)?;
                    Ok(self.variable_done(out))
                }
            };
        }

        state.phase = Phase::AwaitingParentValue;
        match state.buffered.take() {
            Some(message) => self.handle(problem, message),
            None => Ok(Vec::new()),
        }
    }

    /// Handles a `VALUE`, `VALUE_FINAL` or `COST` message
    pub fn handle(&mut self, problem: &Problem, message: Message) -> Result<Vec<Outgoing>> {
        match message {
            Message::Value {
                sender,
                receiver,
                variables,
                values,
            } => self.on_value(problem, sender, receiver, variables, values, false),
            Message::ValueFinal {
                sender,
                receiver,
                variables,
                values,
            } => self.on_value(problem, sender, receiver, variables, values, true),
            Message::Cost { receiver, cost } => self.on_cost(problem, &receiver, cost),
            other => Err(DuctError::UnexpectedMessage {
                agent: self.shared.agent.clone(),
                message: other.kind().to_string(),
            }),
        }
    }

    fn on_value(
        &mut self,
        problem: &Problem,
        sender: String,
        receiver: String,
        variables: Vec<String>,
        values: Vec<Value>,
        terminal: bool,
    ) -> Result<Vec<Outgoing>> {
        let state = Self::state_mut(&mut self.variables, &receiver)?;
        match state.phase {
            Phase::AwaitingNormalization => {
                if state.buffered.is_some() {
                    return Err(DuctError::Protocol(format!(
                        "{} received a second context before normalization",
                        receiver
                    )));
                }
                let message = if terminal {
                    Message::ValueFinal {
                        sender,
                        receiver,
                        variables,
                        values,
                    }
                } else {
                    Message::Value {
                        sender,
                        receiver,
                        variables,
                        values,
                    }
                };
                state.buffered = Some(message);
                return Ok(Vec::new());
            }
            Phase::Converged => {
                return Err(DuctError::Protocol(format!(
                    "{} received a context after converging",
                    receiver
                )));
            }
            Phase::AwaitingParentValue | Phase::Sampling => {}
        }
        if state.parent.as_deref() != Some(sender.as_str()) {
            return Err(DuctError::Protocol(format!(
                "{} received a context from {} which is not its parent",
                receiver, sender
            )));
        }

        let shared = &mut self.shared;
        state.phase = Phase::Sampling;
        state.set_context(shared, &variables, &values)?;

        if !terminal {
            if state.is_leaf() {
                let cost = state.solve_leaf(shared.maximize)?;
                return Ok(vec![state.cost_message(problem, cost)?]);
            }
            return match state.sample(shared)? {
                Some(_) => state.value_messages(problem, false),
                None => Ok(vec![state.cost_message(problem, None)?]),
            };
        }

        state.parent_finished = true;
        if state.is_leaf() {
            state.solve_leaf(shared.maximize)?;
        } else if state.has_converged(shared) {
            state.adopt_leader();
        } else if state.sample(shared)?.is_some() {
            return state.value_messages(problem, false);
        }
        let out = state.terminate(problem, shared.delta)?;
        Ok(self.variable_done(out))
    }

    fn on_cost(&mut self, problem: &Problem, receiver: &str, cost: Option<f64>) -> Result<Vec<Outgoing>> {
        let state = Self::state_mut(&mut self.variables, receiver)?;
        if state.phase != Phase::Sampling || state.is_leaf() {
            return Err(DuctError::Protocol(format!(
                "{} received a COST while {:?}",
                receiver, state.phase
            )));
        }

        state.child_sum += cost.unwrap_or(state.penalty);
        state.child_infeasible |= cost.is_none();
        state.costs_received += 1;
        if state.costs_received < state.children.len() {
            return Ok(Vec::new());
        }

        let child_sum = state.child_sum;
        let child_infeasible = state.child_infeasible;
        state.child_sum = 0.0;
        state.costs_received = 0;
        state.child_infeasible = false;
        let index = state
            .current
            .ok_or_else(|| DuctError::Protocol(format!("{} received a COST before sampling", receiver)))?;

        let shared = &mut self.shared;
        let node = state.node_mut()?;
        let aggregated = if shared.pruning && child_infeasible {
            trace!("{}: pruning value {} of {}", shared.agent, index, receiver);
            node.prune(index);
            None
        } else {
            node.store_cost(index, child_sum)
        };
        if !node.is_exploring() {
            shared.sampling.process_sample(node);
        }

        if !state.parent_finished {
            return Ok(vec![state.cost_message(problem, aggregated)?]);
        }

        if state.has_converged(shared) {
            state.adopt_leader();
        } else if state.sample(shared)?.is_some() {
            return state.value_messages(problem, false);
        }
        let out = state.terminate(problem, shared.delta)?;
        Ok(self.variable_done(out))
    }

    /// Counts a terminated variable, appending `AGENT_FINISHED` after the last one
    fn variable_done(&mut self, mut out: Vec<Outgoing>) -> Vec<Outgoing> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            debug!("{}: all variables terminated", self.shared.agent);
            out.push(Outgoing::orchestrator(Message::AgentFinished {
                agent: self.shared.agent.clone(),
            }));
        }
        out
    }

    fn state_mut<'a>(
        variables: &'a mut FxHashMap<String, VariableState>,
        variable: &str,
    ) -> Result<&'a mut VariableState> {
        variables
            .get_mut(variable)
            .ok_or_else(|| DuctError::UnknownVariable(variable.to_string()))
    }

    /// Returns true once every owned variable has terminated
    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Returns the phase of a registered variable
    pub fn phase(&self, variable: &str) -> Option<Phase> {
        self.variables.get(variable).map(|s| s.phase)
    }

    /// Returns the number of distinct contexts a variable has seen
    pub fn node_count(&self, variable: &str) -> usize {
        self.variables.get(variable).map_or(0, |s| s.nodes.len())
    }

    /// Returns the number of bandit nodes over all variables of the agent
    pub fn context_count(&self) -> usize {
        self.variables.values().map(|s| s.nodes.len()).sum()
    }

    /// Returns the value a variable currently holds
    pub fn current_value(&self, variable: &str) -> Option<Value> {
        self.variables
            .get(variable)
            .and_then(|s| s.current.map(|i| s.domain[i]))
    }

    /// Returns the scaling factor a variable received from normalization
    pub fn scaling_factor(&self, variable: &str) -> Option<f64> {
        self.variables.get(variable).map(|s| s.scaling_factor)
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("agent", &self.shared.agent)
            .field("variables", &self.variables.len())
            .field("remaining", &self.remaining)
            .finish()
    }
}
