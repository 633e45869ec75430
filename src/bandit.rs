//! Bandit node statistics
//!
//! A [`BanditNode`] holds the sampling statistics of one variable under one
//! assignment of its separator. Every value is first tried once, in random
//! order; afterwards the configured [`SamplingPolicy`] decides which value to
//! sample next from the running statistics.

use rand::{Rng, RngCore};

use crate::{
    policy::{BoundFormula, SamplingPolicy, TerminationCondition},
    utils,
};

/// Sampling statistics for one (variable, context) pair
#[derive(Debug, Clone)]
pub struct BanditNode {
    maximize: bool,
    ignore_infeasible: bool,

    /// Cost of each value in the variable's own spaces, under this context
    local_costs: Vec<f64>,

    /// Running mean of the cost reported by the children, per value
    average: Vec<f64>,

    /// Best total cost (local + children) observed, per value
    best: Vec<f64>,

    /// Optimism bound per value, refreshed on every visit
    bounds: Vec<f64>,

    visits: Vec<u64>,
    frequency: u64,

    /// Values that have not been tried yet
    unexplored: Vec<usize>,
    feasible_count: usize,
    exploring: bool,

    max_value_index: Option<usize>,
    max_value: f64,
    max_bound_index: Option<usize>,
    max_bound: f64,
}

impl BanditNode {
    /// Creates a node from the local cost of every domain value
    pub fn new(local_costs: Vec<f64>, maximize: bool, ignore_infeasible: bool) -> Self {
        let n = local_costs.len();
        BanditNode {
            maximize,
            ignore_infeasible,
            average: vec![0.0; n],
            best: vec![utils::worst_value(maximize); n],
            bounds: vec![f64::INFINITY; n],
            visits: vec![0; n],
            frequency: 0,
            unexplored: (0..n).collect(),
            feasible_count: n,
            exploring: true,
            max_value_index: None,
            max_value: utils::worst_value(maximize),
            max_bound_index: None,
            max_bound: utils::worst_value(maximize),
            local_costs,
        }
    }

    /// Chooses the next value to sample
    ///
    /// While some values are untried, one of them is picked uniformly at
    /// random. Afterwards the sampling policy decides. Returns `None` when
    /// no feasible value is left.
    pub fn choose_value(
        &mut self,
        sampling: &dyn SamplingPolicy,
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        let mut just_explored = false;
        while self.exploring {
            if self.unexplored.is_empty() {
                self.exploring = false;
                just_explored = true;
                break;
            }
            let pick = rng.gen_range(0..self.unexplored.len());
            let index = self.unexplored.swap_remove(pick);
            if self.ignore_infeasible && utils::is_infeasible(self.local_costs[index]) {
                self.feasible_count -= 1;
                continue;
            }
            self.visits[index] += 1;
            return Some(index);
        }

        if self.feasible_count == 0 {
            return None;
        }
        if just_explored {
            sampling.process_sample(self);
        }
        let index = sampling.select(self, rng)?;
        self.visits[index] += 1;
        Some(index)
    }

    /// Counts a visit of the node and refreshes the per-value bounds
    pub fn record_visit(&mut self, bound: &dyn BoundFormula) {
        self.frequency += 1;
        let bounds: Vec<f64> = (0..self.num_values())
            .map(|i| bound.sample_bound(i, self))
            .collect();
        self.bounds = bounds;
    }

    /// Records the cost reported by the children for value `index`
    ///
    /// Returns the aggregated cost of the subtree (local cost plus
    /// `child_sum`), or `None` if the value is locally infeasible.
    pub fn store_cost(&mut self, index: usize, child_sum: f64) -> Option<f64> {
        self.refresh_exploring();

        let local = self.local_costs[index];
        if utils::is_infeasible(local) {
            return None;
        }

        let n = self.visits[index].max(1) as f64;
        self.average[index] += (child_sum - self.average[index]) / n;

        let total = child_sum + local;
        if utils::improves(total, self.best[index], self.maximize) {
            self.best[index] = total;
        }
        Some(total)
    }

    /// Removes value `index` from play after its subtree reported no
    /// feasible assignment under this context
    ///
    /// The value is marked infeasible, so no policy selects it again.
    pub fn prune(&mut self, index: usize) {
        self.refresh_exploring();
        if self.is_feasible(index) {
            self.local_costs[index] = utils::infeasible_utility(self.maximize);
            self.feasible_count = self.feasible_count.saturating_sub(1);
        }
    }

    fn refresh_exploring(&mut self) {
        if self.exploring {
            self.exploring = !self.unexplored.is_empty();
        }
    }

    /// Returns true once every value has been tried and the termination
    /// condition holds
    pub fn has_converged(
        &self,
        termination: &dyn TerminationCondition,
        error: f64,
        delta: f64,
    ) -> bool {
        !self.exploring && termination.converged(self, error, delta)
    }

    /// Hoeffding radius of the mean of value `index`
    pub fn convergence_bound(&self, index: usize, delta: f64) -> f64 {
        utils::hoeffding_bound(self.visits[index], delta)
    }

    /// Records the leading value and the value to sample next
    ///
    /// Called by sampling policies after they processed a sample.
    pub fn set_leaders(&mut self, value: Option<(usize, f64)>, bound: Option<(usize, f64)>) {
        let worst = utils::worst_value(self.maximize);
        self.max_value_index = value.map(|(i, _)| i);
        self.max_value = value.map_or(worst, |(_, v)| v);
        self.max_bound_index = bound.map(|(i, _)| i);
        self.max_bound = bound.map_or(worst, |(_, b)| b);
    }

    pub fn maximize(&self) -> bool {
        self.maximize
    }

    pub fn num_values(&self) -> usize {
        self.local_costs.len()
    }

    pub fn local_cost(&self, index: usize) -> f64 {
        self.local_costs[index]
    }

    /// Returns true if value `index` is locally feasible
    pub fn is_feasible(&self, index: usize) -> bool {
        !utils::is_infeasible(self.local_costs[index])
    }

    /// Mean cost of value `index`: local cost plus mean of the children's reports
    pub fn mean(&self, index: usize) -> f64 {
        self.average[index] + self.local_costs[index]
    }

    /// Best total cost observed for value `index`
    pub fn best(&self, index: usize) -> f64 {
        self.best[index]
    }

    pub fn bound(&self, index: usize) -> f64 {
        self.bounds[index]
    }

    pub fn visits(&self, index: usize) -> u64 {
        self.visits[index]
    }

    /// Number of times the node was visited
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn feasible_count(&self) -> usize {
        self.feasible_count
    }

    /// Returns true while some value has not been tried
    pub fn is_exploring(&self) -> bool {
        self.exploring
    }

    pub fn max_value_index(&self) -> Option<usize> {
        self.max_value_index
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn max_bound_index(&self) -> Option<usize> {
        self.max_bound_index
    }

    pub fn max_bound(&self) -> f64 {
        self.max_bound
    }
}
