//! Termination conditions for the bandit nodes
//!
//! A termination condition is only consulted once every value of a node has
//! been explored and the variable's parent has terminated.

use crate::{bandit::BanditNode, policy::TerminationCondition, utils};

/// Shared test of the mean and best conditions
///
/// Not converged while the leader's radius exceeds `error`, or while some
/// feasible value's optimistic `score` beats the leader's by more than `error`.
fn dominated<F>(node: &BanditNode, error: f64, delta: f64, score: F) -> bool
where
    F: Fn(usize) -> f64,
{
    let leader = match node.max_value_index() {
        Some(leader) => leader,
        None => return true,
    };

    if node.convergence_bound(leader, delta) > error {
        return false;
    }

    let maximize = node.maximize();
    let reference = score(leader);
    (0..node.num_values())
        .filter(|&i| node.is_feasible(i))
        .all(|i| {
            let optimistic = utils::optimistic(score(i), node.convergence_bound(i, delta), maximize);
            let gain = if maximize {
                optimistic - reference
            } else {
                reference - optimistic
            };
            gain <= error
        })
}

/// Converges when no value's optimistic mean beats the leader's mean by more
/// than the error
#[derive(Debug, Clone, Default)]
pub struct MeanTermination;

impl MeanTermination {
    pub fn new() -> Self {
        MeanTermination
    }
}

impl TerminationCondition for MeanTermination {
    fn converged(&self, node: &BanditNode, error: f64, delta: f64) -> bool {
        dominated(node, error, delta, |i| node.mean(i))
    }
}

/// Same test as [`MeanTermination`] on best observed costs
#[derive(Debug, Clone, Default)]
pub struct BestTermination;

impl BestTermination {
    pub fn new() -> Self {
        BestTermination
    }
}

impl TerminationCondition for BestTermination {
    fn converged(&self, node: &BanditNode, error: f64, delta: f64) -> bool {
        dominated(node, error, delta, |i| node.best(i))
    }
}

/// Converges when the most optimistic best observed cost improves on the
/// leader's by at most the error
///
/// A node with a single feasible value has nothing to regret.
#[derive(Debug, Clone, Default)]
pub struct RegretTermination;

impl RegretTermination {
    pub fn new() -> Self {
        RegretTermination
    }
}

impl TerminationCondition for RegretTermination {
    fn converged(&self, node: &BanditNode, error: f64, delta: f64) -> bool {
        let leader = match node.max_value_index() {
            Some(leader) => leader,
            None => return true,
        };
        if node.feasible_count() == 1 {
            return true;
        }

        let maximize = node.maximize();
        let most_optimistic = (0..node.num_values())
            .filter(|&i| node.is_feasible(i))
            .map(|i| utils::optimistic(node.best(i), node.convergence_bound(i, delta), maximize))
            .fold(utils::worst_value(maximize), |acc, b| {
                if utils::improves(b, acc, maximize) {
                    b
                } else {
                    acc
                }
            });

        let reference = node.best(leader);
        let regret = if maximize {
            most_optimistic - reference
        } else {
            reference - most_optimistic
        };
        error >= regret
    }
}
