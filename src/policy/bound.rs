//! Optimism bounds used while sampling

use crate::{bandit::BanditNode, policy::BoundFormula};

/// UCB-style bound `sqrt(ln(2N) / n_i)`
///
/// `N` is the number of visits of the node and `n_i` the number of times
/// value `i` was sampled. Unsampled values get an infinite bound.
#[derive(Debug, Clone, Default)]
pub struct LogBound;

impl LogBound {
    pub fn new() -> Self {
        LogBound
    }
}

impl BoundFormula for LogBound {
    fn sample_bound(&self, index: usize, node: &BanditNode) -> f64 {
        let visits = node.visits(index);
        if visits == 0 {
            return f64::INFINITY;
        }
        ((2.0 * node.frequency() as f64).ln() / visits as f64).sqrt()
    }
}

/// Bound scaled by the size measure of the subtree below the variable
///
/// `sqrt((size + 1) ln(2N) / n_i)`, where `size` is the largest domain in the
/// subtree plus its depth. Larger subtrees have noisier costs and get
/// explored more.
#[derive(Debug, Clone)]
pub struct LogSizeBound {
    factor: f64,
}

impl LogSizeBound {
    /// Creates the bound for a subtree of size measure `size`
    pub fn new(size: u64) -> Self {
        LogSizeBound {
            factor: (size + 1) as f64,
        }
    }
}

impl BoundFormula for LogSizeBound {
    fn sample_bound(&self, index: usize, node: &BanditNode) -> f64 {
        let visits = node.visits(index);
        if visits == 0 {
            return f64::INFINITY;
        }
        (self.factor * (2.0 * node.frequency() as f64).ln() / visits as f64).sqrt()
    }
}
