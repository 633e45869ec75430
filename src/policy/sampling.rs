//! Sampling policies for the bandit nodes
//!
//! Sampling policies decide which value a variable tries next once every
//! value has been explored, and which value currently leads.

use rand::{Rng, RngCore};

use crate::{bandit::BanditNode, policy::SamplingPolicy, utils};

/// Scans the feasible values of `node`, returning the leader by `score` and
/// the leader by the optimistic score `score ± bound`
fn leaders<F>(node: &BanditNode, score: F) -> (Option<(usize, f64)>, Option<(usize, f64)>)
where
    F: Fn(usize) -> f64,
{
    let maximize = node.maximize();
    let mut value: Option<(usize, f64)> = None;
    let mut bound: Option<(usize, f64)> = None;

    for i in (0..node.num_values()).filter(|&i| node.is_feasible(i)) {
        let s = score(i);
        if value.map_or(true, |(_, v)| utils::improves(s, v, maximize)) {
            value = Some((i, s));
        }
        let o = utils::optimistic(s, node.bound(i), maximize);
        if bound.map_or(true, |(_, b)| utils::improves(o, b, maximize)) {
            bound = Some((i, o));
        }
    }

    (value, bound)
}

fn first_feasible(node: &BanditNode) -> Option<usize> {
    (0..node.num_values()).find(|&i| node.is_feasible(i))
}

/// Samples the value with the most optimistic mean cost
///
/// The leader is the value with the best mean. This is the default policy.
#[derive(Debug, Clone, Default)]
pub struct MeanSampling;

impl MeanSampling {
    pub fn new() -> Self {
        MeanSampling
    }
}

impl SamplingPolicy for MeanSampling {
    fn process_sample(&self, node: &mut BanditNode) {
        let (value, bound) = leaders(node, |i| node.mean(i));
        node.set_leaders(value, bound);
    }

    fn select(&self, node: &BanditNode, _rng: &mut dyn RngCore) -> Option<usize> {
        node.max_bound_index().or_else(|| first_feasible(node))
    }
}

/// Samples the value with the most optimistic best observed cost
#[derive(Debug, Clone, Default)]
pub struct BestSampling;

impl BestSampling {
    pub fn new() -> Self {
        BestSampling
    }
}

impl SamplingPolicy for BestSampling {
    fn process_sample(&self, node: &mut BanditNode) {
        let (value, bound) = leaders(node, |i| node.best(i));
        node.set_leaders(value, bound);
    }

    fn select(&self, node: &BanditNode, _rng: &mut dyn RngCore) -> Option<usize> {
        node.max_bound_index().or_else(|| first_feasible(node))
    }
}

/// Samples a uniformly random feasible value
///
/// The leader is still tracked by best observed cost so the variable can
/// report a value when it terminates.
#[derive(Debug, Clone, Default)]
pub struct RandomSampling;

impl RandomSampling {
    pub fn new() -> Self {
        RandomSampling
    }
}

impl SamplingPolicy for RandomSampling {
    fn process_sample(&self, node: &mut BanditNode) {
        let (value, _) = leaders(node, |i| node.best(i));
        node.set_leaders(value, None);
    }

    fn select(&self, node: &BanditNode, rng: &mut dyn RngCore) -> Option<usize> {
        let feasible: Vec<usize> = (0..node.num_values())
            .filter(|&i| node.is_feasible(i))
            .collect();
        if feasible.is_empty() {
            return None;
        }
        Some(feasible[rng.gen_range(0..feasible.len())])
    }
}
