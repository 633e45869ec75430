//! Utility functions shared by the normalization and sampling engines
//!
//! This module contains small numeric helpers: cost comparison in the
//! optimization direction, the infeasibility sentinel, the Hoeffding
//! convergence bound and stable per-agent seed derivation.

/// Returns the utility that marks an infeasible assignment
///
/// When minimizing an infeasible assignment costs `+inf`, when maximizing
/// it is worth `-inf`.
pub fn infeasible_utility(maximize: bool) -> f64 {
    if maximize {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    }
}

/// Returns true if `utility` is the infeasibility sentinel
pub fn is_infeasible(utility: f64) -> bool {
    utility.is_infinite()
}

/// Returns true if `candidate` is strictly better than `incumbent`
///
/// Equal values are never an improvement, so ties keep the earlier value.
pub fn improves(candidate: f64, incumbent: f64, maximize: bool) -> bool {
    if maximize {
        candidate > incumbent
    } else {
        candidate < incumbent
    }
}

/// The worst possible value in the optimization direction
pub fn worst_value(maximize: bool) -> f64 {
    if maximize {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    }
}

/// Moves `estimate` towards the optimistic side by `bound`
pub fn optimistic(estimate: f64, bound: f64, maximize: bool) -> f64 {
    if maximize {
        estimate + bound
    } else {
        estimate - bound
    }
}

/// Hoeffding confidence radius for a mean of `visits` samples in `[0, 1]`
///
/// With probability `1 - delta` the true mean lies within this radius of the
/// empirical one: `sqrt(ln(2/delta) / (2 n))`. Infinite when never visited.
pub fn hoeffding_bound(visits: u64, delta: f64) -> f64 {
    if visits == 0 {
        return f64::INFINITY;
    }
    ((2.0 / delta).ln() / (2.0 * visits as f64)).sqrt()
}

/// Derives a per-agent RNG seed from the run seed and the agent name
///
/// FNV-1a over the name followed by a SplitMix64 finalizer, so the seed is
/// stable across platforms and runs.
pub fn agent_seed(seed: u64, agent: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in agent.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
