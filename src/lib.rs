//! # duct-dcop
//!
//! A distributed sampling search (DUCT) for Distributed Constraint Optimization Problems.
//!
//! Variables are owned by autonomous agents and linked by cost tables. The agents
//! cooperate over a DFS pseudo-tree, exchanging messages only with their tree
//! neighbours, to find an assignment that minimizes (or maximizes) the sum of all
//! costs.
//!
//! ## Features
//!
//! - Normalization of all cost tables into a bounded range before sampling
//! - Bandit-guided sampling with a Hoeffding-based convergence test
//! - Pluggable sampling methods, termination conditions and bound formulas
//! - Thread-per-agent and deterministic simulated execution backends
//! - Run statistics and a final error bound on the returned solution
//!
//! ## Basic Usage
//!
//! ```
//! use duct_dcop::{DuctConfig, DuctSolver, Problem};
//!
//! fn main() -> Result<(), duct_dcop::DuctError> {
//!     // Two agents, each owning one variable
//!     let mut problem = Problem::new(false);
//!     problem.add_variable("x", "alice", vec![0, 1])?;
//!     problem.add_variable("y", "bob", vec![0, 1])?;
//!
//!     // Costs 1 when both variables take the same value
//!     problem.add_binary("x_neq_y", "x", "y", |x, y| if x == y { 1.0 } else { 0.0 })?;
//!
//!     let config = DuctConfig::default().with_seed(7);
//!     let solver = DuctSolver::new(config)?;
//!     let solution = solver.solve(&problem)?;
//!
//!     println!("{}", solution.statistics.summary());
//!     assert_eq!(solution.utility, Some(0.0));
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! 1. **Normalization**: bounds on every subtree's cost travel up the pseudo-tree;
//!    the root derives a divisor and sends it back down so that each component's
//!    optimum lies in `[0, 1]`.
//!
//! 2. **Sampling**: the root samples a value and sends its context down. Every
//!    variable keeps one bandit node per distinct context of its ancestors, samples
//!    its own value, and reports the sampled cost of its subtree back up.
//!
//! 3. **Termination**: once the root's statistics satisfy the termination
//!    condition, it fixes its value and tells its children, which keep sampling on
//!    their own until they converge as well.
//!
//! ## Customizing Policies
//!
//! ```rust
//! use duct_dcop::{DuctConfig, policy::{BoundKind, SamplingMethod, TerminationKind}};
//!
//! let config = DuctConfig::default()
//!     .with_sampling_method(SamplingMethod::Best)
//!     .with_termination(TerminationKind::Regret)
//!     .with_bound(BoundKind::LogSize);
//!
//! // The same settings from string options
//! let parsed = DuctConfig::from_params([
//!     ("samplingMethod", "best"),
//!     ("terminationCondition", "regret"),
//!     ("boundFormula", "log-size"),
//! ])?;
//! assert_eq!(parsed.termination, config.termination);
//! # Ok::<(), duct_dcop::DuctError>(())
//! ```
//!
//! ## Examples
//!
//! ```bash
//! cargo run --example graph_coloring
//! ```

pub mod agent;
pub mod bandit;
pub mod collector;
pub mod config;
pub mod message;
pub mod normalize;
pub mod policy;
pub mod problem;
pub mod pseudo_tree;
pub mod sampling;
pub mod solver;
pub mod stats;
pub mod utils;

pub use agent::Agent;
pub use bandit::BanditNode;
pub use collector::SolutionCollector;
pub use config::DuctConfig;
pub use message::{Destination, Message, Outgoing};
pub use policy::{BoundFormula, SamplingPolicy, TerminationCondition};
pub use problem::{CostSpace, Problem, Value, Variable};
pub use pseudo_tree::{DfsView, PseudoTree};
pub use solver::{DuctSolver, RunOutcome, Solution};
pub use stats::RunStatistics;

/// Error types for the DUCT search
#[derive(thiserror::Error, Debug)]
pub enum DuctError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The problem description is malformed
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// A variable name is not part of the problem
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// An agent received a message kind it does not handle
    #[error("Agent {agent} received an unexpected {message} message")]
    UnexpectedMessage { agent: String, message: String },

    /// A message arrived that the protocol does not allow in the current state
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// An agent failed while handling a message; the run was torn down
    #[error("Agent {agent} failed: {reason}")]
    AgentFailed { agent: String, reason: String },
}

/// Result type for DUCT operations
pub type Result<T> = std::result::Result<T, DuctError>;
