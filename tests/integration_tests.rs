use std::{sync::Arc, time::Duration};

use duct_dcop::{
    config::Backend,
    policy::{BoundKind, SamplingMethod, TerminationKind},
    utils, Agent, DuctConfig, DuctError, DuctSolver, Message, Problem, PseudoTree, RunOutcome,
    Solution,
};

/// A - B - C over three agents; only A = B = 1 costs anything
fn chain() -> Problem {
    let mut problem = Problem::new(false);
    for name in ["A", "B", "C"] {
        problem.add_variable(name, name.to_lowercase(), vec![0, 1]).unwrap();
    }
    problem
        .add_binary("ab", "A", "B", |a, b| if a == 1 && b == 1 { 1.0 } else { 0.0 })
        .unwrap();
    problem.add_binary("bc", "B", "C", |_, _| 0.0).unwrap();
    problem
}

fn config() -> DuctConfig {
    DuctConfig::default()
        .with_error(0.05)
        .with_delta(0.05)
        .with_seed(2024)
        .with_timeout(Duration::from_secs(60))
}

#[test]
fn test_chain_reaches_optimum() {
    let _ = env_logger::builder().is_test(true).try_init();
    let solver = DuctSolver::new(config()).unwrap();
    let solution = solver.solve(&chain()).unwrap();

    assert_eq!(solution.outcome, RunOutcome::Completed);
    assert!(solution.is_complete());
    assert_eq!(solution.assignments["A"], 0);
    assert!(solution.assignments.contains_key("B"));
    assert!(solution.assignments.contains_key("C"));
    assert_eq!(solution.utility, Some(0.0));

    let bound = solution.final_bound.expect("the root reports a bound");
    assert!(bound >= 0.0 && bound < 0.1, "final bound {}", bound);
}

#[test]
fn test_chain_with_tight_precision() {
    let config = DuctConfig::default()
        .with_error(0.01)
        .with_delta(0.01)
        .with_seed(11)
        .with_timeout(Duration::from_secs(300));
    let solution = DuctSolver::new(config).unwrap().solve(&chain()).unwrap();

    assert!(solution.is_complete());
    assert_eq!(solution.assignments["A"], 0);
    // Both values of B are optimal under A = 0; ties keep the first one
    assert_eq!(solution.assignments["B"], 0);
    assert_eq!(solution.utility, Some(0.0));
    assert!(solution.final_bound.unwrap() < 0.1);
}

#[test]
fn test_termination_cascade_reports_once() {
    let problem = chain();
    let solution = DuctSolver::new(config()).unwrap().solve(&problem).unwrap();

    // One ASSIGNMENT per variable, one AGENT_FINISHED per agent
    assert_eq!(solution.assignment_reports.len(), problem.num_variables());
    assert!(solution.assignment_reports.values().all(|&n| n == 1));
    let stats = &solution.statistics;
    assert_eq!(stats.count("ASSIGNMENT"), problem.num_variables() as u64);
    assert_eq!(stats.count("AGENT_FINISHED"), problem.agents().len() as u64);
    assert_eq!(stats.count("BOUND_STATS"), 1);
    assert_eq!(stats.count("START"), 3);
    assert_eq!(stats.count("DFS_OUTPUT"), 3);
    // Two non-root variables report a bound and receive a divisor
    assert_eq!(stats.count("BOUND"), 2);
    assert_eq!(stats.count("NORM"), 2);
    assert_eq!(stats.count("VALUE_FINAL"), 2);
    assert!(stats.contexts >= 1);
    assert!(!stats.timed_out);
}

#[test]
fn test_same_seed_same_run() {
    let problem = chain();
    let solver = DuctSolver::new(config()).unwrap();
    let first = solver.solve(&problem).unwrap();
    let second = solver.solve(&problem).unwrap();

    assert_eq!(first.assignments, second.assignments);
    assert_eq!(first.statistics.messages, second.statistics.messages);
    assert_eq!(first.statistics.per_kind, second.statistics.per_kind);
}

#[test]
fn test_threaded_backend_completes() {
    let solver = DuctSolver::new(config().with_backend(Backend::Threaded)).unwrap();
    let solution = solver.solve(&chain()).unwrap();

    assert_eq!(solution.outcome, RunOutcome::Completed);
    assert_eq!(solution.assignments.len(), 3);
    assert_eq!(solution.assignments["A"], 0);
    assert_eq!(solution.utility, Some(0.0));
    assert!(solution.assignment_reports.values().all(|&n| n == 1));
    assert_eq!(solution.statistics.count("AGENT_FINISHED"), 3);
}

#[test]
fn test_message_limit_stops_run() {
    let solver = DuctSolver::new(config().with_max_messages(50)).unwrap();
    let solution = solver.solve(&chain()).unwrap();

    assert_eq!(solution.outcome, RunOutcome::TimedOut);
    assert!(!solution.is_complete());
    assert!(solution.statistics.timed_out);
    assert!(solution.statistics.messages <= 50);
}

/// Three-coloring of a triangle, one agent per node
///
/// The DFS tree is the chain A - B - C, so C's constraint with A is a back
/// edge and A's value must travel down through B.
fn triangle() -> Problem {
    let mut problem = Problem::new(false);
    for name in ["A", "B", "C"] {
        problem.add_variable(name, name.to_lowercase(), vec![0, 1, 2]).unwrap();
    }
    for (name, x, y) in [("ab", "A", "B"), ("bc", "B", "C"), ("ac", "A", "C")] {
        problem
            .add_binary(name, x, y, |a, b| if a == b { 1.0 } else { 0.0 })
            .unwrap();
    }
    problem
}

fn assert_properly_colored(solution: &Solution) {
    assert_eq!(solution.outcome, RunOutcome::Completed);
    assert_eq!(solution.utility, Some(0.0));
    assert_eq!(solution.assignment_reports.len(), 3);
    assert!(solution.assignment_reports.values().all(|&n| n == 1));

    let (a, b, c) = (
        solution.assignments["A"],
        solution.assignments["B"],
        solution.assignments["C"],
    );
    assert!(a != b && b != c && a != c, "coloring {} {} {}", a, b, c);
}

#[test]
fn test_triangle_forwards_pseudo_parent_values() {
    let problem = triangle();
    let tree = PseudoTree::generate(&problem);
    let c = tree.view("C").unwrap();
    assert_eq!(c.parent.as_deref(), Some("B"));
    assert_eq!(c.pseudo_parents, vec!["A".to_string()]);

    let solution = DuctSolver::new(config()).unwrap().solve(&problem).unwrap();
    assert_properly_colored(&solution);
    assert_eq!(solution.statistics.count("AGENT_FINISHED"), 3);
    assert_eq!(solution.statistics.count("BOUND_STATS"), 1);
}

#[test]
fn test_triangle_on_threaded_backend() {
    let solver = DuctSolver::new(config().with_backend(Backend::Threaded)).unwrap();
    let solution = solver.solve(&triangle()).unwrap();
    assert_properly_colored(&solution);
}

#[test]
fn test_maximization() {
    let mut problem = Problem::new(true);
    problem.add_variable("x", "a", vec![0, 1, 2, 3]).unwrap();
    problem.add_variable("y", "b", vec![0, 1, 2, 3]).unwrap();
    problem
        .add_binary("sum", "x", "y", |x, y| if x == y { 0.0 } else { (x + y) as f64 })
        .unwrap();

    let solution = DuctSolver::new(config()).unwrap().solve(&problem).unwrap();
    assert!(solution.is_complete());
    assert_eq!(solution.utility, Some(5.0));
    assert_ne!(solution.assignments["x"], solution.assignments["y"]);
}

#[test]
fn test_hard_constraints_in_ignore_mode() {
    let inf = utils::infeasible_utility(false);
    let mut problem = Problem::new(false);
    problem.add_variable("x", "a", vec![0, 1]).unwrap();
    problem.add_variable("y", "b", vec![0, 1]).unwrap();
    problem
        .add_binary("differ", "x", "y", move |x, y| if x == y { inf } else { 0.0 })
        .unwrap();

    let solver = DuctSolver::new(config().with_ignore_infeasible(true)).unwrap();
    let solution = solver.solve(&problem).unwrap();
    assert!(solution.is_complete());
    assert_eq!(solution.utility, Some(0.0));
    assert_ne!(solution.assignments["x"], solution.assignments["y"]);
}

#[test]
fn test_isolated_variable_takes_its_best_value() {
    let mut problem = chain();
    problem.add_variable("Z", "z", vec![0, 1, 2, 3, 4]).unwrap();
    problem
        .add_unary("uz", "Z", |z| ((z - 2) * (z - 2)) as f64)
        .unwrap();

    let solution = DuctSolver::new(config()).unwrap().solve(&problem).unwrap();
    assert!(solution.is_complete());
    assert_eq!(solution.assignments["Z"], 2);
    assert_eq!(solution.utility, Some(0.0));
    // Only the chain's root reports a convergence bound
    assert_eq!(solution.statistics.count("BOUND_STATS"), 1);
    assert_eq!(solution.statistics.count("AGENT_FINISHED"), 4);
}

#[test]
fn test_every_policy_combination_completes() {
    let problem = chain();
    for sampling in [SamplingMethod::Mean, SamplingMethod::Best, SamplingMethod::Random] {
        for termination in [TerminationKind::Mean, TerminationKind::Best, TerminationKind::Regret] {
            for bound in [BoundKind::Log, BoundKind::LogSize] {
                let config = config()
                    .with_error(0.1)
                    .with_sampling_method(sampling)
                    .with_termination(termination)
                    .with_bound(bound);
                let solution = DuctSolver::new(config).unwrap().solve(&problem).unwrap();
                assert!(
                    solution.is_complete(),
                    "{} / {} / {} did not complete",
                    sampling,
                    termination,
                    bound
                );
                assert_eq!(solution.assignments.len(), 3);
            }
        }
    }
}

#[test]
fn test_empty_problem_is_rejected() {
    let solver = DuctSolver::new(DuctConfig::default()).unwrap();
    let result = solver.solve(&Problem::new(false));
    assert!(matches!(result, Err(DuctError::InvalidProblem(_))));
}

#[test]
fn test_agent_requires_start() {
    let problem = Arc::new(chain());
    let mut agent = Agent::new("a", problem, &DuctConfig::default(), 0);
    assert_eq!(agent.name(), "a");

    let early = agent.handle(Message::Cost {
        receiver: "A".to_string(),
        cost: Some(0.0),
    });
    assert!(matches!(early, Err(DuctError::Protocol(_))));

    assert!(agent.handle(Message::Start).unwrap().is_empty());
    let misrouted = agent.handle(Message::Assignment {
        variable: "A".to_string(),
        value: 0,
    });
    assert!(matches!(misrouted, Err(DuctError::UnexpectedMessage { .. })));
    assert!(!agent.is_finished());
}
