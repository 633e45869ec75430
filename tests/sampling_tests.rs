use duct_dcop::{
    normalize::NormalizationOutput,
    sampling::{Phase, Sampler},
    Destination, DfsView, DuctConfig, DuctError, Message, Outgoing, Problem,
};

/// A - B - C, one agent per variable, cost only when A = B = 1
fn chain() -> Problem {
    let mut problem = Problem::new(false);
    for name in ["A", "B", "C"] {
        problem.add_variable(name, name.to_lowercase(), vec![0, 1]).unwrap();
    }
    problem
        .add_binary("ab", "A", "B", |a, b| if a == 1 && b == 1 { 1.0 } else { 0.0 })
        .unwrap();
    problem
        .add_binary("bc", "B", "C", |b, c| if b == c { 0.0 } else { 1.0 })
        .unwrap();
    problem
}

fn view(parent: Option<&str>, children: &[&str]) -> DfsView {
    DfsView {
        parent: parent.map(str::to_string),
        children: children.iter().map(|c| c.to_string()).collect(),
        ..DfsView::default()
    }
}

fn output(problem: &Problem, variable: &str, spaces: &[&str], separator: &[&str], size: u64) -> NormalizationOutput {
    NormalizationOutput {
        variable: variable.to_string(),
        scaling_factor: 1.0,
        spaces: problem
            .spaces()
            .iter()
            .filter(|s| spaces.contains(&s.name()))
            .cloned()
            .collect(),
        separator: separator.iter().map(|s| s.to_string()).collect(),
        size,
    }
}

fn value(sender: &str, receiver: &str, variables: &[&str], values: &[i64]) -> Message {
    Message::Value {
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        variables: variables.iter().map(|v| v.to_string()).collect(),
        values: values.to_vec(),
    }
}

fn cost(receiver: &str, cost: Option<f64>) -> Message {
    Message::Cost {
        receiver: receiver.to_string(),
        cost,
    }
}

/// Sampler for B, normalized and waiting for its parent
fn middle_sampler(problem: &Problem) -> Sampler {
    let config = DuctConfig::default();
    let mut sampler = Sampler::new("b", problem, &config, 17);
    sampler.register(problem, "B", &view(Some("A"), &["C"])).unwrap();
    let out = sampler
        .on_normalized(problem, output(problem, "B", &["ab"], &["A"], 2))
        .unwrap();
    assert!(out.is_empty());
    sampler
}

#[test]
fn test_contexts_are_keyed_by_separator_values() {
    let problem = chain();
    let mut sampler = middle_sampler(&problem);
    assert_eq!(sampler.phase("B"), Some(Phase::AwaitingParentValue));

    // Unrelated variables in the context are ignored
    let out = sampler
        .handle(&problem, value("A", "B", &["A", "Z"], &[0, 7]))
        .unwrap();
    assert_eq!(sampler.phase("B"), Some(Phase::Sampling));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, Destination::Agent("c".to_string()));
    match &out[0].message {
        Message::Value { sender, receiver, variables, values } => {
            assert_eq!(sender, "B");
            assert_eq!(receiver, "C");
            assert_eq!(variables, &vec!["A".to_string(), "B".to_string()]);
            assert_eq!(values[0], 0);
            assert_eq!(Some(values[1]), sampler.current_value("B"));
        }
        other => panic!("expected VALUE, got {:?}", other),
    }
    assert_eq!(sampler.node_count("B"), 1);

    // The child's report is forwarded to the parent with the local cost added
    let out = sampler.handle(&problem, cost("B", Some(0.25))).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, Destination::Agent("a".to_string()));
    assert!(matches!(out[0].message, Message::Cost { cost: Some(c), .. } if (c - 0.25).abs() < 1e-12));

    // A new separator assignment opens a second node, a known one reuses it
    sampler.handle(&problem, value("A", "B", &["A"], &[1])).unwrap();
    sampler.handle(&problem, cost("B", Some(0.0))).unwrap();
    assert_eq!(sampler.node_count("B"), 2);
    sampler.handle(&problem, value("A", "B", &["A"], &[0])).unwrap();
    sampler.handle(&problem, cost("B", Some(0.0))).unwrap();
    assert_eq!(sampler.node_count("B"), 2);
    assert_eq!(sampler.context_count(), 2);
}

#[test]
fn test_cost_join_waits_for_every_child() {
    let mut problem = Problem::new(false);
    problem.add_variable("A", "a", vec![0, 1]).unwrap();
    problem.add_variable("B", "b", vec![0, 1]).unwrap();
    for child in ["C1", "C2", "C3"] {
        problem.add_variable(child, "c", vec![0, 1]).unwrap();
    }
    problem.add_unary("u", "B", |_| 0.5).unwrap();

    let reports = [Some(0.1), Some(0.2), None];
    let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
        let mut sampler = Sampler::new("b", &problem, &DuctConfig::default(), 3);
        sampler
            .register(&problem, "B", &view(Some("A"), &["C1", "C2", "C3"]))
            .unwrap();
        sampler
            .on_normalized(&problem, output(&problem, "B", &["u"], &["A"], 4))
            .unwrap();

        let out = sampler.handle(&problem, value("A", "B", &["A"], &[1])).unwrap();
        assert_eq!(out.len(), 3);

        for (position, &i) in order.iter().enumerate() {
            let out = sampler.handle(&problem, cost("B", reports[i])).unwrap();
            if position < 2 {
                assert!(out.is_empty());
                continue;
            }
            // Missing reports count as the penalty
            assert_eq!(out.len(), 1);
            match out[0].message {
                Message::Cost { cost: Some(total), .. } => {
                    assert!((total - 1000.8).abs() < 1e-9, "total {}", total)
                }
                ref other => panic!("expected COST, got {:?}", other),
            }
        }
    }
}

#[test]
fn test_context_before_normalization_is_replayed() {
    let problem = chain();
    let mut sampler = Sampler::new("b", &problem, &DuctConfig::default(), 5);
    sampler.register(&problem, "B", &view(Some("A"), &["C"])).unwrap();

    let out = sampler.handle(&problem, value("A", "B", &["A"], &[1])).unwrap();
    assert!(out.is_empty());
    assert_eq!(sampler.phase("B"), Some(Phase::AwaitingNormalization));

    // Only one context can be pending
    let again = sampler.handle(&problem, value("A", "B", &["A"], &[0]));
    assert!(matches!(again, Err(DuctError::Protocol(_))));

    let out = sampler
        .on_normalized(&problem, output(&problem, "B", &["ab"], &["A"], 2))
        .unwrap();
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0].message, Message::Value { values, .. } if values[0] == 1));
    assert_eq!(sampler.phase("B"), Some(Phase::Sampling));
}

#[test]
fn test_context_from_non_parent_is_rejected() {
    let problem = chain();
    let mut sampler = middle_sampler(&problem);
    let result = sampler.handle(&problem, value("C", "B", &["C"], &[0]));
    assert!(matches!(result, Err(DuctError::Protocol(_))));

    let unknown = sampler.handle(&problem, value("A", "Q", &["A"], &[0]));
    assert!(matches!(unknown, Err(DuctError::UnknownVariable(_))));
}

#[test]
fn test_leaf_solves_exactly_and_terminates_on_final_value() {
    let problem = chain();
    let mut sampler = Sampler::new("c", &problem, &DuctConfig::default(), 9);
    sampler.register(&problem, "C", &view(Some("B"), &[])).unwrap();
    sampler
        .on_normalized(&problem, output(&problem, "C", &["bc"], &["B"], 1))
        .unwrap();

    // A leaf answers a context with its optimal local cost
    let out = sampler
        .handle(&problem, value("B", "C", &["A", "B"], &[0, 1]))
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, Destination::Agent("b".to_string()));
    assert!(matches!(out[0].message, Message::Cost { cost: Some(c), .. } if c == 0.0));
    assert_eq!(sampler.current_value("C"), Some(1));
    assert_eq!(sampler.node_count("C"), 0);

    let out = sampler
        .handle(
            &problem,
            Message::ValueFinal {
                sender: "B".to_string(),
                receiver: "C".to_string(),
                variables: vec!["A".to_string(), "B".to_string()],
                values: vec![0, 0],
            },
        )
        .unwrap();
    let messages: Vec<&Outgoing> = out.iter().collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].to, Destination::Collector);
    assert!(matches!(
        &messages[0].message,
        Message::Assignment { variable, value } if variable == "C" && *value == 0
    ));
    assert_eq!(messages[1].to, Destination::Orchestrator);
    assert!(matches!(&messages[1].message, Message::AgentFinished { agent } if agent == "c"));
    assert_eq!(sampler.phase("C"), Some(Phase::Converged));
    assert!(sampler.is_finished());

    // Nothing may reach a converged variable
    let late = sampler.handle(&problem, value("B", "C", &["B"], &[1]));
    assert!(matches!(late, Err(DuctError::Protocol(_))));
}

#[test]
fn test_agent_finishes_once_after_its_last_variable() {
    let mut problem = Problem::new(false);
    problem.add_variable("S", "solo", vec![0, 1, 2]).unwrap();
    problem.add_variable("T", "solo", vec![5, 6]).unwrap();
    problem.add_unary("us", "S", |x| 3.0 - x as f64).unwrap();
    problem.add_unary("ut", "T", |x| x as f64).unwrap();

    let mut sampler = Sampler::new("solo", &problem, &DuctConfig::default(), 1);
    sampler.register(&problem, "S", &DfsView::default()).unwrap();
    sampler.register(&problem, "T", &DfsView::default()).unwrap();

    // Isolated roots decide at once, without a bound report
    let out = sampler
        .on_normalized(&problem, output(&problem, "S", &["us"], &[], 1))
        .unwrap();
    assert_eq!(out.len(), 1);
    assert!(matches!(
        &out[0].message,
        Message::Assignment { variable, value } if variable == "S" && *value == 2
    ));
    assert!(!sampler.is_finished());

    let out = sampler
        .on_normalized(&problem, output(&problem, "T", &["ut"], &[], 1))
        .unwrap();
    assert_eq!(out.len(), 2);
    assert!(matches!(
        &out[0].message,
        Message::Assignment { variable, value } if variable == "T" && *value == 5
    ));
    assert!(matches!(out[1].message, Message::AgentFinished { .. }));
    assert!(out.iter().all(|o| !matches!(o.message, Message::BoundStats { .. })));
    assert!(sampler.is_finished());

    // Registering a variable twice is a protocol error
    let twice = sampler.register(&problem, "S", &DfsView::default());
    assert!(matches!(twice, Err(DuctError::Protocol(_))));
}

/// Sends `A = 0` to B and returns the value B samples
fn sampled_under_zero(problem: &Problem, sampler: &mut Sampler) -> i64 {
    let out = sampler.handle(problem, value("A", "B", &["A"], &[0])).unwrap();
    assert_eq!(out.len(), 1);
    match &out[0].message {
        Message::Value { values, .. } => values[1],
        other => panic!("expected VALUE, got {:?}", other),
    }
}

#[test]
fn test_infeasible_subtree_counts_as_penalty_without_pruning() {
    let problem = chain();
    let mut sampler = middle_sampler(&problem);

    sampled_under_zero(&problem, &mut sampler);
    let out = sampler.handle(&problem, cost("B", None)).unwrap();
    assert!(matches!(out[0].message, Message::Cost { cost: Some(c), .. } if (c - 1000.0).abs() < 1e-9));
}

#[test]
fn test_pruned_value_is_reported_infeasible_and_dropped() {
    let problem = chain();
    let config = DuctConfig::default().with_pruning(true);
    let mut sampler = Sampler::new("b", &problem, &config, 17);
    sampler.register(&problem, "B", &view(Some("A"), &["C"])).unwrap();
    sampler
        .on_normalized(&problem, output(&problem, "B", &["ab"], &["A"], 2))
        .unwrap();

    // The subtree under the first value has no feasible assignment
    let pruned = sampled_under_zero(&problem, &mut sampler);
    let out = sampler.handle(&problem, cost("B", None)).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, Destination::Agent("a".to_string()));
    assert!(matches!(out[0].message, Message::Cost { cost: None, .. }));

    for _ in 0..20 {
        let sampled = sampled_under_zero(&problem, &mut sampler);
        assert_ne!(sampled, pruned);
        let out = sampler.handle(&problem, cost("B", Some(0.0))).unwrap();
        assert!(matches!(out[0].message, Message::Cost { cost: Some(c), .. } if c == 0.0));
    }

    // Other contexts keep the value
    let out = sampler.handle(&problem, value("A", "B", &["A"], &[1])).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(sampler.node_count("B"), 2);
}

#[test]
fn test_root_without_feasible_value_reports_no_bound() {
    let inf = duct_dcop::utils::infeasible_utility(false);
    let mut problem = Problem::new(false);
    problem.add_variable("A", "a", vec![0, 1]).unwrap();
    problem.add_variable("C", "c", vec![0, 1]).unwrap();
    problem.add_unary("hard", "A", move |_| inf).unwrap();
    problem.add_binary("ac", "A", "C", |_, _| 0.0).unwrap();

    let config = DuctConfig::default().with_ignore_infeasible(true);
    let mut sampler = Sampler::new("a", &problem, &config, 4);
    sampler.register(&problem, "A", &view(None, &["C"])).unwrap();
    let out = sampler
        .on_normalized(&problem, output(&problem, "A", &["hard"], &[], 2))
        .unwrap();

    // The root terminates at once and releases its child
    assert_eq!(out.len(), 3);
    assert!(matches!(out[0].message, Message::ValueFinal { .. }));
    assert!(matches!(
        &out[1].message,
        Message::Assignment { variable, .. } if variable == "A"
    ));
    assert!(matches!(out[2].message, Message::AgentFinished { .. }));
    assert!(out.iter().all(|o| !matches!(o.message, Message::BoundStats { .. })));
    assert!(sampler.is_finished());
}
