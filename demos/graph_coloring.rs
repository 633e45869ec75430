//! Graph coloring example for the DUCT search
//!
//! Colors a ring of nodes with three colors, each node owned by its own agent.
//! Neighbours with the same color cost 1; every node also slightly prefers
//! low colors.
//!
//! Usage: `cargo run --example graph_coloring -- [nodes] [simulated|threaded]`

use std::time::Duration;

use duct_dcop::{config::Backend, DuctConfig, DuctError, DuctSolver, Problem};

const COLORS: [&str; 3] = ["red", "green", "blue"];

fn ring(size: usize) -> Result<Problem, DuctError> {
    let mut problem = Problem::new(false);
    let names: Vec<String> = (0..size).map(|i| format!("node{:02}", i)).collect();

    for (i, name) in names.iter().enumerate() {
        problem.add_variable(name.as_str(), format!("agent{:02}", i), vec![0, 1, 2])?;
        problem.add_unary(format!("prefer_{}", name), name, |c| 0.1 * c as f64)?;
    }
    for i in 0..size {
        let j = (i + 1) % size;
        if i == j {
            break;
        }
        problem.add_binary(
            format!("edge_{}_{}", i, j),
            &names[i],
            &names[j],
            |a, b| if a == b { 1.0 } else { 0.0 },
        )?;
    }
    Ok(problem)
}

fn main() -> Result<(), DuctError> {
    // Initialize logging
    env_logger::init();

    println!("DUCT Graph Coloring Example");
    println!("===========================");
    println!();

    let mut args = std::env::args().skip(1);
    let size = match args.next() {
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|_| DuctError::InvalidConfiguration(format!("not a node count: {}", arg)))?,
        None => 6,
    };
    let backend: Backend = match args.next() {
        Some(arg) => arg.parse()?,
        None => Backend::Simulated,
    };

    let problem = ring(size)?;
    println!(
        "Coloring a ring of {} nodes with {} colors ({:?} backend)",
        size,
        COLORS.len(),
        backend
    );
    println!();

    let config = DuctConfig::default()
        .with_error(0.05)
        .with_delta(0.05)
        .with_timeout(Duration::from_secs(60))
        .with_backend(backend);
    let solver = DuctSolver::new(config)?;
    let solution = solver.solve(&problem)?;

    for (node, color) in &solution.assignments {
        println!("  {} -> {}", node, COLORS[*color as usize]);
    }
    println!();

    match solution.utility {
        Some(cost) => println!("Total cost: {:.2}", cost),
        None => println!("Incomplete assignment"),
    }
    if let Some(bound) = solution.final_bound {
        println!("Error bound: {:.4}", bound);
    }
    println!("Outcome: {:?}", solution.outcome);
    println!();
    println!("{}", solution.statistics.summary());

    Ok(())
}
