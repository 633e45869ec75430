//! In-process orchestrator for the distributed search
//!
//! [`DuctSolver`] builds one [`Agent`] per agent name, bootstraps them with
//! `START` and the pseudo-tree views, and delivers their messages until every
//! agent has finished, the run times out or an agent fails.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
    thread,
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::{
    agent::Agent,
    collector::SolutionCollector,
    config::{Backend, DuctConfig},
    message::{Destination, Message, Outgoing},
    problem::{Problem, Value},
    pseudo_tree::PseudoTree,
    stats::RunStatistics,
    DuctError, Result,
};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every agent reported `AGENT_FINISHED`
    Completed,
    /// The timeout or the message limit stopped the run; assignments may be partial
    TimedOut,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct Solution {
    /// Final value of every variable that terminated
    pub assignments: BTreeMap<String, Value>,

    /// Cost of the assignment on the original problem, when it is complete
    pub utility: Option<f64>,

    /// Sum of the convergence bounds reported by the roots
    pub final_bound: Option<f64>,

    /// Number of `ASSIGNMENT` messages received per variable
    pub assignment_reports: BTreeMap<String, usize>,

    pub outcome: RunOutcome,
    pub statistics: RunStatistics,
}

impl Solution {
    /// Returns true if the run completed
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Runs the protocol for a problem
#[derive(Debug, Clone)]
pub struct DuctSolver {
    config: DuctConfig,
}

impl DuctSolver {
    /// Creates a solver; fails if the configuration is invalid
    pub fn new(config: DuctConfig) -> Result<Self> {
        config.validate()?;
        Ok(DuctSolver { config })
    }

    pub fn config(&self) -> &DuctConfig {
        &self.config
    }

    /// Solves `problem` over a pseudo-tree computed by [`PseudoTree::generate`]
    pub fn solve(&self, problem: &Problem) -> Result<Solution> {
        let tree = PseudoTree::generate(problem);
        self.solve_with_tree(problem, &tree)
    }

    /// Solves `problem` over the given pseudo-tree
    pub fn solve_with_tree(&self, problem: &Problem, tree: &PseudoTree) -> Result<Solution> {
        if problem.num_variables() == 0 {
            return Err(DuctError::InvalidProblem("problem has no variables".to_string()));
        }
        for variable in problem.variables() {
            tree.view(&variable.name)?;
        }

        let seed = self.config.seed.unwrap_or_else(rand::random);
        let problem = Arc::new(problem.clone());
        let agents = problem.agents();
        info!(
            "solving {} variables over {} agents with the {:?} backend (seed {})",
            problem.num_variables(),
            agents.len(),
            self.config.backend,
            seed
        );

        let mut bootstrap = Vec::new();
        for agent in &agents {
            bootstrap.push(Outgoing::agent(agent.clone(), Message::Start));
        }
        for (variable, view) in tree.views() {
            bootstrap.push(Outgoing::agent(
                problem.owner(variable)?,
                Message::DfsOutput {
                    variable: variable.clone(),
                    view: view.clone(),
                },
            ));
        }

        let start = Instant::now();
        let (collector, mut statistics) = match self.config.backend {
            Backend::Simulated => self.run_simulated(&problem, &agents, bootstrap, seed, start)?,
            Backend::Threaded => self.run_threaded(&problem, &agents, bootstrap, seed, start)?,
        };
        statistics.total_time = start.elapsed();

        let assignments = collector.assignments().clone();
        let utility = if assignments.len() == problem.num_variables() {
            problem.evaluate(&assignments)
        } else {
            None
        };
        let outcome = if statistics.timed_out {
            RunOutcome::TimedOut
        } else {
            RunOutcome::Completed
        };
        info!(
            "run {:?} after {} messages, utility {:?}, bound {:?}",
            outcome,
            statistics.messages,
            utility,
            collector.final_bound()
        );

        Ok(Solution {
            assignments,
            utility,
            final_bound: collector.final_bound(),
            assignment_reports: collector.report_counts().clone(),
            outcome,
            statistics,
        })
    }

    fn out_of_time(&self, start: Instant) -> bool {
        self.config.timeout.map_or(false, |t| start.elapsed() >= t)
    }

    fn run_simulated(
        &self,
        problem: &Arc<Problem>,
        agent_names: &[String],
        bootstrap: Vec<Outgoing>,
        seed: u64,
        start: Instant,
    ) -> Result<(SolutionCollector, RunStatistics)> {
        let mut agents: FxHashMap<String, Agent> = agent_names
            .iter()
            .map(|name| (name.clone(), Agent::new(name.clone(), problem.clone(), &self.config, seed)))
            .collect();
        let mut clocks: FxHashMap<String, u64> =
            agent_names.iter().map(|name| (name.clone(), 0)).collect();
        let mut collector = SolutionCollector::new();
        let mut statistics = RunStatistics::new();
        let mut queue = EventQueue::default();

        for outgoing in bootstrap {
            queue.push(0, outgoing);
        }

        while let Some(event) = queue.pop() {
            if self.config.max_messages.map_or(false, |max| statistics.messages >= max)
                || (statistics.messages % 256 == 0 && self.out_of_time(start))
            {
                warn!("run stopped after {} messages", statistics.messages);
                statistics.timed_out = true;
                break;
            }
            statistics.record(event.message.kind());

            let name = match event.to {
                Destination::Agent(name) => name,
                Destination::Collector | Destination::Orchestrator => {
                    collector.handle(event.message)?;
                    if collector.all_finished(agent_names) {
                        break;
                    }
                    continue;
                }
            };
            let agent = agents
                .get_mut(&name)
                .ok_or_else(|| DuctError::Protocol(format!("message for unknown agent {}", name)))?;
            let clock = clocks.entry(name.clone()).or_insert(0);
            *clock = (*clock).max(event.time) + 1;
            let now = *clock;

            let outgoing = agent.handle(event.message).map_err(|e| DuctError::AgentFailed {
                agent: name.clone(),
                reason: e.to_string(),
            })?;
            for message in outgoing {
                queue.push(now, message);
            }
        }

        if !statistics.timed_out && !collector.all_finished(agent_names) {
            return Err(DuctError::Protocol(
                "no message left to deliver but some agents have not finished".to_string(),
            ));
        }
        statistics.contexts = agents.values().map(|a| a.sampler().context_count()).sum();
        Ok((collector, statistics))
    }

    fn run_threaded(
        &self,
        problem: &Arc<Problem>,
        agent_names: &[String],
        bootstrap: Vec<Outgoing>,
        seed: u64,
        start: Instant,
    ) -> Result<(SolutionCollector, RunStatistics)> {
        let mut inboxes: FxHashMap<String, Sender<Inbox>> = FxHashMap::default();
        let mut receivers = Vec::new();
        for name in agent_names {
            let (tx, rx) = unbounded();
            inboxes.insert(name.clone(), tx);
            receivers.push((name.clone(), rx));
        }
        let (report_tx, report_rx) = unbounded();
        let delivered = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for (name, rx) in receivers {
            let worker = Worker {
                agent: Agent::new(name.clone(), problem.clone(), &self.config, seed),
                inbox: rx,
                peers: inboxes.clone(),
                reports: report_tx.clone(),
                delivered: delivered.clone(),
                stop: stop.clone(),
                max_messages: self.config.max_messages,
            };
            let handle = thread::Builder::new()
                .name(format!("duct-{}", name))
                .spawn(move || worker.run())
                .map_err(|e| DuctError::AgentFailed {
                    agent: name.clone(),
                    reason: e.to_string(),
                })?;
            handles.push(handle);
        }
        drop(report_tx);

        let mut collector = SolutionCollector::new();
        let mut statistics = RunStatistics::new();
        let mut failure = None;

        for outgoing in bootstrap {
            if let Destination::Agent(name) = &outgoing.to {
                if let Some(tx) = inboxes.get(name) {
                    let _ = tx.send(Inbox::Deliver(outgoing.message));
                }
            }
        }

        loop {
            let report = match self.config.timeout {
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    match report_rx.recv_timeout(remaining) {
                        Ok(report) => report,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!("run timed out after {:?}", timeout);
                            statistics.timed_out = true;
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            failure = Some(DuctError::Protocol("all agents stopped".to_string()));
                            break;
                        }
                    }
                }
                None => match report_rx.recv() {
                    Ok(report) => report,
                    Err(_) => {
                        failure = Some(DuctError::Protocol("all agents stopped".to_string()));
                        break;
                    }
                },
            };

            match report {
                Report::Result(message) => {
                    statistics.record(message.kind());
                    if let Err(e) = collector.handle(message) {
                        failure = Some(e);
                        break;
                    }
                    if collector.all_finished(agent_names) {
                        break;
                    }
                }
                Report::Failed { agent, reason } => {
                    failure = Some(DuctError::AgentFailed { agent, reason });
                    break;
                }
                Report::LimitReached => {
                    warn!("run stopped after the message limit");
                    statistics.timed_out = true;
                    break;
                }
            }
        }

        stop.store(true, AtomicOrdering::Relaxed);
        for tx in inboxes.values() {
            let _ = tx.send(Inbox::Kill);
        }
        drop(inboxes);
        for handle in handles {
            match handle.join() {
                Ok((counts, contexts)) => {
                    statistics.merge_counts(&counts);
                    statistics.contexts += contexts;
                }
                Err(_) => warn!("an agent thread panicked"),
            }
        }
        debug!("all agent threads joined");

        match failure {
            Some(error) => Err(error),
            None => Ok((collector, statistics)),
        }
    }
}

/// Message queue of the simulated backend, ordered by (time, send sequence)
#[derive(Default)]
struct EventQueue {
    heap: BinaryHeap<Event>,
    seq: u64,
}

impl EventQueue {
    fn push(&mut self, time: u64, outgoing: Outgoing) {
        self.seq += 1;
        self.heap.push(Event {
            time,
            seq: self.seq,
            to: outgoing.to,
            message: outgoing.message,
        });
    }

    fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }
}

struct Event {
    time: u64,
    seq: u64,
    to: Destination,
    message: Message,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // reversed: the heap pops the earliest event first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

enum Inbox {
    Deliver(Message),
    Kill,
}

enum Report {
    Result(Message),
    Failed { agent: String, reason: String },
    LimitReached,
}

/// One agent and its channels in the threaded backend
struct Worker {
    agent: Agent,
    inbox: Receiver<Inbox>,
    peers: FxHashMap<String, Sender<Inbox>>,
    reports: Sender<Report>,
    delivered: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    max_messages: Option<u64>,
}

impl Worker {
    /// Drains the inbox until killed; returns per-kind message counts and
    /// the number of contexts the agent sampled
    fn run(mut self) -> (BTreeMap<&'static str, u64>, usize) {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        while let Ok(Inbox::Deliver(message)) = self.inbox.recv() {
            // in-flight messages are dropped once the run is over
            if self.stop.load(AtomicOrdering::Relaxed) {
                break;
            }
            *counts.entry(message.kind()).or_insert(0) += 1;
            let total = self.delivered.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            if self.max_messages.map_or(false, |max| total > max) {
                let _ = self.reports.send(Report::LimitReached);
                break;
            }

            let outgoing = match self.agent.handle(message) {
                Ok(outgoing) => outgoing,
                Err(e) => {
                    let _ = self.reports.send(Report::Failed {
                        agent: self.agent.name().to_string(),
                        reason: e.to_string(),
                    });
                    break;
                }
            };
            for Outgoing { to, message } in outgoing {
                match to {
                    Destination::Agent(name) => match self.peers.get(&name) {
                        Some(tx) => {
                            let _ = tx.send(Inbox::Deliver(message));
                        }
                        None => {
                            let _ = self.reports.send(Report::Failed {
                                agent: self.agent.name().to_string(),
                                reason: format!("no agent named {}", name),
                            });
                        }
                    },
                    Destination::Collector | Destination::Orchestrator => {
                        let _ = self.reports.send(Report::Result(message));
                    }
                }
            }
        }
        (counts, self.agent.sampler().context_count())
    }
}
