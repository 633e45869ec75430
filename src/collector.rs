//! Collection of the results reported by the agents

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::{message::Message, problem::Value, DuctError, Result};

/// Inbox for `ASSIGNMENT`, `BOUND_STATS` and `AGENT_FINISHED` messages
#[derive(Debug, Clone, Default)]
pub struct SolutionCollector {
    assignments: BTreeMap<String, Value>,
    reports: BTreeMap<String, usize>,
    final_bound: Option<f64>,
    finished: BTreeSet<String>,
    duplicate_finishes: usize,
}

impl SolutionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a result message
    pub fn handle(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Assignment { variable, value } => {
                *self.reports.entry(variable.clone()).or_insert(0) += 1;
                if let Some(previous) = self.assignments.insert(variable.clone(), value) {
                    warn!("{} reported twice ({} then {})", variable, previous, value);
                }
            }
            Message::BoundStats { bound } => {
                self.final_bound = Some(self.final_bound.unwrap_or(0.0) + bound);
            }
            Message::AgentFinished { agent } => {
                if !self.finished.insert(agent.clone()) {
                    warn!("{} finished twice", agent);
                    self.duplicate_finishes += 1;
                }
            }
            other => {
                return Err(DuctError::UnexpectedMessage {
                    agent: "collector".to_string(),
                    message: other.kind().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Final values reported so far
    pub fn assignments(&self) -> &BTreeMap<String, Value> {
        &self.assignments
    }

    /// Number of `ASSIGNMENT` messages received per variable
    pub fn report_counts(&self) -> &BTreeMap<String, usize> {
        &self.reports
    }

    /// Sum of the bounds reported by the roots, if any root reported one
    pub fn final_bound(&self) -> Option<f64> {
        self.final_bound
    }

    /// Agents that reported `AGENT_FINISHED`
    pub fn finished_agents(&self) -> &BTreeSet<String> {
        &self.finished
    }

    /// Number of `AGENT_FINISHED` messages beyond the first per agent
    pub fn duplicate_finishes(&self) -> usize {
        self.duplicate_finishes
    }

    /// Returns true once every agent in `agents` has finished
    pub fn all_finished<'a, I>(&self, agents: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        agents.into_iter().all(|a| self.finished.contains(a))
    }

    /// Returns a summary of the collected results as a string
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Solution:\n - Assigned variables: {}\n - Final bound: {}\n",
            self.assignments.len(),
            self.final_bound
                .map_or_else(|| "none".to_string(), |b| format!("{:.6}", b))
        );
        for (var, value) in &self.assignments {
            s.push_str(&format!("   {} = {}\n", var, value));
        }
        s
    }
}
