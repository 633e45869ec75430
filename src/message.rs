//! Messages exchanged between agents, the collector and the orchestrator

use std::collections::BTreeSet;

use crate::{problem::Value, pseudo_tree::DfsView};

/// A protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Wakes an agent up; must precede every other message
    Start,

    /// The pseudo-tree view of one variable owned by the receiving agent
    DfsOutput { variable: String, view: DfsView },

    /// Bottom-up normalization bounds of a child's subtree
    Bound {
        receiver: String,
        lower: f64,
        upper: f64,
        space_count: usize,
        /// Size measure of the child's subtree; a leaf sends its domain size
        size: u64,
        separator: BTreeSet<String>,
    },

    /// Top-down normalization divisor
    ///
    /// Descendants always shift each space by its own minimum, so no shift
    /// travels with the divisor.
    Norm { receiver: String, divide: f64 },

    /// Context (ancestors and the sender's sampled value) for a child
    Value {
        sender: String,
        receiver: String,
        variables: Vec<String>,
        values: Vec<Value>,
    },

    /// Final context: the sender has terminated
    ValueFinal {
        sender: String,
        receiver: String,
        variables: Vec<String>,
        values: Vec<Value>,
    },

    /// Sampled cost of a child's subtree; `None` if it has no feasible assignment
    Cost { receiver: String, cost: Option<f64> },

    /// Convergence bound reported by a root, already multiplied by its scaling factor
    BoundStats { bound: f64 },

    /// Final value of a variable
    Assignment { variable: String, value: Value },

    /// All variables of the agent have terminated
    AgentFinished { agent: String },
}

impl Message {
    /// Short name of the message kind, used for statistics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Start => "START",
            Message::DfsOutput { .. } => "DFS_OUTPUT",
            Message::Bound { .. } => "BOUND",
            Message::Norm { .. } => "NORM",
            Message::Value { .. } => "VALUE",
            Message::ValueFinal { .. } => "VALUE_FINAL",
            Message::Cost { .. } => "COST",
            Message::BoundStats { .. } => "BOUND_STATS",
            Message::Assignment { .. } => "ASSIGNMENT",
            Message::AgentFinished { .. } => "AGENT_FINISHED",
        }
    }
}

/// Where an outgoing message is delivered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The agent with this name
    Agent(String),
    /// The solution collector
    Collector,
    /// The orchestrator running the agents
    Orchestrator,
}

/// A message together with its destination
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: Destination,
    pub message: Message,
}

impl Outgoing {
    pub fn agent(name: impl Into<String>, message: Message) -> Self {
        Outgoing {
            to: Destination::Agent(name.into()),
            message,
        }
    }

    pub fn collector(message: Message) -> Self {
        Outgoing {
            to: Destination::Collector,
            message,
        }
    }

    pub fn orchestrator(message: Message) -> Self {
        Outgoing {
            to: Destination::Orchestrator,
            message,
        }
    }
}
