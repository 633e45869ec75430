//! Statistics collection for DUCT runs
//!
//! This module provides structures for collecting and reporting statistics
//! about the messages exchanged during a run.

use std::{collections::BTreeMap, time::Duration};

/// Statistics collected during a run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// Number of messages delivered to agents
    pub messages: u64,

    /// Messages delivered per kind
    pub per_kind: BTreeMap<&'static str, u64>,

    /// Number of distinct contexts sampled, summed over all variables
    pub contexts: usize,

    /// Total wall-clock time of the run
    pub total_time: Duration,

    /// Whether the run was stopped by the timeout or the message limit
    pub timed_out: bool,
}

impl RunStatistics {
    /// Creates a new, empty statistics object
    pub fn new() -> Self {
        RunStatistics {
            messages: 0,
            per_kind: BTreeMap::new(),
            contexts: 0,
            total_time: Duration::from_secs(0),
            timed_out: false,
        }
    }

    /// Counts one delivered message of the given kind
    pub fn record(&mut self, kind: &'static str) {
        self.messages += 1;
        *self.per_kind.entry(kind).or_insert(0) += 1;
    }

    /// Adds the counts of `other` to these statistics
    pub fn merge_counts(&mut self, other: &BTreeMap<&'static str, u64>) {
        for (kind, count) in other {
            self.messages += count;
            *self.per_kind.entry(kind).or_insert(0) += count;
        }
    }

    /// Returns the number of delivered messages of one kind
    pub fn count(&self, kind: &str) -> u64 {
        self.per_kind.get(kind).copied().unwrap_or(0)
    }

    /// Returns the number of messages per second
    pub fn messages_per_second(&self) -> f64 {
        if self.total_time.as_secs_f64() <= 0.0 {
            return 0.0;
        }
        self.messages as f64 / self.total_time.as_secs_f64()
    }

    /// Returns a summary of the statistics as a string
    pub fn summary(&self) -> String {
        let mut s = format!(
            "DUCT Run Statistics:\n\
             - Messages: {}\n\
             - Contexts sampled: {}\n\
             - Total time: {:.3} seconds\n\
             - Messages per second: {:.1}\n\
             - Timed out: {}",
            self.messages,
            self.contexts,
            self.total_time.as_secs_f64(),
            self.messages_per_second(),
            self.timed_out
        );
        for (kind, count) in &self.per_kind {
            s.push_str(&format!("\n   {}: {}", kind, count));
        }
        s
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}
