use std::collections::HashMap;

use crate::engine::TaskExecution;

/// Run diagnostics and performance metrics.
///
/// Returned by [`Runner::run`](crate::Runner::run), it records when each
/// executed task started and how long it took.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Execution metrics keyed by task name.
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    pub(crate) fn merge(&mut self, other: Diagnostics) {
        self.execution_times.extend(other.execution_times);
    }
}
