//! Crate-wide error types.
//!
//! Construction errors (`CyclicNode`, `AlreadyConnected`, `Connection`) are
//! synchronous and fatal only to the connection call that raised them.
//! `ExecutionFailed` and `Interrupted` are raised by [`crate::engine::Engine::run`]
//! once a run has finished.

use std::fmt;

use crate::graph::NodeId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by graph construction and by [`crate::engine::Engine::run`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A node was connected to itself.
    #[error("cannot connect node {0} to itself")]
    CyclicNode(String),

    /// The same (origin, target) pair was connected twice.
    #[error("nodes {origin} and {target} are already connected")]
    AlreadyConnected { origin: String, target: String },

    /// A node already has an upstream, or a multi-leaf SubGraph was chained further.
    #[error("connection error: {0}")]
    Connection(String),

    /// The run completed with one or more node failures.
    ///
    /// `message` is the first captured traceback, `failing_nodes` is the
    /// sorted list of node ids that raised.
    #[error("ETL run failed in node(s) {}: {message}", failing_nodes.join(", "))]
    ExecutionFailed {
        message: String,
        failing_nodes: Vec<String>,
    },

    /// No node failed, but a termination signal was received during the run.
    #[error("ETL run was interrupted by a termination signal")]
    Interrupted,

    /// The tunables TOML file couldn't be read or parsed.
    #[error("failed to load engine tunables: {0}")]
    Config(String),
}

/// The lifecycle action that was in progress when a [`NodeException`] was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Finalize,
    GenerateBatch,
    ProduceBatch,
    ProduceTiming,
    ProcessBatch,
    ConsumeBatch,
    UpdateCounter,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Start => "start",
            Action::Finalize => "finalize",
            Action::GenerateBatch => "generate_batch",
            Action::ProduceBatch => "produce_batch",
            Action::ProduceTiming => "produce_timing",
            Action::ProcessBatch => "process_batch",
            Action::ConsumeBatch => "consume_batch",
            Action::UpdateCounter => "update_counter",
        };
        f.write_str(s)
    }
}

/// An exception captured from user code (or engine infrastructure) while a
/// node was running, attributed to the node that raised it.
///
/// The `anyhow::Error` payload is the Rust analogue of "a formatted
/// traceback": `anyhow` preserves the error chain and renders it with
/// `{:#}` for user-visible reporting.
#[derive(Debug)]
pub struct NodeException {
    pub node_id: NodeId,
    pub action: Action,
    pub error: anyhow::Error,
}

impl NodeException {
    pub fn new(node_id: NodeId, action: Action, error: anyhow::Error) -> Self {
        Self {
            node_id,
            action,
            error,
        }
    }

    /// A formatted, multi-line rendering of the error chain, suitable for
    /// the "first captured traceback" surfaced in [`EngineError::ExecutionFailed`].
    pub fn traceback(&self) -> String {
        format!("[{}] {}: {:#}", self.node_id, self.action, self.error)
    }
}

impl fmt::Display for NodeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.traceback())
    }
}
