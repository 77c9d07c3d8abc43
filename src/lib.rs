//! An in-process, graph-driven ETL execution engine.
//!
//! Build a DAG of [`graph::Node`]s (Extractor, Transformer, Filter, Loader,
//! Bulker, DeBulker), [`graph::connect`] them, hand the roots to an
//! [`engine::Engine`], and call [`engine::Engine::run`]. Batches flow
//! between nodes over bounded, sentinel-terminated [`queue::Queue`]s; the
//! planner ([`plan::plan`]) groups the graph into [`plan::Segment`]s and the
//! worker layer ([`worker`]) hosts each segment as a thread per node.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod item;
pub mod observe;
pub mod plan;
pub mod queue;
pub mod signal;
pub mod sync;
pub mod worker;

pub use config::EngineTunables;
pub use engine::{Engine, RunOptions};
pub use error::{Action, EngineError, NodeException, Result};
pub use graph::{connect, Extract, FilterOp, Load, Node, Transform};
pub use item::{Bulkable, Item};
