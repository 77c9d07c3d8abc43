//! Worker layer: per-node execution loops and the segment-level thread host
//! that runs them (spec.md §4.2, §4.4-§4.9).

pub mod node_worker;
pub mod segment_worker;

pub use node_worker::{run_node, TimingSample};
pub use segment_worker::{run_segment_replica, NodeWiring, SegmentOutcome};
