//! A segment: a maximal run of mutually-connected nodes that share the same
//! process/thread-group affinity (spec.md §4.2, grounded on `ETLSegment`).

use std::collections::HashSet;

use crate::graph::{Node, NodeId};
use crate::item::Item;

/// One scheduling unit: a set of connected nodes hosted by the same worker
/// group, replicated `num_workers` times at run time.
#[derive(Clone)]
pub struct Segment<I: Item> {
    pub id: String,
    pub nodes: Vec<Node<I>>,
    pub node_ids: HashSet<NodeId>,
    pub num_workers: usize,
    pub run_in_main_process: bool,
}

impl<I: Item> Segment<I> {
    pub fn contains(&self, node: &Node<I>) -> bool {
        self.nodes.iter().any(|n| n == node)
    }
}
