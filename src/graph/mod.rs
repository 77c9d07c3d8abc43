//! The ETL graph: nodes, edges, the connection algebra, discovery and naming
//! (spec.md §3.1-§3.3, §4.1-§4.2).

pub mod edge;
pub mod naming;
pub mod node;
pub mod subgraph;

pub use edge::Edge;
pub use naming::{assign_names_and_ids, derive_name};
pub use node::{
    BulkerConfig, DeBulkerConfig, Extract, ExtractorConfig, FilterExtra, FilterOp, Load,
    LoaderExtra, Node, NodeBehavior, NodeConfig, NodeId, NodeKindTag, ProcessorConfig, Transform,
};
pub use subgraph::{connect, connect_with_edges, IntoOrigins, IntoTargets, SubGraph};

use std::collections::HashSet;

use crate::item::Item;

/// Discover every node reachable downstream of `roots`, in deterministic
/// pre-order (a node is visited once its upstream neighbors along the
/// traversal have been visited), mirroring `_downstream_discovery`.
///
/// Like the reference implementation, this is a structural traversal: it
/// assumes the graph built via [`connect`] is acyclic (enforced at
/// connection time for direct self-loops) and does not itself detect
/// longer cycles introduced by connecting nodes out of band.
pub fn discover<I: Item>(roots: &[Node<I>]) -> Vec<Node<I>> {
    let mut visited: HashSet<Node<I>> = HashSet::new();
    let mut order: Vec<Node<I>> = Vec::new();

    fn visit<I: Item>(node: &Node<I>, visited: &mut HashSet<Node<I>>, order: &mut Vec<Node<I>>) {
        if !visited.insert(node.clone()) {
            return;
        }
        order.push(node.clone());
        for output in node.outputs() {
            visit(&output, visited, order);
        }
    }

    for root in roots {
        visit(root, &mut visited, &mut order);
    }

    order
}

/// Topologically sort `nodes` (already known to be a DAG) so that every
/// node appears after all of its ancestors. Used by the planner before
/// segmentation (spec.md §4.2).
pub fn topological_sort<I: Item>(nodes: &[Node<I>]) -> Vec<Node<I>> {
    let universe: HashSet<Node<I>> = nodes.iter().cloned().collect();
    let mut in_degree: std::collections::HashMap<Node<I>, usize> = std::collections::HashMap::new();

    for node in nodes {
        in_degree.entry(node.clone()).or_insert(0);
        for output in node.outputs() {
            if universe.contains(&output) {
                *in_degree.entry(output).or_insert(0) += 1;
            }
        }
    }

    let mut ready: std::collections::VecDeque<Node<I>> = nodes
        .iter()
        .filter(|n| in_degree.get(n).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = ready.pop_front() {
        order.push(node.clone());
        for output in node.outputs() {
            if !universe.contains(&output) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&output) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(output);
                }
            }
        }
    }

    order
}
