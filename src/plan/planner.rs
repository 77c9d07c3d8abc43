//! Segmentation: splits a topologically-sorted node list into [`Segment`]s
//! (spec.md §4.2), grounded on `get_etl_segments` / `_split_nodes_by_attr` /
//! `_split_nodes_if_not_consecutive`.
//!
//! Two differences from the algorithm it's grounded on, both spec.md §10
//! redesign decisions:
//! - connected components are found with a union-find pass over the edges
//!   internal to each affinity bucket, rather than by repeated
//!   ascendant/descendant walks per node — same result, O(n α(n)) instead
//!   of O(n²);
//! - every Extractor lacking main-process affinity is pulled into its own
//!   singleton segment, not just the first one encountered (the reference
//!   implementation returns after handling a single violation per call,
//!   silently leaving any others in place).

use std::collections::HashMap;

use crate::graph::{Node, NodeKindTag};
use crate::item::Item;

use super::segment::Segment;

/// Stable-partition `nodes` into the `false`-affinity bucket followed by the
/// `true`-affinity bucket, preserving relative order within each.
fn split_by_affinity<I: Item>(nodes: &[Node<I>]) -> Vec<Vec<Node<I>>> {
    let mut main_process = Vec::new();
    let mut worker_pool = Vec::new();
    for node in nodes {
        if node.main_process_affinity() {
            main_process.push(node.clone());
        } else {
            worker_pool.push(node.clone());
        }
    }

    [worker_pool, main_process]
        .into_iter()
        .filter(|g| !g.is_empty())
        .collect()
}

/// A minimal union-find over a fixed universe of indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Split `nodes` (all sharing one affinity bucket) into connected
/// components, using only edges whose both endpoints are within `nodes`.
/// Group order follows each component's first-seen node in `nodes`.
fn split_connected_components<I: Item>(nodes: &[Node<I>]) -> Vec<Vec<Node<I>>> {
    let index_of: HashMap<Node<I>, usize> = nodes
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();

    let mut dsu = DisjointSet::new(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        for output in node.outputs() {
            if let Some(&j) = index_of.get(&output) {
                dsu.union(i, j);
            }
        }
    }

    let mut order: Vec<usize> = Vec::new();
    let mut groups: HashMap<usize, Vec<Node<I>>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        let root = dsu.find(i);
        if !groups.contains_key(&root) {
            order.push(root);
        }
        groups.entry(root).or_default().push(node.clone());
    }

    order.into_iter().map(|root| groups.remove(&root).unwrap()).collect()
}

/// Pull every Extractor lacking main-process affinity out of a
/// multi-node group into its own singleton group.
fn enforce_extractor_singletons<I: Item>(groups: Vec<Vec<Node<I>>>) -> Vec<Vec<Node<I>>> {
    let mut result = Vec::new();
    let mut extras = Vec::new();

    for group in groups {
        if group.len() <= 1 {
            result.push(group);
            continue;
        }

        let mut kept = Vec::new();
        for node in group {
            if node.tag() == NodeKindTag::Extractor && !node.main_process_affinity() {
                extras.push(vec![node]);
            } else {
                kept.push(node);
            }
        }
        if !kept.is_empty() {
            result.push(kept);
        }
    }

    result.extend(extras);
    result
}

/// Build the full segment plan from a topologically-sorted node list.
/// `num_workers` sizes every segment that doesn't run in the main process
/// and isn't rooted at an Extractor (spec.md §4.2, §5).
pub fn plan<I: Item>(nodes: &[Node<I>], num_workers: usize) -> Vec<Segment<I>> {
    let mut groups = Vec::new();
    for bucket in split_by_affinity(nodes) {
        groups.extend(split_connected_components(&bucket));
    }
    let groups = enforce_extractor_singletons(groups);

    groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let run_in_main_process = group[0].main_process_affinity();
            let is_extractor_root = group[0].tag() == NodeKindTag::Extractor;
            let segment_num_workers = if run_in_main_process || is_extractor_root {
                1
            } else {
                num_workers
            };
            let node_ids = group.iter().filter_map(|n| n.id()).collect();

            Segment {
                id: format!("segment_{}", index + 1),
                nodes: group,
                node_ids,
                num_workers: segment_num_workers,
                run_in_main_process,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{connect, assign_names_and_ids, discover, topological_sort, Extract, ExtractorConfig, Load, ProcessorConfig, Transform};
    use anyhow::Result as AnyResult;

    #[derive(Clone)]
    struct Noop;
    impl Extract<i64> for Noop {
        fn extract(&mut self) -> AnyResult<Option<i64>> {
            Ok(None)
        }
    }
    impl Transform<i64> for Noop {
        fn transform(&mut self, item: i64) -> AnyResult<i64> {
            Ok(item)
        }
    }
    impl Load<i64> for Noop {
        fn load(&mut self, _item: i64) -> AnyResult<()> {
            Ok(())
        }
    }

    fn planned(nodes: &[Node<i64>], num_workers: usize) -> Vec<Segment<i64>> {
        assign_names_and_ids(nodes);
        let sorted = topological_sort(nodes);
        plan(&sorted, num_workers)
    }

    #[test]
    fn extractor_defaults_to_its_own_singleton_main_process_segment() {
        let e = Node::extractor(Noop);
        let t = Node::transformer_with_config(Noop, ProcessorConfig {
            main_process_affinity: false,
            ..Default::default()
        });
        connect(e.clone(), t.clone()).unwrap();

        let nodes = discover(&[e.clone()]);
        let segments = planned(&nodes, 4);

        assert_eq!(segments.len(), 2);
        assert!(segments[0].contains(&e));
        assert_eq!(segments[0].num_workers, 1);
        assert!(segments[0].run_in_main_process);
        assert!(segments[1].contains(&t));
        assert_eq!(segments[1].num_workers, 4);
        assert!(!segments[1].run_in_main_process);
    }

    #[test]
    fn non_main_process_extractor_forced_into_its_own_segment() {
        let e = Node::extractor_with_config(Noop, ExtractorConfig {
            batch_size: None,
            main_process_affinity: false,
        });
        let t = Node::transformer_with_config(Noop, ProcessorConfig {
            main_process_affinity: false,
            ..Default::default()
        });
        connect(e.clone(), t.clone()).unwrap();

        let nodes = discover(&[e.clone()]);
        let segments = planned(&nodes, 3);

        let extractor_segment = segments.iter().find(|s| s.contains(&e)).unwrap();
        assert_eq!(extractor_segment.nodes.len(), 1);
        assert_eq!(extractor_segment.num_workers, 1);
    }

    #[test]
    fn consecutive_same_affinity_nodes_share_one_segment() {
        let e = Node::extractor(Noop);
        let t1 = Node::transformer_with_config(Noop, ProcessorConfig {
            main_process_affinity: false,
            ..Default::default()
        });
        let t2 = Node::transformer_with_config(Noop, ProcessorConfig {
            main_process_affinity: false,
            ..Default::default()
        });
        let l = Node::loader_with_config(Noop, ProcessorConfig {
            main_process_affinity: false,
            ..Default::default()
        }, Default::default());
        connect(e.clone(), t1.clone()).unwrap();
        connect(t1.clone(), t2.clone()).unwrap();
        connect(t2.clone(), l.clone()).unwrap();

        let nodes = discover(&[e.clone()]);
        let segments = planned(&nodes, 2);

        assert_eq!(segments.len(), 2);
        let worker_segment = segments.iter().find(|s| s.contains(&t1)).unwrap();
        assert!(worker_segment.contains(&t2));
        assert!(worker_segment.contains(&l));
        assert_eq!(worker_segment.num_workers, 2);
    }
}
