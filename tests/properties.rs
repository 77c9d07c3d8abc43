//! Property tests for the graph/connection-algebra and queue invariants
//! listed among the engine's testable properties (duplicate-connection
//! rejection, DAG discovery never revisiting a node, sentinel conservation).

use anyhow::Result as AnyResult;
use proptest::prelude::*;

use conflux::graph::discover;
use conflux::queue::{Queue, QueueScope};
use conflux::{connect, Extract, Node};

#[derive(Clone)]
struct Noop;
impl Extract<i64> for Noop {
    fn extract(&mut self) -> AnyResult<Option<i64>> {
        Ok(None)
    }
}

fn chain(len: usize) -> Vec<Node<i64>> {
    let nodes: Vec<Node<i64>> = (0..len).map(|_| Node::extractor(Noop)).collect();
    for pair in nodes.windows(2) {
        connect(pair[0].clone(), pair[1].clone()).unwrap();
    }
    nodes
}

proptest! {
    /// Discovery never revisits a node: for any chain length, the ordered
    /// node list discovery returns has exactly that many distinct entries.
    #[test]
    fn discovery_visits_every_node_exactly_once(len in 1usize..30) {
        let nodes = chain(len);
        let found = discover(&nodes[0..1]);
        prop_assert_eq!(found.len(), len);

        let mut seen = std::collections::HashSet::new();
        for n in &found {
            prop_assert!(seen.insert(n.clone()), "node revisited during discovery");
        }
    }

    /// Connecting the same (origin, target) pair twice always raises, and
    /// leaves the origin's recorded outputs unchanged.
    #[test]
    fn duplicate_connection_is_rejected_and_graph_is_unchanged(len in 2usize..10) {
        let nodes = chain(len);
        let origin = nodes[0].clone();
        let target = nodes[1].clone();

        let before = origin.outputs().len();
        let err = connect(origin.clone(), target).err();
        prop_assert!(err.is_some());
        prop_assert_eq!(origin.outputs().len(), before);
    }

    /// A queue's sentinel count always matches the number of consumers it
    /// was told to expect, regardless of how many batches preceded them.
    #[test]
    fn sentinel_count_matches_registered_consumers(num_batches in 0usize..20, num_consumers in 1usize..6) {
        let queue: Queue<i64> = Queue::bounded(QueueScope::InGroup, 32.max(num_batches + 1));
        for i in 0..num_batches {
            queue.produce(vec![i as i64]).unwrap();
        }
        queue.finish_producing(num_consumers);

        let mut batches_seen = 0;
        let mut sentinels_seen = 0;
        loop {
            match queue.consume().unwrap() {
                Some(_) => batches_seen += 1,
                None => {
                    sentinels_seen += 1;
                    if sentinels_seen == num_consumers {
                        break;
                    }
                }
            }
        }
        prop_assert_eq!(batches_seen, num_batches);
        prop_assert_eq!(sentinels_seen, num_consumers);
    }
}
