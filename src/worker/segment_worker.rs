//! Segment worker: hosts one replica of a [`crate::plan::Segment`]'s nodes
//! as a thread per node, grounded on `ETLWorker` / `ETLWorkerThread`.
//!
//! Every segment replica is a plain OS thread in this process (see the
//! engine's docs on "out-of-process" segments): a process/thread duality
//! collapses to "thread" only here, since node callbacks are blocking Rust
//! closures rather than picklable callables that could be shipped to a
//! subprocess.

use std::collections::HashMap;
use std::thread;

use crossbeam_channel::Sender;

use crate::error::NodeException;
use crate::graph::{Node, NodeId};
use crate::item::Bulkable;
use crate::plan::Segment;
use crate::queue::Queue;
use crate::sync::{Counter, EventFlag};

use super::node_worker::{run_node, TimingSample};

/// The per-node wiring a segment worker needs: its input queue (`None` for
/// an Extractor), its output queues in `node.outputs()` order, the subset of
/// those that terminate inside this same replica (and so get their sentinel
/// posted by this replica rather than by the engine, see below), and its
/// counter (only terminal Loaders have one).
pub struct NodeWiring<I: Bulkable> {
    pub input: Option<Queue<I>>,
    pub outputs: Vec<Queue<I>>,
    pub self_finish_outputs: Vec<Queue<I>>,
    pub counter: Option<Counter>,
}

/// Outcome of one segment replica's run: every node's captured exception,
/// keyed by node id (absent = that node finished cleanly).
pub struct SegmentOutcome {
    pub segment_id: String,
    pub replica_id: String,
    pub exceptions: HashMap<NodeId, NodeException>,
}

/// Run one replica of a segment to completion, hosting each of its nodes as
/// its own thread and waiting for all of them to finish before reporting.
///
/// When a node finishes, its output queues that terminate *within this
/// segment* (i.e. feed another node hosted by this same replica) receive
/// their sentinel here; queues crossing a segment boundary are finished by
/// the engine once every replica of the upstream segment has completed.
pub fn run_segment_replica<I: Bulkable + 'static>(
    segment: &Segment<I>,
    replica_id: String,
    wiring: HashMap<NodeId, NodeWiring<I>>,
    stop_event: EventFlag,
    pause_event: EventFlag,
    monitor_performance: bool,
    timing_tx: Sender<TimingSample>,
    default_batch_size: usize,
) -> SegmentOutcome {
    let mut handles = Vec::with_capacity(segment.nodes.len());

    for node in &segment.nodes {
        let node_id = node.id().expect("node must be planned before running");
        let node: Node<I> = node.clone();
        let NodeWiring { input, outputs, self_finish_outputs, counter } = wiring
            .get(&node_id)
            .map(|w| NodeWiring {
                input: w.input.clone(),
                outputs: w.outputs.clone(),
                self_finish_outputs: w.self_finish_outputs.clone(),
                counter: w.counter.clone(),
            })
            .unwrap_or(NodeWiring {
                input: None,
                outputs: Vec::new(),
                self_finish_outputs: Vec::new(),
                counter: None,
            });

        let stop_event = stop_event.clone();
        let pause_event = pause_event.clone();
        let timing_tx = timing_tx.clone();

        let handle = thread::Builder::new()
            .name(node_id.clone())
            .spawn(move || {
                let exception = run_node(
                    &node,
                    input.as_ref(),
                    &outputs,
                    counter.as_ref(),
                    &stop_event,
                    &pause_event,
                    monitor_performance,
                    &timing_tx,
                    default_batch_size,
                );
                // Tell any downstream node hosted in this same replica that
                // no more batches are coming on this edge. Cross-segment
                // outputs are finished by the engine once every replica of
                // this segment has completed (see engine.rs).
                for out in &self_finish_outputs {
                    out.finish_producing(1);
                }
                (node_id, exception)
            })
            .expect("failed to spawn node worker thread");

        handles.push(handle);
    }

    let mut exceptions = HashMap::new();
    for handle in handles {
        let (node_id, exception) = handle.join().unwrap_or_else(|_panic| {
            tracing::error!(target: "conflux::engine", "node worker thread panicked");
            (String::from("unknown"), None)
        });
        if let Some(exception) = exception {
            exceptions.insert(node_id, exception);
        }
    }

    SegmentOutcome {
        segment_id: segment.id.clone(),
        replica_id,
        exceptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{assign_names_and_ids, discover, Extract, Load, Transform};
    use crate::plan::plan;
    use crate::queue::QueueScope;
    use anyhow::Result as AnyResult;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Counting {
        remaining: i64,
    }
    impl Extract<i64> for Counting {
        fn extract(&mut self) -> AnyResult<Option<i64>> {
            if self.remaining <= 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(self.remaining))
        }
    }

    #[derive(Clone)]
    struct Identity;
    impl Transform<i64> for Identity {
        fn transform(&mut self, item: i64) -> AnyResult<i64> {
            Ok(item)
        }
    }

    #[derive(Clone)]
    struct Sink {
        seen: Arc<Mutex<Vec<i64>>>,
    }
    impl Load<i64> for Sink {
        fn load(&mut self, item: i64) -> AnyResult<()> {
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[test]
    fn single_node_segment_runs_cleanly() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let loader = Node::loader(Sink { seen: seen.clone() });
        assign_names_and_ids(&[loader.clone()]);

        let nodes = discover(&[loader.clone()]);
        let segments = plan(&nodes, 1);
        let segment = &segments[0];

        let input: Queue<i64> = Queue::bounded(QueueScope::InGroup, 8);
        input.produce(vec![1, 2, 3]).unwrap();
        input.finish_producing(1);

        let mut wiring = HashMap::new();
        wiring.insert(
            loader.id().unwrap(),
            NodeWiring {
                input: Some(input),
                outputs: Vec::new(),
                self_finish_outputs: Vec::new(),
                counter: None,
            },
        );

        let (tx, _rx) = crossbeam_channel::unbounded();
        let outcome = run_segment_replica(
            segment,
            "replica_1".into(),
            wiring,
            EventFlag::new(),
            EventFlag::new(),
            false,
            tx,
            1000,
        );

        assert!(outcome.exceptions.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn in_segment_sentinel_propagates_between_nodes() {
        let sink = Node::loader(Sink { seen: Arc::new(Mutex::new(Vec::new())) });
        let t = Node::transformer(Identity);
        crate::graph::connect(t.clone(), sink.clone()).unwrap();
        assign_names_and_ids(&[t.clone(), sink.clone()]);

        let nodes = discover(&[t.clone()]);
        let segments = plan(&nodes, 1);
        let segment = &segments[0];

        let t_input: Queue<i64> = Queue::bounded(QueueScope::InGroup, 8);
        let t_to_sink: Queue<i64> = Queue::bounded(QueueScope::InGroup, 8);
        t_input.produce(vec![9]).unwrap();
        t_input.finish_producing(1);

        let mut wiring = HashMap::new();
        wiring.insert(
            t.id().unwrap(),
            NodeWiring {
                input: Some(t_input),
                outputs: vec![t_to_sink.clone()],
                self_finish_outputs: vec![t_to_sink.clone()],
                counter: None,
            },
        );
        wiring.insert(
            sink.id().unwrap(),
            NodeWiring {
                input: Some(t_to_sink),
                outputs: Vec::new(),
                self_finish_outputs: Vec::new(),
                counter: None,
            },
        );

        let (tx, _rx) = crossbeam_channel::unbounded();
        let outcome = run_segment_replica(
            segment,
            "replica_1".into(),
            wiring,
            EventFlag::new(),
            EventFlag::new(),
            false,
            tx,
            1000,
        );

        assert!(outcome.exceptions.is_empty());
    }
}
