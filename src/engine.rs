//! The top-level engine: builds a plan from a graph and runs it to
//! completion, grounded on `ETL.run()`'s orchestration sequence (build
//! segments, start the interruption handler, start the observers, start the
//! node workers, collect completions).
//!
//! "Out-of-process" segments are resolved here by hosting every segment
//! replica as a group of OS threads within the current process (see
//! `worker::segment_worker`). `Segment::num_workers`, planned by
//! [`crate::plan::plan`], is honored in full: one `run_segment_replica` is
//! spawned per replica. Queues crossing a segment boundary are shared by
//! every replica on both sides; queues internal to a segment are private
//! per replica, so parallel replicas of the same segment each build their
//! own local state while sharing the cross-group queues and flags.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineTunables;
use crate::error::{EngineError, NodeException, Result};
use crate::graph::{assign_names_and_ids, discover, topological_sort, Node, NodeId};
use crate::item::Bulkable;
use crate::observe::{counters_by_name, run_progress_observer, run_timings_observer};
use crate::plan::{plan, Segment};
use crate::queue::{Queue, QueueScope};
use crate::signal::SignalGuard;
use crate::sync::{Counter, EventFlag};
use crate::worker::{run_segment_replica, NodeWiring, SegmentOutcome};

/// Per-run options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Replica width handed to the planner for non-main-process,
    /// non-Extractor-rooted segments.
    pub num_workers: usize,
    /// Whether to time batches and run the timings observer.
    pub monitor_performance: bool,
    /// Whether to install OS termination-signal handling for this run.
    pub install_signal_handlers: bool,
    /// If a node raised, return `Err(ExecutionFailed)`. If `false`, a failed
    /// run is logged but `run` still returns `Ok(())`.
    pub raise_exception: bool,
    /// If the run was stopped by a signal and no node failed, return
    /// `Err(Interrupted)`. If `false`, the interruption is only logged.
    pub raise_exception_if_interrupted: bool,
    /// Whether to start the progress observer.
    pub show_progress: bool,
    /// Whether to emit the engine's own startup/summary info logs, on top
    /// of the always-on debug-level tracing each component does.
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            monitor_performance: false,
            install_signal_handlers: true,
            raise_exception: true,
            raise_exception_if_interrupted: true,
            show_progress: true,
            verbose: true,
        }
    }
}

/// An ETL engine bound to one graph and one set of tunables.
pub struct Engine<I: Bulkable> {
    roots: Vec<Node<I>>,
    tunables: EngineTunables,
}

/// One cross-segment queue's producer-side bookkeeping: the queue itself
/// and how many sentinels to post (the downstream segment's replica count),
/// posted once every replica of the producing segment has completed.
struct CrossGroupOutlet<I: Bulkable> {
    queue: Queue<I>,
    downstream_replicas: usize,
}

impl<I: Bulkable + 'static> Engine<I> {
    /// Build an engine from the root (no-input) nodes of a graph.
    pub fn new(roots: Vec<Node<I>>, tunables: EngineTunables) -> Self {
        Self { roots, tunables }
    }

    /// Run the graph to completion.
    ///
    /// Returns `Ok(())` on a clean finish (or a degraded one, per
    /// `raise_exception`/`raise_exception_if_interrupted`),
    /// `Err(EngineError::Interrupted)` if a termination signal stopped the
    /// run before any node failed, or `Err(EngineError::ExecutionFailed)`
    /// naming every node that raised.
    pub fn run(&self, options: RunOptions) -> Result<()> {
        let run_id = uuid::Uuid::new_v4();
        let _run_span = tracing::info_span!("conflux::run", run_id = %run_id).entered();

        let run_started = Instant::now();
        let nodes = discover(&self.roots);
        assign_names_and_ids(&nodes);
        let sorted = topological_sort(&nodes);
        let segments = plan(&sorted, options.num_workers.max(1));

        let segment_of: HashMap<NodeId, usize> = segments
            .iter()
            .enumerate()
            .flat_map(|(idx, seg)| seg.nodes.iter().map(move |n| (n.id().unwrap(), idx)))
            .collect();

        if options.verbose {
            for segment in &segments {
                tracing::info!(
                    target: "conflux::engine",
                    segment = %segment.id,
                    nodes = segment.nodes.len(),
                    replicas = segment.num_workers,
                    main_process = segment.run_in_main_process,
                    "segment planned"
                );
            }
        }

        let (in_group_queues, cross_queues, cross_outlets_by_segment) =
            self.build_queues(&sorted, &segment_of, &segments);

        let counters: HashMap<NodeId, Counter> = sorted
            .iter()
            .filter(|n| n.is_terminal_loader())
            .map(|n| (n.id().unwrap(), Counter::new()))
            .collect();

        let name_by_id: HashMap<NodeId, String> =
            sorted.iter().map(|n| (n.id().unwrap(), n.name().unwrap())).collect();

        let stop_event = EventFlag::cross_group();
        let pause_event = EventFlag::cross_group();
        let finalize_event = EventFlag::in_group();

        let signal_guard = options
            .install_signal_handlers
            .then(|| SignalGuard::install(stop_event.clone()));

        let (timing_tx, timing_rx) = crossbeam_channel::unbounded();

        let timings_handle = {
            let name_by_id = name_by_id.clone();
            let stop_event = stop_event.clone();
            let refresh = Duration::from_secs_f64(self.tunables.timings_refresh_interval_secs);
            let capacity = self.tunables.timings_ring_buffer_capacity;
            thread::Builder::new()
                .name("conflux-timings".into())
                .spawn(move || run_timings_observer(&name_by_id, &timing_rx, &stop_event, refresh, capacity))
                .expect("failed to spawn the timings observer thread")
        };

        let progress_handle = options.show_progress.then(|| {
            let by_name = counters_by_name(&counters, &name_by_id);
            let finalize_event = finalize_event.clone();
            let stop_event = stop_event.clone();
            let refresh = Duration::from_secs_f64(self.tunables.progress_refresh_interval_secs);
            thread::Builder::new()
                .name("conflux-progress".into())
                .spawn(move || run_progress_observer(&by_name, &finalize_event, &stop_event, refresh))
                .expect("failed to spawn the progress observer thread")
        });

        let default_batch_size = self.tunables.default_batch_size;
        let mut exceptions: HashMap<NodeId, NodeException> = HashMap::new();

        // Every segment replica, across every segment, is spawned before any
        // of them is awaited: a downstream segment's consumer threads must be
        // alive to drain its cross-group input queue while the upstream
        // segment is still producing into it, and an upstream segment's
        // producer threads must be alive to drain (eventually: be drained
        // from) its own bounded output queue. Joining one segment to
        // completion before spawning the next deadlocks as soon as either
        // side blocks on the other.
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<(usize, SegmentOutcome)>();
        let mut remaining_replicas: HashMap<usize, usize> = HashMap::new();
        let mut handles = Vec::new();
        let total_replicas: usize = segments.iter().map(|segment| segment.num_workers).sum();

        for (segment_idx, segment) in segments.iter().enumerate() {
            remaining_replicas.insert(segment_idx, segment.num_workers);

            for replica in 0..segment.num_workers {
                let wiring: HashMap<NodeId, NodeWiring<I>> = segment
                    .nodes
                    .iter()
                    .map(|node| {
                        let id = node.id().unwrap();
                        let input = node.input().and_then(|upstream| {
                            let upstream_id = upstream.id().unwrap();
                            if segment_of.get(&upstream_id) == Some(&segment_idx) {
                                in_group_queues.get(&(upstream_id, id.clone())).map(|qs| qs[replica].clone())
                            } else {
                                cross_queues.get(&(upstream_id, id.clone())).cloned()
                            }
                        });

                        let mut outputs = Vec::new();
                        let mut self_finish_outputs = Vec::new();
                        for target in node.outputs() {
                            let target_id = target.id().unwrap();
                            if segment_of.get(&target_id) == Some(&segment_idx) {
                                let q = in_group_queues[&(id.clone(), target_id)][replica].clone();
                                self_finish_outputs.push(q.clone());
                                outputs.push(q);
                            } else {
                                outputs.push(cross_queues[&(id.clone(), target_id)].clone());
                            }
                        }

                        (
                            id.clone(),
                            NodeWiring {
                                input,
                                outputs,
                                self_finish_outputs,
                                counter: counters.get(&id).cloned(),
                            },
                        )
                    })
                    .collect();

                let segment = segment.clone();
                let stop_event = stop_event.clone();
                let pause_event = pause_event.clone();
                let timing_tx = timing_tx.clone();
                let completion_tx = completion_tx.clone();
                let replica_id = format!("{}_replica_{}", segment.id, replica + 1);

                handles.push(
                    thread::Builder::new()
                        .name(replica_id.clone())
                        .spawn(move || {
                            let outcome = run_segment_replica(
                                &segment,
                                replica_id,
                                wiring,
                                stop_event,
                                pause_event,
                                options.monitor_performance,
                                timing_tx,
                                default_batch_size,
                            );
                            let _ = completion_tx.send((segment_idx, outcome));
                        })
                        .expect("failed to spawn segment worker thread"),
                );
            }
        }
        drop(completion_tx);

        for _ in 0..total_replicas {
            let (segment_idx, outcome) =
                completion_rx.recv().expect("segment completion channel closed before every replica reported");
            exceptions.extend(outcome.exceptions);

            let remaining = remaining_replicas.get_mut(&segment_idx).expect("segment index must be tracked");
            *remaining -= 1;
            if *remaining == 0 {
                // This segment's last replica just finished: every downstream
                // queue leaving it gets exactly one sentinel per downstream
                // replica.
                if let Some(outlets) = cross_outlets_by_segment.get(&segment_idx) {
                    for outlet in outlets {
                        outlet.queue.finish_producing(outlet.downstream_replicas);
                    }
                }
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        drop(timing_tx);

        finalize_event.raise();
        let _ = timings_handle.join();
        if let Some(progress_handle) = progress_handle {
            let _ = progress_handle.join();
        }
        drop(signal_guard);

        if !exceptions.is_empty() {
            let mut failing_nodes: Vec<String> = exceptions.keys().cloned().collect();
            failing_nodes.sort();
            tracing::error!(target: "conflux::engine", nodes = %failing_nodes.join(", "), "run failed");
            if !options.raise_exception {
                return Ok(());
            }
            let message = exceptions
                .values()
                .next()
                .map(|e| e.traceback())
                .unwrap_or_default();
            return Err(EngineError::ExecutionFailed { message, failing_nodes });
        }

        if stop_event.is_raised() {
            tracing::warn!(target: "conflux::engine", "run interrupted by a termination signal");
            return if options.raise_exception_if_interrupted {
                Err(EngineError::Interrupted)
            } else {
                Ok(())
            };
        }

        if options.verbose {
            tracing::info!(
                target: "conflux::engine",
                elapsed_secs = run_started.elapsed().as_secs_f64(),
                "run completed"
            );
        }

        Ok(())
    }

    /// Build every queue the plan needs:
    /// - `in_group_queues`: per (origin, target) edge staying within one
    ///   segment, one independent `Queue` per replica of that segment;
    /// - `cross_queues`: per edge crossing a segment boundary, a single
    ///   `Queue` shared by every replica on both ends;
    /// - `cross_outlets_by_segment`: for each segment, the cross-group
    ///   queues its nodes feed and how many sentinels each needs once every
    ///   replica of this segment has finished.
    #[allow(clippy::type_complexity)]
    fn build_queues(
        &self,
        nodes: &[Node<I>],
        segment_of: &HashMap<NodeId, usize>,
        segments: &[Segment<I>],
    ) -> (
        HashMap<(NodeId, NodeId), Vec<Queue<I>>>,
        HashMap<(NodeId, NodeId), Queue<I>>,
        HashMap<usize, Vec<CrossGroupOutlet<I>>>,
    ) {
        let mut in_group_queues = HashMap::new();
        let mut cross_queues = HashMap::new();
        let mut cross_outlets_by_segment: HashMap<usize, Vec<CrossGroupOutlet<I>>> = HashMap::new();

        for node in nodes {
            let origin_id = node.id().unwrap();
            let origin_segment = segment_of[&origin_id];

            for target in node.outputs() {
                let target_id = target.id().unwrap();
                let target_segment = segment_of[&target_id];
                let capacity = target.queue_max_size().unwrap_or(self.tunables.default_queue_max_size);

                if origin_segment == target_segment {
                    let replicas = segments[origin_segment].num_workers;
                    let queues: Vec<Queue<I>> = (0..replicas)
                        .map(|_| Queue::bounded(QueueScope::InGroup, capacity))
                        .collect();
                    in_group_queues.insert((origin_id.clone(), target_id), queues);
                } else {
                    let queue = Queue::bounded(QueueScope::CrossGroup, capacity);
                    cross_outlets_by_segment.entry(origin_segment).or_default().push(CrossGroupOutlet {
                        queue: queue.clone(),
                        downstream_replicas: segments[target_segment].num_workers,
                    });
                    cross_queues.insert((origin_id.clone(), target_id), queue);
                }
            }
        }

        (in_group_queues, cross_queues, cross_outlets_by_segment)
    }
}
