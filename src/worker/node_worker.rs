//! Per-node worker loops, grounded on `node_worker.py`'s `ExtractorWorker`
//! / `ProcessorWorker` / `BulkerWorker` / `DeBulkerWorker`.
//!
//! Each `run_*` function owns a single node's behavior for the lifetime of
//! one worker thread: it calls `start()`, loops batches through the user
//! hook, then `finalize()` or `handle_exception()`. The first exception
//! captured during the loop wins and is returned to the caller; later
//! exceptions are swallowed once one is already recorded, matching
//! `NodeWorker._handle_exception`'s "don't replace original exception".

use std::time::Instant;

use crossbeam_channel::Sender;

use crate::error::{Action, NodeException};
use crate::graph::{Node, NodeBehavior, NodeConfig, NodeId, NodeKindTag};
use crate::item::{Bulkable, Item};
use crate::queue::Queue;
use crate::sync::{Counter, EventFlag};

/// A timing sample: the node that produced it, and the per-item duration
/// in seconds.
pub type TimingSample = (NodeId, f64);

fn produce_to_outputs<I: Item>(outputs: &[Queue<I>], batch: &[I]) -> anyhow::Result<()> {
    for out in outputs {
        out.produce(batch.to_vec())
            .map_err(|_| anyhow::anyhow!("downstream queue for node has no active consumers"))?;
    }
    Ok(())
}

fn node_value<I: Item>(item: &I, input_key: &Option<String>) -> I {
    match input_key {
        Some(key) => item.project(key).unwrap_or_else(|| item.clone()),
        None => item.clone(),
    }
}

/// Run an Extractor node to completion.
///
/// Returns the captured exception, if any. `outputs` fans out every
/// produced batch; `timing_tx` receives one `(node_id, seconds_per_item)`
/// sample per batch when `monitor_performance` is set.
pub fn run_extractor<I: Item>(
    node: &Node<I>,
    outputs: &[Queue<I>],
    stop_event: &EventFlag,
    pause_event: &EventFlag,
    monitor_performance: bool,
    timing_tx: &Sender<TimingSample>,
    default_batch_size: usize,
) -> Option<NodeException> {
    let node_id = node.id().expect("node must be planned before it can run");
    let mut behavior = match node.spawn_behavior() {
        NodeBehavior::Extractor(behavior) => behavior,
        _ => unreachable!("run_extractor called on a non-extractor node"),
    };
    let batch_size = match node.config() {
        NodeConfig::Extractor(cfg) => cfg.batch_size.unwrap_or(default_batch_size),
        _ => default_batch_size,
    };

    if let Err(e) = behavior.start() {
        let exception = NodeException::new(node_id.clone(), Action::Start, e);
        let _ = behavior.handle_exception(&exception);
        return Some(exception);
    }

    let mut exception: Option<NodeException> = None;

    'outer: loop {
        if stop_event.is_raised() {
            break;
        }
        pause_event.wait_until_lowered();

        let start = monitor_performance.then(Instant::now);
        let mut batch = Vec::with_capacity(batch_size);
        let mut exhausted = false;

        while batch.len() < batch_size {
            match behavior.extract() {
                Ok(Some(item)) => batch.push(item),
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    exception = Some(NodeException::new(node_id.clone(), Action::GenerateBatch, e));
                    break 'outer;
                }
            }
        }

        if !batch.is_empty() {
            if let Err(e) = produce_to_outputs(outputs, &batch) {
                exception = Some(NodeException::new(node_id.clone(), Action::ProduceBatch, e));
                break;
            }
            if let Some(start) = start {
                let timing = start.elapsed().as_secs_f64() / batch.len() as f64;
                if timing_tx.send((node_id.clone(), timing)).is_err() {
                    exception = Some(NodeException::new(
                        node_id.clone(),
                        Action::ProduceTiming,
                        anyhow::anyhow!("timings observer channel closed"),
                    ));
                    break;
                }
            }
        }

        if exhausted {
            break;
        }
    }

    let result = if let Some(exc) = &exception {
        behavior.handle_exception(exc)
    } else {
        behavior.finalize()
    };
    if let Err(e) = result {
        if exception.is_none() {
            exception = Some(NodeException::new(node_id, Action::Finalize, e));
        }
    }
    exception
}

/// Run a Transformer/Filter/Loader node to completion.
///
/// On a consume error (the input queue disconnected without ever sending a
/// sentinel) the loop raises `stop_event` and terminates immediately,
/// rather than retrying forever on a channel that will never recover.
#[allow(clippy::too_many_arguments)]
pub fn run_processor<I: Item>(
    node: &Node<I>,
    input: &Queue<I>,
    outputs: &[Queue<I>],
    counter: Option<&Counter>,
    stop_event: &EventFlag,
    pause_event: &EventFlag,
    monitor_performance: bool,
    timing_tx: &Sender<TimingSample>,
) -> Option<NodeException> {
    let node_id = node.id().expect("node must be planned before it can run");

    match node.spawn_behavior() {
        NodeBehavior::Transformer(mut transform) => {
            let input_key = match node.config() {
                NodeConfig::Transformer(cfg) => cfg.input_key.clone(),
                _ => None,
            };
            if let Err(e) = transform.start() {
                let exception = NodeException::new(node_id.clone(), Action::Start, e);
                let _ = transform.handle_exception(&exception);
                return Some(exception);
            }

            let exception = run_processor_loop(
                &node_id,
                input,
                outputs,
                counter,
                stop_event,
                pause_event,
                monitor_performance,
                timing_tx,
                |batch| {
                    batch
                        .into_iter()
                        .map(|item| transform.transform(node_value(&item, &input_key)))
                        .collect()
                },
            );

            let result = if let Some(exc) = &exception {
                transform.handle_exception(exc)
            } else {
                transform.finalize()
            };
            finalize_tail(node_id, exception, result)
        }
        NodeBehavior::Filter(mut filter) => {
            // extra.disable_safe_copy is read but has no effect to act on: I::clone()
            // already produces an independently owned value for every sibling output
            // (see produce_to_outputs), so there is no aliasing here to disable safety
            // against in the first place.
            let (input_key, filter_value) = match node.config() {
                NodeConfig::Filter(cfg, extra) => {
                    let _ = extra.disable_safe_copy;
                    (cfg.input_key.clone(), extra.filter_value.clone())
                }
                _ => (None, None),
            };
            if let Err(e) = filter.start() {
                let exception = NodeException::new(node_id.clone(), Action::Start, e);
                let _ = filter.handle_exception(&exception);
                return Some(exception);
            }

            let exception = run_processor_loop(
                &node_id,
                input,
                outputs,
                counter,
                stop_event,
                pause_event,
                monitor_performance,
                timing_tx,
                |batch| {
                    let mut kept = Vec::with_capacity(batch.len());
                    for item in batch {
                        let value = node_value(&item, &input_key);
                        let computed = filter.filter(&value)?;
                        if computed != filter_value {
                            kept.push(item);
                        }
                    }
                    Ok(kept)
                },
            );

            let result = if let Some(exc) = &exception {
                filter.handle_exception(exc)
            } else {
                filter.finalize()
            };
            finalize_tail(node_id, exception, result)
        }
        NodeBehavior::Loader(mut loader) => {
            // Same reasoning as the Filter arm above: extra.disable_safe_copy has
            // nothing to disable under Rust's value-ownership model.
            let input_key = match node.config() {
                NodeConfig::Loader(cfg, extra) => {
                    let _ = extra.disable_safe_copy;
                    cfg.input_key.clone()
                }
                _ => None,
            };
            if let Err(e) = loader.start() {
                let exception = NodeException::new(node_id.clone(), Action::Start, e);
                let _ = loader.handle_exception(&exception);
                return Some(exception);
            }

            let exception = run_processor_loop(
                &node_id,
                input,
                outputs,
                counter,
                stop_event,
                pause_event,
                monitor_performance,
                timing_tx,
                |batch| {
                    for item in &batch {
                        loader.load(node_value(item, &input_key))?;
                    }
                    Ok(batch)
                },
            );

            let result = if let Some(exc) = &exception {
                loader.handle_exception(exc)
            } else {
                loader.finalize()
            };
            finalize_tail(node_id, exception, result)
        }
        _ => unreachable!("run_processor called on a node that isn't a Transformer/Filter/Loader"),
    }
}

fn finalize_tail(
    node_id: NodeId,
    mut exception: Option<NodeException>,
    finalize_result: anyhow::Result<()>,
) -> Option<NodeException> {
    if let Err(e) = finalize_result {
        if exception.is_none() {
            exception = Some(NodeException::new(node_id, Action::Finalize, e));
        }
    }
    exception
}

#[allow(clippy::too_many_arguments)]
fn run_processor_loop<I: Item>(
    node_id: &NodeId,
    input: &Queue<I>,
    outputs: &[Queue<I>],
    counter: Option<&Counter>,
    stop_event: &EventFlag,
    pause_event: &EventFlag,
    monitor_performance: bool,
    timing_tx: &Sender<TimingSample>,
    mut process: impl FnMut(Vec<I>) -> anyhow::Result<Vec<I>>,
) -> Option<NodeException> {
    let mut exception: Option<NodeException> = None;
    let mut skip_processing = false;

    loop {
        let batch = match input.consume() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(_) => {
                if exception.is_none() {
                    exception = Some(NodeException::new(
                        node_id.clone(),
                        Action::ConsumeBatch,
                        anyhow::anyhow!("input queue disconnected without a sentinel"),
                    ));
                }
                stop_event.raise();
                break;
            }
        };

        if stop_event.is_raised() {
            skip_processing = true;
        }
        if skip_processing {
            continue;
        }

        pause_event.wait_until_lowered();

        let start = monitor_performance.then(Instant::now);
        match process(batch) {
            Ok(processed) => {
                if let Some(start) = start {
                    if !processed.is_empty() {
                        let timing = start.elapsed().as_secs_f64() / processed.len() as f64;
                        if timing_tx.send((node_id.clone(), timing)).is_err() {
                            if exception.is_none() {
                                exception = Some(NodeException::new(
                                    node_id.clone(),
                                    Action::ProduceTiming,
                                    anyhow::anyhow!("timings observer channel closed"),
                                ));
                            }
                            stop_event.raise();
                            skip_processing = true;
                        }
                    }
                }
                if let Err(e) = produce_to_outputs(outputs, &processed) {
                    if exception.is_none() {
                        exception = Some(NodeException::new(node_id.clone(), Action::ProduceBatch, e));
                    }
                    stop_event.raise();
                    skip_processing = true;
                    continue;
                }
                if let Some(counter) = counter {
                    counter.increase(processed.len() as u64);
                }
            }
            Err(e) => {
                if exception.is_none() {
                    exception = Some(NodeException::new(node_id.clone(), Action::ProcessBatch, e));
                }
                stop_event.raise();
                skip_processing = true;
            }
        }
    }

    exception
}

/// Run a Bulker node to completion: accumulates items across incoming
/// batches and emits one fixed-size chunk per full `target_bulk_size`
/// group, each represented as a single aggregate item via [`Bulkable::bulk`].
/// Any partial remainder accumulated so far is flushed on stream end.
pub fn run_bulker<I: Bulkable>(
    node: &Node<I>,
    input: &Queue<I>,
    outputs: &[Queue<I>],
    stop_event: &EventFlag,
    pause_event: &EventFlag,
) -> Option<NodeException> {
    let node_id = node.id().expect("node must be planned before it can run");
    let target_bulk_size = match node.config() {
        NodeConfig::Bulker(cfg) => cfg.target_bulk_size.max(1),
        _ => 1,
    };

    let mut bulk: Vec<I> = Vec::new();
    let mut exception: Option<NodeException> = None;
    let mut skip_processing = false;

    loop {
        let batch = match input.consume() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(_) => {
                if exception.is_none() {
                    exception = Some(NodeException::new(
                        node_id.clone(),
                        Action::ConsumeBatch,
                        anyhow::anyhow!("input queue disconnected without a sentinel"),
                    ));
                }
                stop_event.raise();
                break;
            }
        };

        if stop_event.is_raised() {
            skip_processing = true;
        }
        if skip_processing {
            continue;
        }

        pause_event.wait_until_lowered();

        bulk.extend(batch);
        while bulk.len() >= target_bulk_size && exception.is_none() {
            let remainder = bulk.split_off(target_bulk_size);
            let chunk = std::mem::replace(&mut bulk, remainder);
            if let Err(e) = produce_to_outputs(outputs, &[I::bulk(chunk)]) {
                exception = Some(NodeException::new(node_id.clone(), Action::ProduceBatch, e));
                stop_event.raise();
                skip_processing = true;
            }
        }
    }

    if !bulk.is_empty() && exception.is_none() {
        if let Err(e) = produce_to_outputs(outputs, &[I::bulk(bulk)]) {
            exception = Some(NodeException::new(node_id.clone(), Action::ProduceBatch, e));
        }
    }

    exception
}

/// Run a DeBulker node to completion (spec.md §4.9): every incoming item is
/// unpacked via [`Bulkable::unbulk`] and its pieces are each re-emitted as
/// their own single-item batch, fanning one aggregate item back out into
/// many.
pub fn run_debulker<I: Bulkable>(
    node: &Node<I>,
    input: &Queue<I>,
    outputs: &[Queue<I>],
    stop_event: &EventFlag,
    pause_event: &EventFlag,
) -> Option<NodeException> {
    let node_id = node.id().expect("node must be planned before it can run");
    let mut exception: Option<NodeException> = None;
    let mut skip_processing = false;

    'outer: loop {
        let batch = match input.consume() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(_) => {
                if exception.is_none() {
                    exception = Some(NodeException::new(
                        node_id.clone(),
                        Action::ConsumeBatch,
                        anyhow::anyhow!("input queue disconnected without a sentinel"),
                    ));
                }
                stop_event.raise();
                break;
            }
        };

        if stop_event.is_raised() {
            skip_processing = true;
        }
        if skip_processing {
            continue;
        }

        pause_event.wait_until_lowered();

        for item in batch {
            for piece in item.unbulk() {
                if let Err(e) = produce_to_outputs(outputs, &[piece]) {
                    exception = Some(NodeException::new(node_id.clone(), Action::ProduceBatch, e));
                    stop_event.raise();
                    skip_processing = true;
                    continue 'outer;
                }
            }
        }
    }

    exception
}

/// Dispatch a node to the worker function matching its kind. Callers
/// (segment workers) use this instead of branching on `NodeKindTag`
/// themselves.
#[allow(clippy::too_many_arguments)]
pub fn run_node<I: Bulkable>(
    node: &Node<I>,
    input: Option<&Queue<I>>,
    outputs: &[Queue<I>],
    counter: Option<&Counter>,
    stop_event: &EventFlag,
    pause_event: &EventFlag,
    monitor_performance: bool,
    timing_tx: &Sender<TimingSample>,
    default_batch_size: usize,
) -> Option<NodeException> {
    match node.tag() {
        NodeKindTag::Extractor => {
            run_extractor(node, outputs, stop_event, pause_event, monitor_performance, timing_tx, default_batch_size)
        }
        NodeKindTag::Transformer | NodeKindTag::Filter | NodeKindTag::Loader => run_processor(
            node,
            input.expect("processor nodes always have an input queue"),
            outputs,
            counter,
            stop_event,
            pause_event,
            monitor_performance,
            timing_tx,
        ),
        NodeKindTag::Bulker => run_bulker(
            node,
            input.expect("bulker nodes always have an input queue"),
            outputs,
            stop_event,
            pause_event,
        ),
        NodeKindTag::DeBulker => run_debulker(
            node,
            input.expect("debulker nodes always have an input queue"),
            outputs,
            stop_event,
            pause_event,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Extract, Load, Transform};
    use crate::queue::QueueScope;
    use anyhow::Result as AnyResult;

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
    struct Double;
    impl Transform<i64> for Double {
        fn transform(&mut self, item: i64) -> AnyResult<i64> {
            Ok(item * 2)
        }
    }

    #[derive(Clone)]
    struct Sink {
        seen: std::sync::Arc<std::sync::Mutex<Vec<i64>>>,
    }
    impl Load<i64> for Sink {
        fn load(&mut self, item: i64) -> AnyResult<()> {
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[test]
    fn extractor_emits_batches_then_sentinel() {
        let node = Node::extractor(Counting { remaining: 5 });
        node.assign_id("node_1".into());
        let out: Queue<i64> = Queue::bounded(QueueScope::InGroup, 16);
        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let (tx, _rx) = crossbeam_channel::unbounded();

        let result = run_extractor(&node, &[out.clone()], &stop, &pause, false, &tx, 2);
        assert!(result.is_none());
        out.finish_producing(1);

        let mut collected = Vec::new();
        while let Some(batch) = out.consume().unwrap() {
            collected.extend(batch);
        }
        assert_eq!(collected, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn transformer_doubles_every_item() {
        let node = Node::transformer(Double);
        node.assign_id("node_2".into());
        let input: Queue<i64> = Queue::bounded(QueueScope::InGroup, 16);
        let output: Queue<i64> = Queue::bounded(QueueScope::InGroup, 16);

        input.produce(vec![1, 2, 3]).unwrap();
        input.finish_producing(1);

        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let (tx, _rx) = crossbeam_channel::unbounded();

        let result = run_processor(&node, &input, &[output.clone()], None, &stop, &pause, false, &tx);
        assert!(result.is_none());
        output.finish_producing(1);

        assert_eq!(output.consume().unwrap(), Some(vec![2, 4, 6]));
    }

    #[test]
    fn loader_invokes_load_for_every_item() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let node = Node::loader(Sink { seen: seen.clone() });
        node.assign_id("node_3".into());
        let input: Queue<i64> = Queue::bounded(QueueScope::InGroup, 16);
        input.produce(vec![10, 20]).unwrap();
        input.finish_producing(1);

        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let (tx, _rx) = crossbeam_channel::unbounded();

        let result = run_processor(&node, &input, &[], None, &stop, &pause, false, &tx);
        assert!(result.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn extractor_start_failure_short_circuits() {
        #[derive(Clone)]
        struct Failing;
        impl Extract<i64> for Failing {
            fn start(&mut self) -> AnyResult<()> {
                anyhow::bail!("boom")
            }
            fn extract(&mut self) -> AnyResult<Option<i64>> {
                Ok(None)
            }
        }
        let node = Node::extractor(Failing);
        node.assign_id("node_1".into());
        let out: Queue<i64> = Queue::bounded(QueueScope::InGroup, 4);
        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let (tx, _rx) = crossbeam_channel::unbounded();

        let result = run_extractor(&node, &[out], &stop, &pause, false, &tx, 2);
        assert!(result.is_some());
        assert_eq!(result.unwrap().action, Action::Start);
    }

    #[test]
    fn bulker_emits_full_chunks_and_flushes_remainder() {
        use serde_json::{json, Value};

        let node: Node<Value> = Node::bulker(crate::graph::BulkerConfig {
            target_bulk_size: 2,
            main_process_affinity: false,
        });
        node.assign_id("node_4".into());
        let input: Queue<Value> = Queue::bounded(QueueScope::InGroup, 16);
        let output: Queue<Value> = Queue::bounded(QueueScope::InGroup, 16);
        input.produce(vec![json!(1), json!(2), json!(3)]).unwrap();
        input.finish_producing(1);

        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let result = run_bulker(&node, &input, &[output.clone()], &stop, &pause);
        assert!(result.is_none());
        output.finish_producing(1);

        assert_eq!(output.consume().unwrap(), Some(vec![json!([1, 2])]));
        assert_eq!(output.consume().unwrap(), Some(vec![json!([3])]));
    }

    #[test]
    fn debulker_fans_out_every_piece() {
        use serde_json::{json, Value};

        let node: Node<Value> = Node::debulker(crate::graph::DeBulkerConfig {
            main_process_affinity: false,
        });
        node.assign_id("node_5".into());
        let input: Queue<Value> = Queue::bounded(QueueScope::InGroup, 16);
        let output: Queue<Value> = Queue::bounded(QueueScope::InGroup, 16);
        input.produce(vec![json!([1, 2, 3])]).unwrap();
        input.finish_producing(1);

        let stop = EventFlag::new();
        let pause = EventFlag::new();
        let result = run_debulker(&node, &input, &[output.clone()], &stop, &pause);
        assert!(result.is_none());
        output.finish_producing(1);

        let mut collected = Vec::new();
        while let Some(batch) = output.consume().unwrap() {
            collected.extend(batch);
        }
        assert_eq!(collected, vec![json!(1), json!(2), json!(3)]);
    }
}
