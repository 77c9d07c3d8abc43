//! Progress observer: periodically logs cumulative per-Loader item counts
//! until the run finishes, grounded on `ProgressThread`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::graph::NodeId;
use crate::sync::{Counter, EventFlag};

fn format_elapsed(elapsed: Duration) -> String {
    let total_seconds = elapsed.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Poll `counter_by_name` every `refresh_interval` and log whenever the
/// snapshot changes, until `finalize_event` or `stop_event` is raised, then
/// emit one final `[FINISHED]` log (unless the run was stopped).
pub fn run_progress_observer(
    counter_by_name: &HashMap<String, Counter>,
    finalize_event: &EventFlag,
    stop_event: &EventFlag,
    refresh_interval: Duration,
) {
    let start = Instant::now();
    let mut last_state = snapshot(counter_by_name);

    while !finalize_event.is_raised() && !stop_event.is_raised() {
        let new_state = snapshot(counter_by_name);
        if new_state != last_state {
            last_state = new_state;
            log_progress(counter_by_name, start.elapsed(), false);
        }
        std::thread::sleep(refresh_interval);
    }

    if !stop_event.is_raised() {
        log_progress(counter_by_name, start.elapsed(), true);
    }
}

fn snapshot(counter_by_name: &HashMap<String, Counter>) -> HashMap<String, u64> {
    counter_by_name.iter().map(|(name, counter)| (name.clone(), counter.value())).collect()
}

fn log_progress(counter_by_name: &HashMap<String, Counter>, elapsed: Duration, last: bool) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let mut lines = if last {
        format!("[{now}] [FINISHED] progress:\n")
    } else {
        format!("[{now}] ET: {} | Loaded items:\n", format_elapsed(elapsed))
    };

    for (name, counter) in counter_by_name {
        lines.push_str(&format!("\t\u{2022} {name}: {}\n", counter.value()));
    }
    tracing::info!(target: "conflux::progress", "{lines}");
}

/// Build the `{loader name -> counter}` map the progress observer watches,
/// from the full `{node id -> counter}` map the engine assembles and the
/// node-id-to-name table from the planned graph.
pub fn counters_by_name(
    counter_by_node_id: &HashMap<NodeId, Counter>,
    name_by_node_id: &HashMap<NodeId, String>,
) -> HashMap<String, Counter> {
    counter_by_node_id
        .iter()
        .filter_map(|(id, counter)| name_by_node_id.get(id).map(|name| (name.clone(), counter.clone())))
        .collect()
}
