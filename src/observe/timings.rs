//! Timings observer: aggregates per-item timing samples into rolling
//! min/max/median and logs them periodically, grounded on `TimingsThread`.
//!
//! A naive refresh check written as `(last_log_time - current_time) >=
//! refresh_interval` compares the wrong direction and, since `current_time`
//! only grows, never fires: timings would only ever be logged once, at
//! stream end. This uses `current_time - last_log_time >= refresh_interval`
//! instead.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::graph::NodeId;
use crate::sync::EventFlag;
use crate::worker::TimingSample;

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    min: Option<f64>,
    max: Option<f64>,
    median: Option<f64>,
}

fn median(sorted: &mut [f64]) -> f64 {
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let len = sorted.len();
    if len % 2 == 1 {
        sorted[len / 2]
    } else {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    }
}

fn format_timing(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "no_measure".to_string();
    };

    if (1.0..60.0).contains(&value) {
        format!("{:.2} s", value)
    } else if value < 1.0 {
        let ms = value * 1000.0;
        if ms < 1.0 {
            format!("{:.4} \u{3bc}s", ms * 1000.0)
        } else {
            format!("{:.4} ms", ms)
        }
    } else {
        let minutes = value / 60.0;
        if minutes <= 1.0 {
            format!("{:.2} min", minutes)
        } else {
            format!("{:.4} hours", minutes / 60.0)
        }
    }
}

/// Drain `rx` until it's closed, logging rolling timing aggregates every
/// `refresh_interval`. Intended to run on a dedicated observer thread for
/// the duration of one engine run.
pub fn run_timings_observer(
    node_names: &HashMap<NodeId, String>,
    rx: &Receiver<TimingSample>,
    stop_event: &EventFlag,
    refresh_interval: Duration,
    ring_buffer_capacity: usize,
) {
    let mut buffers: HashMap<NodeId, VecDeque<f64>> = node_names
        .keys()
        .map(|id| (id.clone(), VecDeque::with_capacity(ring_buffer_capacity)))
        .collect();
    let mut stats: HashMap<NodeId, Stats> = node_names.keys().map(|id| (id.clone(), Stats::default())).collect();

    let mut last_log = Instant::now();

    loop {
        match rx.recv() {
            Ok((node_id, timing)) => {
                if stop_event.is_raised() {
                    continue;
                }
                let buffer = buffers.entry(node_id).or_insert_with(|| VecDeque::with_capacity(ring_buffer_capacity));
                if buffer.len() == ring_buffer_capacity {
                    buffer.pop_front();
                }
                buffer.push_back(timing);

                if last_log.elapsed() >= refresh_interval {
                    last_log = Instant::now();
                    update_stats(&buffers, &mut stats);
                    log_stats(node_names, &stats);
                }
            }
            Err(_) => break,
        }
    }

    if !stop_event.is_raised() {
        update_stats(&buffers, &mut stats);
        log_stats(node_names, &stats);
    }
}

fn update_stats(buffers: &HashMap<NodeId, VecDeque<f64>>, stats: &mut HashMap<NodeId, Stats>) {
    for (node_id, timings) in buffers {
        if timings.is_empty() {
            continue;
        }
        let entry = stats.entry(node_id.clone()).or_default();
        let observed_min = timings.iter().copied().fold(f64::INFINITY, f64::min);
        let observed_max = timings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        entry.min = Some(entry.min.map_or(observed_min, |m| m.min(observed_min)));
        entry.max = Some(entry.max.map_or(observed_max, |m| m.max(observed_max)));

        let mut values: Vec<f64> = timings.iter().copied().collect();
        entry.median = Some(median(&mut values));
    }
}

fn log_stats(node_names: &HashMap<NodeId, String>, stats: &HashMap<NodeId, Stats>) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let mut lines = format!("[{now}] timings:\n");
    for (node_id, name) in node_names {
        let s = stats.get(node_id).copied().unwrap_or_default();
        lines.push_str(&format!(
            "\t\u{2022} {name}\n\t\t{} (avg) | {} (min) | {} (max)\n",
            format_timing(s.median),
            format_timing(s.min),
            format_timing(s.max),
        ));
    }
    tracing::info!(target: "conflux::timings", "{lines}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_timing_picks_the_right_unit() {
        assert_eq!(format_timing(None), "no_measure");
        assert_eq!(format_timing(Some(2.5)), "2.50 s");
        assert_eq!(format_timing(Some(0.5)), "500.0000 ms");
        assert_eq!(format_timing(Some(0.0000005)), "0.5000 \u{3bc}s");
        assert_eq!(format_timing(Some(90.0)), "1.50 min");
        assert_eq!(format_timing(Some(7200.0)), "2.0000 hours");
    }

    #[test]
    fn median_of_odd_and_even_length() {
        let mut odd = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut odd), 2.0);
        let mut even = vec![4.0, 1.0, 2.0, 3.0];
        assert_eq!(median(&mut even), 2.5);
    }

    #[test]
    fn observer_aggregates_until_channel_closes() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut names = HashMap::new();
        names.insert("node_1".to_string(), "extractor".to_string());

        tx.send(("node_1".to_string(), 1.0)).unwrap();
        tx.send(("node_1".to_string(), 3.0)).unwrap();
        drop(tx);

        let stop = EventFlag::new();
        run_timings_observer(&names, &rx, &stop, Duration::from_secs(5), 100);
    }
}
