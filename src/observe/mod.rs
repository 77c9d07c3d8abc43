//! Observability: the progress and timings background observers.

pub mod progress;
pub mod timings;

pub use progress::{counters_by_name, run_progress_observer};
pub use timings::run_timings_observer;
