//! Cross-thread signaling primitives: event flags and counters.

mod counter;
mod event_flag;

pub use counter::Counter;
pub use event_flag::EventFlag;
