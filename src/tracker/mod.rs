//! The time-attribution core: change detection, task extraction, the
//! per-branch tick decision, the engine that fans out over repositories,
//! and the periodic scheduler driving it.

pub mod detect;
pub mod engine;
pub mod scheduler;
pub mod task;

pub use engine::{evaluate_tick, TickDecision, TickSummary, TrackerEngine, LEEWAY_MS};
pub use scheduler::TrackerScheduler;
pub use task::{default_task_pattern, extract_task_id};
