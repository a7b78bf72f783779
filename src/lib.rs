//! Background repository-activity monitor.
//!
//! Periodically inspects a set of git working trees, decides whether
//! meaningful work happened since the last observation, and attributes a
//! fixed slice of elapsed time to the task id carried by the branch name.
//! Git is treated as an opaque oracle: every fact comes from shelling out
//! to the `git` executable through the [`subprocess`] layer.

pub mod config;
pub mod git;
pub mod logbook;
pub mod snapshot;
pub mod state;
pub mod subprocess;
pub mod tracker;
