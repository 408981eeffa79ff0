//! Analysis session module
//!
//! This module provides the UI-facing owner of a filter tree. The session
//! schedules refreshes on a worker thread, locks the tree against edits
//! while one runs, and watches filters whose inputs live outside the tree.
//!
//! # Features
//!
//! - Timer-driven `tick()` that collects results and starts follow-up refreshes
//! - Coalescing of refresh requests made during a running refresh
//! - Monitor polling for file-backed filters

pub mod analysis;

pub use analysis::{AnalysisSession, SessionError, TickReport};
