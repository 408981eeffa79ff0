//! # ionflow: filter pipeline engine for point-cloud analysis
//!
//! Atom-probe data sets are analysed by composing filters into a tree: data
//! sources at the roots, transforms and analyses below them. Refreshing the
//! tree walks it depth-first, feeding every filter its parent's output.
//! Results are cached per filter under a shared memory budget, so editing
//! one filter only recomputes that filter and its descendants.
//!
//! ## Architecture
//!
//! - **Pipeline**: streams, the `Filter` trait, the arena-backed `FilterTree`
//!   with undo/redo and stashes, and the depth-first refresh walk
//! - **Controller**: runs one refresh on a worker thread with progress
//!   reporting and cooperative abort
//! - **Session**: owns the tree for a UI, locks edits during refreshes and
//!   watches file-backed filters
//! - **Scripting**: Rhai expressions used by the value-script filter
//! - **Communication**: crossbeam channels between worker and UI thread
//!
//! ## Configuration
//!
//! Engine settings are stored in the platform-appropriate data directory
//! under `dev.ionflow.engine`:
//!
//! - **Linux**: `~/.local/share/dev.ionflow.engine/`
//! - **macOS**: `~/Library/Application Support/dev.ionflow.engine/`
//! - **Windows**: `%APPDATA%\dev.ionflow.engine\`
//!
//! ## Example
//!
//! ```ignore
//! use ionflow::config::EngineConfig;
//! use ionflow::pipeline::filters::{DataLoadFilter, SpectrumPlotFilter};
//! use ionflow::session::AnalysisSession;
//!
//! let config = EngineConfig::load_or_default();
//! let mut session = AnalysisSession::from_config(&config);
//! session.edit(|tree| {
//!     let src = tree.add_filter(Box::new(DataLoadFilter::from_file("run.txt")), None)?;
//!     tree.add_filter(Box::new(SpectrumPlotFilter::new()), Some(src))
//! })?;
//! session.start_refresh();
//! session.wait_for_refresh()?;
//! for output in &session.last_outcome().unwrap().outputs {
//!     println!("{}: {} stream(s)", output.label, output.streams.len());
//! }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod scripting;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result, ResultExt};
pub use pipeline::{Filter, FilterId, FilterTree, RefreshController, RefreshOutcome};
pub use scripting::ScriptEngine;
pub use session::AnalysisSession;
pub use types::{Colour, IonHit, RangeTable};
