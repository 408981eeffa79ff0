//! Filter pipeline: streams, filters, the filter tree and its refresh.
//!
//! Data flows from pure data sources at the roots of a forest down to the
//! leaves. Every filter receives its parent's complete output, consumes
//! some stream kinds, passes others through and emits new ones. Outputs
//! can be cached per filter under a shared memory budget.
//!
//! # Architecture
//!
//! ```text
//! [DataLoad] ──► [RangeFilter] ──► [SpectrumPlot]
//!           │                  └──► [BoundingBox]
//!           └──► [IonDownsample] ──► [Voxelise]
//! ```
//!
//! # Design
//!
//! - **Arena with generational handles**: `FilterId` never aliases a removed node.
//! - **Explicit context**: abort flag, cache budget and progress travel in
//!   `ExecutionContext` instead of living in globals.
//! - **Mask algebra**: each filter declares use/block/emit masks; the walk
//!   checks outputs against them.
//! - **Tree as edit lock**: a refresh moves the tree to the worker thread and
//!   the `RefreshController` hands it back when the walk ends.

pub mod bridge;
pub mod cache;
pub mod context;
pub mod controller;
pub mod error;
pub mod filter;
pub mod filter_type;
pub mod filters;
pub(crate) mod history;
pub mod id;
pub mod property;
pub mod stash;
pub mod state;
pub mod stream;
pub mod tree;
pub mod walk;

pub use bridge::{RefreshBridge, RefreshMessage};
pub use cache::{CacheBudget, CachePolicy, FilterCache};
pub use context::{AbortFlag, ExecutionContext, ProgressData, ProgressSnapshot};
pub use controller::{ControllerError, RefreshController, RefreshState, StartError};
pub use error::{ErrorCode, RefreshError, TreeError, TreeRefreshError, TreeResult};
pub use filter::{Filter, FilterBase};
pub use filter_type::{FilterFactory, FilterType};
pub use id::FilterId;
pub use property::{FilterProperty, PropertyEffect, PropertyError, PropertyValue};
pub use stash::{Stash, StashNode};
pub use state::{FilterState, StateError, StateFormat, TreeState};
pub use stream::{
    propagate_streams, IonStream, Stream, StreamData, StreamKind, StreamMask, StreamRef,
};
pub use tree::FilterTree;
pub use walk::{
    ConsoleMessage, FilterOutput, RefreshEvent, RefreshFailure, RefreshOutcome, RefreshStats,
    RefreshStatus,
};
