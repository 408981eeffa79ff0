//! The filter node contract.
//!
//! Every pipeline node implements [`Filter`]. Node state that the tree needs
//! to manage uniformly (label, cache, console buffer, last error, own id)
//! lives in a [`FilterBase`] each implementation embeds and exposes through
//! `base()`/`base_mut()`.
//!
//! # Refresh contract
//!
//! `refresh` receives the parent's output and appends to `output`:
//! streams forwarded from the input via `propagate_streams` plus fresh
//! streams passed through `cache_as_needed`. It may only touch its own state.
//! Long loops poll `ctx` for abort and report percent complete.

use crate::pipeline::cache::FilterCache;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, HazardousCloneRefused, RefreshError};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::id::FilterId;
use crate::pipeline::property::{FilterProperty, PropertyEffect, PropertyError, PropertyValue};
use crate::pipeline::state::{FilterState, StateError};
use crate::pipeline::stream::{Stream, StreamMask, StreamRef};
use std::fmt;
use std::path::Path;

/// State common to every filter.
#[derive(Debug)]
pub struct FilterBase {
    label: String,
    id: FilterId,
    pub(crate) cache: FilterCache,
    console: Vec<String>,
    error_state: Option<ErrorCode>,
}

impl FilterBase {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: FilterId::INVALID,
            cache: FilterCache::default(),
            console: Vec::new(),
            error_state: None,
        }
    }

    /// Configuration-only copy: same label and cache switch, nothing else.
    pub fn clone_config(&self) -> Self {
        Self {
            label: self.label.clone(),
            id: FilterId::INVALID,
            cache: FilterCache::new(self.cache.is_enabled()),
            console: Vec::new(),
            error_state: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Handle assigned when the filter was inserted into a tree.
    pub fn id(&self) -> FilterId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: FilterId) {
        self.id = id;
    }

    pub fn cache(&self) -> &FilterCache {
        &self.cache
    }

    /// Queue a message for the refresh console. Does not stop the walk.
    pub fn console_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.label, message);
        self.console.push(message);
    }

    pub(crate) fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }

    pub fn error_state(&self) -> Option<ErrorCode> {
        self.error_state
    }

    pub(crate) fn set_error_state(&mut self, code: Option<ErrorCode>) {
        self.error_state = code;
    }
}

/// A pipeline node.
pub trait Filter: Send + fmt::Debug {
    /// Factory key. `None` for filters defined outside this crate, which
    /// can run in a tree but cannot be persisted.
    fn filter_type(&self) -> Option<FilterType>;

    /// Human-readable type name.
    fn type_name(&self) -> &'static str;

    fn base(&self) -> &FilterBase;

    fn base_mut(&mut self) -> &mut FilterBase;

    /// Deep copy of configuration only; never copies cached output.
    fn clone_config(&self) -> Box<dyn Filter>;

    /// Copy suitable for use as a default template.
    fn clone_uncached(&self) -> Result<Box<dyn Filter>, HazardousCloneRefused> {
        if self.can_be_hazardous() {
            Err(HazardousCloneRefused(self.type_name()))
        } else {
            Ok(self.clone_config())
        }
    }

    /// Compute output from `input`. See the module docs for the contract.
    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError>;

    fn properties(&self) -> Vec<FilterProperty>;

    /// Validate and apply one property. Leaves the filter unchanged on error.
    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError>;

    /// Bytes the cached output would take for `n_objects` input objects.
    /// `None` when the filter cannot estimate.
    fn num_bytes_for_cache(&self, n_objects: usize) -> Option<usize>;

    /// Input kinds this filter consumes and does not pass on.
    fn block_mask(&self) -> StreamMask;

    /// Kinds this filter may produce.
    fn emit_mask(&self) -> StreamMask;

    /// Kinds this filter reads.
    fn use_mask(&self) -> StreamMask;

    /// Produces data from nothing; the only kind allowed at the top of a tree.
    fn is_pure_data_source(&self) -> bool {
        false
    }

    /// May run external code or write files.
    fn can_be_hazardous(&self) -> bool {
        false
    }

    /// An external input changed since the last refresh.
    fn monitor_needs_refresh(&self) -> bool {
        false
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str;

    fn write_state(&self) -> FilterState {
        FilterState::from_filter(self)
    }

    /// Apply persisted state. Relative paths resolve against `base_dir`.
    fn read_state(&mut self, state: &FilterState, _base_dir: &Path) -> Result<(), StateError> {
        state.apply_common(self)
    }

    // Provided helpers

    fn label(&self) -> &str {
        self.base().label()
    }

    fn set_label(&mut self, label: &str) {
        self.base_mut().set_label(label);
    }

    fn id(&self) -> FilterId {
        self.base().id()
    }

    /// Wrap fresh output, retaining it in this filter's cache when the
    /// local switch and the global budget allow.
    fn cache_as_needed(
        &mut self,
        stream: Stream,
        n_objects: usize,
        ctx: &ExecutionContext,
    ) -> StreamRef {
        let estimate = self.num_bytes_for_cache(n_objects);
        self.base_mut().cache.store(stream, estimate, ctx.budget())
    }
}
