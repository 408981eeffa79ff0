//! Per-refresh execution context handed to every filter body.
//!
//! Bundles the cooperative abort token, the shared cache budget and the
//! progress record. Filters poll abort through [`ExecutionContext::check_abort`]
//! or by iterating through [`ExecutionContext::checked`], which polls every
//! `abort_poll_stride` items and returns `RefreshError::Abort` as soon as the
//! flag is seen.

use crate::pipeline::cache::CacheBudget;
use crate::pipeline::error::RefreshError;
use crate::pipeline::id::FilterId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of items processed between abort polls.
pub const DEFAULT_ABORT_POLL_STRIDE: usize = 4096;

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Live progress of a refresh.
///
/// Written by the worker, read by the UI. All numeric fields are relaxed
/// atomics; readers only ever display them.
#[derive(Debug, Default)]
pub struct ProgressData {
    step: AtomicU32,
    max_step: AtomicU32,
    step_name: RwLock<String>,
    total_progress: AtomicU32,
    total_num_filters: AtomicU32,
    filter_progress: AtomicU32,
    cur_filter: AtomicU64,
}

/// Point-in-time copy of [`ProgressData`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub step: u32,
    pub max_step: u32,
    pub step_name: String,
    /// Filters completed so far.
    pub total_progress: u32,
    pub total_num_filters: u32,
    /// Percent of the current filter, `0..=100`.
    pub filter_progress: u32,
    pub cur_filter: Option<FilterId>,
}

impl ProgressSnapshot {
    /// Overall fraction complete in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        if self.total_num_filters == 0 {
            return 0.0;
        }
        let done = self.total_progress as f32 + self.filter_progress as f32 / 100.0;
        (done / self.total_num_filters as f32).clamp(0.0, 1.0)
    }
}

impl ProgressData {
    pub fn new() -> Self {
        let data = Self::default();
        data.cur_filter
            .store(FilterId::INVALID.to_bits(), Ordering::Relaxed);
        data
    }

    pub fn reset(&self, total_num_filters: usize) {
        self.total_progress.store(0, Ordering::Relaxed);
        self.total_num_filters
            .store(total_num_filters as u32, Ordering::Relaxed);
        self.clear_filter_fields();
        self.cur_filter
            .store(FilterId::INVALID.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn begin_filter(&self, id: FilterId) {
        self.clear_filter_fields();
        self.cur_filter.store(id.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn finish_filter(&self) {
        self.filter_progress.store(100, Ordering::Relaxed);
        self.total_progress.fetch_add(1, Ordering::Relaxed);
    }

    fn clear_filter_fields(&self) {
        self.step.store(0, Ordering::Relaxed);
        self.max_step.store(0, Ordering::Relaxed);
        self.filter_progress.store(0, Ordering::Relaxed);
        self.step_name.write().clear();
    }

    /// Enter sub-step `step` of `max_step` within the current filter.
    pub fn set_step(&self, step: u32, max_step: u32, name: &str) {
        self.step.store(step, Ordering::Relaxed);
        self.max_step.store(max_step, Ordering::Relaxed);
        self.filter_progress.store(0, Ordering::Relaxed);
        let mut guard = self.step_name.write();
        guard.clear();
        guard.push_str(name);
    }

    /// Raise the current filter's percentage. Never moves backwards within
    /// a step.
    pub fn set_filter_progress(&self, percent: u32) {
        self.filter_progress
            .fetch_max(percent.min(100), Ordering::Relaxed);
    }

    /// Raw percent counter for helpers that report progress themselves.
    pub fn filter_progress_counter(&self) -> &AtomicU32 {
        &self.filter_progress
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let cur = FilterId::from_bits(self.cur_filter.load(Ordering::Relaxed));
        ProgressSnapshot {
            step: self.step.load(Ordering::Relaxed),
            max_step: self.max_step.load(Ordering::Relaxed),
            step_name: self.step_name.read().clone(),
            total_progress: self.total_progress.load(Ordering::Relaxed),
            total_num_filters: self.total_num_filters.load(Ordering::Relaxed),
            filter_progress: self.filter_progress.load(Ordering::Relaxed),
            cur_filter: cur.is_valid().then_some(cur),
        }
    }
}

/// Everything a filter body may consult besides its own state and input.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    abort: AbortFlag,
    budget: Arc<CacheBudget>,
    progress: Arc<ProgressData>,
    abort_poll_stride: usize,
}

impl ExecutionContext {
    pub fn new(budget: Arc<CacheBudget>) -> Self {
        Self {
            abort: AbortFlag::new(),
            budget,
            progress: Arc::new(ProgressData::new()),
            abort_poll_stride: DEFAULT_ABORT_POLL_STRIDE,
        }
    }

    pub fn with_abort_poll_stride(mut self, stride: usize) -> Self {
        self.abort_poll_stride = stride.max(1);
        self
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub fn budget(&self) -> &Arc<CacheBudget> {
        &self.budget
    }

    pub fn progress(&self) -> &Arc<ProgressData> {
        &self.progress
    }

    pub fn abort_poll_stride(&self) -> usize {
        self.abort_poll_stride
    }

    #[inline]
    pub fn abort_requested(&self) -> bool {
        self.abort.is_requested()
    }

    #[inline]
    pub fn check_abort(&self) -> Result<(), RefreshError> {
        if self.abort.is_requested() {
            Err(RefreshError::Abort)
        } else {
            Ok(())
        }
    }

    /// Iterate `iter`, polling abort and updating the current filter's
    /// progress every `abort_poll_stride` items.
    pub fn checked<I: Iterator>(&self, iter: I) -> CheckedIter<'_, I> {
        let total = iter.size_hint().1.unwrap_or(0);
        CheckedIter {
            inner: iter,
            ctx: self,
            seen: 0,
            total,
            done: false,
        }
    }
}

/// Iterator adaptor yielding `Err(RefreshError::Abort)` once abort is seen.
pub struct CheckedIter<'a, I> {
    inner: I,
    ctx: &'a ExecutionContext,
    seen: usize,
    total: usize,
    done: bool,
}

impl<I: Iterator> Iterator for CheckedIter<'_, I> {
    type Item = Result<I::Item, RefreshError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.seen % self.ctx.abort_poll_stride == 0 {
            if self.ctx.abort_requested() {
                self.done = true;
                return Some(Err(RefreshError::Abort));
            }
            if self.total > 0 {
                let percent = (self.seen as u64 * 100 / self.total as u64) as u32;
                self.ctx.progress.set_filter_progress(percent);
            }
        }
        self.seen += 1;
        match self.inner.next() {
            Some(item) => Some(Ok(item)),
            None => {
                self.done = true;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            let (_, hi) = self.inner.size_hint();
            (0, hi.map(|h| h + 1))
        }
    }
}
