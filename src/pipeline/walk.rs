//! One refresh pass over a `FilterTree`.
//!
//! The walk is a pre-order depth-first traversal of every root. Each filter
//! receives its parent's complete output. A filter with a valid cache hands
//! back its cached streams plus whatever it would have passed through;
//! otherwise its `refresh` runs and the result is checked against its
//! declared masks. The walk stops at the first error or abort.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError, TreeRefreshError};
use crate::pipeline::filter::Filter;
use crate::pipeline::id::FilterId;
use crate::pipeline::stream::{mask_sound, propagate_streams, StreamMask, StreamRef};
use crate::pipeline::tree::FilterTree;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A console line emitted by a filter during a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub filter: FilterId,
    pub label: String,
    pub text: String,
}

/// Output of one leaf filter.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub filter: FilterId,
    pub label: String,
    pub streams: Vec<StreamRef>,
}

/// The error that stopped a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub filter: FilterId,
    pub label: String,
    pub type_name: &'static str,
    pub code: ErrorCode,
    pub short_message: String,
    pub verbose_message: String,
}

impl RefreshFailure {
    fn new(filter: &dyn Filter, error: RefreshError) -> Self {
        let short = match error {
            RefreshError::Abort => "Refresh aborted",
            RefreshError::Filter(code) => filter.specific_error_string(code),
            RefreshError::Tree(e) => e.message(),
        };
        Self {
            filter: filter.id(),
            label: filter.label().to_string(),
            type_name: filter.type_name(),
            code: error.code(),
            short_message: short.to_string(),
            verbose_message: format!(
                "Filter '{}' ({}) failed with code {}: {}",
                filter.label(),
                filter.type_name(),
                error.code(),
                short
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Completed,
    /// Stopped on a filter error; see `RefreshOutcome::failure`.
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Filters whose `refresh` ran.
    pub refreshed: usize,
    /// Filters answered from cache.
    pub cache_hits: usize,
    pub elapsed: Duration,
}

/// Everything a walk produced.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub status: RefreshStatus,
    pub outputs: Vec<FilterOutput>,
    pub console: Vec<ConsoleMessage>,
    pub failure: Option<RefreshFailure>,
    pub stats: RefreshStats,
}

impl RefreshOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RefreshStatus::Completed
    }

    /// All leaf streams, in walk order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamRef> {
        self.outputs.iter().flat_map(|o| o.streams.iter())
    }

    pub fn output_of(&self, filter: FilterId) -> Option<&FilterOutput> {
        self.outputs.iter().find(|o| o.filter == filter)
    }
}

/// Progress notifications emitted while walking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    FilterStarted { filter: FilterId, label: String },
    FilterFinished { filter: FilterId, from_cache: bool },
    Console(ConsoleMessage),
    Failed(RefreshFailure),
}

/// `out ⊆ emit ∪ (in \ block)`, and every stream this filter produced
/// itself is of an emitted kind.
fn check_masks(filter: &dyn Filter, input: &[StreamRef], output: &[StreamRef]) -> bool {
    let emit = filter.emit_mask();
    let own_ok = output
        .iter()
        .filter(|s| s.parent() == filter.id())
        .all(|s| emit.has(s.kind()));
    own_ok
        && mask_sound(
            StreamMask::of_streams(input),
            StreamMask::of_streams(output),
            filter.block_mask(),
            emit,
        )
}

impl FilterTree {
    /// Walk the whole tree on the calling thread.
    pub fn refresh(&mut self, ctx: &ExecutionContext) -> RefreshOutcome {
        self.refresh_with(ctx, |_| {})
    }

    /// Walk the whole tree, reporting each step to `observer`.
    pub fn refresh_with(
        &mut self,
        ctx: &ExecutionContext,
        mut observer: impl FnMut(RefreshEvent),
    ) -> RefreshOutcome {
        let start = Instant::now();
        let budget = self.budget.clone();
        if !Arc::ptr_eq(ctx.budget(), &budget) {
            tracing::warn!("Refresh context does not share the tree's cache budget");
        }
        budget.begin_cycle();
        ctx.progress().reset(self.len());
        let mut outcome = RefreshOutcome {
            status: RefreshStatus::Completed,
            outputs: Vec::new(),
            console: Vec::new(),
            failure: None,
            stats: RefreshStats::default(),
        };
        tracing::info!("Refreshing {} filter(s)", self.len());

        let empty: Rc<[StreamRef]> = Rc::from(Vec::new());
        let mut stack: Vec<(FilterId, Rc<[StreamRef]>)> = self
            .arena
            .roots()
            .iter()
            .rev()
            .map(|&root| (root, empty.clone()))
            .collect();

        while let Some((id, input)) = stack.pop() {
            if ctx.abort_requested() {
                outcome.status = RefreshStatus::Aborted;
                break;
            }
            let Some(node) = self.arena.node_mut(id) else {
                continue;
            };
            let is_root = node.parent.is_none();
            let filter = node.filter.as_mut();

            ctx.progress().begin_filter(id);
            observer(RefreshEvent::FilterStarted {
                filter: id,
                label: filter.label().to_string(),
            });
            let node_start = Instant::now();

            let mut output = Vec::new();
            let from_cache = filter.base().cache().is_valid();
            let result = if from_cache {
                propagate_streams(&input, &mut output, filter.block_mask(), true);
                output.extend(filter.base().cache().contents().iter().cloned());
                outcome.stats.cache_hits += 1;
                Ok(())
            } else if is_root && !filter.is_pure_data_source() {
                Err(RefreshError::Tree(TreeRefreshError::RootNotDataSource))
            } else {
                filter.base_mut().cache.begin_refresh(&budget);
                outcome.stats.refreshed += 1;
                filter.refresh(&input, &mut output, ctx).and_then(|()| {
                    if check_masks(filter, &input, &output) {
                        Ok(())
                    } else {
                        Err(RefreshError::Tree(TreeRefreshError::MaskViolation))
                    }
                })
            };

            match result {
                Ok(()) => {
                    if !from_cache {
                        filter.base_mut().cache.finish_refresh(&budget);
                    }
                    filter.base_mut().set_error_state(None);
                }
                Err(ref e) => {
                    filter.base_mut().cache.clear(&budget);
                    let code = (!e.is_abort()).then(|| e.code());
                    filter.base_mut().set_error_state(code);
                }
            }

            for text in filter.base_mut().take_console() {
                let message = ConsoleMessage {
                    filter: id,
                    label: filter.label().to_string(),
                    text,
                };
                observer(RefreshEvent::Console(message.clone()));
                outcome.console.push(message);
            }
            ctx.progress().finish_filter();
            tracing::trace!(
                "{} '{}' took {:?}{}",
                id,
                filter.label(),
                node_start.elapsed(),
                if from_cache { " (cached)" } else { "" }
            );

            match result {
                Ok(()) => {
                    observer(RefreshEvent::FilterFinished {
                        filter: id,
                        from_cache,
                    });
                }
                Err(RefreshError::Abort) => {
                    outcome.status = RefreshStatus::Aborted;
                    break;
                }
                Err(e) => {
                    let failure = RefreshFailure::new(filter, e);
                    tracing::warn!("{}", failure.verbose_message);
                    observer(RefreshEvent::Failed(failure.clone()));
                    outcome.failure = Some(failure);
                    outcome.status = RefreshStatus::Failed;
                    break;
                }
            }

            if node.children.is_empty() {
                outcome.outputs.push(FilterOutput {
                    filter: id,
                    label: node.filter.label().to_string(),
                    streams: output,
                });
            } else {
                let shared: Rc<[StreamRef]> = Rc::from(output);
                for &child in node.children.iter().rev() {
                    stack.push((child, shared.clone()));
                }
            }
        }

        outcome.stats.elapsed = start.elapsed();
        match outcome.status {
            RefreshStatus::Completed => tracing::info!(
                "Refresh completed in {:?}: {} refreshed, {} from cache",
                outcome.stats.elapsed,
                outcome.stats.refreshed,
                outcome.stats.cache_hits
            ),
            RefreshStatus::Aborted => tracing::info!("Refresh aborted"),
            RefreshStatus::Failed => tracing::info!("Refresh stopped on error"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::filters::{DataLoadFilter, RangeFilter, SpectrumPlotFilter};
    use crate::pipeline::property::PropertyValue;
    use crate::pipeline::stream::StreamKind;

    fn ctx(tree: &FilterTree) -> ExecutionContext {
        ExecutionContext::new(tree.budget().clone())
    }

    fn range_tree() -> (FilterTree, FilterId, FilterId) {
        let mut tree = FilterTree::new(CacheBudget::unlimited().shared());
        let src = tree
            .add_filter(Box::new(DataLoadFilter::synthetic(100)), None)
            .unwrap();
        let range = tree.add_filter(Box::new(RangeFilter::new()), Some(src)).unwrap();
        tree.set_filter_property(range, "ranges", &PropertyValue::from("Bl:0..9;Pl:20..33"))
            .unwrap();
        (tree, src, range)
    }

    #[test]
    fn test_range_split() {
        let (mut tree, _, range) = range_tree();
        let outcome = tree.refresh(&ctx(&tree));
        assert!(outcome.is_completed());
        let out = outcome.output_of(range).unwrap();
        let mut counts: Vec<usize> = out
            .streams
            .iter()
            .filter_map(|s| s.as_ions())
            .map(|i| i.hits.len())
            .collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![10, 14]);
        assert_eq!(
            out.streams.iter().filter(|s| s.kind() == StreamKind::Range).count(),
            1
        );
    }

    #[test]
    fn test_second_refresh_uses_cache() {
        let (mut tree, _, _) = range_tree();
        let first = tree.refresh(&ctx(&tree));
        assert_eq!(first.stats.refreshed, 2);
        let second = tree.refresh(&ctx(&tree));
        assert_eq!(second.stats.refreshed, 0);
        assert_eq!(second.stats.cache_hits, 2);
        let a: Vec<_> = first.streams().map(|s| s.data().clone()).collect();
        let b: Vec<_> = second.streams().map(|s| s.data().clone()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_failure_stops_walk() {
        let mut tree = FilterTree::new(CacheBudget::unlimited().shared());
        let src = tree
            .add_filter(Box::new(DataLoadFilter::from_file("")), None)
            .unwrap();
        tree.add_filter(Box::new(SpectrumPlotFilter::new()), Some(src))
            .unwrap();
        let outcome = tree.refresh(&ctx(&tree));
        assert_eq!(outcome.status, RefreshStatus::Failed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.filter, src);
        assert_eq!(failure.short_message, "No data file selected");
        assert_eq!(outcome.stats.refreshed, 1);
        assert!(tree.get(src).unwrap().base().error_state().is_some());
    }

    #[test]
    fn test_abort_before_start() {
        let (mut tree, _, _) = range_tree();
        let ctx = ctx(&tree);
        ctx.abort_flag().request();
        let outcome = tree.refresh(&ctx);
        assert_eq!(outcome.status, RefreshStatus::Aborted);
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    fn test_events_in_order() {
        let (mut tree, src, range) = range_tree();
        let mut events = Vec::new();
        tree.refresh_with(&ctx(&tree), |e| events.push(e));
        let started: Vec<FilterId> = events
            .iter()
            .filter_map(|e| match e {
                RefreshEvent::FilterStarted { filter, .. } => Some(*filter),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![src, range]);
    }
}
