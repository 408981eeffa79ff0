//! Runs one refresh of a `FilterTree` on a dedicated worker thread.
//!
//! The tree is moved into the worker for the walk and handed back by
//! [`RefreshController::join`]. While the worker holds it nobody else can
//! edit it.
//!
//! ```text
//!          start()            walk ends
//!  Idle ───────────► Running ───────────► Completed | Failed
//!                       │
//!                       │ abort()
//!                       ▼       walk stops
//!                   Aborting ───────────► Aborted
//! ```

use crate::pipeline::bridge::{RefreshBridge, RefreshMessage, WorkerSink};
use crate::pipeline::context::{
    AbortFlag, ExecutionContext, ProgressSnapshot, DEFAULT_ABORT_POLL_STRIDE,
};
use crate::pipeline::tree::FilterTree;
use crate::pipeline::walk::{RefreshOutcome, RefreshStatus};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefreshState {
    Idle = 0,
    Running = 1,
    Aborting = 2,
    Completed = 3,
    Failed = 4,
    Aborted = 5,
}

impl RefreshState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RefreshState::Running,
            2 => RefreshState::Aborting,
            3 => RefreshState::Completed,
            4 => RefreshState::Failed,
            5 => RefreshState::Aborted,
            _ => RefreshState::Idle,
        }
    }

    fn from_status(status: RefreshStatus) -> Self {
        match status {
            RefreshStatus::Completed => RefreshState::Completed,
            RefreshStatus::Failed => RefreshState::Failed,
            RefreshStatus::Aborted => RefreshState::Aborted,
        }
    }

    /// The worker has finished its walk.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RefreshState::Completed | RefreshState::Failed | RefreshState::Aborted
        )
    }
}

/// A second `start` was attempted. The tree is returned untouched.
#[derive(Error, Debug)]
#[error("This controller has already run a refresh")]
pub struct StartError {
    pub tree: FilterTree,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("No refresh was started")]
    NotStarted,

    #[error("The refresh result was already collected")]
    AlreadyJoined,

    #[error("The refresh worker panicked")]
    WorkerPanicked,
}

type WorkerResult = (FilterTree, RefreshOutcome);

/// One refresh on one worker thread. Single use.
#[derive(Debug)]
pub struct RefreshController {
    state: Arc<AtomicU8>,
    abort: AbortFlag,
    abort_poll_stride: usize,
    ctx: Option<ExecutionContext>,
    bridge: RefreshBridge,
    sink: Option<WorkerSink>,
    handle: Option<JoinHandle<WorkerResult>>,
}

impl Default for RefreshController {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshController {
    pub fn new() -> Self {
        let (bridge, sink) = RefreshBridge::new();
        Self {
            state: Arc::new(AtomicU8::new(RefreshState::Idle as u8)),
            abort: AbortFlag::new(),
            abort_poll_stride: DEFAULT_ABORT_POLL_STRIDE,
            ctx: None,
            bridge,
            sink: Some(sink),
            handle: None,
        }
    }

    pub fn with_abort_poll_stride(mut self, stride: usize) -> Self {
        self.abort_poll_stride = stride;
        self
    }

    pub fn state(&self) -> RefreshState {
        RefreshState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Running or aborting.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            RefreshState::Running | RefreshState::Aborting
        )
    }

    /// The walk has ended and `join` will not block.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Move `tree` to a worker thread and walk it.
    pub fn start(&mut self, mut tree: FilterTree) -> Result<(), StartError> {
        let Some(mut sink) = self.sink.take() else {
            tracing::warn!("Refusing to start a refresh controller twice");
            return Err(StartError { tree });
        };

        let ctx = ExecutionContext::new(tree.budget().clone())
            .with_abort_flag(self.abort.clone())
            .with_abort_poll_stride(self.abort_poll_stride);
        ctx.progress().reset(tree.len());
        self.ctx = Some(ctx.clone());
        self.state
            .store(RefreshState::Running as u8, Ordering::Release);

        let state = Arc::clone(&self.state);
        self.handle = Some(std::thread::spawn(move || {
            let outcome = tree.refresh_with(&ctx, |event| sink.send_event(event));
            state.store(
                RefreshState::from_status(outcome.status) as u8,
                Ordering::Release,
            );
            sink.finish(outcome.status, outcome.stats);
            (tree, outcome)
        }));
        Ok(())
    }

    /// Ask the worker to stop. Returns false when not running.
    pub fn abort(&self) -> bool {
        let swapped = self
            .state
            .compare_exchange(
                RefreshState::Running as u8,
                RefreshState::Aborting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if swapped {
            self.abort.request();
            tracing::info!("Refresh abort requested");
        }
        swapped
    }

    /// Drain messages the worker has sent so far.
    pub fn poll(&self) -> Vec<RefreshMessage> {
        self.bridge.drain()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.ctx
            .as_ref()
            .map(|ctx| ctx.progress().snapshot())
            .unwrap_or_default()
    }

    /// Wait for the worker and take back the tree with the walk's outcome.
    pub fn join(&mut self) -> Result<(FilterTree, RefreshOutcome), ControllerError> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None if self.sink.is_some() => return Err(ControllerError::NotStarted),
            None => return Err(ControllerError::AlreadyJoined),
        };
        handle.join().map_err(|_| {
            tracing::error!("Refresh worker panicked");
            ControllerError::WorkerPanicked
        })
    }
}

impl Drop for RefreshController {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.abort();
            if handle.join().is_err() {
                tracing::error!("Refresh worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cache::CacheBudget;
    use crate::pipeline::filters::{DataLoadFilter, SpectrumPlotFilter};

    fn tree() -> FilterTree {
        let mut tree = FilterTree::new(CacheBudget::unlimited().shared());
        let src = tree
            .add_filter(Box::new(DataLoadFilter::synthetic(500)), None)
            .unwrap();
        tree.add_filter(Box::new(SpectrumPlotFilter::new()), Some(src))
            .unwrap();
        tree
    }

    #[test]
    fn test_lifecycle() {
        let mut controller = RefreshController::new();
        assert_eq!(controller.state(), RefreshState::Idle);
        assert_eq!(controller.join().unwrap_err(), ControllerError::NotStarted);

        controller.start(tree()).unwrap();
        let (tree, outcome) = controller.join().unwrap();
        assert_eq!(controller.state(), RefreshState::Completed);
        assert!(outcome.is_completed());
        assert_eq!(outcome.outputs.len(), 1);
        assert_eq!(controller.progress().total_progress, 2);

        let msgs = controller.poll();
        assert!(matches!(
            msgs.last(),
            Some(RefreshMessage::Finished {
                status: RefreshStatus::Completed,
                ..
            })
        ));

        let err = controller.start(tree).unwrap_err();
        assert_eq!(err.tree.len(), 2);
        assert_eq!(controller.join().unwrap_err(), ControllerError::AlreadyJoined);
    }

    #[test]
    fn test_abort_on_finished_is_noop() {
        let mut controller = RefreshController::new();
        assert!(!controller.abort());
        controller.start(tree()).unwrap();
        controller.join().unwrap();
        assert!(!controller.abort());
        assert_eq!(controller.state(), RefreshState::Completed);
    }

    #[test]
    fn test_drop_while_running_joins() {
        let mut controller = RefreshController::new();
        controller.start(tree()).unwrap();
        drop(controller);
    }
}
