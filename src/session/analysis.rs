//! UI-side owner of a filter tree.
//!
//! The session holds the tree between refreshes and lends it to a
//! [`RefreshController`] while one runs. Edits made while the tree is lent
//! out are rejected with [`SessionError::Locked`]. [`AnalysisSession::tick`]
//! is meant to be called from a UI timer: it collects finished refreshes,
//! polls filters for external changes and starts the next refresh once the
//! previous one has been collected.

use crate::config::{EngineConfig, RefreshConfig};
use crate::pipeline::bridge::RefreshMessage;
use crate::pipeline::cache::CacheBudget;
use crate::pipeline::context::ProgressSnapshot;
use crate::pipeline::controller::{ControllerError, RefreshController, StartError};
use crate::pipeline::error::{TreeError, TreeResult};
use crate::pipeline::id::FilterId;
use crate::pipeline::property::{PropertyEffect, PropertyValue};
use crate::pipeline::tree::FilterTree;
use crate::pipeline::walk::{RefreshOutcome, RefreshStatus};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("A refresh is running; the filter tree cannot be changed")]
    Locked,

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// What one [`AnalysisSession::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A refresh ended and its result was collected.
    pub finished: Option<RefreshStatus>,
    /// A new refresh was started.
    pub started: bool,
    /// A refresh is in flight after this tick.
    pub running: bool,
    /// Filters invalidated because their external input changed.
    pub monitored: Vec<FilterId>,
}

#[derive(Debug)]
pub struct AnalysisSession {
    tree: Option<FilterTree>,
    controller: Option<RefreshController>,
    config: RefreshConfig,
    budget: Arc<CacheBudget>,
    max_undo_depth: usize,
    refresh_requested: bool,
    last_outcome: Option<RefreshOutcome>,
    last_monitor_check: Option<Instant>,
    messages: Vec<RefreshMessage>,
}

impl AnalysisSession {
    pub fn new(tree: FilterTree, config: RefreshConfig) -> Self {
        Self {
            budget: tree.budget().clone(),
            max_undo_depth: tree.max_undo_depth(),
            tree: Some(tree),
            controller: None,
            config,
            refresh_requested: false,
            last_outcome: None,
            last_monitor_check: None,
            messages: Vec::new(),
        }
    }

    /// An empty tree configured from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.new_tree(), config.refresh.clone())
    }

    pub fn is_refreshing(&self) -> bool {
        self.controller.is_some()
    }

    pub fn refresh_requested(&self) -> bool {
        self.refresh_requested
    }

    /// The tree, unless a refresh holds it.
    pub fn tree(&self) -> Result<&FilterTree, SessionError> {
        self.tree.as_ref().ok_or(SessionError::Locked)
    }

    /// Run a structural edit and schedule a refresh if it succeeds.
    pub fn edit<R>(
        &mut self,
        f: impl FnOnce(&mut FilterTree) -> TreeResult<R>,
    ) -> Result<R, SessionError> {
        let tree = self.tree.as_mut().ok_or(SessionError::Locked)?;
        let result = f(tree)?;
        self.refresh_requested = true;
        Ok(result)
    }

    /// Set one property; only output-changing edits schedule a refresh.
    pub fn set_filter_property(
        &mut self,
        id: FilterId,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, SessionError> {
        let tree = self.tree.as_mut().ok_or(SessionError::Locked)?;
        let effect = tree.set_filter_property(id, key, value)?;
        if effect.needs_update() {
            self.refresh_requested = true;
        }
        Ok(effect)
    }

    pub fn undo(&mut self) -> Result<(), SessionError> {
        self.edit(FilterTree::pop_undo_stack)
    }

    pub fn redo(&mut self) -> Result<(), SessionError> {
        self.edit(FilterTree::pop_redo_stack)
    }

    /// Refresh at the next opportunity.
    pub fn request_refresh(&mut self) {
        self.refresh_requested = true;
    }

    /// Start a refresh now. While one is running the request is remembered
    /// instead and `false` is returned.
    pub fn start_refresh(&mut self) -> bool {
        let Some(tree) = self.tree.take() else {
            self.refresh_requested = true;
            return false;
        };
        let mut controller =
            RefreshController::new().with_abort_poll_stride(self.config.abort_poll_stride);
        if let Err(StartError { tree }) = controller.start(tree) {
            self.tree = Some(tree);
            return false;
        }
        self.refresh_requested = false;
        self.controller = Some(controller);
        true
    }

    /// Ask the running refresh to stop. Collect it with `tick` or
    /// `wait_for_refresh`.
    pub fn abort_refresh(&mut self) -> bool {
        self.controller.as_ref().is_some_and(|c| c.abort())
    }

    /// One timer step. See the module docs.
    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        let mut report = TickReport::default();

        if let Some(controller) = &self.controller {
            if controller.is_finished() {
                report.finished = Some(self.harvest()?);
            } else {
                self.messages.extend(controller.poll());
            }
        }

        let due = self
            .last_monitor_check
            .map_or(true, |t| t.elapsed() >= self.config.monitor_interval());
        if due {
            if let Some(tree) = self.tree.as_mut() {
                self.last_monitor_check = Some(Instant::now());
                if tree.monitor_needs_refresh() {
                    report.monitored = tree.refresh_monitored();
                    tracing::debug!("{} filter(s) changed externally", report.monitored.len());
                    self.refresh_requested = true;
                }
            }
        }

        if self.refresh_requested && self.controller.is_none() {
            report.started = self.start_refresh();
        }
        report.running = self.is_refreshing();
        Ok(report)
    }

    /// Block until the running refresh ends and collect it.
    pub fn wait_for_refresh(&mut self) -> Result<Option<RefreshStatus>, SessionError> {
        if self.controller.is_none() {
            return Ok(None);
        }
        self.harvest().map(Some)
    }

    fn harvest(&mut self) -> Result<RefreshStatus, SessionError> {
        let Some(mut controller) = self.controller.take() else {
            return Err(ControllerError::NotStarted.into());
        };
        let joined = controller.join();
        self.messages.extend(controller.poll());
        match joined {
            Ok((tree, outcome)) => {
                let status = outcome.status;
                self.tree = Some(tree);
                self.last_outcome = Some(outcome);
                Ok(status)
            }
            Err(e) => {
                tracing::error!("Refresh lost the filter tree: {}", e);
                self.tree = Some(
                    FilterTree::new(self.budget.clone()).with_max_undo_depth(self.max_undo_depth),
                );
                Err(e.into())
            }
        }
    }

    pub fn last_outcome(&self) -> Option<&RefreshOutcome> {
        self.last_outcome.as_ref()
    }

    /// Worker messages collected so far.
    pub fn take_messages(&mut self) -> Vec<RefreshMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.controller.as_ref().map(RefreshController::progress)
    }

    /// Stop any refresh and hand back the tree.
    pub fn into_tree(mut self) -> Result<FilterTree, SessionError> {
        if self.controller.is_some() {
            self.abort_refresh();
            self.wait_for_refresh()?;
        }
        self.tree.take().ok_or(SessionError::Locked)
    }
}
