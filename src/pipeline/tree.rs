//! The filter forest.
//!
//! Filters live in a flat arena of slots addressed by generational
//! [`FilterId`]s. Parent/child links are ids, roots are kept in insertion
//! order, and children keep the order they were attached in.
//!
//! ```text
//! Data Load ─┬─ Range Filter ─┬─ Spectrum Plot
//!            │                └─ Bounding Box
//!            └─ Ion Clip ───── Voxelise
//! ```
//!
//! Every structural edit validates first, records an undo snapshot, clears
//! the redo stack and then invalidates the caches the edit affects. A
//! rejected edit leaves the tree exactly as it was.

use crate::pipeline::cache::CacheBudget;
use crate::pipeline::error::{TreeError, TreeResult};
use crate::pipeline::filter::Filter;
use crate::pipeline::history::{History, DEFAULT_MAX_UNDO_DEPTH};
use crate::pipeline::id::FilterId;
use crate::pipeline::property::{PropertyEffect, PropertyValue};
use crate::pipeline::stash::{Stash, StashNode};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) filter: Box<dyn Filter>,
    pub(crate) parent: Option<FilterId>,
    pub(crate) children: Vec<FilterId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slots plus the ordered root list. Also the unit of undo history.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<FilterId>,
    len: usize,
}

impl Arena {
    pub(crate) fn node(&self, id: FilterId) -> Option<&Node> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: FilterId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn roots(&self) -> &[FilterId] {
        &self.roots
    }

    fn insert(
        &mut self,
        mut filter: Box<dyn Filter>,
        parent: Option<FilterId>,
        generation: u32,
    ) -> FilterId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation,
                    node: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = FilterId::new(index, generation);
        filter.base_mut().set_id(id);
        self.slots[index as usize] = Slot {
            generation,
            node: Some(Node {
                filter,
                parent,
                children: Vec::new(),
            }),
        };
        self.link(id, parent);
        self.len += 1;
        id
    }

    /// Unlink `id` from its parent's child list (or the roots).
    fn detach(&mut self, id: FilterId) {
        let parent = self.node(id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|&c| c != id);
        } else {
            self.roots.retain(|&c| c != id);
        }
    }

    fn attach(&mut self, id: FilterId, parent: Option<FilterId>) {
        if let Some(node) = self.node_mut(id) {
            node.parent = parent;
        }
        self.link(id, parent);
    }

    fn link(&mut self, id: FilterId, parent: Option<FilterId>) {
        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.push(id);
        } else {
            self.roots.push(id);
        }
    }

    /// Free the slot of `id`. Links must already be cleaned up.
    fn take(&mut self, id: FilterId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        self.free.push(id.index() as u32);
        self.len -= 1;
        Some(node)
    }

    /// `id` and all its descendants, pre-order.
    pub(crate) fn subtree(&self, id: FilterId) -> Vec<FilterId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                out.push(id);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    fn preorder(&self) -> Vec<FilterId> {
        self.roots
            .iter()
            .flat_map(|&root| self.subtree(root))
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|s| s.node.as_ref())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.slots.iter_mut().filter_map(|s| s.node.as_mut())
    }

    /// Configuration-only copy with identical ids.
    fn clone_config(&self) -> Arena {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Slot {
                generation: slot.generation,
                node: slot.node.as_ref().map(|node| {
                    let mut filter = node.filter.clone_config();
                    filter
                        .base_mut()
                        .set_id(FilterId::new(index as u32, slot.generation));
                    Node {
                        filter,
                        parent: node.parent,
                        children: node.children.clone(),
                    }
                }),
            })
            .collect();
        Arena {
            slots,
            free: self.free.clone(),
            roots: self.roots.clone(),
            len: self.len,
        }
    }

    fn release_caches(&mut self, budget: &CacheBudget) {
        for node in self.iter_mut() {
            node.filter.base_mut().cache.clear(budget);
        }
    }
}

/// An ordered forest of filters with undo history and stashes.
#[derive(Debug)]
pub struct FilterTree {
    pub(crate) arena: Arena,
    next_generation: u32,
    history: History<Arena>,
    stashes: Vec<Stash>,
    pub(crate) budget: Arc<CacheBudget>,
}

impl Default for FilterTree {
    fn default() -> Self {
        Self::new(CacheBudget::default().shared())
    }
}

impl Drop for FilterTree {
    fn drop(&mut self) {
        self.arena.release_caches(&self.budget);
    }
}

impl FilterTree {
    pub fn new(budget: Arc<CacheBudget>) -> Self {
        Self {
            arena: Arena::default(),
            next_generation: 0,
            history: History::new(DEFAULT_MAX_UNDO_DEPTH),
            stashes: Vec::new(),
            budget,
        }
    }

    pub fn with_max_undo_depth(mut self, depth: usize) -> Self {
        self.history.set_max_depth(depth);
        self
    }

    pub fn budget(&self) -> &Arc<CacheBudget> {
        &self.budget
    }

    // --- Queries ---

    pub fn len(&self) -> usize {
        self.arena.len
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len == 0
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.arena.node(id).is_some()
    }

    pub fn roots(&self) -> &[FilterId] {
        self.arena.roots()
    }

    /// Children of `id` in order; empty for unknown handles.
    pub fn children(&self, id: FilterId) -> &[FilterId] {
        self.arena
            .node(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: FilterId) -> Option<FilterId> {
        self.arena.node(id)?.parent
    }

    pub fn get(&self, id: FilterId) -> Option<&dyn Filter> {
        self.arena.node(id).map(|n| n.filter.as_ref())
    }

    /// Direct access to a filter.
    ///
    /// Changes made through this bypass undo and cache invalidation; use
    /// [`FilterTree::set_filter_property`] for configuration edits.
    pub fn get_mut(&mut self, id: FilterId) -> Option<&mut dyn Filter> {
        match self.arena.node_mut(id) {
            Some(node) => Some(node.filter.as_mut()),
            None => None,
        }
    }

    /// Every filter, parents before children, roots in order.
    pub fn preorder(&self) -> Vec<FilterId> {
        self.arena.preorder()
    }

    /// Zero for roots.
    pub fn depth(&self, id: FilterId) -> Option<usize> {
        let mut node = self.arena.node(id)?;
        let mut depth = 0;
        while let Some(parent) = node.parent {
            node = self.arena.node(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    /// First filter in pre-order with the given label.
    pub fn find_by_label(&self, label: &str) -> Option<FilterId> {
        self.preorder()
            .into_iter()
            .find(|&id| self.get(id).is_some_and(|f| f.label() == label))
    }

    fn is_descendant(&self, id: FilterId, ancestor: FilterId) -> bool {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    fn require(&self, id: FilterId) -> TreeResult<&Node> {
        self.arena.node(id).ok_or(TreeError::InvalidHandle(id))
    }

    fn require_parent(&self, parent: Option<FilterId>, filter: &dyn Filter) -> TreeResult<()> {
        match parent {
            Some(p) => self.require(p).map(|_| ()),
            None if filter.is_pure_data_source() => Ok(()),
            None => Err(TreeError::RootNotDataSource(filter.type_name())),
        }
    }

    fn next_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        generation
    }

    fn checkpoint(&mut self) {
        let snapshot = self.arena.clone_config();
        self.history.record(snapshot);
    }

    // --- Cache control ---

    /// Clear the cache of `id` and every descendant.
    pub fn invalidate(&mut self, id: FilterId) {
        for sub in self.arena.subtree(id) {
            if let Some(node) = self.arena.node_mut(sub) {
                node.filter.base_mut().cache.clear(&self.budget);
            }
        }
    }

    /// Clear every cache in the tree.
    pub fn purge_cache(&mut self) {
        self.arena.release_caches(&self.budget);
        tracing::info!("Purged all filter caches");
    }

    /// Switch one filter's cache on or off. Not recorded in undo history.
    pub fn set_cache_enabled(&mut self, id: FilterId, enabled: bool) -> TreeResult<()> {
        let node = self
            .arena
            .node_mut(id)
            .ok_or(TreeError::InvalidHandle(id))?;
        node.filter.base_mut().cache.set_enabled(enabled, &self.budget);
        Ok(())
    }

    /// Bytes currently charged to the budget by this tree's caches.
    pub fn cached_bytes(&self) -> u64 {
        self.arena
            .iter()
            .map(|n| n.filter.base().cache().reserved_bytes())
            .sum()
    }

    // --- Structural edits ---

    /// Insert `filter` under `parent`, or as a new root. Only pure data
    /// sources may be roots.
    pub fn add_filter(
        &mut self,
        filter: Box<dyn Filter>,
        parent: Option<FilterId>,
    ) -> TreeResult<FilterId> {
        if let Err(e) = self.require_parent(parent, filter.as_ref()) {
            tracing::warn!("Rejected add of '{}': {}", filter.label(), e);
            return Err(e);
        }
        self.checkpoint();
        let label = filter.label().to_string();
        let generation = self.next_generation();
        let id = self.arena.insert(filter, parent, generation);
        tracing::info!("Added filter '{}' as {}", label, id);
        Ok(id)
    }

    /// Remove `id` and everything below it.
    pub fn remove_filter_subtree(&mut self, id: FilterId) -> TreeResult<()> {
        self.require(id)?;
        self.checkpoint();
        let removed = self.remove_subtree_inner(id);
        tracing::info!("Removed {} filter(s) starting at {}", removed, id);
        Ok(())
    }

    fn remove_subtree_inner(&mut self, id: FilterId) -> usize {
        self.arena.detach(id);
        let doomed = self.arena.subtree(id);
        for &sub in &doomed {
            if let Some(mut node) = self.arena.take(sub) {
                node.filter.base_mut().cache.clear(&self.budget);
            }
        }
        doomed.len()
    }

    /// Move `id` (with its subtree) below `new_parent`, or make it a root.
    pub fn reparent_filter(&mut self, id: FilterId, new_parent: Option<FilterId>) -> TreeResult<()> {
        let node = self.require(id)?;
        if node.parent == new_parent {
            return Ok(());
        }
        self.require_parent(new_parent, node.filter.as_ref())?;
        if let Some(p) = new_parent {
            if p == id || self.is_descendant(p, id) {
                tracing::warn!("Rejected move of {} below {}: cycle", id, p);
                return Err(TreeError::CycleDetected);
            }
        }
        self.checkpoint();
        self.arena.detach(id);
        self.arena.attach(id, new_parent);
        self.invalidate(id);
        tracing::info!("Moved {} below {:?}", id, new_parent);
        Ok(())
    }

    /// Copy `id` and its subtree (configuration only) below `new_parent`.
    /// Returns the id of the copy's root.
    pub fn copy_filter(&mut self, id: FilterId, new_parent: Option<FilterId>) -> TreeResult<FilterId> {
        let node = self.require(id)?;
        self.require_parent(new_parent, node.filter.as_ref())?;
        let copy = self.subtree_copy(id)?;
        self.checkpoint();
        let new_id = self.splice(copy, new_parent);
        tracing::info!("Copied {} to {}", id, new_id);
        Ok(new_id)
    }

    /// Rename a filter. Labels are cosmetic; no cache is touched.
    pub fn set_filter_string(&mut self, id: FilterId, label: &str) -> TreeResult<()> {
        if self.require(id)?.filter.label() == label {
            return Ok(());
        }
        self.checkpoint();
        if let Some(node) = self.arena.node_mut(id) {
            node.filter.set_label(label);
        }
        Ok(())
    }

    /// Validate and apply one property of `id`.
    ///
    /// `Recompute` invalidates the filter and its descendants; any effect
    /// other than `Unchanged` is recorded in the undo history.
    pub fn set_filter_property(
        &mut self,
        id: FilterId,
        key: &str,
        value: &PropertyValue,
    ) -> TreeResult<PropertyEffect> {
        self.require(id)?;
        let before = self.arena.clone_config();
        let node = self
            .arena
            .node_mut(id)
            .ok_or(TreeError::InvalidHandle(id))?;
        let effect = match node.filter.set_property(key, value) {
            Ok(effect) => effect,
            Err(e) => {
                tracing::warn!("Rejected property {}={} on {}: {}", key, value, id, e);
                return Err(e.into());
            }
        };
        if effect != PropertyEffect::Unchanged {
            self.history.record(before);
        }
        if effect == PropertyEffect::Recompute {
            self.invalidate(id);
        }
        Ok(effect)
    }

    fn subtree_copy(&self, id: FilterId) -> TreeResult<StashNode> {
        let node = self.require(id)?;
        let children = node
            .children
            .iter()
            .map(|&c| self.subtree_copy(c))
            .collect::<TreeResult<_>>()?;
        Ok(StashNode::new(node.filter.clone_config(), children))
    }

    fn splice(&mut self, node: StashNode, parent: Option<FilterId>) -> FilterId {
        let (filter, children) = node.into_parts();
        let generation = self.next_generation();
        let id = self.arena.insert(filter, parent, generation);
        for child in children {
            self.splice(child, Some(id));
        }
        id
    }

    // --- Undo / redo ---

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn max_undo_depth(&self) -> usize {
        self.history.max_depth()
    }

    pub fn set_max_undo_depth(&mut self, depth: usize) {
        self.history.set_max_depth(depth);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Restore the configuration before the last edit. All caches are
    /// dropped; handles stay valid for filters present in the restored state.
    pub fn pop_undo_stack(&mut self) -> TreeResult<()> {
        let arena = &self.arena;
        let previous = self
            .history
            .undo(|| arena.clone_config())
            .ok_or(TreeError::NothingToUndo)?;
        self.replace_arena(previous);
        tracing::info!("Undo");
        Ok(())
    }

    pub fn pop_redo_stack(&mut self) -> TreeResult<()> {
        let arena = &self.arena;
        let next = self
            .history
            .redo(|| arena.clone_config())
            .ok_or(TreeError::NothingToRedo)?;
        self.replace_arena(next);
        tracing::info!("Redo");
        Ok(())
    }

    fn replace_arena(&mut self, arena: Arena) {
        self.arena.release_caches(&self.budget);
        self.arena = arena;
    }

    // --- Stashes ---

    /// Keep a configuration copy of the subtree at `id` under `name`.
    /// The tree itself is unchanged. Returns the stash index.
    pub fn stash_filters(&mut self, id: FilterId, name: &str) -> TreeResult<usize> {
        let root = self.subtree_copy(id)?;
        self.insert_stash(Stash::new(name.trim().to_string(), root))
    }

    pub(crate) fn insert_stash(&mut self, stash: Stash) -> TreeResult<usize> {
        if stash.name().is_empty() {
            return Err(TreeError::EmptyStashName);
        }
        if self.stashes.iter().any(|s| s.name() == stash.name()) {
            return Err(TreeError::StashNameTaken(stash.name().to_string()));
        }
        tracing::info!("Stashed '{}'", stash.name());
        self.stashes.push(stash);
        Ok(self.stashes.len() - 1)
    }

    /// Insert a fresh copy of stash `index` below `parent`.
    pub fn add_stashed_to_filters(
        &mut self,
        parent: Option<FilterId>,
        index: usize,
    ) -> TreeResult<FilterId> {
        let stash = self.stashes.get(index).ok_or(TreeError::InvalidStash(index))?;
        self.require_parent(parent, stash.root().filter())?;
        let copy = stash.root().clone_config();
        self.checkpoint();
        Ok(self.splice(copy, parent))
    }

    pub fn stashes(&self) -> &[Stash] {
        &self.stashes
    }

    pub fn stash_tree(&self, index: usize) -> Option<&Stash> {
        self.stashes.get(index)
    }

    pub fn delete_stash(&mut self, index: usize) -> TreeResult<Stash> {
        if index >= self.stashes.len() {
            return Err(TreeError::InvalidStash(index));
        }
        Ok(self.stashes.remove(index))
    }

    // --- Monitoring and hazards ---

    /// Some filter saw its external input change.
    pub fn monitor_needs_refresh(&self) -> bool {
        self.arena.iter().any(|n| n.filter.monitor_needs_refresh())
    }

    /// Invalidate every filter whose external input changed. Returns them.
    pub fn refresh_monitored(&mut self) -> Vec<FilterId> {
        let changed: Vec<FilterId> = self
            .preorder()
            .into_iter()
            .filter(|&id| self.get(id).is_some_and(|f| f.monitor_needs_refresh()))
            .collect();
        for &id in &changed {
            self.invalidate(id);
        }
        changed
    }

    /// The tree or a stash contains a filter that can run external code.
    pub fn has_hazardous_filters(&self) -> bool {
        self.arena.iter().any(|n| n.filter.can_be_hazardous())
            || self.stashes.iter().any(|s| s.root().has_hazardous())
    }

    /// Remove hazardous filters with their subtrees, from the tree and from
    /// stashes. The tree part is one undo step. Returns how many filters went.
    pub fn strip_hazardous_filters(&mut self) -> usize {
        if !self.has_hazardous_filters() {
            return 0;
        }
        let mut removed = 0;
        let hazardous: Vec<FilterId> = self
            .preorder()
            .into_iter()
            .filter(|&id| self.get(id).is_some_and(|f| f.can_be_hazardous()))
            .collect();
        if !hazardous.is_empty() {
            self.checkpoint();
            for id in hazardous {
                // Already gone with a hazardous ancestor
                if self.contains(id) {
                    removed += self.remove_subtree_inner(id);
                }
            }
        }

        let before = self.stashes.len();
        self.stashes.retain(|s| {
            if s.root().filter().can_be_hazardous() {
                removed += s.root().num_filters();
                false
            } else {
                true
            }
        });
        if self.stashes.len() != before {
            tracing::info!("Dropped {} hazardous stash(es)", before - self.stashes.len());
        }
        for stash in &mut self.stashes {
            removed += stash.root_mut().strip_hazardous_children();
        }
        tracing::info!("Stripped {} hazardous filter(s)", removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::{
        BoundingBoxFilter, DataLoadFilter, ExternalProgramFilter, SpectrumPlotFilter,
    };

    fn tree() -> FilterTree {
        FilterTree::new(CacheBudget::unlimited().shared())
    }

    fn source() -> Box<dyn Filter> {
        Box::new(DataLoadFilter::synthetic(10))
    }

    #[test]
    fn test_add_and_query() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        let b = t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(a)).unwrap();
        let c = t.add_filter(Box::new(BoundingBoxFilter::new()), Some(a)).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.roots(), &[a]);
        assert_eq!(t.children(a), &[b, c]);
        assert_eq!(t.parent(b), Some(a));
        assert_eq!(t.depth(c), Some(1));
        assert_eq!(t.preorder(), vec![a, b, c]);
        assert_eq!(t.get(b).unwrap().id(), b);
        assert_eq!(t.find_by_label("Bounding Box"), Some(c));
    }

    #[test]
    fn test_non_source_root_rejected() {
        let mut t = tree();
        assert_eq!(
            t.add_filter(Box::new(SpectrumPlotFilter::new()), None),
            Err(TreeError::RootNotDataSource("Spectrum Plot"))
        );
        assert!(t.is_empty());
        assert!(!t.can_undo());
    }

    #[test]
    fn test_stale_handle_never_aliases() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        t.remove_filter_subtree(a).unwrap();
        let b = t.add_filter(source(), None).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!t.contains(a));
        assert!(t.get(a).is_none());
        assert_eq!(
            t.remove_filter_subtree(a),
            Err(TreeError::InvalidHandle(a))
        );
    }

    #[test]
    fn test_reparent_cycle_rejected() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        let b = t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(a)).unwrap();
        let c = t.add_filter(Box::new(BoundingBoxFilter::new()), Some(b)).unwrap();
        assert_eq!(t.reparent_filter(a, Some(c)), Err(TreeError::CycleDetected));
        assert_eq!(t.reparent_filter(a, Some(a)), Err(TreeError::CycleDetected));
        assert_eq!(
            t.reparent_filter(b, None),
            Err(TreeError::RootNotDataSource("Spectrum Plot"))
        );
        t.reparent_filter(c, Some(a)).unwrap();
        assert_eq!(t.children(a), &[b, c]);
        assert!(t.children(b).is_empty());
    }

    #[test]
    fn test_copy_into_own_subtree() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        let b = t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(a)).unwrap();
        let copy = t.copy_filter(a, Some(b)).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.parent(copy), Some(b));
        assert_eq!(t.children(copy).len(), 1);
    }

    #[test]
    fn test_undo_redo_restores_structure_and_handles() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        let b = t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(a)).unwrap();
        t.remove_filter_subtree(a).unwrap();
        assert!(t.is_empty());

        t.pop_undo_stack().unwrap();
        assert_eq!(t.preorder(), vec![a, b]);
        assert_eq!(t.get(b).unwrap().id(), b);

        t.pop_redo_stack().unwrap();
        assert!(t.is_empty());
        assert_eq!(t.pop_redo_stack(), Err(TreeError::NothingToRedo));
    }

    #[test]
    fn test_edit_after_undo_clears_redo() {
        let mut t = tree();
        t.add_filter(source(), None).unwrap();
        t.pop_undo_stack().unwrap();
        assert!(t.can_redo());
        t.add_filter(source(), None).unwrap();
        assert!(!t.can_redo());
    }

    #[test]
    fn test_undo_depth_is_bounded() {
        let mut t = tree().with_max_undo_depth(3);
        for _ in 0..5 {
            t.add_filter(source(), None).unwrap();
        }
        for _ in 0..3 {
            t.pop_undo_stack().unwrap();
        }
        assert_eq!(t.pop_undo_stack(), Err(TreeError::NothingToUndo));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_property_edits_are_undoable() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        t.clear_history();
        let count = PropertyValue::Int(25);
        assert_eq!(
            t.set_filter_property(a, "synthetic_count", &count).unwrap(),
            PropertyEffect::Recompute
        );
        assert_eq!(
            t.set_filter_property(a, "synthetic_count", &count).unwrap(),
            PropertyEffect::Unchanged
        );
        assert!(t
            .set_filter_property(a, "synthetic_count", &PropertyValue::from("x"))
            .is_err());
        t.pop_undo_stack().unwrap();
        assert!(!t.can_undo());
        let props = t.get(a).unwrap().properties();
        let count = props.iter().find(|p| p.key == "synthetic_count").unwrap();
        assert_eq!(count.value, PropertyValue::Int(10));
    }

    #[test]
    fn test_stash_roundtrip() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(a)).unwrap();
        let idx = t.stash_filters(a, "pair").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.stash_filters(a, "pair"), Err(TreeError::StashNameTaken("pair".into())));
        assert_eq!(t.stash_filters(a, "  "), Err(TreeError::EmptyStashName));
        assert_eq!(t.stash_tree(idx).unwrap().root().num_filters(), 2);

        let copy = t.add_stashed_to_filters(None, idx).unwrap();
        assert_eq!(t.roots().len(), 2);
        assert_eq!(t.children(copy).len(), 1);
        assert_eq!(t.add_stashed_to_filters(None, 7), Err(TreeError::InvalidStash(7)));

        t.delete_stash(idx).unwrap();
        assert!(t.stashes().is_empty());
    }

    #[test]
    fn test_strip_hazardous() {
        let mut t = tree();
        let a = t.add_filter(source(), None).unwrap();
        let ext = t
            .add_filter(Box::new(ExternalProgramFilter::with_command("true")), Some(a))
            .unwrap();
        t.add_filter(Box::new(SpectrumPlotFilter::new()), Some(ext)).unwrap();
        t.stash_filters(ext, "ext").unwrap();
        assert!(t.has_hazardous_filters());

        assert_eq!(t.strip_hazardous_filters(), 4);
        assert!(!t.has_hazardous_filters());
        assert_eq!(t.len(), 1);
        assert!(t.stashes().is_empty());
        assert_eq!(t.strip_hazardous_filters(), 0);
    }
}
