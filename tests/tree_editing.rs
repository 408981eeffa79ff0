//! Integration tests for structural edits
//!
//! These tests validate tree editing as a UI drives it:
//! - Add, move, copy and remove with undo/redo
//! - Handle stability and cycle rejection
//! - Stashes and hazardous filter stripping

mod common;

use common::builders::TreeBuilder;
use common::ctx;
use ionflow::pipeline::filters::{
    BoundingBoxFilter, ExternalProgramFilter, RangeFilter, SpectrumPlotFilter,
};
use ionflow::pipeline::{Filter, PropertyValue, TreeError};

#[test]
fn test_edit_undo_redo_cycle() {
    let mut builder = TreeBuilder::synthetic(20);
    let range = builder.add(RangeFilter::new(), None);
    let mut tree = builder.build();

    let plot = tree
        .add_filter(Box::new(SpectrumPlotFilter::new()), Some(range))
        .unwrap();
    tree.set_filter_string(plot, "Masses").unwrap();
    tree.set_filter_property(plot, "bin_width", &PropertyValue::Float(2.0))
        .unwrap();
    assert_eq!(tree.len(), 3);

    tree.pop_undo_stack().unwrap();
    tree.pop_undo_stack().unwrap();
    assert_eq!(tree.get(plot).unwrap().label(), "Spectrum Plot");
    tree.pop_undo_stack().unwrap();
    assert_eq!(tree.len(), 2);
    assert!(!tree.contains(plot));
    assert_eq!(tree.pop_undo_stack(), Err(TreeError::NothingToUndo));

    tree.pop_redo_stack().unwrap();
    tree.pop_redo_stack().unwrap();
    assert_eq!(tree.get(plot).unwrap().label(), "Masses");
    assert_eq!(tree.parent(plot), Some(range));
}

#[test]
fn test_undo_drops_caches_and_refresh_recovers() {
    let mut builder = TreeBuilder::synthetic(20);
    let range = builder.add(RangeFilter::new(), None);
    let mut tree = builder.build();
    let first = tree.refresh(&ctx(&tree));
    assert!(tree.cached_bytes() > 0);

    tree.add_filter(Box::new(BoundingBoxFilter::new()), Some(range))
        .unwrap();
    tree.pop_undo_stack().unwrap();
    assert_eq!(tree.cached_bytes(), 0);
    assert_eq!(tree.budget().used_bytes(), 0);

    let second = tree.refresh(&ctx(&tree));
    assert_eq!(second.stats.refreshed, 2);
    let a: Vec<_> = first.streams().map(|s| s.data().clone()).collect();
    let b: Vec<_> = second.streams().map(|s| s.data().clone()).collect();
    assert_eq!(a, b);
}

#[test]
fn test_move_rejects_cycles() {
    let mut builder = TreeBuilder::synthetic(20);
    let a = builder.add(RangeFilter::new(), None);
    let b = builder.add(BoundingBoxFilter::new(), Some(a));
    let mut tree = builder.build();

    assert_eq!(tree.reparent_filter(a, Some(b)), Err(TreeError::CycleDetected));
    assert_eq!(tree.reparent_filter(a, Some(a)), Err(TreeError::CycleDetected));
    assert!(matches!(
        tree.reparent_filter(a, None),
        Err(TreeError::RootNotDataSource(_))
    ));
    assert_eq!(tree.parent(b), Some(a));
    assert!(!tree.can_undo());
}

#[test]
fn test_move_invalidates_moved_subtree() {
    let mut builder = TreeBuilder::synthetic(20);
    let range = builder.add(RangeFilter::new(), None);
    let plot = builder.add(SpectrumPlotFilter::new(), Some(range));
    let src = builder.source();
    let mut tree = builder.build();
    tree.refresh(&ctx(&tree));

    tree.reparent_filter(plot, Some(src)).unwrap();
    assert!(!tree.get(plot).unwrap().base().cache().is_valid());
    assert!(tree.get(range).unwrap().base().cache().is_valid());
    assert_eq!(tree.children(src), &[range, plot]);
}

#[test]
fn test_copy_and_remove_keep_handles_distinct() {
    let mut builder = TreeBuilder::synthetic(20);
    let range = builder.add(RangeFilter::new(), None);
    builder.add(SpectrumPlotFilter::new(), Some(range));
    let src = builder.source();
    let mut tree = builder.build();

    let copy = tree.copy_filter(range, Some(src)).unwrap();
    assert_ne!(copy, range);
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.children(copy).len(), 1);

    tree.remove_filter_subtree(range).unwrap();
    assert_eq!(tree.len(), 3);
    assert!(!tree.contains(range));
    assert!(tree.get(range).is_none());
    assert_eq!(
        tree.remove_filter_subtree(range),
        Err(TreeError::InvalidHandle(range))
    );

    let fresh = tree
        .add_filter(Box::new(BoundingBoxFilter::new()), Some(src))
        .unwrap();
    assert_ne!(fresh, range);
    assert!(!tree.contains(range));
}

#[test]
fn test_stash_round_trip() {
    let mut builder = TreeBuilder::synthetic(20);
    let range = builder.add(RangeFilter::new(), None);
    builder.set(range, "ranges", "Fe:1..4");
    builder.add(SpectrumPlotFilter::new(), Some(range));
    let src = builder.source();
    let mut tree = builder.build();

    let index = tree.stash_filters(range, "  iron  ").unwrap();
    assert_eq!(tree.stash_tree(index).unwrap().name(), "iron");
    assert_eq!(tree.stash_tree(index).unwrap().root().num_filters(), 2);
    assert!(!tree.can_undo());
    assert!(matches!(
        tree.stash_filters(range, "iron"),
        Err(TreeError::StashNameTaken(_))
    ));
    assert_eq!(tree.stash_filters(range, " "), Err(TreeError::EmptyStashName));

    tree.remove_filter_subtree(range).unwrap();
    let restored = tree.add_stashed_to_filters(Some(src), index).unwrap();
    assert_eq!(tree.len(), 3);
    let ranges = tree
        .get(restored)
        .unwrap()
        .properties()
        .into_iter()
        .find(|p| p.key == "ranges")
        .unwrap();
    assert!(ranges.value.as_str().unwrap().contains("Fe"));

    assert!(matches!(
        tree.add_stashed_to_filters(None, index),
        Err(TreeError::RootNotDataSource(_))
    ));
    tree.delete_stash(index).unwrap();
    assert!(tree.stashes().is_empty());
}

#[test]
fn test_strip_hazardous_is_one_undo_step() {
    let mut builder = TreeBuilder::synthetic(20);
    let ext = builder.add(ExternalProgramFilter::with_command("true"), None);
    builder.add(SpectrumPlotFilter::new(), Some(ext));
    builder.add(BoundingBoxFilter::new(), None);
    let mut tree = builder.build();
    assert!(tree.has_hazardous_filters());

    assert_eq!(tree.strip_hazardous_filters(), 2);
    assert!(!tree.has_hazardous_filters());
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.strip_hazardous_filters(), 0);

    tree.pop_undo_stack().unwrap();
    assert_eq!(tree.len(), 4);
    assert!(tree.has_hazardous_filters());
}
