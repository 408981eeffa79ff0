//! Bounded undo/redo stacks.

use std::collections::VecDeque;

/// Default number of undo steps kept.
pub const DEFAULT_MAX_UNDO_DEPTH: usize = 10;

/// Undo and redo stacks of whole snapshots.
///
/// Recording a new edit clears the redo stack. Both stacks hold at most
/// `max_depth` snapshots; when one is full its oldest snapshot is dropped.
#[derive(Debug)]
pub(crate) struct History<T> {
    undo: VecDeque<T>,
    redo: VecDeque<T>,
    max_depth: usize,
}

impl<T> History<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
        while self.undo.len() > max_depth {
            self.undo.pop_front();
        }
        while self.redo.len() > max_depth {
            self.redo.pop_front();
        }
    }

    /// Record the state before an edit.
    pub fn record(&mut self, before: T) {
        self.redo.clear();
        if self.max_depth == 0 {
            return;
        }
        if self.undo.len() == self.max_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(before);
    }

    /// Swap `current` for the most recent undo snapshot.
    pub fn undo(&mut self, current: impl FnOnce() -> T) -> Option<T> {
        let previous = self.undo.pop_back()?;
        self.redo.push_back(current());
        if self.redo.len() > self.max_depth {
            self.redo.pop_front();
        }
        Some(previous)
    }

    /// Swap `current` for the most recent redo snapshot.
    pub fn redo(&mut self, current: impl FnOnce() -> T) -> Option<T> {
        let next = self.redo.pop_back()?;
        self.undo.push_back(current());
        if self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_swap() {
        let mut h = History::new(4);
        let mut state = 0;
        for next in 1..=3 {
            h.record(state);
            state = next;
        }
        state = h.undo(|| state).unwrap();
        assert_eq!(state, 2);
        state = h.undo(|| state).unwrap();
        assert_eq!(state, 1);
        state = h.redo(|| state).unwrap();
        assert_eq!(state, 2);
        assert_eq!((h.undo_len(), h.redo_len()), (2, 1));
    }

    #[test]
    fn test_record_clears_redo() {
        let mut h = History::new(4);
        h.record(0);
        assert_eq!(h.undo(|| 1), Some(0));
        assert!(h.can_redo());
        h.record(0);
        assert!(!h.can_redo());
    }

    #[test]
    fn test_depth_bound_drops_oldest() {
        let mut h = History::new(2);
        h.record(1);
        h.record(2);
        h.record(3);
        assert_eq!(h.undo_len(), 2);
        assert_eq!(h.undo(|| 4), Some(3));
        assert_eq!(h.undo(|| 3), Some(2));
        assert_eq!(h.undo(|| 2), None);
    }

    #[test]
    fn test_shrinking_depth_bounds_redo() {
        let mut h = History::new(4);
        let mut state = 0;
        for next in 1..=4 {
            h.record(state);
            state = next;
        }
        for _ in 0..4 {
            state = h.undo(|| state).unwrap();
        }
        assert_eq!((state, h.redo_len()), (0, 4));

        h.set_max_depth(2);
        assert_eq!(h.redo_len(), 2);
        state = h.redo(|| state).unwrap();
        assert_eq!(state, 1);
        state = h.redo(|| state).unwrap();
        assert_eq!(state, 2);
        assert_eq!(h.redo(|| state), None);
        assert_eq!(h.undo_len(), 2);
    }

    #[test]
    fn test_redo_never_exceeds_depth() {
        let mut h = History::new(1);
        h.record(0);
        assert_eq!(h.undo(|| 1), Some(0));
        h.set_max_depth(0);
        assert!(!h.can_redo());
        assert_eq!(h.redo(|| 0), None);
    }

    #[test]
    fn test_zero_depth_keeps_nothing() {
        let mut h = History::new(0);
        h.record(1);
        assert!(!h.can_undo());
    }
}
