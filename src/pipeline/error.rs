//! Pipeline-specific error types.
//!
//! Refresh failures carry numeric codes: `0` is success and never appears in
//! an error, small positive codes are private to each filter type and are
//! resolved through `Filter::specific_error_string`, codes at or above
//! [`FILTERTREE_REFRESH_ERR_BEGIN`] belong to the tree itself, and
//! [`FILTER_ERR_ABORT`] marks a cooperative abort.

use crate::pipeline::id::FilterId;
use crate::pipeline::property::PropertyError;
use thiserror::Error;

pub type ErrorCode = u32;

/// First code reserved for tree-level refresh errors.
pub const FILTERTREE_REFRESH_ERR_BEGIN: ErrorCode = 10_000;

/// Code reported when a filter stopped because abort was requested.
pub const FILTER_ERR_ABORT: ErrorCode = 1_000_000;

/// Errors raised by the tree while walking, not by a filter body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRefreshError {
    /// A filter produced a stream outside its declared emit mask, or
    /// forwarded a kind it declared blocked.
    MaskViolation,
    /// A root that is not a pure data source was encountered.
    RootNotDataSource,
}

impl TreeRefreshError {
    const ALL: [TreeRefreshError; 2] = [
        TreeRefreshError::MaskViolation,
        TreeRefreshError::RootNotDataSource,
    ];

    pub fn code(self) -> ErrorCode {
        FILTERTREE_REFRESH_ERR_BEGIN
            + match self {
                TreeRefreshError::MaskViolation => 0,
                TreeRefreshError::RootNotDataSource => 1,
            }
    }

    pub fn from_code(code: ErrorCode) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }

    pub fn message(self) -> &'static str {
        match self {
            TreeRefreshError::MaskViolation => {
                "Filter output did not match its declared stream masks"
            }
            TreeRefreshError::RootNotDataSource => {
                "Only data source filters can be placed at the top of the tree"
            }
        }
    }
}

/// Why a filter's refresh stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Refresh aborted")]
    Abort,

    #[error("Filter error code {0}")]
    Filter(ErrorCode),

    #[error("{}", .0.message())]
    Tree(TreeRefreshError),
}

impl RefreshError {
    pub fn code(self) -> ErrorCode {
        match self {
            RefreshError::Abort => FILTER_ERR_ABORT,
            RefreshError::Filter(code) => code,
            RefreshError::Tree(e) => e.code(),
        }
    }

    pub fn is_abort(self) -> bool {
        self == RefreshError::Abort
    }
}

/// Rejected structural edits. The tree is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Filter {0} does not exist")]
    InvalidHandle(FilterId),

    #[error("Moving a filter below its own descendant would create a cycle")]
    CycleDetected,

    #[error("'{0}' is not a data source and cannot be a top-level filter")]
    RootNotDataSource(&'static str),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("No stash at index {0}")]
    InvalidStash(usize),

    #[error("A stash named '{0}' already exists")]
    StashNameTaken(String),

    #[error("Stash name cannot be empty")]
    EmptyStashName,

    #[error(transparent)]
    Property(#[from] PropertyError),
}

pub type TreeResult<T> = std::result::Result<T, TreeError>;

/// Filter types refuse to become default templates when hazardous.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' can run external commands and cannot be copied as a template")]
pub struct HazardousCloneRefused(pub &'static str);

/// Resolve a tree-level code to its message.
pub fn tree_error_string(code: ErrorCode) -> Option<&'static str> {
    TreeRefreshError::from_code(code).map(TreeRefreshError::message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_disjoint() {
        for e in TreeRefreshError::ALL {
            assert!(e.code() >= FILTERTREE_REFRESH_ERR_BEGIN);
            assert_ne!(e.code(), FILTER_ERR_ABORT);
            assert_eq!(TreeRefreshError::from_code(e.code()), Some(e));
        }
        assert_eq!(RefreshError::Abort.code(), FILTER_ERR_ABORT);
        assert_eq!(RefreshError::Filter(3).code(), 3);
        assert!(tree_error_string(3).is_none());
    }

    #[test]
    fn test_error_display() {
        let err = RefreshError::Tree(TreeRefreshError::MaskViolation);
        assert!(err.to_string().contains("stream masks"));
        let err = TreeError::RootNotDataSource("Spectrum Plot");
        assert!(err.to_string().contains("Spectrum Plot"));
    }
}
