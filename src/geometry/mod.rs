//! Geometry helpers called from filter bodies.
//!
//! Long-running helpers take the same abort flag the refresh uses and a
//! progress counter, so a filter calling them stays responsive to abort.

mod hull;

pub use hull::{compute_hull, HullError};
