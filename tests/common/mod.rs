//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod plugins;

use ionflow::pipeline::{ExecutionContext, FilterTree};
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Context sharing the tree's cache budget
pub fn ctx(tree: &FilterTree) -> ExecutionContext {
    ExecutionContext::new(tree.budget().clone())
}

/// Poll `cond` until it holds, panicking after `test_timeout()`
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < test_timeout(), "Timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
