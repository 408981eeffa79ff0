//! Planar convex hull (Andrew's monotone chain).

use crate::pipeline::context::AbortFlag;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HullError {
    #[error("Not enough memory to compute the hull")]
    NoMem,

    #[error("Hull computation aborted")]
    UserAbort,

    #[error("At least three non-collinear points are required")]
    InsufficientPoints,
}

/// Points processed between abort polls.
const POLL_STRIDE: usize = 1024;

fn cross(o: [f32; 2], a: [f32; 2], b: [f32; 2]) -> f64 {
    (a[0] as f64 - o[0] as f64) * (b[1] as f64 - o[1] as f64)
        - (a[1] as f64 - o[1] as f64) * (b[0] as f64 - o[0] as f64)
}

/// Convex hull of `points`, counter-clockwise, without a repeated endpoint.
///
/// `progress` is raised to 100 in steps as the computation advances.
/// Collinear points on the hull boundary are dropped.
pub fn compute_hull(
    points: &[[f32; 2]],
    progress: &AtomicU32,
    abort: &AbortFlag,
) -> Result<Vec<[f32; 2]>, HullError> {
    let mut sorted: Vec<[f32; 2]> = Vec::new();
    sorted
        .try_reserve_exact(points.len())
        .map_err(|_| HullError::NoMem)?;
    sorted.extend(points.iter().copied().filter(|p| p[0].is_finite() && p[1].is_finite()));

    if abort.is_requested() {
        return Err(HullError::UserAbort);
    }
    sorted.sort_unstable_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    sorted.dedup();
    progress.fetch_max(30, Ordering::Relaxed);

    if sorted.len() < 3 {
        return Err(HullError::InsufficientPoints);
    }

    let mut hull: Vec<[f32; 2]> = Vec::new();
    hull.try_reserve_exact(2 * sorted.len())
        .map_err(|_| HullError::NoMem)?;

    let total = 2 * sorted.len();
    let mut visited = 0usize;
    let step = |visited: &mut usize| -> Result<(), HullError> {
        *visited += 1;
        if *visited % POLL_STRIDE == 0 {
            if abort.is_requested() {
                return Err(HullError::UserAbort);
            }
            let pct = 30 + (*visited * 70 / total) as u32;
            progress.fetch_max(pct, Ordering::Relaxed);
        }
        Ok(())
    };

    // Lower chain
    for &p in &sorted {
        step(&mut visited)?;
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }

    // Upper chain
    let lower_len = hull.len() + 1;
    for &p in sorted.iter().rev().skip(1) {
        step(&mut visited)?;
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();

    progress.store(100, Ordering::Relaxed);
    if hull.len() < 3 {
        return Err(HullError::InsufficientPoints);
    }
    Ok(hull)
}
