//! Rhai expressions evaluated per ion.
//!
//! Used by the value-script filter to rewrite one field of every hit. Each
//! evaluation sees the hit through four variables:
//!
//! - `x`, `y`, `z` - position
//! - `value` - the scalar attached to the hit
//!
//! ## Helper Functions
//!
//! Rhai's float maths (`sqrt`, `sin`, `abs`, `floor`, ...) is available, plus:
//!
//! - `clamp(v, lo, hi)` - Clamp into a range
//! - `lerp(a, b, t)` - Linear interpolation
//! - `map_range(v, in_lo, in_hi, out_lo, out_hi)` - Rescale between ranges
//! - `dist(x, y, z)` - Distance from the origin
//! - `sign(v)` - -1, 0 or 1
//! - `pi()`, `e()` - Constants
//!
//! ## Example Scripts
//!
//! Scale mass-to-charge by a calibration factor:
//! ```rhai
//! value * 1.0023
//! ```
//!
//! Replace the value with radial distance, for a radial-distribution spectrum:
//! ```rhai
//! dist(x, y, z)
//! ```

mod engine;

pub use engine::{CompiledExpression, ScriptEngine};
