//! Rolling-window primitives shared by the derived-data processors.
//!
//! Series are `Option<f64>` per row, aligned to the source table's `Date`
//! domain. A missing observation anywhere in a window makes that window's
//! result missing.

pub mod rolling;

pub use rolling::{rolling_mean, subtract};

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
