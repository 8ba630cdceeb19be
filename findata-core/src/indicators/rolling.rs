//! Trailing rolling mean.
//!
//! Lookback: window - 1 (first defined value at index window-1).

/// Trailing mean over `window` observations.
///
/// The first `window - 1` entries are `None`, as is any entry whose window
/// contains a missing value. A zero window yields all `None`.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];
    if window == 0 || n < window {
        return result;
    }

    let mut sum = 0.0;
    let mut missing = 0usize;
    for (i, value) in values.iter().enumerate() {
        match value {
            Some(v) => sum += v,
            None => missing += 1,
        }
        if i >= window {
            match values[i - window] {
                Some(v) => sum -= v,
                None => missing -= 1,
            }
        }
        if i + 1 >= window && missing == 0 {
            result[i] = Some(sum / window as f64);
        }
    }

    result
}

/// Element-wise `a - b`; missing on either side is missing.
pub fn subtract(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| Some((*x)? - (*y)?))
        .collect()
}
