//! Rolling-window statistics over an ordered numeric sequence. Every function
//! returns a vector parallel to its input, with `None` where the trailing
//! window has not filled yet, so index alignment with the source dates holds.

use crate::analytics::series::population_std;

/// Mean of the trailing `window` values. `None` for the first `window - 1`
/// indices.
pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                None
            } else {
                let slice = &values[i + 1 - window..=i];
                Some(slice.iter().sum::<f64>() / window as f64)
            }
        })
        .collect()
}

/// Population standard deviation of the trailing `window` values. Same
/// windowing rule as [`moving_average`].
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                None
            } else {
                Some(population_std(&values[i + 1 - window..=i]))
            }
        })
        .collect()
}

/// Relative change against the value `window` steps back:
/// `(v[i] - v[i-window]) / v[i-window]`. `None` for the first `window`
/// indices and wherever the reference value is 0.
pub fn growth_rate(values: &[f64], window: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i < window {
                None
            } else {
                let base = values[i - window];
                if base == 0.0 {
                    None
                } else {
                    Some((v - base) / base)
                }
            }
        })
        .collect()
}
