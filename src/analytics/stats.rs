//! Descriptive statistics over a filtered, grouped series.

use crate::analytics::series::population_std;
use serde::Serialize;

/// Summary of a value series. All fields are `None` when the series is empty;
/// callers get a well-formed zero-count summary instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
}

impl StatsSummary {
    fn empty() -> Self {
        Self {
            count: 0,
            mean: None,
            min: None,
            max: None,
            std: None,
            q25: None,
            median: None,
            q75: None,
        }
    }
}

/// Nearest-rank quantile on an ascending-sorted slice: `sorted[floor(q*(n-1))]`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx]
}

pub fn describe(values: &[f64]) -> StatsSummary {
    if values.is_empty() {
        return StatsSummary::empty();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    StatsSummary {
        count: n,
        mean: Some(values.iter().sum::<f64>() / n as f64),
        min: Some(sorted[0]),
        max: Some(sorted[n - 1]),
        std: Some(population_std(values)),
        q25: Some(quantile(&sorted, 0.25)),
        median: Some(quantile(&sorted, 0.5)),
        q75: Some(quantile(&sorted, 0.75)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_gives_all_none() {
        let summary = describe(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, None);
        assert_eq!(summary.median, None);
    }

    #[test]
    fn basic_summary() {
        let summary = describe(&[4.0, 1.0, 3.0, 2.0, 5.0]);
        assert_eq!(summary.count, 5);
        assert_eq!(summary.mean, Some(3.0));
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.max, Some(5.0));
        assert_eq!(summary.q25, Some(2.0));
        assert_eq!(summary.median, Some(3.0));
        assert_eq!(summary.q75, Some(4.0));
        assert!((summary.std.unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn nearest_rank_quantiles_on_even_length() {
        // n = 4: q25 -> floor(0.25*3) = 0, median -> floor(0.5*3) = 1, q75 -> floor(0.75*3) = 2
        let summary = describe(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(summary.q25, Some(10.0));
        assert_eq!(summary.median, Some(20.0));
        assert_eq!(summary.q75, Some(30.0));
    }

    #[test]
    fn single_element_series() {
        let summary = describe(&[7.0]);
        assert_eq!(summary.count, 1);
        assert_eq!(summary.min, Some(7.0));
        assert_eq!(summary.max, Some(7.0));
        assert_eq!(summary.median, Some(7.0));
        assert_eq!(summary.std, Some(0.0));
    }

    #[test]
    fn describe_does_not_mutate_input() {
        let values = vec![3.0, 1.0, 2.0];
        let before = values.clone();
        describe(&values);
        assert_eq!(values, before);
    }
}
