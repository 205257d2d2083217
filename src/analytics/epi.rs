//! Epidemiological metrics over grouped, date-aligned series.

use crate::analytics::series::JoinedPoint;

/// Effective reproduction estimate by geometric growth rate:
/// `Rt[i] = (cases[i] / cases[i-w]) ^ (1/w)`.
///
/// This is the geometric-growth-rate estimator, not a renewal-equation Rt;
/// it only captures the w-day exponential trend of the case curve. `None`
/// for the first `window` indices and wherever the reference count is not
/// strictly positive.
pub fn rt_series(cases: &[f64], window: usize) -> Vec<Option<f64>> {
    cases
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if i < window {
                None
            } else {
                let base = cases[i - window];
                if base > 0.0 {
                    Some((v / base).powf(1.0 / window as f64))
                } else {
                    None
                }
            }
        })
        .collect()
}

/// One point of the mortality-rate series.
#[derive(Debug, Clone, PartialEq)]
pub struct MortalityPoint {
    /// `sum(deaths) / sum(cases)` over the trailing window; `None` when the
    /// window saw no cases.
    pub rate: Option<f64>,
    pub total_cases: f64,
    pub total_deaths: f64,
}

/// Trailing-window mortality rate over date-joined (cases, deaths) pairs.
///
/// The input comes from [`crate::analytics::series::join_by_date`], so dates
/// missing on either side contribute 0 to the window sums instead of shifting
/// the two series against each other. `None` for the first `window - 1`
/// indices.
pub fn mortality_series(pairs: &[JoinedPoint], window: usize) -> Vec<Option<MortalityPoint>> {
    pairs
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                None
            } else {
                let slice = &pairs[i + 1 - window..=i];
                let total_cases: f64 = slice.iter().filter_map(|p| p.left).sum();
                let total_deaths: f64 = slice.iter().filter_map(|p| p.right).sum();
                let rate = if total_cases != 0.0 {
                    Some(total_deaths / total_cases)
                } else {
                    None
                };
                Some(MortalityPoint {
                    rate,
                    total_cases,
                    total_deaths,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn joined(values: &[(Option<f64>, Option<f64>)]) -> Vec<JoinedPoint> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &(left, right))| JoinedPoint {
                date: start + chrono::Days::new(i as u64),
                left,
                right,
            })
            .collect()
    }

    #[test]
    fn rt_reference_case() {
        let cases = [100.0, 100.0, 100.0, 100.0, 200.0, 400.0];
        let rt = rt_series(&cases, 2);
        assert_eq!(rt[0], None);
        assert_eq!(rt[1], None);
        assert_eq!(rt[2], Some(1.0));
        assert_eq!(rt[3], Some(1.0));
        assert!((rt[4].unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(rt[5], Some(2.0));
    }

    #[test]
    fn rt_null_when_reference_is_zero() {
        let rt = rt_series(&[0.0, 10.0, 20.0], 1);
        assert_eq!(rt, vec![None, None, Some(2.0)]);
    }

    #[test]
    fn mortality_reference_case() {
        let pairs = joined(&[
            (Some(10.0), Some(1.0)),
            (Some(10.0), Some(1.0)),
            (Some(10.0), Some(1.0)),
        ]);
        let out = mortality_series(&pairs, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        let last = out[2].as_ref().unwrap();
        assert_eq!(last.rate, Some(0.1));
        assert_eq!(last.total_cases, 30.0);
        assert_eq!(last.total_deaths, 3.0);
    }

    #[test]
    fn mortality_rate_none_when_no_cases_in_window() {
        let pairs = joined(&[(None, Some(1.0)), (None, Some(2.0))]);
        let out = mortality_series(&pairs, 2);
        let last = out[1].as_ref().unwrap();
        assert_eq!(last.rate, None);
        assert_eq!(last.total_deaths, 3.0);
    }

    #[test]
    fn mortality_gaps_count_as_zero() {
        let pairs = joined(&[
            (Some(10.0), Some(2.0)),
            (None, Some(2.0)),
            (Some(10.0), None),
        ]);
        let out = mortality_series(&pairs, 3);
        let last = out[2].as_ref().unwrap();
        assert_eq!(last.total_cases, 20.0);
        assert_eq!(last.total_deaths, 4.0);
        assert_eq!(last.rate, Some(0.2));
    }

    #[test]
    fn outputs_parallel_the_input() {
        let cases: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        assert_eq!(rt_series(&cases, 7).len(), cases.len());
        let pairs = joined(&[(Some(1.0), Some(1.0)); 9]);
        assert_eq!(mortality_series(&pairs, 7).len(), pairs.len());
    }
}
