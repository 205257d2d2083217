//! Date grouping and alignment. Raw query results may carry several records
//! for the same date (one per source); everything downstream assumes one
//! value per date, ascending, so this module runs first.

use crate::storage::repository::RawPoint;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// One value per date, output of [`group_by_date`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedPoint {
    pub date: NaiveDate,
    pub aggregate: f64,
}

/// How two independently grouped series line up on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedPoint {
    pub date: NaiveDate,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

/// Reducer applied to all values sharing a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Sum,
    Min,
    Max,
    /// Population standard deviation.
    Std,
    /// First raw value for the date. Also the fallback for unrecognized
    /// operation names.
    First,
}

impl Reducer {
    pub fn parse(s: &str) -> Reducer {
        match s {
            "mean" => Reducer::Mean,
            "sum" => Reducer::Sum,
            "min" => Reducer::Min,
            "max" => Reducer::Max,
            "std" => Reducer::Std,
            _ => Reducer::First,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Sum => "sum",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Std => "std",
            Reducer::First => "first",
        }
    }

    fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            Reducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Sum => values.iter().sum(),
            Reducer::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Std => population_std(values),
            Reducer::First => values[0],
        }
    }
}

/// Policy for records with no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Missing values count as 0 before reduction. The default everywhere.
    Zero,
    /// Missing records are dropped; a date with only missing records is
    /// omitted from the output.
    Skip,
    /// Any missing record poisons its date; the date is omitted.
    Propagate,
}

pub fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

/// Collapse raw records into one [`GroupedPoint`] per distinct date,
/// ascending. The BTreeMap keys on the parsed date, so mixed or unsorted
/// date representations still come out in calendar order.
pub fn group_by_date(
    points: &[RawPoint],
    reducer: Reducer,
    missing: MissingPolicy,
) -> Vec<GroupedPoint> {
    let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
    for p in points {
        by_date.entry(p.date).or_default().push(p.value);
    }

    let mut out = Vec::with_capacity(by_date.len());
    for (date, raw) in by_date {
        let values: Vec<f64> = match missing {
            MissingPolicy::Zero => raw.iter().map(|v| v.unwrap_or(0.0)).collect(),
            MissingPolicy::Skip => raw.iter().filter_map(|v| *v).collect(),
            MissingPolicy::Propagate => {
                if raw.iter().any(|v| v.is_none()) {
                    continue;
                }
                raw.iter().filter_map(|v| *v).collect()
            }
        };
        if values.is_empty() {
            continue;
        }
        out.push(GroupedPoint {
            date,
            aggregate: reducer.reduce(&values),
        });
    }
    out
}

/// Outer join of two grouped series on date. Both inputs must be ascending
/// (which [`group_by_date`] guarantees); gaps on either side come back as
/// `None` instead of being silently misaligned.
pub fn join_by_date(left: &[GroupedPoint], right: &[GroupedPoint]) -> Vec<JoinedPoint> {
    let mut out = Vec::with_capacity(left.len().max(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() || j < right.len() {
        match (left.get(i), right.get(j)) {
            (Some(l), Some(r)) if l.date == r.date => {
                out.push(JoinedPoint {
                    date: l.date,
                    left: Some(l.aggregate),
                    right: Some(r.aggregate),
                });
                i += 1;
                j += 1;
            }
            (Some(l), Some(r)) if l.date < r.date => {
                out.push(JoinedPoint {
                    date: l.date,
                    left: Some(l.aggregate),
                    right: None,
                });
                i += 1;
            }
            (Some(_), Some(r)) => {
                out.push(JoinedPoint {
                    date: r.date,
                    left: None,
                    right: Some(r.aggregate),
                });
                j += 1;
            }
            (Some(l), None) => {
                out.push(JoinedPoint {
                    date: l.date,
                    left: Some(l.aggregate),
                    right: None,
                });
                i += 1;
            }
            (None, Some(r)) => {
                out.push(JoinedPoint {
                    date: r.date,
                    left: None,
                    right: Some(r.aggregate),
                });
                j += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(date: &str, value: Option<f64>) -> RawPoint {
        RawPoint {
            date: date.parse().unwrap(),
            value,
        }
    }

    fn gp(date: &str, aggregate: f64) -> GroupedPoint {
        GroupedPoint {
            date: date.parse().unwrap(),
            aggregate,
        }
    }

    #[test]
    fn mean_collapses_same_date_records() {
        let points = vec![pt("2021-01-01", Some(10.0)), pt("2021-01-01", Some(20.0))];
        let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
        assert_eq!(grouped, vec![gp("2021-01-01", 15.0)]);
    }

    #[test]
    fn output_is_date_ascending_regardless_of_input_order() {
        let points = vec![
            pt("2021-01-03", Some(3.0)),
            pt("2021-01-01", Some(1.0)),
            pt("2021-01-02", Some(2.0)),
        ];
        let grouped = group_by_date(&points, Reducer::Sum, MissingPolicy::Zero);
        let dates: Vec<_> = grouped.iter().map(|g| g.date).collect();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn missing_policies() {
        let points = vec![pt("2021-01-01", Some(10.0)), pt("2021-01-01", None)];

        let zero = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
        assert_eq!(zero[0].aggregate, 5.0);

        let skip = group_by_date(&points, Reducer::Mean, MissingPolicy::Skip);
        assert_eq!(skip[0].aggregate, 10.0);

        let propagate = group_by_date(&points, Reducer::Mean, MissingPolicy::Propagate);
        assert!(propagate.is_empty());
    }

    #[test]
    fn all_missing_date_is_omitted_under_skip() {
        let points = vec![pt("2021-01-01", None), pt("2021-01-02", Some(1.0))];
        let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Skip);
        assert_eq!(grouped, vec![gp("2021-01-02", 1.0)]);
    }

    #[test]
    fn std_reducer_is_population_std() {
        let points = vec![
            pt("2021-01-01", Some(2.0)),
            pt("2021-01-01", Some(4.0)),
            pt("2021-01-01", Some(4.0)),
            pt("2021-01-01", Some(4.0)),
            pt("2021-01-01", Some(5.0)),
            pt("2021-01-01", Some(5.0)),
            pt("2021-01-01", Some(7.0)),
            pt("2021-01-01", Some(9.0)),
        ];
        let grouped = group_by_date(&points, Reducer::Std, MissingPolicy::Zero);
        assert!((grouped[0].aggregate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_operation_falls_back_to_first() {
        assert_eq!(Reducer::parse("median"), Reducer::First);
        let points = vec![pt("2021-01-01", Some(10.0)), pt("2021-01-01", Some(20.0))];
        let grouped = group_by_date(&points, Reducer::First, MissingPolicy::Zero);
        assert_eq!(grouped[0].aggregate, 10.0);
    }

    #[test]
    fn join_fills_gaps_with_none() {
        let left = vec![gp("2021-01-01", 1.0), gp("2021-01-03", 3.0)];
        let right = vec![gp("2021-01-02", 2.0), gp("2021-01-03", 30.0)];
        let joined = join_by_date(&left, &right);
        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].left, Some(1.0));
        assert_eq!(joined[0].right, None);
        assert_eq!(joined[1].left, None);
        assert_eq!(joined[1].right, Some(2.0));
        assert_eq!(joined[2].left, Some(3.0));
        assert_eq!(joined[2].right, Some(30.0));
    }

    #[test]
    fn grouping_is_pure() {
        let points = vec![pt("2021-01-01", Some(10.0)), pt("2021-01-01", Some(20.0))];
        let a = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
        let b = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
        assert_eq!(a, b);
    }
}
