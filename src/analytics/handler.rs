//! GET handlers for the analytics endpoints under `/api/historical-data`.
//!
//! Each handler parses and validates its query parameters, pulls the
//! filtered, date-ascending record set from the repository, runs the pure
//! analytics functions over it, and wraps the result in a `{ data, meta }`
//! envelope. Successful responses are cached with a short TTL.

use crate::analytics::cluster::{kmeans_1d, kmeans_correlation};
use crate::analytics::epi::{mortality_series, rt_series};
use crate::analytics::rolling::{growth_rate, moving_average, rolling_std};
use crate::analytics::series::{group_by_date, join_by_date, MissingPolicy, Reducer};
use crate::analytics::stats::describe;
use crate::analytics::AnalyticsState;
use crate::error::{AppError, AppResult};
use crate::storage::repository::{self, RawPoint};
use crate::types::RecordFilter;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Query parameters shared by the series-producing analytics endpoints.
/// `periode` is the legacy spelling of `window`.
#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    pub pays: Option<String>,
    pub indicator: Option<String>,
    pub source: Option<String>,
    pub operation: Option<String>,
    #[serde(alias = "periode")]
    pub window: Option<usize>,
    #[serde(rename = "dateDebut")]
    pub date_debut: Option<NaiveDate>,
    #[serde(rename = "dateFin")]
    pub date_fin: Option<NaiveDate>,
    pub features: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SpreadParams {
    pub indicator: Option<String>,
    pub source: Option<String>,
    pub k: Option<usize>,
    pub date: Option<NaiveDate>,
    pub correlation: Option<bool>,
    #[serde(rename = "dateDebut")]
    pub date_debut: Option<NaiveDate>,
    #[serde(rename = "dateFin")]
    pub date_fin: Option<NaiveDate>,
}

/// Aggregation operation selected by the `operation` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Reduce(Reducer),
    MovingAverage,
    RollingStd,
    GrowthRate,
}

impl Operation {
    /// `moyenne` / `ecart-type` / `croissance` are the legacy names for the
    /// windowed operations; the per-date reducers go by their plain names.
    fn parse(s: &str) -> Operation {
        match s {
            "moyenne" | "moving-average" => Operation::MovingAverage,
            "ecart-type" | "rolling-std" => Operation::RollingStd,
            "croissance" | "growth-rate" => Operation::GrowthRate,
            other => Operation::Reduce(Reducer::parse(other)),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Operation::Reduce(r) => r.as_str(),
            Operation::MovingAverage => "moving-average",
            Operation::RollingStd => "rolling-std",
            Operation::GrowthRate => "growth-rate",
        }
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation(format!("missing required parameter: {name}")))
}

fn validate_window(window: Option<usize>, default: usize) -> AppResult<usize> {
    let window = window.unwrap_or(default);
    if window == 0 {
        return Err(AppError::Validation(
            "window must be at least 1".to_string(),
        ));
    }
    Ok(window)
}

fn series_filter(params: &SeriesParams) -> RecordFilter {
    RecordFilter {
        pays: params.pays.clone(),
        iso_code: None,
        indicator: params.indicator.clone(),
        source: params.source.clone(),
        date_debut: params.date_debut,
        date_fin: params.date_fin,
    }
}

async fn fetch_points(state: &AnalyticsState, filter: RecordFilter) -> AppResult<Vec<RawPoint>> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let points = conn
        .interact(move |conn| repository::fetch_points(conn, &filter))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    if points.len() > state.config.max_series_len {
        return Err(AppError::Validation(format!(
            "result set exceeds {} points, narrow the date range",
            state.config.max_series_len
        )));
    }
    Ok(points)
}

fn cached(state: &AnalyticsState, key: &str) -> AppResult<Option<Json<Value>>> {
    if let Some(hit) = state.cache.get(key) {
        let value: Value = serde_json::from_str(&hit)
            .map_err(|e| AppError::Internal(format!("cache deserialize: {e}")))?;
        return Ok(Some(Json(value)));
    }
    Ok(None)
}

fn store_and_respond(state: &AnalyticsState, key: String, value: Value) -> AppResult<Json<Value>> {
    let serialized = serde_json::to_string(&value)
        .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
    state.cache.insert(key, serialized);
    Ok(Json(value))
}

/// GET /api/historical-data/aggregation
pub async fn aggregation(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<Value>> {
    let pays = require(&params.pays, "pays")?.to_string();
    let indicator = require(&params.indicator, "indicator")?.to_string();
    let window = validate_window(params.window, state.config.default_window)?;
    let operation = params
        .operation
        .as_deref()
        .map(Operation::parse)
        .unwrap_or(Operation::MovingAverage);

    let key = format!(
        "aggregation:{pays}:{indicator}:{}:{}:{window}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        operation.as_str(),
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let points = fetch_points(&state, series_filter(&params)).await?;
    if points.is_empty() {
        return Err(AppError::NotFound(format!(
            "no records for {pays}/{indicator}"
        )));
    }

    let data: Vec<Value> = match operation {
        Operation::Reduce(reducer) => group_by_date(&points, reducer, MissingPolicy::Zero)
            .into_iter()
            .map(|g| json!({ "date": g.date, "value": g.aggregate }))
            .collect(),
        windowed => {
            let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
            let values: Vec<f64> = grouped.iter().map(|g| g.aggregate).collect();
            let series = match windowed {
                Operation::MovingAverage => moving_average(&values, window),
                Operation::RollingStd => rolling_std(&values, window),
                Operation::GrowthRate => growth_rate(&values, window),
                Operation::Reduce(_) => unreachable!(),
            };
            grouped
                .iter()
                .zip(series)
                .map(|(g, v)| json!({ "date": g.date, "value": v }))
                .collect()
        }
    };

    let response = json!({
        "data": data,
        "meta": {
            "pays": pays,
            "indicator": indicator,
            "source": params.source,
            "operation": operation.as_str(),
            "window": window,
            "count": data.len(),
        },
    });
    store_and_respond(&state, key, response)
}

/// GET /api/historical-data/stats
pub async fn stats(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<Value>> {
    let pays = require(&params.pays, "pays")?.to_string();
    let indicator = require(&params.indicator, "indicator")?.to_string();

    let key = format!(
        "stats:{pays}:{indicator}:{}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let points = fetch_points(&state, series_filter(&params)).await?;
    if points.is_empty() {
        return Err(AppError::NotFound(format!(
            "no records for {pays}/{indicator}"
        )));
    }

    let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
    let values: Vec<f64> = grouped.iter().map(|g| g.aggregate).collect();
    let summary = describe(&values);

    let response = json!({
        "stats": summary,
        "meta": {
            "pays": pays,
            "indicator": indicator,
            "source": params.source,
            "dateDebut": params.date_debut,
            "dateFin": params.date_fin,
        },
    });
    store_and_respond(&state, key, response)
}

/// GET /api/historical-data/rt
pub async fn rt(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<Value>> {
    let pays = require(&params.pays, "pays")?.to_string();
    let indicator = require(&params.indicator, "indicator")?.to_string();
    let window = validate_window(params.window, state.config.default_window)?;

    let key = format!(
        "rt:{pays}:{indicator}:{}:{window}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let points = fetch_points(&state, series_filter(&params)).await?;
    if points.is_empty() {
        return Err(AppError::NotFound(format!(
            "no records for {pays}/{indicator}"
        )));
    }

    let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
    let values: Vec<f64> = grouped.iter().map(|g| g.aggregate).collect();
    let rt_values = rt_series(&values, window);

    let data: Vec<Value> = grouped
        .iter()
        .zip(rt_values)
        .map(|(g, rt)| json!({ "date": g.date, "rt": rt }))
        .collect();

    let response = json!({
        "data": data,
        "meta": {
            "pays": pays,
            "indicator": indicator,
            "source": params.source,
            "window": window,
            "estimator": "geometric-growth-rate",
            "count": data.len(),
        },
    });
    store_and_respond(&state, key, response)
}

/// GET /api/historical-data/mortality-rate
pub async fn mortality_rate(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<Value>> {
    let pays = require(&params.pays, "pays")?.to_string();
    let window = validate_window(params.window, state.config.default_window)?;

    let key = format!(
        "mortality:{pays}:{}:{window}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let mut cases_filter = series_filter(&params);
    cases_filter.indicator = Some("cases".to_string());
    let mut deaths_filter = cases_filter.clone();
    deaths_filter.indicator = Some("deaths".to_string());

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (case_points, death_points) = conn
        .interact(move |conn| {
            let cases = repository::fetch_points(conn, &cases_filter)?;
            let deaths = repository::fetch_points(conn, &deaths_filter)?;
            Ok::<_, rusqlite::Error>((cases, deaths))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if case_points.is_empty() && death_points.is_empty() {
        return Err(AppError::NotFound(format!(
            "no case or death records for {pays}"
        )));
    }

    // Join by date: the two series seldom cover identical date ranges, so
    // positional alignment would silently pair the wrong days.
    let cases = group_by_date(&case_points, Reducer::Mean, MissingPolicy::Zero);
    let deaths = group_by_date(&death_points, Reducer::Mean, MissingPolicy::Zero);
    let joined = join_by_date(&cases, &deaths);
    let mortality = mortality_series(&joined, window);

    let data: Vec<Value> = joined
        .iter()
        .zip(mortality)
        .map(|(pair, m)| match m {
            Some(point) => json!({
                "date": pair.date,
                "mortality_rate": point.rate,
                "total_cases": point.total_cases,
                "total_deaths": point.total_deaths,
            }),
            None => json!({
                "date": pair.date,
                "mortality_rate": null,
                "total_cases": null,
                "total_deaths": null,
            }),
        })
        .collect();

    let response = json!({
        "data": data,
        "meta": {
            "pays": pays,
            "source": params.source,
            "window": window,
            "count": data.len(),
        },
    });
    store_and_respond(&state, key, response)
}

/// GET /api/historical-data/geographic-spread
///
/// Two variants: with a `date` parameter, 1-D k-means over that single day's
/// cross-country values; otherwise correlation-based k-means over each
/// country's full (grouped) series.
pub async fn geographic_spread(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SpreadParams>,
) -> AppResult<Json<Value>> {
    let indicator = require(&params.indicator, "indicator")?.to_string();
    let k = params.k.unwrap_or(state.config.default_k);
    if k == 0 || k > state.config.max_k {
        return Err(AppError::Validation(format!(
            "k must be in 1..={}",
            state.config.max_k
        )));
    }

    let key = format!(
        "spread:{indicator}:{}:{k}:{:?}:{:?}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        params.date,
        params.correlation,
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let single_day = params.date.is_some() && params.correlation != Some(true);
    let filter = RecordFilter {
        pays: None,
        iso_code: None,
        indicator: Some(indicator.clone()),
        source: params.source.clone(),
        date_debut: params.date.or(params.date_debut),
        date_fin: params.date.or(params.date_fin),
    };

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let country_series = conn
        .interact(move |conn| repository::fetch_country_series(conn, &filter))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    // Collapse each country's records to one value per date; drop countries
    // with nothing left after grouping
    let mut countries: Vec<(String, Option<String>, Vec<f64>)> = Vec::new();
    for cs in &country_series {
        let grouped = group_by_date(&cs.points, Reducer::Mean, MissingPolicy::Zero);
        if grouped.is_empty() {
            continue;
        }
        countries.push((
            cs.country.clone(),
            cs.iso_code.clone(),
            grouped.into_iter().map(|g| g.aggregate).collect(),
        ));
    }

    if countries.is_empty() {
        return Err(AppError::NotFound(format!(
            "no records for indicator {indicator}"
        )));
    }

    let (assignments, variant) = if single_day {
        let values: Vec<f64> = countries.iter().map(|(_, _, v)| v[0]).collect();
        (kmeans_1d(&values, k), "one-dimensional")
    } else {
        let vectors: Vec<Vec<f64>> = countries.iter().map(|(_, _, v)| v.clone()).collect();
        (kmeans_correlation(&vectors, k), "correlation")
    };

    let n_clusters = assignments.iter().max().map_or(0, |m| m + 1);
    let clusters: Vec<Value> = (0..n_clusters)
        .map(|c| {
            let members: Vec<Value> = countries
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|((country, iso, _), _)| json!({ "country": country, "iso_code": iso }))
                .collect();
            json!({ "cluster": c + 1, "countries": members })
        })
        .collect();

    let response = json!({
        "clusters": clusters,
        "meta": {
            "k": k,
            "count": countries.len(),
            "variant": variant,
            "indicator": indicator,
            "source": params.source,
            "date": params.date,
        },
    });
    store_and_respond(&state, key, response)
}

const ML_FEATURES: &[&str] = &[
    "lag1",
    "lag7",
    "ma7",
    "ma14",
    "std7",
    "growth7",
    "day_of_week",
    "month",
];

/// GET /api/historical-data/ml-ready
///
/// Grouped series enriched with the lag/rolling features the downstream ML
/// consumers train on. `features` selects a comma-separated subset.
pub async fn ml_ready(
    State(state): State<Arc<AnalyticsState>>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<Value>> {
    let pays = require(&params.pays, "pays")?.to_string();
    let indicator = require(&params.indicator, "indicator")?.to_string();
    let limit = params.limit.unwrap_or(1000).clamp(1, 100_000);

    let features: Vec<String> = match params.features.as_deref() {
        None => ML_FEATURES.iter().map(|f| f.to_string()).collect(),
        Some(list) => {
            let requested: Vec<String> = list
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
            if let Some(bad) = requested.iter().find(|f| !ML_FEATURES.contains(&f.as_str())) {
                return Err(AppError::Validation(format!(
                    "unknown feature: {bad}. Valid features: {}",
                    ML_FEATURES.join(", ")
                )));
            }
            requested
        }
    };

    let key = format!(
        "ml-ready:{pays}:{indicator}:{}:{limit}:{}:{:?}:{:?}",
        params.source.as_deref().unwrap_or("-"),
        features.join("+"),
        params.date_debut,
        params.date_fin,
    );
    if let Some(hit) = cached(&state, &key)? {
        return Ok(hit);
    }

    let filter = series_filter(&params);
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let records = conn
        .interact(move |conn| repository::fetch_records_asc(conn, &filter, limit))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if records.is_empty() {
        return Err(AppError::NotFound(format!(
            "no records for {pays}/{indicator}"
        )));
    }

    let points: Vec<RawPoint> = records
        .iter()
        .map(|r| RawPoint {
            date: r.date,
            value: r.value,
        })
        .collect();
    let grouped = group_by_date(&points, Reducer::Mean, MissingPolicy::Zero);
    let values: Vec<f64> = grouped.iter().map(|g| g.aggregate).collect();

    let ma7 = moving_average(&values, 7);
    let ma14 = moving_average(&values, 14);
    let std7 = rolling_std(&values, 7);
    let growth7 = growth_rate(&values, 7);

    let data: Vec<Value> = grouped
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let mut row = serde_json::Map::new();
            row.insert("date".to_string(), json!(g.date));
            row.insert("value".to_string(), json!(g.aggregate));
            for feature in &features {
                let value = match feature.as_str() {
                    "lag1" => json!(i.checked_sub(1).map(|j| values[j])),
                    "lag7" => json!(i.checked_sub(7).map(|j| values[j])),
                    "ma7" => json!(ma7[i]),
                    "ma14" => json!(ma14[i]),
                    "std7" => json!(std7[i]),
                    "growth7" => json!(growth7[i]),
                    "day_of_week" => json!(g.date.weekday().num_days_from_monday()),
                    "month" => json!(g.date.month()),
                    _ => unreachable!("features validated above"),
                };
                row.insert(feature.clone(), value);
            }
            Value::Object(row)
        })
        .collect();

    let response = json!({
        "data": data,
        "meta": {
            "pays": pays,
            "indicator": indicator,
            "source": params.source,
            "features": features,
            "count": data.len(),
        },
    });
    store_and_respond(&state, key, response)
}
