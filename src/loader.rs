//! Batch CSV loader for processed ETL exports.
//!
//! Parsing is deliberately lenient: empty strings, literal `null`/`NaN`, and
//! unparseable numbers become NULL rather than aborting the load. Rows
//! missing any of the required fields (date, country, indicator) are skipped
//! and counted. Inserts run in fixed-size transactions.

use crate::config::{AppConfig, LoaderConfig};
use crate::types::NewRecord;
use chrono::NaiveDate;
use csv::StringRecord;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Default)]
pub struct LoadSummary {
    pub inserted: usize,
    pub skipped: usize,
}

fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("undefined")
}

fn parse_f64(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    if is_missing(raw) {
        return None;
    }
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_i64(raw: Option<&str>) -> Option<i64> {
    let raw = raw?;
    if is_missing(raw) {
        return None;
    }
    let cleaned = raw.trim().trim_end_matches(".0");
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|v| v as i64))
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    if is_missing(raw) {
        return None;
    }
    let trimmed = raw.trim();
    // Tolerate full timestamps by keeping the date part
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_string(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if is_missing(raw) {
        return None;
    }
    Some(raw.trim().to_string())
}

struct Columns {
    by_name: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let by_name = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        Self { by_name }
    }

    fn get<'a>(&self, row: &'a StringRecord, name: &str) -> Option<&'a str> {
        self.by_name.get(name).and_then(|&i| row.get(i))
    }
}

fn row_to_record(
    columns: &Columns,
    row: &StringRecord,
    source_override: Option<&str>,
) -> Option<NewRecord> {
    let date = parse_date(columns.get(row, "date"))?;
    let country = parse_string(columns.get(row, "country"))?;
    let indicator = parse_string(columns.get(row, "indicator"))?;

    Some(NewRecord {
        date,
        country,
        indicator,
        iso_code: parse_string(columns.get(row, "iso_code")),
        source: source_override
            .map(str::to_string)
            .or_else(|| parse_string(columns.get(row, "source"))),
        value: parse_f64(columns.get(row, "value")),
        population: parse_i64(columns.get(row, "population")),
        unit: parse_string(columns.get(row, "unit")),
        cases_per_100k: parse_f64(columns.get(row, "cases_per_100k")),
        deaths_per_100k: parse_f64(columns.get(row, "deaths_per_100k")),
        incidence_7j: parse_f64(columns.get(row, "incidence_7j")),
        growth_rate: parse_f64(columns.get(row, "growth_rate")),
    })
}

/// Load a CSV file into `historical_data`. Opens its own connection; intended
/// for the one-shot `load` subcommand, not the running server.
pub fn run(
    config: &AppConfig,
    csv_path: &Path,
    source_override: Option<&str>,
) -> Result<LoadSummary, LoaderError> {
    let mut conn = Connection::open(&config.database.path)?;
    crate::storage::sqlite::apply_pragmas(&conn)?;
    crate::storage::migrations::run_migrations(&conn)?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(csv_path)?;
    let columns = Columns::from_headers(reader.headers()?);
    for required in ["date", "country", "indicator"] {
        if !columns.by_name.contains_key(required) {
            return Err(LoaderError::InvalidInput(format!(
                "csv is missing required column: {required}"
            )));
        }
    }

    load_from_reader(&mut conn, &mut reader, &columns, &config.loader, source_override)
}

fn load_from_reader<R: std::io::Read>(
    conn: &mut Connection,
    reader: &mut csv::Reader<R>,
    columns: &Columns,
    loader: &LoaderConfig,
    source_override: Option<&str>,
) -> Result<LoadSummary, LoaderError> {
    let mut summary = LoadSummary::default();
    let mut batch: Vec<NewRecord> = Vec::with_capacity(loader.batch_size);

    for result in reader.records() {
        let row = result?;
        match row_to_record(columns, &row, source_override) {
            Some(record) => batch.push(record),
            None => summary.skipped += 1,
        }

        if batch.len() >= loader.batch_size {
            summary.inserted += crate::storage::repository::insert_batch(conn, &batch)?;
            tracing::info!(
                inserted = summary.inserted,
                skipped = summary.skipped,
                "batch committed"
            );
            batch.clear();
        }
    }

    if !batch.is_empty() {
        summary.inserted += crate::storage::repository::insert_batch(conn, &batch)?;
    }

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "load complete"
    );
    Ok(summary)
}
