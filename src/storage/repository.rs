//! Query layer over `historical_data`. Every analytics computation consumes
//! the filtered, date-ascending record sets produced here.

use crate::types::{HistoricalRecord, NewRecord, RecordFilter, UpdateRecord};
use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

/// A raw observation as the analytics layer sees it: a date and a nullable value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// All raw observations for one country, date-ascending.
#[derive(Debug, Clone)]
pub struct CountrySeries {
    pub country: String,
    pub iso_code: Option<String>,
    pub points: Vec<RawPoint>,
}

const RECORD_COLUMNS: &str = "id, date, country, iso_code, indicator, source, value, population, \
     unit, cases_per_100k, deaths_per_100k, incidence_7j, growth_rate";

fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<HistoricalRecord> {
    let date_str: String = row.get(1)?;
    Ok(HistoricalRecord {
        id: row.get(0)?,
        date: parse_date(&date_str)?,
        country: row.get(2)?,
        iso_code: row.get(3)?,
        indicator: row.get(4)?,
        source: row.get(5)?,
        value: row.get(6)?,
        population: row.get(7)?,
        unit: row.get(8)?,
        cases_per_100k: row.get(9)?,
        deaths_per_100k: row.get(10)?,
        incidence_7j: row.get(11)?,
        growth_rate: row.get(12)?,
    })
}

/// Append WHERE clauses for the filter and collect bind values.
fn push_filter(sql: &mut String, binds: &mut Vec<Box<dyn ToSql>>, filter: &RecordFilter) {
    if let Some(ref pays) = filter.pays {
        // Callers pass either a country name or an ISO code in `pays`
        sql.push_str(&format!(
            " AND (country = ?{n} OR iso_code = ?{n})",
            n = binds.len() + 1
        ));
        binds.push(Box::new(pays.clone()));
    }
    if let Some(ref iso) = filter.iso_code {
        sql.push_str(&format!(" AND iso_code = ?{}", binds.len() + 1));
        binds.push(Box::new(iso.clone()));
    }
    if let Some(ref indicator) = filter.indicator {
        sql.push_str(&format!(" AND indicator = ?{}", binds.len() + 1));
        binds.push(Box::new(indicator.clone()));
    }
    if let Some(ref source) = filter.source {
        sql.push_str(&format!(" AND source = ?{}", binds.len() + 1));
        binds.push(Box::new(source.clone()));
    }
    if let Some(debut) = filter.date_debut {
        sql.push_str(&format!(" AND date >= ?{}", binds.len() + 1));
        binds.push(Box::new(debut.to_string()));
    }
    if let Some(fin) = filter.date_fin {
        sql.push_str(&format!(" AND date <= ?{}", binds.len() + 1));
        binds.push(Box::new(fin.to_string()));
    }
}

/// Filtered raw points, date-ascending. Multiple records per date are kept;
/// the grouping step collapses them.
pub fn fetch_points(conn: &Connection, filter: &RecordFilter) -> rusqlite::Result<Vec<RawPoint>> {
    let mut sql = String::from("SELECT date, value FROM historical_data WHERE 1=1");
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    push_filter(&mut sql, &mut binds, filter);
    sql.push_str(" ORDER BY date ASC");

    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), |row| {
        let date_str: String = row.get(0)?;
        Ok(RawPoint {
            date: parse_date(&date_str)?,
            value: row.get(1)?,
        })
    })?;
    rows.collect()
}

/// Raw points for every country matching the filter, one `CountrySeries` per
/// country, each date-ascending. Used by the clustering endpoint.
pub fn fetch_country_series(
    conn: &Connection,
    filter: &RecordFilter,
) -> rusqlite::Result<Vec<CountrySeries>> {
    let mut sql = String::from(
        "SELECT country, iso_code, date, value FROM historical_data WHERE 1=1",
    );
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    push_filter(&mut sql, &mut binds, filter);
    sql.push_str(" ORDER BY country ASC, date ASC");

    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(refs.as_slice())?;

    let mut series: Vec<CountrySeries> = Vec::new();
    while let Some(row) = rows.next()? {
        let country: String = row.get(0)?;
        let iso_code: Option<String> = row.get(1)?;
        let date_str: String = row.get(2)?;
        let point = RawPoint {
            date: parse_date(&date_str)?,
            value: row.get(3)?,
        };
        match series.last_mut() {
            Some(last) if last.country == country => last.points.push(point),
            _ => series.push(CountrySeries {
                country,
                iso_code,
                points: vec![point],
            }),
        }
    }
    Ok(series)
}

/// Paginated records matching the filter, newest first.
pub fn fetch_records(
    conn: &Connection,
    filter: &RecordFilter,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<Vec<HistoricalRecord>> {
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM historical_data WHERE 1=1");
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    push_filter(&mut sql, &mut binds, filter);
    sql.push_str(&format!(
        " ORDER BY date DESC LIMIT ?{} OFFSET ?{}",
        binds.len() + 1,
        binds.len() + 2
    ));
    binds.push(Box::new(limit));
    binds.push(Box::new(offset));

    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), record_from_row)?;
    rows.collect()
}

/// Records matching the filter, date-ascending, capped at `limit`.
/// Used by the ml-ready endpoint which needs full rows in series order.
pub fn fetch_records_asc(
    conn: &Connection,
    filter: &RecordFilter,
    limit: i64,
) -> rusqlite::Result<Vec<HistoricalRecord>> {
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM historical_data WHERE 1=1");
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    push_filter(&mut sql, &mut binds, filter);
    sql.push_str(&format!(" ORDER BY date ASC LIMIT ?{}", binds.len() + 1));
    binds.push(Box::new(limit));

    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), record_from_row)?;
    rows.collect()
}

pub fn count_records(conn: &Connection, filter: &RecordFilter) -> rusqlite::Result<i64> {
    let mut sql = String::from("SELECT COUNT(*) FROM historical_data WHERE 1=1");
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();
    push_filter(&mut sql, &mut binds, filter);
    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    conn.query_row(&sql, refs.as_slice(), |row| row.get(0))
}

pub fn get_record(conn: &Connection, id: i64) -> rusqlite::Result<Option<HistoricalRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM historical_data WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], record_from_row)?;
    rows.next().transpose()
}

pub fn insert_record(conn: &Connection, rec: &NewRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO historical_data
           (date, country, iso_code, indicator, source, value, population, unit,
            cases_per_100k, deaths_per_100k, incidence_7j, growth_rate)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            rec.date.to_string(),
            rec.country,
            rec.iso_code,
            rec.indicator,
            rec.source,
            rec.value,
            rec.population,
            rec.unit,
            rec.cases_per_100k,
            rec.deaths_per_100k,
            rec.incidence_7j,
            rec.growth_rate,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a batch of rows inside one transaction. Returns the inserted count.
pub fn insert_batch(conn: &mut Connection, rows: &[NewRecord]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO historical_data
               (date, country, iso_code, indicator, source, value, population, unit,
                cases_per_100k, deaths_per_100k, incidence_7j, growth_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for rec in rows {
            stmt.execute(params![
                rec.date.to_string(),
                rec.country,
                rec.iso_code,
                rec.indicator,
                rec.source,
                rec.value,
                rec.population,
                rec.unit,
                rec.cases_per_100k,
                rec.deaths_per_100k,
                rec.incidence_7j,
                rec.growth_rate,
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Apply a partial update. Returns false when no row has this id.
pub fn update_record(
    conn: &Connection,
    id: i64,
    update: &UpdateRecord,
) -> rusqlite::Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();

    macro_rules! set_field {
        ($field:expr, $col:literal) => {
            if let Some(ref v) = $field {
                sets.push(format!(concat!($col, " = ?{}"), binds.len() + 1));
                binds.push(Box::new(v.clone()));
            }
        };
    }

    if let Some(date) = update.date {
        sets.push(format!("date = ?{}", binds.len() + 1));
        binds.push(Box::new(date.to_string()));
    }
    set_field!(update.country, "country");
    set_field!(update.indicator, "indicator");
    set_field!(update.iso_code, "iso_code");
    set_field!(update.source, "source");
    set_field!(update.value, "value");
    set_field!(update.population, "population");
    set_field!(update.unit, "unit");
    set_field!(update.cases_per_100k, "cases_per_100k");
    set_field!(update.deaths_per_100k, "deaths_per_100k");
    set_field!(update.incidence_7j, "incidence_7j");
    set_field!(update.growth_rate, "growth_rate");

    if sets.is_empty() {
        // Nothing to change; report whether the row exists
        return Ok(get_record(conn, id)?.is_some());
    }

    let sql = format!(
        "UPDATE historical_data SET {} WHERE id = ?{}",
        sets.join(", "),
        binds.len() + 1
    );
    binds.push(Box::new(id));
    let refs: Vec<&dyn ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let updated = conn.execute(&sql, refs.as_slice())?;
    Ok(updated > 0)
}

pub fn delete_record(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM historical_data WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}
