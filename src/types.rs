use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One persisted time-series observation, as stored in `historical_data`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalRecord {
    pub id: i64,
    pub date: NaiveDate,
    pub country: String,
    pub iso_code: Option<String>,
    pub indicator: String,
    pub source: Option<String>,
    pub value: Option<f64>,
    pub population: Option<i64>,
    pub unit: Option<String>,
    pub cases_per_100k: Option<f64>,
    pub deaths_per_100k: Option<f64>,
    pub incidence_7j: Option<f64>,
    pub growth_rate: Option<f64>,
}

/// Payload for POST /api/historical-data.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecord {
    pub date: NaiveDate,
    pub country: String,
    pub indicator: String,
    pub iso_code: Option<String>,
    pub source: Option<String>,
    pub value: Option<f64>,
    pub population: Option<i64>,
    pub unit: Option<String>,
    pub cases_per_100k: Option<f64>,
    pub deaths_per_100k: Option<f64>,
    pub incidence_7j: Option<f64>,
    pub growth_rate: Option<f64>,
}

/// Partial payload for PUT /api/historical-data/:id. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecord {
    pub date: Option<NaiveDate>,
    pub country: Option<String>,
    pub indicator: Option<String>,
    pub iso_code: Option<String>,
    pub source: Option<String>,
    pub value: Option<f64>,
    pub population: Option<i64>,
    pub unit: Option<String>,
    pub cases_per_100k: Option<f64>,
    pub deaths_per_100k: Option<f64>,
    pub incidence_7j: Option<f64>,
    pub growth_rate: Option<f64>,
}

/// Filters shared by the record listing and analytics queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    pub pays: Option<String>,
    pub iso_code: Option<String>,
    pub indicator: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "dateDebut")]
    pub date_debut: Option<NaiveDate>,
    #[serde(rename = "dateFin")]
    pub date_fin: Option<NaiveDate>,
}

/// Page-number pagination (`page` starts at 1).
#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// Pagination envelope matching `{ data, pagination }`.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl PageInfo {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: (total + limit - 1) / limit.max(1),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
}
