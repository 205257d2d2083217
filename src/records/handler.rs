//! CRUD handlers for `/api/historical-data`.

use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::repository;
use crate::types::{
    HealthResponse, HistoricalRecord, NewRecord, PageInfo, PageParams, Paginated, RecordFilter,
    UpdateRecord,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use deadpool_sqlite::Pool;
use std::sync::Arc;

async fn conn(pool: &Pool) -> AppResult<deadpool_sqlite::Object> {
    pool.get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))
}

/// GET /health - health check with a database ping.
pub async fn health(State(pool): State<Arc<Pool>>) -> Json<HealthResponse> {
    let db_ok = match pool.get().await {
        Ok(conn) => conn
            .interact(|conn| conn.execute_batch("SELECT 1"))
            .await
            .is_ok(),
        Err(_) => false,
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
    })
}

/// GET /api/historical-data - paginated listing, newest first.
pub async fn list_records(
    State(pool): State<Arc<Pool>>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Paginated<HistoricalRecord>>> {
    filtered_listing(&pool, RecordFilter::default(), page).await
}

/// GET /api/historical-data/filter - filtered listing.
pub async fn filter_records(
    State(pool): State<Arc<Pool>>,
    Query(filter): Query<RecordFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Paginated<HistoricalRecord>>> {
    filtered_listing(&pool, filter, page).await
}

/// GET /api/historical-data/country/:iso - listing scoped to one ISO code.
pub async fn country_records(
    State(pool): State<Arc<Pool>>,
    Path(iso_code): Path<String>,
    Query(mut filter): Query<RecordFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Paginated<HistoricalRecord>>> {
    filter.pays = None;
    filter.iso_code = Some(iso_code);
    filtered_listing(&pool, filter, page).await
}

async fn filtered_listing(
    pool: &Pool,
    filter: RecordFilter,
    page: PageParams,
) -> AppResult<Json<Paginated<HistoricalRecord>>> {
    let (limit, offset, page_no) = (page.limit(), page.offset(), page.page());
    let conn = conn(pool).await?;
    let (records, total) = conn
        .interact(move |conn| {
            let records = repository::fetch_records(conn, &filter, limit, offset)?;
            let total = repository::count_records(conn, &filter)?;
            Ok::<_, rusqlite::Error>((records, total))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(Paginated {
        data: records,
        pagination: PageInfo::new(page_no, limit, total),
    }))
}

/// GET /api/historical-data/:id
pub async fn get_record(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<Json<HistoricalRecord>> {
    let conn = conn(&pool).await?;
    let record = conn
        .interact(move |conn| repository::get_record(conn, id))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    record
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no historical record with id {id}")))
}

/// POST /api/historical-data
pub async fn create_record(
    State(pool): State<Arc<Pool>>,
    LoggedJson(input): LoggedJson<NewRecord>,
) -> AppResult<(StatusCode, Json<HistoricalRecord>)> {
    if input.country.trim().is_empty() || input.indicator.trim().is_empty() {
        return Err(AppError::Validation(
            "date, country and indicator are required".to_string(),
        ));
    }

    let conn = conn(&pool).await?;
    let record = conn
        .interact(move |conn| {
            let id = repository::insert_record(conn, &input)?;
            repository::get_record(conn, id)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??
        .ok_or_else(|| AppError::Internal("inserted record not found".to_string()))?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/historical-data/:id
pub async fn update_record(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
    LoggedJson(input): LoggedJson<UpdateRecord>,
) -> AppResult<Json<HistoricalRecord>> {
    let conn = conn(&pool).await?;
    let record = conn
        .interact(move |conn| {
            if !repository::update_record(conn, id, &input)? {
                return Ok(None);
            }
            repository::get_record(conn, id)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    record
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no historical record with id {id}")))
}

/// DELETE /api/historical-data/:id
pub async fn delete_record(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let conn = conn(&pool).await?;
    let deleted = conn
        .interact(move |conn| repository::delete_record(conn, id))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "no historical record with id {id}"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}
