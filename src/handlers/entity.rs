//! Entity CRUD handlers: list (paged, search, export), create, read, update, delete.

use crate::error::AppError;
use crate::filter::{parse_sort_list, Filters, SortKey, SortPolicy};
use crate::pagination::PageParams;
use crate::response::{success_many, success_one, success_one_ok, success_page};
use crate::search::SearchParams;
use crate::service::{Dao, Values};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

fn dao_for<'a>(state: &'a AppState, entity: &str) -> Result<&'a Dao, AppError> {
    state
        .registry
        .dao(entity)
        .ok_or_else(|| AppError::NotFound(format!("unknown entity `{}`", entity)))
}

fn body_to_map(value: Value) -> Result<Values, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("`{}` must be a non-negative integer", key)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(AppError::BadRequest(format!("`{}` must be true or false", key))),
    }
}

/// Query string of `GET /:entity`, split into reserved parameters and filter keys.
#[derive(Debug)]
pub struct ListQuery {
    pub filters: Filters,
    pub sort: Vec<SortKey>,
    pub include: Vec<String>,
    pub page: PageParams,
    pub search: Option<SearchParams>,
    pub export: bool,
}

impl ListQuery {
    pub fn parse(params: Vec<(String, String)>, default_per_page: u64) -> Result<Self, AppError> {
        let mut filters = Filters::new();
        let mut sort = Vec::new();
        let mut include = Vec::new();
        let mut page = 1;
        let mut per_page = default_per_page;
        let mut search = SearchParams::default();
        let mut export = false;

        for (k, v) in params {
            match k.as_str() {
                "page" => page = parse_u64(&k, &v)?,
                "per_page" => per_page = parse_u64(&k, &v)?,
                "sort" => sort.extend(parse_sort_list(&v)?),
                "include" => include.extend(
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                "q" => search.q = v,
                "vector" => search.vector = Some(v),
                "by_relevance" => search.by_relevance = parse_flag(&k, &v)?,
                "export" => export = parse_flag(&k, &v)?,
                _ => filters.push((k, Value::String(v))),
            }
        }

        let search = if search.q.trim().is_empty() { None } else { Some(search) };
        Ok(ListQuery {
            filters,
            sort,
            include,
            page: PageParams::new(page, per_page)?,
            search,
            export,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let dao = dao_for(&state, &entity)?;
    let query = ListQuery::parse(params, state.settings.default_per_page)?;

    if query.export {
        let mut rows = dao.get_all_in_chunks(&state.pool, &query.filters, state.settings.export_batch_size)?;
        let mut records = Vec::new();
        while let Some(record) = rows.next().await? {
            records.push(record);
        }
        tracing::debug!(entity = %entity, rows = records.len(), batches = rows.batches_issued(), "export");
        return Ok(success_many(records).into_response());
    }

    // caller errors surface before a connection is taken
    dao.compile(&query.filters, &query.sort, SortPolicy::Paged)?;
    dao.resolve_load_plan(&query.filters, &query.include)?;

    let mut conn = state.pool.acquire().await?;
    let page = match &query.search {
        Some(search) => {
            dao.search(&mut conn, search, &query.filters, &query.sort, query.page)
                .await?
        }
        None => {
            dao.get_multi_paginated(&mut conn, &query.filters, &query.sort, &query.include, query.page)
                .await?
        }
    };
    Ok(success_page(page).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let dao = dao_for(&state, &entity)?;
    let body = body_to_map(body)?;
    dao.prepare_create(&body)?;
    let mut conn = state.pool.acquire().await?;
    let record = dao.create(&mut conn, body).await?;
    Ok(success_one(record))
}

pub async fn read(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let dao = dao_for(&state, &entity)?;
    let mut conn = state.pool.acquire().await?;
    let record = dao
        .get_by_id(&mut conn, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))?;
    Ok(success_one_ok(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let dao = dao_for(&state, &entity)?;
    let body = body_to_map(body)?;
    if body.is_empty() {
        return Err(AppError::NoUpdateData);
    }
    let mut conn = state.pool.acquire().await?;
    let current = dao
        .get_by_id(&mut conn, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))?;
    let record = dao.update(&mut conn, &current, body).await?;
    Ok(success_one_ok(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let dao = dao_for(&state, &entity)?;
    let mut conn = state.pool.acquire().await?;
    dao.remove(&mut conn, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let q = ListQuery::parse(
            params(&[
                ("page", "2"),
                ("per_page", "10"),
                ("sort", "-name,owner___email"),
                ("include", "owner, members"),
                ("name__ilike", "acme"),
                ("status__in", "pending,active"),
            ]),
            100,
        )
        .unwrap();
        assert_eq!(q.page, PageParams::new(2, 10).unwrap());
        assert_eq!(q.sort.len(), 2);
        assert_eq!(q.include, vec!["owner", "members"]);
        assert_eq!(
            q.filters,
            vec![
                ("name__ilike".to_string(), Value::String("acme".into())),
                ("status__in".to_string(), Value::String("pending,active".into())),
            ]
        );
        assert!(q.search.is_none());
        assert!(!q.export);
    }

    #[test]
    fn blank_search_text_is_a_plain_listing() {
        let q = ListQuery::parse(params(&[("q", "  ")]), 100).unwrap();
        assert!(q.search.is_none());
        let q = ListQuery::parse(params(&[("q", "acme"), ("by_relevance", "true")]), 100).unwrap();
        let search = q.search.unwrap();
        assert_eq!(search.q, "acme");
        assert!(search.by_relevance);
        assert_eq!(q.page.per_page, 100);
    }

    #[test]
    fn malformed_paging_is_rejected() {
        assert!(ListQuery::parse(params(&[("page", "0")]), 100).is_err());
        assert!(ListQuery::parse(params(&[("per_page", "-1")]), 100).is_err());
        assert!(ListQuery::parse(params(&[("export", "maybe")]), 100).is_err());
    }
}
