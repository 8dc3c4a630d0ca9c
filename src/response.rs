//! Standard response envelope helpers.

use crate::pagination::Page;
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T, M> {
    pub data: Vec<T>,
    pub meta: M,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub current_page: u64,
    pub next_page: i64,
    pub total_pages: u64,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::CREATED, Json(SuccessOne { data }))
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<SuccessMany<T, MetaCount>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount { count },
        }),
    )
}

pub fn success_page<T: Serialize>(page: Page<T>) -> (StatusCode, Json<SuccessMany<T, PageMeta>>) {
    let meta = PageMeta {
        total: page.total,
        current_page: page.current_page,
        next_page: page.next_page,
        total_pages: page.total_pages,
    };
    (StatusCode::OK, Json(SuccessMany { data: page.items, meta }))
}
