//! Offset pages and keyset-windowed iteration.

use crate::error::AppError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// 1-based page index and page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageParams {
    pub page: u64,
    pub per_page: u64,
}

/// Largest LIMIT/OFFSET PostgreSQL accepts (bigint).
const MAX_WINDOW: u64 = i64::MAX as u64;

impl PageParams {
    /// The window `(page - 1) * per_page` must fit a bigint.
    pub fn new(page: u64, per_page: u64) -> Result<Self, AppError> {
        if page == 0 {
            return Err(AppError::BadRequest("page must be >= 1".into()));
        }
        let in_range = (page - 1)
            .checked_mul(per_page)
            .and_then(|offset| offset.checked_add(per_page))
            .is_some_and(|end| end <= MAX_WINDOW);
        if !in_range || page > MAX_WINDOW {
            return Err(AppError::BadRequest("page is out of range".into()));
        }
        Ok(PageParams { page, per_page })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.per_page
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub current_page: u64,
    /// `-1` when there is no next page.
    pub next_page: i64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn create(items: Vec<T>, total: u64, params: PageParams) -> Self {
        let total_pages = if params.per_page == 0 {
            0
        } else {
            total.div_ceil(params.per_page)
        };
        let current_page = params.page;
        let next_page = if current_page >= total_pages {
            -1
        } else {
            current_page as i64 + 1
        };
        let items = if params.per_page == 0 { Vec::new() } else { items };
        Page {
            items,
            total,
            current_page,
            next_page,
            total_pages,
        }
    }

}

/// Supplies ascending-key batches to [`ChunkedRows`].
#[async_trait]
pub trait BatchSource: Send {
    type Item: Send;

    /// Up to `limit` items with key greater than `after`, ascending by key.
    async fn fetch_after(&mut self, after: Option<&str>, limit: u64) -> Result<Vec<Self::Item>, AppError>;

    fn key_of(item: &Self::Item) -> String;
}

/// Lazy keyset iteration: holds at most one batch, advances by the last key seen.
/// Stops on an empty batch or when a boundary key repeats.
pub struct ChunkedRows<S: BatchSource> {
    source: S,
    batch_size: u64,
    buffer: VecDeque<S::Item>,
    boundary: Option<String>,
    seen_boundaries: HashSet<String>,
    exhausted: bool,
    batches_issued: usize,
}

impl<S: BatchSource> ChunkedRows<S> {
    pub fn new(source: S, batch_size: u64) -> Self {
        ChunkedRows {
            source,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            boundary: None,
            seen_boundaries: HashSet::new(),
            exhausted: false,
            batches_issued: 0,
        }
    }

    /// Number of batch queries issued so far.
    pub fn batches_issued(&self) -> usize {
        self.batches_issued
    }

    pub async fn next(&mut self) -> Result<Option<S::Item>, AppError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }
        if let Some(boundary) = &self.boundary {
            if !self.seen_boundaries.insert(boundary.clone()) {
                tracing::warn!(boundary = %boundary, "keyset boundary repeated; stopping iteration");
                self.exhausted = true;
                return Ok(None);
            }
        }

        let batch = self
            .source
            .fetch_after(self.boundary.as_deref(), self.batch_size)
            .await?;
        self.batches_issued += 1;
        match batch.last() {
            None => {
                self.exhausted = true;
                return Ok(None);
            }
            Some(last) => self.boundary = Some(S::key_of(last)),
        }
        self.buffer.extend(batch);
        Ok(self.buffer.pop_front())
    }

    /// Drain the remaining items into memory.
    pub async fn collect_all(mut self) -> Result<Vec<S::Item>, AppError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }
}
