//! Per-entity capability slots. Every method defaults to a no-op.

use crate::error::AppError;
use crate::filter::{Filters, SelectPlan};
use crate::service::record::{ChangedFields, LoadPlan, Record, Values};
use async_trait::async_trait;
use sqlx::PgConnection;

/// Domain behavior attached to one entity's [`crate::service::Dao`].
///
/// Pre-hooks and `on_relationship` run inside the write transaction: an error
/// rolls the whole write back. Post-hooks run after commit on the request
/// connection and cannot undo the write.
#[async_trait]
pub trait EntityHooks: Send + Sync {
    /// May mutate `values` (the projected columns) or reject with [`AppError::Rule`].
    /// `input` is the caller's payload before projection.
    async fn on_pre_create(
        &self,
        _conn: &mut PgConnection,
        _id: &str,
        _values: &mut Values,
        _input: &Values,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn on_post_create(&self, _conn: &mut PgConnection, _record: &Record) -> Result<(), AppError> {
        Ok(())
    }

    /// `values` holds only the fields that differ from `current`.
    async fn on_pre_update(
        &self,
        _conn: &mut PgConnection,
        _current: &Record,
        _values: &mut Values,
        _input: &Values,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn on_post_update(
        &self,
        _conn: &mut PgConnection,
        _record: &Record,
        _changed: &ChangedFields,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Write associated rows from the raw payload. `current` is `None` on create.
    async fn on_relationship(
        &self,
        _conn: &mut PgConnection,
        _id: &str,
        _input: &Values,
        _current: Option<&Record>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Adjust a composed read before it is rendered.
    fn customize_query(&self, _plan: &mut SelectPlan, _filters: &Filters) -> Result<(), AppError> {
        Ok(())
    }

    fn modify_load_plan(&self, _filters: &Filters, _plan: &mut LoadPlan) {}
}

pub struct NoHooks;

impl EntityHooks for NoHooks {}
