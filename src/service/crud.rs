//! Generic data access for one entity: reads composed from the filter DSL,
//! writes with hooks, dirty tracking and state-transition checks.

use crate::config::{EntityDescriptor, RelationKind, ScalarType, Schema};
use crate::error::{AppError, ConfigError};
use crate::filter::{
    cast_filter_value, cast_write_value, normalize_filters, parse_filters, CompareOp, Filters, OrderTerm,
    Predicate, QueryAssembler, SelectPlan, SortKey, SortPolicy,
};
use crate::pagination::{BatchSource, ChunkedRows, Page, PageParams};
use crate::search::{self, SearchParams};
use crate::service::hooks::{EntityHooks, NoHooks};
use crate::service::record::{ChangedField, ChangedFields, LoadPlan, Record, Related, Values};
use crate::sql::{self, render_count, render_select, select_by_column_in, SqlValue};
use crate::store;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Connection, PgConnection, PgPool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Data accessor for one entity. Cheap to clone.
#[derive(Clone)]
pub struct Dao {
    schema: Arc<Schema>,
    entity: Arc<EntityDescriptor>,
    hooks: Arc<dyn EntityHooks>,
    load_plan: LoadPlan,
}

fn key_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Dao {
    pub fn new(schema: Arc<Schema>, entity: Arc<EntityDescriptor>) -> Self {
        Dao {
            schema,
            entity,
            hooks: Arc::new(NoHooks),
            load_plan: LoadPlan::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_load_plan(mut self, load_plan: LoadPlan) -> Self {
        self.load_plan = load_plan;
        self
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn name(&self) -> &str {
        &self.entity.name
    }

    fn not_found(&self) -> AppError {
        AppError::NotFound(format!("{} not found", self.entity.name))
    }

    /// Compile caller filters and sorts into a plan. Pure; all caller errors surface here.
    pub fn compile(&self, filters: &Filters, sort: &[SortKey], policy: SortPolicy) -> Result<SelectPlan, AppError> {
        let filters = normalize_filters(filters.iter().cloned());
        let parsed = parse_filters(&filters)?;
        let mut plan = QueryAssembler::new(&self.schema, &self.entity).assemble(&parsed, sort, policy)?;
        self.hooks.customize_query(&mut plan, &filters)?;
        Ok(plan)
    }

    /// Default Load Plan extended with `include`, then adjusted by the entity's hooks.
    pub fn resolve_load_plan(&self, filters: &Filters, include: &[String]) -> Result<LoadPlan, AppError> {
        let mut plan = self.load_plan.clone();
        for name in include {
            if !self.entity.is_relationship(name) {
                return Err(AppError::NoSuchRelationship {
                    path: name.clone(),
                    entity: self.entity.name.clone(),
                });
            }
            plan.insert(name);
        }
        self.hooks.modify_load_plan(filters, &mut plan);
        Ok(plan)
    }

    /// Run a compiled plan. Windowed plans are cut over distinct roots by the renderer;
    /// rows repeated by to-many joins in unwindowed reads are collapsed here (first occurrence kept).
    pub async fn fetch_plan(
        &self,
        conn: &mut PgConnection,
        plan: &SelectPlan,
        load: &LoadPlan,
    ) -> Result<Vec<Record>, AppError> {
        let q = render_select(&self.schema, plan);
        let rows = store::fetch_all(conn, &self.entity, &q).await?;
        let mut seen = HashSet::new();
        let mut records: Vec<Record> = rows
            .into_iter()
            .map(Record::new)
            .filter(|r| seen.insert(r.id().to_string()))
            .collect();
        self.load_related(conn, &mut records, load).await?;
        Ok(records)
    }

    /// One batched IN query per planned relationship.
    async fn load_related(
        &self,
        conn: &mut PgConnection,
        records: &mut [Record],
        load: &LoadPlan,
    ) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        for name in load.iter() {
            let rel = self
                .entity
                .relationship(name)
                .ok_or_else(|| AppError::NoSuchRelationship {
                    path: name.to_string(),
                    entity: self.entity.name.clone(),
                })?;
            let target = self
                .schema
                .entity(&rel.target)
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "entity",
                    id: rel.target.clone(),
                })?;
            let remote_scalar = target
                .column(&rel.remote_column)
                .map(|c| c.scalar)
                .unwrap_or(ScalarType::Text);

            let mut keys = Vec::new();
            let mut seen = HashSet::new();
            for r in records.iter() {
                if let Some(v) = r.get(&rel.local_column).filter(|v| !v.is_null()) {
                    if seen.insert(key_str(v)) {
                        keys.push(cast_filter_value(remote_scalar, v)?);
                    }
                }
            }
            let rows = if keys.is_empty() {
                Vec::new()
            } else {
                let q = select_by_column_in(target, &rel.remote_column, &keys);
                store::fetch_all(conn, target, &q).await?
            };

            let mut by_key: HashMap<String, Vec<Record>> = HashMap::new();
            for row in rows {
                let k = row.get(&rel.remote_column).map(key_str).unwrap_or_default();
                by_key.entry(k).or_default().push(Record::new(row));
            }
            for r in records.iter_mut() {
                let matches = r
                    .get(&rel.local_column)
                    .filter(|v| !v.is_null())
                    .and_then(|v| by_key.get(&key_str(v)))
                    .cloned()
                    .unwrap_or_default();
                let related = match rel.kind {
                    RelationKind::ManyToOne => Related::One(matches.into_iter().next().map(Box::new)),
                    RelationKind::OneToMany => Related::Many(matches),
                };
                r.set_related(name, related);
            }
        }
        Ok(())
    }

    pub async fn get(&self, conn: &mut PgConnection, filters: &Filters) -> Result<Option<Record>, AppError> {
        let plan = self.compile(filters, &[], SortPolicy::Listing)?.window(Some(1), None);
        let load = self.resolve_load_plan(filters, &[])?;
        Ok(self.fetch_plan(conn, &plan, &load).await?.into_iter().next())
    }

    pub async fn get_not_none(&self, conn: &mut PgConnection, filters: &Filters) -> Result<Record, AppError> {
        self.get(conn, filters).await?.ok_or_else(|| self.not_found())
    }

    pub async fn get_by_id(&self, conn: &mut PgConnection, id: &str) -> Result<Option<Record>, AppError> {
        let filters = vec![(self.entity.primary_key.clone(), Value::String(id.to_string()))];
        self.get(conn, &filters).await
    }

    pub async fn get_all(
        &self,
        conn: &mut PgConnection,
        filters: &Filters,
        sort: &[SortKey],
    ) -> Result<Vec<Record>, AppError> {
        let plan = self.compile(filters, sort, SortPolicy::Listing)?;
        let load = self.resolve_load_plan(filters, &[])?;
        self.fetch_plan(conn, &plan, &load).await
    }

    pub async fn get_by_ids(&self, conn: &mut PgConnection, ids: &[String]) -> Result<Vec<Record>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let key = format!("{}__in", self.entity.primary_key);
        let filters = vec![(key, Value::Array(ids.iter().cloned().map(Value::String).collect()))];
        let plan = self.compile(&filters, &[], SortPolicy::Unsorted)?;
        let load = self.resolve_load_plan(&filters, &[])?;
        self.fetch_plan(conn, &plan, &load).await
    }

    pub async fn exists(&self, conn: &mut PgConnection, id: &str) -> Result<bool, AppError> {
        store::fetch_exists(conn, &sql::exists(&self.entity, id)).await
    }

    /// Window `plan` to one page and count its total. `per_page == 0` counts only.
    pub async fn paginate(
        &self,
        conn: &mut PgConnection,
        plan: SelectPlan,
        load: &LoadPlan,
        params: PageParams,
    ) -> Result<Page<Record>, AppError> {
        let total = store::fetch_count(conn, &render_count(&self.schema, &plan)).await?;
        if params.per_page == 0 {
            return Ok(Page::create(Vec::new(), total, params));
        }
        let plan = plan.window(Some(params.per_page), Some(params.offset()));
        let items = self.fetch_plan(conn, &plan, load).await?;
        Ok(Page::create(items, total, params))
    }

    pub async fn get_multi_paginated(
        &self,
        conn: &mut PgConnection,
        filters: &Filters,
        sort: &[SortKey],
        include: &[String],
        params: PageParams,
    ) -> Result<Page<Record>, AppError> {
        let plan = self.compile(filters, sort, SortPolicy::Paged)?;
        let load = self.resolve_load_plan(filters, include)?;
        self.paginate(conn, plan, &load, params).await
    }

    /// Every matching row in one read, ordered like a paginated read.
    pub async fn export(
        &self,
        conn: &mut PgConnection,
        filters: &Filters,
        sort: &[SortKey],
        include: &[String],
    ) -> Result<Vec<Record>, AppError> {
        let plan = self.compile(filters, sort, SortPolicy::Paged)?;
        let load = self.resolve_load_plan(filters, include)?;
        self.fetch_plan(conn, &plan, &load).await
    }

    pub async fn search(
        &self,
        conn: &mut PgConnection,
        search_params: &SearchParams,
        filters: &Filters,
        sort: &[SortKey],
        params: PageParams,
    ) -> Result<Page<Record>, AppError> {
        let mut plan = self.compile(filters, sort, SortPolicy::Paged)?;
        search::apply(
            &mut plan,
            &search_params.q,
            search_params.vector.as_deref(),
            search_params.by_relevance,
        )?;
        let load = self.resolve_load_plan(filters, &[])?;
        self.paginate(conn, plan, &load, params).await
    }

    /// Lazy keyset export in primary-key order. Each batch borrows a pool
    /// connection only while it runs.
    pub fn get_all_in_chunks(
        &self,
        pool: &PgPool,
        filters: &Filters,
        batch_size: u64,
    ) -> Result<ChunkedRows<ExportSource>, AppError> {
        let plan = self.compile(filters, &[], SortPolicy::Unsorted)?;
        let load = self.resolve_load_plan(filters, &[])?;
        let source = ExportSource {
            dao: self.clone(),
            pool: pool.clone(),
            plan,
            load,
        };
        Ok(ChunkedRows::new(source, batch_size))
    }

    /// Payload columns kept for a write: writable, non-null, arrays only for json columns.
    fn project(&self, input: &Values) -> Values {
        input
            .iter()
            .filter(|(k, v)| match self.entity.writable_column(k) {
                Some(col) => !v.is_null() && (col.scalar == ScalarType::Json || !v.is_array()),
                None => false,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn assignments(&self, values: &Values) -> Result<Vec<(String, SqlValue)>, AppError> {
        values
            .iter()
            .map(|(k, v)| {
                let col = self
                    .entity
                    .column(k)
                    .filter(|c| !c.is_search_vector() && c.name != self.entity.primary_key)
                    .ok_or_else(|| AppError::UnknownField {
                        field: k.clone(),
                        entity: self.entity.name.clone(),
                    })?;
                Ok((k.clone(), cast_write_value(col.scalar, v)?))
            })
            .collect()
    }

    /// Identifier (caller-supplied or generated) and projected columns for an insert.
    pub fn prepare_create(&self, input: &Values) -> Result<(String, Values), AppError> {
        let id = input
            .get(&self.entity.primary_key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let values = self.project(input);
        self.assignments(&values)?;
        Ok((id, values))
    }

    /// Projected columns that differ from `current`, with their diff.
    pub fn prepare_update(&self, current: &Record, input: &Values) -> Result<(Values, ChangedFields), AppError> {
        if input.is_empty() {
            return Err(AppError::NoUpdateData);
        }
        self.diff(current, &self.project(input))
    }

    fn diff(&self, current: &Record, values: &Values) -> Result<(Values, ChangedFields), AppError> {
        let mut kept = Values::new();
        let mut changed = ChangedFields::new();
        for (k, v) in values {
            let col = self.entity.scalar_column(k)?;
            let after = cast_write_value(col.scalar, v)?.to_json();
            let before = current.get(k).cloned().unwrap_or(Value::Null);
            if before == after {
                continue;
            }
            kept.insert(k.clone(), v.clone());
            changed.insert(k.clone(), ChangedField { before, after });
        }
        Ok((kept, changed))
    }

    /// Insert one row in its own transaction, then re-fetch it with the default Load Plan.
    pub async fn create(&self, conn: &mut PgConnection, input: Values) -> Result<Record, AppError> {
        let (id, mut values) = self.prepare_create(&input)?;

        let mut tx = conn.begin().await?;
        self.hooks.on_pre_create(&mut *tx, &id, &mut values, &input).await?;
        let mut assignments = vec![(self.entity.primary_key.clone(), SqlValue::Text(id.clone()))];
        assignments.extend(self.assignments(&values)?);
        store::execute(&mut *tx, &sql::insert(&self.entity, &assignments)).await?;
        self.hooks.on_relationship(&mut *tx, &id, &input, None).await?;
        tx.commit().await?;
        tracing::debug!(entity = %self.entity.name, id = %id, "created");

        let record = self.get_by_id(conn, &id).await?.ok_or_else(|| self.not_found())?;
        self.hooks.on_post_create(conn, &record).await?;
        Ok(record)
    }

    /// Targeted update of the fields that actually change. Values equal to the
    /// current ones are dropped; if none remain no UPDATE is issued.
    pub async fn update(&self, conn: &mut PgConnection, current: &Record, input: Values) -> Result<Record, AppError> {
        let (mut values, _) = self.prepare_update(current, &input)?;

        let mut tx = conn.begin().await?;
        self.hooks.on_pre_update(&mut *tx, current, &mut values, &input).await?;
        let (values, changed) = self.diff(current, &values)?;
        if let Some(graph) = &self.entity.transitions {
            graph.validate(&self.entity.name, current.values(), &values)?;
        }
        if values.is_empty() {
            tracing::debug!(entity = %self.entity.name, id = %current.id(), "update changes nothing");
        } else {
            let assignments = self.assignments(&values)?;
            store::execute(&mut *tx, &sql::update(&self.entity, current.id(), &assignments)).await?;
        }
        self.hooks.on_relationship(&mut *tx, current.id(), &input, Some(current)).await?;
        tx.commit().await?;

        let record = self
            .get_by_id(conn, current.id())
            .await?
            .ok_or_else(|| self.not_found())?;
        self.hooks.on_post_update(conn, &record, &changed).await?;
        Ok(record)
    }

    /// Delete by identifier; `None` when no such row.
    pub async fn remove(&self, conn: &mut PgConnection, id: &str) -> Result<Option<Record>, AppError> {
        let row = store::fetch_optional(conn, &self.entity, &sql::delete_returning(&self.entity, id)).await?;
        if row.is_some() {
            tracing::debug!(entity = %self.entity.name, id = %id, "removed");
        }
        Ok(row.map(Record::new))
    }
}

/// Batch source behind [`Dao::get_all_in_chunks`].
pub struct ExportSource {
    dao: Dao,
    pool: PgPool,
    plan: SelectPlan,
    load: LoadPlan,
}

#[async_trait]
impl BatchSource for ExportSource {
    type Item = Record;

    async fn fetch_after(&mut self, after: Option<&str>, limit: u64) -> Result<Vec<Record>, AppError> {
        let mut plan = self.plan.clone();
        let pk = plan.root_column(&self.dao.entity.primary_key)?;
        if let Some(after) = after {
            plan.add_predicate(Predicate::Compare {
                column: pk.clone(),
                op: CompareOp::Gt,
                value: SqlValue::Text(after.to_string()),
            });
        }
        plan.order.clear();
        plan.add_order(OrderTerm::Column {
            column: pk,
            descending: false,
        });
        let plan = plan.window(Some(limit), None);
        let mut conn = self.pool.acquire().await?;
        self.dao.fetch_plan(&mut conn, &plan, &self.load).await
    }

    fn key_of(item: &Record) -> String {
        item.id().to_string()
    }
}
