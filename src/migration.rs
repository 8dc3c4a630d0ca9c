//! Apply the schema to the database: schemas, tables, foreign keys, search indexes and triggers.
//! Every statement is idempotent, so this runs on each startup.

use crate::config::{EntityDescriptor, RelationKind, Schema};
use crate::error::{AppError, ConfigError};
use crate::search::sync_search_trigger;
use crate::sql::{entity_table, quoted};
use sqlx::PgPool;
use std::collections::BTreeSet;

/// CREATE TABLE IF NOT EXISTS for one entity, including its implicit columns.
pub fn table_ddl(entity: &EntityDescriptor) -> String {
    let mut defs: Vec<String> = Vec::new();
    for c in &entity.columns {
        let mut def = format!("{} {}", quoted(&c.name), c.scalar.pg_type());
        if c.name == entity.primary_key {
            def.push_str(" PRIMARY KEY");
        } else {
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if c.unique {
                def.push_str(" UNIQUE");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(d.sql());
            }
        }
        defs.push(def);
    }
    for group in &entity.unique {
        let cols: Vec<String> = group.iter().map(|s| quoted(s)).collect();
        defs.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        entity_table(entity),
        defs.join(",\n  ")
    )
}

/// One constraint per many-to-one relationship. Re-running is a no-op.
pub fn foreign_key_ddl(schema: &Schema, entity: &EntityDescriptor) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for rel in entity.relationships.iter().filter(|r| r.kind == RelationKind::ManyToOne) {
        let target = schema
            .entity(&rel.target)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: rel.target.clone(),
            })?;
        let constraint = quoted(&format!("fk_{}_{}", entity.table_name, rel.local_column));
        let on_delete = rel
            .on_delete
            .as_deref()
            .map(|a| format!(" ON DELETE {}", a))
            .unwrap_or_default();
        out.push(format!(
            "DO $$ BEGIN ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){}; \
             EXCEPTION WHEN duplicate_object THEN NULL; END $$",
            entity_table(entity),
            constraint,
            quoted(&rel.local_column),
            entity_table(target),
            quoted(&rel.remote_column),
            on_delete
        ));
    }
    Ok(out)
}

/// GIN index per search vector.
pub fn index_ddl(entity: &EntityDescriptor) -> Vec<String> {
    entity
        .search_vectors
        .iter()
        .map(|v| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ({})",
                quoted(&format!("ix_{}_{}", entity.table_name, v.name)),
                entity_table(entity),
                quoted(&v.name)
            )
        })
        .collect()
}

async fn run(pool: &PgPool, sql: &str) -> Result<(), AppError> {
    tracing::debug!(sql = %sql, "migration");
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

/// Create everything `schema` describes. Tables come before foreign keys so
/// declaration order does not matter.
pub async fn apply_migrations(pool: &PgPool, schema: &Schema) -> Result<(), AppError> {
    let namespaces: BTreeSet<&str> = schema.entities().iter().map(|e| e.schema_name.as_str()).collect();
    for ns in namespaces {
        run(pool, &format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(ns))).await?;
    }
    for e in schema.entities() {
        run(pool, &table_ddl(e)).await?;
    }
    for e in schema.entities() {
        for sql in foreign_key_ddl(schema, e)? {
            run(pool, &sql).await?;
        }
        for sql in index_ddl(e) {
            run(pool, &sql).await?;
        }
    }
    for e in schema.entities() {
        for v in &e.search_vectors {
            sync_search_trigger(pool, e, &v.name).await?;
        }
    }
    tracing::info!(entities = schema.entities().len(), "migrations applied");
    Ok(())
}
