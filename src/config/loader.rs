//! Load schema documents from disk or memory and resolve them into a runtime [`Schema`].

use crate::config::resolved::{ColumnInfo, EntityDescriptor, RelationshipInfo, Schema, SearchVectorInfo};
use crate::config::types::*;
use crate::config::{validate, CREATED_AT, PRIMARY_KEY, UPDATED_AT};
use crate::error::ConfigError;
use crate::service::TransitionGraph;
use std::collections::HashSet;
use std::path::Path;

/// Text-search configuration used when a search vector does not name one.
pub const DEFAULT_SEARCH_CONFIG: &str = "simple";

/// Build the resolved schema from a schema document (validates first).
pub fn resolve(file: &SchemaFile) -> Result<Schema, ConfigError> {
    validate(file)?;

    let mut entities = Vec::with_capacity(file.entities.len());
    for e in &file.entities {
        let mut columns = vec![ColumnInfo {
            name: PRIMARY_KEY.into(),
            scalar: ScalarType::Text,
            nullable: false,
            unique: false,
            default: None,
            read_only: true,
        }];
        columns.extend(e.columns.iter().map(|c| ColumnInfo {
            name: c.name.clone(),
            scalar: c.type_,
            nullable: c.nullable,
            unique: c.unique,
            default: c.default.clone(),
            read_only: c.read_only,
        }));

        let declared: HashSet<&str> = e.columns.iter().map(|c| c.name.as_str()).collect();
        if !declared.contains(CREATED_AT) {
            columns.push(ColumnInfo {
                name: CREATED_AT.into(),
                scalar: ScalarType::DateTime,
                nullable: false,
                unique: false,
                default: Some(ColumnDefaultConfig::Expression {
                    expression: "NOW()".into(),
                }),
                read_only: true,
            });
        }
        if e.track_updated_at && !declared.contains(UPDATED_AT) {
            columns.push(ColumnInfo {
                name: UPDATED_AT.into(),
                scalar: ScalarType::DateTime,
                nullable: true,
                unique: false,
                default: None,
                read_only: true,
            });
        }
        for v in &e.search_vectors {
            columns.push(ColumnInfo {
                name: v.name.clone(),
                scalar: ScalarType::SearchVector,
                nullable: true,
                unique: false,
                default: None,
                read_only: true,
            });
        }

        let relationships = e
            .relationships
            .iter()
            .map(|r| match r.kind {
                RelationKind::ManyToOne => RelationshipInfo {
                    name: r.name.clone(),
                    kind: r.kind,
                    target: r.target.clone(),
                    local_column: r.column.clone().unwrap_or_else(|| format!("{}_id", r.name)),
                    remote_column: PRIMARY_KEY.into(),
                    on_delete: r.on_delete.clone(),
                },
                RelationKind::OneToMany => RelationshipInfo {
                    name: r.name.clone(),
                    kind: r.kind,
                    target: r.target.clone(),
                    local_column: PRIMARY_KEY.into(),
                    // validate() guarantees the column is present for one_to_many
                    remote_column: r.column.clone().unwrap_or_default(),
                    on_delete: r.on_delete.clone(),
                },
            })
            .collect();

        let search_vectors = e
            .search_vectors
            .iter()
            .map(|v| SearchVectorInfo {
                name: v.name.clone(),
                indexed_columns: v.columns.clone(),
                config: v.config.clone().unwrap_or_else(|| DEFAULT_SEARCH_CONFIG.into()),
            })
            .collect();

        let transitions = e
            .transitions
            .as_ref()
            .map(|t| TransitionGraph::new(t.key.clone(), t.graph.clone()));

        entities.push(EntityDescriptor {
            name: e.name.clone(),
            schema_name: file.schema.clone(),
            table_name: e.table.clone().unwrap_or_else(|| e.name.clone()),
            primary_key: PRIMARY_KEY.into(),
            columns,
            relationships,
            search_vectors,
            unique: e.unique.clone(),
            tracks_updated_at: e.track_updated_at,
            transitions,
        });
    }

    Ok(Schema::new(entities))
}

/// Parse a schema document from JSON text.
pub fn parse_schema(json: &str) -> Result<SchemaFile, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read, parse and resolve a schema document from disk.
pub async fn load_schema(path: impl AsRef<Path>) -> Result<Schema, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let file = parse_schema(&text)?;
    let schema = resolve(&file)?;
    tracing::info!(path = %path.display(), entities = schema.entities().len(), "schema loaded");
    Ok(schema)
}
