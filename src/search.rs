//! Full-text search: query rewriting and search-vector trigger maintenance.

use crate::config::{EntityDescriptor, ScalarType, SearchVectorInfo};
use crate::error::AppError;
use crate::filter::{ColumnRef, OrderTerm, Predicate, SelectPlan, ROOT_ALIAS};
use crate::sql::{entity_table, quoted};
use serde::Deserialize;
use sqlx::PgPool;

/// Text query for [`crate::service::Dao::search`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: String,
    /// Search vector to match; the entity's first one when absent.
    #[serde(default)]
    pub vector: Option<String>,
    #[serde(default)]
    pub by_relevance: bool,
}

/// Add a web-style text match (and optionally relevance ordering) to `plan`.
/// Blank `text` leaves the plan untouched. Without `vector` the entity's first
/// search vector is used.
pub fn apply(plan: &mut SelectPlan, text: &str, vector: Option<&str>, by_relevance: bool) -> Result<(), AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let entity = plan.entity.clone();
    let info = resolve_vector(&entity, vector)?;
    let column = ColumnRef {
        alias: ROOT_ALIAS.to_string(),
        column: info.name.clone(),
        scalar: ScalarType::SearchVector,
    };
    plan.add_predicate(Predicate::TextMatch {
        vector: column.clone(),
        query: text.to_string(),
        config: info.config.clone(),
    });
    if by_relevance {
        plan.prepend_order(OrderTerm::Rank {
            vector: column,
            query: text.to_string(),
            config: info.config.clone(),
        });
    }
    Ok(())
}

fn resolve_vector<'e>(entity: &'e EntityDescriptor, name: Option<&str>) -> Result<&'e SearchVectorInfo, AppError> {
    match name {
        Some(name) => entity.search_vector(name).ok_or_else(|| AppError::UnknownField {
            field: name.to_string(),
            entity: entity.name.clone(),
        }),
        None => entity
            .search_vectors
            .first()
            .ok_or_else(|| AppError::BadRequest(format!("{} has no search vector", entity.name))),
    }
}

fn trigger_names(entity: &EntityDescriptor, vector: &SearchVectorInfo) -> (String, String) {
    let base = format!("{}_{}", entity.table_name, vector.name);
    (
        format!("{}.{}", quoted(&entity.schema_name), quoted(&format!("{}_refresh", base))),
        quoted(&format!("{}_trigger", base)),
    )
}

/// Statements that (re)create the trigger keeping `vector` in sync with its
/// indexed columns, then touch every row so existing vectors are rebuilt.
pub fn search_trigger_ddl(entity: &EntityDescriptor, vector: &SearchVectorInfo) -> Vec<String> {
    let table = entity_table(entity);
    let (function, trigger) = trigger_names(entity, vector);
    let document = vector
        .indexed_columns
        .iter()
        .map(|c| format!("coalesce(NEW.{}, '')", quoted(c)))
        .collect::<Vec<_>>()
        .join(" || ' ' || ");
    let first = vector
        .indexed_columns
        .first()
        .map(|c| quoted(c))
        .unwrap_or_else(|| quoted(&entity.primary_key));
    vec![
        format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table),
        format!("DROP FUNCTION IF EXISTS {}()", function),
        format!(
            "CREATE FUNCTION {}() RETURNS trigger AS $$ BEGIN NEW.{} := to_tsvector('{}'::regconfig, {}); RETURN NEW; END $$ LANGUAGE plpgsql",
            function,
            quoted(&vector.name),
            vector.config,
            document
        ),
        format!(
            "CREATE TRIGGER {} BEFORE INSERT OR UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
            trigger, table, function
        ),
        format!("UPDATE {} SET {} = {}", table, first, first),
    ]
}

/// Administrative: rebuild the trigger for `vector_name` on `entity` in one transaction.
pub async fn sync_search_trigger(pool: &PgPool, entity: &EntityDescriptor, vector_name: &str) -> Result<(), AppError> {
    let vector = resolve_vector(entity, Some(vector_name))?;
    let mut tx = pool.begin().await?;
    for stmt in search_trigger_ddl(entity, vector) {
        tracing::debug!(sql = %stmt, "search trigger");
        sqlx::query(&stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(entity = %entity.name, vector = %vector.name, config = %vector.config, "search trigger synced");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_schema;
    use crate::filter::{parse_filters, QueryAssembler, SortPolicy};
    use crate::sql::render_select;
    use serde_json::json;

    fn partner_plan() -> (crate::config::Schema, SelectPlan) {
        let schema = fixture_schema();
        let root = schema.entity("partners").unwrap().clone();
        let filters = parse_filters(&[("is_active".to_string(), json!(true))]).unwrap();
        let plan = QueryAssembler::new(&schema, &root)
            .assemble(&filters, &[], SortPolicy::Paged)
            .unwrap();
        (schema, plan)
    }

    #[test]
    fn blank_text_leaves_statement_identical() {
        let (schema, mut plan) = partner_plan();
        let before = render_select(&schema, &plan);
        for blank in ["", "   ", "\t\n"] {
            apply(&mut plan, blank, None, true).unwrap();
        }
        let after = render_select(&schema, &plan);
        assert_eq!(before.sql, after.sql);
        assert_eq!(before.params, after.params);
    }

    #[test]
    fn defaults_to_first_vector_and_ranks_first() {
        let (schema, mut plan) = partner_plan();
        apply(&mut plan, "acme \"big data\"", None, true).unwrap();
        let q = render_select(&schema, &plan);
        assert!(q.sql.contains("\"root\".\"search_vector\" @@ websearch_to_tsquery($2::regconfig, $3::text)"));
        assert!(q.sql.contains(
            "ORDER BY ts_rank_cd(\"root\".\"search_vector\", websearch_to_tsquery($4::regconfig, $5::text)) DESC, \"root\".\"created_at\" DESC"
        ));
    }

    #[test]
    fn unknown_vector_or_entity_without_vectors_fails() {
        let (_, mut plan) = partner_plan();
        assert!(matches!(
            apply(&mut plan, "x", Some("nope"), false),
            Err(AppError::UnknownField { .. })
        ));
        let schema = fixture_schema();
        let tokens = schema.entity("auth_tokens").unwrap().clone();
        let mut plan = SelectPlan::new(tokens);
        assert!(matches!(apply(&mut plan, "x", None, false), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn trigger_concatenates_indexed_columns() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let ddl = search_trigger_ddl(partners, &partners.search_vectors[0]);
        assert_eq!(ddl.len(), 5);
        assert!(ddl[2].contains(
            "NEW.\"search_vector\" := to_tsvector('simple'::regconfig, coalesce(NEW.\"name\", '') || ' ' || coalesce(NEW.\"address\", ''))"
        ));
        assert!(ddl[3].contains("BEFORE INSERT OR UPDATE ON \"public\".\"partners\""));
        assert_eq!(ddl[4], "UPDATE \"public\".\"partners\" SET \"name\" = \"name\"");
    }
}
