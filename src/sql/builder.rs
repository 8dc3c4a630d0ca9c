//! Renders parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from resolved entities and select plans.

use crate::config::{EntityDescriptor, ScalarType, Schema};
use crate::filter::{ColumnRef, ListMode, OrderTerm, Predicate, SelectPlan, ROOT_ALIAS};
use crate::filter::CompareOp;
use crate::sql::SqlValue;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

pub fn entity_table(entity: &EntityDescriptor) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: SqlValue) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Bind `v` and return its placeholder cast to `pg_type`.
    fn placeholder(&mut self, v: SqlValue, pg_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, pg_type)
    }
}

fn column_sql(c: &ColumnRef) -> String {
    format!("{}.{}", quoted(&c.alias), quoted(&c.column))
}

/// Plain column list (no alias) of every selectable column.
fn select_column_list(entity: &EntityDescriptor) -> String {
    entity
        .selectable_columns()
        .map(|c| quoted(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_type(entity: &EntityDescriptor, column: &str) -> &'static str {
    entity
        .column(column)
        .map(|c| c.scalar)
        .unwrap_or(ScalarType::Text)
        .pg_type()
}

fn render_predicate(q: &mut QueryBuf, p: &Predicate) -> String {
    match p {
        Predicate::Compare { column, op, value } if value.is_null() => match op {
            CompareOp::Eq => format!("{} IS NULL", column_sql(column)),
            CompareOp::Ne => format!("{} IS NOT NULL", column_sql(column)),
            _ => "FALSE".to_string(),
        },
        Predicate::Compare { column, op, value } => {
            let ph = q.placeholder(value.clone(), column.scalar.pg_type());
            format!("{} {} {}", column_sql(column), op.sql(), ph)
        }
        Predicate::DateCompare { column, op, value } => {
            let ph = q.placeholder(value.clone(), "date");
            format!("CAST({} AS date) {} {}", column_sql(column), op.sql(), ph)
        }
        Predicate::Like {
            column,
            pattern,
            case_insensitive,
            negated,
        } => {
            let ph = q.placeholder(SqlValue::Text(pattern.clone()), "text");
            let not = if *negated { "NOT " } else { "" };
            let like = if *case_insensitive { "ILIKE" } else { "LIKE" };
            format!("{}::text {}{} {}", column_sql(column), not, like, ph)
        }
        Predicate::Null { column, negated } => {
            let not = if *negated { "NOT " } else { "" };
            format!("{} IS {}NULL", column_sql(column), not)
        }
        Predicate::InList { column, values, mode } => {
            if values.is_empty() {
                return match mode {
                    ListMode::In | ListMode::Any => "FALSE".to_string(),
                    ListMode::NotIn | ListMode::NotInOrNull => "TRUE".to_string(),
                };
            }
            let col = column_sql(column);
            let phs = values
                .iter()
                .map(|v| q.placeholder(v.clone(), column.scalar.pg_type()))
                .collect::<Vec<_>>()
                .join(", ");
            match mode {
                ListMode::In => format!("{} IN ({})", col, phs),
                ListMode::NotIn => format!("{} NOT IN ({})", col, phs),
                ListMode::NotInOrNull => format!("({} NOT IN ({}) OR {} IS NULL)", col, phs, col),
                ListMode::Any => format!("{} = ANY(ARRAY[{}])", col, phs),
            }
        }
        Predicate::TextMatch { vector, query, config } => {
            let tsquery = render_tsquery(q, query, config);
            format!("{} @@ {}", column_sql(vector), tsquery)
        }
    }
}

fn render_tsquery(q: &mut QueryBuf, query: &str, config: &str) -> String {
    let cfg = q.placeholder(SqlValue::Text(config.to_string()), "regconfig");
    let text = q.placeholder(SqlValue::Text(query.to_string()), "text");
    format!("websearch_to_tsquery({}, {})", cfg, text)
}

fn render_order(q: &mut QueryBuf, term: &OrderTerm) -> String {
    match term {
        OrderTerm::Column { column, descending } => {
            format!("{} {}", column_sql(column), if *descending { "DESC" } else { "ASC" })
        }
        OrderTerm::Rank { vector, query, config } => {
            let tsquery = render_tsquery(q, query, config);
            format!("ts_rank_cd({}, {}) DESC", column_sql(vector), tsquery)
        }
    }
}

/// FROM clause: root table plus one LEFT OUTER JOIN per alias.
fn from_clause(schema: &Schema, plan: &SelectPlan) -> String {
    let mut sql = format!("{} AS {}", entity_table(&plan.entity), quoted(ROOT_ALIAS));
    for join in plan.joins.entries() {
        let table = schema
            .entity(&join.entity)
            .map(|e| entity_table(e))
            .unwrap_or_else(|| quoted(&join.entity));
        sql.push_str(&format!(
            " LEFT OUTER JOIN {} AS {} ON {}.{} = {}.{}",
            table,
            quoted(&join.alias),
            quoted(&join.alias),
            quoted(&join.relationship.remote_column),
            quoted(&join.parent_alias),
            quoted(&join.relationship.local_column),
        ));
    }
    sql
}

fn where_clause(q: &mut QueryBuf, plan: &SelectPlan) -> String {
    if plan.predicates.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = plan.predicates.iter().map(|p| render_predicate(q, p)).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

fn root_select_list(entity: &EntityDescriptor) -> String {
    entity
        .selectable_columns()
        .map(|c| format!("{}.{} AS {}", quoted(ROOT_ALIAS), quoted(&c.name), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn window_sql(plan: &SelectPlan) -> String {
    let limit_sql = plan.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = plan.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    format!("{}{}", limit_sql, offset_sql)
}

/// SELECT root columns for a composed plan, with ORDER BY and LIMIT/OFFSET.
///
/// A windowed plan with a one-to-many join is paged over distinct root rows,
/// see [`render_distinct_window`].
pub fn render_select(schema: &Schema, plan: &SelectPlan) -> QueryBuf {
    let windowed = plan.limit.is_some() || plan.offset.is_some();
    if windowed && plan.joins.fans_out() {
        return render_distinct_window(schema, plan);
    }
    let mut q = QueryBuf::new();
    let cols = root_select_list(&plan.entity);
    let from = from_clause(schema, plan);
    let where_sql = where_clause(&mut q, plan);
    let terms: Vec<String> = plan.order.iter().map(|t| render_order(&mut q, t)).collect();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        cols,
        from,
        where_sql,
        order_by_sql(&terms),
        window_sql(plan)
    );
    q
}

fn order_by_sql(terms: &[String]) -> String {
    if terms.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", terms.join(", "))
    }
}

/// Sort key of a joined column folded over the rows of one root: the value
/// that would have sorted first.
fn order_aggregate(column: &ColumnRef, descending: bool) -> String {
    let col = column_sql(column);
    match (column.scalar, descending) {
        (ScalarType::Boolean, false) => format!("bool_and({})", col),
        (ScalarType::Boolean, true) => format!("bool_or({})", col),
        (ScalarType::Json, false) => format!("MIN({}::text)", col),
        (ScalarType::Json, true) => format!("MAX({}::text)", col),
        (_, false) => format!("MIN({})", col),
        (_, true) => format!("MAX({})", col),
    }
}

/// Joined rows are grouped by root primary key and the window is cut over
/// those groups; the outer query reads the chosen roots in the same order.
/// Root sort columns are grouped on, joined ones aggregated.
fn render_distinct_window(schema: &Schema, plan: &SelectPlan) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = format!("{}.{}", quoted(ROOT_ALIAS), quoted(&plan.entity.primary_key));
    let mut keys = vec![format!("{} AS \"page_id\"", pk)];
    let mut group = vec![pk.clone()];
    let mut inner_order = Vec::new();
    let mut outer_order = Vec::new();
    for (i, term) in plan.order.iter().enumerate() {
        let (expr, descending) = match term {
            OrderTerm::Column { column, descending } if column.alias == ROOT_ALIAS => {
                let col = column_sql(column);
                group.push(col.clone());
                (col, *descending)
            }
            OrderTerm::Column { column, descending } => (order_aggregate(column, *descending), *descending),
            OrderTerm::Rank { vector, query, config } => {
                let tsquery = render_tsquery(&mut q, query, config);
                (format!("MAX(ts_rank_cd({}, {}))", column_sql(vector), tsquery), true)
            }
        };
        let name = quoted(&format!("page_o{}", i));
        let dir = if descending { "DESC" } else { "ASC" };
        keys.push(format!("{} AS {}", expr, name));
        inner_order.push(format!("{} {}", name, dir));
        outer_order.push(format!("\"page\".{} {}", name, dir));
    }
    let from = from_clause(schema, plan);
    let where_sql = where_clause(&mut q, plan);
    let inner = format!(
        "SELECT {} FROM {}{} GROUP BY {}{}{}",
        keys.join(", "),
        from,
        where_sql,
        group.join(", "),
        order_by_sql(&inner_order),
        window_sql(plan)
    );
    q.sql = format!(
        "SELECT {} FROM {} AS {} INNER JOIN ({}) AS \"page\" ON \"page\".\"page_id\" = {}{}",
        root_select_list(&plan.entity),
        entity_table(&plan.entity),
        quoted(ROOT_ALIAS),
        inner,
        pk,
        order_by_sql(&outer_order)
    );
    q
}

/// COUNT of distinct root rows matching the plan's joins and predicates (order and window ignored).
pub fn render_count(schema: &Schema, plan: &SelectPlan) -> QueryBuf {
    let mut q = QueryBuf::new();
    let from = from_clause(schema, plan);
    let where_sql = where_clause(&mut q, plan);
    q.sql = format!(
        "SELECT COUNT(DISTINCT {}.{}) AS \"count\" FROM {}{}",
        quoted(ROOT_ALIAS),
        quoted(&plan.entity.primary_key),
        from,
        where_sql
    );
    q
}

/// INSERT one row. Columns not in `values` are left to their DB defaults.
pub fn insert(entity: &EntityDescriptor, values: &[(String, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols: Vec<String> = values.iter().map(|(c, _)| quoted(c)).collect();
    let phs: Vec<String> = values
        .iter()
        .map(|(c, v)| q.placeholder(v.clone(), column_type(entity, c)))
        .collect();
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity_table(entity),
        cols.join(", "),
        phs.join(", ")
    );
    q
}

/// Targeted UPDATE of the given columns by primary key; stamps `updated_at` when tracked.
pub fn update(entity: &EntityDescriptor, id: &str, values: &[(String, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets: Vec<String> = values
        .iter()
        .map(|(c, v)| {
            let ph = q.placeholder(v.clone(), column_type(entity, c));
            format!("{} = {}", quoted(c), ph)
        })
        .collect();
    if entity.tracks_updated_at {
        sets.push(format!("{} = NOW()", quoted(crate::config::UPDATED_AT)));
    }
    let id_ph = q.placeholder(SqlValue::Text(id.to_string()), "text");
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        entity_table(entity),
        sets.join(", "),
        quoted(&entity.primary_key),
        id_ph
    );
    q
}

/// DELETE by primary key, returning the removed row.
pub fn delete_returning(entity: &EntityDescriptor, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = q.placeholder(SqlValue::Text(id.to_string()), "text");
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        entity_table(entity),
        quoted(&entity.primary_key),
        id_ph,
        select_column_list(entity)
    );
    q
}

/// SELECT rows whose `column` is one of `values`, ordered by pk. Used for batch-loading relationships.
pub fn select_by_column_in(entity: &EntityDescriptor, column_name: &str, values: &[SqlValue]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = entity_table(entity);
    let cols = select_column_list(entity);
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} WHERE 1 = 0", cols, table);
        return q;
    }
    let pg_type = column_type(entity, column_name);
    let phs: Vec<String> = values.iter().map(|v| q.placeholder(v.clone(), pg_type)).collect();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        cols,
        table,
        quoted(column_name),
        phs.join(", "),
        quoted(&entity.primary_key)
    );
    q
}

pub fn exists(entity: &EntityDescriptor, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = q.placeholder(SqlValue::Text(id.to_string()), "text");
    q.sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = {}) AS \"exists\"",
        entity_table(entity),
        quoted(&entity.primary_key),
        id_ph
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_schema;
    use crate::filter::{parse_filters, parse_sort_list, QueryAssembler, SortPolicy};
    use serde_json::{json, Value};

    fn plan(entity: &str, filters: &[(&str, Value)], sort: &str, policy: SortPolicy) -> (Schema, SelectPlan) {
        let schema = fixture_schema();
        let root = schema.entity(entity).unwrap().clone();
        let raw: Vec<(String, Value)> = filters.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let plan = QueryAssembler::new(&schema, &root)
            .assemble(&parse_filters(&raw).unwrap(), &parse_sort_list(sort).unwrap(), policy)
            .unwrap();
        (schema, plan)
    }

    #[test]
    fn select_joins_filters_and_orders() {
        let (schema, p) = plan(
            "partners",
            &[("owner___name__ilike", json!("%jo%")), ("rating__gte", json!(3))],
            "",
            SortPolicy::Paged,
        );
        let q = render_select(&schema, &p.window(Some(10), Some(10)));
        assert!(q.sql.starts_with("SELECT \"root\".\"id\" AS \"id\", \"root\".\"name\" AS \"name\""));
        assert!(q.sql.contains(
            "FROM \"public\".\"partners\" AS \"root\" LEFT OUTER JOIN \"public\".\"users\" AS \"j_owner\" ON \"j_owner\".\"id\" = \"root\".\"owner_id\""
        ));
        assert!(q.sql.contains(
            " WHERE \"j_owner\".\"name\"::text ILIKE $1::text AND \"root\".\"rating\" >= $2::double precision"
        ));
        assert!(q.sql.ends_with(" ORDER BY \"root\".\"created_at\" DESC, \"root\".\"id\" ASC LIMIT 10 OFFSET 10"));
        assert_eq!(q.params, vec![SqlValue::Text("%jo%".into()), SqlValue::Float(3.0)]);
        assert!(!q.sql.contains("search_vector"));
    }

    #[test]
    fn one_to_many_joins_on_their_fk() {
        let (schema, p) = plan("partners", &[("members___role", json!("PARTNER_ADMIN"))], "", SortPolicy::Unsorted);
        let q = render_select(&schema, &p);
        assert!(q.sql.contains(
            "LEFT OUTER JOIN \"public\".\"partnermembers\" AS \"j_members\" ON \"j_members\".\"partner_id\" = \"root\".\"id\""
        ));
    }

    #[test]
    fn windowed_one_to_many_pages_distinct_roots() {
        let (schema, p) = plan(
            "partners",
            &[("members___role", json!("PARTNER_MEMBER"))],
            "-members___is_active",
            SortPolicy::Paged,
        );
        let q = render_select(&schema, &p.window(Some(2), Some(2)));
        assert!(q.sql.starts_with("SELECT \"root\".\"id\" AS \"id\""));
        assert!(q.sql.contains(
            "INNER JOIN (SELECT \"root\".\"id\" AS \"page_id\", bool_or(\"j_members\".\"is_active\") AS \"page_o0\""
        ));
        assert!(q.sql.contains(" WHERE \"j_members\".\"role\" = $1::text GROUP BY \"root\".\"id\", "));
        assert!(q.sql.contains(" ORDER BY \"page_o0\" DESC, \"page_o1\" ASC LIMIT 2 OFFSET 2)"));
        assert!(q.sql.ends_with(
            "ON \"page\".\"page_id\" = \"root\".\"id\" ORDER BY \"page\".\"page_o0\" DESC, \"page\".\"page_o1\" ASC"
        ));
        assert_eq!(q.params, vec![SqlValue::Text("PARTNER_MEMBER".into())]);
    }

    #[test]
    fn unwindowed_or_many_to_one_reads_stay_flat() {
        let (schema, p) = plan("partners", &[("members___role", json!("x"))], "", SortPolicy::Paged);
        assert!(!render_select(&schema, &p).sql.contains("page_id"));
        let (schema, p) = plan("partners", &[("owner___name", json!("x"))], "", SortPolicy::Paged);
        assert!(!render_select(&schema, &p.window(Some(2), None)).sql.contains("page_id"));
    }

    #[test]
    fn count_ignores_order_and_window() {
        let (schema, p) = plan("users", &[("age__in", json!("20,30"))], "-name", SortPolicy::Listing);
        let q = render_count(&schema, &p.window(Some(5), Some(0)));
        assert_eq!(
            q.sql,
            "SELECT COUNT(DISTINCT \"root\".\"id\") AS \"count\" FROM \"public\".\"users\" AS \"root\" WHERE \"root\".\"age\" IN ($1::bigint, $2::bigint)"
        );
    }

    #[test]
    fn null_equality_and_list_modes() {
        let (schema, p) = plan(
            "partners",
            &[
                ("owner_id__isnull", json!(true)),
                ("status__notin_or_isnull", json!(["rejected"])),
                ("address__any", json!([])),
                ("created_at__asdate_lt", json!("2024-01-01")),
            ],
            "",
            SortPolicy::Unsorted,
        );
        let q = render_select(&schema, &p);
        assert!(q.sql.contains("\"root\".\"owner_id\" IS NULL"));
        assert!(q.sql.contains("(\"root\".\"status\" NOT IN ($1::text) OR \"root\".\"status\" IS NULL)"));
        assert!(q.sql.contains(" AND FALSE AND "));
        assert!(q.sql.contains("CAST(\"root\".\"created_at\" AS date) < $2::date"));
    }

    #[test]
    fn update_stamps_updated_at_only_when_tracked() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let q = update(partners, "p1", &[("name".into(), SqlValue::Text("Acme".into()))]);
        assert_eq!(
            q.sql,
            "UPDATE \"public\".\"partners\" SET \"name\" = $1::text, \"updated_at\" = NOW() WHERE \"id\" = $2::text"
        );
        let tokens = schema.entity("auth_tokens").unwrap();
        let q = update(tokens, "t1", &[("is_active".into(), SqlValue::Bool(false))]);
        assert!(!q.sql.contains("updated_at"));
    }

    #[test]
    fn insert_casts_each_column() {
        let schema = fixture_schema();
        let users = schema.entity("users").unwrap();
        let q = insert(
            users,
            &[("id".into(), SqlValue::Text("u1".into())), ("age".into(), SqlValue::Int(30))],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO \"public\".\"users\" (\"id\", \"age\") VALUES ($1::text, $2::bigint)"
        );
    }

    #[test]
    fn empty_in_batch_selects_nothing() {
        let schema = fixture_schema();
        let users = schema.entity("users").unwrap();
        assert!(select_by_column_in(users, "id", &[]).sql.ends_with("WHERE 1 = 0"));
    }
}
