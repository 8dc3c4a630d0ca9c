//! Query assembly: joins, typed predicates and ordering composed into one [`SelectPlan`].

use crate::config::{EntityDescriptor, ScalarType, Schema, CREATED_AT};
use crate::error::{AppError, ConfigError};
use crate::filter::alias::{resolve_aliases, AliasPlan, ROOT_ALIAS};
use crate::filter::cast::{cast_date_value, cast_filter_value, pattern_text, split_list};
use crate::filter::keys::{ParsedFilter, SortKey, RELATION_SEPARATOR};
use crate::filter::operators::{Arity, ColumnRef, Operand, Operator, Predicate};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum OrderTerm {
    Column { column: ColumnRef, descending: bool },
    /// Full-text relevance, highest first.
    Rank {
        vector: ColumnRef,
        query: String,
        config: String,
    },
}

/// A composed read against one root entity. Rendered by [`crate::sql::render_select`].
#[derive(Clone, Debug)]
pub struct SelectPlan {
    pub entity: Arc<EntityDescriptor>,
    pub joins: AliasPlan,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectPlan {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        SelectPlan {
            entity,
            joins: AliasPlan::default(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        if !self.predicates.contains(&predicate) {
            self.predicates.push(predicate);
        }
    }

    /// Appends an ORDER BY term unless the same column (or rank) is already ordered on.
    pub fn add_order(&mut self, term: OrderTerm) {
        if !self.order.iter().any(|t| same_order_target(t, &term)) {
            self.order.push(term);
        }
    }

    /// Puts `term` first, replacing any existing term on the same target.
    pub fn prepend_order(&mut self, term: OrderTerm) {
        self.order.retain(|t| !same_order_target(t, &term));
        self.order.insert(0, term);
    }

    pub fn root_column(&self, name: &str) -> Result<ColumnRef, AppError> {
        let col = self.entity.scalar_column(name)?;
        Ok(ColumnRef {
            alias: ROOT_ALIAS.to_string(),
            column: col.name.clone(),
            scalar: col.scalar,
        })
    }

    pub fn window(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

fn same_order_target(a: &OrderTerm, b: &OrderTerm) -> bool {
    match (a, b) {
        (OrderTerm::Column { column: x, .. }, OrderTerm::Column { column: y, .. }) => {
            x.alias == y.alias && x.column == y.column
        }
        (OrderTerm::Rank { .. }, OrderTerm::Rank { .. }) => true,
        _ => false,
    }
}

/// Which default ordering a read gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortPolicy {
    /// `get`/`get_all`: caller sort, else newest first.
    Listing,
    /// Paginated reads and search: caller sort (else newest first) plus pk tie-breaker.
    Paged,
    /// No implicit ordering.
    Unsorted,
}

/// The sort keys actually applied under `policy`.
pub fn effective_sort(entity: &EntityDescriptor, sort: &[SortKey], policy: SortPolicy) -> Vec<SortKey> {
    let mut keys = sort.to_vec();
    if keys.is_empty() && policy != SortPolicy::Unsorted {
        keys.push(SortKey::desc(CREATED_AT));
    }
    if policy == SortPolicy::Paged
        && !keys
            .iter()
            .any(|k| k.path.is_empty() && k.attribute == entity.primary_key)
    {
        keys.push(SortKey::asc(&entity.primary_key));
    }
    keys
}

/// Composes filters and sorts against a root entity. Pure: no I/O.
pub struct QueryAssembler<'a> {
    schema: &'a Schema,
    root: &'a Arc<EntityDescriptor>,
}

impl<'a> QueryAssembler<'a> {
    pub fn new(schema: &'a Schema, root: &'a Arc<EntityDescriptor>) -> Self {
        QueryAssembler { schema, root }
    }

    pub fn assemble(
        &self,
        filters: &[ParsedFilter],
        sort: &[SortKey],
        policy: SortPolicy,
    ) -> Result<SelectPlan, AppError> {
        let mut plan = SelectPlan::new(self.root.clone());
        self.apply(&mut plan, filters, sort, policy)?;
        Ok(plan)
    }

    /// Add filters and sorts to an existing plan. Re-applying the same input
    /// leaves the plan unchanged.
    pub fn apply(
        &self,
        plan: &mut SelectPlan,
        filters: &[ParsedFilter],
        sort: &[SortKey],
        policy: SortPolicy,
    ) -> Result<(), AppError> {
        let sort = effective_sort(self.root, sort, policy);
        let paths = filters
            .iter()
            .map(|f| f.path.as_slice())
            .chain(sort.iter().map(|s| s.path.as_slice()));
        plan.joins.merge(resolve_aliases(self.schema, self.root, paths)?);

        for f in filters {
            let column = self.column_ref(&plan.joins, &f.path, &f.attribute)?;
            let operand = operand_for(f.operator, column.scalar, &f.value)?;
            plan.add_predicate(f.operator.build(column, operand));
        }
        for s in &sort {
            let column = self.column_ref(&plan.joins, &s.path, &s.attribute)?;
            plan.add_order(OrderTerm::Column {
                column,
                descending: s.descending,
            });
        }
        Ok(())
    }

    fn column_ref(&self, joins: &AliasPlan, path: &[String], attribute: &str) -> Result<ColumnRef, AppError> {
        let (alias, entity) = if path.is_empty() {
            (ROOT_ALIAS.to_string(), self.root)
        } else {
            let entry = joins.get(path).ok_or_else(|| AppError::NoSuchRelationship {
                path: path.join(RELATION_SEPARATOR),
                entity: self.root.name.clone(),
            })?;
            let entity = self.schema.entity(&entry.entity).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: entry.entity.clone(),
            })?;
            (entry.alias.clone(), entity)
        };
        let col = entity.scalar_column(attribute)?;
        Ok(ColumnRef {
            alias,
            column: col.name.clone(),
            scalar: col.scalar,
        })
    }
}

fn operand_for(operator: Operator, scalar: ScalarType, value: &Value) -> Result<Operand, AppError> {
    Ok(match operator.arity() {
        Arity::Unary => Operand::None,
        Arity::Scalar => Operand::Value(cast_filter_value(scalar, value)?),
        Arity::Pattern => Operand::Pattern(pattern_text(value)),
        Arity::List => Operand::List(
            split_list(value)
                .iter()
                .map(|v| cast_filter_value(scalar, v))
                .collect::<Result<_, _>>()?,
        ),
        Arity::Date => Operand::Value(cast_date_value(value)?),
    })
}
