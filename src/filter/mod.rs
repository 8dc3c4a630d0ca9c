//! String-keyed filter/sort DSL compiled to a typed [`SelectPlan`].

pub mod alias;
pub mod assemble;
pub mod cast;
pub mod keys;
pub mod operators;

pub use alias::{resolve_aliases, AliasEntry, AliasPlan, ROOT_ALIAS};
pub use assemble::{effective_sort, OrderTerm, QueryAssembler, SelectPlan, SortPolicy};
pub use cast::{cast_filter_value, cast_write_value};
pub use keys::{
    normalize_filters, parse_filter_key, parse_filters, parse_sort, parse_sort_list, Filters, ParsedFilter,
    SortKey, DESC_PREFIX, OPERATOR_SEPARATOR, RELATION_SEPARATOR,
};
pub use operators::{ColumnRef, CompareOp, ListMode, Operator, Predicate};
