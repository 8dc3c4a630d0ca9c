//! Operator table: filter-key operator tokens to predicate constructors.

use crate::error::AppError;
use crate::sql::SqlValue;
use crate::config::ScalarType;
use std::str::FromStr;

/// Reference to one column of the root entity or of a joined alias.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
    pub scalar: ScalarType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListMode {
    In,
    NotIn,
    NotInOrNull,
    /// `col = ANY(ARRAY[..])`
    Any,
}

/// A typed boolean condition, independent of how it is rendered.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: SqlValue,
    },
    /// Compares only the date part of the column.
    DateCompare {
        column: ColumnRef,
        op: CompareOp,
        value: SqlValue,
    },
    Like {
        column: ColumnRef,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    Null {
        column: ColumnRef,
        negated: bool,
    },
    InList {
        column: ColumnRef,
        values: Vec<SqlValue>,
        mode: ListMode,
    },
    /// Full-text match against a search vector.
    TextMatch {
        vector: ColumnRef,
        query: String,
        config: String,
    },
}

/// How an operator consumes its filter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    /// Value ignored.
    Unary,
    /// Value cast to the column type.
    Scalar,
    /// Value used as a text pattern.
    Pattern,
    /// Value is a list (or comma separated string) of column-typed values.
    List,
    /// Value cast to a date.
    Date,
}

/// Operand handed to [`Operator::build`] after casting.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    Value(SqlValue),
    Pattern(String),
    List(Vec<SqlValue>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Exact,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    NotLike,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    NotInOrIsNull,
    Any,
    AsDate,
    AsDateNe,
    AsDateGt,
    AsDateGe,
    AsDateLt,
    AsDateLe,
}

const TOKENS: &[(&str, Operator)] = &[
    ("exact", Operator::Exact),
    ("ne", Operator::Ne),
    ("gt", Operator::Gt),
    ("gte", Operator::Gte),
    ("lt", Operator::Lt),
    ("lte", Operator::Lte),
    ("like", Operator::Like),
    ("ilike", Operator::Ilike),
    ("notlike", Operator::NotLike),
    ("startswith", Operator::StartsWith),
    ("istartswith", Operator::IStartsWith),
    ("endswith", Operator::EndsWith),
    ("iendswith", Operator::IEndsWith),
    ("contains", Operator::Contains),
    ("isnull", Operator::IsNull),
    ("isnotnull", Operator::IsNotNull),
    ("in", Operator::In),
    ("notin", Operator::NotIn),
    ("notin_or_isnull", Operator::NotInOrIsNull),
    ("any", Operator::Any),
    ("asdate", Operator::AsDate),
    ("asdate_ne", Operator::AsDateNe),
    ("asdate_gt", Operator::AsDateGt),
    ("asdate_ge", Operator::AsDateGe),
    ("asdate_lt", Operator::AsDateLt),
    ("asdate_le", Operator::AsDateLe),
];

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}

/// Look up an operator token.
pub fn resolve(token: &str) -> Result<Operator, AppError> {
    TOKENS
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, op)| *op)
        .ok_or_else(|| AppError::UnknownOperator(token.to_string()))
}

impl Operator {
    pub fn token(self) -> &'static str {
        TOKENS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(t, _)| *t)
            .unwrap_or("exact")
    }

    pub fn arity(self) -> Arity {
        use Operator::*;
        match self {
            IsNull | IsNotNull => Arity::Unary,
            Exact | Ne | Gt | Gte | Lt | Lte => Arity::Scalar,
            Like | Ilike | NotLike | StartsWith | IStartsWith | EndsWith | IEndsWith | Contains => {
                Arity::Pattern
            }
            In | NotIn | NotInOrIsNull | Any => Arity::List,
            AsDate | AsDateNe | AsDateGt | AsDateGe | AsDateLt | AsDateLe => Arity::Date,
        }
    }

    /// Build the predicate for `column` from an operand shaped per [`Operator::arity`].
    pub fn build(self, column: ColumnRef, operand: Operand) -> Predicate {
        use Operator::*;
        let value = |operand: Operand| match operand {
            Operand::Value(v) => v,
            Operand::Pattern(p) => SqlValue::Text(p),
            Operand::List(_) | Operand::None => SqlValue::Null,
        };
        let pattern = |operand: Operand| match operand {
            Operand::Pattern(p) => p,
            Operand::Value(SqlValue::Text(s)) => s,
            Operand::Value(v) => v.to_json().to_string(),
            Operand::List(_) | Operand::None => String::new(),
        };
        let list = |operand: Operand| match operand {
            Operand::List(values) => values,
            Operand::Value(v) => vec![v],
            Operand::Pattern(p) => vec![SqlValue::Text(p)],
            Operand::None => Vec::new(),
        };
        let like = |column, pattern: String, case_insensitive, negated| Predicate::Like {
            column,
            pattern,
            case_insensitive,
            negated,
        };
        let compare = |column, op, value| Predicate::Compare { column, op, value };
        let date = |column, op, value| Predicate::DateCompare { column, op, value };

        match self {
            IsNull => Predicate::Null { column, negated: false },
            IsNotNull => Predicate::Null { column, negated: true },
            Exact => compare(column, CompareOp::Eq, value(operand)),
            Ne => compare(column, CompareOp::Ne, value(operand)),
            Gt => compare(column, CompareOp::Gt, value(operand)),
            Gte => compare(column, CompareOp::Gte, value(operand)),
            Lt => compare(column, CompareOp::Lt, value(operand)),
            Lte => compare(column, CompareOp::Lte, value(operand)),
            Like => like(column, pattern(operand), false, false),
            Ilike => like(column, pattern(operand), true, false),
            NotLike => like(column, format!("%{}%", pattern(operand)), false, true),
            StartsWith => like(column, format!("{}%", pattern(operand)), false, false),
            IStartsWith => like(column, format!("{}%", pattern(operand)), true, false),
            EndsWith => like(column, format!("%{}", pattern(operand)), false, false),
            IEndsWith => like(column, format!("%{}", pattern(operand)), true, false),
            Contains => like(column, format!("%{}%", pattern(operand)), true, false),
            In => Predicate::InList { column, values: list(operand), mode: ListMode::In },
            NotIn => Predicate::InList { column, values: list(operand), mode: ListMode::NotIn },
            NotInOrIsNull => Predicate::InList {
                column,
                values: list(operand),
                mode: ListMode::NotInOrNull,
            },
            Any => Predicate::InList { column, values: list(operand), mode: ListMode::Any },
            AsDate => date(column, CompareOp::Eq, value(operand)),
            AsDateNe => date(column, CompareOp::Ne, value(operand)),
            AsDateGt => date(column, CompareOp::Gt, value(operand)),
            AsDateGe => date(column, CompareOp::Gte, value(operand)),
            AsDateLt => date(column, CompareOp::Lt, value(operand)),
            AsDateLe => date(column, CompareOp::Lte, value(operand)),
        }
    }
}
