//! SQL compiler that turns a validated query into a parameterized statement
//! using sea-query.
//!
//! Ungrouped queries select rows from the base table directly. Grouped
//! queries aggregate inside a CTE and page over it from an outer query that
//! also reports the total number of groups through a window count.

use std::sync::Arc;

use sea_query::{
    Alias, Asterisk, CaseStatement, CommonTableExpression, Expr, Func, JoinType, Order,
    QueryStatementBuilder, SelectStatement, SimpleExpr, Value, WindowStatement, WithClause,
};
use tracing::{debug, trace};

use crate::ast::{CompOp, GroupToken, Literal, Number};
use crate::dialect::Dialect;
use crate::error::QueryError;
use crate::schema::FieldSchema;
use crate::validator::{check_group_by, ResolvedCondition, ResolvedField, ValidatedQuery};

/// Name of the CTE holding one row per group.
pub const GROUPED_CTE: &str = "grouped_results";
pub const SESSION_COLUMN: &str = "session_id";
pub const WORST_STATUS_COLUMN: &str = "worst_status_rank";
pub const RECORD_COUNT_COLUMN: &str = "record_count";
pub const TOTAL_COUNT_COLUMN: &str = "total_count";

/// The output of compilation, ready for an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql_text: String,
    /// Bound values in placeholder order.
    pub params: Vec<Value>,
    /// Output group columns in `group_by` order; empty for ungrouped queries.
    pub group_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DimensionSource<'q> {
    Session,
    Tag { key: &'q str },
}

/// A grouping dimension and the position it was requested at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dimension<'q> {
    index: usize,
    source: DimensionSource<'q>,
}

impl Dimension<'_> {
    /// Alias of the label-table join backing a tag dimension.
    fn join_alias(&self) -> Option<String> {
        match self.source {
            DimensionSource::Session => None,
            DimensionSource::Tag { .. } => Some(format!("label_{}", self.index)),
        }
    }

    fn output_column(&self) -> String {
        match self.source {
            DimensionSource::Session => SESSION_COLUMN.to_string(),
            DimensionSource::Tag { .. } => format!("tag_{}", self.index),
        }
    }
}

/// Grouping dimensions indexed by position. Join aliases and output columns
/// are derived from the index, so two dimensions never share a name.
#[derive(Debug)]
struct DimensionArena<'q> {
    slots: Vec<Dimension<'q>>,
}

impl<'q> DimensionArena<'q> {
    fn build(group_by: &'q [GroupToken]) -> Result<Self, QueryError> {
        check_group_by(group_by)
            .map_err(|e| QueryError::UnsupportedGroupCombination(e.to_string()))?;

        let slots = group_by
            .iter()
            .enumerate()
            .map(|(index, token)| {
                let source = match token {
                    GroupToken::Session => DimensionSource::Session,
                    GroupToken::Tag { key } if key.is_empty() => {
                        return Err(QueryError::UnsupportedGroupCombination(format!(
                            "tag dimension {index} has an empty key"
                        )))
                    }
                    GroupToken::Tag { key } => DimensionSource::Tag { key: key.as_str() },
                };
                Ok(Dimension { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { slots })
    }

    fn iter(&self) -> impl Iterator<Item = &Dimension<'q>> {
        self.slots.iter()
    }

    fn output_columns(&self) -> Vec<String> {
        self.slots.iter().map(Dimension::output_column).collect()
    }
}

fn column(table: &str, name: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(name)))
}

/// SQL compiler bound to one dialect.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    dialect: Arc<dyn Dialect>,
}

impl SqlCompiler {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Compiles a validated query. Identical inputs give identical output.
    pub fn compile(
        &self,
        query: &ValidatedQuery,
        schema: &FieldSchema,
    ) -> Result<CompiledStatement, QueryError> {
        let (sql_text, params, group_columns) = if query.group_by().is_empty() {
            let (sql, params) = self.compile_plain(query, schema)?;
            (sql, params, Vec::new())
        } else {
            self.compile_grouped(query, schema)?
        };

        debug!(
            dialect = self.dialect.name(),
            grouped = !group_columns.is_empty(),
            sql_len = sql_text.len(),
            params = params.len(),
            "compiled statement"
        );
        trace!(sql = %sql_text, "statement text");

        Ok(CompiledStatement {
            sql_text,
            params,
            group_columns,
        })
    }

    /// `SELECT base.* ... WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
    fn compile_plain(
        &self,
        query: &ValidatedQuery,
        schema: &FieldSchema,
    ) -> Result<(String, Vec<Value>), QueryError> {
        let base = schema.base_table.as_str();

        let mut select = SelectStatement::new();
        select.column((Alias::new(base), Asterisk)).from(Alias::new(base));
        self.join_related_tables(&mut select, query.filter(), schema)?;

        if let Some(filter) = query.filter() {
            select.and_where(self.compile_condition(filter));
        }

        if let Some(order) = &schema.default_order {
            let direction = if order.descending { Order::Desc } else { Order::Asc };
            select.order_by((Alias::new(base), Alias::new(order.column.as_str())), direction);
        }
        let ordered_by_key = schema
            .default_order
            .as_ref()
            .is_some_and(|o| o.column == schema.primary_key);
        if !ordered_by_key {
            select.order_by(
                (Alias::new(base), Alias::new(schema.primary_key.as_str())),
                Order::Asc,
            );
        }

        select.limit(query.limit().get()).offset(query.offset());

        let builder = self.dialect.query_builder();
        let (sql, values) = select.build_any(&*builder);
        Ok((sql, values.0))
    }

    /// Aggregates per group inside a CTE, then pages over the groups.
    fn compile_grouped(
        &self,
        query: &ValidatedQuery,
        schema: &FieldSchema,
    ) -> Result<(String, Vec<Value>, Vec<String>), QueryError> {
        if !self.dialect.supports_common_table_expressions()
            || !self.dialect.supports_window_functions()
        {
            return Err(QueryError::Compile(format!(
                "{} cannot run grouped queries",
                self.dialect.name()
            )));
        }

        let arena = DimensionArena::build(query.group_by())?;
        let base = schema.base_table.as_str();
        let labels = &schema.labels;

        let mut inner = SelectStatement::new();
        inner.from(Alias::new(base));
        self.join_related_tables(&mut inner, query.filter(), schema)?;

        for dim in arena.iter() {
            let output = Alias::new(dim.output_column());
            match (&dim.source, dim.join_alias()) {
                (DimensionSource::Session, _) => {
                    inner.expr_as(column(base, &schema.session_column), output);
                }
                (DimensionSource::Tag { key }, Some(alias)) => {
                    inner.join_as(
                        JoinType::LeftJoin,
                        Alias::new(labels.table.as_str()),
                        Alias::new(alias.as_str()),
                        column(&alias, &labels.foreign_key)
                            .equals((Alias::new(base), Alias::new(schema.primary_key.as_str())))
                            .and(column(&alias, &labels.key_column).eq(*key)),
                    );
                    inner.expr_as(column(&alias, &labels.value_column), output);
                }
                (DimensionSource::Tag { key }, None) => {
                    return Err(QueryError::UnsupportedGroupCombination(format!(
                        "tag `{key}` has no join alias"
                    )))
                }
            }
        }

        inner.expr_as(
            Func::max(self.status_rank_case(schema)),
            Alias::new(WORST_STATUS_COLUMN),
        );
        inner.expr_as(
            Func::count(column(base, &schema.primary_key)),
            Alias::new(RECORD_COUNT_COLUMN),
        );

        if let Some(filter) = query.filter() {
            inner.and_where(self.compile_condition(filter));
        }

        for dim in arena.iter() {
            match (&dim.source, dim.join_alias()) {
                (DimensionSource::Session, _) => {
                    inner.group_by_col((
                        Alias::new(base),
                        Alias::new(schema.session_column.as_str()),
                    ));
                }
                (DimensionSource::Tag { .. }, Some(alias)) => {
                    inner.group_by_col((Alias::new(alias), Alias::new(labels.value_column.as_str())));
                }
                (DimensionSource::Tag { key }, None) => {
                    return Err(QueryError::UnsupportedGroupCombination(format!(
                        "tag `{key}` has no join alias"
                    )))
                }
            }
        }

        let mut outer = SelectStatement::new();
        outer
            .column(Asterisk)
            .expr_window_as(
                Func::count(Expr::col(Asterisk)),
                WindowStatement::new(),
                Alias::new(TOTAL_COUNT_COLUMN),
            )
            .from(Alias::new(GROUPED_CTE));
        for name in arena.output_columns() {
            outer.order_by(Alias::new(name), Order::Asc);
        }
        outer.limit(query.limit().get()).offset(query.offset());

        let mut cte = CommonTableExpression::new();
        cte.query(inner).table_name(Alias::new(GROUPED_CTE));
        let mut with_clause = WithClause::new();
        with_clause.cte(cte);

        let builder = self.dialect.query_builder();
        let (sql, values) = outer.with(with_clause).build_any(&*builder);
        Ok((sql, values.0, arena.output_columns()))
    }

    /// LEFT JOINs every non-base table the filter touches, once each, in
    /// first-reference order.
    fn join_related_tables(
        &self,
        select: &mut SelectStatement,
        filter: Option<&ResolvedCondition>,
        schema: &FieldSchema,
    ) -> Result<(), QueryError> {
        let Some(filter) = filter else {
            return Ok(());
        };
        let base = schema.base_table.as_str();
        for table in filter.referenced_tables() {
            if table == base {
                continue;
            }
            let relation = schema.relations.get(table).ok_or_else(|| {
                QueryError::Compile(format!("no relation joins `{table}` to `{base}`"))
            })?;
            select.join(
                JoinType::LeftJoin,
                Alias::new(table),
                column(table, &relation.foreign_column)
                    .equals((Alias::new(base), Alias::new(relation.local_column.as_str()))),
            );
        }
        Ok(())
    }

    /// `CASE WHEN status = 'broken' THEN 5 ... ELSE 0 END`, with the status
    /// names and ranks inlined since they come from the schema.
    fn status_rank_case(&self, schema: &FieldSchema) -> CaseStatement {
        let status = &schema.status;
        status
            .severity
            .iter()
            .fold(CaseStatement::new(), |case, name| {
                case.case(
                    column(&schema.base_table, &status.column)
                        .eq(SimpleExpr::Constant(Value::from(name.as_str()))),
                    SimpleExpr::Constant(Value::BigInt(Some(schema.status_rank(name)))),
                )
            })
            .finally(SimpleExpr::Constant(Value::BigInt(Some(0))))
    }

    /// Depth-first, left to right, so parameters follow the query text.
    fn compile_condition(&self, condition: &ResolvedCondition) -> SimpleExpr {
        match condition {
            ResolvedCondition::Field(field) => compile_comparison(field),
            ResolvedCondition::And(left, right) => self
                .compile_condition(left)
                .and(self.compile_condition(right)),
            ResolvedCondition::Or(left, right) => self
                .compile_condition(left)
                .or(self.compile_condition(right)),
            ResolvedCondition::Not(inner) => self.compile_condition(inner).not(),
        }
    }
}

fn compile_comparison(field: &ResolvedField) -> SimpleExpr {
    let col = column(&field.table, &field.column);
    let val = literal_to_value(&field.value);

    match field.op {
        CompOp::Eq => col.eq(val),
        CompOp::NotEq => col.ne(val),
        CompOp::Gt => col.gt(val),
        CompOp::Lt => col.lt(val),
        CompOp::Gte => col.gte(val),
        CompOp::Lte => col.lte(val),
    }
}

fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(Some(Box::new(s.clone()))),
        Literal::Number(Number::Int(n)) => Value::BigInt(Some(*n)),
        Literal::Number(Number::Float(n)) => Value::Double(Some(*n)),
    }
}
