//! HiveQL text for a lowered query tree.

use std::collections::HashMap;

use log::trace;
use sqlformat::{FormatOptions, Indent, QueryParams};

use super::ast::{
    AggregateExpression, Expr, ExprRef, JoinExpression, OrderExpression, SelectExpression,
    SubqueryExpression, TableAlias, TableExpression,
};
use super::errors::QueryAstError;
use super::walker::{walk_join, walk_select, Visitor};
use crate::models::enums::{OrderType, UnaryOp};
use crate::models::structs::Value;

pub mod dialect;
use dialect::SqlDialect;

/// Renders `tree` (a select) as a single HiveQL statement.
pub fn emit_hiveql(tree: &ExprRef, dialect: &dyn SqlDialect) -> Result<String, QueryAstError> {
    let Some(select) = tree.as_select() else {
        return Err(QueryAstError::Emit(format!(
            "top level must be a select, found {}",
            tree.kind_name()
        )));
    };
    let names = SourceNamer::name(tree);
    let emitter = HiveEmitter { dialect, names };
    let sql = emitter.emit_select(select)?;
    trace!("emitted {}", sql);
    Ok(sql)
}

pub fn default_sqlformat_options() -> FormatOptions<'static> {
    FormatOptions {
        joins_as_top_level: true,
        indent: Indent::Spaces(6),
        uppercase: Some(true),
        lines_between_queries: 2,
        inline: false,
        max_inline_block: 50,
        max_inline_arguments: Some(40),
        max_inline_top_level: Some(40),
        ..Default::default()
    }
}

/// Multi-line layout of emitted text.
pub fn pretty(sql: &str) -> String {
    sqlformat::format(sql, &QueryParams::None, &default_sqlformat_options())
}

/// Assigns `t0, t1, ...` to row sources in the order they are declared.
#[derive(Default)]
struct SourceNamer {
    names: HashMap<TableAlias, String>,
}

impl SourceNamer {
    fn name(tree: &ExprRef) -> HashMap<TableAlias, String> {
        let mut namer = SourceNamer::default();
        namer.visit(tree);
        namer.names
    }

    fn declare(&mut self, source: &ExprRef) {
        if let Some(alias) = source.declared_alias() {
            let next = format!("t{}", self.names.len());
            self.names.entry(alias).or_insert(next);
        }
    }
}

impl Visitor for SourceNamer {
    fn visit_select(&mut self, select: &SelectExpression) {
        if let Some(from) = &select.from {
            self.declare(from);
        }
        walk_select(self, select);
    }

    fn visit_join(&mut self, join: &JoinExpression) {
        self.declare(&join.left);
        self.declare(&join.right);
        walk_join(self, join);
    }

    fn visit_table(&mut self, table: &TableExpression) {
        let next = format!("t{}", self.names.len());
        self.names.entry(table.alias).or_insert(next);
    }
}

struct HiveEmitter<'a> {
    dialect: &'a dyn SqlDialect,
    names: HashMap<TableAlias, String>,
}

impl HiveEmitter<'_> {
    fn alias(&self, alias: TableAlias) -> Result<&str, QueryAstError> {
        self.names
            .get(&alias)
            .map(String::as_str)
            .ok_or_else(|| QueryAstError::Emit(format!("alias {} is never declared", alias)))
    }

    fn emit_select(&self, select: &SelectExpression) -> Result<String, QueryAstError> {
        if select.skip.is_some() {
            return Err(QueryAstError::Unsupported(
                "SKIP has no HiveQL spelling; lower it first",
            ));
        }

        let columns = if select.columns.is_empty() {
            "1".to_string()
        } else {
            select
                .columns
                .iter()
                .map(|decl| {
                    let expr = self.emit_expr(&decl.expression)?;
                    Ok(match &*decl.expression {
                        Expr::Column(column) if column.name == decl.name => expr,
                        _ => format!("{} AS {}", expr, self.dialect.quote_ident(&decl.name)),
                    })
                })
                .collect::<Result<Vec<_>, QueryAstError>>()?
                .join(", ")
        };
        let mut sql = if select.is_distinct {
            format!("SELECT DISTINCT {}", columns)
        } else {
            format!("SELECT {}", columns)
        };

        if let Some(from) = &select.from {
            sql.push_str(&format!(" FROM {}", self.emit_source(from)?));
        }
        if let Some(where_clause) = &select.where_clause {
            sql.push_str(&format!(" WHERE {}", self.emit_expr(where_clause)?));
        }
        if !select.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.emit_list(&select.group_by)?));
        }
        if !select.cluster_by.is_empty() {
            sql.push_str(&format!(" CLUSTER BY {}", self.emit_list(&select.cluster_by)?));
        }

        if select.is_reverse && select.order_by.is_empty() {
            return Err(QueryAstError::Unsupported(
                "reversing a select needs an ORDER BY",
            ));
        }
        if !select.order_by.is_empty() {
            let order_by: Vec<OrderExpression> = if select.is_reverse {
                select.order_by.iter().map(OrderExpression::inverted).collect()
            } else {
                select.order_by.clone()
            };
            sql.push_str(&format!(" ORDER BY {}", self.emit_orderings(&order_by)?));
        }

        if let Some(take) = &select.take {
            let limit = match &**take {
                Expr::Constant(value) => value.as_i64(),
                _ => None,
            };
            let Some(limit) = limit else {
                return Err(QueryAstError::Unsupported(
                    "LIMIT must be a constant integer",
                ));
            };
            sql.push_str(&self.dialect.emit_limit(limit.max(0) as u64));
        }
        Ok(sql)
    }

    fn emit_source(&self, source: &ExprRef) -> Result<String, QueryAstError> {
        match &**source {
            Expr::Table(table) => {
                let name = table
                    .name
                    .split('.')
                    .map(|part| self.dialect.quote_ident(part))
                    .collect::<Vec<_>>()
                    .join(".");
                Ok(format!("{} {}", name, self.alias(table.alias)?))
            }
            Expr::Select(select) => Ok(format!(
                "({}) {}",
                self.emit_select(select)?,
                self.alias(select.alias)?
            )),
            Expr::Join(join) => {
                let keyword = self.dialect.emit_join_kind(join.kind)?;
                let mut sql = format!(
                    "{} {} {}",
                    self.emit_source(&join.left)?,
                    keyword,
                    self.emit_source(&join.right)?
                );
                if let Some(condition) = &join.condition {
                    sql.push_str(&format!(" ON {}", self.emit_expr(condition)?));
                }
                Ok(sql)
            }
            other => Err(QueryAstError::Emit(format!(
                "{} cannot be used as a row source",
                other.kind_name()
            ))),
        }
    }

    fn emit_list(&self, exprs: &[ExprRef]) -> Result<String, QueryAstError> {
        Ok(exprs
            .iter()
            .map(|e| self.emit_expr(e))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "))
    }

    fn emit_orderings(&self, order_by: &[OrderExpression]) -> Result<String, QueryAstError> {
        Ok(order_by
            .iter()
            .map(|order| {
                let expr = self.emit_expr(&order.expression)?;
                Ok(match order.order_type {
                    OrderType::Ascending => expr,
                    OrderType::Descending => format!("{} DESC", expr),
                })
            })
            .collect::<Result<Vec<_>, QueryAstError>>()?
            .join(", "))
    }

    fn emit_value(&self, value: &Value) -> String {
        match value {
            Value::Null => self.dialect.emit_null(),
            Value::Boolean(b) => self.dialect.emit_boolean(*b),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format!("{:?}", d),
            Value::Decimal(d) => format!("{}BD", d),
            Value::String(s) => self.dialect.quote_string(s),
            Value::Timestamp(ts) => format!("TIMESTAMP {}", self.dialect.quote_string(&ts.to_string())),
        }
    }

    fn emit_aggregate(&self, aggregate: &AggregateExpression) -> Result<String, QueryAstError> {
        let argument = match &aggregate.argument {
            Some(argument) => self.emit_expr(argument)?,
            None => "*".to_string(),
        };
        let distinct = if aggregate.is_distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({}{})", aggregate.kind.sql_name(), distinct, argument))
    }

    fn emit_expr(&self, expr: &ExprRef) -> Result<String, QueryAstError> {
        Ok(match &**expr {
            Expr::Constant(value) => self.emit_value(value),
            Expr::NamedValue(value) => self.dialect.emit_parameter(&value.name),
            Expr::Binary { op, left, right } => format!(
                "({} {} {})",
                self.emit_expr(left)?,
                op.sql_operator(),
                self.emit_expr(right)?
            ),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => format!("(NOT {})", self.emit_expr(operand)?),
                UnaryOp::Negate => format!("(-{})", self.emit_expr(operand)?),
            },
            Expr::Between {
                expression,
                lower,
                upper,
            } => format!(
                "({} BETWEEN {} AND {})",
                self.emit_expr(expression)?,
                self.emit_expr(lower)?,
                self.emit_expr(upper)?
            ),
            Expr::IsNull(operand) => format!("({} IS NULL)", self.emit_expr(operand)?),
            Expr::Column(column) => format!(
                "{}.{}",
                self.alias(column.alias)?,
                self.dialect.quote_ident(&column.name)
            ),
            // columns of an unmatched outer row are already NULL
            Expr::OuterJoined { expression, .. } => self.emit_expr(expression)?,
            Expr::Select(select) => format!("({})", self.emit_select(select)?),
            Expr::Subquery(subquery) => match subquery {
                SubqueryExpression::Scalar { select, .. } => self.emit_expr(select)?,
                SubqueryExpression::Exists { select } => {
                    format!("EXISTS {}", self.emit_expr(select)?)
                }
                SubqueryExpression::In { expression, select } => format!(
                    "({} IN {})",
                    self.emit_expr(expression)?,
                    self.emit_expr(select)?
                ),
            },
            Expr::Aggregate(aggregate) => self.emit_aggregate(aggregate)?,
            Expr::RowNumber(order_by) => {
                if !self.dialect.supports_window_functions() {
                    return Err(QueryAstError::Unsupported(
                        "ROW_NUMBER() needs a windowing dialect",
                    ));
                }
                format!("ROW_NUMBER() OVER (ORDER BY {})", self.emit_orderings(order_by)?)
            }
            Expr::Member { .. } => {
                return Err(QueryAstError::Unsupported(
                    "member access must be bound before emission",
                ));
            }
            Expr::Record(_) | Expr::Entity(_) | Expr::Projection(_) => {
                return Err(QueryAstError::Unsupported(
                    "host-side shapes have no HiveQL spelling",
                ));
            }
            Expr::Table(_) | Expr::Join(_) => {
                return Err(QueryAstError::Emit(format!(
                    "{} used as a scalar",
                    expr.kind_name()
                )));
            }
        })
    }
}
