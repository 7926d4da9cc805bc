//! Reference evaluator over in-memory tables.
//!
//! Follows Hive's row semantics closely enough to compare a tree before and after a rewrite:
//! three-valued predicates, NULL-extended outer rows, first-seen group order and stable sorts with
//! NULL first.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::models::enums::{AggregateKind, BinaryOp, JoinKind, OrderType};
use crate::models::structs::Value;
use crate::query_ast::ast::{
    AggregateExpression, ColumnExpression, Expr, ExprRef, JoinExpression, OrderExpression,
    SelectExpression, SubqueryExpression, TableAlias,
};
use crate::query_ast::errors::QueryAstError;
use crate::query_ast::executor::{QueryExecutor, QueryResult};
use crate::query_ast::rewrite::aggregate_checker::AggregateChecker;
use crate::query_ast::rewrite::referenced_columns::DeclaredAliasGatherer;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

/// Named tables a [`MemoryExecutor`] reads from.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: HashMap<String, MemoryTable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.insert(name, MemoryTable::new(columns, rows));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, table: MemoryTable) {
        self.tables.insert(name.into(), table);
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }
}

pub struct MemoryExecutor {
    dataset: Dataset,
}

impl MemoryExecutor {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }
}

impl QueryExecutor for MemoryExecutor {
    fn execute(
        &self,
        tree: &ExprRef,
        parameters: &HashMap<String, Value>,
    ) -> Result<QueryResult, QueryAstError> {
        let select = match &**tree {
            Expr::Select(select) => select,
            Expr::Projection(projection) => projection.select().ok_or_else(|| {
                QueryAstError::Execution("projection does not wrap a select".into())
            })?,
            other => {
                return Err(QueryAstError::Execution(format!(
                    "cannot execute {}",
                    other.kind_name()
                )));
            }
        };
        let run = Run {
            dataset: &self.dataset,
            parameters,
        };
        let result = run.select(select, &Scope::root())?;
        debug!("memory executor produced {} row(s)", result.1.len());
        Ok(result)
    }
}

/// One source's contribution to a row. `values == None` is the NULL extension of an unmatched outer
/// join.
#[derive(Debug, Clone)]
struct Binding {
    alias: TableAlias,
    columns: Arc<Vec<String>>,
    values: Option<Arc<Vec<Value>>>,
}

impl Binding {
    fn null(alias: TableAlias) -> Self {
        Binding {
            alias,
            columns: Arc::new(Vec::new()),
            values: None,
        }
    }
}

type Row = Vec<Binding>;

/// Current row plus the rows of every enclosing select, for correlated references.
struct Scope<'a> {
    row: &'a [Binding],
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn root() -> Scope<'static> {
        Scope {
            row: &[],
            parent: None,
        }
    }

    fn child<'b>(&'b self, row: &'b [Binding]) -> Scope<'b> {
        Scope {
            row,
            parent: Some(self),
        }
    }

    fn lookup(&self, column: &ColumnExpression) -> Option<Value> {
        if let Some(binding) = self.row.iter().find(|b| b.alias == column.alias) {
            return match &binding.values {
                None => Some(Value::Null),
                Some(values) => binding
                    .columns
                    .iter()
                    .position(|c| *c == column.name)
                    .and_then(|i| values.get(i).cloned()),
            };
        }
        self.parent.and_then(|parent| parent.lookup(column))
    }
}

fn null_row(source: Option<&ExprRef>) -> Row {
    source
        .map(DeclaredAliasGatherer::gather)
        .unwrap_or_default()
        .into_iter()
        .map(Binding::null)
        .collect()
}

fn compare_keys(order_by: &[OrderExpression], a: &[Value], b: &[Value]) -> Ordering {
    for (order, (x, y)) in order_by.iter().zip(a.iter().zip(b.iter())) {
        let ord = match order.order_type {
            OrderType::Ascending => x.sort_cmp(y),
            OrderType::Descending => y.sort_cmp(x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn same_row(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_group(y))
}

struct Run<'a> {
    dataset: &'a Dataset,
    parameters: &'a HashMap<String, Value>,
}

impl Run<'_> {
    fn source(&self, source: &ExprRef, scope: &Scope<'_>) -> Result<Vec<Row>, QueryAstError> {
        match &**source {
            Expr::Table(table) => {
                let data = self.dataset.table(&table.name).ok_or_else(|| {
                    QueryAstError::Execution(format!("unknown table '{}'", table.name))
                })?;
                let columns = Arc::new(data.columns.clone());
                Ok(data
                    .rows
                    .iter()
                    .map(|values| {
                        vec![Binding {
                            alias: table.alias,
                            columns: columns.clone(),
                            values: Some(Arc::new(values.clone())),
                        }]
                    })
                    .collect())
            }
            Expr::Select(select) => {
                let (headers, rows) = self.select(select, scope)?;
                let columns = Arc::new(headers);
                Ok(rows
                    .into_iter()
                    .map(|values| {
                        vec![Binding {
                            alias: select.alias,
                            columns: columns.clone(),
                            values: Some(Arc::new(values)),
                        }]
                    })
                    .collect())
            }
            Expr::Join(join) => self.join(join, scope),
            other => Err(QueryAstError::Execution(format!(
                "{} is not a row source",
                other.kind_name()
            ))),
        }
    }

    fn join(&self, join: &JoinExpression, scope: &Scope<'_>) -> Result<Vec<Row>, QueryAstError> {
        let left_rows = self.source(&join.left, scope)?;
        let shared_right = if join.kind.is_apply() {
            None
        } else {
            Some(self.source(&join.right, scope)?)
        };
        let keep_unmatched = matches!(join.kind, JoinKind::LeftOuter | JoinKind::OuterApply);
        let null_right = null_row(Some(&join.right));

        let mut out = Vec::new();
        for left in &left_rows {
            let applied;
            let right_rows = match &shared_right {
                Some(rows) => rows,
                None => {
                    applied = self.source(&join.right, &scope.child(left))?;
                    &applied
                }
            };
            let mut matched = false;
            for right in right_rows {
                let combined: Row = left.iter().chain(right.iter()).cloned().collect();
                let keep = match &join.condition {
                    Some(condition) => {
                        self.eval(condition, &scope.child(&combined), None)?.truth() == Some(true)
                    }
                    None => true,
                };
                if keep {
                    matched = true;
                    out.push(combined);
                }
            }
            if !matched && keep_unmatched {
                out.push(left.iter().chain(null_right.iter()).cloned().collect());
            }
        }
        trace!("{:?} join produced {} row(s)", join.kind, out.len());
        Ok(out)
    }

    fn select(&self, select: &SelectExpression, scope: &Scope<'_>) -> Result<QueryResult, QueryAstError> {
        let mut rows = match &select.from {
            Some(from) => self.source(from, scope)?,
            None => vec![Vec::new()],
        };
        if let Some(predicate) = &select.where_clause {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if self.eval(predicate, &scope.child(&row), None)?.truth() == Some(true) {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        // (column values, order keys) per output row
        let mut produced: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        if !select.group_by.is_empty() || AggregateChecker::has_aggregates(select) {
            let empty = null_row(select.from.as_ref());
            for group in self.group(select, rows, scope)? {
                let representative = group.first().unwrap_or(&empty);
                let inner = scope.child(representative);
                produced.push(self.project(select, &inner, Some(group.as_slice()), None)?);
            }
        } else {
            let numbers = self.row_numbers(select, &rows, scope)?;
            for (index, row) in rows.iter().enumerate() {
                let inner = scope.child(row);
                produced.push(self.project(select, &inner, None, Some((numbers.as_slice(), index)))?);
            }
        }

        if select.is_distinct {
            let mut unique: Vec<(Vec<Value>, Vec<Value>)> = Vec::with_capacity(produced.len());
            for row in produced {
                if !unique.iter().any(|(values, _)| same_row(values, &row.0)) {
                    unique.push(row);
                }
            }
            produced = unique;
        }
        if !select.order_by.is_empty() {
            produced.sort_by(|a, b| compare_keys(&select.order_by, &a.1, &b.1));
        }
        if select.is_reverse {
            produced.reverse();
        }

        let skip = self.count(select.skip.as_ref(), scope)?.unwrap_or(0);
        let take = self.count(select.take.as_ref(), scope)?;
        let window = produced.into_iter().map(|(values, _)| values).skip(skip);
        let rows = match take {
            Some(take) => window.take(take).collect(),
            None => window.collect(),
        };
        let headers = select.columns.iter().map(|c| c.name.clone()).collect();
        Ok((headers, rows))
    }

    fn group(
        &self,
        select: &SelectExpression,
        rows: Vec<Row>,
        scope: &Scope<'_>,
    ) -> Result<Vec<Vec<Row>>, QueryAstError> {
        if select.group_by.is_empty() {
            return Ok(vec![rows]);
        }
        let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
        for row in rows {
            let key = select
                .group_by
                .iter()
                .map(|e| self.eval(e, &scope.child(&row), None))
                .collect::<Result<Vec<_>, _>>()?;
            match groups.iter_mut().find(|(existing, _)| same_row(existing, &key)) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        Ok(groups.into_iter().map(|(_, members)| members).collect())
    }

    /// Numbers for every `ROW_NUMBER()` column, indexed by column then by row.
    fn row_numbers(
        &self,
        select: &SelectExpression,
        rows: &[Row],
        scope: &Scope<'_>,
    ) -> Result<Vec<Option<Vec<i64>>>, QueryAstError> {
        select
            .columns
            .iter()
            .map(|decl| {
                let Expr::RowNumber(order_by) = &*decl.expression else {
                    return Ok(None);
                };
                let keys = rows
                    .iter()
                    .map(|row| self.sort_keys(order_by, &scope.child(row), None))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut indices: Vec<usize> = (0..rows.len()).collect();
                indices.sort_by(|&a, &b| compare_keys(order_by, &keys[a], &keys[b]));
                let mut numbers = vec![0; rows.len()];
                for (rank, index) in indices.into_iter().enumerate() {
                    numbers[index] = rank as i64 + 1;
                }
                Ok(Some(numbers))
            })
            .collect()
    }

    fn project(
        &self,
        select: &SelectExpression,
        scope: &Scope<'_>,
        group: Option<&[Row]>,
        numbers: Option<(&[Option<Vec<i64>>], usize)>,
    ) -> Result<(Vec<Value>, Vec<Value>), QueryAstError> {
        let mut values = Vec::with_capacity(select.columns.len());
        for (position, decl) in select.columns.iter().enumerate() {
            let number = numbers.and_then(|(numbers, row)| {
                numbers
                    .get(position)
                    .and_then(|column| column.as_ref())
                    .and_then(|column| column.get(row).copied())
            });
            values.push(match number {
                Some(number) => Value::Int(number),
                None => self.eval(&decl.expression, scope, group)?,
            });
        }
        let keys = self.sort_keys(&select.order_by, scope, group)?;
        Ok((values, keys))
    }

    fn sort_keys(
        &self,
        order_by: &[OrderExpression],
        scope: &Scope<'_>,
        group: Option<&[Row]>,
    ) -> Result<Vec<Value>, QueryAstError> {
        order_by
            .iter()
            .map(|order| self.eval(&order.expression, scope, group))
            .collect()
    }

    /// SKIP/TAKE amount; negative counts as zero.
    fn count(&self, expr: Option<&ExprRef>, scope: &Scope<'_>) -> Result<Option<usize>, QueryAstError> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let value = self.eval(expr, scope, None)?;
        let n = value.as_i64().ok_or_else(|| {
            QueryAstError::Execution(format!("row count must be an integer, got {}", value))
        })?;
        Ok(Some(n.max(0) as usize))
    }

    fn first_value(&self, select: &ExprRef, scope: &Scope<'_>) -> Result<Vec<Value>, QueryAstError> {
        let Some(select) = select.as_select() else {
            return Err(QueryAstError::Execution("subquery does not wrap a select".into()));
        };
        let (_, rows) = self.select(select, scope)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or(Value::Null))
            .collect())
    }

    fn subquery(
        &self,
        subquery: &SubqueryExpression,
        scope: &Scope<'_>,
        group: Option<&[Row]>,
    ) -> Result<Value, QueryAstError> {
        match subquery {
            SubqueryExpression::Scalar { select, .. } => Ok(self
                .first_value(select, scope)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null)),
            SubqueryExpression::Exists { select } => {
                Ok(Value::Boolean(!self.first_value(select, scope)?.is_empty()))
            }
            SubqueryExpression::In { expression, select } => {
                let needle = self.eval(expression, scope, group)?;
                if needle.is_null() {
                    return Ok(Value::Null);
                }
                let candidates = self.first_value(select, scope)?;
                if candidates.iter().any(|c| needle.compare(c) == Some(Ordering::Equal)) {
                    Ok(Value::Boolean(true))
                } else if candidates.iter().any(Value::is_null) {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Boolean(false))
                }
            }
        }
    }

    fn aggregate(
        &self,
        aggregate: &AggregateExpression,
        scope: &Scope<'_>,
        rows: &[Row],
    ) -> Result<Value, QueryAstError> {
        let Some(argument) = &aggregate.argument else {
            return match aggregate.kind {
                AggregateKind::Count => Ok(Value::Int(rows.len() as i64)),
                kind => Err(QueryAstError::Execution(format!(
                    "{} needs an argument",
                    kind.sql_name()
                ))),
            };
        };

        let mut values: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            let inner = Scope {
                row: row.as_slice(),
                parent: scope.parent,
            };
            let value = self.eval(argument, &inner, None)?;
            if value.is_null() {
                continue;
            }
            if aggregate.is_distinct && values.iter().any(|v| v.same_group(&value)) {
                continue;
            }
            values.push(value);
        }

        let sum = |values: &[Value]| -> Result<Value, QueryAstError> {
            let mut iter = values.iter();
            let Some(first) = iter.next() else {
                return Ok(Value::Null);
            };
            let mut total = first.clone();
            for value in iter {
                total = Value::apply_binary(BinaryOp::Add, &total, value)?;
            }
            Ok(total)
        };
        let pick = |wanted: Ordering| {
            values.iter().fold(None::<&Value>, |best, v| match best {
                Some(b) if v.compare(b) != Some(wanted) => Some(b),
                _ => Some(v),
            })
        };

        Ok(match aggregate.kind {
            AggregateKind::Count => Value::Int(values.len() as i64),
            AggregateKind::Sum => sum(&values)?,
            AggregateKind::Min => pick(Ordering::Less).cloned().unwrap_or(Value::Null),
            AggregateKind::Max => pick(Ordering::Greater).cloned().unwrap_or(Value::Null),
            AggregateKind::Average => {
                let total = sum(&values)?;
                Value::apply_binary(BinaryOp::Divide, &total, &Value::Int(values.len() as i64))?
            }
        })
    }

    fn eval(
        &self,
        expr: &ExprRef,
        scope: &Scope<'_>,
        group: Option<&[Row]>,
    ) -> Result<Value, QueryAstError> {
        match &**expr {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::NamedValue(named) => self.parameters.get(&named.name).cloned().ok_or_else(|| {
                QueryAstError::Execution(format!("no value bound for parameter '{}'", named.name))
            }),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope, group)?;
                let right = self.eval(right, scope, group)?;
                Ok(Value::apply_binary(*op, &left, &right)?)
            }
            Expr::Unary { op, operand } => {
                Ok(Value::apply_unary(*op, &self.eval(operand, scope, group)?)?)
            }
            Expr::Between {
                expression,
                lower,
                upper,
            } => {
                let value = self.eval(expression, scope, group)?;
                let lower = self.eval(lower, scope, group)?;
                let upper = self.eval(upper, scope, group)?;
                let above = Value::apply_binary(BinaryOp::GreaterThanOrEqual, &value, &lower)?;
                let below = Value::apply_binary(BinaryOp::LessThanOrEqual, &value, &upper)?;
                Ok(Value::apply_binary(BinaryOp::And, &above, &below)?)
            }
            Expr::IsNull(operand) => Ok(Value::Boolean(self.eval(operand, scope, group)?.is_null())),
            Expr::Column(column) => scope.lookup(column).ok_or_else(|| {
                QueryAstError::Execution(format!(
                    "column {}.{} is not bound",
                    column.alias, column.name
                ))
            }),
            Expr::OuterJoined { expression, .. } => self.eval(expression, scope, group),
            Expr::Select(_) => Ok(self
                .first_value(expr, scope)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null)),
            Expr::Subquery(subquery) => self.subquery(subquery, scope, group),
            Expr::Aggregate(aggregate) => match group {
                Some(rows) => self.aggregate(aggregate, scope, rows),
                None => Err(QueryAstError::Execution(
                    "aggregate outside of a grouped select".into(),
                )),
            },
            Expr::RowNumber(_) => Err(QueryAstError::Unsupported(
                "ROW_NUMBER() is only evaluated as a select column",
            )),
            other => Err(QueryAstError::Execution(format!(
                "{} cannot be evaluated as a scalar",
                other.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScalarType;
    use crate::models::structs::ColumnType;
    use crate::query_ast::ast::{AliasArena, ColumnDeclaration};

    fn int() -> ColumnType {
        ColumnType::new("BIGINT", ScalarType::Int64)
    }

    fn col(alias: TableAlias, name: &str) -> ExprRef {
        ColumnExpression::new(ScalarType::Int64, int(), alias, name).into_expr()
    }

    fn dataset() -> Dataset {
        Dataset::new()
            .with_table(
                "orders",
                &["id", "customer", "amount"],
                vec![
                    vec![1.into(), 10.into(), 5.into()],
                    vec![2.into(), 10.into(), 7.into()],
                    vec![3.into(), 20.into(), 1.into()],
                ],
            )
            .with_table(
                "customers",
                &["id"],
                vec![vec![10.into()], vec![20.into()], vec![30.into()]],
            )
    }

    fn run(tree: &ExprRef) -> Vec<Vec<Value>> {
        MemoryExecutor::new(dataset())
            .execute(tree, &HashMap::new())
            .unwrap()
            .1
    }

    #[test]
    fn filter_order_and_window() {
        let mut arena = AliasArena::new();
        let o = arena.fresh();
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("id", col(o, "id"), int())],
            Some(Expr::table(o, "orders")),
            Some(Expr::binary(BinaryOp::GreaterThan, col(o, "amount"), Expr::constant(2))),
        )
        .set_order_by(vec![OrderExpression::desc(col(o, "id"))])
        .set_take(Some(Expr::constant(1)))
        .into_expr();
        assert_eq!(run(&tree), vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn outer_join_extends_with_nulls() {
        let mut arena = AliasArena::new();
        let (c, o) = (arena.fresh(), arena.fresh());
        let from = Expr::join(
            JoinKind::LeftOuter,
            Expr::table(c, "customers"),
            Expr::table(o, "orders"),
            Some(Expr::eq(col(c, "id"), col(o, "customer"))),
        );
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![
                ColumnDeclaration::new("customer", col(c, "id"), int()),
                ColumnDeclaration::new("order", col(o, "id"), int()),
            ],
            Some(from),
            None,
        )
        .into_expr();
        let rows = run(&tree);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], vec![Value::Int(30), Value::Null]);
    }

    #[test]
    fn grouping_keeps_first_seen_order() {
        let mut arena = AliasArena::new();
        let o = arena.fresh();
        let total = Expr::aggregate(AggregateKind::Sum, Some(col(o, "amount")), ScalarType::Int64);
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![
                ColumnDeclaration::new("customer", col(o, "customer"), int()),
                ColumnDeclaration::new("total", total, int()),
            ],
            Some(Expr::table(o, "orders")),
            None,
        )
        .set_group_by(vec![col(o, "customer")])
        .into_expr();
        assert_eq!(
            run(&tree),
            vec![
                vec![Value::Int(10), Value::Int(12)],
                vec![Value::Int(20), Value::Int(1)],
            ]
        );
    }

    #[test]
    fn count_over_empty_input_is_zero() {
        let mut arena = AliasArena::new();
        let o = arena.fresh();
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new(
                "c",
                Expr::aggregate(AggregateKind::Count, None, ScalarType::Int64),
                int(),
            )],
            Some(Expr::table(o, "orders")),
            Some(Expr::constant(false)),
        )
        .into_expr();
        assert_eq!(run(&tree), vec![vec![Value::Int(0)]]);
    }

    #[test]
    fn row_numbers_follow_their_ordering() {
        let mut arena = AliasArena::new();
        let o = arena.fresh();
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![
                ColumnDeclaration::new("id", col(o, "id"), int()),
                ColumnDeclaration::new(
                    "rn",
                    Arc::new(Expr::RowNumber(vec![OrderExpression::desc(col(o, "amount"))])),
                    int(),
                ),
            ],
            Some(Expr::table(o, "orders")),
            None,
        )
        .into_expr();
        let rows = run(&tree);
        assert_eq!(rows[0], vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(rows[2], vec![Value::Int(3), Value::Int(3)]);
    }

    #[test]
    fn unbound_parameter_fails() {
        let mut arena = AliasArena::new();
        let o = arena.fresh();
        let tree = SelectExpression::new(
            arena.fresh(),
            Vec::new(),
            Some(Expr::table(o, "orders")),
            Some(Expr::eq(col(o, "id"), Expr::named_value("id", ScalarType::Int64))),
        )
        .into_expr();
        let err = MemoryExecutor::new(dataset())
            .execute(&tree, &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("'id'"));

        let mut params = HashMap::new();
        params.insert("id".to_string(), Value::Int(3));
        let (_, rows) = MemoryExecutor::new(dataset()).execute(&tree, &params).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
