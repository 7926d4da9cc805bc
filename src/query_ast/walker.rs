//! Generic traversal over the query tree.
//!
//! [`Visitor`] observes, [`Rewriter`] rebuilds. Both dispatch exhaustively over [`Expr`]; passes override
//! only the hooks they care about. Select children are always walked in the order
//! from, where, order by, group by, cluster by, skip, take, columns.
//!
//! A rewrite hands back the same `Arc` when none of a node's children changed, so callers may use
//! [`Arc::ptr_eq`] as a cheap "nothing happened" test.

use std::convert::Infallible;
use std::sync::Arc;

use super::ast::{
    AggregateExpression, ColumnDeclaration, ColumnExpression, EntityExpression, Expr, ExprRef,
    JoinExpression, NamedValueExpression, OrderExpression, ProjectionExpression, SelectExpression,
    SubqueryExpression, TableExpression,
};

pub trait Visitor {
    fn visit(&mut self, expr: &ExprRef) {
        walk(self, expr);
    }

    fn visit_select(&mut self, select: &SelectExpression) {
        walk_select(self, select);
    }

    fn visit_join(&mut self, join: &JoinExpression) {
        walk_join(self, join);
    }

    fn visit_subquery(&mut self, subquery: &SubqueryExpression) {
        walk_subquery(self, subquery);
    }

    fn visit_aggregate(&mut self, aggregate: &AggregateExpression) {
        if let Some(argument) = &aggregate.argument {
            self.visit(argument);
        }
    }

    fn visit_projection(&mut self, projection: &ProjectionExpression) {
        self.visit(&projection.select);
        self.visit(&projection.projector);
    }

    fn visit_column(&mut self, _column: &ColumnExpression) {}

    fn visit_table(&mut self, _table: &TableExpression) {}

    fn visit_named_value(&mut self, _value: &NamedValueExpression) {}
}

pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, expr: &ExprRef) {
    match &**expr {
        Expr::Constant(_) => {}
        Expr::NamedValue(value) => visitor.visit_named_value(value),
        Expr::Binary { left, right, .. } => {
            visitor.visit(left);
            visitor.visit(right);
        }
        Expr::Unary { operand, .. } => visitor.visit(operand),
        Expr::Between {
            expression,
            lower,
            upper,
        } => {
            visitor.visit(expression);
            visitor.visit(lower);
            visitor.visit(upper);
        }
        Expr::IsNull(operand) => visitor.visit(operand),
        Expr::Member { source, .. } => visitor.visit(source),
        Expr::Record(fields) => {
            for (_, field) in fields {
                visitor.visit(field);
            }
        }
        Expr::Entity(entity) => visitor.visit(&entity.expression),
        Expr::OuterJoined { test, expression } => {
            visitor.visit(test);
            visitor.visit(expression);
        }
        Expr::Table(table) => visitor.visit_table(table),
        Expr::Column(column) => visitor.visit_column(column),
        Expr::Select(select) => visitor.visit_select(select),
        Expr::Join(join) => visitor.visit_join(join),
        Expr::Subquery(subquery) => visitor.visit_subquery(subquery),
        Expr::Aggregate(aggregate) => visitor.visit_aggregate(aggregate),
        Expr::RowNumber(order_by) => {
            for order in order_by {
                visitor.visit(&order.expression);
            }
        }
        Expr::Projection(projection) => visitor.visit_projection(projection),
    }
}

pub fn walk_select<V: Visitor + ?Sized>(visitor: &mut V, select: &SelectExpression) {
    if let Some(from) = &select.from {
        visitor.visit(from);
    }
    if let Some(where_clause) = &select.where_clause {
        visitor.visit(where_clause);
    }
    for order in &select.order_by {
        visitor.visit(&order.expression);
    }
    for expr in select.group_by.iter().chain(select.cluster_by.iter()) {
        visitor.visit(expr);
    }
    if let Some(skip) = &select.skip {
        visitor.visit(skip);
    }
    if let Some(take) = &select.take {
        visitor.visit(take);
    }
    for column in &select.columns {
        visitor.visit(&column.expression);
    }
}

pub fn walk_join<V: Visitor + ?Sized>(visitor: &mut V, join: &JoinExpression) {
    visitor.visit(&join.left);
    visitor.visit(&join.right);
    if let Some(condition) = &join.condition {
        visitor.visit(condition);
    }
}

pub fn walk_subquery<V: Visitor + ?Sized>(visitor: &mut V, subquery: &SubqueryExpression) {
    if let SubqueryExpression::In { expression, .. } = subquery {
        visitor.visit(expression);
    }
    visitor.visit(subquery.select());
}

pub trait Rewriter {
    type Error;

    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef, Self::Error> {
        dispatch(self, expr)
    }

    fn rewrite_select(
        &mut self,
        expr: &ExprRef,
        select: &SelectExpression,
    ) -> Result<ExprRef, Self::Error> {
        rewrite_select_children(self, expr, select)
    }

    fn rewrite_join(
        &mut self,
        expr: &ExprRef,
        join: &JoinExpression,
    ) -> Result<ExprRef, Self::Error> {
        rewrite_join_children(self, expr, join)
    }

    fn rewrite_subquery(
        &mut self,
        expr: &ExprRef,
        subquery: &SubqueryExpression,
    ) -> Result<ExprRef, Self::Error> {
        rewrite_subquery_children(self, expr, subquery)
    }

    fn rewrite_member(
        &mut self,
        expr: &ExprRef,
        source: &ExprRef,
        member: &str,
    ) -> Result<ExprRef, Self::Error> {
        let new_source = self.rewrite(source)?;
        if Arc::ptr_eq(&new_source, source) {
            Ok(expr.clone())
        } else {
            Ok(Expr::member(new_source, member))
        }
    }

    fn rewrite_aggregate(
        &mut self,
        expr: &ExprRef,
        aggregate: &AggregateExpression,
    ) -> Result<ExprRef, Self::Error> {
        let argument = rewrite_opt(self, &aggregate.argument)?;
        if same_opt(&argument, &aggregate.argument) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Aggregate(AggregateExpression {
            argument,
            ..aggregate.clone()
        })))
    }

    fn rewrite_projection(
        &mut self,
        expr: &ExprRef,
        projection: &ProjectionExpression,
    ) -> Result<ExprRef, Self::Error> {
        rewrite_projection_children(self, expr, projection)
    }

    fn rewrite_column(
        &mut self,
        expr: &ExprRef,
        _column: &ColumnExpression,
    ) -> Result<ExprRef, Self::Error> {
        Ok(expr.clone())
    }

    fn rewrite_named_value(
        &mut self,
        expr: &ExprRef,
        _value: &NamedValueExpression,
    ) -> Result<ExprRef, Self::Error> {
        Ok(expr.clone())
    }
}

/// Runs an infallible rewriter to completion.
pub fn rewrite_infallible<R: Rewriter<Error = Infallible> + ?Sized>(
    rewriter: &mut R,
    expr: &ExprRef,
) -> ExprRef {
    rewriter.rewrite(expr).unwrap_or_else(|never| match never {})
}

pub fn dispatch<R: Rewriter + ?Sized>(rewriter: &mut R, expr: &ExprRef) -> Result<ExprRef, R::Error> {
    match &**expr {
        Expr::Constant(_) | Expr::Table(_) => Ok(expr.clone()),
        Expr::NamedValue(value) => rewriter.rewrite_named_value(expr, value),
        Expr::Column(column) => rewriter.rewrite_column(expr, column),
        Expr::Select(select) => rewriter.rewrite_select(expr, select),
        Expr::Join(join) => rewriter.rewrite_join(expr, join),
        Expr::Subquery(subquery) => rewriter.rewrite_subquery(expr, subquery),
        Expr::Member { source, member } => rewriter.rewrite_member(expr, source, member),
        Expr::Aggregate(aggregate) => rewriter.rewrite_aggregate(expr, aggregate),
        Expr::Projection(projection) => rewriter.rewrite_projection(expr, projection),
        Expr::Binary { op, left, right } => {
            let new_left = rewriter.rewrite(left)?;
            let new_right = rewriter.rewrite(right)?;
            if Arc::ptr_eq(&new_left, left) && Arc::ptr_eq(&new_right, right) {
                Ok(expr.clone())
            } else {
                Ok(Expr::binary(*op, new_left, new_right))
            }
        }
        Expr::Unary { op, operand } => {
            let new_operand = rewriter.rewrite(operand)?;
            if Arc::ptr_eq(&new_operand, operand) {
                Ok(expr.clone())
            } else {
                Ok(Arc::new(Expr::Unary {
                    op: *op,
                    operand: new_operand,
                }))
            }
        }
        Expr::Between {
            expression,
            lower,
            upper,
        } => {
            let e = rewriter.rewrite(expression)?;
            let l = rewriter.rewrite(lower)?;
            let u = rewriter.rewrite(upper)?;
            if Arc::ptr_eq(&e, expression) && Arc::ptr_eq(&l, lower) && Arc::ptr_eq(&u, upper) {
                Ok(expr.clone())
            } else {
                Ok(Expr::between(e, l, u))
            }
        }
        Expr::IsNull(operand) => {
            let new_operand = rewriter.rewrite(operand)?;
            if Arc::ptr_eq(&new_operand, operand) {
                Ok(expr.clone())
            } else {
                Ok(Arc::new(Expr::IsNull(new_operand)))
            }
        }
        Expr::Record(fields) => {
            let mut changed = false;
            let mut new_fields = Vec::with_capacity(fields.len());
            for (name, field) in fields {
                let new_field = rewriter.rewrite(field)?;
                changed |= !Arc::ptr_eq(&new_field, field);
                new_fields.push((name.clone(), new_field));
            }
            if changed {
                Ok(Arc::new(Expr::Record(new_fields)))
            } else {
                Ok(expr.clone())
            }
        }
        Expr::Entity(entity) => {
            let inner = rewriter.rewrite(&entity.expression)?;
            if Arc::ptr_eq(&inner, &entity.expression) {
                Ok(expr.clone())
            } else {
                Ok(Arc::new(Expr::Entity(EntityExpression {
                    entity: entity.entity.clone(),
                    expression: inner,
                })))
            }
        }
        Expr::OuterJoined { test, expression } => {
            let new_test = rewriter.rewrite(test)?;
            let new_expression = rewriter.rewrite(expression)?;
            if Arc::ptr_eq(&new_test, test) && Arc::ptr_eq(&new_expression, expression) {
                Ok(expr.clone())
            } else {
                Ok(Arc::new(Expr::OuterJoined {
                    test: new_test,
                    expression: new_expression,
                }))
            }
        }
        Expr::RowNumber(order_by) => {
            let (new_order, changed) = rewrite_orderings(rewriter, order_by)?;
            if changed {
                Ok(Arc::new(Expr::RowNumber(new_order)))
            } else {
                Ok(expr.clone())
            }
        }
    }
}

pub fn rewrite_select_children<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &ExprRef,
    select: &SelectExpression,
) -> Result<ExprRef, R::Error> {
    let from = rewrite_opt(rewriter, &select.from)?;
    let where_clause = rewrite_opt(rewriter, &select.where_clause)?;
    let (order_by, order_changed) = rewrite_orderings(rewriter, &select.order_by)?;
    let (group_by, group_changed) = rewrite_list(rewriter, &select.group_by)?;
    let (cluster_by, cluster_changed) = rewrite_list(rewriter, &select.cluster_by)?;
    let skip = rewrite_opt(rewriter, &select.skip)?;
    let take = rewrite_opt(rewriter, &select.take)?;
    let (columns, columns_changed) = rewrite_declarations(rewriter, &select.columns)?;

    let unchanged = same_opt(&from, &select.from)
        && same_opt(&where_clause, &select.where_clause)
        && !order_changed
        && !group_changed
        && !cluster_changed
        && same_opt(&skip, &select.skip)
        && same_opt(&take, &select.take)
        && !columns_changed;
    if unchanged {
        return Ok(expr.clone());
    }
    Ok(Arc::new(Expr::Select(SelectExpression {
        alias: select.alias,
        columns,
        from,
        where_clause,
        order_by,
        group_by,
        is_distinct: select.is_distinct,
        skip,
        take,
        is_reverse: select.is_reverse,
        cluster_by,
    })))
}

pub fn rewrite_join_children<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &ExprRef,
    join: &JoinExpression,
) -> Result<ExprRef, R::Error> {
    let left = rewriter.rewrite(&join.left)?;
    let right = rewriter.rewrite(&join.right)?;
    let condition = rewrite_opt(rewriter, &join.condition)?;
    if Arc::ptr_eq(&left, &join.left)
        && Arc::ptr_eq(&right, &join.right)
        && same_opt(&condition, &join.condition)
    {
        return Ok(expr.clone());
    }
    Ok(Expr::join(join.kind, left, right, condition))
}

pub fn rewrite_subquery_children<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &ExprRef,
    subquery: &SubqueryExpression,
) -> Result<ExprRef, R::Error> {
    let rebuilt = match subquery {
        SubqueryExpression::Scalar {
            select,
            scalar_type,
        } => {
            let new_select = rewriter.rewrite(select)?;
            if Arc::ptr_eq(&new_select, select) {
                return Ok(expr.clone());
            }
            SubqueryExpression::Scalar {
                select: new_select,
                scalar_type: *scalar_type,
            }
        }
        SubqueryExpression::Exists { select } => {
            let new_select = rewriter.rewrite(select)?;
            if Arc::ptr_eq(&new_select, select) {
                return Ok(expr.clone());
            }
            SubqueryExpression::Exists { select: new_select }
        }
        SubqueryExpression::In { expression, select } => {
            let new_expression = rewriter.rewrite(expression)?;
            let new_select = rewriter.rewrite(select)?;
            if Arc::ptr_eq(&new_expression, expression) && Arc::ptr_eq(&new_select, select) {
                return Ok(expr.clone());
            }
            SubqueryExpression::In {
                expression: new_expression,
                select: new_select,
            }
        }
    };
    Ok(Arc::new(Expr::Subquery(rebuilt)))
}

pub fn rewrite_projection_children<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &ExprRef,
    projection: &ProjectionExpression,
) -> Result<ExprRef, R::Error> {
    let select = rewriter.rewrite(&projection.select)?;
    let projector = rewriter.rewrite(&projection.projector)?;
    if Arc::ptr_eq(&select, &projection.select) && Arc::ptr_eq(&projector, &projection.projector) {
        return Ok(expr.clone());
    }
    Ok(Arc::new(Expr::Projection(ProjectionExpression {
        select,
        projector,
    })))
}

pub fn rewrite_opt<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Option<ExprRef>,
) -> Result<Option<ExprRef>, R::Error> {
    expr.as_ref().map(|e| rewriter.rewrite(e)).transpose()
}

pub fn rewrite_list<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    exprs: &[ExprRef],
) -> Result<(Vec<ExprRef>, bool), R::Error> {
    let mut changed = false;
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        let new_expr = rewriter.rewrite(expr)?;
        changed |= !Arc::ptr_eq(&new_expr, expr);
        out.push(new_expr);
    }
    Ok((out, changed))
}

pub fn rewrite_orderings<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    orderings: &[OrderExpression],
) -> Result<(Vec<OrderExpression>, bool), R::Error> {
    let mut changed = false;
    let mut out = Vec::with_capacity(orderings.len());
    for order in orderings {
        let new_expr = rewriter.rewrite(&order.expression)?;
        changed |= !Arc::ptr_eq(&new_expr, &order.expression);
        out.push(OrderExpression::new(order.order_type, new_expr));
    }
    Ok((out, changed))
}

pub fn rewrite_declarations<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    columns: &[ColumnDeclaration],
) -> Result<(Vec<ColumnDeclaration>, bool), R::Error> {
    let mut changed = false;
    let mut out = Vec::with_capacity(columns.len());
    for column in columns {
        let new_expr = rewriter.rewrite(&column.expression)?;
        changed |= !Arc::ptr_eq(&new_expr, &column.expression);
        out.push(ColumnDeclaration::new(
            column.name.clone(),
            new_expr,
            column.column_type.clone(),
        ));
    }
    Ok((out, changed))
}

pub fn same_opt(a: &Option<ExprRef>, b: &Option<ExprRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
