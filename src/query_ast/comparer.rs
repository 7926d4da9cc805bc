//! Structural equality of query trees modulo alias renaming.
//!
//! Two selects are equal when their sources are equal and every dependent clause is equal once the
//! aliases each source declares are paired up. Tables compare by name, columns by mapped alias and
//! name.

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{ColumnDeclaration, Expr, ExprRef, OrderExpression, SubqueryExpression, TableAlias};
use super::rewrite::referenced_columns::DeclaredAliasGatherer;

pub type AliasScope = HashMap<TableAlias, TableAlias>;

pub fn are_equal(a: &ExprRef, b: &ExprRef) -> bool {
    eq(&AliasScope::new(), a, b)
}

/// Equality where the aliases on the left of `scope` stand for the ones on the right.
pub fn are_equal_with_scope(scope: &AliasScope, a: &ExprRef, b: &ExprRef) -> bool {
    eq(scope, a, b)
}

fn same_alias(scope: &AliasScope, a: TableAlias, b: TableAlias) -> bool {
    match scope.get(&a) {
        Some(mapped) => *mapped == b,
        None => a == b,
    }
}

fn with_sources(scope: &AliasScope, a: &ExprRef, b: &ExprRef) -> AliasScope {
    let mut inner = scope.clone();
    let left = DeclaredAliasGatherer::gather(a);
    let right = DeclaredAliasGatherer::gather(b);
    for (x, y) in left.into_iter().zip(right) {
        inner.insert(x, y);
    }
    inner
}

fn eq_opt(scope: &AliasScope, a: &Option<ExprRef>, b: &Option<ExprRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => eq(scope, a, b),
        (None, None) => true,
        _ => false,
    }
}

fn eq_list(scope: &AliasScope, a: &[ExprRef], b: &[ExprRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq(scope, x, y))
}

fn eq_orders(scope: &AliasScope, a: &[OrderExpression], b: &[OrderExpression]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.order_type == y.order_type && eq(scope, &x.expression, &y.expression))
}

fn eq_declarations(scope: &AliasScope, a: &[ColumnDeclaration], b: &[ColumnDeclaration]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && eq(scope, &x.expression, &y.expression))
}

fn eq(scope: &AliasScope, a: &ExprRef, b: &ExprRef) -> bool {
    if Arc::ptr_eq(a, b) && scope.is_empty() {
        return true;
    }
    match (&**a, &**b) {
        (Expr::Constant(x), Expr::Constant(y)) => x == y,
        (Expr::NamedValue(x), Expr::NamedValue(y)) => x == y,
        (
            Expr::Binary {
                op: op_a,
                left: la,
                right: ra,
            },
            Expr::Binary {
                op: op_b,
                left: lb,
                right: rb,
            },
        ) => op_a == op_b && eq(scope, la, lb) && eq(scope, ra, rb),
        (
            Expr::Unary {
                op: op_a,
                operand: x,
            },
            Expr::Unary {
                op: op_b,
                operand: y,
            },
        ) => op_a == op_b && eq(scope, x, y),
        (
            Expr::Between {
                expression: ea,
                lower: la,
                upper: ua,
            },
            Expr::Between {
                expression: eb,
                lower: lb,
                upper: ub,
            },
        ) => eq(scope, ea, eb) && eq(scope, la, lb) && eq(scope, ua, ub),
        (Expr::IsNull(x), Expr::IsNull(y)) => eq(scope, x, y),
        (
            Expr::Member {
                source: sa,
                member: ma,
            },
            Expr::Member {
                source: sb,
                member: mb,
            },
        ) => ma == mb && eq(scope, sa, sb),
        (Expr::Record(fa), Expr::Record(fb)) => {
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(fb)
                    .all(|((na, xa), (nb, xb))| na == nb && eq(scope, xa, xb))
        }
        (Expr::Entity(x), Expr::Entity(y)) => {
            x.entity == y.entity && eq(scope, &x.expression, &y.expression)
        }
        (
            Expr::OuterJoined {
                test: ta,
                expression: ea,
            },
            Expr::OuterJoined {
                test: tb,
                expression: eb,
            },
        ) => eq(scope, ta, tb) && eq(scope, ea, eb),
        (Expr::Table(x), Expr::Table(y)) => x.name == y.name,
        (Expr::Column(x), Expr::Column(y)) => {
            x.name == y.name && same_alias(scope, x.alias, y.alias)
        }
        (Expr::Select(x), Expr::Select(y)) => {
            if !eq_opt(scope, &x.from, &y.from) {
                return false;
            }
            let inner = match (&x.from, &y.from) {
                (Some(fa), Some(fb)) => with_sources(scope, fa, fb),
                _ => scope.clone(),
            };
            x.is_distinct == y.is_distinct
                && x.is_reverse == y.is_reverse
                && eq_opt(&inner, &x.where_clause, &y.where_clause)
                && eq_orders(&inner, &x.order_by, &y.order_by)
                && eq_list(&inner, &x.group_by, &y.group_by)
                && eq_list(&inner, &x.cluster_by, &y.cluster_by)
                && eq_opt(&inner, &x.skip, &y.skip)
                && eq_opt(&inner, &x.take, &y.take)
                && eq_declarations(&inner, &x.columns, &y.columns)
        }
        (Expr::Join(x), Expr::Join(y)) => {
            if x.kind != y.kind || !eq(scope, &x.left, &y.left) {
                return false;
            }
            let right_scope = if x.kind.is_apply() {
                with_sources(scope, &x.left, &y.left)
            } else {
                scope.clone()
            };
            if !eq(&right_scope, &x.right, &y.right) {
                return false;
            }
            let inner = with_sources(&with_sources(scope, &x.left, &y.left), &x.right, &y.right);
            eq_opt(&inner, &x.condition, &y.condition)
        }
        (Expr::Subquery(x), Expr::Subquery(y)) => match (x, y) {
            (
                SubqueryExpression::Scalar {
                    select: sa,
                    scalar_type: ta,
                },
                SubqueryExpression::Scalar {
                    select: sb,
                    scalar_type: tb,
                },
            ) => ta == tb && eq(scope, sa, sb),
            (SubqueryExpression::Exists { select: sa }, SubqueryExpression::Exists { select: sb }) => {
                eq(scope, sa, sb)
            }
            (
                SubqueryExpression::In {
                    expression: ea,
                    select: sa,
                },
                SubqueryExpression::In {
                    expression: eb,
                    select: sb,
                },
            ) => eq(scope, ea, eb) && eq(scope, sa, sb),
            _ => false,
        },
        (Expr::Aggregate(x), Expr::Aggregate(y)) => {
            x.kind == y.kind && x.is_distinct == y.is_distinct && eq_opt(scope, &x.argument, &y.argument)
        }
        (Expr::RowNumber(x), Expr::RowNumber(y)) => eq_orders(scope, x, y),
        (Expr::Projection(x), Expr::Projection(y)) => {
            if !eq(scope, &x.select, &y.select) {
                return false;
            }
            let inner = with_sources(scope, &x.select, &y.select);
            eq(&inner, &x.projector, &y.projector)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScalarType;
    use crate::models::structs::ColumnType;
    use crate::query_ast::ast::{AliasArena, ColumnExpression, SelectExpression};

    fn keyed_select(arena: &mut AliasArena, table: &str) -> ExprRef {
        let t = arena.fresh();
        let ty = ColumnType::new("BIGINT", ScalarType::Int64);
        let key = ColumnExpression::new(ScalarType::Int64, ty.clone(), t, "key").into_expr();
        SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("key", key.clone(), ty)],
            Some(Expr::table(t, table)),
            Some(Expr::eq(key, Expr::constant(3))),
        )
        .into_expr()
    }

    #[test]
    fn selects_equal_modulo_aliases() {
        let mut arena = AliasArena::new();
        let a = keyed_select(&mut arena, "orders");
        let b = keyed_select(&mut arena, "orders");
        let c = keyed_select(&mut arena, "customers");
        assert!(are_equal(&a, &b));
        assert!(!are_equal(&a, &c));
    }

    #[test]
    fn scope_maps_free_aliases() {
        let mut arena = AliasArena::new();
        let (x, y) = (arena.fresh(), arena.fresh());
        let ty = ColumnType::new("BIGINT", ScalarType::Int64);
        let cx = ColumnExpression::new(ScalarType::Int64, ty.clone(), x, "id").into_expr();
        let cy = ColumnExpression::new(ScalarType::Int64, ty, y, "id").into_expr();
        assert!(!are_equal(&cx, &cy));
        let scope = AliasScope::from([(x, y)]);
        assert!(are_equal_with_scope(&scope, &cx, &cy));
    }
}
