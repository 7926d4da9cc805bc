use std::collections::HashSet;

use log::debug;

use crate::models::enums::JoinKind;
use crate::query_ast::ast::{
    available_column_name, ColumnDeclaration, ColumnExpression, Expr, ExprRef, JoinExpression,
    SelectExpression, TableAlias,
};
use crate::query_ast::comparer::are_equal;
use crate::query_ast::errors::RewriteError;
use crate::query_ast::walker::{rewrite_join_children, Rewriter};

use super::aggregate_checker::AggregateChecker;
use super::referenced_columns::{referenced_aliases, DeclaredAliasGatherer};

/// Turns CROSS/OUTER APPLY into ordinary joins when the right side is only correlated through its
/// WHERE clause. The correlated predicate moves into the join condition and the inner columns it
/// reads are projected through the right-hand select.
pub struct ApplyJoinRewriter;

impl ApplyJoinRewriter {
    pub fn rewrite_applies(expr: &ExprRef) -> Result<ExprRef, RewriteError> {
        ApplyJoinRewriter.rewrite(expr)
    }
}

fn outer_always() -> Option<ExprRef> {
    Some(Expr::constant(true))
}

impl Rewriter for ApplyJoinRewriter {
    type Error = RewriteError;

    fn rewrite_join(
        &mut self,
        expr: &ExprRef,
        join: &JoinExpression,
    ) -> Result<ExprRef, RewriteError> {
        let result = rewrite_join_children(self, expr, join)?;
        let Some(join) = result.as_join() else {
            return Ok(result);
        };
        if !join.kind.is_apply() || join.condition.is_some() {
            return Ok(result);
        }

        match &*join.right {
            Expr::Table(_) => {
                let (kind, condition) = match join.kind {
                    JoinKind::CrossApply => (JoinKind::Cross, None),
                    _ => (JoinKind::LeftOuter, outer_always()),
                };
                Ok(Expr::join(kind, join.left.clone(), join.right.clone(), condition))
            }
            Expr::Select(select)
                if select.skip.is_none()
                    && select.take.is_none()
                    && !select.is_distinct
                    && select.group_by.is_empty()
                    && !AggregateChecker::has_aggregates(select) =>
            {
                let without_where = select.clone().set_where(None);
                let left_aliases: HashSet<TableAlias> =
                    DeclaredAliasGatherer::gather(&join.left).into_iter().collect();
                let correlated = referenced_aliases(&without_where.clone().into_expr())
                    .iter()
                    .any(|alias| left_aliases.contains(alias));
                if correlated {
                    return Ok(result);
                }

                let inner_aliases: HashSet<TableAlias> = select
                    .from
                    .as_ref()
                    .map(DeclaredAliasGatherer::gather)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let mut projector = ColumnProjector {
                    inner_aliases,
                    alias: select.alias,
                    columns: without_where.columns.clone(),
                };
                let condition = match &select.where_clause {
                    Some(predicate) => Some(projector.rewrite(predicate)?),
                    None => None,
                };
                let right = SelectExpression {
                    columns: projector.columns,
                    ..without_where
                };
                let (kind, condition) = match (join.kind, condition) {
                    (JoinKind::CrossApply, None) => (JoinKind::Cross, None),
                    (JoinKind::CrossApply, Some(c)) => (JoinKind::Inner, Some(c)),
                    (_, None) => (JoinKind::LeftOuter, outer_always()),
                    (_, Some(c)) => (JoinKind::LeftOuter, Some(c)),
                };
                debug!("rewrote {:?} on {} as {:?} join", join.kind, right.alias, kind);
                Ok(Expr::join(kind, join.left.clone(), right.into_expr(), condition))
            }
            _ => Ok(result),
        }
    }
}

/// Re-expresses references to the select's own sources as columns of the select, adding
/// declarations where none computes the same thing yet.
struct ColumnProjector {
    inner_aliases: HashSet<TableAlias>,
    alias: TableAlias,
    columns: Vec<ColumnDeclaration>,
}

impl Rewriter for ColumnProjector {
    type Error = RewriteError;

    fn rewrite_column(
        &mut self,
        expr: &ExprRef,
        column: &ColumnExpression,
    ) -> Result<ExprRef, RewriteError> {
        if !self.inner_aliases.contains(&column.alias) {
            return Ok(expr.clone());
        }
        let name = match self.columns.iter().find(|d| are_equal(&d.expression, expr)) {
            Some(decl) => decl.name.clone(),
            None => {
                let name = available_column_name(&self.columns, &column.name);
                self.columns.push(ColumnDeclaration::new(
                    name.clone(),
                    expr.clone(),
                    column.column_type.clone(),
                ));
                name
            }
        };
        Ok(ColumnExpression::new(column.scalar_type, column.column_type.clone(), self.alias, name)
            .into_expr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScalarType;
    use crate::models::structs::ColumnType;
    use crate::query_ast::ast::AliasArena;
    use crate::query_ast::validate::check_alias_scopes;

    fn col(alias: TableAlias, name: &str) -> ExprRef {
        ColumnExpression::new(
            ScalarType::Int64,
            ColumnType::new("BIGINT", ScalarType::Int64),
            alias,
            name,
        )
        .into_expr()
    }

    #[test]
    fn correlated_where_becomes_join_condition() {
        let mut arena = AliasArena::new();
        let (c, a, s) = (arena.fresh(), arena.fresh(), arena.fresh());
        let ty = ColumnType::new("STRING", ScalarType::String);
        let right = SelectExpression::new(
            s,
            vec![ColumnDeclaration::new("city", col(a, "city"), ty.clone())],
            Some(Expr::table(a, "addresses")),
            Some(Expr::eq(col(c, "address_id"), col(a, "address_id"))),
        );
        let from = Expr::join(JoinKind::OuterApply, Expr::table(c, "customers"), right.into_expr(), None);
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("city", col(s, "city"), ty)],
            Some(from),
            None,
        )
        .into_expr();

        let out = ApplyJoinRewriter::rewrite_applies(&tree).unwrap();
        let join = out.as_select().unwrap().from.as_ref().unwrap().as_join().unwrap().clone();
        assert_eq!(join.kind, JoinKind::LeftOuter);
        let right = join.right.as_select().unwrap();
        assert!(right.where_clause.is_none());
        assert!(right.column("address_id").is_some());
        let Expr::Binary { right: projected, .. } = &**join.condition.as_ref().unwrap() else {
            panic!("expected the moved predicate");
        };
        assert_eq!(projected.as_column().unwrap().alias, s);
        check_alias_scopes(&out).unwrap();
    }

    #[test]
    fn correlation_outside_where_keeps_apply() {
        let mut arena = AliasArena::new();
        let (c, a, s) = (arena.fresh(), arena.fresh(), arena.fresh());
        let ty = ColumnType::new("BIGINT", ScalarType::Int64);
        let right = SelectExpression::new(
            s,
            vec![ColumnDeclaration::new("sum", Expr::add(col(a, "x"), col(c, "y")), ty)],
            Some(Expr::table(a, "a")),
            None,
        );
        let from = Expr::join(JoinKind::CrossApply, Expr::table(c, "c"), right.into_expr(), None);
        let tree = SelectExpression::new(arena.fresh(), Vec::new(), Some(from), None).into_expr();
        let out = ApplyJoinRewriter::rewrite_applies(&tree).unwrap();
        assert!(std::sync::Arc::ptr_eq(&tree, &out));
    }
}
