use std::sync::Arc;

use log::debug;

use crate::models::enums::{BinaryOp, ScalarType};
use crate::query_ast::ast::{
    available_column_name, AliasArena, ColumnDeclaration, ColumnExpression, Expr, ExprRef,
    OrderExpression, SelectExpression,
};
use crate::query_ast::errors::RewriteError;
use crate::query_ast::language::QueryLanguage;
use crate::query_ast::partial_eval::PartialEvaluator;
use crate::query_ast::walker::{rewrite_select_children, Rewriter};

use super::is_constant_zero;
use super::order_by::{lift_orderings, require_ordering};

/// Lowers SKIP/TAKE to a filter on `ROW_NUMBER() OVER (ORDER BY ...)`.
///
/// ```text
/// SELECT cols FROM (
///     SELECT cols, ROW_NUMBER() OVER (ORDER BY keys) AS _rownum FROM ...
/// ) WHERE _rownum BETWEEN skip + 1 AND skip + take ORDER BY _rownum
/// ```
pub struct SkipToRowNumberRewriter<'a> {
    arena: &'a mut AliasArena,
    language: &'a dyn QueryLanguage,
}

impl<'a> SkipToRowNumberRewriter<'a> {
    pub fn rewrite_paging(
        arena: &'a mut AliasArena,
        language: &'a dyn QueryLanguage,
        expr: &ExprRef,
    ) -> Result<ExprRef, RewriteError> {
        SkipToRowNumberRewriter { arena, language }.rewrite(expr)
    }

    fn lower(
        &mut self,
        select: SelectExpression,
        skip: ExprRef,
        take: Option<ExprRef>,
    ) -> Result<SelectExpression, RewriteError> {
        let (select, order_by) = require_ordering(select, self.language, "SKIP")?;
        let mut new_select = select.set_skip(None).set_take(None);

        let can_add_column = !new_select.is_distinct && new_select.group_by.is_empty();
        let order_by = if can_add_column {
            new_select = new_select.set_order_by(Vec::new());
            order_by
        } else {
            let wrapped = new_select
                .set_order_by(order_by)
                .add_redundant_select(self.language, self.arena.fresh());
            let Some(inner) = wrapped.from.as_ref().and_then(|f| f.as_select()).cloned() else {
                return Err(RewriteError::StructuralPrecondition(
                    "projection layer lost its source".into(),
                ));
            };
            let (inner, lifted) = lift_orderings(inner, self.language)?;
            new_select = wrapped.set_from(Some(inner.set_order_by(Vec::new()).into_expr()));
            lifted
        };

        let column_type = self.language.column_type(ScalarType::Int32);
        let rownum = available_column_name(&new_select.columns, "_rownum");
        new_select = new_select
            .add_column(ColumnDeclaration::new(
                rownum.clone(),
                Arc::new(Expr::RowNumber(order_by)),
                column_type.clone(),
            ))
            .add_redundant_select(self.language, self.arena.fresh())
            .remove_column(&rownum);

        let Some(numbered) = new_select.from.as_ref().and_then(|f| f.declared_alias()) else {
            return Err(RewriteError::StructuralPrecondition(
                "projection layer lost its source".into(),
            ));
        };
        let rn = ColumnExpression::new(ScalarType::Int32, column_type, numbered, rownum).into_expr();
        let predicate = match take {
            Some(take) => Expr::between(
                rn.clone(),
                PartialEvaluator::eval(&Expr::add(skip.clone(), Expr::constant(1)))?,
                PartialEvaluator::eval(&Expr::add(skip, take))?,
            ),
            None => Expr::binary(BinaryOp::GreaterThan, rn.clone(), skip),
        };
        let where_clause = match new_select.where_clause.take() {
            Some(existing) => Expr::and(existing, predicate),
            None => predicate,
        };
        debug!("lowered SKIP of {} to row-number filter on {}", new_select.alias, numbered);
        Ok(new_select
            .set_where(Some(where_clause))
            .set_order_by(vec![OrderExpression::asc(rn)]))
    }
}

impl Rewriter for SkipToRowNumberRewriter<'_> {
    type Error = RewriteError;

    fn rewrite_select(
        &mut self,
        expr: &ExprRef,
        select: &SelectExpression,
    ) -> Result<ExprRef, RewriteError> {
        let rebuilt = rewrite_select_children(self, expr, select)?;
        let Some(select) = rebuilt.as_select() else {
            return Ok(rebuilt);
        };
        let Some(skip) = &select.skip else {
            return Ok(rebuilt);
        };
        let skip = PartialEvaluator::eval(skip)?;
        if is_constant_zero(&skip) {
            return Ok(select.clone().set_skip(None).into_expr());
        }
        let take = select.take.as_ref().map(PartialEvaluator::eval).transpose()?;
        Ok(self.lower(select.clone(), skip, take)?.into_expr())
    }
}
