use log::debug;

use crate::models::enums::{AggregateKind, BinaryOp, ScalarType};
use crate::query_ast::ast::{
    AliasArena, ColumnDeclaration, Expr, ExprRef, OrderExpression, SelectExpression,
};
use crate::query_ast::errors::RewriteError;
use crate::query_ast::language::QueryLanguage;
use crate::query_ast::partial_eval::PartialEvaluator;
use crate::query_ast::walker::{rewrite_select_children, Rewriter};

use super::column_mapper::duplicate_with_fresh_aliases;
use super::is_constant_zero;
use super::order_by::{lift_orderings, require_ordering};

/// Lowers SKIP/TAKE for dialects whose only windowing primitive is a top-N `LIMIT`: take the first
/// `skip + take` rows, then the last `take` of those by limiting in inverted order, then restore the
/// original order.
///
/// ```text
/// SELECT * FROM (
///     SELECT * FROM (SELECT ... ORDER BY k LIMIT skip + take) ORDER BY k DESC LIMIT take
/// ) ORDER BY k
/// ```
///
/// With a TAKE, both limits are constants fixed before the row count is known. A page that runs
/// past the last row therefore yields the final `take` rows of the source, which can include rows
/// before `skip`; only the row-number strategy clips such a page. Without a TAKE the window is sized
/// from a row count and is exact.
pub struct SkipToNestedOrderByRewriter<'a> {
    arena: &'a mut AliasArena,
    language: &'a dyn QueryLanguage,
}

fn inverted(orderings: Vec<OrderExpression>) -> Vec<OrderExpression> {
    orderings.iter().map(OrderExpression::inverted).collect()
}

impl<'a> SkipToNestedOrderByRewriter<'a> {
    pub fn rewrite_paging(
        arena: &'a mut AliasArena,
        language: &'a dyn QueryLanguage,
        expr: &ExprRef,
    ) -> Result<ExprRef, RewriteError> {
        SkipToNestedOrderByRewriter { arena, language }.rewrite(expr)
    }

    /// Wraps `select` in a redundant layer and lifts its ordering into that layer.
    fn wrap_ordered(
        &mut self,
        select: SelectExpression,
    ) -> Result<(SelectExpression, Vec<OrderExpression>), RewriteError> {
        let wrapped = select.add_redundant_select(self.language, self.arena.fresh());
        let Some(inner) = wrapped.from.as_ref().and_then(|f| f.as_select()).cloned() else {
            return Err(RewriteError::StructuralPrecondition(
                "projection layer lost its source".into(),
            ));
        };
        let (inner, lifted) = lift_orderings(inner, self.language)?;
        Ok((wrapped.set_from(Some(inner.into_expr())), lifted))
    }

    /// `(SELECT COUNT(*) FROM <copy of source>) - skip`, for windows without TAKE.
    fn remaining_rows(&mut self, source: &SelectExpression, skip: ExprRef) -> ExprRef {
        let copy = duplicate_with_fresh_aliases(
            self.arena,
            &source.clone().set_order_by(Vec::new()).into_expr(),
        );
        let count = SelectExpression::new(
            self.arena.fresh(),
            vec![ColumnDeclaration::new(
                "c",
                Expr::aggregate(AggregateKind::Count, None, ScalarType::Int64),
                self.language.column_type(ScalarType::Int64),
            )],
            Some(copy),
            None,
        );
        Expr::binary(
            BinaryOp::Subtract,
            Expr::scalar_subquery(count, ScalarType::Int64),
            skip,
        )
    }

    fn lower(
        &mut self,
        select: SelectExpression,
        skip: ExprRef,
        take: Option<ExprRef>,
    ) -> Result<SelectExpression, RewriteError> {
        let (select, order_by) = require_ordering(select, self.language, "SKIP")?;
        let base = select.set_skip(None).set_order_by(order_by);

        let (first, window) = match take {
            Some(take) => {
                let limit = PartialEvaluator::eval(&Expr::add(skip, take.clone()))?;
                (base.set_take(Some(limit)), take)
            }
            None => {
                let first = base.set_take(None);
                let window = self.remaining_rows(&first, skip);
                (first, window)
            }
        };

        let (middle, lifted) = self.wrap_ordered(first)?;
        let middle = middle
            .set_order_by(inverted(lifted))
            .set_take(Some(window));

        let (outer, lifted) = self.wrap_ordered(middle)?;
        debug!("lowered SKIP of {} to nested inverted LIMIT layers", outer.alias);
        Ok(outer.set_order_by(inverted(lifted)).set_take(None))
    }
}

impl Rewriter for SkipToNestedOrderByRewriter<'_> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{DialectKind, OrderType};
    use crate::models::structs::{ColumnType, Value};
    use crate::query_ast::ast::ColumnExpression;
    use crate::query_ast::language::get_language;
    use crate::query_ast::validate::check_alias_scopes;

    fn paged(arena: &mut AliasArena, skip: i64, take: Option<i64>) -> ExprRef {
        let t = arena.fresh();
        let ty = ColumnType::new("BIGINT", ScalarType::Int64);
        let key = ColumnExpression::new(ScalarType::Int64, ty.clone(), t, "key").into_expr();
        SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("key", key.clone(), ty)],
            Some(Expr::table(t, "numbers")),
            None,
        )
        .set_order_by(vec![OrderExpression::asc(key)])
        .set_skip(Some(Expr::constant(skip)))
        .set_take(take.map(Expr::constant))
        .into_expr()
    }

    fn layer(expr: &ExprRef) -> &SelectExpression {
        expr.as_select().unwrap()
    }

    #[test]
    fn three_layers_with_inverted_middle() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let tree = paged(&mut arena, 3, Some(4));
        let out = SkipToNestedOrderByRewriter::rewrite_paging(&mut arena, language.as_ref(), &tree)
            .unwrap();

        let outer = layer(&out);
        assert_eq!(outer.alias, layer(&tree).alias);
        assert!(outer.take.is_none() && outer.skip.is_none());
        assert_eq!(outer.order_by[0].order_type, OrderType::Ascending);

        let middle = layer(outer.from.as_ref().unwrap());
        assert_eq!(middle.order_by[0].order_type, OrderType::Descending);
        assert_eq!(middle.take.as_ref().and_then(|t| t.as_constant()), Some(&Value::Int(4)));

        let inner = layer(middle.from.as_ref().unwrap());
        assert_eq!(inner.order_by[0].order_type, OrderType::Ascending);
        assert_eq!(inner.take.as_ref().and_then(|t| t.as_constant()), Some(&Value::Int(7)));
        assert!(inner.skip.is_none());
        check_alias_scopes(&out).unwrap();
    }

    #[test]
    fn page_past_the_end_keeps_constant_limits() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let tree = paged(&mut arena, 8, Some(4));
        let out = SkipToNestedOrderByRewriter::rewrite_paging(&mut arena, language.as_ref(), &tree)
            .unwrap();
        let middle = layer(layer(&out).from.as_ref().unwrap());
        assert_eq!(middle.take.as_ref().and_then(|t| t.as_constant()), Some(&Value::Int(4)));
        let inner = layer(middle.from.as_ref().unwrap());
        assert_eq!(inner.take.as_ref().and_then(|t| t.as_constant()), Some(&Value::Int(12)));
    }

    #[test]
    fn open_window_counts_remaining_rows() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let tree = paged(&mut arena, 7, None);
        let out = SkipToNestedOrderByRewriter::rewrite_paging(&mut arena, language.as_ref(), &tree)
            .unwrap();
        let middle = layer(layer(&out).from.as_ref().unwrap());
        let take = middle.take.clone().unwrap();
        assert!(matches!(
            &*take,
            Expr::Binary {
                op: BinaryOp::Subtract,
                ..
            }
        ));
        check_alias_scopes(&out).unwrap();
    }

    #[test]
    fn skip_without_ordering_fails() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let t = arena.fresh();
        let tree = SelectExpression::new(arena.fresh(), Vec::new(), Some(Expr::table(t, "x")), None)
            .set_skip(Some(Expr::constant(2)))
            .into_expr();
        let err = SkipToNestedOrderByRewriter::rewrite_paging(&mut arena, language.as_ref(), &tree)
            .unwrap_err();
        assert!(matches!(err, RewriteError::MissingClause { .. }));
    }
}
