//! Moving orderings across projection layers.

use crate::models::enums::ScalarType;
use crate::query_ast::ast::{
    available_column_name, ColumnDeclaration, Expr, OrderExpression, SelectExpression,
};
use crate::query_ast::comparer::are_equal;
use crate::query_ast::errors::RewriteError;
use crate::query_ast::language::QueryLanguage;

/// Re-expresses `inner`'s ORDER BY in the scope of a select that reads from it. Keys already
/// computed by a column are referenced through it; other keys get a new column, unless `inner` is
/// DISTINCT, where adding a column would change its rows.
///
/// Returns the (possibly widened) inner select and the lifted orderings.
pub fn lift_orderings(
    inner: SelectExpression,
    language: &dyn QueryLanguage,
) -> Result<(SelectExpression, Vec<OrderExpression>), RewriteError> {
    let mut inner = inner;
    let mut lifted = Vec::with_capacity(inner.order_by.len());
    for order in inner.order_by.clone() {
        let existing = inner
            .columns
            .iter()
            .find(|d| are_equal(&d.expression, &order.expression))
            .map(|d| d.name.clone());
        let name = match existing {
            Some(name) => name,
            None if inner.is_distinct => {
                return Err(RewriteError::StructuralPrecondition(format!(
                    "ordering key of DISTINCT select {} is not among its columns",
                    inner.alias
                )));
            }
            None => {
                let base = match &*order.expression {
                    Expr::Column(column) => column.name.clone(),
                    _ => "_order".to_string(),
                };
                let name = available_column_name(&inner.columns, &base);
                let scalar_type = order
                    .expression
                    .scalar_type()
                    .unwrap_or(ScalarType::String);
                inner.columns.push(ColumnDeclaration::new(
                    name.clone(),
                    order.expression.clone(),
                    language.column_type(scalar_type),
                ));
                name
            }
        };
        let Some(reference) = inner.column_ref(&name) else {
            return Err(RewriteError::StructuralPrecondition(format!(
                "column {} vanished from select {}",
                name, inner.alias
            )));
        };
        lifted.push(OrderExpression::new(order.order_type, reference.into_expr()));
    }
    Ok((inner, lifted))
}

/// Finds the ordering a SKIP depends on: the select's own ORDER BY, or one found down its chain of
/// single-source projection layers, lifted into the select's scope.
pub fn require_ordering(
    select: SelectExpression,
    language: &dyn QueryLanguage,
    required_by: &'static str,
) -> Result<(SelectExpression, Vec<OrderExpression>), RewriteError> {
    if !select.order_by.is_empty() {
        let order_by = select.order_by.clone();
        return Ok((select, order_by));
    }
    let missing = RewriteError::MissingClause {
        clause: "ORDER BY",
        required_by,
    };
    if !select.group_by.is_empty() {
        return Err(missing);
    }
    let Some(inner) = select.from.as_ref().and_then(|f| f.as_select()).cloned() else {
        return Err(missing);
    };
    let (inner, inner_order) = require_ordering(inner, language, required_by)?;
    let (inner, lifted) = lift_orderings(inner.set_order_by(inner_order), language)?;
    Ok((select.set_from(Some(inner.into_expr())), lifted))
}
