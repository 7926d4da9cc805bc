use crate::query_ast::ast::{AggregateExpression, SelectExpression, SubqueryExpression};
use crate::query_ast::walker::Visitor;

/// Detects aggregates in the WHERE, ORDER BY and column list of one select. Nested queries belong to
/// themselves and are never entered.
#[derive(Default)]
pub struct AggregateChecker {
    has_aggregate: bool,
}

impl AggregateChecker {
    pub fn has_aggregates(select: &SelectExpression) -> bool {
        let mut checker = AggregateChecker::default();
        if let Some(where_clause) = &select.where_clause {
            checker.visit(where_clause);
        }
        for order in &select.order_by {
            checker.visit(&order.expression);
        }
        for column in &select.columns {
            checker.visit(&column.expression);
        }
        checker.has_aggregate
    }
}

impl Visitor for AggregateChecker {
    fn visit_aggregate(&mut self, _aggregate: &AggregateExpression) {
        self.has_aggregate = true;
    }

    fn visit_subquery(&mut self, _subquery: &SubqueryExpression) {}

    fn visit_select(&mut self, _select: &SelectExpression) {}
}
