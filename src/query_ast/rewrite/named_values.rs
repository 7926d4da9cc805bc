use crate::query_ast::ast::{ExprRef, NamedValueExpression};
use crate::query_ast::walker::Visitor;

/// Parameters a compiled query needs at execution time, one per name, in first-encounter order.
#[derive(Default)]
pub struct NamedValueGatherer {
    values: Vec<NamedValueExpression>,
}

impl NamedValueGatherer {
    pub fn gather(expr: &ExprRef) -> Vec<NamedValueExpression> {
        let mut gatherer = NamedValueGatherer::default();
        gatherer.visit(expr);
        gatherer.values
    }
}

impl Visitor for NamedValueGatherer {
    fn visit_named_value(&mut self, value: &NamedValueExpression) {
        if !self.values.iter().any(|v| v.name == value.name) {
            self.values.push(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{BinaryOp, ScalarType};
    use crate::query_ast::ast::Expr;

    #[test]
    fn keeps_first_occurrence_per_name() {
        let expr = Expr::and(
            Expr::binary(
                BinaryOp::GreaterThan,
                Expr::named_value("low", ScalarType::Int64),
                Expr::named_value("high", ScalarType::Int64),
            ),
            Expr::eq(
                Expr::named_value("low", ScalarType::Int32),
                Expr::constant(1),
            ),
        );
        let values = NamedValueGatherer::gather(&expr);
        let names: Vec<_> = values.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["low", "high"]);
        assert_eq!(values[0].scalar_type, ScalarType::Int64);
    }
}
