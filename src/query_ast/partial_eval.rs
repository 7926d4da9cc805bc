//! Constant folding of scalar subtrees.

use std::sync::Arc;

use log::trace;

use crate::models::structs::Value;

use super::ast::{Expr, ExprRef};
use super::errors::RewriteError;
use super::walker::{dispatch, Rewriter};

pub struct PartialEvaluator;

impl PartialEvaluator {
    /// Folds every operator whose operands are all constants. Fails only when a constant operation
    /// itself is ill-typed, e.g. `'a' + 1`.
    pub fn eval(expr: &ExprRef) -> Result<ExprRef, RewriteError> {
        PartialEvaluator.rewrite(expr)
    }
}

fn constant(expr: &ExprRef) -> Option<&Value> {
    expr.as_constant()
}

impl Rewriter for PartialEvaluator {
    type Error = RewriteError;

    fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef, RewriteError> {
        let expr = dispatch(self, expr)?;
        let folded = match &*expr {
            Expr::Binary { op, left, right } => match (constant(left), constant(right)) {
                (Some(l), Some(r)) => Some(Value::apply_binary(*op, l, r)?),
                _ => None,
            },
            Expr::Unary { op, operand } => match constant(operand) {
                Some(v) => Some(Value::apply_unary(*op, v)?),
                None => None,
            },
            Expr::IsNull(operand) => constant(operand).map(|v| Value::Boolean(v.is_null())),
            _ => None,
        };
        match folded {
            Some(value) => {
                trace!("folded {} to {}", expr.kind_name(), value);
                Ok(Arc::new(Expr::Constant(value)))
            }
            None => Ok(expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{BinaryOp, ScalarType};

    #[test]
    fn folds_nested_arithmetic() {
        let expr = Expr::add(
            Expr::constant(3),
            Expr::binary(BinaryOp::Multiply, Expr::constant(2), Expr::constant(2)),
        );
        let folded = PartialEvaluator::eval(&expr).unwrap();
        assert_eq!(folded.as_constant(), Some(&Value::Int(7)));
    }

    #[test]
    fn leaves_parameters_alone() {
        let skip = Expr::named_value("skip", ScalarType::Int64);
        let expr = Expr::add(skip, Expr::constant(1));
        let folded = PartialEvaluator::eval(&expr).unwrap();
        assert!(Arc::ptr_eq(&folded, &expr));
    }

    #[test]
    fn ill_typed_constants_fail() {
        let expr = Expr::add(Expr::constant("a"), Expr::constant(1));
        assert!(matches!(
            PartialEvaluator::eval(&expr),
            Err(RewriteError::Evaluation(_))
        ));
    }
}
