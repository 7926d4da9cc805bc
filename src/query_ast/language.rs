//! Dialect facts consulted by the rewrite passes.

use std::sync::Arc;

use crate::models::enums::{DialectKind, ScalarType};
use crate::models::structs::ColumnType;

use super::ast::{
    available_column_name, ColumnDeclaration, ColumnExpression, Expr, ExprRef,
    ProjectionExpression, SelectExpression,
};

pub trait QueryLanguage: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Whether `ROW_NUMBER() OVER (ORDER BY ...)` can be emitted.
    fn allows_row_number(&self) -> bool;

    /// Whether cross joins and conditioned joins may share one join chain.
    fn allows_mixed_cross_joins(&self) -> bool {
        false
    }

    fn column_type(&self, scalar_type: ScalarType) -> ColumnType {
        let name = match scalar_type {
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Int32 => "INT",
            ScalarType::Int64 => "BIGINT",
            ScalarType::Double => "DOUBLE",
            ScalarType::Decimal => "DECIMAL",
            ScalarType::String => "STRING",
            ScalarType::Timestamp => "TIMESTAMP",
        };
        ColumnType::new(name, scalar_type)
    }

    /// Expression that is non-null exactly when the outer-joined side of `select` produced a row.
    fn outer_join_test(&self, _select: &SelectExpression) -> ExprRef {
        Expr::constant(1i32)
    }

    /// Adds the outer-join test column to the projection's select (reusing an existing column that
    /// already computes it) and wraps the projector so consumers can tell a missing row apart.
    fn add_outer_join_test(&self, projection: &ProjectionExpression) -> ProjectionExpression {
        let Some(select) = projection.select() else {
            return projection.clone();
        };
        let test = self.outer_join_test(select);
        let scalar_type = test.scalar_type().unwrap_or(ScalarType::Int32);
        let column_type = self.column_type(scalar_type);

        let existing = select
            .columns
            .iter()
            .find(|decl| *decl.expression == *test)
            .map(|decl| decl.name.clone());
        let (select, name) = match existing {
            Some(name) => (select.clone(), name),
            None => {
                let name = available_column_name(&select.columns, "Test");
                let select = select.clone().add_column(ColumnDeclaration::new(
                    name.clone(),
                    test,
                    column_type.clone(),
                ));
                (select, name)
            }
        };
        let test_column =
            ColumnExpression::new(scalar_type, column_type, select.alias, name).into_expr();
        ProjectionExpression {
            select: select.into_expr(),
            projector: Arc::new(Expr::OuterJoined {
                test: test_column,
                expression: projection.projector.clone(),
            }),
        }
    }
}

/// Classic Hive: `LIMIT` is the only windowing primitive.
pub struct HiveLanguage;

impl QueryLanguage for HiveLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::Hive
    }

    fn allows_row_number(&self) -> bool {
        false
    }
}

/// Hive 0.11+ with windowing and analytics functions.
pub struct HiveWindowingLanguage;

impl QueryLanguage for HiveWindowingLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::HiveWindowing
    }

    fn allows_row_number(&self) -> bool {
        true
    }
}

pub fn get_language(kind: DialectKind) -> Box<dyn QueryLanguage> {
    match kind {
        DialectKind::Hive => Box::new(HiveLanguage),
        DialectKind::HiveWindowing => Box::new(HiveWindowingLanguage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::ast::AliasArena;

    #[test]
    fn column_types_follow_hive_names() {
        let language = get_language(DialectKind::Hive);
        assert_eq!(language.column_type(ScalarType::Int64).name, "BIGINT");
        assert_eq!(language.column_type(ScalarType::String).name, "STRING");
        assert!(!language.allows_row_number());
        assert!(get_language(DialectKind::HiveWindowing).allows_row_number());
    }

    #[test]
    fn outer_join_test_column_is_added_once() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let t = arena.fresh();
        let select = SelectExpression::new(
            arena.fresh(),
            Vec::new(),
            Some(Expr::table(t, "addresses")),
            None,
        );
        let projection = ProjectionExpression {
            select: select.into_expr(),
            projector: Expr::constant("x"),
        };
        let once = language.add_outer_join_test(&projection);
        let twice = language.add_outer_join_test(&once);
        let columns = &twice.select().unwrap().columns;
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "Test");
        assert!(matches!(&*once.projector, Expr::OuterJoined { .. }));
    }
}
