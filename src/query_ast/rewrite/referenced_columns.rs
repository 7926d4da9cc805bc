//! Read-only gatherers over column references and declared aliases.

use std::collections::HashSet;

use crate::query_ast::ast::{
    ColumnExpression, Expr, ExprRef, SelectExpression, TableAlias, TableExpression,
};
use crate::query_ast::walker::{walk_select, Visitor};

/// Columns referenced by the first select reached from the root; nested selects are not entered.
#[derive(Default)]
pub struct ReferencedColumnGatherer {
    columns: Vec<ColumnExpression>,
    first: bool,
}

impl ReferencedColumnGatherer {
    /// Distinct column references in first-encounter order.
    pub fn gather(expr: &ExprRef) -> Vec<ColumnExpression> {
        let mut gatherer = ReferencedColumnGatherer {
            columns: Vec::new(),
            first: true,
        };
        gatherer.visit(expr);
        gatherer.columns
    }
}

impl Visitor for ReferencedColumnGatherer {
    fn visit_select(&mut self, select: &SelectExpression) {
        if self.first {
            self.first = false;
            walk_select(self, select);
        }
    }

    fn visit_column(&mut self, column: &ColumnExpression) {
        if !self.columns.contains(column) {
            self.columns.push(column.clone());
        }
    }
}

/// Every column reference anywhere below the root, nested selects included.
pub fn gather_all_columns(expr: &ExprRef) -> Vec<ColumnExpression> {
    struct All(Vec<ColumnExpression>);
    impl Visitor for All {
        fn visit_column(&mut self, column: &ColumnExpression) {
            if !self.0.contains(column) {
                self.0.push(column.clone());
            }
        }
    }
    let mut all = All(Vec::new());
    all.visit(expr);
    all.0
}

/// Aliases a row source brings into scope: tables and selects at the leaves of a join tree.
/// Selects are not entered.
#[derive(Default)]
pub struct DeclaredAliasGatherer {
    aliases: Vec<TableAlias>,
}

impl DeclaredAliasGatherer {
    pub fn gather(source: &ExprRef) -> Vec<TableAlias> {
        let mut gatherer = DeclaredAliasGatherer::default();
        gatherer.visit(source);
        gatherer.aliases
    }
}

impl Visitor for DeclaredAliasGatherer {
    fn visit(&mut self, expr: &ExprRef) {
        match &**expr {
            Expr::Select(select) => self.aliases.push(select.alias),
            Expr::Table(table) => self.visit_table(table),
            Expr::Join(join) => {
                self.visit(&join.left);
                self.visit(&join.right);
            }
            _ => {}
        }
    }

    fn visit_table(&mut self, table: &TableExpression) {
        self.aliases.push(table.alias);
    }
}

/// Aliases referenced by any column below the root.
pub fn referenced_aliases(expr: &ExprRef) -> HashSet<TableAlias> {
    gather_all_columns(expr)
        .into_iter()
        .map(|c| c.alias)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{JoinKind, ScalarType};
    use crate::models::structs::ColumnType;
    use crate::query_ast::ast::{AliasArena, ColumnDeclaration};

    fn int() -> ColumnType {
        ColumnType::new("INT", ScalarType::Int32)
    }

    #[test]
    fn stops_at_nested_select() {
        let mut arena = AliasArena::new();
        let t = arena.fresh();
        let inner_t = arena.fresh();
        let outer_col = ColumnExpression::new(ScalarType::Int32, int(), t, "a");
        let inner_col = ColumnExpression::new(ScalarType::Int32, int(), inner_t, "b");
        let inner = SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("b", inner_col.clone().into_expr(), int())],
            Some(Expr::table(inner_t, "inner_table")),
            None,
        );
        let outer = SelectExpression::new(
            arena.fresh(),
            vec![
                ColumnDeclaration::new("a", outer_col.clone().into_expr(), int()),
                ColumnDeclaration::new("s", Expr::scalar_subquery(inner, ScalarType::Int32), int()),
            ],
            Some(Expr::table(t, "outer_table")),
            None,
        )
        .into_expr();

        let gathered = ReferencedColumnGatherer::gather(&outer);
        assert_eq!(gathered, vec![outer_col.clone()]);
        let all = gather_all_columns(&outer);
        assert!(all.contains(&inner_col) && all.contains(&outer_col));
    }

    #[test]
    fn declared_aliases_of_join_tree() {
        let mut arena = AliasArena::new();
        let (a, b, s) = (arena.fresh(), arena.fresh(), arena.fresh());
        let sub = SelectExpression::new(s, Vec::new(), Some(Expr::table(b, "inner")), None);
        let join = Expr::join(
            JoinKind::Cross,
            Expr::table(a, "left_table"),
            sub.into_expr(),
            None,
        );
        assert_eq!(DeclaredAliasGatherer::gather(&join), vec![a, s]);
    }
}
