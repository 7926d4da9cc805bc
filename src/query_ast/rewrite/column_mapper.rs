use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use crate::query_ast::ast::{
    AliasArena, ColumnExpression, Expr, ExprRef, SelectExpression, TableAlias, TableExpression,
};
use crate::query_ast::walker::{
    dispatch, rewrite_infallible, rewrite_select_children, walk_select, Rewriter, Visitor,
};

/// Re-points every column owned by one of `old_aliases` at `new_alias`.
pub struct ColumnMapper<'a> {
    old_aliases: &'a HashSet<TableAlias>,
    new_alias: TableAlias,
}

impl<'a> ColumnMapper<'a> {
    pub fn map(expr: &ExprRef, new_alias: TableAlias, old_aliases: &HashSet<TableAlias>) -> ExprRef {
        if old_aliases.is_empty() {
            return expr.clone();
        }
        let mut mapper = ColumnMapper {
            old_aliases,
            new_alias,
        };
        rewrite_infallible(&mut mapper, expr)
    }
}

impl Rewriter for ColumnMapper<'_> {
    type Error = Infallible;

    fn rewrite_column(
        &mut self,
        expr: &ExprRef,
        column: &ColumnExpression,
    ) -> Result<ExprRef, Infallible> {
        if self.old_aliases.contains(&column.alias) {
            Ok(column.with_alias(self.new_alias).into_expr())
        } else {
            Ok(expr.clone())
        }
    }
}

/// Copy of a subtree in which every alias it declares is replaced by a fresh one, so the copy can
/// sit next to the original in one query.
pub fn duplicate_with_fresh_aliases(arena: &mut AliasArena, expr: &ExprRef) -> ExprRef {
    struct Declared(Vec<TableAlias>);
    impl Visitor for Declared {
        fn visit_select(&mut self, select: &SelectExpression) {
            self.0.push(select.alias);
            walk_select(self, select);
        }
        fn visit_table(&mut self, table: &TableExpression) {
            self.0.push(table.alias);
        }
    }

    struct Renamer(HashMap<TableAlias, TableAlias>);
    impl Renamer {
        fn alias(&self, alias: TableAlias) -> TableAlias {
            self.0.get(&alias).copied().unwrap_or(alias)
        }
    }
    impl Rewriter for Renamer {
        type Error = Infallible;

        fn rewrite(&mut self, expr: &ExprRef) -> Result<ExprRef, Infallible> {
            if let Expr::Table(table) = &**expr {
                return Ok(Expr::table(self.alias(table.alias), &table.name));
            }
            dispatch(self, expr)
        }

        fn rewrite_select(
            &mut self,
            expr: &ExprRef,
            select: &SelectExpression,
        ) -> Result<ExprRef, Infallible> {
            let rebuilt = rewrite_select_children(self, expr, select)?;
            let mut select = rebuilt.as_select().cloned().unwrap_or_else(|| select.clone());
            select.alias = self.alias(select.alias);
            Ok(Arc::new(Expr::Select(select)))
        }

        fn rewrite_column(
            &mut self,
            expr: &ExprRef,
            column: &ColumnExpression,
        ) -> Result<ExprRef, Infallible> {
            let alias = self.alias(column.alias);
            if alias == column.alias {
                Ok(expr.clone())
            } else {
                Ok(column.with_alias(alias).into_expr())
            }
        }
    }

    let mut declared = Declared(Vec::new());
    declared.visit(expr);
    let map = declared
        .0
        .into_iter()
        .map(|alias| (alias, arena.fresh()))
        .collect();
    rewrite_infallible(&mut Renamer(map), expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScalarType;
    use crate::models::structs::ColumnType;
    use crate::query_ast::ast::ColumnDeclaration;
    use crate::query_ast::rewrite::referenced_columns::gather_all_columns;

    fn sample(arena: &mut AliasArena) -> (ExprRef, TableAlias) {
        let t = arena.fresh();
        let ty = ColumnType::new("STRING", ScalarType::String);
        let name = ColumnExpression::new(ScalarType::String, ty.clone(), t, "name").into_expr();
        let tree = SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("name", name, ty)],
            Some(Expr::table(t, "people")),
            None,
        )
        .into_expr();
        (tree, t)
    }

    #[test]
    fn empty_alias_set_is_identity() {
        let mut arena = AliasArena::new();
        let (tree, _) = sample(&mut arena);
        let mapped = ColumnMapper::map(&tree, arena.fresh(), &HashSet::new());
        assert!(Arc::ptr_eq(&tree, &mapped));
    }

    #[test]
    fn maps_owned_columns() {
        let mut arena = AliasArena::new();
        let (tree, t) = sample(&mut arena);
        let target = arena.fresh();
        let mapped = ColumnMapper::map(&tree, target, &HashSet::from([t]));
        let columns = gather_all_columns(&mapped);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].alias, target);
        assert_eq!(columns[0].name, "name");
    }

    #[test]
    fn duplicate_uses_new_aliases() {
        let mut arena = AliasArena::new();
        let (tree, t) = sample(&mut arena);
        let copy = duplicate_with_fresh_aliases(&mut arena, &tree);
        let original = tree.as_select().unwrap();
        let copied = copy.as_select().unwrap();
        assert_ne!(original.alias, copied.alias);
        let from_alias = copied.from.as_ref().and_then(|f| f.declared_alias()).unwrap();
        assert_ne!(from_alias, t);
        assert_eq!(gather_all_columns(&copy)[0].alias, from_alias);
        assert!(crate::query_ast::comparer::are_equal(&tree, &copy));
    }
}
