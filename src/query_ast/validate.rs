//! Structural checks run over rewritten trees.

use std::collections::HashSet;

use log::trace;

use super::ast::{
    ColumnExpression, ExprRef, JoinExpression, ProjectionExpression, SelectExpression, TableAlias,
};
use super::errors::QueryAstError;
use super::rewrite::referenced_columns::DeclaredAliasGatherer;
use super::walker::{walk, walk_select, Visitor};

/// Fails when a column reads an alias that is not in scope at its position: declared by the FROM of
/// an enclosing select, by the left side of an enclosing apply, or by either side of the join whose
/// condition holds it.
pub fn check_alias_scopes(tree: &ExprRef) -> Result<(), QueryAstError> {
    let mut checker = ScopeChecker {
        scopes: vec![HashSet::new()],
        error: None,
    };
    checker.visit(tree);
    match checker.error {
        Some(message) => Err(QueryAstError::Validation(message)),
        None => Ok(()),
    }
}

struct ScopeChecker {
    scopes: Vec<HashSet<TableAlias>>,
    error: Option<String>,
}

impl ScopeChecker {
    fn current(&self) -> HashSet<TableAlias> {
        self.scopes.last().cloned().unwrap_or_default()
    }

    fn with_scope(&mut self, extra: impl IntoIterator<Item = TableAlias>, f: impl FnOnce(&mut Self)) {
        let mut scope = self.current();
        scope.extend(extra);
        self.scopes.push(scope);
        f(self);
        self.scopes.pop();
    }
}

impl Visitor for ScopeChecker {
    fn visit(&mut self, expr: &ExprRef) {
        if self.error.is_none() {
            walk(self, expr);
        }
    }

    fn visit_select(&mut self, select: &SelectExpression) {
        let declared = match &select.from {
            Some(from) => {
                self.visit(from);
                DeclaredAliasGatherer::gather(from)
            }
            None => Vec::new(),
        };
        self.with_scope(declared, |checker| {
            let body = select.clone().set_from(None);
            walk_select(checker, &body);
        });
    }

    fn visit_join(&mut self, join: &JoinExpression) {
        self.visit(&join.left);
        let left = DeclaredAliasGatherer::gather(&join.left);
        if join.kind.is_apply() {
            self.with_scope(left.clone(), |checker| checker.visit(&join.right));
        } else {
            self.visit(&join.right);
        }
        if let Some(condition) = &join.condition {
            let right = DeclaredAliasGatherer::gather(&join.right);
            self.with_scope(left.into_iter().chain(right), |checker| checker.visit(condition));
        }
    }

    fn visit_projection(&mut self, projection: &ProjectionExpression) {
        self.visit(&projection.select);
        let declared = projection.select.declared_alias();
        self.with_scope(declared, |checker| checker.visit(&projection.projector));
    }

    fn visit_column(&mut self, column: &ColumnExpression) {
        let in_scope = self
            .scopes
            .last()
            .is_some_and(|scope| scope.contains(&column.alias));
        if !in_scope && self.error.is_none() {
            trace!("column {}.{} escapes its scope", column.alias, column.name);
            self.error = Some(format!(
                "column '{}' references alias {} which is not in scope",
                column.name, column.alias
            ));
        }
    }
}
