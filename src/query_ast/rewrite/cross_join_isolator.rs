use std::collections::HashMap;
use std::convert::Infallible;

use log::debug;

use crate::models::enums::JoinKind;
use crate::query_ast::ast::{
    available_column_name, AliasArena, ColumnDeclaration, ColumnExpression, ExprRef,
    JoinExpression, SelectExpression,
};
use crate::query_ast::walker::{
    rewrite_infallible, rewrite_join_children, rewrite_select_children, Rewriter,
};

use super::referenced_columns::{gather_all_columns, DeclaredAliasGatherer, ReferencedColumnGatherer};

/// Puts a subquery boundary between a cross join and a conditioned join that are adjacent in one
/// join tree. The nested join is wrapped in a select that projects every column the enclosing query
/// reads from it; those references are re-pointed at the wrapper.
pub struct CrossJoinIsolator<'a> {
    arena: &'a mut AliasArena,
    columns: Vec<ColumnExpression>,
    map: HashMap<ColumnExpression, ColumnExpression>,
    last_join: Option<JoinKind>,
}

impl<'a> CrossJoinIsolator<'a> {
    pub fn isolate(arena: &'a mut AliasArena, expr: &ExprRef) -> ExprRef {
        let mut isolator = CrossJoinIsolator {
            arena,
            columns: Vec::new(),
            map: HashMap::new(),
            last_join: None,
        };
        rewrite_infallible(&mut isolator, expr)
    }

    fn make_subquery(&mut self, source: ExprRef) -> ExprRef {
        let new_alias = self.arena.fresh();
        let mut declarations: Vec<ColumnDeclaration> = Vec::new();
        let mut projected = Vec::new();
        for alias in DeclaredAliasGatherer::gather(&source) {
            for column in self.columns.iter().filter(|c| c.alias == alias) {
                let name = available_column_name(&declarations, &column.name);
                declarations.push(ColumnDeclaration::new(
                    name.clone(),
                    column.clone().into_expr(),
                    column.column_type.clone(),
                ));
                let new_column = ColumnExpression::new(
                    column.scalar_type,
                    column.column_type.clone(),
                    new_alias,
                    name,
                );
                self.map.insert(column.clone(), new_column.clone());
                projected.push(new_column);
            }
        }
        debug!(
            "isolated join behind {} projecting {} columns",
            new_alias,
            projected.len()
        );
        // An enclosing wrapper sees these columns under the new alias.
        self.columns.extend(projected);
        SelectExpression::new(new_alias, declarations, Some(source), None).into_expr()
    }
}

fn is_cross(kind: JoinKind) -> bool {
    kind == JoinKind::Cross
}

impl Rewriter for CrossJoinIsolator<'_> {
    type Error = Infallible;

    fn rewrite_select(
        &mut self,
        expr: &ExprRef,
        select: &SelectExpression,
    ) -> Result<ExprRef, Infallible> {
        let mut columns = ReferencedColumnGatherer::gather(expr);
        // correlated references from nested queries
        for column in gather_all_columns(expr) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        let save_columns = std::mem::replace(&mut self.columns, columns);
        let save_last_join = self.last_join.take();
        let result = rewrite_select_children(self, expr, select);
        self.columns = save_columns;
        self.last_join = save_last_join;
        result
    }

    fn rewrite_join(
        &mut self,
        expr: &ExprRef,
        join: &JoinExpression,
    ) -> Result<ExprRef, Infallible> {
        let save_last_join = self.last_join.replace(join.kind);
        let result = rewrite_join_children(self, expr, join)?;
        self.last_join = save_last_join;
        match self.last_join {
            Some(parent) if is_cross(join.kind) != is_cross(parent) => Ok(self.make_subquery(result)),
            _ => Ok(result),
        }
    }

    fn rewrite_column(
        &mut self,
        expr: &ExprRef,
        column: &ColumnExpression,
    ) -> Result<ExprRef, Infallible> {
        let Some(mut mapped) = self.map.get(column) else {
            return Ok(expr.clone());
        };
        while let Some(next) = self.map.get(mapped) {
            mapped = next;
        }
        Ok(mapped.clone().into_expr())
    }
}
