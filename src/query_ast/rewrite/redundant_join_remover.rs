use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use log::{debug, trace};

use crate::models::enums::JoinKind;
use crate::query_ast::ast::{ColumnExpression, ExprRef, JoinExpression, TableAlias};
use crate::query_ast::comparer::{are_equal, are_equal_with_scope, AliasScope};
use crate::query_ast::walker::{rewrite_infallible, rewrite_join_children, Rewriter};

/// Drops a join whose right side repeats one already joined earlier in the same join tree under an
/// equivalent condition, and re-points the dropped side's columns at the surviving one.
///
/// Only right sides listed in `lookups` take part: sources known to match at most one row per left
/// row, such as the singleton relationship lookups recorded by
/// [`RelationshipBinder`](super::relationship_binder::RelationshipBinder). Any other repeated join
/// may multiply rows and is kept. Cross joins are never collapsed.
pub struct RedundantJoinRemover<'a> {
    lookups: &'a HashSet<TableAlias>,
    map: HashMap<TableAlias, TableAlias>,
}

impl<'a> RedundantJoinRemover<'a> {
    pub fn remove(expr: &ExprRef, lookups: &'a HashSet<TableAlias>) -> ExprRef {
        let mut remover = RedundantJoinRemover {
            lookups,
            map: HashMap::new(),
        };
        rewrite_infallible(&mut remover, expr)
    }

    /// First equivalent right side, searching the left spine before the right one.
    fn find_similar_right(
        &self,
        join: Option<&JoinExpression>,
        compare_to: &JoinExpression,
    ) -> Option<TableAlias> {
        let join = join?;
        if join.kind == compare_to.kind
            && join.right.kind_name() == compare_to.right.kind_name()
            && let (Some(existing), Some(candidate)) =
                (join.right.declared_alias(), compare_to.right.declared_alias())
            && self.lookups.contains(&existing)
            && are_equal(&join.right, &compare_to.right)
        {
            let same_condition = match (&join.condition, &compare_to.condition) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    Arc::ptr_eq(a, b)
                        || are_equal_with_scope(&AliasScope::from([(existing, candidate)]), a, b)
                }
                _ => false,
            };
            if same_condition {
                return Some(existing);
            }
        }
        self.find_similar_right(join.left.as_join(), compare_to)
            .or_else(|| self.find_similar_right(join.right.as_join(), compare_to))
    }
}

impl Rewriter for RedundantJoinRemover<'_> {
    type Error = Infallible;

    fn rewrite_join(
        &mut self,
        expr: &ExprRef,
        join: &JoinExpression,
    ) -> Result<ExprRef, Infallible> {
        let result = rewrite_join_children(self, expr, join)?;
        let Some(join) = result.as_join() else {
            return Ok(result);
        };
        if join.kind == JoinKind::Cross {
            return Ok(result);
        }
        let Some(right_alias) = join.right.declared_alias() else {
            return Ok(result);
        };
        if !self.lookups.contains(&right_alias) {
            trace!("join of {} is not a single-row lookup, kept", right_alias);
            return Ok(result);
        }
        if let Some(existing) = self.find_similar_right(join.left.as_join(), join) {
            debug!("removed redundant join of {} (same as {})", right_alias, existing);
            self.map.insert(right_alias, existing);
            return Ok(join.left.clone());
        }
        Ok(result)
    }

    fn rewrite_column(
        &mut self,
        expr: &ExprRef,
        column: &ColumnExpression,
    ) -> Result<ExprRef, Infallible> {
        match self.map.get(&column.alias) {
            Some(mapped) => Ok(column.with_alias(*mapped).into_expr()),
            None => Ok(expr.clone()),
        }
    }
}
