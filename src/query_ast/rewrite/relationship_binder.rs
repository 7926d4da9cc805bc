use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};

use crate::models::enums::JoinKind;
use crate::query_ast::ast::{AliasArena, Expr, ExprRef, SelectExpression, TableAlias};
use crate::query_ast::errors::RewriteError;
use crate::query_ast::language::QueryLanguage;
use crate::query_ast::mapping::{bind_member, QueryMapping};
use crate::query_ast::walker::{
    rewrite_declarations, rewrite_list, rewrite_opt, rewrite_orderings, same_opt, Rewriter,
};

/// Lowers navigation over mapped relationships. A singleton relationship reached inside a select is
/// folded into that select's FROM as an OUTER APPLY; a collection relationship becomes a nested
/// projection.
pub struct RelationshipBinder<'a> {
    arena: &'a mut AliasArena,
    language: &'a dyn QueryLanguage,
    mapping: &'a dyn QueryMapping,
    /// FROM of every select being rebuilt, innermost last.
    from_stack: Vec<Option<ExprRef>>,
    /// Aliases of the singleton lookups folded into a FROM.
    lookups: HashSet<TableAlias>,
}

impl<'a> RelationshipBinder<'a> {
    pub fn bind(
        arena: &'a mut AliasArena,
        language: &'a dyn QueryLanguage,
        mapping: &'a dyn QueryMapping,
        expr: &ExprRef,
    ) -> Result<ExprRef, RewriteError> {
        Self::bind_with_lookups(arena, language, mapping, expr).map(|(tree, _)| tree)
    }

    /// Like [`bind`](Self::bind), also returning the aliases of the selects that were folded in for
    /// singleton relationships. Each matches at most one row per row of the FROM it joins.
    pub fn bind_with_lookups(
        arena: &'a mut AliasArena,
        language: &'a dyn QueryLanguage,
        mapping: &'a dyn QueryMapping,
        expr: &ExprRef,
    ) -> Result<(ExprRef, HashSet<TableAlias>), RewriteError> {
        let mut binder = RelationshipBinder {
            arena,
            language,
            mapping,
            from_stack: Vec::new(),
            lookups: HashSet::new(),
        };
        let tree = binder.rewrite(expr)?;
        Ok((tree, binder.lookups))
    }

    /// Every clause except FROM, which the caller owns.
    fn rewrite_body(
        &mut self,
        select: &SelectExpression,
    ) -> Result<(SelectExpression, bool), RewriteError> {
        let where_clause = rewrite_opt(self, &select.where_clause)?;
        let (order_by, order_changed) = rewrite_orderings(self, &select.order_by)?;
        let (group_by, group_changed) = rewrite_list(self, &select.group_by)?;
        let (cluster_by, cluster_changed) = rewrite_list(self, &select.cluster_by)?;
        let skip = rewrite_opt(self, &select.skip)?;
        let take = rewrite_opt(self, &select.take)?;
        let (columns, columns_changed) = rewrite_declarations(self, &select.columns)?;
        let changed = !same_opt(&where_clause, &select.where_clause)
            || order_changed
            || group_changed
            || cluster_changed
            || !same_opt(&skip, &select.skip)
            || !same_opt(&take, &select.take)
            || columns_changed;
        Ok((
            SelectExpression {
                alias: select.alias,
                columns,
                from: select.from.clone(),
                where_clause,
                order_by,
                group_by,
                is_distinct: select.is_distinct,
                skip,
                take,
                is_reverse: select.is_reverse,
                cluster_by,
            },
            changed,
        ))
    }
}

impl Rewriter for RelationshipBinder<'_> {
    type Error = RewriteError;

    fn rewrite_select(
        &mut self,
        expr: &ExprRef,
        select: &SelectExpression,
    ) -> Result<ExprRef, RewriteError> {
        let from = rewrite_opt(self, &select.from)?;
        self.from_stack.push(from);
        let body = self.rewrite_body(select);
        let current_from = self.from_stack.pop().flatten();
        let (mut rebuilt, body_changed) = body?;

        if !body_changed && same_opt(&current_from, &select.from) {
            return Ok(expr.clone());
        }
        rebuilt.from = current_from;
        Ok(rebuilt.into_expr())
    }

    fn rewrite_member(
        &mut self,
        expr: &ExprRef,
        source: &ExprRef,
        member: &str,
    ) -> Result<ExprRef, RewriteError> {
        let new_source = self.rewrite(source)?;

        if let Expr::Entity(entity) = &*new_source
            && self.mapping.is_relationship(&entity.entity, member)
        {
            let related = self.mapping.member_expression(
                self.arena,
                self.language,
                &new_source,
                &entity.entity,
                member,
            )?;
            let related = self.rewrite(&related)?;
            let Expr::Projection(projection) = &*related else {
                return Err(RewriteError::Mapping(format!(
                    "relationship '{}.{}' did not produce a projection",
                    entity.entity.name, member
                )));
            };

            let singleton = self.mapping.is_singleton_relationship(&entity.entity, member);
            if singleton && let Some(Some(current)) = self.from_stack.last() {
                let projection = self.language.add_outer_join_test(projection);
                if let Some(alias) = projection.select.declared_alias() {
                    self.lookups.insert(alias);
                }
                let new_from = Expr::join(
                    JoinKind::OuterApply,
                    current.clone(),
                    projection.select.clone(),
                    None,
                );
                debug!(
                    "folded relationship '{}.{}' into FROM as OUTER APPLY",
                    entity.entity.name, member
                );
                if let Some(top) = self.from_stack.last_mut() {
                    *top = Some(new_from);
                }
                return Ok(projection.projector);
            }
            trace!("relationship '{}.{}' kept as nested projection", entity.entity.name, member);
            return Ok(related);
        }

        let result = bind_member(&new_source, member);
        if let Expr::Member {
            source: bound_source,
            member: bound_member,
        } = &*result
            && bound_member == member
            && (Arc::ptr_eq(bound_source, source) || Arc::ptr_eq(&new_source, source))
        {
            return Ok(expr.clone());
        }
        Ok(result)
    }
}
