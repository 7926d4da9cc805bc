//! Rewrite passes and the translation pipeline that chains them.

pub mod aggregate_checker;
pub mod apply_join;
pub mod column_mapper;
pub mod cross_join_isolator;
pub mod named_values;
pub mod order_by;
pub mod redundant_join_remover;
pub mod referenced_columns;
pub mod relationship_binder;
pub mod skip_to_nested_order_by;
pub mod skip_to_row_number;

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::models::structs::Value;

use super::ast::{AliasArena, Expr, ExprRef, NamedValueExpression};
use super::emitter::dialect::{get_dialect, SqlDialect};
use super::emitter::{emit_hiveql, pretty};
use super::errors::QueryAstError;
use super::language::QueryLanguage;
use super::mapping::{NoMapping, QueryMapping};
use super::validate::check_alias_scopes;

use apply_join::ApplyJoinRewriter;
use cross_join_isolator::CrossJoinIsolator;
use named_values::NamedValueGatherer;
use redundant_join_remover::RedundantJoinRemover;
use relationship_binder::RelationshipBinder;
use skip_to_nested_order_by::SkipToNestedOrderByRewriter;
use skip_to_row_number::SkipToRowNumberRewriter;

pub(crate) fn is_constant_zero(expr: &ExprRef) -> bool {
    matches!(&**expr, Expr::Constant(value) if value.as_i64() == Some(0))
}

/// Rewritten tree plus the parameters it expects, in first-occurrence order.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub tree: ExprRef,
    pub parameters: Vec<NamedValueExpression>,
}

impl CompiledQuery {
    pub fn to_hiveql(&self, dialect: &dyn SqlDialect) -> Result<String, QueryAstError> {
        emit_hiveql(&self.tree, dialect)
    }

    /// Same as [`to_hiveql`](Self::to_hiveql), formatted for display.
    pub fn to_pretty_hiveql(&self, dialect: &dyn SqlDialect) -> Result<String, QueryAstError> {
        Ok(pretty(&self.to_hiveql(dialect)?))
    }

    /// Parameter names that `values` does not bind.
    pub fn unbound_parameters<'p>(
        &'p self,
        values: &HashMap<String, Value>,
    ) -> Vec<&'p str> {
        self.parameters
            .iter()
            .filter(|p| !values.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect()
    }
}

pub struct Translator<'a> {
    language: &'a dyn QueryLanguage,
    mapping: &'a dyn QueryMapping,
    config: CompilerConfig,
}

impl<'a> Translator<'a> {
    pub fn new(
        language: &'a dyn QueryLanguage,
        mapping: &'a dyn QueryMapping,
        mut config: CompilerConfig,
    ) -> Self {
        if config.dialect != language.kind() {
            warn!(
                "configured dialect {:?} overridden by the query language ({:?})",
                config.dialect,
                language.kind()
            );
            config.dialect = language.kind();
        }
        Self {
            language,
            mapping,
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Emits `compiled` in the query language's dialect and the configured layout.
    pub fn render(&self, compiled: &CompiledQuery) -> Result<String, QueryAstError> {
        let dialect = get_dialect(&self.language.kind());
        if self.config.pretty_print {
            compiled.to_pretty_hiveql(dialect.as_ref())
        } else {
            compiled.to_hiveql(dialect.as_ref())
        }
    }

    /// Runs every pass over `query`. The first failing pass aborts the translation.
    pub fn compile(
        &self,
        arena: &mut AliasArena,
        query: &ExprRef,
    ) -> Result<CompiledQuery, QueryAstError> {
        let (mut tree, lookups) =
            RelationshipBinder::bind_with_lookups(arena, self.language, self.mapping, query)?;

        if self.config.rewrite_apply_joins {
            tree = ApplyJoinRewriter::rewrite_applies(&tree)?;
        }
        if self.config.remove_redundant_joins {
            tree = RedundantJoinRemover::remove(&tree, &lookups);
        }
        let isolate = self
            .config
            .isolate_cross_joins
            .unwrap_or(!self.language.allows_mixed_cross_joins());
        if isolate {
            tree = CrossJoinIsolator::isolate(arena, &tree);
        }

        tree = if self.language.allows_row_number() {
            SkipToRowNumberRewriter::rewrite_paging(arena, self.language, &tree)?
        } else {
            SkipToNestedOrderByRewriter::rewrite_paging(arena, self.language, &tree)?
        };
        debug!("pagination lowered for {:?}", self.language.kind());

        if self.config.verify_alias_scopes {
            check_alias_scopes(&tree)?;
        }

        let parameters = NamedValueGatherer::gather(&tree);
        info!(
            "compiled query with {} parameter(s) ({} aliases)",
            parameters.len(),
            arena.len()
        );
        Ok(CompiledQuery { tree, parameters })
    }
}

/// [`Translator::compile`] without a relationship mapping, under the default configuration.
pub fn compile(
    arena: &mut AliasArena,
    query: &ExprRef,
    language: &dyn QueryLanguage,
) -> Result<CompiledQuery, QueryAstError> {
    Translator::new(language, &NoMapping, CompilerConfig::default()).compile(arena, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{DialectKind, ScalarType};
    use crate::query_ast::ast::{ColumnDeclaration, ColumnExpression, SelectExpression};
    use crate::query_ast::errors::RewriteError;
    use crate::query_ast::language::get_language;

    fn filtered(arena: &mut AliasArena) -> ExprRef {
        let t = arena.fresh();
        let ty = crate::models::structs::ColumnType::new("STRING", ScalarType::String);
        let state = ColumnExpression::new(ScalarType::String, ty.clone(), t, "state").into_expr();
        SelectExpression::new(
            arena.fresh(),
            vec![ColumnDeclaration::new("state", state.clone(), ty)],
            Some(Expr::table(t, "clients")),
            Some(Expr::eq(state, Expr::named_value("state", ScalarType::String))),
        )
        .into_expr()
    }

    #[test]
    fn parameters_are_collected() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let tree = filtered(&mut arena);
        let compiled = compile(&mut arena, &tree, language.as_ref()).unwrap();
        assert_eq!(compiled.parameters.len(), 1);
        assert_eq!(compiled.parameters[0].name, "state");
        let values = HashMap::new();
        assert_eq!(compiled.unbound_parameters(&values), vec!["state"]);
    }

    #[test]
    fn failing_pass_aborts_translation() {
        let language = get_language(DialectKind::HiveWindowing);
        let mut arena = AliasArena::new();
        let tree = filtered(&mut arena);
        let paged = tree
            .as_select()
            .unwrap()
            .clone()
            .set_skip(Some(Expr::constant(5)))
            .into_expr();
        let err = compile(&mut arena, &paged, language.as_ref()).unwrap_err();
        assert!(matches!(
            err,
            QueryAstError::Rewrite(RewriteError::MissingClause { .. })
        ));
    }

    #[test]
    fn rendering_follows_the_query_language() {
        let language = get_language(DialectKind::HiveWindowing);
        let config = CompilerConfig {
            dialect: DialectKind::Hive,
            ..CompilerConfig::default()
        };
        let translator = Translator::new(language.as_ref(), &NoMapping, config);
        assert_eq!(translator.config().dialect, DialectKind::HiveWindowing);

        let mut arena = AliasArena::new();
        let tree = filtered(&mut arena);
        let select = tree.as_select().unwrap();
        let order = select.columns[0].expression.clone();
        let paged = select
            .clone()
            .set_order_by(vec![crate::query_ast::ast::OrderExpression::asc(order)])
            .set_skip(Some(Expr::constant(5)))
            .set_take(Some(Expr::constant(10)))
            .into_expr();
        let compiled = translator.compile(&mut arena, &paged).unwrap();
        let sql = translator.render(&compiled).unwrap();
        assert!(sql.contains("ROW_NUMBER() OVER"), "{}", sql);
    }

    #[test]
    fn zero_detection() {
        assert!(is_constant_zero(&Expr::constant(0)));
        assert!(!is_constant_zero(&Expr::constant(3)));
        assert!(!is_constant_zero(&Expr::named_value("n", ScalarType::Int64)));
    }
}
