//! Backend-agnostic execution of compiled trees.

use std::collections::HashMap;

use super::ast::ExprRef;
use super::errors::QueryAstError;
use super::rewrite::CompiledQuery;
use crate::models::structs::Value;

/// Result of query execution: (headers, rows)
pub type QueryResult = (Vec<String>, Vec<Vec<Value>>);

/// Runs a query tree and hands back its rows in result order.
///
/// Parameters are bound by name; a tree that reads an unbound parameter fails with
/// [`QueryAstError::Execution`].
pub trait QueryExecutor: Send + Sync {
    fn execute(
        &self,
        tree: &ExprRef,
        parameters: &HashMap<String, Value>,
    ) -> Result<QueryResult, QueryAstError>;

    /// Executes a compiled query after checking every parameter it expects is bound.
    fn execute_compiled(
        &self,
        query: &CompiledQuery,
        parameters: &HashMap<String, Value>,
    ) -> Result<QueryResult, QueryAstError> {
        let missing = query.unbound_parameters(parameters);
        if !missing.is_empty() {
            return Err(QueryAstError::Execution(format!(
                "unbound parameter(s): {}",
                missing.join(", ")
            )));
        }
        self.execute(&query.tree, parameters)
    }
}
