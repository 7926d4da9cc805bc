use crate::models::structs::ValueError;

#[derive(thiserror::Error, Debug)]
pub enum QueryAstError {
    #[error(transparent)] Rewrite(#[from] RewriteError),
    #[error("unsupported feature: {0}")] Unsupported(&'static str),
    #[error("emit error: {0}")] Emit(String),
    #[error("invalid query tree: {0}")] Validation(String),
    #[error("config error: {0}")] Config(String),
    #[error("execution error: {0}")] Execution(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    #[error("structural precondition violated: {0}")] StructuralPrecondition(String),
    #[error("{required_by} requires {clause}")] MissingClause { clause: &'static str, required_by: &'static str },
    #[error("mapping error: {0}")] Mapping(String),
    #[error("evaluation error: {0}")] Evaluation(String),
}

impl From<ValueError> for RewriteError { fn from(e: ValueError) -> Self { RewriteError::Evaluation(e.to_string()) } }

impl From<ValueError> for QueryAstError { fn from(e: ValueError) -> Self { QueryAstError::Execution(e.to_string()) } }
