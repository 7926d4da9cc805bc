//! HiveQL text conventions.
//!
//! The tree-level facts a rewrite needs live in [`QueryLanguage`](crate::query_ast::language::QueryLanguage);
//! this trait only covers how things are spelled.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::super::errors::QueryAstError;
use crate::models::enums::{DialectKind, JoinKind};

static PLAIN_IDENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "all", "and", "as", "asc", "between", "by", "case", "cluster", "cross", "current", "date",
        "desc", "distinct", "distribute", "else", "end", "exists", "false", "from", "full",
        "function", "group", "having", "in", "inner", "insert", "interval", "into", "is", "join",
        "left", "like", "limit", "not", "null", "on", "or", "order", "outer", "over", "partition",
        "range", "right", "rows", "select", "sort", "table", "then", "time", "timestamp", "to",
        "true", "union", "user", "values", "when", "where", "with",
    ]
    .into_iter()
    .collect()
});

/// Spelling rules of one HiveQL flavour.
pub trait SqlDialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Quote an identifier when it is not a plain word or collides with a keyword.
    fn quote_ident(&self, ident: &str) -> String {
        let plain = PLAIN_IDENT.as_ref().is_some_and(|re| re.is_match(ident));
        if plain && !RESERVED.contains(ident.to_ascii_lowercase().as_str()) {
            ident.to_string()
        } else {
            format!("`{}`", ident.replace('`', "``"))
        }
    }

    /// Hive escapes inside string literals with a backslash.
    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    fn emit_boolean(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    fn emit_null(&self) -> String {
        "NULL".to_string()
    }

    /// Parameters are bound through variable substitution.
    fn emit_parameter(&self, name: &str) -> String {
        format!("${{hiveconf:{}}}", name)
    }

    fn emit_limit(&self, limit: u64) -> String {
        format!(" LIMIT {}", limit)
    }

    fn emit_join_kind(&self, kind: JoinKind) -> Result<&'static str, QueryAstError> {
        match kind {
            JoinKind::Inner => Ok("JOIN"),
            JoinKind::Cross => Ok("CROSS JOIN"),
            JoinKind::LeftOuter => Ok("LEFT OUTER JOIN"),
            JoinKind::CrossApply | JoinKind::OuterApply => Err(QueryAstError::Unsupported(
                "APPLY joins have no HiveQL spelling",
            )),
        }
    }

    fn supports_window_functions(&self) -> bool {
        matches!(self.kind(), DialectKind::HiveWindowing)
    }
}

/// Classic Hive
pub struct HiveDialect;

impl SqlDialect for HiveDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Hive
    }
}

/// Hive 0.11+ with windowing functions
pub struct HiveWindowingDialect;

impl SqlDialect for HiveWindowingDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::HiveWindowing
    }
}

pub fn get_dialect(kind: &DialectKind) -> Box<dyn SqlDialect> {
    match kind {
        DialectKind::Hive => Box::new(HiveDialect),
        DialectKind::HiveWindowing => Box::new(HiveWindowingDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_quoted_only_when_needed() {
        let d = HiveDialect;
        assert_eq!(d.quote_ident("clientid"), "clientid");
        assert_eq!(d.quote_ident("_rownum"), "_rownum");
        assert_eq!(d.quote_ident("order"), "`order`");
        assert_eq!(d.quote_ident("first name"), "`first name`");
    }

    #[test]
    fn strings_use_backslash_escapes() {
        assert_eq!(HiveDialect.quote_string("it's"), r"'it\'s'");
    }

    #[test]
    fn parameters_are_hiveconf_variables() {
        assert_eq!(HiveDialect.emit_parameter("state"), "${hiveconf:state}");
    }

    #[test]
    fn windowing_follows_kind() {
        assert!(!get_dialect(&DialectKind::Hive).supports_window_functions());
        assert!(get_dialect(&DialectKind::HiveWindowing).supports_window_functions());
    }
}
