//! Relational query compiler targeting HiveQL.
//!
//! A query arrives as an immutable tree ([`query_ast::ast`]), is lowered by a fixed sequence of
//! rewrite passes into shapes Hive can express, and leaves as a tree plus its parameter list
//! ([`query_ast::rewrite::CompiledQuery`]) ready for text emission.

pub mod config;
pub mod models;
pub mod query_ast;
