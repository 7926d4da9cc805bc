//! Query tree, rewrite passes and HiveQL emission.
//!
//! Entry point: [`rewrite::Translator`] (or the [`rewrite::compile`] short form).

pub mod ast;
pub mod comparer;
pub mod emitter;
pub mod errors;
pub mod executor;
pub mod executors;
pub mod language;
pub mod mapping;
pub mod partial_eval;
pub mod rewrite;
pub mod validate;
pub mod walker;

pub use errors::*;
pub use rewrite::{compile, CompiledQuery, Translator};
