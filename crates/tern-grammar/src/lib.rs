//! Lexing and parsing for Tern expressions.
//!
//! Tern is a small, non-Turing-complete expression language for writing
//! side-effect-free predicates and projections that run inside host
//! applications. This crate implements the front half of the pipeline:
//! source handling and diagnostics, the lexer, and a recovering parser that
//! produces an arena-allocated expression tree with stable node ids.
//!
//! Type checking lives in `tern-analysis` and evaluation in `tern-engine`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod ast;
mod diagnostic;
pub mod lexer;
pub mod parser;
mod source;

pub use diagnostic::Diagnostic;
pub use diagnostic::Label;
pub use diagnostic::Severity;
pub use diagnostic::Span;
pub use parser::ParseResult;
pub use parser::ParserOptions;
pub use parser::parse;
pub use parser::parse_with_options;
pub use source::Location;
pub use source::Source;
