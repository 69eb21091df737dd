//! Static analysis of Tern expressions.
//!
//! This crate implements the middle of the pipeline: the type lattice, the
//! declaration registry, the standard declaration set, and the type checker
//! that annotates every expression node with an inferred type and resolved
//! reference.
//!
//! Parsing lives in `tern-grammar` and evaluation in `tern-engine`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod check;
pub mod diagnostics;
pub mod registry;
pub mod stdlib;
pub mod types;

pub use check::CheckResult;
pub use check::CheckedAst;
pub use check::CheckerOptions;
pub use check::Reference;
pub use check::check;
pub use registry::FrozenRegistry;
pub use registry::Registry;
pub use registry::RegistryError;
