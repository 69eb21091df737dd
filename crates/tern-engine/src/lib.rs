//! Evaluation engine for Tern expressions.
//!
//! This crate implements the back half of the pipeline: the runtime value
//! algebra, activations, function implementation bindings, and the
//! evaluator that executes a checked expression tree.
//!
//! Parsing lives in `tern-grammar` and static analysis in `tern-analysis`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod activation;
pub mod error;
pub mod eval;
pub mod functions;
pub mod value;

pub use activation::Activation;
pub use activation::Bindings;
pub use activation::EmptyActivation;
pub use error::EvalError;
pub use eval::EvaluationConfig;
pub use eval::evaluate;
pub use eval::evaluate_with_overlay;
pub use functions::CallContext;
pub use functions::FunctionBindings;
pub use value::List;
pub use value::Map;
pub use value::MapKey;
pub use value::Message;
pub use value::OptionalValue;
pub use value::Unknown;
pub use value::Value;
