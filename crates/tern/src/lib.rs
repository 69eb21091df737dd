//! An embeddable expression language.
//!
//! Tern is a small, non-Turing-complete language for writing
//! side-effect-free predicates and projections that run inside host
//! applications: policy checks, admission controllers, request filters,
//! and config validation. A source expression is compiled once into a
//! typed program and then evaluated many times against different variable
//! bindings.
//!
//! ```
//! use tern::Bindings;
//! use tern::Env;
//! use tern::PrimitiveTypeKind;
//! use tern::Type;
//! use tern::Value;
//!
//! let env = Env::new().expect("standard declarations should install");
//! env.registry()
//!     .register_variable("name", Type::Primitive(PrimitiveTypeKind::String))
//!     .expect("variable should register");
//!
//! let program = env
//!     .compile("name.startsWith('prod-') && size(name) < 20")
//!     .expect("expression should compile");
//!
//! let activation = Bindings::new().bind("name", "prod-gateway");
//! let value = program.evaluate(&activation).expect("evaluation should succeed");
//! assert!(matches!(value, Value::Bool(true)));
//! ```
//!
//! The pipeline is split across three underlying crates: `tern-grammar`
//! (lexing and parsing), `tern-analysis` (types, registry, checking), and
//! `tern-engine` (values and evaluation). This crate ties them together
//! behind [`Env`] and [`Program`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

mod env;

pub use env::Env;
pub use env::EnvOptions;
pub use env::Issues;
pub use env::Program;
pub use tern_analysis::Registry;
pub use tern_analysis::RegistryError;
pub use tern_analysis::registry::EnumDescriptor;
pub use tern_analysis::registry::FieldDescriptor;
pub use tern_analysis::registry::FunctionDecl;
pub use tern_analysis::registry::MessageDescriptor;
pub use tern_analysis::registry::Overload;
pub use tern_analysis::types::PrimitiveTypeKind;
pub use tern_analysis::types::Type;
pub use tern_engine::Activation;
pub use tern_engine::Bindings;
pub use tern_engine::EmptyActivation;
pub use tern_engine::EvalError;
pub use tern_engine::EvaluationConfig;
pub use tern_engine::FunctionBindings;
pub use tern_engine::List;
pub use tern_engine::Map;
pub use tern_engine::MapKey;
pub use tern_engine::Message;
pub use tern_engine::OptionalValue;
pub use tern_engine::Unknown;
pub use tern_engine::Value;
pub use tern_grammar::Diagnostic;
pub use tern_grammar::Severity;
pub use tern_grammar::Source;
pub use tern_grammar::Span;
