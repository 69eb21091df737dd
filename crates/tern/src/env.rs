//! Implementation of the compilation environment.

use std::fmt;
use std::sync::Arc;

use tern_analysis::check::CheckedAst;
use tern_analysis::check::CheckerOptions;
use tern_analysis::check::check;
use tern_analysis::registry::FrozenRegistry;
use tern_analysis::registry::Registry;
use tern_analysis::registry::RegistryError;
use tern_analysis::stdlib::STDLIB;
use tern_engine::Activation;
use tern_engine::EvalError;
use tern_engine::EvaluationConfig;
use tern_engine::FunctionBindings;
use tern_engine::Value;
use tern_engine::evaluate_with_overlay;
use tern_grammar::Diagnostic;
use tern_grammar::ParserOptions;
use tern_grammar::Severity;
use tern_grammar::Source;
use tern_grammar::parse_with_options;

/// Represents the options to a compilation environment.
#[derive(Debug, Clone)]
pub struct EnvOptions {
    /// The container namespace used to resolve unqualified identifiers.
    pub container: String,
    /// Whether list elements and map keys/values must unify to a common
    /// type.
    pub homogeneous_aggregate_literals: bool,
    /// Whether declarations are validated when the registry is frozen at
    /// compilation.
    pub eager_declaration_validation: bool,
    /// The maximum number of comprehension iterations per evaluation.
    ///
    /// A limit of zero disables comprehensions, which is then rejected
    /// statically by the checker.
    pub comprehension_iteration_limit: u64,
    /// The maximum comprehension nesting depth, enforced statically.
    pub comprehension_nesting_limit: usize,
    /// The timezone used by time-component functions when no zone argument
    /// is provided.
    pub default_utc_timezone: String,
    /// The maximum expression nesting depth accepted by the parser.
    pub max_nesting_depth: usize,
    /// The maximum number of expression nodes in a program.
    ///
    /// A limit of zero means the program size is unbounded.
    pub max_program_nodes: usize,
}

impl Default for EnvOptions {
    fn default() -> Self {
        let parser = ParserOptions::default();
        let checker = CheckerOptions::default();
        let evaluation = EvaluationConfig::default();
        Self {
            container: checker.container,
            homogeneous_aggregate_literals: checker.homogeneous_aggregate_literals,
            eager_declaration_validation: false,
            comprehension_iteration_limit: evaluation.comprehension_iteration_limit,
            comprehension_nesting_limit: checker.comprehension_nesting_limit,
            default_utc_timezone: evaluation.default_utc_timezone,
            max_nesting_depth: parser.max_nesting_depth,
            max_program_nodes: parser.max_nodes,
        }
    }
}

/// Represents a compilation environment.
///
/// An environment owns the declaration registry and the configuration
/// options; [`Env::compile`] freezes the registry and produces
/// independently evaluable [`Program`]s.
#[derive(Debug)]
pub struct Env {
    /// The declaration registry.
    registry: Registry,
    /// The environment options.
    options: EnvOptions,
}

impl Env {
    /// Creates a new environment with the standard declarations installed.
    pub fn new() -> Result<Self, RegistryError> {
        let registry = Registry::new();
        STDLIB.install(&registry)?;
        Ok(Self {
            registry,
            options: EnvOptions::default(),
        })
    }

    /// Creates a new environment with the given options.
    pub fn with_options(options: EnvOptions) -> Result<Self, RegistryError> {
        let mut env = Self::new()?;
        env.options = options;
        Ok(env)
    }

    /// Gets the registry of the environment for registering declarations.
    ///
    /// The registry is append-only; compilation freezes a snapshot of it.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gets the options of the environment.
    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    /// Sets the container namespace for identifier resolution.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.options.container = container.into();
        self
    }

    /// Requires aggregate literals to be homogeneous.
    pub fn with_homogeneous_aggregate_literals(mut self) -> Self {
        self.options.homogeneous_aggregate_literals = true;
        self
    }

    /// Enables eager declaration validation at compilation.
    pub fn with_eager_declaration_validation(mut self) -> Self {
        self.options.eager_declaration_validation = true;
        self
    }

    /// Sets the comprehension iteration limit.
    pub fn with_comprehension_iteration_limit(mut self, limit: u64) -> Self {
        self.options.comprehension_iteration_limit = limit;
        self
    }

    /// Sets the comprehension nesting limit.
    pub fn with_comprehension_nesting_limit(mut self, limit: usize) -> Self {
        self.options.comprehension_nesting_limit = limit;
        self
    }

    /// Sets the default timezone for time-component functions.
    pub fn with_default_utc_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.options.default_utc_timezone = timezone.into();
        self
    }

    /// Compiles a source expression into a program.
    ///
    /// Compilation parses and checks the expression; all syntax and
    /// semantic diagnostics accumulate into the returned [`Issues`].
    pub fn compile(&self, source: &str) -> Result<Program, Issues> {
        tracing::debug!(len = source.len(), "compiling expression");

        let registry = if self.options.eager_declaration_validation {
            match self.registry.freeze_validated() {
                Ok(registry) => registry,
                Err(e) => {
                    return Err(Issues {
                        source: Source::new(source),
                        diagnostics: vec![Diagnostic::error(e.to_string())],
                    });
                }
            }
        } else {
            self.registry.freeze()
        };

        let parser_options = ParserOptions {
            max_nesting_depth: self.options.max_nesting_depth,
            max_nodes: self.options.max_program_nodes,
        };
        let parsed = parse_with_options(source, &parser_options);
        let mut diagnostics = parsed.diagnostics;

        let checker_options = CheckerOptions {
            container: self.options.container.clone(),
            homogeneous_aggregate_literals: self.options.homogeneous_aggregate_literals,
            comprehension_nesting_limit: self.options.comprehension_nesting_limit,
            comprehensions_enabled: self.options.comprehension_iteration_limit > 0,
        };
        let result = check(parsed.ast, &registry, &checker_options);
        diagnostics.extend(result.diagnostics);

        if diagnostics
            .iter()
            .any(|d| d.severity() == Severity::Error)
        {
            return Err(Issues {
                source: Source::new(source),
                diagnostics,
            });
        }

        Ok(Program {
            checked: Arc::new(result.checked),
            registry: Arc::new(registry),
            config: EvaluationConfig {
                comprehension_iteration_limit: self.options.comprehension_iteration_limit,
                default_utc_timezone: self.options.default_utc_timezone.clone(),
                cancellation: None,
            },
        })
    }
}

/// Represents a compiled, checked program.
///
/// Programs are immutable and cheap to clone; a single program may be
/// evaluated concurrently from multiple threads, each with its own
/// activation.
#[derive(Debug, Clone)]
pub struct Program {
    /// The checked expression tree.
    checked: Arc<CheckedAst>,
    /// The frozen registry snapshot the program was compiled against.
    registry: Arc<FrozenRegistry>,
    /// The base evaluation configuration from the environment.
    config: EvaluationConfig,
}

impl Program {
    /// Evaluates the program against an activation.
    pub fn evaluate(&self, activation: &dyn Activation) -> Result<Value, Arc<EvalError>> {
        evaluate_with_overlay(&self.checked, &self.registry, activation, None, &self.config)
    }

    /// Evaluates the program with an explicit evaluation configuration.
    ///
    /// This is how callers attach a cancellation signal or tighten the
    /// iteration limit for a single evaluation.
    pub fn evaluate_with_config(
        &self,
        activation: &dyn Activation,
        config: &EvaluationConfig,
    ) -> Result<Value, Arc<EvalError>> {
        evaluate_with_overlay(&self.checked, &self.registry, activation, None, config)
    }

    /// Evaluates the program with an overlay of function implementations.
    pub fn evaluate_with_overlay(
        &self,
        activation: &dyn Activation,
        overlay: &FunctionBindings,
    ) -> Result<Value, Arc<EvalError>> {
        evaluate_with_overlay(
            &self.checked,
            &self.registry,
            activation,
            Some(overlay),
            &self.config,
        )
    }

    /// Gets the checked expression tree of the program.
    pub fn checked(&self) -> &CheckedAst {
        &self.checked
    }
}

/// Represents the diagnostics of a failed compilation.
///
/// Rendering the issues with `Display` produces the caret-underlined
/// snippet format.
#[derive(Debug)]
pub struct Issues {
    /// The source the diagnostics were produced against.
    source: Source,
    /// The accumulated diagnostics.
    diagnostics: Vec<Diagnostic>,
}

impl Issues {
    /// Gets the diagnostics of the failed compilation.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Gets the source the diagnostics were produced against.
    pub fn source(&self) -> &Source {
        &self.source
    }
}

impl fmt::Display for Issues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.render(&self.diagnostics).fmt(f)
    }
}

impl std::error::Error for Issues {}
