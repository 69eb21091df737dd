//! Implementation of the Tern expression evaluator.
//!
//! The evaluator executes a checked expression tree against an activation.
//! It is single-threaded, produces no externally-visible mutation, and
//! never panics on well-typed input: every runtime failure surfaces as an
//! error value. Host-stack depth is bounded statically by the parser's
//! nesting limit.

use std::sync::Arc;

use indexmap::IndexMap;
use tern_analysis::check::CheckedAst;
use tern_analysis::check::Reference;
use tern_analysis::registry::FrozenRegistry;
use tern_analysis::registry::Overload;
use tern_grammar::ast::BinaryOp;
use tern_grammar::ast::Comprehension;
use tern_grammar::ast::ExprId;
use tern_grammar::ast::ExprKind;
use tern_grammar::ast::Literal;
use tern_grammar::ast::UnaryOp;
use tokio_util::sync::CancellationToken;

use crate::activation::Activation;
use crate::error;
use crate::error::EvalError;
use crate::functions::CallContext;
use crate::functions::FunctionBindings;
use crate::value::List;
use crate::value::Map;
use crate::value::MapKey;
use crate::value::Message;
use crate::value::OptionalValue;
use crate::value::Unknown;
use crate::value::Value;
use crate::value::default_value;

/// Represents the options to an evaluation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EvaluationConfig {
    /// The maximum number of comprehension iterations per evaluation.
    ///
    /// The count is cumulative across all comprehensions in the
    /// expression. A limit of zero disables comprehensions entirely.
    #[serde(default = "EvaluationConfig::default_iteration_limit")]
    pub comprehension_iteration_limit: u64,
    /// The timezone used by time-component functions when no zone argument
    /// is provided.
    #[serde(default = "EvaluationConfig::default_timezone")]
    pub default_utc_timezone: String,
    /// An optional cancellation signal.
    ///
    /// The signal is checked at comprehension iteration boundaries and at
    /// function-call entry.
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl EvaluationConfig {
    /// The default comprehension iteration limit.
    fn default_iteration_limit() -> u64 {
        1_000_000
    }

    /// The default timezone.
    fn default_timezone() -> String {
        "UTC".to_string()
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            comprehension_iteration_limit: Self::default_iteration_limit(),
            default_utc_timezone: Self::default_timezone(),
            cancellation: None,
        }
    }
}

/// Evaluates a checked expression against an activation.
///
/// The result is the expression's value, or the error it evaluated to.
pub fn evaluate(
    checked: &CheckedAst,
    registry: &FrozenRegistry,
    activation: &dyn Activation,
    config: &EvaluationConfig,
) -> Result<Value, Arc<EvalError>> {
    evaluate_with_overlay(checked, registry, activation, None, config)
}

/// Evaluates a checked expression with an overlay of function
/// implementations.
///
/// Overlay bindings take precedence over the standard implementations for
/// the duration of the evaluation.
pub fn evaluate_with_overlay(
    checked: &CheckedAst,
    registry: &FrozenRegistry,
    activation: &dyn Activation,
    overlay: Option<&FunctionBindings>,
    config: &EvaluationConfig,
) -> Result<Value, Arc<EvalError>> {
    let Some(root) = checked.root() else {
        return Err(Arc::new(EvalError::new("expression has no root")));
    };

    tracing::debug!(nodes = checked.ast().len(), "evaluating expression");

    let mut evaluator = Evaluator {
        checked,
        registry,
        activation,
        functions: FunctionBindings::standard(),
        overlay,
        config,
        locals: Vec::new(),
        iterations: 0,
    };

    match evaluator.eval_expr(root) {
        Value::Error(e) => Err(e),
        value => Ok(value),
    }
}

/// Implements the Tern expression evaluator.
struct Evaluator<'a> {
    /// The checked expression tree.
    checked: &'a CheckedAst,
    /// The frozen registry used for schemas and overload declarations.
    registry: &'a FrozenRegistry,
    /// The activation variables are resolved against.
    activation: &'a dyn Activation,
    /// The base function implementations.
    functions: &'a FunctionBindings,
    /// The optional per-evaluation overlay of implementations.
    overlay: Option<&'a FunctionBindings>,
    /// The evaluation options.
    config: &'a EvaluationConfig,
    /// The comprehension-scoped variable bindings.
    locals: Vec<(&'a str, Value)>,
    /// The cumulative comprehension iteration count.
    iterations: u64,
}

impl<'a> Evaluator<'a> {
    /// Evaluates an expression.
    fn eval_expr(&mut self, id: ExprId) -> Value {
        let ast = self.checked.ast();
        match ast.kind(id) {
            ExprKind::Literal(literal) => match literal {
                Literal::Null => Value::Null,
                Literal::Bool(v) => Value::Bool(*v),
                Literal::Int(v) => Value::Int(*v),
                Literal::Uint(v) => Value::Uint(*v),
                Literal::Double(v) => Value::Double(*v),
                Literal::String(v) => Value::string(v.as_str()),
                Literal::Bytes(v) => Value::bytes(v.clone()),
            },
            ExprKind::Ident(name) => match self.checked.reference(id) {
                Some(reference) => self.eval_reference(reference.clone()),
                None => Value::error(error::no_such_attribute(name)),
            },
            ExprKind::Select {
                operand,
                field,
                optional,
                test,
            } => {
                // A selection that resolved as a qualified name evaluates
                // as that name, not as a field access
                if let Some(reference) = self.checked.reference(id) {
                    return self.eval_reference(reference.clone());
                }

                self.eval_select(*operand, field, *optional, *test)
            }
            ExprKind::Index {
                operand,
                index,
                optional,
            } => self.eval_index(*operand, *index, *optional),
            ExprKind::Call {
                target,
                function,
                args,
            } => self.eval_call(id, *target, function, args),
            ExprKind::Unary { op, operand } => {
                let operand = self.eval_expr(*operand);
                match op {
                    UnaryOp::Not => match operand {
                        Value::Bool(v) => Value::Bool(!v),
                        Value::Error(_) | Value::Unknown(_) => operand,
                        _ => Value::error(error::no_such_overload()),
                    },
                    UnaryOp::Negate => operand.negate(),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, *lhs, *rhs),
            ExprKind::Ternary {
                condition,
                truthy,
                falsy,
            } => match self.eval_expr(*condition) {
                Value::Bool(true) => self.eval_expr(*truthy),
                Value::Bool(false) => self.eval_expr(*falsy),
                propagated @ (Value::Error(_) | Value::Unknown(_)) => propagated,
                _ => Value::error(error::no_such_overload()),
            },
            ExprKind::List { elements } => {
                let values = match self.eval_strict_list(elements) {
                    Ok(values) => values,
                    Err(propagated) => return propagated,
                };
                Value::List(List::new(values))
            }
            ExprKind::Map { entries } => self.eval_map(entries),
            ExprKind::Message { fields, .. } => self.eval_message(id, fields),
            ExprKind::Comprehension(c) => self.eval_comprehension(c),
            ExprKind::Invalid => Value::error(EvalError::new("invalid expression")),
        }
    }

    /// Evaluates a resolved reference.
    fn eval_reference(&mut self, reference: Reference) -> Value {
        match reference {
            Reference::Variable(name) => self.lookup_variable(&name),
            Reference::Constant { value, .. } => Value::Int(value),
            Reference::Type(ty) => Value::Type(ty),
            Reference::Overloads(_) => Value::error(error::no_such_overload()),
        }
    }

    /// Resolves a variable name against the comprehension scope and the
    /// activation.
    fn lookup_variable(&self, name: &str) -> Value {
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| *n == name) {
            return value.clone();
        }

        match self.activation.resolve(name) {
            Some(value) => value,
            None => Value::error(error::no_such_attribute(name)),
        }
    }

    /// Evaluates a field selection.
    fn eval_select(&mut self, operand: ExprId, field: &str, optional: bool, test: bool) -> Value {
        let operand = self.eval_expr(operand);
        if operand.is_error() || operand.is_unknown() {
            return operand;
        }

        if test {
            return match &operand {
                Value::Message(message) => {
                    if let Some(descriptor) = self.registry.message(message.name())
                        && descriptor.field(field).is_none()
                    {
                        return Value::error(error::no_such_field(field));
                    }

                    Value::Bool(message.has_field(field))
                }
                Value::Map(map) => {
                    Value::Bool(map.get(&MapKey::String(field.into())).is_some())
                }
                _ => Value::error(error::no_such_overload()),
            };
        }

        if optional {
            let base = match &operand {
                Value::Optional(inner) => match inner.value() {
                    Some(value) => value.clone(),
                    None => return Value::Optional(OptionalValue::none()),
                },
                _ => operand,
            };

            return match &base {
                Value::Message(message) => {
                    if let Some(descriptor) = self.registry.message(message.name())
                        && descriptor.field(field).is_none()
                    {
                        return Value::error(error::no_such_field(field));
                    }

                    match message.field(field) {
                        Some(value) => Value::Optional(OptionalValue::of(value.clone())),
                        None => Value::Optional(OptionalValue::none()),
                    }
                }
                Value::Map(map) => match map.get(&MapKey::String(field.into())) {
                    Some(value) => Value::Optional(OptionalValue::of(value.clone())),
                    None => Value::Optional(OptionalValue::none()),
                },
                _ => Value::error(error::no_such_overload()),
            };
        }

        match &operand {
            Value::Message(message) => {
                match self
                    .registry
                    .message(message.name())
                    .and_then(|descriptor| descriptor.field(field))
                {
                    Some(descriptor) => match message.field(field) {
                        Some(value) => value.clone(),
                        None if descriptor.has_presence() => Value::Null,
                        None => default_value(descriptor.ty()),
                    },
                    None => match message.field(field) {
                        // A schemaless message still yields set fields
                        Some(value) => value.clone(),
                        None => Value::error(error::no_such_field(field)),
                    },
                }
            }
            Value::Map(map) => match map.get(&MapKey::String(field.into())) {
                Some(value) => value.clone(),
                None => Value::error(error::no_such_key(field)),
            },
            _ => Value::error(error::no_such_overload()),
        }
    }

    /// Evaluates an index operation.
    fn eval_index(&mut self, operand: ExprId, index: ExprId, optional: bool) -> Value {
        let operand = self.eval_expr(operand);
        let index = self.eval_expr(index);
        if operand.is_error() || operand.is_unknown() {
            return operand;
        }

        let base = match &operand {
            Value::Optional(inner) if optional => match inner.value() {
                Some(value) => value.clone(),
                None => return Value::Optional(OptionalValue::none()),
            },
            _ => operand,
        };

        match &base {
            Value::List(list) => {
                let position = match &index {
                    Value::Int(i) => *i,
                    Value::Uint(u) if *u <= i64::MAX as u64 => *u as i64,
                    Value::Error(_) | Value::Unknown(_) => return index,
                    _ => return Value::error(error::no_such_overload()),
                };

                let found = usize::try_from(position)
                    .ok()
                    .and_then(|position| list.get(position));
                match found {
                    Some(value) if optional => Value::Optional(OptionalValue::of(value.clone())),
                    Some(value) => value.clone(),
                    None if optional => Value::Optional(OptionalValue::none()),
                    None => Value::error(error::index_out_of_range(position, list.len())),
                }
            }
            Value::Map(map) => {
                let key = match MapKey::from_value(&index) {
                    Ok(key) => key,
                    Err(propagated) => return propagated,
                };

                match map.get(&key) {
                    Some(value) if optional => Value::Optional(OptionalValue::of(value.clone())),
                    Some(value) => value.clone(),
                    None if optional => Value::Optional(OptionalValue::none()),
                    None => Value::error(error::no_such_key(&key)),
                }
            }
            Value::Error(_) | Value::Unknown(_) => base,
            _ => {
                if index.is_error() || index.is_unknown() {
                    return index;
                }

                Value::error(error::no_such_overload())
            }
        }
    }

    /// Evaluates a binary operation.
    fn eval_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> Value {
        match op {
            BinaryOp::And => self.eval_logical(lhs, rhs, false),
            BinaryOp::Or => self.eval_logical(lhs, rhs, true),
            _ => {
                let lhs = self.eval_expr(lhs);
                let rhs = self.eval_expr(rhs);
                match op {
                    BinaryOp::Equal => lhs.equals(&rhs),
                    BinaryOp::NotEqual => match lhs.equals(&rhs) {
                        Value::Bool(v) => Value::Bool(!v),
                        propagated => propagated,
                    },
                    BinaryOp::Less => compare_to_bool(&lhs, &rhs, |o| o.is_lt()),
                    BinaryOp::LessEqual => compare_to_bool(&lhs, &rhs, |o| o.is_le()),
                    BinaryOp::Greater => compare_to_bool(&lhs, &rhs, |o| o.is_gt()),
                    BinaryOp::GreaterEqual => compare_to_bool(&lhs, &rhs, |o| o.is_ge()),
                    BinaryOp::In => rhs.contains(&lhs),
                    BinaryOp::Add => lhs.add(&rhs),
                    BinaryOp::Subtract => lhs.subtract(&rhs),
                    BinaryOp::Multiply => lhs.multiply(&rhs),
                    BinaryOp::Divide => lhs.divide(&rhs),
                    BinaryOp::Remainder => lhs.remainder(&rhs),
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                }
            }
        }
    }

    /// Evaluates a short-circuiting logical operation.
    ///
    /// `absorbing` is the operand value that determines the result
    /// regardless of the other operand: `false` for `&&`, `true` for
    /// `||`. The operators are commutative in the presence of errors and
    /// unknowns: a determining operand on either side wins, an error
    /// otherwise dominates an unknown.
    fn eval_logical(&mut self, lhs: ExprId, rhs: ExprId, absorbing: bool) -> Value {
        let lhs = self.eval_expr(lhs);
        if lhs.as_bool() == Some(absorbing) {
            return Value::Bool(absorbing);
        }

        let rhs = self.eval_expr(rhs);
        if rhs.as_bool() == Some(absorbing) {
            return Value::Bool(absorbing);
        }

        match (&lhs, &rhs) {
            (Value::Bool(_), Value::Bool(_)) => Value::Bool(!absorbing),
            (e @ Value::Error(_), _) => e.clone(),
            (_, e @ Value::Error(_)) => e.clone(),
            (Value::Unknown(x), Value::Unknown(y)) => Value::Unknown(x.merge(y)),
            (u @ Value::Unknown(_), _) => u.clone(),
            (_, u @ Value::Unknown(_)) => u.clone(),
            _ => Value::error(error::no_such_overload()),
        }
    }

    /// Evaluates a function call.
    fn eval_call(
        &mut self,
        id: ExprId,
        target: Option<ExprId>,
        function: &str,
        args: &[ExprId],
    ) -> Value {
        if let Some(token) = &self.config.cancellation
            && token.is_cancelled()
        {
            return Value::error(error::cancelled());
        }

        let Some(Reference::Overloads(ids)) = self.checked.reference(id) else {
            return Value::error(error::no_such_overload());
        };
        let ids = ids.clone();

        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            values.push(self.eval_expr(target));
        }

        for arg in args {
            values.push(self.eval_expr(*arg));
        }

        let registry = self.registry;
        let overloads: Vec<&(Arc<str>, Overload)> = ids
            .iter()
            .filter_map(|id| registry.overload(id))
            .collect();

        // Strict overloads never observe error or unknown arguments
        let strict = overloads
            .first()
            .map(|(_, overload)| overload.is_strict())
            .unwrap_or(true);
        if strict {
            if let Some(e) = values.iter().find(|v| v.is_error()) {
                return e.clone();
            }

            let mut unknown: Option<Unknown> = None;
            for value in &values {
                if let Value::Unknown(u) = value {
                    unknown = Some(match unknown {
                        Some(existing) => existing.merge(u),
                        None => u.clone(),
                    });
                }
            }

            if let Some(unknown) = unknown {
                return Value::Unknown(unknown);
            }
        }

        // With multiple surviving overloads the operand types were dynamic;
        // dispatch on the runtime argument types
        let selected = if overloads.len() == 1 {
            overloads.first().copied()
        } else {
            overloads
                .iter()
                .find(|(_, overload)| {
                    overload.params().len() == values.len()
                        && overload
                            .params()
                            .iter()
                            .zip(&values)
                            .all(|(param, value)| value.is_instance_of(param))
                })
                .copied()
        };

        let Some((_, overload)) = selected else {
            return Value::error(error::no_such_overload());
        };

        let implementation = self
            .overlay
            .and_then(|overlay| overlay.get(overload.id()))
            .or_else(|| self.functions.get(overload.id()));
        let Some(implementation) = implementation else {
            return Value::error(error::unbound_overload(overload.id()));
        };

        let context = CallContext::new(&values, &self.config.default_utc_timezone);
        match (**implementation)(&context) {
            Value::Error(e) if strict => {
                Value::error(error::function_call_failed(function, e))
            }
            value => value,
        }
    }

    /// Evaluates a list of expressions strictly.
    ///
    /// The first error propagates; unknowns merge and propagate.
    fn eval_strict_list(&mut self, elements: &[ExprId]) -> Result<Vec<Value>, Value> {
        let mut values = Vec::with_capacity(elements.len());
        let mut unknown: Option<Unknown> = None;
        for element in elements {
            let value = self.eval_expr(*element);
            match &value {
                Value::Error(_) => return Err(value),
                Value::Unknown(u) => {
                    unknown = Some(match unknown {
                        Some(existing) => existing.merge(u),
                        None => u.clone(),
                    });
                }
                _ => {}
            }

            values.push(value);
        }

        match unknown {
            Some(unknown) => Err(Value::Unknown(unknown)),
            None => Ok(values),
        }
    }

    /// Evaluates a map literal.
    fn eval_map(&mut self, entries: &[tern_grammar::ast::MapEntry]) -> Value {
        let mut map = IndexMap::with_capacity(entries.len());
        let mut unknown: Option<Unknown> = None;
        for entry in entries {
            let key = self.eval_expr(entry.key);
            let value = self.eval_expr(entry.value);
            for v in [&key, &value] {
                match v {
                    Value::Error(_) => return (*v).clone(),
                    Value::Unknown(u) => {
                        unknown = Some(match unknown.take() {
                            Some(existing) => existing.merge(u),
                            None => u.clone(),
                        });
                    }
                    _ => {}
                }
            }

            if unknown.is_some() {
                continue;
            }

            let key = match MapKey::from_value(&key) {
                Ok(key) => key,
                Err(propagated) => return propagated,
            };

            if map.insert(key.clone(), value).is_some() {
                return Value::error(error::duplicate_map_key(&key));
            }
        }

        match unknown {
            Some(unknown) => Value::Unknown(unknown),
            None => Value::Map(Map::new(map)),
        }
    }

    /// Evaluates a message literal.
    fn eval_message(&mut self, id: ExprId, fields: &[tern_grammar::ast::FieldInit]) -> Value {
        let Some(Reference::Type(tern_analysis::types::Type::Message(name))) =
            self.checked.reference(id)
        else {
            return Value::error(error::no_such_overload());
        };
        let name = name.clone();

        let Some(descriptor) = self.registry.message(&name).cloned() else {
            return Value::error(EvalError::new(format!("unknown message type `{name}`")));
        };

        let mut values = IndexMap::with_capacity(fields.len());
        let mut unknown: Option<Unknown> = None;
        for field in fields {
            let value = self.eval_expr(field.value);
            match &value {
                Value::Error(_) => return value,
                Value::Unknown(u) => {
                    unknown = Some(match unknown.take() {
                        Some(existing) => existing.merge(u),
                        None => u.clone(),
                    });
                    continue;
                }
                _ => {}
            }

            let Some(fd) = descriptor.field(&field.name) else {
                return Value::error(error::no_such_field(&field.name));
            };

            if !value.is_instance_of(fd.ty()) {
                return Value::error(error::conversion(format!(
                    "cannot assign value of type `{ty}` to field `{field}` of `{name}`",
                    ty = value.ty(),
                    field = field.name
                )));
            }

            values.insert(field.name.clone(), value);
        }

        match unknown {
            Some(unknown) => Value::Unknown(unknown),
            None => Value::Message(Message::new(name, values)),
        }
    }

    /// Evaluates a comprehension.
    fn eval_comprehension(&mut self, c: &'a Comprehension) -> Value {
        if self.config.comprehension_iteration_limit == 0 {
            return Value::error(error::comprehensions_disabled());
        }

        let range = self.eval_expr(c.range);
        let items: Vec<Value> = match &range {
            Value::List(list) => list.iter().cloned().collect(),
            Value::Map(map) => map.keys().map(|key| key.to_value()).collect(),
            Value::Error(_) | Value::Unknown(_) => return range,
            _ => return Value::error(error::no_such_overload()),
        };

        let accu = self.eval_expr(c.init);
        let accu_index = self.locals.len();
        self.locals.push((c.accu_var.as_str(), accu));
        let iter_index = self.locals.len();
        self.locals.push((c.iter_var.as_str(), Value::Null));

        for item in items {
            self.iterations += 1;
            if self.iterations > self.config.comprehension_iteration_limit {
                self.locals.truncate(accu_index);
                return Value::error(error::iteration_limit_exceeded());
            }

            if let Some(token) = &self.config.cancellation
                && token.is_cancelled()
            {
                self.locals.truncate(accu_index);
                return Value::error(error::cancelled());
            }

            self.locals[iter_index].1 = item;

            match self.eval_expr(c.condition) {
                Value::Bool(true) => {}
                Value::Bool(false) => break,
                propagated @ (Value::Error(_) | Value::Unknown(_)) => {
                    self.locals.truncate(accu_index);
                    return propagated;
                }
                _ => {
                    self.locals.truncate(accu_index);
                    return Value::error(error::no_such_overload());
                }
            }

            let step = self.eval_expr(c.step);
            self.locals[accu_index].1 = step;
        }

        self.locals.truncate(iter_index);
        let result = self.eval_expr(c.result);
        self.locals.truncate(accu_index);
        result
    }
}

/// Converts an ordering comparison into a boolean value.
fn compare_to_bool(
    lhs: &Value,
    rhs: &Value,
    predicate: impl FnOnce(std::cmp::Ordering) -> bool,
) -> Value {
    match lhs.compare(rhs) {
        Ok(ordering) => Value::Bool(predicate(ordering)),
        Err(propagated) => propagated,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tern_analysis::check::CheckerOptions;
    use tern_analysis::check::check;
    use tern_analysis::registry::Registry;
    use tern_analysis::stdlib::STDLIB;
    use tern_analysis::types::PrimitiveTypeKind;
    use tern_analysis::types::Type;
    use tern_grammar::parse;

    use super::*;
    use crate::activation::Bindings;
    use crate::activation::EmptyActivation;

    /// Compiles and evaluates the given source against an activation.
    fn run(source: &str, activation: &dyn Activation) -> Result<Value, Arc<EvalError>> {
        run_with_config(source, activation, &EvaluationConfig::default())
    }

    /// Compiles and evaluates with an explicit configuration.
    fn run_with_config(
        source: &str,
        activation: &dyn Activation,
        config: &EvaluationConfig,
    ) -> Result<Value, Arc<EvalError>> {
        let parsed = parse(source);
        assert_eq!(
            parsed
                .diagnostics
                .iter()
                .map(|d| d.message().to_string())
                .collect::<Vec<_>>(),
            Vec::<String>::new(),
            "unexpected parse diagnostics for `{source}`"
        );

        let registry = Registry::new();
        STDLIB.install(&registry).unwrap();
        registry
            .register_variable(
                "attributes",
                Type::map(Type::Primitive(PrimitiveTypeKind::String), Type::Dyn),
            )
            .unwrap();
        registry.register_variable("flag", Type::Dyn).unwrap();
        let registry = registry.freeze();

        let result = check(parsed.ast, &registry, &CheckerOptions::default());
        assert_eq!(
            result
                .diagnostics
                .iter()
                .map(|d| d.message().to_string())
                .collect::<Vec<_>>(),
            Vec::<String>::new(),
            "unexpected check diagnostics for `{source}`"
        );

        evaluate(&result.checked, &registry, activation, config)
    }

    /// Runs the source with an empty activation and expects a value.
    fn eval_ok(source: &str) -> Value {
        run(source, &EmptyActivation).expect("evaluation should succeed")
    }

    /// Runs the source with an empty activation and expects an error.
    fn eval_err(source: &str) -> Arc<EvalError> {
        run(source, &EmptyActivation).expect_err("evaluation should fail")
    }

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(eval_ok("1 + 2 * 3").as_int(), Some(7));
        assert_eq!(eval_ok("(7 - 1) / 2").as_int(), Some(3));
        assert_eq!(eval_ok("7 % 4").as_int(), Some(3));
    }

    #[test]
    fn overflow_is_an_error() {
        assert_eq!(
            eval_err("9223372036854775807 + 1").message(),
            "integer overflow"
        );
    }

    #[test]
    fn short_circuit_absorbs_errors() {
        assert_eq!(eval_ok("false && (1 / 0 == 0)").as_bool(), Some(false));
        assert_eq!(eval_ok("true || (1 / 0 == 0)").as_bool(), Some(true));
        // Commutative: the determining operand may be on either side
        assert_eq!(eval_ok("(1 / 0 == 0) && false").as_bool(), Some(false));
        assert_eq!(eval_ok("(1 / 0 == 0) || true").as_bool(), Some(true));
        // A non-determining operand propagates the error
        assert_eq!(eval_err("true && (1 / 0 == 0)").message(), "division by zero");
    }

    #[test]
    fn errors_dominate_unknowns_in_logic() {
        let activation = Bindings::new().bind("flag", Value::Unknown(Unknown::new("flag")));
        let result = run("flag && (1 / 0 == 0)", &activation)
            .expect_err("error should dominate");
        assert_eq!(result.message(), "division by zero");

        let result = run("flag && true", &activation).expect("should evaluate");
        assert!(result.is_unknown());

        let result = run("flag && false", &activation).expect("should evaluate");
        assert_eq!(result.as_bool(), Some(false));
    }

    #[test]
    fn ternary_evaluates_one_branch() {
        assert_eq!(eval_ok("true ? 1 : 1 / 0").as_int(), Some(1));
        assert_eq!(eval_ok("false ? 1 / 0 : 2").as_int(), Some(2));
        assert_eq!(eval_err("1 / 0 == 0 ? 1 : 2").message(), "division by zero");
    }

    #[test]
    fn evaluates_comprehensions() {
        assert_eq!(eval_ok("[1, 2, 3].exists(i, i > 2)").as_bool(), Some(true));
        assert_eq!(eval_ok("[1, 2, 3].all(i, i > 0)").as_bool(), Some(true));
        assert_eq!(eval_ok("[1, 2, 3].all(i, i > 1)").as_bool(), Some(false));
        assert_eq!(
            eval_ok("[1, 2, 3].exists_one(i, i == 2)").as_bool(),
            Some(true)
        );
        assert_eq!(eval_ok("size([1, 2, 3].filter(i, i > 1))").as_int(), Some(2));
        assert_eq!(eval_ok("[1, 2].map(i, i * 2)[1]").as_int(), Some(4));
    }

    #[test]
    fn comprehension_errors_absorb_like_logical_operators() {
        // The division for the first element errors, but a later false
        // predicate absorbs it through the commutative `&&` fold
        assert_eq!(
            eval_ok("[0, 3].all(i, 4 / i > 1)").as_bool(),
            Some(false)
        );

        // With no absorbing element the error surfaces
        assert_eq!(
            eval_err("[0, 2].all(i, 4 / i > 1)").message(),
            "division by zero"
        );
    }

    #[test]
    fn map_iteration_yields_keys() {
        assert_eq!(
            eval_ok("{'a': 1, 'b': 2}.exists(k, k == 'b')").as_bool(),
            Some(true)
        );
    }

    #[test]
    fn iteration_limit_is_enforced() {
        let config = EvaluationConfig {
            comprehension_iteration_limit: 2,
            ..Default::default()
        };
        let result = run_with_config("[1, 2, 3].all(i, i > 0)", &EmptyActivation, &config)
            .expect_err("should exceed the limit");
        assert_eq!(result.message(), "iteration limit exceeded");
    }

    #[test]
    fn cancellation_stops_evaluation() {
        let token = CancellationToken::new();
        token.cancel();
        let config = EvaluationConfig {
            cancellation: Some(token),
            ..Default::default()
        };
        let result = run_with_config("[1, 2, 3].all(i, i > 0)", &EmptyActivation, &config)
            .expect_err("should be cancelled");
        assert_eq!(result.message(), "cancelled");
    }

    #[test]
    fn selection_on_maps_reports_missing_keys() {
        assert_eq!(eval_err("{'a': 1, 'b': 2}.c").message(), "no such key: c");
        assert_eq!(eval_ok("{'a': 1, 'b': 2}.b").as_int(), Some(2));
    }

    #[test]
    fn presence_tests_do_not_error() {
        let activation = Bindings::new().bind(
            "attributes",
            Value::Map(Map::new(IndexMap::new())),
        );
        let result = run(
            "has(attributes.env) && attributes.env == 'prod'",
            &activation,
        )
        .expect("should evaluate");
        assert_eq!(result.as_bool(), Some(false));
    }

    #[test]
    fn optional_forms_convert_absence() {
        assert_eq!(
            eval_ok("{'a': 1}[?'missing'].hasValue()").as_bool(),
            Some(false)
        );
        assert_eq!(eval_ok("{'a': 1}[?'a'].value()").as_int(), Some(1));
        assert_eq!(eval_ok("[1, 2][?5].orValue(9)").as_int(), Some(9));
    }

    #[test]
    fn duration_and_timestamp_arithmetic() {
        let result = eval_ok("duration('1h') + timestamp('2023-01-01T00:00:00Z')");
        match &result {
            Value::Timestamp(t) => {
                assert_eq!(t.to_rfc3339(), "2023-01-01T01:00:00+00:00");
            }
            other => panic!("expected a timestamp, found {other:?}"),
        }

        assert_eq!(
            eval_ok(
                "timestamp('2023-01-01T01:00:00Z') - timestamp('2023-01-01T00:00:00Z') \
                 == duration('1h')"
            )
            .as_bool(),
            Some(true)
        );
    }

    #[test]
    fn string_functions_apply() {
        assert_eq!(eval_ok("'hello'.matches('h.*o')").as_bool(), Some(true));
        assert_eq!(eval_ok("'hello'.contains('ell')").as_bool(), Some(true));
        assert_eq!(eval_ok("size('héllo')").as_int(), Some(5));
    }

    #[test]
    fn type_values_compare() {
        assert_eq!(eval_ok("type(1) == int").as_bool(), Some(true));
        assert_eq!(eval_ok("type(1) == type(2)").as_bool(), Some(true));
        assert_eq!(eval_ok("type('a') == int").as_bool(), Some(false));
    }

    #[test]
    fn in_operator_checks_membership() {
        assert_eq!(eval_ok("2 in [1, 2, 3]").as_bool(), Some(true));
        assert_eq!(eval_ok("'c' in {'a': 1, 'b': 2}").as_bool(), Some(false));
    }

    #[test]
    fn determinism_across_evaluations() {
        for _ in 0..3 {
            assert_eq!(
                eval_ok("{'a': 1, 'b': 2}.exists(k, k == 'b')").as_bool(),
                Some(true)
            );
        }
    }
}
