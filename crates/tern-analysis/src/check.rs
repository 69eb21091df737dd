//! Implementation of the type checker.
//!
//! The checker walks the expression tree in evaluation order, resolves
//! identifiers and selections against the registry, picks function overloads
//! by type unification, and annotates every node id with its inferred type
//! and resolved reference. Diagnostics accumulate; a node that fails to
//! check is annotated with the error type so that one mistake does not
//! cascade.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tern_grammar::Diagnostic;
use tern_grammar::Span;
use tern_grammar::ast::Ast;
use tern_grammar::ast::BinaryOp;
use tern_grammar::ast::Comprehension;
use tern_grammar::ast::ExprId;
use tern_grammar::ast::ExprKind;
use tern_grammar::ast::Literal;
use tern_grammar::ast::UnaryOp;

use crate::diagnostics;
use crate::registry::FrozenRegistry;
use crate::registry::Overload;
use crate::stdlib::STDLIB;
use crate::types::PrimitiveTypeKind;
use crate::types::Substitution;
use crate::types::Type;
use crate::types::common_type;
use crate::types::is_assignable;

/// Represents the options to the checker.
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// The container namespace used to resolve unqualified identifiers.
    ///
    /// Resolution tries increasingly short prefixes of the container; for
    /// container `a.b` and name `c`, the candidates are `a.b.c`, `a.c`, and
    /// `c`, in that order.
    pub container: String,
    /// Whether list elements and map keys/values must unify to a common
    /// type.
    pub homogeneous_aggregate_literals: bool,
    /// The maximum comprehension nesting depth.
    pub comprehension_nesting_limit: usize,
    /// Whether comprehensions are enabled.
    ///
    /// Comprehensions are disabled when the evaluation iteration limit is
    /// configured to zero.
    pub comprehensions_enabled: bool,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            container: String::new(),
            homogeneous_aggregate_literals: false,
            comprehension_nesting_limit: 24,
            comprehensions_enabled: true,
        }
    }
}

/// Represents the resolution of a name or call recorded on a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// The node resolved to a variable with the given absolute name.
    Variable(Arc<str>),
    /// The node resolved to an enum constant.
    Constant {
        /// The absolute name of the constant.
        name: Arc<str>,
        /// The integer value of the constant.
        value: i64,
    },
    /// The node resolved to a type.
    Type(Type),
    /// The node is a call that resolved to the given set of surviving
    /// overload ids.
    Overloads(Vec<Arc<str>>),
}

/// Represents a checked expression tree.
///
/// Every node carries an inferred type; identifiers and calls additionally
/// carry their resolved reference. Checked trees are immutable and may be
/// shared across threads.
#[derive(Debug)]
pub struct CheckedAst {
    /// The underlying expression tree.
    ast: Ast,
    /// The inferred type of each node.
    types: HashMap<ExprId, Type>,
    /// The resolved reference of each resolving node.
    references: HashMap<ExprId, Reference>,
}

impl CheckedAst {
    /// Gets the underlying expression tree.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Gets the root expression of the tree.
    pub fn root(&self) -> Option<ExprId> {
        self.ast.root()
    }

    /// Gets the inferred type of a node.
    ///
    /// Nodes absorbed into a qualified name resolution carry no type.
    pub fn type_of(&self, id: ExprId) -> Option<&Type> {
        self.types.get(&id)
    }

    /// Gets the resolved reference of a node, if any.
    pub fn reference(&self, id: ExprId) -> Option<&Reference> {
        self.references.get(&id)
    }
}

/// Represents the result of checking an expression tree.
#[derive(Debug)]
pub struct CheckResult {
    /// The checked tree.
    ///
    /// The annotations are best-effort when diagnostics were emitted.
    pub checked: CheckedAst,
    /// The diagnostics emitted by the checker.
    pub diagnostics: Vec<Diagnostic>,
}

/// Checks the given expression tree against the given registry.
pub fn check(ast: Ast, registry: &FrozenRegistry, options: &CheckerOptions) -> CheckResult {
    tracing::debug!(nodes = ast.len(), "checking expression");

    let mut checker = Checker {
        ast: &ast,
        registry,
        options,
        types: HashMap::new(),
        references: HashMap::new(),
        diagnostics: Vec::new(),
        scopes: Vec::new(),
        comprehension_depth: 0,
    };

    if let Some(root) = ast.root() {
        checker.check_expr(root);
    }

    let Checker {
        types,
        references,
        diagnostics,
        ..
    } = checker;

    CheckResult {
        checked: CheckedAst {
            ast,
            types,
            references,
        },
        diagnostics,
    }
}

/// Implements the Tern type checker.
struct Checker<'a> {
    /// The tree being checked.
    ast: &'a Ast,
    /// The registry to resolve declarations against.
    registry: &'a FrozenRegistry,
    /// The checker options.
    options: &'a CheckerOptions,
    /// The inferred type of each node.
    types: HashMap<ExprId, Type>,
    /// The resolved reference of each resolving node.
    references: HashMap<ExprId, Reference>,
    /// The diagnostics accumulated so far.
    diagnostics: Vec<Diagnostic>,
    /// The stack of comprehension-scoped variable bindings.
    scopes: Vec<(String, Type)>,
    /// The current comprehension nesting depth.
    comprehension_depth: usize,
}

impl Checker<'_> {
    /// Records the inferred type of a node, returning the type.
    fn set_type(&mut self, id: ExprId, ty: Type) -> Type {
        self.types.insert(id, ty.clone());
        ty
    }

    /// Records the resolved reference of a node.
    fn set_reference(&mut self, id: ExprId, reference: Reference) {
        self.references.insert(id, reference);
    }

    /// Records a diagnostic attached to the offending node.
    fn report(&mut self, id: ExprId, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic.with_node(id));
    }

    /// Produces the candidate absolute names for the given name.
    ///
    /// A name with a leading `.` is absolute and has a single candidate.
    fn candidates(&self, name: &str) -> Vec<String> {
        if let Some(absolute) = name.strip_prefix('.') {
            return vec![absolute.to_string()];
        }

        let mut candidates = Vec::new();
        let mut container = self.options.container.as_str();
        loop {
            if container.is_empty() {
                candidates.push(name.to_string());
                break;
            }

            candidates.push(format!("{container}.{name}"));
            container = match container.rfind('.') {
                Some(i) => &container[..i],
                None => "",
            };
        }

        candidates
    }

    /// Attempts to resolve a name to a declaration.
    ///
    /// Candidates are tried longest first; within a candidate, variables are
    /// tried before enum constants, then types (standard type identifiers
    /// and message types).
    fn resolve_name(&self, name: &str) -> Option<(Reference, Type)> {
        for candidate in self.candidates(name) {
            if let Some(ty) = self.registry.variable(&candidate) {
                return Some((Reference::Variable(candidate.into()), ty.clone()));
            }

            if let Some(value) = self.registry.enum_constant(&candidate) {
                return Some((
                    Reference::Constant {
                        name: candidate.into(),
                        value,
                    },
                    Type::Primitive(PrimitiveTypeKind::Int),
                ));
            }

            if let Some(ty) = crate::stdlib::type_identifier(&candidate) {
                return Some((Reference::Type(ty.clone()), Type::type_of(ty)));
            }

            if self.registry.message(&candidate).is_some() {
                let ty = Type::message(candidate);
                return Some((Reference::Type(ty.clone()), Type::type_of(ty)));
            }
        }

        None
    }

    /// Checks an expression, returning its inferred type.
    fn check_expr(&mut self, id: ExprId) -> Type {
        let ast = self.ast;
        let span = ast.span(id);
        match ast.kind(id) {
            ExprKind::Literal(literal) => {
                let ty = match literal {
                    Literal::Null => Type::Null,
                    Literal::Bool(_) => Type::Primitive(PrimitiveTypeKind::Bool),
                    Literal::Int(_) => Type::Primitive(PrimitiveTypeKind::Int),
                    Literal::Uint(_) => Type::Primitive(PrimitiveTypeKind::Uint),
                    Literal::Double(_) => Type::Primitive(PrimitiveTypeKind::Double),
                    Literal::String(_) => Type::Primitive(PrimitiveTypeKind::String),
                    Literal::Bytes(_) => Type::Primitive(PrimitiveTypeKind::Bytes),
                };
                self.set_type(id, ty)
            }
            ExprKind::Ident(name) => self.check_ident(id, name, span),
            ExprKind::Select {
                operand,
                field,
                optional,
                test,
            } => self.check_select(id, *operand, field, *optional, *test, span),
            ExprKind::Index {
                operand,
                index,
                optional,
            } => self.check_index(id, *operand, *index, *optional, span),
            ExprKind::Call {
                target,
                function,
                args,
            } => self.check_call(id, *target, function, args, span),
            ExprKind::Unary { op, operand } => self.check_unary(id, *op, *operand, span),
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(id, *op, *lhs, *rhs, span),
            ExprKind::Ternary {
                condition,
                truthy,
                falsy,
            } => {
                let condition_ty = self.check_expr(*condition);
                if !is_assignable(&Type::Primitive(PrimitiveTypeKind::Bool), &condition_ty) {
                    let diagnostic = diagnostics::type_mismatch(
                        &Type::Primitive(PrimitiveTypeKind::Bool),
                        &condition_ty,
                        ast.span(*condition),
                    );
                    self.report(*condition, diagnostic);
                }

                let truthy_ty = self.check_expr(*truthy);
                let falsy_ty = self.check_expr(*falsy);
                self.set_type(id, common_type(&truthy_ty, &falsy_ty))
            }
            ExprKind::List { elements } => self.check_list(id, elements.clone()),
            ExprKind::Map { entries } => self.check_map(id, entries.clone()),
            ExprKind::Message { type_name, fields } => {
                self.check_message(id, type_name.clone(), fields.clone(), span)
            }
            ExprKind::Comprehension(c) => {
                let c = (**c).clone();
                self.check_comprehension(id, c, span)
            }
            ExprKind::Invalid => {
                // The parser has already diagnosed this node
                self.set_type(id, Type::Error)
            }
        }
    }

    /// Checks an identifier.
    fn check_ident(&mut self, id: ExprId, name: &str, span: Span) -> Type {
        if !name.contains('.')
            && let Some((_, ty)) = self
                .scopes
                .iter()
                .rev()
                .find(|(n, _)| n.as_str() == name)
        {
            let ty = ty.clone();
            self.set_reference(id, Reference::Variable(name.into()));
            return self.set_type(id, ty);
        }

        match self.resolve_name(name) {
            Some((reference, ty)) => {
                self.set_reference(id, reference);
                self.set_type(id, ty)
            }
            None => {
                let diagnostic =
                    diagnostics::undeclared_reference(name, &self.options.container, span);
                self.report(id, diagnostic);
                self.set_type(id, Type::Error)
            }
        }
    }

    /// Builds the dotted name of a selection chain of plain identifiers.
    ///
    /// Returns `None` if the chain contains anything other than plain
    /// selections over an identifier base, or if a comprehension variable
    /// shadows the base.
    fn qualified_name(&self, id: ExprId) -> Option<String> {
        match self.ast.kind(id) {
            ExprKind::Ident(name) => {
                let bare = name.strip_prefix('.').unwrap_or(name);
                if self.scopes.iter().any(|(n, _)| n.as_str() == bare) {
                    return None;
                }

                Some(name.clone())
            }
            ExprKind::Select {
                operand,
                field,
                optional: false,
                test: false,
            } => {
                let mut name = self.qualified_name(*operand)?;
                name.push('.');
                name.push_str(field);
                Some(name)
            }
            _ => None,
        }
    }

    /// Computes the type of selecting `field` from a value of type `ty`.
    ///
    /// Emits a diagnostic against the selecting node and returns `None`
    /// when the selection is invalid.
    fn field_type(&mut self, id: ExprId, ty: &Type, field: &str, span: Span) -> Option<Type> {
        match ty {
            Type::Dyn | Type::Error | Type::Any => Some(Type::Dyn),
            Type::Json => Some(Type::Json),
            Type::Message(name) => match self.registry.field(name, field) {
                Some(descriptor) => Some(descriptor.ty().clone()),
                None => {
                    let diagnostic = diagnostics::no_such_field(ty, field, span);
                    self.report(id, diagnostic);
                    None
                }
            },
            Type::Map(map) => {
                if is_assignable(
                    map.key_type(),
                    &Type::Primitive(PrimitiveTypeKind::String),
                ) {
                    Some(map.value_type().clone())
                } else {
                    let diagnostic = diagnostics::not_selectable(ty, span);
                    self.report(id, diagnostic);
                    None
                }
            }
            _ => {
                let diagnostic = diagnostics::not_selectable(ty, span);
                self.report(id, diagnostic);
                None
            }
        }
    }

    /// Checks a field selection.
    fn check_select(
        &mut self,
        id: ExprId,
        operand: ExprId,
        field: &str,
        optional: bool,
        test: bool,
        span: Span,
    ) -> Type {
        // A selection chain of plain identifiers may be a qualified name;
        // resolution takes precedence over field selection.
        if !optional
            && !test
            && let Some(name) = self.qualified_name(id)
            && let Some((reference, ty)) = self.resolve_name(&name)
        {
            self.set_reference(id, reference);
            return self.set_type(id, ty);
        }

        let operand_ty = self.check_expr(operand);

        if test {
            match &operand_ty {
                Type::Dyn | Type::Error | Type::Any | Type::Json | Type::Map(_) => {}
                Type::Message(name) => {
                    if self.registry.field(name, field).is_none() {
                        let diagnostic = diagnostics::no_such_field(&operand_ty, field, span);
                        self.report(id, diagnostic);
                    }
                }
                _ => {
                    let diagnostic = diagnostics::not_testable(&operand_ty, span);
                    self.report(id, diagnostic);
                }
            }

            return self.set_type(id, Type::Primitive(PrimitiveTypeKind::Bool));
        }

        if optional {
            let base = match &operand_ty {
                Type::Optional(inner) => (**inner).clone(),
                other => other.clone(),
            };

            if base.is_dyn() {
                return self.set_type(id, Type::Dyn);
            }

            let ty = match self.field_type(id, &base, field, span) {
                Some(ty) => Type::optional(ty),
                None => Type::Error,
            };
            return self.set_type(id, ty);
        }

        if matches!(operand_ty, Type::Optional(_)) {
            let diagnostic =
                diagnostics::optional_requires_safe_traversal(&operand_ty, span);
            self.report(id, diagnostic);
            return self.set_type(id, Type::Error);
        }

        let ty = self
            .field_type(id, &operand_ty, field, span)
            .unwrap_or(Type::Error);
        self.set_type(id, ty)
    }

    /// Checks an index operation.
    fn check_index(
        &mut self,
        id: ExprId,
        operand: ExprId,
        index: ExprId,
        optional: bool,
        span: Span,
    ) -> Type {
        let operand_ty = self.check_expr(operand);
        let index_ty = self.check_expr(index);

        let base = match (&operand_ty, optional) {
            (Type::Optional(inner), true) => (**inner).clone(),
            (Type::Optional(_), false) => {
                let diagnostic =
                    diagnostics::optional_requires_safe_traversal(&operand_ty, span);
                self.report(id, diagnostic);
                return self.set_type(id, Type::Error);
            }
            _ => operand_ty.clone(),
        };

        let result = match &base {
            Type::Dyn | Type::Error | Type::Any => Type::Dyn,
            Type::Json => Type::Json,
            Type::List(element) => {
                if !is_assignable(&Type::Primitive(PrimitiveTypeKind::Int), &index_ty) {
                    let diagnostic = diagnostics::type_mismatch(
                        &Type::Primitive(PrimitiveTypeKind::Int),
                        &index_ty,
                        self.ast.span(index),
                    );
                    self.report(index, diagnostic);
                }

                (**element).clone()
            }
            Type::Map(map) => {
                if !is_assignable(map.key_type(), &index_ty) {
                    let diagnostic = diagnostics::type_mismatch(
                        map.key_type(),
                        &index_ty,
                        self.ast.span(index),
                    );
                    self.report(index, diagnostic);
                }

                map.value_type().clone()
            }
            _ => {
                let diagnostic = diagnostics::not_indexable(&base, span);
                self.report(id, diagnostic);
                return self.set_type(id, Type::Error);
            }
        };

        let ty = if optional && !base.is_dyn() {
            Type::optional(result)
        } else {
            result
        };
        self.set_type(id, ty)
    }

    /// Resolves a set of candidate overloads against argument types.
    ///
    /// Returns the surviving overload ids and the least upper bound of the
    /// surviving result types, or `None` if no candidate survives.
    fn resolve_overloads(
        &self,
        overloads: &[Overload],
        receiver: bool,
        args: &[Type],
    ) -> Option<(Vec<Arc<str>>, Type)> {
        let mut ids = Vec::new();
        let mut result: Option<Type> = None;
        for overload in overloads {
            if overload.is_receiver() != receiver || overload.params().len() != args.len() {
                continue;
            }

            // Each candidate gets a fresh substitution; the clone in the
            // outer loop keeps failed attempts from polluting later ones
            let mut sub = Substitution::new();
            if !overload
                .params()
                .iter()
                .zip(args)
                .all(|(param, arg)| sub.unify(param, arg))
            {
                continue;
            }

            let candidate = sub.apply(overload.result());
            result = Some(match result {
                Some(existing) => common_type(&existing, &candidate),
                None => candidate,
            });
            ids.push(overload.id().clone());
        }

        result.map(|result| (ids, result))
    }

    /// Checks a function call.
    fn check_call(
        &mut self,
        id: ExprId,
        target: Option<ExprId>,
        function: &str,
        args: &[ExprId],
        span: Span,
    ) -> Type {
        let mut arg_tys = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            arg_tys.push(self.check_expr(target));
        }

        for arg in args {
            arg_tys.push(self.check_expr(*arg));
        }

        let registry = self.registry;
        let decl = if target.is_some() {
            registry.function(function)
        } else {
            self.candidates(function)
                .into_iter()
                .find_map(|candidate| registry.function(&candidate))
        };

        let Some(decl) = decl else {
            let diagnostic = diagnostics::unknown_function(function, span);
            self.report(id, diagnostic);
            return self.set_type(id, Type::Error);
        };

        match self.resolve_overloads(decl.overloads(), target.is_some(), &arg_tys) {
            Some((ids, result)) => {
                self.set_reference(id, Reference::Overloads(ids));
                self.set_type(id, result)
            }
            None => {
                let diagnostic = diagnostics::no_matching_overload(function, &arg_tys, span);
                self.report(id, diagnostic);
                self.set_type(id, Type::Error)
            }
        }
    }

    /// Checks a unary operation.
    fn check_unary(&mut self, id: ExprId, op: UnaryOp, operand: ExprId, span: Span) -> Type {
        let operand_ty = self.check_expr(operand);
        match self.resolve_overloads(STDLIB.unary_overloads(op), false, &[operand_ty.clone()]) {
            Some((ids, result)) => {
                self.set_reference(id, Reference::Overloads(ids));
                self.set_type(id, result)
            }
            None => {
                let diagnostic =
                    diagnostics::no_matching_operator(op.symbol(), &[operand_ty], span);
                self.report(id, diagnostic);
                self.set_type(id, Type::Error)
            }
        }
    }

    /// Checks a binary operation.
    fn check_binary(
        &mut self,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        span: Span,
    ) -> Type {
        let lhs_ty = self.check_expr(lhs);
        let rhs_ty = self.check_expr(rhs);
        match self.resolve_overloads(
            STDLIB.binary_overloads(op),
            false,
            &[lhs_ty.clone(), rhs_ty.clone()],
        ) {
            Some((ids, result)) => {
                self.set_reference(id, Reference::Overloads(ids));
                self.set_type(id, result)
            }
            None => {
                let diagnostic =
                    diagnostics::no_matching_operator(op.symbol(), &[lhs_ty, rhs_ty], span);
                self.report(id, diagnostic);
                self.set_type(id, Type::Error)
            }
        }
    }

    /// Checks a list literal.
    fn check_list(&mut self, id: ExprId, elements: Vec<ExprId>) -> Type {
        let mut element_ty: Option<Type> = None;
        for element in elements {
            let ty = self.check_expr(element);
            match &element_ty {
                None => element_ty = Some(ty),
                Some(expected) => {
                    if self.options.homogeneous_aggregate_literals
                        && *expected != ty
                        && !ty.is_error()
                    {
                        let diagnostic = diagnostics::heterogeneous_literal(
                            expected,
                            &ty,
                            self.ast.span(element),
                        );
                        self.report(element, diagnostic);
                    }

                    element_ty = Some(common_type(expected, &ty));
                }
            }
        }

        self.set_type(id, Type::list(element_ty.unwrap_or(Type::Dyn)))
    }

    /// Checks a map literal.
    fn check_map(&mut self, id: ExprId, entries: Vec<tern_grammar::ast::MapEntry>) -> Type {
        let mut key_ty: Option<Type> = None;
        let mut value_ty: Option<Type> = None;
        for entry in entries {
            let key = self.check_expr(entry.key);
            if !key.is_valid_map_key() {
                let diagnostic =
                    diagnostics::invalid_map_key_type(&key, self.ast.span(entry.key));
                self.report(entry.key, diagnostic);
            }

            let value = self.check_expr(entry.value);

            match &key_ty {
                None => key_ty = Some(key),
                Some(expected) => {
                    if self.options.homogeneous_aggregate_literals
                        && *expected != key
                        && !key.is_error()
                    {
                        let diagnostic = diagnostics::heterogeneous_literal(
                            expected,
                            &key,
                            self.ast.span(entry.key),
                        );
                        self.report(entry.key, diagnostic);
                    }

                    key_ty = Some(common_type(expected, &key));
                }
            }

            match &value_ty {
                None => value_ty = Some(value),
                Some(expected) => {
                    if self.options.homogeneous_aggregate_literals
                        && *expected != value
                        && !value.is_error()
                    {
                        let diagnostic = diagnostics::heterogeneous_literal(
                            expected,
                            &value,
                            self.ast.span(entry.value),
                        );
                        self.report(entry.value, diagnostic);
                    }

                    value_ty = Some(common_type(expected, &value));
                }
            }
        }

        self.set_type(
            id,
            Type::map(key_ty.unwrap_or(Type::Dyn), value_ty.unwrap_or(Type::Dyn)),
        )
    }

    /// Checks a message literal.
    fn check_message(
        &mut self,
        id: ExprId,
        type_name: String,
        fields: Vec<tern_grammar::ast::FieldInit>,
        span: Span,
    ) -> Type {
        let descriptor = self.candidates(&type_name).into_iter().find_map(|candidate| {
            self.registry.message(&candidate).cloned()
        });

        let Some(descriptor) = descriptor else {
            let diagnostic = diagnostics::unknown_message_type(&type_name, span);
            self.report(id, diagnostic);
            for field in fields {
                self.check_expr(field.value);
            }

            return self.set_type(id, Type::Error);
        };

        let message_ty = Type::Message(descriptor.name().clone());
        self.set_reference(id, Reference::Type(message_ty.clone()));

        let mut seen = HashSet::new();
        for field in fields {
            if !seen.insert(field.name.clone()) {
                let diagnostic = diagnostics::duplicate_field(&field.name, field.name_span);
                self.report(id, diagnostic);
            }

            let value_ty = self.check_expr(field.value);
            match descriptor.field(&field.name) {
                Some(fd) => {
                    if !is_assignable(fd.ty(), &value_ty) {
                        let diagnostic = diagnostics::type_mismatch(
                            fd.ty(),
                            &value_ty,
                            self.ast.span(field.value),
                        );
                        self.report(field.value, diagnostic);
                    }
                }
                None => {
                    let diagnostic = diagnostics::no_such_field(
                        &message_ty,
                        &field.name,
                        field.name_span,
                    );
                    self.report(id, diagnostic);
                }
            }
        }

        self.set_type(id, message_ty)
    }

    /// Checks a comprehension.
    fn check_comprehension(&mut self, id: ExprId, c: Comprehension, span: Span) -> Type {
        if !self.options.comprehensions_enabled {
            let diagnostic = diagnostics::comprehensions_disabled(span);
            self.report(id, diagnostic);
        }

        self.comprehension_depth += 1;
        if self.comprehension_depth > self.options.comprehension_nesting_limit {
            let diagnostic = diagnostics::comprehension_too_deep(
                self.options.comprehension_nesting_limit,
                span,
            );
            self.report(id, diagnostic);
        }

        let range_ty = self.check_expr(c.range);
        let iter_ty = match &range_ty {
            Type::List(element) => (**element).clone(),
            Type::Map(map) => map.key_type().clone(),
            Type::Dyn | Type::Error | Type::Any | Type::TypeParam(_) => Type::Dyn,
            _ => {
                let diagnostic =
                    diagnostics::not_iterable(&range_ty, self.ast.span(c.range));
                self.report(c.range, diagnostic);
                Type::Error
            }
        };

        let init_ty = self.check_expr(c.init);
        self.scopes.push((c.accu_var.clone(), init_ty.clone()));

        let condition_ty = self.check_expr(c.condition);
        if !is_assignable(&Type::Primitive(PrimitiveTypeKind::Bool), &condition_ty) {
            let diagnostic = diagnostics::type_mismatch(
                &Type::Primitive(PrimitiveTypeKind::Bool),
                &condition_ty,
                self.ast.span(c.condition),
            );
            self.report(c.condition, diagnostic);
        }

        self.scopes.push((c.iter_var.clone(), iter_ty));
        let step_ty = self.check_expr(c.step);
        self.scopes.pop();

        // Widen the accumulator when the step produces a more general type
        if step_ty != init_ty {
            let widened = common_type(&init_ty, &step_ty);
            if let Some(entry) = self
                .scopes
                .iter_mut()
                .rev()
                .find(|(name, _)| *name == c.accu_var)
            {
                entry.1 = widened;
            }
        }

        let result_ty = self.check_expr(c.result);
        self.scopes.pop();
        self.comprehension_depth -= 1;

        self.set_type(id, result_ty)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tern_grammar::parse;

    use super::*;
    use crate::registry::FieldDescriptor;
    use crate::registry::MessageDescriptor;
    use crate::registry::Registry;

    /// Builds a frozen registry with the standard declarations and a few
    /// test declarations.
    fn test_registry() -> FrozenRegistry {
        let registry = Registry::new();
        STDLIB.install(&registry).unwrap();
        registry
            .register_variable("name", Type::Primitive(PrimitiveTypeKind::String))
            .unwrap();
        registry
            .register_variable(
                "tags",
                Type::list(Type::Primitive(PrimitiveTypeKind::String)),
            )
            .unwrap();
        registry
            .register_variable(
                "attributes",
                Type::map(Type::Primitive(PrimitiveTypeKind::String), Type::Dyn),
            )
            .unwrap();
        registry
            .register_message(
                MessageDescriptor::new("test.Request")
                    .with_field(
                        "path",
                        FieldDescriptor::new(Type::Primitive(PrimitiveTypeKind::String)),
                    )
                    .with_field(
                        "size",
                        FieldDescriptor::new(Type::Primitive(PrimitiveTypeKind::Int)),
                    ),
            )
            .unwrap();
        registry
            .register_variable("request", Type::message("test.Request"))
            .unwrap();
        registry.freeze()
    }

    /// Checks the given source, returning its root type and diagnostics.
    fn check_str(source: &str) -> (Type, Vec<String>) {
        check_with_options(source, &CheckerOptions::default())
    }

    /// Checks the given source with options.
    fn check_with_options(source: &str, options: &CheckerOptions) -> (Type, Vec<String>) {
        let result = parse(source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected parse diagnostics: {diagnostics:?}",
            diagnostics = result.diagnostics
        );

        let registry = test_registry();
        let result = check(result.ast, &registry, options);
        let root = result.checked.root().expect("should have a root");
        let ty = result
            .checked
            .type_of(root)
            .cloned()
            .unwrap_or(Type::Error);
        (
            ty,
            result
                .diagnostics
                .iter()
                .map(|d| d.message().to_string())
                .collect(),
        )
    }

    #[test]
    fn infers_arithmetic_types() {
        let (ty, diagnostics) = check_str("1 + 2 * 3");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Int));
    }

    #[test]
    fn rejects_mismatched_operands() {
        let (ty, diagnostics) = check_str("1 + 'foo'");
        assert_eq!(ty, Type::Error);
        assert_eq!(
            diagnostics,
            vec!["found no matching overload for operator `+` applied to (int, string)"]
        );
    }

    #[test]
    fn permits_cross_numeric_comparison() {
        let (ty, diagnostics) = check_str("1 < 2u");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
    }

    #[test]
    fn resolves_registered_variables() {
        let (ty, diagnostics) = check_str("name == 'y'");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
    }

    #[test]
    fn reports_undeclared_references() {
        let (ty, diagnostics) = check_str("missing == 1");
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
        assert_eq!(diagnostics, vec!["undeclared reference to `missing`"]);
    }

    #[test]
    fn resolves_message_fields() {
        let (ty, diagnostics) = check_str("request.path");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::String));
    }

    #[test]
    fn reports_unknown_fields() {
        let (_, diagnostics) = check_str("request.missing");
        assert_eq!(
            diagnostics,
            vec!["type `test.Request` does not have a field `missing`"]
        );
    }

    #[test]
    fn container_resolution_tries_prefixes() {
        let result = parse("Request{path: 'p'}");
        assert!(result.diagnostics.is_empty());
        let registry = test_registry();
        let options = CheckerOptions {
            container: "test".to_string(),
            ..Default::default()
        };
        let checked = check(result.ast, &registry, &options);
        assert!(
            checked.diagnostics.is_empty(),
            "unexpected diagnostics: {diagnostics:?}",
            diagnostics = checked.diagnostics
        );
        let root = checked.checked.root().unwrap();
        assert_eq!(
            checked.checked.type_of(root),
            Some(&Type::message("test.Request"))
        );
    }

    #[test]
    fn checks_comprehensions() {
        let (ty, diagnostics) = check_str("tags.exists(t, t == 'prod')");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
    }

    #[test]
    fn checks_presence_tests() {
        let (ty, diagnostics) = check_str("has(attributes.env) && attributes.env == 'prod'");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
    }

    #[test]
    fn optional_selection_produces_optional_types() {
        let (ty, diagnostics) = check_str("request.?path");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(
            ty,
            Type::optional(Type::Primitive(PrimitiveTypeKind::String))
        );
    }

    #[test]
    fn homogeneous_literals_reject_mixed_elements() {
        let options = CheckerOptions {
            homogeneous_aggregate_literals: true,
            ..Default::default()
        };
        let (_, diagnostics) = check_with_options("[1, 'two']", &options);
        assert_eq!(
            diagnostics,
            vec![
                "expected type `int` in a homogeneous aggregate literal, but found type `string`"
            ]
        );
    }

    #[test]
    fn enforces_comprehension_nesting_limit() {
        let options = CheckerOptions {
            comprehension_nesting_limit: 1,
            ..Default::default()
        };
        let (_, diagnostics) =
            check_with_options("tags.all(a, tags.exists(b, a == b))", &options);
        assert_eq!(
            diagnostics,
            vec!["comprehension exceeds the maximum nesting depth of 1"]
        );
    }

    #[test]
    fn type_identifiers_resolve_to_type_values() {
        let (ty, diagnostics) = check_str("type(1) == int");
        assert_eq!(diagnostics, Vec::<String>::new());
        assert_eq!(ty, Type::Primitive(PrimitiveTypeKind::Bool));
    }
}
