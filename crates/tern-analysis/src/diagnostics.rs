//! Module for all diagnostic creation functions.

use itertools::Itertools;
use tern_grammar::Diagnostic;
use tern_grammar::Span;

use crate::types::Type;

/// Creates an "undeclared reference" diagnostic.
pub fn undeclared_reference(name: &str, container: &str, span: Span) -> Diagnostic {
    let message = if container.is_empty() {
        format!("undeclared reference to `{name}`")
    } else {
        format!("undeclared reference to `{name}` (in container `{container}`)")
    };
    Diagnostic::error(message).with_highlight(span)
}

/// Creates an "unknown function" diagnostic.
pub fn unknown_function(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("unknown function `{name}`")).with_highlight(span)
}

/// Creates a "no such field" diagnostic.
pub fn no_such_field(ty: &Type, field: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("type `{ty}` does not have a field `{field}`"))
        .with_highlight(span)
}

/// Creates a "does not support field selection" diagnostic.
pub fn not_selectable(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!("type `{ty}` does not support field selection"))
        .with_highlight(span)
}

/// Creates a "does not support presence testing" diagnostic.
pub fn not_testable(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!("type `{ty}` does not support presence testing"))
        .with_highlight(span)
}

/// Creates a "does not support indexing" diagnostic.
pub fn not_indexable(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!("type `{ty}` does not support indexing")).with_highlight(span)
}

/// Creates a "does not support iteration" diagnostic.
pub fn not_iterable(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!("type `{ty}` does not support iteration")).with_highlight(span)
}

/// Creates a "selection requires the `.?` form" diagnostic for optional
/// operands.
pub fn optional_requires_safe_traversal(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "type `{ty}` must be traversed with the presence-safe `.?` or `[?]` forms"
    ))
    .with_highlight(span)
}

/// Creates a "type mismatch" diagnostic.
pub fn type_mismatch(expected: &Type, actual: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!("expected type `{expected}`, but found type `{actual}`"))
        .with_highlight(span)
}

/// Creates a "no matching overload" diagnostic for a function call.
pub fn no_matching_overload(name: &str, args: &[Type], span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "found no matching overload for `{name}` applied to ({args})",
        args = args.iter().map(|ty| ty.to_string()).join(", ")
    ))
    .with_highlight(span)
}

/// Creates a "no matching overload" diagnostic for an operator.
pub fn no_matching_operator(symbol: &str, operands: &[Type], span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "found no matching overload for operator `{symbol}` applied to ({operands})",
        operands = operands.iter().map(|ty| ty.to_string()).join(", ")
    ))
    .with_highlight(span)
}

/// Creates an "unknown message type" diagnostic.
pub fn unknown_message_type(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("unknown message type `{name}`")).with_highlight(span)
}

/// Creates a "duplicate field initializer" diagnostic.
pub fn duplicate_field(field: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("field `{field}` is initialized more than once"))
        .with_highlight(span)
}

/// Creates an "invalid map key type" diagnostic.
pub fn invalid_map_key_type(ty: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "type `{ty}` cannot be a map key (keys are restricted to bool, int, uint, and string)"
    ))
    .with_highlight(span)
}

/// Creates a "heterogeneous aggregate literal" diagnostic.
pub fn heterogeneous_literal(expected: &Type, actual: &Type, span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "expected type `{expected}` in a homogeneous aggregate literal, but found type `{actual}`"
    ))
    .with_highlight(span)
}

/// Creates a "comprehension nesting limit" diagnostic.
pub fn comprehension_too_deep(limit: usize, span: Span) -> Diagnostic {
    Diagnostic::error(format!(
        "comprehension exceeds the maximum nesting depth of {limit}"
    ))
    .with_highlight(span)
}

/// Creates a "comprehensions are disabled" diagnostic.
pub fn comprehensions_disabled(span: Span) -> Diagnostic {
    Diagnostic::error("comprehensions are disabled by the iteration limit").with_highlight(span)
}
