//! Representation of the Tern type system.
//!
//! Types form a lattice with `dyn` at the top and `error` at the bottom.
//! Primitive types are singletons (enum variants); parametric types compare
//! structurally; message types compare nominally by fully-qualified name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Represents a kind of primitive Tern type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTypeKind {
    /// The type is a `bool`.
    Bool,
    /// The type is a 64-bit signed `int`.
    Int,
    /// The type is a 64-bit unsigned `uint`.
    Uint,
    /// The type is a 64-bit IEEE `double`.
    Double,
    /// The type is a `string`.
    String,
    /// The type is a `bytes` value.
    Bytes,
}

impl fmt::Display for PrimitiveTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

/// Represents a map type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapType {
    /// The key type of the map.
    key: Type,
    /// The value type of the map.
    value: Type,
}

impl MapType {
    /// Constructs a new map type.
    pub fn new(key: Type, value: Type) -> Self {
        Self { key, value }
    }

    /// Gets the key type of the map.
    pub fn key_type(&self) -> &Type {
        &self.key
    }

    /// Gets the value type of the map.
    pub fn value_type(&self) -> &Type {
        &self.value
    }
}

/// Represents a Tern type.
///
/// Types are cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// The top type: assignable to and from every type.
    Dyn,
    /// The bottom marker produced by a previous type error.
    ///
    /// The error type assigns to everything so that a single mistake does
    /// not cascade into a flood of diagnostics.
    Error,
    /// The type of the `null` literal.
    ///
    /// Null is distinct from absence and is assignable only to wrapper,
    /// message, and well-known types.
    Null,
    /// A primitive type.
    Primitive(PrimitiveTypeKind),
    /// A nullable view of a primitive type.
    Wrapper(PrimitiveTypeKind),
    /// The well-known duration type.
    Duration,
    /// The well-known timestamp type.
    Timestamp,
    /// The well-known `any` type.
    Any,
    /// The well-known JSON value type.
    Json,
    /// A list type with its element type.
    List(Arc<Type>),
    /// A map type.
    Map(Arc<MapType>),
    /// A message type, identified by its fully-qualified name.
    Message(Arc<str>),
    /// The type of a type value, carrying its target.
    ///
    /// The expression `type(x)` has this type; an unparameterized type value
    /// carries `dyn` as its target.
    Type(Arc<Type>),
    /// A type parameter used during overload resolution.
    TypeParam(Arc<str>),
    /// An optional type produced by the presence-safe `.?` and `[?]` forms.
    Optional(Arc<Type>),
}

impl Type {
    /// Constructs a new list type with the given element type.
    pub fn list(element: Type) -> Self {
        Self::List(Arc::new(element))
    }

    /// Constructs a new map type with the given key and value types.
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map(Arc::new(MapType::new(key, value)))
    }

    /// Constructs a new message type with the given fully-qualified name.
    pub fn message(name: impl Into<Arc<str>>) -> Self {
        Self::Message(name.into())
    }

    /// Constructs a new type value type with the given target.
    pub fn type_of(target: Type) -> Self {
        Self::Type(Arc::new(target))
    }

    /// Constructs a new type parameter with the given name.
    pub fn param(name: impl Into<Arc<str>>) -> Self {
        Self::TypeParam(name.into())
    }

    /// Constructs a new optional type with the given inner type.
    pub fn optional(inner: Type) -> Self {
        Self::Optional(Arc::new(inner))
    }

    /// Determines if the type is `dyn`.
    pub fn is_dyn(&self) -> bool {
        matches!(self, Self::Dyn)
    }

    /// Determines if the type is the error marker.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Determines if the type may be used as a map key.
    ///
    /// Map keys are restricted to `bool`, `int`, `uint`, and `string`.
    pub fn is_valid_map_key(&self) -> bool {
        matches!(
            self,
            Self::Dyn
                | Self::Error
                | Self::TypeParam(_)
                | Self::Primitive(
                    PrimitiveTypeKind::Bool
                        | PrimitiveTypeKind::Int
                        | PrimitiveTypeKind::Uint
                        | PrimitiveTypeKind::String
                )
        )
    }

    /// Determines if `null` may be assigned to this type.
    pub fn accepts_null(&self) -> bool {
        matches!(
            self,
            Self::Dyn
                | Self::Error
                | Self::Null
                | Self::Wrapper(_)
                | Self::Message(_)
                | Self::Duration
                | Self::Timestamp
                | Self::Any
                | Self::Json
                | Self::Optional(_)
        )
    }

    /// Determines if the named type parameter occurs within this type.
    pub fn references_param(&self, name: &str) -> bool {
        match self {
            Self::TypeParam(n) => **n == *name,
            Self::List(e) => e.references_param(name),
            Self::Map(m) => m.key.references_param(name) || m.value.references_param(name),
            Self::Type(t) => t.references_param(name),
            Self::Optional(t) => t.references_param(name),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dyn => write!(f, "dyn"),
            Self::Error => write!(f, "*error*"),
            Self::Null => write!(f, "null_type"),
            Self::Primitive(kind) => kind.fmt(f),
            Self::Wrapper(kind) => write!(f, "wrapper({kind})"),
            Self::Duration => write!(f, "duration"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Any => write!(f, "any"),
            Self::Json => write!(f, "json"),
            Self::List(e) => write!(f, "list({e})"),
            Self::Map(m) => write!(f, "map({k}, {v})", k = m.key, v = m.value),
            Self::Message(name) => write!(f, "{name}"),
            Self::Type(t) => write!(f, "type({t})"),
            Self::TypeParam(name) => write!(f, "{name}"),
            Self::Optional(t) => write!(f, "optional({t})"),
        }
    }
}

/// Represents a substitution of type parameters built up by unification.
///
/// Overload resolution clones the substitution before attempting each
/// candidate and keeps the clone only if the candidate succeeds.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    /// The bindings of type parameter names to types.
    bindings: HashMap<Arc<str>, Type>,
}

impl Substitution {
    /// Creates a new, empty substitution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the binding of the named type parameter, if any.
    pub fn binding(&self, name: &str) -> Option<&Type> {
        self.bindings.get(name)
    }

    /// Unifies a declared (parameter) type with an argument type.
    ///
    /// Returns `false` if the types do not unify; the substitution may have
    /// been partially extended in that case, so callers clone before
    /// speculative attempts.
    pub fn unify(&mut self, param: &Type, arg: &Type) -> bool {
        match (param, arg) {
            // `dyn` and the error marker unify with everything
            (Type::Dyn, _) | (_, Type::Dyn) => true,
            (Type::Error, _) | (_, Type::Error) => true,

            (Type::TypeParam(name), arg) => {
                if let Some(bound) = self.bindings.get(name.as_ref()).cloned() {
                    return self.unify(&bound, arg);
                }

                // The occurs check rejects a self-referencing binding
                if arg.references_param(name) {
                    return false;
                }

                self.bindings.insert(name.clone(), arg.clone());
                true
            }

            (Type::Null, Type::Null) => true,
            (param, Type::Null) => param.accepts_null(),

            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::Wrapper(a), Type::Wrapper(b)) => a == b,
            (Type::Wrapper(a), Type::Primitive(b)) => a == b,

            (Type::Duration, Type::Duration) => true,
            (Type::Timestamp, Type::Timestamp) => true,
            // `any` accepts every value by packing it
            (Type::Any, _) => true,
            (Type::Json, Type::Json) => true,
            // JSON accepts any value whose conversion is checked at runtime
            (Type::Json, _) => true,

            (Type::List(a), Type::List(b)) => self.unify(a, b),
            (Type::Map(a), Type::Map(b)) => {
                self.unify(&a.key, &b.key) && self.unify(&a.value, &b.value)
            }
            (Type::Message(a), Type::Message(b)) => a == b,
            (Type::Type(a), Type::Type(b)) => self.unify(a, b),
            (Type::Optional(a), Type::Optional(b)) => self.unify(a, b),

            _ => false,
        }
    }

    /// Applies the substitution to the given type.
    ///
    /// Unbound type parameters resolve to `dyn`.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::TypeParam(name) => match self.bindings.get(name.as_ref()) {
                Some(bound) => self.apply(&bound.clone()),
                None => Type::Dyn,
            },
            Type::List(e) => Type::list(self.apply(e)),
            Type::Map(m) => Type::map(self.apply(&m.key), self.apply(&m.value)),
            Type::Type(t) => Type::type_of(self.apply(t)),
            Type::Optional(t) => Type::optional(self.apply(t)),
            other => other.clone(),
        }
    }
}

/// Determines if a value of type `source` is assignable to type `target`.
pub fn is_assignable(target: &Type, source: &Type) -> bool {
    Substitution::new().unify(target, source)
}

/// Computes the least upper bound of two types.
///
/// The result widens to `dyn` when the types disagree.
pub fn common_type(a: &Type, b: &Type) -> Type {
    if a == b {
        return a.clone();
    }

    if a.is_error() {
        return b.clone();
    }

    if b.is_error() {
        return a.clone();
    }

    match (a, b) {
        (Type::List(x), Type::List(y)) => Type::list(common_type(x, y)),
        (Type::Map(x), Type::Map(y)) => Type::map(
            common_type(&x.key, &y.key),
            common_type(&x.value, &y.value),
        ),
        (Type::Null, other) | (other, Type::Null) => match other {
            Type::Primitive(kind) => Type::Wrapper(*kind),
            other if other.accepts_null() => other.clone(),
            _ => Type::Dyn,
        },
        (Type::Wrapper(k), Type::Primitive(p)) | (Type::Primitive(p), Type::Wrapper(k))
            if k == p =>
        {
            Type::Wrapper(*k)
        }
        _ => Type::Dyn,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn primitive_types_are_singletons() {
        assert_eq!(
            Type::Primitive(PrimitiveTypeKind::Int),
            Type::Primitive(PrimitiveTypeKind::Int)
        );
        assert_ne!(
            Type::Primitive(PrimitiveTypeKind::Int),
            Type::Primitive(PrimitiveTypeKind::Uint)
        );
    }

    #[test]
    fn structural_equality_recurses() {
        assert_eq!(
            Type::list(Type::map(
                Type::Primitive(PrimitiveTypeKind::String),
                Type::Dyn
            )),
            Type::list(Type::map(
                Type::Primitive(PrimitiveTypeKind::String),
                Type::Dyn
            )),
        );
        assert_ne!(
            Type::list(Type::Primitive(PrimitiveTypeKind::Int)),
            Type::list(Type::Primitive(PrimitiveTypeKind::Double)),
        );
    }

    #[test]
    fn dyn_unifies_with_everything() {
        let mut sub = Substitution::new();
        assert!(sub.unify(&Type::Dyn, &Type::Primitive(PrimitiveTypeKind::Int)));
        assert!(sub.unify(&Type::list(Type::Dyn), &Type::list(Type::Timestamp)));
    }

    #[test]
    fn null_assigns_to_wrappers_and_messages() {
        let mut sub = Substitution::new();
        assert!(sub.unify(&Type::Wrapper(PrimitiveTypeKind::Int), &Type::Null));
        assert!(sub.unify(&Type::message("pkg.Msg"), &Type::Null));
        assert!(!sub.unify(&Type::Primitive(PrimitiveTypeKind::Int), &Type::Null));
    }

    #[test]
    fn type_parameters_bind_and_propagate() {
        let mut sub = Substitution::new();
        let param = Type::param("A");
        assert!(sub.unify(&param, &Type::Primitive(PrimitiveTypeKind::Int)));
        assert!(sub.unify(&param, &Type::Primitive(PrimitiveTypeKind::Int)));
        assert!(!sub.unify(&param, &Type::Primitive(PrimitiveTypeKind::String)));
        assert_eq!(
            sub.apply(&Type::list(param)),
            Type::list(Type::Primitive(PrimitiveTypeKind::Int))
        );
    }

    #[test]
    fn occurs_check_rejects_recursive_bindings() {
        let mut sub = Substitution::new();
        assert!(!sub.unify(&Type::param("A"), &Type::list(Type::param("A"))));
    }

    #[test]
    fn common_type_widens_to_dyn() {
        assert_eq!(
            common_type(
                &Type::Primitive(PrimitiveTypeKind::Int),
                &Type::Primitive(PrimitiveTypeKind::Int)
            ),
            Type::Primitive(PrimitiveTypeKind::Int)
        );
        assert_eq!(
            common_type(
                &Type::Primitive(PrimitiveTypeKind::Int),
                &Type::Primitive(PrimitiveTypeKind::String)
            ),
            Type::Dyn
        );
        assert_eq!(
            common_type(&Type::Null, &Type::Primitive(PrimitiveTypeKind::Int)),
            Type::Wrapper(PrimitiveTypeKind::Int)
        );
    }
}
