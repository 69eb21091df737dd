//! The declaration registry.
//!
//! The registry is the process-scoped catalog of named message types, enum
//! constants, variable declarations, and function declarations consumed by
//! the checker. It is append-only while a compilation environment is being
//! built and must be frozen into an immutable snapshot before use; the
//! frozen snapshot is freely shareable across threads.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::types::Type;

/// Represents an error registering or validating declarations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A message type was registered twice with differing shapes.
    #[error("message type `{0}` is already registered with a different shape")]
    ConflictingMessage(String),
    /// An enum was registered twice with differing constants.
    #[error("enum `{0}` is already registered with different constants")]
    ConflictingEnum(String),
    /// A variable was registered twice with differing types.
    #[error("variable `{0}` is already declared with a different type")]
    ConflictingVariable(String),
    /// An overload id was registered twice.
    #[error("overload `{id}` of function `{function}` is already declared")]
    DuplicateOverload {
        /// The function name.
        function: String,
        /// The conflicting overload id.
        id: String,
    },
    /// Two overloads of a function cannot be distinguished by their
    /// parameter types.
    #[error(
        "overloads `{first}` and `{second}` of function `{function}` have \
         indistinguishable parameter types"
    )]
    AmbiguousOverloads {
        /// The function name.
        function: String,
        /// The first conflicting overload id.
        first: String,
        /// The second conflicting overload id.
        second: String,
    },
    /// A declaration references an unregistered message type.
    #[error("declaration `{declaration}` references unregistered message type `{message}`")]
    UnknownMessageType {
        /// The referencing declaration.
        declaration: String,
        /// The unregistered message type name.
        message: String,
    },
}

/// Represents a field of a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// The type of the field.
    ty: Type,
    /// Whether the field supports explicit presence.
    ///
    /// Fields without explicit presence read as their kind's default value
    /// when unset; fields with explicit presence read as `null`.
    presence: bool,
}

impl FieldDescriptor {
    /// Constructs a new field descriptor of the given type.
    ///
    /// Wrapper, message, and well-known typed fields support presence by
    /// construction; other fields default to implicit presence.
    pub fn new(ty: Type) -> Self {
        let presence = ty.accepts_null();
        Self { ty, presence }
    }

    /// Marks the field as supporting explicit presence.
    pub fn with_presence(mut self) -> Self {
        self.presence = true;
        self
    }

    /// Gets the type of the field.
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Determines if the field supports explicit presence.
    pub fn has_presence(&self) -> bool {
        self.presence
    }
}

/// Represents the schema of a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// The fully-qualified name of the message type.
    name: Arc<str>,
    /// The fields of the message, in declaration order.
    fields: IndexMap<String, FieldDescriptor>,
}

impl MessageDescriptor {
    /// Constructs a new message descriptor with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Default::default(),
        }
    }

    /// Adds a field to the message.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Gets the fully-qualified name of the message type.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Gets a field of the message by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Iterates the fields of the message in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldDescriptor)> {
        self.fields.iter()
    }
}

/// Represents a registered enum and its constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// The fully-qualified name of the enum.
    name: Arc<str>,
    /// The constants of the enum, in declaration order.
    constants: IndexMap<String, i64>,
}

impl EnumDescriptor {
    /// Constructs a new enum descriptor with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            constants: Default::default(),
        }
    }

    /// Adds a constant to the enum.
    pub fn with_constant(mut self, name: impl Into<String>, value: i64) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    /// Gets the fully-qualified name of the enum.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Iterates the constants of the enum in declaration order.
    pub fn constants(&self) -> impl Iterator<Item = (&String, i64)> {
        self.constants.iter().map(|(n, v)| (n, *v))
    }
}

/// Represents a single overload of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overload {
    /// The overload id, unique within the registry.
    id: Arc<str>,
    /// The parameter types.
    ///
    /// For receiver-style overloads, the receiver is the first parameter.
    params: Vec<Type>,
    /// The result type.
    result: Type,
    /// Whether the overload is receiver-style (`x.f(...)`).
    receiver: bool,
    /// Whether the overload is strict.
    ///
    /// Strict overloads never observe error or unknown arguments: the
    /// evaluator propagates them instead of dispatching. Non-strict
    /// overloads receive them and may elect to absorb.
    strict: bool,
    /// Optional documentation for the overload.
    doc: Option<String>,
}

impl Overload {
    /// Constructs a new strict, global overload.
    pub fn new(id: impl Into<Arc<str>>, params: Vec<Type>, result: Type) -> Self {
        Self {
            id: id.into(),
            params,
            result,
            receiver: false,
            strict: true,
            doc: None,
        }
    }

    /// Marks the overload as receiver-style.
    ///
    /// The first parameter type is the receiver.
    pub fn with_receiver(mut self) -> Self {
        self.receiver = true;
        self
    }

    /// Marks the overload as non-strict.
    pub fn non_strict(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Sets the documentation of the overload.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Gets the id of the overload.
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// Gets the parameter types of the overload.
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Gets the result type of the overload.
    pub fn result(&self) -> &Type {
        &self.result
    }

    /// Determines if the overload is receiver-style.
    pub fn is_receiver(&self) -> bool {
        self.receiver
    }

    /// Determines if the overload is strict.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Gets the documentation of the overload, if any.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// Represents a function declaration with one or more overloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    /// The function name.
    name: Arc<str>,
    /// The overloads of the function.
    overloads: Vec<Overload>,
}

impl FunctionDecl {
    /// Constructs a new function declaration with the given name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            overloads: Vec::new(),
        }
    }

    /// Adds an overload to the function.
    pub fn with_overload(mut self, overload: Overload) -> Self {
        self.overloads.push(overload);
        self
    }

    /// Gets the name of the function.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Gets the overloads of the function.
    pub fn overloads(&self) -> &[Overload] {
        &self.overloads
    }
}

/// The mutable interior of a registry.
#[derive(Debug, Clone, Default)]
struct Inner {
    /// The registered message types by fully-qualified name.
    messages: HashMap<String, Arc<MessageDescriptor>>,
    /// The registered enums by fully-qualified name.
    enums: HashMap<String, Arc<EnumDescriptor>>,
    /// The registered enum constants by fully-qualified name.
    constants: HashMap<String, i64>,
    /// The registered variables by name.
    variables: HashMap<String, Type>,
    /// The registered functions by name.
    functions: HashMap<String, FunctionDecl>,
}

/// Represents a registry under construction.
///
/// The registry is append-only: declarations may be added but never removed
/// or changed. Freezing the registry yields an immutable
/// [`FrozenRegistry`] used by the checker and evaluator; evaluation paths
/// never lock.
#[derive(Debug, Default)]
pub struct Registry {
    /// The interior state, locked for thread-safe construction.
    inner: RwLock<Inner>,
}

impl Registry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a message type by its fully-qualified name.
    ///
    /// Registering the same message twice is permitted if the shapes are
    /// identical.
    pub fn register_message(&self, descriptor: MessageDescriptor) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let name = descriptor.name.to_string();
        if let Some(existing) = inner.messages.get(&name) {
            if **existing != descriptor {
                return Err(RegistryError::ConflictingMessage(name));
            }

            return Ok(());
        }

        inner.messages.insert(name, Arc::new(descriptor));
        Ok(())
    }

    /// Registers an enum and its constants.
    ///
    /// A constant named `C` of enum `pkg.E` is looked up as `pkg.E.C`.
    pub fn register_enum(&self, descriptor: EnumDescriptor) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let name = descriptor.name.to_string();
        if let Some(existing) = inner.enums.get(&name) {
            if **existing != descriptor {
                return Err(RegistryError::ConflictingEnum(name));
            }

            return Ok(());
        }

        for (constant, value) in descriptor.constants() {
            inner
                .constants
                .insert(format!("{name}.{constant}"), value);
        }

        inner.enums.insert(name, Arc::new(descriptor));
        Ok(())
    }

    /// Registers a variable with the given name and type.
    pub fn register_variable(
        &self,
        name: impl Into<String>,
        ty: Type,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let name = name.into();
        if let Some(existing) = inner.variables.get(&name) {
            if *existing != ty {
                return Err(RegistryError::ConflictingVariable(name));
            }

            return Ok(());
        }

        inner.variables.insert(name, ty);
        Ok(())
    }

    /// Registers a function declaration.
    ///
    /// If the function is already registered, the overloads are merged;
    /// each overload id must be unique within the registry.
    pub fn register_function(&self, decl: FunctionDecl) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        for overload in &decl.overloads {
            let duplicate = inner
                .functions
                .values()
                .flat_map(|f| &f.overloads)
                .any(|o| o.id == overload.id);
            if duplicate {
                return Err(RegistryError::DuplicateOverload {
                    function: decl.name.to_string(),
                    id: overload.id.to_string(),
                });
            }
        }

        match inner.functions.get_mut(decl.name.as_ref()) {
            Some(existing) => existing.overloads.extend(decl.overloads),
            None => {
                inner.functions.insert(decl.name.to_string(), decl);
            }
        }

        Ok(())
    }

    /// Freezes the registry into an immutable snapshot.
    pub fn freeze(&self) -> FrozenRegistry {
        let inner = self.inner.read().clone();
        let mut overloads = HashMap::new();
        for decl in inner.functions.values() {
            for overload in &decl.overloads {
                overloads.insert(
                    overload.id.to_string(),
                    (decl.name.clone(), overload.clone()),
                );
            }
        }

        FrozenRegistry { inner, overloads }
    }

    /// Freezes the registry, eagerly validating all declarations.
    ///
    /// Validation rejects function overloads whose parameter types are
    /// indistinguishable and declarations referencing unregistered message
    /// types.
    pub fn freeze_validated(&self) -> Result<FrozenRegistry, RegistryError> {
        let frozen = self.freeze();

        for (name, ty) in &frozen.inner.variables {
            frozen.validate_type(name, ty)?;
        }

        for decl in frozen.inner.functions.values() {
            for (i, first) in decl.overloads.iter().enumerate() {
                for ty in first.params().iter().chain([first.result()]) {
                    frozen.validate_type(decl.name.as_ref(), ty)?;
                }

                for second in &decl.overloads[i + 1..] {
                    if first.receiver == second.receiver
                        && first.params.len() == second.params.len()
                        && first.params == second.params
                    {
                        return Err(RegistryError::AmbiguousOverloads {
                            function: decl.name.to_string(),
                            first: first.id.to_string(),
                            second: second.id.to_string(),
                        });
                    }
                }
            }
        }

        Ok(frozen)
    }
}

/// Represents an immutable, shareable snapshot of a registry.
///
/// All lookups are O(1) by name.
#[derive(Debug, Clone)]
pub struct FrozenRegistry {
    /// The frozen declaration tables.
    inner: Inner,
    /// An index from overload id to its function name and overload.
    overloads: HashMap<String, (Arc<str>, Overload)>,
}

impl FrozenRegistry {
    /// Gets a message descriptor by fully-qualified name.
    pub fn message(&self, name: &str) -> Option<&Arc<MessageDescriptor>> {
        self.inner.messages.get(name)
    }

    /// Gets the type and presence support of a message field.
    pub fn field(&self, message: &str, field: &str) -> Option<&FieldDescriptor> {
        self.inner.messages.get(message)?.field(field)
    }

    /// Gets an enum descriptor by fully-qualified name.
    pub fn enumeration(&self, name: &str) -> Option<&Arc<EnumDescriptor>> {
        self.inner.enums.get(name)
    }

    /// Looks up a fully-qualified enum constant to its integer value.
    pub fn enum_constant(&self, name: &str) -> Option<i64> {
        self.inner.constants.get(name).copied()
    }

    /// Gets the declared type of a variable.
    pub fn variable(&self, name: &str) -> Option<&Type> {
        self.inner.variables.get(name)
    }

    /// Gets a function declaration by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.inner.functions.get(name)
    }

    /// Gets an overload and its function name by overload id.
    pub fn overload(&self, id: &str) -> Option<&(Arc<str>, Overload)> {
        self.overloads.get(id)
    }

    /// Validates that every message type referenced by the given type is
    /// registered.
    fn validate_type(&self, declaration: &str, ty: &Type) -> Result<(), RegistryError> {
        match ty {
            Type::Message(name) => {
                if !self.inner.messages.contains_key(name.as_ref()) {
                    return Err(RegistryError::UnknownMessageType {
                        declaration: declaration.to_string(),
                        message: name.to_string(),
                    });
                }

                Ok(())
            }
            Type::List(e) => self.validate_type(declaration, e),
            Type::Map(m) => {
                self.validate_type(declaration, m.key_type())?;
                self.validate_type(declaration, m.value_type())
            }
            Type::Type(t) => self.validate_type(declaration, t),
            Type::Optional(t) => self.validate_type(declaration, t),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::PrimitiveTypeKind;

    /// A shorthand for the primitive `int` type.
    fn int() -> Type {
        Type::Primitive(PrimitiveTypeKind::Int)
    }

    #[test]
    fn duplicate_identical_messages_are_permitted() {
        let registry = Registry::new();
        let descriptor = MessageDescriptor::new("pkg.Msg")
            .with_field("count", FieldDescriptor::new(int()));
        registry.register_message(descriptor.clone()).unwrap();
        registry.register_message(descriptor).unwrap();
    }

    #[test]
    fn conflicting_messages_are_rejected() {
        let registry = Registry::new();
        registry
            .register_message(MessageDescriptor::new("pkg.Msg"))
            .unwrap();
        let err = registry
            .register_message(
                MessageDescriptor::new("pkg.Msg")
                    .with_field("count", FieldDescriptor::new(int())),
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::ConflictingMessage("pkg.Msg".to_string())
        );
    }

    #[test]
    fn enum_constants_resolve_by_qualified_name() {
        let registry = Registry::new();
        registry
            .register_enum(
                EnumDescriptor::new("pkg.Color")
                    .with_constant("RED", 0)
                    .with_constant("GREEN", 1),
            )
            .unwrap();
        let frozen = registry.freeze();
        assert_eq!(frozen.enum_constant("pkg.Color.GREEN"), Some(1));
        assert_eq!(frozen.enum_constant("pkg.Color.BLUE"), None);
    }

    #[test]
    fn duplicate_overload_ids_are_rejected() {
        let registry = Registry::new();
        registry
            .register_function(
                FunctionDecl::new("f").with_overload(Overload::new("f_int", vec![int()], int())),
            )
            .unwrap();
        let err = registry
            .register_function(
                FunctionDecl::new("g").with_overload(Overload::new("f_int", vec![int()], int())),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOverload { .. }));
    }

    #[test]
    fn eager_validation_detects_ambiguous_overloads() {
        let registry = Registry::new();
        registry
            .register_function(
                FunctionDecl::new("f")
                    .with_overload(Overload::new("f_a", vec![int()], int()))
                    .with_overload(Overload::new("f_b", vec![int()], Type::Dyn)),
            )
            .unwrap();
        let err = registry.freeze_validated().unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousOverloads { .. }));
    }

    #[test]
    fn eager_validation_detects_unknown_messages() {
        let registry = Registry::new();
        registry
            .register_variable("m", Type::message("pkg.Missing"))
            .unwrap();
        let err = registry.freeze_validated().unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMessageType { .. }));
    }
}
