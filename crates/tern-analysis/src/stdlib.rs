//! The standard declaration set.
//!
//! Operators are not registry entries: the checker resolves them against the
//! fixed overload tables defined here and the evaluator implements them
//! natively. The baseline function catalog (conversions, string predicates,
//! time component accessors, optional accessors) is declared through the
//! ordinary registry contract so that hosts interact with one mechanism for
//! both standard and custom functions.

use std::collections::HashMap;
use std::sync::LazyLock;

use tern_grammar::ast::BinaryOp;
use tern_grammar::ast::UnaryOp;
use tern_grammar::parser::NOT_STRICTLY_FALSE;

use crate::registry::FunctionDecl;
use crate::registry::Overload;
use crate::registry::Registry;
use crate::registry::RegistryError;
use crate::types::PrimitiveTypeKind;
use crate::types::Type;

/// The standard library declarations.
pub static STDLIB: LazyLock<StandardLibrary> = LazyLock::new(StandardLibrary::new);

/// A shorthand for the `bool` type.
fn bool_ty() -> Type {
    Type::Primitive(PrimitiveTypeKind::Bool)
}

/// A shorthand for the `int` type.
fn int() -> Type {
    Type::Primitive(PrimitiveTypeKind::Int)
}

/// A shorthand for the `uint` type.
fn uint() -> Type {
    Type::Primitive(PrimitiveTypeKind::Uint)
}

/// A shorthand for the `double` type.
fn double() -> Type {
    Type::Primitive(PrimitiveTypeKind::Double)
}

/// A shorthand for the `string` type.
fn string() -> Type {
    Type::Primitive(PrimitiveTypeKind::String)
}

/// A shorthand for the `bytes` type.
fn bytes() -> Type {
    Type::Primitive(PrimitiveTypeKind::Bytes)
}

/// A shorthand for the `A` type parameter.
fn param_a() -> Type {
    Type::param("A")
}

/// A shorthand for the `B` type parameter.
fn param_b() -> Type {
    Type::param("B")
}

/// Resolves a standard type identifier to the type it names.
///
/// Type identifiers resolve to type values so that expressions like
/// `type(x) == int` check and evaluate; they are not activation variables.
pub fn type_identifier(name: &str) -> Option<Type> {
    match name {
        "bool" => Some(bool_ty()),
        "int" => Some(int()),
        "uint" => Some(uint()),
        "double" => Some(double()),
        "string" => Some(string()),
        "bytes" => Some(bytes()),
        "list" => Some(Type::list(Type::Dyn)),
        "map" => Some(Type::map(Type::Dyn, Type::Dyn)),
        "duration" => Some(Type::Duration),
        "timestamp" => Some(Type::Timestamp),
        "null_type" => Some(Type::Null),
        "type" => Some(Type::type_of(Type::Dyn)),
        _ => None,
    }
}

/// Represents the standard library declarations.
///
/// The set is process-wide and constructed once; see [`STDLIB`].
#[derive(Debug)]
pub struct StandardLibrary {
    /// The operator overload tables for unary operators.
    unary: HashMap<UnaryOp, Vec<Overload>>,
    /// The operator overload tables for binary operators.
    binary: HashMap<BinaryOp, Vec<Overload>>,
    /// The standard function declarations.
    functions: Vec<FunctionDecl>,
}

impl StandardLibrary {
    /// Constructs the standard library declarations.
    fn new() -> Self {
        Self {
            unary: Self::unary_table(),
            binary: Self::binary_table(),
            functions: Self::function_decls(),
        }
    }

    /// Gets the overloads of a unary operator.
    pub fn unary_overloads(&self, op: UnaryOp) -> &[Overload] {
        self.unary.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gets the overloads of a binary operator.
    pub fn binary_overloads(&self, op: BinaryOp) -> &[Overload] {
        self.binary.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gets the standard function declarations.
    pub fn functions(&self) -> &[FunctionDecl] {
        &self.functions
    }

    /// Installs the standard declarations into the given registry.
    pub fn install(&self, registry: &Registry) -> Result<(), RegistryError> {
        for decl in &self.functions {
            registry.register_function(decl.clone())?;
        }

        Ok(())
    }

    /// Builds the unary operator overload table.
    fn unary_table() -> HashMap<UnaryOp, Vec<Overload>> {
        let mut table = HashMap::new();
        table.insert(
            UnaryOp::Not,
            vec![Overload::new("logical_not", vec![bool_ty()], bool_ty())],
        );
        table.insert(
            UnaryOp::Negate,
            vec![
                Overload::new("negate_int", vec![int()], int()),
                Overload::new("negate_double", vec![double()], double()),
            ],
        );
        table
    }

    /// Builds the binary operator overload table.
    fn binary_table() -> HashMap<BinaryOp, Vec<Overload>> {
        /// Builds the overload rows for a cross-numeric comparison operator.
        fn comparisons(name: &str, result: Type) -> Vec<Overload> {
            let mut overloads = vec![Overload::new(
                name.to_string(),
                vec![param_a(), param_a()],
                result.clone(),
            )];
            let pairs: [(&str, Type, Type); 6] = [
                ("int_uint", int(), uint()),
                ("uint_int", uint(), int()),
                ("int_double", int(), double()),
                ("double_int", double(), int()),
                ("uint_double", uint(), double()),
                ("double_uint", double(), uint()),
            ];
            for (suffix, lhs, rhs) in pairs {
                overloads.push(Overload::new(
                    format!("{name}_{suffix}"),
                    vec![lhs, rhs],
                    result.clone(),
                ));
            }

            overloads
        }

        let mut table = HashMap::new();
        table.insert(
            BinaryOp::Or,
            vec![Overload::new(
                "logical_or",
                vec![bool_ty(), bool_ty()],
                bool_ty(),
            )],
        );
        table.insert(
            BinaryOp::And,
            vec![Overload::new(
                "logical_and",
                vec![bool_ty(), bool_ty()],
                bool_ty(),
            )],
        );
        table.insert(BinaryOp::Equal, comparisons("equals", bool_ty()));
        table.insert(BinaryOp::NotEqual, comparisons("not_equals", bool_ty()));

        for (op, name) in [
            (BinaryOp::Less, "less"),
            (BinaryOp::LessEqual, "less_equals"),
            (BinaryOp::Greater, "greater"),
            (BinaryOp::GreaterEqual, "greater_equals"),
        ] {
            let mut overloads = Vec::new();
            let ordered: [(&str, Type); 8] = [
                ("bool", bool_ty()),
                ("int", int()),
                ("uint", uint()),
                ("double", double()),
                ("string", string()),
                ("bytes", bytes()),
                ("duration", Type::Duration),
                ("timestamp", Type::Timestamp),
            ];
            for (suffix, ty) in ordered {
                overloads.push(Overload::new(
                    format!("{name}_{suffix}"),
                    vec![ty.clone(), ty],
                    bool_ty(),
                ));
            }

            let pairs: [(&str, Type, Type); 6] = [
                ("int_uint", int(), uint()),
                ("uint_int", uint(), int()),
                ("int_double", int(), double()),
                ("double_int", double(), int()),
                ("uint_double", uint(), double()),
                ("double_uint", double(), uint()),
            ];
            for (suffix, lhs, rhs) in pairs {
                overloads.push(Overload::new(
                    format!("{name}_{suffix}"),
                    vec![lhs, rhs],
                    bool_ty(),
                ));
            }

            table.insert(op, overloads);
        }

        table.insert(
            BinaryOp::In,
            vec![
                Overload::new("in_list", vec![param_a(), Type::list(param_a())], bool_ty()),
                Overload::new(
                    "in_map",
                    vec![param_a(), Type::map(param_a(), param_b())],
                    bool_ty(),
                ),
            ],
        );

        table.insert(
            BinaryOp::Add,
            vec![
                Overload::new("add_int", vec![int(), int()], int()),
                Overload::new("add_uint", vec![uint(), uint()], uint()),
                Overload::new("add_double", vec![double(), double()], double()),
                Overload::new("add_string", vec![string(), string()], string()),
                Overload::new("add_bytes", vec![bytes(), bytes()], bytes()),
                Overload::new(
                    "add_list",
                    vec![Type::list(param_a()), Type::list(param_a())],
                    Type::list(param_a()),
                ),
                Overload::new(
                    "add_duration",
                    vec![Type::Duration, Type::Duration],
                    Type::Duration,
                ),
                Overload::new(
                    "add_duration_timestamp",
                    vec![Type::Duration, Type::Timestamp],
                    Type::Timestamp,
                ),
                Overload::new(
                    "add_timestamp_duration",
                    vec![Type::Timestamp, Type::Duration],
                    Type::Timestamp,
                ),
            ],
        );
        table.insert(
            BinaryOp::Subtract,
            vec![
                Overload::new("subtract_int", vec![int(), int()], int()),
                Overload::new("subtract_uint", vec![uint(), uint()], uint()),
                Overload::new("subtract_double", vec![double(), double()], double()),
                Overload::new(
                    "subtract_duration",
                    vec![Type::Duration, Type::Duration],
                    Type::Duration,
                ),
                Overload::new(
                    "subtract_timestamp_duration",
                    vec![Type::Timestamp, Type::Duration],
                    Type::Timestamp,
                ),
                Overload::new(
                    "subtract_timestamp",
                    vec![Type::Timestamp, Type::Timestamp],
                    Type::Duration,
                ),
            ],
        );
        table.insert(
            BinaryOp::Multiply,
            vec![
                Overload::new("multiply_int", vec![int(), int()], int()),
                Overload::new("multiply_uint", vec![uint(), uint()], uint()),
                Overload::new("multiply_double", vec![double(), double()], double()),
            ],
        );
        table.insert(
            BinaryOp::Divide,
            vec![
                Overload::new("divide_int", vec![int(), int()], int()),
                Overload::new("divide_uint", vec![uint(), uint()], uint()),
                Overload::new("divide_double", vec![double(), double()], double()),
            ],
        );
        table.insert(
            BinaryOp::Remainder,
            vec![
                Overload::new("remainder_int", vec![int(), int()], int()),
                Overload::new("remainder_uint", vec![uint(), uint()], uint()),
            ],
        );
        table
    }

    /// Builds the standard function declarations.
    fn function_decls() -> Vec<FunctionDecl> {
        let mut functions = Vec::new();

        functions.push(
            FunctionDecl::new("size")
                .with_overload(Overload::new("size_string", vec![string()], int()))
                .with_overload(Overload::new("size_bytes", vec![bytes()], int()))
                .with_overload(Overload::new(
                    "size_list",
                    vec![Type::list(param_a())],
                    int(),
                ))
                .with_overload(Overload::new(
                    "size_map",
                    vec![Type::map(param_a(), param_b())],
                    int(),
                ))
                .with_overload(Overload::new("string_size", vec![string()], int()).with_receiver())
                .with_overload(Overload::new("bytes_size", vec![bytes()], int()).with_receiver())
                .with_overload(
                    Overload::new("list_size", vec![Type::list(param_a())], int())
                        .with_receiver(),
                )
                .with_overload(
                    Overload::new("map_size", vec![Type::map(param_a(), param_b())], int())
                        .with_receiver(),
                ),
        );

        functions.push(FunctionDecl::new("contains").with_overload(
            Overload::new("contains_string", vec![string(), string()], bool_ty())
                .with_receiver(),
        ));
        functions.push(FunctionDecl::new("startsWith").with_overload(
            Overload::new("starts_with_string", vec![string(), string()], bool_ty())
                .with_receiver(),
        ));
        functions.push(FunctionDecl::new("endsWith").with_overload(
            Overload::new("ends_with_string", vec![string(), string()], bool_ty())
                .with_receiver(),
        ));
        functions.push(
            FunctionDecl::new("matches")
                .with_overload(Overload::new(
                    "matches_string",
                    vec![string(), string()],
                    bool_ty(),
                ))
                .with_overload(
                    Overload::new("string_matches", vec![string(), string()], bool_ty())
                        .with_receiver(),
                ),
        );

        functions.push(
            FunctionDecl::new("int")
                .with_overload(Overload::new("int_to_int", vec![int()], int()))
                .with_overload(Overload::new("uint_to_int", vec![uint()], int()))
                .with_overload(Overload::new("double_to_int", vec![double()], int()))
                .with_overload(Overload::new("string_to_int", vec![string()], int()))
                .with_overload(Overload::new("timestamp_to_int", vec![Type::Timestamp], int())),
        );
        functions.push(
            FunctionDecl::new("uint")
                .with_overload(Overload::new("uint_to_uint", vec![uint()], uint()))
                .with_overload(Overload::new("int_to_uint", vec![int()], uint()))
                .with_overload(Overload::new("double_to_uint", vec![double()], uint()))
                .with_overload(Overload::new("string_to_uint", vec![string()], uint())),
        );
        functions.push(
            FunctionDecl::new("double")
                .with_overload(Overload::new("double_to_double", vec![double()], double()))
                .with_overload(Overload::new("int_to_double", vec![int()], double()))
                .with_overload(Overload::new("uint_to_double", vec![uint()], double()))
                .with_overload(Overload::new("string_to_double", vec![string()], double())),
        );
        functions.push(
            FunctionDecl::new("string")
                .with_overload(Overload::new("string_to_string", vec![string()], string()))
                .with_overload(Overload::new("int_to_string", vec![int()], string()))
                .with_overload(Overload::new("uint_to_string", vec![uint()], string()))
                .with_overload(Overload::new("double_to_string", vec![double()], string()))
                .with_overload(Overload::new("bool_to_string", vec![bool_ty()], string()))
                .with_overload(Overload::new("bytes_to_string", vec![bytes()], string()))
                .with_overload(Overload::new(
                    "timestamp_to_string",
                    vec![Type::Timestamp],
                    string(),
                ))
                .with_overload(Overload::new(
                    "duration_to_string",
                    vec![Type::Duration],
                    string(),
                )),
        );
        functions.push(
            FunctionDecl::new("bytes")
                .with_overload(Overload::new("bytes_to_bytes", vec![bytes()], bytes()))
                .with_overload(Overload::new("string_to_bytes", vec![string()], bytes())),
        );
        functions.push(
            FunctionDecl::new("bool")
                .with_overload(Overload::new("bool_to_bool", vec![bool_ty()], bool_ty()))
                .with_overload(Overload::new("string_to_bool", vec![string()], bool_ty())),
        );
        functions.push(
            FunctionDecl::new("duration")
                .with_overload(Overload::new(
                    "duration_to_duration",
                    vec![Type::Duration],
                    Type::Duration,
                ))
                .with_overload(Overload::new(
                    "string_to_duration",
                    vec![string()],
                    Type::Duration,
                )),
        );
        functions.push(
            FunctionDecl::new("timestamp")
                .with_overload(Overload::new(
                    "timestamp_to_timestamp",
                    vec![Type::Timestamp],
                    Type::Timestamp,
                ))
                .with_overload(Overload::new(
                    "string_to_timestamp",
                    vec![string()],
                    Type::Timestamp,
                ))
                .with_overload(Overload::new(
                    "int_to_timestamp",
                    vec![int()],
                    Type::Timestamp,
                )),
        );
        functions.push(
            FunctionDecl::new("dyn")
                .with_overload(Overload::new("to_dyn", vec![param_a()], Type::Dyn)),
        );
        functions.push(FunctionDecl::new("type").with_overload(Overload::new(
            "type",
            vec![param_a()],
            Type::type_of(param_a()),
        )));

        for (function, id, zoned) in [
            ("getFullYear", "timestamp_get_full_year", true),
            ("getMonth", "timestamp_get_month", true),
            ("getDayOfMonth", "timestamp_get_day_of_month", true),
            ("getDate", "timestamp_get_date", true),
            ("getHours", "timestamp_get_hours", true),
            ("getMinutes", "timestamp_get_minutes", true),
            ("getSeconds", "timestamp_get_seconds", true),
            ("getMilliseconds", "timestamp_get_milliseconds", true),
        ] {
            let mut decl = FunctionDecl::new(function).with_overload(
                Overload::new(id, vec![Type::Timestamp], int()).with_receiver(),
            );
            if zoned {
                decl = decl.with_overload(
                    Overload::new(
                        format!("{id}_with_tz"),
                        vec![Type::Timestamp, string()],
                        int(),
                    )
                    .with_receiver(),
                );
            }

            functions.push(decl);
        }

        for (function, id) in [
            ("getHours", "duration_get_hours"),
            ("getMinutes", "duration_get_minutes"),
            ("getSeconds", "duration_get_seconds"),
            ("getMilliseconds", "duration_get_milliseconds"),
        ] {
            functions.push(FunctionDecl::new(function).with_overload(
                Overload::new(id, vec![Type::Duration], int()).with_receiver(),
            ));
        }

        functions.push(FunctionDecl::new("hasValue").with_overload(
            Overload::new(
                "optional_has_value",
                vec![Type::optional(param_a())],
                bool_ty(),
            )
            .with_receiver(),
        ));
        functions.push(FunctionDecl::new("value").with_overload(
            Overload::new("optional_value", vec![Type::optional(param_a())], param_a())
                .with_receiver(),
        ));
        functions.push(FunctionDecl::new("orValue").with_overload(
            Overload::new(
                "optional_or_value",
                vec![Type::optional(param_a()), param_a()],
                param_a(),
            )
            .with_receiver(),
        ));

        // The internal comprehension loop condition; not reachable from
        // source text as `@` never lexes into an identifier
        functions.push(FunctionDecl::new(NOT_STRICTLY_FALSE).with_overload(
            Overload::new("not_strictly_false", vec![bool_ty()], bool_ty()).non_strict(),
        ));

        functions
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn installs_into_a_registry() {
        let registry = Registry::new();
        STDLIB.install(&registry).unwrap();
        let frozen = registry.freeze();
        assert!(frozen.function("size").is_some());
        assert!(frozen.function("matches").is_some());
    }

    #[test]
    fn type_identifiers_name_types() {
        assert_eq!(type_identifier("int"), Some(int()));
        assert_eq!(type_identifier("list"), Some(Type::list(Type::Dyn)));
        assert_eq!(type_identifier("widget"), None);
    }

    #[test]
    fn standard_declarations_validate_eagerly() {
        let registry = Registry::new();
        STDLIB.install(&registry).unwrap();
        registry.freeze_validated().unwrap();
    }

    #[test]
    fn operator_tables_cover_all_operators() {
        for op in [
            BinaryOp::Or,
            BinaryOp::And,
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Less,
            BinaryOp::LessEqual,
            BinaryOp::Greater,
            BinaryOp::GreaterEqual,
            BinaryOp::In,
            BinaryOp::Add,
            BinaryOp::Subtract,
            BinaryOp::Multiply,
            BinaryOp::Divide,
            BinaryOp::Remainder,
        ] {
            assert!(
                !STDLIB.binary_overloads(op).is_empty(),
                "missing overloads for operator `{symbol}`",
                symbol = op.symbol()
            );
        }
    }
}
