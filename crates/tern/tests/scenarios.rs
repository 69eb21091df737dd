//! End-to-end tests exercising compilation and evaluation together.

use pretty_assertions::assert_eq;
use tern::Bindings;
use tern::EmptyActivation;
use tern::Env;
use tern::Map;
use tern::MapKey;
use tern::MessageDescriptor;
use tern::PrimitiveTypeKind;
use tern::Type;
use tern::Value;

/// Builds an environment with a few commonly used test declarations.
fn test_env() -> Env {
    let env = Env::new().expect("standard declarations should install");
    env.registry()
        .register_variable(
            "x",
            Type::map(Type::Primitive(PrimitiveTypeKind::String), Type::Dyn),
        )
        .expect("variable should register");
    env.registry()
        .register_message(MessageDescriptor::new("test.Empty"))
        .expect("message should register");
    env
}

/// Compiles and evaluates the given source against an empty activation.
fn eval(source: &str) -> Result<Value, String> {
    eval_with(source, &EmptyActivation)
}

/// Compiles and evaluates the given source against an activation.
fn eval_with(source: &str, activation: &dyn tern::Activation) -> Result<Value, String> {
    let env = test_env();
    let program = env
        .compile(source)
        .unwrap_or_else(|issues| panic!("compilation of `{source}` failed:\n{issues}"));
    program
        .evaluate(activation)
        .map_err(|e| e.message().to_string())
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(eval("1 + 2 * 3").unwrap().as_int(), Some(7));
}

#[test]
fn exists_over_a_list_literal() {
    assert_eq!(
        eval("[1, 2, 3].exists(i, i > 2)").unwrap().as_bool(),
        Some(true)
    );
}

#[test]
fn absent_field_guard_short_circuits() {
    let activation = Bindings::new().bind("x", Value::Map(Map::new(Default::default())));
    assert_eq!(
        eval_with("has(x.field) && x.field == 'y'", &activation)
            .unwrap()
            .as_bool(),
        Some(false)
    );
}

#[test]
fn integer_overflow_surfaces_as_an_error() {
    let message = eval("9223372036854775807 + 1").unwrap_err();
    assert_eq!(message, "integer overflow");
}

#[test]
fn missing_map_key_selection_errors() {
    let message = eval("{'a': 1, 'b': 2}.c").unwrap_err();
    assert_eq!(message, "no such key: c");
}

#[test]
fn duration_plus_timestamp() {
    let value = eval("duration('1h') + timestamp('2023-01-01T00:00:00Z')").unwrap();
    let expected = eval("timestamp('2023-01-01T01:00:00Z')").unwrap();
    assert!(matches!(value.equals(&expected), Value::Bool(true)));
}

#[test]
fn string_matches_a_pattern() {
    assert_eq!(
        eval("'hello'.matches('h.*o')").unwrap().as_bool(),
        Some(true)
    );
}

#[test]
fn short_circuit_is_total() {
    // The right operand would error for every activation, yet the result
    // is determined by the left operand
    assert_eq!(
        eval("false && (1 / 0 == 0)").unwrap().as_bool(),
        Some(false)
    );
    assert_eq!(eval("true || (1 / 0 == 0)").unwrap().as_bool(), Some(true));
}

#[test]
fn logical_operators_commute_under_error() {
    let forward = eval("(1 / 0 == 0) && false").unwrap();
    let backward = eval("false && (1 / 0 == 0)").unwrap();
    assert!(matches!(forward.equals(&backward), Value::Bool(true)));
}

#[test]
fn evaluation_is_deterministic() {
    let env = test_env();
    let program = env
        .compile("{'a': 1, 'b': 2, 'c': 3}.map(k, k + '!')")
        .expect("should compile");

    let first = program.evaluate(&EmptyActivation).expect("should evaluate");
    for _ in 0..5 {
        let next = program.evaluate(&EmptyActivation).expect("should evaluate");
        assert!(
            matches!(first.equals(&next), Value::Bool(true)),
            "expected deterministic results, got {first} then {next}"
        );
    }
}

#[test]
fn compilation_is_idempotent() {
    let env = test_env();
    let source = "[1, 2, 3].filter(i, i % 2 == 1)";
    let first = env.compile(source).expect("should compile");
    let second = env.compile(source).expect("should compile");

    let a = first.evaluate(&EmptyActivation).expect("should evaluate");
    let b = second.evaluate(&EmptyActivation).expect("should evaluate");
    assert!(matches!(a.equals(&b), Value::Bool(true)));
    assert_eq!(
        first.checked().ast().len(),
        second.checked().ast().len(),
        "recompilation should produce a structurally identical tree"
    );
}

#[test]
fn numeric_cross_kind_equality() {
    let cases = [
        ("1 == 1u", true),
        ("1 == 1.0", true),
        ("1u == 1.0", true),
        ("2 == 1u", false),
        ("-1 == 18446744073709551615u", false),
        ("1.5 == 1u", false),
    ];
    for (source, expected) in cases {
        assert_eq!(
            eval(source).unwrap().as_bool(),
            Some(expected),
            "scenario `{source}`"
        );
    }
}

#[test]
fn nan_poisons_ordered_comparisons() {
    assert_eq!(eval("0.0 / 0.0 == 0.0 / 0.0").unwrap().as_bool(), Some(false));
    let message = eval("0.0 / 0.0 < 1.0").unwrap_err();
    assert_eq!(message, "NaN comparison");
}

#[test]
fn list_concatenation_is_associative() {
    assert_eq!(
        eval("([1] + [2]) + [3] == [1] + ([2] + [3])")
            .unwrap()
            .as_bool(),
        Some(true)
    );
    assert_eq!(
        eval("([1] + [2] + [3])[1]").unwrap().as_int(),
        Some(2)
    );
}

#[test]
fn map_equality_is_order_independent() {
    assert_eq!(
        eval("{'a': 1, 'b': 2} == {'b': 2, 'a': 1}").unwrap().as_bool(),
        Some(true)
    );
}

#[test]
fn message_literals_construct_values() {
    let env = test_env();
    env.registry()
        .register_message(
            MessageDescriptor::new("test.Request").with_field(
                "path",
                tern::FieldDescriptor::new(Type::Primitive(PrimitiveTypeKind::String)),
            ),
        )
        .expect("message should register");

    let program = env
        .compile("test.Request{path: '/admin'}.path.startsWith('/admin')")
        .expect("should compile");
    let value = program.evaluate(&EmptyActivation).expect("should evaluate");
    assert_eq!(value.as_bool(), Some(true));

    // An unset scalar field reads as its default value
    let program = env
        .compile("test.Request{}.path == ''")
        .expect("should compile");
    let value = program.evaluate(&EmptyActivation).expect("should evaluate");
    assert_eq!(value.as_bool(), Some(true));
}

#[test]
fn issues_render_with_a_caret_snippet() {
    let env = test_env();
    let issues = env.compile("1 + 'foo'").expect_err("should fail to compile");
    let rendered = issues.to_string();
    assert_eq!(
        rendered,
        "ERROR: <input>:1:1: found no matching overload for operator `+` applied to \
         (int, string)\n | 1 + 'foo'\n | ^^^^^^^^^\n"
    );
}

#[test]
fn undeclared_references_are_compile_errors() {
    let env = test_env();
    let issues = env.compile("missing == 1").expect_err("should fail");
    assert_eq!(issues.diagnostics().len(), 1);
    assert_eq!(
        issues.diagnostics()[0].message(),
        "undeclared reference to `missing`"
    );
}

#[test]
fn disabled_comprehensions_are_rejected_statically() {
    let env = test_env().with_comprehension_iteration_limit(0);
    let issues = env
        .compile("[1].all(i, i > 0)")
        .expect_err("should fail to compile");
    assert_eq!(
        issues.diagnostics()[0].message(),
        "comprehensions are disabled by the iteration limit"
    );
}

#[test]
fn container_scopes_identifier_resolution() {
    let env = Env::new()
        .expect("standard declarations should install")
        .with_container("acme.prod");
    env.registry()
        .register_variable("acme.region", Type::Primitive(PrimitiveTypeKind::String))
        .expect("variable should register");

    let program = env.compile("region == 'us-east'").expect("should compile");
    let activation = Bindings::new().bind("acme.region", "us-east");
    let value = program.evaluate(&activation).expect("should evaluate");
    assert_eq!(value.as_bool(), Some(true));
}

#[test]
fn uint_literals_and_map_keys_unify() {
    // A signed index with the same mathematical value finds an entry
    // stored under an unsigned key
    let env = test_env();
    env.registry()
        .register_variable("lookup", Type::Dyn)
        .expect("variable should register");

    let mut entries = indexmap::IndexMap::new();
    entries.insert(MapKey::Uint(1), Value::string("one"));
    let activation = Bindings::new().bind("lookup", Value::Map(Map::new(entries)));

    let program = env.compile("lookup[1] == 'one'").expect("should compile");
    let value = program.evaluate(&activation).expect("should evaluate");
    assert_eq!(value.as_bool(), Some(true));
}
