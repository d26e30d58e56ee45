//! Host type registration tests.

use std::rc::Rc;

use marten_engine::{
    CaseConvention, EngineOptions, HostMethod, HostTypeBuilder, HostTypeOptions, ScriptEngine,
    StaticType, Value,
};

fn engine() -> ScriptEngine {
    ScriptEngine::new(EngineOptions::default())
}

#[test]
fn test_namespace_type_with_typed_method() {
    let mut engine = engine();
    let double = HostMethod::new(
        "Double",
        1,
        Rc::new(|_, _, args| {
            let n = args
                .first()
                .and_then(Value::as_number)
                .unwrap_or(f64::NAN);
            Ok(Value::Number(n * 2.0))
        }),
    )
    .typed(vec![StaticType::Number], StaticType::Number);

    engine.register_host_type(
        HostTypeBuilder::new("MathX").standard_library().method(double),
        HostTypeOptions {
            no_constructors: true,
            ..Default::default()
        },
    );

    // Auto casing lowercases standard-library method names.
    assert_eq!(
        engine.execute("MathX.double(21)", None).unwrap(),
        Value::Number(42.0)
    );
}

#[test]
fn test_constructor_type() {
    let mut engine = engine();
    let get = HostMethod::new("Get", 0, Rc::new(|_, _, _| Ok(Value::Int(7))))
        .typed(vec![], StaticType::Int32);

    engine.register_host_type(
        HostTypeBuilder::new("Counter").standard_library().method(get),
        HostTypeOptions::default(),
    );

    assert_eq!(
        engine.execute("new Counter().get()", None).unwrap(),
        Value::Int(7)
    );
    assert_eq!(
        engine
            .execute("new Counter() instanceof Counter", None)
            .unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_hidden_types_get_no_global() {
    let mut engine = engine();
    engine.register_host_type(
        HostTypeBuilder::new("Ghost"),
        HostTypeOptions {
            hidden: true,
            ..Default::default()
        },
    );
    assert_eq!(
        engine.execute("typeof Ghost", None).unwrap(),
        Value::Str("undefined".into())
    );
}

#[test]
fn test_renamed_type() {
    let mut engine = engine();
    engine.register_host_type(
        HostTypeBuilder::new("InternalName"),
        HostTypeOptions {
            name: Some("Exposed".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(
        engine.execute("typeof Exposed", None).unwrap(),
        Value::Str("function".into())
    );
}

#[test]
fn test_method_overloads_form_a_jump_table() {
    let mut engine = engine();
    let of_number = HostMethod::new(
        "tag",
        1,
        Rc::new(|realm, _, _| Ok(Value::Str(realm.intern("number")))),
    )
    .typed(vec![StaticType::Int32], StaticType::String);
    let of_string = HostMethod::new(
        "tag",
        1,
        Rc::new(|realm, _, _| Ok(Value::Str(realm.intern("string")))),
    )
    .typed(vec![StaticType::String], StaticType::String);

    engine.register_host_type(
        HostTypeBuilder::new("Tagger")
            .method(of_number)
            .method(of_string),
        HostTypeOptions {
            no_constructors: true,
            first_character: CaseConvention::Unchanged,
            ..Default::default()
        },
    );

    // Dispatch picks the most-specific signature for the static
    // argument types at each call site.
    assert_eq!(
        engine.execute("Tagger.tag(1)", None).unwrap(),
        Value::Str("number".into())
    );
    assert_eq!(
        engine.execute("Tagger.tag(\"x\")", None).unwrap(),
        Value::Str("string".into())
    );
}
