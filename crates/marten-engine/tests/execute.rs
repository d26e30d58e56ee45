//! End-to-end execution tests.

use marten_engine::{EngineError, EngineOptions, ErrorKind, ScriptEngine, StaticType, Value};

fn engine() -> ScriptEngine {
    ScriptEngine::new(EngineOptions::default())
}

fn run(source: &str) -> Value {
    engine().execute(source, Some("test.js")).unwrap()
}

fn run_err(source: &str) -> EngineError {
    engine().execute(source, Some("test.js")).unwrap_err()
}

#[test]
fn test_integer_arithmetic_completion() {
    // S1
    assert_eq!(run("var x = 1 + 2; x"), Value::Int(3));
}

#[test]
fn test_call_specialises_argument_types() {
    // S2
    let mut engine = engine();
    let result = engine
        .execute("function f(a, b){ return a*b; } f(3,4)", None)
        .unwrap();
    assert_eq!(result, Value::Int(12));
    assert_eq!(
        engine.function_parameter_types("f").unwrap(),
        vec![StaticType::Int32, StaticType::Int32]
    );
}

#[test]
fn test_conflicting_call_types_collapse_parameter() {
    // S3
    let mut engine = engine();
    let result = engine
        .execute("function g(x){ return x; } g(1); g(\"a\")", None)
        .unwrap();
    assert_eq!(result, Value::Str("a".into()));
    assert_eq!(
        engine.function_parameter_types("g").unwrap(),
        vec![StaticType::Any]
    );
    let compiles = engine.function_compile_count("g").unwrap();
    assert!((1..=2).contains(&compiles), "compiled {compiles} times");
}

#[test]
fn test_recompilation_across_executions() {
    let mut engine = engine();
    let first = engine
        .execute("function h(v){ return v + v; } h(2);", None)
        .unwrap();
    assert_eq!(first, Value::Int(4));
    assert_eq!(engine.function_compile_count("h"), Some(1));

    // The widened call site invalidates the compiled body; it is rebuilt
    // silently at the next call.
    let second = engine.execute("h(\"a\");", None).unwrap();
    assert_eq!(second, Value::Str("aa".into()));
    assert_eq!(engine.function_compile_count("h"), Some(2));
}

#[test]
fn test_property_collapse_recompiles_dependents() {
    let mut engine = engine();
    engine
        .execute(
            "var store = {}; store.val = 1;\n\
             function readStore(){ return store.val; }\n\
             readStore();",
            None,
        )
        .unwrap();
    assert_eq!(engine.function_compile_count("readStore"), Some(1));

    let result = engine.execute("store.val = \"x\"; readStore();", None).unwrap();
    assert_eq!(result, Value::Str("x".into()));
    assert_eq!(engine.function_compile_count("readStore"), Some(2));
    assert_eq!(
        engine.property_static_type("store", "val"),
        Some(StaticType::Any)
    );
}

#[test]
fn test_try_catch_finally_completion() {
    // S4
    assert_eq!(
        run("try { throw 1 } catch(e) { e+1 } finally { 9 }"),
        Value::Int(2)
    );
}

#[test]
fn test_finally_runs_on_throw_path() {
    assert_eq!(
        run("var r = 0; try { try { throw 5 } finally { r = 1; } } catch (e) { r = r + e; } r"),
        Value::Int(6)
    );
}

#[test]
fn test_labelled_continue() {
    // S5
    assert_eq!(
        run("outer: for(var i=0;i<3;i++){ for(var j=0;j<3;j++){ if(j==1) continue outer; } } i"),
        Value::Int(3)
    );
}

#[test]
fn test_string_builtins() {
    // S6
    assert_eq!(run("\"abc\".length + \"x\".charCodeAt(0)"), Value::Int(123));
    assert_eq!(run("\"hello\".indexOf(\"ll\")"), Value::Int(2));
    assert_eq!(run("\"hello\".substring(1, 3)"), Value::Str("el".into()));
    assert_eq!(run("\"hello\".charAt(1)"), Value::Str("e".into()));
}

#[test]
fn test_property_type_collapse() {
    // S7
    let mut engine = engine();
    let result = engine
        .execute("var o={}; o.p=1; o.p=\"s\"; typeof o.p", None)
        .unwrap();
    assert_eq!(result, Value::Str("string".into()));
    assert_eq!(engine.property_static_type("o", "p"), Some(StaticType::Any));
}

#[test]
fn test_constructed_instances_track_field_types() {
    let mut engine = engine();
    let result = engine
        .execute(
            "function Point(x, y){ this.x = x; this.y = y; }\n\
             var p = new Point(3, 4);\n\
             p.x * p.y",
            None,
        )
        .unwrap();
    assert_eq!(result, Value::Int(12));
}

#[test]
fn test_instanceof_walks_the_chain() {
    assert_eq!(
        run("function A(){} var a = new A(); a instanceof A"),
        Value::Bool(true)
    );
    assert_eq!(
        run("function A(){} function B(){} var a = new A(); a instanceof B"),
        Value::Bool(false)
    );
}

#[test]
fn test_constructor_returning_object_replaces_allocation() {
    assert_eq!(
        run("function F(){ return { tag: 7 }; } new F().tag"),
        Value::Int(7)
    );
}

#[test]
fn test_for_in_enumerates_in_insertion_order() {
    assert_eq!(
        run("var o = { b: 1, a: 2 }; var r = \"\"; for (var k in o) { r = r + k; } r"),
        Value::Str("ba".into())
    );
}

#[test]
fn test_for_in_over_array_indices() {
    assert_eq!(
        run("var a = [10, 20]; var sum = 0; for (var k in a) { sum = sum + a[k]; } sum"),
        Value::Int(30)
    );
}

#[test]
fn test_arrays() {
    assert_eq!(run("var a = [1, 2]; a.push(3); a.length"), Value::Int(3));
    assert_eq!(run("[1, 2, 3].join(\"-\")"), Value::Str("1-2-3".into()));
    assert_eq!(run("var a = [1]; a[5] = 9; a.length"), Value::Int(6));
}

#[test]
fn test_switch_fallthrough_and_default() {
    let source = "\
        function pick(n) {\n\
          var r = \"\";\n\
          switch (n) {\n\
            case 1: r = r + \"a\";\n\
            case 2: r = r + \"b\"; break;\n\
            default: r = \"d\";\n\
          }\n\
          return r;\n\
        }\n\
        pick(1) + pick(2) + pick(9)";
    assert_eq!(run(source), Value::Str("abbd".into()));
}

#[test]
fn test_do_while_and_update_operators() {
    assert_eq!(run("var i = 0; do { i++; } while (i < 3); i"), Value::Int(3));
    assert_eq!(run("var i = 5; var j = i--; j - i"), Value::Int(1));
    assert_eq!(run("var i = 5; var j = --i; j - i"), Value::Int(0));
}

#[test]
fn test_logical_and_conditional() {
    assert_eq!(run("(1 && \"a\") || 2"), Value::Str("a".into()));
    assert_eq!(run("0 || 2"), Value::Int(2));
    assert_eq!(run("1 < 2 ? \"y\" : \"n\""), Value::Str("y".into()));
}

#[test]
fn test_equality_semantics() {
    assert_eq!(run("\"2\" == 2"), Value::Bool(true));
    assert_eq!(run("\"2\" === 2"), Value::Bool(false));
    assert_eq!(run("null == undefined"), Value::Bool(true));
    assert_eq!(run("null === undefined"), Value::Bool(false));
    assert_eq!(run("\"a\" < \"b\""), Value::Bool(true));
}

#[test]
fn test_bitwise_and_shifts() {
    assert_eq!(run("~5 + (7 >>> 1) + (1 << 4)"), Value::Int(13));
    assert_eq!(run("(-1) >>> 0"), Value::Number(4294967295.0));
    assert_eq!(run("5 % 3"), Value::Number(2.0));
}

#[test]
fn test_typeof() {
    assert_eq!(run("typeof \"x\""), Value::Str("string".into()));
    assert_eq!(run("typeof 1"), Value::Str("number".into()));
    assert_eq!(run("typeof missingThing"), Value::Str("undefined".into()));
    assert_eq!(
        run("function f(){} typeof f"),
        Value::Str("function".into())
    );
}

#[test]
fn test_delete_unassigns_property() {
    assert_eq!(
        run("var o = { a: 1 }; delete o.a; typeof o.a"),
        Value::Str("undefined".into())
    );
}

#[test]
fn test_in_operator() {
    assert_eq!(run("var o = { a: 1 }; \"a\" in o"), Value::Bool(true));
    assert_eq!(run("var o = { a: 1 }; \"b\" in o"), Value::Bool(false));
}

#[test]
fn test_arguments_object() {
    let source = "\
        function sum() {\n\
          var t = 0;\n\
          for (var i = 0; i < arguments.length; i++) { t = t + arguments[i]; }\n\
          return t;\n\
        }\n\
        sum(1, 2, 3)";
    assert_eq!(run(source), Value::Int(6));
}

#[test]
fn test_return_through_finally() {
    let mut engine = engine();
    let result = engine
        .execute(
            "var effect = 0;\n\
             function f(){ try { return 1; } finally { effect = 2; } }\n\
             f() + effect",
            None,
        )
        .unwrap();
    assert_eq!(result, Value::Int(3));
}

#[test]
fn test_break_through_finally() {
    let source = "\
        var r = 0;\n\
        for (var i = 0; i < 3; i++) {\n\
          try { if (i == 1) break; r = r + 1; } finally { r = r + 10; }\n\
        }\n\
        r";
    assert_eq!(run(source), Value::Int(21));
}

#[test]
fn test_syntax_errors_surface_with_position() {
    let err = run_err("var\n  = 1;");
    match err {
        EngineError::Syntax(parse) => assert_eq!(parse.line, 2),
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn test_unknown_label_is_a_syntax_error() {
    assert!(matches!(run_err("break;"), EngineError::Syntax(_)));
    assert!(matches!(
        run_err("for(;;){ break missing; }"),
        EngineError::Syntax(_)
    ));
    assert!(matches!(
        run_err("lbl: { continue lbl; }"),
        EngineError::Syntax(_)
    ));
    assert!(matches!(
        run_err("x: { x: ; }"),
        EngineError::Syntax(_)
    ));
}

#[test]
fn test_reference_error_carries_stack() {
    let err = run_err("function boom(){ missing; }\nboom();");
    let EngineError::Script(error) = err else {
        panic!("expected script error");
    };
    assert_eq!(error.kind, ErrorKind::Reference);
    assert!(error.message.contains("missing"));
    assert!(error.stack.contains("at boom (test.js:1)"));
    assert!(error.stack.contains("at <script> (test.js:2)"));
}

#[test]
fn test_thrown_error_objects_classify() {
    let err = run_err("throw new TypeError(\"boom\");");
    let EngineError::Script(error) = err else {
        panic!("expected script error");
    };
    assert_eq!(error.kind, ErrorKind::Type);
    assert_eq!(error.message, "boom");
}

#[test]
fn test_caught_error_message_is_readable() {
    assert_eq!(
        run("var m; try { throw new RangeError(\"r\"); } catch (e) { m = e.message; } m"),
        Value::Str("r".into())
    );
    assert_eq!(
        run("var n; try { throw new RangeError(\"r\"); } catch (e) { n = e.name; } n"),
        Value::Str("RangeError".into())
    );
}

#[test]
fn test_member_access_on_nullish_throws_type_error() {
    let err = run_err("var v = null; v.x");
    let EngineError::Script(error) = err else {
        panic!("expected script error");
    };
    assert_eq!(error.kind, ErrorKind::Type);
}

#[test]
fn test_stack_overflow_is_a_range_error() {
    let err = run_err("function r(){ return r(); } r();");
    let EngineError::Script(error) = err else {
        panic!("expected script error");
    };
    assert_eq!(error.kind, ErrorKind::Range);
    assert!(error.message.contains("call stack"));
}

#[test]
fn test_asi() {
    assert_eq!(run("var a = 1\na + 1"), Value::Int(2));
}

#[test]
fn test_strict_by_default_option() {
    let mut engine = ScriptEngine::new(EngineOptions {
        strict_by_default: true,
        ..Default::default()
    });
    assert!(matches!(
        engine.execute("var x = 010;", None),
        Err(EngineError::Syntax(_))
    ));
}

#[test]
fn test_evaluate_expression() {
    let mut engine = engine();
    assert_eq!(engine.evaluate("1 + 2 * 3").unwrap(), Value::Int(7));
}

#[test]
fn test_global_value_round_trip() {
    let mut engine = engine();
    engine.set_global_value("hostVal", Value::Int(7));
    assert_eq!(engine.execute("hostVal + 1", None).unwrap(), Value::Int(8));
    engine.execute("hostVal = 10;", None).unwrap();
    assert_eq!(engine.get_global_value("hostVal"), Value::Int(10));
    assert_eq!(engine.get_global_value("absent"), Value::Undefined);
}

#[test]
fn test_host_globals_option() {
    let mut engine = ScriptEngine::new(EngineOptions {
        host_globals: vec![("answer".to_string(), Value::Int(42))],
        ..Default::default()
    });
    assert_eq!(engine.execute("answer", None).unwrap(), Value::Int(42));
}

#[test]
fn test_global_functions() {
    assert_eq!(run("parseInt(\"0x10\")"), Value::Number(16.0));
    assert_eq!(run("parseFloat(\"2.5rest\")"), Value::Number(2.5));
    assert_eq!(run("isNaN(\"abc\")"), Value::Bool(true));
    assert_eq!(run("isFinite(1)"), Value::Bool(true));
}

#[test]
fn test_number_formatting() {
    assert_eq!(run("\"\" + 0.1"), Value::Str("0.1".into()));
    assert_eq!(run("(1/3).toString()"), Value::Str("0.3333333333333333".into()));
    assert_eq!(run("\"\" + 1e21"), Value::Str("1e+21".into()));
}

#[test]
fn test_integer_overflow_promotes_to_double() {
    assert_eq!(
        run("2147483647 + 1"),
        Value::Number(2147483648.0)
    );
}

#[test]
fn test_conversion_boundaries() {
    assert_eq!(run("(4294967296 + 5) | 0"), Value::Int(5));
    assert_eq!(run("!!\"\""), Value::Bool(false));
    assert_eq!(run("!!\"0\""), Value::Bool(true));
}

#[test]
fn test_concatenation_is_deferred_but_correct() {
    assert_eq!(
        run("var s = \"a\"; for (var i = 0; i < 3; i++) { s = s + i; } s"),
        Value::Str("a012".into())
    );
}

#[test]
fn test_void_and_sequence() {
    assert_eq!(run("void 0"), Value::Undefined);
    assert_eq!(run("(1, 2, 3)"), Value::Int(3));
}

#[test]
fn test_let_and_const() {
    assert_eq!(run("let a = 1; { let a = 2; } a"), Value::Int(1));
    let err = run_err("const c = 1; c = 2;");
    let EngineError::Script(error) = err else {
        panic!("expected script error");
    };
    assert_eq!(error.kind, ErrorKind::Type);
}

#[test]
fn test_regex_literal_is_cached_per_site() {
    assert_eq!(
        run("function p(){ return /ab+/g.source; } p(); p()"),
        Value::Str("ab+".into())
    );
    assert_eq!(run("/x/i.flags"), Value::Str("i".into()));
}
