use crate::{ExecError, Instance, Interpreter, Program, ScriptEngine, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn compile(source: &str, globals: &[&str]) -> Arc<dyn Program> {
    let engine = Interpreter::new();
    let mut compiler = engine.compiler();
    for name in globals {
        compiler.declare_global(name);
    }
    compiler.compile(source.as_bytes()).unwrap()
}

/// Compile with a `write` global wired to a capture buffer, run, and return
/// everything the script wrote.
fn run_capture(source: &str) -> Result<Vec<u8>, ExecError> {
    let program = compile(source, &["write", "die"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());
    let result = instance.run();
    let captured = out.lock().unwrap().clone();
    result.map(|_| captured)
}

fn bind_capture(instance: &mut dyn Instance) -> Arc<Mutex<Vec<u8>>> {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&out);
    instance
        .bind_global(
            "write",
            Value::native(move |args| {
                let mut buf = sink.lock().unwrap();
                for arg in args {
                    buf.extend_from_slice(&arg.display_bytes());
                }
                Ok(Value::Null)
            }),
        )
        .unwrap();
    let _ = instance.bind_global("die", Value::native(|_| Err(ExecError::Aborted)));
    out
}

#[test]
fn empty_program_is_valid() {
    assert_eq!(run_capture("").unwrap(), b"");
}

#[test]
fn write_string_literal() {
    assert_eq!(run_capture(r#"write("hello")"#).unwrap(), b"hello");
}

#[test]
fn write_formats_scalars() {
    assert_eq!(run_capture(r#"write(1 + 2, " ", true)"#).unwrap(), b"3 true");
}

#[test]
fn string_concat_and_comparison() {
    let out = run_capture(
        r#"
        name := "wor" + "ld"
        if name == "world" {
            write("hello ", name)
        }
        "#,
    )
    .unwrap();
    assert_eq!(out, b"hello world");
}

#[test]
fn while_loop_accumulates() {
    let out = run_capture(
        r#"
        sum := 0
        i := 0
        while i < 5 {
            sum = sum + i
            i = i + 1
        }
        write(sum)
        "#,
    )
    .unwrap();
    assert_eq!(out, b"10");
}

#[test]
fn else_if_chain() {
    let out = run_capture(
        r#"
        n := 2
        if n == 1 {
            write("one")
        } else if n == 2 {
            write("two")
        } else {
            write("many")
        }
        "#,
    )
    .unwrap();
    assert_eq!(out, b"two");
}

#[test]
fn newline_inside_parens_is_not_a_separator() {
    let out = run_capture("write(\"a\",\n    \"b\")").unwrap();
    assert_eq!(out, b"ab");
}

#[test]
fn comments_are_skipped() {
    let out = run_capture("// leading comment\nwrite(\"x\") // trailing\n").unwrap();
    assert_eq!(out, b"x");
}

#[test]
fn bytes_literal_roundtrips_raw_bytes() {
    let out = run_capture(r#"write(b"\x00\xff<\"quote\">")"#).unwrap();
    assert_eq!(out, &[0x00, 0xff, b'<', b'"', b'q', b'u', b'o', b't', b'e', b'"', b'>'][..]);
}

#[test]
fn die_stops_remaining_statements() {
    let err = run_capture(r#"write("before"); die(); write("after")"#).unwrap_err();
    assert!(matches!(err, ExecError::Aborted));

    // The output produced before the abort is still observable.
    let program = compile(r#"write("before"); die(); write("after")"#, &["write", "die"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());
    assert!(matches!(instance.run(), Err(ExecError::Aborted)));
    assert_eq!(&*out.lock().unwrap(), b"before");
}

#[test]
fn undefined_symbol_is_a_runtime_error() {
    let err = run_capture("write(nope)").unwrap_err();
    assert!(matches!(err, ExecError::Runtime(_)));
}

#[test]
fn bind_undeclared_global_fails() {
    let program = compile("", &["write"]);
    let mut instance = program.new_instance();
    let err = instance.bind_global("sneaky", Value::Int(1)).unwrap_err();
    assert_eq!(err.name, "sneaky");
}

#[test]
fn unbound_declared_global_reads_as_null() {
    let program = compile(r#"write("[", extra, "]")"#, &["write", "die", "extra"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());
    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"[]");
}

#[test]
fn instances_are_isolated() {
    let program = compile("write(who)", &["write", "die", "who"]);

    let mut a = program.new_instance();
    let out_a = bind_capture(a.as_mut());
    a.bind_global("who", Value::from("alpha")).unwrap();

    let mut b = program.new_instance();
    let out_b = bind_capture(b.as_mut());
    b.bind_global("who", Value::from("beta")).unwrap();

    a.run().unwrap();
    b.run().unwrap();

    assert_eq!(&*out_a.lock().unwrap(), b"alpha");
    assert_eq!(&*out_b.lock().unwrap(), b"beta");
}

#[test]
fn reset_clears_bindings() {
    let program = compile(r#"write("[", who, "]")"#, &["write", "die", "who"]);
    let mut instance = program.new_instance();

    let out = bind_capture(instance.as_mut());
    instance.bind_global("who", Value::from("gamma")).unwrap();
    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"[gamma]");

    instance.reset();
    let out = bind_capture(instance.as_mut());
    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"[]");
}

#[test]
fn reruns_start_with_fresh_locals() {
    let program = compile(r#"x := "."; write(x)"#, &["write", "die"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());
    instance.run().unwrap();
    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"..");
}

#[test]
fn namespace_member_calls() {
    let program = compile(r#"write(box.get("k"))"#, &["write", "die", "box"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());

    let mut ns = HashMap::new();
    ns.insert(
        "get".to_string(),
        Value::native(|args| match args {
            [Value::Str(key)] => Ok(Value::Str(format!("value-of-{key}"))),
            _ => Err(ExecError::runtime("get expects one string argument")),
        }),
    );
    instance.bind_global("box", Value::Map(ns)).unwrap();

    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"value-of-k");
}

#[test]
fn index_expressions() {
    let program = compile(r#"write(items[1], map["k"])"#, &["write", "die", "items", "map"]);
    let mut instance = program.new_instance();
    let out = bind_capture(instance.as_mut());
    instance
        .bind_global(
            "items",
            Value::Array(vec![Value::Int(10), Value::Int(20)]),
        )
        .unwrap();
    let mut map = HashMap::new();
    map.insert("k".to_string(), Value::from("v"));
    instance.bind_global("map", Value::Map(map)).unwrap();
    instance.run().unwrap();
    assert_eq!(&*out.lock().unwrap(), b"20v");
}

#[test]
fn array_and_map_literals() {
    let out = run_capture(
        r#"
        items := ["a", "b"]
        write(items[0], items[1])
        "#,
    )
    .unwrap();
    assert_eq!(out, b"ab");

    let out = run_capture(
        r#"
        cookie := {
            name: "sid",
            "value": "abc",
        }
        write(cookie.name, "=", cookie.value)
        "#,
    )
    .unwrap();
    assert_eq!(out, b"sid=abc");
}

#[test]
fn map_literal_values_reach_native_functions() {
    let program = compile(r#"take({name: "x", n: 2})"#, &["take"]);
    let mut instance = program.new_instance();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    instance
        .bind_global(
            "take",
            Value::native(move |args| {
                *sink.lock().unwrap() = Some(args[0].clone());
                Ok(Value::Null)
            }),
        )
        .unwrap();
    instance.run().unwrap();

    let taken = seen.lock().unwrap().clone().unwrap();
    let Value::Map(map) = taken else {
        panic!("expected a map, got {taken:?}");
    };
    assert_eq!(map.get("name"), Some(&Value::from("x")));
    assert_eq!(map.get("n"), Some(&Value::Int(2)));
}

#[test]
fn compile_error_reports_line() {
    let engine = Interpreter::new();
    let err = engine
        .compiler()
        .compile(b"write(\"ok\")\nwrite(\"unterminated")
        .err()
        .unwrap();
    assert_eq!(err.line, 2);
}

#[test]
fn compile_error_on_stray_token() {
    let engine = Interpreter::new();
    assert!(engine.compiler().compile(b"write(,)").is_err());
    assert!(engine.compiler().compile(b"if {").is_err());
}

#[test]
fn compile_is_deterministic() {
    // Same source, same declarations, same observable behavior.
    for _ in 0..3 {
        assert_eq!(run_capture(r#"write("stable")"#).unwrap(), b"stable");
    }
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let err = run_capture("write(1 / 0)").unwrap_err();
    assert!(matches!(err, ExecError::Runtime(_)));
}

#[test]
fn float_promotion() {
    assert_eq!(run_capture("write(1 + 0.5)").unwrap(), b"1.5");
    assert_eq!(run_capture("write(3 < 3.5)").unwrap(), b"true");
}
