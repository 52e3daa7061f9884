extern crate tierjs;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tierjs::runner::api::Engine;
use tierjs::runner::config::{CompileOptions, DelazificationStrategy, EngineOptions};
use tierjs::runner::ds::error::EngineError;
use tierjs::runner::ds::value::JsValue;

// ── Garbage collection ───────────────────────────────────────

const ALLOCATING_LOOP: &str = r#"
function make(i) { return { v: i, next: null }; }
var keep = [];
var sum = 0;
for (var i = 0; i < 2000; i++) {
    var o = make(i);
    if (i % 100 == 0) { keep.push(o); gc(); }
    sum += o.v;
}
var kept = 0;
for (var j = 0; j < keep.length; j++) { kept += keep[j].v; }
"#;

#[test]
fn test_gc_keeps_live_objects_in_every_tier() {
    for options in [
        EngineOptions::interpreter_only(),
        EngineOptions { enable_ion: false, ..EngineOptions::eager() },
        EngineOptions::eager(),
        EngineOptions { gc_allocation_threshold: 50, ..EngineOptions::eager() },
    ] {
        let mut engine = Engine::new(options);
        engine.eval(ALLOCATING_LOOP).unwrap();
        assert_eq!(engine.get_global("sum"), JsValue::from_i32(1999000));
        assert_eq!(engine.get_global("kept"), JsValue::from_i32(19000));
        assert!(engine.heap_stats().collections > 0);
    }
}

#[test]
fn test_collect_garbage_frees_unreachable_objects() {
    let mut engine = Engine::new(EngineOptions::interpreter_only());
    engine.eval(ALLOCATING_LOOP).unwrap();
    engine.collect_garbage();
    let live = engine.heap_stats().live_objects;

    engine.eval("keep = null;").unwrap();
    let freed = engine.collect_garbage();
    assert!(freed >= 20, "freed {}", freed);
    assert!(engine.heap_stats().live_objects < live);
    assert_eq!(engine.heap_stats().last_freed, freed);
}

#[test]
fn test_replaced_global_constants_are_collectable() {
    let code = r#"
var keep = [];
for (var i = 0; i < 50; i++) { keep.push({ v: i }); }
var n = keep.length;
"#;
    for options in [EngineOptions::interpreter_only(), EngineOptions::eager()] {
        let mut engine = Engine::new(options);
        engine.eval(code).unwrap();
        assert_eq!(engine.get_global("n"), JsValue::from_i32(50));
        engine.collect_garbage();
        let live = engine.heap_stats().live_objects;

        engine.eval("keep = null;").unwrap();
        let freed = engine.collect_garbage();
        assert!(freed >= 51, "freed {}", freed);
        assert_eq!(engine.heap_stats().live_objects, live - freed);
    }
}

#[test]
fn test_gc_during_optimized_frames_with_elided_views() {
    let code = r#"
var data = new Int16Array(32);
for (var k = 0; k < 32; k++) { data[k] = k; }
function windowed(from) {
    var v = data.subarray(from, from + 4);
    gc();
    var s = 0;
    for (var i = 0; i < v.length; i++) { s += v[i]; }
    return s;
}
var total = 0;
for (var r = 0; r < 100; r++) { total += windowed(r % 28); }
"#;
    let mut interp = Engine::new(EngineOptions::interpreter_only());
    interp.eval(code).unwrap();
    let mut eager = Engine::new(EngineOptions::eager());
    eager.eval(code).unwrap();
    assert_eq!(eager.get_global("total"), interp.get_global("total"));
}

#[test]
fn test_handles_from_the_api_survive_collection() {
    let mut engine = Engine::new(EngineOptions::eager());
    let point = engine.eval("var p = { x: 4, y: 5 }; p").unwrap();
    engine.collect_garbage();
    engine.eval("var junk; for (var i = 0; i < 1000; i++) { junk = { v: i }; }").unwrap();
    engine.collect_garbage();
    let y = engine.eval("p.y").unwrap();
    assert_eq!(y, JsValue::from_i32(5));
    assert_eq!(engine.get_global("p"), point);
}

// ── Interrupts ───────────────────────────────────────────────

#[test]
fn test_interrupt_terminates_an_infinite_loop() {
    for options in [EngineOptions::interpreter_only(), EngineOptions::eager()] {
        let mut engine = Engine::new(options);
        let handle = engine.interrupt_handle();
        let watchdog = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.interrupt();
        });
        let error = engine.eval("var n = 0; while (true) { n++; }").unwrap_err();
        watchdog.join().unwrap();
        assert!(matches!(error, EngineError::Interrupted));
        assert!(error.exception().is_none());
    }
}

#[test]
fn test_interrupt_is_not_catchable() {
    let mut engine = Engine::new(EngineOptions::eager());
    let handle = engine.interrupt_handle();
    let watchdog = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });
    let error = engine
        .eval(
            r#"
var caught = false;
function spin() { var i = 0; while (true) { i = (i + 1) | 0; } }
try { spin(); } catch (e) { caught = true; } finally { caught = true; }
"#,
        )
        .unwrap_err();
    watchdog.join().unwrap();
    assert!(matches!(error, EngineError::Interrupted));
    assert_eq!(engine.get_global("caught"), JsValue::Boolean(false));

    // The engine stays usable afterwards.
    assert_eq!(engine.eval("1 + 1").unwrap(), JsValue::from_i32(2));
}

#[test]
fn test_interrupt_callback_can_resume() {
    let mut engine = Engine::new(EngineOptions::eager());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    engine.set_interrupt_callback(Some(Box::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        true
    })));
    engine.interrupt_handle().interrupt();
    let value = engine.eval("var x = 0; for (var i = 0; i < 10; i++) { x += i; } x").unwrap();
    assert_eq!(value, JsValue::from_i32(45));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interrupt_callback_can_terminate() {
    let mut engine = Engine::new(EngineOptions::interpreter_only());
    engine.set_interrupt_callback(Some(Box::new(|| false)));
    engine.interrupt_handle().interrupt();
    let error = engine.eval("for (var i = 0; i < 10; i++) {}").unwrap_err();
    assert!(matches!(error, EngineError::Interrupted));
}

// ── Errors and compile options ───────────────────────────────

#[test]
fn test_uncaught_error_reports_file_and_line() {
    let mut engine = Engine::new(EngineOptions::eager());
    let options = CompileOptions::with_filename("lib.js");
    let script = engine
        .compile(
            "function check(x) {\n  if (x > 50) throw new TypeError('too big: ' + x);\n  return x;\n}\nfor (var i = 0; i < 100; i++) check(i);\n",
            options,
        )
        .unwrap();
    let error = engine.run(&script).unwrap_err();
    let exception = error.exception().unwrap();
    assert_eq!(exception.message, "TypeError: too big: 51");
    assert_eq!(exception.filename.as_deref(), Some("lib.js"));
    assert_eq!(exception.line, Some(2));
    assert_eq!(error.to_string(), "lib.js:2: Uncaught TypeError: too big: 51");
}

#[test]
fn test_thrown_primitives_are_uncaught_values() {
    let mut engine = Engine::new(EngineOptions::interpreter_only());
    let error = engine.eval("throw 42;").unwrap_err();
    let exception = error.exception().unwrap();
    assert_eq!(exception.value, JsValue::from_i32(42));
    assert_eq!(exception.message, "42");
}

#[test]
fn test_compile_errors_carry_positions() {
    let mut engine = Engine::new(EngineOptions::default());
    let options = CompileOptions { line: 5, ..CompileOptions::with_filename("bad.js") };
    let error = engine.compile("var ok = 1;\nvar = 2;", options).unwrap_err();
    assert_eq!(&*error.filename, "bad.js");
    assert_eq!(error.line, 6);
    assert!(error.to_string().starts_with("bad.js:6:"));
}

#[test]
fn test_let_redeclaration_is_a_syntax_error_at_run_time() {
    let mut engine = Engine::new(EngineOptions::default());
    engine.eval("let once = 1;").unwrap();
    let error = engine.eval("let once = 2;").unwrap_err();
    assert!(error.exception().unwrap().message.starts_with("SyntaxError"));
    assert_eq!(engine.get_global("once"), JsValue::from_i32(1));
}

#[test]
fn test_temporal_dead_zone() {
    let mut engine = Engine::new(EngineOptions::default());
    let error = engine.eval("var early = late; let late = 1;").unwrap_err();
    assert!(error.exception().unwrap().message.starts_with("ReferenceError"));
}

#[test]
fn test_delazification_strategies_agree() {
    let code = r#"
function a(x) { return b(x) + 1; }
function b(x) { return c(x) * 2; }
function c(x) { return x - 3; }
var result = 0;
for (var i = 0; i < 50; i++) { result += a(i); }
"#;
    let mut results = Vec::new();
    for name in ["on-demand", "eager", "concurrent-df", "concurrent-large-first"] {
        let mut engine = Engine::new(EngineOptions::default());
        let options = CompileOptions {
            delazification: DelazificationStrategy::from_name(name).unwrap(),
            ..CompileOptions::default()
        };
        let script = engine.compile(code, options).unwrap();
        engine.wait_for_background_work();
        engine.run(&script).unwrap();
        results.push(engine.get_global("result"));
    }
    assert!(results.iter().all(|r| *r == results[0]), "{:?}", results);
    assert_eq!(results[0], JsValue::from_i32(2200));
}

#[test]
fn test_options_load_from_toml() {
    let options = EngineOptions::from_toml_str(
        "ion_warmup_threshold = 3\nenable_baseline = false\ncapture_output = true\n",
    )
    .unwrap();
    assert_eq!(options.ion_warmup_threshold, 3);
    assert!(!options.enable_baseline);
    assert_eq!(options.baseline_warmup_threshold, EngineOptions::default().baseline_warmup_threshold);
    assert!(EngineOptions::from_toml_str("ion_warmup_threshold = \"soon\"").is_err());

    let mut engine = Engine::new(options);
    engine.eval("print('configured');").unwrap();
    assert_eq!(engine.printed_output(), vec!["configured".to_string()]);
}
