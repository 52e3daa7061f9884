extern crate tierjs;

use tierjs::runner::api::Engine;
use tierjs::runner::config::EngineOptions;
use tierjs::runner::ds::operations::type_conversion::to_string;
use tierjs::runner::ds::value::JsValue;
use tierjs::runner::jit::opt::AssertionKind;
use tierjs::runner::jit::tiering::ExecutionTier;

/// Loads `setup`, then evaluates each probe in order and renders its result
/// or the uncaught exception's message.
fn outcomes(options: EngineOptions, setup: &str, probes: &[&str]) -> Vec<String> {
    let mut engine = Engine::new(options);
    engine.eval(setup).unwrap();
    probes
        .iter()
        .map(|probe| match engine.eval(probe) {
            Ok(value) => format!("ok {}", to_string(engine.realm(), &value)),
            Err(e) => match e.exception() {
                Some(exception) => format!("threw {}", exception.message),
                None => format!("failed {}", e),
            },
        })
        .collect()
}

/// The probes must give the same results and the same exceptions whether
/// or not the code under test was optimized in between.
fn assert_transparent(setup: &str, probes: &[&str]) -> Vec<String> {
    let expected = outcomes(EngineOptions::interpreter_only(), setup, probes);
    for options in [
        EngineOptions::eager(),
        EngineOptions { enable_ion: false, ..EngineOptions::eager() },
        EngineOptions { off_thread_compilation: true, ..EngineOptions::eager() },
    ] {
        assert_eq!(outcomes(options, setup, probes), expected);
    }
    expected
}

#[test]
fn test_type_guard_failure_bails_out() {
    let setup = r#"
function add(a, b) { return a + b; }
for (var i = 0; i < 100; i++) { add(i, 1); }
"#;
    let results = assert_transparent(
        setup,
        &["add(1, 2)", "add(2147483647, 1)", "add('x', 1)", "add(0.5, 0.25)", "add(undefined, 1)", "add(3, 4)"],
    );
    assert_eq!(
        results,
        vec!["ok 3", "ok 2147483648", "ok x1", "ok 0.75", "ok NaN", "ok 7"]
    );
}

#[test]
fn test_exceptions_thrown_after_bailout_keep_their_message() {
    let setup = r#"
function deep(o) { return o.a.b; }
for (var i = 0; i < 100; i++) { deep({a: {b: i}}); }
function callIt(f) { return f(); }
for (var j = 0; j < 100; j++) { callIt(function() { return 1; }); }
"#;
    let results = assert_transparent(
        setup,
        &["deep({a: {b: 5}})", "deep({a: undefined})", "deep(null)", "callIt(42)", "deep({a: {b: 6}})"],
    );
    assert_eq!(results[0], "ok 5");
    assert!(results[1].starts_with("threw TypeError"), "{}", results[1]);
    assert!(results[2].starts_with("threw TypeError"), "{}", results[2]);
    assert!(results[3].starts_with("threw TypeError"), "{}", results[3]);
    assert_eq!(results[4], "ok 6");
}

#[test]
fn test_shape_guard_failure_bails_out() {
    let setup = r#"
function sum(o) { return o.x + o.y; }
for (var i = 0; i < 100; i++) { sum({x: i, y: 1}); }
"#;
    assert_transparent(
        setup,
        &["sum({x: 1, y: 2})", "sum({y: 2, x: 1})", "sum({x: 'a'})", "sum(Object.create({x: 4, y: 5}))"],
    );
}

#[test]
fn test_bailout_inside_inlined_callee() {
    let setup = r#"
function half(x) { return x / 2; }
function total(arr) {
    var s = 0;
    for (var i = 0; i < arr.length; i++) { s += half(arr[i]); }
    return s;
}
var ints = [];
for (var k = 0; k < 50; k++) { ints.push(k * 2); }
for (var r = 0; r < 20; r++) { total(ints); }
"#;
    let results = assert_transparent(setup, &["total(ints)", "total([1, 'x', 3])", "total([1, 2, 3])"]);
    assert_eq!(results[0], "ok 1225");
    assert_eq!(results[1], "ok NaN");
    assert_eq!(results[2], "ok 3");
}

#[test]
fn test_requested_bailout_resumes_where_it_left_off() {
    let setup = r#"
function counter(n) {
    var c = 0;
    for (var i = 0; i < n; i++) {
        c += i;
        if (i == 7) bailout();
    }
    return c;
}
for (var r = 0; r < 30; r++) { counter(10); }
"#;
    let results = assert_transparent(setup, &["counter(10)", "counter(100)"]);
    assert_eq!(results, vec!["ok 45", "ok 4950"]);
}

#[test]
fn test_repeated_bailouts_do_not_change_results() {
    let setup = r#"
function pick(o) { return o.v; }
var objs = [{v: 1}, {w: 0, v: 2}, {v: 'three'}];
var out = [];
for (var i = 0; i < 300; i++) { out.push(pick(objs[i % 3])); }
"#;
    assert_transparent(setup, &["out.join('')", "pick({v: null})"]);
}

#[test]
fn test_float32_assertions_are_reported() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine
        .eval(
            r#"
function f32(a, b) {
    var x = Math.fround(a);
    var y = Math.fround(b);
    assertFloat32(x, true);
    var sum = Math.fround(x + y);
    assertFloat32(sum, true);
    return sum;
}
"#,
        )
        .unwrap();
    let f32_fn = engine.get_global("f32");
    for i in 0..50 {
        let args = vec![JsValue::from_f64(i as f64 + 0.1), JsValue::from_f64(0.2)];
        engine.call(&f32_fn, JsValue::Undefined, args).unwrap();
    }
    assert_eq!(engine.script_tier(&f32_fn), Some(ExecutionTier::Optimized));
    let report = engine.optimization_report(&f32_fn).unwrap();
    let float32: Vec<_> = report.entries.iter().filter(|e| e.kind == AssertionKind::Float32).collect();
    assert_eq!(float32.len(), 2);
    assert_eq!(report.failures().count(), 0, "{:?}", report);
}

#[test]
fn test_float32_does_not_flow_through_phis() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine
        .eval(
            r#"
function merge(a, b, c) {
    var x = Math.fround(a);
    if (c) { x = Math.fround(b); }
    assertFloat32(x, false);
    return x;
}
"#,
        )
        .unwrap();
    let merge = engine.get_global("merge");
    for i in 0..50 {
        let args = vec![JsValue::from_i32(i), JsValue::from_f64(0.5), JsValue::from_i32(i % 2)];
        engine.call(&merge, JsValue::Undefined, args).unwrap();
    }
    assert_eq!(engine.script_tier(&merge), Some(ExecutionTier::Optimized));
    let report = engine.optimization_report(&merge).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(!report.entries[0].actual);
    assert!(report.entries[0].holds());
}

#[test]
fn test_subarray_views_are_recovered_on_bailout() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine
        .eval(
            r#"
var data = new Int32Array(16);
for (var k = 0; k < 16; k++) { data[k] = k; }
function windowSum(ta, from, to) {
    var v = ta.subarray(from, to);
    assertRecoveredOnBailout(v, true);
    var s = 0;
    for (var i = 0; i < v.length; i++) { s += v[i]; }
    return s;
}
var last = 0;
for (var r = 0; r < 50; r++) { last = windowSum(data, 2, 6); }
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("last"), JsValue::from_i32(14));
    let window_sum = engine.get_global("windowSum");
    let report = engine.optimization_report(&window_sum).unwrap();
    let recovered: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.kind == AssertionKind::RecoveredOnBailout)
        .collect();
    assert_eq!(recovered.len(), 1);
    assert!(recovered[0].holds(), "{:?}", report);

    // A bailout after the view was elided still sees a working view.
    let value = engine.eval("windowSum(data, 'a', 3)").unwrap();
    assert_eq!(value, JsValue::from_i32(3));
}

#[test]
fn test_escaping_views_are_materialized() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine
        .eval(
            r#"
var data = new Float64Array(8);
var kept = null;
function keep(ta) {
    var v = ta.subarray(1, 3);
    assertRecoveredOnBailout(v, false);
    kept = v;
    return v.length;
}
for (var r = 0; r < 50; r++) { keep(data); }
kept[0] = 2.5;
var seen = data[1];
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("seen"), JsValue::from_f64(2.5));
    let keep = engine.get_global("keep");
    let report = engine.optimization_report(&keep).unwrap();
    assert_eq!(report.failures().count(), 0, "{:?}", report);
}
