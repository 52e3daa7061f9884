extern crate tierjs;

use tierjs::runner::api::Engine;
use tierjs::runner::config::EngineOptions;
use tierjs::runner::ds::error::EngineError;
use tierjs::runner::ds::operations::type_conversion::to_string;
use tierjs::runner::ds::value::{JsNumberType, JsValue};
use tierjs::runner::jit::tiering::ExecutionTier;

/// Every tier configuration a program is checked under.
fn tier_matrix() -> Vec<(&'static str, EngineOptions)> {
    vec![
        ("interpreter", EngineOptions::interpreter_only()),
        (
            "baseline-interpreter",
            EngineOptions {
                enable_baseline: false,
                enable_ion: false,
                ..EngineOptions::eager()
            },
        ),
        (
            "baseline",
            EngineOptions {
                enable_ion: false,
                ..EngineOptions::eager()
            },
        ),
        ("eager", EngineOptions::eager()),
    ]
}

fn run_get_var(options: EngineOptions, code: &str, var_name: &str) -> JsValue {
    let mut engine = Engine::new(options);
    if let Err(e) = engine.eval(code) {
        panic!("script failed: {}", e);
    }
    engine.get_global(var_name)
}

/// Runs `code` in every tier configuration and checks they agree.
fn run_all_tiers(code: &str, var_name: &str) -> JsValue {
    let mut expected: Option<JsValue> = None;
    for (name, options) in tier_matrix() {
        let value = run_get_var(options, code, var_name);
        match &expected {
            None => expected = Some(value),
            Some(first) => assert_eq!(&value, first, "{} disagrees with the interpreter", name),
        }
    }
    expected.unwrap_or_default()
}

fn run_get_int(code: &str, var_name: &str) -> i32 {
    match run_all_tiers(code, var_name) {
        JsValue::Number(JsNumberType::Integer(n)) => n,
        JsValue::Number(JsNumberType::Float(f)) if f.fract() == 0.0 && f.abs() <= i32::MAX as f64 => f as i32,
        other => panic!("{} was {:?}, expected integer", var_name, other),
    }
}

fn run_get_string(code: &str, var_name: &str) -> String {
    let value = run_all_tiers(code, var_name);
    let engine = Engine::new(EngineOptions::interpreter_only());
    to_string(engine.realm(), &value).to_string()
}

// ── Language surface ─────────────────────────────────────────

#[test]
fn test_simple_loop() {
    let code = "var sum = 0; for (var i = 0; i < 1000; i++) { sum += i * 2 - 1; }";
    assert_eq!(run_get_int(code, "sum"), 998000);
}

#[test]
fn test_nested_loops_with_break_and_continue() {
    let code = r#"
var count = 0;
for (var i = 0; i < 30; i++) {
    if (i % 3 == 0) continue;
    var j = 0;
    while (true) {
        j++;
        if (j > 10) break;
        count += j;
    }
}
"#;
    assert_eq!(run_get_int(code, "count"), 20 * 55);
}

#[test]
fn test_do_while_and_lexicals() {
    let code = r#"
let n = 0;
const limit = 200;
do {
    n += 3;
} while (n < limit);
"#;
    assert_eq!(run_get_int(code, "n"), 201);
}

#[test]
fn test_function_calls_warm_up() {
    let code = r#"
function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
var result = 0;
for (var i = 0; i < 20; i++) { result = fib(i); }
"#;
    assert_eq!(run_get_int(code, "result"), 4181);
}

#[test]
fn test_optimized_loop_calls_a_function_that_cannot_be_inlined() {
    let code = r#"
function inc(x) { try { return x + 1; } catch (e) { return -1; } }
function hot(n) {
    var s = 0;
    for (var i = 0; i < n; i++) { s = inc(s) + (i & 1); }
    return s;
}
var result = 0;
for (var r = 0; r < 10; r++) { result = hot(200); }
"#;
    assert_eq!(run_get_int(code, "result"), 300);

    // Called from the embedding so `hot` runs as its own optimized frame.
    let mut engine = Engine::new(EngineOptions::eager());
    engine.eval(code).unwrap();
    let hot = engine.get_global("hot");
    for n in 0..10 {
        let result = engine.call(&hot, JsValue::Undefined, vec![JsValue::from_i32(n)]).unwrap();
        assert_eq!(result, JsValue::from_i32(n + n / 2));
    }
    assert_eq!(engine.script_tier(&hot), Some(ExecutionTier::Optimized));
    let inc = engine.get_global("inc");
    assert_ne!(engine.script_tier(&inc), Some(ExecutionTier::Optimized));
}

#[test]
fn test_int32_overflow_in_hot_function() {
    let code = r#"
function add(a, b) { return a + b; }
var small = 0;
for (var i = 0; i < 100; i++) { small = add(i, i); }
var big = add(2147483647, 1);
var text = add("a", 1);
"#;
    assert_eq!(run_get_int(code, "small"), 198);
    assert_eq!(run_all_tiers(code, "big"), JsValue::from_f64(2147483648.0));
    assert_eq!(run_get_string(code, "text"), "a1");
}

#[test]
fn test_polymorphic_property_reads() {
    let code = r#"
function getX(o) { return o.x; }
var shapes = [{x: 1}, {y: 2, x: 3}, {z: 0, y: 0, x: 5}];
var total = 0;
for (var i = 0; i < 300; i++) { total += getX(shapes[i % 3]); }
"#;
    assert_eq!(run_get_int(code, "total"), 900);
}

#[test]
fn test_megamorphic_property_reads() {
    let code = r#"
function getV(o) { return o.v; }
var objs = [];
for (var k = 0; k < 12; k++) {
    var o = {};
    for (var m = 0; m < k; m++) { o["p" + m] = m; }
    o.v = k;
    objs.push(o);
}
var total = 0;
for (var i = 0; i < 600; i++) { total += getV(objs[i % 12]); }
"#;
    assert_eq!(run_get_int(code, "total"), 50 * 66);
}

#[test]
fn test_property_writes_and_shape_transitions() {
    let code = r#"
function setY(o, v) { o.y = v; return o; }
var sum = 0;
for (var i = 0; i < 200; i++) {
    var o = i % 2 ? {x: i} : {};
    setY(o, i);
    sum += o.y;
}
"#;
    assert_eq!(run_get_int(code, "sum"), 19900);
}

#[test]
fn test_prototype_methods_and_new() {
    let code = r#"
function Point(x, y) { this.x = x; this.y = y; }
Point.prototype.norm1 = function() { return Math.abs(this.x) + Math.abs(this.y); };
var acc = 0;
for (var i = 0; i < 150; i++) {
    var p = new Point(i, -i);
    acc += p.norm1();
}
var isPoint = new Point(1, 2) instanceof Point;
"#;
    assert_eq!(run_get_int(code, "acc"), 2 * 11175);
    assert_eq!(run_all_tiers(code, "isPoint"), JsValue::Boolean(true));
}

#[test]
fn test_arrays_and_elements() {
    let code = r#"
var arr = [];
for (var i = 0; i < 100; i++) { arr.push(i * i); }
var total = 0;
for (var j = 0; j < arr.length; j++) { total += arr[j]; }
var last = arr.pop();
var found = arr.indexOf(81);
var joined = [1, 2, 3].join("-");
"#;
    assert_eq!(run_get_int(code, "total"), 328350);
    assert_eq!(run_get_int(code, "last"), 9801);
    assert_eq!(run_get_int(code, "found"), 9);
    assert_eq!(run_get_string(code, "joined"), "1-2-3");
}

#[test]
fn test_strings_and_comparisons() {
    let code = r#"
var s = "";
for (var i = 0; i < 10; i++) { s += i % 2 == 0 ? "a" : "b"; }
var len = s.length;
var cmp = "abc" < "abd";
var kind = typeof s + "/" + typeof 1 + "/" + typeof undefined + "/" + typeof null + "/" + typeof print;
"#;
    assert_eq!(run_get_string(code, "s"), "ababababab");
    assert_eq!(run_get_int(code, "len"), 10);
    assert_eq!(run_all_tiers(code, "cmp"), JsValue::Boolean(true));
    assert_eq!(run_get_string(code, "kind"), "string/number/undefined/object/function");
}

#[test]
fn test_bitwise_and_shifts() {
    let code = r#"
var h = 0;
for (var i = 0; i < 500; i++) {
    h = (h << 5) - h + i;
    h = h | 0;
}
var u = -1 >>> 28;
var x = (0xff ^ 0x0f) & ~0x10;
"#;
    let mut expected: i32 = 0;
    for i in 0..500 {
        expected = expected.wrapping_shl(5).wrapping_sub(expected).wrapping_add(i);
    }
    assert_eq!(run_get_int(code, "h"), expected);
    assert_eq!(run_get_int(code, "u"), 15);
    assert_eq!(run_get_int(code, "x"), 0xe0);
}

#[test]
fn test_logical_and_nullish_operators() {
    let code = r#"
var a = null ?? 5;
var b = 0 || 7;
var c = 3 && 4;
var d = undefined ?? (0 ?? 9);
"#;
    assert_eq!(run_get_int(code, "a"), 5);
    assert_eq!(run_get_int(code, "b"), 7);
    assert_eq!(run_get_int(code, "c"), 4);
    assert_eq!(run_get_int(code, "d"), 0);
}

#[test]
fn test_try_catch_finally() {
    let code = r#"
var log = [];
function risky(i) {
    if (i % 4 == 3) throw new RangeError("bad " + i);
    return i;
}
var sum = 0;
for (var i = 0; i < 40; i++) {
    try {
        sum += risky(i);
    } catch (e) {
        log.push(e.message);
    } finally {
        sum += 1;
    }
}
var first = log[0];
var caughtCount = log.length;
"#;
    // 0..40 minus the ten values 3, 7, ..., 39, plus one per iteration.
    assert_eq!(run_get_int(code, "sum"), 780 - 210 + 40);
    assert_eq!(run_get_string(code, "first"), "bad 3");
    assert_eq!(run_get_int(code, "caughtCount"), 10);
}

#[test]
fn test_arrow_functions_and_callbacks() {
    let code = r#"
var total = 0;
[1, 2, 3, 4].forEach((v) => { total += v * 10; });
var twice = (x) => x * 2;
var r = 0;
for (var i = 0; i < 100; i++) { r = twice(i); }
"#;
    assert_eq!(run_get_int(code, "total"), 100);
    assert_eq!(run_get_int(code, "r"), 198);
}

#[test]
fn test_math_builtins_in_hot_loops() {
    let code = r#"
var acc = 0;
for (var i = 1; i < 300; i++) {
    acc += Math.floor(Math.sqrt(i)) + Math.max(i % 7, 3) - Math.min(i, 2);
}
var c = Math.clz32(1) + Math.imul(3, 5);
"#;
    let mut expected = 0i64;
    for i in 1..300i64 {
        expected += (i as f64).sqrt().floor() as i64 + (i % 7).max(3) - i.min(2);
    }
    assert_eq!(run_get_int(code, "acc") as i64, expected);
    assert_eq!(run_get_int(code, "c"), 46);
}

#[test]
fn test_strict_mode_assignment_to_undeclared() {
    let code = r#"
"use strict";
var caught = "";
try { undeclaredName = 1; } catch (e) { caught = e.name; }
"#;
    assert_eq!(run_get_string(code, "caught"), "ReferenceError");
    let sloppy = "var created = 0; function f() { leaked = 3; } f(); created = leaked;";
    assert_eq!(run_get_int(sloppy, "created"), 3);
}

#[test]
fn test_closure_over_enclosing_local_is_a_compile_error() {
    let mut engine = Engine::new(EngineOptions::default());
    let error = engine
        .eval("function outer() { var x = 1; return function() { return x; }; }")
        .unwrap_err();
    assert!(matches!(error, EngineError::Compile(_)));
}

// ── Tier introspection ───────────────────────────────────────

#[test]
fn test_hot_function_reaches_ion() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine.eval("function work(n) { return n * 3 + 1; }").unwrap();
    let work = engine.get_global("work");
    for i in 0..50 {
        let result = engine.call(&work, JsValue::Undefined, vec![JsValue::from_i32(i)]).unwrap();
        assert_eq!(result, JsValue::from_i32(i * 3 + 1));
    }
    assert_eq!(engine.script_tier(&work), Some(ExecutionTier::Optimized));

    let mut interp = Engine::new(EngineOptions::interpreter_only());
    interp.eval("function work(n) { return n * 3 + 1; } for (var i = 0; i < 50; i++) { work(i); }").unwrap();
    let cold = interp.get_global("work");
    assert_eq!(interp.script_tier(&cold), Some(ExecutionTier::Interpreter));
}

#[test]
fn test_get_jit_tier_reports_the_running_tier() {
    let mut engine = Engine::new(EngineOptions { capture_output: true, ..EngineOptions::interpreter_only() });
    engine.eval("print(getJitTier(), inJit(), inIon());").unwrap();
    assert_eq!(engine.printed_output(), vec!["interpreter false false".to_string()]);
}

#[test]
fn test_trial_inlining_attaches_call_inlined_function() {
    let options = EngineOptions {
        blinterp_warmup_threshold: 0,
        baseline_warmup_threshold: 0,
        trial_inlining_warmup_threshold: 5,
        enable_ion: false,
        capture_output: true,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(options);
    engine
        .eval(
            r#"
function square(x) { return x * x; }
function run(n) {
    var s = 0;
    for (var i = 0; i < n; i++) { s += square(i); }
    return s;
}
var result = run(100);
disassembleInlineCaches(run);
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("result"), JsValue::from_i32(328350));

    let run = engine.get_global("run");
    let ics = engine.disassemble_inline_caches(&run).unwrap();
    assert_eq!(ics.matches("CallInlinedFunction").count(), 1, "{}", ics);
    assert!(!ics.contains("CallScriptedFunction"), "{}", ics);

    let printed = engine.printed_output().join("\n");
    assert_eq!(printed.matches("CallInlinedFunction").count(), 1, "{}", printed);
}

#[test]
fn test_polymorphic_call_sites_are_not_inlined() {
    let options = EngineOptions {
        blinterp_warmup_threshold: 0,
        baseline_warmup_threshold: 0,
        trial_inlining_warmup_threshold: 5,
        enable_ion: false,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(options);
    engine
        .eval(
            r#"
function inc(x) { return x + 1; }
function dec(x) { return x - 1; }
var fns = [inc, dec];
function run(n) {
    var s = 0;
    for (var i = 0; i < n; i++) { s += fns[i % 2](i); }
    return s;
}
var result = run(100);
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("result"), JsValue::from_i32(4950));
    let ics = engine.disassemble_inline_caches(&engine.get_global("run")).unwrap();
    assert!(!ics.contains("CallInlinedFunction"), "{}", ics);
}

#[test]
fn test_baseline_hint_is_sticky_across_scripts() {
    let options = EngineOptions {
        enable_ion: false,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(options);
    engine
        .eval("function hot(x) { return x + 1; } for (var i = 0; i < 200; i++) { hot(i); }")
        .unwrap();
    let hot = engine.get_global("hot");
    assert_eq!(engine.script_tier(&hot), Some(ExecutionTier::Baseline));
    assert!(engine.has_baseline_hint(&hot));

    // Same source text in a later script: the hint applies before it warms up.
    engine.eval("function hot(x) { return x + 1; } var once = hot(1);").unwrap();
    let reloaded = engine.get_global("hot");
    assert!(engine.has_baseline_hint(&reloaded));
    assert_eq!(engine.script_tier(&reloaded), Some(ExecutionTier::Baseline));

    engine.eval("function cold(x) { return x - 1; } cold(1);").unwrap();
    let cold = engine.get_global("cold");
    assert!(!engine.has_baseline_hint(&cold));
    assert_eq!(engine.script_tier(&cold), Some(ExecutionTier::Interpreter));
}

#[test]
fn test_set_baseline_hint_from_script() {
    let mut engine = Engine::new(EngineOptions::default());
    engine
        .eval(
            r#"
function f(x) { return x; }
var before = hasBaselineHint(f);
setBaselineHint(f);
var after = hasBaselineHint(f);
f(1);
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("before"), JsValue::Boolean(false));
    assert_eq!(engine.get_global("after"), JsValue::Boolean(true));
    let f = engine.get_global("f");
    assert_eq!(engine.script_tier(&f), Some(ExecutionTier::Baseline));
}

#[test]
fn test_tier_up_is_idempotent() {
    let code = r#"
function mix(a, b) { return (a * 31 + b) % 1000; }
var out = [];
for (var i = 0; i < 200; i++) { out.push(mix(i, out.length)); }
var result = out.join(",");
"#;
    let first = run_get_var(EngineOptions::eager(), code, "result");
    let second = run_get_var(EngineOptions::eager(), code, "result");
    let oracle = run_get_var(EngineOptions::interpreter_only(), code, "result");
    assert_eq!(first, second);
    assert_eq!(first, oracle);

    // Running the same script twice in one engine reuses its IC feedback.
    let mut engine = Engine::new(EngineOptions::eager());
    let script = engine.compile(code, Default::default()).unwrap();
    engine.run(&script).unwrap();
    let once = engine.get_global("result");
    engine.run(&script).unwrap();
    assert_eq!(engine.get_global("result"), once);
    assert_eq!(once, oracle);
}

#[test]
fn test_off_thread_compilation_matches() {
    let code = r#"
function poly(x) { return x * x - 3 * x + 2; }
var total = 0;
for (var i = 0; i < 2000; i++) { total += poly(i % 50); }
"#;
    let options = EngineOptions {
        off_thread_compilation: true,
        ..EngineOptions::eager()
    };
    let mut engine = Engine::new(options);
    engine.eval(code).unwrap();
    engine.wait_for_background_work();
    let total = engine.get_global("total");
    assert_eq!(total, run_get_var(EngineOptions::interpreter_only(), code, "total"));
    engine.eval("for (var i = 0; i < 10; i++) { total += poly(i); }").unwrap();
}
