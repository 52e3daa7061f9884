extern crate tierjs;

use tierjs::runner::api::Engine;
use tierjs::runner::config::EngineOptions;
use tierjs::runner::ds::value::JsValue;
use tierjs::runner::jit::fuse::{PropertyFuseState, RealmFuseId};
use tierjs::runner::jit::tiering::ExecutionTier;

fn property_state(engine: &Engine, object: &JsValue, name: &str) -> PropertyFuseState {
    let state = engine.object_fuse_state(object).unwrap();
    state
        .properties
        .iter()
        .find(|(key, _)| &**key == name)
        .map(|(_, s)| *s)
        .unwrap_or_else(|| panic!("{} is not a property", name))
}

fn generation(engine: &Engine, object: &JsValue) -> u32 {
    engine.object_fuse_state(object).unwrap().generation
}

fn realm_fuse(engine: &Engine, fuse: RealmFuseId) -> bool {
    engine
        .fuse_state()
        .into_iter()
        .find(|(id, _)| *id == fuse)
        .map(|(_, intact)| intact)
        .unwrap_or_else(|| panic!("{:?} is not registered", fuse))
}

// ── Global object fuse ───────────────────────────────────────

#[test]
fn test_global_constant_is_invalidated_by_second_write() {
    let mut engine = Engine::new(EngineOptions::eager());
    let global = engine.eval("globalThis").unwrap();
    let start = generation(&engine, &global);

    engine.eval("var g = 1; function readG() { return g; }").unwrap();
    assert_eq!(property_state(&engine, &global, "g"), PropertyFuseState::Constant);
    assert_eq!(generation(&engine, &global), start);

    let read_g = engine.get_global("readG");
    for _ in 0..10 {
        assert_eq!(engine.call(&read_g, JsValue::Undefined, vec![]).unwrap(), JsValue::from_i32(1));
    }
    assert_eq!(engine.script_tier(&read_g), Some(ExecutionTier::Optimized));

    engine.eval("g = 2;").unwrap();
    assert_eq!(property_state(&engine, &global, "g"), PropertyFuseState::NotConstant);
    assert_eq!(generation(&engine, &global), start + 1);
    for _ in 0..10 {
        assert_eq!(engine.call(&read_g, JsValue::Undefined, vec![]).unwrap(), JsValue::from_i32(2));
    }

    // NotConstant is final: further writes neither bump nor go stale.
    engine.eval("g = 3;").unwrap();
    assert_eq!(generation(&engine, &global), start + 1);
    assert_eq!(engine.call(&read_g, JsValue::Undefined, vec![]).unwrap(), JsValue::from_i32(3));
}

#[test]
fn test_rewriting_the_same_value_still_invalidates() {
    for options in [EngineOptions::interpreter_only(), EngineOptions::eager()] {
        let mut engine = Engine::new(options);
        let global = engine.eval("globalThis").unwrap();
        let start = generation(&engine, &global);
        engine.eval("var g = 1;").unwrap();
        assert_eq!(property_state(&engine, &global, "g"), PropertyFuseState::Constant);

        engine.eval("g = 1;").unwrap();
        assert_eq!(property_state(&engine, &global, "g"), PropertyFuseState::NotConstant);
        assert_eq!(generation(&engine, &global), start + 1);
        assert_eq!(engine.get_global("g"), JsValue::from_i32(1));
    }
}

#[test]
fn test_global_invalidation_inside_a_running_loop() {
    let code = r#"
var limit = 1;
function capped(x) { return x > limit ? limit : x; }
var out = [];
for (var i = 0; i < 60; i++) {
    if (i == 30) { limit = 5; }
    out.push(capped(i));
}
var result = out.join(",");
"#;
    let mut eager = Engine::new(EngineOptions::eager());
    eager.eval(code).unwrap();
    let mut interp = Engine::new(EngineOptions::interpreter_only());
    interp.eval(code).unwrap();
    assert_eq!(eager.get_global("result"), interp.get_global("result"));
}

#[test]
fn test_writes_through_global_this_invalidate_reads() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine.eval("var mode = 'a'; function readMode() { return mode; }").unwrap();
    engine.eval("for (var i = 0; i < 20; i++) { readMode(); }").unwrap();
    let read_mode = engine.get_global("readMode");
    engine.eval("globalThis.mode = 'b';").unwrap();
    assert_eq!(engine.call(&read_mode, JsValue::Undefined, vec![]).unwrap(), JsValue::from("b"));
}

#[test]
fn test_script_visible_fuse_state() {
    let mut engine = Engine::new(EngineOptions::interpreter_only());
    engine
        .eval(
            r#"
var cfg = { mode: 1, level: 2 };
addObjectFuse(cfg);
var s0 = getObjectFuseState(cfg).properties.mode;
cfg.mode = 10;
var s1 = getObjectFuseState(cfg).properties.mode;
var g1 = getObjectFuseState(cfg).generation;
cfg.mode = 11;
var s2 = getObjectFuseState(cfg).properties.mode;
var g2 = getObjectFuseState(cfg).generation;
var untouched = getObjectFuseState(cfg).properties.level;
var plain = getObjectFuseState({});
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("s0"), JsValue::from("Untracked"));
    assert_eq!(engine.get_global("s1"), JsValue::from("Constant"));
    assert_eq!(engine.get_global("g1"), JsValue::from_i32(0));
    assert_eq!(engine.get_global("s2"), JsValue::from("NotConstant"));
    assert_eq!(engine.get_global("g2"), JsValue::from_i32(1));
    assert_eq!(engine.get_global("untouched"), JsValue::from("Untracked"));
    assert_eq!(engine.get_global("plain"), JsValue::Undefined);
}

#[test]
fn test_object_fuse_from_the_embedding_api() {
    let mut engine = Engine::new(EngineOptions::eager());
    engine
        .eval("var settings = { scale: 3 }; function scaled(x) { return x * settings.scale; }")
        .unwrap();
    let settings = engine.get_global("settings");
    assert!(engine.object_fuse_state(&settings).is_none());
    engine.add_object_fuse(&settings);
    engine.eval("settings.scale = 4;").unwrap();
    assert_eq!(property_state(&engine, &settings, "scale"), PropertyFuseState::Constant);

    let scaled = engine.get_global("scaled");
    for _ in 0..10 {
        assert_eq!(
            engine.call(&scaled, JsValue::Undefined, vec![JsValue::from_i32(2)]).unwrap(),
            JsValue::from_i32(8)
        );
    }
    engine.eval("settings.scale = 5;").unwrap();
    assert_eq!(generation(&engine, &settings), 1);
    assert_eq!(
        engine.call(&scaled, JsValue::Undefined, vec![JsValue::from_i32(2)]).unwrap(),
        JsValue::from_i32(10)
    );
}

// ── Realm fuses ──────────────────────────────────────────────

#[test]
fn test_species_fuse_pops_once_and_stays_popped() {
    let mut engine = Engine::new(EngineOptions::eager());
    assert!(realm_fuse(&engine, RealmFuseId::OptimizeTypedArraySpeciesFuse));
    assert!(realm_fuse(&engine, RealmFuseId::OptimizeArraySpeciesFuse));

    engine
        .eval(
            r#"
var calls = 0;
function Species(buf, offset, length) { calls++; return new Int8Array(buf, offset, length); }
var ta = new Int8Array(8);
function slice2(a) { return a.subarray(2, 4).length; }
for (var i = 0; i < 20; i++) { slice2(ta); }
var before = getFuseState().OptimizeTypedArraySpeciesFuse.intact;
Int8Array.species = Species;
var after = getFuseState().OptimizeTypedArraySpeciesFuse.intact;
var len = slice2(ta);
"#,
        )
        .unwrap();
    assert_eq!(engine.get_global("before"), JsValue::Boolean(true));
    assert_eq!(engine.get_global("after"), JsValue::Boolean(false));
    assert_eq!(engine.get_global("len"), JsValue::from_i32(2));
    assert_eq!(engine.get_global("calls"), JsValue::from_i32(1));
    assert!(!realm_fuse(&engine, RealmFuseId::OptimizeTypedArraySpeciesFuse));
    assert!(realm_fuse(&engine, RealmFuseId::OptimizeArraySpeciesFuse));

    // Undoing the change does not restore the fuse.
    engine.eval("delete Int8Array.species;").unwrap();
    assert!(!realm_fuse(&engine, RealmFuseId::OptimizeTypedArraySpeciesFuse));
}

#[test]
fn test_array_prototype_writes_pop_the_array_fuse() {
    let mut engine = Engine::new(EngineOptions::interpreter_only());
    engine.eval("Array.prototype.extra = 1;").unwrap();
    assert!(!realm_fuse(&engine, RealmFuseId::OptimizeArraySpeciesFuse));
    assert!(realm_fuse(&engine, RealmFuseId::OptimizeTypedArraySpeciesFuse));
}

// ── Detached buffers ─────────────────────────────────────────

fn detach_loop(options: EngineOptions, operation: &str) -> (JsValue, JsValue, JsValue) {
    let code = format!(
        r#"
var buf = new ArrayBuffer(64);
var ta = new Int32Array(buf);
var src = new Int32Array(4);
function step(i) {{
    if (i == 100) detachArrayBuffer(buf);
    {};
}}
var succeeded = 0;
var failedAt = -1;
var isTypeError = false;
try {{
    for (var i = 0; i < 101; i++) {{
        step(i);
        succeeded++;
    }}
}} catch (e) {{
    failedAt = i;
    isTypeError = e instanceof TypeError;
}}
"#,
        operation
    );
    let mut engine = Engine::new(options);
    engine.eval(&code).unwrap();
    (
        engine.get_global("succeeded"),
        engine.get_global("failedAt"),
        engine.get_global("isTypeError"),
    )
}

#[test]
fn test_detach_mid_loop_throws_on_the_next_operation() {
    for operation in ["ta.fill(i)", "ta.set(src, 2)", "ta.subarray(1, 3)"] {
        for options in [EngineOptions::interpreter_only(), EngineOptions::eager()] {
            let (succeeded, failed_at, is_type_error) = detach_loop(options, operation);
            assert_eq!(succeeded, JsValue::from_i32(100), "{}", operation);
            assert_eq!(failed_at, JsValue::from_i32(100), "{}", operation);
            assert_eq!(is_type_error, JsValue::Boolean(true), "{}", operation);
        }
    }
}

#[test]
fn test_detached_views_read_as_empty() {
    let code = r#"
var buf = new ArrayBuffer(16);
var ta = new Float32Array(buf);
function read(i) { return ta[i]; }
function write(i, v) { ta[i] = v; }
for (var i = 0; i < 50; i++) { write(i % 4, i); read(i % 4); }
detachArrayBuffer(buf);
write(0, 7);
var value = read(0);
var length = ta.length;
var byteLength = ta.byteLength;
var offset = ta.byteOffset;
var detached = buf.detached;
var bufferLength = buf.byteLength;
"#;
    for options in [EngineOptions::interpreter_only(), EngineOptions::eager()] {
        let mut engine = Engine::new(options);
        engine.eval(code).unwrap();
        assert_eq!(engine.get_global("value"), JsValue::Undefined);
        assert_eq!(engine.get_global("length"), JsValue::from_i32(0));
        assert_eq!(engine.get_global("byteLength"), JsValue::from_i32(0));
        assert_eq!(engine.get_global("offset"), JsValue::from_i32(0));
        assert_eq!(engine.get_global("detached"), JsValue::Boolean(true));
        assert_eq!(engine.get_global("bufferLength"), JsValue::from_i32(0));
    }
}
