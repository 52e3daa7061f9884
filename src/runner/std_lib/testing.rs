//! Testing functions for the shell and the test suite.
//!
//! These expose engine internals (tiers, fuses, IC chains) to scripts.
//! `assertFloat32`, `assertRecoveredOnBailout` and `bailout` do nothing
//! when called; the optimizing compiler recognizes them by their intrinsic
//! tag and records or acts on them at compile time.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{Intrinsic, ObjectClass, ObjectId};
use crate::runner::ds::operations::object::{self as obj_ops, add_object_fuse};
use crate::runner::ds::operations::test_and_comparison::same_value;
use crate::runner::ds::operations::type_conversion::to_string;
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::FunctionTemplate;
use crate::runner::jit::ic::disassemble;
use crate::runner::jit::tiering::ExecutionTier;
use crate::runner::jit::vm::Vm;

use super::core::{arg, define_global_function, object_arg};
use super::typed_array::detach;

pub fn install(realm: &mut Realm) {
    define_global_function(realm, "assertEq", assert_eq, 2, None);
    define_global_function(realm, "gc", gc, 0, None);
    define_global_function(realm, "hasBaselineHint", has_baseline_hint, 1, None);
    define_global_function(realm, "setBaselineHint", set_baseline_hint, 1, None);
    define_global_function(realm, "getFuseState", get_fuse_state, 0, None);
    define_global_function(realm, "getObjectFuseState", get_object_fuse_state, 1, None);
    define_global_function(realm, "addObjectFuse", add_object_fuse_fn, 1, None);
    define_global_function(realm, "disassembleInlineCaches", disassemble_inline_caches, 1, None);
    define_global_function(realm, "detachArrayBuffer", detach_array_buffer, 1, None);
    define_global_function(realm, "assertFloat32", nothing, 2, Some(Intrinsic::AssertFloat32));
    define_global_function(realm, "assertRecoveredOnBailout", nothing, 2, Some(Intrinsic::AssertRecoveredOnBailout));
    define_global_function(realm, "bailout", nothing, 0, Some(Intrinsic::Bailout));
    define_global_function(realm, "inJit", in_jit, 0, None);
    define_global_function(realm, "inIon", in_ion, 0, None);
    define_global_function(realm, "getJitTier", get_jit_tier, 0, None);
}

/// The template of a scripted function argument.
pub fn function_template(realm: &Realm, value: &JsValue) -> Option<Arc<FunctionTemplate>> {
    match &realm.heap.get(value.as_object()?).class {
        ObjectClass::Function(f) => Some(f.template.clone()),
        _ => None,
    }
}

fn template_arg(vm: &Vm, args: &[JsValue], what: &str) -> Result<Arc<FunctionTemplate>, JErrorType> {
    function_template(&vm.realm, &arg(args, 0))
        .ok_or_else(|| JErrorType::TypeError(format!("{}: argument is not a scripted function", what)))
}

fn assert_eq(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let (actual, expected) = (arg(args, 0), arg(args, 1));
    if same_value(&actual, &expected) {
        return Ok(JsValue::Undefined);
    }
    let mut message = format!(
        "Assertion failed: got {}, expected {}",
        describe(&vm.realm, &actual),
        describe(&vm.realm, &expected)
    );
    if let Some(note) = args.get(2) {
        message.push_str(": ");
        message.push_str(&to_string(&vm.realm, note));
    }
    Err(JErrorType::Error(message))
}

fn describe(realm: &Realm, value: &JsValue) -> String {
    match value {
        JsValue::String(s) => format!("\"{}\"", s),
        JsValue::Number(n) if n.as_f64() == 0.0 && n.as_f64().is_sign_negative() => "-0".to_string(),
        other => to_string(realm, other).to_string(),
    }
}

fn gc(vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    vm.request_gc();
    Ok(JsValue::Undefined)
}

fn has_baseline_hint(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let template = template_arg(vm, args, "hasBaselineHint")?;
    Ok(JsValue::Boolean(vm.realm.baseline_hints.contains(&template.source_hash)))
}

fn set_baseline_hint(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let template = template_arg(vm, args, "setBaselineHint")?;
    vm.realm.baseline_hints.insert(template.source_hash);
    Ok(JsValue::Undefined)
}

fn data_object(realm: &mut Realm, entries: Vec<(Arc<str>, JsValue)>) -> ObjectId {
    let id = realm.alloc_ordinary();
    for (key, value) in entries {
        obj_ops::define_property(realm, id, &key, value, PropertyAttributes::DEFAULT);
    }
    id
}

fn get_fuse_state(vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let states = vm.realm.fuses.states();
    let mut entries = Vec::with_capacity(states.len());
    for (fuse, intact) in states {
        let state = data_object(&mut vm.realm, vec![(Arc::from("intact"), JsValue::Boolean(intact))]);
        entries.push((Arc::from(fuse.name()), JsValue::Object(state)));
    }
    Ok(JsValue::Object(data_object(&mut vm.realm, entries)))
}

fn get_object_fuse_state(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "getObjectFuseState argument")?;
    let object = vm.realm.heap.get(id);
    let Some(fuse) = object.fuse.as_deref() else {
        return Ok(JsValue::Undefined);
    };
    let generation = fuse.generation();
    let properties: Vec<(Arc<str>, JsValue)> = vm
        .realm
        .shapes
        .get(object.shape)
        .keys()
        .map(|key| (key.clone(), JsValue::from(fuse.state(key).name())))
        .collect();
    let properties = data_object(&mut vm.realm, properties);
    let state = data_object(
        &mut vm.realm,
        vec![
            (Arc::from("generation"), JsValue::from_f64(generation as f64)),
            (Arc::from("properties"), JsValue::Object(properties)),
        ],
    );
    Ok(JsValue::Object(state))
}

fn add_object_fuse_fn(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "addObjectFuse argument")?;
    add_object_fuse(&mut vm.realm, id);
    Ok(JsValue::Undefined)
}

fn disassemble_inline_caches(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let template = template_arg(vm, args, "disassembleInlineCaches")?;
    let text = template
        .script()
        .ok()
        .and_then(|script| vm.realm.script_id(&script))
        .map(|id| disassemble(&vm.realm.runtime(id).ics))
        .unwrap_or_default();
    vm.print(text.trim_end().to_string());
    Ok(JsValue::Undefined)
}

fn detach_array_buffer(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "detachArrayBuffer argument")?;
    detach(&mut vm.realm, id)?;
    Ok(JsValue::Undefined)
}

fn nothing(_vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Undefined)
}

/// Tier of the innermost scripted frame. A frame running optimized code
/// reports `ion` whatever tier it was entered in.
fn current_tier(vm: &Vm) -> ExecutionTier {
    match vm.frames.last() {
        Some(frame) if frame.opt.is_some() => ExecutionTier::Optimized,
        Some(frame) => frame.tier,
        None => ExecutionTier::Interpreter,
    }
}

fn in_jit(vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(current_tier(vm).is_jit()))
}

fn in_ion(vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(current_tier(vm) == ExecutionTier::Optimized))
}

fn get_jit_tier(vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from(current_tier(vm).name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::EngineOptions;

    #[test]
    fn assert_eq_distinguishes_signed_zero() {
        let mut vm = Vm::new(Realm::new(), EngineOptions::default());
        let ok = assert_eq(&mut vm, JsValue::Undefined, &[JsValue::from_i32(1), JsValue::from_f64(1.0)]);
        assert!(ok.is_ok());
        let err = assert_eq(&mut vm, JsValue::Undefined, &[JsValue::from_f64(-0.0), JsValue::from_i32(0)]);
        match err {
            Err(JErrorType::Error(message)) => assert_eq!(message, "Assertion failed: got -0, expected 0"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn fuse_state_lists_every_realm_fuse() {
        let mut vm = Vm::new(Realm::new(), EngineOptions::default());
        let state = get_fuse_state(&mut vm, JsValue::Undefined, &[]).unwrap();
        let id = state.as_object().unwrap();
        let species = obj_ops::get(&vm.realm, id, "OptimizeTypedArraySpeciesFuse").as_object().unwrap();
        assert_eq!(obj_ops::get(&vm.realm, species, "intact"), JsValue::Boolean(true));
    }
}
