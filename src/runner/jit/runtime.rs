//! Operation semantics shared by every tier.
//!
//! Each IC-carrying operation has the same three steps in every tier: build
//! an `IcDescriptor` from the operands, run the first matching stub, and on a
//! miss run the generic operation and try to attach a stub for next time.
//! The interpreter, the dispatch-table interpreter, the baseline op vector
//! and the optimizer's generic instructions all call into this module, so an
//! operation means the same thing wherever it runs.

use std::sync::Arc;

use half::f16;
use smallvec::SmallVec;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{Intrinsic, ObjectClass, ObjectId, ScriptFunction};
use crate::runner::ds::operations::object::{
    self as obj_ops, find_holder, get_prototype, is_exotic_key, typed_array_length, typed_array_read,
    typed_array_write,
};
use crate::runner::ds::operations::test_and_comparison::{
    compare_utf16, less_than, loose_equality_comparison, strict_equality_comparison,
};
use crate::runner::ds::operations::type_conversion::{
    get_type, to_int32, to_number, to_primitive, to_property_key, to_string, to_uint32,
};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::{PropertyAttributes, ShapeFlags, ShapeId};
use crate::runner::ds::value::{JsNumberType, JsValue, TypeTag};
use crate::runner::jit::bytecode::{FunctionTemplate, OpCode};
use crate::runner::jit::fuse::PropertyFuseState;
use crate::runner::jit::ic::{AttachOutcome, GlobalState, IcDescriptor, IcGuard, IcHandler};
use crate::runner::jit::tiering::ScriptId;
use crate::runner::jit::vm::Vm;

/// Names one IC slot of one script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IcRef {
    pub script: ScriptId,
    pub slot: u32,
}

impl IcRef {
    pub fn new(script: ScriptId, slot: u32) -> Self {
        IcRef { script, slot }
    }
}

// ── Pure arithmetic ──────────────────────────────────────────

pub fn js_pow(x: f64, y: f64) -> f64 {
    if y.is_nan() || (x.abs() == 1.0 && y.is_infinite()) {
        return f64::NAN;
    }
    x.powf(y)
}

/// Binary arithmetic on numbers that are already converted.
pub fn number_binary(op: OpCode, x: f64, y: f64) -> f64 {
    match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        OpCode::Mod => x % y,
        OpCode::Exp => js_pow(x, y),
        OpCode::BitAnd => (to_int32(x) & to_int32(y)) as f64,
        OpCode::BitOr => (to_int32(x) | to_int32(y)) as f64,
        OpCode::BitXor => (to_int32(x) ^ to_int32(y)) as f64,
        OpCode::Shl => to_int32(x).wrapping_shl(to_uint32(y) & 31) as f64,
        OpCode::Shr => (to_int32(x) >> (to_uint32(y) & 31)) as f64,
        OpCode::UShr => (to_uint32(x) >> (to_uint32(y) & 31)) as f64,
        _ => f64::NAN,
    }
}

/// Int32 arithmetic with the exact JS result, which may leave the int32
/// range or be `-0`.
pub fn int32_binary(op: OpCode, x: i32, y: i32) -> JsValue {
    match op {
        OpCode::Add => JsValue::from_f64((x as i64 + y as i64) as f64),
        OpCode::Sub => JsValue::from_f64((x as i64 - y as i64) as f64),
        OpCode::Mul => {
            let product = x as i64 * y as i64;
            if product == 0 && (x < 0 || y < 0) {
                JsValue::from_f64(-0.0)
            } else {
                JsValue::from_f64(product as f64)
            }
        }
        _ => JsValue::from_f64(number_binary(op, x as f64, y as f64)),
    }
}

/// Checked int32 arithmetic for the optimizer: `None` when the result is
/// not an int32.
pub fn int32_binary_checked(op: OpCode, x: i32, y: i32) -> Option<i32> {
    match op {
        OpCode::Add => x.checked_add(y),
        OpCode::Sub => x.checked_sub(y),
        OpCode::Mul => {
            let product = x.checked_mul(y)?;
            if product == 0 && (x < 0 || y < 0) {
                None
            } else {
                Some(product)
            }
        }
        OpCode::BitAnd => Some(x & y),
        OpCode::BitOr => Some(x | y),
        OpCode::BitXor => Some(x ^ y),
        OpCode::Shl => Some(x.wrapping_shl(y as u32 & 31)),
        OpCode::Shr => Some(x >> (y as u32 & 31)),
        OpCode::UShr => {
            let r = (x as u32) >> (y as u32 & 31);
            i32::try_from(r).ok()
        }
        _ => match JsValue::from_f64(number_binary(op, x as f64, y as f64)) {
            JsValue::Number(JsNumberType::Integer(i)) => Some(i),
            _ => None,
        },
    }
}

pub fn binary_generic(realm: &Realm, op: OpCode, a: &JsValue, b: &JsValue) -> JsValue {
    if let (Some(x), Some(y)) = (a.as_int32(), b.as_int32()) {
        return int32_binary(op, x, y);
    }
    if op == OpCode::Add {
        let pa = to_primitive(realm, a);
        let pb = to_primitive(realm, b);
        if matches!(pa, JsValue::String(_)) || matches!(pb, JsValue::String(_)) {
            let mut s = to_string(realm, &pa).to_string();
            s.push_str(&to_string(realm, &pb));
            return JsValue::String(Arc::from(s));
        }
        return JsValue::from_f64(to_number(realm, &pa) + to_number(realm, &pb));
    }
    JsValue::from_f64(number_binary(op, to_number(realm, a), to_number(realm, b)))
}

pub fn number_unary(op: OpCode, x: f64) -> f64 {
    match op {
        OpCode::Neg => -x,
        OpCode::Pos => x,
        OpCode::BitNot => !to_int32(x) as f64,
        OpCode::Inc => x + 1.0,
        OpCode::Dec => x - 1.0,
        _ => f64::NAN,
    }
}

pub fn unary_generic(realm: &Realm, op: OpCode, a: &JsValue) -> JsValue {
    JsValue::from_f64(number_unary(op, to_number(realm, a)))
}

pub fn compare_numbers(op: OpCode, x: f64, y: f64) -> bool {
    match op {
        OpCode::Eq | OpCode::StrictEq => x == y,
        OpCode::Ne | OpCode::StrictNe => x != y,
        OpCode::Lt => x < y,
        OpCode::Le => x <= y,
        OpCode::Gt => x > y,
        OpCode::Ge => x >= y,
        _ => false,
    }
}

pub fn compare_strings(op: OpCode, x: &str, y: &str) -> bool {
    use std::cmp::Ordering;
    let ord = compare_utf16(x, y);
    match op {
        OpCode::Eq | OpCode::StrictEq => x == y,
        OpCode::Ne | OpCode::StrictNe => x != y,
        OpCode::Lt => ord == Ordering::Less,
        OpCode::Le => ord != Ordering::Greater,
        OpCode::Gt => ord == Ordering::Greater,
        OpCode::Ge => ord != Ordering::Less,
        _ => false,
    }
}

pub fn compare_generic(realm: &Realm, op: OpCode, a: &JsValue, b: &JsValue) -> bool {
    match op {
        OpCode::Eq => loose_equality_comparison(realm, a, b),
        OpCode::Ne => !loose_equality_comparison(realm, a, b),
        OpCode::StrictEq => strict_equality_comparison(a, b),
        OpCode::StrictNe => !strict_equality_comparison(a, b),
        OpCode::Lt => less_than(realm, a, b) == Some(true),
        OpCode::Gt => less_than(realm, b, a) == Some(true),
        OpCode::Le => less_than(realm, b, a) == Some(false),
        OpCode::Ge => less_than(realm, a, b) == Some(false),
        _ => false,
    }
}

pub fn type_of(realm: &Realm, v: &JsValue) -> JsValue {
    JsValue::string(get_type(realm, v))
}

pub fn in_operator(realm: &Realm, key: &JsValue, target: &JsValue) -> Result<JsValue, JErrorType> {
    let Some(id) = target.as_object() else {
        return Err(JErrorType::TypeError(format!(
            "Cannot use 'in' operator to search for '{}' in {}",
            to_string(realm, key),
            to_string(realm, target)
        )));
    };
    Ok(JsValue::Boolean(obj_ops::has_property(realm, id, &to_property_key(realm, key))))
}

pub fn instance_of(realm: &Realm, value: &JsValue, ctor: &JsValue) -> Result<JsValue, JErrorType> {
    let callable = ctor
        .as_object()
        .filter(|id| realm.heap.get(*id).class.is_callable());
    let Some(ctor) = callable else {
        return Err(JErrorType::TypeError("Right-hand side of 'instanceof' is not callable".to_string()));
    };
    let Some(target) = obj_ops::get(realm, ctor, "prototype").as_object() else {
        return Err(JErrorType::TypeError(
            "Function has non-object prototype in instanceof check".to_string(),
        ));
    };
    let Some(mut current) = value.as_object() else {
        return Ok(JsValue::Boolean(false));
    };
    while let Some(proto) = get_prototype(realm, current) {
        if proto == target {
            return Ok(JsValue::Boolean(true));
        }
        current = proto;
    }
    Ok(JsValue::Boolean(false))
}

/// Creates a function object for `template`. Non-arrow functions get a
/// fresh `prototype` object.
pub fn make_closure(realm: &mut Realm, template: &Arc<FunctionTemplate>) -> ObjectId {
    let proto = realm.intrinsics.function_prototype;
    let function = realm.alloc(
        Some(proto),
        ObjectClass::Function(ScriptFunction { template: template.clone() }),
    );
    if !template.is_arrow() {
        let prototype = realm.alloc_ordinary();
        obj_ops::define_property(
            realm,
            prototype,
            &Arc::from("constructor"),
            JsValue::Object(function),
            PropertyAttributes::BUILTIN,
        );
        obj_ops::define_property(
            realm,
            function,
            &Arc::from("prototype"),
            JsValue::Object(prototype),
            PropertyAttributes::WRITABLE,
        );
    }
    function
}

// ── IC plumbing ──────────────────────────────────────────────

enum StubResult<T> {
    Hit(T),
    Miss,
    /// The stub can never succeed again and is dropped.
    Stale,
}

fn global_state(realm: &Realm) -> GlobalState {
    let global = realm.heap.get(realm.global);
    GlobalState {
        shape: global.shape,
        lexical_epoch: realm.lexical_epoch,
        generation: global.fuse.as_ref().map(|f| f.generation()).unwrap_or(0),
    }
}

pub fn value_descriptor(realm: &Realm, value: &JsValue) -> IcDescriptor {
    IcDescriptor::for_value(value, value.as_object().map(|id| realm.shape_of(id)))
}

/// Runs the matching stubs of `ic`, newest first.
fn run_stubs<T>(
    realm: &mut Realm,
    ic: IcRef,
    desc: &IcDescriptor,
    mut run: impl FnMut(&mut Realm, &IcHandler) -> StubResult<T>,
) -> Option<T> {
    let slot = ic.slot as usize;
    let candidates: SmallVec<[(usize, IcHandler); 4]> = {
        let ic_slot = &mut realm.runtime_mut(ic.script).ics[slot];
        ic_slot.entered = ic_slot.entered.saturating_add(1);
        ic_slot
            .candidates(desc)
            .map(|i| (i, ic_slot.stubs[i].handler.clone()))
            .collect()
    };
    for (index, handler) in candidates {
        match run(realm, &handler) {
            StubResult::Hit(value) => {
                realm.runtime_mut(ic.script).ics[slot].record_hit(index);
                return Some(value);
            }
            StubResult::Stale => realm.runtime_mut(ic.script).ics[slot].remove(index),
            StubResult::Miss => {}
        }
    }
    None
}

fn attach(vm: &mut Vm, ic: IcRef, guard: IcGuard, handler: IcHandler) {
    let limit = vm.options.ic_attach_limit;
    let runtime = vm.realm.runtime_mut(ic.script);
    match runtime.ics[ic.slot as usize].attach(guard, handler, limit) {
        AttachOutcome::Attached | AttachOutcome::WentMegamorphic => runtime.note_attach(),
        AttachOutcome::Duplicate | AttachOutcome::Megamorphic => {}
    }
}

fn is_strict(vm: &Vm, ic: IcRef) -> bool {
    vm.realm.runtime(ic.script).script.strict
}

pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Checks that no object between the receiver's prototype and `holder`
/// has gained `name`.
fn proto_chain_reaches(realm: &Realm, receiver: ObjectId, holder: ObjectId, name: &str) -> bool {
    let mut current = get_prototype(realm, receiver);
    while let Some(o) = current {
        if o == holder {
            return true;
        }
        let object = realm.heap.get(o);
        if is_exotic_key(&object.class, name) || realm.shapes.get(object.shape).lookup(name).is_some() {
            return false;
        }
        current = get_prototype(realm, o);
    }
    false
}

/// Runs a load stub against `value`. Also used by the baseline tier and
/// the optimizer's prototype loads.
pub fn load_prop_stub(realm: &Realm, handler: &IcHandler, value: &JsValue, name: &str) -> Option<JsValue> {
    match load_stub(realm, handler, value, name) {
        StubResult::Hit(v) => Some(v),
        _ => None,
    }
}

fn load_stub(realm: &Realm, handler: &IcHandler, value: &JsValue, name: &str) -> StubResult<JsValue> {
    let hit = |v: Option<JsValue>| match v {
        Some(v) => StubResult::Hit(v),
        None => StubResult::Miss,
    };
    match handler {
        IcHandler::StringLength => hit(value.as_str().map(|s| JsValue::from_f64(utf16_len(s) as f64))),
        IcHandler::LoadSlot { slot } => {
            hit(value.as_object().and_then(|id| realm.heap.get(id).slots.get(*slot as usize).cloned()))
        }
        IcHandler::LoadProtoSlot { holder, holder_shape, slot } => {
            let Some(receiver) = value.as_object() else {
                return StubResult::Miss;
            };
            if !realm.heap.is_live(*holder)
                || realm.shape_of(*holder) != *holder_shape
                || !proto_chain_reaches(realm, receiver, *holder, name)
            {
                return StubResult::Stale;
            }
            hit(realm.heap.get(*holder).slots.get(*slot as usize).cloned())
        }
        IcHandler::ArrayLength => hit(value
            .as_object()
            .and_then(|id| realm.heap.get(id).as_array().map(|e| JsValue::from_f64(e.len() as f64)))),
        IcHandler::TypedArrayLength => hit(value.as_object().and_then(|id| {
            realm
                .heap
                .get(id)
                .as_typed_array()
                .map(|t| JsValue::from_f64(typed_array_length(realm, t) as f64))
        })),
        _ => StubResult::Miss,
    }
}

// ── Property access ──────────────────────────────────────────

pub fn get_prop(vm: &mut Vm, ic: IcRef, value: &JsValue, name: &Arc<str>) -> Result<JsValue, JErrorType> {
    let desc = value_descriptor(&vm.realm, value);
    if let Some(v) = run_stubs(&mut vm.realm, ic, &desc, |realm, h| load_stub(realm, h, value, name)) {
        return Ok(v);
    }
    let result = obj_ops::get_value(&vm.realm, value, name)?;
    if let Some((guard, handler)) = plan_get_prop(&vm.realm, value, name) {
        attach(vm, ic, guard, handler);
    }
    Ok(result)
}

fn plan_get_prop(realm: &Realm, value: &JsValue, name: &str) -> Option<(IcGuard, IcHandler)> {
    match value {
        JsValue::String(_) if name == "length" => Some((IcGuard::Type(TypeTag::String), IcHandler::StringLength)),
        JsValue::Object(id) => {
            let object = realm.heap.get(*id);
            let guard = IcGuard::Shape(object.shape);
            match &object.class {
                ObjectClass::Array(_) if name == "length" => return Some((guard, IcHandler::ArrayLength)),
                ObjectClass::TypedArray(_) if name == "length" => {
                    return Some((guard, IcHandler::TypedArrayLength))
                }
                _ => {}
            }
            let (holder, slot, _) = find_holder(realm, *id, name)?;
            if holder == *id {
                Some((guard, IcHandler::LoadSlot { slot }))
            } else {
                Some((
                    guard,
                    IcHandler::LoadProtoSlot { holder, holder_shape: realm.shape_of(holder), slot },
                ))
            }
        }
        _ => None,
    }
}

fn store_stub(realm: &mut Realm, handler: &IcHandler, target: &JsValue, name: &str, value: &JsValue) -> StubResult<()> {
    let Some(id) = target.as_object() else {
        return StubResult::Miss;
    };
    if realm.heap.get(id).guarded_by.is_some() {
        return StubResult::Miss;
    }
    match handler {
        IcHandler::StoreSlot { slot } => match realm.heap.get_mut(id).slots.get_mut(*slot as usize) {
            Some(s) => {
                *s = value.clone();
                StubResult::Hit(())
            }
            None => StubResult::Miss,
        },
        IcHandler::AddSlot { new_shape } => {
            if let Some(proto) = get_prototype(realm, id) {
                if obj_ops::has_property(realm, proto, name) {
                    return StubResult::Miss;
                }
            }
            let object = realm.heap.get_mut(id);
            object.shape = *new_shape;
            object.slots.push(value.clone());
            StubResult::Hit(())
        }
        _ => StubResult::Miss,
    }
}

pub fn set_prop(vm: &mut Vm, ic: IcRef, target: &JsValue, name: &Arc<str>, value: JsValue) -> Result<(), JErrorType> {
    let desc = value_descriptor(&vm.realm, target);
    if run_stubs(&mut vm.realm, ic, &desc, |realm, h| store_stub(realm, h, target, name, &value)).is_some() {
        return Ok(());
    }
    let strict = is_strict(vm, ic);
    let before = desc.shape;
    obj_ops::set_value(&mut vm.realm, target, name, value, strict)?;
    if let (Some(id), Some(before)) = (target.as_object(), before) {
        if let Some((guard, handler)) = plan_set_prop(&mut vm.realm, id, name, before) {
            attach(vm, ic, guard, handler);
        }
    }
    Ok(())
}

fn plan_set_prop(realm: &mut Realm, id: ObjectId, name: &Arc<str>, before: ShapeId) -> Option<(IcGuard, IcHandler)> {
    let object = realm.heap.get(id);
    if object.guarded_by.is_some() || is_exotic_key(&object.class, name) {
        return None;
    }
    let after = object.shape;
    let before_shape = realm.shapes.get(before);
    if before_shape.flags.intersects(ShapeFlags::HAS_OBJECT_FUSE | ShapeFlags::NOT_EXTENSIBLE) {
        return None;
    }
    if after == before {
        let (slot, attrs) = before_shape.lookup(name)?;
        if !attrs.contains(PropertyAttributes::WRITABLE) {
            return None;
        }
        return Some((IcGuard::Shape(before), IcHandler::StoreSlot { slot }));
    }
    if before_shape.lookup(name).is_some() {
        return None;
    }
    let added = realm.shapes.add_property(before, name, PropertyAttributes::DEFAULT);
    (added == after).then_some((IcGuard::Shape(before), IcHandler::AddSlot { new_shape: after }))
}

// ── Element access ───────────────────────────────────────────

fn load_elem_stub(realm: &Realm, handler: &IcHandler, target: &JsValue, key: &JsValue) -> StubResult<JsValue> {
    let (Some(id), Some(index)) = (target.as_object(), key.as_int32()) else {
        return StubResult::Miss;
    };
    let object = realm.heap.get(id);
    match (handler, &object.class) {
        (IcHandler::LoadDenseElement, ObjectClass::Array(elements)) if index >= 0 => {
            match elements.get(index as usize) {
                Some(v) => StubResult::Hit(v.clone()),
                None => StubResult::Miss,
            }
        }
        (IcHandler::LoadTypedArrayElement { kind }, ObjectClass::TypedArray(t)) if t.kind == *kind => {
            if index < 0 {
                StubResult::Hit(JsValue::Undefined)
            } else {
                StubResult::Hit(typed_array_read(realm, t, index as usize))
            }
        }
        _ => StubResult::Miss,
    }
}

pub fn get_elem(vm: &mut Vm, ic: IcRef, target: &JsValue, key: &JsValue) -> Result<JsValue, JErrorType> {
    let desc = value_descriptor(&vm.realm, target);
    if let Some(v) = run_stubs(&mut vm.realm, ic, &desc, |realm, h| load_elem_stub(realm, h, target, key)) {
        return Ok(v);
    }
    let name = to_property_key(&vm.realm, key);
    let result = obj_ops::get_value(&vm.realm, target, &name)?;
    if let (Some(id), Some(index)) = (target.as_object(), key.as_int32()) {
        let object = vm.realm.heap.get(id);
        let guard = IcGuard::Shape(object.shape);
        let handler = match &object.class {
            ObjectClass::Array(elements) if index >= 0 && (index as usize) < elements.len() => {
                Some(IcHandler::LoadDenseElement)
            }
            ObjectClass::TypedArray(t) => Some(IcHandler::LoadTypedArrayElement { kind: t.kind }),
            _ => None,
        };
        if let Some(handler) = handler {
            attach(vm, ic, guard, handler);
        }
    }
    Ok(result)
}

fn store_elem_stub(
    realm: &mut Realm,
    handler: &IcHandler,
    target: &JsValue,
    key: &JsValue,
    value: &JsValue,
) -> StubResult<()> {
    let (Some(id), Some(index)) = (target.as_object(), key.as_int32()) else {
        return StubResult::Miss;
    };
    if index < 0 {
        return StubResult::Miss;
    }
    let index = index as usize;
    let typed = match (&realm.heap.get(id).class, handler) {
        (ObjectClass::TypedArray(t), IcHandler::StoreTypedArrayElement { kind }) if t.kind == *kind => Some(t.clone()),
        _ => None,
    };
    if let Some(t) = typed {
        let n = to_number(realm, value);
        typed_array_write(realm, &t, index, n);
        return StubResult::Hit(());
    }
    let object = realm.heap.get_mut(id);
    if object.guarded_by.is_some() {
        return StubResult::Miss;
    }
    let Some(elements) = object.as_array_mut() else {
        return StubResult::Miss;
    };
    match handler {
        IcHandler::StoreDenseElement if index < elements.len() => {
            elements[index] = value.clone();
            StubResult::Hit(())
        }
        IcHandler::AppendDenseElement if index == elements.len() => {
            elements.push(value.clone());
            StubResult::Hit(())
        }
        _ => StubResult::Miss,
    }
}

pub fn set_elem(vm: &mut Vm, ic: IcRef, target: &JsValue, key: &JsValue, value: JsValue) -> Result<(), JErrorType> {
    let desc = value_descriptor(&vm.realm, target);
    if run_stubs(&mut vm.realm, ic, &desc, |realm, h| store_elem_stub(realm, h, target, key, &value)).is_some() {
        return Ok(());
    }
    if target.is_nullish() {
        return Err(JErrorType::TypeError(format!(
            "Cannot set properties of {} (setting '{}')",
            target,
            to_property_key(&vm.realm, key)
        )));
    }
    let plan = match (target.as_object(), key.as_int32()) {
        (Some(id), Some(index)) if index >= 0 => {
            let object = vm.realm.heap.get(id);
            let extensible = !vm
                .realm
                .shapes
                .get(object.shape)
                .flags
                .contains(ShapeFlags::NOT_EXTENSIBLE);
            let guard = IcGuard::Shape(object.shape);
            match &object.class {
                ObjectClass::Array(elements) if extensible && object.guarded_by.is_none() => {
                    let index = index as usize;
                    if index < elements.len() {
                        Some((guard, IcHandler::StoreDenseElement))
                    } else if index == elements.len() {
                        Some((guard, IcHandler::AppendDenseElement))
                    } else {
                        None
                    }
                }
                ObjectClass::TypedArray(t) => Some((guard, IcHandler::StoreTypedArrayElement { kind: t.kind })),
                _ => None,
            }
        }
        _ => None,
    };
    let strict = is_strict(vm, ic);
    let name = to_property_key(&vm.realm, key);
    obj_ops::set_value(&mut vm.realm, target, &name, value, strict)?;
    if let Some((guard, handler)) = plan {
        attach(vm, ic, guard, handler);
    }
    Ok(())
}

pub fn delete_prop(vm: &mut Vm, target: &JsValue, name: &Arc<str>, strict: bool) -> Result<JsValue, JErrorType> {
    match target {
        JsValue::Undefined | JsValue::Null => Err(JErrorType::TypeError(format!(
            "Cannot convert {} to object",
            target
        ))),
        JsValue::Object(id) => Ok(JsValue::Boolean(obj_ops::delete_property(&mut vm.realm, *id, name, strict)?)),
        _ => Ok(JsValue::Boolean(true)),
    }
}

// ── Global names ─────────────────────────────────────────────

fn load_name_stub(realm: &Realm, handler: &IcHandler) -> StubResult<JsValue> {
    match handler {
        IcHandler::LoadGlobalLexical { index } => match realm.lexicals.get(*index as usize) {
            Some(binding) => match &binding.value {
                Some(v) => StubResult::Hit(v.clone()),
                None => StubResult::Miss,
            },
            None => StubResult::Stale,
        },
        IcHandler::LoadGlobalSlot { slot } => match realm.heap.get(realm.global).slots.get(*slot as usize) {
            Some(v) => StubResult::Hit(v.clone()),
            None => StubResult::Stale,
        },
        IcHandler::LoadGlobalConstant { value, .. } => StubResult::Hit(value.clone()),
        _ => StubResult::Miss,
    }
}

/// Generic global name lookup: lexicals first, then the global object and
/// its prototype chain.
pub fn lookup_name(realm: &Realm, name: &str) -> Result<JsValue, JErrorType> {
    if let Some(index) = realm.lexicals.index_of(name) {
        return match realm.lexicals.get(index).and_then(|b| b.value.clone()) {
            Some(v) => Ok(v),
            None => Err(JErrorType::ReferenceError(format!(
                "Cannot access '{}' before initialization",
                name
            ))),
        };
    }
    if obj_ops::has_property(realm, realm.global, name) {
        return Ok(obj_ops::get(realm, realm.global, name));
    }
    Err(JErrorType::ReferenceError(format!("{} is not defined", name)))
}

pub fn get_name(vm: &mut Vm, ic: IcRef, name: &Arc<str>) -> Result<JsValue, JErrorType> {
    let desc = IcDescriptor { global: Some(global_state(&vm.realm)), ..IcDescriptor::default() };
    if let Some(v) = run_stubs(&mut vm.realm, ic, &desc, |realm, h| load_name_stub(realm, h)) {
        return Ok(v);
    }
    let result = lookup_name(&vm.realm, name)?;
    if let Some((guard, handler)) = plan_get_name(&vm.realm, name) {
        attach(vm, ic, guard, handler);
    }
    Ok(result)
}

fn plan_get_name(realm: &Realm, name: &str) -> Option<(IcGuard, IcHandler)> {
    let state = global_state(realm);
    let guard = IcGuard::Global { shape: state.shape, lexical_epoch: state.lexical_epoch };
    if let Some(index) = realm.lexicals.index_of(name) {
        return Some((guard, IcHandler::LoadGlobalLexical { index: index as u32 }));
    }
    let global = realm.heap.get(realm.global);
    let (slot, _) = realm.shapes.get(global.shape).lookup(name)?;
    let constant = global
        .fuse
        .as_ref()
        .map(|f| f.state(name) == PropertyFuseState::Constant)
        .unwrap_or(false);
    if constant {
        let value = global.slots[slot as usize].clone();
        Some((
            IcGuard::GlobalConstant {
                shape: state.shape,
                lexical_epoch: state.lexical_epoch,
                generation: state.generation,
            },
            IcHandler::LoadGlobalConstant { slot, value },
        ))
    } else {
        Some((guard, IcHandler::LoadGlobalSlot { slot }))
    }
}

pub fn type_of_name(vm: &mut Vm, name: &str) -> Result<JsValue, JErrorType> {
    match lookup_name(&vm.realm, name) {
        Ok(v) => Ok(type_of(&vm.realm, &v)),
        Err(JErrorType::ReferenceError(_)) if vm.realm.lexicals.index_of(name).is_none() => {
            Ok(JsValue::string("undefined"))
        }
        Err(e) => Err(e),
    }
}

fn store_name_stub(realm: &mut Realm, handler: &IcHandler, name: &Arc<str>, value: &JsValue) -> StubResult<()> {
    let IcHandler::StoreGlobalSlot { slot } = handler else {
        return StubResult::Miss;
    };
    let global = realm.global;
    match realm.heap.get_mut(global).slots.get_mut(*slot as usize) {
        Some(s) => *s = value.clone(),
        None => return StubResult::Stale,
    }
    let popped = match realm.heap.get_mut(global).fuse.as_mut() {
        Some(fuse) => fuse.on_property_write(name),
        None => Vec::new(),
    };
    realm.invalidate(popped);
    StubResult::Hit(())
}

pub fn assign_name(realm: &mut Realm, name: &Arc<str>, value: JsValue, strict: bool) -> Result<(), JErrorType> {
    if let Some(index) = realm.lexicals.index_of(name) {
        let Some(binding) = realm.lexicals.get_mut(index) else {
            return Err(JErrorType::ReferenceError(format!("{} is not defined", name)));
        };
        if binding.value.is_none() {
            return Err(JErrorType::ReferenceError(format!(
                "Cannot access '{}' before initialization",
                name
            )));
        }
        if binding.constant {
            return Err(JErrorType::TypeError("Assignment to constant variable.".to_string()));
        }
        binding.value = Some(value);
        return Ok(());
    }
    let global = realm.global;
    if strict && !obj_ops::has_property(realm, global, name) {
        return Err(JErrorType::ReferenceError(format!("{} is not defined", name)));
    }
    obj_ops::set(realm, global, name, value, strict)
}

pub fn set_name(vm: &mut Vm, ic: IcRef, name: &Arc<str>, value: JsValue) -> Result<(), JErrorType> {
    let desc = IcDescriptor { global: Some(global_state(&vm.realm)), ..IcDescriptor::default() };
    if run_stubs(&mut vm.realm, ic, &desc, |realm, h| store_name_stub(realm, h, name, &value)).is_some() {
        return Ok(());
    }
    let strict = is_strict(vm, ic);
    assign_name(&mut vm.realm, name, value, strict)?;
    if vm.realm.lexicals.index_of(name).is_none() {
        let state = global_state(&vm.realm);
        let global = vm.realm.heap.get(vm.realm.global);
        if let Some((slot, attrs)) = vm.realm.shapes.get(global.shape).lookup(name) {
            if attrs.contains(PropertyAttributes::WRITABLE) {
                attach(
                    vm,
                    ic,
                    IcGuard::Global { shape: state.shape, lexical_epoch: state.lexical_epoch },
                    IcHandler::StoreGlobalSlot { slot },
                );
            }
        }
    }
    Ok(())
}

pub fn delete_name(vm: &mut Vm, name: &Arc<str>) -> Result<JsValue, JErrorType> {
    if vm.realm.lexicals.index_of(name).is_some() {
        return Ok(JsValue::Boolean(false));
    }
    let global = vm.realm.global;
    Ok(JsValue::Boolean(obj_ops::delete_property(&mut vm.realm, global, name, false)?))
}

/// Ends the temporal dead zone of a global lexical binding.
pub fn init_lexical(realm: &mut Realm, name: &str, value: JsValue) {
    if let Some(binding) = realm.lexicals.index_of(name).and_then(|i| realm.lexicals.get_mut(i)) {
        binding.value = Some(value);
    }
}

// ── Arithmetic and comparison ────────────────────────────────

pub fn binary(vm: &mut Vm, ic: IcRef, op: OpCode, a: &JsValue, b: &JsValue) -> JsValue {
    let desc = IcDescriptor::for_pair(a, b);
    let hit = run_stubs(&mut vm.realm, ic, &desc, |_, handler| match (handler, a, b) {
        (IcHandler::Int32Arith, _, _) => match (a.as_int32(), b.as_int32()) {
            (Some(x), Some(y)) => StubResult::Hit(int32_binary(op, x, y)),
            _ => StubResult::Miss,
        },
        (IcHandler::DoubleArith, _, _) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => StubResult::Hit(JsValue::from_f64(number_binary(op, x, y))),
            _ => StubResult::Miss,
        },
        (IcHandler::StringConcat, JsValue::String(x), JsValue::String(y)) if op == OpCode::Add => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            StubResult::Hit(JsValue::String(Arc::from(s)))
        }
        _ => StubResult::Miss,
    });
    if let Some(v) = hit {
        return v;
    }
    let result = binary_generic(&vm.realm, op, a, b);
    let (ta, tb) = (a.type_tag(), b.type_tag());
    let handler = match (ta, tb) {
        (TypeTag::Int32, TypeTag::Int32) => Some(IcHandler::Int32Arith),
        _ if ta.is_number() && tb.is_number() => Some(IcHandler::DoubleArith),
        (TypeTag::String, TypeTag::String) if op == OpCode::Add => Some(IcHandler::StringConcat),
        _ => None,
    };
    if let Some(handler) = handler {
        attach(vm, ic, IcGuard::Types(ta, tb), handler);
    }
    result
}

pub fn unary(vm: &mut Vm, ic: IcRef, op: OpCode, a: &JsValue) -> JsValue {
    let desc = IcDescriptor::for_value(a, None);
    let hit = run_stubs(&mut vm.realm, ic, &desc, |_, handler| match handler {
        IcHandler::Int32Unary | IcHandler::DoubleUnary => match a.as_number() {
            Some(x) => StubResult::Hit(JsValue::from_f64(number_unary(op, x))),
            None => StubResult::Miss,
        },
        _ => StubResult::Miss,
    });
    if let Some(v) = hit {
        return v;
    }
    let result = unary_generic(&vm.realm, op, a);
    let tag = a.type_tag();
    let handler = match tag {
        TypeTag::Int32 => Some(IcHandler::Int32Unary),
        TypeTag::Double => Some(IcHandler::DoubleUnary),
        _ => None,
    };
    if let Some(handler) = handler {
        attach(vm, ic, IcGuard::Type(tag), handler);
    }
    result
}

pub fn compare(vm: &mut Vm, ic: IcRef, op: OpCode, a: &JsValue, b: &JsValue) -> JsValue {
    let desc = IcDescriptor::for_pair(a, b);
    let hit = run_stubs(&mut vm.realm, ic, &desc, |_, handler| match handler {
        IcHandler::Int32Compare | IcHandler::DoubleCompare => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => StubResult::Hit(compare_numbers(op, x, y)),
            _ => StubResult::Miss,
        },
        IcHandler::StringCompare => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => StubResult::Hit(compare_strings(op, x, y)),
            _ => StubResult::Miss,
        },
        _ => StubResult::Miss,
    });
    if let Some(v) = hit {
        return JsValue::Boolean(v);
    }
    let result = compare_generic(&vm.realm, op, a, b);
    let (ta, tb) = (a.type_tag(), b.type_tag());
    let handler = match (ta, tb) {
        (TypeTag::Int32, TypeTag::Int32) => Some(IcHandler::Int32Compare),
        _ if ta.is_number() && tb.is_number() => Some(IcHandler::DoubleCompare),
        (TypeTag::String, TypeTag::String) => Some(IcHandler::StringCompare),
        _ => None,
    };
    if let Some(handler) = handler {
        attach(vm, ic, IcGuard::Types(ta, tb), handler);
    }
    JsValue::Boolean(result)
}

// ── Math ─────────────────────────────────────────────────────

/// The numeric `Math` functions the optimizer knows by identity. Shared with
/// the builtins so every tier computes the same bits.
pub fn math_intrinsic(intrinsic: Intrinsic, args: &[f64]) -> f64 {
    let x = args.first().copied().unwrap_or(f64::NAN);
    match intrinsic {
        Intrinsic::MathAbs => x.abs(),
        Intrinsic::MathFloor => x.floor(),
        Intrinsic::MathCeil => x.ceil(),
        Intrinsic::MathTrunc => x.trunc(),
        Intrinsic::MathSqrt => x.sqrt(),
        Intrinsic::MathFround => x as f32 as f64,
        Intrinsic::MathF16Round => f16::from_f64(x).to_f64(),
        Intrinsic::MathMin => args.iter().fold(f64::INFINITY, |acc, &n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else if n < acc || (n == 0.0 && acc == 0.0 && n.is_sign_negative()) {
                n
            } else {
                acc
            }
        }),
        Intrinsic::MathMax => args.iter().fold(f64::NEG_INFINITY, |acc, &n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else if n > acc || (n == 0.0 && acc == 0.0 && acc.is_sign_negative()) {
                n
            } else {
                acc
            }
        }),
        _ => f64::NAN,
    }
}

/// Single-precision form of a unary `Math` function whose input is already
/// a float32 value.
pub fn math_float32(intrinsic: Intrinsic, x: f64) -> f64 {
    let x = x as f32;
    let r = match intrinsic {
        Intrinsic::MathAbs => x.abs(),
        Intrinsic::MathFloor => x.floor(),
        Intrinsic::MathCeil => x.ceil(),
        Intrinsic::MathTrunc => x.trunc(),
        Intrinsic::MathSqrt => x.sqrt(),
        _ => return math_intrinsic(intrinsic, &[x as f64]) as f32 as f64,
    };
    r as f64
}

/// `lhs op rhs` in single precision; inputs are float32 values.
pub fn float32_binary(op: OpCode, x: f64, y: f64) -> f64 {
    let (x, y) = (x as f32, y as f32);
    let r = match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        _ => return number_binary(op, x as f64, y as f64) as f32 as f64,
    };
    r as f64
}

// ── Calls ────────────────────────────────────────────────────

/// Records call-target feedback. Calls themselves are performed by the VM.
pub fn note_call(vm: &mut Vm, ic: IcRef, callee: &JsValue) {
    let Some(id) = callee.as_object() else {
        return;
    };
    let desc = IcDescriptor { callee: Some(id), ..IcDescriptor::default() };
    if run_stubs(&mut vm.realm, ic, &desc, |_, _| StubResult::Hit(())).is_some() {
        return;
    }
    let handler = match &vm.realm.heap.get(id).class {
        ObjectClass::Function(f) => IcHandler::CallScriptedFunction { template: f.template.clone() },
        ObjectClass::NativeFunction(n) => IcHandler::CallNativeFunction { name: n.name, intrinsic: n.intrinsic },
        _ => return,
    };
    attach(vm, ic, IcGuard::Callee(id), handler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_arithmetic_is_exact() {
        assert_eq!(int32_binary(OpCode::Add, i32::MAX, 1), JsValue::from_f64(2147483648.0));
        let negative_zero = int32_binary(OpCode::Mul, 0, -5);
        assert!(matches!(negative_zero, JsValue::Number(JsNumberType::Float(f)) if f == 0.0 && f.is_sign_negative()));
        assert_eq!(int32_binary(OpCode::Div, 7, 2), JsValue::from_f64(3.5));
        assert_eq!(int32_binary(OpCode::Mod, -7, 2), JsValue::from_i32(-1));
    }

    #[test]
    fn checked_int32_refuses_overflow() {
        assert_eq!(int32_binary_checked(OpCode::Add, i32::MAX, 1), None);
        assert_eq!(int32_binary_checked(OpCode::Mul, 0, -1), None);
        assert_eq!(int32_binary_checked(OpCode::UShr, -1, 0), None);
        assert_eq!(int32_binary_checked(OpCode::Shl, 1, 33), Some(2));
        assert_eq!(int32_binary_checked(OpCode::Div, 6, 3), Some(2));
        assert_eq!(int32_binary_checked(OpCode::Div, 1, 3), None);
    }

    #[test]
    fn min_and_max_order_signed_zeros() {
        let min = math_intrinsic(Intrinsic::MathMin, &[0.0, -0.0]);
        assert!(min == 0.0 && min.is_sign_negative());
        let max = math_intrinsic(Intrinsic::MathMax, &[-0.0, 0.0]);
        assert!(max == 0.0 && max.is_sign_positive());
        assert!(math_intrinsic(Intrinsic::MathMax, &[1.0, f64::NAN]).is_nan());
        assert_eq!(math_intrinsic(Intrinsic::MathMin, &[]), f64::INFINITY);
    }

    #[test]
    fn single_precision_matches_rounded_double() {
        let (a, b) = (1.1f32 as f64, 2.7f32 as f64);
        for op in [OpCode::Add, OpCode::Sub, OpCode::Mul, OpCode::Div] {
            assert_eq!(float32_binary(op, a, b), number_binary(op, a, b) as f32 as f64);
        }
        assert_eq!(math_float32(Intrinsic::MathSqrt, b), (b.sqrt() as f32) as f64);
    }

    #[test]
    fn exponent_edge_cases() {
        assert!(js_pow(1.0, f64::INFINITY).is_nan());
        assert!(js_pow(2.0, f64::NAN).is_nan());
        assert_eq!(js_pow(2.0, 10.0), 1024.0);
    }

    #[test]
    fn string_comparison_uses_code_units() {
        assert!(compare_strings(OpCode::Lt, "a", "b"));
        assert!(compare_strings(OpCode::Ge, "b", "b"));
        assert!(!compare_strings(OpCode::Ne, "x", "x"));
    }

    #[test]
    fn addition_concatenates_strings() {
        let realm = Realm::new();
        let v = binary_generic(&realm, OpCode::Add, &JsValue::string("a"), &JsValue::from_i32(1));
        assert_eq!(v, JsValue::string("a1"));
        let v = binary_generic(&realm, OpCode::Sub, &JsValue::string("5"), &JsValue::from_i32(1));
        assert_eq!(v, JsValue::from_i32(4));
    }
}
