//! Runs MIR.
//!
//! The executor walks the op list of the top frame's `OptFrame`. Guards
//! and fast paths that do not hold bail out to the resume point they name;
//! everything the optimizer did not specialize goes through the same
//! handlers and runtime operations as the interpreter.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{Intrinsic, ObjectClass, ObjectId, TypedArrayData};
use crate::runner::ds::operations::object::{
    self as obj_ops, canonical_numeric_index, typed_array_length, typed_array_property, typed_array_read,
    typed_array_write,
};
use crate::runner::ds::operations::type_conversion::{to_boolean, to_number, to_property_key};
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::Instruction;
use crate::runner::jit::frame::{OptFrame, OptSlot, PendingCall};
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::ic::IcHandler;
use crate::runner::jit::interpreter::{handler, Step};
use crate::runner::jit::opt::bailout::{self, materialize, BailoutKind};
use crate::runner::jit::opt::mir::{BranchKind, MirOp, Operand, Reg};
use crate::runner::jit::opt::OptimizedCode;
use crate::runner::jit::runtime::{
    compare_numbers, compare_strings, float32_binary, int32_binary_checked, load_prop_stub, math_float32,
    math_intrinsic, number_binary, number_unary, utf16_len,
};
use crate::runner::jit::vm::{Invoked, Vm};
use crate::runner::std_lib::typed_array::{fill_view, set_view, subarray_view};

enum Flow {
    Next,
    Jump(usize),
    Bail(u32, BailoutKind),
    Done(Step),
}

fn opt(vm: &Vm) -> &OptFrame {
    match vm.frame().opt.as_deref() {
        Some(opt) => opt,
        None => unreachable!("MIR executed on a frame without optimized code"),
    }
}

fn opt_mut(vm: &mut Vm) -> &mut OptFrame {
    match vm.frame_mut().opt.as_deref_mut() {
        Some(opt) => opt,
        None => unreachable!("MIR executed on a frame without optimized code"),
    }
}

/// Runs the top frame's optimized code until it calls, returns, throws or
/// bails out.
pub fn run(vm: &mut Vm) -> Result<Step, JErrorType> {
    let code = opt(vm).code.clone();
    loop {
        let index = {
            let frame = opt_mut(vm);
            let index = frame.pc;
            frame.pc += 1;
            index
        };
        let Some(op) = code.graph.ops.get(index) else {
            return Ok(Step::Return(JsValue::Undefined));
        };
        match execute(vm, &code, op)? {
            Flow::Next => {}
            Flow::Jump(target) => opt_mut(vm).pc = target,
            Flow::Bail(rp, kind) => return bailout::bail(vm, rp, kind),
            Flow::Done(step) => return Ok(step),
        }
    }
}

// ── Registers ────────────────────────────────────────────────

fn slot(vm: &Vm, operand: &Operand) -> OptSlot {
    match operand {
        Operand::Reg(r) => opt(vm).registers.get(*r as usize).cloned().unwrap_or_default(),
        Operand::Const(v) => OptSlot::Value(v.clone()),
        Operand::Recover(_) => OptSlot::default(),
    }
}

fn object_of(vm: &mut Vm, vid: u32, data: TypedArrayData) -> ObjectId {
    let Vm { realm, frames, .. } = vm;
    match frames.last_mut().and_then(|f| f.opt.as_deref_mut()) {
        Some(opt) => materialize(realm, &mut opt.materialized, vid, data),
        None => unreachable!("MIR executed on a frame without optimized code"),
    }
}

/// Reads an operand as a plain value, giving a view a heap object if it
/// has none yet.
fn read(vm: &mut Vm, operand: &Operand) -> JsValue {
    match slot(vm, operand) {
        OptSlot::Value(v) => v,
        OptSlot::Virtual { vid, data } => JsValue::Object(object_of(vm, vid, data)),
    }
}

fn read_all(vm: &mut Vm, operands: &[Operand]) -> Vec<JsValue> {
    operands.iter().map(|o| read(vm, o)).collect()
}

fn number(vm: &mut Vm, operand: &Operand) -> f64 {
    let value = read(vm, operand);
    value.as_number().unwrap_or_else(|| to_number(&vm.realm, &value))
}

fn write(vm: &mut Vm, dst: Reg, value: JsValue) {
    write_slot(vm, dst, OptSlot::Value(value));
}

fn write_slot(vm: &mut Vm, dst: Reg, slot: OptSlot) {
    let registers = &mut opt_mut(vm).registers;
    let index = dst as usize;
    if index >= registers.len() {
        registers.resize(index + 1, OptSlot::default());
    }
    registers[index] = slot;
}

fn is_intrinsic(vm: &Vm, callee: &JsValue, intrinsic: Intrinsic) -> bool {
    match callee.as_object().map(|id| &vm.realm.heap.get(id).class) {
        Some(ObjectClass::NativeFunction(f)) => f.intrinsic == Some(intrinsic),
        _ => false,
    }
}

/// The index of a typed array access, if `key` is an integer index.
fn element_index(key: &JsValue) -> Option<usize> {
    let n = key.as_number()?;
    (n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as usize)
}

fn strict(code: &OptimizedCode) -> bool {
    code.graph.scripts.first().map(|(_, s)| s.strict).unwrap_or(false)
}

// ── Execution ────────────────────────────────────────────────

fn call(vm: &mut Vm, dst: Reg, callee: JsValue, this: JsValue, args: Vec<JsValue>, construct: bool) -> Result<Flow, JErrorType> {
    // Parked on this frame before the call: once a callee frame is pushed
    // it is the top frame, and the result lands in `dst` when it returns.
    opt_mut(vm).pending = Some(PendingCall { dst });
    let invoked = vm.invoke(callee, this, args, construct);
    if !matches!(invoked, Ok(Invoked::Pushed)) {
        opt_mut(vm).pending = None;
    }
    match invoked? {
        Invoked::Value(v) => {
            write(vm, dst, v);
            Ok(Flow::Next)
        }
        Invoked::Pushed => Ok(Flow::Done(Step::Yield)),
    }
}

/// Runs one bytecode instruction against the shared handlers. The frame
/// briefly takes on the identity of the script the instruction came from
/// so that constants, names and IC slots resolve against it.
fn generic(
    vm: &mut Vm,
    code: &OptimizedCode,
    dst: Option<Reg>,
    instr: Instruction,
    script: u32,
    inputs: &[Operand],
) -> Result<Flow, JErrorType> {
    let values = read_all(vm, inputs);
    let (script_id, script) = code.graph.scripts[script as usize].clone();
    let frame = vm.frame_mut();
    let saved_id = std::mem::replace(&mut frame.script_id, script_id);
    let saved_script = std::mem::replace(&mut frame.script, script);
    let base = frame.stack.len();
    frame.stack.extend(values);

    let result = handler(instr.op)(vm, instr);

    let frame = vm.frame_mut();
    let pushed = if frame.stack.len() > base { frame.stack.pop() } else { None };
    frame.stack.truncate(base);
    frame.script_id = saved_id;
    frame.script = saved_script;
    result?;
    if let Some(dst) = dst {
        write(vm, dst, pushed.unwrap_or(JsValue::Undefined));
    }
    Ok(Flow::Next)
}

fn execute(vm: &mut Vm, code: &Arc<OptimizedCode>, op: &MirOp) -> Result<Flow, JErrorType> {
    let bail = |rp: &u32| Ok(Flow::Bail(*rp, BailoutKind::Guard));
    match op {
        MirOp::Move { dst, src } => {
            let value = slot(vm, src);
            write_slot(vm, *dst, value);
        }
        MirOp::CoerceThis { dst, src } => {
            let value = read(vm, src);
            let value = if value.is_nullish() { JsValue::Object(vm.realm.global) } else { value };
            write(vm, *dst, value);
        }

        // ── Guards ───────────────────────────────────────────
        MirOp::GuardShape { value, shape, rp } => {
            let holds = matches!(slot(vm, value), OptSlot::Value(JsValue::Object(id)) if vm.realm.shape_of(id) == *shape);
            if !holds {
                return bail(rp);
            }
        }
        MirOp::GuardType { value, tag, rp } => {
            if !matches!(slot(vm, value), OptSlot::Value(v) if v.type_tag() == *tag) {
                return bail(rp);
            }
        }
        MirOp::GuardNumber { value, rp } => {
            if !matches!(slot(vm, value), OptSlot::Value(v) if v.as_number().is_some()) {
                return bail(rp);
            }
        }
        MirOp::GuardCallee { value, expected, rp } => {
            if !matches!(slot(vm, value), OptSlot::Value(JsValue::Object(id)) if id == *expected) {
                return bail(rp);
            }
        }
        MirOp::GuardGlobal { shape, lexical_epoch, rp } => {
            if vm.realm.shape_of(vm.realm.global) != *shape || vm.realm.lexical_epoch != *lexical_epoch {
                return bail(rp);
            }
        }

        // ── Properties and elements ──────────────────────────
        MirOp::LoadSlot { dst, object, slot: index } => {
            let value = read(vm, object)
                .as_object()
                .and_then(|id| vm.realm.heap.get(id).slots.get(*index as usize).cloned())
                .unwrap_or(JsValue::Undefined);
            write(vm, *dst, value);
        }
        MirOp::LoadProtoSlot { dst, object, holder, holder_shape, slot: index, name, rp } => {
            let receiver = read(vm, object);
            let handler = IcHandler::LoadProtoSlot { holder: *holder, holder_shape: *holder_shape, slot: *index };
            match load_prop_stub(&vm.realm, &handler, &receiver, name) {
                Some(v) => write(vm, *dst, v),
                None => return bail(rp),
            }
        }
        MirOp::StoreSlot { object, slot: index, value, rp } => {
            let target = read(vm, object);
            let value = read(vm, value);
            let Some(id) = target.as_object() else {
                return bail(rp);
            };
            let object = vm.realm.heap.get_mut(id);
            if object.fuse.is_some() || object.guarded_by.is_some() {
                return bail(rp);
            }
            match object.slots.get_mut(*index as usize) {
                Some(s) => *s = value,
                None => return bail(rp),
            }
        }
        MirOp::AddSlot { object, new_shape, name, value, rp } => {
            let target = read(vm, object);
            let value = read(vm, value);
            let Some(id) = target.as_object() else {
                return bail(rp);
            };
            let shadows = obj_ops::get_prototype(&vm.realm, id)
                .map(|proto| obj_ops::has_property(&vm.realm, proto, name))
                .unwrap_or(false);
            let object = vm.realm.heap.get_mut(id);
            if shadows || object.fuse.is_some() || object.guarded_by.is_some() {
                return bail(rp);
            }
            object.shape = *new_shape;
            object.slots.push(value);
        }
        MirOp::ArrayLength { dst, object, rp } => {
            let len = read(vm, object)
                .as_object()
                .and_then(|id| vm.realm.heap.get(id).as_array().map(|e| e.len()));
            match len {
                Some(len) => write(vm, *dst, JsValue::from_f64(len as f64)),
                None => return bail(rp),
            }
        }
        MirOp::TypedArrayLength { dst, object, rp } => {
            let len = match slot(vm, object) {
                OptSlot::Virtual { data, .. } => Some(typed_array_length(&vm.realm, &data)),
                OptSlot::Value(v) => v
                    .as_object()
                    .and_then(|id| vm.realm.heap.get(id).as_typed_array().map(|t| typed_array_length(&vm.realm, t))),
            };
            match len {
                Some(len) => write(vm, *dst, JsValue::from_f64(len as f64)),
                None => return bail(rp),
            }
        }
        MirOp::StringLength { dst, value } => {
            let len = read(vm, value).as_str().map(utf16_len).unwrap_or(0);
            write(vm, *dst, JsValue::from_f64(len as f64));
        }
        MirOp::LoadDense { dst, object, index, rp } => {
            let target = read(vm, object);
            let index = read(vm, index);
            let element = match (target.as_object(), index.as_int32()) {
                (Some(id), Some(i)) if i >= 0 => {
                    vm.realm.heap.get(id).as_array().and_then(|e| e.get(i as usize).cloned())
                }
                _ => None,
            };
            match element {
                Some(v) => write(vm, *dst, v),
                None => return bail(rp),
            }
        }
        MirOp::StoreDense { object, index, value, append, rp } => {
            let target = read(vm, object);
            let index = read(vm, index);
            let value = read(vm, value);
            let (Some(id), Some(i)) = (target.as_object(), index.as_int32()) else {
                return bail(rp);
            };
            let object = vm.realm.heap.get_mut(id);
            if i < 0 || object.fuse.is_some() || object.guarded_by.is_some() {
                return bail(rp);
            }
            let Some(elements) = object.as_array_mut() else {
                return bail(rp);
            };
            let i = i as usize;
            if i < elements.len() {
                elements[i] = value;
            } else if *append && i == elements.len() {
                elements.push(value);
            } else {
                return bail(rp);
            }
        }
        MirOp::LoadTyped { dst, object, index, kind, rp } => {
            let target = read(vm, object);
            let index = read(vm, index);
            let view = target
                .as_object()
                .and_then(|id| vm.realm.heap.get(id).as_typed_array().cloned())
                .filter(|t| t.kind == *kind);
            let (Some(view), Some(i)) = (view, index.as_int32()) else {
                return bail(rp);
            };
            if i < 0 || i as usize >= typed_array_length(&vm.realm, &view) {
                return bail(rp);
            }
            let value = typed_array_read(&vm.realm, &view, i as usize);
            write(vm, *dst, value);
        }
        MirOp::StoreTyped { object, index, value, kind, rp } => {
            let target = read(vm, object);
            let index = read(vm, index);
            let view = target
                .as_object()
                .and_then(|id| vm.realm.heap.get(id).as_typed_array().cloned())
                .filter(|t| t.kind == *kind);
            let (Some(view), Some(i)) = (view, index.as_int32()) else {
                return bail(rp);
            };
            let n = number(vm, value);
            if i >= 0 {
                typed_array_write(&mut vm.realm, &view, i as usize, n);
            }
        }
        MirOp::LoadGlobalSlot { dst, slot: index } => {
            let global = vm.realm.global;
            let value = vm.realm.heap.get(global).slots.get(*index as usize).cloned().unwrap_or_default();
            write(vm, *dst, value);
        }
        MirOp::LoadLexical { dst, index, rp } => {
            let value = vm.realm.lexicals.get(*index as usize).and_then(|b| b.value.clone());
            match value {
                Some(v) => write(vm, *dst, v),
                None => return bail(rp),
            }
        }

        // ── Arithmetic ───────────────────────────────────────
        MirOp::Int32Binary { dst, op, lhs, rhs, rp } => {
            let (a, b) = (read(vm, lhs), read(vm, rhs));
            match (a.as_int32(), b.as_int32()) {
                (Some(x), Some(y)) => match int32_binary_checked(*op, x, y) {
                    Some(r) => write(vm, *dst, JsValue::from_i32(r)),
                    None => return bail(rp),
                },
                _ => return bail(rp),
            }
        }
        MirOp::DoubleBinary { dst, op, lhs, rhs } => {
            let (x, y) = (number(vm, lhs), number(vm, rhs));
            write(vm, *dst, JsValue::from_f64(number_binary(*op, x, y)));
        }
        MirOp::Float32Binary { dst, op, lhs, rhs } => {
            let (x, y) = (number(vm, lhs), number(vm, rhs));
            write(vm, *dst, JsValue::from_f64(float32_binary(*op, x, y)));
        }
        MirOp::NumberUnary { dst, op, src } => {
            let x = number(vm, src);
            write(vm, *dst, JsValue::from_f64(number_unary(*op, x)));
        }
        MirOp::CompareNumbers { dst, op, lhs, rhs } => {
            let (x, y) = (number(vm, lhs), number(vm, rhs));
            write(vm, *dst, JsValue::Boolean(compare_numbers(*op, x, y)));
        }
        MirOp::CompareStrings { dst, op, lhs, rhs } => {
            let (a, b) = (read(vm, lhs), read(vm, rhs));
            let result = compare_strings(*op, a.as_str().unwrap_or(""), b.as_str().unwrap_or(""));
            write(vm, *dst, JsValue::Boolean(result));
        }
        MirOp::Not { dst, src } => {
            let value = read(vm, src);
            write(vm, *dst, JsValue::Boolean(!to_boolean(&value)));
        }
        MirOp::MathIntrinsic { dst, intrinsic, args, float32 } => {
            let args: Vec<f64> = args.iter().map(|a| number(vm, a)).collect();
            let result = if *float32 {
                math_float32(*intrinsic, args.first().copied().unwrap_or(f64::NAN))
            } else {
                math_intrinsic(*intrinsic, &args)
            };
            write(vm, *dst, JsValue::from_f64(result));
        }

        // ── Views ────────────────────────────────────────────
        MirOp::VirtualSubarray { dst, callee, base, args, rp } => {
            let callee = read(vm, callee);
            if !is_intrinsic(vm, &callee, Intrinsic::TypedArraySubarray)
                || !vm.realm.fuses.intact(RealmFuseId::OptimizeTypedArraySpeciesFuse)
            {
                return bail(rp);
            }
            let data = match slot(vm, base) {
                OptSlot::Virtual { data, .. } => Some(data),
                OptSlot::Value(v) => v.as_object().and_then(|id| vm.realm.heap.get(id).as_typed_array().cloned()),
            };
            let Some(data) = data else {
                return bail(rp);
            };
            let args = read_all(vm, args);
            let view = subarray_view(&vm.realm, &data, &args)?;
            let frame = opt_mut(vm);
            let vid = frame.next_vid;
            frame.next_vid += 1;
            write_slot(vm, *dst, OptSlot::Virtual { vid, data: view });
        }
        MirOp::VirtualProp { dst, object, name } => {
            let value = match slot(vm, object) {
                OptSlot::Virtual { data, .. } => match typed_array_property(&vm.realm, &data, name) {
                    Some(v) => v,
                    None => {
                        let proto = vm.realm.intrinsics.typed_array_prototype_for(data.kind);
                        obj_ops::get(&vm.realm, proto, name)
                    }
                },
                OptSlot::Value(v) => obj_ops::get_value(&vm.realm, &v, name)?,
            };
            write(vm, *dst, value);
        }
        MirOp::VirtualGetElem { dst, object, index } => {
            let key = read(vm, index);
            let value = match slot(vm, object) {
                OptSlot::Virtual { data, .. } => match element_index(&key) {
                    Some(i) => typed_array_read(&vm.realm, &data, i),
                    None => {
                        let key = to_property_key(&vm.realm, &key);
                        match canonical_numeric_index(&key) {
                            Some(Some(i)) => typed_array_read(&vm.realm, &data, i),
                            Some(None) => JsValue::Undefined,
                            None => match typed_array_property(&vm.realm, &data, &key) {
                                Some(v) => v,
                                None => {
                                    let proto = vm.realm.intrinsics.typed_array_prototype_for(data.kind);
                                    obj_ops::get(&vm.realm, proto, &key)
                                }
                            },
                        }
                    }
                },
                OptSlot::Value(v) => {
                    let key = to_property_key(&vm.realm, &key);
                    obj_ops::get_value(&vm.realm, &v, &key)?
                }
            };
            write(vm, *dst, value);
        }
        MirOp::VirtualSetElem { object, index, value } => {
            let key = read(vm, index);
            let value = read(vm, value);
            match slot(vm, object) {
                OptSlot::Virtual { data, .. } => {
                    let index = element_index(&key).or_else(|| {
                        canonical_numeric_index(&to_property_key(&vm.realm, &key)).flatten()
                    });
                    if let Some(i) = index {
                        let n = to_number(&vm.realm, &value);
                        typed_array_write(&mut vm.realm, &data, i, n);
                    }
                }
                OptSlot::Value(target) => {
                    let key = to_property_key(&vm.realm, &key);
                    obj_ops::set_value(&mut vm.realm, &target, &key, value, strict(code))?;
                }
            }
        }
        MirOp::VirtualFill { dst, callee, object, args, rp } => {
            let callee = read(vm, callee);
            if !is_intrinsic(vm, &callee, Intrinsic::TypedArrayFill) {
                return bail(rp);
            }
            let args = read_all(vm, args);
            match slot(vm, object) {
                OptSlot::Virtual { vid, data } => {
                    fill_view(&mut vm.realm, &data, &args)?;
                    write_slot(vm, *dst, OptSlot::Virtual { vid, data });
                }
                OptSlot::Value(this) => return call(vm, *dst, callee, this, args, false),
            }
        }
        MirOp::VirtualSet { dst, callee, object, args, rp } => {
            let callee = read(vm, callee);
            if !is_intrinsic(vm, &callee, Intrinsic::TypedArraySet) {
                return bail(rp);
            }
            let args = read_all(vm, args);
            match slot(vm, object) {
                OptSlot::Virtual { data, .. } => {
                    set_view(&mut vm.realm, &data, &args)?;
                    write(vm, *dst, JsValue::Undefined);
                }
                OptSlot::Value(this) => return call(vm, *dst, callee, this, args, false),
            }
        }

        // ── Calls and fallbacks ──────────────────────────────
        MirOp::Call { dst, callee, this, args, construct } => {
            let callee = read(vm, callee);
            let this = read(vm, this);
            let args = read_all(vm, args);
            return call(vm, *dst, callee, this, args, *construct);
        }
        MirOp::Generic { dst, instr, script, inputs } => return generic(vm, code, *dst, *instr, *script, inputs),
        MirOp::CheckInvalidated { rp } => {
            if code.invalidated.load(Ordering::SeqCst) {
                return Ok(Flow::Bail(*rp, BailoutKind::Invalidated));
            }
        }
        MirOp::Bailout { rp } => return Ok(Flow::Bail(*rp, BailoutKind::Requested)),
        MirOp::LoopHead { rp } => {
            vm.poll_interrupt()?;
            vm.safepoint();
            if code.invalidated.load(Ordering::SeqCst) {
                return Ok(Flow::Bail(*rp, BailoutKind::Invalidated));
            }
        }

        // ── Control flow ─────────────────────────────────────
        MirOp::Jump { target } => return Ok(Flow::Jump(*target as usize)),
        MirOp::Branch { cond, target, kind } => {
            let value = read(vm, cond);
            let taken = match kind {
                BranchKind::IfFalse => !to_boolean(&value),
                BranchKind::IfTrue => to_boolean(&value),
                BranchKind::IfNotNullish => !value.is_nullish(),
            };
            if taken {
                return Ok(Flow::Jump(*target as usize));
            }
        }
        MirOp::Return { value } => {
            let value = read(vm, value);
            return Ok(Flow::Done(Step::Return(value)));
        }
        MirOp::Throw { value } => {
            let value = read(vm, value);
            return Err(JErrorType::Thrown(value));
        }
    }
    Ok(Flow::Next)
}
