//! The baseline compiler.
//!
//! Translates a script into a pre-decoded op vector, one op per bytecode
//! instruction so that pcs stay interchangeable with the interpreter tiers.
//! Instructions whose IC is monomorphic at compile time are specialized with
//! the stub inlined into the op; when the inlined guard fails at run time
//! the op takes the ordinary IC path, which may attach further stubs. Code
//! compiled from stale hints is therefore slower, never wrong.

use std::sync::Arc;

use crate::runner::config::EngineOptions;
use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{ObjectClass, TypedArrayKind};
use crate::runner::ds::operations::object::{typed_array_read, typed_array_write};
use crate::runner::ds::operations::type_conversion::to_number;
use crate::runner::ds::shape::ShapeId;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::{Instruction, OpCode, Script};
use crate::runner::jit::ic::{IcGuard, IcHandler, IcSlot, IcState};
use crate::runner::jit::interpreter::{handler, Step};
use crate::runner::jit::runtime::{self, IcRef};
use crate::runner::jit::vm::Vm;

#[derive(Clone, Debug)]
pub enum BaselineOp {
    /// No specialization; runs the interpreter handler.
    Generic(Instruction),
    PushConstant(JsValue),
    GetLocal(u32),
    SetLocal(u32),
    GetPropSlot { shape: ShapeId, slot: u32, ic: u32, name: Arc<str> },
    SetPropSlot { shape: ShapeId, slot: u32, ic: u32, name: Arc<str> },
    ArrayLength { shape: ShapeId, ic: u32, name: Arc<str> },
    GetDenseElement { shape: ShapeId, ic: u32 },
    GetTypedElement { shape: ShapeId, kind: TypedArrayKind, ic: u32 },
    SetTypedElement { shape: ShapeId, kind: TypedArrayKind, ic: u32 },
    GetGlobalSlot { shape: ShapeId, lexical_epoch: u64, slot: u32, ic: u32, name: Arc<str> },
    Int32Binary { op: OpCode, ic: u32 },
    DoubleBinary { op: OpCode, ic: u32 },
    NumberCompare { op: OpCode, ic: u32 },
}

#[derive(Debug)]
pub struct BaselineCode {
    pub ops: Vec<BaselineOp>,
    /// Number of specialized ops, for logging.
    pub specialized: usize,
}

/// Compiles `script` using the feedback currently in `ics`. Fails for
/// scripts the tier does not handle; the caller keeps interpreting them.
pub fn compile(script: &Script, ics: &[IcSlot], options: &EngineOptions) -> Result<BaselineCode, String> {
    if script.has_debugger {
        return Err("debugger statement".to_string());
    }
    if script.code.len() > options.baseline_max_script_length {
        return Err(format!("script too long ({} instructions)", script.code.len()));
    }
    let mut specialized = 0;
    let ops = script
        .code
        .iter()
        .map(|instr| {
            let op = specialize(script, ics, *instr);
            if !matches!(op, BaselineOp::Generic(_)) {
                specialized += 1;
            }
            op
        })
        .collect();
    Ok(BaselineCode { ops, specialized })
}

fn monomorphic(ics: &[IcSlot], slot: u32) -> Option<(IcGuard, &IcHandler)> {
    let ic = ics.get(slot as usize)?;
    if ic.state != IcState::Monomorphic {
        return None;
    }
    ic.stubs.first().map(|s| (s.guard, &s.handler))
}

fn specialize(script: &Script, ics: &[IcSlot], instr: Instruction) -> BaselineOp {
    let ic = instr.operand2;
    let name = || script.name_at(instr.operand).clone();
    match instr.op {
        OpCode::Constant => return BaselineOp::PushConstant(script.constants[instr.operand as usize].clone()),
        OpCode::Int => return BaselineOp::PushConstant(JsValue::from_i32(instr.operand as i32)),
        OpCode::GetLocal => return BaselineOp::GetLocal(instr.operand),
        OpCode::SetLocal => return BaselineOp::SetLocal(instr.operand),
        _ => {}
    }
    if instr.op.ic_kind().is_none() {
        return BaselineOp::Generic(instr);
    }
    let Some((guard, stub)) = monomorphic(ics, ic) else {
        return BaselineOp::Generic(instr);
    };
    match (instr.op, guard, stub) {
        (OpCode::GetProp, IcGuard::Shape(shape), IcHandler::LoadSlot { slot }) => {
            BaselineOp::GetPropSlot { shape, slot: *slot, ic, name: name() }
        }
        (OpCode::GetProp, IcGuard::Shape(shape), IcHandler::ArrayLength) => {
            BaselineOp::ArrayLength { shape, ic, name: name() }
        }
        (OpCode::SetProp, IcGuard::Shape(shape), IcHandler::StoreSlot { slot }) => {
            BaselineOp::SetPropSlot { shape, slot: *slot, ic, name: name() }
        }
        (OpCode::GetElem, IcGuard::Shape(shape), IcHandler::LoadDenseElement) => {
            BaselineOp::GetDenseElement { shape, ic }
        }
        (OpCode::GetElem, IcGuard::Shape(shape), IcHandler::LoadTypedArrayElement { kind }) => {
            BaselineOp::GetTypedElement { shape, kind: *kind, ic }
        }
        (OpCode::SetElem, IcGuard::Shape(shape), IcHandler::StoreTypedArrayElement { kind }) => {
            BaselineOp::SetTypedElement { shape, kind: *kind, ic }
        }
        (OpCode::GetName, IcGuard::Global { shape, lexical_epoch }, IcHandler::LoadGlobalSlot { slot }) => {
            BaselineOp::GetGlobalSlot { shape, lexical_epoch, slot: *slot, ic, name: name() }
        }
        (_, _, IcHandler::Int32Arith) => BaselineOp::Int32Binary { op: instr.op, ic },
        (_, _, IcHandler::DoubleArith) => BaselineOp::DoubleBinary { op: instr.op, ic },
        (_, _, IcHandler::Int32Compare | IcHandler::DoubleCompare) => BaselineOp::NumberCompare { op: instr.op, ic },
        _ => BaselineOp::Generic(instr),
    }
}

/// Runs the top frame's baseline code until it calls, returns, throws or
/// changes tier.
pub fn run(vm: &mut Vm, code: Arc<BaselineCode>) -> Result<Step, JErrorType> {
    loop {
        let pc = {
            let frame = vm.frame_mut();
            let pc = frame.pc;
            frame.pc += 1;
            pc
        };
        let step = match &code.ops[pc] {
            BaselineOp::Generic(instr) => handler(instr.op)(vm, *instr)?,
            op => execute_specialized(vm, op)?,
        };
        match step {
            Step::Next => {}
            step => return Ok(step),
        }
    }
}

fn ic_ref(vm: &Vm, slot: u32) -> IcRef {
    IcRef::new(vm.frame().script_id, slot)
}

fn shape_of(vm: &Vm, value: &JsValue) -> Option<ShapeId> {
    value.as_object().map(|id| vm.realm.shape_of(id))
}

fn execute_specialized(vm: &mut Vm, op: &BaselineOp) -> Result<Step, JErrorType> {
    match op {
        BaselineOp::Generic(instr) => return handler(instr.op)(vm, *instr),
        BaselineOp::PushConstant(value) => vm.frame_mut().push(value.clone()),
        BaselineOp::GetLocal(slot) => {
            let frame = vm.frame_mut();
            let value = frame.locals[*slot as usize].clone();
            frame.push(value);
        }
        BaselineOp::SetLocal(slot) => {
            let frame = vm.frame_mut();
            frame.locals[*slot as usize] = frame.peek().clone();
        }
        BaselineOp::GetPropSlot { shape, slot, ic, name } => {
            let object = vm.frame_mut().pop();
            let value = match object.as_object() {
                Some(id) if vm.realm.shape_of(id) == *shape => vm.realm.heap.get(id).slots[*slot as usize].clone(),
                _ => runtime::get_prop(vm, ic_ref(vm, *ic), &object, name)?,
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::ArrayLength { shape, ic, name } => {
            let object = vm.frame_mut().pop();
            let fast = object
                .as_object()
                .filter(|id| vm.realm.shape_of(*id) == *shape)
                .and_then(|id| vm.realm.heap.get(id).as_array().map(|e| e.len()));
            let value = match fast {
                Some(len) => JsValue::from_f64(len as f64),
                None => runtime::get_prop(vm, ic_ref(vm, *ic), &object, name)?,
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::SetPropSlot { shape, slot, ic, name } => {
            let value = vm.frame_mut().pop();
            let object = vm.frame_mut().pop();
            let fast = object
                .as_object()
                .filter(|id| vm.realm.shape_of(*id) == *shape && vm.realm.heap.get(*id).guarded_by.is_none());
            match fast {
                Some(id) => vm.realm.heap.get_mut(id).slots[*slot as usize] = value.clone(),
                None => runtime::set_prop(vm, ic_ref(vm, *ic), &object, name, value.clone())?,
            }
            vm.frame_mut().push(value);
        }
        BaselineOp::GetDenseElement { shape, ic } => {
            let key = vm.frame_mut().pop();
            let object = vm.frame_mut().pop();
            let fast = match (shape_of(vm, &object) == Some(*shape), object.as_object(), key.as_int32()) {
                (true, Some(id), Some(index)) if index >= 0 => vm
                    .realm
                    .heap
                    .get(id)
                    .as_array()
                    .and_then(|e| e.get(index as usize).cloned()),
                _ => None,
            };
            let value = match fast {
                Some(v) => v,
                None => runtime::get_elem(vm, ic_ref(vm, *ic), &object, &key)?,
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::GetTypedElement { shape, kind, ic } => {
            let key = vm.frame_mut().pop();
            let object = vm.frame_mut().pop();
            let fast = match (shape_of(vm, &object) == Some(*shape), object.as_object(), key.as_int32()) {
                (true, Some(id), Some(index)) if index >= 0 => match &vm.realm.heap.get(id).class {
                    ObjectClass::TypedArray(t) if t.kind == *kind => Some(typed_array_read(&vm.realm, t, index as usize)),
                    _ => None,
                },
                _ => None,
            };
            let value = match fast {
                Some(v) => v,
                None => runtime::get_elem(vm, ic_ref(vm, *ic), &object, &key)?,
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::SetTypedElement { shape, kind, ic } => {
            let value = vm.frame_mut().pop();
            let key = vm.frame_mut().pop();
            let object = vm.frame_mut().pop();
            let typed = match (shape_of(vm, &object) == Some(*shape), object.as_object(), key.as_int32()) {
                (true, Some(id), Some(index)) if index >= 0 => match &vm.realm.heap.get(id).class {
                    ObjectClass::TypedArray(t) if t.kind == *kind => Some((t.clone(), index as usize)),
                    _ => None,
                },
                _ => None,
            };
            match typed {
                Some((t, index)) => {
                    let n = to_number(&vm.realm, &value);
                    typed_array_write(&mut vm.realm, &t, index, n);
                }
                None => runtime::set_elem(vm, ic_ref(vm, *ic), &object, &key, value.clone())?,
            }
            vm.frame_mut().push(value);
        }
        BaselineOp::GetGlobalSlot { shape, lexical_epoch, slot, ic, name } => {
            let global = vm.realm.heap.get(vm.realm.global);
            let value = if global.shape == *shape && vm.realm.lexical_epoch == *lexical_epoch {
                global.slots[*slot as usize].clone()
            } else {
                runtime::get_name(vm, ic_ref(vm, *ic), name)?
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::Int32Binary { op, ic } => {
            let b = vm.frame_mut().pop();
            let a = vm.frame_mut().pop();
            let value = match (a.as_int32(), b.as_int32()) {
                (Some(x), Some(y)) => runtime::int32_binary(*op, x, y),
                _ => runtime::binary(vm, ic_ref(vm, *ic), *op, &a, &b),
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::DoubleBinary { op, ic } => {
            let b = vm.frame_mut().pop();
            let a = vm.frame_mut().pop();
            let value = match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => JsValue::from_f64(runtime::number_binary(*op, x, y)),
                _ => runtime::binary(vm, ic_ref(vm, *ic), *op, &a, &b),
            };
            vm.frame_mut().push(value);
        }
        BaselineOp::NumberCompare { op, ic } => {
            let b = vm.frame_mut().pop();
            let a = vm.frame_mut().pop();
            let value = match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => JsValue::Boolean(runtime::compare_numbers(*op, x, y)),
                _ => runtime::compare(vm, ic_ref(vm, *ic), *op, &a, &b),
            };
            vm.frame_mut().push(value);
        }
    }
    Ok(Step::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;
    use crate::runner::jit::ic::IcKind;

    fn script(source: &str) -> Script {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        compile_script(&program, &Arc::from("t.js"), 0, false).unwrap()
    }

    #[test]
    fn ops_stay_aligned_with_bytecode() {
        let s = script("var o = {a: 1}; var t = o.a + 2;");
        let ics: Vec<IcSlot> = s.ic_sites.iter().map(|site| IcSlot::new(site.kind, site.pc)).collect();
        let code = compile(&s, &ics, &EngineOptions::default()).unwrap();
        assert_eq!(code.ops.len(), s.code.len());
    }

    #[test]
    fn monomorphic_feedback_is_specialized() {
        let s = script("var o = {a: 1}; o.a;");
        let mut ics: Vec<IcSlot> = s.ic_sites.iter().map(|site| IcSlot::new(site.kind, site.pc)).collect();
        let (slot, site) = s
            .ic_sites
            .iter()
            .enumerate()
            .find(|(_, site)| site.kind == IcKind::GetProp)
            .unwrap();
        ics[slot].attach(IcGuard::Shape(ShapeId(7)), IcHandler::LoadSlot { slot: 0 }, 6);
        let code = compile(&s, &ics, &EngineOptions::default()).unwrap();
        assert!(matches!(
            code.ops[site.pc as usize],
            BaselineOp::GetPropSlot { shape: ShapeId(7), slot: 0, .. }
        ));
    }

    #[test]
    fn debugger_statements_are_not_compiled() {
        let s = script("debugger;");
        assert!(compile(&s, &[], &EngineOptions::default()).is_err());
    }

    #[test]
    fn length_limit_is_enforced() {
        let s = script("var a = 1; var b = 2; var c = a + b;");
        let options = EngineOptions { baseline_max_script_length: 2, ..EngineOptions::default() };
        assert!(compile(&s, &[], &options).is_err());
    }
}
