//! The bytecode interpreter.
//!
//! Each opcode has one handler function operating on the top frame of the
//! VM. The interpreter selects the handler with a `match` per instruction;
//! the baseline interpreter runs the very same handlers through a prebuilt
//! dispatch table, and baseline code falls back to them for every op it does
//! not specialize. The handlers are the definition of the instruction set.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::operations::object::{self as obj_ops, create_array};
use crate::runner::ds::operations::type_conversion::{to_boolean, to_property_key};
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::{Instruction, OpCode};
use crate::runner::jit::runtime::{self, IcRef};
use crate::runner::jit::vm::{Invoked, Vm};

/// What the driver loop should do after an instruction.
#[derive(Debug)]
pub enum Step {
    /// Continue with the next instruction of the same frame.
    Next,
    /// The frame stack or the top frame's tier changed.
    Yield,
    /// The top frame returned.
    Return(JsValue),
}

pub type OpFn = fn(&mut Vm, Instruction) -> Result<Step, JErrorType>;

/// Runs the top frame until it calls, returns, throws or changes tier.
pub fn run(vm: &mut Vm) -> Result<Step, JErrorType> {
    loop {
        let instr = vm.fetch();
        match handler(instr.op)(vm, instr)? {
            Step::Next => {}
            step => return Ok(step),
        }
    }
}

fn ic(vm: &Vm, instr: Instruction) -> IcRef {
    IcRef::new(vm.frame().script_id, instr.operand2)
}

fn name(vm: &Vm, instr: Instruction) -> Arc<str> {
    vm.frame().script.name_at(instr.operand).clone()
}

fn push(vm: &mut Vm, value: JsValue) -> Result<Step, JErrorType> {
    vm.frame_mut().push(value);
    Ok(Step::Next)
}

fn pop(vm: &mut Vm) -> JsValue {
    vm.frame_mut().pop()
}

pub fn handler(op: OpCode) -> OpFn {
    match op {
        OpCode::Constant => op_constant,
        OpCode::Int => op_int,
        OpCode::Undefined => |vm, _| push(vm, JsValue::Undefined),
        OpCode::Null => |vm, _| push(vm, JsValue::Null),
        OpCode::True => |vm, _| push(vm, JsValue::Boolean(true)),
        OpCode::False => |vm, _| push(vm, JsValue::Boolean(false)),
        OpCode::GetLocal => op_get_local,
        OpCode::SetLocal => op_set_local,
        OpCode::This => op_this,
        OpCode::Callee => op_callee,
        OpCode::GetName => op_get_name,
        OpCode::SetName => op_set_name,
        OpCode::TypeOfName => op_type_of_name,
        OpCode::DeleteName => op_delete_name,
        OpCode::InitLexical => op_init_lexical,
        OpCode::Pop => op_pop,
        OpCode::Dup => op_dup,
        OpCode::Dup2 => op_dup2,
        OpCode::Swap => op_swap,
        OpCode::Rot3 => op_rot3,
        OpCode::Rot4 => op_rot4,
        OpCode::NewObject => op_new_object,
        OpCode::InitProp => op_init_prop,
        OpCode::NewArray => op_new_array,
        OpCode::Closure => op_closure,
        OpCode::GetProp => op_get_prop,
        OpCode::SetProp => op_set_prop,
        OpCode::GetElem => op_get_elem,
        OpCode::SetElem => op_set_elem,
        OpCode::DeleteProp => op_delete_prop,
        OpCode::DeleteElem => op_delete_elem,
        OpCode::In => op_in,
        OpCode::InstanceOf => op_instance_of,
        OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Exp
        | OpCode::BitAnd
        | OpCode::BitOr
        | OpCode::BitXor
        | OpCode::Shl
        | OpCode::Shr
        | OpCode::UShr => op_binary,
        OpCode::Neg | OpCode::Pos | OpCode::BitNot | OpCode::Inc | OpCode::Dec => op_unary,
        OpCode::Not => op_not,
        OpCode::TypeOf => op_type_of,
        OpCode::Eq
        | OpCode::Ne
        | OpCode::StrictEq
        | OpCode::StrictNe
        | OpCode::Lt
        | OpCode::Le
        | OpCode::Gt
        | OpCode::Ge => op_compare,
        OpCode::Jump => op_jump,
        OpCode::JumpIfFalse => op_jump_if_false,
        OpCode::JumpIfTrue => op_jump_if_true,
        OpCode::JumpIfNotNullish => op_jump_if_not_nullish,
        OpCode::LoopHead => op_loop_head,
        OpCode::Call => op_call,
        OpCode::New => op_new,
        OpCode::Return => op_return,
        OpCode::Throw => op_throw,
        OpCode::ThrowConstAssign => op_throw_const_assign,
        OpCode::Debugger => |_, _| Ok(Step::Next),
    }
}

// ── Constants, locals, names ─────────────────────────────────

fn op_constant(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let value = vm.frame().script.constants[instr.operand as usize].clone();
    push(vm, value)
}

fn op_int(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    push(vm, JsValue::from_i32(instr.operand as i32))
}

fn op_get_local(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let value = vm.frame().locals[instr.operand as usize].clone();
    push(vm, value)
}

fn op_set_local(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let frame = vm.frame_mut();
    let value = frame.peek().clone();
    frame.locals[instr.operand as usize] = value;
    Ok(Step::Next)
}

fn op_this(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let this = vm.frame().this.clone();
    push(vm, this)
}

fn op_callee(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let callee = vm.frame().callee.map(JsValue::Object).unwrap_or(JsValue::Undefined);
    push(vm, callee)
}

fn op_get_name(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let (ic, name) = (ic(vm, instr), name(vm, instr));
    let value = runtime::get_name(vm, ic, &name)?;
    push(vm, value)
}

fn op_set_name(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let (ic, name) = (ic(vm, instr), name(vm, instr));
    let value = vm.frame().peek().clone();
    runtime::set_name(vm, ic, &name, value)?;
    Ok(Step::Next)
}

fn op_type_of_name(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let name = name(vm, instr);
    let value = runtime::type_of_name(vm, &name)?;
    push(vm, value)
}

fn op_delete_name(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let name = name(vm, instr);
    let value = runtime::delete_name(vm, &name)?;
    push(vm, value)
}

fn op_init_lexical(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let name = name(vm, instr);
    let value = pop(vm);
    runtime::init_lexical(&mut vm.realm, &name, value);
    Ok(Step::Next)
}

// ── Stack shuffles ───────────────────────────────────────────

fn op_pop(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    pop(vm);
    Ok(Step::Next)
}

fn op_dup(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let top = vm.frame().peek().clone();
    push(vm, top)
}

fn op_dup2(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let frame = vm.frame_mut();
    let pair = frame.pop_n(2);
    frame.stack.extend(pair.iter().cloned());
    frame.stack.extend(pair);
    Ok(Step::Next)
}

fn op_swap(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let stack = &mut vm.frame_mut().stack;
    let len = stack.len();
    if len >= 2 {
        stack.swap(len - 1, len - 2);
    }
    Ok(Step::Next)
}

/// Moves the top of the stack `depth` entries down.
fn rotate(vm: &mut Vm, depth: usize) {
    let stack = &mut vm.frame_mut().stack;
    let len = stack.len();
    if len >= depth {
        stack[len - depth..].rotate_right(1);
    }
}

fn op_rot3(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    rotate(vm, 3);
    Ok(Step::Next)
}

fn op_rot4(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    rotate(vm, 4);
    Ok(Step::Next)
}

// ── Literals ─────────────────────────────────────────────────

fn op_new_object(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let id = vm.realm.alloc_ordinary();
    push(vm, JsValue::Object(id))
}

fn op_init_prop(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let name = name(vm, instr);
    let value = pop(vm);
    if let Some(id) = vm.frame().peek().as_object() {
        obj_ops::define_property(&mut vm.realm, id, &name, value, PropertyAttributes::DEFAULT);
    }
    Ok(Step::Next)
}

fn op_new_array(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let elements = vm.frame_mut().pop_n(instr.operand as usize);
    let id = create_array(&mut vm.realm, elements);
    push(vm, JsValue::Object(id))
}

fn op_closure(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let template = vm.frame().script.templates[instr.operand as usize].clone();
    let id = runtime::make_closure(&mut vm.realm, &template);
    push(vm, JsValue::Object(id))
}

// ── Properties ───────────────────────────────────────────────

fn op_get_prop(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let (ic, name) = (ic(vm, instr), name(vm, instr));
    let object = pop(vm);
    let value = runtime::get_prop(vm, ic, &object, &name)?;
    push(vm, value)
}

fn op_set_prop(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let (ic, name) = (ic(vm, instr), name(vm, instr));
    let value = pop(vm);
    let object = pop(vm);
    runtime::set_prop(vm, ic, &object, &name, value.clone())?;
    push(vm, value)
}

fn op_get_elem(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let key = pop(vm);
    let object = pop(vm);
    let value = runtime::get_elem(vm, ic, &object, &key)?;
    push(vm, value)
}

fn op_set_elem(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let value = pop(vm);
    let key = pop(vm);
    let object = pop(vm);
    runtime::set_elem(vm, ic, &object, &key, value.clone())?;
    push(vm, value)
}

fn op_delete_prop(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let name = name(vm, instr);
    let object = pop(vm);
    let strict = vm.frame().script.strict;
    let result = runtime::delete_prop(vm, &object, &name, strict)?;
    push(vm, result)
}

fn op_delete_elem(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let key = pop(vm);
    let object = pop(vm);
    let name = to_property_key(&vm.realm, &key);
    let strict = vm.frame().script.strict;
    let result = runtime::delete_prop(vm, &object, &name, strict)?;
    push(vm, result)
}

fn op_in(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let object = pop(vm);
    let key = pop(vm);
    let result = runtime::in_operator(&vm.realm, &key, &object)?;
    push(vm, result)
}

fn op_instance_of(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let ctor = pop(vm);
    let value = pop(vm);
    let result = runtime::instance_of(&vm.realm, &value, &ctor)?;
    push(vm, result)
}

// ── Arithmetic & comparison ──────────────────────────────────

fn op_binary(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let b = pop(vm);
    let a = pop(vm);
    let result = runtime::binary(vm, ic, instr.op, &a, &b);
    push(vm, result)
}

fn op_unary(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let a = pop(vm);
    let result = runtime::unary(vm, ic, instr.op, &a);
    push(vm, result)
}

fn op_not(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let a = pop(vm);
    push(vm, JsValue::Boolean(!to_boolean(&a)))
}

fn op_type_of(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    let a = pop(vm);
    let result = runtime::type_of(&vm.realm, &a);
    push(vm, result)
}

fn op_compare(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let b = pop(vm);
    let a = pop(vm);
    let result = runtime::compare(vm, ic, instr.op, &a, &b);
    push(vm, result)
}

// ── Control flow ─────────────────────────────────────────────

fn op_jump(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    vm.frame_mut().pc = instr.operand as usize;
    Ok(Step::Next)
}

fn branch_if(vm: &mut Vm, instr: Instruction, taken: impl FnOnce(&JsValue) -> bool) -> Result<Step, JErrorType> {
    let frame = vm.frame_mut();
    let value = frame.pop();
    if taken(&value) {
        frame.pc = instr.operand as usize;
    }
    Ok(Step::Next)
}

fn op_jump_if_false(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    branch_if(vm, instr, |v| !to_boolean(v))
}

fn op_jump_if_true(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    branch_if(vm, instr, to_boolean)
}

fn op_jump_if_not_nullish(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    branch_if(vm, instr, |v| !v.is_nullish())
}

fn op_loop_head(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    vm.loop_head()
}

// ── Calls ────────────────────────────────────────────────────

fn invoked(vm: &mut Vm, result: Invoked) -> Result<Step, JErrorType> {
    match result {
        Invoked::Value(value) => push(vm, value),
        Invoked::Pushed => Ok(Step::Yield),
    }
}

fn op_call(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let args = vm.frame_mut().pop_n(instr.operand as usize);
    let this = pop(vm);
    let callee = pop(vm);
    runtime::note_call(vm, ic, &callee);
    let result = vm.invoke(callee, this, args, false)?;
    invoked(vm, result)
}

fn op_new(vm: &mut Vm, instr: Instruction) -> Result<Step, JErrorType> {
    let ic = ic(vm, instr);
    let args = vm.frame_mut().pop_n(instr.operand as usize);
    let callee = pop(vm);
    runtime::note_call(vm, ic, &callee);
    let result = vm.invoke(callee, JsValue::Undefined, args, true)?;
    invoked(vm, result)
}

fn op_return(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    Ok(Step::Return(pop(vm)))
}

fn op_throw(vm: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    Err(JErrorType::Thrown(pop(vm)))
}

fn op_throw_const_assign(_: &mut Vm, _: Instruction) -> Result<Step, JErrorType> {
    Err(JErrorType::TypeError("Assignment to constant variable.".to_string()))
}
