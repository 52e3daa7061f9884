//! Leaving optimized code.
//!
//! A bailout rebuilds the bytecode frames described by a resume point from
//! the register file: one frame for the optimized script and one for every
//! inlined call that is active at that point. Values the optimizer kept in a
//! specialized form are recomputed, and scalar-replaced typed array views
//! get a heap object (the same one for every occurrence of a view).

use std::collections::HashMap;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{ObjectId, TypedArrayData};
use crate::runner::ds::operations::object::create_typed_array;
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::frame::{Frame, OptSlot};
use crate::runner::jit::interpreter::Step;
use crate::runner::jit::opt::mir::{Operand, RecoverOp, ResumePoint};
use crate::runner::jit::runtime::{math_intrinsic, number_binary};
use crate::runner::jit::vm::Vm;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BailoutKind {
    /// A guard or a fast path failed.
    Guard,
    /// The code was invalidated while running.
    Invalidated,
    /// The script asked for it with `bailout()`.
    Requested,
}

/// One value of a rebuilt frame before views are materialized.
#[derive(Clone, Debug)]
pub enum SlotValue {
    Value(JsValue),
    Virtual { vid: u32, data: TypedArrayData },
}

impl From<OptSlot> for SlotValue {
    fn from(slot: OptSlot) -> Self {
        match slot {
            OptSlot::Value(v) => SlotValue::Value(v),
            OptSlot::Virtual { vid, data } => SlotValue::Virtual { vid, data },
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameImage {
    /// Index into `MirGraph::scripts`.
    pub script: u32,
    pub pc: usize,
    pub callee: SlotValue,
    pub this: SlotValue,
    pub locals: Vec<SlotValue>,
    pub stack: Vec<SlotValue>,
}

fn resolve(operand: &Operand, registers: &[OptSlot], recovers: &[RecoverOp]) -> SlotValue {
    match operand {
        Operand::Reg(r) => registers
            .get(*r as usize)
            .cloned()
            .map(SlotValue::from)
            .unwrap_or(SlotValue::Value(JsValue::Undefined)),
        Operand::Const(v) => SlotValue::Value(v.clone()),
        Operand::Recover(index) => SlotValue::Value(recover(*index, registers, recovers)),
    }
}

fn number(operand: &Operand, registers: &[OptSlot], recovers: &[RecoverOp]) -> f64 {
    match resolve(operand, registers, recovers) {
        SlotValue::Value(v) => v.as_number().unwrap_or(f64::NAN),
        SlotValue::Virtual { .. } => f64::NAN,
    }
}

fn recover(index: u32, registers: &[OptSlot], recovers: &[RecoverOp]) -> JsValue {
    match recovers.get(index as usize) {
        Some(RecoverOp::Binary { op, lhs, rhs }) => {
            let (x, y) = (number(lhs, registers, recovers), number(rhs, registers, recovers));
            JsValue::from_f64(number_binary(*op, x, y))
        }
        Some(RecoverOp::Math { intrinsic, arg }) => {
            JsValue::from_f64(math_intrinsic(*intrinsic, &[number(arg, registers, recovers)]))
        }
        None => JsValue::Undefined,
    }
}

/// Computes the bytecode frames for `rp`, outermost first. Pure: reads the
/// register file and nothing else.
pub fn reconstruct(rp: &ResumePoint, registers: &[OptSlot], recovers: &[RecoverOp]) -> Vec<FrameImage> {
    let value = |operand: &Operand| resolve(operand, registers, recovers);
    rp.frames
        .iter()
        .map(|state| FrameImage {
            script: state.script,
            pc: state.pc as usize,
            callee: value(&state.callee),
            this: value(&state.this),
            locals: state.locals.iter().map(value).collect(),
            stack: state.stack.iter().map(value).collect(),
        })
        .collect()
}

/// Gives a view a heap object. Every register holding the same view gets
/// the same object.
pub fn materialize(realm: &mut Realm, memo: &mut HashMap<u32, ObjectId>, vid: u32, data: TypedArrayData) -> ObjectId {
    *memo.entry(vid).or_insert_with(|| create_typed_array(realm, data))
}

fn materialize_value(realm: &mut Realm, memo: &mut HashMap<u32, ObjectId>, value: SlotValue) -> JsValue {
    match value {
        SlotValue::Value(v) => v,
        SlotValue::Virtual { vid, data } => JsValue::Object(materialize(realm, memo, vid, data)),
    }
}

/// Replaces the top (optimized) frame by the frames of resume point `rp`.
pub fn bail(vm: &mut Vm, rp: u32, kind: BailoutKind) -> Result<Step, JErrorType> {
    let Some(mut opt) = vm.frame_mut().opt.take() else {
        return Ok(Step::Yield);
    };
    let code = opt.code.clone();
    let point = &code.graph.resume_points[rp as usize];
    let images = reconstruct(point, &opt.registers, &code.graph.recovers);

    let mut rebuilt = Vec::with_capacity(images.len());
    for image in images {
        let (script_id, script) = code.graph.scripts[image.script as usize].clone();
        let memo = &mut opt.materialized;
        let realm = &mut vm.realm;
        let callee = materialize_value(realm, memo, image.callee).as_object();
        let this = materialize_value(realm, memo, image.this);
        let locals = image.locals.into_iter().map(|v| materialize_value(realm, memo, v)).collect();
        let stack = image.stack.into_iter().map(|v| materialize_value(realm, memo, v)).collect();
        let tier = realm.runtime(script_id).resume_tier();
        rebuilt.push(Frame {
            script_id,
            script,
            callee,
            this,
            pc: image.pc,
            locals,
            stack,
            tier,
            is_construct: false,
            opt: None,
        });
    }

    let depth = rebuilt.len();
    let mut frames = rebuilt.into_iter();
    if let Some(outer) = frames.next() {
        let top = vm.frame_mut();
        let is_construct = top.is_construct;
        *top = Frame { is_construct, ..outer };
    }
    vm.frames.extend(frames);

    let runtime = vm.realm.runtime_mut(code.script_id);
    tracing::debug!(
        script = %runtime.script.display_name(),
        rp,
        kind = ?kind,
        frames = depth,
        "bailout"
    );
    if kind == BailoutKind::Guard && runtime.note_bailout(&vm.options) {
        vm.realm.invalidate(vec![code.code_ref()]);
    }
    Ok(Step::Yield)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ds::object::TypedArrayKind;
    use crate::runner::jit::bytecode::OpCode;
    use crate::runner::jit::opt::mir::FrameState;

    fn view() -> TypedArrayData {
        TypedArrayData { kind: TypedArrayKind::Int32, buffer: ObjectId(5), byte_offset: 8, length: 2 }
    }

    fn registers() -> Vec<OptSlot> {
        vec![
            OptSlot::Value(JsValue::from_f64(1.5)),
            OptSlot::Virtual { vid: 0, data: view() },
            OptSlot::Value(JsValue::from_i32(7)),
        ]
    }

    fn state(script: u32, pc: u32, locals: Vec<Operand>, stack: Vec<Operand>) -> FrameState {
        FrameState {
            script,
            pc,
            callee: Operand::Const(JsValue::Undefined),
            this: Operand::Const(JsValue::Undefined),
            locals,
            stack,
        }
    }

    #[test]
    fn registers_and_constants_are_copied() {
        let rp = ResumePoint {
            frames: vec![state(0, 12, vec![Operand::Reg(0), Operand::Const(JsValue::from_i32(3))], vec![Operand::Reg(2)])],
        };
        let images = reconstruct(&rp, &registers(), &[]);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].pc, 12);
        assert!(matches!(&images[0].locals[0], SlotValue::Value(v) if *v == JsValue::from_f64(1.5)));
        assert!(matches!(&images[0].locals[1], SlotValue::Value(v) if *v == JsValue::from_i32(3)));
        assert!(matches!(&images[0].stack[0], SlotValue::Value(v) if *v == JsValue::from_i32(7)));
    }

    #[test]
    fn specialized_values_are_recomputed_in_double_precision() {
        let recovers = vec![RecoverOp::Binary {
            op: OpCode::Add,
            lhs: Operand::Reg(0),
            rhs: Operand::Const(JsValue::from_f64(0.1)),
        }];
        let rp = ResumePoint { frames: vec![state(0, 3, vec![Operand::Recover(0)], vec![])] };
        let images = reconstruct(&rp, &registers(), &recovers);
        assert!(matches!(&images[0].locals[0], SlotValue::Value(v) if *v == JsValue::from_f64(1.5 + 0.1)));
    }

    #[test]
    fn views_stay_virtual_until_materialized() {
        let rp = ResumePoint {
            frames: vec![
                state(0, 9, vec![Operand::Reg(1)], vec![]),
                state(1, 0, vec![Operand::Reg(1), Operand::Reg(9)], vec![]),
            ],
        };
        let images = reconstruct(&rp, &registers(), &[]);
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].script, 1);
        assert!(matches!(&images[0].locals[0], SlotValue::Virtual { vid: 0, data } if data.byte_offset == 8));
        assert!(matches!(&images[1].locals[0], SlotValue::Virtual { vid: 0, .. }));
        assert!(matches!(&images[1].locals[1], SlotValue::Value(JsValue::Undefined)));
    }

    #[test]
    fn one_object_per_view() {
        let mut realm = Realm::new();
        let buffer = crate::runner::ds::operations::object::create_array(&mut realm, vec![]);
        let data = TypedArrayData { buffer, ..view() };
        let mut memo = HashMap::new();
        let a = materialize(&mut realm, &mut memo, 4, data.clone());
        let b = materialize(&mut realm, &mut memo, 4, data.clone());
        let c = materialize(&mut realm, &mut memo, 5, data);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(realm.heap.get(a).as_typed_array().is_some());
    }
}
