//! Builds MIR from bytecode and a snapshot of its IC feedback.
//!
//! The builder walks the bytecode once in program order, tracking the
//! operand stack abstractly. Every stack slot is an MIR operand; values that
//! are live across a jump are moved into registers owned by the jump target.
//! Monomorphic feedback turns into guards followed by the fast operation;
//! everything else runs through `Generic`, which executes the bytecode
//! instruction with the shared runtime, IC included.

use std::collections::HashMap;
use std::sync::Arc;

use crate::runner::ds::object::{Intrinsic, ObjectId};
use crate::runner::ds::operations::type_conversion::to_boolean;
use crate::runner::ds::value::{JsValue, TypeTag};
use crate::runner::jit::bytecode::{FunctionTemplate, Instruction, OpCode, Script};
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::ic::{IcGuard, IcHandler};
use crate::runner::jit::opt::analysis::{self, native_intrinsic, ScalarReplacement, ViewMethod};
use crate::runner::jit::opt::float32::{self, Float32Plan};
use crate::runner::jit::opt::mir::{
    BranchKind, Dependencies, FrameState, MirGraph, MirOp, Operand, OsrEntry, RecoverOp, Reg, ResumePoint,
};
use crate::runner::jit::opt::{
    AssertionKind, AssertionOutcome, CompileFailure, MirInput, OptimizationReport, ScriptSnapshot,
};

/// Ops that fit an int32 result or bail out.
const INT32_OPS: [OpCode; 8] = [
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::BitAnd,
    OpCode::BitOr,
    OpCode::BitXor,
    OpCode::Shl,
    OpCode::Shr,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum View {
    None,
    /// A scalar-replaced typed array view.
    Object,
    /// A method looked up on a scalar-replaced view.
    Method(ViewMethod),
}

#[derive(Clone, Debug)]
struct Item {
    value: Operand,
    /// What a bailout should see instead of `value`.
    resume: Option<Operand>,
    float32: bool,
    view: View,
}

impl Item {
    fn of(value: Operand) -> Self {
        Item { value, resume: None, float32: false, view: View::None }
    }

    fn reg(reg: Reg) -> Self {
        Item::of(Operand::Reg(reg))
    }

    fn resume_value(&self) -> Operand {
        self.resume.clone().unwrap_or_else(|| self.value.clone())
    }
}

/// One script being compiled: the outermost one or an inlined callee.
struct Context<'a> {
    snapshot: &'a ScriptSnapshot,
    script_index: u32,
    local_base: Reg,
    /// Caller frames at the call site, outermost first.
    outer: Vec<FrameState>,
    depth: u32,
    float32: Float32Plan,
    views: ScalarReplacement,
    stack: Vec<Item>,
    joins: HashMap<usize, Vec<Reg>>,
    labels: Vec<Option<usize>>,
    patches: Vec<(usize, usize)>,
    /// Inlined bodies leave their result here and jump to the end.
    ret: Option<Reg>,
    exits: Vec<usize>,
}

impl<'a> Context<'a> {
    fn new(
        snapshot: &'a ScriptSnapshot,
        script_index: u32,
        local_base: Reg,
        outer: Vec<FrameState>,
        depth: u32,
        species_intact: bool,
    ) -> Self {
        let script = &snapshot.script;
        let views = if species_intact {
            analysis::scalar_replacement(script, &snapshot.ics)
        } else {
            ScalarReplacement::default()
        };
        Context {
            snapshot,
            script_index,
            local_base,
            outer,
            depth,
            float32: float32::analyze(script, &snapshot.ics),
            views,
            stack: Vec::new(),
            joins: HashMap::new(),
            labels: vec![None; script.code.len() + 1],
            patches: Vec::new(),
            ret: None,
            exits: Vec::new(),
        }
    }

    fn script(&self) -> &'a Arc<Script> {
        &self.snapshot.script
    }

    fn local(&self, n: u32) -> Reg {
        self.local_base + n
    }

    fn this_reg(&self) -> Reg {
        self.local_base + self.snapshot.script.local_count
    }

    fn callee_reg(&self) -> Reg {
        self.this_reg() + 1
    }
}

struct Builder<'a> {
    input: &'a MirInput,
    graph: MirGraph,
    next_reg: Reg,
    location: (u32, u32),
    uses_views: bool,
}

pub fn build(input: &MirInput) -> Result<MirGraph, CompileFailure> {
    let root = &input.root;
    let mut builder = Builder {
        input,
        graph: MirGraph {
            ops: Vec::new(),
            locations: Vec::new(),
            resume_points: Vec::new(),
            recovers: Vec::new(),
            register_count: 0,
            osr_entries: Vec::new(),
            deps: Dependencies::default(),
            report: OptimizationReport::default(),
            object_refs: Vec::new(),
            scripts: vec![(root.script_id, root.script.clone())],
            inlined_calls: 0,
        },
        next_reg: root.script.local_count + 2,
        location: (0, 0),
        uses_views: false,
    };
    let mut cx = Context::new(root, 0, 0, Vec::new(), 0, input.species_intact);
    builder.body(&mut cx)?;
    Ok(builder.finish())
}

impl<'a> Builder<'a> {
    fn finish(mut self) -> MirGraph {
        let graph = &mut self.graph;
        graph.register_count = self.next_reg;
        if self.uses_views {
            graph.deps.realm_fuses.push(RealmFuseId::OptimizeTypedArraySpeciesFuse);
        }
        graph.object_refs.sort();
        graph.object_refs.dedup();
        graph.deps.global_constants.sort();
        graph.deps.global_constants.dedup();
        tracing::trace!(ops = graph.ops.len(), registers = graph.register_count, "MIR built");
        self.graph
    }

    fn temp(&mut self) -> Reg {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn emit(&mut self, op: MirOp) -> usize {
        self.graph.ops.push(op);
        self.graph.locations.push(self.location);
        self.graph.ops.len() - 1
    }

    fn frame_state(&self, cx: &Context, pc: usize) -> FrameState {
        let script = cx.script();
        FrameState {
            script: cx.script_index,
            pc: pc as u32,
            callee: Operand::Reg(cx.callee_reg()),
            this: Operand::Reg(cx.this_reg()),
            locals: (0..script.local_count).map(|n| Operand::Reg(cx.local(n))).collect(),
            stack: cx.stack.iter().map(Item::resume_value).collect(),
        }
    }

    /// Resume point for the state before the instruction at `pc`.
    fn resume_point(&mut self, cx: &Context, pc: usize) -> u32 {
        let mut frames = cx.outer.clone();
        frames.push(self.frame_state(cx, pc));
        self.graph.resume_points.push(ResumePoint { frames });
        (self.graph.resume_points.len() - 1) as u32
    }

    fn push(&mut self, cx: &mut Context, item: Item) {
        cx.stack.push(item);
    }

    fn pop(&mut self, cx: &mut Context) -> Result<Item, CompileFailure> {
        cx.stack
            .pop()
            .ok_or_else(|| CompileFailure::structural("operand stack underflow"))
    }

    fn pop_n(&mut self, cx: &mut Context, n: usize) -> Result<Vec<Item>, CompileFailure> {
        if cx.stack.len() < n {
            return Err(CompileFailure::structural("operand stack underflow"));
        }
        let at = cx.stack.len() - n;
        Ok(cx.stack.split_off(at))
    }

    fn check_invalidated(&mut self, cx: &Context, pc: usize) {
        let rp = self.resume_point(cx, pc + 1);
        self.emit(MirOp::CheckInvalidated { rp });
    }

    // ── Control flow ─────────────────────────────────────────

    fn join_regs(&mut self, cx: &mut Context, pc: usize) -> Vec<Reg> {
        if let Some(regs) = cx.joins.get(&pc) {
            return regs.clone();
        }
        let depth = cx.script().stack_depths.get(pc).copied().unwrap_or(0);
        let regs: Vec<Reg> = (0..depth).map(|_| self.temp()).collect();
        cx.joins.insert(pc, regs.clone());
        regs
    }

    /// Moves the stack into the registers of a jump target, then points the
    /// stack at them.
    fn move_to_join(&mut self, cx: &mut Context, regs: &[Reg]) {
        let mut sources = Vec::with_capacity(regs.len());
        for (i, item) in cx.stack.iter().enumerate() {
            let src = match &item.value {
                // Another join register is about to be overwritten: stage it.
                Operand::Reg(r) if regs.contains(r) && regs.get(i) != Some(r) => {
                    let t = self.temp();
                    self.emit(MirOp::Move { dst: t, src: item.value.clone() });
                    Operand::Reg(t)
                }
                value => value.clone(),
            };
            sources.push(src);
        }
        for (dst, src) in regs.iter().zip(sources) {
            if src != Operand::Reg(*dst) {
                self.emit(MirOp::Move { dst: *dst, src });
            }
        }
        for (item, reg) in cx.stack.iter_mut().zip(regs) {
            item.value = Operand::Reg(*reg);
        }
    }

    fn body(&mut self, cx: &mut Context<'a>) -> Result<(), CompileFailure> {
        let script = cx.script().clone();
        let targets = analysis::jump_targets(&script);
        let mut falls_through = true;
        for (pc, instr) in script.code.iter().enumerate() {
            let depth = script.stack_depths.get(pc).copied().unwrap_or(u32::MAX);
            if depth == u32::MAX {
                falls_through = false;
                continue;
            }
            self.location = (cx.script_index, script.line_at(pc));
            if targets[pc] || !falls_through {
                let regs = self.join_regs(cx, pc);
                if falls_through {
                    self.move_to_join(cx, &regs);
                }
                cx.stack = regs.iter().map(|r| Item::reg(*r)).collect();
            }
            cx.labels[pc] = Some(self.graph.ops.len());
            falls_through = !instr.op.is_terminator();
            self.lower(cx, pc, *instr)?;
        }
        for (index, pc) in std::mem::take(&mut cx.patches) {
            let target = cx
                .labels
                .get(pc)
                .copied()
                .flatten()
                .ok_or_else(|| CompileFailure::structural(format!("jump to unreachable pc {}", pc)))?;
            match &mut self.graph.ops[index] {
                MirOp::Jump { target: t } | MirOp::Branch { target: t, .. } => *t = target as u32,
                _ => {}
            }
        }
        Ok(())
    }

    fn jump(&mut self, cx: &mut Context, target: usize) {
        let regs = self.join_regs(cx, target);
        self.move_to_join(cx, &regs);
        cx.stack.clear();
        let index = self.emit(MirOp::Jump { target: 0 });
        cx.patches.push((index, target));
    }

    fn branch(&mut self, cx: &mut Context, target: usize, kind: BranchKind) -> Result<(), CompileFailure> {
        let cond = self.pop(cx)?;
        let regs = self.join_regs(cx, target);
        let cond = match cond.value {
            Operand::Reg(r) if regs.contains(&r) => {
                let t = self.temp();
                self.emit(MirOp::Move { dst: t, src: cond.value });
                Operand::Reg(t)
            }
            value => value,
        };
        self.move_to_join(cx, &regs);
        let index = self.emit(MirOp::Branch { cond, target: 0, kind });
        cx.patches.push((index, target));
        Ok(())
    }

    // ── Instructions ─────────────────────────────────────────

    fn lower(&mut self, cx: &mut Context<'a>, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let script = cx.script().clone();
        match instr.op {
            OpCode::Constant => {
                let value = script.constants[instr.operand as usize].clone();
                self.push(cx, Item::of(Operand::Const(value)));
            }
            OpCode::Int => self.push(cx, Item::of(Operand::Const(JsValue::from_i32(instr.operand as i32)))),
            OpCode::Undefined => self.push(cx, Item::of(Operand::Const(JsValue::Undefined))),
            OpCode::Null => self.push(cx, Item::of(Operand::Const(JsValue::Null))),
            OpCode::True => self.push(cx, Item::of(Operand::Const(JsValue::Boolean(true)))),
            OpCode::False => self.push(cx, Item::of(Operand::Const(JsValue::Boolean(false)))),
            OpCode::GetLocal => {
                let dst = self.temp();
                self.emit(MirOp::Move { dst, src: Operand::Reg(cx.local(instr.operand)) });
                let mut item = Item::reg(dst);
                item.float32 = cx.float32.locals.contains(&instr.operand);
                if cx.views.is_candidate(instr.operand) {
                    item.view = View::Object;
                }
                self.push(cx, item);
            }
            OpCode::SetLocal => {
                let top = cx
                    .stack
                    .last()
                    .ok_or_else(|| CompileFailure::structural("operand stack underflow"))?;
                let src = top.value.clone();
                self.emit(MirOp::Move { dst: cx.local(instr.operand), src });
            }
            OpCode::This => {
                let this = cx.this_reg();
                self.push(cx, Item::reg(this));
            }
            OpCode::Callee => {
                let callee = cx.callee_reg();
                self.push(cx, Item::reg(callee));
            }

            OpCode::Pop => {
                self.pop(cx)?;
            }
            OpCode::Dup => {
                let top = self.pop(cx)?;
                self.push(cx, top.clone());
                self.push(cx, top);
            }
            OpCode::Dup2 => {
                let pair = self.pop_n(cx, 2)?;
                cx.stack.extend(pair.iter().cloned());
                cx.stack.extend(pair);
            }
            OpCode::Swap | OpCode::Rot3 | OpCode::Rot4 => {
                let n = match instr.op {
                    OpCode::Swap => 2,
                    OpCode::Rot3 => 3,
                    _ => 4,
                };
                let mut items = self.pop_n(cx, n)?;
                if n == 2 {
                    items.swap(0, 1);
                } else {
                    items.rotate_right(1);
                }
                cx.stack.extend(items);
            }

            OpCode::GetName => self.get_name(cx, pc, instr)?,
            OpCode::GetProp => self.get_prop(cx, pc, instr)?,
            OpCode::SetProp => self.set_prop(cx, pc, instr)?,
            OpCode::GetElem => self.get_elem(cx, pc, instr)?,
            OpCode::SetElem => self.set_elem(cx, pc, instr)?,

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
            | OpCode::UShr => self.binary(cx, pc, instr)?,
            OpCode::Neg | OpCode::Pos | OpCode::BitNot | OpCode::Inc | OpCode::Dec => self.unary(cx, pc, instr)?,
            OpCode::Not => {
                let src = self.pop(cx)?;
                let dst = self.temp();
                self.emit(MirOp::Not { dst, src: src.value });
                self.push(cx, Item::reg(dst));
            }
            OpCode::Eq
            | OpCode::Ne
            | OpCode::StrictEq
            | OpCode::StrictNe
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge => self.compare(cx, pc, instr)?,

            OpCode::Jump => self.jump(cx, instr.operand as usize),
            OpCode::JumpIfFalse => self.branch(cx, instr.operand as usize, BranchKind::IfFalse)?,
            OpCode::JumpIfTrue => self.branch(cx, instr.operand as usize, BranchKind::IfTrue)?,
            OpCode::JumpIfNotNullish => self.branch(cx, instr.operand as usize, BranchKind::IfNotNullish)?,
            OpCode::LoopHead => {
                let rp = self.resume_point(cx, pc);
                let index = self.emit(MirOp::LoopHead { rp });
                if cx.depth == 0 && cx.stack.is_empty() {
                    self.graph.osr_entries.push(OsrEntry { pc: pc as u32, mir_index: index as u32 });
                }
            }

            OpCode::Call => self.call(cx, pc, instr)?,
            OpCode::New => {
                let args = self.pop_n(cx, instr.operand as usize)?;
                let callee = self.pop(cx)?;
                let dst = self.temp();
                self.emit(MirOp::Call {
                    dst,
                    callee: callee.value,
                    this: Operand::Const(JsValue::Undefined),
                    args: args.into_iter().map(|a| a.value).collect(),
                    construct: true,
                });
                self.push(cx, Item::reg(dst));
                self.check_invalidated(cx, pc);
            }
            OpCode::Return => {
                let value = self.pop(cx)?;
                match cx.ret {
                    Some(ret) => {
                        self.emit(MirOp::Move { dst: ret, src: value.value });
                        let index = self.emit(MirOp::Jump { target: 0 });
                        cx.exits.push(index);
                    }
                    None => {
                        self.emit(MirOp::Return { value: value.value });
                    }
                }
                cx.stack.clear();
            }
            OpCode::Throw => {
                let value = self.pop(cx)?;
                self.emit(MirOp::Throw { value: value.value });
                cx.stack.clear();
            }
            OpCode::Debugger => return Err(CompileFailure::structural("debugger statement")),
            _ => self.generic(cx, pc, instr)?,
        }
        Ok(())
    }

    /// Runs the instruction through the shared runtime.
    fn generic(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let (pops, pushes) = instr.stack_effect();
        if pushes > 1 {
            return Err(CompileFailure::structural(format!("cannot compile {:?}", instr.op)));
        }
        let inputs = self.pop_n(cx, pops as usize)?;
        let dst = (pushes == 1).then(|| self.temp());
        self.emit(MirOp::Generic {
            dst,
            instr,
            script: cx.script_index,
            inputs: inputs.into_iter().map(|i| i.value).collect(),
        });
        if let Some(dst) = dst {
            self.push(cx, Item::reg(dst));
        }
        let pure = matches!(
            instr.op,
            OpCode::TypeOf | OpCode::StrictEq | OpCode::StrictNe | OpCode::Closure | OpCode::NewObject | OpCode::NewArray
        );
        if !pure && !instr.op.is_terminator() {
            self.check_invalidated(cx, pc);
        }
        Ok(())
    }

    fn get_name(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let name = cx.script().name_at(instr.operand).clone();
        let stub = analysis::mono_stub(&cx.snapshot.ics, instr).cloned();
        let Some(stub) = stub else {
            return self.generic(cx, pc, instr);
        };
        match (stub.guard, &stub.handler) {
            (IcGuard::GlobalConstant { generation, .. }, IcHandler::LoadGlobalConstant { value, .. })
                if generation == self.input.global_generation =>
            {
                if let JsValue::Object(id) = value {
                    self.graph.object_refs.push(*id);
                }
                self.graph.deps.global_constants.push(name);
                self.push(cx, Item::of(Operand::Const(value.clone())));
            }
            (
                IcGuard::GlobalConstant { shape, lexical_epoch, .. } | IcGuard::Global { shape, lexical_epoch },
                IcHandler::LoadGlobalSlot { slot } | IcHandler::LoadGlobalConstant { slot, .. },
            ) => {
                let rp = self.resume_point(cx, pc);
                self.emit(MirOp::GuardGlobal { shape, lexical_epoch, rp });
                let dst = self.temp();
                self.emit(MirOp::LoadGlobalSlot { dst, slot: *slot });
                self.push(cx, Item::reg(dst));
            }
            (_, IcHandler::LoadGlobalLexical { index }) => {
                let rp = self.resume_point(cx, pc);
                let dst = self.temp();
                self.emit(MirOp::LoadLexical { dst, index: *index, rp });
                self.push(cx, Item::reg(dst));
            }
            _ => return self.generic(cx, pc, instr),
        }
        Ok(())
    }

    fn get_prop(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let name = cx.script().name_at(instr.operand).clone();
        let receiver_view = cx.stack.last().map(|i| i.view);
        if receiver_view == Some(View::Object) {
            let object = self.pop(cx)?;
            let dst = self.temp();
            self.emit(MirOp::VirtualProp { dst, object: object.value, name: name.clone() });
            let mut item = Item::reg(dst);
            if let Some(method) = ViewMethod::from_name(&name) {
                item.view = View::Method(method);
            }
            self.uses_views = true;
            self.push(cx, item);
            return Ok(());
        }
        let stub = analysis::mono_stub(&cx.snapshot.ics, instr).cloned();
        let Some(stub) = stub else {
            return self.generic(cx, pc, instr);
        };
        let rp = self.resume_point(cx, pc);
        let object = match (&stub.guard, &stub.handler) {
            (IcGuard::Shape(_), IcHandler::LoadSlot { .. })
            | (IcGuard::Shape(_), IcHandler::LoadProtoSlot { .. })
            | (IcGuard::Shape(_), IcHandler::ArrayLength)
            | (IcGuard::Shape(_), IcHandler::TypedArrayLength)
            | (IcGuard::Type(TypeTag::String), IcHandler::StringLength) => self.pop(cx)?.value,
            _ => return self.generic(cx, pc, instr),
        };
        let dst = self.temp();
        match (stub.guard, stub.handler) {
            (IcGuard::Type(tag), IcHandler::StringLength) => {
                self.emit(MirOp::GuardType { value: object.clone(), tag, rp });
                self.emit(MirOp::StringLength { dst, value: object });
            }
            (IcGuard::Shape(shape), handler) => {
                self.emit(MirOp::GuardShape { value: object.clone(), shape, rp });
                let op = match handler {
                    IcHandler::LoadSlot { slot } => MirOp::LoadSlot { dst, object, slot },
                    IcHandler::LoadProtoSlot { holder, holder_shape, slot } => {
                        self.graph.object_refs.push(holder);
                        MirOp::LoadProtoSlot { dst, object, holder, holder_shape, slot, name, rp }
                    }
                    IcHandler::ArrayLength => MirOp::ArrayLength { dst, object, rp },
                    _ => MirOp::TypedArrayLength { dst, object, rp },
                };
                self.emit(op);
            }
            _ => {}
        }
        self.push(cx, Item::reg(dst));
        Ok(())
    }

    fn set_prop(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let name = cx.script().name_at(instr.operand).clone();
        let stub = analysis::mono_stub(&cx.snapshot.ics, instr).cloned();
        let specialized = match stub {
            Some(stub) => match (stub.guard, stub.handler) {
                (IcGuard::Shape(shape), IcHandler::StoreSlot { slot }) => Some((shape, Err(slot))),
                (IcGuard::Shape(shape), IcHandler::AddSlot { new_shape }) => Some((shape, Ok(new_shape))),
                _ => None,
            },
            None => None,
        };
        let Some((shape, store)) = specialized else {
            return self.generic(cx, pc, instr);
        };
        let rp = self.resume_point(cx, pc);
        let value = self.pop(cx)?;
        let object = self.pop(cx)?;
        self.emit(MirOp::GuardShape { value: object.value.clone(), shape, rp });
        match store {
            Err(slot) => {
                self.emit(MirOp::StoreSlot { object: object.value, slot, value: value.value.clone(), rp });
            }
            Ok(new_shape) => {
                self.emit(MirOp::AddSlot { object: object.value, new_shape, name, value: value.value.clone(), rp });
            }
        }
        self.push(cx, Item::of(value.value));
        Ok(())
    }

    fn get_elem(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let receiver_view = cx.stack.len().checked_sub(2).map(|i| cx.stack[i].view);
        if receiver_view == Some(View::Object) {
            let index = self.pop(cx)?;
            let object = self.pop(cx)?;
            let dst = self.temp();
            self.emit(MirOp::VirtualGetElem { dst, object: object.value, index: index.value });
            self.uses_views = true;
            self.push(cx, Item::reg(dst));
            return Ok(());
        }
        let stub = analysis::mono_stub(&cx.snapshot.ics, instr).cloned();
        let plan = match stub {
            Some(stub) => match (stub.guard, stub.handler) {
                (IcGuard::Shape(shape), IcHandler::LoadDenseElement) => Some((shape, None)),
                (IcGuard::Shape(shape), IcHandler::LoadTypedArrayElement { kind }) => Some((shape, Some(kind))),
                _ => None,
            },
            None => None,
        };
        let Some((shape, kind)) = plan else {
            return self.generic(cx, pc, instr);
        };
        let rp = self.resume_point(cx, pc);
        let index = self.pop(cx)?;
        let object = self.pop(cx)?;
        self.emit(MirOp::GuardShape { value: object.value.clone(), shape, rp });
        let dst = self.temp();
        let op = match kind {
            Some(kind) => MirOp::LoadTyped { dst, object: object.value, index: index.value, kind, rp },
            None => MirOp::LoadDense { dst, object: object.value, index: index.value, rp },
        };
        self.emit(op);
        let mut item = Item::reg(dst);
        item.float32 = cx.float32.producers.contains(&pc);
        self.push(cx, item);
        Ok(())
    }

    fn set_elem(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let receiver_view = cx.stack.len().checked_sub(3).map(|i| cx.stack[i].view);
        if receiver_view == Some(View::Object) {
            let value = self.pop(cx)?;
            let index = self.pop(cx)?;
            let object = self.pop(cx)?;
            self.emit(MirOp::VirtualSetElem { object: object.value, index: index.value, value: value.value.clone() });
            self.uses_views = true;
            self.push(cx, Item::of(value.value));
            return Ok(());
        }
        let stubs = analysis::stubs(&cx.snapshot.ics, instr);
        let shape = match stubs.first() {
            Some(stub) => match stub.guard {
                IcGuard::Shape(shape) => Some(shape),
                _ => None,
            },
            None => None,
        };
        let dense = match shape {
            Some(shape) => stubs.iter().all(|s| {
                s.guard == IcGuard::Shape(shape)
                    && matches!(s.handler, IcHandler::StoreDenseElement | IcHandler::AppendDenseElement)
            }),
            None => false,
        };
        let append = stubs.iter().any(|s| matches!(s.handler, IcHandler::AppendDenseElement));
        let typed = match stubs {
            [stub] => match (stub.guard, &stub.handler) {
                (IcGuard::Shape(shape), IcHandler::StoreTypedArrayElement { kind }) => Some((shape, *kind)),
                _ => None,
            },
            _ => None,
        };
        let Some(shape) = shape.filter(|_| dense || typed.is_some()) else {
            return self.generic(cx, pc, instr);
        };
        let rp = self.resume_point(cx, pc);
        let value = self.pop(cx)?;
        let index = self.pop(cx)?;
        let object = self.pop(cx)?;
        self.emit(MirOp::GuardShape { value: object.value.clone(), shape, rp });
        let op = match typed {
            Some((_, kind)) => MirOp::StoreTyped {
                object: object.value,
                index: index.value,
                value: value.value.clone(),
                kind,
                rp,
            },
            None => MirOp::StoreDense { object: object.value, index: index.value, value: value.value.clone(), append, rp },
        };
        self.emit(op);
        self.push(cx, Item::of(value.value));
        Ok(())
    }

    // ── Arithmetic ───────────────────────────────────────────

    fn binary(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let op = instr.op;
        if cx.float32.specialized.contains(&pc) {
            let rp = self.resume_point(cx, pc);
            let rhs = self.pop(cx)?;
            let lhs = self.pop(cx)?;
            self.emit(MirOp::GuardNumber { value: lhs.value.clone(), rp });
            self.emit(MirOp::GuardNumber { value: rhs.value.clone(), rp });
            let dst = self.temp();
            self.emit(MirOp::Float32Binary { dst, op, lhs: lhs.value.clone(), rhs: rhs.value.clone() });
            self.graph.recovers.push(RecoverOp::Binary { op, lhs: lhs.resume_value(), rhs: rhs.resume_value() });
            let recover = (self.graph.recovers.len() - 1) as u32;
            self.push(
                cx,
                Item { value: Operand::Reg(dst), resume: Some(Operand::Recover(recover)), float32: true, view: View::None },
            );
            return Ok(());
        }
        let stubs = analysis::stubs(&cx.snapshot.ics, instr);
        let int32 = !stubs.is_empty() && stubs.iter().all(|s| matches!(s.handler, IcHandler::Int32Arith));
        let number = !stubs.is_empty()
            && stubs
                .iter()
                .all(|s| matches!(s.handler, IcHandler::Int32Arith | IcHandler::DoubleArith));
        if !number {
            return self.generic(cx, pc, instr);
        }
        let rp = self.resume_point(cx, pc);
        let rhs = self.pop(cx)?;
        let lhs = self.pop(cx)?;
        let dst = self.temp();
        if int32 && INT32_OPS.contains(&op) {
            self.emit(MirOp::GuardType { value: lhs.value.clone(), tag: TypeTag::Int32, rp });
            self.emit(MirOp::GuardType { value: rhs.value.clone(), tag: TypeTag::Int32, rp });
            self.emit(MirOp::Int32Binary { dst, op, lhs: lhs.value, rhs: rhs.value, rp });
        } else {
            self.emit(MirOp::GuardNumber { value: lhs.value.clone(), rp });
            self.emit(MirOp::GuardNumber { value: rhs.value.clone(), rp });
            self.emit(MirOp::DoubleBinary { dst, op, lhs: lhs.value, rhs: rhs.value });
        }
        self.push(cx, Item::reg(dst));
        Ok(())
    }

    fn unary(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let stubs = analysis::stubs(&cx.snapshot.ics, instr);
        let number = !stubs.is_empty()
            && stubs
                .iter()
                .all(|s| matches!(s.handler, IcHandler::Int32Unary | IcHandler::DoubleUnary));
        if !number {
            return self.generic(cx, pc, instr);
        }
        let rp = self.resume_point(cx, pc);
        let src = self.pop(cx)?;
        self.emit(MirOp::GuardNumber { value: src.value.clone(), rp });
        let dst = self.temp();
        self.emit(MirOp::NumberUnary { dst, op: instr.op, src: src.value });
        self.push(cx, Item::reg(dst));
        Ok(())
    }

    fn compare(&mut self, cx: &mut Context, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let stubs = analysis::stubs(&cx.snapshot.ics, instr);
        let numbers = !stubs.is_empty()
            && stubs
                .iter()
                .all(|s| matches!(s.handler, IcHandler::Int32Compare | IcHandler::DoubleCompare));
        let strings = !stubs.is_empty() && stubs.iter().all(|s| matches!(s.handler, IcHandler::StringCompare));
        if !numbers && !strings {
            return self.generic(cx, pc, instr);
        }
        let rp = self.resume_point(cx, pc);
        let rhs = self.pop(cx)?;
        let lhs = self.pop(cx)?;
        let dst = self.temp();
        let op = instr.op;
        if numbers {
            self.emit(MirOp::GuardNumber { value: lhs.value.clone(), rp });
            self.emit(MirOp::GuardNumber { value: rhs.value.clone(), rp });
            self.emit(MirOp::CompareNumbers { dst, op, lhs: lhs.value, rhs: rhs.value });
        } else {
            self.emit(MirOp::GuardType { value: lhs.value.clone(), tag: TypeTag::String, rp });
            self.emit(MirOp::GuardType { value: rhs.value.clone(), tag: TypeTag::String, rp });
            self.emit(MirOp::CompareStrings { dst, op, lhs: lhs.value, rhs: rhs.value });
        }
        self.push(cx, Item::reg(dst));
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────

    fn report(&mut self, cx: &Context, pc: usize, kind: AssertionKind, args: &[Item], actual: bool) {
        let expected = match args.get(1).map(|a| &a.value) {
            Some(Operand::Const(v)) => to_boolean(v),
            _ => true,
        };
        let line = cx.script().line_at(pc);
        self.graph.report.entries.push(AssertionOutcome { line, kind, expected, actual });
    }

    fn call(&mut self, cx: &mut Context<'a>, pc: usize, instr: Instruction) -> Result<(), CompileFailure> {
        let argc = instr.operand as usize;
        let rp = self.resume_point(cx, pc);
        let (callee_view, this_view) = {
            let n = cx.stack.len();
            if n < argc + 2 {
                return Err(CompileFailure::structural("operand stack underflow"));
            }
            (cx.stack[n - argc - 2].view, cx.stack[n - argc - 1].view)
        };

        if let (View::Method(method), View::Object) = (callee_view, this_view) {
            let args = self.pop_n(cx, argc)?;
            let this = self.pop(cx)?;
            let callee = self.pop(cx)?;
            let args: Vec<Operand> = args.into_iter().map(|a| a.value).collect();
            let dst = self.temp();
            let mut item = Item::reg(dst);
            let op = match method {
                ViewMethod::Fill => MirOp::VirtualFill { dst, callee: callee.value, object: this.value, args, rp },
                ViewMethod::Set => MirOp::VirtualSet { dst, callee: callee.value, object: this.value, args, rp },
                ViewMethod::Subarray => {
                    item.view = View::Object;
                    MirOp::VirtualSubarray { dst, callee: callee.value, base: this.value, args, rp }
                }
            };
            self.emit(op);
            self.uses_views = true;
            self.push(cx, item);
            return Ok(());
        }

        if let Some((expected, intrinsic)) = native_intrinsic(&cx.snapshot.ics, instr) {
            if self.native_call(cx, pc, argc, expected, intrinsic, rp)? {
                return Ok(());
            }
        }

        let snapshot: &'a ScriptSnapshot = cx.snapshot;
        let input: &'a MirInput = self.input;
        if let Some(stub) = analysis::mono_stub(&snapshot.ics, instr) {
            if let (IcGuard::Callee(expected), IcHandler::CallInlinedFunction { template }) = (&stub.guard, &stub.handler)
            {
                let callee = input.callees.get(&template.id);
                if let Some(callee) = callee.filter(|c| self.can_inline(cx, c)) {
                    return self.inline(cx, pc, argc, *expected, template.clone(), callee, rp);
                }
            }
        }

        let args = self.pop_n(cx, argc)?;
        let this = self.pop(cx)?;
        let callee = self.pop(cx)?;
        let dst = self.temp();
        self.emit(MirOp::Call {
            dst,
            callee: callee.value,
            this: this.value,
            args: args.into_iter().map(|a| a.value).collect(),
            construct: false,
        });
        self.push(cx, Item::reg(dst));
        self.check_invalidated(cx, pc);
        Ok(())
    }

    /// Lowers calls to builtins the optimizer understands. Returns false
    /// when the call should be compiled as an ordinary call.
    fn native_call(
        &mut self,
        cx: &mut Context,
        pc: usize,
        argc: usize,
        expected: ObjectId,
        intrinsic: Intrinsic,
        rp: u32,
    ) -> Result<bool, CompileFailure> {
        let math = matches!(
            intrinsic,
            Intrinsic::MathAbs
                | Intrinsic::MathFloor
                | Intrinsic::MathCeil
                | Intrinsic::MathTrunc
                | Intrinsic::MathSqrt
                | Intrinsic::MathFround
                | Intrinsic::MathF16Round
                | Intrinsic::MathMin
                | Intrinsic::MathMax
        );
        let view_def = intrinsic == Intrinsic::TypedArraySubarray && cx.views.def_sites.contains(&pc);
        let handled = math
            || view_def
            || matches!(
                intrinsic,
                Intrinsic::AssertFloat32 | Intrinsic::AssertRecoveredOnBailout | Intrinsic::Bailout
            );
        if !handled {
            return Ok(false);
        }
        let args = self.pop_n(cx, argc)?;
        let this = self.pop(cx)?;
        let callee = self.pop(cx)?;
        self.emit(MirOp::GuardCallee { value: callee.value.clone(), expected, rp });
        self.graph.object_refs.push(expected);

        let item = match intrinsic {
            Intrinsic::AssertFloat32 => {
                let actual = args.first().map(|a| a.float32).unwrap_or(false);
                self.report(cx, pc, AssertionKind::Float32, &args, actual);
                Item::of(Operand::Const(JsValue::Undefined))
            }
            Intrinsic::AssertRecoveredOnBailout => {
                let actual = args.first().map(|a| a.view == View::Object).unwrap_or(false);
                self.report(cx, pc, AssertionKind::RecoveredOnBailout, &args, actual);
                Item::of(Operand::Const(JsValue::Undefined))
            }
            Intrinsic::Bailout => {
                self.emit(MirOp::Bailout { rp });
                Item::of(Operand::Const(JsValue::Undefined))
            }
            Intrinsic::TypedArraySubarray => {
                let dst = self.temp();
                self.emit(MirOp::VirtualSubarray {
                    dst,
                    callee: callee.value,
                    base: this.value,
                    args: args.into_iter().map(|a| a.value).collect(),
                    rp,
                });
                self.uses_views = true;
                let mut item = Item::reg(dst);
                item.view = View::Object;
                item
            }
            _ => {
                let specialized = cx.float32.specialized.contains(&pc);
                let dst = self.temp();
                let arg0 = args.first().map(Item::resume_value).unwrap_or(Operand::Const(JsValue::Undefined));
                self.emit(MirOp::MathIntrinsic {
                    dst,
                    intrinsic,
                    args: args.into_iter().map(|a| a.value).collect(),
                    float32: specialized,
                });
                let mut item = Item::reg(dst);
                item.float32 = specialized || cx.float32.producers.contains(&pc);
                if specialized {
                    self.graph.recovers.push(RecoverOp::Math { intrinsic, arg: arg0 });
                    item.resume = Some(Operand::Recover((self.graph.recovers.len() - 1) as u32));
                }
                item
            }
        };
        self.push(cx, item);
        Ok(true)
    }

    fn can_inline(&self, cx: &Context, callee: &ScriptSnapshot) -> bool {
        let script = &callee.script;
        cx.depth < self.input.options.max_inline_depth
            && !script.has_handlers()
            && !script.has_debugger
            && script.code.len() <= self.input.options.ion_max_script_length
    }

    #[allow(clippy::too_many_arguments)]
    fn inline(
        &mut self,
        cx: &mut Context<'a>,
        pc: usize,
        argc: usize,
        expected: ObjectId,
        template: Arc<FunctionTemplate>,
        snapshot: &'a ScriptSnapshot,
        rp: u32,
    ) -> Result<(), CompileFailure> {
        let args = self.pop_n(cx, argc)?;
        let this = self.pop(cx)?;
        let callee = self.pop(cx)?;
        self.emit(MirOp::GuardCallee { value: callee.value.clone(), expected, rp });
        self.graph.object_refs.push(expected);

        let script = snapshot.script.clone();
        let script_index = self.graph.scripts.len() as u32;
        self.graph.scripts.push((snapshot.script_id, script.clone()));
        let local_base = self.next_reg;
        self.next_reg += script.local_count + 2;

        let mut outer = cx.outer.clone();
        outer.push(self.frame_state(cx, pc + 1));
        let mut inner = Context::new(snapshot, script_index, local_base, outer, cx.depth + 1, self.input.species_intact);

        self.emit(MirOp::Move { dst: inner.callee_reg(), src: callee.value });
        if script.strict {
            self.emit(MirOp::Move { dst: inner.this_reg(), src: this.value });
        } else {
            self.emit(MirOp::CoerceThis { dst: inner.this_reg(), src: this.value });
        }
        for n in 0..script.local_count {
            let src = match args.get(n as usize) {
                Some(arg) if n < script.param_count => arg.value.clone(),
                _ => Operand::Const(JsValue::Undefined),
            };
            self.emit(MirOp::Move { dst: inner.local(n), src });
        }
        let ret = self.temp();
        inner.ret = Some(ret);

        tracing::trace!(callee = %template.display_name(), depth = inner.depth, "inlining call");
        self.body(&mut inner)?;
        let end = self.graph.ops.len() as u32;
        for exit in inner.exits {
            if let MirOp::Jump { target } = &mut self.graph.ops[exit] {
                *target = end;
            }
        }
        self.graph.inlined_calls += 1;
        self.location = (cx.script_index, cx.script().line_at(pc));
        self.push(cx, Item::reg(ret));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::config::EngineOptions;
    use crate::runner::ds::shape::ShapeId;
    use crate::runner::jit::compiler::compile_script;
    use crate::runner::jit::ic::IcSlot;
    use crate::runner::jit::tiering::ScriptId;

    fn input(source: &str, feedback: impl Fn(&Script, &mut Vec<IcSlot>)) -> MirInput {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("builder.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut ics: Vec<IcSlot> = script.ic_sites.iter().map(|s| IcSlot::new(s.kind, s.pc)).collect();
        feedback(&script, &mut ics);
        MirInput {
            code_id: 1,
            epoch: 0,
            root: ScriptSnapshot { script_id: ScriptId(0), script, ics },
            callees: HashMap::new(),
            species_intact: true,
            global_generation: 0,
            options: EngineOptions::default(),
        }
    }

    fn names(graph: &MirGraph) -> Vec<&'static str> {
        graph.ops.iter().map(|op| op.name()).collect()
    }

    #[test]
    fn unspecialized_arithmetic_is_generic() {
        let input = input("var a = 1; a + 2;", |_, _| {});
        let graph = build(&input).unwrap();
        assert!(graph
            .ops
            .iter()
            .any(|op| matches!(op, MirOp::Generic { instr, .. } if instr.op == OpCode::Add)));
    }

    #[test]
    fn int32_feedback_guards_both_operands() {
        let input = input("var a = 1; a + 2;", |script, ics| {
            for instr in &script.code {
                if instr.op == OpCode::Add {
                    ics[instr.operand2 as usize].attach(
                        IcGuard::Types(TypeTag::Int32, TypeTag::Int32),
                        IcHandler::Int32Arith,
                        6,
                    );
                }
            }
        });
        let graph = build(&input).unwrap();
        let ops = names(&graph);
        let add = ops.iter().position(|n| *n == "Int32Binary").unwrap();
        assert_eq!(&ops[add - 2..add], &["GuardType", "GuardType"]);
        assert!(graph.ops[add].resume_point().is_some());
    }

    #[test]
    fn shape_feedback_loads_slots_directly() {
        let input = input("var o = {x: 1}; o.x;", |script, ics| {
            for instr in &script.code {
                if instr.op == OpCode::GetProp {
                    ics[instr.operand2 as usize].attach(IcGuard::Shape(ShapeId(3)), IcHandler::LoadSlot { slot: 0 }, 6);
                }
            }
        });
        let graph = build(&input).unwrap();
        let ops = names(&graph);
        let load = ops.iter().position(|n| *n == "LoadSlot").unwrap();
        assert_eq!(ops[load - 1], "GuardShape");
    }

    #[test]
    fn jumps_are_patched_to_labels() {
        let input = input("var i = 0; while (i < 3) { i = i + 1; }", |_, _| {});
        let graph = build(&input).unwrap();
        for op in &graph.ops {
            if let MirOp::Jump { target } | MirOp::Branch { target, .. } = op {
                assert!((*target as usize) <= graph.ops.len());
            }
        }
        assert_eq!(graph.osr_entries.len(), 1);
        let entry = graph.osr_entries[0];
        assert!(matches!(graph.ops[entry.mir_index as usize], MirOp::LoopHead { .. }));
    }

    #[test]
    fn conditional_values_meet_in_join_registers() {
        let input = input("var c = true; var r = c ? 1 : 2; r;", |_, _| {});
        let graph = build(&input).unwrap();
        let moves_of_consts = graph
            .ops
            .iter()
            .filter(|op| matches!(op, MirOp::Move { src: Operand::Const(_), .. }))
            .count();
        assert!(moves_of_consts >= 2);
    }

    #[test]
    fn resume_points_capture_the_operand_stack() {
        let input = input("var o = {x: 1}; 5 + o.x;", |script, ics| {
            for instr in &script.code {
                if instr.op == OpCode::GetProp {
                    ics[instr.operand2 as usize].attach(IcGuard::Shape(ShapeId(3)), IcHandler::LoadSlot { slot: 0 }, 6);
                }
            }
        });
        let graph = build(&input).unwrap();
        let guard = graph.ops.iter().find(|op| matches!(op, MirOp::GuardShape { .. })).unwrap();
        let rp = &graph.resume_points[guard.resume_point().unwrap() as usize];
        assert_eq!(rp.frames.len(), 1);
        let frame = &rp.frames[0];
        assert_eq!(frame.stack.first(), Some(&Operand::Const(JsValue::from_i32(5))));
        assert_eq!(frame.stack.len(), 2);
    }
}
