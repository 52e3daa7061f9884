//! The optimizer's intermediate representation.
//!
//! MIR is a linear list of register instructions. Registers `0..L` of the
//! outermost script hold its locals, followed by `this` and the callee;
//! every inlined body gets its own block of registers laid out the same way,
//! and the remaining registers are temporaries for values that live on the
//! bytecode operand stack.
//!
//! Every instruction that may bail out names a resume point: the bytecode
//! state (one frame per inlining level, outermost first) that the
//! interpreter tiers continue from.

use std::fmt;
use std::sync::Arc;

use crate::runner::ds::object::{Intrinsic, ObjectId, TypedArrayKind};
use crate::runner::ds::shape::ShapeId;
use crate::runner::ds::value::{JsValue, TypeTag};
use crate::runner::jit::bytecode::{Instruction, OpCode, Script};
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::opt::OptimizationReport;
use crate::runner::jit::tiering::ScriptId;

pub type Reg = u32;

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Const(JsValue),
    /// Only found in resume points: the value is recomputed from
    /// `MirGraph::recovers[index]` when bailing out.
    Recover(u32),
}

/// How to rebuild a value whose register holds a specialized form.
#[derive(Clone, Debug)]
pub enum RecoverOp {
    /// The double result of `lhs op rhs`.
    Binary { op: OpCode, lhs: Operand, rhs: Operand },
    /// The double result of a unary `Math` function.
    Math { intrinsic: Intrinsic, arg: Operand },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    IfFalse,
    IfTrue,
    IfNotNullish,
}

#[derive(Clone, Debug)]
pub enum MirOp {
    Move { dst: Reg, src: Operand },
    /// `this` of a sloppy-mode function: nullish becomes the global object.
    CoerceThis { dst: Reg, src: Operand },

    // ── Guards ───────────────────────────────────────────────
    GuardShape { value: Operand, shape: ShapeId, rp: u32 },
    GuardType { value: Operand, tag: TypeTag, rp: u32 },
    GuardNumber { value: Operand, rp: u32 },
    GuardCallee { value: Operand, expected: ObjectId, rp: u32 },
    GuardGlobal { shape: ShapeId, lexical_epoch: u64, rp: u32 },

    // ── Properties and elements ──────────────────────────────
    LoadSlot { dst: Reg, object: Operand, slot: u32 },
    /// Revalidates the holder on every execution.
    LoadProtoSlot { dst: Reg, object: Operand, holder: ObjectId, holder_shape: ShapeId, slot: u32, name: Arc<str>, rp: u32 },
    StoreSlot { object: Operand, slot: u32, value: Operand, rp: u32 },
    AddSlot { object: Operand, new_shape: ShapeId, name: Arc<str>, value: Operand, rp: u32 },
    ArrayLength { dst: Reg, object: Operand, rp: u32 },
    TypedArrayLength { dst: Reg, object: Operand, rp: u32 },
    StringLength { dst: Reg, value: Operand },
    LoadDense { dst: Reg, object: Operand, index: Operand, rp: u32 },
    StoreDense { object: Operand, index: Operand, value: Operand, append: bool, rp: u32 },
    LoadTyped { dst: Reg, object: Operand, index: Operand, kind: TypedArrayKind, rp: u32 },
    StoreTyped { object: Operand, index: Operand, value: Operand, kind: TypedArrayKind, rp: u32 },
    LoadGlobalSlot { dst: Reg, slot: u32 },
    LoadLexical { dst: Reg, index: u32, rp: u32 },

    // ── Arithmetic ───────────────────────────────────────────
    /// Bails out when an add, subtract or multiply leaves the int32 range.
    Int32Binary { dst: Reg, op: OpCode, lhs: Operand, rhs: Operand, rp: u32 },
    DoubleBinary { dst: Reg, op: OpCode, lhs: Operand, rhs: Operand },
    /// Computes in single precision. Inputs are already float32 values.
    Float32Binary { dst: Reg, op: OpCode, lhs: Operand, rhs: Operand },
    NumberUnary { dst: Reg, op: OpCode, src: Operand },
    CompareNumbers { dst: Reg, op: OpCode, lhs: Operand, rhs: Operand },
    CompareStrings { dst: Reg, op: OpCode, lhs: Operand, rhs: Operand },
    Not { dst: Reg, src: Operand },
    MathIntrinsic { dst: Reg, intrinsic: Intrinsic, args: Vec<Operand>, float32: bool },

    // ── Scalar-replaced typed array views ────────────────────
    /// `base.subarray(args)` without allocating; the species fuse is
    /// checked on every execution.
    VirtualSubarray { dst: Reg, callee: Operand, base: Operand, args: Vec<Operand>, rp: u32 },
    VirtualProp { dst: Reg, object: Operand, name: Arc<str> },
    VirtualGetElem { dst: Reg, object: Operand, index: Operand },
    VirtualSetElem { object: Operand, index: Operand, value: Operand },
    /// Bails out unless `callee` is the builtin `fill`.
    VirtualFill { dst: Reg, callee: Operand, object: Operand, args: Vec<Operand>, rp: u32 },
    /// Bails out unless `callee` is the builtin `set`.
    VirtualSet { dst: Reg, callee: Operand, object: Operand, args: Vec<Operand>, rp: u32 },

    // ── Calls and fallbacks ──────────────────────────────────
    /// Scripted callees get a frame of their own; the result lands in `dst`
    /// when it returns.
    Call { dst: Reg, callee: Operand, this: Operand, args: Vec<Operand>, construct: bool },
    /// Runs one bytecode instruction through the shared runtime, IC
    /// included. `script` indexes `MirGraph::scripts`.
    Generic { dst: Option<Reg>, instr: Instruction, script: u32, inputs: Vec<Operand> },
    CheckInvalidated { rp: u32 },
    Bailout { rp: u32 },
    LoopHead { rp: u32 },

    // ── Control flow ─────────────────────────────────────────
    Jump { target: u32 },
    Branch { cond: Operand, target: u32, kind: BranchKind },
    Return { value: Operand },
    Throw { value: Operand },
}

impl MirOp {
    pub fn name(&self) -> &'static str {
        match self {
            MirOp::Move { .. } => "Move",
            MirOp::CoerceThis { .. } => "CoerceThis",
            MirOp::GuardShape { .. } => "GuardShape",
            MirOp::GuardType { .. } => "GuardType",
            MirOp::GuardNumber { .. } => "GuardNumber",
            MirOp::GuardCallee { .. } => "GuardCallee",
            MirOp::GuardGlobal { .. } => "GuardGlobal",
            MirOp::LoadSlot { .. } => "LoadSlot",
            MirOp::LoadProtoSlot { .. } => "LoadProtoSlot",
            MirOp::StoreSlot { .. } => "StoreSlot",
            MirOp::AddSlot { .. } => "AddSlot",
            MirOp::ArrayLength { .. } => "ArrayLength",
            MirOp::TypedArrayLength { .. } => "TypedArrayLength",
            MirOp::StringLength { .. } => "StringLength",
            MirOp::LoadDense { .. } => "LoadDense",
            MirOp::StoreDense { .. } => "StoreDense",
            MirOp::LoadTyped { .. } => "LoadTyped",
            MirOp::StoreTyped { .. } => "StoreTyped",
            MirOp::LoadGlobalSlot { .. } => "LoadGlobalSlot",
            MirOp::LoadLexical { .. } => "LoadLexical",
            MirOp::Int32Binary { .. } => "Int32Binary",
            MirOp::DoubleBinary { .. } => "DoubleBinary",
            MirOp::Float32Binary { .. } => "Float32Binary",
            MirOp::NumberUnary { .. } => "NumberUnary",
            MirOp::CompareNumbers { .. } => "CompareNumbers",
            MirOp::CompareStrings { .. } => "CompareStrings",
            MirOp::Not { .. } => "Not",
            MirOp::MathIntrinsic { .. } => "MathIntrinsic",
            MirOp::VirtualSubarray { .. } => "VirtualSubarray",
            MirOp::VirtualProp { .. } => "VirtualProp",
            MirOp::VirtualGetElem { .. } => "VirtualGetElem",
            MirOp::VirtualSetElem { .. } => "VirtualSetElem",
            MirOp::VirtualFill { .. } => "VirtualFill",
            MirOp::VirtualSet { .. } => "VirtualSet",
            MirOp::Call { .. } => "Call",
            MirOp::Generic { .. } => "Generic",
            MirOp::CheckInvalidated { .. } => "CheckInvalidated",
            MirOp::Bailout { .. } => "Bailout",
            MirOp::LoopHead { .. } => "LoopHead",
            MirOp::Jump { .. } => "Jump",
            MirOp::Branch { .. } => "Branch",
            MirOp::Return { .. } => "Return",
            MirOp::Throw { .. } => "Throw",
        }
    }

    /// Resume point used when this instruction bails out.
    pub fn resume_point(&self) -> Option<u32> {
        match self {
            MirOp::GuardShape { rp, .. }
            | MirOp::GuardType { rp, .. }
            | MirOp::GuardNumber { rp, .. }
            | MirOp::GuardCallee { rp, .. }
            | MirOp::GuardGlobal { rp, .. }
            | MirOp::LoadProtoSlot { rp, .. }
            | MirOp::StoreSlot { rp, .. }
            | MirOp::AddSlot { rp, .. }
            | MirOp::ArrayLength { rp, .. }
            | MirOp::TypedArrayLength { rp, .. }
            | MirOp::LoadDense { rp, .. }
            | MirOp::StoreDense { rp, .. }
            | MirOp::LoadTyped { rp, .. }
            | MirOp::StoreTyped { rp, .. }
            | MirOp::LoadLexical { rp, .. }
            | MirOp::Int32Binary { rp, .. }
            | MirOp::VirtualSubarray { rp, .. }
            | MirOp::VirtualFill { rp, .. }
            | MirOp::VirtualSet { rp, .. }
            | MirOp::CheckInvalidated { rp }
            | MirOp::Bailout { rp }
            | MirOp::LoopHead { rp } => Some(*rp),
            _ => None,
        }
    }
}

/// The bytecode state of one frame at a resume point.
#[derive(Clone, Debug)]
pub struct FrameState {
    /// Index into `MirGraph::scripts`.
    pub script: u32,
    pub pc: u32,
    pub callee: Operand,
    pub this: Operand,
    pub locals: Vec<Operand>,
    pub stack: Vec<Operand>,
}

#[derive(Clone, Debug)]
pub struct ResumePoint {
    /// Outermost frame first.
    pub frames: Vec<FrameState>,
}

/// A loop head at which a running interpreter frame may switch into the
/// optimized code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsrEntry {
    pub pc: u32,
    pub mir_index: u32,
}

/// Invariants the code was compiled against, checked and registered at
/// install time.
#[derive(Clone, Debug, Default)]
pub struct Dependencies {
    pub realm_fuses: Vec<RealmFuseId>,
    /// Global properties folded to constants.
    pub global_constants: Vec<Arc<str>>,
}

pub struct MirGraph {
    pub ops: Vec<MirOp>,
    /// Source position of every op: `(script index, line)`.
    pub locations: Vec<(u32, u32)>,
    pub resume_points: Vec<ResumePoint>,
    pub recovers: Vec<RecoverOp>,
    pub register_count: u32,
    pub osr_entries: Vec<OsrEntry>,
    pub deps: Dependencies,
    pub report: OptimizationReport,
    /// Objects referenced by guards and constants; kept alive by the code.
    pub object_refs: Vec<ObjectId>,
    /// The outermost script first, then every inlined one.
    pub scripts: Vec<(ScriptId, Arc<Script>)>,
    /// Number of inlined call sites.
    pub inlined_calls: u32,
}

impl MirGraph {
    pub fn osr_entry(&self, pc: usize) -> Option<usize> {
        self.osr_entries
            .iter()
            .find(|e| e.pc as usize == pc)
            .map(|e| e.mir_index as usize)
    }

    pub fn location(&self, index: usize) -> Option<(Arc<str>, u32)> {
        let (script, line) = *self.locations.get(index)?;
        let (_, script) = self.scripts.get(script as usize)?;
        Some((script.filename.clone(), line))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "r{}", r),
            Operand::Const(JsValue::String(s)) => write!(f, "{:?}", s),
            Operand::Const(v) => write!(f, "{}", v),
            Operand::Recover(i) => write!(f, "recover#{}", i),
        }
    }
}

impl fmt::Display for MirGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            write!(f, "{:04}  {:<18}", i, op.name())?;
            match op {
                MirOp::Move { dst, src } => write!(f, " r{} <- {}", dst, src)?,
                MirOp::Jump { target } => write!(f, " -> {:04}", target)?,
                MirOp::Branch { cond, target, kind } => write!(f, " {} {:?} -> {:04}", cond, kind, target)?,
                MirOp::Generic { instr, .. } => write!(f, " {:?}", instr.op)?,
                _ => {}
            }
            if let Some(rp) = op.resume_point() {
                write!(f, "  rp#{}", rp)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
