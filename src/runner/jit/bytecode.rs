//! Bytecode instruction set and the compiled `Script` unit.
//!
//! A `Script` is immutable once built and shared through `Arc` by every tier
//! and by compile threads. Everything mutable about a script at runtime (IC
//! slots, warm-up counters, compiled code) lives in its `ScriptRuntime`,
//! owned by the realm.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::parser::ast::FunctionData;
use crate::runner::ds::error::CompileError;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::ic::IcKind;

/// Bytecode opcodes for the stack machine. Stack effects are listed as
/// `before -> after`, top of stack rightmost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ── Constants ────────────────────────────────────────────
    /// `-> constants[operand]`
    Constant,
    /// `-> operand as i32`
    Int,
    Undefined,
    Null,
    True,
    False,

    // ── Locals & receiver ────────────────────────────────────
    /// `-> locals[operand]`
    GetLocal,
    /// `v -> v`, stores into `locals[operand]`.
    SetLocal,
    This,
    /// The function object being executed.
    Callee,

    // ── Global names ─────────────────────────────────────────
    /// `-> value of names[operand]`; lexicals first, then the global object.
    GetName,
    /// `v -> v`
    SetName,
    /// `typeof name` without a ReferenceError for undeclared names.
    TypeOfName,
    DeleteName,
    /// `v ->`, initializes global lexical `names[operand]` (ends its TDZ).
    InitLexical,

    // ── Stack shuffles ───────────────────────────────────────
    Pop,
    Dup,
    /// `a b -> a b a b`
    Dup2,
    /// `a b -> b a`
    Swap,
    /// `a b c -> c a b`
    Rot3,
    /// `a b c d -> d a b c`
    Rot4,

    // ── Literals ─────────────────────────────────────────────
    NewObject,
    /// `obj v -> obj`, defines `names[operand]`.
    InitProp,
    /// `e0 .. e(n-1) -> array`
    NewArray,
    /// `-> function object` for `templates[operand]`.
    Closure,

    // ── Properties ───────────────────────────────────────────
    /// `obj -> obj.name`
    GetProp,
    /// `obj v -> v`
    SetProp,
    /// `obj key -> obj[key]`
    GetElem,
    /// `obj key v -> v`
    SetElem,
    DeleteProp,
    DeleteElem,
    /// `key obj -> bool`
    In,
    InstanceOf,

    // ── Arithmetic ───────────────────────────────────────────
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    Neg,
    /// Unary `+`; also produces the old value of a postfix update.
    Pos,
    BitNot,
    Inc,
    Dec,
    Not,
    TypeOf,

    // ── Comparison ───────────────────────────────────────────
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,

    // ── Control flow ─────────────────────────────────────────
    Jump,
    /// Pops the condition.
    JumpIfFalse,
    JumpIfTrue,
    /// Pops; jumps when the value is neither `null` nor `undefined`.
    JumpIfNotNullish,
    /// Loop back-edge target: warm-up counting, safepoint and OSR entry.
    LoopHead,

    // ── Calls ────────────────────────────────────────────────
    /// `callee this a0 .. a(n-1) -> result`
    Call,
    /// `callee a0 .. a(n-1) -> result`
    New,
    Return,
    Throw,
    /// Throws `TypeError: Assignment to constant variable.`
    ThrowConstAssign,
    Debugger,
}

pub const OPCODE_COUNT: usize = OpCode::Debugger as usize + 1;

impl OpCode {
    pub const ALL: [OpCode; OPCODE_COUNT] = [
        OpCode::Constant,
        OpCode::Int,
        OpCode::Undefined,
        OpCode::Null,
        OpCode::True,
        OpCode::False,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::This,
        OpCode::Callee,
        OpCode::GetName,
        OpCode::SetName,
        OpCode::TypeOfName,
        OpCode::DeleteName,
        OpCode::InitLexical,
        OpCode::Pop,
        OpCode::Dup,
        OpCode::Dup2,
        OpCode::Swap,
        OpCode::Rot3,
        OpCode::Rot4,
        OpCode::NewObject,
        OpCode::InitProp,
        OpCode::NewArray,
        OpCode::Closure,
        OpCode::GetProp,
        OpCode::SetProp,
        OpCode::GetElem,
        OpCode::SetElem,
        OpCode::DeleteProp,
        OpCode::DeleteElem,
        OpCode::In,
        OpCode::InstanceOf,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Exp,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::BitXor,
        OpCode::Shl,
        OpCode::Shr,
        OpCode::UShr,
        OpCode::Neg,
        OpCode::Pos,
        OpCode::BitNot,
        OpCode::Inc,
        OpCode::Dec,
        OpCode::Not,
        OpCode::TypeOf,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::StrictEq,
        OpCode::StrictNe,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::JumpIfTrue,
        OpCode::JumpIfNotNullish,
        OpCode::LoopHead,
        OpCode::Call,
        OpCode::New,
        OpCode::Return,
        OpCode::Throw,
        OpCode::ThrowConstAssign,
        OpCode::Debugger,
    ];

    /// The kind of IC slot this opcode owns, if any. The slot index is the
    /// instruction's `operand2`.
    pub fn ic_kind(&self) -> Option<IcKind> {
        Some(match self {
            OpCode::GetName => IcKind::GetName,
            OpCode::SetName => IcKind::SetName,
            OpCode::GetProp => IcKind::GetProp,
            OpCode::SetProp => IcKind::SetProp,
            OpCode::GetElem => IcKind::GetElem,
            OpCode::SetElem => IcKind::SetElem,
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
            | OpCode::UShr => IcKind::BinaryArith,
            OpCode::Neg | OpCode::Pos | OpCode::BitNot | OpCode::Inc | OpCode::Dec => IcKind::UnaryArith,
            OpCode::Eq
            | OpCode::Ne
            | OpCode::StrictEq
            | OpCode::StrictNe
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge => IcKind::Compare,
            OpCode::Call => IcKind::Call,
            OpCode::New => IcKind::New,
            _ => return None,
        })
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::JumpIfNotNullish
        )
    }

    /// Control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpCode::Jump | OpCode::Return | OpCode::Throw | OpCode::ThrowConstAssign
        )
    }

    /// Names the opcode's operand refers to, for disassembly.
    fn uses_name(&self) -> bool {
        matches!(
            self,
            OpCode::GetName
                | OpCode::SetName
                | OpCode::TypeOfName
                | OpCode::DeleteName
                | OpCode::InitLexical
                | OpCode::InitProp
                | OpCode::GetProp
                | OpCode::SetProp
                | OpCode::DeleteProp
                | OpCode::ThrowConstAssign
        )
    }
}

/// A single bytecode instruction. `operand2` holds the IC slot index for
/// IC-carrying opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: u32,
    pub operand2: u32,
}

impl Instruction {
    pub fn simple(op: OpCode) -> Self {
        Instruction { op, operand: 0, operand2: 0 }
    }

    pub fn with_operand(op: OpCode, operand: u32) -> Self {
        Instruction { op, operand, operand2: 0 }
    }

    pub fn with_two_operands(op: OpCode, operand: u32, operand2: u32) -> Self {
        Instruction { op, operand, operand2 }
    }

    /// `(pops, pushes)`.
    pub fn stack_effect(&self) -> (u32, u32) {
        match self.op {
            OpCode::Constant
            | OpCode::Int
            | OpCode::Undefined
            | OpCode::Null
            | OpCode::True
            | OpCode::False
            | OpCode::GetLocal
            | OpCode::This
            | OpCode::Callee
            | OpCode::GetName
            | OpCode::TypeOfName
            | OpCode::DeleteName
            | OpCode::NewObject
            | OpCode::Closure => (0, 1),
            OpCode::SetLocal | OpCode::SetName => (1, 1),
            OpCode::InitLexical | OpCode::Pop => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Dup2 => (2, 4),
            OpCode::Swap => (2, 2),
            OpCode::Rot3 => (3, 3),
            OpCode::Rot4 => (4, 4),
            OpCode::InitProp => (2, 1),
            OpCode::NewArray => (self.operand, 1),
            OpCode::GetProp | OpCode::DeleteProp => (1, 1),
            OpCode::SetProp | OpCode::GetElem | OpCode::DeleteElem | OpCode::In | OpCode::InstanceOf => (2, 1),
            OpCode::SetElem => (3, 1),
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
            | OpCode::UShr
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::StrictEq
            | OpCode::StrictNe
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge => (2, 1),
            OpCode::Neg
            | OpCode::Pos
            | OpCode::BitNot
            | OpCode::Inc
            | OpCode::Dec
            | OpCode::Not
            | OpCode::TypeOf => (1, 1),
            OpCode::Jump | OpCode::LoopHead | OpCode::Debugger | OpCode::ThrowConstAssign => (0, 0),
            OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::JumpIfNotNullish => (1, 0),
            OpCode::Call => (self.operand + 2, 1),
            OpCode::New => (self.operand + 1, 1),
            OpCode::Return | OpCode::Throw => (1, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Global,
    Function,
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcSite {
    pub kind: IcKind,
    pub pc: u32,
}

/// One protected range of the exception table. Ranges of nested `try`
/// statements come innermost first, so the first range covering a pc wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEntry {
    pub start: u32,
    pub end: u32,
    pub target: u32,
    /// Operand stack depth to restore before pushing the exception.
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct GlobalFunctionDecl {
    pub name: Arc<str>,
    pub template: u32,
}

#[derive(Debug, Clone)]
pub struct GlobalLexicalDecl {
    pub name: Arc<str>,
    pub constant: bool,
}

static NEXT_SCRIPT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_script_id() -> u64 {
    NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn hash_source(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// A compiled top-level program or function body.
#[derive(Debug)]
pub struct Script {
    pub id: u64,
    pub name: Arc<str>,
    pub filename: Arc<str>,
    pub kind: ScriptKind,
    pub strict: bool,
    pub code: Vec<Instruction>,
    pub constants: Vec<JsValue>,
    pub names: Vec<Arc<str>>,
    pub templates: Vec<Arc<FunctionTemplate>>,
    pub ic_sites: Vec<IcSite>,
    pub handlers: Vec<HandlerEntry>,
    /// Source line of every instruction.
    pub lines: Vec<u32>,
    /// Operand stack depth before each instruction; `u32::MAX` when
    /// unreachable.
    pub stack_depths: Vec<u32>,
    pub max_stack: u32,
    pub local_count: u32,
    pub param_count: u32,
    pub local_names: Vec<Arc<str>>,
    pub global_vars: Vec<Arc<str>>,
    pub global_functions: Vec<GlobalFunctionDecl>,
    pub global_lexicals: Vec<GlobalLexicalDecl>,
    pub has_debugger: bool,
    pub source_hash: u64,
    /// Local holding the completion value of a top-level script.
    pub completion_local: Option<u32>,
}

impl Script {
    pub fn name_at(&self, index: u32) -> &Arc<str> {
        &self.names[index as usize]
    }

    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines
            .get(pc)
            .or_else(|| self.lines.last())
            .copied()
            .unwrap_or(0)
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn handler_for(&self, pc: usize) -> Option<&HandlerEntry> {
        let pc = pc as u32;
        self.handlers.iter().find(|h| h.start <= pc && pc < h.end)
    }

    pub fn is_loop_head(&self, pc: usize) -> bool {
        matches!(self.code.get(pc), Some(i) if i.op == OpCode::LoopHead)
    }

    pub fn disassemble(&self) -> String {
        let mut out = format!("== {} ({}) ==\n", self.display_name(), self.filename);
        for (pc, instr) in self.code.iter().enumerate() {
            let _ = write!(out, "{:04}  {:>4}  {:<16}", pc, self.line_at(pc), format!("{:?}", instr.op));
            match instr.op {
                OpCode::Constant => {
                    let _ = write!(out, " {} ({})", instr.operand, self.constants[instr.operand as usize]);
                }
                OpCode::Int => {
                    let _ = write!(out, " {}", instr.operand as i32);
                }
                OpCode::GetLocal | OpCode::SetLocal => {
                    let name = self
                        .local_names
                        .get(instr.operand as usize)
                        .map(|n| n.to_string())
                        .unwrap_or_default();
                    let _ = write!(out, " slot={} \"{}\"", instr.operand, name);
                }
                OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue | OpCode::JumpIfNotNullish => {
                    let _ = write!(out, " -> {:04}", instr.operand);
                }
                OpCode::Call | OpCode::New | OpCode::NewArray => {
                    let _ = write!(out, " argc={}", instr.operand);
                }
                OpCode::Closure => {
                    let template = &self.templates[instr.operand as usize];
                    let _ = write!(out, " <{}>", template.display_name());
                }
                op if op.uses_name() => {
                    let _ = write!(out, " \"{}\"", self.name_at(instr.operand));
                }
                _ => {}
            }
            if instr.op.ic_kind().is_some() {
                let _ = write!(out, "  ic#{}", instr.operand2);
            }
            out.push('\n');
        }
        for h in &self.handlers {
            let _ = writeln!(out, "handler [{:04}, {:04}) -> {:04} depth={}", h.start, h.end, h.target, h.depth);
        }
        out
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            match self.kind {
                ScriptKind::Global => "<global>".to_string(),
                _ => "<anonymous>".to_string(),
            }
        } else {
            self.name.to_string()
        }
    }
}

/// Computes the operand stack depth before every instruction. Exception
/// handler targets start with the exception pushed on top of the handler's
/// saved depth.
pub fn compute_stack_depths(code: &[Instruction], handlers: &[HandlerEntry]) -> Result<(Vec<u32>, u32), String> {
    let mut depths = vec![u32::MAX; code.len()];
    let mut worklist: Vec<(usize, u32)> = vec![(0, 0)];
    worklist.extend(handlers.iter().map(|h| (h.target as usize, h.depth + 1)));
    let mut max = 0;
    while let Some((pc, depth)) = worklist.pop() {
        if pc >= code.len() {
            continue;
        }
        if depths[pc] != u32::MAX {
            if depths[pc] != depth {
                return Err(format!(
                    "inconsistent stack depth at {}: {} vs {}",
                    pc, depths[pc], depth
                ));
            }
            continue;
        }
        depths[pc] = depth;
        let instr = code[pc];
        let (pops, pushes) = instr.stack_effect();
        if pops > depth {
            return Err(format!("stack underflow at {} ({:?})", pc, instr.op));
        }
        let after = depth - pops + pushes;
        max = max.max(after).max(depth);
        if instr.op.is_jump() {
            worklist.push((instr.operand as usize, after));
        }
        if !instr.op.is_terminator() {
            worklist.push((pc + 1, after));
        }
    }
    Ok((depths, max))
}

/// A function literal together with its lazily compiled body. Templates are
/// shared by every closure created from the same literal.
pub struct FunctionTemplate {
    pub id: u64,
    pub name: Arc<str>,
    pub function: Arc<FunctionData>,
    pub strict: bool,
    pub filename: Arc<str>,
    /// Added to AST line numbers when reporting positions.
    pub line_offset: u32,
    /// A named function expression, whose name is bound to the callee
    /// inside its own body.
    pub self_named: bool,
    pub source_hash: u64,
    compiled: OnceLock<Result<Arc<Script>, CompileError>>,
}

impl std::fmt::Debug for FunctionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTemplate")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

impl FunctionTemplate {
    pub fn new(
        function: Arc<FunctionData>,
        strict: bool,
        filename: &Arc<str>,
        line_offset: u32,
        self_named: bool,
    ) -> Self {
        FunctionTemplate {
            id: next_script_id(),
            name: function.name(),
            source_hash: hash_source(&function.source_text),
            strict: strict || function.strict,
            filename: filename.clone(),
            line_offset,
            self_named: self_named && function.id.is_some(),
            function,
            compiled: OnceLock::new(),
        }
    }

    /// Compiles the body on first use. Safe to race from several threads;
    /// exactly one result is kept.
    pub fn script(&self) -> Result<Arc<Script>, CompileError> {
        self.compiled
            .get_or_init(|| crate::runner::jit::compiler::compile_function(self).map(Arc::new))
            .clone()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    pub fn is_arrow(&self) -> bool {
        self.function.is_arrow
    }

    pub fn param_count(&self) -> usize {
        self.function.params.len()
    }

    pub fn source_len(&self) -> usize {
        self.function.source_text.len()
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            "<anonymous>".to_string()
        } else {
            self.name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(op: OpCode, operand: u32) -> Instruction {
        Instruction::with_operand(op, operand)
    }

    #[test]
    fn opcode_table_matches_discriminants() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
    }

    #[test]
    fn stack_depths_follow_branches() {
        // true ? 1 : 2; return
        let code = vec![
            ins(OpCode::True, 0),
            ins(OpCode::JumpIfFalse, 4),
            ins(OpCode::Int, 1),
            ins(OpCode::Jump, 5),
            ins(OpCode::Int, 2),
            ins(OpCode::Return, 0),
        ];
        let (depths, max) = compute_stack_depths(&code, &[]).unwrap();
        assert_eq!(depths, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(max, 1);
    }

    #[test]
    fn handler_targets_start_with_the_exception() {
        let code = vec![
            ins(OpCode::Int, 1),
            ins(OpCode::Throw, 0),
            ins(OpCode::Pop, 0),
            ins(OpCode::Undefined, 0),
            ins(OpCode::Return, 0),
        ];
        let handlers = [HandlerEntry { start: 0, end: 2, target: 2, depth: 0 }];
        let (depths, _) = compute_stack_depths(&code, &handlers).unwrap();
        assert_eq!(depths[2], 1);
    }

    #[test]
    fn unbalanced_code_is_rejected() {
        let code = vec![ins(OpCode::Pop, 0)];
        assert!(compute_stack_depths(&code, &[]).is_err());
    }
}
