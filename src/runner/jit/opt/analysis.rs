//! Bytecode analyses that run before MIR is built.
//!
//! Both analyses track abstract tags through the operand stack with
//! `walk_stack`, a single forward pass over the bytecode in program order.
//! Values that reach a join point lose their tag (the analyses do not merge
//! across control flow) and are reported as escaping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::runner::ds::object::{Intrinsic, ObjectId};
use crate::runner::jit::bytecode::{Instruction, OpCode, Script};
use crate::runner::jit::ic::{IcGuard, IcHandler, IcSlot, IcState, IcStub};

/// A forward analysis over the operand stack. Shuffle instructions, `Pop`
/// and control flow are handled by `walk_stack`; everything else goes
/// through `transfer`.
pub trait StackAnalysis {
    type Tag: Clone;

    /// `inputs` are the popped values, bottom first. Returns the tags of the
    /// pushed values, bottom first.
    fn transfer(&mut self, pc: usize, instr: Instruction, inputs: Vec<Option<Self::Tag>>) -> Vec<Option<Self::Tag>>;

    /// A tagged value flows somewhere the analysis cannot follow.
    fn escape(&mut self, pc: usize, tag: Self::Tag);
}

/// Marks every pc that is the target of a jump.
pub fn jump_targets(script: &Script) -> Vec<bool> {
    let mut targets = vec![false; script.code.len() + 1];
    for instr in &script.code {
        if instr.op.is_jump() {
            if let Some(t) = targets.get_mut(instr.operand as usize) {
                *t = true;
            }
        }
    }
    targets
}

fn escape_all<A: StackAnalysis>(analysis: &mut A, pc: usize, stack: &mut Vec<Option<A::Tag>>) {
    for tag in stack.drain(..).flatten() {
        analysis.escape(pc, tag);
    }
}

pub fn walk_stack<A: StackAnalysis>(script: &Script, analysis: &mut A) {
    let targets = jump_targets(script);
    let mut stack: Vec<Option<A::Tag>> = Vec::new();
    let mut falls_through = true;
    for (pc, instr) in script.code.iter().enumerate() {
        let depth = script.stack_depths.get(pc).copied().unwrap_or(u32::MAX);
        if depth == u32::MAX {
            falls_through = false;
            continue;
        }
        if targets[pc] || !falls_through {
            if falls_through {
                escape_all(analysis, pc, &mut stack);
            }
            stack = vec![None; depth as usize];
        }
        falls_through = !instr.op.is_terminator();

        let len = stack.len();
        match instr.op {
            OpCode::Pop => {
                stack.pop();
            }
            OpCode::Dup => {
                let top = stack.last().cloned().flatten();
                stack.push(top);
            }
            OpCode::Dup2 if len >= 2 => {
                let pair = stack[len - 2..].to_vec();
                stack.extend(pair);
            }
            OpCode::Swap if len >= 2 => stack.swap(len - 1, len - 2),
            OpCode::Rot3 if len >= 3 => stack[len - 3..].rotate_right(1),
            OpCode::Rot4 if len >= 4 => stack[len - 4..].rotate_right(1),
            op if op.is_jump() => {
                if op != OpCode::Jump {
                    if let Some(Some(cond)) = stack.pop() {
                        analysis.escape(pc, cond);
                    }
                }
                let remaining: Vec<A::Tag> = stack.iter().flatten().cloned().collect();
                for tag in remaining {
                    analysis.escape(pc, tag);
                }
                if op == OpCode::Jump {
                    stack.clear();
                }
            }
            _ => {
                let (pops, _) = instr.stack_effect();
                let at = len.saturating_sub(pops as usize);
                let inputs = stack.split_off(at);
                let outputs = analysis.transfer(pc, *instr, inputs);
                stack.extend(outputs);
            }
        }
    }
}

// ── Feedback queries ─────────────────────────────────────────

/// The single stub of a monomorphic IC.
pub fn mono_stub<'a>(ics: &'a [IcSlot], instr: Instruction) -> Option<&'a IcStub> {
    instr.op.ic_kind()?;
    let slot = ics.get(instr.operand2 as usize)?;
    match slot.state {
        IcState::Monomorphic => slot.stubs.first(),
        _ => None,
    }
}

/// All stubs of a non-megamorphic IC.
pub fn stubs<'a>(ics: &'a [IcSlot], instr: Instruction) -> &'a [IcStub] {
    if instr.op.ic_kind().is_none() {
        return &[];
    }
    match ics.get(instr.operand2 as usize) {
        Some(slot) if slot.state != IcState::Megamorphic => slot.stubs.as_slice(),
        _ => &[],
    }
}

/// The builtin a monomorphic call site always calls, with its identity.
pub fn native_intrinsic(ics: &[IcSlot], instr: Instruction) -> Option<(ObjectId, Intrinsic)> {
    if instr.op != OpCode::Call {
        return None;
    }
    let stub = mono_stub(ics, instr)?;
    match (&stub.guard, &stub.handler) {
        (IcGuard::Callee(id), IcHandler::CallNativeFunction { intrinsic: Some(intrinsic), .. }) => {
            Some((*id, *intrinsic))
        }
        _ => None,
    }
}

/// Number of `SetLocal` instructions writing each local.
pub fn local_definitions(script: &Script) -> Vec<u32> {
    let mut defs = vec![0u32; script.local_count as usize];
    for instr in &script.code {
        if instr.op == OpCode::SetLocal {
            if let Some(d) = defs.get_mut(instr.operand as usize) {
                *d += 1;
            }
        }
    }
    defs
}

/// Locals with exactly one definition that are neither parameters nor the
/// completion value of a global script.
pub fn single_definition_locals(script: &Script) -> Vec<bool> {
    local_definitions(script)
        .iter()
        .enumerate()
        .map(|(n, defs)| {
            *defs == 1 && n as u32 >= script.param_count && script.completion_local != Some(n as u32)
        })
        .collect()
}

// ── Scalar replacement ───────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMethod {
    Fill,
    Set,
    Subarray,
}

impl ViewMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fill" => Some(ViewMethod::Fill),
            "set" => Some(ViewMethod::Set),
            "subarray" => Some(ViewMethod::Subarray),
            _ => None,
        }
    }
}

/// Properties of a view that can be answered without an object.
pub fn is_view_property(name: &str) -> bool {
    matches!(name, "length" | "byteLength" | "byteOffset")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewTag {
    View(u32),
    Method(u32, ViewMethod),
}

impl ViewTag {
    fn local(&self) -> u32 {
        match self {
            ViewTag::View(n) | ViewTag::Method(n, _) => *n,
        }
    }
}

/// Locals holding `subarray` results that never need a heap object.
#[derive(Clone, Debug, Default)]
pub struct ScalarReplacement {
    /// Candidate local to the pc of the `subarray` call defining it.
    pub locals: HashMap<u32, usize>,
    pub def_sites: HashSet<usize>,
}

impl ScalarReplacement {
    pub fn is_candidate(&self, local: u32) -> bool {
        self.locals.contains_key(&local)
    }
}

struct ViewWalk<'a> {
    names: &'a [Arc<str>],
    ics: &'a [IcSlot],
    candidates: &'a HashMap<u32, usize>,
    escaped: HashSet<u32>,
}

impl<'a> ViewWalk<'a> {
    fn escape_inputs(&mut self, inputs: &[Option<ViewTag>]) {
        for tag in inputs.iter().flatten() {
            self.escaped.insert(tag.local());
        }
    }
}

impl<'a> StackAnalysis for ViewWalk<'a> {
    type Tag = ViewTag;

    fn transfer(&mut self, pc: usize, instr: Instruction, inputs: Vec<Option<ViewTag>>) -> Vec<Option<ViewTag>> {
        match instr.op {
            OpCode::GetLocal => {
                let tag = self
                    .candidates
                    .contains_key(&instr.operand)
                    .then_some(ViewTag::View(instr.operand));
                vec![tag]
            }
            OpCode::GetProp => match inputs.first().cloned().flatten() {
                Some(ViewTag::View(n)) => {
                    let name = &self.names[instr.operand as usize];
                    if is_view_property(name) {
                        vec![None]
                    } else if let Some(method) = ViewMethod::from_name(name) {
                        vec![Some(ViewTag::Method(n, method))]
                    } else {
                        self.escaped.insert(n);
                        vec![None]
                    }
                }
                _ => {
                    self.escape_inputs(&inputs);
                    vec![None]
                }
            },
            OpCode::GetElem | OpCode::SetElem => {
                if let Some(Some(ViewTag::Method(n, _))) = inputs.first() {
                    self.escaped.insert(*n);
                }
                self.escape_inputs(&inputs[1.min(inputs.len())..]);
                vec![None]
            }
            OpCode::Call => {
                let callee = inputs.first().cloned().flatten();
                let this = inputs.get(1).cloned().flatten();
                let args = &inputs[2.min(inputs.len())..];
                match (callee, this) {
                    (Some(ViewTag::Method(n, method)), Some(ViewTag::View(m))) if n == m => {
                        self.escape_inputs(args);
                        vec![(method == ViewMethod::Subarray).then_some(ViewTag::View(n))]
                    }
                    _ => {
                        let assert = matches!(
                            native_intrinsic(self.ics, instr),
                            Some((_, Intrinsic::AssertRecoveredOnBailout))
                        );
                        if assert {
                            self.escape_inputs(&inputs[..2.min(inputs.len())]);
                            if let Some(Some(ViewTag::Method(n, _))) = args.first() {
                                self.escaped.insert(*n);
                            }
                            self.escape_inputs(&args[1.min(args.len())..]);
                        } else {
                            self.escape_inputs(&inputs);
                        }
                        let _ = pc;
                        vec![None]
                    }
                }
            }
            _ => {
                self.escape_inputs(&inputs);
                let (_, pushes) = instr.stack_effect();
                vec![None; pushes as usize]
            }
        }
    }

    fn escape(&mut self, _pc: usize, tag: ViewTag) {
        self.escaped.insert(tag.local());
    }
}

/// Finds `var v = base.subarray(...)` definitions whose every later use is
/// a `length`/`byteLength`/`byteOffset` read, an element access, a
/// `fill`/`set`/`subarray` call or `assertRecoveredOnBailout(v)`.
pub fn scalar_replacement(script: &Script, ics: &[IcSlot]) -> ScalarReplacement {
    let single = single_definition_locals(script);
    let mut candidates: HashMap<u32, usize> = HashMap::new();
    for (pc, instr) in script.code.iter().enumerate() {
        if !matches!(native_intrinsic(ics, *instr), Some((_, Intrinsic::TypedArraySubarray))) {
            continue;
        }
        let (Some(store), Some(pop)) = (script.code.get(pc + 1), script.code.get(pc + 2)) else {
            continue;
        };
        if store.op == OpCode::SetLocal
            && pop.op == OpCode::Pop
            && single.get(store.operand as usize).copied().unwrap_or(false)
        {
            candidates.insert(store.operand, pc);
        }
    }
    loop {
        if candidates.is_empty() {
            return ScalarReplacement::default();
        }
        let mut walk = ViewWalk {
            names: &script.names,
            ics,
            candidates: &candidates,
            escaped: HashSet::new(),
        };
        walk_stack(script, &mut walk);
        let escaped = walk.escaped;
        if escaped.is_empty() {
            let def_sites = candidates.values().copied().collect();
            return ScalarReplacement { locals: candidates, def_sites };
        }
        candidates.retain(|local, _| !escaped.contains(local));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;
    use crate::runner::jit::ic::IcKind;

    fn function_body(source: &str) -> Arc<Script> {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("analysis.js");
        let script = compile_script(&program, &name, 0, false).unwrap();
        script.templates[0].script().unwrap()
    }

    /// IC slots with every `subarray` call site monomorphic on the builtin.
    fn subarray_feedback(script: &Script) -> Vec<IcSlot> {
        let mut ics: Vec<IcSlot> = script.ic_sites.iter().map(|s| IcSlot::new(s.kind, s.pc)).collect();
        for (pc, instr) in script.code.iter().enumerate() {
            if instr.op != OpCode::Call || pc < 1 {
                continue;
            }
            let slot = &mut ics[instr.operand2 as usize];
            assert_eq!(slot.kind, IcKind::Call);
            slot.attach(
                IcGuard::Callee(ObjectId(40)),
                IcHandler::CallNativeFunction { name: "subarray", intrinsic: Some(Intrinsic::TypedArraySubarray) },
                6,
            );
        }
        ics
    }

    #[test]
    fn views_used_locally_are_replaced() {
        let script = function_body("function f(a) { var v = a.subarray(1, 3); v[0] = 4; return v.length; }");
        let ics = subarray_feedback(&script);
        let result = scalar_replacement(&script, &ics);
        assert_eq!(result.locals.len(), 1);
    }

    #[test]
    fn returned_views_escape() {
        let script = function_body("function f(a) { var v = a.subarray(1, 3); return v; }");
        let ics = subarray_feedback(&script);
        assert!(scalar_replacement(&script, &ics).locals.is_empty());
    }

    #[test]
    fn redefined_locals_are_not_candidates() {
        let script = function_body("function f(a) { var v = a.subarray(1); v = a.subarray(2); return v.length; }");
        let ics = subarray_feedback(&script);
        assert!(scalar_replacement(&script, &ics).locals.is_empty());
    }

    #[test]
    fn join_points_escape_stack_values() {
        struct Count(usize);
        impl StackAnalysis for Count {
            type Tag = ();
            fn transfer(&mut self, _: usize, instr: Instruction, _: Vec<Option<()>>) -> Vec<Option<()>> {
                let (_, pushes) = instr.stack_effect();
                let tag = (instr.op == OpCode::Int).then_some(());
                vec![tag; pushes as usize]
            }
            fn escape(&mut self, _: usize, _: ()) {
                self.0 += 1;
            }
        }
        let script = function_body("function f(c) { return c ? 1 : 2; }");
        let mut count = Count(0);
        walk_stack(&script, &mut count);
        // Both arms reach the join.
        assert_eq!(count.0, 2);
    }
}
