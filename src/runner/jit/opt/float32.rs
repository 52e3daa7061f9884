//! Single-precision specialization.
//!
//! An arithmetic instruction is computed in float32 when both inputs are
//! already float32 values and every use of its result rounds it back to
//! float32 anyway. The result is then bit-identical to computing in double
//! precision and rounding.
//!
//! Float32 values come from `Math.fround`, `Float32Array` loads and locals
//! whose only definition is one of those. Specialized results are not
//! themselves inputs to other specializations.

use std::collections::{HashMap, HashSet};

use crate::runner::ds::object::{Intrinsic, TypedArrayKind};
use crate::runner::jit::bytecode::{Instruction, OpCode, Script};
use crate::runner::jit::ic::{IcHandler, IcSlot};
use crate::runner::jit::opt::analysis::{self, native_intrinsic, StackAnalysis};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum F32 {
    Producer,
    Candidate(usize),
}

/// Result of the analysis, by bytecode pc.
#[derive(Clone, Debug, Default)]
pub struct Float32Plan {
    /// Instructions whose result is exactly a float32 value.
    pub producers: HashSet<usize>,
    /// Instructions to compute in single precision.
    pub specialized: HashSet<usize>,
    pub locals: HashSet<u32>,
}

impl Float32Plan {
    pub fn is_float32(&self, pc: usize) -> bool {
        self.producers.contains(&pc) || self.specialized.contains(&pc)
    }
}

pub fn is_float32_arith(op: OpCode) -> bool {
    matches!(op, OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div)
}

pub fn is_float32_math(intrinsic: Intrinsic) -> bool {
    matches!(
        intrinsic,
        Intrinsic::MathSqrt | Intrinsic::MathAbs | Intrinsic::MathFloor | Intrinsic::MathCeil | Intrinsic::MathTrunc
    )
}

fn loads_float32(ics: &[IcSlot], instr: Instruction) -> bool {
    let stubs = analysis::stubs(ics, instr);
    !stubs.is_empty()
        && stubs.iter().all(|s| {
            matches!(s.handler, IcHandler::LoadTypedArrayElement { kind: TypedArrayKind::Float32 })
        })
}

fn stores_float32(ics: &[IcSlot], instr: Instruction) -> bool {
    let stubs = analysis::stubs(ics, instr);
    !stubs.is_empty()
        && stubs.iter().all(|s| {
            matches!(s.handler, IcHandler::StoreTypedArrayElement { kind: TypedArrayKind::Float32 })
        })
}

fn numeric_feedback(ics: &[IcSlot], instr: Instruction) -> bool {
    let stubs = analysis::stubs(ics, instr);
    !stubs.is_empty()
        && stubs
            .iter()
            .all(|s| matches!(s.handler, IcHandler::Int32Arith | IcHandler::DoubleArith))
}

struct Walk<'a> {
    ics: &'a [IcSlot],
    locals: &'a HashSet<u32>,
    producers: HashSet<usize>,
    candidates: HashSet<usize>,
    /// Candidate pc to (uses, uses that round to float32).
    uses: HashMap<usize, (u32, u32)>,
    /// Tag flowing into each `SetLocal`.
    stores: HashMap<usize, Option<F32>>,
}

impl<'a> Walk<'a> {
    fn use_of(&mut self, tag: Option<F32>, consumes: bool) {
        if let Some(F32::Candidate(pc)) = tag {
            let entry = self.uses.entry(pc).or_insert((0, 0));
            entry.0 += 1;
            if consumes {
                entry.1 += 1;
            }
        }
    }

    fn produce(&mut self, pc: usize) -> Vec<Option<F32>> {
        self.producers.insert(pc);
        vec![Some(F32::Producer)]
    }
}

impl<'a> StackAnalysis for Walk<'a> {
    type Tag = F32;

    fn transfer(&mut self, pc: usize, instr: Instruction, inputs: Vec<Option<F32>>) -> Vec<Option<F32>> {
        match instr.op {
            OpCode::GetLocal if self.locals.contains(&instr.operand) => self.produce(pc),
            OpCode::SetLocal => {
                let tag = inputs.first().cloned().flatten();
                self.stores.insert(pc, tag);
                self.use_of(tag, false);
                vec![tag.filter(|t| *t == F32::Producer)]
            }
            OpCode::GetElem if loads_float32(self.ics, instr) => {
                for tag in inputs {
                    self.use_of(tag, false);
                }
                self.produce(pc)
            }
            OpCode::SetElem => {
                let consumes = stores_float32(self.ics, instr);
                for (i, tag) in inputs.into_iter().enumerate() {
                    self.use_of(tag, consumes && i == 2);
                }
                vec![None]
            }
            op if is_float32_arith(op) => {
                let both = inputs.len() == 2 && inputs.iter().all(|t| *t == Some(F32::Producer));
                for tag in inputs {
                    self.use_of(tag, false);
                }
                if both && numeric_feedback(self.ics, instr) {
                    self.candidates.insert(pc);
                    vec![Some(F32::Candidate(pc))]
                } else {
                    vec![None]
                }
            }
            OpCode::Call => {
                let intrinsic = native_intrinsic(self.ics, instr).map(|(_, i)| i);
                let arg0 = inputs.get(2).cloned().flatten();
                let consumes = matches!(intrinsic, Some(Intrinsic::MathFround | Intrinsic::AssertFloat32));
                for (i, tag) in inputs.into_iter().enumerate() {
                    self.use_of(tag, consumes && i == 2);
                }
                match intrinsic {
                    Some(Intrinsic::MathFround) => self.produce(pc),
                    Some(i) if is_float32_math(i) && arg0 == Some(F32::Producer) => {
                        self.candidates.insert(pc);
                        vec![Some(F32::Candidate(pc))]
                    }
                    _ => vec![None],
                }
            }
            _ => {
                for tag in inputs {
                    self.use_of(tag, false);
                }
                let (_, pushes) = instr.stack_effect();
                vec![None; pushes as usize]
            }
        }
    }

    fn escape(&mut self, _pc: usize, tag: F32) {
        self.use_of(Some(tag), false);
    }
}

pub fn analyze(script: &Script, ics: &[IcSlot]) -> Float32Plan {
    let single = analysis::single_definition_locals(script);
    let mut locals: HashSet<u32> = HashSet::new();
    loop {
        let mut walk = Walk {
            ics,
            locals: &locals,
            producers: HashSet::new(),
            candidates: HashSet::new(),
            uses: HashMap::new(),
            stores: HashMap::new(),
        };
        analysis::walk_stack(script, &mut walk);

        let mut next = HashSet::new();
        for (pc, tag) in &walk.stores {
            let local = script.code[*pc].operand;
            if *tag == Some(F32::Producer) && single.get(local as usize).copied().unwrap_or(false) {
                next.insert(local);
            }
        }
        if next == locals {
            let specialized = walk
                .candidates
                .iter()
                .copied()
                .filter(|pc| matches!(walk.uses.get(pc), Some((n, c)) if *n > 0 && n == c))
                .collect();
            return Float32Plan { producers: walk.producers, specialized, locals };
        }
        locals = next;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parser::JsParser;
    use crate::runner::ds::object::ObjectId;
    use crate::runner::jit::compiler::compile_script;
    use crate::runner::jit::ic::IcGuard;

    fn function_body(source: &str) -> Arc<Script> {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("float32.js");
        let script = compile_script(&program, &name, 0, false).unwrap();
        script.templates[0].script().unwrap()
    }

    /// Feedback as if every call went to `Math.fround` and every arithmetic
    /// op saw doubles.
    fn feedback(script: &Script) -> Vec<IcSlot> {
        let mut ics: Vec<IcSlot> = script.ic_sites.iter().map(|s| IcSlot::new(s.kind, s.pc)).collect();
        for instr in &script.code {
            let Some(slot) = ics.get_mut(instr.operand2 as usize) else { continue };
            match instr.op {
                OpCode::Call => {
                    slot.attach(
                        IcGuard::Callee(ObjectId(9)),
                        IcHandler::CallNativeFunction { name: "fround", intrinsic: Some(Intrinsic::MathFround) },
                        6,
                    );
                }
                op if is_float32_arith(op) => {
                    slot.attach(
                        IcGuard::Types(crate::runner::ds::value::TypeTag::Double, crate::runner::ds::value::TypeTag::Double),
                        IcHandler::DoubleArith,
                        6,
                    );
                }
                _ => {}
            }
        }
        ics
    }

    fn arith_pcs(script: &Script) -> Vec<usize> {
        script
            .code
            .iter()
            .enumerate()
            .filter(|(_, i)| is_float32_arith(i.op))
            .map(|(pc, _)| pc)
            .collect()
    }

    #[test]
    fn rounded_sums_of_rounded_inputs_are_specialized() {
        let script = function_body("function f(a, b) { return Math.fround(Math.fround(a) + Math.fround(b)); }");
        let plan = analyze(&script, &feedback(&script));
        let pcs = arith_pcs(&script);
        assert_eq!(pcs.len(), 1);
        assert!(plan.specialized.contains(&pcs[0]));
        assert!(plan.is_float32(pcs[0]));
    }

    #[test]
    fn unrounded_uses_keep_double_precision() {
        let script = function_body("function f(a, b) { return Math.fround(a) + Math.fround(b); }");
        let plan = analyze(&script, &feedback(&script));
        assert!(plan.specialized.is_empty());
    }

    #[test]
    fn locals_defined_by_fround_are_producers() {
        let script = function_body(
            "function f(a, b) { var x = Math.fround(a); var y = Math.fround(b); return Math.fround(x * y); }",
        );
        let plan = analyze(&script, &feedback(&script));
        assert_eq!(plan.locals.len(), 2);
        assert_eq!(plan.specialized.len(), 1);
    }

    #[test]
    fn results_are_not_chained() {
        let script = function_body(
            "function f(a, b, c) { return Math.fround(Math.fround(a) + Math.fround(b) + Math.fround(c)); }",
        );
        let plan = analyze(&script, &feedback(&script));
        assert!(plan.specialized.is_empty());
    }
}
