//! Activation records.
//!
//! Every scripted call pushes one `Frame` on the VM's frame stack, whatever
//! tier runs it. Interpreter-family tiers keep their state in `locals` and
//! `stack`; an optimized frame keeps it in the register file of its
//! `OptFrame` until it bails out, at which point it is rebuilt as one or more
//! plain frames.

use std::collections::HashMap;
use std::sync::Arc;

use crate::runner::ds::object::{ObjectId, TypedArrayData};
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::Script;
use crate::runner::jit::opt::mir::Reg;
use crate::runner::jit::opt::OptimizedCode;
use crate::runner::jit::tiering::{ExecutionTier, ScriptId};

/// A register of an optimized frame. Scalar-replaced typed array views live
/// in registers without a heap object behind them.
#[derive(Clone, Debug)]
pub enum OptSlot {
    Value(JsValue),
    Virtual { vid: u32, data: TypedArrayData },
}

impl Default for OptSlot {
    fn default() -> Self {
        OptSlot::Value(JsValue::Undefined)
    }
}

/// A call made by optimized code that is waiting for its callee frame.
#[derive(Clone, Copy, Debug)]
pub struct PendingCall {
    pub dst: Reg,
}

pub struct OptFrame {
    pub code: Arc<OptimizedCode>,
    /// Index of the next MIR instruction.
    pub pc: usize,
    pub registers: Vec<OptSlot>,
    pub pending: Option<PendingCall>,
    pub next_vid: u32,
    /// Objects already materialized for virtual registers, by vid.
    pub materialized: HashMap<u32, ObjectId>,
}

impl OptFrame {
    pub fn new(code: Arc<OptimizedCode>, entry: usize) -> Self {
        let registers = vec![OptSlot::default(); code.graph.register_count as usize];
        OptFrame {
            code,
            pc: entry,
            registers,
            pending: None,
            next_vid: 0,
            materialized: HashMap::new(),
        }
    }

    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        for slot in &self.registers {
            match slot {
                OptSlot::Value(JsValue::Object(id)) => visit(*id),
                OptSlot::Virtual { data, .. } => visit(data.buffer),
                OptSlot::Value(_) => {}
            }
        }
        for id in self.materialized.values() {
            visit(*id);
        }
        for id in &self.code.graph.object_refs {
            visit(*id);
        }
    }
}

pub struct Frame {
    pub script_id: ScriptId,
    pub script: Arc<Script>,
    pub callee: Option<ObjectId>,
    pub this: JsValue,
    /// Next bytecode instruction to execute.
    pub pc: usize,
    pub locals: Vec<JsValue>,
    pub stack: Vec<JsValue>,
    pub tier: ExecutionTier,
    pub is_construct: bool,
    pub opt: Option<Box<OptFrame>>,
}

impl Frame {
    pub fn new(
        script_id: ScriptId,
        script: Arc<Script>,
        callee: Option<ObjectId>,
        this: JsValue,
        args: &[JsValue],
        tier: ExecutionTier,
    ) -> Self {
        let mut locals = vec![JsValue::Undefined; script.local_count as usize];
        for (slot, arg) in locals.iter_mut().zip(args.iter().take(script.param_count as usize)) {
            *slot = arg.clone();
        }
        let stack = Vec::with_capacity(script.max_stack as usize);
        Frame {
            script_id,
            script,
            callee,
            this,
            pc: 0,
            locals,
            stack,
            tier,
            is_construct: false,
            opt: None,
        }
    }

    pub fn pop(&mut self) -> JsValue {
        self.stack.pop().unwrap_or(JsValue::Undefined)
    }

    pub fn peek(&self) -> &JsValue {
        self.stack.last().unwrap_or(&JsValue::Undefined)
    }

    pub fn push(&mut self, value: JsValue) {
        self.stack.push(value);
    }

    /// Pops `n` values, returned bottom-first.
    pub fn pop_n(&mut self, n: usize) -> Vec<JsValue> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    /// Source line of the instruction currently executing.
    pub fn current_line(&self) -> u32 {
        self.script.line_at(self.pc.saturating_sub(1))
    }

    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        if let Some(id) = self.callee {
            visit(id);
        }
        let values = self.locals.iter().chain(self.stack.iter()).chain(std::iter::once(&self.this));
        for value in values {
            if let JsValue::Object(id) = value {
                visit(*id);
            }
        }
        if let Some(opt) = &self.opt {
            opt.trace(&mut visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;

    #[test]
    fn pop_n_keeps_argument_order() {
        let program = JsParser::parse_to_ast_from_str("1;").unwrap();
        let name: Arc<str> = Arc::from("t.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut frame = Frame::new(ScriptId(0), script, None, JsValue::Undefined, &[], ExecutionTier::Interpreter);
        frame.push(JsValue::from_i32(1));
        frame.push(JsValue::from_i32(2));
        frame.push(JsValue::from_i32(3));
        let args = frame.pop_n(2);
        assert_eq!(args, vec![JsValue::from_i32(2), JsValue::from_i32(3)]);
        assert_eq!(frame.pop(), JsValue::from_i32(1));
        assert_eq!(frame.pop(), JsValue::Undefined);
    }
}
