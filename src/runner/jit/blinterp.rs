//! The baseline interpreter.
//!
//! Runs unmodified bytecode like the interpreter, but dispatches through a
//! table of handler pointers built once per process instead of decoding the
//! opcode with a `match` on every instruction. Scripts enter this tier after
//! `blinterp_warmup_threshold` warm-up ticks and keep collecting IC feedback
//! here until they are hot enough for baseline compilation.

use lazy_static::lazy_static;

use crate::runner::ds::error::JErrorType;
use crate::runner::jit::bytecode::{OpCode, OPCODE_COUNT};
use crate::runner::jit::interpreter::{handler, OpFn, Step};
use crate::runner::jit::vm::Vm;

lazy_static! {
    static ref DISPATCH: [OpFn; OPCODE_COUNT] = OpCode::ALL.map(handler);
}

pub fn run(vm: &mut Vm) -> Result<Step, JErrorType> {
    let table = &*DISPATCH;
    loop {
        let instr = vm.fetch();
        match table[instr.op as usize](vm, instr)? {
            Step::Next => {}
            step => return Ok(step),
        }
    }
}
