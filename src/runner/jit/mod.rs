//! The execution tiers.
//!
//! ```text
//! source → parser → compiler → bytecode ──┬─ interpreter
//!                                         ├─ baseline interpreter
//!                                         ├─ baseline code
//!                                         └─ MIR (optimizing tier)
//! ```
//!
//! Every tier runs the same bytecode semantics. The interpreter tiers
//! collect type feedback in inline caches; the optimizing tier compiles
//! that feedback into specialized MIR guarded by shape checks and fuses,
//! and bails out to the baseline tiers when a guard fails.

pub mod baseline;
pub mod blinterp;
pub mod bytecode;
pub mod compiler;
pub mod frame;
pub mod fuse;
pub mod ic;
pub mod interpreter;
pub mod offthread;
pub mod opt;
pub mod runtime;
pub mod scope;
pub mod tiering;
pub mod vm;
