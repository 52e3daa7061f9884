//! Everything that runs scripts: the object model, the execution tiers,
//! the builtins and the embedding API on top.

pub mod api;
pub mod config;
pub mod ds;
pub mod jit;
pub mod std_lib;
