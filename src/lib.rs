//! # tierjs - a tiered JavaScript engine
//!
//! Scripts start in a bytecode interpreter whose property, arithmetic and
//! call sites record inline cache (IC) stubs. Warm code moves up through a
//! baseline interpreter and a baseline compiler that share those ICs, and
//! hot code is compiled by an optimizing tier that specializes on the IC
//! feedback. Optimized code relies on *fuses* (realm-wide and per-object
//! invariants) and falls back to the baseline tiers through bailouts when
//! a speculation fails.
//!
//! ## Quick Start
//!
//! ```
//! use tierjs::runner::api::Engine;
//! use tierjs::runner::config::EngineOptions;
//! use tierjs::runner::ds::value::JsValue;
//!
//! let mut engine = Engine::new(EngineOptions::default());
//! let result = engine
//!     .eval("var sum = 0; for (var i = 0; i < 100; i++) { sum += i; } sum")
//!     .unwrap();
//! assert_eq!(result, JsValue::from_i32(4950));
//! ```
//!
//! ### Tuning the tiers
//!
//! Every threshold is an `EngineOptions` field and can be read from TOML:
//!
//! ```
//! use tierjs::runner::api::Engine;
//! use tierjs::runner::config::EngineOptions;
//!
//! let options = EngineOptions::from_toml_str("ion_warmup_threshold = 10\nenable_baseline = false").unwrap();
//! let mut engine = Engine::new(options);
//! engine.eval("function f(x) { return x * 2; } for (var i = 0; i < 50; i++) f(i);").unwrap();
//! ```
//!
//! ## Architecture
//!
//! - **[`parser`]** - PEG parser and AST types
//! - **[`runner`]** - Everything that executes
//!   - **[`runner::ds`]** - Values, shapes, objects and the garbage-collected heap
//!   - **[`runner::jit`]** - Bytecode, ICs, the execution tiers, fuses and the optimizer
//!   - **[`runner::std_lib`]** - Builtins and the testing functions
//!   - **[`runner::api`]** - The `Engine` embedding API

pub mod parser;
pub mod runner;
