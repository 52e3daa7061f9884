//! Standard library built-in objects.
//!
//! Object, Array, Error, String, Number, Math, ArrayBuffer and the typed
//! arrays, plus the shell's testing functions.

pub mod array;
pub mod core;
pub mod error;
pub mod math;
pub mod number;
pub mod object;
pub mod string;
pub mod testing;
pub mod typed_array;

pub use self::core::install_builtins;
