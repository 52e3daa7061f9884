//! Data structures: values, objects and their shapes, the heap and the
//! realm that ties them together.

pub mod error;
pub mod heap;
pub mod object;
pub mod operations;
pub mod realm;
pub mod shape;
pub mod value;
