use std::sync::Arc;

use half::f16;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::operations::type_conversion::{to_int32, to_uint32};
use crate::runner::ds::shape::ShapeId;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::FunctionTemplate;
use crate::runner::jit::fuse::{ObjectFuse, RealmFuseId};
use crate::runner::jit::vm::Vm;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Signature of builtin functions: `(vm, this, args)`.
pub type NativeFn = fn(&mut Vm, JsValue, &[JsValue]) -> Result<JsValue, JErrorType>;

/// Builtins the optimizing tier understands by identity. The tag is recorded
/// in call IC stubs so that compilation never needs to look at the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    MathAbs,
    MathFloor,
    MathCeil,
    MathTrunc,
    MathSqrt,
    MathFround,
    MathF16Round,
    MathMin,
    MathMax,
    TypedArrayFill,
    TypedArraySet,
    TypedArraySubarray,
    ArrayPush,
    AssertFloat32,
    AssertRecoveredOnBailout,
    Bailout,
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub call: NativeFn,
    /// Behaviour under `new`; `None` means the builtin is not a constructor.
    pub construct: Option<NativeFn>,
    pub intrinsic: Option<Intrinsic>,
    pub arity: u32,
}

#[derive(Clone)]
pub struct ScriptFunction {
    pub template: Arc<FunctionTemplate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float16,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub const ALL: [TypedArrayKind; 10] = [
        TypedArrayKind::Int8,
        TypedArrayKind::Uint8,
        TypedArrayKind::Uint8Clamped,
        TypedArrayKind::Int16,
        TypedArrayKind::Uint16,
        TypedArrayKind::Int32,
        TypedArrayKind::Uint32,
        TypedArrayKind::Float16,
        TypedArrayKind::Float32,
        TypedArrayKind::Float64,
    ];

    pub fn bytes_per_element(&self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 | TypedArrayKind::Float16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 => 8,
        }
    }

    pub fn constructor_name(&self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Uint8Clamped => "Uint8ClampedArray",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float16 => "Float16Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
        }
    }

    pub fn index(&self) -> usize {
        TypedArrayKind::ALL
            .iter()
            .position(|k| k == self)
            .unwrap_or(0)
    }

    /// Reads one element from little-endian storage.
    pub fn read(&self, bytes: &[u8]) -> JsValue {
        match self {
            TypedArrayKind::Int8 => JsValue::from_i32(bytes[0] as i8 as i32),
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => JsValue::from_i32(bytes[0] as i32),
            TypedArrayKind::Int16 => {
                JsValue::from_i32(i16::from_le_bytes([bytes[0], bytes[1]]) as i32)
            }
            TypedArrayKind::Uint16 => {
                JsValue::from_i32(u16::from_le_bytes([bytes[0], bytes[1]]) as i32)
            }
            TypedArrayKind::Int32 => JsValue::from_i32(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            TypedArrayKind::Uint32 => JsValue::from_f64(
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            ),
            TypedArrayKind::Float16 => {
                JsValue::from_f64(f16::from_le_bytes([bytes[0], bytes[1]]).to_f64())
            }
            TypedArrayKind::Float32 => JsValue::from_f64(
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            ),
            TypedArrayKind::Float64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                JsValue::from_f64(f64::from_le_bytes(b))
            }
        }
    }

    /// Writes an already-converted number into little-endian storage.
    pub fn write(&self, bytes: &mut [u8], n: f64) {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 => bytes[0] = to_int32(n) as u8,
            TypedArrayKind::Uint8Clamped => bytes[0] = clamp_uint8(n),
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => {
                bytes[..2].copy_from_slice(&(to_int32(n) as u16).to_le_bytes())
            }
            TypedArrayKind::Int32 => bytes[..4].copy_from_slice(&to_int32(n).to_le_bytes()),
            TypedArrayKind::Uint32 => bytes[..4].copy_from_slice(&to_uint32(n).to_le_bytes()),
            TypedArrayKind::Float16 => bytes[..2].copy_from_slice(&f16::from_f64(n).to_le_bytes()),
            TypedArrayKind::Float32 => bytes[..4].copy_from_slice(&(n as f32).to_le_bytes()),
            TypedArrayKind::Float64 => bytes[..8].copy_from_slice(&n.to_le_bytes()),
        }
    }
}

fn clamp_uint8(n: f64) -> u8 {
    if n.is_nan() || n <= 0.0 {
        return 0;
    }
    if n >= 255.0 {
        return 255;
    }
    // Round half to even.
    let f = n.floor();
    let diff = n - f;
    let r = if diff > 0.5 || (diff == 0.5 && f % 2.0 != 0.0) {
        f + 1.0
    } else {
        f
    };
    r as u8
}

#[derive(Clone, Debug)]
pub struct TypedArrayData {
    pub kind: TypedArrayKind,
    pub buffer: ObjectId,
    pub byte_offset: usize,
    pub length: usize,
}

#[derive(Clone)]
pub enum ObjectClass {
    Ordinary,
    Array(Vec<JsValue>),
    Function(ScriptFunction),
    NativeFunction(NativeFunction),
    /// `None` once the buffer has been detached.
    ArrayBuffer(Option<Vec<u8>>),
    TypedArray(TypedArrayData),
    Error,
}

impl ObjectClass {
    pub fn is_callable(&self) -> bool {
        matches!(self, ObjectClass::Function(_) | ObjectClass::NativeFunction(_))
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ObjectClass::Ordinary => "Object",
            ObjectClass::Array(_) => "Array",
            ObjectClass::Function(_) | ObjectClass::NativeFunction(_) => "Function",
            ObjectClass::ArrayBuffer(_) => "ArrayBuffer",
            ObjectClass::TypedArray(t) => t.kind.constructor_name(),
            ObjectClass::Error => "Error",
        }
    }
}

pub struct JsObject {
    pub shape: ShapeId,
    pub slots: Vec<JsValue>,
    pub class: ObjectClass,
    /// Per-property constness tracking (global object, `addObjectFuse`).
    pub fuse: Option<Box<ObjectFuse>>,
    /// Mutating this object pops the given realm fuse.
    pub guarded_by: Option<RealmFuseId>,
}

impl JsObject {
    pub fn new(shape: ShapeId, class: ObjectClass) -> Self {
        JsObject {
            shape,
            slots: Vec::new(),
            class,
            fuse: None,
            guarded_by: None,
        }
    }

    pub fn as_typed_array(&self) -> Option<&TypedArrayData> {
        match &self.class {
            ObjectClass::TypedArray(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<JsValue>> {
        match &self.class {
            ObjectClass::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<JsValue>> {
        match &mut self.class {
            ObjectClass::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Visits every object directly referenced by this one (prototype excluded,
    /// it is reached through the shape).
    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        for value in &self.slots {
            if let JsValue::Object(id) = value {
                visit(*id);
            }
        }
        match &self.class {
            ObjectClass::Array(elements) => {
                for value in elements {
                    if let JsValue::Object(id) = value {
                        visit(*id);
                    }
                }
            }
            ObjectClass::TypedArray(t) => visit(t.buffer),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_array_element_round_trips_with_wrapping() {
        let mut buf = [0u8; 8];
        TypedArrayKind::Int8.write(&mut buf, 200.0);
        assert_eq!(TypedArrayKind::Int8.read(&buf), JsValue::from(-56));
        TypedArrayKind::Uint8Clamped.write(&mut buf, 2.5);
        assert_eq!(TypedArrayKind::Uint8Clamped.read(&buf), JsValue::from(2));
        TypedArrayKind::Uint8Clamped.write(&mut buf, 3.5);
        assert_eq!(TypedArrayKind::Uint8Clamped.read(&buf), JsValue::from(4));
        TypedArrayKind::Float32.write(&mut buf, 0.1);
        assert_eq!(TypedArrayKind::Float32.read(&buf), JsValue::from(0.1f32 as f64));
        TypedArrayKind::Float16.write(&mut buf, 1.0 / 3.0);
        assert_eq!(
            TypedArrayKind::Float16.read(&buf),
            JsValue::from(f16::from_f64(1.0 / 3.0).to_f64())
        );
        TypedArrayKind::Uint32.write(&mut buf, -1.0);
        assert_eq!(TypedArrayKind::Uint32.read(&buf), JsValue::from(4294967295.0));
    }
}
