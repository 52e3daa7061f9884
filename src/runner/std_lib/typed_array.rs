//! `ArrayBuffer` and the typed array family.
//!
//! The shared methods live on `%TypedArray%.prototype`; each element kind
//! gets a constructor and a prototype of its own. The view arithmetic of
//! `subarray`, `fill` and `set` is exposed as plain functions over
//! `TypedArrayData` so the optimizing tier can run it on scalar-replaced
//! views that have no heap object.
//!
//! All of these objects are guarded by `OptimizeTypedArraySpeciesFuse`:
//! touching them switches `subarray` and `map` to the species lookup.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{Intrinsic, NativeFn, ObjectClass, ObjectId, TypedArrayData, TypedArrayKind};
use crate::runner::ds::operations::object::{
    self as obj_ops, create_typed_array, is_detached, typed_array_length, typed_array_read, typed_array_write,
};
use crate::runner::ds::operations::type_conversion::{
    relative_index, to_integer_or_infinity, to_number, to_string,
};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::vm::Vm;

use super::core::{arg, optional_number, BuiltInObject};

const SPECIES: RealmFuseId = RealmFuseId::OptimizeTypedArraySpeciesFuse;

/// Largest buffer the engine will allocate.
const MAX_BYTE_LENGTH: f64 = (1u64 << 32) as f64;

pub fn create_array_buffer(realm: &mut Realm, byte_length: usize) -> ObjectId {
    let proto = realm.intrinsics.array_buffer_prototype;
    realm.alloc(Some(proto), ObjectClass::ArrayBuffer(Some(vec![0; byte_length])))
}

/// Detaches `buffer`. Views over it report length 0 from now on.
pub fn detach(realm: &mut Realm, buffer: ObjectId) -> Result<(), JErrorType> {
    match &mut realm.heap.get_mut(buffer).class {
        ObjectClass::ArrayBuffer(bytes) => {
            *bytes = None;
            tracing::debug!(buffer = buffer.0, "array buffer detached");
            Ok(())
        }
        _ => Err(JErrorType::TypeError("argument is not an ArrayBuffer".to_string())),
    }
}

fn allocate(realm: &mut Realm, kind: TypedArrayKind, length: usize) -> ObjectId {
    let buffer = create_array_buffer(realm, length * kind.bytes_per_element());
    create_typed_array(realm, TypedArrayData { kind, buffer, byte_offset: 0, length })
}

fn to_length(realm: &Realm, value: &JsValue) -> Result<usize, JErrorType> {
    let n = to_integer_or_infinity(to_number(realm, value));
    if !(0.0..MAX_BYTE_LENGTH).contains(&n) {
        return Err(JErrorType::RangeError("invalid array length".to_string()));
    }
    Ok(n as usize)
}

fn detached_error(method: &str) -> JErrorType {
    JErrorType::TypeError(format!("{}: attempting to access detached ArrayBuffer", method))
}

fn this_view(vm: &Vm, this: &JsValue, method: &str) -> Result<TypedArrayData, JErrorType> {
    this.as_object()
        .and_then(|id| vm.realm.heap.get(id).as_typed_array().cloned())
        .ok_or_else(|| JErrorType::TypeError(format!("{} called on an object that is not a typed array", method)))
}

fn require_attached(realm: &Realm, data: &TypedArrayData, method: &str) -> Result<(), JErrorType> {
    if is_detached(realm, data.buffer) {
        Err(detached_error(method))
    } else {
        Ok(())
    }
}

fn number_arg(realm: &Realm, args: &[JsValue], index: usize) -> Option<f64> {
    match args.get(index) {
        None | Some(JsValue::Undefined) => None,
        Some(v) => Some(to_number(realm, v)),
    }
}

// ── View arithmetic ──────────────────────────────────────────

/// The view `subarray(begin, end)` returns under the default species.
pub fn subarray_view(realm: &Realm, data: &TypedArrayData, args: &[JsValue]) -> Result<TypedArrayData, JErrorType> {
    require_attached(realm, data, "subarray")?;
    let len = typed_array_length(realm, data);
    let begin = relative_index(number_arg(realm, args, 0), len, 0);
    let end = relative_index(number_arg(realm, args, 1), len, len);
    Ok(TypedArrayData {
        kind: data.kind,
        buffer: data.buffer,
        byte_offset: data.byte_offset + begin * data.kind.bytes_per_element(),
        length: end.saturating_sub(begin),
    })
}

/// `fill(value, start, end)`.
pub fn fill_view(realm: &mut Realm, data: &TypedArrayData, args: &[JsValue]) -> Result<(), JErrorType> {
    require_attached(realm, data, "fill")?;
    let n = to_number(realm, &arg(args, 0));
    let len = typed_array_length(realm, data);
    let start = relative_index(number_arg(realm, args, 1), len, 0);
    let end = relative_index(number_arg(realm, args, 2), len, len);
    for index in start..end {
        typed_array_write(realm, data, index, n);
    }
    Ok(())
}

/// `set(source, offset)`.
pub fn set_view(realm: &mut Realm, data: &TypedArrayData, args: &[JsValue]) -> Result<(), JErrorType> {
    require_attached(realm, data, "set")?;
    let offset = match number_arg(realm, args, 1) {
        Some(n) => to_integer_or_infinity(n),
        None => 0.0,
    };
    if offset < 0.0 {
        return Err(JErrorType::RangeError("invalid or out-of-range index".to_string()));
    }
    let source = arg(args, 0);
    let Some(id) = source.as_object() else {
        return Err(JErrorType::TypeError("invalid array-like object".to_string()));
    };
    // Read everything first: source and target may share a buffer.
    let values: Vec<f64> = match &realm.heap.get(id).class {
        ObjectClass::TypedArray(src) => {
            require_attached(realm, src, "set")?;
            (0..typed_array_length(realm, src))
                .map(|i| typed_array_read(realm, src, i).as_number().unwrap_or(f64::NAN))
                .collect()
        }
        ObjectClass::Array(elements) => elements.iter().map(|v| to_number(realm, v)).collect(),
        _ => {
            let len = to_integer_or_infinity(to_number(realm, &obj_ops::get(realm, id, "length"))).max(0.0) as usize;
            (0..len)
                .map(|i| to_number(realm, &obj_ops::get(realm, id, &i.to_string())))
                .collect()
        }
    };
    let len = typed_array_length(realm, data);
    if offset + values.len() as f64 > len as f64 {
        return Err(JErrorType::RangeError("invalid or out-of-range index".to_string()));
    }
    let offset = offset as usize;
    for (i, n) in values.into_iter().enumerate() {
        typed_array_write(realm, data, offset + i, n);
    }
    Ok(())
}

// ── Species ──────────────────────────────────────────────────

/// The constructor `subarray` and `map` use for their result, or `None`
/// for the default one. Only consulted once the species fuse has popped.
fn species_constructor(vm: &mut Vm, this: &JsValue) -> Result<Option<JsValue>, JErrorType> {
    if vm.realm.fuses.intact(SPECIES) {
        return Ok(None);
    }
    let constructor = obj_ops::get_value(&vm.realm, this, "constructor")?;
    if constructor.is_undefined() {
        return Ok(None);
    }
    if constructor.as_object().is_none() {
        return Err(JErrorType::TypeError("constructor is not an object".to_string()));
    }
    let species = obj_ops::get_value(&vm.realm, &constructor, "species")?;
    if species.is_nullish() {
        return Ok(None);
    }
    Ok(Some(species))
}

fn expect_typed_array(vm: &Vm, value: JsValue) -> Result<JsValue, JErrorType> {
    match value.as_object().map(|id| vm.realm.heap.get(id).as_typed_array().is_some()) {
        Some(true) => Ok(value),
        _ => Err(JErrorType::TypeError("species constructor did not return a typed array".to_string())),
    }
}

// ── Constructors ─────────────────────────────────────────────

fn construct_typed_array(vm: &mut Vm, kind: TypedArrayKind, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let first = arg(args, 0);
    let Some(source) = first.as_object() else {
        let length = match first {
            JsValue::Undefined => 0,
            other => to_length(&vm.realm, &other)?,
        };
        return Ok(JsValue::Object(allocate(&mut vm.realm, kind, length)));
    };

    let class = vm.realm.heap.get(source).class.clone();
    match class {
        ObjectClass::ArrayBuffer(None) => Err(detached_error(kind.constructor_name())),
        ObjectClass::ArrayBuffer(Some(bytes)) => {
            let size = kind.bytes_per_element();
            let byte_offset = match optional_number(vm, args, 1) {
                Some(n) => to_length(&vm.realm, &JsValue::from_f64(n))?,
                None => 0,
            };
            if byte_offset % size != 0 {
                return Err(JErrorType::RangeError(format!("start offset of {} should be a multiple of {}", kind.constructor_name(), size)));
            }
            let length = match optional_number(vm, args, 2) {
                Some(n) => to_length(&vm.realm, &JsValue::from_f64(n))?,
                None => {
                    if bytes.len() % size != 0 || byte_offset > bytes.len() {
                        return Err(JErrorType::RangeError("buffer length is not a multiple of the element size".to_string()));
                    }
                    (bytes.len() - byte_offset) / size
                }
            };
            if byte_offset + length * size > bytes.len() {
                return Err(JErrorType::RangeError("invalid typed array length".to_string()));
            }
            let data = TypedArrayData { kind, buffer: source, byte_offset, length };
            Ok(JsValue::Object(create_typed_array(&mut vm.realm, data)))
        }
        ObjectClass::TypedArray(src) => {
            let values: Vec<JsValue> = (0..typed_array_length(&vm.realm, &src))
                .map(|i| typed_array_read(&vm.realm, &src, i))
                .collect();
            Ok(JsValue::Object(from_values(&mut vm.realm, kind, &values)))
        }
        ObjectClass::Array(values) => Ok(JsValue::Object(from_values(&mut vm.realm, kind, &values))),
        _ => {
            let length = to_length(&vm.realm, &obj_ops::get(&vm.realm, source, "length"))?;
            let values: Vec<JsValue> = (0..length)
                .map(|i| obj_ops::get(&vm.realm, source, &i.to_string()))
                .collect();
            Ok(JsValue::Object(from_values(&mut vm.realm, kind, &values)))
        }
    }
}

fn from_values(realm: &mut Realm, kind: TypedArrayKind, values: &[JsValue]) -> ObjectId {
    let id = allocate(realm, kind, values.len());
    if let Some(data) = realm.heap.get(id).as_typed_array().cloned() {
        for (i, value) in values.iter().enumerate() {
            let n = to_number(realm, value);
            typed_array_write(realm, &data, i, n);
        }
    }
    id
}

macro_rules! typed_array_constructors {
    ($($kind:ident => $call:ident, $construct:ident;)*) => {
        $(
            fn $call(_vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
                Err(JErrorType::TypeError(format!(
                    "calling a builtin {} constructor without new is forbidden",
                    TypedArrayKind::$kind.constructor_name()
                )))
            }

            fn $construct(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
                construct_typed_array(vm, TypedArrayKind::$kind, args)
            }
        )*

        fn entry_points(kind: TypedArrayKind) -> (NativeFn, NativeFn) {
            match kind {
                $(TypedArrayKind::$kind => ($call, $construct),)*
            }
        }
    };
}

typed_array_constructors! {
    Int8 => call_int8, construct_int8;
    Uint8 => call_uint8, construct_uint8;
    Uint8Clamped => call_uint8_clamped, construct_uint8_clamped;
    Int16 => call_int16, construct_int16;
    Uint16 => call_uint16, construct_uint16;
    Int32 => call_int32, construct_int32;
    Uint32 => call_uint32, construct_uint32;
    Float16 => call_float16, construct_float16;
    Float32 => call_float32, construct_float32;
    Float64 => call_float64, construct_float64;
}

fn array_buffer_call(_vm: &mut Vm, _this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Err(JErrorType::TypeError("calling a builtin ArrayBuffer constructor without new is forbidden".to_string()))
}

fn array_buffer_construct(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let length = to_length(&vm.realm, &arg(args, 0))?;
    Ok(JsValue::Object(create_array_buffer(&mut vm.realm, length)))
}

// ── Prototype methods ────────────────────────────────────────

fn typed_array_fill(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "fill")?;
    fill_view(&mut vm.realm, &data, args)?;
    Ok(this)
}

fn typed_array_set(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "set")?;
    set_view(&mut vm.realm, &data, args)?;
    Ok(JsValue::Undefined)
}

fn typed_array_subarray(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "subarray")?;
    let view = subarray_view(&vm.realm, &data, args)?;
    match species_constructor(vm, &this)? {
        None => Ok(JsValue::Object(create_typed_array(&mut vm.realm, view))),
        Some(species) => {
            let ctor_args = vec![
                JsValue::Object(view.buffer),
                JsValue::from_f64(view.byte_offset as f64),
                JsValue::from_f64(view.length as f64),
            ];
            let result = vm.construct(species, ctor_args)?;
            expect_typed_array(vm, result)
        }
    }
}

fn typed_array_map(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "map")?;
    require_attached(&vm.realm, &data, "map")?;
    let callback = arg(args, 0);
    let callable = callback
        .as_object()
        .is_some_and(|id| vm.realm.heap.get(id).class.is_callable());
    if !callable {
        return Err(JErrorType::TypeError(format!("{} is not a function", to_string(&vm.realm, &callback))));
    }
    let this_arg = arg(args, 1);
    let len = typed_array_length(&vm.realm, &data);
    let result = match species_constructor(vm, &this)? {
        None => JsValue::Object(allocate(&mut vm.realm, data.kind, len)),
        Some(species) => {
            let created = vm.construct(species, vec![JsValue::from_f64(len as f64)])?;
            expect_typed_array(vm, created)?
        }
    };
    for index in 0..len {
        let value = typed_array_read(&vm.realm, &data, index);
        let key = JsValue::from_f64(index as f64);
        let mapped = vm.call_function(callback.clone(), this_arg.clone(), vec![value, key, this.clone()])?;
        let key: Arc<str> = Arc::from(index.to_string());
        obj_ops::set_value(&mut vm.realm, &result, &key, mapped, true)?;
    }
    Ok(result)
}

fn typed_array_join(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "join")?;
    let separator = match arg(args, 0) {
        JsValue::Undefined => Arc::from(","),
        other => to_string(&vm.realm, &other),
    };
    let joined = (0..typed_array_length(&vm.realm, &data))
        .map(|i| to_string(&vm.realm, &typed_array_read(&vm.realm, &data, i)).to_string())
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(JsValue::from(joined.as_str()))
}

fn typed_array_at(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let data = this_view(vm, &this, "at")?;
    let len = typed_array_length(&vm.realm, &data) as f64;
    let relative = to_integer_or_infinity(to_number(&vm.realm, &arg(args, 0)));
    let index = if relative < 0.0 { len + relative } else { relative };
    if index < 0.0 || index >= len {
        return Ok(JsValue::Undefined);
    }
    Ok(typed_array_read(&vm.realm, &data, index as usize))
}

// ── Installation ─────────────────────────────────────────────

pub fn install(realm: &mut Realm) {
    let buffer_proto = realm.intrinsics.array_buffer_prototype;
    BuiltInObject::with_constructor(realm, "ArrayBuffer", array_buffer_call, Some(array_buffer_construct), 1, buffer_proto)
        .register_global("ArrayBuffer");

    let shared = realm.intrinsics.typed_array_prototype;
    BuiltInObject::on(realm, shared)
        .add_intrinsic("fill", typed_array_fill, 1, Intrinsic::TypedArrayFill)
        .add_intrinsic("set", typed_array_set, 1, Intrinsic::TypedArraySet)
        .add_intrinsic("subarray", typed_array_subarray, 2, Intrinsic::TypedArraySubarray)
        .add_method("map", typed_array_map, 1)
        .add_method("join", typed_array_join, 1)
        .add_method("at", typed_array_at, 1)
        .guarded_by(SPECIES);

    for kind in TypedArrayKind::ALL {
        let (call, construct) = entry_points(kind);
        let proto = realm.intrinsics.typed_array_prototype_for(kind);
        let bytes = JsValue::from_f64(kind.bytes_per_element() as f64);
        let name = kind.constructor_name();
        BuiltInObject::with_constructor(realm, name, call, Some(construct), 3, proto)
            .add_constant("BYTES_PER_ELEMENT", bytes.clone())
            .guarded_by(SPECIES)
            .register_global(name);
        BuiltInObject::on(realm, proto)
            .add_constant("BYTES_PER_ELEMENT", bytes)
            .guarded_by(SPECIES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(realm: &mut Realm, kind: TypedArrayKind, length: usize) -> TypedArrayData {
        let id = allocate(realm, kind, length);
        realm.heap.get(id).as_typed_array().cloned().unwrap()
    }

    #[test]
    fn subarray_clamps_relative_bounds() {
        let mut realm = Realm::new();
        let data = view(&mut realm, TypedArrayKind::Int16, 10);
        let sub = subarray_view(&realm, &data, &[JsValue::from_i32(-4), JsValue::from_i32(100)]).unwrap();
        assert_eq!(sub.byte_offset, 12);
        assert_eq!(sub.length, 4);
        let empty = subarray_view(&realm, &data, &[JsValue::from_i32(7), JsValue::from_i32(3)]).unwrap();
        assert_eq!(empty.length, 0);
    }

    #[test]
    fn fill_and_set_share_the_buffer() {
        let mut realm = Realm::new();
        let data = view(&mut realm, TypedArrayKind::Int32, 6);
        let sub = subarray_view(&realm, &data, &[JsValue::from_i32(2)]).unwrap();
        fill_view(&mut realm, &sub, &[JsValue::from_i32(7), JsValue::from_i32(1), JsValue::from_i32(3)]).unwrap();
        let values: Vec<JsValue> = (0..6).map(|i| typed_array_read(&realm, &data, i)).collect();
        let expected: Vec<JsValue> = [0, 0, 0, 7, 7, 0].iter().map(|n| JsValue::from_i32(*n)).collect();
        assert_eq!(values, expected);

        let source = obj_ops::create_array(&mut realm, vec![JsValue::from_i32(1), JsValue::from_i32(2)]);
        set_view(&mut realm, &data, &[JsValue::Object(source), JsValue::from_i32(4)]).unwrap();
        assert_eq!(typed_array_read(&realm, &data, 5), JsValue::from_i32(2));
        let overflow = set_view(&mut realm, &data, &[JsValue::Object(source), JsValue::from_i32(5)]);
        assert!(matches!(overflow, Err(JErrorType::RangeError(_))));
    }

    #[test]
    fn detached_views_are_empty_and_reject_methods() {
        let mut realm = Realm::new();
        let data = view(&mut realm, TypedArrayKind::Float64, 4);
        detach(&mut realm, data.buffer).unwrap();
        assert_eq!(typed_array_length(&realm, &data), 0);
        assert_eq!(typed_array_read(&realm, &data, 0), JsValue::Undefined);
        assert!(!typed_array_write(&mut realm, &data, 0, 1.0));
        assert!(matches!(fill_view(&mut realm, &data, &[]), Err(JErrorType::TypeError(_))));
        assert!(matches!(subarray_view(&realm, &data, &[]), Err(JErrorType::TypeError(_))));
    }
}
