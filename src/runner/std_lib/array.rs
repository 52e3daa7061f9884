//! Array built-in.
//!
//! Elements live in the `Array` class vector rather than in shape slots.
//! `Array` and `Array.prototype` are guarded by the array species fuse.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::Intrinsic;
use crate::runner::ds::operations::object::{self as obj_ops, create_array, is_extensible};
use crate::runner::ds::operations::test_and_comparison::strict_equality_comparison;
use crate::runner::ds::operations::type_conversion::{relative_index, to_integer_or_infinity, to_string};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::vm::Vm;

use super::core::{arg, optional_number, BuiltInObject};

pub fn install(realm: &mut Realm) {
    let proto = realm.intrinsics.array_prototype;
    BuiltInObject::on(realm, proto)
        .add_intrinsic("push", array_push, 1, Intrinsic::ArrayPush)
        .add_method("pop", array_pop, 0)
        .add_method("join", array_join, 1)
        .add_method("indexOf", array_index_of, 1)
        .add_method("slice", array_slice, 2)
        .add_method("forEach", array_for_each, 1);
    BuiltInObject::with_constructor(realm, "Array", array_constructor, Some(array_constructor), 1, proto)
        .add_method("isArray", is_array, 1)
        .guarded_by(RealmFuseId::OptimizeArraySpeciesFuse)
        .register_global("Array");
    // After the constructor has written `Array.prototype.constructor`.
    realm.heap.get_mut(proto).guarded_by = Some(RealmFuseId::OptimizeArraySpeciesFuse);
}

fn this_array(vm: &Vm, this: &JsValue, method: &str) -> Result<Vec<JsValue>, JErrorType> {
    this.as_object()
        .and_then(|id| vm.realm.heap.get(id).as_array().cloned())
        .ok_or_else(|| JErrorType::TypeError(format!("Array.prototype.{} called on a non-array", method)))
}

/// `Array(n)` makes `n` holes; any other argument list becomes the elements.
fn array_constructor(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let elements = match args {
        [JsValue::Number(n)] => {
            let n = n.as_f64();
            if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
                return Err(JErrorType::RangeError("invalid array length".to_string()));
            }
            vec![JsValue::Undefined; n as usize]
        }
        _ => args.to_vec(),
    };
    Ok(JsValue::Object(create_array(&mut vm.realm, elements)))
}

fn is_array(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let result = arg(args, 0)
        .as_object()
        .is_some_and(|id| vm.realm.heap.get(id).as_array().is_some());
    Ok(JsValue::Boolean(result))
}

/// Array.prototype.push
fn array_push(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let mut len = this_array(vm, &this, "push")?.len();
    for value in args {
        let key: Arc<str> = Arc::from(len.to_string());
        obj_ops::set_value(&mut vm.realm, &this, &key, value.clone(), true)?;
        len += 1;
    }
    Ok(JsValue::from_f64(len as f64))
}

/// Array.prototype.pop
fn array_pop(vm: &mut Vm, this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    this_array(vm, &this, "pop")?;
    let Some(id) = this.as_object() else {
        return Ok(JsValue::Undefined);
    };
    if !is_extensible(&vm.realm, id) {
        return Err(JErrorType::TypeError("can't pop from a non-extensible array".to_string()));
    }
    let popped = vm.realm.heap.get_mut(id).as_array_mut().and_then(|e| e.pop());
    obj_ops::note_mutation(&mut vm.realm, id);
    Ok(popped.unwrap_or(JsValue::Undefined))
}

fn array_join(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let elements = this_array(vm, &this, "join")?;
    let separator = match arg(args, 0) {
        JsValue::Undefined => Arc::from(","),
        other => to_string(&vm.realm, &other),
    };
    let joined = elements
        .iter()
        .map(|e| if e.is_nullish() { String::new() } else { to_string(&vm.realm, e).to_string() })
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(JsValue::from(joined))
}

fn array_index_of(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let elements = this_array(vm, &this, "indexOf")?;
    let needle = arg(args, 0);
    let start = match optional_number(vm, args, 1) {
        Some(n) => {
            let n = to_integer_or_infinity(n);
            if n < 0.0 {
                (elements.len() as f64 + n).max(0.0) as usize
            } else {
                n.min(elements.len() as f64) as usize
            }
        }
        None => 0,
    };
    let found = elements[start..]
        .iter()
        .position(|e| strict_equality_comparison(e, &needle))
        .map(|i| (i + start) as f64);
    Ok(JsValue::from_f64(found.unwrap_or(-1.0)))
}

fn array_slice(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let elements = this_array(vm, &this, "slice")?;
    let len = elements.len();
    let begin = relative_index(optional_number(vm, args, 0), len, 0);
    let end = relative_index(optional_number(vm, args, 1), len, len);
    let slice = if begin < end { elements[begin..end].to_vec() } else { Vec::new() };
    Ok(JsValue::Object(create_array(&mut vm.realm, slice)))
}

fn array_for_each(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let len = this_array(vm, &this, "forEach")?.len();
    let callback = arg(args, 0);
    let this_arg = arg(args, 1);
    let Some(id) = this.as_object() else {
        return Ok(JsValue::Undefined);
    };
    for index in 0..len {
        // The callback may shrink the array.
        let Some(value) = vm.realm.heap.get(id).as_array().and_then(|e| e.get(index).cloned()) else {
            break;
        };
        let key = JsValue::from_f64(index as f64);
        vm.call_function(callback.clone(), this_arg.clone(), vec![value, key, this.clone()])?;
    }
    Ok(JsValue::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::EngineOptions;

    fn vm() -> Vm {
        let mut realm = Realm::new();
        super::super::install_builtins(&mut realm, &EngineOptions::default());
        Vm::new(realm, EngineOptions::default())
    }

    fn ints(values: &[i32]) -> Vec<JsValue> {
        values.iter().map(|n| JsValue::from_i32(*n)).collect()
    }

    #[test]
    fn push_and_pop_mutate_in_place() {
        let mut vm = vm();
        let array = JsValue::Object(create_array(&mut vm.realm, ints(&[1, 2])));
        let len = array_push(&mut vm, array.clone(), &ints(&[3, 4])).unwrap();
        assert_eq!(len, JsValue::from_i32(4));
        assert_eq!(array_pop(&mut vm, array.clone(), &[]).unwrap(), JsValue::from_i32(4));
        let joined = array_join(&mut vm, array, &[JsValue::from("-")]).unwrap();
        assert_eq!(joined, JsValue::from("1-2-3"));
    }

    #[test]
    fn frozen_arrays_reject_push_and_pop() {
        let mut vm = vm();
        let id = create_array(&mut vm.realm, ints(&[1]));
        obj_ops::freeze(&mut vm.realm, id);
        let array = JsValue::Object(id);
        assert!(matches!(array_push(&mut vm, array.clone(), &ints(&[2])), Err(JErrorType::TypeError(_))));
        assert!(matches!(array_pop(&mut vm, array, &[]), Err(JErrorType::TypeError(_))));
    }

    #[test]
    fn touching_array_prototype_pops_the_species_fuse() {
        let mut vm = vm();
        assert!(vm.realm.fuses.intact(RealmFuseId::OptimizeArraySpeciesFuse));
        let proto = vm.realm.intrinsics.array_prototype;
        obj_ops::set(&mut vm.realm, proto, &Arc::from("extra"), JsValue::Null, false).unwrap();
        assert!(!vm.realm.fuses.intact(RealmFuseId::OptimizeArraySpeciesFuse));
    }

    #[test]
    fn index_of_uses_strict_equality() {
        let mut vm = vm();
        let array = JsValue::Object(create_array(&mut vm.realm, vec![JsValue::from("1"), JsValue::from_i32(1)]));
        let found = array_index_of(&mut vm, array, &ints(&[1])).unwrap();
        assert_eq!(found, JsValue::from_i32(1));
    }
}
