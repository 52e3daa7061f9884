//! Object built-in.
//!
//! Property descriptors are data-only: accessors are not supported, so
//! `defineProperty` accepts `value`, `writable`, `enumerable` and
//! `configurable` and nothing else.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{ObjectClass, ObjectId};
use crate::runner::ds::operations::object::{self as obj_ops, is_extensible};
use crate::runner::ds::operations::test_and_comparison::same_value;
use crate::runner::ds::operations::type_conversion::{to_boolean, to_property_key};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::vm::Vm;

use super::core::{arg, object_arg, BuiltInObject};

pub fn install(realm: &mut Realm) {
    let proto = realm.intrinsics.object_prototype;
    BuiltInObject::on(realm, proto).add_method("hasOwnProperty", has_own_property, 1);
    BuiltInObject::with_constructor(realm, "Object", object_constructor, Some(object_constructor), 1, proto)
        .add_method("keys", object_keys, 1)
        .add_method("create", object_create, 2)
        .add_method("getPrototypeOf", object_get_prototype_of, 1)
        .add_method("setPrototypeOf", object_set_prototype_of, 2)
        .add_method("defineProperty", object_define_property, 3)
        .add_method("getOwnPropertyDescriptor", object_get_own_property_descriptor, 2)
        .add_method("is", object_is, 2)
        .add_method("freeze", object_freeze, 1)
        .register_global("Object");
}

/// Object(value): objects pass through, everything else gets a fresh object.
fn object_constructor(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    match arg(args, 0) {
        value @ JsValue::Object(_) => Ok(value),
        _ => Ok(JsValue::Object(vm.realm.alloc_ordinary())),
    }
}

fn object_keys(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "Object.keys argument")?;
    let keys = obj_ops::own_keys(&vm.realm, id)
        .into_iter()
        .map(JsValue::String)
        .collect();
    Ok(JsValue::Object(obj_ops::create_array(&mut vm.realm, keys)))
}

fn prototype_arg(value: JsValue) -> Result<Option<ObjectId>, JErrorType> {
    match value {
        JsValue::Null => Ok(None),
        JsValue::Object(id) => Ok(Some(id)),
        _ => Err(JErrorType::TypeError("Object prototype may only be an Object or null".to_string())),
    }
}

fn object_create(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let proto = prototype_arg(arg(args, 0))?;
    let id = vm.realm.alloc(proto, ObjectClass::Ordinary);
    if let JsValue::Object(props) = arg(args, 1) {
        for key in obj_ops::own_keys(&vm.realm, props) {
            let descriptor = obj_ops::get(&vm.realm, props, &key);
            define_from_descriptor(vm, id, &key, &descriptor)?;
        }
    }
    Ok(JsValue::Object(id))
}

fn object_get_prototype_of(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "Object.getPrototypeOf argument")?;
    Ok(obj_ops::get_prototype(&vm.realm, id).map_or(JsValue::Null, JsValue::Object))
}

fn object_set_prototype_of(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let target = arg(args, 0);
    let proto = prototype_arg(arg(args, 1))?;
    let Some(id) = target.as_object() else {
        return Ok(target);
    };
    if !obj_ops::set_prototype(&mut vm.realm, id, proto) {
        return Err(JErrorType::TypeError("can't set prototype of this object".to_string()));
    }
    Ok(target)
}

fn define_from_descriptor(vm: &mut Vm, id: ObjectId, key: &Arc<str>, descriptor: &JsValue) -> Result<(), JErrorType> {
    let Some(desc) = descriptor.as_object() else {
        return Err(JErrorType::TypeError("property descriptor must be an object".to_string()));
    };
    if obj_ops::has_property(&vm.realm, desc, "get") || obj_ops::has_property(&vm.realm, desc, "set") {
        return Err(JErrorType::TypeError("accessor properties are not supported".to_string()));
    }
    let existing = obj_ops::own_property_attributes(&vm.realm, id, key);
    let flag = |vm: &Vm, name: &str, bit: PropertyAttributes| -> PropertyAttributes {
        if obj_ops::has_property(&vm.realm, desc, name) {
            if to_boolean(&obj_ops::get(&vm.realm, desc, name)) {
                bit
            } else {
                PropertyAttributes::empty()
            }
        } else {
            existing.map_or(PropertyAttributes::empty(), |attrs| attrs & bit)
        }
    };
    let attrs = flag(vm, "writable", PropertyAttributes::WRITABLE)
        | flag(vm, "enumerable", PropertyAttributes::ENUMERABLE)
        | flag(vm, "configurable", PropertyAttributes::CONFIGURABLE);
    let value = if obj_ops::has_property(&vm.realm, desc, "value") {
        obj_ops::get(&vm.realm, desc, "value")
    } else if existing.is_some() {
        obj_ops::get(&vm.realm, id, key)
    } else {
        JsValue::Undefined
    };

    match existing {
        Some(old) if !old.contains(PropertyAttributes::CONFIGURABLE) => {
            let unchanged = attrs == old
                && (old.contains(PropertyAttributes::WRITABLE) || same_value(&value, &obj_ops::get(&vm.realm, id, key)));
            if !unchanged {
                return Err(JErrorType::TypeError(format!("can't redefine non-configurable property \"{}\"", key)));
            }
        }
        None if !is_extensible(&vm.realm, id) => {
            return Err(JErrorType::TypeError(format!("can't define property \"{}\": object is not extensible", key)));
        }
        _ => {}
    }
    obj_ops::define_property(&mut vm.realm, id, key, value, attrs);
    Ok(())
}

fn object_define_property(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "Object.defineProperty target")?;
    let key = to_property_key(&vm.realm, &arg(args, 1));
    define_from_descriptor(vm, id, &key, &arg(args, 2))?;
    Ok(JsValue::Object(id))
}

fn object_get_own_property_descriptor(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let id = object_arg(args, 0, "Object.getOwnPropertyDescriptor target")?;
    let key = to_property_key(&vm.realm, &arg(args, 1));
    let attrs = match obj_ops::own_property_attributes(&vm.realm, id, &key) {
        Some(attrs) => attrs,
        // Elements of arrays and typed arrays have no shape entry.
        None => match obj_ops::get_own(&vm.realm, id, &key) {
            Some(_) => PropertyAttributes::WRITABLE | PropertyAttributes::ENUMERABLE,
            None => return Ok(JsValue::Undefined),
        },
    };
    let value = obj_ops::get(&vm.realm, id, &key);
    let descriptor = vm.realm.alloc_ordinary();
    for (name, v) in [
        ("value", value),
        ("writable", JsValue::Boolean(attrs.contains(PropertyAttributes::WRITABLE))),
        ("enumerable", JsValue::Boolean(attrs.contains(PropertyAttributes::ENUMERABLE))),
        ("configurable", JsValue::Boolean(attrs.contains(PropertyAttributes::CONFIGURABLE))),
    ] {
        obj_ops::define_property(&mut vm.realm, descriptor, &Arc::from(name), v, PropertyAttributes::DEFAULT);
    }
    Ok(JsValue::Object(descriptor))
}

fn object_is(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(same_value(&arg(args, 0), &arg(args, 1))))
}

fn object_freeze(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let target = arg(args, 0);
    if let Some(id) = target.as_object() {
        obj_ops::freeze(&mut vm.realm, id);
    }
    Ok(target)
}

/// Object.prototype.hasOwnProperty
fn has_own_property(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let Some(id) = this.as_object() else {
        return Ok(JsValue::Boolean(false));
    };
    let key = to_property_key(&vm.realm, &arg(args, 0));
    Ok(JsValue::Boolean(obj_ops::get_own(&vm.realm, id, &key).is_some()))
}
