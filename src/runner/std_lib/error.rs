//! Error built-in objects.
//!
//! `Error` plus the native error kinds the engine throws itself. Each kind
//! has its own prototype chained to `Error.prototype`; errors raised by the
//! engine find theirs through `Intrinsics::error_prototype_for`.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{NativeFn, ObjectClass};
use crate::runner::ds::operations::object::{self as obj_ops, create_error};
use crate::runner::ds::operations::type_conversion::to_string;
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::vm::Vm;

use super::core::{arg, BuiltInObject};

pub fn install(realm: &mut Realm) {
    let proto = realm.intrinsics.error_prototype;
    BuiltInObject::on(realm, proto)
        .add_property("name", JsValue::from("Error"))
        .add_property("message", JsValue::from(""))
        .add_method("toString", error_to_string, 0);
    BuiltInObject::with_constructor(realm, "Error", construct_error, Some(construct_error), 1, proto)
        .register_global("Error");

    let native: [(&'static str, NativeFn); 4] = [
        ("TypeError", construct_type_error),
        ("RangeError", construct_range_error),
        ("ReferenceError", construct_reference_error),
        ("SyntaxError", construct_syntax_error),
    ];
    for (name, construct) in native {
        let kind_proto = realm.alloc(Some(proto), ObjectClass::Ordinary);
        BuiltInObject::on(realm, kind_proto)
            .add_property("name", JsValue::from(name))
            .add_property("message", JsValue::from(""));
        realm.intrinsics.native_error_prototypes.insert(name, kind_proto);
        BuiltInObject::with_constructor(realm, name, construct, Some(construct), 1, kind_proto).register_global(name);
    }
}

/// `new Error(message)` and `Error(message)` behave the same.
fn make_error(vm: &mut Vm, name: &str, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let message = match arg(args, 0) {
        JsValue::Undefined => None,
        other => Some(to_string(&vm.realm, &other)),
    };
    let id = create_error(&mut vm.realm, name, "");
    if let Some(message) = message {
        // An explicit empty message is still an own property.
        obj_ops::define_property(
            &mut vm.realm,
            id,
            &Arc::from("message"),
            JsValue::String(message),
            PropertyAttributes::BUILTIN,
        );
    }
    Ok(JsValue::Object(id))
}

fn construct_error(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    make_error(vm, "Error", args)
}

fn construct_type_error(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    make_error(vm, "TypeError", args)
}

fn construct_range_error(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    make_error(vm, "RangeError", args)
}

fn construct_reference_error(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    make_error(vm, "ReferenceError", args)
}

fn construct_syntax_error(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    make_error(vm, "SyntaxError", args)
}

/// Error.prototype.toString
fn error_to_string(vm: &mut Vm, this: JsValue, _args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let Some(id) = this.as_object() else {
        return Err(JErrorType::TypeError("Error.prototype.toString called on a non-object".to_string()));
    };
    let name = match obj_ops::get(&vm.realm, id, "name") {
        JsValue::Undefined => Arc::from("Error"),
        other => to_string(&vm.realm, &other),
    };
    let message = match obj_ops::get(&vm.realm, id, "message") {
        JsValue::Undefined => Arc::from(""),
        other => to_string(&vm.realm, &other),
    };
    let text = match (name.is_empty(), message.is_empty()) {
        (_, true) => name.to_string(),
        (true, false) => message.to_string(),
        (false, false) => format!("{}: {}", name, message),
    };
    Ok(JsValue::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_errors_chain_to_error_prototype() {
        let mut realm = Realm::new();
        install(&mut realm);
        let range = realm.intrinsics.error_prototype_for("RangeError");
        assert_ne!(range, realm.intrinsics.error_prototype);
        assert_eq!(obj_ops::get_prototype(&realm, range), Some(realm.intrinsics.error_prototype));

        let err = create_error(&mut realm, "RangeError", "bad");
        assert_eq!(obj_ops::get(&realm, err, "name"), JsValue::from("RangeError"));
        assert_eq!(to_string(&realm, &JsValue::Object(err)).as_ref(), "RangeError: bad");
    }
}
