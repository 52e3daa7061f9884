//! Core built-ins registration.
//!
//! Builtins are native function objects attached to ordinary objects with
//! the `BuiltInObject` builder and then published on the global object.
//! Globals installed here are initialized straight to `Constant` in the
//! global object's fuse, so optimized code can fold them.

use std::sync::Arc;

use crate::runner::config::EngineOptions;
use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{Intrinsic, NativeFn, NativeFunction, ObjectClass, ObjectId};
use crate::runner::ds::operations::object as obj_ops;
use crate::runner::ds::operations::type_conversion::{to_boolean, to_number, to_string};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::fuse::RealmFuseId;
use crate::runner::jit::vm::Vm;

use super::{array, error, math, number, object, string, testing, typed_array};

/// Builder for an object populated with builtin properties.
pub struct BuiltInObject<'r> {
    realm: &'r mut Realm,
    id: ObjectId,
}

impl<'r> BuiltInObject<'r> {
    /// A fresh ordinary object.
    pub fn new(realm: &'r mut Realm) -> Self {
        let id = realm.alloc_ordinary();
        BuiltInObject { realm, id }
    }

    /// Populates an object that already exists, typically a prototype the
    /// realm created up front.
    pub fn on(realm: &'r mut Realm, id: ObjectId) -> Self {
        BuiltInObject { realm, id }
    }

    /// A constructor function wired to `prototype` in both directions.
    pub fn with_constructor(
        realm: &'r mut Realm,
        name: &'static str,
        call: NativeFn,
        construct: Option<NativeFn>,
        arity: u32,
        prototype: ObjectId,
    ) -> Self {
        let id = native_function(realm, name, call, construct, arity, None);
        obj_ops::define_property(realm, id, &Arc::from("prototype"), JsValue::Object(prototype), PropertyAttributes::empty());
        obj_ops::define_property(
            realm,
            prototype,
            &Arc::from("constructor"),
            JsValue::Object(id),
            PropertyAttributes::BUILTIN,
        );
        realm.intrinsics.constructors.insert(name, id);
        BuiltInObject { realm, id }
    }

    pub fn add_property(self, name: &str, value: JsValue) -> Self {
        obj_ops::define_property(self.realm, self.id, &Arc::from(name), value, PropertyAttributes::BUILTIN);
        self
    }

    /// A read-only, non-configurable property.
    pub fn add_constant(self, name: &str, value: JsValue) -> Self {
        obj_ops::define_property(self.realm, self.id, &Arc::from(name), value, PropertyAttributes::empty());
        self
    }

    pub fn add_method(self, name: &'static str, call: NativeFn, arity: u32) -> Self {
        let function = native_function(self.realm, name, call, None, arity, None);
        self.add_property(name, JsValue::Object(function))
    }

    /// A method the optimizing tier recognizes by identity.
    pub fn add_intrinsic(self, name: &'static str, call: NativeFn, arity: u32, intrinsic: Intrinsic) -> Self {
        let function = native_function(self.realm, name, call, None, arity, Some(intrinsic));
        self.add_property(name, JsValue::Object(function))
    }

    /// Any later mutation of the object pops `fuse`. Call last: the
    /// builder's own definitions would pop it otherwise.
    pub fn guarded_by(self, fuse: RealmFuseId) -> Self {
        self.realm.heap.get_mut(self.id).guarded_by = Some(fuse);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Publishes the object as a global and returns it.
    pub fn register_global(self, name: &str) -> ObjectId {
        define_global(self.realm, name, JsValue::Object(self.id));
        self.id
    }
}

pub fn native_function(
    realm: &mut Realm,
    name: &'static str,
    call: NativeFn,
    construct: Option<NativeFn>,
    arity: u32,
    intrinsic: Option<Intrinsic>,
) -> ObjectId {
    let proto = realm.intrinsics.function_prototype;
    let id = realm.alloc(
        Some(proto),
        ObjectClass::NativeFunction(NativeFunction { name, call, construct, intrinsic, arity }),
    );
    obj_ops::define_property(realm, id, &Arc::from("name"), JsValue::from(name), PropertyAttributes::CONFIGURABLE);
    id
}

pub fn define_global(realm: &mut Realm, name: &str, value: JsValue) {
    let global = realm.global;
    obj_ops::define_and_initialize(realm, global, &Arc::from(name), value, PropertyAttributes::BUILTIN);
}

/// Registers a global function.
pub fn define_global_function(realm: &mut Realm, name: &'static str, call: NativeFn, arity: u32, intrinsic: Option<Intrinsic>) {
    let function = native_function(realm, name, call, None, arity, intrinsic);
    define_global(realm, name, JsValue::Object(function));
}

// ── Argument helpers ─────────────────────────────────────────

pub fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).cloned().unwrap_or(JsValue::Undefined)
}

/// The argument as a number, or `None` when it is absent or undefined.
pub fn optional_number(vm: &Vm, args: &[JsValue], index: usize) -> Option<f64> {
    match args.get(index) {
        None | Some(JsValue::Undefined) => None,
        Some(v) => Some(to_number(&vm.realm, v)),
    }
}

pub fn object_arg(args: &[JsValue], index: usize, what: &str) -> Result<ObjectId, JErrorType> {
    arg(args, index)
        .as_object()
        .ok_or_else(|| JErrorType::TypeError(format!("{} is not an object", what)))
}

// ── Installation ─────────────────────────────────────────────

/// Installs every builtin into the realm.
pub fn install_builtins(realm: &mut Realm, options: &EngineOptions) {
    object::install(realm);
    error::install(realm);
    array::install(realm);
    string::install(realm);
    number::install(realm);
    math::install(realm);
    typed_array::install(realm);

    let global = realm.global;
    let global_attrs = PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE;
    obj_ops::define_and_initialize(realm, global, &Arc::from("globalThis"), JsValue::Object(global), global_attrs);
    for (name, value) in [
        ("undefined", JsValue::Undefined),
        ("NaN", JsValue::from_f64(f64::NAN)),
        ("Infinity", JsValue::from_f64(f64::INFINITY)),
    ] {
        obj_ops::define_and_initialize(realm, global, &Arc::from(name), value, PropertyAttributes::empty());
    }
    define_global_function(realm, "print", print, 0, None);
    define_global_function(realm, "isNaN", is_nan, 1, None);
    define_global_function(realm, "Boolean", boolean, 1, None);

    if options.testing_functions {
        testing::install(realm);
    }
    tracing::debug!(objects = realm.heap.stats().live_objects, "builtins installed");
}

fn print(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let line = args
        .iter()
        .map(|v| to_string(&vm.realm, v).to_string())
        .collect::<Vec<_>>()
        .join(" ");
    vm.print(line);
    Ok(JsValue::Undefined)
}

fn is_nan(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(to_number(&vm.realm, &arg(args, 0)).is_nan()))
}

fn boolean(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(to_boolean(&arg(args, 0))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_start_out_constant() {
        let mut realm = Realm::new();
        install_builtins(&mut realm, &EngineOptions::default());
        let global = realm.global;
        let fuse = realm.heap.get(global).fuse.as_ref().unwrap();
        assert_eq!(fuse.state("Math").name(), "Constant");
        assert_eq!(fuse.state("print").name(), "Constant");
        assert_eq!(fuse.generation(), 0);
    }

    #[test]
    fn testing_functions_are_optional() {
        let mut realm = Realm::new();
        let options = EngineOptions { testing_functions: false, ..EngineOptions::default() };
        install_builtins(&mut realm, &options);
        let global = realm.global;
        assert_eq!(obj_ops::get(&realm, global, "assertEq"), JsValue::Undefined);
        assert!(obj_ops::get(&realm, global, "print").as_object().is_some());
    }

    #[test]
    fn constructors_link_their_prototypes() {
        let mut realm = Realm::new();
        install_builtins(&mut realm, &EngineOptions::default());
        let array = realm.intrinsics.constructors["Array"];
        let proto = obj_ops::get(&realm, array, "prototype").as_object().unwrap();
        assert_eq!(proto, realm.intrinsics.array_prototype);
        assert_eq!(obj_ops::get(&realm, proto, "constructor"), JsValue::Object(array));
    }
}
