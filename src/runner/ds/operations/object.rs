//! Property access on heap objects, including the exotic behaviour of arrays,
//! typed arrays and array buffers, and the fuse bookkeeping that every
//! mutation must go through.

use std::sync::Arc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{JsObject, ObjectClass, ObjectId, TypedArrayData};
use crate::runner::ds::operations::type_conversion::{array_index, number_to_string, to_number};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::{PropertyAttributes, ShapeFlags};
use crate::runner::ds::value::JsValue;
use crate::runner::jit::fuse::ObjectFuse;

/// Interprets `key` as a typed array index. `Some(None)` is a numeric key
/// that is not a valid integer index (e.g. `"-1"` or `"1.5"`), which reads as
/// `undefined` and ignores writes without consulting the prototype chain.
pub fn canonical_numeric_index(key: &str) -> Option<Option<usize>> {
    if let Some(index) = array_index(key) {
        return Some(Some(index as usize));
    }
    if key == "-0" {
        return Some(None);
    }
    let n: f64 = match key.parse() {
        Ok(n) => n,
        Err(_) => return None,
    };
    if number_to_string(n) == key {
        Some(None)
    } else {
        None
    }
}

pub fn typed_array_length(realm: &Realm, t: &TypedArrayData) -> usize {
    match &realm.heap.get(t.buffer).class {
        ObjectClass::ArrayBuffer(Some(bytes)) => {
            if t.byte_offset + t.length * t.kind.bytes_per_element() <= bytes.len() {
                t.length
            } else {
                0
            }
        }
        _ => 0,
    }
}

pub fn is_detached(realm: &Realm, buffer: ObjectId) -> bool {
    !matches!(realm.heap.get(buffer).class, ObjectClass::ArrayBuffer(Some(_)))
}

pub fn typed_array_read(realm: &Realm, t: &TypedArrayData, index: usize) -> JsValue {
    if index >= typed_array_length(realm, t) {
        return JsValue::Undefined;
    }
    match &realm.heap.get(t.buffer).class {
        ObjectClass::ArrayBuffer(Some(bytes)) => {
            let start = t.byte_offset + index * t.kind.bytes_per_element();
            t.kind.read(&bytes[start..start + t.kind.bytes_per_element()])
        }
        _ => JsValue::Undefined,
    }
}

/// Writes an already-converted number. Returns false (and writes nothing)
/// when the index is out of bounds or the buffer is detached.
pub fn typed_array_write(realm: &mut Realm, t: &TypedArrayData, index: usize, n: f64) -> bool {
    if index >= typed_array_length(realm, t) {
        return false;
    }
    match &mut realm.heap.get_mut(t.buffer).class {
        ObjectClass::ArrayBuffer(Some(bytes)) => {
            let size = t.kind.bytes_per_element();
            let start = t.byte_offset + index * size;
            t.kind.write(&mut bytes[start..start + size], n);
            true
        }
        _ => false,
    }
}

/// The accessor properties every typed array view exposes.
pub fn typed_array_property(realm: &Realm, t: &TypedArrayData, key: &str) -> Option<JsValue> {
    let live = typed_array_length(realm, t);
    match key {
        "length" => Some(JsValue::from_f64(live as f64)),
        "byteLength" => Some(JsValue::from_f64((live * t.kind.bytes_per_element()) as f64)),
        "byteOffset" => Some(JsValue::from_f64(if is_detached(realm, t.buffer) {
            0.0
        } else {
            t.byte_offset as f64
        })),
        "buffer" => Some(JsValue::Object(t.buffer)),
        _ => None,
    }
}

/// Own property lookup, exotic classes included.
pub fn get_own(realm: &Realm, id: ObjectId, key: &str) -> Option<JsValue> {
    let object = realm.heap.get(id);
    match &object.class {
        ObjectClass::Array(elements) => {
            if key == "length" {
                return Some(JsValue::from_f64(elements.len() as f64));
            }
            if let Some(index) = array_index(key) {
                return elements.get(index as usize).cloned();
            }
        }
        ObjectClass::TypedArray(t) => {
            if let Some(index) = canonical_numeric_index(key) {
                return Some(match index {
                    Some(i) => typed_array_read(realm, t, i),
                    None => JsValue::Undefined,
                });
            }
        }
        _ => {}
    }
    let shape = realm.shapes.get(object.shape);
    shape
        .lookup(key)
        .map(|(slot, _)| object.slots[slot as usize].clone())
}

pub fn get_prototype(realm: &Realm, id: ObjectId) -> Option<ObjectId> {
    realm.shapes.get(realm.heap.get(id).shape).proto
}

/// `[[Get]]` with the object itself as receiver.
pub fn get(realm: &Realm, id: ObjectId, key: &str) -> JsValue {
    let object = realm.heap.get(id);
    match &object.class {
        ObjectClass::TypedArray(t) => {
            if let Some(value) = typed_array_property(realm, t, key) {
                return value;
            }
        }
        ObjectClass::ArrayBuffer(bytes) => match key {
            "byteLength" => return JsValue::from_f64(bytes.as_ref().map(|b| b.len()).unwrap_or(0) as f64),
            "detached" => return JsValue::Boolean(bytes.is_none()),
            _ => {}
        },
        _ => {}
    }
    let mut current = Some(id);
    while let Some(o) = current {
        if let Some(value) = get_own(realm, o, key) {
            return value;
        }
        current = get_prototype(realm, o);
    }
    JsValue::Undefined
}

/// `GetV`: property access on any value, with primitives handled the way a
/// wrapper object would.
pub fn get_value(realm: &Realm, target: &JsValue, key: &str) -> Result<JsValue, JErrorType> {
    match target {
        JsValue::Object(id) => Ok(get(realm, *id, key)),
        JsValue::String(s) => {
            if key == "length" {
                return Ok(JsValue::from_f64(s.encode_utf16().count() as f64));
            }
            if let Some(index) = array_index(key) {
                let unit = s.encode_utf16().nth(index as usize);
                return Ok(match unit {
                    Some(u) => JsValue::String(Arc::from(String::from_utf16_lossy(&[u]).as_str())),
                    None => JsValue::Undefined,
                });
            }
            Ok(get(realm, realm.intrinsics.object_prototype, key))
        }
        JsValue::Undefined | JsValue::Null => Err(JErrorType::TypeError(format!(
            "Cannot read properties of {} (reading '{}')",
            target, key
        ))),
        _ => Ok(get(realm, realm.intrinsics.object_prototype, key)),
    }
}

/// Finds the object on the prototype chain (receiver included) that owns an
/// ordinary data property `key`.
pub fn find_holder(realm: &Realm, id: ObjectId, key: &str) -> Option<(ObjectId, u32, PropertyAttributes)> {
    let mut current = Some(id);
    while let Some(o) = current {
        let object = realm.heap.get(o);
        if is_exotic_key(&object.class, key) {
            return None;
        }
        if let Some((slot, attrs)) = realm.shapes.get(object.shape).lookup(key) {
            return Some((o, slot, attrs));
        }
        current = get_prototype(realm, o);
    }
    None
}

/// Keys served by an object's class rather than by its shape.
pub fn is_exotic_key(class: &ObjectClass, key: &str) -> bool {
    match class {
        ObjectClass::Array(_) => key == "length" || array_index(key).is_some(),
        ObjectClass::TypedArray(_) => {
            matches!(key, "length" | "byteLength" | "byteOffset" | "buffer")
                || canonical_numeric_index(key).is_some()
        }
        ObjectClass::ArrayBuffer(_) => matches!(key, "byteLength" | "detached"),
        _ => false,
    }
}

pub fn has_property(realm: &Realm, id: ObjectId, key: &str) -> bool {
    let mut current = Some(id);
    while let Some(o) = current {
        let object = realm.heap.get(o);
        match &object.class {
            ObjectClass::Array(elements) => {
                if key == "length" {
                    return true;
                }
                if let Some(i) = array_index(key) {
                    if (i as usize) < elements.len() {
                        return true;
                    }
                }
            }
            ObjectClass::TypedArray(t) => {
                if let Some(index) = canonical_numeric_index(key) {
                    return matches!(index, Some(i) if i < typed_array_length(realm, t));
                }
            }
            _ => {}
        }
        if realm.shapes.get(object.shape).lookup(key).is_some() {
            return true;
        }
        current = get_prototype(realm, o);
    }
    false
}

/// Pops the realm fuse guarding `id`, if any, and invalidates dependents.
pub fn note_mutation(realm: &mut Realm, id: ObjectId) {
    if let Some(fuse) = realm.heap.get(id).guarded_by {
        let popped = realm.fuses.pop(fuse);
        realm.invalidate(popped);
    }
}

fn note_write(realm: &mut Realm, id: ObjectId, key: &Arc<str>, added: bool) {
    let popped = match realm.heap.get_mut(id).fuse.as_mut() {
        Some(fuse) => {
            if added {
                fuse.on_property_added(key);
            }
            fuse.on_property_write(key)
        }
        None => Vec::new(),
    };
    if !popped.is_empty() {
        realm.invalidate(popped);
    }
    note_mutation(realm, id);
}

fn fail(strict: bool, message: String) -> Result<(), JErrorType> {
    if strict {
        Err(JErrorType::TypeError(message))
    } else {
        Ok(())
    }
}

pub fn is_extensible(realm: &Realm, id: ObjectId) -> bool {
    !realm
        .shapes
        .get(realm.heap.get(id).shape)
        .flags
        .contains(ShapeFlags::NOT_EXTENSIBLE)
}

/// `[[Set]]` with the object itself as receiver.
pub fn set(realm: &mut Realm, id: ObjectId, key: &Arc<str>, value: JsValue, strict: bool) -> Result<(), JErrorType> {
    let (is_array, typed) = match &realm.heap.get(id).class {
        ObjectClass::Array(_) => (true, None),
        ObjectClass::TypedArray(t) => (false, Some(t.clone())),
        _ => (false, None),
    };
    if is_array {
        if &**key == "length" {
            let n = to_number(realm, &value);
            return set_array_length(realm, id, n);
        }
        if let Some(index) = array_index(key) {
            if !is_extensible(realm, id) {
                return fail(strict, format!("Cannot assign to property {} of a non-extensible array", key));
            }
            if let Some(elements) = realm.heap.get_mut(id).as_array_mut() {
                let index = index as usize;
                if index >= elements.len() {
                    elements.resize(index + 1, JsValue::Undefined);
                }
                elements[index] = value;
            }
            note_mutation(realm, id);
            return Ok(());
        }
    }
    if let Some(t) = typed {
        if let Some(index) = canonical_numeric_index(key) {
            let n = to_number(realm, &value);
            if let Some(i) = index {
                typed_array_write(realm, &t, i, n);
            }
            return Ok(());
        }
    }

    let shape = realm.heap.get(id).shape;
    if let Some((slot, attrs)) = realm.shapes.get(shape).lookup(key) {
        if !attrs.contains(PropertyAttributes::WRITABLE) {
            return fail(strict, format!("Cannot assign to read only property '{}' of object", key));
        }
        realm.heap.get_mut(id).slots[slot as usize] = value;
        note_write(realm, id, key, false);
        return Ok(());
    }

    if let Some(proto) = get_prototype(realm, id) {
        if let Some((_, _, attrs)) = find_holder(realm, proto, key) {
            if !attrs.contains(PropertyAttributes::WRITABLE) {
                return fail(strict, format!("Cannot assign to read only property '{}' of object", key));
            }
        }
    }
    if !is_extensible(realm, id) {
        return fail(strict, format!("Cannot add property {}, object is not extensible", key));
    }
    add_slot(realm, id, key, value, PropertyAttributes::DEFAULT);
    note_write(realm, id, key, true);
    Ok(())
}

fn add_slot(realm: &mut Realm, id: ObjectId, key: &Arc<str>, value: JsValue, attrs: PropertyAttributes) {
    let shape = realm.heap.get(id).shape;
    let next = realm.shapes.add_property(shape, key, attrs);
    let object = realm.heap.get_mut(id);
    object.shape = next;
    object.slots.push(value);
}

pub fn set_value(realm: &mut Realm, target: &JsValue, key: &Arc<str>, value: JsValue, strict: bool) -> Result<(), JErrorType> {
    match target {
        JsValue::Object(id) => set(realm, *id, key, value, strict),
        JsValue::Undefined | JsValue::Null => Err(JErrorType::TypeError(format!(
            "Cannot set properties of {} (setting '{}')",
            target, key
        ))),
        _ => fail(strict, format!("Cannot create property '{}' on primitive", key)),
    }
}

fn set_array_length(realm: &mut Realm, id: ObjectId, n: f64) -> Result<(), JErrorType> {
    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(JErrorType::RangeError("Invalid array length".to_string()));
    }
    if let Some(elements) = realm.heap.get_mut(id).as_array_mut() {
        elements.resize(n as usize, JsValue::Undefined);
    }
    note_mutation(realm, id);
    Ok(())
}

/// Defines (or redefines) an own data property without running the write
/// hooks. Fuse tracking sees a new, untracked property.
pub fn define_property(realm: &mut Realm, id: ObjectId, key: &Arc<str>, value: JsValue, attrs: PropertyAttributes) {
    let shape = realm.heap.get(id).shape;
    match realm.shapes.get(shape).lookup(key) {
        Some((slot, old)) => {
            if old != attrs {
                let next = realm.shapes.change_attributes(shape, key, attrs);
                realm.heap.get_mut(id).shape = next;
            }
            realm.heap.get_mut(id).slots[slot as usize] = value;
            let popped = match realm.heap.get_mut(id).fuse.as_mut() {
                Some(fuse) => fuse.on_property_write(key),
                None => Vec::new(),
            };
            realm.invalidate(popped);
        }
        None => {
            add_slot(realm, id, key, value, attrs);
            if let Some(fuse) = realm.heap.get_mut(id).fuse.as_mut() {
                fuse.on_property_added(key);
            }
        }
    }
    note_mutation(realm, id);
}

/// Defines a property and performs its first write, so a fused object sees
/// it as `Constant` straight away.
pub fn define_and_initialize(realm: &mut Realm, id: ObjectId, key: &Arc<str>, value: JsValue, attrs: PropertyAttributes) {
    let existed = realm.shapes.get(realm.heap.get(id).shape).lookup(key).is_some();
    define_property(realm, id, key, value, attrs);
    if !existed {
        let popped = match realm.heap.get_mut(id).fuse.as_mut() {
            Some(fuse) => fuse.on_property_write(key),
            None => Vec::new(),
        };
        realm.invalidate(popped);
    }
}

pub fn delete_property(realm: &mut Realm, id: ObjectId, key: &Arc<str>, strict: bool) -> Result<bool, JErrorType> {
    enum Exotic {
        ArrayElement(Option<usize>),
        TypedElement(bool),
    }
    let exotic = match &realm.heap.get(id).class {
        ObjectClass::Array(elements) => {
            if &**key == "length" {
                fail(strict, "Cannot delete property 'length' of array".to_string())?;
                return Ok(false);
            }
            array_index(key).map(|i| {
                let i = i as usize;
                Exotic::ArrayElement((i < elements.len()).then_some(i))
            })
        }
        ObjectClass::TypedArray(t) => canonical_numeric_index(key)
            .map(|index| Exotic::TypedElement(matches!(index, Some(i) if i < typed_array_length(realm, t)))),
        _ => None,
    };
    match exotic {
        Some(Exotic::ArrayElement(Some(i))) => {
            if let Some(elements) = realm.heap.get_mut(id).as_array_mut() {
                elements[i] = JsValue::Undefined;
            }
            note_mutation(realm, id);
            return Ok(true);
        }
        Some(Exotic::ArrayElement(None)) | Some(Exotic::TypedElement(false)) => return Ok(true),
        Some(Exotic::TypedElement(true)) => {
            fail(strict, format!("Cannot delete property '{}' of typed array", key))?;
            return Ok(false);
        }
        None => {}
    }
    let shape = realm.heap.get(id).shape;
    let Some((slot, attrs)) = realm.shapes.get(shape).lookup(key) else {
        return Ok(true);
    };
    if !attrs.contains(PropertyAttributes::CONFIGURABLE) {
        fail(strict, format!("Cannot delete property '{}' of object", key))?;
        return Ok(false);
    }
    let next = realm.shapes.remove_property(shape, key);
    let object = realm.heap.get_mut(id);
    object.shape = next;
    object.slots.remove(slot as usize);
    let popped = match object.fuse.as_mut() {
        Some(fuse) => fuse.on_property_removed(key),
        None => Vec::new(),
    };
    realm.invalidate(popped);
    note_mutation(realm, id);
    Ok(true)
}

/// Own enumerable string keys in property order, indices first.
pub fn own_keys(realm: &Realm, id: ObjectId) -> Vec<Arc<str>> {
    let object = realm.heap.get(id);
    let mut keys: Vec<Arc<str>> = Vec::new();
    match &object.class {
        ObjectClass::Array(elements) => {
            keys.extend((0..elements.len()).map(|i| Arc::from(i.to_string())));
        }
        ObjectClass::TypedArray(t) => {
            keys.extend((0..typed_array_length(realm, t)).map(|i| Arc::from(i.to_string())));
        }
        _ => {}
    }
    keys.extend(
        realm
            .shapes
            .get(object.shape)
            .entries()
            .filter(|(_, attrs)| attrs.contains(PropertyAttributes::ENUMERABLE))
            .map(|(k, _)| k.clone()),
    );
    keys
}

pub fn own_property_attributes(realm: &Realm, id: ObjectId, key: &str) -> Option<PropertyAttributes> {
    realm
        .shapes
        .get(realm.heap.get(id).shape)
        .lookup(key)
        .map(|(_, attrs)| attrs)
}

/// Returns false if the change would create a prototype cycle or the
/// object is not extensible.
pub fn set_prototype(realm: &mut Realm, id: ObjectId, proto: Option<ObjectId>) -> bool {
    let shape = realm.heap.get(id).shape;
    if realm.shapes.get(shape).proto == proto {
        return true;
    }
    if !is_extensible(realm, id) {
        return false;
    }
    let mut current = proto;
    while let Some(p) = current {
        if p == id {
            return false;
        }
        current = get_prototype(realm, p);
    }
    let next = realm.shapes.set_proto(shape, proto);
    realm.heap.get_mut(id).shape = next;
    note_mutation(realm, id);
    true
}

pub fn freeze(realm: &mut Realm, id: ObjectId) {
    let mut shape = realm.heap.get(id).shape;
    let entries: Vec<(Arc<str>, PropertyAttributes)> = realm
        .shapes
        .get(shape)
        .entries()
        .map(|(k, a)| (k.clone(), *a))
        .collect();
    for (key, attrs) in entries {
        let frozen = attrs - PropertyAttributes::WRITABLE - PropertyAttributes::CONFIGURABLE;
        shape = realm.shapes.change_attributes(shape, &key, frozen);
    }
    shape = realm.shapes.add_flags(shape, ShapeFlags::NOT_EXTENSIBLE);
    realm.heap.get_mut(id).shape = shape;
    note_mutation(realm, id);
}

/// Starts per-property constness tracking on `id`. Existing properties begin
/// untracked.
pub fn add_object_fuse(realm: &mut Realm, id: ObjectId) {
    if realm.heap.get(id).fuse.is_some() {
        return;
    }
    let shape = realm.heap.get(id).shape;
    let keys: Vec<Arc<str>> = realm.shapes.get(shape).keys().cloned().collect();
    let mut fuse = ObjectFuse::new();
    for key in &keys {
        fuse.on_property_added(key);
    }
    let next = realm.shapes.add_flags(shape, ShapeFlags::HAS_OBJECT_FUSE);
    let object = realm.heap.get_mut(id);
    object.shape = next;
    object.fuse = Some(Box::new(fuse));
}

pub fn create_array(realm: &mut Realm, elements: Vec<JsValue>) -> ObjectId {
    let proto = realm.intrinsics.array_prototype;
    realm.alloc(Some(proto), ObjectClass::Array(elements))
}

pub fn create_typed_array(realm: &mut Realm, data: TypedArrayData) -> ObjectId {
    let shape = realm.plain_typed_array_shape(data.kind);
    realm.heap.alloc(JsObject::new(shape, ObjectClass::TypedArray(data)))
}

/// Creates an error object of the named builtin kind.
pub fn create_error(realm: &mut Realm, name: &str, message: &str) -> ObjectId {
    let proto = realm.intrinsics.error_prototype_for(name);
    let id = realm.alloc(Some(proto), ObjectClass::Error);
    if !message.is_empty() {
        define_property(
            realm,
            id,
            &Arc::from("message"),
            JsValue::from(message),
            PropertyAttributes::BUILTIN,
        );
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ds::object::TypedArrayKind;
    use crate::runner::jit::fuse::PropertyFuseState;

    fn key(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn properties_round_trip_through_shapes() {
        let mut realm = Realm::new();
        let a = realm.alloc_ordinary();
        let b = realm.alloc_ordinary();
        set(&mut realm, a, &key("x"), JsValue::from(1), true).unwrap();
        set(&mut realm, b, &key("x"), JsValue::from(2), true).unwrap();
        assert_eq!(realm.shape_of(a), realm.shape_of(b));
        assert_eq!(get(&realm, b, "x"), JsValue::from(2));
        assert!(delete_property(&mut realm, a, &key("x"), true).unwrap());
        assert_eq!(get(&realm, a, "x"), JsValue::Undefined);
        assert_ne!(realm.shape_of(a), realm.shape_of(b));
    }

    #[test]
    fn proto_chain_lookup_and_readonly_inheritance() {
        let mut realm = Realm::new();
        let proto = realm.alloc_ordinary();
        define_property(&mut realm, proto, &key("k"), JsValue::from(7), PropertyAttributes::ENUMERABLE);
        let child = realm.alloc(Some(proto), ObjectClass::Ordinary);
        assert_eq!(get(&realm, child, "k"), JsValue::from(7));
        assert!(set(&mut realm, child, &key("k"), JsValue::from(1), true).is_err());
        assert!(set(&mut realm, child, &key("k"), JsValue::from(1), false).is_ok());
        assert_eq!(get(&realm, child, "k"), JsValue::from(7));
    }

    #[test]
    fn array_length_and_holes() {
        let mut realm = Realm::new();
        let arr = create_array(&mut realm, vec![JsValue::from(1)]);
        set(&mut realm, arr, &key("3"), JsValue::from(4), true).unwrap();
        assert_eq!(get(&realm, arr, "length"), JsValue::from(4));
        assert_eq!(get(&realm, arr, "2"), JsValue::Undefined);
        set(&mut realm, arr, &key("length"), JsValue::from(1), true).unwrap();
        assert_eq!(get(&realm, arr, "length"), JsValue::from(1));
    }

    #[test]
    fn typed_array_elements_and_detach() {
        let mut realm = Realm::new();
        let proto = realm.intrinsics.array_buffer_prototype;
        let buffer = realm.alloc(Some(proto), ObjectClass::ArrayBuffer(Some(vec![0; 8])));
        let ta_proto = realm.intrinsics.typed_array_prototype_for(TypedArrayKind::Int16);
        let ta = realm.alloc(
            Some(ta_proto),
            ObjectClass::TypedArray(TypedArrayData {
                kind: TypedArrayKind::Int16,
                buffer,
                byte_offset: 2,
                length: 3,
            }),
        );
        set(&mut realm, ta, &key("1"), JsValue::from(-5), true).unwrap();
        set(&mut realm, ta, &key("9"), JsValue::from(1), true).unwrap();
        assert_eq!(get(&realm, ta, "1"), JsValue::from(-5));
        assert_eq!(get(&realm, ta, "length"), JsValue::from(3));
        assert_eq!(get(&realm, ta, "-1"), JsValue::Undefined);

        realm.heap.get_mut(buffer).class = ObjectClass::ArrayBuffer(None);
        assert_eq!(get(&realm, ta, "1"), JsValue::Undefined);
        assert_eq!(get(&realm, ta, "length"), JsValue::from(0));
        assert_eq!(get(&realm, ta, "byteOffset"), JsValue::from(0));
    }

    #[test]
    fn global_writes_drive_the_object_fuse() {
        let mut realm = Realm::new();
        let global = realm.global;
        define_property(&mut realm, global, &key("g"), JsValue::Undefined, PropertyAttributes::DEFAULT);
        let state = |realm: &Realm| {
            let fuse = realm.heap.get(global).fuse.as_ref().unwrap();
            (fuse.state("g"), fuse.generation())
        };
        assert_eq!(state(&realm), (PropertyFuseState::Untracked, 0));
        set(&mut realm, global, &key("g"), JsValue::from(1), false).unwrap();
        assert_eq!(state(&realm), (PropertyFuseState::Constant, 0));
        set(&mut realm, global, &key("g"), JsValue::from(1), false).unwrap();
        assert_eq!(state(&realm), (PropertyFuseState::NotConstant, 1));
    }

    #[test]
    fn numeric_keys() {
        assert_eq!(canonical_numeric_index("3"), Some(Some(3)));
        assert_eq!(canonical_numeric_index("-1"), Some(None));
        assert_eq!(canonical_numeric_index("1.5"), Some(None));
        assert_eq!(canonical_numeric_index("01"), None);
        assert_eq!(canonical_numeric_index("foo"), None);
    }
}
