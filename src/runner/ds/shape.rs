//! Shapes: shared, immutable property layouts.
//!
//! Every shape is interned by its structural key (prototype, flags and the
//! ordered list of property names with attributes), so two objects with the
//! same layout always carry the same `ShapeId`. Shapes live in an arena and
//! are never mutated; an object changing its layout moves to another shape
//! through a cached transition edge.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::runner::ds::object::ObjectId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyAttributes: u8 {
        const WRITABLE = 0b001;
        const ENUMERABLE = 0b010;
        const CONFIGURABLE = 0b100;
    }
}

impl PropertyAttributes {
    /// Attributes of a property created by plain assignment.
    pub const DEFAULT: PropertyAttributes = PropertyAttributes::all();
    /// Attributes of builtin methods: writable and configurable, not enumerable.
    pub const BUILTIN: PropertyAttributes = PropertyAttributes::from_bits_truncate(0b101);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShapeFlags: u8 {
        /// The object carries an `ObjectFuse`; stores must go through the
        /// generic path so that constness tracking sees them.
        const HAS_OBJECT_FUSE = 0b01;
        const NOT_EXTENSIBLE = 0b10;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u32);

#[derive(Debug)]
pub struct Shape {
    pub proto: Option<ObjectId>,
    pub flags: ShapeFlags,
    /// Property name to attributes; the index in the map is the slot number.
    properties: IndexMap<Arc<str>, PropertyAttributes>,
}

impl Shape {
    pub fn lookup(&self, name: &str) -> Option<(u32, PropertyAttributes)> {
        self.properties
            .get_full(name)
            .map(|(slot, _, attrs)| (slot as u32, *attrs))
    }

    pub fn slot_count(&self) -> usize {
        self.properties.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.properties.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Arc<str>, &PropertyAttributes)> {
        self.properties.iter()
    }

    pub fn has_object_fuse(&self) -> bool {
        self.flags.contains(ShapeFlags::HAS_OBJECT_FUSE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ShapeKey {
    proto: Option<ObjectId>,
    flags: ShapeFlags,
    properties: Vec<(Arc<str>, PropertyAttributes)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Transition {
    AddProperty(Arc<str>, PropertyAttributes),
    RemoveProperty(Arc<str>),
    ChangeAttributes(Arc<str>, PropertyAttributes),
    SetProto(Option<ObjectId>),
    AddFlags(ShapeFlags),
}

pub struct ShapeTable {
    shapes: Vec<Shape>,
    interned: HashMap<ShapeKey, ShapeId>,
    transitions: HashMap<(ShapeId, Transition), ShapeId>,
}

impl ShapeTable {
    pub fn new() -> Self {
        ShapeTable {
            shapes: Vec::new(),
            interned: HashMap::new(),
            transitions: HashMap::new(),
        }
    }

    /// Returns the shape for `id`. Panics on a dangling id: shape ids are
    /// never freed, so this indicates a corrupted shape table.
    pub fn get(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn empty_shape(&mut self, proto: Option<ObjectId>) -> ShapeId {
        self.intern(ShapeKey {
            proto,
            flags: ShapeFlags::empty(),
            properties: Vec::new(),
        })
    }

    pub fn add_property(&mut self, from: ShapeId, name: &Arc<str>, attrs: PropertyAttributes) -> ShapeId {
        self.transition(from, Transition::AddProperty(name.clone(), attrs), |key| {
            key.properties.push((name.clone(), attrs));
        })
    }

    /// Removes `name`; slots after it shift down by one.
    pub fn remove_property(&mut self, from: ShapeId, name: &Arc<str>) -> ShapeId {
        self.transition(from, Transition::RemoveProperty(name.clone()), |key| {
            key.properties.retain(|(n, _)| n != name);
        })
    }

    pub fn change_attributes(&mut self, from: ShapeId, name: &Arc<str>, attrs: PropertyAttributes) -> ShapeId {
        self.transition(from, Transition::ChangeAttributes(name.clone(), attrs), |key| {
            for entry in key.properties.iter_mut() {
                if &entry.0 == name {
                    entry.1 = attrs;
                }
            }
        })
    }

    pub fn set_proto(&mut self, from: ShapeId, proto: Option<ObjectId>) -> ShapeId {
        self.transition(from, Transition::SetProto(proto), |key| key.proto = proto)
    }

    pub fn add_flags(&mut self, from: ShapeId, flags: ShapeFlags) -> ShapeId {
        self.transition(from, Transition::AddFlags(flags), |key| key.flags |= flags)
    }

    fn transition<F: FnOnce(&mut ShapeKey)>(&mut self, from: ShapeId, edge: Transition, apply: F) -> ShapeId {
        if let Some(to) = self.transitions.get(&(from, edge.clone())) {
            return *to;
        }
        let mut key = self.key_of(from);
        apply(&mut key);
        let to = self.intern(key);
        self.transitions.insert((from, edge), to);
        to
    }

    fn key_of(&self, id: ShapeId) -> ShapeKey {
        let shape = self.get(id);
        ShapeKey {
            proto: shape.proto,
            flags: shape.flags,
            properties: shape
                .properties
                .iter()
                .map(|(n, a)| (n.clone(), *a))
                .collect(),
        }
    }

    fn intern(&mut self, key: ShapeKey) -> ShapeId {
        if let Some(id) = self.interned.get(&key) {
            return *id;
        }
        let id = ShapeId(self.shapes.len() as u32);
        self.shapes.push(Shape {
            proto: key.proto,
            flags: key.flags,
            properties: key.properties.iter().cloned().collect(),
        });
        self.interned.insert(key, id);
        id
    }
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn identical_layouts_share_a_shape() {
        let mut table = ShapeTable::new();
        let root = table.empty_shape(None);
        let a = table.add_property(root, &name("x"), PropertyAttributes::DEFAULT);
        let a = table.add_property(a, &name("y"), PropertyAttributes::DEFAULT);
        let b = table.add_property(root, &name("x"), PropertyAttributes::DEFAULT);
        let b = table.add_property(b, &name("y"), PropertyAttributes::DEFAULT);
        assert_eq!(a, b);
    }

    #[test]
    fn order_matters() {
        let mut table = ShapeTable::new();
        let root = table.empty_shape(None);
        let xy = table.add_property(root, &name("x"), PropertyAttributes::DEFAULT);
        let xy = table.add_property(xy, &name("y"), PropertyAttributes::DEFAULT);
        let yx = table.add_property(root, &name("y"), PropertyAttributes::DEFAULT);
        let yx = table.add_property(yx, &name("x"), PropertyAttributes::DEFAULT);
        assert_ne!(xy, yx);
        assert_eq!(table.get(xy).lookup("y").map(|(slot, _)| slot), Some(1));
    }

    #[test]
    fn removal_converges_with_direct_construction() {
        let mut table = ShapeTable::new();
        let root = table.empty_shape(None);
        let x = table.add_property(root, &name("x"), PropertyAttributes::DEFAULT);
        let xy = table.add_property(x, &name("y"), PropertyAttributes::DEFAULT);
        let back = table.remove_property(xy, &name("y"));
        assert_eq!(back, x);
        let only_y = table.remove_property(xy, &name("x"));
        assert_eq!(table.get(only_y).lookup("y").map(|(slot, _)| slot), Some(0));
    }

    #[test]
    fn proto_is_part_of_the_key() {
        let mut table = ShapeTable::new();
        let a = table.empty_shape(Some(ObjectId(1)));
        let b = table.empty_shape(Some(ObjectId(2)));
        assert_ne!(a, b);
        assert_eq!(table.set_proto(a, Some(ObjectId(2))), b);
    }

    #[test]
    fn flags_change_identity() {
        let mut table = ShapeTable::new();
        let root = table.empty_shape(None);
        let fused = table.add_flags(root, ShapeFlags::HAS_OBJECT_FUSE);
        assert_ne!(root, fused);
        assert!(table.get(fused).has_object_fuse());
    }
}
