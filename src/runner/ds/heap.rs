//! Object arena with a precise, non-moving mark-sweep collector.
//!
//! Collection never runs on its own: the VM calls `collect` at a safepoint
//! and hands over the complete root set enumerated from every frame of every
//! tier. Between safepoints `ObjectId`s held in Rust locals stay valid.

use crate::runner::ds::object::{JsObject, ObjectId};
use crate::runner::ds::shape::ShapeTable;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub total_allocations: u64,
    pub collections: u64,
    pub last_freed: usize,
}

pub struct Heap {
    objects: Vec<Option<JsObject>>,
    marks: Vec<bool>,
    free_list: Vec<u32>,
    allocated_since_gc: usize,
    stats: HeapStats,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            marks: Vec::new(),
            free_list: Vec::new(),
            allocated_since_gc: 0,
            stats: HeapStats::default(),
        }
    }

    pub fn alloc(&mut self, object: JsObject) -> ObjectId {
        self.allocated_since_gc += 1;
        self.stats.total_allocations += 1;
        self.stats.live_objects += 1;
        match self.free_list.pop() {
            Some(index) => {
                self.objects[index as usize] = Some(object);
                ObjectId(index)
            }
            None => {
                self.objects.push(Some(object));
                self.marks.push(false);
                ObjectId((self.objects.len() - 1) as u32)
            }
        }
    }

    /// Panics on a freed id: that means a root was missed at a safepoint.
    pub fn get(&self, id: ObjectId) -> &JsObject {
        match self.objects.get(id.0 as usize) {
            Some(Some(object)) => object,
            _ => panic!("use of collected object #{}", id.0),
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut JsObject {
        match self.objects.get_mut(id.0 as usize) {
            Some(Some(object)) => object,
            _ => panic!("use of collected object #{}", id.0),
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        matches!(self.objects.get(id.0 as usize), Some(Some(_)))
    }

    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    pub fn stats(&self) -> HeapStats {
        self.stats.clone()
    }

    /// Marks everything reachable from `roots` and frees the rest. Returns the
    /// number of objects freed.
    pub fn collect(&mut self, shapes: &ShapeTable, roots: impl IntoIterator<Item = ObjectId>) -> usize {
        for mark in self.marks.iter_mut() {
            *mark = false;
        }
        let mut worklist: Vec<ObjectId> = roots.into_iter().collect();
        while let Some(id) = worklist.pop() {
            let index = id.0 as usize;
            if index >= self.objects.len() || self.marks[index] {
                continue;
            }
            let object = match &self.objects[index] {
                Some(object) => object,
                None => continue,
            };
            self.marks[index] = true;
            if let Some(proto) = shapes.get(object.shape).proto {
                worklist.push(proto);
            }
            object.trace(|child| worklist.push(child));
        }

        let mut freed = 0;
        for (index, slot) in self.objects.iter_mut().enumerate() {
            if slot.is_some() && !self.marks[index] {
                *slot = None;
                self.free_list.push(index as u32);
                freed += 1;
            }
        }
        self.allocated_since_gc = 0;
        self.stats.collections += 1;
        self.stats.live_objects -= freed;
        self.stats.last_freed = freed;
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ds::object::ObjectClass;
    use crate::runner::ds::value::JsValue;

    #[test]
    fn unreachable_objects_are_freed_and_reused() {
        let mut shapes = ShapeTable::new();
        let root_shape = shapes.empty_shape(None);
        let mut heap = Heap::new();
        let kept = heap.alloc(JsObject::new(root_shape, ObjectClass::Ordinary));
        let child = heap.alloc(JsObject::new(root_shape, ObjectClass::Ordinary));
        let garbage = heap.alloc(JsObject::new(root_shape, ObjectClass::Ordinary));
        heap.get_mut(kept).slots.push(JsValue::Object(child));

        assert_eq!(heap.collect(&shapes, vec![kept]), 1);
        assert!(heap.is_live(child));
        assert!(!heap.is_live(garbage));
        let reused = heap.alloc(JsObject::new(root_shape, ObjectClass::Ordinary));
        assert_eq!(reused, garbage);
    }

    #[test]
    fn prototypes_are_reached_through_shapes() {
        let mut shapes = ShapeTable::new();
        let mut heap = Heap::new();
        let plain = shapes.empty_shape(None);
        let proto = heap.alloc(JsObject::new(plain, ObjectClass::Ordinary));
        let with_proto = shapes.empty_shape(Some(proto));
        let obj = heap.alloc(JsObject::new(with_proto, ObjectClass::Ordinary));
        assert_eq!(heap.collect(&shapes, vec![obj]), 0);
        assert!(heap.is_live(proto));
    }
}
