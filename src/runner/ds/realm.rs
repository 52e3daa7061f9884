//! The realm: the single owner of all mutable engine state for one global
//! environment. Heap, shape table, fuses, global bindings and per-script
//! runtime records all live here and are only reached through it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::runner::ds::heap::Heap;
use crate::runner::ds::object::{JsObject, ObjectClass, ObjectId, TypedArrayKind};
use crate::runner::ds::shape::{ShapeFlags, ShapeId, ShapeTable};
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::Script;
use crate::runner::jit::fuse::{CodeRef, ObjectFuse, RealmFuses};
use crate::runner::jit::tiering::{ScriptId, ScriptRuntime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RealmId(pub Uuid);

pub struct LexicalBinding {
    pub name: Arc<str>,
    /// `None` while in the temporal dead zone.
    pub value: Option<JsValue>,
    pub constant: bool,
}

/// Top-level `let`/`const` bindings. Bindings are never removed, so an index
/// stays valid for the lifetime of the realm.
#[derive(Default)]
pub struct GlobalLexicals {
    bindings: IndexMap<Arc<str>, LexicalBinding>,
}

impl GlobalLexicals {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.bindings.get_index_of(name)
    }

    pub fn get(&self, index: usize) -> Option<&LexicalBinding> {
        self.bindings.get_index(index).map(|(_, b)| b)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut LexicalBinding> {
        self.bindings.get_index_mut(index).map(|(_, b)| b)
    }

    pub fn declare(&mut self, name: &Arc<str>, constant: bool) -> usize {
        let (index, _) = self.bindings.insert_full(
            name.clone(),
            LexicalBinding {
                name: name.clone(),
                value: None,
                constant,
            },
        );
        index
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &JsValue> {
        self.bindings.values().filter_map(|b| b.value.as_ref())
    }
}

/// Objects the engine needs to find without a property lookup.
pub struct Intrinsics {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub error_prototype: ObjectId,
    pub array_buffer_prototype: ObjectId,
    /// `%TypedArray%.prototype`, holding the shared typed array methods.
    pub typed_array_prototype: ObjectId,
    /// Indexed by `TypedArrayKind::index`.
    pub typed_array_prototypes: Vec<ObjectId>,
    pub native_error_prototypes: IndexMap<&'static str, ObjectId>,
    pub constructors: IndexMap<&'static str, ObjectId>,
}

impl Intrinsics {
    pub fn typed_array_prototype_for(&self, kind: TypedArrayKind) -> ObjectId {
        self.typed_array_prototypes[kind.index()]
    }

    pub fn error_prototype_for(&self, name: &str) -> ObjectId {
        self.native_error_prototypes
            .get(name)
            .copied()
            .unwrap_or(self.error_prototype)
    }

    fn all(&self) -> Vec<ObjectId> {
        let mut ids = vec![
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.error_prototype,
            self.array_buffer_prototype,
            self.typed_array_prototype,
        ];
        ids.extend(self.typed_array_prototypes.iter().copied());
        ids.extend(self.native_error_prototypes.values().copied());
        ids.extend(self.constructors.values().copied());
        ids
    }
}

pub struct Realm {
    pub id: RealmId,
    pub heap: Heap,
    pub shapes: ShapeTable,
    pub fuses: RealmFuses,
    pub global: ObjectId,
    pub lexicals: GlobalLexicals,
    pub intrinsics: Intrinsics,
    pub scripts: Vec<ScriptRuntime>,
    script_ids: HashMap<u64, ScriptId>,
    /// Source hashes of scripts that have been baseline compiled.
    pub baseline_hints: HashSet<u64>,
    pub pending_invalidations: Vec<ScriptId>,
    /// Bumped whenever a global lexical binding is declared.
    pub lexical_epoch: u64,
}

impl Realm {
    /// Creates a realm with the bare prototype objects in place. Builtin
    /// functions are installed separately by the standard library.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let mut shapes = ShapeTable::new();

        let root = shapes.empty_shape(None);
        let object_prototype = heap.alloc(JsObject::new(root, ObjectClass::Ordinary));
        let plain = shapes.empty_shape(Some(object_prototype));
        let ordinary = |heap: &mut Heap| heap.alloc(JsObject::new(plain, ObjectClass::Ordinary));
        let function_prototype = ordinary(&mut heap);
        let array_prototype = ordinary(&mut heap);
        let error_prototype = ordinary(&mut heap);
        let array_buffer_prototype = ordinary(&mut heap);
        let typed_array_prototype = ordinary(&mut heap);
        let per_kind = shapes.empty_shape(Some(typed_array_prototype));
        let typed_array_prototypes = TypedArrayKind::ALL
            .iter()
            .map(|_| heap.alloc(JsObject::new(per_kind, ObjectClass::Ordinary)))
            .collect();

        let global_shape = shapes.add_flags(plain, ShapeFlags::HAS_OBJECT_FUSE);
        let mut global_object = JsObject::new(global_shape, ObjectClass::Ordinary);
        global_object.fuse = Some(Box::new(ObjectFuse::new()));
        let global = heap.alloc(global_object);

        Realm {
            id: RealmId(Uuid::new_v4()),
            heap,
            shapes,
            fuses: RealmFuses::new(),
            global,
            lexicals: GlobalLexicals::default(),
            intrinsics: Intrinsics {
                object_prototype,
                function_prototype,
                array_prototype,
                error_prototype,
                array_buffer_prototype,
                typed_array_prototype,
                typed_array_prototypes,
                native_error_prototypes: IndexMap::new(),
                constructors: IndexMap::new(),
            },
            scripts: Vec::new(),
            script_ids: HashMap::new(),
            baseline_hints: HashSet::new(),
            pending_invalidations: Vec::new(),
            lexical_epoch: 0,
        }
    }

    pub fn alloc(&mut self, proto: Option<ObjectId>, class: ObjectClass) -> ObjectId {
        let shape = self.shapes.empty_shape(proto);
        self.heap.alloc(JsObject::new(shape, class))
    }

    pub fn alloc_ordinary(&mut self) -> ObjectId {
        let proto = self.intrinsics.object_prototype;
        self.alloc(Some(proto), ObjectClass::Ordinary)
    }

    pub fn shape_of(&self, id: ObjectId) -> ShapeId {
        self.heap.get(id).shape
    }

    /// The shape a freshly created typed array of `kind` gets.
    pub fn plain_typed_array_shape(&mut self, kind: TypedArrayKind) -> ShapeId {
        let proto = self.intrinsics.typed_array_prototype_for(kind);
        self.shapes.empty_shape(Some(proto))
    }

    pub fn script_id(&self, script: &Script) -> Option<ScriptId> {
        self.script_ids.get(&script.id).copied()
    }

    /// Returns the runtime record for `script`, creating it on first use.
    pub fn runtime_for(&mut self, script: &Arc<Script>) -> ScriptId {
        if let Some(id) = self.script_ids.get(&script.id) {
            return *id;
        }
        let id = ScriptId(self.scripts.len() as u32);
        self.scripts.push(ScriptRuntime::new(id, script.clone()));
        self.script_ids.insert(script.id, id);
        id
    }

    pub fn runtime(&self, id: ScriptId) -> &ScriptRuntime {
        &self.scripts[id.0 as usize]
    }

    pub fn runtime_mut(&mut self, id: ScriptId) -> &mut ScriptRuntime {
        &mut self.scripts[id.0 as usize]
    }

    /// Flags every listed compilation as invalid. The owning scripts are
    /// demoted at the next safepoint.
    pub fn invalidate(&mut self, codes: Vec<CodeRef>) {
        for code in codes {
            let Some(runtime) = self.scripts.get(code.script.0 as usize) else {
                continue;
            };
            let Some(optimized) = &runtime.optimized else {
                continue;
            };
            if optimized.code_id != code.code_id {
                continue;
            }
            if !optimized.invalidated.swap(true, Ordering::SeqCst) {
                tracing::debug!(script = %runtime.script.name, code_id = code.code_id, "optimized code invalidated");
                self.pending_invalidations.push(code.script);
            }
        }
    }

    /// Every object the realm itself keeps alive.
    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots = self.intrinsics.all();
        roots.push(self.global);
        for value in self.lexicals.values() {
            if let JsValue::Object(id) = value {
                roots.push(*id);
            }
        }
        for runtime in &self.scripts {
            runtime.trace(|id| roots.push(id));
        }
        roots
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_indices_are_stable() {
        let mut lexicals = GlobalLexicals::default();
        let a: Arc<str> = Arc::from("a");
        let b: Arc<str> = Arc::from("b");
        assert_eq!(lexicals.declare(&a, false), 0);
        assert_eq!(lexicals.declare(&b, true), 1);
        assert_eq!(lexicals.index_of("b"), Some(1));
        assert!(lexicals.get(1).map(|l| l.constant).unwrap_or(false));
        assert!(lexicals.get(0).map(|l| l.value.is_none()).unwrap_or(false));
    }

    #[test]
    fn fresh_realm_has_fused_global() {
        let realm = Realm::new();
        let global = realm.heap.get(realm.global);
        assert!(global.fuse.is_some());
        assert!(realm.shapes.get(global.shape).has_object_fuse());
        assert_eq!(realm.intrinsics.typed_array_prototypes.len(), TypedArrayKind::ALL.len());
    }
}
