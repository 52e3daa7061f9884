//! Fuses: realm-scoped invariants that compiled code may assume until they
//! are popped.
//!
//! Two flavours exist. *Realm fuses* are named booleans covering builtin
//! state (for example "no typed array species or prototype has been
//! touched"); they start intact and pop exactly once. *Object fuses* track
//! the constness of individual properties of one object (the global object,
//! or anything passed to `addObjectFuse`) together with a generation counter
//! that moves forward whenever a property leaves the `Constant` state.
//!
//! Popping never touches compiled code directly; it hands back the list of
//! dependent code so the realm can flag it and the VM can demote the owning
//! scripts at the next safepoint.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::runner::jit::tiering::ScriptId;

/// Identifies one optimized compilation of one script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodeRef {
    pub script: ScriptId,
    pub code_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RealmFuseId {
    /// Typed array constructors, their prototypes and `%TypedArray%.prototype`
    /// are untouched, so `subarray` and friends use the default species.
    OptimizeTypedArraySpeciesFuse,
    /// `Array`, `Array.prototype` are untouched.
    OptimizeArraySpeciesFuse,
}

impl RealmFuseId {
    pub const ALL: [RealmFuseId; 2] = [
        RealmFuseId::OptimizeTypedArraySpeciesFuse,
        RealmFuseId::OptimizeArraySpeciesFuse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RealmFuseId::OptimizeTypedArraySpeciesFuse => "OptimizeTypedArraySpeciesFuse",
            RealmFuseId::OptimizeArraySpeciesFuse => "OptimizeArraySpeciesFuse",
        }
    }
}

pub struct RealmFuses {
    intact: IndexMap<RealmFuseId, bool>,
    dependents: HashMap<RealmFuseId, Vec<CodeRef>>,
}

impl RealmFuses {
    pub fn new() -> Self {
        RealmFuses {
            intact: RealmFuseId::ALL.iter().map(|id| (*id, true)).collect(),
            dependents: HashMap::new(),
        }
    }

    pub fn intact(&self, id: RealmFuseId) -> bool {
        self.intact.get(&id).copied().unwrap_or(false)
    }

    /// Pops the fuse and returns the code that depended on it. Popping an
    /// already popped fuse is a no-op.
    pub fn pop(&mut self, id: RealmFuseId) -> Vec<CodeRef> {
        match self.intact.get_mut(&id) {
            Some(state) if *state => {
                *state = false;
                tracing::debug!(fuse = id.name(), "realm fuse popped");
                self.dependents.remove(&id).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    /// Records that `code` relies on `id`. Returns false if the fuse is already
    /// popped, in which case the code must not be installed.
    pub fn depend_on(&mut self, id: RealmFuseId, code: CodeRef) -> bool {
        if !self.intact(id) {
            return false;
        }
        self.dependents.entry(id).or_default().push(code);
        true
    }

    pub fn states(&self) -> Vec<(RealmFuseId, bool)> {
        self.intact.iter().map(|(id, intact)| (*id, *intact)).collect()
    }
}

impl Default for RealmFuses {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyFuseState {
    Untracked,
    Constant,
    NotConstant,
}

impl PropertyFuseState {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyFuseState::Untracked => "Untracked",
            PropertyFuseState::Constant => "Constant",
            PropertyFuseState::NotConstant => "NotConstant",
        }
    }
}

/// Generation counter that sticks at its maximum. Once saturated, no
/// property can become `Constant` again, so stale generations can never
/// alias a live one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaturatedGenerationCounter(u32);

impl SaturatedGenerationCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_saturated(&self) -> bool {
        self.0 == u32::MAX
    }

    pub fn bump(&mut self) {
        self.0 = self.0.saturating_add(1);
    }
}

#[derive(Default)]
pub struct ObjectFuse {
    generation: SaturatedGenerationCounter,
    states: IndexMap<Arc<str>, PropertyFuseState>,
    dependents: Vec<(Arc<str>, CodeRef)>,
}

impl ObjectFuse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u32 {
        self.generation.get()
    }

    pub fn state(&self, name: &str) -> PropertyFuseState {
        self.states
            .get(name)
            .copied()
            .unwrap_or(PropertyFuseState::Untracked)
    }

    /// A newly defined property starts out untracked.
    pub fn on_property_added(&mut self, name: &Arc<str>) {
        self.states.insert(name.clone(), PropertyFuseState::Untracked);
    }

    /// Applies a write. The first write makes the property `Constant` without
    /// touching the generation; a write to a `Constant` property always makes
    /// it `NotConstant`, bumps the generation and returns the dependents,
    /// whatever value is written.
    pub fn on_property_write(&mut self, name: &Arc<str>) -> Vec<CodeRef> {
        match self.state(name) {
            PropertyFuseState::Untracked => {
                let next = if self.generation.is_saturated() {
                    PropertyFuseState::NotConstant
                } else {
                    PropertyFuseState::Constant
                };
                self.states.insert(name.clone(), next);
                Vec::new()
            }
            PropertyFuseState::Constant => {
                self.states.insert(name.clone(), PropertyFuseState::NotConstant);
                self.bump(name)
            }
            PropertyFuseState::NotConstant => Vec::new(),
        }
    }

    /// Removing a property that was ever tracked bumps the generation.
    pub fn on_property_removed(&mut self, name: &Arc<str>) -> Vec<CodeRef> {
        match self.states.shift_remove(name) {
            Some(PropertyFuseState::Constant) | Some(PropertyFuseState::NotConstant) => self.bump(name),
            _ => Vec::new(),
        }
    }

    /// A lexical binding now hides the property from name lookups.
    pub fn on_property_shadowed(&mut self, name: &Arc<str>) -> Vec<CodeRef> {
        match self.state(name) {
            PropertyFuseState::Untracked => Vec::new(),
            _ => {
                self.states.insert(name.clone(), PropertyFuseState::NotConstant);
                self.bump(name)
            }
        }
    }

    pub fn depend_on(&mut self, name: &Arc<str>, code: CodeRef) {
        self.dependents.push((name.clone(), code));
    }

    fn bump(&mut self, name: &Arc<str>) -> Vec<CodeRef> {
        self.generation.bump();
        tracing::debug!(property = %name, generation = self.generation.get(), "object fuse generation bumped");
        let mut popped = Vec::new();
        self.dependents.retain(|(dep_name, code)| {
            if dep_name == name {
                popped.push(*code);
                false
            } else {
                true
            }
        });
        popped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(n: u64) -> CodeRef {
        CodeRef {
            script: ScriptId(0),
            code_id: n,
        }
    }

    #[test]
    fn realm_fuse_pops_once() {
        let mut fuses = RealmFuses::new();
        let id = RealmFuseId::OptimizeTypedArraySpeciesFuse;
        assert!(fuses.depend_on(id, code(1)));
        assert_eq!(fuses.pop(id), vec![code(1)]);
        assert!(!fuses.intact(id));
        assert!(fuses.pop(id).is_empty());
        assert!(!fuses.depend_on(id, code(2)));
        assert!(!fuses.intact(id));
    }

    #[test]
    fn first_write_is_free_second_write_bumps() {
        let mut fuse = ObjectFuse::new();
        let g: Arc<str> = Arc::from("g");
        fuse.on_property_added(&g);
        assert_eq!(fuse.state("g"), PropertyFuseState::Untracked);
        assert!(fuse.on_property_write(&g).is_empty());
        assert_eq!(fuse.state("g"), PropertyFuseState::Constant);
        assert_eq!(fuse.generation(), 0);

        fuse.depend_on(&g, code(7));
        assert_eq!(fuse.on_property_write(&g), vec![code(7)]);
        assert_eq!(fuse.state("g"), PropertyFuseState::NotConstant);
        assert_eq!(fuse.generation(), 1);

        assert!(fuse.on_property_write(&g).is_empty());
        assert_eq!(fuse.generation(), 1);
    }

    #[test]
    fn removal_and_shadowing_bump() {
        let mut fuse = ObjectFuse::new();
        let a: Arc<str> = Arc::from("a");
        let b: Arc<str> = Arc::from("b");
        fuse.on_property_added(&a);
        fuse.on_property_write(&a);
        fuse.on_property_added(&b);
        fuse.on_property_removed(&b);
        assert_eq!(fuse.generation(), 0);
        fuse.on_property_shadowed(&a);
        assert_eq!(fuse.generation(), 1);
        fuse.on_property_removed(&a);
        assert_eq!(fuse.generation(), 2);
    }

    #[test]
    fn dependents_are_per_property() {
        let mut fuse = ObjectFuse::new();
        let x: Arc<str> = Arc::from("x");
        let y: Arc<str> = Arc::from("y");
        for n in [&x, &y] {
            fuse.on_property_added(n);
            fuse.on_property_write(n);
        }
        fuse.depend_on(&x, code(1));
        fuse.depend_on(&y, code(2));
        assert_eq!(fuse.on_property_write(&y), vec![code(2)]);
        assert_eq!(fuse.on_property_write(&x), vec![code(1)]);
    }

    #[test]
    fn saturated_counter_stops_constness() {
        let mut counter = SaturatedGenerationCounter(u32::MAX - 1);
        counter.bump();
        counter.bump();
        assert!(counter.is_saturated());
        assert_eq!(counter.get(), u32::MAX);
    }
}
