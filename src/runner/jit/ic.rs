//! Inline caches.
//!
//! Every IC-carrying instruction owns one `IcSlot`: a short list of
//! `(guard, handler)` stubs. A lookup scans the stubs newest first and uses
//! the first one whose guard matches the operands; a miss runs the generic
//! operation and may attach a new stub. Once the attach limit is reached the
//! slot goes megamorphic, drops its stubs and stops attaching.
//!
//! Stubs are plain data. All tiers execute them through the same handler
//! code, and the optimizer reads them as type feedback.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::runner::ds::object::{Intrinsic, ObjectId, TypedArrayKind};
use crate::runner::ds::shape::ShapeId;
use crate::runner::ds::value::{JsValue, TypeTag};
use crate::runner::jit::bytecode::FunctionTemplate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IcKind {
    GetProp,
    SetProp,
    GetElem,
    SetElem,
    GetName,
    SetName,
    BinaryArith,
    UnaryArith,
    Compare,
    Call,
    New,
}

impl IcKind {
    pub fn name(&self) -> &'static str {
        match self {
            IcKind::GetProp => "GetProp",
            IcKind::SetProp => "SetProp",
            IcKind::GetElem => "GetElem",
            IcKind::SetElem => "SetElem",
            IcKind::GetName => "GetName",
            IcKind::SetName => "SetName",
            IcKind::BinaryArith => "BinaryArith",
            IcKind::UnaryArith => "UnaryArith",
            IcKind::Compare => "Compare",
            IcKind::Call => "Call",
            IcKind::New => "New",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcState {
    Uninitialized,
    Monomorphic,
    Polymorphic,
    Megamorphic,
}

impl IcState {
    pub fn name(&self) -> &'static str {
        match self {
            IcState::Uninitialized => "Uninitialized",
            IcState::Monomorphic => "Monomorphic",
            IcState::Polymorphic => "Polymorphic",
            IcState::Megamorphic => "Megamorphic",
        }
    }
}

/// State of the global object observed by name ICs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalState {
    pub shape: ShapeId,
    pub lexical_epoch: u64,
    pub generation: u32,
}

/// What a guard is checked against. Only the fields relevant to the IC kind
/// are filled in.
#[derive(Clone, Copy, Debug, Default)]
pub struct IcDescriptor {
    pub shape: Option<ShapeId>,
    pub lhs: Option<TypeTag>,
    pub rhs: Option<TypeTag>,
    pub callee: Option<ObjectId>,
    pub global: Option<GlobalState>,
}

impl IcDescriptor {
    pub fn for_value(value: &JsValue, shape: Option<ShapeId>) -> Self {
        IcDescriptor {
            shape,
            lhs: Some(value.type_tag()),
            ..IcDescriptor::default()
        }
    }

    pub fn for_pair(a: &JsValue, b: &JsValue) -> Self {
        IcDescriptor {
            lhs: Some(a.type_tag()),
            rhs: Some(b.type_tag()),
            ..IcDescriptor::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcGuard {
    Shape(ShapeId),
    Type(TypeTag),
    Types(TypeTag, TypeTag),
    Global { shape: ShapeId, lexical_epoch: u64 },
    GlobalConstant { shape: ShapeId, lexical_epoch: u64, generation: u32 },
    Callee(ObjectId),
}

impl IcGuard {
    pub fn matches(&self, d: &IcDescriptor) -> bool {
        match self {
            IcGuard::Shape(s) => d.shape == Some(*s),
            IcGuard::Type(t) => d.lhs == Some(*t),
            IcGuard::Types(a, b) => d.lhs == Some(*a) && d.rhs == Some(*b),
            IcGuard::Global { shape, lexical_epoch } => {
                matches!(d.global, Some(g) if g.shape == *shape && g.lexical_epoch == *lexical_epoch)
            }
            IcGuard::GlobalConstant { shape, lexical_epoch, generation } => matches!(
                d.global,
                Some(g) if g.shape == *shape && g.lexical_epoch == *lexical_epoch && g.generation == *generation
            ),
            IcGuard::Callee(id) => d.callee == Some(*id),
        }
    }
}

#[derive(Clone, Debug)]
pub enum IcHandler {
    LoadSlot { slot: u32 },
    LoadProtoSlot { holder: ObjectId, holder_shape: ShapeId, slot: u32 },
    ArrayLength,
    TypedArrayLength,
    StringLength,
    StoreSlot { slot: u32 },
    AddSlot { new_shape: ShapeId },
    LoadDenseElement,
    StoreDenseElement,
    AppendDenseElement,
    LoadTypedArrayElement { kind: TypedArrayKind },
    StoreTypedArrayElement { kind: TypedArrayKind },
    LoadGlobalSlot { slot: u32 },
    LoadGlobalConstant { slot: u32, value: JsValue },
    LoadGlobalLexical { index: u32 },
    StoreGlobalSlot { slot: u32 },
    Int32Arith,
    DoubleArith,
    StringConcat,
    Int32Unary,
    DoubleUnary,
    Int32Compare,
    DoubleCompare,
    StringCompare,
    CallScriptedFunction { template: Arc<FunctionTemplate> },
    CallInlinedFunction { template: Arc<FunctionTemplate> },
    CallNativeFunction { name: &'static str, intrinsic: Option<Intrinsic> },
}

impl IcHandler {
    /// Stub kind as reported by `disassembleInlineCaches`.
    pub fn name(&self) -> &'static str {
        match self {
            IcHandler::LoadSlot { .. } => "LoadSlot",
            IcHandler::LoadProtoSlot { .. } => "LoadProtoSlot",
            IcHandler::ArrayLength => "ArrayLength",
            IcHandler::TypedArrayLength => "TypedArrayLength",
            IcHandler::StringLength => "StringLength",
            IcHandler::StoreSlot { .. } => "StoreSlot",
            IcHandler::AddSlot { .. } => "AddSlot",
            IcHandler::LoadDenseElement => "LoadDenseElement",
            IcHandler::StoreDenseElement => "StoreDenseElement",
            IcHandler::AppendDenseElement => "AppendDenseElement",
            IcHandler::LoadTypedArrayElement { .. } => "LoadTypedArrayElement",
            IcHandler::StoreTypedArrayElement { .. } => "StoreTypedArrayElement",
            IcHandler::LoadGlobalSlot { .. } => "LoadGlobalSlot",
            IcHandler::LoadGlobalConstant { .. } => "LoadGlobalConstant",
            IcHandler::LoadGlobalLexical { .. } => "LoadGlobalLexical",
            IcHandler::StoreGlobalSlot { .. } => "StoreGlobalSlot",
            IcHandler::Int32Arith => "Int32Arith",
            IcHandler::DoubleArith => "DoubleArith",
            IcHandler::StringConcat => "StringConcat",
            IcHandler::Int32Unary => "Int32Unary",
            IcHandler::DoubleUnary => "DoubleUnary",
            IcHandler::Int32Compare => "Int32Compare",
            IcHandler::DoubleCompare => "DoubleCompare",
            IcHandler::StringCompare => "StringCompare",
            IcHandler::CallScriptedFunction { .. } => "CallScriptedFunction",
            IcHandler::CallInlinedFunction { .. } => "CallInlinedFunction",
            IcHandler::CallNativeFunction { .. } => "CallNativeFunction",
        }
    }

    pub fn template(&self) -> Option<&Arc<FunctionTemplate>> {
        match self {
            IcHandler::CallScriptedFunction { template } | IcHandler::CallInlinedFunction { template } => {
                Some(template)
            }
            _ => None,
        }
    }
}

impl PartialEq for IcHandler {
    fn eq(&self, other: &Self) -> bool {
        use IcHandler::*;
        match (self, other) {
            (LoadSlot { slot: a }, LoadSlot { slot: b })
            | (StoreSlot { slot: a }, StoreSlot { slot: b })
            | (LoadGlobalSlot { slot: a }, LoadGlobalSlot { slot: b })
            | (StoreGlobalSlot { slot: a }, StoreGlobalSlot { slot: b })
            | (LoadGlobalLexical { index: a }, LoadGlobalLexical { index: b }) => a == b,
            (
                LoadProtoSlot { holder: h1, holder_shape: s1, slot: a },
                LoadProtoSlot { holder: h2, holder_shape: s2, slot: b },
            ) => h1 == h2 && s1 == s2 && a == b,
            (AddSlot { new_shape: a }, AddSlot { new_shape: b }) => a == b,
            (LoadTypedArrayElement { kind: a }, LoadTypedArrayElement { kind: b })
            | (StoreTypedArrayElement { kind: a }, StoreTypedArrayElement { kind: b }) => a == b,
            (LoadGlobalConstant { slot: a, value: v }, LoadGlobalConstant { slot: b, value: w }) => {
                a == b && v == w
            }
            (CallScriptedFunction { template: a }, CallScriptedFunction { template: b })
            | (CallInlinedFunction { template: a }, CallInlinedFunction { template: b }) => Arc::ptr_eq(a, b),
            (CallNativeFunction { name: a, .. }, CallNativeFunction { name: b, .. }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IcStub {
    pub guard: IcGuard,
    pub handler: IcHandler,
    pub hits: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    Duplicate,
    /// This attach pushed the slot over the limit.
    WentMegamorphic,
    Megamorphic,
}

#[derive(Clone, Debug)]
pub struct IcSlot {
    pub kind: IcKind,
    pub pc: u32,
    pub stubs: SmallVec<[IcStub; 4]>,
    pub state: IcState,
    /// Number of times the instruction executed through this slot.
    pub entered: u32,
}

impl IcSlot {
    pub fn new(kind: IcKind, pc: u32) -> Self {
        IcSlot {
            kind,
            pc,
            stubs: SmallVec::new(),
            state: IcState::Uninitialized,
            entered: 0,
        }
    }

    /// Indices of stubs whose guard matches, newest first.
    pub fn candidates<'a>(&'a self, d: &'a IcDescriptor) -> impl Iterator<Item = usize> + 'a {
        self.stubs
            .iter()
            .enumerate()
            .rev()
            .filter(move |(_, stub)| stub.guard.matches(d))
            .map(|(i, _)| i)
    }

    /// First matching stub, newest first.
    pub fn lookup(&self, d: &IcDescriptor) -> Option<&IcStub> {
        self.stubs.iter().rev().find(|stub| stub.guard.matches(d))
    }

    pub fn record_hit(&mut self, index: usize) {
        if let Some(stub) = self.stubs.get_mut(index) {
            stub.hits = stub.hits.saturating_add(1);
        }
    }

    pub fn attach(&mut self, guard: IcGuard, handler: IcHandler, limit: usize) -> AttachOutcome {
        if self.state == IcState::Megamorphic {
            return AttachOutcome::Megamorphic;
        }
        if self
            .stubs
            .iter()
            .any(|s| s.guard == guard && s.handler == handler)
        {
            return AttachOutcome::Duplicate;
        }
        if self.stubs.len() >= limit {
            tracing::trace!(kind = self.kind.name(), pc = self.pc, "IC went megamorphic");
            self.stubs.clear();
            self.state = IcState::Megamorphic;
            return AttachOutcome::WentMegamorphic;
        }
        tracing::trace!(kind = self.kind.name(), pc = self.pc, stub = handler.name(), "IC stub attached");
        self.stubs.push(IcStub { guard, handler, hits: 0 });
        self.state = if self.stubs.len() == 1 {
            IcState::Monomorphic
        } else {
            IcState::Polymorphic
        };
        AttachOutcome::Attached
    }

    /// Drops the stub at `index`; used when a stub's handler can no longer
    /// succeed (for example a prototype holder changed shape).
    pub fn remove(&mut self, index: usize) {
        if index < self.stubs.len() {
            self.stubs.remove(index);
            self.state = match self.stubs.len() {
                0 => IcState::Uninitialized,
                1 => IcState::Monomorphic,
                _ => IcState::Polymorphic,
            };
        }
    }

    pub fn reset(&mut self) {
        self.stubs.clear();
        self.state = IcState::Uninitialized;
        self.entered = 0;
    }

    /// The single call target of a monomorphic call site.
    pub fn monomorphic_template(&self) -> Option<&Arc<FunctionTemplate>> {
        if self.state != IcState::Monomorphic {
            return None;
        }
        self.stubs.first().and_then(|s| s.handler.template())
    }

    /// Rewrites a monomorphic `CallScriptedFunction` stub whose callee body is
    /// at most `max_len` instructions into `CallInlinedFunction`.
    pub fn trial_inline(&mut self, max_len: usize) -> bool {
        if self.kind != IcKind::Call || self.state != IcState::Monomorphic {
            return false;
        }
        let Some(stub) = self.stubs.first_mut() else {
            return false;
        };
        let IcHandler::CallScriptedFunction { template } = &stub.handler else {
            return false;
        };
        let small = match template.script() {
            Ok(script) => script.code.len() <= max_len && !script.has_handlers() && !script.has_debugger,
            Err(_) => false,
        };
        if !small {
            return false;
        }
        tracing::trace!(pc = self.pc, callee = %template.display_name(), "trial inlining call site");
        stub.handler = IcHandler::CallInlinedFunction { template: template.clone() };
        true
    }

    /// Drops `LoadGlobalConstant` stubs cut for an older generation of the
    /// global object. They can never match again, and their embedded values
    /// must not outlive the constant.
    pub fn drop_stale_constants(&mut self, generation: u32) -> usize {
        let before = self.stubs.len();
        self.stubs.retain(|stub| match stub.guard {
            IcGuard::GlobalConstant { generation: g, .. } => g == generation,
            _ => true,
        });
        if self.stubs.is_empty() && self.state != IcState::Megamorphic {
            self.state = IcState::Uninitialized;
        }
        before - self.stubs.len()
    }

    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        for stub in &self.stubs {
            if let IcGuard::Callee(id) = stub.guard {
                visit(id);
            }
            match &stub.handler {
                IcHandler::LoadProtoSlot { holder, .. } => visit(*holder),
                IcHandler::LoadGlobalConstant { value: JsValue::Object(id), .. } => visit(*id),
                _ => {}
            }
        }
    }
}

impl fmt::Display for IcSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{} {}", self.kind.name(), self.pc, self.state.name())?;
        if !self.stubs.is_empty() {
            let names: Vec<&str> = self.stubs.iter().map(|s| s.handler.name()).collect();
            write!(f, ": {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// One line per IC slot, e.g. `#0 GetProp @4 Monomorphic: LoadSlot`.
pub fn disassemble(slots: &[IcSlot]) -> String {
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| format!("#{} {}\n", i, slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_desc(n: u32) -> IcDescriptor {
        IcDescriptor {
            shape: Some(ShapeId(n)),
            ..IcDescriptor::default()
        }
    }

    #[test]
    fn newest_matching_stub_wins() {
        let mut slot = IcSlot::new(IcKind::GetProp, 3);
        slot.attach(IcGuard::Shape(ShapeId(1)), IcHandler::LoadSlot { slot: 0 }, 6);
        slot.attach(IcGuard::Shape(ShapeId(1)), IcHandler::LoadSlot { slot: 2 }, 6);
        slot.attach(IcGuard::Shape(ShapeId(2)), IcHandler::LoadSlot { slot: 1 }, 6);
        let hit = slot.lookup(&shape_desc(1)).unwrap();
        assert_eq!(hit.handler, IcHandler::LoadSlot { slot: 2 });
        let order: Vec<usize> = slot.candidates(&shape_desc(1)).collect();
        assert_eq!(order, vec![1, 0]);
        assert!(slot.lookup(&shape_desc(9)).is_none());
        assert_eq!(slot.state, IcState::Polymorphic);
    }

    #[test]
    fn attach_dedupes_and_goes_megamorphic() {
        let mut slot = IcSlot::new(IcKind::GetProp, 0);
        assert_eq!(
            slot.attach(IcGuard::Shape(ShapeId(1)), IcHandler::LoadSlot { slot: 0 }, 2),
            AttachOutcome::Attached
        );
        assert_eq!(
            slot.attach(IcGuard::Shape(ShapeId(1)), IcHandler::LoadSlot { slot: 0 }, 2),
            AttachOutcome::Duplicate
        );
        assert_eq!(slot.state, IcState::Monomorphic);
        slot.attach(IcGuard::Shape(ShapeId(2)), IcHandler::LoadSlot { slot: 0 }, 2);
        assert_eq!(
            slot.attach(IcGuard::Shape(ShapeId(3)), IcHandler::LoadSlot { slot: 0 }, 2),
            AttachOutcome::WentMegamorphic
        );
        assert!(slot.stubs.is_empty());
        assert_eq!(
            slot.attach(IcGuard::Shape(ShapeId(4)), IcHandler::LoadSlot { slot: 0 }, 2),
            AttachOutcome::Megamorphic
        );
    }

    #[test]
    fn global_constant_guard_checks_generation() {
        let guard = IcGuard::GlobalConstant {
            shape: ShapeId(5),
            lexical_epoch: 0,
            generation: 1,
        };
        let mut d = IcDescriptor {
            global: Some(GlobalState { shape: ShapeId(5), lexical_epoch: 0, generation: 1 }),
            ..IcDescriptor::default()
        };
        assert!(guard.matches(&d));
        d.global = Some(GlobalState { shape: ShapeId(5), lexical_epoch: 0, generation: 2 });
        assert!(!guard.matches(&d));
        assert!(IcGuard::Global { shape: ShapeId(5), lexical_epoch: 0 }.matches(&d));
    }

    #[test]
    fn stale_global_constants_are_dropped() {
        let mut slot = IcSlot::new(IcKind::GetName, 0);
        let constant = |generation| IcGuard::GlobalConstant { shape: ShapeId(5), lexical_epoch: 0, generation };
        slot.attach(constant(0), IcHandler::LoadGlobalConstant { slot: 0, value: JsValue::Object(ObjectId(9)) }, 6);
        slot.attach(constant(1), IcHandler::LoadGlobalConstant { slot: 1, value: JsValue::from_i32(2) }, 6);
        assert_eq!(slot.drop_stale_constants(1), 1);
        let mut traced = Vec::new();
        slot.trace(|id| traced.push(id));
        assert!(traced.is_empty());
        assert_eq!(slot.stubs.len(), 1);

        assert_eq!(slot.drop_stale_constants(2), 1);
        assert_eq!(slot.state, IcState::Uninitialized);
    }

    #[test]
    fn disassembly_format() {
        let mut slot = IcSlot::new(IcKind::GetProp, 4);
        slot.attach(IcGuard::Shape(ShapeId(1)), IcHandler::LoadSlot { slot: 0 }, 6);
        let fresh = IcSlot::new(IcKind::Call, 9);
        assert_eq!(
            disassemble(&[slot, fresh]),
            "#0 GetProp @4 Monomorphic: LoadSlot\n#1 Call @9 Uninitialized\n"
        );
    }
}
