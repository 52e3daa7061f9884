//! The optimizing tier.
//!
//! Compilation is split in two halves so it can run on another thread:
//! `snapshot` copies everything the compiler reads out of the realm (the
//! script, its IC feedback and the feedback of every callee that may be
//! inlined) into a `MirInput`, and `compile` turns that input into an
//! `OptimizedCode` without touching the realm. `install` then checks that
//! nothing the code assumed has changed in the meantime, registers the
//! code's fuse dependencies and switches the script over.

pub mod analysis;
pub mod bailout;
pub mod builder;
pub mod executor;
pub mod float32;
pub mod mir;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::runner::config::EngineOptions;
use crate::runner::ds::object::ObjectId;
use crate::runner::ds::realm::Realm;
use crate::runner::jit::bytecode::Script;
use crate::runner::jit::fuse::{CodeRef, RealmFuseId};
use crate::runner::jit::ic::{IcGuard, IcHandler, IcSlot};
use crate::runner::jit::tiering::{ExecutionTier, ScriptId};

use self::mir::MirGraph;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssertionKind {
    Float32,
    RecoveredOnBailout,
}

impl AssertionKind {
    pub fn name(&self) -> &'static str {
        match self {
            AssertionKind::Float32 => "assertFloat32",
            AssertionKind::RecoveredOnBailout => "assertRecoveredOnBailout",
        }
    }
}

/// What the compiler concluded at one `assertFloat32` or
/// `assertRecoveredOnBailout` call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub line: u32,
    pub kind: AssertionKind,
    pub expected: bool,
    pub actual: bool,
}

impl AssertionOutcome {
    pub fn holds(&self) -> bool {
        self.expected == self.actual
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    pub entries: Vec<AssertionOutcome>,
}

impl OptimizationReport {
    pub fn failures(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.entries.iter().filter(|e| !e.holds())
    }
}

pub struct OptimizedCode {
    pub code_id: u64,
    pub script_id: ScriptId,
    /// Epoch of the script when the snapshot was taken.
    pub epoch: u64,
    pub invalidated: AtomicBool,
    pub graph: MirGraph,
}

impl OptimizedCode {
    pub fn code_ref(&self) -> CodeRef {
        CodeRef { script: self.script_id, code_id: self.code_id }
    }
}

/// Why a compilation did not produce code. Structural failures will never
/// succeed for this script and disable the optimizer for it.
#[derive(Clone, Debug)]
pub struct CompileFailure {
    pub reason: String,
    pub structural: bool,
}

impl CompileFailure {
    pub fn structural(reason: impl Into<String>) -> Self {
        CompileFailure { reason: reason.into(), structural: true }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        CompileFailure { reason: reason.into(), structural: false }
    }
}

/// A script and a copy of its IC feedback.
#[derive(Clone)]
pub struct ScriptSnapshot {
    pub script_id: ScriptId,
    pub script: Arc<Script>,
    pub ics: Vec<IcSlot>,
}

/// Everything an optimized compilation reads. Owns its data so it can be
/// sent to a compile thread.
pub struct MirInput {
    pub code_id: u64,
    pub epoch: u64,
    pub root: ScriptSnapshot,
    /// Inlining candidates by template id.
    pub callees: HashMap<u64, ScriptSnapshot>,
    pub species_intact: bool,
    pub global_generation: u32,
    pub options: EngineOptions,
}

impl MirInput {
    /// Objects referenced from the copied feedback; they must stay alive
    /// while the compilation is in flight.
    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        let snapshots = std::iter::once(&self.root).chain(self.callees.values());
        for snapshot in snapshots {
            for ic in &snapshot.ics {
                ic.trace(&mut visit);
            }
        }
    }
}

fn inlined_template(ic: &IcSlot) -> Option<&Arc<crate::runner::jit::bytecode::FunctionTemplate>> {
    match ic.stubs.as_slice() {
        [stub] => match (&stub.guard, &stub.handler) {
            (IcGuard::Callee(_), IcHandler::CallInlinedFunction { template }) => Some(template),
            _ => None,
        },
        _ => None,
    }
}

/// Copies the feedback of `script_id` and of every callee reachable through
/// `CallInlinedFunction` stubs, up to the inlining depth.
pub fn snapshot(realm: &mut Realm, script_id: ScriptId, code_id: u64, options: &EngineOptions) -> MirInput {
    let runtime = realm.runtime(script_id);
    let root = ScriptSnapshot {
        script_id,
        script: runtime.script.clone(),
        ics: runtime.ics.clone(),
    };
    let epoch = runtime.epoch;

    let mut callees: HashMap<u64, ScriptSnapshot> = HashMap::new();
    let mut frontier: Vec<(Vec<IcSlot>, u32)> = vec![(root.ics.clone(), 0)];
    while let Some((ics, depth)) = frontier.pop() {
        if depth >= options.max_inline_depth {
            continue;
        }
        for ic in &ics {
            let Some(template) = inlined_template(ic) else {
                continue;
            };
            if callees.contains_key(&template.id) {
                continue;
            }
            let Ok(script) = template.script() else {
                continue;
            };
            let id = realm.runtime_for(&script);
            let callee_ics = realm.runtime(id).ics.clone();
            frontier.push((callee_ics.clone(), depth + 1));
            callees.insert(
                template.id,
                ScriptSnapshot { script_id: id, script, ics: callee_ics },
            );
        }
    }

    let global_generation = realm
        .heap
        .get(realm.global)
        .fuse
        .as_ref()
        .map(|f| f.generation())
        .unwrap_or(0);
    MirInput {
        code_id,
        epoch,
        root,
        callees,
        species_intact: realm.fuses.intact(RealmFuseId::OptimizeTypedArraySpeciesFuse),
        global_generation,
        options: options.clone(),
    }
}

/// Builds optimized code from a snapshot. Never touches the realm.
pub fn compile(input: &MirInput) -> Result<OptimizedCode, CompileFailure> {
    let script = &input.root.script;
    if script.has_handlers() {
        return Err(CompileFailure::structural("exception handlers"));
    }
    if script.has_debugger {
        return Err(CompileFailure::structural("debugger statement"));
    }
    if script.code.len() > input.options.ion_max_script_length {
        return Err(CompileFailure::structural("script too long"));
    }
    let graph = builder::build(input)?;
    Ok(OptimizedCode {
        code_id: input.code_id,
        script_id: input.root.script_id,
        epoch: input.epoch,
        invalidated: AtomicBool::new(false),
        graph,
    })
}

/// Installs finished code if everything it assumed still holds. Returns
/// false when the code was discarded.
pub fn install(realm: &mut Realm, code: OptimizedCode, global_generation: u32) -> bool {
    let script_id = code.script_id;
    let runtime = realm.runtime(script_id);
    if runtime.epoch != code.epoch || runtime.ion_disabled {
        tracing::debug!(script = %runtime.script.display_name(), "discarding optimized code from an old epoch");
        return false;
    }
    if code.graph.deps.realm_fuses.iter().any(|id| !realm.fuses.intact(*id)) {
        tracing::debug!(script = %runtime.script.display_name(), "discarding optimized code: realm fuse popped");
        return false;
    }
    let global = realm.heap.get(realm.global);
    let current_generation = global.fuse.as_ref().map(|f| f.generation()).unwrap_or(0);
    if !code.graph.deps.global_constants.is_empty() && current_generation != global_generation {
        tracing::debug!(script = %runtime.script.display_name(), "discarding optimized code: global generation moved");
        return false;
    }

    let code_ref = code.code_ref();
    for id in &code.graph.deps.realm_fuses {
        realm.fuses.depend_on(*id, code_ref);
    }
    let global = realm.global;
    if let Some(fuse) = realm.heap.get_mut(global).fuse.as_mut() {
        for name in &code.graph.deps.global_constants {
            fuse.depend_on(name, code_ref);
        }
    }

    let runtime = realm.runtime_mut(script_id);
    tracing::debug!(
        script = %runtime.script.display_name(),
        ops = code.graph.ops.len(),
        inlined = code.graph.inlined_calls,
        "optimized code installed"
    );
    runtime.report = code.graph.report.clone();
    runtime.optimized = Some(Arc::new(code));
    runtime.tier = ExecutionTier::Optimized;
    runtime.ion_pending = false;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;

    fn input_for(source: &str) -> MirInput {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("opt.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut realm = Realm::new();
        let id = realm.runtime_for(&script);
        snapshot(&mut realm, id, 1, &EngineOptions::default())
    }

    #[test]
    fn handlers_are_a_structural_failure() {
        let input = input_for("try { x(); } catch (e) {}");
        let failure = compile(&input).err().unwrap();
        assert!(failure.structural);
    }

    #[test]
    fn straight_line_code_compiles_without_feedback() {
        let input = input_for("var a = 1; var b = a + 2; b;");
        let code = compile(&input).unwrap();
        assert!(code.graph.ops.len() > 0);
        assert_eq!(code.graph.scripts.len(), 1);
    }

    #[test]
    fn stale_epochs_are_not_installed() {
        let program = JsParser::parse_to_ast_from_str("1 + 1;").unwrap();
        let name: Arc<str> = Arc::from("opt.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut realm = Realm::new();
        let id = realm.runtime_for(&script);
        let input = snapshot(&mut realm, id, 7, &EngineOptions::default());
        let code = compile(&input).unwrap();
        realm.runtime_mut(id).epoch += 1;
        assert!(!install(&mut realm, code, input.global_generation));
        assert!(realm.runtime(id).optimized.is_none());
    }

    #[test]
    fn installing_switches_the_tier() {
        let program = JsParser::parse_to_ast_from_str("1 + 1;").unwrap();
        let name: Arc<str> = Arc::from("opt.js");
        let script = Arc::new(compile_script(&program, &name, 0, false).unwrap());
        let mut realm = Realm::new();
        let id = realm.runtime_for(&script);
        let input = snapshot(&mut realm, id, 3, &EngineOptions::default());
        let code = compile(&input).unwrap();
        assert!(install(&mut realm, code, input.global_generation));
        assert_eq!(realm.runtime(id).tier, ExecutionTier::Optimized);
        assert!(realm.runtime(id).live_optimized().is_some());
    }
}
