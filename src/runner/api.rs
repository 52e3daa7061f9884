//! The embedding API.
//!
//! An `Engine` owns one realm and the VM that runs scripts in it. Values
//! handed out by the engine refer into its heap: an object handle stays
//! valid as long as something reachable from the global object (or a
//! running frame) still refers to it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::parser::JsParser;
use crate::runner::config::{CompileOptions, EngineOptions};
use crate::runner::ds::error::{CompileError, EngineError, Exception, JErrorType};
use crate::runner::ds::heap::HeapStats;
use crate::runner::ds::object::ObjectId;
use crate::runner::ds::operations::object::{self as obj_ops};
use crate::runner::ds::operations::type_conversion::to_string;
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::Script;
use crate::runner::jit::compiler::compile_script;
use crate::runner::jit::fuse::{PropertyFuseState, RealmFuseId};
use crate::runner::jit::ic::disassemble;
use crate::runner::jit::offthread::start_delazification;
use crate::runner::jit::opt::OptimizationReport;
use crate::runner::jit::tiering::{ExecutionTier, ScriptRuntime};
use crate::runner::jit::vm::{InterruptCallback, InterruptHandle, Vm};
use crate::runner::std_lib::install_builtins;
use crate::runner::std_lib::testing::function_template;

/// Snapshot of an object's constness tracking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectFuseState {
    pub generation: u32,
    /// In property order.
    pub properties: Vec<(Arc<str>, PropertyFuseState)>,
}

pub struct Engine {
    vm: Vm,
    delazifiers: Vec<JoinHandle<usize>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let mut realm = Realm::new();
        install_builtins(&mut realm, &options);
        tracing::debug!(realm = %realm.id.0, "engine created");
        Engine {
            vm: Vm::new(realm, options),
            delazifiers: Vec::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.vm.options
    }

    pub fn realm(&self) -> &Realm {
        &self.vm.realm
    }

    pub fn realm_mut(&mut self) -> &mut Realm {
        &mut self.vm.realm
    }

    // ── Compiling and running ────────────────────────────────

    /// Parses and compiles a top-level script. Nested function bodies are
    /// compiled according to `options.delazification`.
    pub fn compile(&mut self, source: &str, options: CompileOptions) -> Result<Arc<Script>, CompileError> {
        let line_offset = options.line.saturating_sub(1);
        let program = JsParser::parse_to_ast_from_str(source)
            .map_err(|e| CompileError::new(e.message, &options.filename, e.line + line_offset, e.column))?;
        let script = Arc::new(compile_script(&program, &options.filename, line_offset, options.strict)?);
        tracing::debug!(
            filename = %options.filename,
            functions = script.templates.len(),
            strategy = ?options.delazification,
            "script compiled"
        );
        self.delazifiers.retain(|handle| !handle.is_finished());
        if let Some(handle) = start_delazification(script.templates.clone(), options.delazification) {
            self.delazifiers.push(handle);
        }
        Ok(script)
    }

    pub fn run(&mut self, script: &Arc<Script>) -> Result<JsValue, EngineError> {
        self.vm.error_site = None;
        let result = self.vm.run_script(script.clone());
        result.map_err(|e| self.uncaught(e))
    }

    /// Compiles and runs `source` with default compile options.
    pub fn eval(&mut self, source: &str) -> Result<JsValue, EngineError> {
        let script = self.compile(source, CompileOptions::default())?;
        self.run(&script)
    }

    pub fn call(&mut self, callee: &JsValue, this: JsValue, args: Vec<JsValue>) -> Result<JsValue, EngineError> {
        self.vm.error_site = None;
        let result = self.vm.call_function(callee.clone(), this, args);
        result.map_err(|e| self.uncaught(e))
    }

    fn uncaught(&mut self, error: JErrorType) -> EngineError {
        if !error.is_catchable() {
            self.vm.error_site = None;
            return EngineError::Interrupted;
        }
        let value = self.vm.error_value(&error);
        let message = to_string(&self.vm.realm, &value).to_string();
        let (filename, line) = match self.vm.error_site.take() {
            Some((file, line)) => (Some(file), Some(line)),
            None => (None, None),
        };
        tracing::debug!(%message, "uncaught exception");
        EngineError::Uncaught(Exception { value, message, filename, line })
    }

    /// Blocks until background delazification and off-thread compilation
    /// have finished, installing any compiled code.
    pub fn wait_for_background_work(&mut self) {
        for handle in self.delazifiers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("delazification thread panicked");
            }
        }
        self.vm.finish_off_thread_work();
    }

    // ── Globals ──────────────────────────────────────────────

    /// Reads a global: top-level `let`/`const` first, then the global object.
    pub fn get_global(&self, name: &str) -> JsValue {
        let realm = &self.vm.realm;
        if let Some(binding) = realm.lexicals.index_of(name).and_then(|i| realm.lexicals.get(i)) {
            return binding.value.clone().unwrap_or_default();
        }
        obj_ops::get(realm, realm.global, name)
    }

    pub fn set_global(&mut self, name: &str, value: JsValue) -> Result<(), EngineError> {
        let realm = &mut self.vm.realm;
        if let Some(index) = realm.lexicals.index_of(name) {
            if let Some(binding) = realm.lexicals.get_mut(index) {
                binding.value = Some(value);
            }
            return Ok(());
        }
        let global = realm.global;
        let result = obj_ops::set(realm, global, &Arc::from(name), value, true);
        result.map_err(|e| self.uncaught(e))
    }

    /// Runs a full collection now. Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.vm.collect()
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.vm.realm.heap.stats()
    }

    // ── Interrupts and output ────────────────────────────────

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.vm.interrupt_handle()
    }

    /// Installs a callback consulted when an interrupt arrives. Returning
    /// `true` lets the script continue.
    pub fn set_interrupt_callback(&self, callback: Option<InterruptCallback>) {
        self.vm.set_interrupt_callback(callback);
    }

    /// Lines printed since the last call, when `capture_output` is set.
    pub fn printed_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.vm.output)
    }

    // ── Introspection ────────────────────────────────────────

    fn runtime_of(&self, function: &JsValue) -> Option<&ScriptRuntime> {
        let template = function_template(&self.vm.realm, function)?;
        let script = template.script().ok()?;
        let id = self.vm.realm.script_id(&script)?;
        Some(self.vm.realm.runtime(id))
    }

    pub fn has_baseline_hint(&self, function: &JsValue) -> bool {
        function_template(&self.vm.realm, function)
            .is_some_and(|t| self.vm.realm.baseline_hints.contains(&t.source_hash))
    }

    pub fn set_baseline_hint(&mut self, function: &JsValue) {
        if let Some(template) = function_template(&self.vm.realm, function) {
            self.vm.realm.baseline_hints.insert(template.source_hash);
        }
    }

    pub fn fuse_state(&self) -> Vec<(RealmFuseId, bool)> {
        self.vm.realm.fuses.states()
    }

    pub fn object_fuse_state(&self, object: &JsValue) -> Option<ObjectFuseState> {
        let id: ObjectId = object.as_object()?;
        let object = self.vm.realm.heap.get(id);
        let fuse = object.fuse.as_deref()?;
        let properties = self
            .vm
            .realm
            .shapes
            .get(object.shape)
            .keys()
            .map(|key| (key.clone(), fuse.state(key)))
            .collect();
        Some(ObjectFuseState { generation: fuse.generation(), properties })
    }

    pub fn add_object_fuse(&mut self, object: &JsValue) {
        if let Some(id) = object.as_object() {
            obj_ops::add_object_fuse(&mut self.vm.realm, id);
        }
    }

    /// The IC chains of a function, one line per slot. `None` if the
    /// function has never run.
    pub fn disassemble_inline_caches(&self, function: &JsValue) -> Option<String> {
        self.runtime_of(function).map(|runtime| disassemble(&runtime.ics))
    }

    /// The tier new calls of `function` would start in.
    pub fn script_tier(&self, function: &JsValue) -> Option<ExecutionTier> {
        self.runtime_of(function).map(ScriptRuntime::entry_tier)
    }

    /// Tier reached by a top-level script.
    pub fn top_level_tier(&self, script: &Script) -> Option<ExecutionTier> {
        let id = self.vm.realm.script_id(script)?;
        Some(self.vm.realm.runtime(id).tier)
    }

    /// Assertion outcomes from the last optimized compilation of `function`.
    pub fn optimization_report(&self, function: &JsValue) -> Option<OptimizationReport> {
        self.runtime_of(function).map(|runtime| runtime.report.clone())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for handle in self.delazifiers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineOptions { capture_output: true, ..EngineOptions::interpreter_only() })
    }

    #[test]
    fn eval_returns_the_completion_value() {
        let mut engine = engine();
        assert_eq!(engine.eval("var x = 40; x + 2;").unwrap(), JsValue::from_i32(42));
        assert_eq!(engine.get_global("x"), JsValue::from_i32(40));
    }

    #[test]
    fn uncaught_exceptions_carry_their_location() {
        let mut engine = engine();
        let options = CompileOptions { line: 10, ..CompileOptions::with_filename("boom.js") };
        let script = engine.compile("var a;\nundefinedName;", options).unwrap();
        let error = engine.run(&script).unwrap_err();
        let exception = error.exception().unwrap();
        assert_eq!(exception.line, Some(11));
        assert_eq!(exception.filename.as_deref(), Some("boom.js"));
        assert!(exception.message.starts_with("ReferenceError"));
        assert!(exception.to_string().starts_with("boom.js:11: Uncaught ReferenceError"));
    }

    #[test]
    fn syntax_errors_are_compile_errors() {
        let mut engine = engine();
        let error = engine.eval("var = ;").unwrap_err();
        assert!(matches!(error, EngineError::Compile(_)));
    }

    #[test]
    fn globals_round_trip_including_lexicals() {
        let mut engine = engine();
        engine.eval("let counter = 1; function bump() { counter = counter + 1; return counter; }").unwrap();
        engine.set_global("counter", JsValue::from_i32(10)).unwrap();
        let bump = engine.get_global("bump");
        assert_eq!(engine.call(&bump, JsValue::Undefined, vec![]).unwrap(), JsValue::from_i32(11));
        assert_eq!(engine.get_global("counter"), JsValue::from_i32(11));
    }

    #[test]
    fn print_is_captured() {
        let mut engine = engine();
        engine.eval("print('a', 1); print(true);").unwrap();
        assert_eq!(engine.printed_output(), vec!["a 1".to_string(), "true".to_string()]);
        assert!(engine.printed_output().is_empty());
    }
}
