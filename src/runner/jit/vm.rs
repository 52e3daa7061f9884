//! The execution driver.
//!
//! `Vm` owns the frame stack and hands the top frame to whichever tier runs
//! it. Tiers return a `Step` after every call, return or tier change; the
//! driver then pushes, pops or re-dispatches. Calls from builtins back into
//! script re-enter the driver with a frame base so that a nested run stops
//! at the frame it started.
//!
//! Safepoints are taken at call entry and at loop heads. That is where
//! invalidated code is demoted, finished off-thread compilations are
//! installed and the garbage collector may run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runner::config::EngineOptions;
use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::{NativeFn, ObjectClass};
use crate::runner::ds::operations::object::{self as obj_ops, create_error};
use crate::runner::ds::operations::type_conversion::to_string;
use crate::runner::ds::realm::Realm;
use crate::runner::ds::shape::PropertyAttributes;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::baseline;
use crate::runner::jit::blinterp;
use crate::runner::jit::bytecode::{Instruction, Script};
use crate::runner::jit::frame::{Frame, OptFrame, OptSlot};
use crate::runner::jit::interpreter::{self, Step};
use crate::runner::jit::offthread::{Finished, OffThreadCompiler};
use crate::runner::jit::opt::{self, executor};
use crate::runner::jit::runtime::make_closure;
use crate::runner::jit::tiering::{ExecutionTier, ScriptId, TierAction};

pub type InterruptCallback = Box<dyn FnMut() -> bool + Send>;

/// Lets another thread stop a running script. The callback, if one is set,
/// runs on the script thread when the request is noticed and may decline it
/// by returning true.
#[derive(Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<InterruptCallback>>>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set_callback(&self, callback: Option<InterruptCallback>) {
        *self.callback.lock() = callback;
    }
}

/// Result of starting a call.
pub enum Invoked {
    /// A builtin ran to completion.
    Value(JsValue),
    /// A scripted frame was pushed; the driver runs it.
    Pushed,
}

pub struct Vm {
    pub realm: Realm,
    pub options: EngineOptions,
    pub frames: Vec<Frame>,
    /// Builtins currently on the native stack. No collection while nonzero.
    native_depth: usize,
    /// Arguments of running builtins; they hold values no frame can see.
    native_roots: Vec<JsValue>,
    interrupt: InterruptHandle,
    /// Collected `print` output when `capture_output` is set.
    pub output: Vec<String>,
    gc_requested: bool,
    offthread: Option<OffThreadCompiler>,
    /// Where the exception currently propagating was thrown.
    pub error_site: Option<(Arc<str>, u32)>,
    next_code_id: u64,
}

impl Vm {
    pub fn new(realm: Realm, options: EngineOptions) -> Self {
        let offthread = options
            .off_thread_compilation
            .then(|| OffThreadCompiler::new(options.compile_workers));
        Vm {
            realm,
            options,
            frames: Vec::new(),
            native_depth: 0,
            native_roots: Vec::new(),
            interrupt: InterruptHandle {
                flag: Arc::new(AtomicBool::new(false)),
                callback: Arc::new(Mutex::new(None)),
            },
            output: Vec::new(),
            gc_requested: false,
            offthread,
            error_site: None,
            next_code_id: 1,
        }
    }

    // ── Frame access ─────────────────────────────────────────

    /// # Panics
    /// When no frame is active; tiers only run with a frame on the stack.
    pub fn frame(&self) -> &Frame {
        match self.frames.last() {
            Some(frame) => frame,
            None => panic!("no active frame"),
        }
    }

    /// # Panics
    /// When no frame is active.
    pub fn frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => panic!("no active frame"),
        }
    }

    /// Reads the instruction at the top frame's pc and advances past it.
    pub fn fetch(&mut self) -> Instruction {
        let frame = self.frame_mut();
        let instr = frame.script.code[frame.pc];
        frame.pc += 1;
        instr
    }

    pub fn print(&mut self, line: String) {
        if self.options.capture_output {
            self.output.push(line);
        } else {
            println!("{}", line);
        }
    }

    // ── Interrupts ───────────────────────────────────────────

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn set_interrupt_callback(&self, callback: Option<InterruptCallback>) {
        self.interrupt.set_callback(callback);
    }

    /// Checks for a pending interrupt request.
    pub fn poll_interrupt(&mut self) -> Result<(), JErrorType> {
        if !self.interrupt.flag.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let resume = match self.interrupt.callback.lock().as_mut() {
            Some(callback) => callback(),
            None => false,
        };
        if resume {
            return Ok(());
        }
        tracing::debug!("execution interrupted");
        Err(JErrorType::Interrupted)
    }

    // ── Calls ────────────────────────────────────────────────

    /// Starts a call. Builtins run immediately; scripted functions get a
    /// frame that the driver loop picks up.
    pub fn invoke(
        &mut self,
        callee: JsValue,
        this: JsValue,
        args: Vec<JsValue>,
        construct: bool,
    ) -> Result<Invoked, JErrorType> {
        let target = callee
            .as_object()
            .map(|id| (id, &self.realm.heap.get(id).class))
            .filter(|(_, class)| class.is_callable());
        let Some((callee_id, class)) = target else {
            return Err(JErrorType::TypeError(format!(
                "{} is not a function",
                to_string(&self.realm, &callee)
            )));
        };

        let template = match class {
            ObjectClass::NativeFunction(native) => {
                let entry = if construct {
                    native
                        .construct
                        .ok_or_else(|| JErrorType::TypeError(format!("{} is not a constructor", native.name)))?
                } else {
                    native.call
                };
                return self.call_native(entry, this, &args).map(Invoked::Value);
            }
            ObjectClass::Function(function) => function.template.clone(),
            _ => unreachable!("is_callable admits functions only"),
        };

        if construct && template.is_arrow() {
            return Err(JErrorType::TypeError(format!(
                "{} is not a constructor",
                template.display_name()
            )));
        }
        let script = template.script().map_err(|e| JErrorType::SyntaxError(e.message))?;
        if self.frames.len() >= self.options.max_call_depth {
            return Err(JErrorType::RangeError("too much recursion".to_string()));
        }

        let this = if construct {
            let proto = obj_ops::get(&self.realm, callee_id, "prototype")
                .as_object()
                .unwrap_or(self.realm.intrinsics.object_prototype);
            JsValue::Object(self.realm.alloc(Some(proto), ObjectClass::Ordinary))
        } else if !script.strict && !template.is_arrow() && this.is_nullish() {
            JsValue::Object(self.realm.global)
        } else {
            this
        };

        let script_id = self.realm.runtime_for(&script);
        self.warm_up(script_id);
        let tier = self.realm.runtime(script_id).entry_tier();
        let mut frame = Frame::new(script_id, script, Some(callee_id), this, &args, tier);
        frame.is_construct = construct;
        if tier == ExecutionTier::Optimized {
            if let Some(code) = self.realm.runtime(script_id).live_optimized().cloned() {
                frame.opt = Some(Box::new(entry_frame(code, &frame, 0)));
            }
        }
        self.frames.push(frame);
        self.poll_interrupt()?;
        self.safepoint();
        Ok(Invoked::Pushed)
    }

    fn call_native(
        &mut self,
        entry: NativeFn,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, JErrorType> {
        let mark = self.native_roots.len();
        self.native_roots.push(this.clone());
        self.native_roots.extend(args.iter().cloned());
        self.native_depth += 1;
        let result = entry(self, this, args);
        self.native_depth -= 1;
        self.native_roots.truncate(mark);
        result
    }

    /// Calls `callee` to completion. Used by builtins that call back into
    /// script and by the embedding API.
    pub fn call_function(&mut self, callee: JsValue, this: JsValue, args: Vec<JsValue>) -> Result<JsValue, JErrorType> {
        match self.invoke(callee, this, args, false)? {
            Invoked::Value(value) => Ok(value),
            Invoked::Pushed => {
                let base = self.frames.len() - 1;
                self.run_frames(base)
            }
        }
    }

    pub fn construct(&mut self, callee: JsValue, args: Vec<JsValue>) -> Result<JsValue, JErrorType> {
        match self.invoke(callee, JsValue::Undefined, args, true)? {
            Invoked::Value(value) => Ok(value),
            Invoked::Pushed => {
                let base = self.frames.len() - 1;
                self.run_frames(base)
            }
        }
    }

    // ── Driver loop ──────────────────────────────────────────

    /// Runs frames until the one at index `base` returns.
    pub fn run_frames(&mut self, base: usize) -> Result<JsValue, JErrorType> {
        loop {
            match self.step_top() {
                Ok(Step::Next) | Ok(Step::Yield) => {}
                Ok(Step::Return(value)) => {
                    if let Some(value) = self.complete_frame(value, base) {
                        return Ok(value);
                    }
                }
                Err(error) => self.unwind(error, base)?,
            }
        }
    }

    fn step_top(&mut self) -> Result<Step, JErrorType> {
        let frame = self.frame();
        if frame.opt.is_some() {
            return executor::run(self);
        }
        match frame.tier {
            ExecutionTier::Interpreter => interpreter::run(self),
            ExecutionTier::BaselineInterpreter => blinterp::run(self),
            ExecutionTier::Baseline | ExecutionTier::Optimized => {
                match self.realm.runtime(frame.script_id).baseline.clone() {
                    Some(code) => baseline::run(self, code),
                    None => blinterp::run(self),
                }
            }
        }
    }

    /// Pops the returning frame. Returns the value when it was the base
    /// frame; otherwise hands it to the caller.
    fn complete_frame(&mut self, value: JsValue, base: usize) -> Option<JsValue> {
        let frame = self.frames.pop()?;
        let value = if frame.is_construct && value.as_object().is_none() {
            frame.this
        } else {
            value
        };
        if self.frames.len() <= base {
            return Some(value);
        }
        let caller = self.frame_mut();
        match caller.opt.as_deref_mut() {
            Some(opt) => match opt.pending.take() {
                Some(pending) => {
                    let dst = pending.dst as usize;
                    if opt.registers.len() <= dst {
                        opt.registers.resize(dst + 1, OptSlot::default());
                    }
                    opt.registers[dst] = OptSlot::Value(value);
                }
                None => caller.push(value),
            },
            None => caller.push(value),
        }
        None
    }

    fn current_location(&self) -> Option<(Arc<str>, u32)> {
        let frame = self.frames.last()?;
        match &frame.opt {
            Some(opt) => opt.code.graph.location(opt.pc.saturating_sub(1)),
            None => Some((frame.script.filename.clone(), frame.current_line())),
        }
    }

    /// Turns an internal error into the value a `catch` block sees.
    pub fn error_value(&mut self, error: &JErrorType) -> JsValue {
        match error {
            JErrorType::Thrown(value) => value.clone(),
            other => {
                let name = other.constructor_name().unwrap_or("Error");
                let message = other.message().unwrap_or_default();
                JsValue::Object(create_error(&mut self.realm, name, message))
            }
        }
    }

    /// Looks for a handler between the top frame and `base`. On success the
    /// handling frame is ready to resume; otherwise the frames above `base`
    /// are gone and the exception is returned.
    fn unwind(&mut self, error: JErrorType, base: usize) -> Result<(), JErrorType> {
        if self.error_site.is_none() {
            self.error_site = self.current_location();
        }
        if !error.is_catchable() {
            self.frames.truncate(base);
            return Err(error);
        }
        let value = self.error_value(&error);
        while self.frames.len() > base {
            let frame = self.frame_mut();
            if frame.opt.is_none() {
                if let Some(handler) = frame.script.handler_for(frame.pc.saturating_sub(1)) {
                    let (depth, target) = (handler.depth as usize, handler.target as usize);
                    frame.stack.truncate(depth);
                    frame.push(value);
                    frame.pc = target;
                    self.error_site = None;
                    return Ok(());
                }
            }
            self.frames.pop();
        }
        Err(JErrorType::Thrown(value))
    }

    /// Runs a top-level script after instantiating its global declarations.
    pub fn run_script(&mut self, script: Arc<Script>) -> Result<JsValue, JErrorType> {
        self.instantiate_globals(&script)?;
        let script_id = self.realm.runtime_for(&script);
        self.warm_up(script_id);
        let tier = self.realm.runtime(script_id).entry_tier();
        let global = JsValue::Object(self.realm.global);
        let mut frame = Frame::new(script_id, script, None, global, &[], tier);
        if tier == ExecutionTier::Optimized {
            if let Some(code) = self.realm.runtime(script_id).live_optimized().cloned() {
                frame.opt = Some(Box::new(entry_frame(code, &frame, 0)));
            }
        }
        let base = self.frames.len();
        self.frames.push(frame);
        self.run_frames(base)
    }

    fn instantiate_globals(&mut self, script: &Script) -> Result<(), JErrorType> {
        let global = self.realm.global;
        for decl in &script.global_lexicals {
            if self.realm.lexicals.index_of(&decl.name).is_some()
                || obj_ops::own_property_attributes(&self.realm, global, &decl.name).is_some()
            {
                return Err(JErrorType::SyntaxError(format!("redeclaration of let {}", decl.name)));
            }
        }
        for name in &script.global_vars {
            if self.realm.lexicals.index_of(name).is_some() {
                return Err(JErrorType::SyntaxError(format!("redeclaration of let {}", name)));
            }
        }

        for decl in &script.global_lexicals {
            self.realm.lexicals.declare(&decl.name, decl.constant);
            let popped = match self.realm.heap.get_mut(global).fuse.as_mut() {
                Some(fuse) => fuse.on_property_shadowed(&decl.name),
                None => Vec::new(),
            };
            self.realm.invalidate(popped);
            self.realm.lexical_epoch += 1;
        }
        for name in &script.global_vars {
            if obj_ops::own_property_attributes(&self.realm, global, name).is_none() {
                obj_ops::define_property(
                    &mut self.realm,
                    global,
                    name,
                    JsValue::Undefined,
                    PropertyAttributes::WRITABLE | PropertyAttributes::ENUMERABLE,
                );
            }
        }
        for decl in &script.global_functions {
            let template = &script.templates[decl.template as usize];
            let function = JsValue::Object(make_closure(&mut self.realm, template));
            if obj_ops::own_property_attributes(&self.realm, global, &decl.name).is_none() {
                obj_ops::define_and_initialize(
                    &mut self.realm,
                    global,
                    &decl.name,
                    function,
                    PropertyAttributes::WRITABLE | PropertyAttributes::ENUMERABLE,
                );
            } else {
                obj_ops::set(&mut self.realm, global, &decl.name, function, script.strict)?;
            }
        }
        Ok(())
    }

    // ── Tiering ──────────────────────────────────────────────

    fn warm_up(&mut self, script_id: ScriptId) {
        let hinted = {
            let hash = self.realm.runtime(script_id).script.source_hash;
            self.realm.baseline_hints.contains(&hash)
        };
        let action = self.realm.runtime_mut(script_id).tick(&self.options, hinted);
        self.apply_tier_action(script_id, action);
    }

    /// Back-edge hook: a safepoint, a warm-up tick and the chance to move
    /// the running frame to a better tier.
    pub fn loop_head(&mut self) -> Result<Step, JErrorType> {
        self.poll_interrupt()?;
        self.safepoint();
        let script_id = self.frame().script_id;
        self.warm_up(script_id);

        let runtime = self.realm.runtime(script_id);
        let loop_pc = self.frame().pc.saturating_sub(1);
        if let Some(code) = runtime.live_optimized() {
            if let Some(entry) = code.graph.osr_entry(loop_pc) {
                if self.frame().stack.is_empty() {
                    let code = code.clone();
                    tracing::debug!(script = %runtime.script.display_name(), pc = loop_pc, "OSR entry");
                    let osr = entry_frame(code, self.frame(), entry);
                    let frame = self.frame_mut();
                    frame.opt = Some(Box::new(osr));
                    frame.tier = ExecutionTier::Optimized;
                    return Ok(Step::Yield);
                }
            }
        }
        let tier = runtime.entry_tier();
        if tier != ExecutionTier::Optimized && tier != self.frame().tier {
            self.frame_mut().tier = tier;
            return Ok(Step::Yield);
        }
        Ok(Step::Next)
    }

    fn apply_tier_action(&mut self, script_id: ScriptId, action: TierAction) {
        match action {
            TierAction::None => {}
            TierAction::EnterBaselineInterpreter => {
                let runtime = self.realm.runtime_mut(script_id);
                runtime.tier = ExecutionTier::BaselineInterpreter;
                tracing::debug!(script = %runtime.script.display_name(), "entering baseline interpreter");
            }
            TierAction::CompileBaseline => {
                let runtime = self.realm.runtime(script_id);
                let compiled = baseline::compile(&runtime.script, &runtime.ics, &self.options);
                let hash = runtime.script.source_hash;
                let runtime = self.realm.runtime_mut(script_id);
                match compiled {
                    Ok(code) => {
                        runtime.baseline = Some(Arc::new(code));
                        runtime.tier = ExecutionTier::Baseline;
                        tracing::debug!(script = %runtime.script.display_name(), "baseline compiled");
                        self.realm.baseline_hints.insert(hash);
                    }
                    Err(reason) => {
                        runtime.baseline_failed = true;
                        tracing::debug!(script = %runtime.script.display_name(), %reason, "baseline compilation failed");
                    }
                }
            }
            TierAction::TrialInline => {
                let max_len = self.options.max_inlined_script_length;
                let runtime = self.realm.runtime_mut(script_id);
                let inlined = runtime
                    .ics
                    .iter_mut()
                    .map(|ic| ic.trial_inline(max_len))
                    .filter(|inlined| *inlined)
                    .count();
                runtime.trial_inlined = true;
                tracing::debug!(script = %runtime.script.display_name(), call_sites = inlined, "trial inlining");
            }
            TierAction::CompileOptimized => {
                let code_id = self.next_code_id;
                self.next_code_id += 1;
                let input = opt::snapshot(&mut self.realm, script_id, code_id, &self.options);
                if let Some(offthread) = self.offthread.as_mut() {
                    offthread.submit(input);
                    self.realm.runtime_mut(script_id).ion_pending = true;
                    tracing::debug!(script = %self.realm.runtime(script_id).script.display_name(), code_id, "queued optimized compilation");
                    return;
                }
                let generation = input.global_generation;
                let result = opt::compile(&input);
                self.finish_compilation(Finished {
                    code_id,
                    script_id,
                    global_generation: generation,
                    result,
                });
            }
        }
    }

    fn finish_compilation(&mut self, finished: Finished) {
        let script_id = finished.script_id;
        self.realm.runtime_mut(script_id).ion_pending = false;
        match finished.result {
            Ok(code) => {
                opt::install(&mut self.realm, code, finished.global_generation);
            }
            Err(failure) => {
                let runtime = self.realm.runtime_mut(script_id);
                if failure.structural {
                    runtime.ion_disabled = true;
                } else {
                    runtime.last_attach_warmup = runtime.warmup;
                }
                tracing::debug!(
                    script = %runtime.script.display_name(),
                    reason = %failure.reason,
                    structural = failure.structural,
                    "optimized compilation failed"
                );
            }
        }
    }

    // ── Safepoints ───────────────────────────────────────────

    pub fn safepoint(&mut self) {
        self.apply_invalidations();

        let finished = match self.offthread.as_mut() {
            Some(offthread) => offthread.drain(),
            None => Vec::new(),
        };
        for done in finished {
            tracing::debug!(code_id = done.code_id, "installing off-thread compilation");
            self.finish_compilation(done);
        }

        let budget_spent = self.realm.heap.allocated_since_gc() >= self.options.gc_allocation_threshold;
        if (self.gc_requested || budget_spent) && self.native_depth == 0 {
            self.collect();
        }
    }

    /// Demotes every script whose optimized code was invalidated since the
    /// last safepoint.
    fn apply_invalidations(&mut self) {
        let pending = std::mem::take(&mut self.realm.pending_invalidations);
        let mut seen = HashSet::new();
        for script_id in pending {
            if !seen.insert(script_id) {
                continue;
            }
            let runtime = self.realm.runtime_mut(script_id);
            let invalidated = runtime
                .optimized
                .as_ref()
                .is_some_and(|code| code.invalidated.load(Ordering::SeqCst));
            if invalidated {
                runtime.demote(&self.options);
                tracing::debug!(script = %runtime.script.display_name(), tier = runtime.tier.name(), "demoted after invalidation");
            }
        }
    }

    /// Asks for a collection at the next safepoint.
    pub fn request_gc(&mut self) {
        self.gc_requested = true;
    }

    /// Blocks until every queued optimized compilation is installed.
    pub fn finish_off_thread_work(&mut self) {
        let finished = match self.offthread.as_mut() {
            Some(offthread) => offthread.wait(),
            None => Vec::new(),
        };
        for done in finished {
            self.finish_compilation(done);
        }
    }

    /// Marks from every root and frees the rest. Returns the number of
    /// objects freed.
    pub fn collect(&mut self) -> usize {
        self.gc_requested = false;
        self.apply_invalidations();
        let global = self.realm.heap.get(self.realm.global);
        let generation = global.fuse.as_ref().map(|f| f.generation()).unwrap_or(0);
        for runtime in &mut self.realm.scripts {
            for ic in &mut runtime.ics {
                ic.drop_stale_constants(generation);
            }
        }
        let mut roots = self.realm.roots();
        for frame in &self.frames {
            frame.trace(|id| roots.push(id));
        }
        roots.extend(self.native_roots.iter().filter_map(JsValue::as_object));
        if let Some(offthread) = &self.offthread {
            offthread.trace(|id| roots.push(id));
        }
        let freed = self.realm.heap.collect(&self.realm.shapes, roots);
        tracing::debug!(freed, live = self.realm.heap.stats().live_objects, "garbage collection");
        freed
    }
}

/// An optimized frame entered at MIR index `entry`, with locals, `this`
/// and the callee loaded into the registers the code expects them in.
fn entry_frame(code: Arc<opt::OptimizedCode>, frame: &Frame, entry: usize) -> OptFrame {
    let mut osr = OptFrame::new(code, entry);
    let locals = frame.locals.len();
    if osr.registers.len() < locals + 2 {
        osr.registers.resize(locals + 2, OptSlot::default());
    }
    for (slot, value) in osr.registers.iter_mut().zip(frame.locals.iter()) {
        *slot = OptSlot::Value(value.clone());
    }
    osr.registers[locals] = OptSlot::Value(frame.this.clone());
    osr.registers[locals + 1] = OptSlot::Value(frame.callee.map(JsValue::Object).unwrap_or_default());
    osr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;

    fn script(source: &str) -> Arc<Script> {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("vm.js");
        Arc::new(compile_script(&program, &name, 0, false).unwrap())
    }

    fn vm(options: EngineOptions) -> Vm {
        Vm::new(Realm::new(), options)
    }

    #[test]
    fn completion_value_of_a_script() {
        let mut vm = vm(EngineOptions::interpreter_only());
        let result = vm.run_script(script("var a = 2; a * 21;")).unwrap();
        assert_eq!(result, JsValue::from_i32(42));
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn thrown_errors_record_their_line() {
        let mut vm = vm(EngineOptions::interpreter_only());
        let error = vm.run_script(script("var a = 1;\nnull.x;")).unwrap_err();
        assert!(matches!(error, JErrorType::Thrown(JsValue::Object(_))));
        assert_eq!(vm.error_site, Some((Arc::from("vm.js"), 2)));
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn catch_resumes_in_the_handling_frame() {
        let mut vm = vm(EngineOptions::interpreter_only());
        let source = "function f() { throw 7; } var r; try { f(); } catch (e) { r = e + 1; } r;";
        assert_eq!(vm.run_script(script(source)).unwrap(), JsValue::from_i32(8));
        assert_eq!(vm.error_site, None);
    }

    #[test]
    fn lexical_redeclaration_is_rejected() {
        let mut vm = vm(EngineOptions::interpreter_only());
        vm.run_script(script("let x = 1;")).unwrap();
        let error = vm.run_script(script("var x = 2;")).unwrap_err();
        assert!(matches!(error, JErrorType::SyntaxError(m) if m == "redeclaration of let x"));
    }

    #[test]
    fn deep_recursion_is_a_range_error() {
        let mut options = EngineOptions::interpreter_only();
        options.max_call_depth = 50;
        let mut vm = vm(options);
        let error = vm.run_script(script("function f(n) { return f(n + 1); } f(0);")).unwrap_err();
        assert!(vm.error_site.is_some());
        let JErrorType::Thrown(value) = error else { panic!("expected a thrown error") };
        let id = value.as_object().unwrap();
        assert_eq!(obj_ops::get(&vm.realm, id, "message"), JsValue::from("too much recursion"));
    }

    #[test]
    fn interrupt_is_not_catchable() {
        let mut vm = vm(EngineOptions::interpreter_only());
        vm.interrupt_handle().interrupt();
        let error = vm.run_script(script("var n = 0; try { while (true) { n++; } } catch (e) { n = -1; }"));
        assert!(matches!(error, Err(JErrorType::Interrupted)));
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn interrupt_callback_can_decline() {
        let mut vm = vm(EngineOptions::interpreter_only());
        let handle = vm.interrupt_handle();
        vm.set_interrupt_callback(Some(Box::new(|| true)));
        handle.interrupt();
        let result = vm.run_script(script("var n = 0; while (n < 5) { n++; } n;")).unwrap();
        assert_eq!(result, JsValue::from_i32(5));
        assert!(!handle.is_requested());
    }

    #[test]
    fn loops_reach_the_baseline_tier() {
        let options = EngineOptions { enable_ion: false, ..EngineOptions::eager() };
        let mut vm = vm(options);
        let result = vm
            .run_script(script("function f() { var s = 0; for (var i = 0; i < 50; i++) { s += i; } return s; } f(); f();"))
            .unwrap();
        assert_eq!(result, JsValue::from_i32(1225));
        let f = vm.realm.scripts.iter().find(|r| &*r.script.name == "f").unwrap();
        assert_eq!(f.tier, ExecutionTier::Baseline);
        assert!(f.baseline.is_some());
    }

    #[test]
    fn collection_keeps_values_reachable_from_globals() {
        let mut vm = vm(EngineOptions::interpreter_only());
        vm.run_script(script("var keep = [1, 2, 3]; for (var i = 0; i < 10; i++) { [i]; }")).unwrap();
        let freed = vm.collect();
        assert!(freed >= 10);
        let result = vm.run_script(script("keep.length;")).unwrap();
        assert_eq!(result, JsValue::from_i32(3));
    }
}
