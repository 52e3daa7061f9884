//! AST-to-bytecode compiler.
//!
//! Walks the AST once and emits a flat stack-machine `Script`. The top-level
//! program is compiled eagerly; function bodies are compiled on first call
//! (or ahead of time by a delazification strategy) from their templates.
//!
//! `finally` blocks are duplicated on every path that leaves the protected
//! region: the normal exit, each `break`/`continue`/`return` crossing it, and
//! an exception path that rethrows. Leaving a region suspends the exception
//! ranges it crosses so that code inlined for the exit is covered only by the
//! handlers outside it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::parser::ast::{
    AssignmentOperator, BinaryOperator, BlockStatementData, CatchClauseData, ExpressionType,
    ForInitData, FunctionBodyData, FunctionData, HasMeta, LiteralType, LogicalOperator,
    MemberProperty, Meta, ProgramData, StatementType, UnaryOperator, UpdateOperator,
    VariableDeclarationData, VariableDeclarationKind,
};
use crate::runner::ds::error::CompileError;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::bytecode::{
    compute_stack_depths, hash_source, next_script_id, FunctionTemplate, GlobalFunctionDecl,
    GlobalLexicalDecl, HandlerEntry, IcSite, Instruction, OpCode, Script, ScriptKind,
};
use crate::runner::jit::scope;

#[derive(Clone, Copy)]
struct LocalBinding {
    slot: u32,
    constant: bool,
}

enum Resolved {
    Local(LocalBinding),
    /// The name of a named function expression inside its own body.
    Callee,
    Global,
}

/// Tracks loop context for break/continue resolution.
struct LoopContext {
    /// Known once the continue target has been emitted.
    continue_target: Option<usize>,
    continue_jumps: Vec<usize>,
    break_jumps: Vec<usize>,
}

/// Constructs that must run code or adjust the operand stack when control
/// leaves them early.
#[derive(Clone, Copy)]
enum ControlScope<'a> {
    Loop(usize),
    Finally(&'a BlockStatementData),
    Handler(usize),
    /// A value parked on the operand stack, e.g. the pending exception while
    /// a `finally` block runs on the throw path.
    StackValue,
}

struct HandlerState {
    depth: u32,
    open_start: Option<u32>,
    target: Option<u32>,
}

pub struct Compiler<'a> {
    kind: ScriptKind,
    name: Arc<str>,
    filename: Arc<str>,
    strict: bool,
    line_offset: u32,
    line: u32,

    code: Vec<Instruction>,
    lines: Vec<u32>,
    constants: Vec<JsValue>,
    string_constants: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
    name_indices: HashMap<Arc<str>, u32>,
    templates: Vec<Arc<FunctionTemplate>>,
    ic_sites: Vec<IcSite>,

    handlers: Vec<HandlerState>,
    /// Closed ranges `(handler, start, end)` in closing order, which is
    /// innermost first.
    handler_ranges: Vec<(usize, u32, u32)>,
    loops: Vec<LoopContext>,
    control: Vec<ControlScope<'a>>,

    scopes: Vec<HashMap<Arc<str>, LocalBinding>>,
    local_names: Vec<Arc<str>>,
    param_count: u32,
    self_name: Option<Arc<str>>,
    completion_local: Option<u32>,
    has_debugger: bool,

    global_vars: Vec<Arc<str>>,
    global_functions: Vec<GlobalFunctionDecl>,
    global_lexicals: Vec<GlobalLexicalDecl>,
}

/// Compiles a top-level program. Runs the static scope checks over the whole
/// program first so that early errors in not-yet-compiled functions are
/// reported now.
pub fn compile_script(
    program: &ProgramData,
    filename: &Arc<str>,
    line_offset: u32,
    strict: bool,
) -> Result<Script, CompileError> {
    let program_strict = program.strict || strict;
    scope::check_program(program, filename)?;

    let mut c = Compiler::new(ScriptKind::Global, Arc::from(""), filename, program_strict, line_offset);
    scope::collect_var_names(&program.body, &mut c.global_vars);
    for stmt in &program.body {
        match stmt {
            StatementType::FunctionDeclaration(f) => {
                let template = c.add_template(f, false);
                c.global_functions.push(GlobalFunctionDecl { name: f.name(), template });
            }
            StatementType::VariableDeclaration(decl) if decl.kind != VariableDeclarationKind::Var => {
                for d in &decl.declarations {
                    c.global_lexicals.push(GlobalLexicalDecl {
                        name: d.id.name.clone(),
                        constant: decl.kind == VariableDeclarationKind::Const,
                    });
                }
            }
            _ => {}
        }
    }
    let completion = c.alloc_local(&Arc::from("<completion>"));
    c.completion_local = Some(completion);

    for stmt in &program.body {
        c.compile_statement(stmt);
    }
    c.emit_with(OpCode::GetLocal, completion);
    c.emit(OpCode::Return);
    let source_hash = hash_source(&format!("{}:{:?}", filename, program.meta));
    c.finish(source_hash)
}

/// Compiles the body of a function literal.
pub fn compile_function(template: &FunctionTemplate) -> Result<Script, CompileError> {
    let f: &FunctionData = &template.function;
    let kind = if f.is_arrow { ScriptKind::Arrow } else { ScriptKind::Function };
    let mut c = Compiler::new(kind, template.name.clone(), &template.filename, template.strict, template.line_offset);
    c.line = c.line_of(f.meta.line);

    for param in &f.params {
        c.alloc_local(&param.name);
    }
    c.param_count = f.params.len() as u32;
    // Later duplicates win, as in sloppy mode.
    for (i, param) in f.params.iter().enumerate() {
        c.declare(&param.name, i as u32, false);
    }

    match &f.body {
        FunctionBodyData::Statements(body) => {
            let mut vars = Vec::new();
            scope::collect_var_names(body, &mut vars);
            for name in &vars {
                if c.lookup_innermost(name).is_none() {
                    let slot = c.alloc_local(name);
                    c.declare(name, slot, false);
                }
            }
            c.bind_self_name(template);
            c.hoist_block(body);
            for stmt in body {
                c.compile_statement(stmt);
            }
            c.emit(OpCode::Undefined);
            c.emit(OpCode::Return);
        }
        FunctionBodyData::Expression(e) => {
            c.bind_self_name(template);
            c.compile_expression(e);
            c.emit(OpCode::Return);
        }
    }
    c.finish(template.source_hash)
}

impl<'a> Compiler<'a> {
    fn new(kind: ScriptKind, name: Arc<str>, filename: &Arc<str>, strict: bool, line_offset: u32) -> Self {
        Compiler {
            kind,
            name,
            filename: filename.clone(),
            strict,
            line_offset,
            line: line_offset + 1,
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            string_constants: HashMap::new(),
            names: Vec::new(),
            name_indices: HashMap::new(),
            templates: Vec::new(),
            ic_sites: Vec::new(),
            handlers: Vec::new(),
            handler_ranges: Vec::new(),
            loops: Vec::new(),
            control: Vec::new(),
            scopes: vec![HashMap::new()],
            local_names: Vec::new(),
            param_count: 0,
            self_name: None,
            completion_local: None,
            has_debugger: false,
            global_vars: Vec::new(),
            global_functions: Vec::new(),
            global_lexicals: Vec::new(),
        }
    }

    fn finish(self, source_hash: u64) -> Result<Script, CompileError> {
        let handlers: Vec<HandlerEntry> = self
            .handler_ranges
            .iter()
            .filter_map(|&(hid, start, end)| {
                let h = &self.handlers[hid];
                h.target.map(|target| HandlerEntry { start, end, target, depth: h.depth })
            })
            .collect();
        let (stack_depths, max_stack) = compute_stack_depths(&self.code, &handlers).map_err(|e| {
            CompileError::new(format!("internal error: {}", e), &self.filename, self.line, 0)
        })?;
        tracing::trace!(
            name = %self.name,
            instructions = self.code.len(),
            ics = self.ic_sites.len(),
            "compiled script"
        );
        Ok(Script {
            id: next_script_id(),
            name: self.name,
            filename: self.filename,
            kind: self.kind,
            strict: self.strict,
            code: self.code,
            constants: self.constants,
            names: self.names,
            templates: self.templates,
            ic_sites: self.ic_sites,
            handlers,
            lines: self.lines,
            stack_depths,
            max_stack,
            local_count: self.local_names.len() as u32,
            param_count: self.param_count,
            local_names: self.local_names,
            global_vars: self.global_vars,
            global_functions: self.global_functions,
            global_lexicals: self.global_lexicals,
            has_debugger: self.has_debugger,
            source_hash,
            completion_local: self.completion_local,
        })
    }

    // ════════════════════════════════════════════════════════════
    // Emission helpers
    // ════════════════════════════════════════════════════════════

    fn line_of(&self, line: u32) -> u32 {
        line + self.line_offset
    }

    fn set_line(&mut self, meta: &Meta) {
        if meta.line > 0 {
            self.line = self.line_of(meta.line);
        }
    }

    fn pc(&self) -> usize {
        self.code.len()
    }

    fn push(&mut self, instr: Instruction) -> usize {
        let pc = self.code.len();
        let instr = match instr.op.ic_kind() {
            Some(kind) => {
                let slot = self.ic_sites.len() as u32;
                self.ic_sites.push(IcSite { kind, pc: pc as u32 });
                Instruction { operand2: slot, ..instr }
            }
            None => instr,
        };
        self.code.push(instr);
        self.lines.push(self.line);
        pc
    }

    fn emit(&mut self, op: OpCode) -> usize {
        self.push(Instruction::simple(op))
    }

    fn emit_with(&mut self, op: OpCode, operand: u32) -> usize {
        self.push(Instruction::with_operand(op, operand))
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_with(op, u32::MAX)
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.pc() as u32;
        self.code[at].operand = target;
    }

    fn emit_loop(&mut self, target: usize) {
        self.emit_with(OpCode::Jump, target as u32);
    }

    fn name_index(&mut self, name: &Arc<str>) -> u32 {
        if let Some(i) = self.name_indices.get(name) {
            return *i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.clone());
        self.name_indices.insert(name.clone(), i);
        i
    }

    fn emit_named(&mut self, op: OpCode, name: &Arc<str>) -> usize {
        let index = self.name_index(name);
        self.emit_with(op, index)
    }

    fn emit_number(&mut self, n: f64) {
        let as_int = n as i32;
        if as_int as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            self.emit_with(OpCode::Int, as_int as u32);
        } else {
            let index = self.constants.len() as u32;
            self.constants.push(JsValue::from_f64(n));
            self.emit_with(OpCode::Constant, index);
        }
    }

    fn emit_string(&mut self, s: &Arc<str>) {
        let index = match self.string_constants.get(s) {
            Some(i) => *i,
            None => {
                let i = self.constants.len() as u32;
                self.constants.push(JsValue::String(s.clone()));
                self.string_constants.insert(s.clone(), i);
                i
            }
        };
        self.emit_with(OpCode::Constant, index);
    }

    fn add_template(&mut self, f: &Arc<FunctionData>, self_named: bool) -> u32 {
        let template = FunctionTemplate::new(f.clone(), self.strict, &self.filename, self.line_offset, self_named);
        self.templates.push(Arc::new(template));
        (self.templates.len() - 1) as u32
    }

    // ════════════════════════════════════════════════════════════
    // Bindings
    // ════════════════════════════════════════════════════════════

    fn alloc_local(&mut self, name: &Arc<str>) -> u32 {
        self.local_names.push(name.clone());
        (self.local_names.len() - 1) as u32
    }

    fn declare(&mut self, name: &Arc<str>, slot: u32, constant: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.clone(), LocalBinding { slot, constant });
        }
    }

    fn lookup_innermost(&self, name: &str) -> Option<LocalBinding> {
        self.scopes.last().and_then(|s| s.get(name).copied())
    }

    fn is_global_top_level(&self) -> bool {
        self.kind == ScriptKind::Global && self.scopes.len() == 1
    }

    fn bind_self_name(&mut self, template: &FunctionTemplate) {
        if template.self_named && self.lookup_innermost(&template.name).is_none() {
            self.self_name = Some(template.name.clone());
        }
    }

    fn resolve(&self, name: &str) -> Resolved {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Resolved::Local(*binding);
            }
        }
        match &self.self_name {
            Some(own) if &**own == name => Resolved::Callee,
            _ => Resolved::Global,
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Declares the block's `let`/`const` names and instantiates its function
    /// declarations. At the top level of the global script these are globals
    /// and are set up by the VM instead.
    fn hoist_block(&mut self, body: &[StatementType]) {
        if self.is_global_top_level() {
            return;
        }
        for stmt in body {
            match stmt {
                StatementType::VariableDeclaration(decl) if decl.kind != VariableDeclarationKind::Var => {
                    for d in &decl.declarations {
                        let slot = self.alloc_local(&d.id.name);
                        self.declare(&d.id.name, slot, decl.kind == VariableDeclarationKind::Const);
                    }
                }
                StatementType::FunctionDeclaration(f) => {
                    let name = f.name();
                    let slot = match self.lookup_innermost(&name) {
                        Some(binding) => binding.slot,
                        None => {
                            let slot = self.alloc_local(&name);
                            self.declare(&name, slot, false);
                            slot
                        }
                    };
                    self.set_line(&f.meta);
                    let template = self.add_template(f, false);
                    self.emit_with(OpCode::Closure, template);
                    self.emit_with(OpCode::SetLocal, slot);
                    self.emit(OpCode::Pop);
                }
                _ => {}
            }
        }
    }

    // ════════════════════════════════════════════════════════════
    // Control scopes and exception ranges
    // ════════════════════════════════════════════════════════════

    fn stack_values(&self) -> u32 {
        self.control
            .iter()
            .filter(|s| matches!(s, ControlScope::StackValue))
            .count() as u32
    }

    fn open_handler(&mut self) -> usize {
        let hid = self.handlers.len();
        self.handlers.push(HandlerState {
            depth: self.stack_values(),
            open_start: Some(self.pc() as u32),
            target: None,
        });
        self.control.push(ControlScope::Handler(hid));
        hid
    }

    fn close_handler(&mut self, hid: usize) {
        let end = self.pc() as u32;
        if let Some(start) = self.handlers[hid].open_start.take() {
            if start < end {
                self.handler_ranges.push((hid, start, end));
            }
        }
    }

    fn reopen_handlers(&mut self, suspended: Vec<usize>) {
        let pc = self.pc() as u32;
        for hid in suspended {
            self.handlers[hid].open_start = Some(pc);
        }
    }

    /// Emits the exit code for every control scope above `target_len`,
    /// innermost first. With `carry`, a value on top of the stack (a return
    /// value) is preserved across the exit code. Returns the handlers whose
    /// ranges were suspended; the caller reopens them after emitting the
    /// transfer itself.
    fn unwind_scopes_to(&mut self, target_len: usize, carry: bool) -> Vec<usize> {
        let mut suspended = Vec::new();
        let mut i = self.control.len();
        while i > target_len {
            i -= 1;
            match self.control[i] {
                ControlScope::Loop(_) => {}
                ControlScope::Handler(hid) => {
                    self.close_handler(hid);
                    suspended.push(hid);
                }
                ControlScope::Finally(block) => {
                    let saved = self.control.split_off(i);
                    if carry {
                        self.control.push(ControlScope::StackValue);
                    }
                    self.compile_block(block);
                    if carry {
                        self.control.pop();
                    }
                    self.control.extend(saved);
                }
                ControlScope::StackValue => {
                    if carry {
                        self.emit(OpCode::Swap);
                    }
                    self.emit(OpCode::Pop);
                }
            }
        }
        suspended
    }

    fn innermost_loop(&self) -> Option<(usize, usize)> {
        self.control.iter().enumerate().rev().find_map(|(pos, s)| match s {
            ControlScope::Loop(idx) => Some((pos, *idx)),
            _ => None,
        })
    }

    fn begin_loop(&mut self, continue_target: Option<usize>) -> usize {
        let idx = self.loops.len();
        self.loops.push(LoopContext {
            continue_target,
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
        });
        self.control.push(ControlScope::Loop(idx));
        idx
    }

    fn set_continue_target(&mut self, idx: usize) {
        let target = self.pc();
        self.loops[idx].continue_target = Some(target);
        for at in std::mem::take(&mut self.loops[idx].continue_jumps) {
            self.code[at].operand = target as u32;
        }
    }

    fn end_loop(&mut self, idx: usize) {
        self.control.pop();
        for at in std::mem::take(&mut self.loops[idx].break_jumps) {
            self.patch_jump(at);
        }
    }

    // ════════════════════════════════════════════════════════════
    // Statements
    // ════════════════════════════════════════════════════════════

    fn compile_statement(&mut self, stmt: &'a StatementType) {
        self.set_line(stmt.get_meta());
        match stmt {
            StatementType::EmptyStatement { .. } => {}

            StatementType::ExpressionStatement { expression, .. } => {
                self.compile_expression(expression);
                if let Some(c) = self.completion_local {
                    self.emit_with(OpCode::SetLocal, c);
                }
                self.emit(OpCode::Pop);
            }

            StatementType::VariableDeclaration(decl) => self.compile_declaration(decl),

            // Instantiated on entry to the enclosing block or function.
            StatementType::FunctionDeclaration(_) => {}

            StatementType::BlockStatement(block) => self.compile_block(block),

            StatementType::IfStatement { test, consequent, alternate, .. } => {
                self.compile_expression(test);
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.compile_statement(consequent);
                match alternate {
                    Some(alt) => {
                        let end_jump = self.emit_jump(OpCode::Jump);
                        self.patch_jump(else_jump);
                        self.compile_statement(alt);
                        self.patch_jump(end_jump);
                    }
                    None => self.patch_jump(else_jump),
                }
            }

            StatementType::WhileStatement { test, body, .. } => {
                let head = self.pc();
                self.emit(OpCode::LoopHead);
                let idx = self.begin_loop(Some(head));
                self.compile_expression(test);
                let exit = self.emit_jump(OpCode::JumpIfFalse);
                self.compile_statement(body);
                self.emit_loop(head);
                self.patch_jump(exit);
                self.end_loop(idx);
            }

            StatementType::DoWhileStatement { body, test, .. } => {
                let head = self.pc();
                self.emit(OpCode::LoopHead);
                let idx = self.begin_loop(None);
                self.compile_statement(body);
                self.set_continue_target(idx);
                self.set_line(test.get_meta());
                self.compile_expression(test);
                self.emit_with(OpCode::JumpIfTrue, head as u32);
                self.end_loop(idx);
            }

            StatementType::ForStatement { init, test, update, body, .. } => {
                self.push_scope();
                match init {
                    Some(ForInitData::VariableDeclaration(decl)) => {
                        if decl.kind != VariableDeclarationKind::Var {
                            for d in &decl.declarations {
                                let slot = self.alloc_local(&d.id.name);
                                self.declare(&d.id.name, slot, decl.kind == VariableDeclarationKind::Const);
                            }
                        }
                        self.compile_declaration(decl);
                    }
                    Some(ForInitData::Expression(e)) => {
                        self.compile_expression(e);
                        self.emit(OpCode::Pop);
                    }
                    None => {}
                }
                let head = self.pc();
                self.emit(OpCode::LoopHead);
                let idx = self.begin_loop(None);
                let exit = test.as_ref().map(|t| {
                    self.compile_expression(t);
                    self.emit_jump(OpCode::JumpIfFalse)
                });
                self.compile_statement(body);
                self.set_continue_target(idx);
                if let Some(u) = update {
                    self.compile_expression(u);
                    self.emit(OpCode::Pop);
                }
                self.emit_loop(head);
                if let Some(exit) = exit {
                    self.patch_jump(exit);
                }
                self.end_loop(idx);
                self.pop_scope();
            }

            StatementType::ReturnStatement { argument, .. } => {
                match argument {
                    Some(arg) => self.compile_expression(arg),
                    None => {
                        self.emit(OpCode::Undefined);
                    }
                }
                let suspended = self.unwind_scopes_to(0, true);
                self.emit(OpCode::Return);
                self.reopen_handlers(suspended);
            }

            StatementType::BreakStatement { .. } => {
                if let Some((pos, idx)) = self.innermost_loop() {
                    let suspended = self.unwind_scopes_to(pos + 1, false);
                    let at = self.emit_jump(OpCode::Jump);
                    self.loops[idx].break_jumps.push(at);
                    self.reopen_handlers(suspended);
                }
            }

            StatementType::ContinueStatement { .. } => {
                if let Some((pos, idx)) = self.innermost_loop() {
                    let suspended = self.unwind_scopes_to(pos + 1, false);
                    match self.loops[idx].continue_target {
                        Some(target) => self.emit_loop(target),
                        None => {
                            let at = self.emit_jump(OpCode::Jump);
                            self.loops[idx].continue_jumps.push(at);
                        }
                    }
                    self.reopen_handlers(suspended);
                }
            }

            StatementType::ThrowStatement { argument, .. } => {
                self.compile_expression(argument);
                self.emit(OpCode::Throw);
            }

            StatementType::TryStatement { block, handler, finalizer, .. } => {
                self.compile_try(block, handler.as_ref(), finalizer.as_ref());
            }

            StatementType::DebuggerStatement { .. } => {
                self.has_debugger = true;
                self.emit(OpCode::Debugger);
            }
        }
    }

    fn compile_block(&mut self, block: &'a BlockStatementData) {
        self.push_scope();
        self.hoist_block(&block.body);
        for stmt in &block.body {
            self.compile_statement(stmt);
        }
        self.pop_scope();
    }

    fn compile_try(
        &mut self,
        block: &'a BlockStatementData,
        catch: Option<&'a CatchClauseData>,
        finalizer: Option<&'a BlockStatementData>,
    ) {
        let fin_handler = finalizer.map(|f| {
            self.control.push(ControlScope::Finally(f));
            self.open_handler()
        });
        let catch_handler = catch.map(|_| self.open_handler());

        self.compile_block(block);

        if let (Some(hid), Some(clause)) = (catch_handler, catch) {
            self.close_handler(hid);
            self.control.pop();
            let skip = self.emit_jump(OpCode::Jump);
            self.handlers[hid].target = Some(self.pc() as u32);
            self.set_line(&clause.meta);
            self.push_scope();
            match &clause.param {
                Some(param) => {
                    let slot = self.alloc_local(&param.name);
                    self.declare(&param.name, slot, false);
                    self.emit_with(OpCode::SetLocal, slot);
                    self.emit(OpCode::Pop);
                }
                None => {
                    self.emit(OpCode::Pop);
                }
            }
            self.compile_block(&clause.body);
            self.pop_scope();
            self.patch_jump(skip);
        }

        if let (Some(hid), Some(fin)) = (fin_handler, finalizer) {
            self.close_handler(hid);
            self.control.pop();
            self.control.pop();
            self.compile_block(fin);
            let skip = self.emit_jump(OpCode::Jump);
            self.handlers[hid].target = Some(self.pc() as u32);
            self.control.push(ControlScope::StackValue);
            self.compile_block(fin);
            self.control.pop();
            self.emit(OpCode::Throw);
            self.patch_jump(skip);
        }
    }

    fn compile_declaration(&mut self, decl: &'a VariableDeclarationData) {
        let constant = decl.kind == VariableDeclarationKind::Const;
        for d in &decl.declarations {
            self.set_line(&d.meta);
            let name = &d.id.name;
            match decl.kind {
                VariableDeclarationKind::Var => {
                    let Some(init) = &d.init else { continue };
                    self.compile_expression(init);
                    self.store_identifier(name);
                    self.emit(OpCode::Pop);
                }
                _ if self.is_global_top_level() => {
                    match &d.init {
                        Some(init) => self.compile_expression(init),
                        None => {
                            self.emit(OpCode::Undefined);
                        }
                    }
                    self.emit_named(OpCode::InitLexical, name);
                }
                _ => {
                    match &d.init {
                        Some(init) => self.compile_expression(init),
                        None => {
                            self.emit(OpCode::Undefined);
                        }
                    }
                    let slot = match self.lookup_innermost(name) {
                        Some(binding) => binding.slot,
                        None => {
                            let slot = self.alloc_local(name);
                            self.declare(name, slot, constant);
                            slot
                        }
                    };
                    self.emit_with(OpCode::SetLocal, slot);
                    self.emit(OpCode::Pop);
                }
            }
        }
    }

    // ════════════════════════════════════════════════════════════
    // Expressions
    // ════════════════════════════════════════════════════════════

    fn compile_expression(&mut self, expr: &'a ExpressionType) {
        match expr {
            ExpressionType::Literal { value, .. } => match value {
                LiteralType::NullLiteral => {
                    self.emit(OpCode::Null);
                }
                LiteralType::BooleanLiteral(true) => {
                    self.emit(OpCode::True);
                }
                LiteralType::BooleanLiteral(false) => {
                    self.emit(OpCode::False);
                }
                LiteralType::NumberLiteral(n) => self.emit_number(*n),
                LiteralType::StringLiteral(s) => self.emit_string(s),
            },

            ExpressionType::Identifier(id) => self.load_identifier(&id.name),

            ExpressionType::ThisExpression { .. } => {
                self.emit(OpCode::This);
            }

            ExpressionType::ArrayExpression { elements, .. } => {
                for e in elements {
                    self.compile_expression(e);
                }
                self.emit_with(OpCode::NewArray, elements.len() as u32);
            }

            ExpressionType::ObjectExpression { properties, .. } => {
                self.emit(OpCode::NewObject);
                for p in properties {
                    self.compile_expression(&p.value);
                    self.emit_named(OpCode::InitProp, &p.key);
                }
            }

            ExpressionType::FunctionExpression(f) => {
                let template = self.add_template(f, !f.is_arrow);
                self.emit_with(OpCode::Closure, template);
            }

            ExpressionType::UnaryExpression { operator, argument, .. } => {
                self.compile_unary(*operator, argument);
            }

            ExpressionType::UpdateExpression { operator, prefix, argument, .. } => {
                let op = match operator {
                    UpdateOperator::PlusPlus => OpCode::Inc,
                    UpdateOperator::MinusMinus => OpCode::Dec,
                };
                self.compile_update(op, *prefix, argument);
            }

            ExpressionType::BinaryExpression { operator, left, right, .. } => {
                self.compile_expression(left);
                self.compile_expression(right);
                self.emit(binary_opcode(*operator));
            }

            ExpressionType::LogicalExpression { operator, left, right, .. } => {
                self.compile_expression(left);
                self.emit(OpCode::Dup);
                let short = self.emit_jump(logical_jump(*operator));
                self.emit(OpCode::Pop);
                self.compile_expression(right);
                self.patch_jump(short);
            }

            ExpressionType::AssignmentExpression { operator, left, right, .. } => {
                self.compile_assignment(*operator, left, right);
            }

            ExpressionType::ConditionalExpression { test, consequent, alternate, .. } => {
                self.compile_expression(test);
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.compile_expression(consequent);
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump);
                self.compile_expression(alternate);
                self.patch_jump(end_jump);
            }

            ExpressionType::CallExpression { callee, arguments, meta } => {
                match callee.as_ref() {
                    ExpressionType::MemberExpression { object, property, .. } => {
                        self.compile_expression(object);
                        self.emit(OpCode::Dup);
                        match property {
                            MemberProperty::Named(name) => {
                                self.emit_named(OpCode::GetProp, name);
                            }
                            MemberProperty::Computed(key) => {
                                self.compile_expression(key);
                                self.emit(OpCode::GetElem);
                            }
                        }
                        self.emit(OpCode::Swap);
                    }
                    other => {
                        self.compile_expression(other);
                        self.emit(OpCode::Undefined);
                    }
                }
                for arg in arguments {
                    self.compile_expression(arg);
                }
                self.set_line(meta);
                self.emit_with(OpCode::Call, arguments.len() as u32);
            }

            ExpressionType::NewExpression { callee, arguments, meta } => {
                self.compile_expression(callee);
                for arg in arguments {
                    self.compile_expression(arg);
                }
                self.set_line(meta);
                self.emit_with(OpCode::New, arguments.len() as u32);
            }

            ExpressionType::MemberExpression { object, property, .. } => {
                self.compile_expression(object);
                match property {
                    MemberProperty::Named(name) => {
                        self.emit_named(OpCode::GetProp, name);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key);
                        self.emit(OpCode::GetElem);
                    }
                }
            }

            ExpressionType::SequenceExpression { expressions, .. } => {
                for (i, e) in expressions.iter().enumerate() {
                    if i > 0 {
                        self.emit(OpCode::Pop);
                    }
                    self.compile_expression(e);
                }
                if expressions.is_empty() {
                    self.emit(OpCode::Undefined);
                }
            }
        }
    }

    fn load_identifier(&mut self, name: &Arc<str>) {
        match self.resolve(name) {
            Resolved::Local(binding) => {
                self.emit_with(OpCode::GetLocal, binding.slot);
            }
            Resolved::Callee => {
                self.emit(OpCode::Callee);
            }
            // The global `undefined` is read-only.
            Resolved::Global if &**name == "undefined" => {
                self.emit(OpCode::Undefined);
            }
            Resolved::Global => {
                self.emit_named(OpCode::GetName, name);
            }
        }
    }

    /// `v -> v`, storing into the binding `name`.
    fn store_identifier(&mut self, name: &Arc<str>) {
        match self.resolve(name) {
            Resolved::Local(binding) if binding.constant => {
                self.emit(OpCode::Pop);
                self.emit_named(OpCode::ThrowConstAssign, name);
            }
            Resolved::Local(binding) => {
                self.emit_with(OpCode::SetLocal, binding.slot);
            }
            Resolved::Callee => {
                if self.strict {
                    self.emit(OpCode::Pop);
                    self.emit_named(OpCode::ThrowConstAssign, name);
                }
            }
            Resolved::Global => {
                self.emit_named(OpCode::SetName, name);
            }
        }
    }

    fn compile_unary(&mut self, operator: UnaryOperator, argument: &'a ExpressionType) {
        match operator {
            UnaryOperator::Minus => {
                self.compile_expression(argument);
                self.emit(OpCode::Neg);
            }
            UnaryOperator::Plus => {
                self.compile_expression(argument);
                self.emit(OpCode::Pos);
            }
            UnaryOperator::LogicalNot => {
                self.compile_expression(argument);
                self.emit(OpCode::Not);
            }
            UnaryOperator::BitwiseNot => {
                self.compile_expression(argument);
                self.emit(OpCode::BitNot);
            }
            UnaryOperator::TypeOf => match argument {
                ExpressionType::Identifier(id) if matches!(self.resolve(&id.name), Resolved::Global) => {
                    self.emit_named(OpCode::TypeOfName, &id.name);
                }
                _ => {
                    self.compile_expression(argument);
                    self.emit(OpCode::TypeOf);
                }
            },
            UnaryOperator::Void => {
                self.compile_expression(argument);
                self.emit(OpCode::Pop);
                self.emit(OpCode::Undefined);
            }
            UnaryOperator::Delete => match argument {
                ExpressionType::MemberExpression { object, property, .. } => {
                    self.compile_expression(object);
                    match property {
                        MemberProperty::Named(name) => {
                            self.emit_named(OpCode::DeleteProp, name);
                        }
                        MemberProperty::Computed(key) => {
                            self.compile_expression(key);
                            self.emit(OpCode::DeleteElem);
                        }
                    }
                }
                ExpressionType::Identifier(id) => match self.resolve(&id.name) {
                    Resolved::Global => {
                        self.emit_named(OpCode::DeleteName, &id.name);
                    }
                    _ => {
                        self.emit(OpCode::False);
                    }
                },
                other => {
                    self.compile_expression(other);
                    self.emit(OpCode::Pop);
                    self.emit(OpCode::True);
                }
            },
        }
    }

    fn compile_update(&mut self, op: OpCode, prefix: bool, argument: &'a ExpressionType) {
        match argument {
            ExpressionType::Identifier(id) => {
                self.load_identifier(&id.name);
                if prefix {
                    self.emit(op);
                    self.store_identifier(&id.name);
                } else {
                    self.emit(OpCode::Pos);
                    self.emit(OpCode::Dup);
                    self.emit(op);
                    self.store_identifier(&id.name);
                    self.emit(OpCode::Pop);
                }
            }
            ExpressionType::MemberExpression { object, property, .. } => {
                self.compile_expression(object);
                match property {
                    MemberProperty::Named(name) => {
                        self.emit(OpCode::Dup);
                        self.emit_named(OpCode::GetProp, name);
                        if prefix {
                            self.emit(op);
                        } else {
                            self.emit(OpCode::Pos);
                            self.emit(OpCode::Dup);
                            self.emit(OpCode::Rot3);
                            self.emit(op);
                        }
                        self.emit_named(OpCode::SetProp, name);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key);
                        self.emit(OpCode::Dup2);
                        self.emit(OpCode::GetElem);
                        if prefix {
                            self.emit(op);
                        } else {
                            self.emit(OpCode::Pos);
                            self.emit(OpCode::Dup);
                            self.emit(OpCode::Rot4);
                            self.emit(op);
                        }
                        self.emit(OpCode::SetElem);
                    }
                }
                if !prefix {
                    self.emit(OpCode::Pop);
                }
            }
            // Rejected by the scope checker.
            other => {
                self.compile_expression(other);
            }
        }
    }

    fn compile_assignment(&mut self, operator: AssignmentOperator, left: &'a ExpressionType, right: &'a ExpressionType) {
        if let Some(logical) = operator.logical_operator() {
            self.compile_logical_assignment(logical, left, right);
            return;
        }
        let binary = operator.binary_operator().map(binary_opcode);
        match left {
            ExpressionType::Identifier(id) => {
                if let Some(op) = binary {
                    self.load_identifier(&id.name);
                    self.compile_expression(right);
                    self.emit(op);
                } else {
                    self.compile_expression(right);
                }
                self.store_identifier(&id.name);
            }
            ExpressionType::MemberExpression { object, property, .. } => {
                self.compile_expression(object);
                match property {
                    MemberProperty::Named(name) => {
                        if let Some(op) = binary {
                            self.emit(OpCode::Dup);
                            self.emit_named(OpCode::GetProp, name);
                            self.compile_expression(right);
                            self.emit(op);
                        } else {
                            self.compile_expression(right);
                        }
                        self.emit_named(OpCode::SetProp, name);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key);
                        if let Some(op) = binary {
                            self.emit(OpCode::Dup2);
                            self.emit(OpCode::GetElem);
                            self.compile_expression(right);
                            self.emit(op);
                        } else {
                            self.compile_expression(right);
                        }
                        self.emit(OpCode::SetElem);
                    }
                }
            }
            // Rejected by the scope checker.
            other => {
                self.compile_expression(other);
            }
        }
    }

    fn compile_logical_assignment(&mut self, logical: LogicalOperator, left: &'a ExpressionType, right: &'a ExpressionType) {
        let jump = logical_jump(logical);
        match left {
            ExpressionType::Identifier(id) => {
                self.load_identifier(&id.name);
                self.emit(OpCode::Dup);
                let short = self.emit_jump(jump);
                self.emit(OpCode::Pop);
                self.compile_expression(right);
                self.store_identifier(&id.name);
                self.patch_jump(short);
            }
            ExpressionType::MemberExpression { object, property, .. } => {
                self.compile_expression(object);
                let computed = match property {
                    MemberProperty::Named(name) => {
                        self.emit(OpCode::Dup);
                        self.emit_named(OpCode::GetProp, name);
                        false
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expression(key);
                        self.emit(OpCode::Dup2);
                        self.emit(OpCode::GetElem);
                        true
                    }
                };
                self.emit(OpCode::Dup);
                let short = self.emit_jump(jump);
                self.emit(OpCode::Pop);
                self.compile_expression(right);
                match property {
                    MemberProperty::Named(name) => {
                        self.emit_named(OpCode::SetProp, name);
                    }
                    MemberProperty::Computed(_) => {
                        self.emit(OpCode::SetElem);
                    }
                }
                let end = self.emit_jump(OpCode::Jump);
                self.patch_jump(short);
                if computed {
                    self.emit(OpCode::Rot3);
                    self.emit(OpCode::Pop);
                    self.emit(OpCode::Pop);
                } else {
                    self.emit(OpCode::Swap);
                    self.emit(OpCode::Pop);
                }
                self.patch_jump(end);
            }
            other => {
                self.compile_expression(other);
            }
        }
    }
}

fn binary_opcode(operator: BinaryOperator) -> OpCode {
    match operator {
        BinaryOperator::LooselyEqual => OpCode::Eq,
        BinaryOperator::LooselyUnequal => OpCode::Ne,
        BinaryOperator::StrictlyEqual => OpCode::StrictEq,
        BinaryOperator::StrictlyUnequal => OpCode::StrictNe,
        BinaryOperator::LessThan => OpCode::Lt,
        BinaryOperator::LessThanEqual => OpCode::Le,
        BinaryOperator::GreaterThan => OpCode::Gt,
        BinaryOperator::GreaterThanEqual => OpCode::Ge,
        BinaryOperator::BitwiseLeftShift => OpCode::Shl,
        BinaryOperator::BitwiseRightShift => OpCode::Shr,
        BinaryOperator::BitwiseUnsignedRightShift => OpCode::UShr,
        BinaryOperator::Add => OpCode::Add,
        BinaryOperator::Subtract => OpCode::Sub,
        BinaryOperator::Multiply => OpCode::Mul,
        BinaryOperator::Divide => OpCode::Div,
        BinaryOperator::Modulo => OpCode::Mod,
        BinaryOperator::Exponent => OpCode::Exp,
        BinaryOperator::BitwiseOr => OpCode::BitOr,
        BinaryOperator::BitwiseXor => OpCode::BitXor,
        BinaryOperator::BitwiseAnd => OpCode::BitAnd,
        BinaryOperator::InstanceOf => OpCode::InstanceOf,
        BinaryOperator::In => OpCode::In,
    }
}

/// The jump that skips the right operand of a logical operator.
fn logical_jump(operator: LogicalOperator) -> OpCode {
    match operator {
        LogicalOperator::And => OpCode::JumpIfFalse,
        LogicalOperator::Or => OpCode::JumpIfTrue,
        LogicalOperator::NullishCoalescing => OpCode::JumpIfNotNullish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;

    fn compile(code: &str) -> Script {
        let program = JsParser::parse_to_ast_from_str(code).unwrap();
        compile_script(&program, &Arc::from("test.js"), 0, false).unwrap()
    }

    fn ops(script: &Script) -> Vec<OpCode> {
        script.code.iter().map(|i| i.op).collect()
    }

    fn function_script(code: &str) -> Arc<Script> {
        let script = compile(code);
        script.templates[0].script().unwrap()
    }

    #[test]
    fn small_integers_use_the_int_opcode() {
        let script = compile("1; 2.5; -0;");
        assert_eq!(script.code[0].op, OpCode::Int);
        assert_eq!(script.code[3].op, OpCode::Constant);
        assert_eq!(script.constants.len(), 1);
    }

    #[test]
    fn global_declarations_are_collected() {
        let script = compile("var a = 1; let b = 2; const c = 3; function f() {}");
        assert_eq!(&*script.global_vars[0], "a");
        assert_eq!(script.global_lexicals.len(), 2);
        assert!(script.global_lexicals[1].constant);
        assert_eq!(&*script.global_functions[0].name, "f");
        assert!(ops(&script).contains(&OpCode::InitLexical));
    }

    #[test]
    fn every_ic_site_points_at_its_instruction() {
        let script = compile("var o = {x: 1}; o.x + o['y']; f(1, 2);");
        for (slot, site) in script.ic_sites.iter().enumerate() {
            let instr = script.code[site.pc as usize];
            assert_eq!(instr.op.ic_kind(), Some(site.kind));
            assert_eq!(instr.operand2 as usize, slot);
        }
    }

    #[test]
    fn functions_compile_lazily_with_locals() {
        let script = compile("function add(a, b) { var t = a + b; return t; }");
        let template = &script.templates[0];
        assert!(!template.is_compiled());
        let body = template.script().unwrap();
        assert_eq!(body.param_count, 2);
        assert_eq!(body.local_count, 3);
        assert!(!ops(&body).contains(&OpCode::GetName));
    }

    #[test]
    fn loops_have_heads() {
        let body = function_script("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s += i; } return s; }");
        let heads = body.code.iter().filter(|i| i.op == OpCode::LoopHead).count();
        assert_eq!(heads, 1);
    }

    #[test]
    fn finally_runs_on_every_exit() {
        let body = function_script(
            "function f(x) { while (true) { try { if (x) break; return 1; } finally { g(); } } return 2; }",
        );
        // Normal exit, break, return and the exception path.
        let calls = body.code.iter().filter(|i| i.op == OpCode::Call).count();
        assert_eq!(calls, 4);
        assert!(!body.handlers.is_empty());
        for h in &body.handlers {
            assert_eq!(body.stack_depths[h.target as usize], h.depth + 1);
        }
    }

    #[test]
    fn nested_handlers_are_innermost_first() {
        let script = compile("try { try { a(); } catch (e) { b(); } } catch (e2) { c(); }");
        assert!(script.handlers.len() >= 2);
        let first = script.handlers[0];
        let last = script.handlers[script.handlers.len() - 1];
        assert!(last.start <= first.start && first.end <= last.end);
    }

    #[test]
    fn named_function_expressions_bind_themselves() {
        let body = function_script("var f = function fact(n) { return n ? n * fact(n - 1) : 1; };");
        assert!(ops(&body).contains(&OpCode::Callee));
        assert!(!ops(&body).contains(&OpCode::GetName));
    }

    #[test]
    fn const_assignment_compiles_to_a_throw() {
        let body = function_script("function f() { const k = 1; k = 2; }");
        assert!(ops(&body).contains(&OpCode::ThrowConstAssign));
    }

    #[test]
    fn typeof_global_does_not_throw() {
        let script = compile("typeof missing;");
        assert_eq!(script.code[0].op, OpCode::TypeOfName);
    }

    #[test]
    fn early_errors_surface_at_compile_time() {
        let program = JsParser::parse_to_ast_from_str("function f() { var x; return function () { return x; }; }").unwrap();
        assert!(compile_script(&program, &Arc::from("t.js"), 0, false).is_err());
    }

    #[test]
    fn line_offset_shifts_reported_lines() {
        let program = JsParser::parse_to_ast_from_str("1;\nthrow 2;").unwrap();
        let script = compile_script(&program, &Arc::from("t.js"), 10, false).unwrap();
        let throw_pc = script.code.iter().position(|i| i.op == OpCode::Throw).unwrap();
        assert_eq!(script.line_at(throw_pc), 12);
    }
}
