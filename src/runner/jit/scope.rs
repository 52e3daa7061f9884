//! Static scope analysis run once over a whole program before any bytecode is
//! emitted, so that every early error surfaces at compile time even when
//! inner functions are compiled lazily.
//!
//! Functions only see their own locals and globals. Referencing a binding
//! that belongs to an enclosing function (or to a block of the top-level
//! script) is rejected, as is `this` inside an arrow function.

use std::collections::HashSet;
use std::sync::Arc;

use crate::parser::ast::{
    BlockStatementData, ExpressionType, ForInitData, FunctionBodyData, FunctionData, HasMeta,
    MemberProperty, Meta, ProgramData, StatementType, UnaryOperator, VariableDeclarationData,
    VariableDeclarationKind,
};
use crate::runner::ds::error::CompileError;

#[derive(Default)]
struct Scope {
    lexical: HashSet<Arc<str>>,
    vars: HashSet<Arc<str>>,
    /// First scope of a function body (or of the program).
    function_boundary: bool,
    /// Names here are globals rather than frame locals.
    global: bool,
}

impl Scope {
    fn declares(&self, name: &str) -> bool {
        self.lexical.contains(name) || self.vars.contains(name)
    }
}

struct ScopeChecker<'a> {
    filename: &'a Arc<str>,
    scopes: Vec<Scope>,
    loop_depth: u32,
    in_function: bool,
    in_arrow: bool,
    strict: bool,
}

pub fn check_program(program: &ProgramData, filename: &Arc<str>) -> Result<(), CompileError> {
    let mut checker = ScopeChecker {
        filename,
        scopes: Vec::new(),
        loop_depth: 0,
        in_function: false,
        in_arrow: false,
        strict: program.strict,
    };
    let mut top = Scope {
        function_boundary: true,
        global: true,
        ..Scope::default()
    };
    checker.hoist_into(&mut top, &program.body, true)?;
    checker.scopes.push(top);
    for stmt in &program.body {
        checker.statement(stmt)?;
    }
    Ok(())
}

/// Collects `var` names declared anywhere in `body`, not descending into
/// nested functions.
pub fn collect_var_names(body: &[StatementType], out: &mut Vec<Arc<str>>) {
    for stmt in body {
        collect_vars_in_statement(stmt, out);
    }
}

fn push_unique(out: &mut Vec<Arc<str>>, name: &Arc<str>) {
    if !out.iter().any(|n| n == name) {
        out.push(name.clone());
    }
}

fn collect_vars_in_declaration(decl: &VariableDeclarationData, out: &mut Vec<Arc<str>>) {
    if decl.kind == VariableDeclarationKind::Var {
        for d in &decl.declarations {
            push_unique(out, &d.id.name);
        }
    }
}

fn collect_vars_in_statement(stmt: &StatementType, out: &mut Vec<Arc<str>>) {
    match stmt {
        StatementType::VariableDeclaration(decl) => collect_vars_in_declaration(decl, out),
        StatementType::BlockStatement(block) => collect_var_names(&block.body, out),
        StatementType::IfStatement { consequent, alternate, .. } => {
            collect_vars_in_statement(consequent, out);
            if let Some(alt) = alternate {
                collect_vars_in_statement(alt, out);
            }
        }
        StatementType::WhileStatement { body, .. } | StatementType::DoWhileStatement { body, .. } => {
            collect_vars_in_statement(body, out)
        }
        StatementType::ForStatement { init, body, .. } => {
            if let Some(ForInitData::VariableDeclaration(decl)) = init {
                collect_vars_in_declaration(decl, out);
            }
            collect_vars_in_statement(body, out);
        }
        StatementType::TryStatement { block, handler, finalizer, .. } => {
            collect_var_names(&block.body, out);
            if let Some(h) = handler {
                collect_var_names(&h.body.body, out);
            }
            if let Some(f) = finalizer {
                collect_var_names(&f.body, out);
            }
        }
        _ => {}
    }
}

impl<'a> ScopeChecker<'a> {
    fn error(&self, message: String, meta: &Meta) -> CompileError {
        CompileError::new(message, self.filename, meta.line, meta.column)
    }

    /// Declares the block-level names of `body` into `scope`. With
    /// `function_level`, hoisted `var` names land there too.
    fn hoist_into(&self, scope: &mut Scope, body: &[StatementType], function_level: bool) -> Result<(), CompileError> {
        if function_level {
            let mut vars = Vec::new();
            collect_var_names(body, &mut vars);
            scope.vars.extend(vars);
        }
        for stmt in body {
            match stmt {
                StatementType::VariableDeclaration(decl) if decl.kind != VariableDeclarationKind::Var => {
                    for d in &decl.declarations {
                        if scope.lexical.contains(&d.id.name) || scope.vars.contains(&d.id.name) {
                            return Err(self.error(format!("redeclaration of {}", d.id.name), &d.meta));
                        }
                        scope.lexical.insert(d.id.name.clone());
                    }
                }
                StatementType::FunctionDeclaration(f) => {
                    let name = f.name();
                    if scope.lexical.contains(&name) && !function_level {
                        return Err(self.error(format!("redeclaration of {}", name), &f.meta));
                    }
                    if function_level {
                        scope.vars.insert(name);
                    } else {
                        scope.lexical.insert(name);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn with_block<F>(&mut self, body: &[StatementType], f: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let mut scope = Scope::default();
        self.hoist_into(&mut scope, body, false)?;
        self.scopes.push(scope);
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn block(&mut self, block: &BlockStatementData) -> Result<(), CompileError> {
        self.with_block(&block.body, |this| {
            for stmt in &block.body {
                this.statement(stmt)?;
            }
            Ok(())
        })
    }

    fn statement(&mut self, stmt: &StatementType) -> Result<(), CompileError> {
        match stmt {
            StatementType::ExpressionStatement { expression, .. } => self.expression(expression),
            StatementType::VariableDeclaration(decl) => self.declaration(decl),
            StatementType::FunctionDeclaration(f) => self.function(f, false),
            StatementType::BlockStatement(block) => self.block(block),
            StatementType::IfStatement { test, consequent, alternate, .. } => {
                self.expression(test)?;
                self.statement(consequent)?;
                if let Some(alt) = alternate {
                    self.statement(alt)?;
                }
                Ok(())
            }
            StatementType::WhileStatement { test, body, .. } | StatementType::DoWhileStatement { test, body, .. } => {
                self.expression(test)?;
                self.loop_body(body)
            }
            StatementType::ForStatement { init, test, update, body, .. } => {
                let mut scope = Scope::default();
                if let Some(ForInitData::VariableDeclaration(decl)) = init {
                    if decl.kind != VariableDeclarationKind::Var {
                        for d in &decl.declarations {
                            scope.lexical.insert(d.id.name.clone());
                        }
                    }
                }
                self.scopes.push(scope);
                let result = (|| {
                    match init {
                        Some(ForInitData::VariableDeclaration(decl)) => self.declaration(decl)?,
                        Some(ForInitData::Expression(e)) => self.expression(e)?,
                        None => {}
                    }
                    if let Some(t) = test {
                        self.expression(t)?;
                    }
                    if let Some(u) = update {
                        self.expression(u)?;
                    }
                    self.loop_body(body)
                })();
                self.scopes.pop();
                result
            }
            StatementType::ReturnStatement { argument, meta } => {
                if !self.in_function {
                    return Err(self.error("return not in function".to_string(), meta));
                }
                match argument {
                    Some(arg) => self.expression(arg),
                    None => Ok(()),
                }
            }
            StatementType::BreakStatement { meta } => {
                if self.loop_depth == 0 {
                    return Err(self.error("illegal break statement".to_string(), meta));
                }
                Ok(())
            }
            StatementType::ContinueStatement { meta } => {
                if self.loop_depth == 0 {
                    return Err(self.error("illegal continue statement".to_string(), meta));
                }
                Ok(())
            }
            StatementType::ThrowStatement { argument, .. } => self.expression(argument),
            StatementType::TryStatement { block, handler, finalizer, .. } => {
                self.block(block)?;
                if let Some(h) = handler {
                    let mut scope = Scope::default();
                    if let Some(param) = &h.param {
                        scope.lexical.insert(param.name.clone());
                    }
                    self.scopes.push(scope);
                    let result = self.block(&h.body);
                    self.scopes.pop();
                    result?;
                }
                if let Some(f) = finalizer {
                    self.block(f)?;
                }
                Ok(())
            }
            StatementType::DebuggerStatement { .. } | StatementType::EmptyStatement { .. } => Ok(()),
        }
    }

    fn loop_body(&mut self, body: &StatementType) -> Result<(), CompileError> {
        self.loop_depth += 1;
        let result = self.statement(body);
        self.loop_depth -= 1;
        result
    }

    fn declaration(&mut self, decl: &VariableDeclarationData) -> Result<(), CompileError> {
        for d in &decl.declarations {
            if decl.kind == VariableDeclarationKind::Var {
                for scope in self.scopes.iter().rev() {
                    if scope.lexical.contains(&d.id.name) {
                        return Err(self.error(format!("redeclaration of let {}", d.id.name), &d.meta));
                    }
                    if scope.function_boundary {
                        break;
                    }
                }
            }
            if decl.kind == VariableDeclarationKind::Const && d.init.is_none() {
                return Err(self.error("missing = in const declaration".to_string(), &d.meta));
            }
            if let Some(init) = &d.init {
                self.expression(init)?;
            }
        }
        Ok(())
    }

    fn function(&mut self, f: &Arc<FunctionData>, is_expression: bool) -> Result<(), CompileError> {
        let mut scope = Scope {
            function_boundary: true,
            ..Scope::default()
        };
        // A named function expression can refer to itself by name.
        if is_expression {
            if let Some(id) = &f.id {
                scope.vars.insert(id.name.clone());
            }
        }
        let mut seen = HashSet::new();
        for p in &f.params {
            if !seen.insert(p.name.clone()) && (f.strict || self.strict || f.is_arrow) {
                return Err(self.error(format!("duplicate parameter name {}", p.name), &p.meta));
            }
            scope.vars.insert(p.name.clone());
        }
        let saved = (self.loop_depth, self.in_function, self.in_arrow, self.strict);
        self.loop_depth = 0;
        self.in_function = true;
        self.in_arrow = f.is_arrow;
        self.strict = self.strict || f.strict;
        let result = match &f.body {
            FunctionBodyData::Statements(body) => {
                let hoisted = self.hoist_into(&mut scope, body, true);
                self.scopes.push(scope);
                let result = hoisted.and_then(|_| {
                    for stmt in body {
                        self.statement(stmt)?;
                    }
                    Ok(())
                });
                self.scopes.pop();
                result
            }
            FunctionBodyData::Expression(e) => {
                self.scopes.push(scope);
                let result = self.expression(e);
                self.scopes.pop();
                result
            }
        };
        (self.loop_depth, self.in_function, self.in_arrow, self.strict) = saved;
        result
    }

    fn reference(&self, name: &Arc<str>, meta: &Meta) -> Result<(), CompileError> {
        let mut crossed = false;
        for scope in self.scopes.iter().rev() {
            if scope.declares(name) {
                if crossed && !scope.global {
                    return Err(self.error(
                        format!("cannot access '{}' from an enclosing function; closures over outer locals are not supported", name),
                        meta,
                    ));
                }
                return Ok(());
            }
            if scope.function_boundary {
                crossed = true;
            }
        }
        Ok(())
    }

    fn assignment_target(&mut self, target: &ExpressionType) -> Result<(), CompileError> {
        match target {
            ExpressionType::Identifier(id) => {
                if self.strict && (&*id.name == "eval" || &*id.name == "arguments") {
                    return Err(self.error(format!("cannot assign to {} in strict mode", id.name), &id.meta));
                }
                self.reference(&id.name, &id.meta)
            }
            ExpressionType::MemberExpression { .. } => self.expression(target),
            other => Err(self.error("invalid assignment target".to_string(), other.get_meta())),
        }
    }

    fn expression(&mut self, expr: &ExpressionType) -> Result<(), CompileError> {
        match expr {
            ExpressionType::Literal { .. } => Ok(()),
            ExpressionType::Identifier(id) => self.reference(&id.name, &id.meta),
            ExpressionType::ThisExpression { meta } => {
                if self.in_arrow {
                    return Err(self.error("'this' is not supported inside arrow functions".to_string(), meta));
                }
                Ok(())
            }
            ExpressionType::ArrayExpression { elements, .. } => {
                elements.iter().try_for_each(|e| self.expression(e))
            }
            ExpressionType::ObjectExpression { properties, .. } => {
                properties.iter().try_for_each(|p| self.expression(&p.value))
            }
            ExpressionType::FunctionExpression(f) => self.function(f, true),
            ExpressionType::UnaryExpression { operator, argument, meta } => {
                if *operator == UnaryOperator::Delete && self.strict {
                    if let ExpressionType::Identifier(_) = argument.as_ref() {
                        return Err(self.error("applying the 'delete' operator to an unqualified name is deprecated".to_string(), meta));
                    }
                }
                self.expression(argument)
            }
            ExpressionType::UpdateExpression { argument, .. } => self.assignment_target(argument),
            ExpressionType::BinaryExpression { left, right, .. }
            | ExpressionType::LogicalExpression { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)
            }
            ExpressionType::AssignmentExpression { left, right, .. } => {
                self.assignment_target(left)?;
                self.expression(right)
            }
            ExpressionType::ConditionalExpression { test, consequent, alternate, .. } => {
                self.expression(test)?;
                self.expression(consequent)?;
                self.expression(alternate)
            }
            ExpressionType::CallExpression { callee, arguments, .. }
            | ExpressionType::NewExpression { callee, arguments, .. } => {
                self.expression(callee)?;
                arguments.iter().try_for_each(|a| self.expression(a))
            }
            ExpressionType::MemberExpression { object, property, .. } => {
                self.expression(object)?;
                match property {
                    MemberProperty::Named(_) => Ok(()),
                    MemberProperty::Computed(e) => self.expression(e),
                }
            }
            ExpressionType::SequenceExpression { expressions, .. } => {
                expressions.iter().try_for_each(|e| self.expression(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;

    fn check(code: &str) -> Result<(), CompileError> {
        let program = JsParser::parse_to_ast_from_str(code).unwrap();
        check_program(&program, &Arc::from("test.js"))
    }

    #[test]
    fn globals_are_visible_everywhere() {
        assert!(check("var g = 1; let h = 2; function f() { return g + h + f; }").is_ok());
    }

    #[test]
    fn outer_locals_are_rejected() {
        let err = check("function outer() { var x = 1; function inner() { return x; } }").unwrap_err();
        assert!(err.message.contains("'x'"));
        assert_eq!(err.line, 1);
        assert!(check("{ let y = 1; (function () { return y; }); }").is_err());
    }

    #[test]
    fn shadowing_an_outer_local_is_fine() {
        assert!(check("function outer(x) { return function (x) { return x; }; }").is_ok());
    }

    #[test]
    fn early_errors() {
        assert!(check("break;").is_err());
        assert!(check("return 1;").is_err());
        assert!(check("let a; let a;").is_err());
        assert!(check("{ let b; var b; }").is_err());
        assert!(check("1 = 2;").is_err());
        // A const without an initializer is already rejected by the parser.
        assert!(JsParser::parse_to_ast_from_str("const c;").is_err());
        assert!(check("var f = () => this;").is_err());
        assert!(check("'use strict'; var z; delete z;").is_err());
        assert!(check("while (true) { if (1) break; else continue; }").is_ok());
    }
}
