use std::sync::Arc;

use lazy_static::lazy_static;
use pest::error::{Error, LineColLocation};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use super::ast::*;
use super::util::{parse_numeric_literal, unescape_string_literal, LineIndex};
use super::JsError;

#[derive(Parser)]
#[grammar = "parser/js_grammar.pest"] // relative to src
pub struct JsParser;

lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::op_nullish, Assoc::Left))
        .op(Op::infix(Rule::op_or, Assoc::Left))
        .op(Op::infix(Rule::op_and, Assoc::Left))
        .op(Op::infix(Rule::op_bit_or, Assoc::Left))
        .op(Op::infix(Rule::op_bit_xor, Assoc::Left))
        .op(Op::infix(Rule::op_bit_and, Assoc::Left))
        .op(Op::infix(Rule::op_eq, Assoc::Left)
            | Op::infix(Rule::op_ne, Assoc::Left)
            | Op::infix(Rule::op_strict_eq, Assoc::Left)
            | Op::infix(Rule::op_strict_ne, Assoc::Left))
        .op(Op::infix(Rule::op_lt, Assoc::Left)
            | Op::infix(Rule::op_gt, Assoc::Left)
            | Op::infix(Rule::op_le, Assoc::Left)
            | Op::infix(Rule::op_ge, Assoc::Left)
            | Op::infix(Rule::op_instanceof, Assoc::Left)
            | Op::infix(Rule::op_in, Assoc::Left))
        .op(Op::infix(Rule::op_shl, Assoc::Left)
            | Op::infix(Rule::op_shr, Assoc::Left)
            | Op::infix(Rule::op_ushr, Assoc::Left))
        .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
        .op(Op::infix(Rule::op_mul, Assoc::Left)
            | Op::infix(Rule::op_div, Assoc::Left)
            | Op::infix(Rule::op_mod, Assoc::Left))
        .op(Op::infix(Rule::op_exp, Assoc::Right));
}

impl JsParser {
    /// Parses a whole script into its AST.
    pub fn parse_to_ast_from_str(script: &str) -> Result<ProgramData, JsError> {
        let mut pairs =
            JsParser::parse(Rule::script, script).map_err(|e| pest_error_to_js_error(&e))?;
        let builder = AstBuilder {
            lines: LineIndex::new(script),
        };
        match pairs.next() {
            Some(pair) => builder.build_program(pair),
            None => Err(JsError::new("empty parse result", 1, 1)),
        }
    }

    /// Debug rendering of the raw pest token tree.
    pub fn parse_to_token_tree(script: &str) -> Result<String, JsError> {
        let pairs =
            JsParser::parse(Rule::script, script).map_err(|e| pest_error_to_js_error(&e))?;
        let mut lines = vec![];
        for pair in pairs {
            pair_to_lines(pair, 0, &mut lines);
        }
        Ok(lines.join("\n"))
    }
}

fn pair_to_lines(pair: Pair<Rule>, level: usize, out: &mut Vec<String>) {
    let span = pair.as_span();
    out.push(format!(
        "{}{:?} => ({},{}) #{:?}",
        "  ".repeat(level),
        pair.as_rule(),
        span.start(),
        span.end(),
        span.as_str()
    ));
    for child in pair.into_inner() {
        pair_to_lines(child, level + 1, out);
    }
}

fn pest_error_to_js_error(e: &Error<Rule>) -> JsError {
    let (line, column) = match e.line_col {
        LineColLocation::Pos((l, c)) => (l, c),
        LineColLocation::Span((l, c), _) => (l, c),
    };
    let message = match &e.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            format!("unexpected token, expected one of {:?}", positives)
        }
        _ => "unexpected token".to_string(),
    };
    JsError::new(&message, line as u32, column as u32)
}

fn is_keyword_rule(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_var
            | Rule::kw_let
            | Rule::kw_const
            | Rule::kw_function
            | Rule::kw_return
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_do
            | Rule::kw_for
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_throw
            | Rule::kw_try
            | Rule::kw_catch
            | Rule::kw_finally
            | Rule::kw_debugger
            | Rule::kw_new
            | Rule::EOI
    )
}

fn significant_children(pair: Pair<Rule>) -> Vec<Pair<Rule>> {
    pair.into_inner()
        .filter(|p| !is_keyword_rule(p.as_rule()))
        .collect()
}

fn is_use_strict_directive(pair: &Pair<Rule>) -> bool {
    if pair.as_rule() != Rule::expression_statement {
        return false;
    }
    let text = pair.as_str().trim().trim_end_matches(';').trim();
    text == "\"use strict\"" || text == "'use strict'"
}

struct AstBuilder {
    lines: LineIndex,
}

impl AstBuilder {
    fn meta(&self, pair: &Pair<Rule>) -> Meta {
        let span = pair.as_span();
        let (line, column) = self.lines.locate(span.start());
        Meta {
            start_index: span.start(),
            end_index: span.end(),
            line,
            column,
        }
    }

    fn unexpected(&self, pair: &Pair<Rule>) -> JsError {
        let meta = self.meta(pair);
        JsError::new(
            &format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str()),
            meta.line,
            meta.column,
        )
    }

    fn build_program(&self, pair: Pair<Rule>) -> Result<ProgramData, JsError> {
        let meta = self.meta(&pair);
        let children = significant_children(pair);
        let strict = children.first().map_or(false, is_use_strict_directive);
        let mut body = Vec::with_capacity(children.len());
        for child in children {
            body.push(self.build_statement(child, strict)?);
        }
        Ok(ProgramData { body, strict, meta })
    }

    // ── Statements ───────────────────────────────────────────

    fn build_statement(&self, pair: Pair<Rule>, strict: bool) -> Result<StatementType, JsError> {
        let meta = self.meta(&pair);
        match pair.as_rule() {
            Rule::block_statement => Ok(StatementType::BlockStatement(
                self.build_block(pair, strict)?,
            )),
            Rule::variable_statement => {
                let decl = self.first_child(pair)?;
                Ok(StatementType::VariableDeclaration(
                    self.build_variable_declaration(decl, strict)?,
                ))
            }
            Rule::function_declaration => Ok(StatementType::FunctionDeclaration(Arc::new(
                self.build_function(pair, strict)?,
            ))),
            Rule::if_statement => {
                let mut children = significant_children(pair).into_iter();
                let test = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                let consequent =
                    Box::new(self.build_statement(self.take(&mut children, &meta)?, strict)?);
                let alternate = match children.next() {
                    Some(p) => Some(Box::new(self.build_statement(p, strict)?)),
                    None => None,
                };
                Ok(StatementType::IfStatement {
                    test,
                    consequent,
                    alternate,
                    meta,
                })
            }
            Rule::while_statement => {
                let mut children = significant_children(pair).into_iter();
                let test = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                let body = Box::new(self.build_statement(self.take(&mut children, &meta)?, strict)?);
                Ok(StatementType::WhileStatement { test, body, meta })
            }
            Rule::do_while_statement => {
                let mut children = significant_children(pair).into_iter();
                let body = Box::new(self.build_statement(self.take(&mut children, &meta)?, strict)?);
                let test = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                Ok(StatementType::DoWhileStatement { body, test, meta })
            }
            Rule::for_statement => self.build_for(pair, strict),
            Rule::return_statement => {
                let argument = match significant_children(pair).into_iter().next() {
                    Some(p) => Some(self.build_expression(p, strict)?),
                    None => None,
                };
                Ok(StatementType::ReturnStatement { argument, meta })
            }
            Rule::break_statement => Ok(StatementType::BreakStatement { meta }),
            Rule::continue_statement => Ok(StatementType::ContinueStatement { meta }),
            Rule::throw_statement => {
                let mut children = significant_children(pair).into_iter();
                let argument = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                Ok(StatementType::ThrowStatement { argument, meta })
            }
            Rule::try_statement => self.build_try(pair, strict),
            Rule::debugger_statement => Ok(StatementType::DebuggerStatement { meta }),
            Rule::empty_statement => Ok(StatementType::EmptyStatement { meta }),
            Rule::expression_statement => {
                let inner = self.first_child(pair)?;
                Ok(StatementType::ExpressionStatement {
                    expression: self.build_expression(inner, strict)?,
                    meta,
                })
            }
            _ => Err(self.unexpected(&pair)),
        }
    }

    fn build_block(&self, pair: Pair<Rule>, strict: bool) -> Result<BlockStatementData, JsError> {
        let meta = self.meta(&pair);
        let mut body = vec![];
        for child in pair.into_inner() {
            body.push(self.build_statement(child, strict)?);
        }
        Ok(BlockStatementData { body, meta })
    }

    fn build_variable_declaration(
        &self,
        pair: Pair<Rule>,
        strict: bool,
    ) -> Result<VariableDeclarationData, JsError> {
        let meta = self.meta(&pair);
        let mut children = pair.into_inner();
        let kind_pair = self.take(&mut children, &meta)?;
        let kind = match kind_pair.as_str() {
            "var" => VariableDeclarationKind::Var,
            "let" => VariableDeclarationKind::Let,
            "const" => VariableDeclarationKind::Const,
            _ => return Err(self.unexpected(&kind_pair)),
        };
        let mut declarations = vec![];
        for declarator in children {
            let d_meta = self.meta(&declarator);
            let mut parts = declarator.into_inner();
            let id = self.build_identifier(self.take(&mut parts, &d_meta)?);
            let init = match parts.next() {
                Some(p) => Some(self.build_expression(p, strict)?),
                None => None,
            };
            if init.is_none() && kind == VariableDeclarationKind::Const {
                return Err(JsError::new(
                    "missing = in const declaration",
                    d_meta.line,
                    d_meta.column,
                ));
            }
            declarations.push(VariableDeclaratorData {
                id,
                init,
                meta: d_meta,
            });
        }
        Ok(VariableDeclarationData {
            kind,
            declarations,
            meta,
        })
    }

    fn build_for(&self, pair: Pair<Rule>, strict: bool) -> Result<StatementType, JsError> {
        let meta = self.meta(&pair);
        let mut init = None;
        let mut test = None;
        let mut update = None;
        let mut body = None;
        for child in significant_children(pair) {
            match child.as_rule() {
                Rule::for_init => {
                    let inner = self.first_child(child)?;
                    init = Some(if inner.as_rule() == Rule::variable_declaration {
                        ForInitData::VariableDeclaration(
                            self.build_variable_declaration(inner, strict)?,
                        )
                    } else {
                        ForInitData::Expression(self.build_expression(inner, strict)?)
                    });
                }
                Rule::for_test => {
                    test = Some(self.build_expression(self.first_child(child)?, strict)?)
                }
                Rule::for_update => {
                    update = Some(self.build_expression(self.first_child(child)?, strict)?)
                }
                _ => body = Some(Box::new(self.build_statement(child, strict)?)),
            }
        }
        let body = body.ok_or_else(|| JsError::new("missing for body", meta.line, meta.column))?;
        Ok(StatementType::ForStatement {
            init,
            test,
            update,
            body,
            meta,
        })
    }

    fn build_try(&self, pair: Pair<Rule>, strict: bool) -> Result<StatementType, JsError> {
        let meta = self.meta(&pair);
        let mut block = None;
        let mut handler = None;
        let mut finalizer = None;
        for child in significant_children(pair) {
            match child.as_rule() {
                Rule::block_statement => block = Some(self.build_block(child, strict)?),
                Rule::catch_clause => {
                    let c_meta = self.meta(&child);
                    let mut param = None;
                    let mut body = None;
                    for part in significant_children(child) {
                        match part.as_rule() {
                            Rule::identifier => param = Some(self.build_identifier(part)),
                            _ => body = Some(self.build_block(part, strict)?),
                        }
                    }
                    let body = body
                        .ok_or_else(|| JsError::new("missing catch body", c_meta.line, c_meta.column))?;
                    handler = Some(CatchClauseData {
                        param,
                        body,
                        meta: c_meta,
                    });
                }
                Rule::finally_clause => {
                    let inner = self.first_child(child)?;
                    finalizer = Some(self.build_block(inner, strict)?);
                }
                _ => return Err(self.unexpected(&child)),
            }
        }
        if handler.is_none() && finalizer.is_none() {
            return Err(JsError::new(
                "missing catch or finally after try",
                meta.line,
                meta.column,
            ));
        }
        let block = block.ok_or_else(|| JsError::new("missing try block", meta.line, meta.column))?;
        Ok(StatementType::TryStatement {
            block,
            handler,
            finalizer,
            meta,
        })
    }

    // ── Functions ────────────────────────────────────────────

    fn build_function(&self, pair: Pair<Rule>, outer_strict: bool) -> Result<FunctionData, JsError> {
        let meta = self.meta(&pair);
        let source_text: Arc<str> = Arc::from(pair.as_str());
        let mut id = None;
        let mut params = vec![];
        let mut body_pair = None;
        for child in significant_children(pair) {
            match child.as_rule() {
                Rule::identifier => id = Some(self.build_identifier(child)),
                Rule::formal_parameters => params = self.build_params(child),
                Rule::function_body => body_pair = Some(child),
                _ => return Err(self.unexpected(&child)),
            }
        }
        let body_pair =
            body_pair.ok_or_else(|| JsError::new("missing function body", meta.line, meta.column))?;
        let (body, strict) = self.build_function_body(body_pair, outer_strict)?;
        Ok(FunctionData {
            id,
            params,
            body,
            is_arrow: false,
            strict,
            source_text,
            meta,
        })
    }

    fn build_function_body(
        &self,
        pair: Pair<Rule>,
        outer_strict: bool,
    ) -> Result<(FunctionBodyData, bool), JsError> {
        let children: Vec<Pair<Rule>> = pair.into_inner().collect();
        let strict = outer_strict || children.first().map_or(false, is_use_strict_directive);
        let mut statements = Vec::with_capacity(children.len());
        for child in children {
            statements.push(self.build_statement(child, strict)?);
        }
        Ok((FunctionBodyData::Statements(statements), strict))
    }

    fn build_params(&self, pair: Pair<Rule>) -> Vec<IdentifierData> {
        pair.into_inner().map(|p| self.build_identifier(p)).collect()
    }

    fn build_arrow_function(&self, pair: Pair<Rule>, strict: bool) -> Result<FunctionData, JsError> {
        let meta = self.meta(&pair);
        let source_text: Arc<str> = Arc::from(pair.as_str());
        let mut children = pair.into_inner();
        let params_pair = self.take(&mut children, &meta)?;
        let params = match params_pair.into_inner().next() {
            Some(p) if p.as_rule() == Rule::identifier => vec![self.build_identifier(p)],
            Some(p) => self.build_params(p),
            None => vec![],
        };
        let body_pair = self.take(&mut children, &meta)?;
        let (body, strict) = if body_pair.as_rule() == Rule::function_body {
            self.build_function_body(body_pair, strict)?
        } else {
            (
                FunctionBodyData::Expression(Box::new(self.build_expression(body_pair, strict)?)),
                strict,
            )
        };
        Ok(FunctionData {
            id: None,
            params,
            body,
            is_arrow: true,
            strict,
            source_text,
            meta,
        })
    }

    // ── Expressions ──────────────────────────────────────────

    fn build_expression(&self, pair: Pair<Rule>, strict: bool) -> Result<ExpressionType, JsError> {
        let meta = self.meta(&pair);
        match pair.as_rule() {
            Rule::expression => {
                let mut expressions = vec![];
                for child in pair.into_inner() {
                    expressions.push(self.build_expression(child, strict)?);
                }
                if expressions.len() == 1 {
                    Ok(expressions.remove(0))
                } else {
                    Ok(ExpressionType::SequenceExpression { expressions, meta })
                }
            }
            Rule::assignment_expr => {
                let mut children = pair.into_inner();
                let first = self.take(&mut children, &meta)?;
                match children.next() {
                    None => self.build_expression(first, strict),
                    Some(op) => {
                        let left = self.build_expression(first, strict)?;
                        let right = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                        let operator = assignment_operator(op.as_str())
                            .ok_or_else(|| self.unexpected(&op))?;
                        Ok(ExpressionType::AssignmentExpression {
                            operator,
                            left: Box::new(left),
                            right: Box::new(right),
                            meta,
                        })
                    }
                }
            }
            Rule::arrow_function => Ok(ExpressionType::FunctionExpression(Arc::new(
                self.build_arrow_function(pair, strict)?,
            ))),
            Rule::conditional_expr => {
                let mut children = pair.into_inner();
                let test = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                match children.next() {
                    None => Ok(test),
                    Some(cons) => {
                        let consequent = self.build_expression(cons, strict)?;
                        let alternate =
                            self.build_expression(self.take(&mut children, &meta)?, strict)?;
                        Ok(ExpressionType::ConditionalExpression {
                            test: Box::new(test),
                            consequent: Box::new(consequent),
                            alternate: Box::new(alternate),
                            meta,
                        })
                    }
                }
            }
            Rule::binary_expr => self.build_binary(pair, strict),
            Rule::unary_expr => self.build_unary(pair, strict),
            Rule::postfix_expr => {
                let mut children = pair.into_inner();
                let argument = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                match children.next() {
                    None => Ok(argument),
                    Some(op) => Ok(ExpressionType::UpdateExpression {
                        operator: if op.as_rule() == Rule::op_increment {
                            UpdateOperator::PlusPlus
                        } else {
                            UpdateOperator::MinusMinus
                        },
                        prefix: false,
                        argument: Box::new(argument),
                        meta,
                    }),
                }
            }
            Rule::lhs_expr => self.build_lhs(pair, strict),
            Rule::new_expr => self.build_new(pair, strict),
            Rule::new_target => {
                let mut children = pair.into_inner();
                let mut expr = self.build_expression(self.take(&mut children, &meta)?, strict)?;
                for suffix in children {
                    expr = self.apply_member_suffix(expr, suffix, strict)?;
                }
                Ok(expr)
            }
            Rule::function_expr => Ok(ExpressionType::FunctionExpression(Arc::new(
                self.build_function(pair, strict)?,
            ))),
            Rule::this_expr => Ok(ExpressionType::ThisExpression { meta }),
            Rule::null_literal => Ok(ExpressionType::Literal {
                value: LiteralType::NullLiteral,
                meta,
            }),
            Rule::true_literal => Ok(ExpressionType::Literal {
                value: LiteralType::BooleanLiteral(true),
                meta,
            }),
            Rule::false_literal => Ok(ExpressionType::Literal {
                value: LiteralType::BooleanLiteral(false),
                meta,
            }),
            Rule::numeric_literal => {
                let n = parse_numeric_literal(pair.as_str()).ok_or_else(|| self.unexpected(&pair))?;
                Ok(ExpressionType::Literal {
                    value: LiteralType::NumberLiteral(n),
                    meta,
                })
            }
            Rule::string_literal => Ok(ExpressionType::Literal {
                value: LiteralType::StringLiteral(self.build_string(pair)?),
                meta,
            }),
            Rule::array_literal => {
                let mut elements = vec![];
                for child in pair.into_inner() {
                    elements.push(self.build_expression(child, strict)?);
                }
                Ok(ExpressionType::ArrayExpression { elements, meta })
            }
            Rule::object_literal => {
                let mut properties = vec![];
                for prop in pair.into_inner() {
                    properties.push(self.build_property(prop, strict)?);
                }
                Ok(ExpressionType::ObjectExpression { properties, meta })
            }
            Rule::identifier => Ok(ExpressionType::Identifier(self.build_identifier(pair))),
            Rule::paren_expr => self.build_expression(self.first_child(pair)?, strict),
            _ => Err(self.unexpected(&pair)),
        }
    }

    fn build_binary(&self, pair: Pair<Rule>, strict: bool) -> Result<ExpressionType, JsError> {
        PRATT_PARSER
            .map_primary(|primary| self.build_expression(primary, strict))
            .map_infix(|lhs, op, rhs| {
                let left = Box::new(lhs?);
                let right = Box::new(rhs?);
                let (lm, rm) = (*left.get_meta(), *right.get_meta());
                let meta = Meta {
                    start_index: lm.start_index,
                    end_index: rm.end_index,
                    line: lm.line,
                    column: lm.column,
                };
                if let Some(operator) = logical_operator(op.as_rule()) {
                    return Ok(ExpressionType::LogicalExpression {
                        operator,
                        left,
                        right,
                        meta,
                    });
                }
                let operator = binary_operator(op.as_rule()).ok_or_else(|| self.unexpected(&op))?;
                Ok(ExpressionType::BinaryExpression {
                    operator,
                    left,
                    right,
                    meta,
                })
            })
            .parse(pair.into_inner())
    }

    fn build_unary(&self, pair: Pair<Rule>, strict: bool) -> Result<ExpressionType, JsError> {
        let meta = self.meta(&pair);
        let mut children: Vec<Pair<Rule>> = pair.into_inner().collect();
        let operand_pair = children
            .pop()
            .ok_or_else(|| JsError::new("missing operand", meta.line, meta.column))?;
        let mut expr = self.build_expression(operand_pair, strict)?;
        for op in children.into_iter().rev() {
            let op_meta = self.meta(&op);
            let argument = Box::new(expr);
            expr = match op.as_rule() {
                Rule::op_increment | Rule::op_decrement => ExpressionType::UpdateExpression {
                    operator: if op.as_rule() == Rule::op_increment {
                        UpdateOperator::PlusPlus
                    } else {
                        UpdateOperator::MinusMinus
                    },
                    prefix: true,
                    argument,
                    meta: op_meta,
                },
                rule => ExpressionType::UnaryExpression {
                    operator: unary_operator(rule).ok_or_else(|| self.unexpected(&op))?,
                    argument,
                    meta: op_meta,
                },
            };
        }
        Ok(expr)
    }

    fn build_lhs(&self, pair: Pair<Rule>, strict: bool) -> Result<ExpressionType, JsError> {
        let meta = self.meta(&pair);
        let mut children = pair.into_inner();
        let mut expr = self.build_expression(self.take(&mut children, &meta)?, strict)?;
        for suffix in children {
            expr = match suffix.as_rule() {
                Rule::arguments => {
                    let s_meta = self.meta(&suffix);
                    let arguments = self.build_arguments(suffix, strict)?;
                    ExpressionType::CallExpression {
                        callee: Box::new(expr),
                        arguments,
                        meta: Meta {
                            start_index: meta.start_index,
                            end_index: s_meta.end_index,
                            line: meta.line,
                            column: meta.column,
                        },
                    }
                }
                _ => self.apply_member_suffix(expr, suffix, strict)?,
            };
        }
        Ok(expr)
    }

    fn build_new(&self, pair: Pair<Rule>, strict: bool) -> Result<ExpressionType, JsError> {
        let meta = self.meta(&pair);
        let mut children = significant_children(pair).into_iter();
        let callee = self.build_expression(self.take(&mut children, &meta)?, strict)?;
        let arguments = match children.next() {
            Some(args) => self.build_arguments(args, strict)?,
            None => vec![],
        };
        Ok(ExpressionType::NewExpression {
            callee: Box::new(callee),
            arguments,
            meta,
        })
    }

    fn apply_member_suffix(
        &self,
        object: ExpressionType,
        suffix: Pair<Rule>,
        strict: bool,
    ) -> Result<ExpressionType, JsError> {
        let s_meta = self.meta(&suffix);
        let o_meta = *object.get_meta();
        let meta = Meta {
            start_index: o_meta.start_index,
            end_index: s_meta.end_index,
            line: o_meta.line,
            column: o_meta.column,
        };
        let property = match suffix.as_rule() {
            Rule::dot_member => MemberProperty::Named(Arc::from(self.first_child(suffix)?.as_str())),
            Rule::index_member => {
                MemberProperty::Computed(Box::new(self.build_expression(self.first_child(suffix)?, strict)?))
            }
            _ => return Err(self.unexpected(&suffix)),
        };
        Ok(ExpressionType::MemberExpression {
            object: Box::new(object),
            property,
            meta,
        })
    }

    fn build_arguments(&self, pair: Pair<Rule>, strict: bool) -> Result<Vec<ExpressionType>, JsError> {
        let mut args = vec![];
        for child in pair.into_inner() {
            args.push(self.build_expression(child, strict)?);
        }
        Ok(args)
    }

    fn build_property(&self, pair: Pair<Rule>, strict: bool) -> Result<PropertyData, JsError> {
        let meta = self.meta(&pair);
        let mut children = pair.into_inner();
        let first = self.take(&mut children, &meta)?;
        if first.as_rule() == Rule::shorthand_property {
            let id = self.build_identifier(self.first_child(first)?);
            return Ok(PropertyData {
                key: id.name.clone(),
                value: ExpressionType::Identifier(id),
                meta,
            });
        }
        let key_pair = self.first_child(first)?;
        let key: Arc<str> = match key_pair.as_rule() {
            Rule::string_literal => self.build_string(key_pair)?,
            Rule::numeric_literal => {
                let n = parse_numeric_literal(key_pair.as_str())
                    .ok_or_else(|| self.unexpected(&key_pair))?;
                Arc::from(crate::runner::ds::operations::type_conversion::number_to_string(n).as_str())
            }
            _ => Arc::from(key_pair.as_str()),
        };
        let value = self.build_expression(self.take(&mut children, &meta)?, strict)?;
        Ok(PropertyData { key, value, meta })
    }

    fn build_string(&self, pair: Pair<Rule>) -> Result<Arc<str>, JsError> {
        let meta = self.meta(&pair);
        let raw = match pair.into_inner().next() {
            Some(chars) => chars.as_str().to_string(),
            None => String::new(),
        };
        unescape_string_literal(&raw)
            .map(|s| Arc::from(s.as_str()))
            .ok_or_else(|| JsError::new("malformed escape sequence", meta.line, meta.column))
    }

    fn build_identifier(&self, pair: Pair<Rule>) -> IdentifierData {
        IdentifierData {
            name: Arc::from(pair.as_str()),
            meta: self.meta(&pair),
        }
    }

    fn first_child<'i>(&self, pair: Pair<'i, Rule>) -> Result<Pair<'i, Rule>, JsError> {
        let meta = self.meta(&pair);
        pair.into_inner()
            .find(|p| !is_keyword_rule(p.as_rule()))
            .ok_or_else(|| JsError::new("unexpected end of construct", meta.line, meta.column))
    }

    fn take<'i, I: Iterator<Item = Pair<'i, Rule>>>(
        &self,
        iter: &mut I,
        meta: &Meta,
    ) -> Result<Pair<'i, Rule>, JsError> {
        iter.next()
            .ok_or_else(|| JsError::new("unexpected end of construct", meta.line, meta.column))
    }
}

fn assignment_operator(op: &str) -> Option<AssignmentOperator> {
    Some(match op {
        "=" => AssignmentOperator::Equals,
        "+=" => AssignmentOperator::AddEquals,
        "-=" => AssignmentOperator::SubtractEquals,
        "*=" => AssignmentOperator::MultiplyEquals,
        "/=" => AssignmentOperator::DivideEquals,
        "%=" => AssignmentOperator::ModuloEquals,
        "**=" => AssignmentOperator::ExponentEquals,
        "<<=" => AssignmentOperator::BitwiseLeftShiftEquals,
        ">>=" => AssignmentOperator::BitwiseRightShiftEquals,
        ">>>=" => AssignmentOperator::BitwiseUnsignedRightShiftEquals,
        "|=" => AssignmentOperator::BitwiseOrEquals,
        "^=" => AssignmentOperator::BitwiseXorEquals,
        "&=" => AssignmentOperator::BitwiseAndEquals,
        "&&=" => AssignmentOperator::LogicalAndEquals,
        "||=" => AssignmentOperator::LogicalOrEquals,
        "??=" => AssignmentOperator::NullishEquals,
        _ => return None,
    })
}

fn logical_operator(rule: Rule) -> Option<LogicalOperator> {
    match rule {
        Rule::op_or => Some(LogicalOperator::Or),
        Rule::op_and => Some(LogicalOperator::And),
        Rule::op_nullish => Some(LogicalOperator::NullishCoalescing),
        _ => None,
    }
}

fn binary_operator(rule: Rule) -> Option<BinaryOperator> {
    Some(match rule {
        Rule::op_eq => BinaryOperator::LooselyEqual,
        Rule::op_ne => BinaryOperator::LooselyUnequal,
        Rule::op_strict_eq => BinaryOperator::StrictlyEqual,
        Rule::op_strict_ne => BinaryOperator::StrictlyUnequal,
        Rule::op_lt => BinaryOperator::LessThan,
        Rule::op_le => BinaryOperator::LessThanEqual,
        Rule::op_gt => BinaryOperator::GreaterThan,
        Rule::op_ge => BinaryOperator::GreaterThanEqual,
        Rule::op_shl => BinaryOperator::BitwiseLeftShift,
        Rule::op_shr => BinaryOperator::BitwiseRightShift,
        Rule::op_ushr => BinaryOperator::BitwiseUnsignedRightShift,
        Rule::op_add => BinaryOperator::Add,
        Rule::op_sub => BinaryOperator::Subtract,
        Rule::op_mul => BinaryOperator::Multiply,
        Rule::op_div => BinaryOperator::Divide,
        Rule::op_mod => BinaryOperator::Modulo,
        Rule::op_exp => BinaryOperator::Exponent,
        Rule::op_bit_or => BinaryOperator::BitwiseOr,
        Rule::op_bit_xor => BinaryOperator::BitwiseXor,
        Rule::op_bit_and => BinaryOperator::BitwiseAnd,
        Rule::op_instanceof => BinaryOperator::InstanceOf,
        Rule::op_in => BinaryOperator::In,
        _ => return None,
    })
}

fn unary_operator(rule: Rule) -> Option<UnaryOperator> {
    Some(match rule {
        Rule::op_not => UnaryOperator::LogicalNot,
        Rule::op_bit_not => UnaryOperator::BitwiseNot,
        Rule::op_plus => UnaryOperator::Plus,
        Rule::op_minus => UnaryOperator::Minus,
        Rule::op_typeof => UnaryOperator::TypeOf,
        Rule::op_void => UnaryOperator::Void,
        Rule::op_delete => UnaryOperator::Delete,
        _ => return None,
    })
}
