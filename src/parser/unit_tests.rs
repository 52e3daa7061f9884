use super::api::JsParser;
use super::api::Rule;
use super::ast::*;

use pest::{consumes_to, parses_to};
use pest::Parser;

#[test]
fn test_decimal_number_token() {
    parses_to! {
        parser: JsParser,
        input: "10.5e3",
        rule: Rule::numeric_literal,
        tokens: [numeric_literal(0, 6)]
    };
}

#[test]
fn test_hex_number_token() {
    parses_to! {
        parser: JsParser,
        input: "0xff",
        rule: Rule::numeric_literal,
        tokens: [numeric_literal(0, 4)]
    };
}

#[test]
fn test_string_token() {
    parses_to! {
        parser: JsParser,
        input: "\"abc\"",
        rule: Rule::string_literal,
        tokens: [string_literal(0, 5, [double_string_chars(1, 4)])]
    };
}

#[test]
fn test_keyword_is_not_identifier() {
    assert!(JsParser::parse(Rule::identifier, "var").is_err());
    assert!(JsParser::parse(Rule::identifier, "variable").is_ok());
}

fn parse(code: &str) -> ProgramData {
    JsParser::parse_to_ast_from_str(code).unwrap()
}

fn single_expression(code: &str) -> ExpressionType {
    let program = parse(code);
    match program.body.into_iter().next() {
        Some(StatementType::ExpressionStatement { expression, .. }) => expression,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

#[test]
fn test_precedence_mul_over_add() {
    match single_expression("1 + 2 * 3;") {
        ExpressionType::BinaryExpression {
            operator: BinaryOperator::Add,
            right,
            ..
        } => match *right {
            ExpressionType::BinaryExpression {
                operator: BinaryOperator::Multiply,
                ..
            } => {}
            other => panic!("unexpected rhs {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_exponent_is_right_associative() {
    match single_expression("2 ** 3 ** 2") {
        ExpressionType::BinaryExpression {
            operator: BinaryOperator::Exponent,
            left,
            right,
            ..
        } => {
            assert!(matches!(*left, ExpressionType::Literal { .. }));
            assert!(matches!(
                *right,
                ExpressionType::BinaryExpression {
                    operator: BinaryOperator::Exponent,
                    ..
                }
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_logical_operators_become_logical_expressions() {
    assert!(matches!(
        single_expression("a || b && c"),
        ExpressionType::LogicalExpression {
            operator: LogicalOperator::Or,
            ..
        }
    ));
}

#[test]
fn test_compound_assignment() {
    assert!(matches!(
        single_expression("x.y >>>= 2"),
        ExpressionType::AssignmentExpression {
            operator: AssignmentOperator::BitwiseUnsignedRightShiftEquals,
            ..
        }
    ));
}

#[test]
fn test_method_call_shape() {
    match single_expression("a.subarray(1, 2)") {
        ExpressionType::CallExpression {
            callee, arguments, ..
        } => {
            assert_eq!(arguments.len(), 2);
            match *callee {
                ExpressionType::MemberExpression {
                    property: MemberProperty::Named(name),
                    ..
                } => assert_eq!(&*name, "subarray"),
                other => panic!("unexpected callee {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_new_with_member_callee() {
    match single_expression("new Int8Array(10).length") {
        ExpressionType::MemberExpression { object, .. } => {
            assert!(matches!(*object, ExpressionType::NewExpression { .. }))
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_prefix_and_postfix_updates() {
    assert!(matches!(
        single_expression("++i"),
        ExpressionType::UpdateExpression { prefix: true, .. }
    ));
    assert!(matches!(
        single_expression("i--"),
        ExpressionType::UpdateExpression { prefix: false, .. }
    ));
}

#[test]
fn test_arrow_functions() {
    match single_expression("(v, k) => k") {
        ExpressionType::FunctionExpression(f) => {
            assert!(f.is_arrow);
            assert_eq!(f.params.len(), 2);
            assert!(matches!(f.body, FunctionBodyData::Expression(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_use_strict_directive_propagates() {
    let program = parse("'use strict'; function f() { return 1 }");
    assert!(program.strict);
    match &program.body[1] {
        StatementType::FunctionDeclaration(f) => assert!(f.strict),
        other => panic!("unexpected {:?}", other),
    }
    let program = parse("function g() { \"use strict\"; return 1 }");
    assert!(!program.strict);
    match &program.body[0] {
        StatementType::FunctionDeclaration(f) => assert!(f.strict),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_function_source_text_is_exact() {
    let program = parse("var x = 1;\nfunction add(a, b) { return a + b; }\n");
    match &program.body[1] {
        StatementType::FunctionDeclaration(f) => {
            assert_eq!(&*f.source_text, "function add(a, b) { return a + b; }");
            assert_eq!(f.meta.line, 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_try_catch_finally() {
    let program = parse("try { f() } catch (e) { g(e) } finally { h() }");
    match &program.body[0] {
        StatementType::TryStatement {
            handler: Some(h),
            finalizer: Some(_),
            ..
        } => assert_eq!(&*h.param.as_ref().unwrap().name, "e"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_string_escapes() {
    match single_expression(r#""a\nA\x42\u{1F600}""#) {
        ExpressionType::Literal {
            value: LiteralType::StringLiteral(s),
            ..
        } => assert_eq!(&*s, "a\nAB\u{1F600}"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_numeric_forms() {
    for (src, expected) in [("0x10", 16.0), ("0b101", 5.0), ("0o17", 15.0), ("1_000", 1000.0), (".5", 0.5)] {
        match single_expression(src) {
            ExpressionType::Literal {
                value: LiteralType::NumberLiteral(n),
                ..
            } => assert_eq!(n, expected, "{}", src),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_syntax_error_position() {
    let err = JsParser::parse_to_ast_from_str("var x = 1;\nvar = 2;").unwrap_err();
    assert_eq!(err.line, 2);
}

#[test]
fn test_for_statement_parts() {
    let program = parse("for (let i = 0; i < 10; i++) { }");
    match &program.body[0] {
        StatementType::ForStatement {
            init: Some(ForInitData::VariableDeclaration(d)),
            test: Some(_),
            update: Some(_),
            ..
        } => assert_eq!(d.kind, VariableDeclarationKind::Let),
        other => panic!("unexpected {:?}", other),
    }
}
