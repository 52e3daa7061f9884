use std::fmt::Debug;
use std::sync::Arc;

/// Source position of a node. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    pub start_index: usize,
    pub end_index: usize,
    pub line: u32,
    pub column: u32,
}

pub trait HasMeta {
    fn get_meta(&self) -> &Meta;
}

#[derive(Debug, Clone)]
pub struct IdentifierData {
    pub name: Arc<str>,
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralType {
    NullLiteral,
    BooleanLiteral(bool),
    NumberLiteral(f64),
    StringLiteral(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
    Plus,
    LogicalNot,
    BitwiseNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    PlusPlus,
    MinusMinus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    LooselyEqual,
    LooselyUnequal,
    StrictlyEqual,
    StrictlyUnequal,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    BitwiseLeftShift,
    BitwiseRightShift,
    BitwiseUnsignedRightShift,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    InstanceOf,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    Or,
    And,
    NullishCoalescing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperator {
    Equals,
    AddEquals,
    SubtractEquals,
    MultiplyEquals,
    DivideEquals,
    ModuloEquals,
    ExponentEquals,
    BitwiseLeftShiftEquals,
    BitwiseRightShiftEquals,
    BitwiseUnsignedRightShiftEquals,
    BitwiseOrEquals,
    BitwiseXorEquals,
    BitwiseAndEquals,
    LogicalAndEquals,
    LogicalOrEquals,
    NullishEquals,
}

impl AssignmentOperator {
    /// The binary operator a compound assignment applies, if it is arithmetic.
    pub fn binary_operator(&self) -> Option<BinaryOperator> {
        Some(match self {
            AssignmentOperator::AddEquals => BinaryOperator::Add,
            AssignmentOperator::SubtractEquals => BinaryOperator::Subtract,
            AssignmentOperator::MultiplyEquals => BinaryOperator::Multiply,
            AssignmentOperator::DivideEquals => BinaryOperator::Divide,
            AssignmentOperator::ModuloEquals => BinaryOperator::Modulo,
            AssignmentOperator::ExponentEquals => BinaryOperator::Exponent,
            AssignmentOperator::BitwiseLeftShiftEquals => BinaryOperator::BitwiseLeftShift,
            AssignmentOperator::BitwiseRightShiftEquals => BinaryOperator::BitwiseRightShift,
            AssignmentOperator::BitwiseUnsignedRightShiftEquals => {
                BinaryOperator::BitwiseUnsignedRightShift
            }
            AssignmentOperator::BitwiseOrEquals => BinaryOperator::BitwiseOr,
            AssignmentOperator::BitwiseXorEquals => BinaryOperator::BitwiseXor,
            AssignmentOperator::BitwiseAndEquals => BinaryOperator::BitwiseAnd,
            _ => return None,
        })
    }

    pub fn logical_operator(&self) -> Option<LogicalOperator> {
        match self {
            AssignmentOperator::LogicalAndEquals => Some(LogicalOperator::And),
            AssignmentOperator::LogicalOrEquals => Some(LogicalOperator::Or),
            AssignmentOperator::NullishEquals => Some(LogicalOperator::NullishCoalescing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MemberProperty {
    Named(Arc<str>),
    Computed(Box<ExpressionType>),
}

#[derive(Debug, Clone)]
pub struct PropertyData {
    pub key: Arc<str>,
    pub value: ExpressionType,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub enum ExpressionType {
    Literal {
        value: LiteralType,
        meta: Meta,
    },
    Identifier(IdentifierData),
    ThisExpression {
        meta: Meta,
    },
    ArrayExpression {
        elements: Vec<ExpressionType>,
        meta: Meta,
    },
    ObjectExpression {
        properties: Vec<PropertyData>,
        meta: Meta,
    },
    FunctionExpression(Arc<FunctionData>),
    UnaryExpression {
        operator: UnaryOperator,
        argument: Box<ExpressionType>,
        meta: Meta,
    },
    UpdateExpression {
        operator: UpdateOperator,
        prefix: bool,
        argument: Box<ExpressionType>,
        meta: Meta,
    },
    BinaryExpression {
        operator: BinaryOperator,
        left: Box<ExpressionType>,
        right: Box<ExpressionType>,
        meta: Meta,
    },
    LogicalExpression {
        operator: LogicalOperator,
        left: Box<ExpressionType>,
        right: Box<ExpressionType>,
        meta: Meta,
    },
    AssignmentExpression {
        operator: AssignmentOperator,
        left: Box<ExpressionType>,
        right: Box<ExpressionType>,
        meta: Meta,
    },
    ConditionalExpression {
        test: Box<ExpressionType>,
        consequent: Box<ExpressionType>,
        alternate: Box<ExpressionType>,
        meta: Meta,
    },
    CallExpression {
        callee: Box<ExpressionType>,
        arguments: Vec<ExpressionType>,
        meta: Meta,
    },
    NewExpression {
        callee: Box<ExpressionType>,
        arguments: Vec<ExpressionType>,
        meta: Meta,
    },
    MemberExpression {
        object: Box<ExpressionType>,
        property: MemberProperty,
        meta: Meta,
    },
    SequenceExpression {
        expressions: Vec<ExpressionType>,
        meta: Meta,
    },
}

impl HasMeta for ExpressionType {
    fn get_meta(&self) -> &Meta {
        match self {
            ExpressionType::Literal { meta, .. }
            | ExpressionType::ThisExpression { meta }
            | ExpressionType::ArrayExpression { meta, .. }
            | ExpressionType::ObjectExpression { meta, .. }
            | ExpressionType::UnaryExpression { meta, .. }
            | ExpressionType::UpdateExpression { meta, .. }
            | ExpressionType::BinaryExpression { meta, .. }
            | ExpressionType::LogicalExpression { meta, .. }
            | ExpressionType::AssignmentExpression { meta, .. }
            | ExpressionType::ConditionalExpression { meta, .. }
            | ExpressionType::CallExpression { meta, .. }
            | ExpressionType::NewExpression { meta, .. }
            | ExpressionType::MemberExpression { meta, .. }
            | ExpressionType::SequenceExpression { meta, .. } => meta,
            ExpressionType::Identifier(data) => &data.meta,
            ExpressionType::FunctionExpression(data) => &data.meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableDeclarationKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone)]
pub struct VariableDeclaratorData {
    pub id: IdentifierData,
    pub init: Option<ExpressionType>,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub struct VariableDeclarationData {
    pub kind: VariableDeclarationKind,
    pub declarations: Vec<VariableDeclaratorData>,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub enum FunctionBodyData {
    Statements(Vec<StatementType>),
    /// Concise arrow body: `x => x + 1`.
    Expression(Box<ExpressionType>),
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub id: Option<IdentifierData>,
    pub params: Vec<IdentifierData>,
    pub body: FunctionBodyData,
    pub is_arrow: bool,
    /// True when the function or an enclosing scope has a "use strict" directive.
    pub strict: bool,
    /// Exact source text of the function; equal texts share baseline hints.
    pub source_text: Arc<str>,
    pub meta: Meta,
}

impl FunctionData {
    pub fn name(&self) -> Arc<str> {
        match &self.id {
            Some(id) => id.name.clone(),
            None => Arc::from(""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockStatementData {
    pub body: Vec<StatementType>,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub struct CatchClauseData {
    pub param: Option<IdentifierData>,
    pub body: BlockStatementData,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub enum ForInitData {
    VariableDeclaration(VariableDeclarationData),
    Expression(ExpressionType),
}

#[derive(Debug, Clone)]
pub enum StatementType {
    ExpressionStatement {
        expression: ExpressionType,
        meta: Meta,
    },
    VariableDeclaration(VariableDeclarationData),
    FunctionDeclaration(Arc<FunctionData>),
    BlockStatement(BlockStatementData),
    IfStatement {
        test: ExpressionType,
        consequent: Box<StatementType>,
        alternate: Option<Box<StatementType>>,
        meta: Meta,
    },
    WhileStatement {
        test: ExpressionType,
        body: Box<StatementType>,
        meta: Meta,
    },
    DoWhileStatement {
        body: Box<StatementType>,
        test: ExpressionType,
        meta: Meta,
    },
    ForStatement {
        init: Option<ForInitData>,
        test: Option<ExpressionType>,
        update: Option<ExpressionType>,
        body: Box<StatementType>,
        meta: Meta,
    },
    ReturnStatement {
        argument: Option<ExpressionType>,
        meta: Meta,
    },
    BreakStatement {
        meta: Meta,
    },
    ContinueStatement {
        meta: Meta,
    },
    ThrowStatement {
        argument: ExpressionType,
        meta: Meta,
    },
    TryStatement {
        block: BlockStatementData,
        handler: Option<CatchClauseData>,
        finalizer: Option<BlockStatementData>,
        meta: Meta,
    },
    DebuggerStatement {
        meta: Meta,
    },
    EmptyStatement {
        meta: Meta,
    },
}

impl HasMeta for StatementType {
    fn get_meta(&self) -> &Meta {
        match self {
            StatementType::ExpressionStatement { meta, .. }
            | StatementType::IfStatement { meta, .. }
            | StatementType::WhileStatement { meta, .. }
            | StatementType::DoWhileStatement { meta, .. }
            | StatementType::ForStatement { meta, .. }
            | StatementType::ReturnStatement { meta, .. }
            | StatementType::BreakStatement { meta }
            | StatementType::ContinueStatement { meta }
            | StatementType::ThrowStatement { meta, .. }
            | StatementType::TryStatement { meta, .. }
            | StatementType::DebuggerStatement { meta }
            | StatementType::EmptyStatement { meta } => meta,
            StatementType::VariableDeclaration(data) => &data.meta,
            StatementType::FunctionDeclaration(data) => &data.meta,
            StatementType::BlockStatement(data) => &data.meta,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgramData {
    pub body: Vec<StatementType>,
    pub strict: bool,
    pub meta: Meta,
}
