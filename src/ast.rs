use std::{
    fmt::{Debug, Display},
    ops::Deref,
    rc::Rc,
};

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::{source::SourceSpan, SourceReference};

#[derive(Debug)]
pub struct WithSpan<T> {
    inner: T,
    source_span: SourceSpan,
}

impl<T> WithSpan<T> {
    pub fn new(inner: T, source_span: SourceSpan) -> Self {
        Self { inner, source_span }
    }
    pub fn source_span(&self) -> SourceSpan {
        self.source_span
    }
    pub fn inner(&self) -> &T {
        &self.inner
    }
}
impl<T> Deref for WithSpan<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub trait AstNode {
    fn source_span(&self) -> SourceSpan;
}

/// Decimals always print with a fractional part so they never read as
/// integers.
pub(crate) fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn fmt_statements(statements: &[Stmt]) -> String {
    statements.iter().map(|stmt| stmt.to_string()).join(" ")
}

#[derive(Debug)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub source_reference: SourceReference,
}
impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for stmt in self.statements.iter() {
            writeln!(f, "{}", stmt)?;
        }
        Ok(())
    }
}
impl AstNode for Program {
    fn source_span(&self) -> SourceSpan {
        match (self.statements.first(), self.statements.last()) {
            (Some(first), Some(last)) => first.source_span().to(last.source_span()),
            _ => 0.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub source_span: SourceSpan,
    pub name: String,
}
impl AstNode for Identifier {
    fn source_span(&self) -> SourceSpan {
        self.source_span
    }
}
impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

// ===== statements =====

#[derive(Debug)]
pub struct DefineStmt {
    pub target: Identifier,
    pub value: Expr,
}
impl Display for DefineStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(define {} {})", self.target, self.value)
    }
}
impl AstNode for DefineStmt {
    fn source_span(&self) -> SourceSpan {
        self.target.source_span().to(self.value.source_span())
    }
}

#[derive(Debug)]
pub struct DefineEmptyStmt {
    pub target: Identifier,
    pub operator_span: SourceSpan,
}
impl Display for DefineEmptyStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(define-empty {})", self.target)
    }
}
impl AstNode for DefineEmptyStmt {
    fn source_span(&self) -> SourceSpan {
        self.target.source_span().to(self.operator_span)
    }
}

/// `target := source;`. The right-hand side is always a bare identifier.
#[derive(Debug)]
pub struct BindStmt {
    pub target: Identifier,
    pub source: Identifier,
}
impl Display for BindStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(bind {} {})", self.target, self.source)
    }
}
impl AstNode for BindStmt {
    fn source_span(&self) -> SourceSpan {
        self.target.source_span().to(self.source.source_span())
    }
}

#[derive(Debug)]
pub struct ExprStmt {
    pub expression: Expr,
}
impl Display for ExprStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.expression, f)
    }
}
impl AstNode for ExprStmt {
    fn source_span(&self) -> SourceSpan {
        self.expression.source_span()
    }
}

#[derive(Debug)]
pub struct ReturnStmt {
    pub ret_span: SourceSpan,
    pub value: Option<Expr>,
}
impl Display for ReturnStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "(ret {})", value),
            None => f.write_str("(ret)"),
        }
    }
}
impl AstNode for ReturnStmt {
    fn source_span(&self) -> SourceSpan {
        match &self.value {
            Some(value) => self.ret_span.to(value.source_span()),
            None => self.ret_span,
        }
    }
}

/// The `loc;` marker: the rest of the enclosing function body runs in its
/// own scope.
#[derive(Debug)]
pub struct LocalStmt {
    pub loc_span: SourceSpan,
}
impl Display for LocalStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(loc)")
    }
}
impl AstNode for LocalStmt {
    fn source_span(&self) -> SourceSpan {
        self.loc_span
    }
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub fn_span: SourceSpan,
    pub name: Identifier,
    pub parameters: Vec<Identifier>,
    pub bodies: Vec<Vec<Stmt>>,
    pub close_span: SourceSpan,
}
impl Display for FunctionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(fn {} ({})",
            self.name,
            self.parameters.iter().map(|param| &param.name).join(" ")
        )?;
        for body in self.bodies.iter() {
            write!(f, " (body {})", fmt_statements(body))?;
        }
        f.write_str(")")
    }
}
impl AstNode for FunctionDecl {
    fn source_span(&self) -> SourceSpan {
        self.fn_span.to(self.close_span)
    }
}

#[derive(Debug)]
pub enum Stmt {
    Define(DefineStmt),
    DefineEmpty(DefineEmptyStmt),
    Bind(BindStmt),
    Expr(ExprStmt),
    Return(ReturnStmt),
    Local(LocalStmt),
    FunctionDecl(Rc<FunctionDecl>),
}
impl Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Define(stmt) => Display::fmt(stmt, f),
            Self::DefineEmpty(stmt) => Display::fmt(stmt, f),
            Self::Bind(stmt) => Display::fmt(stmt, f),
            Self::Expr(stmt) => Display::fmt(stmt, f),
            Self::Return(stmt) => Display::fmt(stmt, f),
            Self::Local(stmt) => Display::fmt(stmt, f),
            Self::FunctionDecl(decl) => Display::fmt(decl, f),
        }
    }
}
impl AstNode for Stmt {
    fn source_span(&self) -> SourceSpan {
        match self {
            Self::Define(stmt) => stmt.source_span(),
            Self::DefineEmpty(stmt) => stmt.source_span(),
            Self::Bind(stmt) => stmt.source_span(),
            Self::Expr(stmt) => stmt.source_span(),
            Self::Return(stmt) => stmt.source_span(),
            Self::Local(stmt) => stmt.source_span(),
            Self::FunctionDecl(decl) => decl.source_span(),
        }
    }
}

// ===== expressions =====

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Num(i64),
    Dec(OrderedFloat<f64>),
    Text(String),
    Flag(bool),
    Empty,
}
impl Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Dec(d) => f.write_str(&format_decimal(d.into_inner())),
            Self::Text(text) => write!(f, "{:?}", text),
            Self::Flag(flag) => write!(f, "{}", flag),
            Self::Empty => f.write_str("void"),
        }
    }
}

#[derive(Debug)]
pub struct LiteralExpr {
    pub value: LiteralValue,
    pub source_span: SourceSpan,
}
impl Display for LiteralExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.value, f)
    }
}
impl AstNode for LiteralExpr {
    fn source_span(&self) -> SourceSpan {
        self.source_span
    }
}

#[derive(Debug)]
pub struct VariableExpr {
    pub identifier: Identifier,
}
impl Display for VariableExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.identifier, f)
    }
}
impl AstNode for VariableExpr {
    fn source_span(&self) -> SourceSpan {
        self.identifier.source_span()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Remainder,
    EqualTo,
    NotEqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LogicalAnd,
    LogicalOr,
}
impl Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::EqualTo => "==",
            Self::NotEqualTo => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&?",
            Self::LogicalOr => "|?",
        })
    }
}

#[derive(Debug)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub operator: WithSpan<BinaryOperator>,
}
impl Display for BinaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.operator.inner(), self.left, self.right)
    }
}
impl AstNode for BinaryExpr {
    fn source_span(&self) -> SourceSpan {
        self.left.source_span().to(self.right.source_span())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}
impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minus => f.write_str("-"),
            Self::Not => f.write_str("!?"),
        }
    }
}

#[derive(Debug)]
pub struct UnaryExpr {
    pub operator: WithSpan<UnaryOperator>,
    pub right: Box<Expr>,
}
impl Display for UnaryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.operator.inner(), self.right)
    }
}
impl AstNode for UnaryExpr {
    fn source_span(&self) -> SourceSpan {
        self.operator.source_span().to(self.right.source_span())
    }
}

#[derive(Debug)]
pub struct GroupingExpr {
    pub expr: Box<Expr>,
    pub source_span: SourceSpan,
}
impl Display for GroupingExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.expr, f)
    }
}
impl AstNode for GroupingExpr {
    fn source_span(&self) -> SourceSpan {
        self.source_span
    }
}

/// `target ?= branch : branch : ...`. Empty is the implicit last branch.
#[derive(Debug)]
pub struct GuardExpr {
    pub target: Identifier,
    pub branches: Vec<Expr>,
}
impl Display for GuardExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(guard {} {})",
            self.target,
            self.branches.iter().map(|branch| branch.to_string()).join(" ")
        )
    }
}
impl AstNode for GuardExpr {
    fn source_span(&self) -> SourceSpan {
        match self.branches.last() {
            Some(last) => self.target.source_span().to(last.source_span()),
            None => self.target.source_span(),
        }
    }
}

#[derive(Debug)]
pub struct HasStep {
    pub name: Identifier,
    /// Present when the step calls the field it finds: `rec::f(a, b)`.
    pub arguments: Option<Vec<Expr>>,
    pub source_span: SourceSpan,
}
impl Display for HasStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arguments {
            Some(arguments) => write!(
                f,
                "(call {} {})",
                self.name,
                arguments.iter().map(|arg| arg.to_string()).join(" ")
            ),
            None => Display::fmt(&self.name, f),
        }
    }
}

/// A flattened `a::b::c` chain. Evaluation walks the steps in order and
/// collapses to Empty at the first missing field.
#[derive(Debug)]
pub struct HasExpr {
    pub object: Box<Expr>,
    pub steps: Vec<HasStep>,
}
impl Display for HasExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(has {}", self.object)?;
        for step in self.steps.iter() {
            write!(f, " {}", step)?;
        }
        f.write_str(")")
    }
}
impl AstNode for HasExpr {
    fn source_span(&self) -> SourceSpan {
        match self.steps.last() {
            Some(last) => self.object.source_span().to(last.source_span),
            None => self.object.source_span(),
        }
    }
}

#[derive(Debug)]
pub struct PresentExpr {
    pub object: Box<Expr>,
    pub field: Identifier,
}
impl Display for PresentExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(present {} {})", self.object, self.field)
    }
}
impl AstNode for PresentExpr {
    fn source_span(&self) -> SourceSpan {
        self.object.source_span().to(self.field.source_span())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTarget {
    Num,
    Dec,
    Text,
}
impl Display for CastTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Num => "num",
            Self::Dec => "dec",
            Self::Text => "text",
        })
    }
}

#[derive(Debug)]
pub struct CastExpr {
    pub value: Box<Expr>,
    pub target: WithSpan<CastTarget>,
}
impl Display for CastExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(cast {} {})", self.value, self.target.inner())
    }
}
impl AstNode for CastExpr {
    fn source_span(&self) -> SourceSpan {
        self.value.source_span().to(self.target.source_span())
    }
}

/// `value |> function`, a one-argument call.
#[derive(Debug)]
pub struct PipeExpr {
    pub value: Box<Expr>,
    pub function: Box<Expr>,
    pub operator_span: SourceSpan,
}
impl Display for PipeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(pipe {} {})", self.value, self.function)
    }
}
impl AstNode for PipeExpr {
    fn source_span(&self) -> SourceSpan {
        self.value.source_span().to(self.function.source_span())
    }
}

#[derive(Debug)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub arguments: Vec<Expr>,
    pub close_paren_span: SourceSpan,
}
impl Display for CallExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(call {}", self.callee)?;
        for argument in self.arguments.iter() {
            write!(f, " {}", argument)?;
        }
        f.write_str(")")
    }
}
impl AstNode for CallExpr {
    fn source_span(&self) -> SourceSpan {
        self.callee.source_span().to(self.close_paren_span)
    }
}

/// `:{ stmts }{ stmts }:`. All segments share the one scope the chain opens.
#[derive(Debug)]
pub struct BlockStatementChain {
    pub segments: Vec<Vec<Stmt>>,
    pub open_span: SourceSpan,
    pub close_span: SourceSpan,
}
impl Display for BlockStatementChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(block")?;
        for segment in self.segments.iter() {
            write!(f, " (seg {})", fmt_statements(segment))?;
        }
        f.write_str(")")
    }
}
impl AstNode for BlockStatementChain {
    fn source_span(&self) -> SourceSpan {
        self.open_span.to(self.close_span)
    }
}

#[derive(Debug)]
pub struct BlockExpressionChain {
    pub segments: Vec<Expr>,
    pub open_span: SourceSpan,
    pub close_span: SourceSpan,
}
impl Display for BlockExpressionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(expr-block {})",
            self.segments.iter().map(|seg| seg.to_string()).join(" ")
        )
    }
}
impl AstNode for BlockExpressionChain {
    fn source_span(&self) -> SourceSpan {
        self.open_span.to(self.close_span)
    }
}

#[derive(Debug)]
pub struct BranchBlock {
    pub segments: Vec<Expr>,
    pub open_span: SourceSpan,
    pub close_span: SourceSpan,
}
impl Display for BranchBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(branch {})",
            self.segments.iter().map(|seg| seg.to_string()).join(" ")
        )
    }
}
impl AstNode for BranchBlock {
    fn source_span(&self) -> SourceSpan {
        self.open_span.to(self.close_span)
    }
}

#[derive(Debug)]
pub struct ArrayBlock {
    pub elements: Vec<Expr>,
    pub open_span: SourceSpan,
    pub close_span: SourceSpan,
}
impl Display for ArrayBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(array")?;
        for element in self.elements.iter() {
            write!(f, " {}", element)?;
        }
        f.write_str(")")
    }
}
impl AstNode for ArrayBlock {
    fn source_span(&self) -> SourceSpan {
        self.open_span.to(self.close_span)
    }
}

#[derive(Debug)]
pub enum Expr {
    Literal(LiteralExpr),
    Variable(VariableExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Grouping(GroupingExpr),
    Guard(GuardExpr),
    Has(HasExpr),
    Present(PresentExpr),
    Cast(CastExpr),
    Pipe(PipeExpr),
    Call(CallExpr),
    BlockStatementChain(BlockStatementChain),
    BlockExpressionChain(BlockExpressionChain),
    BranchBlock(BranchBlock),
    ArrayBlock(ArrayBlock),
    Function(Rc<FunctionDecl>),
}
impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(expr) => Display::fmt(expr, f),
            Self::Variable(expr) => Display::fmt(expr, f),
            Self::Binary(expr) => Display::fmt(expr, f),
            Self::Unary(expr) => Display::fmt(expr, f),
            Self::Grouping(expr) => Display::fmt(expr, f),
            Self::Guard(expr) => Display::fmt(expr, f),
            Self::Has(expr) => Display::fmt(expr, f),
            Self::Present(expr) => Display::fmt(expr, f),
            Self::Cast(expr) => Display::fmt(expr, f),
            Self::Pipe(expr) => Display::fmt(expr, f),
            Self::Call(expr) => Display::fmt(expr, f),
            Self::BlockStatementChain(expr) => Display::fmt(expr, f),
            Self::BlockExpressionChain(expr) => Display::fmt(expr, f),
            Self::BranchBlock(expr) => Display::fmt(expr, f),
            Self::ArrayBlock(expr) => Display::fmt(expr, f),
            Self::Function(decl) => Display::fmt(decl.as_ref(), f),
        }
    }
}
impl AstNode for Expr {
    fn source_span(&self) -> SourceSpan {
        match self {
            Self::Literal(expr) => expr.source_span(),
            Self::Variable(expr) => expr.source_span(),
            Self::Binary(expr) => expr.source_span(),
            Self::Unary(expr) => expr.source_span(),
            Self::Grouping(expr) => expr.source_span(),
            Self::Guard(expr) => expr.source_span(),
            Self::Has(expr) => expr.source_span(),
            Self::Present(expr) => expr.source_span(),
            Self::Cast(expr) => expr.source_span(),
            Self::Pipe(expr) => expr.source_span(),
            Self::Call(expr) => expr.source_span(),
            Self::BlockStatementChain(expr) => expr.source_span(),
            Self::BlockExpressionChain(expr) => expr.source_span(),
            Self::BranchBlock(expr) => expr.source_span(),
            Self::ArrayBlock(expr) => expr.source_span(),
            Self::Function(decl) => decl.source_span(),
        }
    }
}
