use miette::Diagnostic;
use ordered_float::OrderedFloat;
use std::{iter::Peekable, rc::Rc};
use thiserror::Error;

use crate::{
    ast::*,
    scanner::{Token, TokenType, TokenTypeName},
    source::SourceSpan,
    SourceReference,
};

#[derive(Error, Diagnostic, Debug)]
pub enum ParseError {
    #[error("Unexpected token")]
    UnexpectedToken {
        actual: TokenTypeName,
        expected: TokenTypeName,
        #[label("Found {actual:?} instead of {expected:?}")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected token in expression")]
    UnexpectedExpressionToken {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a literal, identifier, block, etc.")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Expected a semicolon at the end of this statement")]
    ExpectedSemicolon {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a semicolon (;)")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Block is never closed")]
    UnmatchedBlock {
        #[label("Block opened here")]
        opener: SourceSpan,
        expected: TokenTypeName,
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of {expected:?}")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("The right-hand side of a bind must be a single identifier")]
    BindRequiresIdentifier {
        #[label("Expected one identifier here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Can't return from outside a function")]
    ReturnOutsideFunction {
        #[label("ret found here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("loc can only appear directly inside a function body")]
    LocalOutsideFunctionBody {
        #[label("loc found here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("A function body can only have one loc marker")]
    DuplicateLocalMarker {
        #[label("First marker here")]
        first_at: SourceSpan,
        #[label("Second marker here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Function names must be snake_case, found {name}")]
    InvalidFunctionName {
        name: String,
        #[label("Function name here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Function has no body")]
    MissingFunctionBody {
        #[label("Expected at least one body after the parameter block")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Guard needs at least one branch")]
    EmptyGuard {
        #[label("Nothing follows this guard")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Statements are not allowed in an expression block")]
    StatementInExpressionBlock {
        #[label("Wrap this in a statement block to use it here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Can only cast to num, dec or text")]
    InvalidCastTarget {
        actual: TokenTypeName,
        #[label("Found {actual:?} instead of a type keyword")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Number literal {lexeme} is out of range")]
    NumberOutOfRange {
        lexeme: String,
        #[label("This literal does not fit")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

#[derive(Default)]
pub struct ParserOpts {
    is_repl: bool,
}
impl ParserOpts {
    /// The final statement may end at end of input instead of `;`.
    pub fn for_repl(self) -> Self {
        Self { is_repl: true }
    }
}

/// What the statement currently being parsed is nested in.
#[derive(Debug, Clone, Copy, Default)]
struct ParseContext {
    in_function: bool,
    /// Directly in a function body, not in a nested block.
    at_body_top: bool,
    local_marker_at: Option<SourceSpan>,
}

pub struct Parser<Stream: Iterator<Item = Token>> {
    opts: ParserOpts,
    source_reference: SourceReference,
    token_stream: Peekable<Stream>,
    current_token: Option<Token>,
    /// An identifier consumed while deciding between a statement form and an
    /// expression. The next primary expression picks it up.
    pending_identifier: Option<Identifier>,
    context: ParseContext,
    block_depth: usize,
    consumed_count: usize,
    recovered_errors: Vec<ParseError>,
}

/// The `parse(tokens) -> Program | errors` contract: any error fails the
/// whole parse.
pub fn parse(
    tokens: impl IntoIterator<Item = Token>,
    source_reference: SourceReference,
) -> Result<Program, Vec<ParseError>> {
    let (program, errors) = Parser::parse(tokens.into_iter(), source_reference, ParserOpts::default());
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

impl<Stream: Iterator<Item = Token>> Parser<Stream> {
    pub fn parse(
        token_stream: Stream,
        source_reference: SourceReference,
        opts: ParserOpts,
    ) -> (Program, Vec<ParseError>) {
        let mut parser = Parser {
            opts,
            source_reference,
            token_stream: token_stream.peekable(),
            current_token: None,
            pending_identifier: None,
            context: ParseContext::default(),
            block_depth: 0,
            consumed_count: 0,
            recovered_errors: Vec::new(),
        };
        let program = parser.parse_program();
        (program, parser.recovered_errors)
    }

    fn parse_program(&mut self) -> Program {
        let mut statements = Vec::new();
        while !self.peek_is(|token_type| *token_type == TokenType::Eof) {
            let consumed_before = self.consumed_count;
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.recovered_errors.push(err);
                    self.pending_identifier = None;
                    if self.consumed_count == consumed_before {
                        self.advance();
                    } else {
                        self.synchronize();
                    }
                }
            }
        }
        Program {
            statements,
            source_reference: self.source_reference.clone(),
        }
    }

    // ===== statements =====

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if let Some(ret_span) = self.consume_token_to_span(TokenType::Ret) {
            return Ok(Stmt::Return(self.parse_return_stmt(ret_span)?));
        }
        if let Some(loc_span) = self.consume_token_to_span(TokenType::Loc) {
            return Ok(Stmt::Local(self.parse_local_stmt(loc_span)?));
        }

        // Led by `fn` or `:{`, the construct is a whole statement and its
        // `;` is optional. Whatever follows starts the next statement.
        if let Some(fn_span) = self.consume_token_to_span(TokenType::Fn) {
            let decl = Rc::new(self.parse_function(fn_span)?);
            self.consume_token(TokenType::Semicolon);
            return Ok(Stmt::FunctionDecl(decl));
        }
        if let Some(open_span) = self.consume_token_to_span(TokenType::StmtBlockStart) {
            let chain = self.parse_block_statement_chain(open_span)?;
            self.consume_token(TokenType::Semicolon);
            return Ok(Stmt::Expr(ExprStmt {
                expression: Expr::BlockStatementChain(chain),
            }));
        }

        if let Some(target) = self.consume_identifier() {
            if self.consume_token(TokenType::Equal).is_some() {
                let value = self.parse_expr()?;
                self.consume_statement_end()?;
                return Ok(Stmt::Define(DefineStmt { target, value }));
            }
            if let Some(operator_span) = self.consume_token_to_span(TokenType::DefineEmpty) {
                self.consume_statement_end()?;
                return Ok(Stmt::DefineEmpty(DefineEmptyStmt {
                    target,
                    operator_span,
                }));
            }
            if let Some(bind_span) = self.consume_token_to_span(TokenType::Bind) {
                return Ok(Stmt::Bind(self.parse_bind_stmt(target, bind_span)?));
            }
            self.pending_identifier = Some(target);
        }

        let expression = self.parse_expr()?;
        self.consume_statement_end()?;
        Ok(Stmt::Expr(ExprStmt { expression }))
    }

    fn parse_bind_stmt(
        &mut self,
        target: Identifier,
        bind_span: SourceSpan,
    ) -> Result<BindStmt, ParseError> {
        let source = match self.consume_identifier() {
            Some(source)
                if self.is_at_statement_end()
                    || self.peek_is(|token_type| *token_type == TokenType::Eof) =>
            {
                source
            }
            Some(source) => {
                let (_, found_at) = self.peek_found();
                return Err(ParseError::BindRequiresIdentifier {
                    found_at: source.source_span.to(found_at),
                    source_code: self.source_reference.clone(),
                });
            }
            None => {
                let (_, found_at) = self.peek_found();
                return Err(ParseError::BindRequiresIdentifier {
                    found_at: bind_span.to(found_at),
                    source_code: self.source_reference.clone(),
                });
            }
        };
        self.consume_statement_end()?;
        Ok(BindStmt { target, source })
    }

    fn parse_return_stmt(&mut self, ret_span: SourceSpan) -> Result<ReturnStmt, ParseError> {
        if !self.context.in_function {
            return Err(ParseError::ReturnOutsideFunction {
                found_at: ret_span,
                source_code: self.source_reference.clone(),
            });
        }
        let value = if self.is_at_statement_end() {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.consume_statement_end()?;
        Ok(ReturnStmt { ret_span, value })
    }

    fn parse_local_stmt(&mut self, loc_span: SourceSpan) -> Result<LocalStmt, ParseError> {
        if !self.context.at_body_top {
            return Err(ParseError::LocalOutsideFunctionBody {
                found_at: loc_span,
                source_code: self.source_reference.clone(),
            });
        }
        if let Some(first_at) = self.context.local_marker_at {
            return Err(ParseError::DuplicateLocalMarker {
                first_at,
                found_at: loc_span,
                source_code: self.source_reference.clone(),
            });
        }
        self.context.local_marker_at = Some(loc_span);
        self.consume_statement_end()?;
        Ok(LocalStmt { loc_span })
    }

    fn is_at_statement_end(&mut self) -> bool {
        let is_repl = self.opts.is_repl;
        self.peek_is(|token_type| {
            *token_type == TokenType::Semicolon
                || token_type.is_segment_boundary()
                || (is_repl && *token_type == TokenType::Eof)
        })
    }

    /// `;` ends a statement. It may be left off right before the delimiter
    /// that closes the enclosing segment.
    fn consume_statement_end(&mut self) -> Result<(), ParseError> {
        if self.consume_token(TokenType::Semicolon).is_some() || self.is_at_statement_end() {
            return Ok(());
        }
        let (actual, found_at) = self.peek_found();
        Err(ParseError::ExpectedSemicolon {
            actual,
            found_at,
            source_code: self.source_reference.clone(),
        })
    }

    fn parse_statement_segment(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        while !self.peek_is(|token_type| {
            token_type.is_segment_boundary() || *token_type == TokenType::Eof
        }) {
            statements.push(self.parse_stmt()?);
        }
        Ok(statements)
    }

    // ===== expressions =====

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_guard_expr()
    }

    fn parse_guard_expr(&mut self) -> Result<Expr, ParseError> {
        if self.pending_identifier.is_none() {
            self.pending_identifier = self.consume_identifier();
        }
        let guard_span = if self.pending_identifier.is_some() {
            self.consume_token_to_span(TokenType::Guard)
        } else {
            None
        };
        let (target, guard_span) = match (guard_span, self.pending_identifier.take()) {
            (Some(guard_span), Some(target)) => (target, guard_span),
            (_, pending) => {
                self.pending_identifier = pending;
                return self.parse_pipe_expr();
            }
        };

        if self.is_at_statement_end() || self.peek_is(|token_type| *token_type == TokenType::Colon)
        {
            return Err(ParseError::EmptyGuard {
                found_at: guard_span,
                source_code: self.source_reference.clone(),
            });
        }
        let mut branches = vec![self.parse_pipe_expr()?];
        while self.consume_token(TokenType::Colon).is_some() {
            branches.push(self.parse_pipe_expr()?);
        }
        Ok(Expr::Guard(GuardExpr { target, branches }))
    }

    fn parse_pipe_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_or_expr()?;

        while let Some(operator_span) = self.consume_token_to_span(TokenType::Pipe) {
            last_expr = Expr::Pipe(PipeExpr {
                value: Box::new(last_expr),
                function: Box::new(self.parse_or_expr()?),
                operator_span,
            });
        }

        Ok(last_expr)
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_and_expr()?;

        while let Some(or_span) = self.consume_token_to_span(TokenType::Or) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_and_expr()?),
                operator: WithSpan::new(BinaryOperator::LogicalOr, or_span),
            });
        }

        Ok(last_expr)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_comparison_expr()?;

        while let Some(and_span) = self.consume_token_to_span(TokenType::And) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_comparison_expr()?),
                operator: WithSpan::new(BinaryOperator::LogicalAnd, and_span),
            });
        }

        Ok(last_expr)
    }

    /// Equality and ordering share one precedence level.
    fn parse_comparison_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_term_expr()?;

        while let Some(operator) = self.consume_match(|token| {
            let operator = match token.token_type {
                TokenType::EqualEqual => BinaryOperator::EqualTo,
                TokenType::BangEqual => BinaryOperator::NotEqualTo,
                TokenType::Less => BinaryOperator::LessThan,
                TokenType::LessEqual => BinaryOperator::LessThanOrEqualTo,
                TokenType::Greater => BinaryOperator::GreaterThan,
                TokenType::GreaterEqual => BinaryOperator::GreaterThanOrEqualTo,
                _ => return None,
            };
            Some(WithSpan::new(operator, token.span))
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_term_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }

    fn parse_term_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_factor_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Minus => Some(WithSpan::new(BinaryOperator::Minus, token.span)),
            TokenType::Plus => Some(WithSpan::new(BinaryOperator::Plus, token.span)),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_factor_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }

    fn parse_factor_expr(&mut self) -> Result<Expr, ParseError> {
        let mut last_expr = self.parse_unary_expr()?;

        while let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Star => Some(WithSpan::new(BinaryOperator::Multiply, token.span)),
            TokenType::Slash => Some(WithSpan::new(BinaryOperator::Divide, token.span)),
            TokenType::Percent => Some(WithSpan::new(BinaryOperator::Remainder, token.span)),
            _ => None,
        }) {
            last_expr = Expr::Binary(BinaryExpr {
                left: Box::new(last_expr),
                right: Box::new(self.parse_unary_expr()?),
                operator,
            });
        }

        Ok(last_expr)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.pending_identifier.is_some() {
            return self.parse_access_expr();
        }
        if let Some(operator) = self.consume_match(|token| match token.token_type {
            TokenType::Minus => Some(WithSpan::new(UnaryOperator::Minus, token.span)),
            TokenType::Not => Some(WithSpan::new(UnaryOperator::Not, token.span)),
            _ => None,
        }) {
            Ok(Expr::Unary(UnaryExpr {
                operator,
                right: Box::new(self.parse_unary_expr()?),
            }))
        } else {
            self.parse_access_expr()
        }
    }

    /// Postfix `::`, `:>` and `:?`, applied left to right.
    fn parse_access_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_call_expr()?;
        loop {
            if self.consume_token(TokenType::Has).is_some() {
                let step = self.parse_has_step()?;
                expr = match expr {
                    Expr::Has(mut has) => {
                        has.steps.push(step);
                        Expr::Has(has)
                    }
                    object => Expr::Has(HasExpr {
                        object: Box::new(object),
                        steps: vec![step],
                    }),
                };
            } else if self.consume_token(TokenType::Cast).is_some() {
                let target = self.parse_cast_target()?;
                expr = Expr::Cast(CastExpr {
                    value: Box::new(expr),
                    target,
                });
            } else if self.consume_token(TokenType::Present).is_some() {
                let field = self.parse_identifier()?;
                expr = Expr::Present(PresentExpr {
                    object: Box::new(expr),
                    field,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_has_step(&mut self) -> Result<HasStep, ParseError> {
        let name = self.parse_identifier()?;
        if self.consume_token(TokenType::OpenParen).is_some() {
            let (arguments, close_paren_span) = self.parse_arguments()?;
            Ok(HasStep {
                source_span: name.source_span.to(close_paren_span),
                name,
                arguments: Some(arguments),
            })
        } else {
            Ok(HasStep {
                source_span: name.source_span,
                name,
                arguments: None,
            })
        }
    }

    fn parse_cast_target(&mut self) -> Result<WithSpan<CastTarget>, ParseError> {
        if let Some(target) = self.consume_match(|token| {
            let target = match token.token_type {
                TokenType::NumType => CastTarget::Num,
                TokenType::DecType => CastTarget::Dec,
                TokenType::TextType => CastTarget::Text,
                _ => return None,
            };
            Some(WithSpan::new(target, token.span))
        }) {
            return Ok(target);
        }
        let (actual, found_at) = self.peek_found();
        Err(ParseError::InvalidCastTarget {
            actual,
            found_at,
            source_code: self.source_reference.clone(),
        })
    }

    fn parse_call_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        while self.consume_token(TokenType::OpenParen).is_some() {
            let (arguments, close_paren_span) = self.parse_arguments()?;
            expr = Expr::Call(CallExpr {
                callee: Box::new(expr),
                arguments,
                close_paren_span,
            });
        }
        Ok(expr)
    }

    /// Arguments after an already consumed `(`, up to and including `)`.
    fn parse_arguments(&mut self) -> Result<(Vec<Expr>, SourceSpan), ParseError> {
        let mut arguments = Vec::new();
        if let Some(close_paren_span) = self.consume_token_to_span(TokenType::CloseParen) {
            return Ok((arguments, close_paren_span));
        }
        loop {
            arguments.push(self.parse_expr()?);
            if self.consume_token(TokenType::Comma).is_none() {
                break;
            }
        }
        let close_paren_span = self.consume_token_or_default_error(&TokenType::CloseParen)?.span;
        Ok((arguments, close_paren_span))
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        if let Some(identifier) = self.pending_identifier.take() {
            return Ok(Expr::Variable(VariableExpr { identifier }));
        }

        if let Some(literal) = self.parse_literal()? {
            return Ok(Expr::Literal(literal));
        }

        if let Some(identifier) = self.consume_identifier() {
            return Ok(Expr::Variable(VariableExpr { identifier }));
        }

        if let Some(open_span) = self.consume_token_to_span(TokenType::OpenParen) {
            let expr = self.parse_expr()?;
            let close_span = self.consume_token_or_default_error(&TokenType::CloseParen)?.span;
            return Ok(Expr::Grouping(GroupingExpr {
                expr: Box::new(expr),
                source_span: open_span.to(close_span),
            }));
        }

        if let Some(open_span) = self.consume_token_to_span(TokenType::StmtBlockStart) {
            return Ok(Expr::BlockStatementChain(
                self.parse_block_statement_chain(open_span)?,
            ));
        }
        if let Some(open_span) = self.consume_token_to_span(TokenType::ExprBlockStart) {
            let (segments, close_span) = self.parse_segments(
                open_span,
                TokenType::ExprBlockChain,
                TokenType::ExprBlockEnd,
                Self::parse_expression_segment,
            )?;
            return Ok(Expr::BlockExpressionChain(BlockExpressionChain {
                segments,
                open_span,
                close_span,
            }));
        }
        if let Some(open_span) = self.consume_token_to_span(TokenType::BranchBlockStart) {
            let (segments, close_span) = self.parse_segments(
                open_span,
                TokenType::BranchBlockChain,
                TokenType::BranchBlockEnd,
                Self::parse_expression_segment,
            )?;
            return Ok(Expr::BranchBlock(BranchBlock {
                segments,
                open_span,
                close_span,
            }));
        }
        if let Some(open_span) = self.consume_token_to_span(TokenType::ArrayBlockStart) {
            let (segments, close_span) = self.parse_segments(
                open_span,
                TokenType::ArrayBlockChain,
                TokenType::ArrayBlockEnd,
                Self::parse_array_segment,
            )?;
            return Ok(Expr::ArrayBlock(ArrayBlock {
                elements: segments.into_iter().flatten().collect(),
                open_span,
                close_span,
            }));
        }

        if let Some(fn_span) = self.consume_token_to_span(TokenType::Fn) {
            return Ok(Expr::Function(Rc::new(self.parse_function(fn_span)?)));
        }

        let (actual, found_at) = self.peek_found();
        Err(ParseError::UnexpectedExpressionToken {
            actual,
            found_at,
            source_code: self.source_reference.clone(),
        })
    }

    fn parse_literal(&mut self) -> Result<Option<LiteralExpr>, ParseError> {
        let token = match self.consume_match(|token| match token.token_type {
            TokenType::Integer | TokenType::Decimal | TokenType::Text(_) | TokenType::Void => {
                Some(token.clone())
            }
            _ => None,
        }) {
            Some(token) => token,
            None => return Ok(None),
        };

        let value = match &token.token_type {
            TokenType::Integer => match token.lexeme.parse::<i64>() {
                Ok(number) => LiteralValue::Num(number),
                Err(_) => return Err(self.number_out_of_range(&token)),
            },
            TokenType::Decimal => match token.lexeme.parse::<f64>() {
                Ok(number) if number.is_finite() => LiteralValue::Dec(OrderedFloat(number)),
                _ => return Err(self.number_out_of_range(&token)),
            },
            TokenType::Text(text) => LiteralValue::Text(text.clone()),
            _ => LiteralValue::Empty,
        };
        Ok(Some(LiteralExpr {
            value,
            source_span: token.span,
        }))
    }

    fn number_out_of_range(&self, token: &Token) -> ParseError {
        ParseError::NumberOutOfRange {
            lexeme: token.lexeme.clone(),
            found_at: token.span,
            source_code: self.source_reference.clone(),
        }
    }

    // ===== blocks =====

    /// Segments of a block whose start delimiter has been consumed, through
    /// its end delimiter.
    fn parse_segments<T, F>(
        &mut self,
        open_span: SourceSpan,
        chain: TokenType,
        end: TokenType,
        mut parse_segment: F,
    ) -> Result<(Vec<T>, SourceSpan), ParseError>
    where
        F: FnMut(&mut Self) -> Result<T, ParseError>,
    {
        let mut segments = Vec::new();
        loop {
            segments.push(parse_segment(self)?);
            if self.consume_token(chain.clone()).is_some() {
                continue;
            }
            if let Some(close_span) = self.consume_token_to_span(end.clone()) {
                return Ok((segments, close_span));
            }
            let (actual, found_at) = self.peek_found();
            return Err(ParseError::UnmatchedBlock {
                opener: open_span,
                expected: (&end).into(),
                actual,
                found_at,
                source_code: self.source_reference.clone(),
            });
        }
    }

    fn parse_block_statement_chain(
        &mut self,
        open_span: SourceSpan,
    ) -> Result<BlockStatementChain, ParseError> {
        let context = ParseContext {
            in_function: self.context.in_function,
            ..ParseContext::default()
        };
        let (segments, close_span) = self.with_context(context, |parser| {
            parser.parse_segments(
                open_span,
                TokenType::StmtBlockChain,
                TokenType::StmtBlockEnd,
                Self::parse_statement_segment,
            )
        })?;
        Ok(BlockStatementChain {
            segments,
            open_span,
            close_span,
        })
    }

    fn parse_expression_segment(&mut self) -> Result<Expr, ParseError> {
        if let Some(ret_span) = self.consume_token_to_span(TokenType::Ret) {
            return Err(self.statement_in_expression_block(ret_span));
        }
        if let Some(identifier) = self.consume_identifier() {
            if let Some(operator_span) = self.consume_match(|token| match token.token_type {
                TokenType::Equal | TokenType::DefineEmpty | TokenType::Bind => Some(token.span),
                _ => None,
            }) {
                return Err(self.statement_in_expression_block(
                    identifier.source_span.to(operator_span),
                ));
            }
            self.pending_identifier = Some(identifier);
        }
        let expr = self.parse_expr()?;
        self.consume_token(TokenType::Semicolon);
        Ok(expr)
    }

    fn statement_in_expression_block(&self, found_at: SourceSpan) -> ParseError {
        ParseError::StatementInExpressionBlock {
            found_at,
            source_code: self.source_reference.clone(),
        }
    }

    fn parse_array_segment(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut elements = Vec::new();
        if self.peek_is(TokenType::is_segment_boundary) {
            return Ok(elements);
        }
        loop {
            elements.push(self.parse_expr()?);
            if self.consume_token(TokenType::Comma).is_none() {
                return Ok(elements);
            }
        }
    }

    // ===== functions =====

    fn parse_function(&mut self, fn_span: SourceSpan) -> Result<FunctionDecl, ParseError> {
        let name = self.parse_identifier()?;
        if !is_snake_case(&name.name) {
            return Err(ParseError::InvalidFunctionName {
                name: name.name,
                found_at: name.source_span,
                source_code: self.source_reference.clone(),
            });
        }

        let open_span = self
            .consume_token_or_default_error(&TokenType::FnBlockStart)?
            .span;
        let parameters = self.parse_parameters()?;
        if let Some(close_span) = self.consume_token_to_span(TokenType::FnBlockEnd) {
            return Err(ParseError::MissingFunctionBody {
                found_at: fn_span.to(close_span),
                source_code: self.source_reference.clone(),
            });
        }
        if self.consume_token(TokenType::FnBlockChain).is_none() {
            let (actual, found_at) = self.peek_found();
            return Err(ParseError::UnmatchedBlock {
                opener: open_span,
                expected: TokenTypeName::FnBlockChain,
                actual,
                found_at,
                source_code: self.source_reference.clone(),
            });
        }

        let (bodies, close_span) = self.parse_segments(
            open_span,
            TokenType::FnBlockChain,
            TokenType::FnBlockEnd,
            |parser| {
                let context = ParseContext {
                    in_function: true,
                    at_body_top: true,
                    local_marker_at: None,
                };
                parser.with_context(context, Self::parse_statement_segment)
            },
        )?;

        Ok(FunctionDecl {
            fn_span,
            name,
            parameters,
            bodies,
            close_span,
        })
    }

    fn parse_parameters(&mut self) -> Result<Vec<Identifier>, ParseError> {
        let mut parameters = Vec::new();
        if !self.peek_is(|token_type| matches!(token_type, TokenType::Identifier(_))) {
            return Ok(parameters);
        }
        loop {
            parameters.push(self.parse_identifier()?);
            if self.consume_token(TokenType::Comma).is_none() {
                return Ok(parameters);
            }
        }
    }

    // ===== token plumbing =====

    fn with_context<T, F>(&mut self, context: ParseContext, parse: F) -> Result<T, ParseError>
    where
        F: FnOnce(&mut Self) -> Result<T, ParseError>,
    {
        let enclosing = std::mem::replace(&mut self.context, context);
        let result = parse(self);
        self.context = enclosing;
        result
    }

    /// Skips the rest of a malformed statement: past the next `;` or block
    /// end (and its `;`) at the statement's own nesting level, or up to a
    /// `fn` or the end of input.
    fn synchronize(&mut self) {
        loop {
            let block_depth = self.block_depth;
            if self.peek_is(|token_type| {
                *token_type == TokenType::Eof || (block_depth == 0 && *token_type == TokenType::Fn)
            }) {
                return;
            }
            if !self.advance() {
                return;
            }
            if self.block_depth > 0 {
                continue;
            }
            let (is_semicolon, is_block_end) = match &self.current_token {
                Some(token) => (
                    token.token_type == TokenType::Semicolon,
                    token.token_type.is_block_end(),
                ),
                None => (false, false),
            };
            if is_block_end {
                // a block used as a value is still followed by its `;`
                self.consume_token(TokenType::Semicolon);
            }
            if is_semicolon || is_block_end {
                return;
            }
        }
    }

    fn advance(&mut self) -> bool {
        match self.token_stream.next() {
            Some(token) => {
                if token.token_type.is_block_start() {
                    self.block_depth += 1;
                } else if token.token_type.is_block_end() {
                    self.block_depth = self.block_depth.saturating_sub(1);
                }
                self.consumed_count += 1;
                self.current_token = Some(token);
                true
            }
            None => false,
        }
    }

    fn peek_is<F: Fn(&TokenType) -> bool>(&mut self, check: F) -> bool {
        match self.token_stream.peek() {
            Some(token) => check(&token.token_type),
            None => check(&TokenType::Eof),
        }
    }

    /// Kind and span of the next token, for error reporting.
    fn peek_found(&mut self) -> (TokenTypeName, SourceSpan) {
        match self.token_stream.peek() {
            Some(token) => ((&token.token_type).into(), token.span),
            None => (
                TokenTypeName::Eof,
                match &self.current_token {
                    Some(token) => SourceSpan::empty_at(token.span.end()),
                    None => SourceSpan::from(0..0),
                },
            ),
        }
    }

    fn consume_match<T: Sized, F: Fn(&Token) -> Option<T>>(&mut self, check: F) -> Option<T> {
        match self.token_stream.peek() {
            None => None,
            Some(token) => match check(token) {
                Some(value) => {
                    self.advance();
                    Some(value)
                }
                None => None,
            },
        }
    }

    fn consume_token(&mut self, token_type: TokenType) -> Option<&Token> {
        match self.token_stream.peek() {
            Some(token) if token.token_type == token_type => {
                self.advance();
                self.current_token.as_ref()
            }
            Some(_) | None => None,
        }
    }

    fn consume_token_to_span(&mut self, token_type: TokenType) -> Option<SourceSpan> {
        self.consume_token(token_type).map(|token| token.span)
    }

    fn consume_token_or_error<F: Fn(TokenTypeName, SourceSpan) -> ParseError>(
        &mut self,
        token_type: &TokenType,
        make_err: F,
    ) -> Result<&Token, ParseError> {
        if !self.peek_is(|next| next == token_type) {
            let (actual, found_at) = self.peek_found();
            return Err(make_err(actual, found_at));
        }
        self.advance();
        match self.current_token.as_ref() {
            Some(token) => Ok(token),
            None => Err(make_err(TokenTypeName::Eof, SourceSpan::from(0..0))),
        }
    }

    fn consume_token_or_default_error(
        &mut self,
        token_type: &TokenType,
    ) -> Result<&Token, ParseError> {
        let source_code = self.source_reference.clone();
        self.consume_token_or_error(token_type, |actual, found_at| {
            ParseError::UnexpectedToken {
                actual,
                expected: token_type.into(),
                found_at,
                source_code: source_code.clone(),
            }
        })
    }

    fn consume_identifier(&mut self) -> Option<Identifier> {
        self.consume_match(|token| match &token.token_type {
            TokenType::Identifier(name) => Some(Identifier {
                name: name.clone(),
                source_span: token.span,
            }),
            _ => None,
        })
    }

    fn parse_identifier(&mut self) -> Result<Identifier, ParseError> {
        match self.consume_identifier() {
            Some(identifier) => Ok(identifier),
            None => {
                let (actual, found_at) = self.peek_found();
                Err(ParseError::UnexpectedToken {
                    actual,
                    expected: TokenTypeName::Identifier,
                    found_at,
                    source_code: self.source_reference.clone(),
                })
            }
        }
    }
}

fn is_snake_case(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_lowercase() || first == '_')
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}
