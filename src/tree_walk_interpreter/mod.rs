mod completion;
mod error;
mod function;
mod scope;
mod truth;
mod value;

use crate::{ast::*, source::SourceSpan, SourceReference};
use completion::{catch_return, try_for_each_and_return_last, Abrupt, Completion};
pub use error::RuntimeError;
pub use function::DruimFunction;
use ordered_float::OrderedFloat;
pub use scope::{ScopeKind, ScopeRef, ScopeStats};
use scope::ScopeStack;
use std::{cmp::Ordering, rc::Rc};
pub use truth::truth_of;
pub use value::*;

#[derive(Debug, Clone)]
pub struct Ctx {
    source_code: SourceReference,
}

/// Tree-walking evaluator. Owns the top-level scope for its whole lifetime,
/// so consecutive `interpret` calls (a REPL session) share bindings.
pub struct Interpreter {
    scopes: ScopeStack,
}

/// Evaluates one program in a fresh interpreter whose top-level scope lives
/// exactly as long as the program.
pub fn evaluate(program: &Program) -> Result<Value, RuntimeError> {
    let mut interpreter = Interpreter::new();
    let result = interpreter.interpret(program);
    interpreter.finish();
    result
}

#[derive(Clone, Copy)]
enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            scopes: ScopeStack::new(),
        }
    }
    /// Runs a program against the top-level scope. The value is that of the
    /// last top-level statement, or Empty for an empty program.
    pub fn interpret(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let ctx = Ctx {
            source_code: program.source_reference.clone(),
        };
        catch_return(try_for_each_and_return_last(
            &program.statements,
            Value::Empty,
            |stmt| self.eval_stmt(stmt, &ctx),
        ))
    }
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.scopes.global().borrow().get_local(name)
    }
    pub fn scope_stats(&self) -> &ScopeStats {
        self.scopes.stats()
    }
    /// Scopes currently open above the top-level scope.
    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }
    /// Destroys the top-level scope.
    pub fn finish(self) -> ScopeStats {
        self.scopes.finish()
    }

    fn eval_stmt(&mut self, stmt: &Stmt, ctx: &Ctx) -> Completion {
        match stmt {
            Stmt::Define(DefineStmt { target, value }) => {
                let value = self.eval_expr(value, ctx)?;
                self.define(&target.name, value.clone());
                Ok(value)
            }
            Stmt::DefineEmpty(DefineEmptyStmt { target, .. }) => {
                self.define(&target.name, Value::Empty);
                Ok(Value::Empty)
            }
            Stmt::Bind(BindStmt { target, source }) => {
                let value = self.lookup(&source.name).ok_or_else(|| {
                    RuntimeError::BindTargetUndefined {
                        name: source.name.clone(),
                        found_at: source.source_span(),
                        source_code: ctx.source_code.clone(),
                    }
                })?;
                self.define(&target.name, value.clone());
                Ok(value)
            }
            Stmt::Expr(ExprStmt { expression }) => self.eval_expr(expression, ctx),
            Stmt::Return(ReturnStmt { value, .. }) => {
                let value = match value {
                    Some(value) => self.eval_expr(value, ctx)?,
                    None => Value::Empty,
                };
                Err(Abrupt::Return(value))
            }
            // `eval_body` splits bodies on the marker before running them, so
            // only a hand-built tree reaches this arm.
            Stmt::Local(_) => Ok(Value::Empty),
            Stmt::FunctionDecl(decl) => Ok(self.declare_function(decl, ctx)),
        }
    }

    /// One function body. Statements after `loc;` run in a body-local scope
    /// nested directly under the function scope.
    fn eval_body(&mut self, statements: &[Stmt], ctx: &Ctx) -> Completion {
        let (before, after) =
            match statements.iter().position(|stmt| matches!(stmt, Stmt::Local(_))) {
                Some(index) => (&statements[..index], Some(&statements[index + 1..])),
                None => (statements, None),
            };
        let last = try_for_each_and_return_last(before, Value::Empty, |stmt| {
            self.eval_stmt(stmt, ctx)
        })?;
        match after {
            Some(after) => {
                let function_scope = self.scopes.current().clone();
                self.with_scope(ScopeKind::BodyLocal, function_scope, |interpreter| {
                    try_for_each_and_return_last(after, Value::Empty, |stmt| {
                        interpreter.eval_stmt(stmt, ctx)
                    })
                })
            }
            None => Ok(last),
        }
    }

    fn eval_expr(&mut self, expr: &Expr, ctx: &Ctx) -> Completion {
        match expr {
            Expr::Literal(LiteralExpr { value, .. }) => Ok(value.into()),
            Expr::Variable(VariableExpr { identifier }) => {
                Ok(self.eval_variable(identifier, ctx)?)
            }
            Expr::Grouping(GroupingExpr { expr, .. }) => self.eval_expr(expr, ctx),
            Expr::Binary(binary) => self.eval_binary(binary, ctx),
            Expr::Unary(UnaryExpr { operator, right }) => {
                let right_val = self.eval_expr(right, ctx)?;
                Ok(match operator.inner() {
                    UnaryOperator::Minus => match right_val {
                        Value::Num(n) => n.checked_neg().map(Value::Num).ok_or_else(|| {
                            RuntimeError::ArithmeticOverflow {
                                operator: operator.inner().to_string(),
                                found_at: expr.source_span(),
                                source_code: ctx.source_code.clone(),
                            }
                        })?,
                        Value::Dec(d) => Value::Dec(-d),
                        other => {
                            return Err(RuntimeError::OperandTypeError {
                                expected_type: ValueDescriptor::AnyOf(vec![
                                    ValueType::Num,
                                    ValueType::Dec,
                                ]),
                                actual_type: other.type_of(),
                                operand_loc: right.source_span(),
                                operator: operator.inner().to_string(),
                                operator_loc: operator.source_span(),
                                source_code: ctx.source_code.clone(),
                            }
                            .into())
                        }
                    },
                    UnaryOperator::Not => {
                        Value::Flag(!self.coerce(&right_val, right.source_span(), ctx)?)
                    }
                })
            }
            Expr::Guard(GuardExpr { target, branches }) => {
                for branch in branches {
                    let value = self.eval_expr(branch, ctx)?;
                    if self.coerce(&value, branch.source_span(), ctx)? {
                        self.define(&target.name, value.clone());
                        return Ok(value);
                    }
                }
                self.define(&target.name, Value::Empty);
                Ok(Value::Empty)
            }
            Expr::Has(HasExpr { object, steps }) => {
                let mut current = self.eval_expr(object, ctx)?;
                for step in steps {
                    let field = current
                        .into_record()
                        .and_then(|record| record.get(&step.name.name).cloned());
                    current = match (field, &step.arguments) {
                        (None, _) => return Ok(Value::Empty),
                        (Some(field), None) => field,
                        (Some(field), Some(arguments)) => {
                            let arguments = self.eval_arguments(arguments, ctx)?;
                            self.call_value(field, arguments, step.source_span, ctx)?
                        }
                    };
                }
                Ok(current)
            }
            Expr::Present(PresentExpr { object, field }) => {
                let object = self.eval_expr(object, ctx)?;
                let is_present = match object {
                    Value::Record(record) => record
                        .get(&field.name)
                        .map_or(false, |value| !value.is_empty_value()),
                    _ => false,
                };
                Ok(Value::Flag(is_present))
            }
            Expr::Cast(CastExpr { value, target }) => {
                let value = self.eval_expr(value, ctx)?;
                Ok(cast(value, *target.inner()).map_err(|actual_type| {
                    RuntimeError::InvalidCast {
                        actual_type,
                        target: *target.inner(),
                        found_at: expr.source_span(),
                        source_code: ctx.source_code.clone(),
                    }
                })?)
            }
            Expr::Pipe(PipeExpr {
                value, function, ..
            }) => {
                let value = self.eval_expr(value, ctx)?;
                let function = self.eval_expr(function, ctx)?;
                Ok(self.call_value(function, vec![value], expr.source_span(), ctx)?)
            }
            Expr::Call(CallExpr {
                callee, arguments, ..
            }) => {
                let callee = self.eval_expr(callee, ctx)?;
                let arguments = self.eval_arguments(arguments, ctx)?;
                Ok(self.call_value(callee, arguments, expr.source_span(), ctx)?)
            }
            Expr::BlockStatementChain(BlockStatementChain { segments, .. }) => {
                let parent = self.scopes.current().clone();
                self.with_scope(ScopeKind::Statement, parent, |interpreter| -> Completion {
                    for stmt in segments.iter().flatten() {
                        interpreter.eval_stmt(stmt, ctx)?;
                    }
                    Ok(interpreter.scopes.current().borrow().snapshot().into())
                })
            }
            Expr::BlockExpressionChain(BlockExpressionChain { segments, .. }) => {
                try_for_each_and_return_last(segments, Value::Empty, |segment| {
                    self.eval_expr(segment, ctx)
                })
            }
            Expr::BranchBlock(BranchBlock { segments, .. }) => {
                for segment in segments {
                    let value = self.eval_expr(segment, ctx)?;
                    if self.coerce(&value, segment.source_span(), ctx)? {
                        return Ok(value);
                    }
                }
                Ok(Value::Empty)
            }
            Expr::ArrayBlock(ArrayBlock { elements, .. }) => {
                Ok(self.eval_arguments(elements, ctx)?.into())
            }
            Expr::Function(decl) => Ok(self.declare_function(decl, ctx)),
        }
    }

    fn eval_binary(&mut self, expr: &BinaryExpr, ctx: &Ctx) -> Completion {
        let BinaryExpr {
            left,
            right,
            operator,
        } = expr;
        let left_val = self.eval_expr(left, ctx)?;

        let arithmetic = match operator.inner() {
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => {
                let is_and = *operator.inner() == BinaryOperator::LogicalAnd;
                let left_truth = self.coerce(&left_val, left.source_span(), ctx)?;
                if left_truth != is_and {
                    return Ok(Value::Flag(left_truth));
                }
                let right_val = self.eval_expr(right, ctx)?;
                return Ok(Value::Flag(self.coerce(&right_val, right.source_span(), ctx)?));
            }
            BinaryOperator::Plus => Arithmetic::Add,
            BinaryOperator::Minus => Arithmetic::Subtract,
            BinaryOperator::Multiply => Arithmetic::Multiply,
            BinaryOperator::Divide => Arithmetic::Divide,
            BinaryOperator::Remainder => Arithmetic::Remainder,
            BinaryOperator::EqualTo => {
                return Ok(Value::Flag(left_val == self.eval_expr(right, ctx)?))
            }
            BinaryOperator::NotEqualTo => {
                return Ok(Value::Flag(left_val != self.eval_expr(right, ctx)?))
            }
            comparison => {
                let right_val = self.eval_expr(right, ctx)?;
                let ordering = self.compare(expr, left_val, right_val, ctx)?;
                return Ok(Value::Flag(match comparison {
                    BinaryOperator::LessThan => ordering == Ordering::Less,
                    BinaryOperator::LessThanOrEqualTo => ordering != Ordering::Greater,
                    BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }));
            }
        };
        let right_val = self.eval_expr(right, ctx)?;
        Ok(self.apply_arithmetic(expr, arithmetic, left_val, right_val, ctx)?)
    }

    fn apply_arithmetic(
        &self,
        expr: &BinaryExpr,
        arithmetic: Arithmetic,
        left_val: Value,
        right_val: Value,
        ctx: &Ctx,
    ) -> Result<Value, RuntimeError> {
        let overflow = || RuntimeError::ArithmeticOverflow {
            operator: expr.operator.inner().to_string(),
            found_at: expr.source_span(),
            source_code: ctx.source_code.clone(),
        };
        let division_by_zero = || RuntimeError::DivisionByZero {
            divisor_loc: expr.right.source_span(),
            source_code: ctx.source_code.clone(),
        };

        match (left_val, right_val) {
            (Value::Num(left), Value::Num(right)) => {
                let result = match arithmetic {
                    Arithmetic::Add => left.checked_add(right),
                    Arithmetic::Subtract => left.checked_sub(right),
                    Arithmetic::Multiply => left.checked_mul(right),
                    Arithmetic::Divide | Arithmetic::Remainder if right == 0 => {
                        return Err(division_by_zero())
                    }
                    Arithmetic::Divide => left.checked_div(right),
                    Arithmetic::Remainder => left.checked_rem(right),
                };
                result.map(Value::Num).ok_or_else(overflow)
            }
            (Value::Dec(left), Value::Dec(right)) => {
                let (left, right) = (left.into_inner(), right.into_inner());
                let result = match arithmetic {
                    Arithmetic::Add => left + right,
                    Arithmetic::Subtract => left - right,
                    Arithmetic::Multiply => left * right,
                    Arithmetic::Divide | Arithmetic::Remainder if right == 0.0 => {
                        return Err(division_by_zero())
                    }
                    Arithmetic::Divide => left / right,
                    Arithmetic::Remainder => left % right,
                };
                if result.is_finite() {
                    Ok(Value::Dec(OrderedFloat(result)))
                } else {
                    Err(overflow())
                }
            }
            (Value::Text(left), Value::Text(right)) if matches!(arithmetic, Arithmetic::Add) => {
                let mut joined = String::with_capacity(left.len() + right.len());
                joined.push_str(&left);
                joined.push_str(&right);
                Ok(joined.into())
            }
            (left_val, right_val) => {
                let mut accepted = vec![ValueType::Num, ValueType::Dec];
                if matches!(arithmetic, Arithmetic::Add) {
                    accepted.push(ValueType::Text);
                }
                Err(self.operand_mismatch(expr, accepted, left_val, right_val, ctx))
            }
        }
    }

    fn compare(
        &self,
        expr: &BinaryExpr,
        left_val: Value,
        right_val: Value,
        ctx: &Ctx,
    ) -> Result<Ordering, RuntimeError> {
        match (left_val, right_val) {
            (Value::Num(left), Value::Num(right)) => Ok(left.cmp(&right)),
            (Value::Dec(left), Value::Dec(right)) => Ok(left.cmp(&right)),
            (Value::Text(left), Value::Text(right)) => Ok(left.cmp(&right)),
            (left_val, right_val) => Err(self.operand_mismatch(
                expr,
                vec![ValueType::Num, ValueType::Dec, ValueType::Text],
                left_val,
                right_val,
                ctx,
            )),
        }
    }

    /// Blames the left operand when its kind is never accepted, otherwise the
    /// right operand for not matching the left.
    fn operand_mismatch(
        &self,
        expr: &BinaryExpr,
        accepted: Vec<ValueType>,
        left_val: Value,
        right_val: Value,
        ctx: &Ctx,
    ) -> RuntimeError {
        let left_type = left_val.type_of();
        let (expected_type, actual_type, operand_loc) = if accepted.contains(&left_type) {
            (
                ValueDescriptor::Single(left_type),
                right_val.type_of(),
                expr.right.source_span(),
            )
        } else {
            (
                ValueDescriptor::AnyOf(accepted),
                left_type,
                expr.left.source_span(),
            )
        };
        RuntimeError::OperandTypeError {
            expected_type,
            actual_type,
            operand_loc,
            operator: expr.operator.inner().to_string(),
            operator_loc: expr.operator.source_span(),
            source_code: ctx.source_code.clone(),
        }
    }

    fn coerce(&self, value: &Value, found_at: SourceSpan, ctx: &Ctx) -> Result<bool, RuntimeError> {
        truth_of(value).ok_or_else(|| RuntimeError::InvalidCoercionTarget {
            actual_type: value.type_of(),
            found_at,
            source_code: ctx.source_code.clone(),
        })
    }

    fn eval_variable(&self, identifier: &Identifier, ctx: &Ctx) -> Result<Value, RuntimeError> {
        self.lookup(&identifier.name)
            .ok_or_else(|| RuntimeError::UndefinedIdentifier {
                name: identifier.name.clone(),
                found_at: identifier.source_span(),
                source_code: ctx.source_code.clone(),
            })
    }

    fn eval_arguments(&mut self, arguments: &[Expr], ctx: &Ctx) -> Completion<Vec<Value>> {
        arguments
            .iter()
            .map(|argument| self.eval_expr(argument, ctx))
            .collect()
    }

    fn call_value(
        &mut self,
        callee: Value,
        arguments: Vec<Value>,
        call_span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(function) => function.call(self, arguments, call_span, ctx),
            other => Err(RuntimeError::UncallableValue {
                actual_type: other.type_of(),
                found_at: call_span,
                source_code: ctx.source_code.clone(),
            }),
        }
    }

    /// Closes over the current scope and binds the function's name there,
    /// whether the `fn` stands alone or sits inside an expression.
    fn declare_function(&mut self, decl: &Rc<FunctionDecl>, ctx: &Ctx) -> Value {
        let function: Value =
            DruimFunction::new(decl.clone(), self.scopes.current().clone(), ctx.clone()).into();
        self.define(&decl.name.name, function.clone());
        function
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.scopes.current().borrow().get(name)
    }

    fn define(&mut self, name: &str, value: Value) {
        self.scopes.current().borrow_mut().define(name, value);
    }

    /// Runs `run` with a new scope on top of the stack. The scope is popped
    /// however `run` finishes.
    fn with_scope<T, F: FnOnce(&mut Self) -> T>(
        &mut self,
        kind: ScopeKind,
        parent: ScopeRef,
        run: F,
    ) -> T {
        self.scopes.push(kind, parent);
        let result = run(self);
        self.scopes.pop();
        result
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit conversion between scalar kinds. `Err` carries the kind that
/// has no form in the target.
fn cast(value: Value, target: CastTarget) -> Result<Value, ValueType> {
    let value_type = value.type_of();
    match (target, value) {
        (CastTarget::Num, Value::Num(n)) => Ok(Value::Num(n)),
        (CastTarget::Num, Value::Dec(d)) => {
            let truncated = d.into_inner().trunc();
            if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Ok(Value::Num(truncated as i64))
            } else {
                Err(value_type)
            }
        }
        (CastTarget::Num, Value::Text(text)) => {
            text.parse::<i64>().map(Value::Num).map_err(|_| value_type)
        }
        (CastTarget::Num, Value::Flag(flag)) => Ok(Value::Num(flag as i64)),

        (CastTarget::Dec, Value::Num(n)) => Ok((n as f64).into()),
        (CastTarget::Dec, Value::Dec(d)) => Ok(Value::Dec(d)),
        (CastTarget::Dec, Value::Text(text)) => match text.parse::<f64>() {
            Ok(d) if d.is_finite() => Ok(d.into()),
            _ => Err(value_type),
        },
        (CastTarget::Dec, Value::Flag(flag)) => Ok(if flag { 1.0 } else { 0.0 }.into()),

        (CastTarget::Text, Value::Text(text)) => Ok(Value::Text(text)),
        (CastTarget::Text, value @ (Value::Num(_) | Value::Dec(_) | Value::Flag(_))) => {
            Ok(value.to_string().into())
        }

        _ => Err(value_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{run_source, Parser, ParserOpts, Scanner};
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> Result<Value, RuntimeError> {
        run_source(source).map_err(|err| match err {
            crate::Error::Runtime(err) => err,
            other => panic!("expected a runtime result, got {:?}", other),
        })
    }

    fn run_ok(source: &str) -> String {
        format!("{:?}", run(source).unwrap())
    }

    fn with_interpreter(source: &str) -> (Interpreter, Result<Value, RuntimeError>) {
        let reference = SourceReference::anonymous(source);
        let tokens = Scanner::scan(source).unwrap();
        let (program, errors) = Parser::parse(tokens.into_iter(), reference, ParserOpts::default());
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        let mut interpreter = Interpreter::new();
        let result = interpreter.interpret(&program);
        (interpreter, result)
    }

    #[test]
    fn program_value_is_the_last_statement() {
        assert_eq!(run_ok(""), "void");
        assert_eq!(run_ok("x = 1; y = x + 1;"), "2");
        assert_eq!(run_ok("x = 1; x * 10;"), "10");
    }

    #[test]
    fn arithmetic_needs_matching_kinds() {
        assert_eq!(run_ok("7 / 2;"), "3");
        assert_eq!(run_ok("7 % 4;"), "3");
        assert_eq!(run_ok("1.5 + 2.5;"), "4.0");
        assert_eq!(run_ok("\"ab\" + \"cd\";"), "\"abcd\"");
        assert_eq!(run_ok("-(2 - 5);"), "3");
        assert!(matches!(
            run("1 + 1.0;"),
            Err(RuntimeError::OperandTypeError {
                actual_type: ValueType::Dec,
                ..
            })
        ));
        assert!(matches!(
            run("void + 1;"),
            Err(RuntimeError::OperandTypeError {
                actual_type: ValueType::Empty,
                ..
            })
        ));
        assert!(matches!(
            run("\"a\" - \"b\";"),
            Err(RuntimeError::OperandTypeError { .. })
        ));
    }

    #[test]
    fn division_by_zero_and_overflow_are_errors() {
        assert!(matches!(run("1 / 0;"), Err(RuntimeError::DivisionByZero { .. })));
        assert!(matches!(run("1 % 0;"), Err(RuntimeError::DivisionByZero { .. })));
        assert!(matches!(run("1.0 / 0.0;"), Err(RuntimeError::DivisionByZero { .. })));
        assert!(matches!(
            run("9223372036854775807 + 1;"),
            Err(RuntimeError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn comparisons() {
        assert_eq!(run_ok("1 < 2;"), "true");
        assert_eq!(run_ok("2.5 >= 2.5;"), "true");
        assert_eq!(run_ok("\"a\" > \"b\";"), "false");
        assert_eq!(run_ok("1 == 1.0;"), "false");
        assert_eq!(run_ok("void == void;"), "true");
        assert_eq!(run_ok("\"x\" != 1;"), "true");
        assert!(matches!(
            run("1 < \"2\";"),
            Err(RuntimeError::OperandTypeError { .. })
        ));
    }

    #[test]
    fn logic_coerces_and_short_circuits() {
        assert_eq!(run_ok("0 |? \"x\";"), "true");
        assert_eq!(run_ok("1 &? \"\";"), "false");
        assert_eq!(run_ok("!? void;"), "true");
        // the right side is never evaluated
        assert_eq!(run_ok("0 &? missing;"), "false");
        assert_eq!(run_ok("1 |? missing;"), "true");
    }

    #[test]
    fn guard_takes_the_first_truthy_branch() {
        assert_eq!(run_ok("x ?= 0 : \"\" : 5 : 9; x;"), "5");
        assert_eq!(run_ok("x ?= 0 : void; x;"), "void");
        assert!(matches!(
            run("fn f :( )( 1 ): x ?= 0 : f;"),
            Err(RuntimeError::InvalidCoercionTarget {
                actual_type: ValueType::Function,
                ..
            })
        ));
    }

    #[test]
    fn define_empty_matches_an_empty_literal() {
        assert_eq!(run_ok("x =; x;"), "void");
        assert_eq!(run_ok("x =; y ?= x : 3; y;"), "3");
        assert_eq!(run_ok("x =; y := x; y;"), "void");
    }

    #[test]
    fn undefined_identifiers_are_fatal() {
        assert!(matches!(
            run("x = y;"),
            Err(RuntimeError::UndefinedIdentifier { name, .. }) if name == "y"
        ));
    }

    #[test]
    fn bind_copies_the_current_value() {
        assert_eq!(run_ok("b = 1; a := b; b = 2; a;"), "1");
        assert!(matches!(
            run("a := nothing;"),
            Err(RuntimeError::BindTargetUndefined { .. })
        ));
    }

    #[test]
    fn statement_chain_opens_exactly_one_scope() {
        let (interpreter, result) =
            with_interpreter(":{ a = 1 }{ b = a + 1 }{ c = b + 1 }:");
        let record = result.unwrap().into_record().unwrap();
        assert_eq!(format!("{:?}", record), "{a: 1, b: 2, c: 3}");
        assert_eq!(record.len(), 3);
        let stats = interpreter.scope_stats();
        assert_eq!(stats.pushes(ScopeKind::Statement), 1);
        assert_eq!(stats.pops(ScopeKind::Statement), 1);
        assert_eq!(interpreter.scope_depth(), 0);
        assert_eq!(interpreter.get_global("a"), None);
    }

    #[test]
    fn block_bindings_do_not_leak() {
        assert!(matches!(
            run(":{ inner = 1; }: inner;"),
            Err(RuntimeError::UndefinedIdentifier { .. })
        ));
        assert_eq!(run_ok("a = 1; :{ a = 2; }: a;"), "1");
    }

    #[test]
    fn expression_blocks_never_touch_the_scope_stack() {
        let (interpreter, result) = with_interpreter(
            "x = :[ 1 ][ 2 ]:; y = :| 0 || 3 |:; z = :< 1, 2 >< 3 >:; z;",
        );
        assert_eq!(format!("{:?}", result.unwrap()), "[1, 2, 3]");
        assert_eq!(interpreter.get_global("x"), Some(2.into()));
        assert_eq!(interpreter.get_global("y"), Some(3.into()));
        assert_eq!(interpreter.scope_stats().max_depth(), 0);
    }

    #[test]
    fn has_collapses_to_empty_on_first_miss() {
        let source = "user = :{ profile = :{ name = \"ada\"; }: }:;";
        assert_eq!(run_ok(&format!("{} user::profile::name;", source)), "\"ada\"");
        assert_eq!(run_ok(&format!("{} user::profile::email;", source)), "void");
        assert_eq!(run_ok(&format!("{} user::nope::email;", source)), "void");
        assert_eq!(run_ok("n = 5; n::field;"), "void");
    }

    #[test]
    fn has_steps_can_call_fields() {
        assert_eq!(
            run_ok("m = :{ fn twice :( x )( ret x * 2 ): }:; m::twice(21);"),
            "42"
        );
    }

    #[test]
    fn presence_checks_non_empty_fields() {
        assert_eq!(run_ok("r = :{ a = 1; b =; }:; r :? a;"), "true");
        assert_eq!(run_ok("r = :{ a = 1; b =; }:; r :? b;"), "false");
        assert_eq!(run_ok("r = :{ a = 1; }:; r :? c;"), "false");
    }

    #[test]
    fn casts_between_scalars() {
        assert_eq!(run_ok("\"42\" :> num;"), "42");
        assert_eq!(run_ok("3.9 :> num;"), "3");
        assert_eq!(run_ok("3 :> dec;"), "3.0");
        assert_eq!(run_ok("2.5 :> text;"), "\"2.5\"");
        assert!(matches!(
            run("\"abc\" :> num;"),
            Err(RuntimeError::InvalidCast {
                actual_type: ValueType::Text,
                ..
            })
        ));
        assert!(matches!(run("void :> text;"), Err(RuntimeError::InvalidCast { .. })));
    }

    #[test]
    fn functions_close_over_their_defining_scope() {
        assert_eq!(run_ok("fn add_one :( x )( x + 1 ): add_one(41);"), "void");
        assert_eq!(run_ok("fn add_one :( x )( ret x + 1 ): add_one(41);"), "42");
        assert_eq!(
            run_ok("base = 10; fn add :( x )( ret x + base ): base = 20; add(1);"),
            "21"
        );
        assert_eq!(run_ok("fn f :( )( ret; ): f();"), "void");

        let function = run("fn pair :( a, b )( ret a ): pair;")
            .unwrap()
            .into_function()
            .unwrap();
        assert_eq!((function.name(), function.arity()), ("pair", 2));
    }

    #[test]
    fn bodies_share_the_function_scope_but_not_body_locals() {
        assert_eq!(
            run_ok("fn f :( x )( y = x * 2; )( ret y + 1; ): f(4);"),
            "9"
        );
        assert!(matches!(
            run("fn f :( x )( loc; y = x; )( ret y; ): f(1);"),
            Err(RuntimeError::UndefinedIdentifier { name, .. }) if name == "y"
        ));
        assert_eq!(
            run_ok("fn f :( x )( loc; x = 5; )( ret x; ): f(1);"),
            "1"
        );
    }

    #[test]
    fn return_unwinds_every_scope_in_order() {
        let (interpreter, result) = with_interpreter(
            "fn f :( x )( loc; :{ :{ ret x; }: }: )( ret 0 ): f(7);",
        );
        assert_eq!(result.unwrap(), Value::Num(7));
        let stats = interpreter.scope_stats();
        assert!(interpreter.scope_depth() == 0);
        assert_eq!(stats.pushes(ScopeKind::Statement), 2);
        assert_eq!(stats.pops(ScopeKind::Statement), 2);
        assert_eq!(stats.pushes(ScopeKind::BodyLocal), 1);
        assert_eq!(stats.pops(ScopeKind::BodyLocal), 1);
        assert_eq!(stats.pushes(ScopeKind::Function), 1);
        assert_eq!(stats.pops(ScopeKind::Function), 1);
    }

    #[test]
    fn errors_still_pop_scopes() {
        let (interpreter, result) = with_interpreter("fn f :( )( :{ nope; }: ): f();");
        assert!(result.is_err());
        assert_eq!(interpreter.scope_depth(), 0);
        let stats = interpreter.finish();
        assert!(stats.is_balanced());
    }

    #[test]
    fn arity_and_callability_are_checked() {
        assert!(matches!(
            run("fn f :( a, b )( ret a ): f(1);"),
            Err(RuntimeError::ArityMismatch {
                expected_arity: 2,
                actual_arity: 1,
                ..
            })
        ));
        assert!(matches!(
            run("x = 1; x(2);"),
            Err(RuntimeError::UncallableValue { .. })
        ));
    }

    #[test]
    fn recursion_works_through_the_closure() {
        assert_eq!(
            run_ok("fn fact :( n )( ret :| (n < 2) :> num || n * fact(n - 1) |: ): fact(5);"),
            "120"
        );
    }

    #[test]
    fn function_expressions_bind_their_name() {
        assert_eq!(
            run_ok("f = fn g :( n )( ret :| (n < 1) :> num || g(n - 1) |: ):; f(3);"),
            "1"
        );
        assert_eq!(run_ok("f = fn g :( )( ret 1 ):; g();"), "1");
        let (interpreter, _) = with_interpreter("x = :[ fn inner :( )( ret 2 ): ]:;");
        assert!(interpreter.get_global("inner").is_some());
    }

    #[test]
    fn callees_do_not_see_the_callers_scope() {
        assert!(matches!(
            run("fn f :( )( ret y ): :{ y = 1; r = f(); }:;"),
            Err(RuntimeError::UndefinedIdentifier { name, .. }) if name == "y"
        ));
        assert_eq!(
            run_ok("y = 0; fn f :( )( ret y ): out = :{ y = 1; r = f(); }:; out::r;"),
            "0"
        );
    }

    #[test]
    fn statement_led_constructs_stop_at_their_close() {
        assert_eq!(run_ok("fn f :( x )( ret x * 10; ):\n(1 + 2);\nf(1);"), "10");
        assert_eq!(run_ok("a = 5;\n:{ t = 1; }:\n-a;"), "-5");
    }

    #[test]
    fn pipes_call_with_one_argument() {
        assert_eq!(
            run_ok("fn double :( x )( ret x * 2 ): 5 |> double |> double;"),
            "20"
        );
    }

    #[test]
    fn interpreter_keeps_globals_between_programs() {
        let (mut interpreter, _) = with_interpreter("x = 40;");
        let source = "x + 2;";
        let tokens = Scanner::scan(source).unwrap();
        let (program, _) = Parser::parse(
            tokens.into_iter(),
            SourceReference::anonymous(source),
            ParserOpts::default(),
        );
        assert_eq!(interpreter.interpret(&program).unwrap(), Value::Num(42));
    }
}
