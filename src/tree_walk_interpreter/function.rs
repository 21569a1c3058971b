use super::{
    completion::{catch_return, Completion},
    scope::ScopeKind,
    Ctx, Interpreter, RuntimeError, ScopeRef, Value,
};
use crate::{ast, source::SourceSpan};
use itertools::Itertools;
use std::{
    fmt::{Debug, Display},
    rc::Rc,
};

#[derive(Clone)]
pub struct DruimFunction(Rc<DruimFunctionImpl>);
struct DruimFunctionImpl {
    decl: Rc<ast::FunctionDecl>,
    closure: ScopeRef,
    ctx: Ctx,
}
impl DruimFunction {
    pub fn new(decl: Rc<ast::FunctionDecl>, closure: ScopeRef, ctx: Ctx) -> Self {
        Self(Rc::new(DruimFunctionImpl { decl, closure, ctx }))
    }
    pub fn name(&self) -> &str {
        &self.0.decl.name.name
    }
    pub fn arity(&self) -> usize {
        self.0.decl.parameters.len()
    }

    /// Runs every body in order inside one fresh function scope parented to
    /// the defining scope. A body's `loc;` opens a child scope that ends with
    /// that body.
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
        call_span: SourceSpan,
        call_ctx: &Ctx,
    ) -> Result<Value, RuntimeError> {
        if arguments.len() != self.arity() {
            return Err(RuntimeError::ArityMismatch {
                expected_arity: self.arity(),
                actual_arity: arguments.len(),
                found_at: call_span,
                source_code: call_ctx.source_code.clone(),
            });
        }

        let completion =
            interpreter.with_scope(ScopeKind::Function, self.0.closure.clone(), |interpreter| -> Completion {
                for (parameter, value) in self.0.decl.parameters.iter().zip_eq(arguments) {
                    interpreter.define(&parameter.name, value);
                }
                for body in self.0.decl.bodies.iter() {
                    interpreter.eval_body(body, &self.0.ctx)?;
                }
                Ok(Value::Empty)
            });
        catch_return(completion)
    }
}
impl Display for DruimFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn {}", self.name())
    }
}
impl Debug for DruimFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
impl PartialEq for DruimFunction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
