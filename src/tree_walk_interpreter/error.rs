use super::{ValueDescriptor, ValueType};
use crate::{ast::CastTarget, SourceReference, SourceSpan};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum RuntimeError {
    #[error("Undefined identifier {name}")]
    UndefinedIdentifier {
        name: String,
        #[label("'{name}' is not defined in any enclosing scope")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Expected {expected_arity} arguments but got {actual_arity}")]
    ArityMismatch {
        expected_arity: usize,
        actual_arity: usize,
        #[label("On this function call")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{} has no truth value", .actual_type.fmt_a())]
    InvalidCoercionTarget {
        actual_type: ValueType,
        #[label("This is {}, which can't be used as a condition", .actual_type.fmt_a())]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Can't bind from undefined identifier {name}")]
    BindTargetUndefined {
        name: String,
        #[label("'{name}' must be defined before it is bound")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Operand must be {}, but found {}", .expected_type.fmt_a(), .actual_type.fmt_a())]
    OperandTypeError {
        expected_type: ValueDescriptor,
        actual_type: ValueType,
        #[label("{} was found here", .actual_type.fmt_a())]
        operand_loc: SourceSpan,
        operator: String,
        #[label("the '{operator}' operator expected {}", .expected_type.fmt_a())]
        operator_loc: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Can only call functions")]
    UncallableValue {
        actual_type: ValueType,
        #[label("Attempted to call {} here", .actual_type.fmt_a())]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Division by zero")]
    DivisionByZero {
        #[label("This is zero")]
        divisor_loc: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Arithmetic overflow in '{operator}'")]
    ArithmeticOverflow {
        operator: String,
        #[label("The result does not fit")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Can't cast {} to {target}", .actual_type.fmt_a())]
    InvalidCast {
        actual_type: ValueType,
        target: CastTarget,
        #[label("This value has no {target} form")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}
