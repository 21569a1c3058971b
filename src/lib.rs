pub mod ast;
mod parser;
mod scanner;
mod source;
mod source_reference;
mod tree_walk_interpreter;

use miette::Diagnostic;
use thiserror::Error;

pub use parser::{parse, ParseError, Parser, ParserOpts};
pub use scanner::{LexError, Scanner, Token, TokenType};
pub use source::{SourceOffset, SourceSpan};
pub use source_reference::SourceReference;
pub use tree_walk_interpreter::{
    evaluate, truth_of, DruimFunction, Interpreter, Record, RuntimeError, ScopeKind, ScopeStats,
    Value, ValueType,
};

/// Whichever stage stopped a `run_source` call.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("Found {} syntax errors", .errors.len())]
    Parse {
        #[related]
        errors: Vec<ParseError>,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Scans, parses and evaluates one anonymous source text.
pub fn run_source(source: &str) -> Result<Value, Error> {
    let source_reference = SourceReference::anonymous(source);
    let tokens = Scanner::new(source, source_reference.clone()).collect::<Result<Vec<_>, _>>()?;
    let program = parse(tokens, source_reference).map_err(|errors| Error::Parse { errors })?;
    Ok(evaluate(&program)?)
}
