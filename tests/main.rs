use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use colored::Colorize;
use druim_rs::{
    Interpreter, LexError, ParseError, Parser, ParserOpts, RuntimeError, Scanner, SourceOffset,
    SourceReference, SourceSpan,
};
use itertools::Itertools;
use lazy_static::lazy_static;
use libtest_mimic::{self, run_tests, Arguments, Outcome, Test};
use miette::{miette, IntoDiagnostic, Result};
use regex::Regex;

fn main() {
    let tests = read_all_files("test_fixtures".to_string().into())
        .unwrap()
        .into_iter()
        .filter(|path| path.extension().map_or(false, |ext| ext == "druim"))
        .map(|path| Test {
            name: path.to_string_lossy().into(),
            kind: "treewalk".into(),
            is_bench: false,
            is_ignored: false,
            data: path,
        })
        .collect::<Vec<_>>();

    run_tests(&Arguments::from_args(), tests, |test| {
        match run_test(&test.data) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed {
                msg: Some(format!("{:?}", err)),
            },
        }
    })
    .exit();
}

lazy_static! {
    static ref COMMENT_LINE_RE: Regex = Regex::new(r"(?m)^[ \t]*//.*$").unwrap();
    static ref EXPECTED_VALUE_RE: Regex = Regex::new("// expect: (.*)\n?").unwrap();
    static ref STATIC_ERROR_RE: Regex = Regex::new("// (Lex|Parse)Error: (.*)\n?").unwrap();
    static ref RUNTIME_ERROR_RE: Regex = Regex::new("// RuntimeError: (.*)\n?").unwrap();
}

/// Druim has no comment syntax, so expectation lines are blanked out before
/// scanning. Byte offsets are kept so reported lines still match the file.
fn blank_comment_lines(source: &str) -> String {
    COMMENT_LINE_RE
        .replace_all(source, |captures: &regex::Captures| " ".repeat(captures[0].len()))
        .into_owned()
}

fn run_test(path: &Path) -> Result<Outcome> {
    let test_source = fs::read_to_string(path).into_diagnostic()?;
    let program_source = blank_comment_lines(&test_source);
    let source_reference =
        SourceReference::new(path.to_string_lossy().to_string(), program_source.clone());

    let expected_output = EXPECTED_VALUE_RE
        .captures_iter(&test_source)
        .map(|captures| format!("{}\n", &captures[1]))
        .collect::<String>();

    let expected_static_errors = STATIC_ERROR_RE
        .captures_iter(&test_source)
        .map(|captures| format!("{}Error: {}", &captures[1], &captures[2]))
        .collect::<VecDeque<_>>();

    let expected_runtime_error = RUNTIME_ERROR_RE
        .captures_iter(&test_source)
        .map(|captures| format!("RuntimeError: {}", &captures[1]))
        .at_most_one()
        .map_err(|_| miette!("should have at most one expected runtime error"))?;

    let tokens = match Scanner::new(&program_source, source_reference.clone())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(tokens) => tokens,
        Err(lex_error) => {
            return Ok(match_all_errors(
                [lex_error],
                expected_static_errors,
                &program_source,
            ))
        }
    };

    let (program, parse_errors) =
        Parser::parse(tokens.into_iter(), source_reference, ParserOpts::default());
    if !parse_errors.is_empty() || !expected_static_errors.is_empty() {
        return Ok(match_all_errors(
            parse_errors,
            expected_static_errors,
            &program_source,
        ));
    }

    let mut interpreter = Interpreter::new();
    let result = interpreter.interpret(&program);
    assert_eq!(
        interpreter.scope_depth(),
        0,
        "every scope opened during evaluation must be closed"
    );
    let stats = interpreter.finish();
    assert!(stats.is_balanced(), "unbalanced scope stats: {:?}", stats);

    let actual_output = match result {
        Ok(value) => match &expected_runtime_error {
            Some(expected_err) => {
                return Ok(Outcome::Failed {
                    msg: Some(format!("Expected runtime error:\n{}", expected_err)),
                })
            }
            None => format!("{:?}\n", value),
        },
        Err(err) => {
            return Ok(
                match match_errors(err, &expected_runtime_error, &program_source) {
                    Ok(()) => Outcome::Passed,
                    Err(msg) => Outcome::Failed { msg: Some(msg) },
                },
            )
        }
    };

    if expected_output.is_empty() {
        return Ok(Outcome::Passed);
    }
    Ok(compare_outputs(
        expected_output.split('\n').map(String::from).collect(),
        actual_output.split('\n').map(String::from).collect(),
    ))
}

fn match_all_errors<E: FmtError>(
    actual_errors: impl IntoIterator<Item = E>,
    mut expected_errors: VecDeque<String>,
    source: &str,
) -> Outcome {
    for actual_error in actual_errors {
        if let Err(msg) = match_errors(actual_error, &expected_errors.pop_front(), source) {
            return Outcome::Failed { msg: Some(msg) };
        }
    }
    if expected_errors.is_empty() {
        Outcome::Passed
    } else {
        Outcome::Failed {
            msg: Some(format!(
                "Expected errors:\n{}",
                expected_errors
                    .iter()
                    .map(|err| format!(" - {}\n", err))
                    .collect::<String>(),
            )),
        }
    }
}

fn match_errors<E: FmtError>(
    actual_error: E,
    expected_error: &Option<String>,
    source: &str,
) -> Result<(), String> {
    let actual_str = actual_error.fmt_error(source);
    match expected_error {
        Some(expected_str) if expected_str.trim() == actual_str.trim() => Ok(()),
        Some(expected_str) => Err(format!(
            "Errors do not match.\nExpected: {}\n  Actual: {}",
            expected_str, actual_str
        )),
        None => Err(format!("Unexpected error:\n{}", actual_str)),
    }
}

fn compare_outputs(expected_lines: Vec<String>, actual_lines: Vec<String>) -> Outcome {
    const EXPECTED: &str = "expected";
    const ACTUAL: &str = "actual";
    const NONE: &str = "<None>";

    fn max_len(lines: &[String], label: &str) -> usize {
        lines
            .iter()
            .map(|line| line.len())
            .max()
            .unwrap_or(0)
            .max(label.len())
    }

    let max_expected_len = max_len(&expected_lines, EXPECTED);
    let max_actual_len = max_len(&actual_lines, ACTUAL);

    let mut output_str = format!(
        "   | {:max_expected_len$} | {:max_actual_len$} \n",
        EXPECTED.bold(),
        ACTUAL.bold()
    );
    let line_count = expected_lines.len().max(actual_lines.len());
    let mut unmatched_count = 0usize;
    for i in 0..line_count {
        let expected_line = expected_lines.get(i);
        let actual_line = actual_lines.get(i);

        let is_match = expected_line == actual_line;
        if !is_match {
            unmatched_count += 1;
        }

        let colorify = |string: &str| {
            if is_match {
                string.green()
            } else {
                string.red()
            }
        };

        let result_char = if is_match { "✓" } else { "✗" };
        output_str.push_str(&format!(
            " {} | {:max_expected_len$} | {:max_actual_len$}\n",
            colorify(result_char),
            expected_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
            actual_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
        ));
    }

    if unmatched_count > 0 {
        Outcome::Failed {
            msg: Some(output_str),
        }
    } else {
        Outcome::Passed
    }
}

fn read_all_files(prefix: PathBuf) -> Result<Vec<PathBuf>> {
    let mut results = Vec::<PathBuf>::new();
    read_children(prefix, &mut results)?;
    results.sort();
    return Ok(results);

    fn read_children(prefix: PathBuf, results: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(prefix).into_diagnostic()? {
            let entry = entry.into_diagnostic()?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().into_diagnostic()?.is_dir() {
                read_children(entry.path(), results)?;
            } else {
                results.push(entry.path())
            }
        }
        Ok(())
    }
}

/// The one-line form expectation comments are written in: error kind,
/// variant, the data that identifies it, and the line it was reported on.
trait FmtError {
    fn fmt_error(&self, source: &str) -> String;
}
impl FmtError for LexError {
    fn fmt_error(&self, source: &str) -> String {
        match self {
            LexError::UnexpectedChar { character, at, .. } => format!(
                "LexError: UnexpectedChar {:?} {}",
                character,
                format_offset(at, source)
            ),
            LexError::UnterminatedText { at, .. } => {
                format!("LexError: UnterminatedText {}", format_offset(at, source))
            }
        }
    }
}
impl FmtError for ParseError {
    fn fmt_error(&self, source: &str) -> String {
        let detail = match self {
            ParseError::UnexpectedToken {
                actual,
                expected,
                found_at,
                ..
            } => format!(
                "UnexpectedToken found {:?} expected {:?} {}",
                actual,
                expected,
                format_span(found_at, source)
            ),
            ParseError::UnexpectedExpressionToken {
                actual, found_at, ..
            } => format!(
                "UnexpectedExpressionToken found {:?} {}",
                actual,
                format_span(found_at, source)
            ),
            ParseError::ExpectedSemicolon {
                actual, found_at, ..
            } => format!(
                "ExpectedSemicolon found {:?} {}",
                actual,
                format_span(found_at, source)
            ),
            ParseError::UnmatchedBlock {
                opener,
                expected,
                actual,
                found_at,
                ..
            } => format!(
                "UnmatchedBlock opened {} expected {:?} found {:?} {}",
                format_span(opener, source),
                expected,
                actual,
                format_span(found_at, source)
            ),
            ParseError::BindRequiresIdentifier { found_at, .. } => format!(
                "BindRequiresIdentifier {}",
                format_span(found_at, source)
            ),
            ParseError::ReturnOutsideFunction { found_at, .. } => format!(
                "ReturnOutsideFunction {}",
                format_span(found_at, source)
            ),
            ParseError::LocalOutsideFunctionBody { found_at, .. } => format!(
                "LocalOutsideFunctionBody {}",
                format_span(found_at, source)
            ),
            ParseError::DuplicateLocalMarker {
                first_at, found_at, ..
            } => format!(
                "DuplicateLocalMarker first {} {}",
                format_span(first_at, source),
                format_span(found_at, source)
            ),
            ParseError::InvalidFunctionName { name, found_at, .. } => format!(
                "InvalidFunctionName {} {}",
                name,
                format_span(found_at, source)
            ),
            ParseError::MissingFunctionBody { found_at, .. } => {
                format!("MissingFunctionBody {}", format_span(found_at, source))
            }
            ParseError::EmptyGuard { found_at, .. } => {
                format!("EmptyGuard {}", format_span(found_at, source))
            }
            ParseError::StatementInExpressionBlock { found_at, .. } => format!(
                "StatementInExpressionBlock {}",
                format_span(found_at, source)
            ),
            ParseError::InvalidCastTarget {
                actual, found_at, ..
            } => format!(
                "InvalidCastTarget found {:?} {}",
                actual,
                format_span(found_at, source)
            ),
            ParseError::NumberOutOfRange {
                lexeme, found_at, ..
            } => format!(
                "NumberOutOfRange {} {}",
                lexeme,
                format_span(found_at, source)
            ),
        };
        format!("ParseError: {}", detail)
    }
}
impl FmtError for RuntimeError {
    fn fmt_error(&self, source: &str) -> String {
        let detail = match self {
            RuntimeError::UndefinedIdentifier { name, found_at, .. } => format!(
                "UndefinedIdentifier {} {}",
                name,
                format_span(found_at, source)
            ),
            RuntimeError::ArityMismatch {
                expected_arity,
                actual_arity,
                found_at,
                ..
            } => format!(
                "ArityMismatch expected {} got {} {}",
                expected_arity,
                actual_arity,
                format_span(found_at, source)
            ),
            RuntimeError::InvalidCoercionTarget {
                actual_type,
                found_at,
                ..
            } => format!(
                "InvalidCoercionTarget {} {}",
                actual_type,
                format_span(found_at, source)
            ),
            RuntimeError::BindTargetUndefined { name, found_at, .. } => format!(
                "BindTargetUndefined {} {}",
                name,
                format_span(found_at, source)
            ),
            RuntimeError::OperandTypeError {
                expected_type,
                actual_type,
                operand_loc,
                operator,
                ..
            } => format!(
                "OperandTypeError {} expected {} got {} {}",
                operator,
                expected_type.fmt_a(),
                actual_type.fmt_a(),
                format_span(operand_loc, source)
            ),
            RuntimeError::UncallableValue {
                actual_type,
                found_at,
                ..
            } => format!(
                "UncallableValue {} {}",
                actual_type,
                format_span(found_at, source)
            ),
            RuntimeError::DivisionByZero { divisor_loc, .. } => {
                format!("DivisionByZero {}", format_span(divisor_loc, source))
            }
            RuntimeError::ArithmeticOverflow {
                operator, found_at, ..
            } => format!(
                "ArithmeticOverflow {} {}",
                operator,
                format_span(found_at, source)
            ),
            RuntimeError::InvalidCast {
                actual_type,
                target,
                found_at,
                ..
            } => format!(
                "InvalidCast {} to {} {}",
                actual_type,
                target,
                format_span(found_at, source)
            ),
        };
        format!("RuntimeError: {}", detail)
    }
}

fn format_offset(loc: &SourceOffset, source: &str) -> String {
    let target = loc.byte_offset().min(source.len());
    let line_no = source[..target].matches('\n').count() + 1;
    format!("l{}", line_no)
}
fn format_span(span: &SourceSpan, source: &str) -> String {
    format!("at {}", format_offset(&span.start(), source))
}
