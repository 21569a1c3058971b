use colored::Colorize;
use miette::{Diagnostic, IntoDiagnostic, Report, Result};
use rustyline::error::ReadlineError;

use druim_rs::{ast::Program, Interpreter, Parser, ParserOpts, Scanner, SourceReference};

fn main() -> Result<()> {
    let args: Vec<_> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_prompt(),
        [file] if !file.starts_with("--") => run_file(file),
        _ => {
            eprintln!("Unrecognized arguments: {:?}", args);
            eprintln!("Usage: druim [file]");
            std::process::exit(64);
        }
    }
}

fn report_all_errors<E: Diagnostic + Send + Sync + 'static>(errors: impl IntoIterator<Item = E>) {
    for error in errors {
        println!("{:?}", Report::new(error));
    }
}

/// Scans and parses one source text, printing every diagnostic. Scanning is
/// fail-fast, so a lexical error yields no program at all.
fn parse_and_report_errors(file_name: &str, source: &str, parser_opts: ParserOpts) -> Option<Program> {
    let source_reference = SourceReference::new(file_name.to_string(), source.to_string());
    let tokens = match Scanner::new(source, source_reference.clone()).collect::<Result<Vec<_>, _>>() {
        Ok(tokens) => tokens,
        Err(error) => {
            report_all_errors([error]);
            return None;
        }
    };

    let (program, parser_errors) = Parser::parse(tokens.into_iter(), source_reference, parser_opts);
    if !parser_errors.is_empty() {
        report_all_errors(parser_errors);
        return None;
    }

    if cfg!(feature = "debug") {
        eprintln!("{} {}", "== program".dimmed(), program.source_reference.name());
        eprintln!("{}", program);
    }
    Some(program)
}

fn run_file(file_name: &str) -> Result<()> {
    let path = std::fs::canonicalize(file_name).into_diagnostic()?;
    let source = std::fs::read_to_string(&path).into_diagnostic()?;

    let program = match parse_and_report_errors(&path.to_string_lossy(), &source, ParserOpts::default()) {
        Some(program) => program,
        None => std::process::exit(65),
    };

    let mut interpreter = Interpreter::new();
    let result = interpreter.interpret(&program);
    interpreter.finish();
    if let Err(error) = result {
        report_all_errors([error]);
        std::process::exit(70);
    }

    Ok(())
}

fn run_prompt() -> Result<()> {
    let mut interpreter = Interpreter::new();
    let mut rl = rustyline::Editor::<()>::new();
    let mut repl_line: usize = 1;
    loop {
        match rl.readline(&format!("{}> ", repl_line)) {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                let file_name = format!("<repl-{}>", repl_line);
                if let Some(program) =
                    parse_and_report_errors(&file_name, &line, ParserOpts::default().for_repl())
                {
                    match interpreter.interpret(&program) {
                        Ok(value) => println!("==> {:?}", value),
                        Err(error) => println!("{:?}", Report::new(error)),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).into_diagnostic(),
        }
        repl_line += 1;
    }
    interpreter.finish();
    Ok(())
}
