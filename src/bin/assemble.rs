use std::fs;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use lc3emu::asm::{assemble, AsmError};
use lc3emu::obj;

/// Assemble LC-3 source into an object image
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the assembly source file
    input: String,

    /// Path the object image is written to
    output: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!(
                "{} cannot read {}: {e}",
                "error:".bright_red().bold(),
                args.input
            );
            return ExitCode::FAILURE;
        }
    };

    let words = match assemble(&source) {
        Ok(words) => words,
        Err(err) => {
            eprint!("{}", render_diagnostic(&source, &err));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = fs::write(&args.output, obj::serialize(&words)) {
        eprintln!(
            "{} cannot write {}: {e}",
            "error:".bright_red().bold(),
            args.output
        );
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Show the failing line with a couple of lines of context either
/// side, the diagnostic pointing at it
fn render_diagnostic(source: &str, err: &AsmError) -> String {
    let error_line = err.line() as usize;
    let mut out = String::new();
    for (index, text) in source.lines().enumerate() {
        let number = index + 1;
        if number + 2 < error_line || number > error_line + 2 {
            continue;
        }
        let gutter = format!("{number:>4}: ");
        out.push_str(&format!("{}{}\n", gutter.cyan(), text.bright_white()));
        if number == error_line {
            let message = format!("      ^ {err}");
            out.push_str(&format!("{}\n", message.bright_red()));
        }
    }
    out
}
