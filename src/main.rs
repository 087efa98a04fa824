//! The `dynamix` command-line entry point: a REPL when run with no file, a
//! script runner when given one.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use dynamix::error::DynamixError;
use dynamix::vm::{InterpretResult, Vm};

/// Dynamically-typed scripting language: run a script, or start a REPL.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    file: Option<PathBuf>,

    /// Log verbosity.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    verbosity: LogLevel,

    /// Any further positional arguments are rejected; captured only so we
    /// can print the documented usage message ourselves instead of clap's.
    #[arg(trailing_var_arg = true, hide = true)]
    extra: Vec<String>,
}

#[derive(ValueEnum, Clone, Default, Debug)]
enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    simple_logger::init_with_level((&cli.verbosity).into()).expect("logger installs exactly once");

    if !cli.extra.is_empty() {
        eprintln!("Usage: dynamix <script>");
        return ExitCode::FAILURE;
    }

    match cli.file {
        Some(path) => run_file(&path),
        None => {
            repl();
            ExitCode::SUCCESS
        }
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let file = path.to_string_lossy().into_owned();

    #[cfg(feature = "debug_disassemble")]
    if let Ok(function) = dynamix::Compiler::compile(&file, &source) {
        dynamix::disassembler::disassemble_block(&function.block, &file);
    }

    let mut vm = Vm::new();
    match vm.run_code(&file, &source) {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError(msg) => {
            eprintln!("{}", msg);
            ExitCode::FAILURE
        }
        InterpretResult::RuntimeError(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn read_source(path: &PathBuf) -> Result<String, DynamixError> {
    let bytes = std::fs::read(path).map_err(|source| DynamixError::ReadFile {
        path: path.clone(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| DynamixError::NotUtf8 { path: path.clone() })
}

/// Reads lines from stdin, one at a time, feeding each to the same `Vm` so
/// globals persist between lines. A compile or runtime error is reported
/// but does not end the session.
fn repl() {
    info!("starting REPL");
    let mut vm = Vm::new();
    let stdin = io::stdin();
    loop {
        print!(">> ");
        if io::stdout().flush().is_err() {
            return;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return, // EOF
            Ok(_) => {}
            Err(_) => return,
        }
        if line.trim().is_empty() {
            continue;
        }
        match vm.run_code("stdin", &line) {
            InterpretResult::Ok => {}
            InterpretResult::CompileError(msg) => eprintln!("{}", msg),
            InterpretResult::RuntimeError(err) => eprintln!("{}", err),
        }
    }
}
