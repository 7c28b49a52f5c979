use anyhow::Context;
use clap::Parser;
use migol::{load_state, parse, save_state, Session};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "migol")]
#[command(version, about = "Interpreter for the Migol 11 esoteric programming language")]
struct Args {
    /// Migol program file
    program: PathBuf,

    /// Number of memory cells; decimal suffixes "k" and "m" are accepted
    #[arg(short = 'm', long = "memory", default_value = "1048576", value_parser = parse_memory_size)]
    memory: usize,

    /// Trace executed statements to stderr
    #[arg(long)]
    trace: bool,

    /// Restore a state snapshot before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Save a state snapshot after a successful run
    #[arg(long)]
    save_state: Option<PathBuf>,
}

fn parse_memory_size(raw: &str) -> Result<usize, String> {
    let raw = raw.trim();
    let (digits, multiplier) = if let Some(rest) = raw.strip_suffix(['k', 'K']) {
        (rest, 1_000)
    } else if let Some(rest) = raw.strip_suffix(['m', 'M']) {
        (rest, 1_000_000)
    } else {
        (raw, 1)
    };
    let cells: usize = digits
        .parse()
        .map_err(|_| format!("invalid memory size \"{raw}\""))?;
    cells
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory size \"{raw}\" is too large"))
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let source = std::fs::read_to_string(&args.program)
        .with_context(|| format!("failed to read {}", args.program.display()))?;

    let program = match parse(&source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("parsing error: {err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut session = Session::new(args.memory);
    if args.trace {
        session.set_trace(true);
    }
    if let Some(path) = &args.load_state {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        load_state(&mut session, file)
            .with_context(|| format!("failed to load state from {}", path.display()))?;
    }

    if let Err(err) = session.run(&program) {
        eprintln!("execution error: {err}");
        return Ok(ExitCode::FAILURE);
    }

    if let Some(path) = &args.save_state {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        save_state(&session, file)
            .with_context(|| format!("failed to save state to {}", path.display()))?;
    }
    Ok(ExitCode::SUCCESS)
}
