//! Interpreter for the Migol 11 esoteric programming language.
//!
//! Migol programs run against a flat array of 32-bit signed integers. The
//! program counter is itself an addressable register, every OS-like service
//! (console, files, sockets, timers) is a memory-mapped special register at a
//! small negative address, and blocking work completes through a hardware
//! style interrupt queue.
//!
//! The two entry points are [`parse`], which turns program text into an
//! immutable [`Program`], and [`Session::run`], which executes it:
//!
//! ```
//! use migol::{parse, Session};
//!
//! let program = parse("0<3, 0<[0]<$*2").unwrap();
//! let mut session = Session::new(64);
//! session.run(&program).unwrap();
//! assert_eq!(session.memory()[0], 6);
//! ```

use thiserror::Error;

pub mod console;
pub mod io;
pub mod parse;
pub mod program;
pub mod registers;
pub mod session;
pub mod snapshot;
pub mod timer;

pub use console::{CaptureConsole, Console, StdConsole};
pub use parse::{parse, ParseError, ParseErrorKind};
pub use program::{Condition, OpKind, Operation, OutputMode, Program, Statement, Value};
pub use session::{Session, DEFAULT_MEMORY_SIZE};
pub use snapshot::{load_state, save_state, SnapshotError};

pub type Result<T> = std::result::Result<T, ExecError>;

/// Fault raised while executing a statement. Always aborts the run; the
/// failing 1-based statement index is carried alongside the cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at statement {pc}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub pc: i32,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, pc: i32) -> Self {
        Self { kind, pc }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecErrorKind {
    #[error("unmapped special register {0}")]
    UnmappedRegister(i32),
    #[error("write-only special register {0} used as a value")]
    WriteOnlyRegister(i32),
    #[error("memory address {0} out of range")]
    AddressOutOfRange(i32),
    #[error("program counter set to non-positive value {0}")]
    NonPositivePc(i32),
    #[error("division by zero")]
    DivisionByZero,
    #[error("console input failed: {0}")]
    ConsoleInput(String),
}
