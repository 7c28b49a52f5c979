//! Parsed program representation and operator evaluation.
//!
//! Statements, values and operations are plain tagged enums; the session's
//! dispatch loop switches on them directly. Values carry a base integer and
//! a defer count; special-register tokens are desugared by the parser to
//! their negative register address, so a single representation covers
//! literals, memory references and device registers.

use crate::{ExecError, ExecErrorKind, Result};
use std::fmt;

/// An immutable, parsed Migol program. Statements are addressed by 1-based
/// index, matching the program counter convention.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statement at the given 1-based index, if in range.
    pub fn statement(&self, pc: i32) -> Option<&Statement> {
        if pc < 1 {
            return None;
        }
        self.statements.get(pc as usize - 1)
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

/// A value operand: `base` with `defers` dereference steps applied.
///
/// With zero defers the value is the base itself. Otherwise the first
/// resolution goes through the session's register path (so negative bases
/// read device registers) and the remaining `defers - 1` steps are plain
/// memory reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub base: i32,
    pub defers: u32,
}

impl Value {
    pub fn literal(base: i32) -> Self {
        Self { base, defers: 0 }
    }

    pub fn deferred(base: i32, defers: u32) -> Self {
        Self { base, defers }
    }
}

/// One parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Target value with a chain of operations applied left to right.
    Assignment { target: Value, ops: Vec<Operation> },
    /// Console output of a fetched value.
    ConsoleOut { value: Value, mode: OutputMode },
    /// `_`: no effect.
    Nop,
    /// A statement gated on `value cond 0`.
    Guarded {
        cond: Condition,
        value: Value,
        inner: Box<Statement>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `>`: emit the value as a character code.
    Char,
    /// `>-`: emit the value as decimal text.
    Int,
}

/// One link of an assignment chain: an operator and its right-hand operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub operand: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    ShrArith,
    ShrLogic,
    RotL,
    RotR,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl OpKind {
    /// Applies the operator to the current target value and the fetched
    /// operand. Arithmetic wraps; shift and rotate counts use the low five
    /// bits; comparisons yield 0 or 1. Division and remainder by zero abort
    /// with an execution error carrying `pc`.
    pub fn apply(self, current: i32, operand: i32, pc: i32) -> Result<i32> {
        let shift = operand as u32 & 31;
        Ok(match self {
            OpKind::Assign => operand,
            OpKind::Add => current.wrapping_add(operand),
            OpKind::Sub => current.wrapping_sub(operand),
            OpKind::Mul => current.wrapping_mul(operand),
            OpKind::Div => {
                if operand == 0 {
                    return Err(ExecError::new(ExecErrorKind::DivisionByZero, pc));
                }
                current.wrapping_div(operand)
            }
            OpKind::Rem => {
                if operand == 0 {
                    return Err(ExecError::new(ExecErrorKind::DivisionByZero, pc));
                }
                current.wrapping_rem(operand)
            }
            OpKind::And => current & operand,
            OpKind::Or => current | operand,
            OpKind::Xor => current ^ operand,
            OpKind::Shl => current.wrapping_shl(shift),
            OpKind::ShrArith => current.wrapping_shr(shift),
            OpKind::ShrLogic => ((current as u32).wrapping_shr(shift)) as i32,
            OpKind::RotL => current.rotate_left(shift),
            OpKind::RotR => current.rotate_right(shift),
            OpKind::Eq => (current == operand) as i32,
            OpKind::Ne => (current != operand) as i32,
            OpKind::Lt => (current < operand) as i32,
            OpKind::Gt => (current > operand) as i32,
            OpKind::Le => (current <= operand) as i32,
            OpKind::Ge => (current >= operand) as i32,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            OpKind::Assign => "",
            OpKind::Add => "$+",
            OpKind::Sub => "$-",
            OpKind::Mul => "$*",
            OpKind::Div => "$/",
            OpKind::Rem => "$%",
            OpKind::And => "$&",
            OpKind::Or => "$|",
            OpKind::Xor => "$^",
            OpKind::Shl => "$<<",
            OpKind::ShrArith => "$>>",
            OpKind::ShrLogic => "$>>>",
            OpKind::RotL => "$<<_",
            OpKind::RotR => "$>>_",
            OpKind::Eq => "$=",
            OpKind::Ne => "$<>",
            OpKind::Lt => "$<",
            OpKind::Gt => "$>",
            OpKind::Le => "$<=",
            OpKind::Ge => "$>=",
        }
    }
}

/// Guard comparison of a value against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl Condition {
    pub fn holds(self, value: i32) -> bool {
        match self {
            Condition::Gt => value > 0,
            Condition::Lt => value < 0,
            Condition::Ge => value >= 0,
            Condition::Le => value <= 0,
            Condition::Eq => value == 0,
            Condition::Ne => value != 0,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Condition::Gt => ">",
            Condition::Lt => "<",
            Condition::Ge => ">=",
            Condition::Le => "<=",
            Condition::Eq => "=",
            Condition::Ne => "<>",
        }
    }
}

// Rendering reproduces valid Migol source in a canonical form: values are
// written numerically, so register tokens appear as their addresses. The
// numeric form parses back to the same statement.

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.defers {
            write!(f, "[")?;
        }
        write!(f, "{}", self.base)?;
        for _ in 0..self.defers {
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}{}", self.kind.symbol(), self.operand)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assignment { target, ops } => {
                write!(f, "{target}")?;
                for op in ops {
                    write!(f, "{op}")?;
                }
                Ok(())
            }
            Statement::ConsoleOut { value, mode } => match mode {
                OutputMode::Char => write!(f, "{value}>"),
                OutputMode::Int => write!(f, "{value}>-"),
            },
            Statement::Nop => write!(f, "_"),
            Statement::Guarded { cond, value, inner } => {
                write!(f, "{inner}?{}{value}", cond.symbol())
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_wraps_like_a_register() {
        assert_eq!(OpKind::Add.apply(i32::MAX, 1, 1).unwrap(), i32::MIN);
        assert_eq!(OpKind::Mul.apply(1 << 30, 4, 1).unwrap(), 0);
        assert_eq!(OpKind::Div.apply(i32::MIN, -1, 1).unwrap(), i32::MIN);
    }

    #[test]
    fn division_by_zero_aborts() {
        let err = OpKind::Div.apply(5, 0, 7).unwrap_err();
        assert_eq!(err.pc, 7);
        assert_eq!(err.kind, ExecErrorKind::DivisionByZero);
        assert!(OpKind::Rem.apply(5, 0, 7).is_err());
    }

    #[test]
    fn shift_counts_use_low_five_bits() {
        assert_eq!(OpKind::Shl.apply(1, 33, 1).unwrap(), 2);
        assert_eq!(OpKind::ShrArith.apply(-8, 1, 1).unwrap(), -4);
        assert_eq!(OpKind::ShrLogic.apply(-1, 28, 1).unwrap(), 0xF);
        // A negative count masks to 31, matching the reference interpreter.
        assert_eq!(OpKind::Shl.apply(1, -1, 1).unwrap(), i32::MIN);
    }

    #[test]
    fn rotations_are_inverses() {
        let v = 0x12345678;
        for shift in 0..40 {
            let rotated = OpKind::RotL.apply(v, shift, 1).unwrap();
            assert_eq!(OpKind::RotR.apply(rotated, shift, 1).unwrap(), v);
        }
        assert_eq!(OpKind::RotR.apply(1, 1, 1).unwrap(), i32::MIN);
    }

    #[test]
    fn comparisons_produce_zero_or_one() {
        assert_eq!(OpKind::Eq.apply(3, 3, 1).unwrap(), 1);
        assert_eq!(OpKind::Ne.apply(3, 3, 1).unwrap(), 0);
        assert_eq!(OpKind::Lt.apply(-1, 0, 1).unwrap(), 1);
        assert_eq!(OpKind::Ge.apply(-1, 0, 1).unwrap(), 0);
    }

    #[test]
    fn conditions_compare_against_zero() {
        assert!(Condition::Ne.holds(5));
        assert!(!Condition::Ne.holds(0));
        assert!(Condition::Le.holds(0));
        assert!(Condition::Lt.holds(-1) && !Condition::Lt.holds(0));
    }

    #[test]
    fn statements_render_as_migol_syntax() {
        let stmt = Statement::Assignment {
            target: Value::literal(0),
            ops: vec![
                Operation {
                    kind: OpKind::Assign,
                    operand: Value::deferred(0, 1),
                },
                Operation {
                    kind: OpKind::Mul,
                    operand: Value::literal(2),
                },
            ],
        };
        assert_eq!(stmt.to_string(), "0<[0]<$*2");

        let guarded = Statement::Guarded {
            cond: Condition::Ne,
            value: Value::deferred(0, 1),
            inner: Box::new(Statement::Assignment {
                target: Value::literal(-1),
                ops: vec![Operation {
                    kind: OpKind::Assign,
                    operand: Value::literal(2),
                }],
            }),
        };
        assert_eq!(guarded.to_string(), "-1<2?<>[0]");

        let out = Statement::ConsoleOut {
            value: Value::literal(72),
            mode: OutputMode::Int,
        };
        assert_eq!(out.to_string(), "72>-");
        assert_eq!(Statement::Nop.to_string(), "_");
    }
}
