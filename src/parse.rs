//! Parser: Migol source text to a [`Program`].
//!
//! The grammar is line-oriented. A line holds one or more statements
//! separated by `,`; `//` starts a comment; a leading `#!` line is a shebang
//! and is skipped. Statements are a target value followed by an assignment
//! chain or a console-output suffix, optionally guarded (`?op value`) and
//! optionally labelled (`:name`). `"name=value` declares a named constant.
//!
//! Labels may be referenced before they are defined: references are kept
//! symbolic during the scan and substituted from the constant table once the
//! whole program has been read. All parser state is local to one [`parse`]
//! call, so concurrent parses do not interfere.

use crate::program::{Condition, OpKind, OutputMode, Program, Statement, Value};
use crate::registers;
use std::collections::HashMap;
use thiserror::Error;

/// Parses Migol source text into an executable program.
///
/// Parsing stops at the first syntax error; the error carries the offending
/// line, its 1-based line number and the 0-based character offset.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::default();
    for (index, line) in source.lines().enumerate() {
        if index == 0 && line.starts_with("#!") {
            parser.line_num += 1;
            continue;
        }
        parser.parse_line(line)?;
    }
    parser.resolve()
}

/// Syntax error with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// The offending source line, verbatim.
    pub line: String,
    /// 1-based line number.
    pub line_number: usize,
    /// 0-based character offset into the line.
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} in line {}", self.kind, self.line_number)?;
        writeln!(f, "\t{}", self.line)?;
        write!(f, "\t{}^", " ".repeat(self.column))
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unexpected /")]
    UnexpectedSlash,
    #[error("incorrect statement")]
    IncorrectStatement,
    #[error("unknown value type")]
    UnknownValueType,
    #[error("unknown assignment operator")]
    UnknownOperator,
    #[error("obsolete bitwise not operator (replace <$! with <$^-1)")]
    ObsoleteNotOperator,
    #[error("unknown conditional operator")]
    UnknownConditional,
    #[error("incorrect value")]
    IncorrectValue,
    #[error("incorrect name")]
    IncorrectName,
    #[error("incorrect constant declaration")]
    IncorrectConstant,
    #[error("unexpected character")]
    UnexpectedCharacter,
    #[error("unexpected end of line")]
    UnexpectedEndOfLine,
    #[error("mismatched dereference brackets")]
    MismatchedBrackets,
    #[error("write-only value used in reading position")]
    WriteOnlyValue,
    #[error("constant \"{0}\" defined multiple times")]
    DuplicateConstant(String),
    #[error("undefined label \"{0}\"")]
    UndefinedLabel(String),
}

// Values are kept symbolic until the whole program has been scanned, so
// forward label references can resolve.

#[derive(Debug, Clone, Copy)]
enum RawBase {
    Lit(i32),
    /// Index into `Parser::label_uses`.
    Label(usize),
}

#[derive(Debug, Clone, Copy)]
struct RawValue {
    base: RawBase,
    defers: u32,
}

#[derive(Debug, Clone, Copy)]
struct RawOp {
    kind: OpKind,
    operand: RawValue,
}

#[derive(Debug, Clone)]
enum RawStatement {
    Assignment {
        target: RawValue,
        ops: Vec<RawOp>,
    },
    ConsoleOut {
        value: RawValue,
        mode: OutputMode,
    },
    Nop,
    Guarded {
        cond: Condition,
        value: RawValue,
        inner: Box<RawStatement>,
    },
}

/// Whether a parsed value may appear in a reading position. Bare special
/// register tokens are targets only; one or more dereferences make them
/// readable through the register-get path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueClass {
    Readable,
    WriteOnly,
}

/// Position of the first use of a label, kept for error reporting when
/// resolution fails after the scan.
#[derive(Debug, Clone)]
struct LabelUse {
    name: String,
    line: String,
    line_number: usize,
    column: usize,
}

#[derive(Default)]
struct Parser {
    chars: Vec<char>,
    line: String,
    pos: usize,
    c: char,
    eol: bool,
    line_num: usize,
    statement_count: usize,
    statements: Vec<RawStatement>,
    constants: HashMap<String, i32>,
    label_ids: HashMap<String, usize>,
    label_uses: Vec<LabelUse>,
}

impl Parser {
    fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
        self.eol = pos >= self.chars.len();
        self.c = if self.eol { '\0' } else { self.chars[pos] };
    }

    fn next_char(&mut self) {
        self.set_pos(self.pos + 1);
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        self.error_at(kind, self.pos)
    }

    fn error_at(&self, kind: ParseErrorKind, column: usize) -> ParseError {
        ParseError {
            kind,
            line: self.line.clone(),
            line_number: self.line_num,
            column: column.min(self.chars.len()),
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<(), ParseError> {
        self.line_num += 1;
        self.line = line.to_string();
        self.chars = line.chars().collect();
        self.set_pos(0);
        loop {
            self.skip_spaces_and_comments()?;
            if self.eol {
                return Ok(());
            }
            if self.c == '"' {
                self.parse_constant_decl()?;
            } else {
                self.statement_count += 1;
                let stmt = self.parse_statement()?;
                self.statements.push(stmt);
            }
            self.skip_spaces_and_comments()?;
            if self.eol {
                return Ok(());
            }
            if self.c != ',' {
                return Err(self.error(ParseErrorKind::UnexpectedCharacter));
            }
            self.next_char();
        }
    }

    fn skip_spaces_and_comments(&mut self) -> Result<(), ParseError> {
        while !self.eol {
            if self.c == ' ' || self.c == '\t' {
                self.next_char();
            } else if self.c == '/' {
                self.next_char();
                if self.c != '/' {
                    return Err(self.error(ParseErrorKind::UnexpectedSlash));
                }
                self.set_pos(self.chars.len());
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<RawStatement, ParseError> {
        let mut stmt;
        if self.c == '_' {
            self.next_char();
            stmt = RawStatement::Nop;
        } else {
            let start = self.pos;
            let (value, class) = self.parse_value()?;
            if self.c == '>' {
                if class == ValueClass::WriteOnly {
                    return Err(self.error_at(ParseErrorKind::WriteOnlyValue, start));
                }
                self.next_char();
                let mode = if self.c == '-' {
                    self.next_char();
                    OutputMode::Int
                } else {
                    OutputMode::Char
                };
                stmt = RawStatement::ConsoleOut { value, mode };
            } else if self.c == '<' {
                let mut ops = Vec::new();
                while self.c == '<' {
                    ops.push(self.parse_operation()?);
                }
                stmt = RawStatement::Assignment { target: value, ops };
            } else {
                return Err(self.error(ParseErrorKind::IncorrectStatement));
            }
        }
        if self.c == '?' {
            let cond = self.parse_condition()?;
            let value = self.parse_read_value()?;
            stmt = RawStatement::Guarded {
                cond,
                value,
                inner: Box::new(stmt),
            };
        }
        if self.c == ':' {
            self.next_char();
            let name_start = self.pos;
            let name = self.parse_name()?;
            self.define_constant(name, self.statement_count as i32, name_start)?;
        }
        self.check_following_char()?;
        Ok(stmt)
    }

    fn parse_value(&mut self) -> Result<(RawValue, ValueClass), ParseError> {
        let mut defers = 0u32;
        while self.c == '[' {
            self.next_char();
            defers += 1;
        }
        if self.eol {
            return Err(self.error(ParseErrorKind::UnexpectedEndOfLine));
        }
        let mut register = true;
        let base = match self.c {
            '#' => {
                self.next_char();
                if self.c == '!' {
                    self.next_char();
                    RawBase::Lit(registers::BRANCH_LEAVE)
                } else {
                    RawBase::Lit(registers::PC)
                }
            }
            '@' => {
                self.next_char();
                RawBase::Lit(registers::CONSOLE_IN)
            }
            '!' => {
                self.next_char();
                if self.c == '#' {
                    self.next_char();
                    RawBase::Lit(registers::INT_HANDLER)
                } else {
                    RawBase::Lit(registers::INT_TRIGGER)
                }
            }
            '*' => {
                self.next_char();
                if self.c == '#' {
                    self.next_char();
                    RawBase::Lit(registers::INT_RETURN)
                } else if self.c == '!' {
                    self.next_char();
                    RawBase::Lit(registers::INT_RESULT)
                } else {
                    return Err(self.error(ParseErrorKind::UnknownValueType));
                }
            }
            '\\' => {
                self.next_char();
                RawBase::Lit(registers::INT_WAIT)
            }
            '\'' => {
                register = false;
                self.next_char();
                if self.eol {
                    return Err(self.error(ParseErrorKind::UnexpectedEndOfLine));
                }
                let v = self.c as i32;
                self.next_char();
                RawBase::Lit(v)
            }
            c if c == '-' || c.is_ascii_digit() => {
                register = false;
                RawBase::Lit(self.parse_integer()?)
            }
            c if is_name_start(c) => {
                register = false;
                let column = self.pos;
                let name = self.parse_name()?;
                RawBase::Label(self.label_ref(name, column))
            }
            _ => return Err(self.error(ParseErrorKind::UnknownValueType)),
        };
        let mut right = 0u32;
        while !self.eol && self.c == ']' {
            self.next_char();
            right += 1;
        }
        if right != defers {
            return Err(self.error(ParseErrorKind::MismatchedBrackets));
        }
        let class = if register && defers == 0 {
            ValueClass::WriteOnly
        } else {
            ValueClass::Readable
        };
        Ok((RawValue { base, defers }, class))
    }

    fn parse_read_value(&mut self) -> Result<RawValue, ParseError> {
        let start = self.pos;
        let (value, class) = self.parse_value()?;
        if class == ValueClass::WriteOnly {
            return Err(self.error_at(ParseErrorKind::WriteOnlyValue, start));
        }
        Ok(value)
    }

    fn parse_operation(&mut self) -> Result<RawOp, ParseError> {
        // Entered with the cursor on '<'.
        self.next_char();
        if self.c != '$' {
            let operand = self.parse_read_value()?;
            return Ok(RawOp {
                kind: OpKind::Assign,
                operand,
            });
        }
        self.next_char();
        if self.eol {
            return Err(self.error(ParseErrorKind::UnexpectedEndOfLine));
        }
        let opc = self.c;
        self.next_char();
        let kind = match opc {
            '+' => OpKind::Add,
            '-' => OpKind::Sub,
            '*' => OpKind::Mul,
            '/' => OpKind::Div,
            '%' => OpKind::Rem,
            '&' => OpKind::And,
            '|' => OpKind::Or,
            '^' => OpKind::Xor,
            '=' => OpKind::Eq,
            '<' => {
                if self.c == '<' {
                    self.next_char();
                    if self.c == '_' {
                        self.next_char();
                        OpKind::RotL
                    } else {
                        OpKind::Shl
                    }
                } else if self.c == '=' {
                    self.next_char();
                    OpKind::Le
                } else if self.c == '>' {
                    self.next_char();
                    OpKind::Ne
                } else {
                    OpKind::Lt
                }
            }
            '>' => {
                if self.c == '>' {
                    self.next_char();
                    if self.c == '>' {
                        self.next_char();
                        OpKind::ShrLogic
                    } else if self.c == '_' {
                        self.next_char();
                        OpKind::RotR
                    } else {
                        OpKind::ShrArith
                    }
                } else if self.c == '=' {
                    self.next_char();
                    OpKind::Ge
                } else {
                    OpKind::Gt
                }
            }
            '!' => {
                return Err(self.error_at(ParseErrorKind::ObsoleteNotOperator, self.pos - 1));
            }
            _ => {
                return Err(self.error_at(ParseErrorKind::UnknownOperator, self.pos - 1));
            }
        };
        let operand = self.parse_read_value()?;
        Ok(RawOp { kind, operand })
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        // Entered with the cursor on '?'.
        self.next_char();
        match self.c {
            '<' => {
                self.next_char();
                if self.c == '=' {
                    self.next_char();
                    Ok(Condition::Le)
                } else if self.c == '>' {
                    self.next_char();
                    Ok(Condition::Ne)
                } else {
                    Ok(Condition::Lt)
                }
            }
            '>' => {
                self.next_char();
                if self.c == '=' {
                    self.next_char();
                    Ok(Condition::Ge)
                } else {
                    Ok(Condition::Gt)
                }
            }
            '=' => {
                self.next_char();
                Ok(Condition::Eq)
            }
            _ => Err(self.error(ParseErrorKind::UnknownConditional)),
        }
    }

    fn parse_integer(&mut self) -> Result<i32, ParseError> {
        let start = self.pos;
        if self.c == '-' {
            self.next_char();
        }
        while !self.eol && self.c.is_ascii_digit() {
            self.next_char();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.is_empty() || text == "-" {
            return Err(self.error(ParseErrorKind::IncorrectValue));
        }
        text.parse()
            .map_err(|_| self.error(ParseErrorKind::IncorrectValue))
    }

    fn parse_name(&mut self) -> Result<String, ParseError> {
        if !is_name_start(self.c) {
            return Err(self.error(ParseErrorKind::IncorrectName));
        }
        let start = self.pos;
        self.next_char();
        while !self.eol && (is_name_start(self.c) || self.c == '_') {
            self.next_char();
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// `"name=value`: declares a constant without producing a statement.
    fn parse_constant_decl(&mut self) -> Result<(), ParseError> {
        self.next_char();
        let name_start = self.pos;
        let name = self.parse_name()?;
        if self.c != '=' {
            return Err(self.error(ParseErrorKind::IncorrectConstant));
        }
        self.next_char();
        let value = if self.c == '\'' {
            self.next_char();
            if self.eol {
                return Err(self.error(ParseErrorKind::UnexpectedEndOfLine));
            }
            let v = self.c as i32;
            self.next_char();
            v
        } else {
            self.parse_integer()?
        };
        self.define_constant(name, value, name_start)?;
        self.check_following_char()
    }

    fn define_constant(
        &mut self,
        name: String,
        value: i32,
        column: usize,
    ) -> Result<(), ParseError> {
        if self.constants.contains_key(&name) {
            return Err(self.error_at(ParseErrorKind::DuplicateConstant(name), column));
        }
        self.constants.insert(name, value);
        Ok(())
    }

    fn label_ref(&mut self, name: String, column: usize) -> usize {
        if let Some(&id) = self.label_ids.get(&name) {
            return id;
        }
        let id = self.label_uses.len();
        self.label_uses.push(LabelUse {
            name: name.clone(),
            line: self.line.clone(),
            line_number: self.line_num,
            column,
        });
        self.label_ids.insert(name, id);
        id
    }

    fn check_following_char(&self) -> Result<(), ParseError> {
        if self.eol || self.c == ' ' || self.c == '\t' || self.c == '/' || self.c == ',' {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedCharacter))
        }
    }

    // Substitutes the constant table into every symbolic reference.

    fn resolve(self) -> Result<Program, ParseError> {
        let mut statements = Vec::with_capacity(self.statements.len());
        for raw in &self.statements {
            statements.push(self.resolve_statement(raw)?);
        }
        Ok(Program::new(statements))
    }

    fn resolve_statement(&self, raw: &RawStatement) -> Result<Statement, ParseError> {
        Ok(match raw {
            RawStatement::Assignment { target, ops } => Statement::Assignment {
                target: self.resolve_value(target)?,
                ops: ops
                    .iter()
                    .map(|op| {
                        Ok(crate::program::Operation {
                            kind: op.kind,
                            operand: self.resolve_value(&op.operand)?,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            },
            RawStatement::ConsoleOut { value, mode } => Statement::ConsoleOut {
                value: self.resolve_value(value)?,
                mode: *mode,
            },
            RawStatement::Nop => Statement::Nop,
            RawStatement::Guarded { cond, value, inner } => Statement::Guarded {
                cond: *cond,
                value: self.resolve_value(value)?,
                inner: Box::new(self.resolve_statement(inner)?),
            },
        })
    }

    fn resolve_value(&self, raw: &RawValue) -> Result<Value, ParseError> {
        let base = match raw.base {
            RawBase::Lit(v) => v,
            RawBase::Label(id) => {
                let used = &self.label_uses[id];
                *self.constants.get(&used.name).ok_or_else(|| ParseError {
                    kind: ParseErrorKind::UndefinedLabel(used.name.clone()),
                    line: used.line.clone(),
                    line_number: used.line_number,
                    column: used.column,
                })?
            }
        };
        Ok(Value {
            base,
            defers: raw.defers,
        })
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}
