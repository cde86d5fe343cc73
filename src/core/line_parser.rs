// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Character-level line parser.
//!
//! One call to [`LineParser::next_line`] consumes one logical line, which may
//! span several physical lines when an argument expression or a string is
//! still open at the end of a physical line. Each state owns whatever it is
//! accumulating; [`step`] moves from one state to the next and pushes
//! finished tokens into the [`ExprBuilder`] held by the line record.

use std::iter::Enumerate;
use std::rc::Rc;
use std::str::Lines;

use crate::core::error::{AsmError, Position};
use crate::core::expr::{BinaryOp, Expr, UnaryOp};
use crate::core::expr_builder::ExprBuilder;
use crate::core::scope::ScopeId;
use crate::core::source::Line;
use crate::core::text_utils::{is_ident_char, is_ident_start, is_space};

#[derive(Debug)]
enum State {
    LabelStart,
    LabelRead(String),
    LabelEnd(String),
    StatementStart,
    StatementRead(String),
    StatementEnd(String),
    Argument,
    Identifier(String),
    Number(String),
    Dollar(String),
    Text {
        bytes: Vec<u8>,
        quote: char,
        escape: bool,
    },
    Operator(char),
    Comment(String),
}

#[derive(Debug)]
enum Step {
    Next(State),
    /// Physical line ended inside the statement; resume on the next one.
    Wrap(State),
    Done,
}

#[derive(Debug)]
struct Record {
    label: Option<String>,
    mnemonic: Option<String>,
    comment: Option<String>,
    builder: ExprBuilder,
    scope: ScopeId,
}

impl Record {
    fn end_of_line(&self) -> Step {
        if self.builder.is_incomplete() {
            Step::Wrap(State::Argument)
        } else {
            Step::Done
        }
    }
}

pub struct LineParser<'a> {
    lines: Enumerate<Lines<'a>>,
    file: Option<Rc<str>>,
    parent: Option<Rc<Position>>,
    stopped: bool,
}

impl<'a> LineParser<'a> {
    pub fn new(text: &'a str, file: Option<Rc<str>>, parent: Option<Rc<Position>>) -> Self {
        Self {
            lines: text.lines().enumerate(),
            file,
            parent,
            stopped: false,
        }
    }

    /// Stop reading; used by `END`.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    fn position(&self, line: u32, text: &str) -> Position {
        Position::new(self.file.clone(), line, text, self.parent.clone())
    }

    /// Parse the next logical line into `scope`, or `None` at end of input.
    pub fn next_line(&mut self, scope: ScopeId) -> Result<Option<Line>, AsmError> {
        if self.stopped {
            return Ok(None);
        }
        let Some((index, first)) = self.lines.next() else {
            return Ok(None);
        };
        let line_no = index as u32 + 1;
        let mut text = first.to_string();
        let mut current = (line_no, first);
        let mut record = Record {
            label: None,
            mnemonic: None,
            comment: None,
            builder: ExprBuilder::new(),
            scope,
        };
        let mut state = State::LabelStart;
        loop {
            let (current_no, current_text) = current;
            let mut chars = current_text.chars();
            let mut column = 0usize;
            let resume = loop {
                let c = chars.next();
                column += 1;
                let next = step(state, c, &mut record).map_err(|err| {
                    err.at(&self.position(current_no, current_text), Some(column))
                })?;
                match (next, c) {
                    (Step::Next(next), Some(_)) => state = next,
                    (Step::Next(next) | Step::Wrap(next), None) => break Some(next),
                    (Step::Wrap(next), Some(_)) => break Some(next),
                    (Step::Done, _) => break None,
                }
            };
            let Some(resume) = resume else {
                break;
            };
            match self.lines.next() {
                Some((next_index, next_text)) => {
                    text.push('\n');
                    text.push_str(next_text);
                    current = (next_index as u32 + 1, next_text);
                    state = resume;
                }
                None => {
                    if matches!(resume, State::Text { .. }) {
                        return Err(AsmError::syntax("Unterminated string")
                            .at(&self.position(current_no, current_text), Some(column)));
                    }
                    break;
                }
            }
        }
        let position = Rc::new(self.position(line_no, &text));
        let arguments = record
            .builder
            .finish()
            .map_err(|err| err.at(&position, None))?;
        Ok(Some(Line::new(
            record.label,
            record.mnemonic,
            arguments,
            record.comment,
            position,
            scope,
        )))
    }
}

fn unexpected(c: char) -> AsmError {
    AsmError::syntax(&format!("Unexpected character '{c}'"))
}

/// Advance the parser by one character; `None` marks the end of a physical line.
fn step(state: State, c: Option<char>, rec: &mut Record) -> Result<Step, AsmError> {
    Ok(match state {
        State::LabelStart => match c {
            None => Step::Done,
            Some(';') => Step::Next(State::Comment(String::new())),
            Some(c) if is_space(c) => Step::Next(State::StatementStart),
            Some(c) if is_ident_start(c) => Step::Next(State::LabelRead(c.to_string())),
            Some(c) => return Err(unexpected(c)),
        },
        State::LabelRead(mut name) => match c {
            Some(c) if is_ident_char(c) => {
                name.push(c);
                Step::Next(State::LabelRead(name))
            }
            Some(':') => {
                rec.label = Some(name);
                Step::Next(State::StatementStart)
            }
            Some(c) if is_space(c) => Step::Next(State::LabelEnd(name)),
            _ => {
                rec.label = Some(name);
                return step(State::StatementStart, c, rec);
            }
        },
        State::LabelEnd(name) => match c {
            Some(c) if is_space(c) => Step::Next(State::LabelEnd(name)),
            Some(':') => {
                rec.label = Some(name);
                Step::Next(State::StatementStart)
            }
            _ => {
                rec.label = Some(name);
                return step(State::StatementStart, c, rec);
            }
        },
        State::StatementStart => match c {
            None => Step::Done,
            Some(';') => Step::Next(State::Comment(String::new())),
            Some(c) if is_space(c) => Step::Next(State::StatementStart),
            Some(c) if is_ident_start(c) => Step::Next(State::StatementRead(c.to_string())),
            Some(c) => return Err(unexpected(c)),
        },
        State::StatementRead(mut name) => match c {
            Some(c) if is_ident_char(c) => {
                name.push(c);
                Step::Next(State::StatementRead(name))
            }
            Some(':') if rec.label.is_none() => {
                rec.label = Some(name);
                Step::Next(State::StatementStart)
            }
            Some(c) if is_space(c) => Step::Next(State::StatementEnd(name)),
            _ => {
                rec.mnemonic = Some(name);
                return step(State::Argument, c, rec);
            }
        },
        State::StatementEnd(name) => match c {
            Some(c) if is_space(c) => Step::Next(State::StatementEnd(name)),
            Some(':') if rec.label.is_none() => {
                rec.label = Some(name);
                Step::Next(State::StatementStart)
            }
            _ => {
                rec.mnemonic = Some(name);
                return step(State::Argument, c, rec);
            }
        },
        State::Argument => match c {
            None => rec.end_of_line(),
            Some(';') => Step::Next(State::Comment(String::new())),
            Some(c) if is_space(c) => Step::Next(State::Argument),
            Some(c) if rec.builder.expects_value() => value_start(c, rec)?,
            Some(c) => operator_start(c, rec)?,
        },
        State::Identifier(mut name) => match c {
            Some(c) if is_ident_char(c) => {
                name.push(c);
                Step::Next(State::Identifier(name))
            }
            Some('\'') if name.eq_ignore_ascii_case("af") => {
                name.push('\'');
                rec.builder.push_value(Expr::identifier(name, rec.scope))?;
                Step::Next(State::Argument)
            }
            _ => {
                rec.builder.push_value(Expr::identifier(name, rec.scope))?;
                return step(State::Argument, c, rec);
            }
        },
        State::Number(mut text) => match c {
            Some(c) if c.is_ascii_alphanumeric() => {
                text.push(c);
                Step::Next(State::Number(text))
            }
            _ => {
                rec.builder.push_value(Expr::Integer(parse_number(&text)?))?;
                return step(State::Argument, c, rec);
            }
        },
        State::Dollar(mut digits) => match c {
            Some(c) if c.is_ascii_hexdigit() => {
                digits.push(c);
                Step::Next(State::Dollar(digits))
            }
            _ => {
                let value = if digits.is_empty() {
                    Expr::identifier("$", rec.scope)
                } else {
                    Expr::Integer(parse_radix(&digits, 16, &digits)?)
                };
                rec.builder.push_value(value)?;
                return step(State::Argument, c, rec);
            }
        },
        State::Text {
            mut bytes,
            quote,
            escape,
        } => match c {
            None if quote == '"' => {
                bytes.push(b'\n');
                Step::Wrap(State::Text {
                    bytes,
                    quote,
                    escape: false,
                })
            }
            None => return Err(AsmError::syntax("Unterminated character literal")),
            Some(c) if escape => {
                bytes.push(unescape(c)?);
                Step::Next(State::Text {
                    bytes,
                    quote,
                    escape: false,
                })
            }
            Some('\\') => Step::Next(State::Text {
                bytes,
                quote,
                escape: true,
            }),
            Some(c) if c == quote => {
                let value = if quote == '\'' {
                    match bytes.as_slice() {
                        [b] => Expr::Character(*b),
                        _ => {
                            return Err(AsmError::syntax(
                                "Character literal must contain exactly one character",
                            ))
                        }
                    }
                } else {
                    Expr::String(bytes)
                };
                rec.builder.push_value(value)?;
                Step::Next(State::Argument)
            }
            Some(c) => {
                let byte = u8::try_from(u32::from(c))
                    .map_err(|_| AsmError::syntax("Character outside the 8-bit range"))?;
                bytes.push(byte);
                Step::Next(State::Text {
                    bytes,
                    quote,
                    escape,
                })
            }
        },
        State::Operator(first) => {
            let pair = match (first, c) {
                ('<', Some('<')) => Some(BinaryOp::Shl),
                ('<', Some('=')) => Some(BinaryOp::Le),
                ('>', Some('>')) => Some(BinaryOp::Shr),
                ('>', Some('=')) => Some(BinaryOp::Ge),
                ('=', Some('=')) => Some(BinaryOp::Eq),
                ('!', Some('=')) => Some(BinaryOp::Ne),
                ('&', Some('&')) => Some(BinaryOp::LogicAnd),
                ('|', Some('|')) => Some(BinaryOp::LogicOr),
                _ => None,
            };
            if let Some(op) = pair {
                rec.builder.push_binary(op)?;
                Step::Next(State::Argument)
            } else {
                let op = match first {
                    '<' => BinaryOp::Lt,
                    '>' => BinaryOp::Gt,
                    '=' => BinaryOp::Eq,
                    '&' => BinaryOp::BitAnd,
                    '|' => BinaryOp::BitOr,
                    other => return Err(unexpected(other)),
                };
                rec.builder.push_binary(op)?;
                return step(State::Argument, c, rec);
            }
        }
        State::Comment(mut text) => match c {
            None => {
                match &mut rec.comment {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&text);
                    }
                    None => rec.comment = Some(text),
                }
                rec.end_of_line()
            }
            Some(c) => {
                text.push(c);
                Step::Next(State::Comment(text))
            }
        },
    })
}

fn value_start(c: char, rec: &mut Record) -> Result<Step, AsmError> {
    let unary = match c {
        '+' => Some(UnaryOp::Plus),
        '-' => Some(UnaryOp::Minus),
        '~' => Some(UnaryOp::BitNot),
        '!' => Some(UnaryOp::LogicNot),
        _ => None,
    };
    if let Some(op) = unary {
        rec.builder.push_unary(op)?;
        return Ok(Step::Next(State::Argument));
    }
    match c {
        '$' => Ok(Step::Next(State::Dollar(String::new()))),
        '%' | '#' => Ok(Step::Next(State::Number(c.to_string()))),
        '"' | '\'' => Ok(Step::Next(State::Text {
            bytes: Vec::new(),
            quote: c,
            escape: false,
        })),
        '(' => {
            rec.builder.open_group()?;
            Ok(Step::Next(State::Argument))
        }
        ')' => {
            rec.builder.close_group()?;
            Ok(Step::Next(State::Argument))
        }
        c if c.is_ascii_digit() => Ok(Step::Next(State::Number(c.to_string()))),
        c if is_ident_start(c) => Ok(Step::Next(State::Identifier(c.to_string()))),
        c => Err(unexpected(c)),
    }
}

fn operator_start(c: char, rec: &mut Record) -> Result<Step, AsmError> {
    let builder = &mut rec.builder;
    let binary = |builder: &mut ExprBuilder, op| -> Result<Step, AsmError> {
        builder.push_binary(op)?;
        Ok(Step::Next(State::Argument))
    };
    match c {
        '.' => builder.push_member()?,
        ',' => builder.push_sequence()?,
        '?' => builder.push_question()?,
        ':' => builder.push_colon()?,
        ')' => builder.close_group()?,
        '[' => builder.open_index()?,
        ']' => builder.close_index()?,
        '*' => return binary(builder, BinaryOp::Multiply),
        '/' => return binary(builder, BinaryOp::Divide),
        '%' => return binary(builder, BinaryOp::Mod),
        '+' => return binary(builder, BinaryOp::Add),
        '-' => return binary(builder, BinaryOp::Subtract),
        '^' => return binary(builder, BinaryOp::BitXor),
        '<' | '>' | '=' | '!' | '&' | '|' => return Ok(Step::Next(State::Operator(c))),
        c if c.is_ascii_digit()
            || is_ident_start(c)
            || matches!(c, '(' | '"' | '\'' | '$' | '#') =>
        {
            builder.push_annotation()?;
            return value_start(c, rec);
        }
        c => return Err(unexpected(c)),
    }
    Ok(Step::Next(State::Argument))
}

fn unescape(c: char) -> Result<u8, AsmError> {
    Ok(match c {
        '0' => 0x00,
        'a' => 0x07,
        't' => b'\t',
        'n' => b'\n',
        'f' => 0x0c,
        'r' => b'\r',
        'e' => 0x1b,
        '"' => b'"',
        '\'' => b'\'',
        '\\' => b'\\',
        other => {
            return Err(AsmError::syntax(&format!(
                "Invalid escape sequence '\\{other}'"
            )))
        }
    })
}

fn parse_radix(digits: &str, radix: u32, original: &str) -> Result<i64, AsmError> {
    if digits.is_empty() {
        return Err(AsmError::syntax(&format!("Invalid number: {original}")));
    }
    u64::from_str_radix(digits, radix)
        .map(|v| v as i64)
        .map_err(|_| AsmError::syntax(&format!("Invalid number: {original}")))
}

/// Parse a numeric literal: `0x`/`#`/`%` prefixes and `H`/`O`/`Q`/`B` suffixes.
pub fn parse_number(text: &str) -> Result<i64, AsmError> {
    let lower = text.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("0x").or_else(|| lower.strip_prefix('#')) {
        return parse_radix(rest, 16, text);
    }
    if let Some(rest) = lower.strip_prefix('%') {
        return parse_radix(rest, 2, text);
    }
    if let Some(rest) = lower.strip_suffix('h') {
        return parse_radix(rest, 16, text);
    }
    if let Some(rest) = lower.strip_suffix('o').or_else(|| lower.strip_suffix('q')) {
        return parse_radix(rest, 8, text);
    }
    if let Some(rest) = lower.strip_suffix('b') {
        if !rest.is_empty() && rest.chars().all(|c| c == '0' || c == '1') {
            return parse_radix(rest, 2, text);
        }
    }
    parse_radix(&lower, 10, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AsmErrorKind;
    use crate::core::scope::Scopes;

    fn parse_all(text: &str) -> Result<Vec<Line>, AsmError> {
        let mut scopes = Scopes::new();
        let root = scopes.create(None);
        let mut parser = LineParser::new(text, Some(Rc::from("test.asm")), None);
        let mut lines = Vec::new();
        while let Some(line) = parser.next_line(scopes.create(Some(root)))? {
            lines.push(line);
        }
        Ok(lines)
    }

    fn parse_one(text: &str) -> Line {
        let mut lines = parse_all(text).unwrap();
        assert_eq!(lines.len(), 1, "expected one logical line");
        lines.remove(0)
    }

    fn eval(text: &str) -> i64 {
        let line = parse_one(&format!(" db {text}"));
        line.arguments.unwrap().integer(&Scopes::new()).unwrap()
    }

    #[test]
    fn parses_label_mnemonic_arguments_comment() {
        let line = parse_one("start: ld a,(hl) ; load");
        assert_eq!(line.label.as_deref(), Some("start"));
        assert_eq!(line.mnemonic.as_deref(), Some("ld"));
        assert_eq!(line.comment.as_deref(), Some(" load"));
        match line.arguments.unwrap() {
            Expr::Sequence(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[1], Expr::Group(_)));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn column_zero_identifiers_are_labels() {
        let line = parse_one("test");
        assert_eq!(line.label.as_deref(), Some("test"));
        assert!(line.mnemonic.is_none());

        let line = parse_one("value equ 5");
        assert_eq!(line.label.as_deref(), Some("value"));
        assert_eq!(line.mnemonic.as_deref(), Some("equ"));

        let line = parse_one("  inner:");
        assert_eq!(line.label.as_deref(), Some("inner"));
        assert!(line.mnemonic.is_none());

        let line = parse_one("  nop");
        assert!(line.label.is_none());
        assert_eq!(line.mnemonic.as_deref(), Some("nop"));
    }

    #[test]
    fn number_formats() {
        assert_eq!(eval("100H"), 0x100);
        assert_eq!(eval("0FFh"), 0xFF);
        assert_eq!(eval("0x1F"), 0x1F);
        assert_eq!(eval("#C000"), 0xC000);
        assert_eq!(eval("$C0"), 0xC0);
        assert_eq!(eval("%1010"), 10);
        assert_eq!(eval("1010B"), 10);
        assert_eq!(eval("17O"), 15);
        assert_eq!(eval("42"), 42);
    }

    #[test]
    fn operator_precedence() {
        assert_eq!(eval("2 + 3 * 4"), 14);
        assert_eq!(eval("1 << 4 | 1"), 17);
        assert_eq!(eval("10 - 4 - 3"), 3);
        assert_eq!(eval("-2 * 3"), -6);
        assert_eq!(eval("3 >= 3 && 2 != 1"), 1);
        assert_eq!(eval("1 = 1 ? 7 : 8"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("\"abc\"[1]"), i64::from(b'b'));
    }

    #[test]
    fn question_mark_continues_identifiers() {
        let line = parse_one(" db flag ? 2 : 3");
        assert!(matches!(line.arguments, Some(Expr::IfElse { .. })));

        let line = parse_one(" db ?v");
        assert_eq!(line.arguments.as_ref().and_then(Expr::as_identifier), Some("?v"));

        let err = parse_all(" db flag?2:3").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Expression);
    }

    #[test]
    fn strings_and_escapes() {
        let line = parse_one(" db \"a\\tb\\\"\",'\\n'");
        match line.arguments.unwrap() {
            Expr::Sequence(items) => {
                assert!(matches!(&items[0], Expr::String(b) if b == b"a\tb\""));
                assert!(matches!(items[1], Expr::Character(b'\n')));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn character_literal_must_be_single() {
        let err = parse_all(" db 'ab'").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Syntax);
        let err = parse_all(" db 'a").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Syntax);
    }

    #[test]
    fn incomplete_expressions_continue_on_next_line() {
        let lines = parse_all(" db 1,\n    2, ; more\n    3\n nop").unwrap();
        assert_eq!(lines.len(), 2);
        match lines[0].arguments.as_ref().unwrap() {
            Expr::Sequence(items) => assert_eq!(items.len(), 3),
            other => panic!("expected sequence, got {other:?}"),
        }
        assert_eq!(lines[1].mnemonic.as_deref(), Some("nop"));
        assert_eq!(lines[1].position.line, 4);
    }

    #[test]
    fn strings_continue_across_lines() {
        let line = parse_one(" db \"ab\ncd\"");
        assert!(matches!(line.arguments, Some(Expr::String(ref b)) if b == b"ab\ncd"));
    }

    #[test]
    fn af_shadow_is_one_identifier() {
        let line = parse_one(" ex af,af'");
        match line.arguments.unwrap() {
            Expr::Sequence(items) => assert_eq!(items[1].as_identifier(), Some("af'")),
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn annotations_and_bare_dollar() {
        let line = parse_one(" include once \"lib.asm\"");
        assert!(matches!(
            line.arguments,
            Some(Expr::Annotation { ref annotation, .. }) if annotation == "once"
        ));
        let line = parse_one(" jr $");
        assert_eq!(line.arguments.unwrap().as_identifier(), Some("$"));
    }

    #[test]
    fn syntax_errors_carry_column() {
        let err = parse_all(" ld a,@@ }").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Syntax);
        assert_eq!(err.frames()[0].column, Some(10));
        assert_eq!(err.frames()[0].file.as_deref(), Some("test.asm"));
    }

    #[test]
    fn unclosed_group_is_expression_error() {
        let err = parse_all(" ld a,(hl").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Expression);
    }
}
