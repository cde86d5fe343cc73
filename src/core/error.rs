// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types, context frames, and reporting for the assembler.
//!
//! Every failure in the pipeline is an [`AsmError`]. Errors collect
//! [`ContextFrame`]s while they travel outward through include, macro
//! and block expansion, so the rendered report shows the whole chain,
//! innermost first.

use std::fmt;
use std::io;
use std::rc::Rc;

/// Categories of assembler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Syntax,
    Expression,
    Argument,
    SymbolNotFound,
    AddressNotInitialized,
    AddressAlreadySet,
    ErrorDirective,
    Assembly,
    Io,
}

impl AsmErrorKind {
    fn label(self) -> &'static str {
        match self {
            AsmErrorKind::Syntax => "syntax error",
            AsmErrorKind::Expression => "expression error",
            AsmErrorKind::Argument => "argument error",
            AsmErrorKind::SymbolNotFound => "symbol not found",
            AsmErrorKind::AddressNotInitialized => "address not initialized",
            AsmErrorKind::AddressAlreadySet => "address already set",
            AsmErrorKind::ErrorDirective => "error directive",
            AsmErrorKind::Assembly => "assembly error",
            AsmErrorKind::Io => "i/o error",
        }
    }
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Location of a source statement, chained to the statement that caused it
/// to be read (an `INCLUDE` line) or expanded (a macro, `REPT` or `IRP` line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub text: Rc<str>,
    pub parent: Option<Rc<Position>>,
}

impl Position {
    pub fn new(file: Option<Rc<str>>, line: u32, text: &str, parent: Option<Rc<Position>>) -> Self {
        Self {
            file,
            line,
            text: Rc::from(text),
            parent,
        }
    }

    /// Same statement, re-rooted under a new expansion site.
    pub fn expanded_from(&self, site: &Rc<Position>) -> Self {
        Self {
            file: self.file.clone(),
            line: self.line,
            text: self.text.clone(),
            parent: Some(site.clone()),
        }
    }

    /// Frames for this position and every enclosing expansion site.
    pub fn frames(&self, column: Option<usize>) -> Vec<ContextFrame> {
        let mut frames = vec![ContextFrame::from_position(self, column)];
        let mut next = self.parent.as_deref();
        while let Some(pos) = next {
            frames.push(ContextFrame::from_position(pos, None));
            next = pos.parent.as_deref();
        }
        frames
    }
}

/// One step of the error context chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFrame {
    pub file: Option<String>,
    pub line: u32,
    pub column: Option<usize>,
    pub source: String,
}

impl ContextFrame {
    fn from_position(pos: &Position, column: Option<usize>) -> Self {
        Self {
            file: pos.file.as_deref().map(str::to_string),
            line: pos.line,
            column,
            source: pos.text.to_string(),
        }
    }

    fn location(&self) -> String {
        match &self.file {
            Some(file) => format!("{file}:{}", self.line),
            None => format!("{}", self.line),
        }
    }
}

/// An assembler error with a kind, message and accumulated context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
    frames: Vec<ContextFrame>,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
            frames: Vec::new(),
        }
    }

    pub fn syntax(msg: &str) -> Self {
        Self::new(AsmErrorKind::Syntax, msg, None)
    }

    pub fn expression(msg: &str) -> Self {
        Self::new(AsmErrorKind::Expression, msg, None)
    }

    pub fn argument(msg: &str, param: Option<&str>) -> Self {
        Self::new(AsmErrorKind::Argument, msg, param)
    }

    pub fn assembly(msg: &str, param: Option<&str>) -> Self {
        Self::new(AsmErrorKind::Assembly, msg, param)
    }

    pub fn symbol_not_found(name: &str) -> Self {
        Self::new(AsmErrorKind::SymbolNotFound, "Symbol not found", Some(name))
    }

    pub fn io(err: &io::Error, path: &str) -> Self {
        Self::new(AsmErrorKind::Io, &err.to_string(), Some(path))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }

    pub fn frames(&self) -> &[ContextFrame] {
        &self.frames
    }

    /// Attach the position chain of the statement that failed. Only the
    /// innermost statement is recorded; outer callers see the chain already.
    pub fn at(mut self, position: &Position, column: Option<usize>) -> Self {
        if self.frames.is_empty() {
            self.frames = position.frames(column);
        }
        self
    }

    pub fn format_with_context(&self, use_color: bool) -> String {
        let Some(first) = self.frames.first() else {
            return format!("ERROR: {} ({})", self.message, self.kind);
        };
        let mut out = String::new();
        out.push_str(&format!("{}: ERROR\n", first.location()));
        out.push_str(&format!(
            "{:>5} | {}\n",
            first.line,
            highlight_line(&first.source, first.column, use_color)
        ));
        out.push_str(&format!("ERROR: {} ({})", self.message, self.kind));
        for frame in &self.frames[1..] {
            out.push_str(&format!("\n  at {} | {}", frame.location(), frame.source.trim_end()));
        }
        out
    }
}

/// Mark the column in a source line, in red when colors are enabled.
pub fn highlight_line(line: &str, column: Option<usize>, use_color: bool) -> String {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(col) = column else {
        return line.to_string();
    };
    let idx = col.saturating_sub(1).min(line.len());
    if !line.is_char_boundary(idx) {
        return line.to_string();
    }
    let (head, tail) = line.split_at(idx);
    let mut chars = tail.chars();
    let marked = match chars.next() {
        Some(c) => c.to_string(),
        None => " ".to_string(),
    };
    if use_color {
        format!("{head}\x1b[1;31m{marked}\x1b[0m{}", chars.as_str())
    } else {
        format!("{head}[{marked}]{}", chars.as_str())
    }
}

/// Format an error message with an optional parameter.
pub fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(line: u32, text: &str, parent: Option<Rc<Position>>) -> Position {
        Position::new(Some(Rc::from("main.asm")), line, text, parent)
    }

    #[test]
    fn format_includes_line_and_message() {
        let err = AsmError::assembly("Bad thing", None).at(&position(12, " nop", None), None);
        let report = err.format_with_context(false);
        assert!(report.starts_with("main.asm:12: ERROR\n"), "{report}");
        assert!(report.ends_with("ERROR: Bad thing (assembly error)"), "{report}");
    }

    #[test]
    fn first_attached_context_wins() {
        let inner = position(3, " ld hl,test2", None);
        let outer = position(9, " test", None);
        let err = AsmError::symbol_not_found("test2").at(&inner, Some(8)).at(&outer, None);
        assert_eq!(err.frames().len(), 1);
        assert_eq!(err.frames()[0].line, 3);
        assert_eq!(err.frames()[0].column, Some(8));
    }

    #[test]
    fn expansion_chain_is_innermost_first() {
        let site = Rc::new(position(20, " mymacro 1", None));
        let body = position(4, " ld a,?x", None).expanded_from(&site);
        let err = AsmError::argument("Invalid arguments", None).at(&body, None);
        let lines: Vec<u32> = err.frames().iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![4, 20]);
        let report = err.format_with_context(false);
        assert!(report.starts_with("main.asm:4: ERROR"));
        assert!(report.contains("at main.asm:20 |  mymacro 1"));
    }

    #[test]
    fn highlight_marks_column() {
        assert_eq!(highlight_line("ld a,(", Some(6), false), "ld a,[(]");
        assert_eq!(highlight_line("nop", Some(10), false), "nop[ ]");
        assert_eq!(highlight_line("nop", None, true), "nop");
    }

    #[test]
    fn message_keeps_parameter() {
        let err = AsmError::symbol_not_found("foo");
        assert_eq!(err.to_string(), "Symbol not found: foo");
        assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
    }
}
