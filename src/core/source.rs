// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lines, sources and the block-structured source reader.
//!
//! [`SourceBuilder`] reads lines with the [`LineParser`] and groups the
//! bodies of block statements (`MACRO`, `REPT`, `IRP`, `PROC`, `IF`,
//! `SECTION`) into nested [`Source`]s. `INCLUDE` is spliced in place and
//! `INCBIN` paths are resolved while reading, relative to the including
//! file first and then along the include directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::trace;

use crate::core::directive::Directive;
use crate::core::error::{AsmError, AsmErrorKind, Position};
use crate::core::expr::{Expr, ScopeMap};
use crate::core::line_parser::LineParser;
use crate::core::scope::{ScopeId, Scopes};
use crate::core::text_utils::{decode_latin1, directive_key};
use crate::instructions::InstructionFactory;

/// One logical source statement.
#[derive(Debug, Clone)]
pub struct Line {
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub arguments: Option<Expr>,
    pub comment: Option<String>,
    pub position: Rc<Position>,
    /// Scope owned by this line; its address is the line's address.
    pub scope: ScopeId,
    pub directive: Directive,
    /// Set during expansion.
    pub factory: Option<Rc<dyn InstructionFactory>>,
}

impl Line {
    pub fn new(
        label: Option<String>,
        mnemonic: Option<String>,
        arguments: Option<Expr>,
        comment: Option<String>,
        position: Rc<Position>,
        scope: ScopeId,
    ) -> Self {
        Self {
            label,
            mnemonic,
            arguments,
            comment,
            position,
            scope,
            directive: Directive::Instruction,
            factory: None,
        }
    }

    /// Comma-separated arguments; empty when the line has none.
    pub fn argument_list(&self) -> Vec<&Expr> {
        self.arguments
            .as_ref()
            .map(Expr::elements)
            .unwrap_or_default()
    }

    /// Mnemonic normalized for directive matching.
    pub fn directive_key(&self) -> Option<String> {
        self.mnemonic.as_deref().map(directive_key)
    }

    /// Copy the line into a fresh scope whose parent is the mapped parent of
    /// the original, recording the scope mapping for nested expressions.
    pub fn copy(&self, map: &mut ScopeMap, scopes: &mut Scopes, site: &Rc<Position>) -> Line {
        let parent = scopes
            .parent(self.scope)
            .map(|p| map.get(&p).copied().unwrap_or(p));
        let scope = scopes.create(parent);
        map.insert(self.scope, scope);
        Line {
            label: self.label.clone(),
            mnemonic: self.mnemonic.clone(),
            arguments: self.arguments.as_ref().map(|args| args.copy(map)),
            comment: self.comment.clone(),
            position: Rc::new(self.position.expanded_from(site)),
            scope,
            directive: self.directive.copy(map, scopes, site),
            factory: None,
        }
    }
}

/// Lines read into one scope.
#[derive(Debug, Clone)]
pub struct Source {
    pub scope: ScopeId,
    pub lines: Vec<Line>,
}

impl Source {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            lines: Vec::new(),
        }
    }

    pub fn copy(&self, map: &mut ScopeMap, scopes: &mut Scopes, site: &Rc<Position>) -> Source {
        let scope = map.get(&self.scope).copied().unwrap_or(self.scope);
        let lines = self
            .lines
            .iter()
            .map(|line| line.copy(map, scopes, site))
            .collect();
        Source { scope, lines }
    }
}

const TERMINATORS: &[&str] = &["endm", "endp", "else", "endif", "ends"];

pub struct SourceBuilder<'a> {
    scopes: &'a mut Scopes,
    include_dirs: &'a [PathBuf],
    loaded: &'a mut HashSet<PathBuf>,
}

impl<'a> SourceBuilder<'a> {
    pub fn new(
        scopes: &'a mut Scopes,
        include_dirs: &'a [PathBuf],
        loaded: &'a mut HashSet<PathBuf>,
    ) -> Self {
        Self {
            scopes,
            include_dirs,
            loaded,
        }
    }

    /// Read source text into `scope`.
    pub fn parse_text(
        &mut self,
        text: &str,
        file: Option<&Path>,
        scope: ScopeId,
        parent: Option<Rc<Position>>,
    ) -> Result<Source, AsmError> {
        let name = file.map(|path| Rc::from(path.display().to_string()));
        let mut parser = LineParser::new(text, name, parent);
        let base = file.and_then(Path::parent);
        let (lines, _) = self.read_lines(&mut parser, base, scope, &[])?;
        Ok(Source { scope, lines })
    }

    /// Read a source file into `scope`, recording it as loaded.
    pub fn parse_file(
        &mut self,
        path: &Path,
        scope: ScopeId,
        parent: Option<Rc<Position>>,
    ) -> Result<Source, AsmError> {
        let bytes = fs::read(path).map_err(|err| AsmError::io(&err, &path.display().to_string()))?;
        if let Ok(canonical) = path.canonicalize() {
            self.loaded.insert(canonical);
        }
        self.parse_text(&decode_latin1(&bytes), Some(path), scope, parent)
    }

    /// Read lines until end of input or one of `terminators`, which is
    /// returned separately.
    fn read_lines(
        &mut self,
        parser: &mut LineParser<'_>,
        base: Option<&Path>,
        scope: ScopeId,
        terminators: &[&str],
    ) -> Result<(Vec<Line>, Option<Line>), AsmError> {
        let mut lines = Vec::new();
        loop {
            let line_scope = self.scopes.create(Some(scope));
            let Some(mut line) = parser.next_line(line_scope)? else {
                return Ok((lines, None));
            };
            let key = line.directive_key();
            let Some(key) = key.as_deref() else {
                lines.push(line);
                continue;
            };
            if terminators.contains(&key) {
                return Ok((lines, Some(line)));
            }
            match key {
                "macro" => {
                    let body = self.read_body(parser, base, line.scope, &["endm"], &line)?;
                    line.directive = Directive::Macro(Rc::new(body));
                }
                "rept" => {
                    let body = self.read_body(parser, base, line.scope, &["endm"], &line)?;
                    line.directive = Directive::Rept(Rc::new(body));
                }
                "irp" => {
                    let body = self.read_body(parser, base, line.scope, &["endm"], &line)?;
                    line.directive = Directive::Irp(Rc::new(body));
                }
                "proc" => {
                    let body = self.read_body(parser, base, line.scope, &["endp"], &line)?;
                    line.directive = Directive::Proc(body);
                }
                "section" => {
                    let body = self.read_body(parser, base, scope, &["ends"], &line)?;
                    line.directive = Directive::Section(body);
                }
                "if" => {
                    let (mut then_lines, end) =
                        self.read_lines(parser, base, scope, &["else", "endif"])?;
                    let end = end.ok_or_else(|| missing_terminator(&["else", "endif"], &line))?;
                    let has_else = end.directive_key().as_deref() == Some("else");
                    then_lines.push(end);
                    let else_branch = if has_else {
                        Some(self.read_body(parser, base, scope, &["endif"], &line)?)
                    } else {
                        None
                    };
                    line.directive = Directive::If {
                        then_branch: Source {
                            scope,
                            lines: then_lines,
                        },
                        else_branch,
                    };
                }
                "equ" => line.directive = Directive::Equ,
                "ds" | "defs" => line.directive = Directive::Space,
                "include" => {
                    let included = self
                        .include(&line, base, scope)
                        .map_err(|err| err.at(&line.position, None))?;
                    lines.push(line);
                    lines.extend(included);
                    continue;
                }
                "incbin" => {
                    let path = self
                        .incbin_path(&line, base)
                        .map_err(|err| err.at(&line.position, None))?;
                    line.directive = Directive::Incbin(path);
                }
                "end" => parser.stop(),
                other if TERMINATORS.contains(&other) => {
                    return Err(AsmError::assembly(
                        "Unexpected block terminator",
                        line.mnemonic.as_deref(),
                    )
                    .at(&line.position, None));
                }
                _ => {}
            }
            lines.push(line);
        }
    }

    /// Read a block body; the terminator line becomes its last line.
    fn read_body(
        &mut self,
        parser: &mut LineParser<'_>,
        base: Option<&Path>,
        scope: ScopeId,
        terminators: &[&str],
        opener: &Line,
    ) -> Result<Source, AsmError> {
        let (mut lines, end) = self.read_lines(parser, base, scope, terminators)?;
        let end = end.ok_or_else(|| missing_terminator(terminators, opener))?;
        lines.push(end);
        Ok(Source { scope, lines })
    }

    fn include(
        &mut self,
        line: &Line,
        base: Option<&Path>,
        scope: ScopeId,
    ) -> Result<Vec<Line>, AsmError> {
        let (once, name) = match &line.arguments {
            Some(Expr::Annotation { annotation, expr }) if annotation.eq_ignore_ascii_case("once") => {
                (true, expr.as_ref())
            }
            Some(expr) => (false, expr),
            None => return Err(AsmError::argument("Missing file name", None)),
        };
        let name = decode_latin1(&name.string(self.scopes)?);
        let path = self.find_file(&name, base)?;
        let canonical = path
            .canonicalize()
            .map_err(|err| AsmError::io(&err, &name))?;
        if once && self.loaded.contains(&canonical) {
            trace!(file = %path.display(), "include once: already loaded");
            return Ok(Vec::new());
        }
        trace!(file = %path.display(), "including");
        let source = self.parse_file(&path, scope, Some(line.position.clone()))?;
        Ok(source.lines)
    }

    fn incbin_path(&mut self, line: &Line, base: Option<&Path>) -> Result<PathBuf, AsmError> {
        let args = line.argument_list();
        let name = args
            .first()
            .ok_or_else(|| AsmError::argument("Missing file name", None))?;
        let name = decode_latin1(&name.string(self.scopes)?);
        self.find_file(&name, base)
    }

    fn find_file(&self, name: &str, base: Option<&Path>) -> Result<PathBuf, AsmError> {
        let relative = match base {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        let candidates =
            std::iter::once(relative).chain(self.include_dirs.iter().map(|dir| dir.join(name)));
        for candidate in candidates {
            trace!(candidate = %candidate.display(), "searching");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(AsmError::new(AsmErrorKind::Io, "File not found", Some(name)))
    }
}

fn missing_terminator(terminators: &[&str], opener: &Line) -> AsmError {
    let names: Vec<String> = terminators.iter().map(|t| t.to_ascii_uppercase()).collect();
    AsmError::assembly("Missing block terminator", Some(&names.join(" or ")))
        .at(&opener.position, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(text: &str) -> Result<(Scopes, Source), AsmError> {
        let mut scopes = Scopes::new();
        let root = scopes.create(None);
        let mut loaded = HashSet::new();
        let source = SourceBuilder::new(&mut scopes, &[], &mut loaded).parse_text(text, None, root, None)?;
        Ok((scopes, source))
    }

    #[test]
    fn macro_body_is_nested() {
        let (_, source) = build("m: macro\n nop\n endm\n m\n").unwrap();
        assert_eq!(source.lines.len(), 2);
        match &source.lines[0].directive {
            Directive::Macro(body) => {
                assert_eq!(body.lines.len(), 2);
                assert_eq!(body.scope, source.lines[0].scope);
                assert_eq!(body.lines[1].mnemonic.as_deref(), Some("endm"));
            }
            other => panic!("expected macro, got {other:?}"),
        }
    }

    #[test]
    fn if_else_branches() {
        let (_, source) = build(" if 1\n nop\n else\n halt\n halt\n endif\n").unwrap();
        assert_eq!(source.lines.len(), 1);
        match &source.lines[0].directive {
            Directive::If {
                then_branch,
                else_branch: Some(else_branch),
            } => {
                assert_eq!(then_branch.lines.len(), 2);
                assert_eq!(else_branch.lines.len(), 3);
                assert_eq!(then_branch.scope, source.scope);
            }
            other => panic!("expected if/else, got {other:?}"),
        }
    }

    #[test]
    fn missing_terminator_names_expected() {
        let err = build(" rept 3\n nop\n").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Assembly);
        assert!(err.message().contains("ENDM"), "{}", err.message());
        assert_eq!(err.frames()[0].line, 1);
    }

    #[test]
    fn unexpected_terminator_is_error() {
        let err = build(" nop\n endp\n").unwrap_err();
        assert!(err.message().contains("Unexpected block terminator"));
        assert_eq!(err.frames()[0].line, 2);
    }

    #[test]
    fn end_stops_reading() {
        let (_, source) = build(" nop\n end\n this is ignored (\n").unwrap();
        assert_eq!(source.lines.len(), 2);
    }

    #[test]
    fn copy_rebinds_into_new_scopes() {
        let (mut scopes, source) = build(" ld a,x\n").unwrap();
        let target = scopes.create(None);
        let mut map: ScopeMap = [(source.scope, target)].into_iter().collect();
        let site = source.lines[0].position.clone();
        let copy = source.copy(&mut map, &mut scopes, &site);
        assert_eq!(copy.scope, target);
        assert_eq!(scopes.parent(copy.lines[0].scope), Some(target));
        assert_eq!(copy.lines[0].position.parent.as_deref(), Some(site.as_ref()));
    }
}
