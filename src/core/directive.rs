// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-line registration strategy.
//!
//! The directive decides what a line's label stands for and carries the
//! nested bodies of block statements. It is chosen while the source is
//! read, before any symbol exists.

use std::path::PathBuf;
use std::rc::Rc;

use crate::assembler::Assembler;
use crate::core::error::{AsmError, Position};
use crate::core::expr::{Expr, ScopeMap};
use crate::core::scope::Scopes;
use crate::core::source::{Line, Source};
use crate::instructions::blocks::MacroFactory;

#[derive(Debug, Clone, Default)]
pub enum Directive {
    /// Label is the address of the line.
    #[default]
    Instruction,
    /// Label is the argument expression.
    Equ,
    /// Label is a space that sections can be placed into.
    Space,
    /// Template body, instantiated per invocation.
    Macro(Rc<Source>),
    /// Template body, instantiated per iteration.
    Rept(Rc<Source>),
    Irp(Rc<Source>),
    Proc(Source),
    If {
        then_branch: Source,
        else_branch: Option<Source>,
    },
    Section(Source),
    Incbin(PathBuf),
}

impl Directive {
    /// Value bound to the label of `line`.
    pub fn label_value(&self, line: &Line, asm: &mut Assembler) -> Result<Expr, AsmError> {
        match self {
            Directive::Equ => line
                .arguments
                .clone()
                .ok_or_else(|| AsmError::argument("Missing value", line.label.as_deref())),
            Directive::Space => Ok(Expr::Space {
                space: asm.new_space(),
                scope: line.scope,
            }),
            Directive::Macro(body) => {
                let factory = MacroFactory::new(line, body.clone())?;
                Ok(Expr::Instruction(Rc::new(factory)))
            }
            _ => Ok(Expr::Context(line.scope)),
        }
    }

    /// Whether a label is mandatory (`EQU`, `MACRO`).
    pub fn requires_label(&self) -> bool {
        matches!(self, Directive::Equ | Directive::Macro(_))
    }

    /// Bodies that are registered along with the lines around them. Template
    /// and conditional bodies are registered when they are expanded.
    pub fn registered_body(&mut self) -> Option<&mut Source> {
        match self {
            Directive::Proc(body) | Directive::Section(body) => Some(body),
            _ => None,
        }
    }

    /// Copy nested bodies into the scopes given by `map`.
    pub fn copy(&self, map: &mut ScopeMap, scopes: &mut Scopes, site: &Rc<Position>) -> Directive {
        match self {
            Directive::Instruction => Directive::Instruction,
            Directive::Equ => Directive::Equ,
            Directive::Space => Directive::Space,
            Directive::Macro(body) => Directive::Macro(Rc::new(body.copy(map, scopes, site))),
            Directive::Rept(body) => Directive::Rept(Rc::new(body.copy(map, scopes, site))),
            Directive::Irp(body) => Directive::Irp(Rc::new(body.copy(map, scopes, site))),
            Directive::Proc(body) => Directive::Proc(body.copy(map, scopes, site)),
            Directive::If {
                then_branch,
                else_branch,
            } => Directive::If {
                then_branch: then_branch.copy(map, scopes, site),
                else_branch: else_branch
                    .as_ref()
                    .map(|body| body.copy(map, scopes, site)),
            },
            Directive::Section(body) => Directive::Section(body.copy(map, scopes, site)),
            Directive::Incbin(path) => Directive::Incbin(path.clone()),
        }
    }
}
