// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction factories and the objects they build.
//!
//! A factory is bound to a mnemonic symbol. During the expand phase it
//! turns a line into the concrete lines that replace it; during the
//! resolve phase it builds an [`InstructionObject`] that knows its size,
//! and during the generate phase that object writes its bytes.

pub mod blocks;
pub mod data;

use std::fmt;
use std::rc::Rc;

use crate::assembler::Assembler;
use crate::core::error::AsmError;
use crate::core::imagestore::ImageStore;
use crate::core::source::Line;

pub trait InstructionFactory: fmt::Debug {
    /// Replace `line` with the lines it stands for. Most instructions
    /// stand for themselves.
    fn expand(&self, line: Line, _asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        Ok(vec![line])
    }

    /// Build the sized object for an expanded line. Sizing may only depend
    /// on the syntactic shape of the arguments.
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError>;
}

pub trait InstructionObject: fmt::Debug {
    fn size(&self) -> u32;

    /// Place the object at `address` and return the address that follows it.
    fn resolve(&mut self, address: u32, _asm: &mut Assembler) -> Result<u32, AsmError> {
        Ok(address.wrapping_add(self.size()))
    }

    /// Write the object's bytes; every symbol is expected to be known here.
    fn generate(&self, address: u32, asm: &Assembler, out: &mut ImageStore) -> Result<(), AsmError>;
}

/// Statement without code of its own: block terminators, `EQU`, `INCLUDE`,
/// `END`, macro definitions.
#[derive(Debug)]
pub struct Marker;

impl InstructionFactory for Marker {
    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        Ok(Box::new(Empty))
    }
}

#[derive(Debug)]
pub struct Empty;

impl InstructionObject for Empty {
    fn size(&self) -> u32 {
        0
    }

    fn generate(&self, _address: u32, _asm: &Assembler, _out: &mut ImageStore) -> Result<(), AsmError> {
        Ok(())
    }
}

/// Directive mnemonics and the factories implementing them.
pub fn directive_factories() -> Vec<(&'static str, Rc<dyn InstructionFactory>)> {
    use blocks::{If, Irp, MacroDefinition, Proc, Rept, Section};
    use data::{Data, Diagnostic, DiagnosticLevel, Incbin, Org, Space};

    let marker: Rc<dyn InstructionFactory> = Rc::new(Marker);
    let bytes: Rc<dyn InstructionFactory> = Rc::new(Data::new(1));
    let words: Rc<dyn InstructionFactory> = Rc::new(Data::new(2));
    let dwords: Rc<dyn InstructionFactory> = Rc::new(Data::new(4));
    let space: Rc<dyn InstructionFactory> = Rc::new(Space);
    let mut factories: Vec<(&'static str, Rc<dyn InstructionFactory>)> = vec![
        ("db", bytes.clone()),
        ("defb", bytes.clone()),
        ("dm", bytes.clone()),
        ("defm", bytes),
        ("dw", words.clone()),
        ("defw", words),
        ("dd", dwords.clone()),
        ("defd", dwords),
        ("ds", space.clone()),
        ("defs", space),
        ("org", Rc::new(Org)),
        ("incbin", Rc::new(Incbin)),
        ("error", Rc::new(Diagnostic::new(DiagnosticLevel::Error))),
        ("warning", Rc::new(Diagnostic::new(DiagnosticLevel::Warning))),
        ("macro", Rc::new(MacroDefinition)),
        ("rept", Rc::new(Rept)),
        ("irp", Rc::new(Irp)),
        ("proc", Rc::new(Proc)),
        ("if", Rc::new(If)),
        ("section", Rc::new(Section)),
    ];
    for name in ["equ", "include", "end", "endm", "endp", "else", "endif", "ends"] {
        factories.push((name, marker.clone()));
    }
    factories
}
