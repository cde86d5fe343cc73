// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Data and layout directives: `DB`/`DW`/`DD`, `DS`, `ORG`, `INCBIN`,
//! `ERROR` and `WARNING`.

use std::fs;
use std::rc::Rc;

use tracing::warn;

use crate::assembler::Assembler;
use crate::core::directive::Directive;
use crate::core::error::{AsmError, AsmErrorKind, Position};
use crate::core::expr::{value_fits_byte, value_fits_word, Expr, SpaceId};
use crate::core::imagestore::ImageStore;
use crate::core::source::Line;
use crate::core::text_utils::decode_latin1;
use crate::instructions::{Empty, InstructionFactory, InstructionObject};
use crate::z80::ADDRESS_SPACE;

/// `DB`/`DEFB`/`DM`/`DEFM`, `DW`/`DEFW` and `DD`/`DEFD`.
#[derive(Debug)]
pub struct Data {
    width: u32,
}

impl Data {
    pub fn new(width: u32) -> Self {
        Self { width }
    }
}

impl InstructionFactory for Data {
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        let items: Vec<Expr> = line.argument_list().into_iter().cloned().collect();
        let mut size = 0u32;
        for item in &items {
            size += match item.resolve(&asm.scopes) {
                Ok(Expr::String(bytes)) if self.width == 1 => bytes.len() as u32,
                _ => self.width,
            };
        }
        Ok(Box::new(DataObject {
            width: self.width,
            items,
            size,
        }))
    }
}

#[derive(Debug)]
struct DataObject {
    width: u32,
    items: Vec<Expr>,
    size: u32,
}

fn fits(width: u32, value: i64) -> bool {
    match width {
        1 => value_fits_byte(value),
        2 => value_fits_word(value),
        _ => (-0x8000_0000..=0xffff_ffff).contains(&value),
    }
}

impl InstructionObject for DataObject {
    fn size(&self) -> u32 {
        self.size
    }

    fn generate(&self, address: u32, asm: &Assembler, out: &mut ImageStore) -> Result<(), AsmError> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        for item in &self.items {
            if self.width == 1 && item.is_string(&asm.scopes) {
                bytes.extend(item.string(&asm.scopes)?);
                continue;
            }
            let value = item.integer(&asm.scopes)?;
            if !fits(self.width, value) {
                return Err(AsmError::argument("Value out of range", Some(&value.to_string())));
            }
            bytes.extend_from_slice(&value.to_le_bytes()[..self.width as usize]);
        }
        if bytes.len() as u32 != self.size {
            return Err(AsmError::assembly("Data size changed after resolve", None));
        }
        out.store_slice(address, &bytes);
        Ok(())
    }
}

/// `DS [VIRTUAL] count[, fill]`. A labelled space receives the sections
/// that name it.
#[derive(Debug)]
pub struct Space;

impl Space {
    /// The space registered for the label of `line`, if any.
    fn space_of(line: &Line, asm: &Assembler) -> Option<SpaceId> {
        let label = line.label.as_deref()?;
        let parent = asm.scopes.parent(line.scope)?;
        match asm.scopes.get_member(parent, label) {
            Ok(Expr::Space { space, scope }) if *scope == line.scope => Some(*space),
            _ => None,
        }
    }
}

impl InstructionFactory for Space {
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        let args = line.argument_list();
        let (is_virtual, count) = match args.first() {
            Some(Expr::Annotation { annotation, expr }) if annotation.eq_ignore_ascii_case("virtual") => {
                (true, expr.as_ref())
            }
            Some(expr) => (false, *expr),
            None => return Err(AsmError::argument("Missing size", None)),
        };
        let count = count.integer(&asm.scopes)?;
        let size = u32::try_from(count)
            .ok()
            .filter(|size| *size <= ADDRESS_SPACE)
            .ok_or_else(|| AsmError::argument("Invalid size", Some(&count.to_string())))?;
        Ok(Box::new(SpaceObject {
            size,
            is_virtual,
            fill: args.get(1).map(|expr| (*expr).clone()),
            space: Self::space_of(line, asm),
            used: 0,
            sections: Vec::new(),
        }))
    }
}

#[derive(Debug)]
struct Placed {
    position: Rc<Position>,
    address: u32,
    object: Box<dyn InstructionObject>,
}

#[derive(Debug)]
struct SpaceObject {
    size: u32,
    is_virtual: bool,
    fill: Option<Expr>,
    space: Option<SpaceId>,
    used: u32,
    sections: Vec<Placed>,
}

impl InstructionObject for SpaceObject {
    fn size(&self) -> u32 {
        self.size
    }

    fn resolve(&mut self, address: u32, asm: &mut Assembler) -> Result<u32, AsmError> {
        if let Some(space) = self.space {
            let mut cursor = address;
            for line in asm.take_sections(space) {
                let (object, next) = asm.place(&line, cursor)?;
                self.sections.push(Placed {
                    position: line.position.clone(),
                    address: cursor,
                    object,
                });
                cursor = next;
            }
            self.used = cursor.wrapping_sub(address);
            if self.used > self.size {
                return Err(AsmError::assembly(
                    "Section size exceeds space",
                    Some(&format!("{} > {}", self.used, self.size)),
                ));
            }
        }
        Ok(address.wrapping_add(self.size))
    }

    fn generate(&self, address: u32, asm: &Assembler, out: &mut ImageStore) -> Result<(), AsmError> {
        // Virtual spaces only lay out addresses; section code is still checked.
        let mut scratch = ImageStore::new();
        let target = if self.is_virtual { &mut scratch } else { &mut *out };
        for placed in &self.sections {
            placed
                .object
                .generate(placed.address, asm, target)
                .map_err(|err| err.at(&placed.position, None))?;
        }
        if self.is_virtual {
            return Ok(());
        }
        let fill = match &self.fill {
            Some(expr) => {
                let value = expr.integer(&asm.scopes)?;
                if !value_fits_byte(value) {
                    return Err(AsmError::argument("Value out of range", Some(&value.to_string())));
                }
                value as u8
            }
            None => 0,
        };
        for offset in self.used..self.size {
            out.store(address.wrapping_add(offset), fill);
        }
        Ok(())
    }
}

/// `ORG address`
#[derive(Debug)]
pub struct Org;

impl InstructionFactory for Org {
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        let value = line
            .arguments
            .as_ref()
            .ok_or_else(|| AsmError::argument("Missing address", None))?
            .integer(&asm.scopes)?;
        let target = u32::try_from(value)
            .ok()
            .filter(|target| *target < ADDRESS_SPACE)
            .ok_or_else(|| AsmError::argument("Invalid address", Some(&value.to_string())))?;
        Ok(Box::new(OrgObject { target }))
    }
}

#[derive(Debug)]
struct OrgObject {
    target: u32,
}

impl InstructionObject for OrgObject {
    fn size(&self) -> u32 {
        0
    }

    fn resolve(&mut self, _address: u32, _asm: &mut Assembler) -> Result<u32, AsmError> {
        Ok(self.target)
    }

    fn generate(&self, _address: u32, _asm: &Assembler, _out: &mut ImageStore) -> Result<(), AsmError> {
        Ok(())
    }
}

/// `INCBIN "file"[, offset[, length]]`
#[derive(Debug)]
pub struct Incbin;

impl InstructionFactory for Incbin {
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        let Directive::Incbin(path) = &line.directive else {
            return Err(AsmError::argument("Missing file name", None));
        };
        let data = fs::read(path).map_err(|err| AsmError::io(&err, &path.display().to_string()))?;
        let args = line.argument_list();
        let offset = match args.get(1) {
            Some(expr) => expr.integer(&asm.scopes)?,
            None => 0,
        };
        let length = match args.get(2) {
            Some(expr) => expr.integer(&asm.scopes)?,
            None => data.len() as i64 - offset,
        };
        let range = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(length).ok())
            .and_then(|(start, len)| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= data.len())
            .ok_or_else(|| {
                AsmError::argument(
                    "Range outside of file",
                    Some(&format!("{offset}, {length}")),
                )
            })?;
        Ok(Box::new(BinaryObject {
            bytes: data[range].to_vec(),
        }))
    }
}

#[derive(Debug)]
struct BinaryObject {
    bytes: Vec<u8>,
}

impl InstructionObject for BinaryObject {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn generate(&self, address: u32, _asm: &Assembler, out: &mut ImageStore) -> Result<(), AsmError> {
        out.store_slice(address, &self.bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// `ERROR ["message"]` and `WARNING ["message"]`, raised when code is
/// generated so that only reachable statements report.
#[derive(Debug)]
pub struct Diagnostic {
    level: DiagnosticLevel,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self { level }
    }
}

impl InstructionFactory for Diagnostic {
    fn build(&self, line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        if line.arguments.is_none() && self.level == DiagnosticLevel::Warning {
            return Ok(Box::new(Empty));
        }
        Ok(Box::new(DiagnosticObject {
            level: self.level,
            message: line.arguments.clone(),
            position: line.position.clone(),
        }))
    }
}

#[derive(Debug)]
struct DiagnosticObject {
    level: DiagnosticLevel,
    message: Option<Expr>,
    position: Rc<Position>,
}

impl InstructionObject for DiagnosticObject {
    fn size(&self) -> u32 {
        0
    }

    fn generate(&self, _address: u32, asm: &Assembler, _out: &mut ImageStore) -> Result<(), AsmError> {
        let message = match &self.message {
            Some(expr) => Some(decode_latin1(&expr.string(&asm.scopes)?)),
            None => None,
        };
        match self.level {
            DiagnosticLevel::Error => Err(AsmError::new(
                AsmErrorKind::ErrorDirective,
                message.as_deref().unwrap_or("Error directive"),
                None,
            )),
            DiagnosticLevel::Warning => {
                warn!(
                    file = self.position.file.as_deref().unwrap_or("<input>"),
                    line = self.position.line,
                    "{}",
                    message.unwrap_or_default()
                );
                Ok(())
            }
        }
    }
}
