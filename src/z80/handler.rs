// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 instruction handler.
//!
//! Building an instruction picks the first form whose operand patterns
//! match. The size follows from the form and the operand shapes alone, so it
//! is known before any label is placed. Operand values are evaluated and
//! range checked when code is generated.

use crate::assembler::Assembler;
use crate::core::error::AsmError;
use crate::core::expr::{value_fits_byte, value_fits_displacement, value_fits_word, Expr};
use crate::core::imagestore::ImageStore;
use crate::core::scope::Scopes;
use crate::core::source::Line;
use crate::instructions::{InstructionFactory, InstructionObject};

use super::operand::{classify, matches_schema, Operand};
use super::table::{forms_for, Field, Form, Prefix, Tail};
use super::Register;

/// Factory for one Z80 mnemonic, bound to its name in the root scope.
#[derive(Debug)]
pub struct Z80Instruction {
    mnemonic: &'static str,
}

impl Z80Instruction {
    pub fn new(mnemonic: &'static str) -> Self {
        Self { mnemonic }
    }
}

impl InstructionFactory for Z80Instruction {
    fn build(&self, line: &Line, asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        let operands: Vec<Operand> = line
            .argument_list()
            .into_iter()
            .map(|expr| classify(expr, &asm.scopes))
            .collect();
        let form = forms_for(self.mnemonic)
            .find(|form| matches_schema(form.operands, &operands))
            .ok_or_else(|| {
                AsmError::argument(
                    "Invalid operands",
                    Some(&format!(
                        "{} {}",
                        self.mnemonic,
                        line.arguments
                            .as_ref()
                            .map(|args| args.to_string())
                            .unwrap_or_default()
                    )),
                )
            })?;
        let index = index_register(form, &operands)?;
        check_memory_operands(form, &operands)?;
        let size = encoded_size(form, &operands, index);
        Ok(Box::new(Z80Object {
            form,
            operands,
            index,
            size,
        }))
    }
}

fn is_memory(operand: &Operand) -> bool {
    matches!(
        operand,
        Operand::Indirect(Register::HL) | Operand::Indexed { .. }
    )
}

/// Index register selected by the operands, after checking that they can
/// share one prefix.
fn index_register(form: &Form, operands: &[Operand]) -> Result<Option<Register>, AsmError> {
    let mut index: Option<Register> = None;
    let mut as_register = false;
    let mut as_memory = false;
    let mut plain_hl = false;
    for operand in operands {
        let base = match operand {
            Operand::Reg(register) => match register.index_base() {
                Some(base) => {
                    as_register = true;
                    Some(base)
                }
                None => {
                    plain_hl |= matches!(register, Register::H | Register::L | Register::HL);
                    None
                }
            },
            Operand::Indexed { register, .. } => {
                as_memory = true;
                Some(*register)
            }
            Operand::Indirect(Register::HL) => {
                plain_hl = true;
                None
            }
            _ => None,
        };
        if let Some(base) = base {
            if index.is_some_and(|current| current != base) {
                return Err(AsmError::argument("Cannot combine IX and IY", Some(form.mnemonic)));
            }
            index = Some(base);
        }
    }
    if index.is_none() {
        return Ok(None);
    }
    if form.prefix == Prefix::Ed || (form.prefix == Prefix::Cb && as_register) {
        return Err(AsmError::argument(
            "Index register not allowed",
            Some(form.mnemonic),
        ));
    }
    if as_register && (plain_hl || as_memory) {
        return Err(AsmError::argument(
            "Invalid register combination",
            Some(form.mnemonic),
        ));
    }
    Ok(index)
}

/// `LD (HL),(HL)` and friends would encode as other instructions.
fn check_memory_operands(form: &Form, operands: &[Operand]) -> Result<(), AsmError> {
    let memory_fields = form
        .fields
        .iter()
        .filter(|field| match field {
            Field::High(idx) | Field::Low(idx) => operands.get(*idx).is_some_and(is_memory),
            _ => false,
        })
        .count();
    if memory_fields > 1 {
        return Err(AsmError::argument(
            "Invalid operand combination",
            Some(form.mnemonic),
        ));
    }
    Ok(())
}

/// Displacement operand merged through a register field, if any.
fn displacement<'a>(form: &Form, operands: &'a [Operand]) -> Option<&'a Expr> {
    form.fields.iter().find_map(|field| match field {
        Field::High(idx) | Field::Low(idx) => match operands.get(*idx) {
            Some(Operand::Indexed { disp, .. }) => Some(disp),
            _ => None,
        },
        _ => None,
    })
}

fn encoded_size(form: &Form, operands: &[Operand], index: Option<Register>) -> u32 {
    let mut size = 1 + form.tail.size();
    if index.is_some() {
        size += 1;
    }
    if form.prefix != Prefix::None {
        size += 1;
    }
    if displacement(form, operands).is_some() {
        size += 1;
    }
    size
}

#[derive(Debug)]
struct Z80Object {
    form: &'static Form,
    operands: Vec<Operand>,
    index: Option<Register>,
    size: u32,
}

impl Z80Object {
    fn value(&self, idx: usize, scopes: &Scopes) -> Result<i64, AsmError> {
        self.operands
            .get(idx)
            .and_then(Operand::value)
            .ok_or_else(|| AsmError::argument("Missing operand value", Some(self.form.mnemonic)))?
            .integer(scopes)
    }

    fn code8(&self, idx: usize) -> Result<u8, AsmError> {
        match self.operands.get(idx) {
            Some(Operand::Reg(register)) => register.code8(),
            Some(Operand::Indirect(Register::HL)) | Some(Operand::Indexed { .. }) => Some(6),
            _ => None,
        }
        .ok_or_else(|| AsmError::argument("Invalid register", Some(self.form.mnemonic)))
    }

    fn opcode(&self, scopes: &Scopes) -> Result<u8, AsmError> {
        let mut opcode = self.form.opcode;
        for field in self.form.fields {
            match *field {
                Field::High(idx) => opcode |= self.code8(idx)? << 3,
                Field::Low(idx) => opcode |= self.code8(idx)?,
                Field::Pair(idx) => {
                    let code = self
                        .operands
                        .get(idx)
                        .and_then(Operand::register)
                        .and_then(Register::code16)
                        .ok_or_else(|| {
                            AsmError::argument("Invalid register pair", Some(self.form.mnemonic))
                        })?;
                    opcode |= code << 4;
                }
                Field::Cond(idx) => {
                    let flag = self
                        .operands
                        .get(idx)
                        .and_then(Operand::condition)
                        .ok_or_else(|| {
                            AsmError::argument("Invalid condition", Some(self.form.mnemonic))
                        })?;
                    opcode |= flag.code() << 3;
                }
                Field::Bit(idx) => {
                    let bit = self.value(idx, scopes)?;
                    if !(0..=7).contains(&bit) {
                        return Err(AsmError::argument(
                            "Bit number out of range",
                            Some(&bit.to_string()),
                        ));
                    }
                    opcode |= (bit as u8) << 3;
                }
                Field::Rst(idx) => {
                    let target = self.value(idx, scopes)?;
                    if !(0..=0x38).contains(&target) || target % 8 != 0 {
                        return Err(AsmError::argument(
                            "Invalid restart address",
                            Some(&target.to_string()),
                        ));
                    }
                    opcode |= target as u8;
                }
                Field::Mode(idx) => {
                    opcode = match self.value(idx, scopes)? {
                        0 => 0x46,
                        1 => 0x56,
                        2 => 0x5E,
                        mode => {
                            return Err(AsmError::argument(
                                "Invalid interrupt mode",
                                Some(&mode.to_string()),
                            ))
                        }
                    };
                }
                Field::Zero(idx) => {
                    let value = self.value(idx, scopes)?;
                    if value != 0 {
                        return Err(AsmError::argument(
                            "Value must be zero",
                            Some(&value.to_string()),
                        ));
                    }
                }
            }
        }
        Ok(opcode)
    }

    fn encode(&self, address: u32, scopes: &Scopes) -> Result<Vec<u8>, AsmError> {
        let opcode = self.opcode(scopes)?;
        let disp = match displacement(self.form, &self.operands) {
            Some(expr) => {
                let value = expr.integer(scopes)?;
                if !value_fits_displacement(value) {
                    return Err(AsmError::argument(
                        "Index offset out of range",
                        Some(&value.to_string()),
                    ));
                }
                Some(value as u8)
            }
            None => None,
        };

        let mut bytes = Vec::with_capacity(self.size as usize);
        if let Some(prefix) = self.index.and_then(Register::index_prefix) {
            bytes.push(prefix);
        }
        match (self.form.prefix, disp) {
            // DD CB d op
            (Prefix::Cb, Some(disp)) => bytes.extend_from_slice(&[0xCB, disp, opcode]),
            (prefix, disp) => {
                match prefix {
                    Prefix::Cb => bytes.push(0xCB),
                    Prefix::Ed => bytes.push(0xED),
                    Prefix::None => {}
                }
                bytes.push(opcode);
                bytes.extend(disp);
            }
        }

        match self.form.tail {
            Tail::None => {}
            Tail::Imm8(idx) => {
                let value = self.value(idx, scopes)?;
                if !value_fits_byte(value) {
                    return Err(AsmError::argument("Value out of range", Some(&value.to_string())));
                }
                bytes.push(value as u8);
            }
            Tail::Imm16(idx) => {
                let value = self.value(idx, scopes)?;
                if !value_fits_word(value) {
                    return Err(AsmError::argument("Value out of range", Some(&value.to_string())));
                }
                bytes.extend_from_slice(&(value as u16).to_le_bytes());
            }
            Tail::Rel(idx) => {
                let target = self.value(idx, scopes)?;
                let offset = target - (i64::from(address) + i64::from(self.size));
                if !value_fits_displacement(offset) {
                    return Err(AsmError::argument(
                        "Relative jump out of range",
                        Some(&offset.to_string()),
                    ));
                }
                bytes.push(offset as u8);
            }
        }
        Ok(bytes)
    }
}

impl InstructionObject for Z80Object {
    fn size(&self) -> u32 {
        self.size
    }

    fn generate(&self, address: u32, asm: &Assembler, out: &mut ImageStore) -> Result<(), AsmError> {
        let bytes = self.encode(address, &asm.scopes)?;
        if bytes.len() as u32 != self.size {
            return Err(AsmError::assembly(
                "Instruction size changed after resolve",
                Some(self.form.mnemonic),
            ));
        }
        out.store_slice(address, &bytes);
        Ok(())
    }
}
