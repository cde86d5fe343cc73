// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 instruction form table.
//!
//! Each mnemonic has one or more forms. A form lists the operand patterns it
//! accepts, the base opcode and how operands are merged into it. Forms are
//! tried in table order and the first match wins, so more specific forms
//! come before general ones (`LD HL,(nn)` before the `ED`-prefixed variant).
//!
//! Index registers are not listed separately: a form that accepts `HL`,
//! `H`, `L` or `(HL)` also accepts the `IX`/`IY` variant, and the encoder
//! adds the `DD`/`FD` prefix.

use super::operand::Pattern::{self, *};
use super::Register::{A, AFAlt, AF, BC, C, DE, F, HL, I, R, SP};

/// Opcode page selected by a prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    None,
    /// CB prefix (bit instructions)
    Cb,
    /// ED prefix (extended instructions)
    Ed,
}

/// Operand bits merged into the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// 8-bit register or memory operand in bits 5-3.
    High(usize),
    /// 8-bit register or memory operand in bits 2-0.
    Low(usize),
    /// Register pair in bits 5-4.
    Pair(usize),
    /// Condition in bits 5-3.
    Cond(usize),
    /// Bit number 0-7 in bits 5-3.
    Bit(usize),
    /// Restart address, a multiple of 8 up to 38H.
    Rst(usize),
    /// Interrupt mode 0-2.
    Mode(usize),
    /// Operand that must evaluate to zero.
    Zero(usize),
}

/// Operand bytes following the opcode and displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    None,
    Imm8(usize),
    Imm16(usize),
    /// PC-relative 8-bit offset.
    Rel(usize),
}

impl Tail {
    pub fn size(self) -> u32 {
        match self {
            Tail::None => 0,
            Tail::Imm8(_) | Tail::Rel(_) => 1,
            Tail::Imm16(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Form {
    pub mnemonic: &'static str,
    pub operands: &'static [Pattern],
    pub prefix: Prefix,
    pub opcode: u8,
    pub fields: &'static [Field],
    pub tail: Tail,
}

const fn form(mnemonic: &'static str, operands: &'static [Pattern], opcode: u8) -> Form {
    Form {
        mnemonic,
        operands,
        prefix: Prefix::None,
        opcode,
        fields: &[],
        tail: Tail::None,
    }
}

impl Form {
    const fn cb(self) -> Self {
        Self {
            prefix: Prefix::Cb,
            ..self
        }
    }

    const fn ed(self) -> Self {
        Self {
            prefix: Prefix::Ed,
            ..self
        }
    }

    const fn fields(self, fields: &'static [Field]) -> Self {
        Self { fields, ..self }
    }

    const fn tail(self, tail: Tail) -> Self {
        Self { tail, ..self }
    }
}

use Field::{Bit, Cond as CondField, High, Low, Mode, Pair as PairField, Rst, Zero};
use Tail::{Imm16, Imm8, Rel};

/// All Z80 instruction forms, grouped by mnemonic.
pub static FORMS: &[Form] = &[
    // ============================================================
    // 8-bit loads
    // ============================================================
    form("ld", &[Mem8, Mem8], 0x40).fields(&[High(0), Low(1)]),
    form("ld", &[Mem8, Immediate], 0x06).fields(&[High(0)]).tail(Imm8(1)),
    form("ld", &[Reg(A), Ind(BC)], 0x0A),
    form("ld", &[Reg(A), Ind(DE)], 0x1A),
    form("ld", &[Ind(BC), Reg(A)], 0x02),
    form("ld", &[Ind(DE), Reg(A)], 0x12),
    form("ld", &[Reg(A), Addr], 0x3A).tail(Imm16(1)),
    form("ld", &[Addr, Reg(A)], 0x32).tail(Imm16(0)),
    form("ld", &[Reg(A), Reg(I)], 0x57).ed(),
    form("ld", &[Reg(A), Reg(R)], 0x5F).ed(),
    form("ld", &[Reg(I), Reg(A)], 0x47).ed(),
    form("ld", &[Reg(R), Reg(A)], 0x4F).ed(),
    // ============================================================
    // 16-bit loads
    // ============================================================
    form("ld", &[Pair, Immediate], 0x01).fields(&[PairField(0)]).tail(Imm16(1)),
    form("ld", &[HlIndex, Addr], 0x2A).tail(Imm16(1)),
    form("ld", &[Addr, HlIndex], 0x22).tail(Imm16(0)),
    form("ld", &[Pair, Addr], 0x4B).ed().fields(&[PairField(0)]).tail(Imm16(1)),
    form("ld", &[Addr, Pair], 0x43).ed().fields(&[PairField(1)]).tail(Imm16(0)),
    form("ld", &[Reg(SP), HlIndex], 0xF9),
    form("push", &[PairAf], 0xC5).fields(&[PairField(0)]),
    form("pop", &[PairAf], 0xC1).fields(&[PairField(0)]),
    // ============================================================
    // Exchange and block transfer
    // ============================================================
    form("ex", &[Reg(DE), Reg(HL)], 0xEB),
    form("ex", &[Reg(AF), Reg(AFAlt)], 0x08),
    form("ex", &[Ind(SP), HlIndex], 0xE3),
    form("exx", &[], 0xD9),
    form("ldi", &[], 0xA0).ed(),
    form("ldir", &[], 0xB0).ed(),
    form("ldd", &[], 0xA8).ed(),
    form("lddr", &[], 0xB8).ed(),
    form("cpi", &[], 0xA1).ed(),
    form("cpir", &[], 0xB1).ed(),
    form("cpd", &[], 0xA9).ed(),
    form("cpdr", &[], 0xB9).ed(),
    // ============================================================
    // 8-bit arithmetic and logic
    // ============================================================
    form("add", &[Reg(A), Mem8], 0x80).fields(&[Low(1)]),
    form("add", &[Reg(A), Immediate], 0xC6).tail(Imm8(1)),
    form("add", &[Mem8], 0x80).fields(&[Low(0)]),
    form("add", &[Immediate], 0xC6).tail(Imm8(0)),
    form("adc", &[Reg(A), Mem8], 0x88).fields(&[Low(1)]),
    form("adc", &[Reg(A), Immediate], 0xCE).tail(Imm8(1)),
    form("adc", &[Mem8], 0x88).fields(&[Low(0)]),
    form("adc", &[Immediate], 0xCE).tail(Imm8(0)),
    form("sub", &[Reg(A), Mem8], 0x90).fields(&[Low(1)]),
    form("sub", &[Reg(A), Immediate], 0xD6).tail(Imm8(1)),
    form("sub", &[Mem8], 0x90).fields(&[Low(0)]),
    form("sub", &[Immediate], 0xD6).tail(Imm8(0)),
    form("sbc", &[Reg(A), Mem8], 0x98).fields(&[Low(1)]),
    form("sbc", &[Reg(A), Immediate], 0xDE).tail(Imm8(1)),
    form("sbc", &[Mem8], 0x98).fields(&[Low(0)]),
    form("sbc", &[Immediate], 0xDE).tail(Imm8(0)),
    form("and", &[Reg(A), Mem8], 0xA0).fields(&[Low(1)]),
    form("and", &[Reg(A), Immediate], 0xE6).tail(Imm8(1)),
    form("and", &[Mem8], 0xA0).fields(&[Low(0)]),
    form("and", &[Immediate], 0xE6).tail(Imm8(0)),
    form("xor", &[Reg(A), Mem8], 0xA8).fields(&[Low(1)]),
    form("xor", &[Reg(A), Immediate], 0xEE).tail(Imm8(1)),
    form("xor", &[Mem8], 0xA8).fields(&[Low(0)]),
    form("xor", &[Immediate], 0xEE).tail(Imm8(0)),
    form("or", &[Reg(A), Mem8], 0xB0).fields(&[Low(1)]),
    form("or", &[Reg(A), Immediate], 0xF6).tail(Imm8(1)),
    form("or", &[Mem8], 0xB0).fields(&[Low(0)]),
    form("or", &[Immediate], 0xF6).tail(Imm8(0)),
    form("cp", &[Reg(A), Mem8], 0xB8).fields(&[Low(1)]),
    form("cp", &[Reg(A), Immediate], 0xFE).tail(Imm8(1)),
    form("cp", &[Mem8], 0xB8).fields(&[Low(0)]),
    form("cp", &[Immediate], 0xFE).tail(Imm8(0)),
    form("inc", &[Mem8], 0x04).fields(&[High(0)]),
    form("dec", &[Mem8], 0x05).fields(&[High(0)]),
    // ============================================================
    // 16-bit arithmetic
    // ============================================================
    form("add", &[HlIndex, Pair], 0x09).fields(&[PairField(1)]),
    form("adc", &[Reg(HL), Pair], 0x4A).ed().fields(&[PairField(1)]),
    form("sbc", &[Reg(HL), Pair], 0x42).ed().fields(&[PairField(1)]),
    form("inc", &[Pair], 0x03).fields(&[PairField(0)]),
    form("dec", &[Pair], 0x0B).fields(&[PairField(0)]),
    // ============================================================
    // General purpose and CPU control
    // ============================================================
    form("nop", &[], 0x00),
    form("halt", &[], 0x76),
    form("di", &[], 0xF3),
    form("ei", &[], 0xFB),
    form("daa", &[], 0x27),
    form("cpl", &[], 0x2F),
    form("scf", &[], 0x37),
    form("ccf", &[], 0x3F),
    form("neg", &[], 0x44).ed(),
    form("im", &[Immediate], 0x46).ed().fields(&[Mode(0)]),
    // ============================================================
    // Rotates and shifts
    // ============================================================
    form("rlca", &[], 0x07),
    form("rrca", &[], 0x0F),
    form("rla", &[], 0x17),
    form("rra", &[], 0x1F),
    form("rld", &[], 0x6F).ed(),
    form("rrd", &[], 0x67).ed(),
    form("rlc", &[Mem8], 0x00).cb().fields(&[Low(0)]),
    form("rrc", &[Mem8], 0x08).cb().fields(&[Low(0)]),
    form("rl", &[Mem8], 0x10).cb().fields(&[Low(0)]),
    form("rr", &[Mem8], 0x18).cb().fields(&[Low(0)]),
    form("sla", &[Mem8], 0x20).cb().fields(&[Low(0)]),
    form("sra", &[Mem8], 0x28).cb().fields(&[Low(0)]),
    form("sll", &[Mem8], 0x30).cb().fields(&[Low(0)]),
    form("srl", &[Mem8], 0x38).cb().fields(&[Low(0)]),
    // ============================================================
    // Bit set, reset and test
    // ============================================================
    form("bit", &[Immediate, Mem8], 0x40).cb().fields(&[Bit(0), Low(1)]),
    form("res", &[Immediate, Mem8], 0x80).cb().fields(&[Bit(0), Low(1)]),
    form("set", &[Immediate, Mem8], 0xC0).cb().fields(&[Bit(0), Low(1)]),
    // ============================================================
    // Jumps, calls and returns
    // ============================================================
    form("jp", &[Immediate], 0xC3).tail(Imm16(0)),
    form("jp", &[Cond, Immediate], 0xC2).fields(&[CondField(0)]).tail(Imm16(1)),
    form("jp", &[Ind(HL)], 0xE9),
    form("jp", &[IndIndex], 0xE9),
    form("jr", &[Immediate], 0x18).tail(Rel(0)),
    form("jr", &[CondShort, Immediate], 0x20).fields(&[CondField(0)]).tail(Rel(1)),
    form("djnz", &[Immediate], 0x10).tail(Rel(0)),
    form("call", &[Immediate], 0xCD).tail(Imm16(0)),
    form("call", &[Cond, Immediate], 0xC4).fields(&[CondField(0)]).tail(Imm16(1)),
    form("ret", &[], 0xC9),
    form("ret", &[Cond], 0xC0).fields(&[CondField(0)]),
    form("reti", &[], 0x4D).ed(),
    form("retn", &[], 0x45).ed(),
    form("rst", &[Immediate], 0xC7).fields(&[Rst(0)]),
    // ============================================================
    // Input and output
    // ============================================================
    form("in", &[Reg(A), Addr], 0xDB).tail(Imm8(1)),
    form("in", &[Reg8, Ind(C)], 0x40).ed().fields(&[High(0)]),
    form("in", &[Reg(F), Ind(C)], 0x70).ed(),
    form("in", &[Ind(C)], 0x70).ed(),
    form("out", &[Addr, Reg(A)], 0xD3).tail(Imm8(0)),
    form("out", &[Ind(C), Reg8], 0x41).ed().fields(&[High(1)]),
    form("out", &[Ind(C), Immediate], 0x71).ed().fields(&[Zero(1)]),
    form("ini", &[], 0xA2).ed(),
    form("inir", &[], 0xB2).ed(),
    form("ind", &[], 0xAA).ed(),
    form("indr", &[], 0xBA).ed(),
    form("outi", &[], 0xA3).ed(),
    form("otir", &[], 0xB3).ed(),
    form("outd", &[], 0xAB).ed(),
    form("otdr", &[], 0xBB).ed(),
];

/// Forms for a mnemonic in table order. `mnemonic` must be lowercase.
pub fn forms_for(mnemonic: &str) -> impl Iterator<Item = &'static Form> + '_ {
    FORMS.iter().filter(move |form| form.mnemonic == mnemonic)
}

/// Distinct mnemonics in table order.
pub fn mnemonics() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for form in FORMS {
        if !names.contains(&form.mnemonic) {
            names.push(form.mnemonic);
        }
    }
    names
}
