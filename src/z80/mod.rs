// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Zilog Z80 CPU support module.
//!
//! This module provides Z80-specific functionality:
//! - Register and condition definitions, predefined as symbols
//! - Operand classification and schema matching
//! - The instruction form table
//! - Encoding of matched forms

pub mod handler;
pub mod operand;
pub mod table;

pub use handler::Z80Instruction;

/// Size of the addressable memory; code may end exactly at the top.
pub const ADDRESS_SPACE: u32 = 0x1_0000;

/// Z80 registers as they appear in operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    I,
    R,
    /// Only in `IN F,(C)`.
    F,
    IXH,
    IXL,
    IYH,
    IYL,
    AF,
    /// `AF'`, only in `EX AF,AF'`.
    AFAlt,
    BC,
    DE,
    HL,
    SP,
    IX,
    IY,
}

pub const REGISTERS: &[Register] = &[
    Register::A,
    Register::B,
    Register::C,
    Register::D,
    Register::E,
    Register::H,
    Register::L,
    Register::I,
    Register::R,
    Register::F,
    Register::IXH,
    Register::IXL,
    Register::IYH,
    Register::IYL,
    Register::AF,
    Register::AFAlt,
    Register::BC,
    Register::DE,
    Register::HL,
    Register::SP,
    Register::IX,
    Register::IY,
];

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::A => "a",
            Register::B => "b",
            Register::C => "c",
            Register::D => "d",
            Register::E => "e",
            Register::H => "h",
            Register::L => "l",
            Register::I => "i",
            Register::R => "r",
            Register::F => "f",
            Register::IXH => "ixh",
            Register::IXL => "ixl",
            Register::IYH => "iyh",
            Register::IYL => "iyl",
            Register::AF => "af",
            Register::AFAlt => "af'",
            Register::BC => "bc",
            Register::DE => "de",
            Register::HL => "hl",
            Register::SP => "sp",
            Register::IX => "ix",
            Register::IY => "iy",
        }
    }

    pub fn is_index(self) -> bool {
        matches!(self, Register::IX | Register::IY)
    }

    /// The index register a half register belongs to.
    pub fn index_base(self) -> Option<Register> {
        match self {
            Register::IX | Register::IXH | Register::IXL => Some(Register::IX),
            Register::IY | Register::IYH | Register::IYL => Some(Register::IY),
            _ => None,
        }
    }

    /// 3-bit register field; `(HL)` uses 6. Halves take the H/L codes.
    pub fn code8(self) -> Option<u8> {
        match self {
            Register::B => Some(0),
            Register::C => Some(1),
            Register::D => Some(2),
            Register::E => Some(3),
            Register::H | Register::IXH | Register::IYH => Some(4),
            Register::L | Register::IXL | Register::IYL => Some(5),
            Register::A => Some(7),
            _ => None,
        }
    }

    /// 2-bit register pair field. `AF` shares code 3 with `SP`; the index
    /// registers take the place of `HL`.
    pub fn code16(self) -> Option<u8> {
        match self {
            Register::BC => Some(0),
            Register::DE => Some(1),
            Register::HL | Register::IX | Register::IY => Some(2),
            Register::SP | Register::AF => Some(3),
            _ => None,
        }
    }

    /// Prefix byte selecting an index register.
    pub fn index_prefix(self) -> Option<u8> {
        match self.index_base()? {
            Register::IX => Some(0xDD),
            _ => Some(0xFD),
        }
    }
}

/// Condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    NZ,
    Z,
    NC,
    C,
    PO,
    PE,
    P,
    M,
}

/// `C` is predefined as the register; it matches the carry condition
/// wherever a condition is expected.
pub const FLAGS: &[Flag] = &[
    Flag::NZ,
    Flag::Z,
    Flag::NC,
    Flag::PO,
    Flag::PE,
    Flag::P,
    Flag::M,
];

impl Flag {
    pub fn name(self) -> &'static str {
        match self {
            Flag::NZ => "nz",
            Flag::Z => "z",
            Flag::NC => "nc",
            Flag::C => "c",
            Flag::PO => "po",
            Flag::PE => "pe",
            Flag::P => "p",
            Flag::M => "m",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Flag::NZ => 0,
            Flag::Z => 1,
            Flag::NC => 2,
            Flag::C => 3,
            Flag::PO => 4,
            Flag::PE => 5,
            Flag::P => 6,
            Flag::M => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_codes() {
        assert_eq!(Register::A.code8(), Some(7));
        assert_eq!(Register::IXL.code8(), Some(5));
        assert_eq!(Register::HL.code8(), None);
        assert_eq!(Register::AF.code16(), Some(3));
        assert_eq!(Register::IY.code16(), Some(2));
        assert_eq!(Register::IYH.index_prefix(), Some(0xFD));
        assert_eq!(Register::HL.index_prefix(), None);
    }

    #[test]
    fn register_names_are_unique() {
        let mut names: Vec<&str> = REGISTERS.iter().map(|r| r.name()).collect();
        names.extend(FLAGS.iter().map(|f| f.name()));
        let count = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), count);
    }

    #[test]
    fn condition_codes() {
        assert_eq!(Flag::NZ.code(), 0);
        assert_eq!(Flag::C.code(), 3);
        assert_eq!(Flag::M.code(), 7);
    }
}
