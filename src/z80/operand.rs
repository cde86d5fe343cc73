// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operand classification and schema patterns.
//!
//! Classification only looks at symbol bindings, never at addresses, so an
//! operand that refers to a label placed later still gets its final shape.
//! Anything that does not resolve to a register or a parenthesized form is
//! an immediate, and its value is checked when code is generated.

use crate::core::expr::Expr;
use crate::core::scope::Scopes;

use super::{Flag, Register};

#[derive(Debug, Clone)]
pub enum Operand {
    Reg(Register),
    Flag(Flag),
    /// `(BC)`, `(DE)`, `(HL)`, `(SP)`, `(C)`
    Indirect(Register),
    /// `(IX+d)`, `(IY+d)`; `(IX)` has displacement 0.
    Indexed { register: Register, disp: Expr },
    /// `(nn)`
    Address(Expr),
    Immediate(Expr),
}

impl Operand {
    pub fn register(&self) -> Option<Register> {
        match self {
            Operand::Reg(register) => Some(*register),
            _ => None,
        }
    }

    /// Condition code, with register `C` standing for the carry flag.
    pub fn condition(&self) -> Option<Flag> {
        match self {
            Operand::Flag(flag) => Some(*flag),
            Operand::Reg(Register::C) => Some(Flag::C),
            _ => None,
        }
    }

    /// Expression carrying the operand's value, if it has one.
    pub fn value(&self) -> Option<&Expr> {
        match self {
            Operand::Address(expr) | Operand::Immediate(expr) => Some(expr),
            Operand::Indexed { disp, .. } => Some(disp),
            _ => None,
        }
    }
}

fn lenient(expr: &Expr, scopes: &Scopes) -> Expr {
    expr.resolve(scopes).unwrap_or_else(|_| expr.clone())
}

/// Classify an argument by its syntactic shape. Names are followed as far
/// as they resolve; an unknown symbol is kept as an immediate or address
/// and reported as symbol-not-found when the bytes are generated.
pub fn classify(expr: &Expr, scopes: &Scopes) -> Operand {
    match lenient(expr, scopes) {
        Expr::Register(register) => Operand::Reg(register),
        Expr::Flag(flag) => Operand::Flag(flag),
        Expr::Group(inner) => match lenient(&inner, scopes) {
            Expr::Register(register) if register.is_index() => Operand::Indexed {
                register,
                disp: Expr::Integer(0),
            },
            Expr::Register(
                register @ (Register::BC | Register::DE | Register::HL | Register::SP | Register::C),
            ) => Operand::Indirect(register),
            Expr::IndexOffset { register, offset } => Operand::Indexed {
                register,
                disp: *offset,
            },
            _ => Operand::Address(*inner),
        },
        _ => Operand::Immediate(expr.clone()),
    }
}

/// Operand shape predicates used by the form table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Exactly this register.
    Reg(Register),
    /// A B C D E H L and the index halves.
    Reg8,
    /// [`Pattern::Reg8`], `(HL)` or `(IX+d)`/`(IY+d)`.
    Mem8,
    /// Exactly this indirect register.
    Ind(Register),
    /// `(IX)` or `(IY)` without displacement.
    IndIndex,
    /// BC DE HL SP IX IY
    Pair,
    /// BC DE HL AF IX IY
    PairAf,
    /// HL IX IY
    HlIndex,
    /// Any condition.
    Cond,
    /// NZ Z NC C
    CondShort,
    /// `(nn)`
    Addr,
    Immediate,
}

impl Pattern {
    pub fn matches(self, operand: &Operand) -> bool {
        match self {
            Pattern::Reg(expected) => operand.register() == Some(expected),
            Pattern::Reg8 => operand.register().and_then(Register::code8).is_some(),
            Pattern::Mem8 => {
                Pattern::Reg8.matches(operand)
                    || matches!(
                        operand,
                        Operand::Indirect(Register::HL) | Operand::Indexed { .. }
                    )
            }
            Pattern::Ind(expected) => {
                matches!(operand, Operand::Indirect(register) if *register == expected)
            }
            Pattern::IndIndex => {
                matches!(operand, Operand::Indexed { disp: Expr::Integer(0), .. })
            }
            Pattern::Pair => matches!(
                operand.register(),
                Some(Register::BC | Register::DE | Register::HL | Register::SP | Register::IX | Register::IY)
            ),
            Pattern::PairAf => matches!(
                operand.register(),
                Some(Register::BC | Register::DE | Register::HL | Register::AF | Register::IX | Register::IY)
            ),
            Pattern::HlIndex => matches!(
                operand.register(),
                Some(Register::HL | Register::IX | Register::IY)
            ),
            Pattern::Cond => operand.condition().is_some(),
            Pattern::CondShort => matches!(
                operand.condition(),
                Some(Flag::NZ | Flag::Z | Flag::NC | Flag::C)
            ),
            Pattern::Addr => matches!(operand, Operand::Address(_)),
            Pattern::Immediate => matches!(operand, Operand::Immediate(_)),
        }
    }
}

/// True when `operands` satisfy `schema` one to one.
pub fn matches_schema(schema: &[Pattern], operands: &[Operand]) -> bool {
    schema.len() == operands.len()
        && schema
            .iter()
            .zip(operands)
            .all(|(pattern, operand)| pattern.matches(operand))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::BinaryOp;

    fn setup() -> (Scopes, crate::core::scope::ScopeId) {
        let mut scopes = Scopes::new();
        let root = scopes.create(None);
        for register in super::super::REGISTERS {
            scopes
                .add_symbol(root, register.name(), Expr::Register(*register))
                .unwrap();
        }
        scopes.add_symbol(root, "nz", Expr::Flag(Flag::NZ)).unwrap();
        (scopes, root)
    }

    fn group(expr: Expr) -> Expr {
        Expr::Group(Box::new(expr))
    }

    #[test]
    fn classifies_registers_and_indirects() {
        let (scopes, root) = setup();
        let id = |name: &str| Expr::identifier(name, root);
        assert!(matches!(classify(&id("a"), &scopes), Operand::Reg(Register::A)));
        assert!(matches!(classify(&id("nz"), &scopes), Operand::Flag(Flag::NZ)));
        assert!(matches!(
            classify(&group(id("hl")), &scopes),
            Operand::Indirect(Register::HL)
        ));
        assert!(matches!(
            classify(&group(id("c")), &scopes),
            Operand::Indirect(Register::C)
        ));
        assert!(matches!(
            classify(&group(id("ix")), &scopes),
            Operand::Indexed { register: Register::IX, disp: Expr::Integer(0) }
        ));
    }

    #[test]
    fn unknown_symbols_are_immediates_or_addresses() {
        let (scopes, root) = setup();
        let label = Expr::identifier("later", root);
        assert!(matches!(classify(&label, &scopes), Operand::Immediate(_)));
        assert!(matches!(classify(&group(label), &scopes), Operand::Address(_)));
    }

    #[test]
    fn index_with_offset() {
        let (scopes, root) = setup();
        let expr = group(Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::identifier("iy", root)),
            right: Box::new(Expr::identifier("later", root)),
        });
        match classify(&expr, &scopes) {
            Operand::Indexed { register, .. } => assert_eq!(register, Register::IY),
            other => panic!("expected indexed operand, got {other:?}"),
        }
    }

    #[test]
    fn register_c_is_a_condition() {
        assert!(Pattern::Cond.matches(&Operand::Reg(Register::C)));
        assert!(Pattern::CondShort.matches(&Operand::Reg(Register::C)));
        assert!(!Pattern::CondShort.matches(&Operand::Flag(Flag::PE)));
        assert!(!Pattern::Cond.matches(&Operand::Reg(Register::B)));
    }

    #[test]
    fn schema_requires_exact_arity() {
        let ops = [Operand::Reg(Register::A), Operand::Reg(Register::B)];
        assert!(matches_schema(&[Pattern::Reg(Register::A), Pattern::Mem8], &ops));
        assert!(!matches_schema(&[Pattern::Mem8], &ops));
        assert!(!matches_schema(&[Pattern::Reg8, Pattern::Reg8, Pattern::Reg8], &ops));
    }
}
