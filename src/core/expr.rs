// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression tree and lazy, scope-aware evaluation.
//!
//! Expressions are immutable. Identifiers carry the scope they were parsed
//! in and are only looked up when a value is requested, so an expression
//! can refer to symbols that are registered later in the pipeline. Copying
//! an expression with a [`ScopeMap`] re-parents every identifier into the
//! scopes of a new macro or repeat instance.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::scope::{ScopeId, Scopes};
use crate::instructions::InstructionFactory;
use crate::z80::{Flag, Register};

/// Maximum nesting of symbol indirections before evaluation gives up.
pub const MAX_DEPTH: usize = 256;

/// Old scope to new scope mapping used when copying expanded bodies.
pub type ScopeMap = HashMap<ScopeId, ScopeId>;

/// Identifier of a `DS` region that sections can be placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    LogicNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Mod,
    Add,
    Subtract,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicAnd => "&&",
            BinaryOp::LogicOr => "||",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Integer(i64),
    String(Vec<u8>),
    Character(u8),
    Identifier {
        name: String,
        scope: ScopeId,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Comma list; never directly nested unless grouped.
    Sequence(Vec<Expr>),
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        sequence: Box<Expr>,
        index: Box<Expr>,
    },
    /// Parenthesized expression; significant for indirect operands.
    Group(Box<Expr>),
    /// `identifier expr`, e.g. `VIRTUAL 100H` or `ONCE "file.asm"`.
    Annotation {
        annotation: String,
        expr: Box<Expr>,
    },
    Register(Register),
    Flag(Flag),
    /// A scope used as a value; its integer value is the scope's address.
    Context(ScopeId),
    /// A `DS` region label: behaves as its address and accepts sections.
    Space {
        space: SpaceId,
        scope: ScopeId,
    },
    Instruction(Rc<dyn InstructionFactory>),
    /// `ix + n` folded into an index register with a displacement.
    IndexOffset {
        register: Register,
        offset: Box<Expr>,
    },
}

impl Expr {
    pub fn identifier(name: impl Into<String>, scope: ScopeId) -> Self {
        Expr::Identifier {
            name: name.into(),
            scope,
        }
    }

    /// Elements of a comma list; a single expression is a one-element list.
    pub fn elements(&self) -> Vec<&Expr> {
        match self {
            Expr::Sequence(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expr::Identifier { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn context_scope(&self) -> Option<ScopeId> {
        match self {
            Expr::Context(scope) | Expr::Space { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    /// Follow identifiers, members and indices down to the node they denote.
    ///
    /// Only symbol bindings are consulted, never addresses, so the shape of
    /// an operand is known before any line has been placed.
    pub fn resolve(&self, scopes: &Scopes) -> Result<Expr, AsmError> {
        self.resolve_at(scopes, 0)
    }

    fn resolve_at(&self, scopes: &Scopes, depth: usize) -> Result<Expr, AsmError> {
        check_depth(depth)?;
        match self {
            Expr::Identifier { name, scope } => scopes
                .get_symbol(*scope, name)?
                .resolve_at(scopes, depth + 1),
            Expr::Member { object, name } => {
                let target = object.resolve_at(scopes, depth + 1)?;
                let scope = target.context_scope().ok_or_else(|| {
                    AsmError::argument("Member access on a non-context value", Some(name))
                })?;
                scopes
                    .get_member(scope, name)?
                    .resolve_at(scopes, depth + 1)
            }
            Expr::Index { sequence, index } => {
                self.element(sequence, index, scopes, depth)?
                    .resolve_at(scopes, depth + 1)
            }
            Expr::IfElse {
                cond,
                then_expr,
                else_expr,
            } => {
                if cond.integer_at(scopes, depth + 1)? != 0 {
                    then_expr.resolve_at(scopes, depth + 1)
                } else {
                    else_expr.resolve_at(scopes, depth + 1)
                }
            }
            Expr::Binary {
                op: op @ (BinaryOp::Add | BinaryOp::Subtract),
                left,
                right,
            } => Ok(self
                .fold_index_offset(*op, left, right, scopes, depth)?
                .unwrap_or_else(|| self.clone())),
            _ => Ok(self.clone()),
        }
    }

    fn fold_index_offset(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scopes: &Scopes,
        depth: usize,
    ) -> Result<Option<Expr>, AsmError> {
        let lenient = |expr: &Expr| {
            expr.resolve_at(scopes, depth + 1)
                .unwrap_or_else(|_| expr.clone())
        };
        let left_value = left.resolve_at(scopes, depth + 1)?;
        let base = match &left_value {
            Expr::Register(register) if register.is_index() => Some((*register, Expr::Integer(0))),
            Expr::IndexOffset { register, offset } => Some((*register, (**offset).clone())),
            _ => None,
        };
        if let Some((register, offset)) = base {
            if is_register_like(&lenient(right)) {
                return Ok(None);
            }
            return Ok(Some(Expr::IndexOffset {
                register,
                offset: Box::new(Expr::Binary {
                    op,
                    left: Box::new(offset),
                    right: Box::new(right.clone()),
                }),
            }));
        }
        if op == BinaryOp::Add && !is_register_like(&left_value) {
            if let Expr::Register(register) = lenient(right) {
                if register.is_index() {
                    return Ok(Some(Expr::IndexOffset {
                        register,
                        offset: Box::new(left.clone()),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn element(
        &self,
        sequence: &Expr,
        index: &Expr,
        scopes: &Scopes,
        depth: usize,
    ) -> Result<Expr, AsmError> {
        let position = index.integer_at(scopes, depth + 1)?;
        let mut target = sequence.resolve_at(scopes, depth + 1)?;
        while let Expr::Group(inner) = target {
            target = inner.resolve_at(scopes, depth + 1)?;
        }
        let out_of_range = || AsmError::argument("Index out of range", Some(&position.to_string()));
        let idx = usize::try_from(position).map_err(|_| out_of_range())?;
        match target {
            Expr::Sequence(items) => items.get(idx).cloned().ok_or_else(out_of_range),
            Expr::String(bytes) => bytes
                .get(idx)
                .map(|b| Expr::Character(*b))
                .ok_or_else(out_of_range),
            other if idx == 0 => Ok(other),
            _ => Err(out_of_range()),
        }
    }

    /// Evaluate to an integer. Addresses are read here, so this fails with
    /// address-not-initialized when used before the resolve phase got there.
    pub fn integer(&self, scopes: &Scopes) -> Result<i64, AsmError> {
        self.integer_at(scopes, 0)
    }

    fn integer_at(&self, scopes: &Scopes, depth: usize) -> Result<i64, AsmError> {
        check_depth(depth)?;
        match self {
            Expr::Integer(value) => Ok(*value),
            Expr::Character(c) => Ok(i64::from(*c)),
            Expr::String(bytes) if bytes.len() == 1 => Ok(i64::from(bytes[0])),
            Expr::Identifier { name, scope } => scopes
                .get_symbol(*scope, name)?
                .integer_at(scopes, depth + 1),
            Expr::Unary { op, expr } => apply_unary(*op, expr.integer_at(scopes, depth + 1)?),
            Expr::Binary { op, left, right } => {
                let l = left.integer_at(scopes, depth + 1)?;
                let r = right.integer_at(scopes, depth + 1)?;
                apply_binary(*op, l, r)
            }
            Expr::IfElse {
                cond,
                then_expr,
                else_expr,
            } => {
                if cond.integer_at(scopes, depth + 1)? != 0 {
                    then_expr.integer_at(scopes, depth + 1)
                } else {
                    else_expr.integer_at(scopes, depth + 1)
                }
            }
            Expr::Group(inner) => inner.integer_at(scopes, depth + 1),
            Expr::Member { .. } | Expr::Index { .. } => self
                .resolve_at(scopes, depth + 1)?
                .integer_at(scopes, depth + 1),
            Expr::Context(scope) | Expr::Space { scope, .. } => {
                scopes.address(*scope).map(i64::from)
            }
            other => Err(AsmError::argument(
                "Not an integer",
                Some(&other.to_string()),
            )),
        }
    }

    /// Evaluate to a byte string.
    pub fn string(&self, scopes: &Scopes) -> Result<Vec<u8>, AsmError> {
        match self.resolve(scopes)? {
            Expr::String(bytes) => Ok(bytes),
            Expr::Group(inner) => inner.string(scopes),
            other => Err(AsmError::argument(
                "Not a string",
                Some(&other.to_string()),
            )),
        }
    }

    /// True when the expression denotes a string literal.
    pub fn is_string(&self, scopes: &Scopes) -> bool {
        matches!(self.resolve(scopes), Ok(Expr::String(_)))
    }

    /// Re-parent every identifier into the scopes given by `map`.
    pub fn copy(&self, map: &ScopeMap) -> Expr {
        let remap = |scope: &ScopeId| map.get(scope).copied().unwrap_or(*scope);
        let boxed = |expr: &Expr| Box::new(expr.copy(map));
        match self {
            Expr::Identifier { name, scope } => Expr::Identifier {
                name: name.clone(),
                scope: remap(scope),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: boxed(expr),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            Expr::IfElse {
                cond,
                then_expr,
                else_expr,
            } => Expr::IfElse {
                cond: boxed(cond),
                then_expr: boxed(then_expr),
                else_expr: boxed(else_expr),
            },
            Expr::Sequence(items) => Expr::Sequence(items.iter().map(|e| e.copy(map)).collect()),
            Expr::Member { object, name } => Expr::Member {
                object: boxed(object),
                name: name.clone(),
            },
            Expr::Index { sequence, index } => Expr::Index {
                sequence: boxed(sequence),
                index: boxed(index),
            },
            Expr::Group(inner) => Expr::Group(boxed(inner)),
            Expr::Annotation { annotation, expr } => Expr::Annotation {
                annotation: annotation.clone(),
                expr: boxed(expr),
            },
            Expr::Context(scope) => Expr::Context(remap(scope)),
            Expr::Space { space, scope } => Expr::Space {
                space: *space,
                scope: remap(scope),
            },
            Expr::IndexOffset { register, offset } => Expr::IndexOffset {
                register: *register,
                offset: boxed(offset),
            },
            Expr::Integer(_)
            | Expr::String(_)
            | Expr::Character(_)
            | Expr::Register(_)
            | Expr::Flag(_)
            | Expr::Instruction(_) => self.clone(),
        }
    }
}

fn is_register_like(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Register(_) | Expr::Flag(_) | Expr::IndexOffset { .. }
    )
}

fn check_depth(depth: usize) -> Result<(), AsmError> {
    if depth > MAX_DEPTH {
        return Err(AsmError::new(
            AsmErrorKind::Expression,
            "Recursive symbol reference",
            None,
        ));
    }
    Ok(())
}

/// Apply a unary operator to a value.
pub fn apply_unary(op: UnaryOp, val: i64) -> Result<i64, AsmError> {
    Ok(match op {
        UnaryOp::Plus => val,
        UnaryOp::Minus => val.wrapping_neg(),
        UnaryOp::BitNot => !val,
        UnaryOp::LogicNot => i64::from(val == 0),
    })
}

/// Apply a binary operator to two values.
pub fn apply_binary(op: BinaryOp, l: i64, r: i64) -> Result<i64, AsmError> {
    Ok(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Subtract => l.wrapping_sub(r),
        BinaryOp::Multiply => l.wrapping_mul(r),
        BinaryOp::Divide => {
            if r == 0 {
                return Err(AsmError::expression("Division by zero"));
            }
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            if r == 0 {
                return Err(AsmError::expression("Modulo by zero"));
            }
            l.wrapping_rem(r)
        }
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        BinaryOp::Shl => l << (r & 0x3f),
        BinaryOp::Shr => l >> (r & 0x3f),
        BinaryOp::Eq => i64::from(l == r),
        BinaryOp::Ne => i64::from(l != r),
        BinaryOp::Lt => i64::from(l < r),
        BinaryOp::Le => i64::from(l <= r),
        BinaryOp::Gt => i64::from(l > r),
        BinaryOp::Ge => i64::from(l >= r),
        BinaryOp::LogicAnd => i64::from((l != 0) && (r != 0)),
        BinaryOp::LogicOr => i64::from((l != 0) || (r != 0)),
    })
}

/// Returns true if the value fits in a byte, signed or unsigned.
pub fn value_fits_byte(value: i64) -> bool {
    (-0x80..=0xff).contains(&value)
}

/// Returns true if the value fits in a word, signed or unsigned.
pub fn value_fits_word(value: i64) -> bool {
    (-0x8000..=0xffff).contains(&value)
}

/// Returns true if the value is a valid signed displacement.
pub fn value_fits_displacement(value: i64) -> bool {
    (-0x80..=0x7f).contains(&value)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer(value) => write!(f, "{value}"),
            Expr::String(bytes) => {
                write!(f, "\"")?;
                for b in bytes {
                    match b {
                        b'"' => write!(f, "\\\"")?,
                        b'\\' => write!(f, "\\\\")?,
                        0x20..=0x7e => write!(f, "{}", *b as char)?,
                        _ => write!(f, "\\x{b:02X}")?,
                    }
                }
                write!(f, "\"")
            }
            Expr::Character(c) => write!(f, "'{}'", *c as char),
            Expr::Identifier { name, .. } => write!(f, "{name}"),
            Expr::Unary { op, expr } => {
                let sym = match op {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                    UnaryOp::BitNot => "~",
                    UnaryOp::LogicNot => "!",
                };
                write!(f, "{sym}{expr}")
            }
            Expr::Binary { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::IfElse {
                cond,
                then_expr,
                else_expr,
            } => write!(f, "{cond} ? {then_expr} : {else_expr}"),
            Expr::Sequence(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Expr::Member { object, name } => write!(f, "{object}.{name}"),
            Expr::Index { sequence, index } => write!(f, "{sequence}[{index}]"),
            Expr::Group(inner) => write!(f, "({inner})"),
            Expr::Annotation { annotation, expr } => write!(f, "{annotation} {expr}"),
            Expr::Register(register) => write!(f, "{}", register.name()),
            Expr::Flag(flag) => write!(f, "{}", flag.name()),
            Expr::Context(_) => write!(f, "<context>"),
            Expr::Space { .. } => write!(f, "<space>"),
            Expr::Instruction(_) => write!(f, "<instruction>"),
            Expr::IndexOffset { register, offset } => {
                write!(f, "{} + ({offset})", register.name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes_with(symbols: &[(&str, Expr)]) -> (Scopes, ScopeId) {
        let mut scopes = Scopes::new();
        let root = scopes.create(None);
        for (name, value) in symbols {
            scopes.add_symbol(root, name, value.clone()).unwrap();
        }
        (scopes, root)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn apply_unary_ops() {
        assert_eq!(apply_unary(UnaryOp::Plus, 42).unwrap(), 42);
        assert_eq!(apply_unary(UnaryOp::Minus, 42).unwrap(), -42);
        assert_eq!(apply_unary(UnaryOp::BitNot, 0).unwrap(), -1);
        assert_eq!(apply_unary(UnaryOp::LogicNot, 0).unwrap(), 1);
        assert_eq!(apply_unary(UnaryOp::LogicNot, 42).unwrap(), 0);
    }

    #[test]
    fn apply_binary_ops() {
        assert_eq!(apply_binary(BinaryOp::Add, 10, 5).unwrap(), 15);
        assert_eq!(apply_binary(BinaryOp::Subtract, 10, 5).unwrap(), 5);
        assert_eq!(apply_binary(BinaryOp::Multiply, 10, 5).unwrap(), 50);
        assert_eq!(apply_binary(BinaryOp::Divide, 10, 5).unwrap(), 2);
        assert_eq!(apply_binary(BinaryOp::Mod, 10, 3).unwrap(), 1);
        assert_eq!(apply_binary(BinaryOp::BitAnd, 0xFF, 0x0F).unwrap(), 0x0F);
        assert_eq!(apply_binary(BinaryOp::BitOr, 0xF0, 0x0F).unwrap(), 0xFF);
        assert_eq!(apply_binary(BinaryOp::BitXor, 0xFF, 0x0F).unwrap(), 0xF0);
        assert_eq!(apply_binary(BinaryOp::Shl, 1, 4).unwrap(), 16);
        assert_eq!(apply_binary(BinaryOp::Shr, 16, 4).unwrap(), 1);
        assert_eq!(apply_binary(BinaryOp::Le, 5, 5).unwrap(), 1);
        assert_eq!(apply_binary(BinaryOp::LogicOr, 0, 0).unwrap(), 0);
    }

    #[test]
    fn division_by_zero() {
        assert!(apply_binary(BinaryOp::Divide, 10, 0).is_err());
        assert!(apply_binary(BinaryOp::Mod, 10, 0).is_err());
    }

    #[test]
    fn identifiers_are_looked_up_lazily() {
        let (mut scopes, root) = scopes_with(&[]);
        let expr = binary(BinaryOp::Add, Expr::identifier("later", root), Expr::Integer(1));
        assert_eq!(
            expr.integer(&scopes).unwrap_err().kind(),
            AsmErrorKind::SymbolNotFound
        );
        scopes.add_symbol(root, "later", Expr::Integer(41)).unwrap();
        assert_eq!(expr.integer(&scopes).unwrap(), 42);
    }

    #[test]
    fn context_value_is_scope_address() {
        let (mut scopes, root) = scopes_with(&[]);
        let line = scopes.create(Some(root));
        scopes.add_symbol(root, "label", Expr::Context(line)).unwrap();
        let expr = Expr::identifier("label", root);
        assert_eq!(
            expr.integer(&scopes).unwrap_err().kind(),
            AsmErrorKind::AddressNotInitialized
        );
        scopes.set_address(line, 0x1234).unwrap();
        assert_eq!(expr.integer(&scopes).unwrap(), 0x1234);
    }

    #[test]
    fn index_offsets_fold() {
        let (scopes, root) = scopes_with(&[("ix", Expr::Register(Register::IX))]);
        let expr = binary(
            BinaryOp::Add,
            binary(BinaryOp::Add, Expr::identifier("ix", root), Expr::Integer(1)),
            Expr::Integer(2),
        );
        match expr.resolve(&scopes).unwrap() {
            Expr::IndexOffset { register, offset } => {
                assert_eq!(register, Register::IX);
                assert_eq!(offset.integer(&scopes).unwrap(), 3);
            }
            other => panic!("expected index offset, got {other:?}"),
        }
        let minus = binary(BinaryOp::Subtract, Expr::identifier("ix", root), Expr::Integer(5));
        match minus.resolve(&scopes).unwrap() {
            Expr::IndexOffset { offset, .. } => assert_eq!(offset.integer(&scopes).unwrap(), -5),
            other => panic!("expected index offset, got {other:?}"),
        }
    }

    #[test]
    fn recursive_definitions_are_reported() {
        let (mut scopes, root) = scopes_with(&[]);
        scopes
            .add_symbol(root, "x", Expr::identifier("x", root))
            .unwrap();
        let err = Expr::identifier("x", root).integer(&scopes).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Expression);
    }

    #[test]
    fn index_into_sequences_and_strings() {
        let (scopes, _) = scopes_with(&[]);
        let seq = Expr::Index {
            sequence: Box::new(Expr::Group(Box::new(Expr::Sequence(vec![
                Expr::Integer(10),
                Expr::Integer(20),
            ])))),
            index: Box::new(Expr::Integer(1)),
        };
        assert_eq!(seq.integer(&scopes).unwrap(), 20);
        let text = Expr::Index {
            sequence: Box::new(Expr::String(b"abc".to_vec())),
            index: Box::new(Expr::Integer(2)),
        };
        assert_eq!(text.integer(&scopes).unwrap(), i64::from(b'c'));
    }

    #[test]
    fn copy_rebinds_identifiers() {
        let (mut scopes, root) = scopes_with(&[]);
        let old = scopes.create(Some(root));
        let new = scopes.create(Some(root));
        scopes.add_symbol(new, "v", Expr::Integer(7)).unwrap();
        let expr = Expr::identifier("v", old);
        assert!(expr.integer(&scopes).is_err());
        let map: ScopeMap = [(old, new)].into_iter().collect();
        assert_eq!(expr.copy(&map).integer(&scopes).unwrap(), 7);
    }
}
