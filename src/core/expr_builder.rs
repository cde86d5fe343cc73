// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operator-precedence (shunting-yard) construction of expression trees.
//!
//! The line parser feeds values and operators in source order. Groups and
//! index brackets push a sentinel so nothing inside them reduces past the
//! opening bracket; a pending `?` acts the same way until its `:` arrives.

use crate::core::error::AsmError;
use crate::core::expr::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Member,
    /// `?` seen, waiting for `:`.
    TernaryOpen,
    /// `:` seen; reduces condition, then and else values.
    Ternary,
    Annotation,
    Sequence,
    GroupOpen,
    IndexOpen,
}

impl Operator {
    fn precedence(self) -> i32 {
        match self {
            Operator::Member => 12,
            Operator::Unary(_) => 11,
            Operator::Binary(op) => match op {
                BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Mod => 10,
                BinaryOp::Add | BinaryOp::Subtract => 9,
                BinaryOp::Shl | BinaryOp::Shr => 8,
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
                BinaryOp::Eq | BinaryOp::Ne => 6,
                BinaryOp::BitAnd => 5,
                BinaryOp::BitXor => 4,
                BinaryOp::BitOr => 3,
                BinaryOp::LogicAnd => 2,
                BinaryOp::LogicOr => 1,
            },
            Operator::Ternary | Operator::TernaryOpen => 0,
            Operator::Annotation => -1,
            Operator::Sequence => -2,
            Operator::GroupOpen | Operator::IndexOpen => i32::MIN,
        }
    }

    fn right_associative(self) -> bool {
        matches!(
            self,
            Operator::Unary(_)
                | Operator::Ternary
                | Operator::TernaryOpen
                | Operator::Annotation
        )
    }

    fn is_barrier(self) -> bool {
        matches!(
            self,
            Operator::GroupOpen | Operator::IndexOpen | Operator::TernaryOpen
        )
    }
}

#[derive(Debug, Default)]
pub struct ExprBuilder {
    values: Vec<Expr>,
    operators: Vec<Operator>,
    operator_expected: bool,
}

impl ExprBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the next token must be a value (or a prefix operator).
    pub fn expects_value(&self) -> bool {
        !self.operator_expected
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.operators.is_empty()
    }

    /// True while the expression cannot end here: a trailing operator, an
    /// open bracket or an unanswered `?`.
    pub fn is_incomplete(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        !self.operator_expected || self.operators.iter().any(|op| op.is_barrier())
    }

    pub fn push_value(&mut self, value: Expr) -> Result<(), AsmError> {
        if self.operator_expected {
            return Err(AsmError::expression("Operator expected"));
        }
        self.values.push(value);
        self.operator_expected = true;
        Ok(())
    }

    pub fn push_unary(&mut self, op: UnaryOp) -> Result<(), AsmError> {
        if self.operator_expected {
            return Err(AsmError::expression("Operator expected"));
        }
        self.operators.push(Operator::Unary(op));
        Ok(())
    }

    pub fn push_binary(&mut self, op: BinaryOp) -> Result<(), AsmError> {
        self.push_infix(Operator::Binary(op))
    }

    pub fn push_member(&mut self) -> Result<(), AsmError> {
        self.push_infix(Operator::Member)
    }

    pub fn push_sequence(&mut self) -> Result<(), AsmError> {
        self.push_infix(Operator::Sequence)
    }

    /// Juxtaposed values: `identifier expr`.
    pub fn push_annotation(&mut self) -> Result<(), AsmError> {
        self.push_infix(Operator::Annotation)
    }

    pub fn push_question(&mut self) -> Result<(), AsmError> {
        self.push_infix(Operator::TernaryOpen)
    }

    pub fn push_colon(&mut self) -> Result<(), AsmError> {
        self.expect_operator()?;
        loop {
            match self.operators.last() {
                Some(Operator::TernaryOpen) => break,
                Some(op) if !op.is_barrier() => self.reduce()?,
                _ => return Err(AsmError::expression("':' without matching '?'")),
            }
        }
        self.operators.pop();
        self.operators.push(Operator::Ternary);
        self.operator_expected = false;
        Ok(())
    }

    pub fn open_group(&mut self) -> Result<(), AsmError> {
        if self.operator_expected {
            return Err(AsmError::expression("Operator expected"));
        }
        self.operators.push(Operator::GroupOpen);
        Ok(())
    }

    pub fn close_group(&mut self) -> Result<(), AsmError> {
        self.close(Operator::GroupOpen)?;
        let inner = self.pop_value()?;
        self.values.push(Expr::Group(Box::new(inner)));
        Ok(())
    }

    pub fn open_index(&mut self) -> Result<(), AsmError> {
        self.expect_operator()?;
        self.reduce_while(|top| top.precedence() >= Operator::Member.precedence())?;
        self.operators.push(Operator::IndexOpen);
        self.operator_expected = false;
        Ok(())
    }

    pub fn close_index(&mut self) -> Result<(), AsmError> {
        self.close(Operator::IndexOpen)?;
        let index = self.pop_value()?;
        let sequence = self.pop_value()?;
        self.values.push(Expr::Index {
            sequence: Box::new(sequence),
            index: Box::new(index),
        });
        Ok(())
    }

    /// Reduce everything and return the finished tree, `None` for no input.
    pub fn finish(mut self) -> Result<Option<Expr>, AsmError> {
        if self.is_empty() {
            return Ok(None);
        }
        self.expect_operator()?;
        while let Some(top) = self.operators.last() {
            match top {
                Operator::GroupOpen => return Err(AsmError::expression("Missing ')'")),
                Operator::IndexOpen => return Err(AsmError::expression("Missing ']'")),
                Operator::TernaryOpen => {
                    return Err(AsmError::expression("'?' without matching ':'"))
                }
                _ => self.reduce()?,
            }
        }
        let value = self.pop_value()?;
        if !self.values.is_empty() {
            return Err(AsmError::expression("Operator expected"));
        }
        Ok(Some(value))
    }

    fn expect_operator(&self) -> Result<(), AsmError> {
        if self.operator_expected {
            Ok(())
        } else {
            Err(AsmError::expression("Missing operand"))
        }
    }

    fn push_infix(&mut self, op: Operator) -> Result<(), AsmError> {
        self.expect_operator()?;
        let prec = op.precedence();
        let right = op.right_associative();
        self.reduce_while(|top| {
            let top_prec = top.precedence();
            top_prec > prec || (top_prec == prec && !right)
        })?;
        self.operators.push(op);
        self.operator_expected = false;
        Ok(())
    }

    fn reduce_while(&mut self, pred: impl Fn(Operator) -> bool) -> Result<(), AsmError> {
        while let Some(&top) = self.operators.last() {
            if top.is_barrier() || !pred(top) {
                break;
            }
            self.reduce()?;
        }
        Ok(())
    }

    fn close(&mut self, opener: Operator) -> Result<(), AsmError> {
        let closer = if opener == Operator::GroupOpen { ')' } else { ']' };
        self.expect_operator()?;
        loop {
            match self.operators.last() {
                Some(&op) if op == opener => break,
                Some(Operator::GroupOpen | Operator::IndexOpen) | None => {
                    return Err(AsmError::expression(&format!("Unexpected '{closer}'")))
                }
                Some(Operator::TernaryOpen) => {
                    return Err(AsmError::expression("'?' without matching ':'"))
                }
                Some(_) => self.reduce()?,
            }
        }
        self.operators.pop();
        Ok(())
    }

    fn pop_value(&mut self) -> Result<Expr, AsmError> {
        self.values
            .pop()
            .ok_or_else(|| AsmError::expression("Missing operand"))
    }

    fn reduce(&mut self) -> Result<(), AsmError> {
        let Some(op) = self.operators.pop() else {
            return Ok(());
        };
        let value = match op {
            Operator::Unary(op) => Expr::Unary {
                op,
                expr: Box::new(self.pop_value()?),
            },
            Operator::Binary(op) => {
                let right = self.pop_value()?;
                let left = self.pop_value()?;
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            Operator::Member => {
                let right = self.pop_value()?;
                let object = self.pop_value()?;
                let Expr::Identifier { name, .. } = right else {
                    return Err(AsmError::expression(
                        "Member access requires an identifier",
                    ));
                };
                Expr::Member {
                    object: Box::new(object),
                    name,
                }
            }
            Operator::Ternary => {
                let else_expr = self.pop_value()?;
                let then_expr = self.pop_value()?;
                let cond = self.pop_value()?;
                Expr::IfElse {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                }
            }
            Operator::Annotation => {
                let expr = self.pop_value()?;
                let left = self.pop_value()?;
                let Expr::Identifier { name, .. } = left else {
                    return Err(AsmError::expression(
                        "Annotation requires an identifier",
                    ));
                };
                Expr::Annotation {
                    annotation: name,
                    expr: Box::new(expr),
                }
            }
            Operator::Sequence => {
                let right = self.pop_value()?;
                match self.pop_value()? {
                    Expr::Sequence(mut items) => {
                        items.push(right);
                        Expr::Sequence(items)
                    }
                    left => Expr::Sequence(vec![left, right]),
                }
            }
            Operator::TernaryOpen => {
                return Err(AsmError::expression("'?' without matching ':'"))
            }
            Operator::GroupOpen | Operator::IndexOpen => {
                return Err(AsmError::expression("Unbalanced brackets"))
            }
        };
        self.values.push(value);
        Ok(())
    }
}
