// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Block statements: macros, repeats, conditionals, procedures and sections.
//!
//! Block lines stay in the expanded program as zero-size markers followed
//! by the lines of their body, so a label on a block line is the address
//! of the first body line.

use std::rc::Rc;

use tracing::trace;

use crate::assembler::Assembler;
use crate::core::directive::Directive;
use crate::core::error::AsmError;
use crate::core::expr::{BinaryOp, Expr, ScopeMap};
use crate::core::source::{Line, Source};
use crate::instructions::{Empty, InstructionFactory, InstructionObject};

fn empty() -> Result<Box<dyn InstructionObject>, AsmError> {
    Ok(Box::new(Empty))
}

fn missing_body(line: &Line) -> AsmError {
    AsmError::assembly("Block statement without body", line.mnemonic.as_deref())
}

#[derive(Debug)]
struct MacroParam {
    name: String,
    default: Option<Expr>,
}

/// A macro bound to its name. Each invocation copies the body into a fresh
/// scope below the definition, so the body sees the symbols around the
/// definition and keeps its own labels apart per invocation. Symbols bound
/// after the invoking line are not visible to that invocation.
#[derive(Debug)]
pub struct MacroFactory {
    name: String,
    params: Vec<MacroParam>,
    body: Rc<Source>,
}

impl MacroFactory {
    /// Parameters are identifiers, optionally with a default: `?x = 1`.
    pub fn new(line: &Line, body: Rc<Source>) -> Result<Self, AsmError> {
        let name = line.label.clone().unwrap_or_default();
        let params = line
            .argument_list()
            .into_iter()
            .map(|arg| match arg {
                Expr::Identifier { name, .. } => Ok(MacroParam {
                    name: name.clone(),
                    default: None,
                }),
                Expr::Binary {
                    op: BinaryOp::Eq,
                    left,
                    right,
                } => match left.as_identifier() {
                    Some(name) => Ok(MacroParam {
                        name: name.to_string(),
                        default: Some(right.as_ref().clone()),
                    }),
                    None => Err(AsmError::argument(
                        "Invalid macro parameter",
                        Some(&arg.to_string()),
                    )),
                },
                other => Err(AsmError::argument(
                    "Invalid macro parameter",
                    Some(&other.to_string()),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, params, body })
    }
}

impl InstructionFactory for MacroFactory {
    fn expand(&self, line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let args: Vec<Expr> = line.argument_list().into_iter().cloned().collect();
        if args.len() > self.params.len() {
            return Err(AsmError::argument("Too many arguments", Some(&self.name)));
        }
        let definition = self.body.scope;
        let params = asm.scopes.create(Some(definition));
        for (idx, param) in self.params.iter().enumerate() {
            let value = match args.get(idx) {
                Some(value) => value.clone(),
                None => param
                    .default
                    .clone()
                    .ok_or_else(|| AsmError::argument("Missing argument", Some(&param.name)))?,
            };
            asm.scopes.add_symbol(params, &param.name, value)?;
        }
        if let Some(mark) = asm.scopes.registered_at(line.scope) {
            asm.scopes.set_horizon(params, mark);
        }
        let invocation = asm.scopes.create(Some(params));
        asm.scopes.set_body(line.scope, invocation);
        trace!(name = %self.name, line = line.position.line, "expanding macro");

        let mut map = ScopeMap::new();
        map.insert(definition, invocation);
        let body = self.body.copy(&mut map, &mut asm.scopes, &line.position);
        let mut lines = vec![line];
        lines.extend(asm.expand_body(body.lines)?);
        Ok(lines)
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// The `MACRO` line itself; the body only runs through invocations.
#[derive(Debug)]
pub struct MacroDefinition;

impl InstructionFactory for MacroDefinition {
    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// Instantiate `body` once per value. Iteration `i` gets its own scope,
/// reachable from outside as `label.i`, with `var` bound to the value.
fn repeat(
    line: Line,
    body: &Source,
    var: Option<&str>,
    values: Vec<Expr>,
    asm: &mut Assembler,
) -> Result<Vec<Line>, AsmError> {
    trace!(
        mnemonic = line.mnemonic.as_deref().unwrap_or_default(),
        count = values.len(),
        "repeating block"
    );
    let mut lines = Vec::new();
    for (idx, value) in values.into_iter().enumerate() {
        let iteration = asm.scopes.create(Some(line.scope));
        asm.scopes
            .add_symbol(line.scope, &idx.to_string(), Expr::Context(iteration))?;
        if let Some(var) = var {
            asm.scopes.add_symbol(iteration, var, value)?;
        }
        let mut map = ScopeMap::new();
        map.insert(body.scope, iteration);
        let copy = body.copy(&mut map, &mut asm.scopes, &line.position);
        lines.extend(asm.expand_body(copy.lines)?);
    }
    let mut out = vec![line];
    out.extend(lines);
    Ok(out)
}

fn variable_name(expr: &Expr) -> Result<String, AsmError> {
    expr.as_identifier()
        .map(str::to_string)
        .ok_or_else(|| AsmError::argument("Invalid repeat variable", Some(&expr.to_string())))
}

/// `REPT count[, var[, start[, step]]]`
#[derive(Debug)]
pub struct Rept;

impl InstructionFactory for Rept {
    fn expand(&self, line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let Directive::Rept(body) = &line.directive else {
            return Err(missing_body(&line));
        };
        let body = body.clone();
        let args = line.argument_list();
        let count = args
            .first()
            .ok_or_else(|| AsmError::argument("Missing repeat count", None))?
            .integer(&asm.scopes)?;
        if count < 0 {
            return Err(AsmError::argument(
                "Negative repeat count",
                Some(&count.to_string()),
            ));
        }
        let var = args.get(1).map(|expr| variable_name(expr)).transpose()?;
        let start = match args.get(2) {
            Some(expr) => expr.integer(&asm.scopes)?,
            None => 0,
        };
        let step = match args.get(3) {
            Some(expr) => expr.integer(&asm.scopes)?,
            None => 1,
        };
        let values = (0..count)
            .map(|i| Expr::Integer(start.wrapping_add(i.wrapping_mul(step))))
            .collect();
        repeat(line, &body, var.as_deref(), values, asm)
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// `IRP var, value...`
#[derive(Debug)]
pub struct Irp;

impl InstructionFactory for Irp {
    fn expand(&self, line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let Directive::Irp(body) = &line.directive else {
            return Err(missing_body(&line));
        };
        let body = body.clone();
        let args = line.argument_list();
        let var = variable_name(
            args.first()
                .ok_or_else(|| AsmError::argument("Missing repeat variable", None))?,
        )?;
        let values: Vec<Expr> = args.iter().skip(1).map(|expr| (*expr).clone()).collect();
        repeat(line, &body, Some(&var), values, asm)
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// `IF cond` / `ELSE` / `ENDIF`. Only the chosen branch is registered.
#[derive(Debug)]
pub struct If;

impl InstructionFactory for If {
    fn expand(&self, mut line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let Directive::If {
            then_branch,
            else_branch,
        } = std::mem::take(&mut line.directive)
        else {
            return Err(missing_body(&line));
        };
        let cond = line
            .arguments
            .as_ref()
            .ok_or_else(|| AsmError::argument("Missing condition", None))?
            .integer(&asm.scopes)?;
        let branch = if cond != 0 {
            Some(then_branch)
        } else {
            else_branch
        };
        let mut lines = vec![line];
        if let Some(branch) = branch {
            lines.extend(asm.expand_body(branch.lines)?);
        }
        Ok(lines)
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// `PROC` / `ENDP`: a scope boundary; labels inside are reached as `name.label`.
#[derive(Debug)]
pub struct Proc;

impl InstructionFactory for Proc {
    fn expand(&self, mut line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let Directive::Proc(body) = std::mem::take(&mut line.directive) else {
            return Err(missing_body(&line));
        };
        let mut lines = vec![line];
        lines.extend(asm.expand_lines(body.lines)?);
        Ok(lines)
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}

/// `SECTION space` / `ENDS`: the body is laid out inside the `DS` space
/// named by the argument instead of at the current address.
#[derive(Debug)]
pub struct Section;

impl InstructionFactory for Section {
    fn expand(&self, mut line: Line, asm: &mut Assembler) -> Result<Vec<Line>, AsmError> {
        let Directive::Section(body) = std::mem::take(&mut line.directive) else {
            return Err(missing_body(&line));
        };
        let target = line
            .arguments
            .as_ref()
            .ok_or_else(|| AsmError::argument("Missing section space", None))?
            .resolve(&asm.scopes)?;
        let Expr::Space { space, .. } = target else {
            return Err(AsmError::argument(
                "Section target is not a DS space",
                Some(&target.to_string()),
            ));
        };
        let mut lines = vec![line];
        lines.extend(asm.expand_lines(body.lines)?);
        asm.add_section(space, lines);
        Ok(Vec::new())
    }

    fn build(&self, _line: &Line, _asm: &mut Assembler) -> Result<Box<dyn InstructionObject>, AsmError> {
        empty()
    }
}
