// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 Assembler - main entry point.
//!
//! An [`Assembler`] is one assembly session. It owns the scope arena, the
//! predefined symbols (registers, conditions, directives and mnemonics)
//! and the set of files already loaded for `INCLUDE ONCE`. A parsed
//! [`Source`] runs through four phases:
//!
//! 1. register: labels are bound in their enclosing scope
//! 2. expand: macros, repeats, conditionals, procedures and sections are
//!    flattened into a list of concrete lines
//! 3. resolve: lines are placed top-down and sized
//! 4. generate: every object writes its bytes

pub mod cli;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::expr::{Expr, SpaceId, MAX_DEPTH};
use crate::core::imagestore::ImageStore;
use crate::core::scope::{ScopeId, Scopes};
use crate::core::source::{Line, Source, SourceBuilder};
use crate::instructions::{directive_factories, Empty, InstructionFactory, InstructionObject};
use crate::z80::{table, Z80Instruction, ADDRESS_SPACE, FLAGS, REGISTERS};

use cli::{Cli, ObjectFormat};

pub use cli::VERSION;

/// Session settings that do not come from the source text.
#[derive(Debug, Clone, Default)]
pub struct AssemblerConfig {
    /// Searched in order after the directory of the including file.
    pub include_dirs: Vec<PathBuf>,
}

/// A placed line and the object that encodes it.
#[derive(Debug)]
pub struct Entry {
    pub line: Line,
    pub address: u32,
    pub object: Box<dyn InstructionObject>,
}

impl Entry {
    pub fn size(&self) -> u32 {
        self.object.size()
    }
}

/// Flattened, placed program.
#[derive(Debug)]
pub struct Program {
    /// Scope of the top-level source; its symbols are the program's symbols.
    pub scope: ScopeId,
    pub entries: Vec<Entry>,
}

pub struct Assembler {
    pub scopes: Scopes,
    builtins: ScopeId,
    config: AssemblerConfig,
    loaded: HashSet<PathBuf>,
    spaces: Vec<Vec<Line>>,
    depth: usize,
}

impl Assembler {
    pub fn new() -> Result<Self, AsmError> {
        Self::with_config(AssemblerConfig::default())
    }

    pub fn with_config(config: AssemblerConfig) -> Result<Self, AsmError> {
        let mut scopes = Scopes::new();
        let builtins = scopes.create(None);
        install_builtins(&mut scopes, builtins)?;
        Ok(Self {
            scopes,
            builtins,
            config,
            loaded: HashSet::new(),
            spaces: Vec::new(),
            depth: 0,
        })
    }

    /// Parse source text into a fresh scope below the predefined symbols.
    pub fn parse_text(&mut self, text: &str) -> Result<Source, AsmError> {
        let scope = self.scopes.create(Some(self.builtins));
        SourceBuilder::new(&mut self.scopes, &self.config.include_dirs, &mut self.loaded)
            .parse_text(text, None, scope, None)
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<Source, AsmError> {
        let scope = self.scopes.create(Some(self.builtins));
        SourceBuilder::new(&mut self.scopes, &self.config.include_dirs, &mut self.loaded)
            .parse_file(path, scope, None)
    }

    /// Run all four phases, writing the code into `out`.
    pub fn assemble(&mut self, mut source: Source, out: &mut ImageStore) -> Result<Program, AsmError> {
        debug!(lines = source.lines.len(), "register");
        self.register(&mut source.lines)?;
        let lines = self.expand_lines(source.lines)?;
        debug!(lines = lines.len(), "expanded");
        let program = self.resolve(source.scope, lines)?;
        debug!(entries = program.entries.len(), "resolved");
        self.generate(&program, out)?;
        debug!(bytes = out.num_entries(), "generated");
        Ok(program)
    }

    /// Bind the labels of `lines` in their enclosing scope.
    pub fn register(&mut self, lines: &mut [Line]) -> Result<(), AsmError> {
        for line in lines.iter_mut() {
            let position = line.position.clone();
            self.register_line(line)
                .map_err(|err| err.at(&position, None))?;
        }
        Ok(())
    }

    fn register_line(&mut self, line: &mut Line) -> Result<(), AsmError> {
        match line.label.clone() {
            Some(label) => {
                let value = {
                    let line: &Line = line;
                    line.directive.label_value(line, self)?
                };
                let parent = self
                    .scopes
                    .parent(line.scope)
                    .ok_or_else(|| AsmError::assembly("Line without enclosing scope", None))?;
                self.scopes.add_symbol(parent, &label, value)?;
            }
            None if line.directive.requires_label() => {
                return Err(AsmError::argument("Missing label", line.mnemonic.as_deref()));
            }
            None => {}
        }
        self.scopes.mark_registered(line.scope);
        if let Some(body) = line.directive.registered_body() {
            self.register(&mut body.lines)?;
        }
        Ok(())
    }

    /// Expand lines that are already registered.
    pub fn expand_lines(&mut self, lines: Vec<Line>) -> Result<Vec<Line>, AsmError> {
        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            out.extend(self.expand_line(line)?);
        }
        Ok(out)
    }

    /// Register and expand a freshly instantiated body.
    pub fn expand_body(&mut self, mut lines: Vec<Line>) -> Result<Vec<Line>, AsmError> {
        self.register(&mut lines)?;
        self.expand_lines(lines)
    }

    fn expand_line(&mut self, mut line: Line) -> Result<Vec<Line>, AsmError> {
        let Some(mnemonic) = line.mnemonic.clone() else {
            return Ok(vec![line]);
        };
        let position = line.position.clone();
        let factory = self
            .lookup_factory(line.scope, &mnemonic)
            .map_err(|err| err.at(&position, None))?;
        line.factory = Some(factory.clone());
        if self.depth >= MAX_DEPTH {
            return Err(AsmError::assembly("Expansion too deep", Some(&mnemonic)).at(&position, None));
        }
        self.depth += 1;
        let result = factory.expand(line, self);
        self.depth -= 1;
        result.map_err(|err| err.at(&position, None))
    }

    fn lookup_factory(&self, scope: ScopeId, mnemonic: &str) -> Result<Rc<dyn InstructionFactory>, AsmError> {
        let value = match self.scopes.get_symbol(scope, mnemonic) {
            Ok(value) => value.resolve(&self.scopes)?,
            Err(err) if err.kind() == AsmErrorKind::SymbolNotFound => {
                return Err(AsmError::argument("Unknown instruction", Some(mnemonic)));
            }
            Err(err) => return Err(err),
        };
        match value {
            Expr::Instruction(factory) => Ok(factory),
            _ => Err(AsmError::argument("Not an instruction", Some(mnemonic))),
        }
    }

    /// Allocate a space that sections can be placed into.
    pub fn new_space(&mut self) -> SpaceId {
        self.spaces.push(Vec::new());
        SpaceId(self.spaces.len() - 1)
    }

    pub fn add_section(&mut self, space: SpaceId, lines: Vec<Line>) {
        if let Some(slot) = self.spaces.get_mut(space.0) {
            slot.extend(lines);
        }
    }

    /// Hand the section lines of `space` to the `DS` line that lays them out.
    pub fn take_sections(&mut self, space: SpaceId) -> Vec<Line> {
        self.spaces
            .get_mut(space.0)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Bind the address of `line`, build its object and return it with the
    /// address that follows.
    pub fn place(&mut self, line: &Line, address: u32) -> Result<(Box<dyn InstructionObject>, u32), AsmError> {
        self.place_line(line, address)
            .map_err(|err| err.at(&line.position, None))
    }

    fn place_line(&mut self, line: &Line, address: u32) -> Result<(Box<dyn InstructionObject>, u32), AsmError> {
        self.scopes.set_address(line.scope, address)?;
        let mut object = self.build_object(line)?;
        let next = object.resolve(address, self)?;
        Ok((object, next))
    }

    fn build_object(&mut self, line: &Line) -> Result<Box<dyn InstructionObject>, AsmError> {
        match line.factory.clone() {
            Some(factory) => factory.build(line, self),
            None => Ok(Box::new(Empty)),
        }
    }

    /// Place the expanded lines top-down, starting at address 0.
    pub fn resolve(&mut self, scope: ScopeId, lines: Vec<Line>) -> Result<Program, AsmError> {
        let mut address = 0u32;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            let (object, next) = self.place(&line, address)?;
            if next > ADDRESS_SPACE {
                return Err(AsmError::assembly(
                    "Address out of range",
                    Some(&format!("{next:X}H")),
                )
                .at(&line.position, None));
            }
            entries.push(Entry {
                line,
                address,
                object,
            });
            address = next;
        }
        if self.spaces.iter().any(|lines| !lines.is_empty()) {
            return Err(AsmError::assembly("Section space was never placed", None));
        }
        Ok(Program { scope, entries })
    }

    pub fn generate(&self, program: &Program, out: &mut ImageStore) -> Result<(), AsmError> {
        for entry in &program.entries {
            entry
                .object
                .generate(entry.address, self, out)
                .map_err(|err| err.at(&entry.line.position, None))?;
        }
        Ok(())
    }

    /// Bytes of a single placed entry, for disassembly and stepping.
    pub fn entry_bytes(&self, entry: &Entry) -> Result<Vec<u8>, AsmError> {
        let mut scratch = ImageStore::new();
        entry.object.generate(entry.address, self, &mut scratch)?;
        Ok((0..entry.size())
            .filter_map(|offset| scratch.get(entry.address.wrapping_add(offset)))
            .collect())
    }

    /// Symbol listing of the program scope.
    pub fn symbols(&self, scope: ScopeId) -> String {
        self.scopes.serialize_symbols(scope)
    }
}

fn install_builtins(scopes: &mut Scopes, root: ScopeId) -> Result<(), AsmError> {
    for register in REGISTERS {
        add_spellings(scopes, root, register.name(), Expr::Register(*register), false)?;
    }
    for flag in FLAGS {
        add_spellings(scopes, root, flag.name(), Expr::Flag(*flag), false)?;
    }
    for (name, factory) in directive_factories() {
        add_spellings(scopes, root, name, Expr::Instruction(factory), true)?;
    }
    for mnemonic in table::mnemonics() {
        let factory: Rc<dyn InstructionFactory> = Rc::new(Z80Instruction::new(mnemonic));
        add_spellings(scopes, root, mnemonic, Expr::Instruction(factory), true)?;
    }
    Ok(())
}

/// Bind `name` in lower and upper case, and for instructions also with a
/// leading dot.
fn add_spellings(
    scopes: &mut Scopes,
    root: ScopeId,
    name: &str,
    value: Expr,
    dotted: bool,
) -> Result<(), AsmError> {
    let upper = name.to_ascii_uppercase();
    let mut spellings = vec![name.to_string(), upper.clone()];
    if dotted {
        spellings.push(format!(".{name}"));
        spellings.push(format!(".{upper}"));
    }
    for spelling in spellings {
        scopes.add_symbol(root, &spelling, value.clone())?;
    }
    Ok(())
}

/// Assemble the files named on the command line.
pub fn run(cli: &Cli) -> Result<(), AsmError> {
    let mut asm = Assembler::with_config(cli.config())?;
    let source = asm.parse_file(&cli.source)?;
    let scope = source.scope;
    let mut image = ImageStore::new();
    asm.assemble(source, &mut image)?;

    if let Some(path) = &cli.object {
        write_object(path, &image)?;
        info!(file = %path.display(), bytes = image.num_entries(), "wrote object");
    }
    if let Some(path) = &cli.symbols {
        fs::write(path, asm.symbols(scope))
            .map_err(|err| AsmError::io(&err, &path.display().to_string()))?;
        info!(file = %path.display(), "wrote symbols");
    }
    Ok(())
}

fn write_object(path: &Path, image: &ImageStore) -> Result<(), AsmError> {
    let io_error = |err: std::io::Error| AsmError::io(&err, &path.display().to_string());
    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    match ObjectFormat::from_path(path) {
        ObjectFormat::Hex => image.write_hex_file(&mut out),
        ObjectFormat::Binary => image.write_bin_file(&mut out),
    }
    .and_then(|_| out.flush())
    .map_err(io_error)
}
