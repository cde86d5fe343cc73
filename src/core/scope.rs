// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lexical scopes.
//!
//! Scopes live in a single arena owned by the assembler session and refer
//! to their parent by [`ScopeId`]. Each scope has a symbol map and an
//! address slot that is bound exactly once during the resolve phase.
//!
//! Bindings are numbered in the order they are made. A scope can carry a
//! horizon: lookups that leave it towards its parents only see bindings
//! made up to that number. Macro invocations use this to hide symbols
//! defined after the invoking line.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Write;

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::expr::{Expr, MAX_DEPTH};
use crate::core::text_utils::hex_literal;

/// Name every scope binds to itself.
pub const SELF_SYMBOL: &str = "$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Address {
    #[default]
    Unset,
    Bound(u32),
}

#[derive(Debug)]
struct Binding {
    value: Expr,
    serial: u64,
}

#[derive(Debug)]
struct ScopeNode {
    parent: Option<ScopeId>,
    symbols: HashMap<String, Binding>,
    address: Address,
    /// Scope searched after the local map, used to reach the labels of a
    /// macro invocation through the label of the invoking line.
    body: Option<ScopeId>,
    horizon: Option<u64>,
    /// Binding count when the owning line was registered.
    registered: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Scopes {
    nodes: Vec<ScopeNode>,
    serial: u64,
}

fn local_symbol<'a>(node: &'a ScopeNode, name: &str, horizon: Option<u64>) -> Option<&'a Expr> {
    node.symbols
        .get(name)
        .filter(|binding| horizon.map_or(true, |limit| binding.serial <= limit))
        .map(|binding| &binding.value)
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope with `$` bound to itself.
    pub fn create(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.nodes.len());
        let mut symbols = HashMap::new();
        symbols.insert(
            SELF_SYMBOL.to_string(),
            Binding {
                value: Expr::Context(id),
                serial: 0,
            },
        );
        self.nodes.push(ScopeNode {
            parent,
            symbols,
            address: Address::Unset,
            body: None,
            horizon: None,
            registered: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.nodes[scope.0].parent
    }

    pub fn set_body(&mut self, scope: ScopeId, body: ScopeId) {
        self.nodes[scope.0].body = Some(body);
    }

    /// Record that the line owning `scope` has been registered.
    pub fn mark_registered(&mut self, scope: ScopeId) {
        self.nodes[scope.0].registered = Some(self.serial);
    }

    pub fn registered_at(&self, scope: ScopeId) -> Option<u64> {
        self.nodes[scope.0].registered
    }

    /// Hide bindings made after `serial` from lookups passing outward
    /// through `scope`.
    pub fn set_horizon(&mut self, scope: ScopeId, serial: u64) {
        self.nodes[scope.0].horizon = Some(serial);
    }

    pub fn add_symbol(&mut self, scope: ScopeId, name: &str, value: Expr) -> Result<(), AsmError> {
        if name.is_empty() {
            return Err(AsmError::argument("Missing symbol name", None));
        }
        match self.nodes[scope.0].symbols.entry(name.to_string()) {
            Entry::Occupied(_) => Err(AsmError::assembly("Duplicate symbol", Some(name))),
            Entry::Vacant(slot) => {
                self.serial += 1;
                slot.insert(Binding {
                    value,
                    serial: self.serial,
                });
                Ok(())
            }
        }
    }

    pub fn get_symbol(&self, scope: ScopeId, name: &str) -> Result<&Expr, AsmError> {
        self.lookup(scope, name)
            .ok_or_else(|| AsmError::symbol_not_found(name))
    }

    pub fn has_symbol(&self, scope: ScopeId, name: &str) -> bool {
        self.lookup(scope, name).is_some()
    }

    /// Look a name up inside one scope without consulting its parents.
    pub fn get_member(&self, scope: ScopeId, name: &str) -> Result<&Expr, AsmError> {
        self.lookup_local(scope, name, None, 0)
            .ok_or_else(|| AsmError::symbol_not_found(name))
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Expr> {
        let mut current = Some(scope);
        let mut horizon: Option<u64> = None;
        while let Some(id) = current {
            if let Some(value) = self.lookup_local(id, name, horizon, 0) {
                return Some(value);
            }
            let node = &self.nodes[id.0];
            if let Some(limit) = node.horizon {
                horizon = Some(horizon.map_or(limit, |h| h.min(limit)));
            }
            current = node.parent;
        }
        None
    }

    /// Local map, then `prefix.rest` through a local context symbol, then
    /// the body link. `horizon` only filters the names bound here.
    fn lookup_local(
        &self,
        scope: ScopeId,
        name: &str,
        horizon: Option<u64>,
        depth: usize,
    ) -> Option<&Expr> {
        if depth > MAX_DEPTH {
            return None;
        }
        let node = &self.nodes[scope.0];
        if let Some(value) = local_symbol(node, name, horizon) {
            return Some(value);
        }
        for (idx, _) in name.match_indices('.') {
            let (prefix, rest) = (&name[..idx], &name[idx + 1..]);
            if prefix.is_empty() || rest.is_empty() {
                continue;
            }
            let inner = local_symbol(node, prefix, horizon).and_then(|value| self.context_of(value));
            if let Some(found) = inner.and_then(|inner| self.lookup_local(inner, rest, None, depth + 1)) {
                return Some(found);
            }
        }
        node.body
            .and_then(|body| self.lookup_local(body, name, None, depth + 1))
    }

    fn context_of(&self, value: &Expr) -> Option<ScopeId> {
        match value {
            Expr::Context(scope) | Expr::Space { scope, .. } => Some(*scope),
            Expr::Identifier { .. } => value.resolve(self).ok()?.context_scope(),
            _ => None,
        }
    }

    pub fn address(&self, scope: ScopeId) -> Result<u32, AsmError> {
        match self.nodes[scope.0].address {
            Address::Bound(address) => Ok(address),
            Address::Unset => Err(AsmError::new(
                AsmErrorKind::AddressNotInitialized,
                "Address not initialized",
                None,
            )),
        }
    }

    pub fn set_address(&mut self, scope: ScopeId, address: u32) -> Result<(), AsmError> {
        let node = &mut self.nodes[scope.0];
        match node.address {
            Address::Unset => {
                node.address = Address::Bound(address);
                Ok(())
            }
            Address::Bound(old) => Err(AsmError::new(
                AsmErrorKind::AddressAlreadySet,
                "Address already set",
                Some(&hex_literal(i64::from(old))),
            )),
        }
    }

    /// Render every evaluable symbol reachable from `scope` as
    /// `name: equ value` lines, descending into nested contexts with a
    /// dotted prefix. Names are sorted at each level.
    pub fn serialize_symbols(&self, scope: ScopeId) -> String {
        let mut out = String::new();
        self.write_symbols(scope, "", &mut out, 0);
        out
    }

    fn write_symbols(&self, scope: ScopeId, prefix: &str, out: &mut String, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        let node = &self.nodes[scope.0];
        let mut entries: Vec<(&String, &Expr)> = node
            .symbols
            .iter()
            .map(|(name, binding)| (name, &binding.value))
            .collect();
        if let Some(body) = node.body {
            entries.extend(
                self.nodes[body.0]
                    .symbols
                    .iter()
                    .map(|(name, binding)| (name, &binding.value)),
            );
        }
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in entries {
            if name == SELF_SYMBOL {
                continue;
            }
            let full = format!("{prefix}{name}");
            if let Ok(v) = value.integer(self) {
                let _ = writeln!(out, "{full}: equ {}", hex_literal(v));
            }
            if let Expr::Context(inner) = value {
                if *inner != scope {
                    self.write_symbols(*inner, &format!("{full}."), out, depth + 1);
                }
            }
        }
    }
}
