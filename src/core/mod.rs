// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! CPU-agnostic assembler core.
//!
//! # Components
//!
//! - [`error`] - Error kinds, context frames and report formatting
//! - [`text_utils`] - Character classes, Latin-1 and hex literal helpers
//! - [`scope`] - Scope arena with one-shot addresses and dotted lookup
//! - [`expr`] - Expression tree, lazy resolution and evaluation
//! - [`expr_builder`] - Operator-precedence expression construction
//! - [`line_parser`] - Character state machine producing [`source::Line`]s
//! - [`source`] - Lines, sources and the block-structured reader
//! - [`directive`] - Per-line label binding and nested bodies
//! - [`imagestore`] - Binary and Intel HEX output

pub mod directive;
pub mod error;
pub mod expr;
pub mod expr_builder;
pub mod imagestore;
pub mod line_parser;
pub mod scope;
pub mod source;
pub mod text_utils;

// Re-exports for convenience
pub use error::{AsmError, AsmErrorKind, ContextFrame, Position};
pub use expr::Expr;
pub use imagestore::ImageStore;
pub use scope::{ScopeId, Scopes};
pub use source::{Line, Source};
