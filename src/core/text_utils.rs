// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Shared character classes and text helpers for the line parser.

/// Check if a character can start an identifier.
#[inline]
pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '?' | '@')
}

/// Check if a character can continue an identifier.
#[inline]
pub fn is_ident_char(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '$'
}

/// Check if a character is inline whitespace (space or tab).
#[inline]
pub fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Decode single-byte source text. Every byte maps to the code point of the
/// same value, so arbitrary Latin-1 input round-trips through `char`.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Normalize a mnemonic for directive matching: lower case, optional leading dot removed.
pub fn directive_key(mnemonic: &str) -> String {
    mnemonic
        .strip_prefix('.')
        .unwrap_or(mnemonic)
        .to_ascii_lowercase()
}

/// Format a value as a hex literal that the line parser reads back (`0C000H`).
pub fn hex_literal(value: i64) -> String {
    let (sign, magnitude) = if value < 0 {
        ("-", value.unsigned_abs())
    } else {
        ("", value as u64)
    };
    let digits = format!("{magnitude:04X}");
    if digits.starts_with(|c: char| c.is_ascii_alphabetic()) {
        format!("{sign}0{digits}H")
    } else {
        format!("{sign}{digits}H")
    }
}
