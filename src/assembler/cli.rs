// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use super::AssemblerConfig;

pub const VERSION: &str = "1.0";

const LONG_ABOUT: &str = "Z80 macro assembler with lexical scopes, macros, repeats and sections.

SOURCE is assembled in full; OBJECT and SYMBOLS are optional outputs.
OBJECT is written as Intel HEX when its extension is .hex or .ihx and as a
raw binary image otherwise. SYMBOLS receives every symbol of the program as
`name: equ value` lines that can be included by another source.";

#[derive(Parser, Debug)]
#[command(
    name = "zforge",
    version = VERSION,
    about = "Z80 macro assembler with lexical scopes, macros, repeats and sections",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Add a directory to the include search path (repeatable). Files are looked up relative to the including file first, then in each DIR in order."
    )]
    pub include_dirs: Vec<PathBuf>,
    #[arg(value_name = "SOURCE", long_help = "Assembly source file.")]
    pub source: PathBuf,
    #[arg(
        value_name = "OBJECT",
        long_help = "Object output. .hex/.ihx selects Intel HEX, anything else a binary image. When omitted the code is assembled and checked but not written."
    )]
    pub object: Option<PathBuf>,
    #[arg(value_name = "SYMBOLS", long_help = "Symbol listing output.")]
    pub symbols: Option<PathBuf>,
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        default_value = "warn",
        long_help = "Diagnostic log level on stderr: error, warn, info, debug or trace."
    )]
    pub log_level: tracing::Level,
}

impl Cli {
    pub fn config(&self) -> AssemblerConfig {
        AssemblerConfig {
            include_dirs: self.include_dirs.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Binary,
    Hex,
}

impl ObjectFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihx") => {
                ObjectFormat::Hex
            }
            _ => ObjectFormat::Binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positionals_and_includes() {
        let cli = Cli::try_parse_from([
            "zforge", "-I", "lib", "-I", "inc", "main.asm", "out.hex", "out.sym",
        ])
        .unwrap();
        assert_eq!(cli.include_dirs, [PathBuf::from("lib"), PathBuf::from("inc")]);
        assert_eq!(cli.source, PathBuf::from("main.asm"));
        assert_eq!(cli.object.as_deref(), Some(Path::new("out.hex")));
        assert_eq!(cli.symbols.as_deref(), Some(Path::new("out.sym")));
        assert_eq!(cli.log_level, tracing::Level::WARN);
        assert_eq!(cli.config().include_dirs.len(), 2);
    }

    #[test]
    fn source_is_required() {
        assert!(Cli::try_parse_from(["zforge"]).is_err());
    }

    #[test]
    fn log_level_is_parsed() {
        let cli = Cli::try_parse_from(["zforge", "--log-level", "debug", "a.asm"]).unwrap();
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        assert!(cli.object.is_none());
    }

    #[test]
    fn object_format_by_extension() {
        assert_eq!(ObjectFormat::from_path(Path::new("a.HEX")), ObjectFormat::Hex);
        assert_eq!(ObjectFormat::from_path(Path::new("a.ihx")), ObjectFormat::Hex);
        assert_eq!(ObjectFormat::from_path(Path::new("a.bin")), ObjectFormat::Binary);
        assert_eq!(ObjectFormat::from_path(Path::new("rom")), ObjectFormat::Binary);
    }
}
