// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for zforge.

use clap::Parser;

use zforge::assembler::cli::Cli;

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    let use_color = std::env::var("NO_COLOR").is_err();
    if let Err(err) = zforge::assembler::run(&cli) {
        eprintln!("{}", err.format_with_context(use_color));
        std::process::exit(1);
    }
}
