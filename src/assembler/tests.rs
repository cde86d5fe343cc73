// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use super::*;
use crate::core::error::AsmErrorKind;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

fn assemble_with(asm: &mut Assembler, text: &str) -> Result<(Program, ImageStore), AsmError> {
    let source = asm.parse_text(text)?;
    let mut image = ImageStore::new();
    let program = asm.assemble(source, &mut image)?;
    Ok((program, image))
}

fn assemble(text: &str) -> Result<ImageStore, AsmError> {
    let mut asm = Assembler::new()?;
    assemble_with(&mut asm, text).map(|(_, image)| image)
}

fn bytes(text: &str) -> Vec<u8> {
    match assemble(text) {
        Ok(image) => image.to_binary(),
        Err(err) => panic!("{}", err.format_with_context(false)),
    }
}

fn error(text: &str) -> AsmError {
    match assemble(text) {
        Ok(image) => panic!("expected an error, got {:02X?}", image.to_binary()),
        Err(err) => err,
    }
}

fn create_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join(format!("test-{label}-{}-{nanos}", process::id()));
    fs::create_dir_all(&dir).expect("Create temp dir");
    dir
}

fn write_file(path: &Path, contents: &[u8]) {
    fs::write(path, contents).expect("Write test file");
}

#[test]
fn assembles_simple_program() {
    assert_eq!(bytes(" xor a\n ret\n"), [0xAF, 0xC9]);
}

#[test]
fn org_sets_hex_record_address() {
    let image = assemble(" org 100H\n xor a\n ret\n").unwrap();
    let mut out = Vec::new();
    image.write_hex_file(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        ":02010000AFC985\r\n:00000001FF\r\n"
    );
}

#[test]
fn index_offsets_fold() {
    assert_eq!(bytes(" and (ix+1+2)\n"), [0xDD, 0xA6, 0x03]);
    assert_eq!(bytes(" ld (iy-2),a\n"), [0xFD, 0x77, 0xFE]);
    assert_eq!(bytes("off: equ 4\n ld b,(ix+off*2)\n"), [0xDD, 0x46, 0x08]);
}

#[test]
fn index_offset_must_fit_signed_byte() {
    let err = error(" ld a,(ix+200)\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Index offset out of range"));
}

#[test]
fn equ_can_alias_register() {
    assert_eq!(bytes("acc: equ a\n ld acc,b\n"), [0x78]);
}

#[test]
fn forward_references_resolve_in_one_pass() {
    assert_eq!(bytes(" jr fwd\n nop\nfwd: ret\n"), [0x18, 0x01, 0x00, 0xC9]);
    assert_eq!(
        bytes(" ld hl,data\n ret\ndata: db 1\n"),
        [0x21, 0x04, 0x00, 0xC9, 0x01]
    );
}

#[test]
fn data_directives() {
    assert_eq!(
        bytes(" db \"AB\", 0\n dw 1234H\n dd 1\n"),
        [0x41, 0x42, 0x00, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00]
    );
    assert_eq!(bytes(" ld a,'x'\n ld b,\"abc\"[1]\n"), [0x3E, 0x78, 0x06, 0x62]);
    let err = error(" db 256\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
}

#[test]
fn addresses_stay_inside_64k() {
    let err = error(" org 10000H\n nop\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Invalid address"));

    let err = error(" ds 0FFFFFFFFh\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Invalid size"));

    let err = error(" org 0FFFEH\n ld hl,0\n");
    assert_eq!(err.kind(), AsmErrorKind::Assembly);
    assert!(err.message().contains("Address out of range"));
    assert_eq!(err.frames()[0].line, 2);

    let image = assemble(" org 0FFFFH\n nop\n").unwrap();
    assert_eq!(image.get(0xFFFF), Some(0x00));
}

#[test]
fn sections_are_laid_out_inside_their_space() {
    let text = concat!(
        " jp start\n",
        "buf: ds 4, 0ffh\n",
        " section buf\n",
        "val: db 1,2\n",
        " ends\n",
        "start: ld hl,val\n",
    );
    assert_eq!(
        bytes(text),
        [0xC3, 0x07, 0x00, 0x01, 0x02, 0xFF, 0xFF, 0x21, 0x03, 0x00]
    );
}

#[test]
fn section_target_through_equ_alias() {
    let text = "ram: ds 2\nalias: equ ram\n section alias\n db 9\n ends\n";
    assert_eq!(bytes(text), [0x09, 0x00]);
}

#[test]
fn section_overflow_is_assembly_error() {
    let err = error("buf: ds 2\n section buf\n db 1,2,3\n ends\n");
    assert_eq!(err.kind(), AsmErrorKind::Assembly);
    assert!(err.message().contains("Section size exceeds space"));
    assert_eq!(err.frames()[0].line, 1);
}

#[test]
fn section_target_must_be_space() {
    let err = error("lbl: nop\n section lbl\n nop\n ends\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
}

#[test]
fn virtual_space_reserves_addresses_only() {
    let text = concat!(
        " org 8000H\n",
        "vars: ds virtual 4\n",
        " section vars\n",
        "x: ds 2\n",
        " ends\n",
        " ld hl,x\n",
    );
    let image = assemble(text).unwrap();
    assert_eq!(image.num_entries(), 3);
    assert_eq!(image.get(0x8000), None);
    assert_eq!(image.get(0x8004), Some(0x21));
    assert_eq!(image.get(0x8005), Some(0x00));
    assert_eq!(image.get(0x8006), Some(0x80));
}

#[test]
fn macro_invocations_get_their_own_labels() {
    let text = "spin: macro\nloop: djnz loop\n endm\n spin\n spin\n";
    assert_eq!(bytes(text), [0x10, 0xFE, 0x10, 0xFE]);
}

#[test]
fn macro_parameters_and_defaults() {
    let text = "load: macro reg, val = 1\n ld reg, val\n endm\n load b, 5\n load c\n";
    assert_eq!(bytes(text), [0x06, 0x05, 0x0E, 0x01]);
}

#[test]
fn macro_argument_count_is_checked() {
    let define = "one: macro x\n db x\n endm\n";
    let err = error(&format!("{define} one 1, 2\n"));
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Too many arguments"));
    let err = error(&format!("{define} one\n"));
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Missing argument"));
}

#[test]
fn macro_parameters_must_be_identifiers() {
    let err = error("bad: macro 1\n endm\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
}

#[test]
fn macro_body_sees_symbols_defined_before_invocation() {
    let text = "emit: macro\n db value\n endm\nvalue: equ 7\n emit\n";
    assert_eq!(bytes(text), [0x07]);
}

#[test]
fn macro_body_does_not_see_symbols_defined_after_invocation() {
    let err = error("emit: macro\n db value\n endm\n emit\nvalue: equ 7\n");
    assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
    assert_eq!(err.frames()[0].line, 2);

    let err = error("emit: macro\n if value\n nop\n endif\n endm\n emit\nvalue: equ 1\n");
    assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
}

#[test]
fn macro_invocations_address_their_own_labels() {
    let text = "test: MACRO\n ld hl,test2\ntest2:\n ENDM\n test\n test\n";
    assert_eq!(bytes(text), [0x21, 0x03, 0x00, 0x21, 0x06, 0x00]);
}

#[test]
fn macro_labels_are_hidden_but_reachable_through_call_label() {
    let define = "mk: macro\ninner: nop\n endm\n";
    let err = error(&format!("{define} mk\n jp inner\n"));
    assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
    assert_eq!(
        bytes(&format!("{define}first: mk\nsecond: mk\n jp second.inner\n")),
        [0x00, 0x00, 0xC3, 0x01, 0x00]
    );
}

#[test]
fn macro_errors_report_invocation_site() {
    let err = error("bad: macro\n ld a,(ix+200)\n endm\n nop\n bad\n");
    let frames = err.frames();
    assert_eq!(frames[0].line, 2);
    assert_eq!(frames[1].line, 5);
    let report = err.format_with_context(false);
    assert!(report.contains("ERROR: Index offset out of range"), "{report}");
    assert!(report.contains("  at 5 |  bad"), "{report}");
}

#[test]
fn recursive_macros_hit_depth_limit() {
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(|| {
            let err = error("again: macro\n again\n endm\n again\n");
            (err.kind(), err.message().to_string())
        })
        .unwrap();
    let (kind, message) = handle.join().unwrap();
    assert_eq!(kind, AsmErrorKind::Assembly);
    assert!(message.contains("Expansion too deep"), "{message}");
}

#[test]
fn if_selects_one_branch() {
    assert_eq!(bytes(" if 1\n nop\n else\n halt\n endif\n"), [0x00]);
    assert_eq!(bytes(" if 2 - 2\n nop\n else\n halt\n endif\n"), [0x76]);
    assert_eq!(bytes(" if 0\n nop\n endif\n ret\n"), [0xC9]);
}

#[test]
fn ternary_with_symbol_condition() {
    assert_eq!(bytes("flag: equ 1\n db flag ? 2 : 3\n"), [0x02]);
    assert_eq!(bytes("flag: equ 0\n db flag ? 2 : 3\n"), [0x03]);
}

#[test]
fn if_condition_may_be_defined_later() {
    assert_eq!(bytes(" if later\n nop\n endif\nlater: equ 1\n"), [0x00]);
}

#[test]
fn dead_branch_labels_are_not_registered() {
    let err = error(" if 0\ndead: nop\n endif\n jp dead\n");
    assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
    assert_eq!(err.frames()[0].line, 4);
}

#[test]
fn dead_branch_error_directive_is_ignored() {
    assert_eq!(bytes(" if 0\n error \"boom\"\n endif\n nop\n"), [0x00]);
}

#[test]
fn error_directive_fails_assembly() {
    let err = error(" nop\n error \"boom\"\n");
    assert_eq!(err.kind(), AsmErrorKind::ErrorDirective);
    assert_eq!(err.message(), "boom");
    assert_eq!(err.frames()[0].line, 2);
}

#[test]
fn warning_directive_does_not_fail() {
    assert_eq!(bytes(" warning \"check\"\n nop\n"), [0x00]);
}

#[test]
fn rept_binds_variable_per_iteration() {
    assert_eq!(bytes(" rept 3, i, 1, 2\n db i\n endm\n"), [0x01, 0x03, 0x05]);
    assert_eq!(bytes(" rept 3, ?v, 10, 5\n db ?v\n endm\n"), [0x0A, 0x0F, 0x14]);
    assert_eq!(bytes(" rept 2\n nop\n endm\n"), [0x00, 0x00]);
    assert!(bytes(" rept 0\n nop\n endm\n").is_empty());
}

#[test]
fn rept_count_must_not_be_negative() {
    let err = error(" rept -1\n nop\n endm\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
}

#[test]
fn irp_iterates_values() {
    assert_eq!(bytes(" irp v, 1, 2\n db v*2\n endm\n"), [0x02, 0x04]);
    assert_eq!(bytes(" irp v\n db v\n endm\n nop\n"), [0x00]);
}

#[test]
fn iteration_labels_are_reachable_by_index() {
    let text = " jp tbl.1.here\ntbl: rept 2\nhere: nop\n endm\n";
    assert_eq!(bytes(text), [0xC3, 0x04, 0x00, 0x00, 0x00]);
}

#[test]
fn proc_labels_are_reachable_by_member() {
    let text = " call util.entry\nutil: proc\nentry: ret\n endp\n";
    assert_eq!(bytes(text), [0xCD, 0x03, 0x00, 0xC9]);
    let err = error(" call entry\nutil: proc\nentry: ret\n endp\n");
    assert_eq!(err.kind(), AsmErrorKind::SymbolNotFound);
}

#[test]
fn duplicate_symbol_is_rejected() {
    let err = error("a1: nop\na1: nop\n");
    assert_eq!(err.kind(), AsmErrorKind::Assembly);
    assert!(err.message().contains("Duplicate symbol"));
    assert_eq!(err.frames()[0].line, 2);
}

#[test]
fn unknown_instruction_is_reported() {
    let err = error(" frobnicate a\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
    assert!(err.message().contains("Unknown instruction"));
    let err = error("x: equ 1\n x\n");
    assert!(err.message().contains("Not an instruction"));
}

#[test]
fn mnemonics_accept_upper_case_and_dot() {
    assert_eq!(bytes(" LD A,B\n .org 2\n .DB 1\n"), [0x78, 0x00, 0x01]);
}

#[test]
fn equ_requires_label() {
    let err = error(" equ 5\n");
    assert_eq!(err.kind(), AsmErrorKind::Argument);
}

#[test]
fn symbol_listing_round_trips() {
    let mut asm = Assembler::new().unwrap();
    let text = "start: nop\ncount: equ 3\n org 0C000H\nbuf: ds 2\n";
    let (program, _) = assemble_with(&mut asm, text).unwrap();
    let symbols = asm.symbols(program.scope);
    assert_eq!(
        symbols,
        "buf: equ 0C000H\ncount: equ 0003H\nstart: equ 0000H\n"
    );
    assert_eq!(bytes(&format!("{symbols} dw buf\n")), [0x00, 0xC0]);
}

#[test]
fn symbol_listing_descends_into_contexts() {
    let mut asm = Assembler::new().unwrap();
    let text = "tbl: rept 2\nhere: nop\n endm\n";
    let (program, _) = assemble_with(&mut asm, text).unwrap();
    assert_eq!(
        asm.symbols(program.scope),
        "tbl: equ 0000H\ntbl.0.here: equ 0000H\ntbl.1.here: equ 0001H\n"
    );
}

#[test]
fn entry_bytes_for_single_line() {
    let mut asm = Assembler::new().unwrap();
    let (program, _) = assemble_with(&mut asm, " nop\n ld bc,1234H\n").unwrap();
    let entry = &program.entries[1];
    assert_eq!(entry.address, 1);
    assert_eq!(entry.size(), 3);
    assert_eq!(asm.entry_bytes(entry).unwrap(), [0x01, 0x34, 0x12]);
}

#[test]
fn include_once_and_include_dirs() {
    let dir = create_temp_dir("include");
    let inc = dir.join("inc");
    fs::create_dir_all(&inc).expect("Create include dir");
    write_file(&dir.join("lib.asm"), b" db 1\n");
    write_file(&inc.join("defs.asm"), b"two: equ 2\n");
    let main = dir.join("main.asm");
    write_file(
        &main,
        b" include once \"lib.asm\"\n include once \"lib.asm\"\n include \"defs.asm\"\n db two\n",
    );
    let mut asm = Assembler::with_config(AssemblerConfig {
        include_dirs: vec![inc],
    })
    .unwrap();
    let source = asm.parse_file(&main).unwrap();
    let mut image = ImageStore::new();
    asm.assemble(source, &mut image).unwrap();
    assert_eq!(image.to_binary(), [0x01, 0x02]);
}

#[test]
fn missing_include_is_io_error() {
    let err = error(" include \"no-such-file.asm\"\n");
    assert_eq!(err.kind(), AsmErrorKind::Io);
    assert_eq!(err.frames()[0].line, 1);
}

#[test]
fn incbin_reads_range() {
    let dir = create_temp_dir("incbin");
    write_file(&dir.join("data.bin"), &[1, 2, 3, 4]);
    let main = dir.join("main.asm");
    write_file(&main, b" incbin \"data.bin\", 1, 2\n incbin \"data.bin\"\n");
    let mut asm = Assembler::new().unwrap();
    let source = asm.parse_file(&main).unwrap();
    let mut image = ImageStore::new();
    asm.assemble(source, &mut image).unwrap();
    assert_eq!(image.to_binary(), [2, 3, 1, 2, 3, 4]);
}

#[test]
fn run_writes_object_and_symbols() {
    let dir = create_temp_dir("run");
    let main = dir.join("main.asm");
    write_file(&main, b"start: xor a\n ret\n");
    let cli = Cli {
        include_dirs: Vec::new(),
        source: main,
        object: Some(dir.join("main.bin")),
        symbols: Some(dir.join("main.sym")),
        log_level: tracing::Level::WARN,
    };
    run(&cli).unwrap();
    assert_eq!(fs::read(dir.join("main.bin")).unwrap(), [0xAF, 0xC9]);
    assert_eq!(
        fs::read_to_string(dir.join("main.sym")).unwrap(),
        "start: equ 0000H\n"
    );
}
