//! Assemble-then-run scenarios, driving the whole toolchain: source
//! text through the assembler, the big-endian object format, the
//! loader and the interpreter, with a scripted console standing in
//! for the terminal.

use lc3emu::asm::assemble;
use lc3emu::console::Scripted;
use lc3emu::obj::{serialize, Image};
use lc3emu::vm::registers::CondFlag;
use lc3emu::vm::Vm;

/// Assemble `source`, push it through the object format, and run it
/// against a console fed with `input`
fn assemble_and_run(source: &str, input: &str) -> (Vm<Scripted>, String) {
    let words = assemble(source).expect("program should assemble");
    let image = Image::parse(&serialize(&words)).expect("image should parse");

    let mut vm = Vm::new(Scripted::new());
    vm.console_mut().feed(input);
    image.load_into(&mut vm);
    vm.run().expect("program should run to halt");

    let output = vm.console_mut().take_output();
    (vm, output)
}

#[test]
fn halt_program_runs_and_announces() {
    let words = assemble(".ORIG x3000\nHALT\n.END").unwrap();
    assert_eq!(words, vec![0x3000, 0xf025]);

    let (vm, output) = assemble_and_run(".ORIG x3000\nHALT\n.END", "");
    assert!(vm.halted());
    assert_eq!(output, "HALT\n");
}

#[test]
fn hello_program_prints_its_string() {
    let source = ".ORIG x3000\n\
                  LEA R0, HELLO\n\
                  PUTS\n\
                  HALT\n\
                  HELLO .STRINGZ \"Hi\"\n\
                  .END";
    let words = assemble(source).unwrap();
    assert_eq!(
        words,
        vec![0x3000, 0xe002, 0xf022, 0xf025, 0x0048, 0x0069, 0x0000]
    );

    let (_, output) = assemble_and_run(source, "");
    assert_eq!(output, "HiHALT\n");
}

#[test]
fn getc_out_echoes_a_character() {
    let (vm, output) =
        assemble_and_run(".ORIG x3000\nGETC\nOUT\nHALT\n.END", "A");
    assert_eq!(vm.registers.read(0), u16::from(b'A'));
    assert_eq!(output, "AHALT\n");
}

#[test]
fn countdown_loop_branches_until_zero() {
    let source = ".ORIG x3000\n\
                  AND R0, R0, #0\n\
                  ADD R0, R0, #3\n\
                  LOOP ADD R0, R0, #-1\n\
                  BRp LOOP\n\
                  HALT\n\
                  .END";
    let (vm, output) = assemble_and_run(source, "");
    assert_eq!(vm.registers.read(0), 0);
    assert_eq!(vm.registers.cond, CondFlag::Zro);
    assert_eq!(output, "HALT\n");
}

#[test]
fn subroutine_call_and_return() {
    let source = ".ORIG x3000\n\
                  JSR FIVE\n\
                  HALT\n\
                  FIVE AND R0, R0, #0\n\
                  ADD R0, R0, #5\n\
                  RET\n\
                  .END";
    let (vm, _) = assemble_and_run(source, "");
    assert_eq!(vm.registers.read(0), 5);
}

#[test]
fn fill_and_ld_cooperate() {
    let source = ".ORIG x3000\n\
                  LD R1, VALUE\n\
                  HALT\n\
                  VALUE .FILL xBEEF\n\
                  .END";
    let (vm, _) = assemble_and_run(source, "");
    assert_eq!(vm.registers.read(1), 0xbeef);
    assert_eq!(vm.registers.cond, CondFlag::Neg);
}

#[test]
fn origin_other_than_x3000_is_honored() {
    let source = ".ORIG x4000\nHALT\n.END";
    let (vm, output) = assemble_and_run(source, "");
    assert!(vm.halted());
    assert_eq!(output, "HALT\n");
}
