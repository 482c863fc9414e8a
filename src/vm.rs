//! LC-3 virtual machine
//!
//! This module contains an interpreter for the LC-3, a 16-bit
//! educational computer with eight general registers, PC-relative
//! addressing and TRAP-based system calls. The machine model is:
//!
//! * a flat 65536-word memory, with the keyboard device mapped at
//!   KBSR/KBDR (see the memory module)
//! * eight general registers, a program counter and a condition flag
//!   that always reflects the sign of the last general-register write
//! * all console traffic goes through the [`Console`] trait, so the
//!   same machine runs against a real terminal or a scripted test
//!   console
//!
//! The member function step() controls execution. Each time it is
//! called, the word at the current pc is fetched (incrementing the pc),
//! the top four bits are decoded, and the instruction is executed. The
//! two reserved opcodes (RTI and RES) and an out-of-table trap vector
//! are returned as errors, for the caller to report. run() steps until
//! the HALT service routine stops the machine.
//!
//! One character of keyboard input is latched inside the machine when
//! a program polls the keyboard status register, so that repeated
//! status polls cannot consume and lose input.

use thiserror::Error;

use crate::console::Console;
use crate::utils::{extract_field, sign_extend};

use self::memory::{Memory, KBDR, KBSR};
use self::registers::Registers;

pub mod memory;
pub mod registers;

/// Instruction classes, selected by bits [15:12] of every word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Br = 0,
    Add,
    Ld,
    St,
    Jsr,
    And,
    Ldr,
    Str,
    Rti,
    Not,
    Ldi,
    Sti,
    Jmp,
    Res,
    Lea,
    Trap,
}

impl Opcode {
    /// Decode the opcode class of an instruction word. Total: all
    /// sixteen values of the four-bit field name a class, including
    /// the two reserved ones.
    pub fn decode(word: u16) -> Self {
        match word >> 12 {
            0 => Opcode::Br,
            1 => Opcode::Add,
            2 => Opcode::Ld,
            3 => Opcode::St,
            4 => Opcode::Jsr,
            5 => Opcode::And,
            6 => Opcode::Ldr,
            7 => Opcode::Str,
            8 => Opcode::Rti,
            9 => Opcode::Not,
            10 => Opcode::Ldi,
            11 => Opcode::Sti,
            12 => Opcode::Jmp,
            13 => Opcode::Res,
            14 => Opcode::Lea,
            15 => Opcode::Trap,
            _ => unreachable!("four-bit field"),
        }
    }
}

/// Service routines reachable through TRAP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapVector {
    Getc = 0x20,
    Out = 0x21,
    Puts = 0x22,
    In = 0x23,
    Putsp = 0x24,
    Halt = 0x25,
}

impl TrapVector {
    fn from_vector(vector: u16) -> Option<Self> {
        match vector {
            0x20 => Some(TrapVector::Getc),
            0x21 => Some(TrapVector::Out),
            0x22 => Some(TrapVector::Puts),
            0x23 => Some(TrapVector::In),
            0x24 => Some(TrapVector::Putsp),
            0x25 => Some(TrapVector::Halt),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Unused op code {opcode:?} at pc {pc:#06x}")]
    UnusedOpcode { opcode: Opcode, pc: u16 },
    #[error("unknown trap vector {vector:#04x} at pc {pc:#06x}")]
    UnknownTrap { vector: u16, pc: u16 },
}

#[derive(Debug)]
pub struct Vm<C: Console> {
    pub registers: Registers,
    pub memory: Memory,
    console: C,
    pending_key: Option<u8>,
    halted: bool,
    trace: bool,
}

impl<C: Console> Vm<C> {
    pub fn new(console: C) -> Self {
        Self {
            registers: Registers::new(),
            memory: Memory::new(),
            console,
            pending_key: None,
            halted: false,
            trace: false,
        }
    }

    /// Print the pc, fetched word and decoded opcode on every step
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.registers.pc = pc;
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Copy a program into memory starting at `origin` and point the
    /// pc at its first word
    pub fn load(&mut self, origin: u16, words: &[u16]) {
        let mut addr = origin;
        for &word in words {
            self.memory.write(addr, word);
            addr = addr.wrapping_add(1);
        }
        self.registers.pc = origin;
    }

    /// Step until the machine halts or an instruction fails to decode
    pub fn run(&mut self) -> Result<(), ExecError> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    /// Fetch, decode and execute one instruction
    pub fn step(&mut self) -> Result<(), ExecError> {
        let pc = self.registers.pc;
        let instr = self.mem_read(pc);
        self.registers.pc = pc.wrapping_add(1);
        let opcode = Opcode::decode(instr);

        if self.trace {
            println!("pc={pc:#06x} instr={instr:#06x} {opcode:?}");
            println!("  {}", self.registers);
        }

        match opcode {
            Opcode::Add => self.add(instr),
            Opcode::And => self.and(instr),
            Opcode::Not => self.not(instr),
            Opcode::Br => self.br(instr),
            Opcode::Jmp => self.jmp(instr),
            Opcode::Jsr => self.jsr(instr),
            Opcode::Ld => self.ld(instr),
            Opcode::Ldi => self.ldi(instr),
            Opcode::Ldr => self.ldr(instr),
            Opcode::Lea => self.lea(instr),
            Opcode::St => self.st(instr),
            Opcode::Sti => self.sti(instr),
            Opcode::Str => self.str(instr),
            Opcode::Trap => self.trap(instr, pc)?,
            Opcode::Rti | Opcode::Res => {
                return Err(ExecError::UnusedOpcode { opcode, pc })
            }
        }
        Ok(())
    }

    /// Read a word of memory. A read of the keyboard status register
    /// first polls the console, latching one character in the machine;
    /// a read of the keyboard data register drains the latch.
    fn mem_read(&mut self, addr: u16) -> u16 {
        if addr == KBSR {
            if self.pending_key.is_none() {
                self.pending_key = Some(self.console.get_char());
            }
            let key = self.pending_key.expect("latched above");
            self.memory.write(KBSR, 1 << 15);
            self.memory.write(KBDR, key.into());
        } else if addr == KBDR {
            if self.pending_key.take().is_some() {
                self.memory.write(KBSR, 0);
            }
        }
        self.memory.read(addr)
    }

    /// Take the next keyboard character: the latched one if a status
    /// poll already fetched it, otherwise a fresh blocking read
    fn read_key(&mut self) -> u8 {
        match self.pending_key.take() {
            Some(key) => {
                self.memory.write(KBSR, 0);
                key
            }
            None => self.console.get_char(),
        }
    }

    /// Second operand of ADD and AND: a register, or a sign-extended
    /// five-bit immediate when bit [5] is set
    fn second_operand(&self, instr: u16) -> u16 {
        if extract_field(instr, 5, 5) == 1 {
            sign_extend(extract_field(instr, 4, 0), 5)
        } else {
            self.registers.read(extract_field(instr, 2, 0))
        }
    }

    /// PC-relative effective address: pc (already incremented) plus
    /// the sign-extended nine-bit offset
    fn pc_relative(&self, instr: u16) -> u16 {
        self.registers
            .pc
            .wrapping_add(sign_extend(extract_field(instr, 8, 0), 9))
    }

    /// Add the second operand to SR1, setting the condition flags
    fn add(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let sr1 = extract_field(instr, 8, 6);
        let value = self.registers.read(sr1).wrapping_add(self.second_operand(instr));
        self.registers.write(dr, value);
        self.registers.update_flags(dr);
    }

    /// Bitwise-and the second operand with SR1, setting the flags
    fn and(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let sr1 = extract_field(instr, 8, 6);
        let value = self.registers.read(sr1) & self.second_operand(instr);
        self.registers.write(dr, value);
        self.registers.update_flags(dr);
    }

    /// Bitwise complement of SR into DR, setting the flags
    fn not(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let sr = extract_field(instr, 8, 6);
        self.registers.write(dr, !self.registers.read(sr));
        self.registers.update_flags(dr);
    }

    /// Conditional branch: taken when the instruction's nzp bits
    /// intersect the current condition flag
    fn br(&mut self, instr: u16) {
        let nzp = extract_field(instr, 11, 9);
        if nzp & self.registers.cond.bits() != 0 {
            self.registers.pc = self.pc_relative(instr);
        }
    }

    /// Unconditional jump through a base register (RET is JMP R7)
    fn jmp(&mut self, instr: u16) {
        let base = extract_field(instr, 8, 6);
        self.registers.pc = self.registers.read(base);
    }

    /// Jump to subroutine, saving the return address in R7. Bit [11]
    /// selects the PC-relative form (JSR) over the register form
    /// (JSRR); the base register is read before R7 is written, so
    /// JSRR R7 jumps to the old value.
    fn jsr(&mut self, instr: u16) {
        let return_addr = self.registers.pc;
        let target = if extract_field(instr, 11, 11) == 1 {
            self.registers
                .pc
                .wrapping_add(sign_extend(extract_field(instr, 10, 0), 11))
        } else {
            self.registers.read(extract_field(instr, 8, 6))
        };
        self.registers.write(7, return_addr);
        self.registers.pc = target;
    }

    fn ld(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let addr = self.pc_relative(instr);
        let value = self.mem_read(addr);
        self.registers.write(dr, value);
        self.registers.update_flags(dr);
    }

    /// Load indirect: the PC-relative word holds the address of the
    /// value
    fn ldi(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let pointer = self.pc_relative(instr);
        let addr = self.mem_read(pointer);
        let value = self.mem_read(addr);
        self.registers.write(dr, value);
        self.registers.update_flags(dr);
    }

    fn ldr(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let base = extract_field(instr, 8, 6);
        let addr = self
            .registers
            .read(base)
            .wrapping_add(sign_extend(extract_field(instr, 5, 0), 6));
        let value = self.mem_read(addr);
        self.registers.write(dr, value);
        self.registers.update_flags(dr);
    }

    /// Load effective address: no memory access, but the flags are
    /// still set from the computed address
    fn lea(&mut self, instr: u16) {
        let dr = extract_field(instr, 11, 9);
        let addr = self.pc_relative(instr);
        self.registers.write(dr, addr);
        self.registers.update_flags(dr);
    }

    fn st(&mut self, instr: u16) {
        let sr = extract_field(instr, 11, 9);
        let addr = self.pc_relative(instr);
        self.memory.write(addr, self.registers.read(sr));
    }

    /// Store indirect, through the pointer at the PC-relative address
    fn sti(&mut self, instr: u16) {
        let sr = extract_field(instr, 11, 9);
        let pointer = self.pc_relative(instr);
        let addr = self.mem_read(pointer);
        self.memory.write(addr, self.registers.read(sr));
    }

    fn str(&mut self, instr: u16) {
        let sr = extract_field(instr, 11, 9);
        let base = extract_field(instr, 8, 6);
        let addr = self
            .registers
            .read(base)
            .wrapping_add(sign_extend(extract_field(instr, 5, 0), 6));
        self.memory.write(addr, self.registers.read(sr));
    }

    /// Save the return address in R7 and dispatch the service routine
    /// selected by the low eight bits
    fn trap(&mut self, instr: u16, pc: u16) -> Result<(), ExecError> {
        self.registers.write(7, self.registers.pc);
        let vector = extract_field(instr, 7, 0);
        match TrapVector::from_vector(vector) {
            Some(TrapVector::Getc) => self.trap_getc(),
            Some(TrapVector::Out) => self.trap_out(),
            Some(TrapVector::Puts) => self.trap_puts(),
            Some(TrapVector::In) => self.trap_in(),
            Some(TrapVector::Putsp) => self.trap_putsp(),
            Some(TrapVector::Halt) => self.trap_halt(),
            None => return Err(ExecError::UnknownTrap { vector, pc }),
        }
        Ok(())
    }

    /// GETC: read one character into R0, setting the flags
    fn trap_getc(&mut self) {
        let key = self.read_key();
        self.registers.write(0, key.into());
        self.registers.update_flags(0);
    }

    /// OUT: write the low byte of R0
    fn trap_out(&mut self) {
        let ch = (self.registers.read(0) & 0xff) as u8;
        self.console.put_char(ch);
    }

    /// PUTS: write the word-per-character string starting at R0,
    /// terminated by a zero word
    fn trap_puts(&mut self) {
        let mut addr = self.registers.read(0);
        loop {
            let word = self.memory.read(addr);
            if word == 0 {
                break;
            }
            self.console.put_char(word as u8);
            addr = addr.wrapping_add(1);
        }
    }

    /// IN: prompt, read one character, echo it, store it in R0 and
    /// set the flags
    fn trap_in(&mut self) {
        self.console.print("Enter a character: ");
        let key = self.read_key();
        self.console.put_char(key);
        self.registers.write(0, key.into());
        self.registers.update_flags(0);
    }

    /// PUTSP: like PUTS, but each word packs two characters, low byte
    /// first; a zero high byte is skipped and a zero word terminates
    fn trap_putsp(&mut self) {
        let mut addr = self.registers.read(0);
        loop {
            let word = self.memory.read(addr);
            if word == 0 {
                break;
            }
            self.console.put_char(word as u8);
            let high = word >> 8;
            if high != 0 {
                self.console.put_char(high as u8);
            }
            addr = addr.wrapping_add(1);
        }
    }

    /// HALT: announce and stop the machine
    fn trap_halt(&mut self) {
        self.console.print("HALT\n");
        self.halted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Scripted;
    use crate::encode::{
        add, add_imm, and_imm, br, jsr, jsrr, ld, ldi, ldr, lea, not, ret,
        st, sti, str, trap,
    };
    use crate::vm::registers::CondFlag;

    const HALT: u16 = 0xf025;

    fn run_program(words: &[u16]) -> Vm<Scripted> {
        run_program_with_input(words, "")
    }

    fn run_program_with_input(words: &[u16], input: &str) -> Vm<Scripted> {
        let mut vm = Vm::new(Scripted::new());
        vm.console_mut().feed(input);
        vm.load(0x3000, words);
        vm.run().expect("program should run to halt");
        vm
    }

    #[test]
    fn load_points_pc_at_origin() {
        let mut vm = Vm::new(Scripted::new());
        vm.load(0x4000, &[HALT]);
        assert_eq!(vm.registers.pc, 0x4000);
        assert_eq!(vm.memory.read(0x4000), HALT);
    }

    #[test]
    fn add_immediate_wraps_and_sets_neg() {
        let vm = run_program(&[add_imm(0, 0, -1), HALT]);
        assert_eq!(vm.registers.read(0), 0xffff);
        assert_eq!(vm.registers.cond, CondFlag::Neg);
    }

    #[test]
    fn add_registers() {
        let vm = run_program(&[
            add_imm(1, 1, 11),
            add_imm(2, 2, 4),
            add(3, 1, 2),
            HALT,
        ]);
        assert_eq!(vm.registers.read(3), 15);
        assert_eq!(vm.registers.cond, CondFlag::Pos);
    }

    #[test]
    fn and_immediate_clears_register() {
        let vm = run_program(&[add_imm(0, 0, 13), and_imm(0, 0, 0), HALT]);
        assert_eq!(vm.registers.read(0), 0);
        assert_eq!(vm.registers.cond, CondFlag::Zro);
    }

    #[test]
    fn not_complements() {
        let vm = run_program(&[not(1, 0), HALT]);
        assert_eq!(vm.registers.read(1), 0xffff);
        assert_eq!(vm.registers.cond, CondFlag::Neg);
    }

    #[test]
    fn brz_taken_when_zero() {
        // and clears r0 (Z set), so the branch skips the add
        let vm = run_program(&[
            and_imm(0, 0, 0),
            br(false, true, false, 1),
            add_imm(1, 1, 5),
            HALT,
        ]);
        assert_eq!(vm.registers.read(1), 0);
    }

    #[test]
    fn brz_not_taken_when_positive() {
        let vm = run_program(&[
            add_imm(0, 0, 1),
            br(false, true, false, 1),
            add_imm(1, 1, 5),
            HALT,
        ]);
        assert_eq!(vm.registers.read(1), 5);
    }

    #[test]
    fn br_plain_always_taken() {
        let vm = run_program(&[
            br(true, true, true, 1),
            add_imm(1, 1, 5),
            HALT,
        ]);
        assert_eq!(vm.registers.read(1), 0);
    }

    #[test]
    fn lea_computes_address_and_flags() {
        let vm = run_program(&[lea(0, 2), HALT]);
        assert_eq!(vm.registers.read(0), 0x3003);
        assert_eq!(vm.registers.cond, CondFlag::Pos);
    }

    #[test]
    fn ld_reads_pc_relative() {
        let vm = run_program(&[ld(0, 2), HALT, 0, 0xabcd]);
        assert_eq!(vm.registers.read(0), 0xabcd);
        assert_eq!(vm.registers.cond, CondFlag::Neg);
    }

    #[test]
    fn ldi_reads_through_pointer() {
        let vm = run_program(&[ldi(0, 2), HALT, 0, 0x3005, 0, 0x1234]);
        assert_eq!(vm.registers.read(0), 0x1234);
    }

    #[test]
    fn ldr_reads_base_plus_offset() {
        let vm = run_program(&[lea(1, 2), ldr(0, 1, 1), HALT, 0, 0x5678]);
        assert_eq!(vm.registers.read(0), 0x5678);
    }

    #[test]
    fn st_writes_pc_relative() {
        let vm = run_program(&[add_imm(0, 0, 7), st(0, 1), HALT, 0]);
        assert_eq!(vm.memory.read(0x3003), 7);
    }

    #[test]
    fn sti_writes_through_pointer() {
        let vm = run_program(&[add_imm(0, 0, 7), sti(0, 1), HALT, 0x3004, 0]);
        assert_eq!(vm.memory.read(0x3004), 7);
    }

    #[test]
    fn str_writes_base_plus_offset() {
        let vm = run_program(&[
            add_imm(0, 0, 7),
            lea(1, 1),
            str(0, 1, 1),
            HALT,
            0,
        ]);
        // lea at 0x3001 puts 0x3003 in r1; str writes r0 at 0x3004
        assert_eq!(vm.memory.read(0x3004), 7);
    }

    #[test]
    fn jsr_calls_and_ret_returns() {
        let vm = run_program(&[jsr(1), HALT, add_imm(0, 0, 5), ret()]);
        assert_eq!(vm.registers.read(0), 5);
        assert_eq!(vm.registers.read(7), 0x3001);
    }

    #[test]
    fn jsrr_calls_through_register() {
        let vm = run_program(&[
            lea(1, 2),
            jsrr(1),
            HALT,
            add_imm(0, 0, 9),
            ret(),
        ]);
        assert_eq!(vm.registers.read(0), 9);
        assert_eq!(vm.registers.read(7), 0x3002);
    }

    #[test]
    fn halt_announces_and_stops() {
        let mut vm = run_program(&[HALT]);
        assert!(vm.halted());
        assert_eq!(vm.console_mut().take_output(), "HALT\n");
    }

    #[test]
    fn puts_writes_string() {
        let mut vm = run_program(&[
            lea(0, 2),
            trap(TrapVector::Puts as u16),
            HALT,
            0x0048,
            0x0069,
            0,
        ]);
        assert_eq!(vm.console_mut().take_output(), "HiHALT\n");
    }

    #[test]
    fn putsp_unpacks_two_characters_per_word() {
        let mut vm = run_program(&[
            lea(0, 2),
            trap(TrapVector::Putsp as u16),
            HALT,
            0x6261, // "ab", low byte first
            0x0063, // "c" with a zero high byte
            0,
        ]);
        assert_eq!(vm.console_mut().take_output(), "abcHALT\n");
    }

    #[test]
    fn getc_reads_input_and_sets_flags() {
        let vm = run_program_with_input(
            &[trap(TrapVector::Getc as u16), HALT],
            "A",
        );
        assert_eq!(vm.registers.read(0), u16::from(b'A'));
        assert_eq!(vm.registers.cond, CondFlag::Pos);
    }

    #[test]
    fn trap_in_prompts_and_echoes() {
        let mut vm = run_program_with_input(
            &[trap(TrapVector::In as u16), HALT],
            "Z",
        );
        assert_eq!(vm.registers.read(0), u16::from(b'Z'));
        assert_eq!(vm.console_mut().take_output(), "Enter a character: ZHALT\n");
    }

    #[test]
    fn trap_saves_return_address_in_r7() {
        let vm = run_program(&[trap(TrapVector::Out as u16), HALT]);
        assert_eq!(vm.registers.read(7), 0x3001);
    }

    #[test]
    fn kbsr_poll_latches_key_and_kbdr_drains_it() {
        // Pointers to the device registers are reached through LDI,
        // since a nine-bit offset cannot span from 0x3000 to 0xfe00.
        let vm = run_program_with_input(
            &[ldi(1, 2), ldi(0, 3), HALT, KBSR, 0, KBDR],
            "x",
        );
        assert_eq!(vm.registers.read(1), 1 << 15);
        assert_eq!(vm.registers.read(0), u16::from(b'x'));
    }

    #[test]
    fn getc_consumes_latched_key_without_rereading() {
        // One character is fed; the KBSR poll latches it and GETC must
        // take it from the latch (the scripted console would panic on
        // a second read).
        let vm = run_program_with_input(
            &[ldi(1, 2), trap(TrapVector::Getc as u16), HALT, KBSR],
            "x",
        );
        assert_eq!(vm.registers.read(0), u16::from(b'x'));
    }

    #[test]
    fn reserved_opcodes_are_errors() {
        for word in [0x8000, 0xd000] {
            let mut vm = Vm::new(Scripted::new());
            vm.load(0x3000, &[word]);
            let err = vm.step().expect_err("reserved opcode should fail");
            assert!(matches!(err, ExecError::UnusedOpcode { pc: 0x3000, .. }));
        }
    }

    #[test]
    fn unknown_trap_vector_is_an_error() {
        let mut vm = Vm::new(Scripted::new());
        vm.load(0x3000, &[trap(0x7f)]);
        let err = vm.step().expect_err("unknown trap should fail");
        assert_eq!(
            err,
            ExecError::UnknownTrap {
                vector: 0x7f,
                pc: 0x3000
            }
        );
    }
}
