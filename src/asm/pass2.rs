//! Pass 2: code generation
//!
//! Re-walks the token stream with the completed symbol table, packing
//! each instruction into a 16-bit word through the builders in the
//! encode module. The first `.ORIG` argument is emitted as the leading
//! word of the output (the origin header). The location counter is
//! incremented at instruction entry, so it already holds the pc value
//! the machine will have when a PC-relative offset is applied; a label
//! reference therefore resolves to `symbols[label] - lc`, checked
//! against the signed range of its field.

use std::collections::HashMap;

use crate::asm::lexer::{Token, TokenKind};
use crate::asm::{checked_value, unexpected, AsmError, Cursor};
use crate::encode;
use crate::vm::TrapVector;

/// Emit the object word vector for a token stream already validated
/// by pass 1
pub fn generate(
    tokens: &[Token],
    symbols: &HashMap<String, u16>,
) -> Result<Vec<u16>, AsmError> {
    let mut cursor = Cursor::new(tokens);
    let mut words: Vec<u16> = Vec::new();
    let mut lc: u16 = 0;
    let mut in_segment = false;

    loop {
        let token = cursor.next();
        match &token.kind {
            TokenKind::NewLine => continue,
            TokenKind::Eof | TokenKind::End => break,
            TokenKind::Orig => {
                let origin = cursor.expect_numeric(16)? as u16;
                words.push(origin);
                lc = origin;
                in_segment = true;
            }
            kind => {
                if !in_segment {
                    return Err(AsmError::MissingOrigin { line: token.line });
                }
                match kind {
                    // Addresses were assigned in pass 1
                    TokenKind::Label(_) => {}
                    TokenKind::Fill => {
                        words.push(fill_value(&mut cursor, symbols)?);
                        lc = lc.wrapping_add(1);
                    }
                    TokenKind::Blkw => {
                        let count = cursor.expect_unsigned(16)?;
                        words.extend(std::iter::repeat(0).take(count as usize));
                        lc = lc.wrapping_add(count);
                    }
                    TokenKind::Stringz => {
                        let token = cursor.next();
                        let TokenKind::Str(value) = &token.kind else {
                            return Err(unexpected(token, &["a string"]));
                        };
                        for ch in value.chars() {
                            words.push(ch as u16);
                        }
                        words.push(0);
                        lc = lc.wrapping_add(value.chars().count() as u16 + 1);
                    }
                    TokenKind::Opcode(mnemonic) => {
                        lc = lc.wrapping_add(1);
                        let word = encode_instruction(
                            &mut cursor,
                            mnemonic,
                            lc,
                            symbols,
                        )?;
                        words.push(word);
                    }
                    _ => {
                        return Err(unexpected(
                            token,
                            &["a label", "an instruction", "a directive"],
                        ))
                    }
                }
            }
        }
    }
    Ok(words)
}

/// `.FILL` stores the absolute address of a label, or a literal word
fn fill_value(
    cursor: &mut Cursor,
    symbols: &HashMap<String, u16>,
) -> Result<u16, AsmError> {
    let token = cursor.next();
    match &token.kind {
        TokenKind::Label(name) => lookup(symbols, name, token.line),
        kind => match kind.numeric_text() {
            Some(text) => Ok(checked_value(text, 16, token.line)? as u16),
            None => Err(unexpected(token, &["a label", "a number"])),
        },
    }
}

fn encode_instruction(
    cursor: &mut Cursor,
    mnemonic: &str,
    lc: u16,
    symbols: &HashMap<String, u16>,
) -> Result<u16, AsmError> {
    let word = match mnemonic {
        "add" | "and" => {
            let dr = cursor.expect_register()?;
            let sr1 = cursor.expect_register()?;
            let token = cursor.next();
            match &token.kind {
                TokenKind::Register(sr2) => match mnemonic {
                    "add" => encode::add(dr, sr1, *sr2),
                    _ => encode::and(dr, sr1, *sr2),
                },
                kind => match kind.numeric_text() {
                    Some(text) => {
                        let imm = checked_value(text, 5, token.line)? as i16;
                        match mnemonic {
                            "add" => encode::add_imm(dr, sr1, imm),
                            _ => encode::and_imm(dr, sr1, imm),
                        }
                    }
                    None => {
                        return Err(unexpected(
                            token,
                            &["a register", "a number"],
                        ))
                    }
                },
            }
        }
        "not" => {
            let dr = cursor.expect_register()?;
            let sr = cursor.expect_register()?;
            encode::not(dr, sr)
        }
        "ld" => {
            let dr = cursor.expect_register()?;
            encode::ld(dr, pc_offset(cursor, symbols, lc, 9)?)
        }
        "ldi" => {
            let dr = cursor.expect_register()?;
            encode::ldi(dr, pc_offset(cursor, symbols, lc, 9)?)
        }
        "lea" => {
            let dr = cursor.expect_register()?;
            encode::lea(dr, pc_offset(cursor, symbols, lc, 9)?)
        }
        "st" => {
            let sr = cursor.expect_register()?;
            encode::st(sr, pc_offset(cursor, symbols, lc, 9)?)
        }
        "sti" => {
            let sr = cursor.expect_register()?;
            encode::sti(sr, pc_offset(cursor, symbols, lc, 9)?)
        }
        "ldr" => {
            let dr = cursor.expect_register()?;
            let base = cursor.expect_register()?;
            encode::ldr(dr, base, cursor.expect_numeric(6)? as i16)
        }
        "str" => {
            let sr = cursor.expect_register()?;
            let base = cursor.expect_register()?;
            encode::str(sr, base, cursor.expect_numeric(6)? as i16)
        }
        "jmp" => encode::jmp(cursor.expect_register()?),
        "ret" => encode::ret(),
        "jsr" => encode::jsr(pc_offset(cursor, symbols, lc, 11)?),
        "jsrr" => encode::jsrr(cursor.expect_register()?),
        "trap" => encode::trap(cursor.expect_unsigned(12)?),
        "getc" => encode::trap(TrapVector::Getc as u16),
        "out" => encode::trap(TrapVector::Out as u16),
        "puts" => encode::trap(TrapVector::Puts as u16),
        "in" => encode::trap(TrapVector::In as u16),
        "putsp" => encode::trap(TrapVector::Putsp as u16),
        "halt" => encode::trap(TrapVector::Halt as u16),
        "rti" => encode::rti(),
        // The lexer only emits known mnemonics; everything left is a
        // conditional-branch spelling. The plain `br` branches always.
        branch => {
            let suffix = &branch[2..];
            let (n, z, p) = if suffix.is_empty() {
                (true, true, true)
            } else {
                (
                    suffix.contains('n'),
                    suffix.contains('z'),
                    suffix.contains('p'),
                )
            };
            encode::br(n, z, p, pc_offset(cursor, symbols, lc, 9)?)
        }
    };
    Ok(word)
}

/// Resolve a PC-relative operand: a label against the symbol table,
/// checked to fit the signed field width, or a literal offset
fn pc_offset(
    cursor: &mut Cursor,
    symbols: &HashMap<String, u16>,
    lc: u16,
    bits: u32,
) -> Result<i16, AsmError> {
    let token = cursor.next();
    match &token.kind {
        TokenKind::Label(name) => {
            let addr = lookup(symbols, name, token.line)?;
            let offset = i32::from(addr) - i32::from(lc);
            let bound = 1 << (bits - 1);
            if offset < -bound || offset >= bound {
                return Err(AsmError::OffsetOutOfRange {
                    label: name.clone(),
                    offset,
                    bits,
                    line: token.line,
                });
            }
            Ok(offset as i16)
        }
        kind => match kind.numeric_text() {
            Some(text) => Ok(checked_value(text, bits, token.line)? as i16),
            None => Err(unexpected(token, &["a label", "a number"])),
        },
    }
}

fn lookup(
    symbols: &HashMap<String, u16>,
    name: &str,
    line: u32,
) -> Result<u16, AsmError> {
    symbols
        .get(name)
        .copied()
        .ok_or_else(|| AsmError::UndefinedLabel {
            label: name.to_string(),
            line,
        })
}
