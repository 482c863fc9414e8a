//! Pass 1: location counter and symbol table
//!
//! Walks the token stream tracking the location counter and recording
//! the address of every label. Operand counts, kinds and numeric
//! ranges are validated here, so pass 2 can concentrate on encoding.
//! The location counter is undefined outside a `.ORIG`/`.END` block:
//! program text before the first `.ORIG` is fatal, text after `.END`
//! is ignored, and a second `.ORIG` anywhere is rejected because the
//! single-header object format cannot represent a second segment.

use std::collections::HashMap;

use crate::asm::lexer::{Token, TokenKind};
use crate::asm::{checked_value, unexpected, AsmError, Cursor};

/// Build the label-to-address table for a token stream
pub fn build_symbols(tokens: &[Token]) -> Result<HashMap<String, u16>, AsmError> {
    let mut symbols = HashMap::new();
    let mut cursor = Cursor::new(tokens);
    let mut lc: Option<u16> = None;
    let mut segment_seen = false;

    loop {
        let token = cursor.next();
        match &token.kind {
            TokenKind::NewLine => continue,
            TokenKind::Eof => break,
            TokenKind::Orig => {
                if segment_seen {
                    return Err(AsmError::MultipleSegments { line: token.line });
                }
                segment_seen = true;
                lc = Some(cursor.expect_numeric(16)? as u16);
            }
            TokenKind::End => {
                lc = None;
            }
            kind => {
                let Some(addr) = lc else {
                    if segment_seen {
                        // After .END: ignored for address assignment
                        continue;
                    }
                    return Err(AsmError::MissingOrigin { line: token.line });
                };
                match kind {
                    TokenKind::Label(name) => {
                        symbols.insert(name.clone(), addr);
                    }
                    TokenKind::Fill => {
                        expect_label_or_numeric(&mut cursor, 16)?;
                        lc = Some(addr.wrapping_add(1));
                    }
                    TokenKind::Blkw => {
                        let count = cursor.expect_unsigned(16)?;
                        lc = Some(addr.wrapping_add(count));
                    }
                    TokenKind::Stringz => {
                        let token = cursor.next();
                        let TokenKind::Str(value) = &token.kind else {
                            return Err(unexpected(token, &["a string"]));
                        };
                        let words = value.chars().count() as u16 + 1;
                        lc = Some(addr.wrapping_add(words));
                    }
                    TokenKind::Opcode(mnemonic) => {
                        lc = Some(addr.wrapping_add(1));
                        validate_operands(&mut cursor, mnemonic)?;
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
    Ok(symbols)
}

/// Check the operand count and kinds of one instruction, consuming
/// its operand tokens
fn validate_operands(cursor: &mut Cursor, mnemonic: &str) -> Result<(), AsmError> {
    match mnemonic {
        "add" | "and" => {
            cursor.expect_register()?;
            cursor.expect_register()?;
            expect_register_or_numeric(cursor, 5)?;
        }
        "not" => {
            cursor.expect_register()?;
            cursor.expect_register()?;
        }
        "ld" | "ldi" | "lea" | "st" | "sti" => {
            cursor.expect_register()?;
            expect_label_or_numeric(cursor, 9)?;
        }
        "ldr" | "str" => {
            cursor.expect_register()?;
            cursor.expect_register()?;
            cursor.expect_numeric(6)?;
        }
        "jmp" | "jsrr" => {
            cursor.expect_register()?;
        }
        "jsr" => {
            expect_label_or_numeric(cursor, 11)?;
        }
        "trap" => {
            // A trap vector is unsigned: non-negative 12-bit
            cursor.expect_unsigned(12)?;
        }
        "ret" | "rti" | "getc" | "out" | "puts" | "in" | "putsp" | "halt" => {}
        // The lexer only emits known mnemonics; everything left is a
        // conditional-branch spelling.
        _branch => {
            expect_label_or_numeric(cursor, 9)?;
        }
    }
    Ok(())
}

fn expect_register_or_numeric(
    cursor: &mut Cursor,
    bits: u32,
) -> Result<(), AsmError> {
    let token = cursor.next();
    match &token.kind {
        TokenKind::Register(_) => Ok(()),
        kind => match kind.numeric_text() {
            Some(text) => checked_value(text, bits, token.line).map(|_| ()),
            None => Err(unexpected(token, &["a register", "a number"])),
        },
    }
}

fn expect_label_or_numeric(
    cursor: &mut Cursor,
    bits: u32,
) -> Result<(), AsmError> {
    let token = cursor.next();
    match &token.kind {
        TokenKind::Label(_) => Ok(()),
        kind => match kind.numeric_text() {
            Some(text) => checked_value(text, bits, token.line).map(|_| ()),
            None => Err(unexpected(token, &["a label", "a number"])),
        },
    }
}
