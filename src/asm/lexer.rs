//! Lexer
//!
//! Turns LC-3 assembly source text into an ordered token stream,
//! always terminated by EOF. Spaces, tabs, carriage returns and commas
//! separate tokens; newlines become NEW_LINE tokens (consecutive ones
//! collapse to a single token); `;` starts a comment running to the
//! end of the line.
//!
//! Directives are matched by case-insensitive prefix. Everything else
//! that is not a string literal is a bare identifier, classified in
//! priority order: opcode mnemonic, then register, then numeric
//! literal, then label. Numeric literals carry their source text; the
//! passes parse and range-check them against the field width they end
//! up in (`x` hexadecimal, `b` binary, `#` decimal, each optionally
//! negative after the radix marker).

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::asm::AsmError;

/// Every mnemonic the assembler recognizes, including the TRAP
/// aliases and all eight spellings of the conditional branch
pub const MNEMONICS: &[&str] = &[
    "add", "and", "not", "ld", "ldr", "ldi", "st", "str", "sti", "lea",
    "trap", "halt", "getc", "out", "puts", "in", "putsp", "jmp", "ret",
    "rti", "jsr", "jsrr", "br", "brz", "brp", "brn", "brnz", "brnp",
    "brzp", "brnzp",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Orig,
    Fill,
    Stringz,
    Blkw,
    End,
    NewLine,
    Eof,
    Decimal(String),
    Hex(String),
    Binary(String),
    /// Lower-cased mnemonic
    Opcode(String),
    Register(u16),
    /// Original case preserved
    Label(String),
    /// Decoded string value, escapes applied
    Str(String),
}

impl TokenKind {
    /// Source text of a numeric literal token
    pub fn numeric_text(&self) -> Option<&str> {
        match self {
            TokenKind::Decimal(text)
            | TokenKind::Hex(text)
            | TokenKind::Binary(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Orig => write!(f, ".orig"),
            TokenKind::Fill => write!(f, ".fill"),
            TokenKind::Stringz => write!(f, ".stringz"),
            TokenKind::Blkw => write!(f, ".blkw"),
            TokenKind::End => write!(f, ".end"),
            TokenKind::NewLine => write!(f, "end of line"),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Decimal(text)
            | TokenKind::Hex(text)
            | TokenKind::Binary(text) => write!(f, "number {text}"),
            TokenKind::Opcode(mnemonic) => write!(f, "opcode {mnemonic}"),
            TokenKind::Register(r) => write!(f, "register r{r}"),
            TokenKind::Label(name) => write!(f, "label {name}"),
            TokenKind::Str(value) => write!(f, "string {value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source line the token starts on (1-based)
    pub line: u32,
}

/// Tokenize a complete source file
pub fn lex(source: &str) -> Result<Vec<Token>, AsmError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\r' | ',' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                let last = tokens.last().map(|t| &t.kind);
                if !matches!(last, None | Some(TokenKind::NewLine)) {
                    tokens.push(Token {
                        kind: TokenKind::NewLine,
                        line,
                    });
                }
                line += 1;
            }
            ';' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '"' => {
                chars.next();
                let kind = lex_string(&mut chars, line)?;
                tokens.push(Token { kind, line });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if is_separator(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token {
                    kind: classify(&word),
                    line,
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

fn is_separator(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | ',' | '\n' | ';' | '"')
}

/// Read a string literal after its opening quote. A newline or the
/// end of input also terminates the literal, which is accepted with
/// the characters read so far; only an unknown escape is fatal.
fn lex_string(
    chars: &mut Peekable<Chars>,
    line: u32,
) -> Result<TokenKind, AsmError> {
    let mut value = String::new();
    loop {
        match chars.peek() {
            None | Some('\n') => break,
            Some('"') => {
                chars.next();
                break;
            }
            Some('\\') => {
                chars.next();
                let escape = match chars.peek() {
                    None | Some('\n') => {
                        return Err(AsmError::UnknownEscape {
                            escape: '\\',
                            line,
                        })
                    }
                    Some(&e) => e,
                };
                chars.next();
                value.push(match escape {
                    '0' => '\0',
                    'n' => '\n',
                    'r' => '\r',
                    '"' => '"',
                    '\\' => '\\',
                    'e' => '\x1b',
                    other => {
                        return Err(AsmError::UnknownEscape {
                            escape: other,
                            line,
                        })
                    }
                });
            }
            Some(&c) => {
                value.push(c);
                chars.next();
            }
        }
    }
    Ok(TokenKind::Str(value))
}

/// Classify a bare identifier: opcode, then register, then numeric
/// literal, then label
fn classify(word: &str) -> TokenKind {
    if let Some(directive) = match_directive(word) {
        return directive;
    }
    let lower = word.to_ascii_lowercase();
    if MNEMONICS.contains(&lower.as_str()) {
        return TokenKind::Opcode(lower);
    }
    if let Some(register) = match_register(&lower) {
        return TokenKind::Register(register);
    }
    if matches_number(&lower, 'x', |c| c.is_ascii_hexdigit()) {
        return TokenKind::Hex(word.to_string());
    }
    if matches_number(&lower, 'b', |c| c == '0' || c == '1') {
        return TokenKind::Binary(word.to_string());
    }
    if matches_number(&lower, '#', |c| c.is_ascii_digit()) {
        return TokenKind::Decimal(word.to_string());
    }
    TokenKind::Label(word.to_string())
}

/// Case-insensitive prefix match, as the reference lexer does
fn match_directive(word: &str) -> Option<TokenKind> {
    if !word.starts_with('.') {
        return None;
    }
    let lower = word.to_ascii_lowercase();
    let table = [
        (".orig", TokenKind::Orig),
        (".fill", TokenKind::Fill),
        (".stringz", TokenKind::Stringz),
        (".blkw", TokenKind::Blkw),
        (".end", TokenKind::End),
    ];
    table
        .into_iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, kind)| kind)
}

fn match_register(lower: &str) -> Option<u16> {
    let mut chars = lower.chars();
    if chars.next() != Some('r') {
        return None;
    }
    let digit = chars.next()?.to_digit(10)?;
    if chars.next().is_some() || digit > 7 {
        return None;
    }
    Some(digit as u16)
}

/// Does `lower` have the shape `<marker>-?<digits>` with at least one
/// digit?
fn matches_number(
    lower: &str,
    marker: char,
    is_digit: impl Fn(char) -> bool,
) -> bool {
    let Some(body) = lower.strip_prefix(marker) else {
        return false;
    };
    let digits = body.strip_prefix('-').unwrap_or(body);
    !digits.is_empty() && digits.chars().all(is_digit)
}

/// Parse the value of a numeric literal's source text. Returns None
/// when the digits overflow the intermediate representation.
pub fn numeric_value(text: &str) -> Option<i32> {
    let mut chars = text.chars();
    let radix = match chars.next()?.to_ascii_lowercase() {
        'x' => 16,
        'b' => 2,
        '#' => 10,
        _ => return None,
    };
    let body = chars.as_str();
    let (negative, digits) = match body.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, body),
    };
    let value = i32::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}
