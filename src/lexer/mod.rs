use std::fmt;

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};
use crate::symbol::{BinKind, JumpCond, MemSize, Register};

pub mod cursor;

/// Represents a single "word" of source code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Source row, 1-based.
    pub row: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Operand size keyword: `byte`, `word`, `dword`, `qword`.
    Size(MemSize),
    /// Two-register mnemonic: `add`, `sub`, `and`, `or`, `xor`, `not`, `cmp`.
    BinOp(BinKind),
    Mov,
    Push,
    Pop,
    /// Any jump mnemonic with its baked-in condition.
    Jump(JumpCond),
    Ret,
    Test,
    Call,
    Int,
    Integer(u64),
    /// User identifier that matched no keyword table.
    Label,
    Register(Register),
    Comma,
    Plus,
    Minus,
    LBracket,
    RBracket,
    Colon,
    Eol,
    Eof,
    /// Run of characters no rule recognises; reported by the parser.
    Unknown,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self {
            TokenKind::Size(_) => "size keyword",
            TokenKind::BinOp(_) => "binary operator",
            TokenKind::Mov => "mov",
            TokenKind::Push => "push",
            TokenKind::Pop => "pop",
            TokenKind::Jump(_) => "jump",
            TokenKind::Ret => "ret",
            TokenKind::Test => "test",
            TokenKind::Call => "call",
            TokenKind::Int => "int",
            TokenKind::Integer(_) => "integer",
            TokenKind::Label => "label",
            TokenKind::Register(_) => "register",
            TokenKind::Comma => "comma",
            TokenKind::Plus => "plus",
            TokenKind::Minus => "minus",
            TokenKind::LBracket => "opening bracket",
            TokenKind::RBracket => "closing bracket",
            TokenKind::Colon => "colon",
            TokenKind::Eol => "end of line",
            TokenKind::Eof => "end of file",
            TokenKind::Unknown => "unknown token",
        };
        f.write_str(desc)
    }
}

/// Raw shape matched by the pattern table, before keyword classification.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RawKind {
    Junk,
    Comment,
    Eol,
    Integer,
    Ident,
    Comma,
    Plus,
    Minus,
    LBracket,
    RBracket,
    Colon,
    Unknown,
}

lazy_static! {
    // Order is important since some patterns are subpatterns of others.
    // Do NOT rearrange without a good hard think.
    static ref PATTERNS: Vec<(RawKind, Regex)> = vec![
        // Any horizontal whitespace, so every char falls to some pattern
        (RawKind::Junk, Regex::new(r"^[^\S\n]+").unwrap()),
        (RawKind::Comment, Regex::new(r"^;[^\n]*").unwrap()),
        (RawKind::Eol, Regex::new(r"^\n").unwrap()),
        (RawKind::Integer, Regex::new(r"^[0-9]+").unwrap()),
        (RawKind::Ident, Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*").unwrap()),
        (RawKind::Comma, Regex::new(r"^,").unwrap()),
        (RawKind::Plus, Regex::new(r"^\+").unwrap()),
        (RawKind::Minus, Regex::new(r"^-").unwrap()),
        (RawKind::LBracket, Regex::new(r"^\[").unwrap()),
        (RawKind::RBracket, Regex::new(r"^\]").unwrap()),
        (RawKind::Colon, Regex::new(r"^:").unwrap()),
        (RawKind::Unknown, Regex::new(r"^\S+").unwrap()),
    ];

    static ref REGISTERS: FxHashMap<&'static str, Register> = FxHashMap::from_iter([
        ("r0", Register::R0),
        ("r1", Register::R1),
        ("r2", Register::R2),
        ("r3", Register::R3),
        ("r4", Register::R4),
        ("r5", Register::R5),
        ("r6", Register::R6),
        ("r7", Register::R7),
        ("ir", Register::Ir),
        ("fg", Register::Fg),
        ("ip", Register::Ip),
        ("sp", Register::Sp),
        ("bp", Register::Bp),
    ]);

    static ref BIN_OPS: FxHashMap<&'static str, BinKind> = FxHashMap::from_iter([
        ("add", BinKind::Add),
        ("sub", BinKind::Sub),
        ("and", BinKind::And),
        ("or", BinKind::Or),
        ("xor", BinKind::Xor),
        ("not", BinKind::Not),
        ("cmp", BinKind::Cmp),
    ]);

    static ref JUMPS: FxHashMap<&'static str, JumpCond> = FxHashMap::from_iter([
        ("jmp", JumpCond::ALWAYS),
        ("jn", JumpCond::NEG),
        ("jl", JumpCond::NEG),
        ("jnn", JumpCond::NOT_NEG),
        ("jge", JumpCond::NOT_NEG),
        ("jz", JumpCond::ZERO),
        ("je", JumpCond::ZERO),
        ("jnz", JumpCond::NOT_ZERO),
        ("jne", JumpCond::NOT_ZERO),
        ("jp", JumpCond::POS),
        ("jg", JumpCond::POS),
        ("jnp", JumpCond::NOT_POS),
        ("jle", JumpCond::NOT_POS),
    ]);

    static ref OTHERS: FxHashMap<&'static str, TokenKind> = FxHashMap::from_iter([
        ("mov", TokenKind::Mov),
        ("push", TokenKind::Push),
        ("pop", TokenKind::Pop),
        ("call", TokenKind::Call),
        ("ret", TokenKind::Ret),
        ("int", TokenKind::Int),
        ("test", TokenKind::Test),
    ]);

    static ref SIZES: FxHashMap<&'static str, MemSize> = FxHashMap::from_iter([
        ("byte", MemSize::Byte),
        ("word", MemSize::Word),
        ("dword", MemSize::Dword),
        ("qword", MemSize::Qword),
    ]);
}

/// Match a lexeme against the keyword tables, case-insensitively. A miss
/// classifies the lexeme as a user label.
fn classify_ident(lexeme: &str) -> TokenKind {
    // One-shot lowercasing; the tables themselves are case-sensitive.
    let lower = lexeme.to_ascii_lowercase();
    if let Some(&reg) = REGISTERS.get(lower.as_str()) {
        TokenKind::Register(reg)
    } else if let Some(&op) = BIN_OPS.get(lower.as_str()) {
        TokenKind::BinOp(op)
    } else if let Some(&cond) = JUMPS.get(lower.as_str()) {
        TokenKind::Jump(cond)
    } else if let Some(&kind) = OTHERS.get(lower.as_str()) {
        kind
    } else if let Some(&size) = SIZES.get(lower.as_str()) {
        TokenKind::Size(size)
    } else {
        TokenKind::Label
    }
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        loop {
            if self.is_eof() {
                return Token {
                    kind: TokenKind::Eof,
                    span: Span::dummy(),
                    row: self.row(),
                };
            }

            let (raw, len) = PATTERNS
                .iter()
                .find_map(|(raw, re)| re.find(self.rest()).map(|m| (*raw, m.len())))
                .expect("the last pattern matches any non-whitespace input");

            let span = Span::new(Idx(self.pos() as u32), len as u16);
            let row = self.row();
            self.advance(len);

            let kind = match raw {
                RawKind::Junk | RawKind::Comment => continue,
                RawKind::Eol => {
                    self.bump_row();
                    TokenKind::Eol
                }
                // Overflowing literals fall through to Unknown and get
                // reported by the parser like any other bad token.
                RawKind::Integer => match self.get_range(span.as_range()).parse::<u64>() {
                    Ok(val) => TokenKind::Integer(val),
                    Err(_) => TokenKind::Unknown,
                },
                RawKind::Ident => classify_ident(self.get_range(span.as_range())),
                RawKind::Comma => TokenKind::Comma,
                RawKind::Plus => TokenKind::Plus,
                RawKind::Minus => TokenKind::Minus,
                RawKind::LBracket => TokenKind::LBracket,
                RawKind::RBracket => TokenKind::RBracket,
                RawKind::Colon => TokenKind::Colon,
                RawKind::Unknown => TokenKind::Unknown,
            };
            return Token { kind, span, row };
        }
    }
}

/// Tokenize the whole source. The trailing `Eof` token is included.
pub fn tokenize(src: &str) -> Vec<Token> {
    let mut cursor = Cursor::new(src);
    let mut toks = Vec::new();
    loop {
        let token = cursor.advance_token();
        let done = token.kind == TokenKind::Eof;
        toks.push(token);
        if done {
            return toks;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_keywords_any_case() {
        assert_eq!(
            kinds("MOV r0, R1"),
            vec![
                TokenKind::Mov,
                TokenKind::Register(Register::R0),
                TokenKind::Comma,
                TokenKind::Register(Register::R1),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("QwOrD")[0], TokenKind::Size(MemSize::Qword));
        assert_eq!(kinds("CMP")[0], TokenKind::BinOp(BinKind::Cmp));
    }

    #[test]
    fn lex_jump_conditions() {
        assert_eq!(kinds("jmp")[0], TokenKind::Jump(JumpCond::ALWAYS));
        assert_eq!(kinds("je")[0], TokenKind::Jump(JumpCond::ZERO));
        assert_eq!(kinds("jge")[0], TokenKind::Jump(JumpCond::NOT_NEG));
        assert_eq!(kinds("JLE")[0], TokenKind::Jump(JumpCond::NOT_POS));
    }

    #[test]
    fn lex_label_fallthrough() {
        let toks = tokenize("loop: jmp loop");
        assert_eq!(toks[0].kind, TokenKind::Label);
        assert_eq!(toks[1].kind, TokenKind::Colon);
        assert_eq!(toks[3].kind, TokenKind::Label);
        // Identifiers may contain digits and underscores after the first char
        assert_eq!(kinds("loop_2")[0], TokenKind::Label);
    }

    #[test]
    fn lex_comment_to_eol() {
        assert_eq!(
            kinds("ret ; comment, [with] junk\nret"),
            vec![
                TokenKind::Ret,
                TokenKind::Eol,
                TokenKind::Ret,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_rows() {
        let toks = tokenize("ret\nret\n\nret");
        let rows: Vec<u32> = toks.iter().map(|t| t.row).collect();
        assert_eq!(rows, vec![1, 1, 2, 2, 3, 4, 4]);
    }

    #[test]
    fn lex_integer() {
        assert_eq!(kinds("18446744073709551615")[0], TokenKind::Integer(u64::MAX));
        // One past u64::MAX overflows into an unknown token
        assert_eq!(kinds("18446744073709551616")[0], TokenKind::Unknown);
    }

    #[test]
    fn lex_unknown_run() {
        let toks = tokenize("@#$ ret");
        assert_eq!(toks[0].kind, TokenKind::Unknown);
        assert_eq!(toks[0].span.len(), 3);
        assert_eq!(toks[1].kind, TokenKind::Ret);
    }

    #[test]
    fn lex_memory_operand() {
        assert_eq!(
            kinds("mov r0, qword [bp - 8]"),
            vec![
                TokenKind::Mov,
                TokenKind::Register(Register::R0),
                TokenKind::Comma,
                TokenKind::Size(MemSize::Qword),
                TokenKind::LBracket,
                TokenKind::Register(Register::Bp),
                TokenKind::Minus,
                TokenKind::Integer(8),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }
}
