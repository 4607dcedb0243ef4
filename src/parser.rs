use std::iter::Peekable;
use std::vec::IntoIter;

use miette::Report;

use crate::error;
use crate::image::ObjImage;
use crate::lexer::{tokenize, Token, TokenKind};
use crate::span::Span;
use crate::symbol::{BinKind, JumpCond, MemSize, Opcode, Register};

/// Transforms the token stream into a bytecode image, one statement per
/// line. Errors do not stop the pass: the offending line is skipped and
/// the diagnostic recorded, so a single run reports everything.
pub struct AsmParser {
    /// Reference to the source file
    src: &'static str,
    /// Peekable iterator over tokens
    toks: Peekable<IntoIter<Token>>,
    /// Bytecode image under construction
    image: ObjImage,
    /// Diagnostics collected across the whole pass
    errors: Vec<Report>,
}

impl AsmParser {
    pub fn new(src: &'static str) -> Self {
        AsmParser {
            src,
            toks: tokenize(src).into_iter().peekable(),
            image: ObjImage::new(),
            errors: Vec::new(),
        }
    }

    fn get_span(&self, span: Span) -> &'static str {
        &self.src[span.as_range()]
    }

    /// Translate the whole source. Returns the finished byte vector, or
    /// every diagnostic the pass produced. Unresolved labels are errors.
    pub fn assemble(mut self) -> Result<Vec<u8>, Vec<Report>> {
        'line: loop {
            // Leading `name:` definitions bind to the current offset
            while self.peek_kind() == TokenKind::Label {
                let label_tok = self.next_tok();
                let name = self.get_span(label_tok.span);
                if self.peek_kind() != TokenKind::Colon {
                    self.errors.push(error::parse_unexpected_token(
                        self.src,
                        label_tok.span,
                        label_tok.row,
                        name,
                    ));
                    self.recover();
                    continue 'line;
                }
                self.next_tok();
                if self.image.define_label(name).is_err() {
                    self.errors.push(error::parse_label_redefined(
                        self.src,
                        label_tok.span,
                        label_tok.row,
                        name,
                    ));
                }
            }

            let head = self.next_tok();
            let outcome = match head.kind {
                TokenKind::Eol => continue 'line,
                TokenKind::Eof => break,
                TokenKind::BinOp(kind) => self.parse_arithmetic(kind, head.row),
                TokenKind::Jump(cond) => self.parse_jump(cond, head.row),
                TokenKind::Call => self.parse_call(head.row),
                TokenKind::Mov => self.parse_mov(head.row),
                TokenKind::Push => self.parse_push_pop(Opcode::Push, head.row),
                TokenKind::Pop => self.parse_push_pop(Opcode::Pop, head.row),
                TokenKind::Ret => self.parse_ret(head.row),
                TokenKind::Int => self.parse_int(head.row),
                TokenKind::Test => self.parse_test(head.row),
                _ => {
                    self.report_at(head, head.row, "unexpected token found");
                    Err(())
                }
            };
            if outcome.is_err() {
                self.recover();
            }
        }

        let unresolved = self.image.unresolved_errors(self.src);
        self.errors.extend(unresolved);
        if self.errors.is_empty() {
            Ok(self.image.into_bytes())
        } else {
            Err(self.errors)
        }
    }

    /// arithmetic := BINOP REG ',' REG
    fn parse_arithmetic(&mut self, kind: BinKind, row: u32) -> Result<(), ()> {
        let dst = self.expect_reg(row, "expected register after binary operator")?;
        self.expect_kind(TokenKind::Comma, row, "expected comma between registers")?;
        let src = self.expect_reg(row, "expected two registers after binary operator")?;
        self.check_eol(row, "unexpected token after binary operation")?;
        self.image.emit_u8(kind.opcode().byte());
        self.image.emit_u8(dst.id() << 4 | src.id());
        Ok(())
    }

    /// jump := JMP IDENT
    fn parse_jump(&mut self, cond: JumpCond, row: u32) -> Result<(), ()> {
        self.image.emit_u8(Opcode::Jmp.byte());
        self.image.emit_u8(cond.operand_byte());
        let label_tok = self.expect_kind(TokenKind::Label, row, "expected label after jump")?;
        let name = self.get_span(label_tok.span);
        self.check_eol(row, "unexpected token after jump statement")?;
        self.image.reference_label(name, label_tok.span, label_tok.row);
        Ok(())
    }

    /// call := CALL IDENT
    fn parse_call(&mut self, row: u32) -> Result<(), ()> {
        self.image.emit_u8(Opcode::Call.byte());
        let label_tok = self.expect_kind(TokenKind::Label, row, "expected label after jump")?;
        let name = self.get_span(label_tok.span);
        self.check_eol(row, "unexpected token after jump statement")?;
        self.image.reference_label(name, label_tok.span, label_tok.row);
        Ok(())
    }

    /// mov := MOV REG ',' (('-')? INTEGER | REG | SIZE '[' REG offs? ']')
    ///      | MOV SIZE '[' REG offs? ']' ',' REG
    fn parse_mov(&mut self, row: u32) -> Result<(), ()> {
        match self.peek_kind() {
            TokenKind::Register(dst) => {
                self.next_tok();
                self.expect_kind(TokenKind::Comma, row, "expected move source after comma")?;
                match self.peek_kind() {
                    TokenKind::Minus => {
                        self.next_tok();
                        let num = self.expect_integer(row, "expected integer to move")?;
                        self.check_eol(row, "unexpected token after move statement")?;
                        self.emit_mov_imm(dst, num | 1 << 63);
                        Ok(())
                    }
                    TokenKind::Integer(num) => {
                        self.next_tok();
                        self.check_eol(row, "unexpected token after move statement")?;
                        self.emit_mov_imm(dst, num);
                        Ok(())
                    }
                    TokenKind::Register(src) => {
                        self.next_tok();
                        self.check_eol(row, "unexpected token after move statement")?;
                        self.image.emit_u8(Opcode::Mov.byte());
                        self.image.emit_u8(0b0100_0000 | dst.id());
                        self.image.emit_u8(src.id() << 4);
                        Ok(())
                    }
                    TokenKind::Size(size) => {
                        self.next_tok();
                        self.expect_kind(TokenKind::LBracket, row, "expected move source address")?;
                        let (src, offset) = self.parse_mem_operand(row)?;
                        self.check_eol(row, "unexpected token after move statement")?;
                        self.image.emit_u8(Opcode::Mov.byte());
                        self.image.emit_u8(0b1000_0000 | size.bits() << 4 | dst.id());
                        self.image.emit_u8(src.id() << 4);
                        self.image.emit_u64(offset);
                        Ok(())
                    }
                    _ => self.fail(row, "unexpected opcode and operands combination"),
                }
            }
            TokenKind::Size(size) => {
                self.next_tok();
                self.expect_kind(TokenKind::LBracket, row, "expected destination move address")?;
                let (dst, offset) = self.parse_mem_operand(row)?;
                self.expect_kind(TokenKind::Comma, row, "expected move source after comma")?;
                let src = self.expect_reg(row, "expected move source register")?;
                self.check_eol(row, "unexpected token after move statement")?;
                self.image.emit_u8(Opcode::Mov.byte());
                self.image.emit_u8(0b1100_0000 | size.bits() << 4 | dst.id());
                self.image.emit_u8(src.id() << 4);
                self.image.emit_u64(offset);
                Ok(())
            }
            _ => self.fail(row, "expected move destination"),
        }
    }

    /// push := PUSH SIZE REG, pop := POP SIZE REG
    fn parse_push_pop(&mut self, opcode: Opcode, row: u32) -> Result<(), ()> {
        let size = self.expect_size(row, "expected size after push/pop")?;
        let reg = self.expect_reg(row, "expected register to push/pop")?;
        self.image.emit_u8(opcode.byte());
        self.image.emit_u8(reg.id() << 4 | size.bits() << 2);
        self.check_eol(row, "unexpected token found")
    }

    fn parse_ret(&mut self, row: u32) -> Result<(), ()> {
        self.image.emit_u8(Opcode::Ret.byte());
        self.check_eol(row, "unexpected token found")
    }

    /// int := INT INTEGER. The id is stored in a single byte; validity is
    /// the machine's concern.
    fn parse_int(&mut self, row: u32) -> Result<(), ()> {
        let id = self.expect_integer(row, "expected interrupt id")?;
        self.image.emit_u8(Opcode::Int.byte());
        self.image.emit_u8(id as u8);
        self.check_eol(row, "unexpected token found")
    }

    fn parse_test(&mut self, row: u32) -> Result<(), ()> {
        let reg = self.expect_reg(row, "expected register to test")?;
        self.image.emit_u8(Opcode::Test.byte());
        self.image.emit_u8(reg.id() << 4);
        self.check_eol(row, "unexpected token found")
    }

    /// mem_operand := REG (('+'|'-') INTEGER)? ']', with the opening
    /// bracket already consumed. A negative offset is encoded by setting
    /// bit 63 while keeping the magnitude in the low bits.
    fn parse_mem_operand(&mut self, row: u32) -> Result<(Register, u64), ()> {
        let reg = self.expect_reg(row, "expected register as base for memory access")?;
        match self.peek_kind() {
            TokenKind::RBracket => {
                self.next_tok();
                Ok((reg, 0))
            }
            TokenKind::Plus | TokenKind::Minus => {
                let neg = self.next_tok().kind == TokenKind::Minus;
                let num = self.expect_integer(row, "offset expected")?;
                self.expect_kind(
                    TokenKind::RBracket,
                    row,
                    "expected closing memory access bracket",
                )?;
                Ok((reg, if neg { num | 1 << 63 } else { num }))
            }
            _ => self.fail(row, "unexpected memory access format"),
        }
    }

    fn emit_mov_imm(&mut self, dst: Register, num: u64) {
        self.image.emit_u8(Opcode::Mov.byte());
        self.image.emit_u8(dst.id());
        self.image.emit_u64(num);
    }

    fn next_tok(&mut self) -> Token {
        self.toks.next().unwrap_or(Token {
            kind: TokenKind::Eof,
            span: Span::dummy(),
            row: 0,
        })
    }

    fn peek_kind(&mut self) -> TokenKind {
        self.toks.peek().map(|t| t.kind).unwrap_or(TokenKind::Eof)
    }

    /// Drop tokens through the end of the current line.
    fn recover(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Eol => {
                    self.next_tok();
                    return;
                }
                _ => {
                    self.next_tok();
                }
            }
        }
    }

    fn report_at(&mut self, tok: Token, row: u32, what: &str) {
        self.errors.push(match tok.kind {
            TokenKind::Eof => error::parse_expected_eof(self.src, row, what),
            TokenKind::Unknown => {
                let lexeme = self.get_span(tok.span);
                error::parse_unexpected_token(self.src, tok.span, tok.row, lexeme)
            }
            _ => error::parse_expected(self.src, tok.span, row, what),
        });
    }

    /// The token that caused a mismatch. Eol/Eof stay in the stream so
    /// recovery does not run into the next line.
    fn take_offending(&mut self) -> Token {
        match self.peek_kind() {
            TokenKind::Eol | TokenKind::Eof => self.toks.peek().copied().unwrap_or(Token {
                kind: TokenKind::Eof,
                span: Span::dummy(),
                row: 0,
            }),
            _ => self.next_tok(),
        }
    }

    /// Report the offending token and fail the line.
    fn fail<T>(&mut self, row: u32, what: &str) -> Result<T, ()> {
        let tok = self.take_offending();
        self.report_at(tok, row, what);
        Err(())
    }

    fn expect_where(
        &mut self,
        check: impl Fn(&TokenKind) -> bool,
        row: u32,
        what: &str,
    ) -> Result<Token, ()> {
        if check(&self.peek_kind()) {
            Ok(self.next_tok())
        } else {
            self.fail(row, what)
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, row: u32, what: &str) -> Result<Token, ()> {
        self.expect_where(|k| *k == kind, row, what)
    }

    fn expect_reg(&mut self, row: u32, what: &str) -> Result<Register, ()> {
        match self
            .expect_where(|k| matches!(k, TokenKind::Register(_)), row, what)?
            .kind
        {
            TokenKind::Register(reg) => Ok(reg),
            _ => unreachable!(),
        }
    }

    fn expect_integer(&mut self, row: u32, what: &str) -> Result<u64, ()> {
        match self
            .expect_where(|k| matches!(k, TokenKind::Integer(_)), row, what)?
            .kind
        {
            TokenKind::Integer(num) => Ok(num),
            _ => unreachable!(),
        }
    }

    fn expect_size(&mut self, row: u32, what: &str) -> Result<MemSize, ()> {
        match self
            .expect_where(|k| matches!(k, TokenKind::Size(_)), row, what)?
            .kind
        {
            TokenKind::Size(size) => Ok(size),
            _ => unreachable!(),
        }
    }

    /// Statements must be alone on their line.
    fn check_eol(&mut self, row: u32, what: &str) -> Result<(), ()> {
        match self.peek_kind() {
            TokenKind::Eol => {
                self.next_tok();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => self.fail(row, what),
        }
    }
}
