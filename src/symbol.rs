//! Shared vocabulary of the binary contract between the assembler and the
//! virtual machine: registers, opcodes, operand sizes, jump conditions.

use std::fmt;

/// Represents the CPU registers, in encoding order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    /// Interrupt argument/return register.
    Ir,
    /// Flags register.
    Fg,
    /// Instruction pointer, a byte offset into the memory image.
    Ip,
    /// Stack pointer, grows upward.
    Sp,
    /// Base pointer.
    Bp,
}

/// Number of addressable registers. Ids at or above this value are invalid.
pub const REG_COUNT: u8 = 13;

impl Register {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Decode a 4-bit register id. Ids 13..=15 are encodable but invalid.
    pub fn from_id(id: u8) -> Option<Register> {
        use Register::*;
        Some(match id {
            0 => R0,
            1 => R1,
            2 => R2,
            3 => R3,
            4 => R4,
            5 => R5,
            6 => R6,
            7 => R7,
            8 => Ir,
            9 => Fg,
            10 => Ip,
            11 => Sp,
            12 => Bp,
            _ => return None,
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::R0 => "R0",
            Register::R1 => "R1",
            Register::R2 => "R2",
            Register::R3 => "R3",
            Register::R4 => "R4",
            Register::R5 => "R5",
            Register::R6 => "R6",
            Register::R7 => "R7",
            Register::Ir => "IR",
            Register::Fg => "FG",
            Register::Ip => "IP",
            Register::Sp => "SP",
            Register::Bp => "BP",
        };
        f.write_str(name)
    }
}

/// Instruction opcodes as stored in the first byte of every instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Add = 0,
    Sub,
    And,
    Or,
    Xor,
    Not,
    Mov,
    Push,
    Pop,
    Jmp,
    Call,
    Ret,
    Int,
    Cmp,
    Test,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_u8(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0 => Add,
            1 => Sub,
            2 => And,
            3 => Or,
            4 => Xor,
            5 => Not,
            6 => Mov,
            7 => Push,
            8 => Pop,
            9 => Jmp,
            10 => Call,
            11 => Ret,
            12 => Int,
            13 => Cmp,
            14 => Test,
            _ => return None,
        })
    }
}

/// Two-register instructions sharing the `dddd ssss` operand byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinKind {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Not,
    Cmp,
}

impl BinKind {
    pub fn opcode(self) -> Opcode {
        match self {
            BinKind::Add => Opcode::Add,
            BinKind::Sub => Opcode::Sub,
            BinKind::And => Opcode::And,
            BinKind::Or => Opcode::Or,
            BinKind::Xor => Opcode::Xor,
            BinKind::Not => Opcode::Not,
            BinKind::Cmp => Opcode::Cmp,
        }
    }
}

/// 2-bit operand-size tag scaling memory and stack operations.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum MemSize {
    Byte = 0,
    Word,
    Dword,
    Qword,
}

impl MemSize {
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Operand width in bytes: `1 << tag`.
    pub fn bytes(self) -> u64 {
        1 << (self as u8)
    }

    pub fn from_bits(bits: u8) -> MemSize {
        match bits & 0b11 {
            0 => MemSize::Byte,
            1 => MemSize::Word,
            2 => MemSize::Dword,
            _ => MemSize::Qword,
        }
    }
}

/// Jump condition as encoded in the high bits of the jump operand byte:
/// bit 2 negates, bits 1..0 select the flag to test.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct JumpCond(u8);

impl JumpCond {
    pub const ALWAYS: JumpCond = JumpCond(0b000);
    pub const NEG: JumpCond = JumpCond(0b001);
    pub const ZERO: JumpCond = JumpCond(0b010);
    pub const POS: JumpCond = JumpCond(0b011);
    pub const NOT_NEG: JumpCond = JumpCond(0b101);
    pub const NOT_ZERO: JumpCond = JumpCond(0b110);
    pub const NOT_POS: JumpCond = JumpCond(0b111);

    /// Operand byte for this condition: `n mm 00000`.
    pub fn operand_byte(self) -> u8 {
        self.0 << 5
    }
}

/// Flag register values. Exactly one is held after a flag-updating
/// instruction.
pub mod flag {
    pub const NEG: u64 = 0x1;
    pub const ZERO: u64 = 0x2;
    pub const POS: u64 = 0x4;
}
