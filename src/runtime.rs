use std::collections::VecDeque;
use std::io::{self, Read as _, Write as _};
use std::ops::Range;

use miette::Result;

use crate::error;
use crate::symbol::{flag, MemSize, Opcode, Register, REG_COUNT};

/// Default size of the memory image in bytes.
pub const DEFAULT_MEM_SIZE: usize = 10000;

/// Port for the host side of the interrupt instructions. `PutC`/`PutS`
/// complete when the host accepts the byte; `GetC` blocks until a byte is
/// available or the stream ends.
pub trait HostIo {
    fn put_byte(&mut self, byte: u8) -> io::Result<()>;
    /// `None` signals end of stream; the guest observes it as a zero byte.
    fn get_byte(&mut self) -> io::Result<Option<u8>>;
}

/// [`HostIo`] over process stdin/stdout, used by the CLI. Output is
/// flushed per byte so guest output interleaves with status lines.
pub struct StdIo;

impl HostIo for StdIo {
    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(&[byte])?;
        out.flush()
    }

    fn get_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let read = io::stdin().lock().read(&mut buf)?;
        Ok((read == 1).then_some(buf[0]))
    }
}

/// Buffer-backed [`HostIo`] for embedding the machine and for tests.
#[derive(Default)]
pub struct BufIo {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufIo {
    pub fn new() -> Self {
        BufIo::default()
    }

    pub fn with_input(input: &[u8]) -> Self {
        BufIo {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }
}

impl HostIo for BufIo {
    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.push(byte);
        Ok(())
    }

    fn get_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.pop_front())
    }
}

/// Represents complete machine state during execution: one flat byte
/// image shared by code and stack, and the thirteen registers.
pub struct RunState {
    mem: Vec<u8>,
    reg: [u64; REG_COUNT as usize],
    /// Byte length of the loaded program; the stack region starts here.
    program_len: u64,
    halted: bool,
}

impl RunState {
    pub fn new(program: &[u8]) -> Result<RunState> {
        Self::with_mem_size(program, DEFAULT_MEM_SIZE)
    }

    /// Load `program` at offset 0 of a fresh image. `SP` and `BP` start
    /// at the end of the program, where the stack region begins.
    pub fn with_mem_size(program: &[u8], mem_size: usize) -> Result<RunState> {
        if program.len() > mem_size {
            return Err(error::exec_program_too_large(program.len(), mem_size));
        }
        let mut mem = vec![0u8; mem_size];
        mem[..program.len()].copy_from_slice(program);
        let mut reg = [0u64; REG_COUNT as usize];
        reg[Register::Sp as usize] = program.len() as u64;
        reg[Register::Bp as usize] = program.len() as u64;
        Ok(RunState {
            mem,
            reg,
            program_len: program.len() as u64,
            halted: false,
        })
    }

    pub fn reg(&self, reg: Register) -> u64 {
        self.reg[reg as usize]
    }

    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    /// Interpret until a halt interrupt, until the instruction pointer
    /// leaves the program, or until a fault.
    pub fn run(&mut self, io: &mut dyn HostIo) -> Result<()> {
        while self.ip() < self.program_len && !self.halted {
            self.step(io)?;
        }
        Ok(())
    }

    fn step(&mut self, io: &mut dyn HostIo) -> Result<()> {
        let opcode = match Opcode::from_u8(self.fetch_u8()?) {
            Some(opcode) => opcode,
            None => return Err(error::exec_unknown_opcode(self.ip())),
        };
        match opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Not => {
                let operand = self.fetch_u8()?;
                let dst = self.decode_reg(operand >> 4)?;
                let src = self.decode_reg(operand & 0xF)?;
                let a = self.get(dst);
                let b = self.get(src);
                let res = match opcode {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::And => a & b,
                    Opcode::Or => a | b,
                    Opcode::Xor => a ^ b,
                    Opcode::Not => !b,
                    _ => unreachable!(),
                };
                self.set(dst, res);
                self.update_flags(res);
            }
            Opcode::Mov => self.exec_mov()?,
            Opcode::Push => {
                let operand = self.fetch_u8()?;
                let src = self.decode_reg(operand >> 4)?;
                let size = MemSize::from_bits(operand >> 2);
                self.push(self.get(src), size)?;
            }
            Opcode::Pop => {
                let operand = self.fetch_u8()?;
                let dst = self.decode_reg(operand >> 4)?;
                let size = MemSize::from_bits(operand >> 2);
                let val = self.pop(size)?;
                self.set(dst, val);
                self.update_flags(val);
            }
            Opcode::Jmp => {
                let operand = self.fetch_u8()?;
                let neg = operand >> 7 & 0x1 != 0;
                let mode = operand >> 5 & 0x3;
                let dest = self.fetch_u64()?;
                let fg = self.get(Register::Fg);
                let taken = match mode {
                    0b00 => true,
                    0b01 => (fg & flag::NEG != 0) ^ neg,
                    0b10 => (fg & flag::ZERO != 0) ^ neg,
                    _ => (fg & flag::POS != 0) ^ neg,
                };
                if taken {
                    self.set(Register::Ip, dest);
                }
            }
            Opcode::Call => {
                let dest = self.fetch_u64()?;
                self.push(self.ip(), MemSize::Qword)?;
                self.set(Register::Ip, dest);
            }
            Opcode::Ret => {
                let dest = self.pop(MemSize::Qword)?;
                self.set(Register::Ip, dest);
            }
            Opcode::Int => {
                let id = self.fetch_u8()?;
                self.interrupt(id, io)?;
            }
            Opcode::Cmp => {
                let operand = self.fetch_u8()?;
                let fst = self.decode_reg(operand >> 4)?;
                let snd = self.decode_reg(operand & 0xF)?;
                // Flags only; neither register is written
                let res = self.get(fst).wrapping_sub(self.get(snd));
                self.update_flags(res);
            }
            Opcode::Test => {
                let operand = self.fetch_u8()?;
                let src = self.decode_reg(operand >> 4)?;
                self.update_flags(self.get(src));
            }
        }
        Ok(())
    }

    fn exec_mov(&mut self) -> Result<()> {
        let operand = self.fetch_u8()?;
        let mode = operand >> 6 & 0x3;
        let size = MemSize::from_bits(operand >> 4);
        let dst = self.decode_reg(operand & 0xF)?;
        match mode {
            // immediate to register
            0b00 => {
                let num = self.fetch_u64()?;
                self.set(dst, num);
                self.update_flags(num);
            }
            // register to register
            0b01 => {
                let src_byte = self.fetch_u8()?;
                let src = self.decode_reg(src_byte >> 4)?;
                let val = self.get(src);
                self.set(dst, val);
                self.update_flags(val);
            }
            // memory to register
            0b10 => {
                let src_byte = self.fetch_u8()?;
                let src = self.decode_reg(src_byte >> 4)?;
                let offset = self.fetch_u64()?;
                let addr = self.get(src).wrapping_add(offset);
                let val = self.mem_load(addr, size)?;
                self.set(dst, val);
                self.update_flags(val);
            }
            // register to memory
            _ => {
                let src_byte = self.fetch_u8()?;
                let src = self.decode_reg(src_byte >> 4)?;
                let offset = self.fetch_u64()?;
                let addr = self.get(dst).wrapping_add(offset);
                self.mem_store(addr, size, self.get(src))?;
                // Flags reflect the stored value, zero-extended
                let stored = self.mem_load(addr, size)?;
                self.update_flags(stored);
            }
        }
        Ok(())
    }

    fn interrupt(&mut self, id: u8, io: &mut dyn HostIo) -> Result<()> {
        match id {
            // PutC: low byte of IR
            0 => {
                let byte = self.get(Register::Ir) as u8;
                io.put_byte(byte)
                    .map_err(|e| error::exec_host_io(self.ip(), e))?;
            }
            // PutS: bytes from memory[IR] until a zero byte or the end
            // of the image
            1 => {
                let mut addr = self.get(Register::Ir);
                while (addr as usize) < self.mem.len() && self.mem[addr as usize] != 0 {
                    io.put_byte(self.mem[addr as usize])
                        .map_err(|e| error::exec_host_io(self.ip(), e))?;
                    addr += 1;
                }
            }
            // GetC: end of stream reads as zero
            2 => {
                let byte = io
                    .get_byte()
                    .map_err(|e| error::exec_host_io(self.ip(), e))?;
                self.set(Register::Ir, byte.unwrap_or(0) as u64);
            }
            3 => self.halted = true,
            _ => return Err(error::exec_invalid_interrupt(self.ip())),
        }
        Ok(())
    }

    fn ip(&self) -> u64 {
        self.reg[Register::Ip as usize]
    }

    fn get(&self, reg: Register) -> u64 {
        self.reg[reg as usize]
    }

    fn set(&mut self, reg: Register, val: u64) {
        self.reg[reg as usize] = val;
    }

    fn decode_reg(&self, id: u8) -> Result<Register> {
        Register::from_id(id & 0xF).ok_or_else(|| error::exec_invalid_register(self.ip()))
    }

    /// Exactly one flag survives each update: zero wins, then the sign
    /// bit, then positive.
    fn update_flags(&mut self, val: u64) {
        let fg = if val == 0 {
            flag::ZERO
        } else if val >> 63 != 0 {
            flag::NEG
        } else {
            flag::POS
        };
        self.set(Register::Fg, fg);
    }

    fn fetch_u8(&mut self) -> Result<u8> {
        let val = self.mem_load(self.ip(), MemSize::Byte)?;
        self.set(Register::Ip, self.ip() + 1);
        Ok(val as u8)
    }

    fn fetch_u64(&mut self) -> Result<u64> {
        let val = self.mem_load(self.ip(), MemSize::Qword)?;
        self.set(Register::Ip, self.ip() + 8);
        Ok(val)
    }

    fn push(&mut self, val: u64, size: MemSize) -> Result<()> {
        let sp = self.get(Register::Sp);
        self.mem_store(sp, size, val)?;
        self.set(Register::Sp, sp.wrapping_add(size.bytes()));
        Ok(())
    }

    fn pop(&mut self, size: MemSize) -> Result<u64> {
        let sp = self.get(Register::Sp).wrapping_sub(size.bytes());
        let val = self.mem_load(sp, size)?;
        self.set(Register::Sp, sp);
        Ok(val)
    }

    /// Big-endian load of `size.bytes()` bytes starting at `addr`.
    fn mem_load(&self, addr: u64, size: MemSize) -> Result<u64> {
        let range = self.mem_range(addr, size)?;
        let width = range.len();
        let mut buf = [0u8; 8];
        buf[8 - width..].copy_from_slice(&self.mem[range]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Big-endian store of the low `size.bytes()` bytes of `num`.
    fn mem_store(&mut self, addr: u64, size: MemSize, num: u64) -> Result<()> {
        let range = self.mem_range(addr, size)?;
        let width = range.len();
        self.mem[range].copy_from_slice(&num.to_be_bytes()[8 - width..]);
        Ok(())
    }

    fn mem_range(&self, addr: u64, size: MemSize) -> Result<Range<usize>> {
        match addr.checked_add(size.bytes()) {
            Some(end) if end <= self.mem.len() as u64 => Ok(addr as usize..end as usize),
            _ => Err(error::exec_out_of_bounds(self.ip(), addr)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::AsmParser;

    fn run_bytes(program: &[u8]) -> (RunState, BufIo) {
        let mut state = RunState::new(program).unwrap();
        let mut io = BufIo::new();
        state.run(&mut io).unwrap();
        (state, io)
    }

    fn run_src(src: &'static str) -> (RunState, BufIo) {
        let bytes = AsmParser::new(src).assemble().unwrap();
        run_bytes(&bytes)
    }

    #[test]
    fn minimal_halt() {
        let (state, io) = run_bytes(&[0x0C, 0x03]);
        assert!(state.halted);
        assert!(io.output().is_empty());
    }

    #[test]
    fn empty_program_completes() {
        let (state, _) = run_bytes(&[]);
        assert!(!state.halted);
        assert_eq!(state.reg(Register::Ip), 0);
    }

    #[test]
    fn put_char() {
        let (_, io) = run_src("mov IR, 65\nint 0\nint 3");
        assert_eq!(io.output(), b"A");
    }

    #[test]
    fn get_char_roundtrip() {
        let bytes = AsmParser::new("int 2\nint 0\nint 3").assemble().unwrap();
        let mut state = RunState::new(&bytes).unwrap();
        let mut io = BufIo::with_input(b"Z");
        state.run(&mut io).unwrap();
        assert_eq!(io.output(), b"Z");
    }

    #[test]
    fn get_char_end_of_stream_reads_zero() {
        let bytes = AsmParser::new("mov IR, 9\nint 2\nint 3").assemble().unwrap();
        let mut state = RunState::new(&bytes).unwrap();
        state.run(&mut BufIo::new()).unwrap();
        assert_eq!(state.reg(Register::Ir), 0);
    }

    #[test]
    fn put_string_stops_at_zero_byte() {
        // Build "Hi\0" in the stack region, point IR at it, print it
        let (_, io) = run_src(
            "mov r1, 72\n\
             mov byte [bp], r1\n\
             mov r1, 105\n\
             mov byte [bp + 1], r1\n\
             mov ir, bp\n\
             int 1\n\
             int 3",
        );
        assert_eq!(io.output(), b"Hi");
    }

    #[test]
    fn arithmetic_and_flags() {
        let (state, _) = run_src("mov r0, 7\nmov r1, 5\nsub r0, r1\nint 3");
        assert_eq!(state.reg(Register::R0), 2);
        assert_eq!(state.reg(Register::Fg), flag::POS);

        let (state, _) = run_src("mov r0, 5\nmov r1, 5\nsub r0, r1\nint 3");
        assert_eq!(state.reg(Register::R0), 0);
        assert_eq!(state.reg(Register::Fg), flag::ZERO);

        let (state, _) = run_src("mov r0, 4\nmov r1, 5\nsub r0, r1\nint 3");
        assert_eq!(state.reg(Register::R0), u64::MAX);
        assert_eq!(state.reg(Register::Fg), flag::NEG);
    }

    #[test]
    fn bitwise_ops() {
        let (state, _) = run_src(
            "mov r0, 12\nmov r1, 10\nand r0, r1\n\
             mov r2, 12\nor r2, r1\n\
             mov r3, 12\nxor r3, r1\n\
             not r4, r1\nint 3",
        );
        assert_eq!(state.reg(Register::R0), 12 & 10);
        assert_eq!(state.reg(Register::R2), 12 | 10);
        assert_eq!(state.reg(Register::R3), 12 ^ 10);
        assert_eq!(state.reg(Register::R4), !10u64);
    }

    #[test]
    fn negative_immediate_sets_sign_bit_value() {
        let (state, _) = run_src("mov r0, -1\nint 3");
        assert_eq!(state.reg(Register::R0), 1 | 1 << 63);
        assert_eq!(state.reg(Register::Fg), flag::NEG);
    }

    #[test]
    fn mov_store_then_load() {
        let (state, _) = run_src(
            "mov r0, 258\n\
             mov word [bp + 2], r0\n\
             mov r1, word [bp + 2]\n\
             int 3",
        );
        assert_eq!(state.reg(Register::R1), 258);
        // Stored big-endian at the stack bottom + 2
        let bottom = state.program_len as usize;
        assert_eq!(&state.memory()[bottom + 2..bottom + 4], &[0x01, 0x02]);
    }

    #[test]
    fn store_updates_flags_from_truncated_value() {
        // 256 truncated to one byte is 0, so the zero flag lands
        let (state, _) = run_src("mov r0, 256\nmov byte [bp], r0\nint 3");
        assert_eq!(state.reg(Register::Fg), flag::ZERO);
    }

    #[test]
    fn stack_roundtrip_restores_register_and_sp() {
        let (state, _) = run_src("mov r0, 72623859790382856\npush qword r0\npop qword r1\nint 3");
        assert_eq!(state.reg(Register::R1), 0x0102030405060708);
        assert_eq!(state.reg(Register::R1), state.reg(Register::R0));
        assert_eq!(state.reg(Register::Sp), state.program_len);
    }

    #[test]
    fn push_truncates_to_size() {
        let (state, _) = run_src("mov r0, 511\npush byte r0\npop byte r1\nint 3");
        assert_eq!(state.reg(Register::R1), 0xFF);
        assert_eq!(state.reg(Register::Sp), state.program_len);
    }

    #[test]
    fn cmp_sets_flags_without_mutating() {
        let (state, _) = run_src("mov r0, 5\nmov r1, 4\ncmp r0, r1\nint 3");
        assert_eq!(state.reg(Register::R0), 5);
        assert_eq!(state.reg(Register::Fg), flag::POS);

        let (state, _) = run_src("mov r0, 5\nmov r1, 5\ncmp r0, r1\nint 3");
        assert_eq!(state.reg(Register::R0), 5);
        assert_eq!(state.reg(Register::Fg), flag::ZERO);
    }

    #[test]
    fn loop_with_backward_jump() {
        let (state, io) = run_src(
            "mov r0, 3\n\
             mov r2, 1\n\
             loop:\n\
             mov ir, 88\n\
             int 0\n\
             sub r0, r2\n\
             test r0\n\
             jnz loop\n\
             int 3",
        );
        assert_eq!(io.output(), b"XXX");
        assert_eq!(state.reg(Register::R0), 0);
    }

    #[test]
    fn conditional_jump_not_taken_falls_through() {
        let (_, io) = run_src(
            "mov r0, 1\n\
             test r0\n\
             jz skip\n\
             mov ir, 64\n\
             int 0\n\
             skip:\n\
             int 3",
        );
        assert_eq!(io.output(), b"@");
    }

    #[test]
    fn call_and_ret_are_symmetric() {
        let (state, io) = run_src(
            "call greet\n\
             mov ir, 33\n\
             int 0\n\
             int 3\n\
             greet:\n\
             mov ir, 104\n\
             int 0\n\
             ret",
        );
        assert_eq!(io.output(), b"h!");
        assert_eq!(state.reg(Register::Sp), state.program_len);
    }

    #[test]
    fn jump_past_program_end_terminates_cleanly() {
        let mut bytes = vec![0x09, 0x00];
        bytes.extend_from_slice(&9999u64.to_be_bytes());
        let (state, _) = run_bytes(&bytes);
        assert!(!state.halted);
        assert_eq!(state.reg(Register::Ip), 9999);
    }

    #[test]
    fn invalid_register_faults_before_side_effect() {
        // add r13, r0
        let mut state = RunState::new(&[0x00, 0xD0]).unwrap();
        let err = state.run(&mut BufIo::new()).unwrap_err();
        assert!(err.to_string().contains("invalid register"));
        assert_eq!(state.reg(Register::Fg), 0);
    }

    #[test]
    fn unknown_opcode_faults() {
        let mut state = RunState::new(&[0x0F]).unwrap();
        let err = state.run(&mut BufIo::new()).unwrap_err();
        assert!(err.to_string().contains("invalid opcode"));
    }

    #[test]
    fn invalid_interrupt_faults() {
        let mut state = RunState::new(&[0x0C, 0x04]).unwrap();
        let err = state.run(&mut BufIo::new()).unwrap_err();
        assert!(err.to_string().contains("invalid interrupt id"));
    }

    #[test]
    fn out_of_bounds_store_faults() {
        let bytes = AsmParser::new("mov byte [bp + 20000], r0\nint 3")
            .assemble()
            .unwrap();
        let mut state = RunState::new(&bytes).unwrap();
        let err = state.run(&mut BufIo::new()).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn program_larger_than_memory_is_rejected() {
        assert!(RunState::with_mem_size(&[0u8; 32], 16).is_err());
    }

    #[test]
    fn flag_register_holds_exactly_one_flag() {
        for src in [
            "mov r0, 0\nint 3",
            "mov r0, 1\nint 3",
            "mov r0, -1\nint 3",
        ] {
            let (state, _) = run_src(src);
            let fg = state.reg(Register::Fg);
            assert!(fg == flag::NEG || fg == flag::ZERO || fg == flag::POS);
        }
    }
}
