//! The machine an instruction handler operates on.

use crate::cpu::instr::{ConditionCode, OpSize};
use crate::cpu::interpret::ExecError;
use crate::cpu::state::reg;
use crate::cpu::{Flags, State};
use crate::io::IoBus;
use crate::memory::VirtualMemory;
use crate::utils::NoDebug;

/// CPU state, memory and I/O backend.
///
/// Instruction handlers are methods on this type. Every fetch advances `eip`,
/// so after a handler returns, `eip` points behind the last byte it consumed
/// (or at the target of a control transfer).
#[derive(Debug)]
pub struct Machine<M: VirtualMemory> {
    pub(crate) state: State,
    pub(crate) mem: M,
    pub(crate) io: NoDebug<Box<dyn IoBus>>,
    /// Vector of an `int` instruction nobody serviced during the current
    /// step.
    pub(crate) unknown_interrupt: Option<u8>,
}

impl<M: VirtualMemory> Machine<M> {
    pub fn new(mem: M, state: State, io: Box<dyn IoBus>) -> Self {
        Self {
            state,
            mem,
            io: NoDebug(io),
            unknown_interrupt: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn io_mut(&mut self) -> &mut dyn IoBus {
        &mut **self.io
    }

    pub fn fetch8(&mut self) -> Result<u8, ExecError> {
        let eip = self.state.eip();
        let byte = self.mem.read8(eip)?;
        self.state.set_eip(eip.wrapping_add(1));
        Ok(byte)
    }

    pub fn fetch16(&mut self) -> Result<u16, ExecError> {
        let eip = self.state.eip();
        let word = self.mem.read16(eip)?;
        self.state.set_eip(eip.wrapping_add(2));
        Ok(word)
    }

    pub fn fetch32(&mut self) -> Result<u32, ExecError> {
        let eip = self.state.eip();
        let dword = self.mem.read32(eip)?;
        self.state.set_eip(eip.wrapping_add(4));
        Ok(dword)
    }

    /// Fetches an immediate of the given size, zero-extended.
    pub fn fetch_imm(&mut self, size: OpSize) -> Result<u32, ExecError> {
        Ok(match size {
            OpSize::Bits8 => u32::from(self.fetch8()?),
            OpSize::Bits16 => u32::from(self.fetch16()?),
            OpSize::Bits32 => self.fetch32()?,
        })
    }

    /// Fetches an 8-bit immediate and sign-extends it to 32 bits.
    pub fn fetch_simm8(&mut self) -> Result<u32, ExecError> {
        Ok(self.fetch8()? as i8 as u32)
    }

    /// Operand size of the current instruction.
    ///
    /// `wide` is the `w` bit of the opcode: when clear, the operation is
    /// 8-bit. Otherwise the operand-size mode picks 16 or 32 bits.
    pub fn operand_size(&self, wide: bool) -> OpSize {
        if !wide {
            OpSize::Bits8
        } else if self.state.prefixes().operand_32() {
            OpSize::Bits32
        } else {
            OpSize::Bits16
        }
    }

    pub fn read_mem(&self, size: OpSize, addr: u32) -> Result<u32, ExecError> {
        Ok(match size {
            OpSize::Bits8 => u32::from(self.mem.read8(addr)?),
            OpSize::Bits16 => u32::from(self.mem.read16(addr)?),
            OpSize::Bits32 => self.mem.read32(addr)?,
        })
    }

    pub fn write_mem(&mut self, size: OpSize, addr: u32, value: u32) -> Result<(), ExecError> {
        match size {
            OpSize::Bits8 => self.mem.write8(addr, value as u8)?,
            OpSize::Bits16 => self.mem.write16(addr, value as u16)?,
            OpSize::Bits32 => self.mem.write32(addr, value)?,
        }
        Ok(())
    }

    /// Pushes a 16- or 32-bit value.
    ///
    /// `esp` is only decremented if the store succeeds.
    pub fn push(&mut self, size: OpSize, value: u32) -> Result<(), ExecError> {
        debug_assert_ne!(size, OpSize::Bits8, "cannot push a single byte");
        let esp = self.state.esp().wrapping_sub(size.bytes());
        self.write_mem(size, esp, value)?;
        self.state.set_esp(esp);
        Ok(())
    }

    /// Pops a 16- or 32-bit value, zero-extended.
    pub fn pop(&mut self, size: OpSize) -> Result<u32, ExecError> {
        debug_assert_ne!(size, OpSize::Bits8, "cannot pop a single byte");
        let esp = self.state.esp();
        let value = self.read_mem(size, esp)?;
        self.state.set_esp(esp.wrapping_add(size.bytes()));
        Ok(value)
    }

    pub fn push32(&mut self, value: u32) -> Result<(), ExecError> {
        self.push(OpSize::Bits32, value)
    }

    pub fn pop32(&mut self) -> Result<u32, ExecError> {
        self.pop(OpSize::Bits32)
    }

    pub fn push16(&mut self, value: u16) -> Result<(), ExecError> {
        self.push(OpSize::Bits16, value.into())
    }

    pub fn pop16(&mut self) -> Result<u16, ExecError> {
        Ok(self.pop(OpSize::Bits16)? as u16)
    }

    /// Checks a condition code against the currently set status flags.
    ///
    /// Returns `true` if the condition is fulfilled, `false` if not.
    pub fn eval_cc(&self, cc: ConditionCode) -> bool {
        use crate::cpu::instr::ConditionCode::*;

        let flags = self.state.flags();
        let cf = flags.contains(Flags::CF);
        let zf = flags.contains(Flags::ZF);
        let sf = flags.contains(Flags::SF);
        let of = flags.contains(Flags::OF);
        match cc {
            Overflow       => of,
            NotOverflow    => !of,
            Carry          => cf,
            NotCarry       => !cf,
            Equal          => zf,
            NotEqual       => !zf,
            BelowOrEqual   => cf || zf,
            Above          => !cf && !zf,
            Sign           => sf,
            NotSign        => !sf,
            Parity         => flags.contains(Flags::PF),
            NotParity      => !flags.contains(Flags::PF),
            Less           => sf != of,
            GreaterOrEqual => sf == of,
            LessOrEqual    => zf || sf != of,
            Greater        => !zf && sf == of,
        }
    }

    /// Reads the accumulator (`al`, `ax` or `eax`).
    pub fn acc(&self, size: OpSize) -> u32 {
        self.state.reg(size, reg::EAX)
    }

    pub fn set_acc(&mut self, size: OpSize, value: u32) {
        self.state.set_reg(size, reg::EAX, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NullBus;
    use crate::memory::{FlatMemory, MemoryError};

    fn machine() -> Machine<FlatMemory> {
        Machine::new(FlatMemory::new(0x100), State::new(0, 0x80), Box::new(NullBus))
    }

    #[test]
    fn stack() {
        let mut m = machine();
        m.push32(0xDEAD_BEEF).unwrap();
        assert_eq!(m.state.esp(), 0x7C);
        assert_eq!(m.mem.read32(0x7C).unwrap(), 0xDEAD_BEEF);
        m.push16(0x1234).unwrap();
        assert_eq!(m.state.esp(), 0x7A);
        assert_eq!(m.pop16().unwrap(), 0x1234);
        assert_eq!(m.pop32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(m.state.esp(), 0x80);
    }

    #[test]
    fn failed_push_keeps_esp() {
        let mut m = machine();
        m.state.set_esp(0x102);
        match m.push32(1) {
            Err(ExecError::Memory(MemoryError::OutOfBounds { .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.state.esp(), 0x102);
    }

    #[test]
    fn fetch_advances_eip() {
        let mut m = machine();
        m.mem.load_image(0, &[0x90, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFE]).unwrap();
        assert_eq!(m.fetch8().unwrap(), 0x90);
        assert_eq!(m.fetch16().unwrap(), 0x1234);
        assert_eq!(m.fetch32().unwrap(), 0x1234_5678);
        assert_eq!(m.fetch_simm8().unwrap(), 0xFFFF_FFFE);
        assert_eq!(m.state.eip(), 8);
    }

    #[test]
    fn condition_codes() {
        let mut m = machine();
        m.state.set_flags(Flags::CF);
        assert!(!m.eval_cc(ConditionCode::Above));
        assert!(m.eval_cc(ConditionCode::BelowOrEqual));
        m.state.set_flags(Flags::empty());
        assert!(m.eval_cc(ConditionCode::Above));
        m.state.set_flags(Flags::SF);
        assert!(m.eval_cc(ConditionCode::Less));
        assert!(!m.eval_cc(ConditionCode::Greater));
        m.state.set_flags(Flags::SF | Flags::OF);
        assert!(m.eval_cc(ConditionCode::Greater));
        assert!(m.eval_cc(ConditionCode::GreaterOrEqual));
    }
}
