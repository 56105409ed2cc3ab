//! Control transfer, interrupts and flag manipulation.

use crate::cpu::instr::ConditionCode;
use crate::cpu::interpret::{ExecError, Opcode};
use crate::cpu::machine::Machine;
use crate::cpu::modrm::ModRm;
use crate::cpu::Flags;
use crate::io::Interrupt;
use crate::memory::VirtualMemory;

use num_traits::FromPrimitive;

/// Condition code encoded in the low nibble of a `jcc`/`setcc` opcode.
fn condition(opcode: Opcode, byte: u8) -> Result<ConditionCode, ExecError> {
    ConditionCode::from_u8(byte & 0xF).ok_or(ExecError::UnimplementedOpcode(opcode))
}

impl<M: VirtualMemory> Machine<M> {
    /// Fetches a 16- or 32-bit relative branch displacement, sign-extended.
    fn fetch_rel(&mut self) -> Result<u32, ExecError> {
        if self.state.prefixes().operand_32() {
            self.fetch32()
        } else {
            Ok(self.fetch16()? as i16 as u32)
        }
    }

    /// Sets `eip` to `eip + rel`. With a 16-bit operand size, the target is
    /// truncated to 16 bits.
    fn jump_relative(&mut self, rel: u32) {
        let target = self.state.eip().wrapping_add(rel);
        self.jump_absolute(target);
    }

    fn jump_absolute(&mut self, target: u32) {
        let target = if self.state.prefixes().operand_32() {
            target
        } else {
            target & 0xFFFF
        };
        self.state.set_eip(target);
    }

    /// `jcc rel8` (`0x70`-`0x7F`).
    pub(crate) fn jcc_rel8(&mut self, opcode: u8) -> Result<(), ExecError> {
        let cc = condition(Opcode::Primary(opcode), opcode)?;
        let rel = self.fetch_simm8()?;
        if self.eval_cc(cc) {
            self.jump_relative(rel);
        }
        Ok(())
    }

    /// `jcc rel32` (`0x0F 0x80`-`0x0F 0x8F`).
    pub(crate) fn jcc_rel(&mut self, opcode: u8) -> Result<(), ExecError> {
        let cc = condition(Opcode::Extended(opcode), opcode)?;
        let rel = self.fetch_rel()?;
        if self.eval_cc(cc) {
            self.jump_relative(rel);
        }
        Ok(())
    }

    /// `setcc r/m8` (`0x0F 0x90`-`0x0F 0x9F`).
    ///
    /// Always writes the operand: 1 if the condition holds, 0 otherwise.
    pub(crate) fn setcc(&mut self, opcode: u8) -> Result<(), ExecError> {
        let cc = condition(Opcode::Extended(opcode), opcode)?;
        let modrm = self.decode_modrm()?;
        let value = self.eval_cc(cc) as u8;
        self.set_rm8(&modrm, value)
    }

    /// `jmp rel8` (`0xEB`).
    pub(crate) fn jmp_rel8(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let rel = self.fetch_simm8()?;
        self.jump_relative(rel);
        Ok(())
    }

    /// `jmp rel32` (`0xE9`).
    pub(crate) fn jmp_rel(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let rel = self.fetch_rel()?;
        self.jump_relative(rel);
        Ok(())
    }

    /// `jmp r/m` (`0xFF /4`).
    pub(crate) fn jmp_rm(&mut self, _opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let target = self.get_rm(size, modrm)?;
        self.jump_absolute(target);
        Ok(())
    }

    /// `call rel32` (`0xE8`).
    ///
    /// Pushes the address of the next instruction and jumps.
    pub(crate) fn call_rel(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let rel = self.fetch_rel()?;
        let ret = self.state.eip();
        self.push(size, ret)?;
        self.jump_relative(rel);
        Ok(())
    }

    /// `call r/m` (`0xFF /2`).
    pub(crate) fn call_rm(&mut self, _opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let target = self.get_rm(size, modrm)?;
        let ret = self.state.eip();
        self.push(size, ret)?;
        self.jump_absolute(target);
        Ok(())
    }

    /// `ret` (`0xC3`) and `ret imm16` (`0xC2`).
    ///
    /// `ret imm16` additionally releases `imm16` bytes of arguments.
    pub(crate) fn ret(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let release = match opcode {
            0xC2 => u32::from(self.fetch16()?),
            _ => 0,
        };
        let target = self.pop(size)?;
        let esp = self.state.esp().wrapping_add(release);
        self.state.set_esp(esp);
        self.jump_absolute(target);
        Ok(())
    }

    /// Forwards software interrupt `vector` to the I/O bus.
    fn software_interrupt(&mut self, vector: u8) {
        match self.io.interrupt(vector, &mut self.state) {
            Interrupt::Handled => {}
            Interrupt::Unhandled => {
                warn!("unknown interrupt vector {:#04X} (eip={:#010X})", vector, self.state.eip());
                self.unknown_interrupt = Some(vector);
            }
        }
    }

    /// `int imm8` (`0xCD`) and `int3` (`0xCC`).
    pub(crate) fn int(&mut self, opcode: u8) -> Result<(), ExecError> {
        let vector = match opcode {
            0xCC => 3,
            _ => self.fetch8()?,
        };
        self.software_interrupt(vector);
        Ok(())
    }

    /// `hlt` (`0xF4`): stops the run loop. `eip` points behind the
    /// instruction.
    pub(crate) fn hlt(&mut self, _opcode: u8) -> Result<(), ExecError> {
        self.state.set_halted(true);
        Ok(())
    }

    /// `cmc`, `clc`, `stc`, `cli`, `sti`, `cld` and `std`.
    pub(crate) fn flag_op(&mut self, opcode: u8) -> Result<(), ExecError> {
        let (flag, value) = match opcode {
            0xF5 => (Flags::CF, !self.state.flag(Flags::CF)),
            0xF8 => (Flags::CF, false),
            0xF9 => (Flags::CF, true),
            0xFA => (Flags::IF, false),
            0xFB => (Flags::IF, true),
            0xFC => (Flags::DF, false),
            0xFD => (Flags::DF, true),
            _ => return Err(ExecError::UnimplementedOpcode(Opcode::Primary(opcode))),
        };
        self.state.update_flags(flag, value);
        Ok(())
    }
}
