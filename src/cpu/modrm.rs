//! Mod-Reg-R/M and SIB byte decoding and operand access.
//!
//! The Mod-Reg-R/M byte follows the opcode of most instructions that take a
//! register or memory operand. Its layout is:
//!
//! ```notrust
//!  7 6 5 4 3 2 1 0
//! [mod][reg ][ rm ]
//! ```
//!
//! `reg` names a register operand, or a sub-opcode for group instructions.
//! `mod` and `rm` together name either a second register (`mod = 3`) or a
//! memory location. In 32-bit addressing, `rm = 4` announces a SIB byte with
//! the same layout (`scale`, `index`, `base`). In 16-bit addressing there is
//! no SIB byte and `rm` selects one of eight fixed base register combinations.

use crate::cpu::instr::OpSize;
use crate::cpu::interpret::ExecError;
use crate::cpu::machine::Machine;
use crate::cpu::state::reg;
use crate::memory::VirtualMemory;

/// Base register combination of a 16-bit memory operand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Base16 {
    BxSi,
    BxDi,
    BpSi,
    BpDi,
    Si,
    Di,
    Bp,
    Bx,
}

impl Base16 {
    fn from_rm(rm: u8) -> Self {
        match rm & 7 {
            0 => Base16::BxSi,
            1 => Base16::BxDi,
            2 => Base16::BpSi,
            3 => Base16::BpDi,
            4 => Base16::Si,
            5 => Base16::Di,
            6 => Base16::Bp,
            _ => Base16::Bx,
        }
    }

    /// The registers summed to form the base address.
    fn registers(self) -> (u8, Option<u8>) {
        match self {
            Base16::BxSi => (reg::EBX, Some(reg::ESI)),
            Base16::BxDi => (reg::EBX, Some(reg::EDI)),
            Base16::BpSi => (reg::EBP, Some(reg::ESI)),
            Base16::BpDi => (reg::EBP, Some(reg::EDI)),
            Base16::Si => (reg::ESI, None),
            Base16::Di => (reg::EDI, None),
            Base16::Bp => (reg::EBP, None),
            Base16::Bx => (reg::EBX, None),
        }
    }
}

/// A memory location as encoded by the Mod-Reg-R/M (and SIB) bytes.
///
/// 8-bit displacements are sign-extended to the width of the `disp` field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// `[base + disp]`, or `[disp]` if `base` is `None`.
    Disp {
        base: Option<u8>,
        disp: u32,
    },
    /// `[base + index * (1 << scale) + disp]`.
    Sib {
        /// Shift amount applied to `index` (0-3).
        scale: u8,
        index: Option<u8>,
        base: Option<u8>,
        disp: u32,
    },
    /// 16-bit addressing: `[base + disp]`, truncated to 16 bits.
    Mem16 {
        base: Option<Base16>,
        disp: u16,
    },
}

/// The register-or-memory operand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rm {
    /// `mod = 3`: register operand. The index is interpreted according to the
    /// operand size.
    Reg(u8),
    Mem(Addressing),
}

/// A decoded Mod-Reg-R/M byte, including SIB byte and displacement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModRm {
    /// Register operand index or group sub-opcode.
    pub reg: u8,
    pub rm: Rm,
}

impl ModRm {
    pub fn is_register(&self) -> bool {
        match self.rm {
            Rm::Reg(_) => true,
            Rm::Mem(_) => false,
        }
    }
}

impl<M: VirtualMemory> Machine<M> {
    /// Reads a Mod-Reg-R/M byte and everything that belongs to it (SIB byte,
    /// displacement) at `eip`.
    ///
    /// Whether 16- or 32-bit addressing is used depends on the address-size
    /// mode of the current instruction.
    pub fn decode_modrm(&mut self) -> Result<ModRm, ExecError> {
        let byte = self.fetch8()?;
        let (md, reg, rm) = (byte >> 6, (byte >> 3) & 7, byte & 7);

        let rm = if md == 3 {
            Rm::Reg(rm)
        } else if self.state.prefixes().address_32() {
            Rm::Mem(self.decode_addressing32(md, rm)?)
        } else {
            Rm::Mem(self.decode_addressing16(md, rm)?)
        };

        Ok(ModRm { reg, rm })
    }

    fn fetch_disp(&mut self, md: u8) -> Result<u32, ExecError> {
        Ok(match md {
            1 => self.fetch_simm8()?,
            2 => self.fetch32()?,
            _ => 0,
        })
    }

    fn decode_addressing32(&mut self, md: u8, rm: u8) -> Result<Addressing, ExecError> {
        Ok(match rm {
            4 => {
                let sib = self.fetch8()?;
                let (scale, index, base) = (sib >> 6, (sib >> 3) & 7, sib & 7);
                let index = if index == 4 { None } else { Some(index) };
                let (base, disp) = if base == 5 && md == 0 {
                    (None, self.fetch32()?)
                } else {
                    (Some(base), self.fetch_disp(md)?)
                };
                Addressing::Sib { scale, index, base, disp }
            }
            5 if md == 0 => Addressing::Disp {
                base: None,
                disp: self.fetch32()?,
            },
            _ => Addressing::Disp {
                base: Some(rm),
                disp: self.fetch_disp(md)?,
            },
        })
    }

    fn decode_addressing16(&mut self, md: u8, rm: u8) -> Result<Addressing, ExecError> {
        if md == 0 && rm == 6 {
            return Ok(Addressing::Mem16 {
                base: None,
                disp: self.fetch16()?,
            });
        }

        let disp = match md {
            1 => self.fetch8()? as i8 as u16,
            2 => self.fetch16()?,
            _ => 0,
        };
        Ok(Addressing::Mem16 {
            base: Some(Base16::from_rm(rm)),
            disp,
        })
    }

    /// Computes the linear address of a memory location using the current
    /// register values.
    pub fn address_of(&self, addressing: &Addressing) -> u32 {
        let state = &self.state;
        match *addressing {
            Addressing::Disp { base, disp } => {
                base.map_or(0, |r| state.reg32(r)).wrapping_add(disp)
            }
            Addressing::Sib { scale, index, base, disp } => {
                let base = base.map_or(0, |r| state.reg32(r));
                let index = index.map_or(0, |r| state.reg32(r) << scale);
                base.wrapping_add(index).wrapping_add(disp)
            }
            Addressing::Mem16 { base, disp } => {
                let base = base.map_or(0, |b| {
                    let (first, second) = b.registers();
                    state.reg16(first).wrapping_add(second.map_or(0, |r| state.reg16(r)))
                });
                u32::from(base.wrapping_add(disp))
            }
        }
    }

    /// Computes the effective address of the R/M operand.
    ///
    /// Fails with `ExecError::RegisterOperand` when the operand is a register.
    pub fn effective_address(&self, modrm: &ModRm) -> Result<u32, ExecError> {
        match modrm.rm {
            Rm::Reg(_) => Err(ExecError::RegisterOperand),
            Rm::Mem(ref addressing) => Ok(self.address_of(addressing)),
        }
    }

    /// Reads the R/M operand at operand size `size`, zero-extended.
    pub fn get_rm(&self, size: OpSize, modrm: &ModRm) -> Result<u32, ExecError> {
        match modrm.rm {
            Rm::Reg(index) => Ok(self.state.reg(size, index)),
            Rm::Mem(ref addressing) => self.read_mem(size, self.address_of(addressing)),
        }
    }

    /// Writes the low `size` bits of `value` to the R/M operand.
    pub fn set_rm(&mut self, size: OpSize, modrm: &ModRm, value: u32) -> Result<(), ExecError> {
        match modrm.rm {
            Rm::Reg(index) => {
                self.state.set_reg(size, index, value);
                Ok(())
            }
            Rm::Mem(ref addressing) => {
                let addr = self.address_of(addressing);
                self.write_mem(size, addr, value)
            }
        }
    }

    /// Reads the register named by the `reg` field.
    pub fn get_r(&self, size: OpSize, modrm: &ModRm) -> u32 {
        self.state.reg(size, modrm.reg)
    }

    pub fn set_r(&mut self, size: OpSize, modrm: &ModRm, value: u32) {
        self.state.set_reg(size, modrm.reg, value);
    }

    pub fn get_rm8(&self, modrm: &ModRm) -> Result<u8, ExecError> {
        Ok(self.get_rm(OpSize::Bits8, modrm)? as u8)
    }

    pub fn get_rm16(&self, modrm: &ModRm) -> Result<u16, ExecError> {
        Ok(self.get_rm(OpSize::Bits16, modrm)? as u16)
    }

    pub fn get_rm32(&self, modrm: &ModRm) -> Result<u32, ExecError> {
        self.get_rm(OpSize::Bits32, modrm)
    }

    pub fn set_rm8(&mut self, modrm: &ModRm, value: u8) -> Result<(), ExecError> {
        self.set_rm(OpSize::Bits8, modrm, value.into())
    }

    pub fn set_rm16(&mut self, modrm: &ModRm, value: u16) -> Result<(), ExecError> {
        self.set_rm(OpSize::Bits16, modrm, value.into())
    }

    pub fn set_rm32(&mut self, modrm: &ModRm, value: u32) -> Result<(), ExecError> {
        self.set_rm(OpSize::Bits32, modrm, value)
    }
}
