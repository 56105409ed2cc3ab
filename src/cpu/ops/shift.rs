//! Shift and rotate group (`0xC0`, `0xC1`, `0xD0`-`0xD3`).

use crate::cpu::alu;
use crate::cpu::instr::{OpSize, ShiftOp};
use crate::cpu::interpret::{ExecError, Opcode};
use crate::cpu::machine::Machine;
use crate::cpu::modrm::ModRm;
use crate::cpu::Flags;
use crate::memory::VirtualMemory;

use num_traits::FromPrimitive;

/// Outcome of a shift or rotate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shifted {
    pub value: u32,
    /// New values of the flags in `mask`.
    pub flags: Flags,
    /// The flags written by the operation. Others stay unchanged.
    pub mask: Flags,
}

/// Performs a shift or rotate of the low `size` bits of `value` by `count`.
///
/// `count` is the raw count operand; it is masked to 5 bits here. `cf` is the
/// current carry flag (rotated in by `rcl` and `rcr`).
///
/// Returns `None` when nothing changes at all, which is the case for a zero
/// count.
pub fn shift(op: ShiftOp, size: OpSize, value: u32, count: u8, cf: bool) -> Option<Shifted> {
    if count == 0 {
        return None;
    }

    let bits = size.bits();
    let mask = size.mask();
    let msb = |v: u32| v & size.msb() != 0;
    let value = value & mask;
    let n = u32::from(count & 0x1F);

    let mut out = Shifted {
        value,
        flags: Flags::empty(),
        mask: Flags::CF,
    };

    match op {
        ShiftOp::Rol | ShiftOp::Ror => {
            // a count that is a multiple of the width only updates CF
            let n = n % bits;
            out.value = match (op, n) {
                (_, 0) => value,
                (ShiftOp::Rol, _) => (value << n | value >> (bits - n)) & mask,
                _ => (value >> n | value << (bits - n)) & mask,
            };
            let carry = if op == ShiftOp::Rol {
                out.value & 1 != 0
            } else {
                msb(out.value)
            };
            out.flags.set(Flags::CF, carry);
            if count & 0x1F == 1 {
                let of = if op == ShiftOp::Rol {
                    msb(out.value) ^ carry
                } else {
                    msb(out.value) ^ (out.value >> (bits - 2) & 1 != 0)
                };
                out.flags.set(Flags::OF, of);
                out.mask |= Flags::OF;
            }
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            if n == 0 {
                return None;
            }
            // rotate the `bits + 1` wide value CF:value
            let n = n % (bits + 1);
            let wide_mask = (1u64 << (bits + 1)) - 1;
            let wide = u64::from(cf) << bits | u64::from(value);
            let rotated = if n == 0 {
                wide
            } else if op == ShiftOp::Rcl {
                (wide << n | wide >> (bits + 1 - n)) & wide_mask
            } else {
                (wide >> n | wide << (bits + 1 - n)) & wide_mask
            };
            out.value = rotated as u32 & mask;
            let carry = rotated >> bits & 1 != 0;
            out.flags.set(Flags::CF, carry);
            if count & 0x1F == 1 {
                let of = if op == ShiftOp::Rcl {
                    msb(out.value) ^ carry
                } else {
                    msb(value) ^ cf
                };
                out.flags.set(Flags::OF, of);
                out.mask |= Flags::OF;
            }
        }
        ShiftOp::Shl | ShiftOp::Shr | ShiftOp::Sar => {
            if n == 0 {
                return None;
            }
            let (res, carry) = match op {
                ShiftOp::Shl => {
                    let wide = u64::from(value) << n;
                    (wide as u32 & mask, wide >> bits & 1 != 0)
                }
                ShiftOp::Shr => {
                    let wide = u64::from(value);
                    ((wide >> n) as u32, wide >> (n - 1) & 1 != 0)
                }
                _ => {
                    // counts at or past the width saturate to the sign
                    let wide = i64::from(size.sign_extend(value) as i32);
                    ((wide >> n) as u32 & mask, wide >> (n - 1) & 1 != 0)
                }
            };
            out.value = res;
            out.flags = alu::szp(size, res);
            out.flags.set(Flags::CF, carry);
            out.mask = Flags::CF | Flags::SF | Flags::ZF | Flags::PF;
            if n == 1 {
                let of = match op {
                    ShiftOp::Shl => msb(res) ^ carry,
                    ShiftOp::Shr => msb(value),
                    _ => false,
                };
                out.flags.set(Flags::OF, of);
                out.mask |= Flags::OF;
            }
        }
    }

    Some(out)
}

impl<M: VirtualMemory> Machine<M> {
    /// Shift group handler.
    ///
    /// The count is an 8-bit immediate for `0xC0`/`0xC1`, 1 for `0xD0`/`0xD1`
    /// and `cl` for `0xD2`/`0xD3`. The immediate follows the Mod-Reg-R/M
    /// operand.
    pub(crate) fn shift_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let op = ShiftOp::from_u8(modrm.reg)
            .ok_or(ExecError::UnimplementedOpcode(Opcode::Group { opcode, reg: modrm.reg }))?;
        let size = self.operand_size(opcode & 1 != 0);
        let count = match opcode {
            0xC0 | 0xC1 => self.fetch8()?,
            0xD0 | 0xD1 => 1,
            _ => self.state.cl(),
        };

        let value = self.get_rm(size, modrm)?;
        if let Some(out) = shift(op, size, value, count, self.state.flag(Flags::CF)) {
            self.set_rm(size, modrm, out.value)?;
            self.state.replace_flags(out.mask, out.flags);
        }
        Ok(())
    }
}
