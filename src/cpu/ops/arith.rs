//! Integer arithmetic and logic.

use crate::cpu::alu;
use crate::cpu::instr::{AluOp, OpSize};
use crate::cpu::interpret::{ExecError, Opcode};
use crate::cpu::machine::Machine;
use crate::cpu::modrm::ModRm;
use crate::cpu::state::reg;
use crate::cpu::Flags;
use crate::memory::VirtualMemory;

use num_traits::FromPrimitive;

/// Signed value of the low `size` bits of `value`.
fn signed(size: OpSize, value: u32) -> i64 {
    i64::from(size.sign_extend(value) as i32)
}

fn alu_op(field: u8, opcode: Opcode) -> Result<AluOp, ExecError> {
    AluOp::from_u8(field & 7).ok_or(ExecError::UnimplementedOpcode(opcode))
}

impl<M: VirtualMemory> Machine<M> {
    /// Replaces all arithmetic status flags.
    pub(crate) fn set_arith_flags(&mut self, flags: Flags) {
        self.state.replace_flags(Flags::ARITH, flags);
    }

    /// Performs `op` on `a` and `b` and updates the flags.
    ///
    /// Returns the value to write back, or `None` for `cmp`.
    fn alu(&mut self, op: AluOp, size: OpSize, a: u32, b: u32) -> Option<u32> {
        let cf = self.state.flag(Flags::CF);
        let (res, flags) = alu::binary(op, size, a, b, cf);
        self.set_arith_flags(flags);
        match op {
            AluOp::Cmp => None,
            _ => Some(res),
        }
    }

    /// `op r/m, r` and `op r, r/m` (`0x00`-`0x3B`).
    ///
    /// Bit 1 of the opcode selects the direction, bit 0 the size.
    pub(crate) fn alu_rm_r(&mut self, opcode: u8) -> Result<(), ExecError> {
        let op = alu_op(opcode >> 3, Opcode::Primary(opcode))?;
        let size = self.operand_size(opcode & 1 != 0);
        let modrm = self.decode_modrm()?;
        let (rm, r) = (self.get_rm(size, &modrm)?, self.get_r(size, &modrm));

        if opcode & 2 == 0 {
            if let Some(res) = self.alu(op, size, rm, r) {
                self.set_rm(size, &modrm, res)?;
            }
        } else if let Some(res) = self.alu(op, size, r, rm) {
            self.set_r(size, &modrm, res);
        }
        Ok(())
    }

    /// `op al, imm8` and `op eAX, imm` (`0x04`-`0x3D`).
    pub(crate) fn alu_acc_imm(&mut self, opcode: u8) -> Result<(), ExecError> {
        let op = alu_op(opcode >> 3, Opcode::Primary(opcode))?;
        let size = self.operand_size(opcode & 1 != 0);
        let imm = self.fetch_imm(size)?;
        let acc = self.acc(size);
        if let Some(res) = self.alu(op, size, acc, imm) {
            self.set_acc(size, res);
        }
        Ok(())
    }

    /// Group 1 (`0x80`, `0x81`, `0x83`): `op r/m, imm`.
    ///
    /// `0x83` takes an 8-bit immediate sign-extended to the operand size.
    pub(crate) fn alu_rm_imm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let op = alu_op(modrm.reg, Opcode::Group { opcode, reg: modrm.reg })?;
        let size = self.operand_size(opcode & 1 != 0);
        let imm = match opcode {
            0x83 => self.fetch_simm8()?,
            _ => self.fetch_imm(size)?,
        };
        let rm = self.get_rm(size, modrm)?;
        if let Some(res) = self.alu(op, size, rm, imm) {
            self.set_rm(size, modrm, res)?;
        }
        Ok(())
    }

    /// `test r/m, r` (`0x84`, `0x85`).
    pub(crate) fn test_rm_r(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let modrm = self.decode_modrm()?;
        let (rm, r) = (self.get_rm(size, &modrm)?, self.get_r(size, &modrm));
        self.alu(AluOp::And, size, rm, r);
        Ok(())
    }

    /// `test al, imm8` and `test eAX, imm` (`0xA8`, `0xA9`).
    pub(crate) fn test_acc_imm(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let imm = self.fetch_imm(size)?;
        let acc = self.acc(size);
        self.alu(AluOp::And, size, acc, imm);
        Ok(())
    }

    /// `test r/m, imm` (`0xF6 /0`, `0xF7 /0`).
    pub(crate) fn test_rm_imm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let imm = self.fetch_imm(size)?;
        let rm = self.get_rm(size, modrm)?;
        self.alu(AluOp::And, size, rm, imm);
        Ok(())
    }

    /// Increments or decrements `value`. CF is not affected.
    fn inc_dec(&mut self, size: OpSize, value: u32, dec: bool) -> u32 {
        let (res, flags) = if dec {
            alu::sub(size, value, 1, false)
        } else {
            alu::add(size, value, 1, false)
        };
        self.state.replace_flags(Flags::ARITH - Flags::CF, flags);
        res
    }

    /// `inc r` and `dec r` (`0x40`-`0x4F`).
    pub(crate) fn inc_dec_reg(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let index = opcode & 7;
        let value = self.state.reg(size, index);
        let res = self.inc_dec(size, value, opcode & 8 != 0);
        self.state.set_reg(size, index, res);
        Ok(())
    }

    /// `inc r/m` (`0xFE /0`, `0xFF /0`).
    pub(crate) fn inc_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let value = self.get_rm(size, modrm)?;
        let res = self.inc_dec(size, value, false);
        self.set_rm(size, modrm, res)
    }

    /// `dec r/m` (`0xFE /1`, `0xFF /1`).
    pub(crate) fn dec_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let value = self.get_rm(size, modrm)?;
        let res = self.inc_dec(size, value, true);
        self.set_rm(size, modrm, res)
    }

    /// `not r/m` (`0xF6 /2`, `0xF7 /2`). No flags are affected.
    pub(crate) fn not_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let value = self.get_rm(size, modrm)?;
        self.set_rm(size, modrm, !value)
    }

    /// `neg r/m` (`0xF6 /3`, `0xF7 /3`).
    pub(crate) fn neg_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let value = self.get_rm(size, modrm)?;
        let (res, flags) = alu::neg(size, value);
        self.set_rm(size, modrm, res)?;
        self.set_arith_flags(flags);
        Ok(())
    }

    /// Stores a double-width result into `ax`, `dx:ax` or `edx:eax`.
    fn store_wide(&mut self, size: OpSize, low: u32, high: u32) {
        match size {
            OpSize::Bits8 => {
                self.state.set_al(low as u8);
                self.state.set_ah(high as u8);
            }
            _ => {
                self.state.set_reg(size, reg::EAX, low);
                self.state.set_reg(size, reg::EDX, high);
            }
        }
    }

    /// Reads the double-width dividend from `ax`, `dx:ax` or `edx:eax`.
    fn load_wide(&self, size: OpSize) -> u64 {
        match size {
            OpSize::Bits8 => u64::from(self.state.ax()),
            OpSize::Bits16 => u64::from(self.state.dx()) << 16 | u64::from(self.state.ax()),
            OpSize::Bits32 => u64::from(self.state.edx()) << 32 | u64::from(self.state.eax()),
        }
    }

    /// `mul r/m` (`0xF6 /4`, `0xF7 /4`): unsigned multiply with the
    /// accumulator.
    ///
    /// CF and OF are set when the upper half of the result is nonzero.
    pub(crate) fn mul_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let src = self.get_rm(size, modrm)?;
        let product = u64::from(self.acc(size)) * u64::from(src);
        let low = product as u32 & size.mask();
        let high = (product >> size.bits()) as u32;
        self.store_wide(size, low, high);
        self.state.update_flags(Flags::CF | Flags::OF, high != 0);
        Ok(())
    }

    /// `imul r/m` (`0xF6 /5`, `0xF7 /5`): signed multiply with the accumulator.
    ///
    /// CF and OF are set when the result doesn't fit into the lower half.
    pub(crate) fn imul_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let src = self.get_rm(size, modrm)?;
        let product = signed(size, self.acc(size)) * signed(size, src);
        let low = product as u32 & size.mask();
        let high = (product >> size.bits()) as u32 & size.mask();
        self.store_wide(size, low, high);
        self.state.update_flags(Flags::CF | Flags::OF, signed(size, low) != product);
        Ok(())
    }

    /// Truncating signed multiply `r = a * b`. Sets CF and OF when the
    /// product was truncated.
    fn imul_truncating(&mut self, size: OpSize, modrm: &ModRm, a: u32, b: u32) {
        let product = signed(size, a) * signed(size, b);
        let res = product as u32 & size.mask();
        self.set_r(size, modrm, res);
        self.state.update_flags(Flags::CF | Flags::OF, signed(size, res) != product);
    }

    /// `imul r, r/m, imm` (`0x69`) and `imul r, r/m, imm8` (`0x6B`).
    pub(crate) fn imul_r_rm_imm(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let modrm = self.decode_modrm()?;
        let imm = match opcode {
            0x6B => self.fetch_simm8()?,
            _ => self.fetch_imm(size)?,
        };
        let src = self.get_rm(size, &modrm)?;
        self.imul_truncating(size, &modrm, src, imm);
        Ok(())
    }

    /// `imul r, r/m` (`0x0F 0xAF`).
    pub(crate) fn imul_r_rm(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let modrm = self.decode_modrm()?;
        let src = self.get_rm(size, &modrm)?;
        let dest = self.get_r(size, &modrm);
        self.imul_truncating(size, &modrm, dest, src);
        Ok(())
    }

    /// `div r/m` (`0xF6 /6`, `0xF7 /6`): unsigned divide of `ax`, `dx:ax` or
    /// `edx:eax`.
    ///
    /// The quotient goes to the accumulator, the remainder to `ah`, `dx` or
    /// `edx`. Registers are left untouched when the division faults.
    pub(crate) fn div_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let divisor = u64::from(self.get_rm(size, modrm)?);
        if divisor == 0 {
            return Err(ExecError::DivideByZero);
        }

        let dividend = self.load_wide(size);
        let (quot, rem) = (dividend / divisor, dividend % divisor);
        trace!("div: {} / {} = {} rem {}", dividend, divisor, quot, rem);
        if quot > u64::from(size.mask()) {
            return Err(ExecError::DivisionOverflow);
        }

        self.store_wide(size, quot as u32, rem as u32);
        Ok(())
    }

    /// `idiv r/m` (`0xF6 /7`, `0xF7 /7`): signed divide.
    ///
    /// The quotient is truncated towards zero, the remainder has the sign of
    /// the dividend.
    pub(crate) fn idiv_rm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let divisor = signed(size, self.get_rm(size, modrm)?);
        if divisor == 0 {
            return Err(ExecError::DivideByZero);
        }

        let wide = self.load_wide(size);
        let dividend = match size {
            OpSize::Bits8 => i64::from(wide as u16 as i16),
            OpSize::Bits16 => i64::from(wide as u32 as i32),
            OpSize::Bits32 => wide as i64,
        };
        let (quot, rem) = match (dividend.checked_div(divisor), dividend.checked_rem(divisor)) {
            (Some(quot), Some(rem)) => (quot, rem),
            _ => return Err(ExecError::DivisionOverflow),
        };
        trace!("idiv: {} / {} = {} rem {}", dividend, divisor, quot, rem);

        // the quotient has to survive a round trip through the destination size
        if signed(size, quot as u32) != quot {
            return Err(ExecError::DivisionOverflow);
        }

        self.store_wide(size, quot as u32, rem as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::interpret::testing::interpreter;
    use crate::cpu::interpret::ExecError;
    use crate::cpu::Flags;

    #[test]
    fn add_sets_carry_and_zero() {
        let mut int = interpreter("01 D8");  // add eax,ebx
        int.state_mut().set_eax(0xFFFF_FFFF);
        int.state_mut().set_ebx(1);
        int.step().unwrap();
        let state = int.state();
        assert_eq!(state.eax(), 0);
        assert_eq!(state.flags(), Flags::CF | Flags::ZF | Flags::PF | Flags::AF);
    }

    #[test]
    fn direction_bit() {
        let mut int = interpreter("29 D8 2B D8");  // sub eax,ebx; sub ebx,eax
        int.state_mut().set_eax(10);
        int.state_mut().set_ebx(3);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 7);
        int.step().unwrap();
        assert_eq!(int.state().ebx(), 0xFFFF_FFFC);
        assert!(int.state().flag(Flags::CF));
        assert!(int.state().flag(Flags::SF));
    }

    #[test]
    fn byte_and_word_forms() {
        // add ah,al ; 66 add ax,0x8000
        let mut int = interpreter("00 C4 66 05 00 80");
        int.state_mut().set_eax(0x1234_8081);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x1234_0181);
        assert!(int.state().flag(Flags::CF));
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x1234_8181);
        assert!(!int.state().flag(Flags::OF));
        assert!(int.state().flag(Flags::SF));
        assert_eq!(int.state().eip(), 0x1006);
    }

    #[test]
    fn adc_sbb() {
        // stc ; adc eax,0 ; sbb eax,1
        let mut int = interpreter("F9 83 D0 00 83 D8 01");
        int.state_mut().set_eax(5);
        int.step().unwrap();
        int.step().unwrap();
        assert_eq!(int.state().eax(), 6);
        assert!(!int.state().flag(Flags::CF));
        int.step().unwrap();
        assert_eq!(int.state().eax(), 5);
    }

    #[test]
    fn cmp_does_not_write_back() {
        // cmp dword [ecx],0xfffe0000 ; cmp al,5
        let mut int = interpreter("81 39 00 00 FE FF 3C 05");
        int.state_mut().set_ecx(0x2000);
        int.mem_mut().load_image(0x2000, &[0, 0, 0xFE, 0xFF]).unwrap();
        int.step().unwrap();
        assert!(int.state().flag(Flags::ZF));
        assert_eq!(int.mem().as_slice()[0x2002], 0xFE);
        int.step().unwrap();
        assert!(int.state().flag(Flags::CF));
        assert_eq!(int.state().eax(), 0);
    }

    #[test]
    fn group1_sign_extended_imm8() {
        let mut int = interpreter("83 E0 F0 80 C3 FF");  // and eax,-16 ; add bl,0xff
        int.state_mut().set_eax(0x1234_5678);
        int.state_mut().set_ebx(0x101);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x1234_5670);
        assert!(!int.state().flag(Flags::CF));
        int.step().unwrap();
        assert_eq!(int.state().ebx(), 0x100);
        assert!(int.state().flag(Flags::CF));
        assert!(int.state().flag(Flags::ZF));
    }

    #[test]
    fn logic_clears_carry_overflow() {
        let mut int = interpreter("F9 31 C0 85 C9");  // stc ; xor eax,eax ; test ecx,ecx
        int.state_mut().set_eax(0xDEAD);
        int.state_mut().set_ecx(0x8000_0000);
        int.step().unwrap();
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0);
        assert_eq!(int.state().flags(), Flags::ZF | Flags::PF);
        int.step().unwrap();
        assert_eq!(int.state().flags(), Flags::SF | Flags::PF);
        assert_eq!(int.state().ecx(), 0x8000_0000);
    }

    #[test]
    fn inc_dec_round_trip() {
        for &value in &[0u32, 1, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF, 0x1234_5678] {
            let mut int = interpreter("F9 40 48");  // stc ; inc eax ; dec eax
            int.state_mut().set_eax(value);
            int.step().unwrap();
            int.step().unwrap();
            assert_eq!(int.state().flag(Flags::OF), value == 0x7FFF_FFFF);
            assert!(int.state().flag(Flags::CF), "inc must not touch CF");
            int.step().unwrap();
            assert_eq!(int.state().eax(), value);
            assert!(int.state().flag(Flags::CF), "dec must not touch CF");
        }

        let mut int = interpreter("66 41 66 49");  // inc cx ; dec cx
        int.state_mut().set_ecx(0xAAAA_7FFF);
        int.step().unwrap();
        assert_eq!(int.state().ecx(), 0xAAAA_8000);
        assert!(int.state().flag(Flags::OF));
        int.step().unwrap();
        assert_eq!(int.state().ecx(), 0xAAAA_7FFF);
        assert!(int.state().flag(Flags::OF));
    }

    #[test]
    fn inc_dec_memory() {
        let mut int = interpreter("FE 05 00 20 00 00 FF 0D 04 20 00 00");
        int.step().unwrap();
        int.step().unwrap();
        assert_eq!(int.mem().as_slice()[0x2000], 1);
        assert_eq!(int.mem().as_slice()[0x2004..0x2008], [0xFF; 4]);
        assert!(int.state().flag(Flags::SF));
    }

    #[test]
    fn not_neg() {
        let mut int = interpreter("F7 D0 F7 D8 F6 DB");  // not eax ; neg eax ; neg bl
        int.state_mut().set_eax(0x0F0F_0F0F);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xF0F0_F0F0);
        assert_eq!(int.state().flags(), Flags::empty());
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x0F0F_0F10);
        assert!(int.state().flag(Flags::CF));
        int.step().unwrap();
        assert!(!int.state().flag(Flags::CF));
        assert!(int.state().flag(Flags::ZF));
    }

    #[test]
    fn multiply() {
        // mul ecx ; imul ecx
        let mut int = interpreter("F7 E1 F7 E9");
        int.state_mut().set_eax(0x8000_0000);
        int.state_mut().set_ecx(4);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0);
        assert_eq!(int.state().edx(), 2);
        assert!(int.state().flag(Flags::CF | Flags::OF));

        int.state_mut().set_eax(0xFFFF_FFFF); // -1
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xFFFF_FFFC);
        assert_eq!(int.state().edx(), 0xFFFF_FFFF);
        assert!(!int.state().flag(Flags::CF));
        assert!(!int.state().flag(Flags::OF));
    }

    #[test]
    fn multiply_bytes() {
        let mut int = interpreter("F6 E3 F6 EB");  // mul bl ; imul bl
        int.state_mut().set_eax(0xAAAA_0010);
        int.state_mut().set_ebx(0x20);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xAAAA_0200);
        assert!(int.state().flag(Flags::CF));
        int.state_mut().set_eax(0x7F);
        int.state_mut().set_ebx(0xFF);
        int.step().unwrap();
        assert_eq!(int.state().ax(), 0xFF81);
        assert!(!int.state().flag(Flags::OF));
    }

    #[test]
    fn truncating_imul() {
        // imul eax,ecx,-3 ; imul ecx,ecx,0x40000000 ; imul edx,ecx
        let mut int = interpreter("6B C1 FD 69 C9 00 00 00 40 0F AF D1");
        int.state_mut().set_ecx(5);
        int.state_mut().set_edx(3);
        int.step().unwrap();
        assert_eq!(int.state().eax(), -15i32 as u32);
        assert!(!int.state().flag(Flags::OF));
        int.step().unwrap();
        assert_eq!(int.state().ecx(), 0x4000_0000);
        assert!(int.state().flag(Flags::OF | Flags::CF));
        int.step().unwrap();
        assert_eq!(int.state().edx(), 0xC000_0000);
        assert!(int.state().flag(Flags::OF));
    }

    #[test]
    fn divide() {
        let mut int = interpreter("F7 F1 F7 F9");  // div ecx ; idiv ecx
        int.state_mut().set_edx(1);
        int.state_mut().set_eax(5);
        int.state_mut().set_ecx(2);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x8000_0002);
        assert_eq!(int.state().edx(), 1);

        int.state_mut().set_edx(0xFFFF_FFFF);
        int.state_mut().set_eax(-7i32 as u32);
        int.step().unwrap();
        assert_eq!(int.state().eax(), -3i32 as u32);
        assert_eq!(int.state().edx(), -1i32 as u32);
    }

    #[test]
    fn divide_errors() {
        let mut int = interpreter("F6 F3");  // div bl
        int.state_mut().set_eax(0x1234);
        let err = int.step().unwrap_err();
        assert_eq!(err.kind, ExecError::DivideByZero);
        assert_eq!(err.eip, 0x1000);
        assert_eq!(int.state().eip(), 0x1000);
        assert_eq!(int.state().eax(), 0x1234);

        int.state_mut().set_ebx(2);
        assert_eq!(int.step().unwrap_err().kind, ExecError::DivisionOverflow);
        assert_eq!(int.state().eax(), 0x1234);

        int.state_mut().set_ebx(0x20);
        int.step().unwrap();
        assert_eq!(int.state().al(), 0x91);
        assert_eq!(int.state().ah(), 0x14);
    }

    #[test]
    fn idiv_overflow() {
        let mut int = interpreter("F7 F9");  // idiv ecx
        int.state_mut().set_edx(0x8000_0000);
        int.state_mut().set_eax(0);
        int.state_mut().set_ecx(0xFFFF_FFFF);
        assert_eq!(int.step().unwrap_err().kind, ExecError::DivisionOverflow);

        int.state_mut().set_edx(0xFFFF_FFFF);
        int.state_mut().set_eax(0x8000_0000);
        assert_eq!(int.step().unwrap_err().kind, ExecError::DivisionOverflow);
        assert_eq!(int.state().edx(), 0xFFFF_FFFF);
    }
}
