//! Data movement and stack instructions.

use crate::cpu::instr::OpSize;
use crate::cpu::interpret::ExecError;
use crate::cpu::machine::Machine;
use crate::cpu::modrm::ModRm;
use crate::cpu::state::reg;
use crate::memory::VirtualMemory;

impl<M: VirtualMemory> Machine<M> {
    /// `mov r/m, r` and `mov r, r/m` (`0x88`-`0x8B`).
    pub(crate) fn mov_rm_r(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let modrm = self.decode_modrm()?;
        if opcode & 2 == 0 {
            let value = self.get_r(size, &modrm);
            self.set_rm(size, &modrm, value)
        } else {
            let value = self.get_rm(size, &modrm)?;
            self.set_r(size, &modrm, value);
            Ok(())
        }
    }

    /// `mov al/eAX, moffs` and `mov moffs, al/eAX` (`0xA0`-`0xA3`).
    ///
    /// The offset is 16 or 32 bits wide, following the address size.
    pub(crate) fn mov_acc_moffs(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let addr = if self.state.prefixes().address_32() {
            self.fetch32()?
        } else {
            u32::from(self.fetch16()?)
        };

        if opcode & 2 == 0 {
            let value = self.read_mem(size, addr)?;
            self.set_acc(size, value);
            Ok(())
        } else {
            let value = self.acc(size);
            self.write_mem(size, addr, value)
        }
    }

    /// `mov r8, imm8` (`0xB0`-`0xB7`) and `mov r, imm` (`0xB8`-`0xBF`).
    pub(crate) fn mov_reg_imm(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 8 != 0);
        let imm = self.fetch_imm(size)?;
        self.state.set_reg(size, opcode & 7, imm);
        Ok(())
    }

    /// `mov r/m, imm` (`0xC6 /0`, `0xC7 /0`).
    pub(crate) fn mov_rm_imm(&mut self, opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let imm = self.fetch_imm(size)?;
        self.set_rm(size, modrm, imm)
    }

    /// `movzx` (`0x0F 0xB6`, `0x0F 0xB7`) and `movsx` (`0x0F 0xBE`,
    /// `0x0F 0xBF`).
    pub(crate) fn mov_extend(&mut self, opcode: u8) -> Result<(), ExecError> {
        let dest_size = self.operand_size(true);
        let src_size = if opcode & 1 == 0 { OpSize::Bits8 } else { OpSize::Bits16 };
        let modrm = self.decode_modrm()?;
        let value = self.get_rm(src_size, &modrm)?;
        let value = if opcode & 8 == 0 {
            value
        } else {
            src_size.sign_extend(value)
        };
        self.set_r(dest_size, &modrm, value);
        Ok(())
    }

    /// `lea r, m` (`0x8D`).
    pub(crate) fn lea(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let modrm = self.decode_modrm()?;
        let addr = self.effective_address(&modrm)?;
        self.set_r(size, &modrm, addr);
        Ok(())
    }

    /// `xchg r/m, r` (`0x86`, `0x87`).
    pub(crate) fn xchg_rm_r(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        let modrm = self.decode_modrm()?;
        let (rm, r) = (self.get_rm(size, &modrm)?, self.get_r(size, &modrm));
        self.set_rm(size, &modrm, r)?;
        self.set_r(size, &modrm, rm);
        Ok(())
    }

    /// `xchg eAX, r` (`0x91`-`0x97`).
    pub(crate) fn xchg_acc(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let index = opcode & 7;
        let (acc, other) = (self.acc(size), self.state.reg(size, index));
        self.set_acc(size, other);
        self.state.set_reg(size, index, acc);
        Ok(())
    }

    /// `nop` (`0x90`).
    pub(crate) fn nop(&mut self, _opcode: u8) -> Result<(), ExecError> {
        Ok(())
    }

    /// `cbw`/`cwde` (`0x98`): sign-extends `al` into `ax` or `ax` into `eax`.
    pub(crate) fn cbw(&mut self, _opcode: u8) -> Result<(), ExecError> {
        if self.state.prefixes().operand_32() {
            let ax = self.state.ax();
            self.state.set_eax(ax as i16 as u32);
        } else {
            let al = self.state.al();
            self.state.set_ax(al as i8 as u16);
        }
        Ok(())
    }

    /// `cwd`/`cdq` (`0x99`): fills `dx` or `edx` with the sign of `ax` or
    /// `eax`.
    pub(crate) fn cwd(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let sign = self.acc(size) & size.msb() != 0;
        self.state.set_reg(size, reg::EDX, if sign { !0 } else { 0 });
        Ok(())
    }

    /// `push r` (`0x50`-`0x57`).
    ///
    /// `push esp` pushes the value `esp` had before the instruction.
    pub(crate) fn push_reg(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let value = self.state.reg(size, opcode & 7);
        self.push(size, value)
    }

    /// `pop r` (`0x58`-`0x5F`).
    pub(crate) fn pop_reg(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let value = self.pop(size)?;
        self.state.set_reg(size, opcode & 7, value);
        Ok(())
    }

    /// `push imm` (`0x68`) and `push imm8` (`0x6A`).
    ///
    /// The 8-bit immediate is sign-extended to the operand size.
    pub(crate) fn push_imm(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let imm = match opcode {
            0x6A => self.fetch_simm8()?,
            _ => self.fetch_imm(size)?,
        };
        self.push(size, imm)
    }

    /// `push r/m` (`0xFF /6`).
    pub(crate) fn push_rm(&mut self, _opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let value = self.get_rm(size, modrm)?;
        self.push(size, value)
    }

    /// `pop r/m` (`0x8F /0`).
    ///
    /// The destination address is computed with the incremented `esp`. If the
    /// store fails, `esp` is restored.
    pub(crate) fn pop_rm(&mut self, _opcode: u8, modrm: &ModRm) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let esp = self.state.esp();
        let value = self.pop(size)?;
        if let Err(e) = self.set_rm(size, modrm, value) {
            self.state.set_esp(esp);
            return Err(e);
        }
        Ok(())
    }

    /// `leave` (`0xC9`): `mov esp, ebp` followed by `pop ebp`.
    pub(crate) fn leave(&mut self, _opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(true);
        let esp = self.state.esp();
        self.state.set_esp(self.state.ebp());
        match self.pop(size) {
            Ok(value) => {
                self.state.set_reg(size, reg::EBP, value);
                Ok(())
            }
            Err(e) => {
                self.state.set_esp(esp);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::interpret::testing::{interpreter, STACK};
    use crate::cpu::interpret::ExecError;

    #[test]
    fn mov_forms() {
        // mov [ecx],eax ; mov bl,[ecx+1] ; mov edx,ecx
        let mut int = interpreter("89 01 8A 59 01 8B D1");
        int.state_mut().set_ecx(0x2000);
        int.state_mut().set_eax(0x1122_3344);
        int.state_mut().set_ebx(0xFFFF_FFFF);
        for _ in 0..3 {
            int.step().unwrap();
        }
        assert_eq!(int.mem().as_slice()[0x2000..0x2004], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(int.state().ebx(), 0xFFFF_FF33);
        assert_eq!(int.state().edx(), 0x2000);
    }

    #[test]
    fn mov_immediates() {
        // mov ch,0x12 ; mov esi,0xdeadbeef ; 66 mov di,0x1234 ; mov dword [0x2000],7 ; mov byte [0x2004],0xff
        let mut int = interpreter(
            "B5 12 BE EF BE AD DE 66 BF 34 12 C7 05 00 20 00 00 07 00 00 00 C6 05 04 20 00 00 FF"
        );
        int.state_mut().set_edi(0xAAAA_AAAA);
        for _ in 0..5 {
            int.step().unwrap();
        }
        assert_eq!(int.state().ecx(), 0x1200);
        assert_eq!(int.state().esi(), 0xDEAD_BEEF);
        assert_eq!(int.state().edi(), 0xAAAA_1234);
        assert_eq!(int.mem().as_slice()[0x2000..0x2005], [7, 0, 0, 0, 0xFF]);
        assert_eq!(int.state().eip(), 0x1000 + 28);
    }

    #[test]
    fn moffs() {
        // mov eax,[0x2000] ; mov [0x2010],al
        let mut int = interpreter("A1 00 20 00 00 A2 10 20 00 00");
        int.mem_mut().load_image(0x2000, &[1, 2, 3, 4]).unwrap();
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x0403_0201);
        int.step().unwrap();
        assert_eq!(int.mem().as_slice()[0x2010], 1);
    }

    #[test]
    fn extend() {
        // movzx eax,bl ; movsx ecx,bx ; movsx edx,bl
        let mut int = interpreter("0F B6 C3 0F BF CB 0F BE D3");
        int.state_mut().set_ebx(0x1234_8080);
        for _ in 0..3 {
            int.step().unwrap();
        }
        assert_eq!(int.state().eax(), 0x80);
        assert_eq!(int.state().ecx(), 0xFFFF_8080);
        assert_eq!(int.state().edx(), 0xFFFF_FF80);
    }

    #[test]
    fn lea() {
        let mut int = interpreter("8D 44 08 FE 8D C1");  // lea eax,[eax+ecx-2] ; lea eax,ecx
        int.state_mut().set_eax(0x100);
        int.state_mut().set_ecx(0x10);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x10E);
        assert!(int.state().flags().is_empty());
        assert_eq!(int.step().unwrap_err().kind, ExecError::RegisterOperand);
    }

    #[test]
    fn exchange() {
        let mut int = interpreter("87 CA 93 90");  // xchg edx,ecx ; xchg ebx,eax ; nop
        int.state_mut().set_eax(1);
        int.state_mut().set_ebx(2);
        int.state_mut().set_ecx(3);
        int.state_mut().set_edx(4);
        for _ in 0..3 {
            int.step().unwrap();
        }
        assert_eq!(
            (int.state().eax(), int.state().ebx(), int.state().ecx(), int.state().edx()),
            (2, 1, 4, 3)
        );
    }

    #[test]
    fn sign_extension() {
        let mut int = interpreter("98 99 66 98 66 99");  // cwde ; cdq ; cbw ; cwd
        int.state_mut().set_eax(0x0000_8000);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xFFFF_8000);
        int.step().unwrap();
        assert_eq!(int.state().edx(), 0xFFFF_FFFF);
        int.state_mut().set_eax(0x1234_0070);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x1234_0070);
        int.step().unwrap();
        assert_eq!(int.state().edx(), 0xFFFF_0000);
    }

    #[test]
    fn push_pop() {
        let mut int = interpreter("6A 05 58");  // push 5 ; pop eax
        int.step().unwrap();
        assert_eq!(int.state().esp(), STACK - 4);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 5);
        assert_eq!(int.state().esp(), STACK);
    }

    #[test]
    fn push_imm_sign_extends() {
        // push -1 ; push 0x12345678 ; 66 push 0x80
        let mut int = interpreter("6A FF 68 78 56 34 12 66 6A 80");
        for _ in 0..3 {
            int.step().unwrap();
        }
        let mem = int.mem();
        assert_eq!(int.state().esp(), STACK - 10);
        assert_eq!(mem.as_slice()[(STACK - 4) as usize..STACK as usize], [0xFF; 4]);
        assert_eq!(mem.as_slice()[(STACK - 8) as usize..(STACK - 4) as usize], [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.as_slice()[(STACK - 10) as usize..(STACK - 8) as usize], [0x80, 0xFF]);
    }

    #[test]
    fn push_esp_pushes_old_value() {
        let mut int = interpreter("54 5C");  // push esp ; pop esp
        int.step().unwrap();
        assert_eq!(int.state().esp(), STACK - 4);
        int.step().unwrap();
        assert_eq!(int.state().esp(), STACK);
    }

    #[test]
    fn push_pop_memory() {
        // push dword [0x2000] ; pop dword [0x2004]
        let mut int = interpreter("FF 35 00 20 00 00 8F 05 04 20 00 00");
        int.mem_mut().load_image(0x2000, &[9, 8, 7, 6]).unwrap();
        int.step().unwrap();
        int.step().unwrap();
        assert_eq!(int.mem().as_slice()[0x2004..0x2008], [9, 8, 7, 6]);
        assert_eq!(int.state().esp(), STACK);
    }

    #[test]
    fn leave() {
        let mut int = interpreter("C9");
        int.state_mut().set_ebp(0x3000);
        int.mem_mut().load_image(0x3000, &[0x44, 0x33, 0x22, 0x11]).unwrap();
        int.step().unwrap();
        assert_eq!(int.state().ebp(), 0x1122_3344);
        assert_eq!(int.state().esp(), 0x3004);
    }
}
