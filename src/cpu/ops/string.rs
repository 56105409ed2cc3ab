//! String instructions.

use crate::cpu::instr::OpSize;
use crate::cpu::interpret::ExecError;
use crate::cpu::machine::Machine;
use crate::cpu::prefix::Prefixes;
use crate::cpu::Flags;
use crate::memory::VirtualMemory;

impl<M: VirtualMemory> Machine<M> {
    /// Counter register of a `rep` loop: `ecx`, or `cx` with 16-bit
    /// addressing.
    fn rep_counter(&self) -> u32 {
        if self.state.prefixes().address_32() {
            self.state.ecx()
        } else {
            u32::from(self.state.cx())
        }
    }

    fn set_rep_counter(&mut self, value: u32) {
        if self.state.prefixes().address_32() {
            self.state.set_ecx(value);
        } else {
            self.state.set_cx(value as u16);
        }
    }

    /// `stosb` (`0xAA`) and `stosw`/`stosd` (`0xAB`).
    ///
    /// With a `rep` prefix (`0xF2` behaves identically to `0xF3` here), the
    /// store is repeated until the counter reaches 0. The counter is updated
    /// after each store, so a fault in the middle of the loop leaves it
    /// pointing at the remaining work.
    pub(crate) fn stos(&mut self, opcode: u8) -> Result<(), ExecError> {
        let size = self.operand_size(opcode & 1 != 0);
        if !self.state.prefixes().intersects(Prefixes::REPEAT) {
            return self.store_string(size);
        }

        debug!("rep stos: {} iterations", self.rep_counter());
        loop {
            let count = self.rep_counter();
            if count == 0 {
                break;
            }
            self.store_string(size)?;
            self.set_rep_counter(count - 1);
        }
        self.state.prefixes_mut().remove(Prefixes::REPEAT);
        Ok(())
    }

    /// Stores the accumulator at `[edi]` and steps `edi` according to `DF`.
    fn store_string(&mut self, size: OpSize) -> Result<(), ExecError> {
        let value = self.acc(size);
        let step = if self.state.flag(Flags::DF) {
            size.bytes().wrapping_neg()
        } else {
            size.bytes()
        };

        if self.state.prefixes().address_32() {
            let edi = self.state.edi();
            self.write_mem(size, edi, value)?;
            self.state.set_edi(edi.wrapping_add(step));
        } else {
            let di = self.state.di();
            self.write_mem(size, u32::from(di), value)?;
            self.state.set_di(di.wrapping_add(step as u16));
        }
        Ok(())
    }
}
