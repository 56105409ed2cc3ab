//! Port I/O (`in`/`out`), forwarded to the machine's `IoBus`.

use crate::cpu::interpret::ExecError;
use crate::cpu::machine::Machine;
use crate::memory::VirtualMemory;

impl<M: VirtualMemory> Machine<M> {
    /// Port operand: `imm8` for `0xE4`/`0xE6`, `dx` for `0xEC`/`0xEE`.
    fn port_operand(&mut self, opcode: u8) -> Result<u16, ExecError> {
        if opcode & 0x08 == 0 {
            Ok(u16::from(self.fetch8()?))
        } else {
            Ok(self.state.dx())
        }
    }

    /// `in al, imm8` (`0xE4`) and `in al, dx` (`0xEC`).
    pub(crate) fn port_in(&mut self, opcode: u8) -> Result<(), ExecError> {
        let port = self.port_operand(opcode)?;
        let value = self.io.port_in8(port);
        self.state.set_al(value);
        Ok(())
    }

    /// `out imm8, al` (`0xE6`) and `out dx, al` (`0xEE`).
    pub(crate) fn port_out(&mut self, opcode: u8) -> Result<(), ExecError> {
        let port = self.port_operand(opcode)?;
        let value = self.state.al();
        self.io.port_out8(port, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::interpret::Interpreter;
    use crate::cpu::State;
    use crate::io::{Interrupt, IoBus, COM1_DATA};
    use crate::memory::FlatMemory;

    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records port writes and answers reads with `port as u8`.
    #[derive(Default)]
    struct Recorder {
        writes: Rc<RefCell<Vec<(u16, u8)>>>,
    }

    impl IoBus for Recorder {
        fn port_in8(&mut self, port: u16) -> u8 {
            port as u8
        }

        fn port_out8(&mut self, port: u16, value: u8) {
            self.writes.borrow_mut().push((port, value));
        }

        fn interrupt(&mut self, _vector: u8, _state: &mut State) -> Interrupt {
            Interrupt::Unhandled
        }
    }

    fn interpreter(code: &[u8]) -> (Interpreter<FlatMemory>, Rc<RefCell<Vec<(u16, u8)>>>) {
        let bus = Recorder::default();
        let writes = bus.writes.clone();
        let mut mem = FlatMemory::new(0x1_0000);
        mem.load_image(0x1000, code).unwrap();
        let int = Interpreter::new(mem, State::new(0x1000, 0x8000), Box::new(bus));
        (int, writes)
    }

    #[test]
    fn port_in() {
        // in al,0x42 ; in al,dx
        let (mut int, _) = interpreter(&[0xE4, 0x42, 0xEC]);
        int.state_mut().set_eax(0xFFFF_FFFF);
        int.state_mut().set_edx(0x03F9);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xFFFF_FF42);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xFFFF_FFF9);
        assert_eq!(int.state().eip(), 0x1003);
    }

    #[test]
    fn port_out() {
        // out 0x80,al ; out dx,al
        let (mut int, writes) = interpreter(&[0xE6, 0x80, 0xEE]);
        int.state_mut().set_eax(0x1234_5678);
        int.state_mut().set_edx(u32::from(COM1_DATA));
        int.step().unwrap();
        int.step().unwrap();
        assert_eq!(*writes.borrow(), vec![(0x80, 0x78), (COM1_DATA, 0x78)]);
    }
}
