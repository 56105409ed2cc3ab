//! Port I/O and software interrupt backends.
//!
//! The interpreter does not know about any devices. `in`/`out` and `int`
//! instructions are forwarded to an `IoBus` supplied by the embedder.

use crate::cpu::State;

use std::io::{Read, Write};

/// I/O port number of the first serial port's data register.
pub const COM1_DATA: u16 = 0x3F8;

/// BIOS video services interrupt vector.
pub const INT_VIDEO: u8 = 0x10;

/// Outcome of a software interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// The bus serviced the interrupt.
    Handled,
    /// No service is installed for this vector.
    ///
    /// Execution still continues after the `int` instruction.
    Unhandled,
}

/// Backend for port I/O instructions and software interrupts.
pub trait IoBus {
    /// Reads a byte from I/O port `port`.
    fn port_in8(&mut self, port: u16) -> u8;

    /// Writes a byte to I/O port `port`.
    fn port_out8(&mut self, port: u16, value: u8);

    /// Services software interrupt `vector`.
    ///
    /// The handler has full access to the register state to read arguments
    /// and store results.
    fn interrupt(&mut self, vector: u8, state: &mut State) -> Interrupt;
}

/// An I/O bus with nothing attached.
///
/// Port reads return 0, writes are dropped and no interrupt is handled.
#[derive(Debug, Default)]
pub struct NullBus;

impl IoBus for NullBus {
    fn port_in8(&mut self, _port: u16) -> u8 {
        0
    }

    fn port_out8(&mut self, _port: u16, _value: u8) {}

    fn interrupt(&mut self, _vector: u8, _state: &mut State) -> Interrupt {
        Interrupt::Unhandled
    }
}

/// A console attached to COM1 and to the BIOS teletype service.
///
/// * `in al, dx` from port `0x3F8` reads the next input byte (0 at end of
///   input).
/// * `out dx, al` to port `0x3F8` writes `al` to the output.
/// * `int 0x10` with `ah = 0x0E` writes `al` to the output. Other video
///   services are accepted and ignored.
#[derive(Debug)]
pub struct SerialConsole<R, W> {
    input: R,
    output: W,
}

impl<R: Read, W: Write> SerialConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }

    fn put(&mut self, byte: u8) {
        if let Err(e) = self.output.write_all(&[byte]).and_then(|_| self.output.flush()) {
            warn!("console write failed: {}", e);
        }
    }
}

impl<R: Read, W: Write> IoBus for SerialConsole<R, W> {
    fn port_in8(&mut self, port: u16) -> u8 {
        if port != COM1_DATA {
            debug!("read from unconnected port {:#06X}", port);
            return 0;
        }

        let mut buf = [0];
        match self.input.read(&mut buf) {
            Ok(1) => buf[0],
            Ok(_) => 0,
            Err(e) => {
                warn!("console read failed: {}", e);
                0
            }
        }
    }

    fn port_out8(&mut self, port: u16, value: u8) {
        if port == COM1_DATA {
            self.put(value);
        } else {
            debug!("write of {:#04X} to unconnected port {:#06X}", value, port);
        }
    }

    fn interrupt(&mut self, vector: u8, state: &mut State) -> Interrupt {
        match (vector, state.ah()) {
            (INT_VIDEO, 0x0E) => {
                let c = state.al();
                self.put(c);
                Interrupt::Handled
            }
            (INT_VIDEO, function) => {
                debug!("ignoring video service {:#04X}", function);
                Interrupt::Handled
            }
            _ => Interrupt::Unhandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_port() {
        let mut console = SerialConsole::new(&b"hi"[..], Vec::new());
        assert_eq!(console.port_in8(COM1_DATA), b'h');
        assert_eq!(console.port_in8(0x60), 0);
        assert_eq!(console.port_in8(COM1_DATA), b'i');
        assert_eq!(console.port_in8(COM1_DATA), 0);

        console.port_out8(COM1_DATA, b'o');
        console.port_out8(0x80, b'x');
        console.port_out8(COM1_DATA, b'k');
        assert_eq!(console.into_inner().1, b"ok");
    }

    #[test]
    fn teletype() {
        let mut console = SerialConsole::new(&b""[..], Vec::new());
        let mut state = State::new(0, 0);
        state.set_eax(0x0E41);
        assert_eq!(console.interrupt(INT_VIDEO, &mut state), Interrupt::Handled);
        // set cursor position, accepted without output
        state.set_ah(0x02);
        assert_eq!(console.interrupt(INT_VIDEO, &mut state), Interrupt::Handled);
        state.set_ah(0x0E);
        assert_eq!(console.interrupt(0x21, &mut state), Interrupt::Unhandled);
        assert_eq!(console.into_inner().1, b"A");
    }

    #[test]
    fn null_bus() {
        let mut bus = NullBus;
        bus.port_out8(COM1_DATA, 1);
        assert_eq!(bus.port_in8(COM1_DATA), 0);
        assert_eq!(bus.interrupt(INT_VIDEO, &mut State::new(0, 0)), Interrupt::Unhandled);
    }
}
