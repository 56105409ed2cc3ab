//! The fetch-dispatch-execute loop.

use crate::cpu::dispatch::DispatchTable;
use crate::cpu::machine::Machine;
use crate::cpu::prefix::MAX_INSTRUCTION_LENGTH;
use crate::cpu::{ExecutionEngine, State};
use crate::io::IoBus;
use crate::memory::{MemoryError, VirtualMemory};

use std::error::Error;
use std::fmt;

/// An x86 interpreter operating on flat memory.
#[derive(Debug)]
pub struct Interpreter<M: VirtualMemory> {
    machine: Machine<M>,
    table: DispatchTable<M>,
}

impl<M: VirtualMemory> Interpreter<M> {
    /// Creates a new interpreter.
    ///
    /// # Parameters
    ///
    /// * `mem`: The memory to operate on, with the program already loaded.
    /// * `state`: Initial register state. `eip` points to the first
    ///   instruction that will be executed.
    /// * `io`: Receives port I/O and software interrupts.
    pub fn new(mem: M, state: State, io: Box<dyn IoBus>) -> Self {
        Self {
            machine: Machine::new(mem, state, io),
            table: DispatchTable::new(),
        }
    }

    pub fn state(&self) -> &State {
        &self.machine.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.machine.state
    }

    pub fn mem(&self) -> &M {
        &self.machine.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.machine.mem
    }

    pub fn machine(&self) -> &Machine<M> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine<M> {
        &mut self.machine
    }

    /// Fetches, decodes and executes the next instruction, returning the
    /// updated `eip`.
    ///
    /// If the instruction fails, `eip` and the prefix state are reset to what
    /// they were before, and the error reports the address of the faulting
    /// instruction.
    pub fn step(&mut self) -> Result<Step, InterpreterError> {
        let eip = self.machine.state.eip();
        let prefixes = self.machine.state.prefixes();
        self.machine.state.set_halted(false);
        self.machine.unknown_interrupt = None;

        match self.execute_next() {
            Ok(()) => {
                self.machine.state.prefixes_mut().end_instruction();
                Ok(Step {
                    start: eip,
                    eip: self.machine.state.eip(),
                    unknown_interrupt: self.machine.unknown_interrupt,
                })
            }
            Err(kind) => {
                let state = &mut self.machine.state;
                state.set_eip(eip);
                *state.prefixes_mut() = prefixes;
                state.prefixes_mut().end_instruction();
                Err(InterpreterError { eip, kind })
            }
        }
    }

    fn execute_next(&mut self) -> Result<(), ExecError> {
        let mut length = 0;
        let opcode = loop {
            let byte = self.machine.fetch8()?;
            length += 1;
            if !self.machine.state.prefixes_mut().apply(byte) {
                break byte;
            }
            // at most 14 prefixes leave room for the opcode
            if length >= MAX_INSTRUCTION_LENGTH {
                return Err(ExecError::InstructionTooLong);
            }
        };

        trace!(
            "{:#010X}: opcode {:#04X} ({:?})",
            self.machine.state.eip().wrapping_sub(1),
            opcode,
            self.machine.state.prefixes()
        );
        self.table.execute(&mut self.machine, opcode)
    }

    /// Executes instructions until `stop` returns `true`, the CPU halts or an
    /// instruction fails.
    ///
    /// `stop` is consulted before every instruction. Returns the number of
    /// instructions executed.
    pub fn run_until<F>(&mut self, mut stop: F) -> Result<u64, InterpreterError>
    where
        F: FnMut(&Machine<M>) -> bool,
    {
        let mut count = 0;
        while !stop(&self.machine) {
            self.step()?;
            count += 1;
            if self.machine.state.is_halted() {
                debug!("halted at {:#010X} after {} instructions", self.machine.state.eip(), count);
                break;
            }
        }
        Ok(count)
    }

    /// Executes instructions until the CPU halts or an instruction fails.
    pub fn run(&mut self) -> Result<u64, InterpreterError> {
        self.run_until(|_| false)
    }
}

impl<M: VirtualMemory> ExecutionEngine for Interpreter<M> {
    type Memory = M;
    type Error = InterpreterError;

    fn state(&mut self) -> &mut State {
        self.state_mut()
    }

    fn memory(&mut self) -> &mut M {
        self.mem_mut()
    }

    fn step(&mut self) -> Result<Step, InterpreterError> {
        Interpreter::step(self)
    }

    fn run(&mut self) -> Result<u64, InterpreterError> {
        Interpreter::run(self)
    }
}

/// Outcome of a successfully executed instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Step {
    /// Address of the executed instruction (including its prefixes).
    pub start: u32,
    /// Updated `eip`: the next instruction to execute, or the target of a
    /// taken branch.
    pub eip: u32,
    /// Set when the instruction was an `int` that the I/O bus did not
    /// service. Execution continues behind it regardless.
    pub unknown_interrupt: Option<u8>,
}

/// The opcode bytes of an unimplemented instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// A one-byte opcode.
    Primary(u8),
    /// The byte following `0x0F`.
    Extended(u8),
    /// A one-byte opcode whose operation is selected by the Mod-Reg-R/M
    /// `reg` field.
    Group { opcode: u8, reg: u8 },
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::Primary(byte) => write!(f, "{:#04X}", byte),
            Opcode::Extended(byte) => write!(f, "0x0F {:#04X}", byte),
            Opcode::Group { opcode, reg } => write!(f, "{:#04X} /{}", opcode, reg),
        }
    }
}

/// Reasons an instruction can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Memory access error while fetching or executing the instruction.
    Memory(MemoryError),
    /// The opcode is invalid or not supported.
    UnimplementedOpcode(Opcode),
    /// `div` or `idiv` by zero.
    DivideByZero,
    /// The quotient of a `div` or `idiv` does not fit the destination.
    DivisionOverflow,
    /// A memory-only instruction was given a register operand.
    RegisterOperand,
    /// More than 15 bytes of prefixes and opcode.
    InstructionTooLong,
}

impl From<MemoryError> for ExecError {
    #[cold]
    fn from(e: MemoryError) -> Self {
        ExecError::Memory(e)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::Memory(err) => err.fmt(f),
            ExecError::UnimplementedOpcode(op) => write!(f, "unimplemented opcode {}", op),
            ExecError::DivideByZero => f.write_str("division by zero"),
            ExecError::DivisionOverflow => f.write_str("division result too large"),
            ExecError::RegisterOperand => f.write_str("register operand not allowed"),
            ExecError::InstructionTooLong => f.write_str("instruction exceeds 15 bytes"),
        }
    }
}

impl Error for ExecError {}

/// A failed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterError {
    /// Start address of the failing instruction. `eip` has been reset to it.
    pub eip: u32,
    pub kind: ExecError,
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (at eip={:#010X})", self.kind, self.eip)
    }
}

impl Error for InterpreterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.kind)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{interpreter, CODE, STACK};
    use super::*;
    use crate::cpu::prefix::Prefixes;
    use crate::cpu::Flags;
    use crate::memory::FlatMemory;

    #[test]
    fn mov_add() {
        // mov eax,1 ; add eax,2
        let mut int = interpreter("B8 01 00 00 00 05 02 00 00 00");
        let first = int.step().unwrap();
        assert_eq!(first.start, CODE);
        assert_eq!(first.eip, CODE + 5);
        assert_eq!(int.state().eip(), CODE + 5);
        let second = int.step().unwrap();
        assert_eq!(second.start, CODE + 5);
        assert_eq!(second.eip, CODE + 10);
        assert_eq!(int.state().eax(), 3);
        assert_eq!(int.state().eip(), CODE + 10);
        let flags = int.state().flags();
        assert!(!flags.intersects(Flags::CF | Flags::OF | Flags::SF | Flags::ZF | Flags::AF));
        // 3 has an even number of set bits
        assert!(flags.contains(Flags::PF));
    }

    #[test]
    fn push_pop_imm() {
        let mut int = interpreter("6A 05 58");
        int.step().unwrap();
        assert_eq!(int.state().esp(), STACK - 4);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 5);
        assert_eq!(int.state().esp(), STACK);
    }

    #[test]
    fn out_of_bounds_leaves_state() {
        // mov [0x10000],eax ; mov eax,[0xFFFE]
        let mut int = interpreter("A3 00 00 01 00 A1 FE FF 00 00");
        int.state_mut().set_eax(0xDEAD_BEEF);
        let before = int.state().clone();
        let err = int.step().unwrap_err();
        assert_eq!(err.eip, CODE);
        assert_eq!(
            err.kind,
            ExecError::Memory(MemoryError::OutOfBounds { addr: 0x1_0000, capacity: 0x1_0000 })
        );
        assert_eq!(*int.state(), before);

        int.state_mut().set_eip(CODE + 5);
        let before = int.state().clone();
        let err = int.step().unwrap_err();
        assert_eq!(
            err.kind,
            ExecError::Memory(MemoryError::OutOfBounds { addr: 0x1_0000, capacity: 0x1_0000 })
        );
        assert_eq!(*int.state(), before);
    }

    #[test]
    fn fetch_past_end() {
        let mut mem = FlatMemory::new(0x1000);
        mem.load_image(0xFFF, &[0xB8]).unwrap();
        let mut int = Interpreter::new(mem, State::new(0xFFF, 0x800), Box::new(crate::io::NullBus));
        let err = int.step().unwrap_err();
        assert_eq!(err.eip, 0xFFF);
        assert_eq!(err.kind, ExecError::Memory(MemoryError::OutOfBounds { addr: 0x1000, capacity: 0x1000 }));
        assert_eq!(int.state().eip(), 0xFFF);
    }

    #[test]
    fn prefixes_reset_after_instruction() {
        // 66 mov ax,0x1234 ; mov eax,0x11223344
        let mut int = interpreter("66 B8 34 12 B8 44 33 22 11");
        int.state_mut().set_eax(0xFFFF_FFFF);
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0xFFFF_1234);
        assert_eq!(int.state().eip(), CODE + 4);
        assert_eq!(int.state().prefixes(), Prefixes::reset());
        int.step().unwrap();
        assert_eq!(int.state().eax(), 0x1122_3344);
    }

    #[test]
    fn prefixes_reset_after_error() {
        let mut int = interpreter("66 F3 2E 0F 0B");
        let err = int.step().unwrap_err();
        assert_eq!(err.kind, ExecError::UnimplementedOpcode(Opcode::Extended(0x0B)));
        assert_eq!(int.state().prefixes(), Prefixes::reset());
        assert_eq!(int.state().eip(), CODE);
    }

    #[test]
    fn too_many_prefixes() {
        let mut code = vec!["66"; 14];
        code.push("90");
        let mut int = interpreter(&code.join(" "));
        int.step().unwrap();
        assert_eq!(int.state().eip(), CODE + 15);

        let mut code = vec!["3E"; 15];
        code.push("90");
        let mut int = interpreter(&code.join(" "));
        let err = int.step().unwrap_err();
        assert_eq!(err.kind, ExecError::InstructionTooLong);
        assert_eq!(int.state().eip(), CODE);
    }

    #[test]
    fn run_until_halt() {
        // mov ecx,5 ; inc eax ; dec ecx ; jnz -4 ; hlt ; nop
        let mut int = interpreter("B9 05 00 00 00 40 49 75 FC F4 90");
        let count = int.run().unwrap();
        assert_eq!(count, 1 + 5 * 3 + 1);
        assert_eq!(int.state().eax(), 5);
        assert_eq!(int.state().ecx(), 0);
        assert!(int.state().is_halted());
        assert_eq!(int.state().eip(), CODE + 10);

        // stepping resumes behind the `hlt`
        int.step().unwrap();
        assert!(!int.state().is_halted());
        assert_eq!(int.state().eip(), CODE + 11);
    }

    #[test]
    fn run_until_predicate() {
        let mut int = interpreter("40 40 40 40 F4");
        let count = int.run_until(|m| m.state().eip() == CODE + 2).unwrap();
        assert_eq!(count, 2);
        assert_eq!(int.state().eax(), 2);

        let count = int.run_until(|_| true).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn step_returns_branch_target() {
        // jmp +2 ; nop ; nop ; inc eax
        let mut int = interpreter("EB 02 90 90 40");
        let step = int.step().unwrap();
        assert_eq!(step.start, CODE);
        assert_eq!(step.eip, CODE + 4);
        let step = int.step().unwrap();
        assert_eq!(step.eip, CODE + 5);
        assert_eq!(int.state().eax(), 1);
    }

    #[test]
    fn run_stops_on_error() {
        let mut int = interpreter("40 40 FF FF");
        let err = int.run().unwrap_err();
        assert_eq!(err.eip, CODE + 2);
        assert_eq!(err.kind, ExecError::UnimplementedOpcode(Opcode::Group { opcode: 0xFF, reg: 7 }));
        assert_eq!(int.state().eax(), 2);
        assert_eq!(
            err.to_string(),
            "unimplemented opcode 0xFF /7 (at eip=0x00001002)"
        );
    }

    #[test]
    fn engine_trait() {
        fn run_engine<E: ExecutionEngine>(engine: &mut E) -> Result<u64, E::Error> {
            engine.state().set_ebx(7);
            engine.run()
        }

        let mut int = interpreter("89 D8 F4");
        assert_eq!(run_engine(&mut int).unwrap(), 2);
        assert_eq!(int.state().eax(), 7);
    }
}
