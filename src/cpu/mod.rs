//! Emulation of a 32-bit x86 CPU with flat memory.

pub mod alu;
mod dispatch;
mod flags;
pub mod instr;
pub mod interpret;
mod machine;
pub mod modrm;
pub mod ops;
pub mod prefix;
pub mod state;

pub use self::flags::Flags;
pub use self::interpret::{ExecError, Interpreter, InterpreterError, Step};
pub use self::machine::Machine;
pub use self::state::State;

use crate::memory::VirtualMemory;

/// Trait for CPU implementations / executors.
pub trait ExecutionEngine {
    type Memory: VirtualMemory;
    type Error;

    /// Get a reference to the CPU's state.
    fn state(&mut self) -> &mut State;

    /// Get a reference to the memory.
    fn memory(&mut self) -> &mut Self::Memory;

    /// Executes the next instruction, then returns control back to the caller.
    fn step(&mut self) -> Result<Step, Self::Error>;

    /// Executes instructions until the CPU halts.
    ///
    /// This is equivalent to calling `step` in a loop until `hlt` is
    /// executed. Any error returned by `step` is returned to the caller.
    /// Returns the number of executed instructions.
    fn run(&mut self) -> Result<u64, Self::Error>;
}
