//! Instruction semantics.
//!
//! Every instruction is implemented as a handler method on `Machine`. A
//! handler is entered with `eip` pointing behind the opcode byte and consumes
//! the rest of the instruction (Mod-Reg-R/M, displacement, immediate) itself.

mod arith;
mod control;
mod data;
mod port;
mod shift;
mod string;

pub use self::shift::{shift, Shifted};
