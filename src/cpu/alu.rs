//! Status flag computation for arithmetic and logic operations.
//!
//! Carry, overflow and adjust flags are derived from a carry (or borrow)
//! chain: a word whose bit `i` is the carry out of bit position `i`. Bit
//! `w-1` is the carry out of the operation, bit 3 the carry out of the low
//! nibble, and overflow happened when the carries into and out of the sign
//! bit differ.
//!
//! All functions here are pure. Operands are passed zero-extended to `u32`
//! and results are returned masked to the operand size.

use crate::cpu::flags::{self, Flags};
use crate::cpu::instr::{AluOp, OpSize};

/// Computes SF, ZF and PF for `res` at operand size `size`.
pub fn szp(size: OpSize, res: u32) -> Flags {
    let res = res & size.mask();
    let mut flags = Flags::empty();
    flags.set(Flags::SF, res & size.msb() != 0);
    flags.set(Flags::ZF, res == 0);
    flags.set(Flags::PF, flags::parity(res as u8));
    flags
}

/// Turns a carry or borrow chain into CF, OF and AF.
fn chain_flags(size: OpSize, chain: u32) -> Flags {
    let top = size.bits() - 1;
    let mut flags = Flags::empty();
    flags.set(Flags::CF, chain >> top & 1 != 0);
    flags.set(Flags::OF, (chain >> top ^ chain >> (top - 1)) & 1 != 0);
    flags.set(Flags::AF, chain & 0x8 != 0);
    flags
}

/// `a + b + carry`, returning the result and all arithmetic flags.
pub fn add(size: OpSize, a: u32, b: u32, carry: bool) -> (u32, Flags) {
    let mask = size.mask();
    let (a, b) = (a & mask, b & mask);
    let res = a.wrapping_add(b).wrapping_add(carry as u32) & mask;
    let chain = (a & b) | (!res & (a | b));
    (res, szp(size, res) | chain_flags(size, chain))
}

/// `a - b - borrow`, returning the result and all arithmetic flags.
pub fn sub(size: OpSize, a: u32, b: u32, borrow: bool) -> (u32, Flags) {
    let mask = size.mask();
    let (a, b) = (a & mask, b & mask);
    let res = a.wrapping_sub(b).wrapping_sub(borrow as u32) & mask;
    let chain = (res & (!a | b)) | (!a & b);
    (res, szp(size, res) | chain_flags(size, chain))
}

/// Flags of a bitwise logic operation: CF, OF and AF are cleared.
pub fn logic(size: OpSize, res: u32) -> Flags {
    szp(size, res)
}

/// Two's complement negation `0 - src`.
///
/// CF is set whenever `src` is nonzero.
pub fn neg(size: OpSize, src: u32) -> (u32, Flags) {
    let src = src & size.mask();
    let res = 0u32.wrapping_sub(src) & size.mask();
    let chain = res | src;
    let mut flags = szp(size, res) | chain_flags(size, chain);
    flags.set(Flags::CF, src != 0);
    (res, flags)
}

/// Performs `op` on `a` and `b` with carry-in `cf` (used by `adc` and `sbb`).
///
/// Returns the result (which `cmp` discards) and the new arithmetic flags.
pub fn binary(op: AluOp, size: OpSize, a: u32, b: u32, cf: bool) -> (u32, Flags) {
    match op {
        AluOp::Add => add(size, a, b, false),
        AluOp::Adc => add(size, a, b, cf),
        AluOp::Sub | AluOp::Cmp => sub(size, a, b, false),
        AluOp::Sbb => sub(size, a, b, cf),
        AluOp::And => {
            let res = a & b & size.mask();
            (res, logic(size, res))
        }
        AluOp::Or => {
            let res = (a | b) & size.mask();
            (res, logic(size, res))
        }
        AluOp::Xor => {
            let res = (a ^ b) & size.mask();
            (res, logic(size, res))
        }
    }
}
