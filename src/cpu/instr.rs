//! Operand sizes and the operation fields encoded in opcode bytes.

use std::fmt;

/// Size of an operand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpSize {
    Bits8,
    Bits16,
    Bits32,
}

impl OpSize {
    pub fn bits(self) -> u32 {
        match self {
            OpSize::Bits8 => 8,
            OpSize::Bits16 => 16,
            OpSize::Bits32 => 32,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// Mask selecting the bits of a value of this size.
    pub fn mask(self) -> u32 {
        match self {
            OpSize::Bits8 => 0xFF,
            OpSize::Bits16 => 0xFFFF,
            OpSize::Bits32 => 0xFFFF_FFFF,
        }
    }

    /// The sign bit of a value of this size.
    pub fn msb(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Sign-extends the low `self` bits of `value` to 32 bits.
    pub fn sign_extend(self, value: u32) -> u32 {
        match self {
            OpSize::Bits8 => value as u8 as i8 as u32,
            OpSize::Bits16 => value as u16 as i16 as u32,
            OpSize::Bits32 => value,
        }
    }
}

impl fmt::Display for OpSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            OpSize::Bits8 => "byte",
            OpSize::Bits16 => "word",
            OpSize::Bits32 => "dword",
        })
    }
}

/// Binary arithmetic/logic operation.
///
/// The discriminant is the operation's number as encoded in bits 3..=5 of the
/// `0x00..=0x3F` opcodes and in the `Reg` field of the `0x80` group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum AluOp {
    Add = 0,
    Or = 1,
    /// Add with carry.
    Adc = 2,
    /// Subtract with borrow.
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    /// Set flags like `sub` would, but do not change the destination.
    Cmp = 7,
}

/// Shift instruction group opcode.
///
/// Stored in the `Reg` field of the Mod-Reg-R/M byte. Field value 6 is an
/// undocumented alias of `Shl` and is left unmapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    /// Rotate through carry left.
    Rcl = 2,
    /// Rotate through carry right.
    Rcr = 3,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// A condition for conditional jumps and `setcc`.
///
/// The discriminant is set according to the x86 instruction encoding. Condition
/// codes are encoded in the low 4 bits of the opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ConditionCode {
    /// OF=1
    Overflow = 0x0,
    /// OF=0
    NotOverflow = 0x1,
    /// CF=1
    ///
    /// Aka "below".
    Carry = 0x2,
    /// CF=0
    ///
    /// Aka "above or equal".
    NotCarry = 0x3,
    /// ZF=1
    Equal = 0x4,
    /// ZF=0
    ///
    /// Aka "not zero".
    NotEqual = 0x5,
    /// CF=1 or ZF=1
    BelowOrEqual = 0x6,
    /// CF=0 and ZF=0
    Above = 0x7,
    /// SF=1
    Sign = 0x8,
    /// SF=0
    NotSign = 0x9,
    /// PF=1
    ///
    /// Aka "parity even".
    Parity = 0xA,
    /// PF=0
    NotParity = 0xB,
    /// SF!=OF
    Less = 0xC,
    /// SF=OF
    GreaterOrEqual = 0xD,
    /// ZF=1 or SF!=OF
    LessOrEqual = 0xE,
    /// ZF=0 and SF=OF
    Greater = 0xF,
}
