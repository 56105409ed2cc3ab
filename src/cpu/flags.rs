//! x86 status and control flags (`EFLAGS`).
//!
//! Only the flags read or written by instructions are modelled. Each flag
//! lives at its architectural bit index, so a `Flags` value doubles as the
//! defined part of an `EFLAGS` image.

bitflags! {
    /// A bitmask carrying any combination of x86 flags.
    ///
    /// Used to store the current flag state of the CPU as well as to name the
    /// set of flags an operation updates.
    pub struct Flags: u32 {
        /// Carry flag.
        const CF = 1 << 0;
        /// Parity flag.
        ///
        /// Set when the lowest byte of a result has an even number of 1-bits.
        const PF = 1 << 2;
        /// Adjust flag (or Auxiliary Carry Flag).
        ///
        /// Set to whether a carry out of (or borrow into) bit 3 of an operation
        /// has been generated.
        const AF = 1 << 4;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag.
        const TF = 1 << 8;
        /// Interrupt enable flag.
        const IF = 1 << 9;
        /// Direction flag. When set, string instructions step downwards.
        const DF = 1 << 10;
        /// Overflow.
        const OF = 1 << 11;

        /// The status flags written by arithmetic instructions.
        const ARITH = Self::CF.bits | Self::PF.bits | Self::AF.bits | Self::ZF.bits | Self::SF.bits | Self::OF.bits;
    }
}

impl Flags {
    /// Converts the flags into their `EFLAGS` register representation.
    pub fn to_eflags(self) -> u32 {
        self.bits()
    }

    /// Builds flags from an `EFLAGS` value, ignoring undefined bits.
    pub fn from_eflags(eflags: u32) -> Self {
        Flags::from_bits_truncate(eflags)
    }
}

/// Odd-parity lookup: bit `n` of the table is set when `n` has an odd number of
/// 1-bits.
static ODD_PARITY: [u32; 8] = [
    0x9669_6996, 0x6996_9669, 0x6996_9669, 0x9669_6996,
    0x6996_9669, 0x9669_6996, 0x9669_6996, 0x6996_9669,
];

/// Returns the PF value for a result whose lowest byte is `byte`.
pub fn parity(byte: u8) -> bool {
    ODD_PARITY[usize::from(byte >> 5)] >> (byte & 0x1F) & 1 == 0
}
