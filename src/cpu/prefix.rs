//! Instruction prefix bytes and the per-instruction mode state they control.

bitflags! {
    /// Prefix and default-mode state of the CPU.
    ///
    /// `OPSIZE_32` and `ADDRSIZE_32` are set by default. The `0x66` and `0x67`
    /// prefixes clear them for the following instruction only.
    ///
    /// Segment overrides and `LOCK` are collected but have no effect in the
    /// flat memory model. They, too, only apply to a single instruction.
    /// The repeat prefixes are kept until a string instruction consumes them.
    pub struct Prefixes: u16 {
        /// `0x26`
        const OVERRIDE_ES = 0x0001;
        /// `0x2E`
        const OVERRIDE_CS = 0x0002;
        /// `0x36`
        const OVERRIDE_SS = 0x0004;
        /// `0x3E`
        const OVERRIDE_DS = 0x0008;
        /// `0x64`
        const OVERRIDE_FS = 0x0010;
        /// `0x65`
        const OVERRIDE_GS = 0x0020;
        /// Operands are 32 bits wide (cleared by `0x66`).
        const OPSIZE_32   = 0x0040;
        /// Addresses are 32 bits wide (cleared by `0x67`).
        const ADDRSIZE_32 = 0x0080;
        /// `0xF0`
        const LOCK        = 0x0100;
        /// `0xF2`
        const REPNE       = 0x0200;
        /// `0xF3` - `rep` or `repe` prefix, depending on the instruction.
        const REPE        = 0x0400;

        const SEGMENT = Self::OVERRIDE_ES.bits | Self::OVERRIDE_CS.bits |
            Self::OVERRIDE_SS.bits | Self::OVERRIDE_DS.bits |
            Self::OVERRIDE_FS.bits | Self::OVERRIDE_GS.bits;
        const REPEAT = Self::REPNE.bits | Self::REPE.bits;
    }
}

/// Maximum number of bytes an instruction may span, prefixes included.
pub const MAX_INSTRUCTION_LENGTH: u32 = 15;

impl Prefixes {
    /// The state at reset and after every instruction: 32-bit operands and
    /// addresses, no overrides.
    pub fn reset() -> Self {
        Prefixes::OPSIZE_32 | Prefixes::ADDRSIZE_32
    }

    /// Applies a prefix byte to `self`.
    ///
    /// Returns `false` (and leaves `self` unchanged) if `byte` is not a
    /// prefix.
    pub fn apply(&mut self, byte: u8) -> bool {
        match byte {
            0x26 => self.insert(Prefixes::OVERRIDE_ES),
            0x2E => self.insert(Prefixes::OVERRIDE_CS),
            0x36 => self.insert(Prefixes::OVERRIDE_SS),
            0x3E => self.insert(Prefixes::OVERRIDE_DS),
            0x64 => self.insert(Prefixes::OVERRIDE_FS),
            0x65 => self.insert(Prefixes::OVERRIDE_GS),
            0x66 => self.remove(Prefixes::OPSIZE_32),
            0x67 => self.remove(Prefixes::ADDRSIZE_32),
            0xF0 => self.insert(Prefixes::LOCK),
            0xF2 => self.insert(Prefixes::REPNE),
            0xF3 => self.insert(Prefixes::REPE),
            _ => return false,
        }
        true
    }

    /// Drops the single-instruction prefixes and restores the default modes.
    ///
    /// Repeat prefixes survive this.
    pub fn end_instruction(&mut self) {
        self.remove(Prefixes::SEGMENT | Prefixes::LOCK);
        self.insert(Prefixes::reset());
    }

    /// If `self` contains any of `other`, removes `other` from `self` and
    /// returns `true`.
    pub fn take(&mut self, other: Prefixes) -> bool {
        if self.intersects(other) {
            self.remove(other);
            true
        } else {
            false
        }
    }

    pub fn operand_32(self) -> bool {
        self.contains(Prefixes::OPSIZE_32)
    }

    pub fn address_32(self) -> bool {
        self.contains(Prefixes::ADDRSIZE_32)
    }
}

impl Default for Prefixes {
    fn default() -> Self {
        Prefixes::reset()
    }
}
