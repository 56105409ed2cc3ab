//! x86 processor state.

use crate::cpu::flags::Flags;
use crate::cpu::instr::OpSize;
use crate::cpu::prefix::Prefixes;

/// Register indices as used in the instruction encoding.
pub mod reg {
    pub const EAX: u8 = 0;
    pub const ECX: u8 = 1;
    pub const EDX: u8 = 2;
    pub const EBX: u8 = 3;
    pub const ESP: u8 = 4;
    pub const EBP: u8 = 5;
    pub const ESI: u8 = 6;
    pub const EDI: u8 = 7;
}

/// Names of the 32-bit registers, by encoding index.
pub const REGISTER_NAMES: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// CPU state consisting of the emulated registers, flags and prefix state.
///
/// The 16- and 8-bit registers are views into the 32-bit register file, so
/// writing `al` only changes the low byte of `eax`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    regs: [u32; 8],
    eip: u32,
    flags: Flags,
    prefixes: Prefixes,
    halted: bool,
}

impl State {
    /// Creates a new state with all general purpose registers and flags
    /// cleared.
    ///
    /// # Parameters
    ///
    /// * `eip`: Initial value for `eip` (address of the first instruction).
    /// * `esp`: Initial value for the stack pointer. Should normally point just
    ///   behind the memory reserved for the stack.
    pub fn new(eip: u32, esp: u32) -> Self {
        let mut regs = [0; 8];
        regs[usize::from(reg::ESP)] = esp;
        Self {
            regs,
            eip,
            flags: Flags::empty(),
            prefixes: Prefixes::reset(),
            halted: false,
        }
    }

    /// Reads 32-bit register `index` (0-7).
    pub fn reg32(&self, index: u8) -> u32 {
        self.regs[usize::from(index & 7)]
    }

    pub fn set_reg32(&mut self, index: u8, value: u32) {
        self.regs[usize::from(index & 7)] = value;
    }

    pub fn reg16(&self, index: u8) -> u16 {
        self.reg32(index) as u16
    }

    pub fn set_reg16(&mut self, index: u8, value: u16) {
        let old = self.reg32(index);
        self.set_reg32(index, (old & 0xFFFF_0000) | u32::from(value));
    }

    /// Reads 8-bit register `index`.
    ///
    /// Indices 0-3 name `al`, `cl`, `dl`, `bl`, indices 4-7 name the high
    /// bytes `ah`, `ch`, `dh`, `bh` of the same four registers.
    pub fn reg8(&self, index: u8) -> u8 {
        let index = index & 7;
        if index < 4 {
            self.reg32(index) as u8
        } else {
            (self.reg32(index - 4) >> 8) as u8
        }
    }

    pub fn set_reg8(&mut self, index: u8, value: u8) {
        let index = index & 7;
        if index < 4 {
            let old = self.reg32(index);
            self.set_reg32(index, (old & 0xFFFF_FF00) | u32::from(value));
        } else {
            let old = self.reg32(index - 4);
            self.set_reg32(index - 4, (old & 0xFFFF_00FF) | u32::from(value) << 8);
        }
    }

    /// Reads register `index` at operand size `size`, zero-extended.
    pub fn reg(&self, size: OpSize, index: u8) -> u32 {
        match size {
            OpSize::Bits8 => u32::from(self.reg8(index)),
            OpSize::Bits16 => u32::from(self.reg16(index)),
            OpSize::Bits32 => self.reg32(index),
        }
    }

    /// Writes the low `size` bits of `value` to register `index`.
    pub fn set_reg(&mut self, size: OpSize, index: u8, value: u32) {
        match size {
            OpSize::Bits8 => self.set_reg8(index, value as u8),
            OpSize::Bits16 => self.set_reg16(index, value as u16),
            OpSize::Bits32 => self.set_reg32(index, value),
        }
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    pub fn flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    /// Sets or clears `flags`.
    pub fn update_flags(&mut self, flags: Flags, value: bool) {
        self.flags.set(flags, value);
    }

    /// Replaces the flags selected by `mask` with those in `values`.
    pub fn replace_flags(&mut self, mask: Flags, values: Flags) {
        self.flags = (self.flags - mask) | (values & mask);
    }

    pub fn prefixes(&self) -> Prefixes {
        self.prefixes
    }

    pub fn prefixes_mut(&mut self) -> &mut Prefixes {
        &mut self.prefixes
    }

    /// Returns whether a `hlt` instruction stopped the CPU.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }
}

macro_rules! accessors {
    (
        $index:ident: [ $getter32:ident/$setter32:ident ]
    ) => {
        pub fn $getter32(&self) -> u32 { self.reg32(reg::$index) }
        pub fn $setter32(&mut self, value: u32) { self.set_reg32(reg::$index, value) }
    };
    (
        $index:ident: [ $getter32:ident/$setter32:ident, $getter16:ident/$setter16:ident ]
    ) => {
        accessors!($index: [$getter32/$setter32]);
        pub fn $getter16(&self) -> u16 { self.reg16(reg::$index) }
        pub fn $setter16(&mut self, value: u16) { self.set_reg16(reg::$index, value) }
    };
    (
        $index:ident: [ $getter32:ident/$setter32:ident, $getter16:ident/$setter16:ident, $getter8h:ident/$setter8h:ident, $getter8l:ident/$setter8l:ident ]
    ) => {
        accessors!($index: [$getter32/$setter32, $getter16/$setter16]);
        pub fn $getter8h(&self) -> u8 { self.reg8(reg::$index + 4) }
        pub fn $setter8h(&mut self, value: u8) { self.set_reg8(reg::$index + 4, value) }
        pub fn $getter8l(&self) -> u8 { self.reg8(reg::$index) }
        pub fn $setter8l(&mut self, value: u8) { self.set_reg8(reg::$index, value) }
    };
}

impl State {
    accessors!(EAX: [eax/set_eax, ax/set_ax, ah/set_ah, al/set_al]);
    accessors!(EBX: [ebx/set_ebx, bx/set_bx, bh/set_bh, bl/set_bl]);
    accessors!(ECX: [ecx/set_ecx, cx/set_cx, ch/set_ch, cl/set_cl]);
    accessors!(EDX: [edx/set_edx, dx/set_dx, dh/set_dh, dl/set_dl]);
    accessors!(ESI: [esi/set_esi, si/set_si]);
    accessors!(EDI: [edi/set_edi, di/set_di]);
    accessors!(EBP: [ebp/set_ebp, bp/set_bp]);
    accessors!(ESP: [esp/set_esp, sp/set_sp]);

    pub fn eip(&self) -> u32 { self.eip }
    pub fn set_eip(&mut self, value: u32) { self.eip = value; }
}
