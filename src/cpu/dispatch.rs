//! Opcode dispatch.
//!
//! The table maps the first opcode byte to a handler. Opcodes that select
//! their operation through the `reg` field of the Mod-Reg-R/M byte
//! ("groups") map to a second, eight-entry level, and `0x0F` selects a
//! separate table for two-byte opcodes.

use crate::cpu::interpret::{ExecError, Opcode};
use crate::cpu::machine::Machine;
use crate::cpu::modrm::ModRm;
use crate::memory::VirtualMemory;

use std::fmt;

/// Handler for a plain opcode. Receives the opcode byte (the second byte for
/// `0x0F`-prefixed opcodes), with `eip` pointing behind it.
type Handler<M> = fn(&mut Machine<M>, u8) -> Result<(), ExecError>;

/// Handler for a group member. The Mod-Reg-R/M byte has already been
/// decoded.
type GroupHandler<M> = fn(&mut Machine<M>, u8, &ModRm) -> Result<(), ExecError>;

enum Entry<M: VirtualMemory> {
    Empty,
    Op(Handler<M>),
    Group([Option<GroupHandler<M>>; 8]),
    Extended,
}

impl<M: VirtualMemory> Clone for Entry<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: VirtualMemory> Copy for Entry<M> {}

impl<M: VirtualMemory> Entry<M> {
    /// A group without any members.
    fn group() -> Self {
        Entry::Group([None; 8])
    }

    /// Adds `handler` as group member `reg`.
    fn with(self, reg: u8, handler: GroupHandler<M>) -> Self {
        match self {
            Entry::Group(mut handlers) => {
                handlers[usize::from(reg)] = Some(handler);
                Entry::Group(handlers)
            }
            other => other,
        }
    }
}

/// A group mapping every sub-opcode in `regs` to `handler`.
fn uniform<M: VirtualMemory>(regs: &[u8], handler: GroupHandler<M>) -> Entry<M> {
    regs.iter().fold(Entry::group(), |entry, &reg| entry.with(reg, handler))
}

/// Immutable opcode table, built once per interpreter.
pub struct DispatchTable<M: VirtualMemory> {
    primary: Vec<Entry<M>>,
    extended: Vec<Option<Handler<M>>>,
}

impl<M: VirtualMemory> DispatchTable<M> {
    pub fn new() -> Self {
        let primary = (0..=255u8).map(Self::primary_entry).collect();
        let extended = (0..=255u8).map(Self::extended_entry).collect();
        Self { primary, extended }
    }

    fn primary_entry(byte: u8) -> Entry<M> {
        match byte {
            0x0F => Entry::Extended,
            _ if bitpat!(0 0 _ _ _ 0 _ _)(byte) => Entry::Op(Machine::alu_rm_r),
            _ if bitpat!(0 0 _ _ _ 1 0 _)(byte) => Entry::Op(Machine::alu_acc_imm),
            _ if bitpat!(0 1 0 0 _ _ _ _)(byte) => Entry::Op(Machine::inc_dec_reg),
            _ if bitpat!(0 1 0 1 0 _ _ _)(byte) => Entry::Op(Machine::push_reg),
            _ if bitpat!(0 1 0 1 1 _ _ _)(byte) => Entry::Op(Machine::pop_reg),
            0x68 | 0x6A => Entry::Op(Machine::push_imm),
            0x69 | 0x6B => Entry::Op(Machine::imul_r_rm_imm),
            _ if bitpat!(0 1 1 1 _ _ _ _)(byte) => Entry::Op(Machine::jcc_rel8),
            0x80 | 0x81 | 0x83 => uniform(&[0, 1, 2, 3, 4, 5, 6, 7], Machine::alu_rm_imm),
            0x84 | 0x85 => Entry::Op(Machine::test_rm_r),
            0x86 | 0x87 => Entry::Op(Machine::xchg_rm_r),
            _ if bitpat!(1 0 0 0 1 0 _ _)(byte) => Entry::Op(Machine::mov_rm_r),
            0x8D => Entry::Op(Machine::lea),
            0x8F => Entry::group().with(0, Machine::pop_rm),
            0x90 => Entry::Op(Machine::nop),
            0x91..=0x97 => Entry::Op(Machine::xchg_acc),
            0x98 => Entry::Op(Machine::cbw),
            0x99 => Entry::Op(Machine::cwd),
            _ if bitpat!(1 0 1 0 0 0 _ _)(byte) => Entry::Op(Machine::mov_acc_moffs),
            0xA8 | 0xA9 => Entry::Op(Machine::test_acc_imm),
            0xAA | 0xAB => Entry::Op(Machine::stos),
            _ if bitpat!(1 0 1 1 _ _ _ _)(byte) => Entry::Op(Machine::mov_reg_imm),
            0xC0 | 0xC1 | 0xD0..=0xD3 => uniform(&[0, 1, 2, 3, 4, 5, 7], Machine::shift_rm),
            0xC2 | 0xC3 => Entry::Op(Machine::ret),
            0xC6 | 0xC7 => Entry::group().with(0, Machine::mov_rm_imm),
            0xC9 => Entry::Op(Machine::leave),
            0xCC | 0xCD => Entry::Op(Machine::int),
            0xE4 | 0xEC => Entry::Op(Machine::port_in),
            0xE6 | 0xEE => Entry::Op(Machine::port_out),
            0xE8 => Entry::Op(Machine::call_rel),
            0xE9 => Entry::Op(Machine::jmp_rel),
            0xEB => Entry::Op(Machine::jmp_rel8),
            0xF4 => Entry::Op(Machine::hlt),
            0xF5 | 0xF8..=0xFD => Entry::Op(Machine::flag_op),
            0xF6 | 0xF7 => Entry::group()
                .with(0, Machine::test_rm_imm)
                .with(2, Machine::not_rm)
                .with(3, Machine::neg_rm)
                .with(4, Machine::mul_rm)
                .with(5, Machine::imul_rm)
                .with(6, Machine::div_rm)
                .with(7, Machine::idiv_rm),
            0xFE => Entry::group()
                .with(0, Machine::inc_rm)
                .with(1, Machine::dec_rm),
            0xFF => Entry::group()
                .with(0, Machine::inc_rm)
                .with(1, Machine::dec_rm)
                .with(2, Machine::call_rm)
                .with(4, Machine::jmp_rm)
                .with(6, Machine::push_rm),
            _ => Entry::Empty,
        }
    }

    fn extended_entry(byte: u8) -> Option<Handler<M>> {
        let handler: Handler<M> = match byte {
            0x80..=0x8F => Machine::jcc_rel,
            0x90..=0x9F => Machine::setcc,
            0xAF => Machine::imul_r_rm,
            0xB6 | 0xB7 | 0xBE | 0xBF => Machine::mov_extend,
            _ => return None,
        };
        Some(handler)
    }

    /// Executes the instruction with primary opcode byte `opcode`.
    ///
    /// Prefixes and the opcode byte itself must already be consumed.
    pub fn execute(&self, m: &mut Machine<M>, opcode: u8) -> Result<(), ExecError> {
        match self.primary[usize::from(opcode)] {
            Entry::Op(handler) => handler(m, opcode),
            Entry::Group(handlers) => {
                let modrm = m.decode_modrm()?;
                match handlers[usize::from(modrm.reg)] {
                    Some(handler) => handler(m, opcode, &modrm),
                    None => Err(ExecError::UnimplementedOpcode(Opcode::Group {
                        opcode,
                        reg: modrm.reg,
                    })),
                }
            }
            Entry::Extended => {
                let second = m.fetch8()?;
                match self.extended[usize::from(second)] {
                    Some(handler) => handler(m, second),
                    None => Err(ExecError::UnimplementedOpcode(Opcode::Extended(second))),
                }
            }
            Entry::Empty => Err(ExecError::UnimplementedOpcode(Opcode::Primary(opcode))),
        }
    }

    /// Number of mapped one-byte opcodes, two-byte opcodes and group members.
    pub fn coverage(&self) -> (usize, usize, usize) {
        let mut ops = 0;
        let mut members = 0;
        for entry in &self.primary {
            match entry {
                Entry::Op(_) => ops += 1,
                Entry::Group(handlers) => members += handlers.iter().filter(|h| h.is_some()).count(),
                Entry::Empty | Entry::Extended => {}
            }
        }
        let extended = self.extended.iter().filter(|h| h.is_some()).count();
        (ops, extended, members)
    }
}

impl<M: VirtualMemory> Default for DispatchTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: VirtualMemory> fmt::Debug for DispatchTable<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (ops, extended, members) = self.coverage();
        f.debug_struct("DispatchTable")
            .field("primary", &ops)
            .field("extended", &extended)
            .field("group_members", &members)
            .finish()
    }
}
