//! Place/withdraw family: stack access through the C and D pointers.
//!
//! The pointer registers address words directly; in byte mode the pointer's
//! 17th address bit (held next to the register in the simulator) selects the
//! byte, with the bit clear naming the upper byte of the word. A place steps
//! the pointer before storing, a withdraw loads first and steps afterwards,
//! and the ,D form steps downward instead of up.

use crate::cpu::{PcEffect, Simulator};
use crate::registers::Register;

fn pointer_index(use_d: bool) -> u16 {
    if use_d {
        Register::D.index()
    } else {
        Register::C.index()
    }
}

fn extend_bit(sim: &Simulator, use_d: bool) -> bool {
    if use_d {
        sim.d_extend
    } else {
        sim.c_extend
    }
}

fn set_extend_bit(sim: &mut Simulator, use_d: bool, value: bool) {
    if use_d {
        sim.d_extend = value;
    } else {
        sim.c_extend = value;
    }
}

fn step_word(sim: &mut Simulator, use_d: bool, down: bool) {
    let index = pointer_index(use_d);
    let ptr = sim.regs.get(index);
    let ptr = if down {
        ptr.wrapping_sub(1)
    } else {
        ptr.wrapping_add(1)
    };
    sim.regs.set(index, ptr & sim.address_mask());
}

/// Advances the 17-bit byte address by one position in either direction.
/// The extend bit is the low bit; carries ripple into the word pointer.
fn step_byte(sim: &mut Simulator, use_d: bool, down: bool) {
    let extend = extend_bit(sim, use_d);
    if down {
        if extend {
            set_extend_bit(sim, use_d, false);
        } else {
            set_extend_bit(sim, use_d, true);
            step_word(sim, use_d, true);
        }
    } else if extend {
        set_extend_bit(sim, use_d, false);
        step_word(sim, use_d, false);
    } else {
        set_extend_bit(sim, use_d, true);
    }
}

pub(crate) fn place(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let reg = opcode & 0x001F;
    let byte_mode = opcode & 0x0080 != 0;
    let use_d = opcode & 0x0040 != 0;
    let down = opcode & 0x0020 != 0;
    let value = sim.read_word(reg);

    if byte_mode {
        step_byte(sim, use_d, down);
        let addr = sim.regs.get(pointer_index(use_d)) & sim.address_mask();
        let word = sim.read_word(addr);
        let word = if extend_bit(sim, use_d) {
            (word & 0xFF00) | (value & 0x00FF)
        } else {
            (word & 0x00FF) | (value << 8)
        };
        sim.write_word(addr, word);
    } else {
        step_word(sim, use_d, down);
        let addr = sim.regs.get(pointer_index(use_d));
        sim.write_word(addr, value);
    }
    (3, PcEffect::Delta(1))
}

pub(crate) fn withdraw(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let reg = opcode & 0x001F;
    let byte_mode = opcode & 0x0080 != 0;
    let use_d = opcode & 0x0040 != 0;
    let down = opcode & 0x0020 != 0;

    let value = if byte_mode {
        let addr = sim.regs.get(pointer_index(use_d)) & sim.address_mask();
        let word = sim.read_word(addr);
        if extend_bit(sim, use_d) {
            word & 0x00FF
        } else {
            word >> 8
        }
    } else {
        let addr = sim.regs.get(pointer_index(use_d));
        sim.read_word(addr)
    };
    sim.write_word(reg, value);

    if byte_mode {
        step_byte(sim, use_d, down);
    } else {
        step_word(sim, use_d, down);
    }
    (3, PcEffect::Delta(1))
}
