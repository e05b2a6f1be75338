//! Shift and rotate family.
//!
//! Four operations on A or B (bit 11 selects), with a 1-16 count stored as
//! `n - 1` in the low nibble. The shifts deposit the shifted-out bits in the
//! SE register: a right shift captures the low `count` bits of the original
//! value, a left shift the high `count` bits. Rotation discards nothing and
//! leaves SE alone.

use crate::cpu::{PcEffect, Simulator};
use crate::opcodes::Op;
use crate::registers::Register;

pub(crate) fn execute(sim: &mut Simulator, opcode: u16, op: Op) -> (u32, PcEffect) {
    let count = u32::from(opcode & 0x000F) + 1;
    let reg = if opcode & 0x0800 != 0 {
        Register::B.index()
    } else {
        Register::A.index()
    };
    let value = sim.regs.get(reg);

    // Counts reach 16, so widen before shifting.
    let low_bits = (u32::from(value) & ((1u32 << count) - 1)) as u16;
    let (result, extend) = match op {
        Op::ShiftArithRight => {
            let shifted = ((i32::from(value as i16)) >> count) as u16;
            (shifted, Some(low_bits))
        }
        Op::ShiftRight => ((u32::from(value) >> count) as u16, Some(low_bits)),
        Op::ShiftLeft => {
            let shifted = (u32::from(value) << count) as u16;
            let out = (u32::from(value) >> (16 - count)) as u16;
            (shifted, Some(out))
        }
        Op::RotateRight => (value.rotate_right(count), None),
        _ => unreachable!("non-shift op {:?}", op),
    };

    sim.regs.set(reg, result);
    if let Some(extend) = extend {
        sim.regs.set(Register::Se.index(), extend);
    }
    (1 + (count + 3) / 4, PcEffect::Delta(1))
}
