//! Instruction semantics, grouped the way the hardware groups them.
//!
//! Each family module exposes handlers called from [`execute`], the single
//! dispatch point the simulator uses after decoding. A handler receives the
//! simulator and the raw opcode, performs the instruction's side effects, and
//! returns `(cost, effect)`: the tick cost and how the program counter moves.
//!
//! Handlers never panic on bad machine state. Faults (return-stack overflow,
//! invalid BCD stuff digits, divide by zero) go through `Simulator::fail`,
//! which freezes the machine; the handler then returns [`FAILED`] and the
//! tick loop discards the effect.
//!
//! - **memory_ref**: the ten memory-reference instructions (LDA/LDB through
//!   JMP), all carrying an 11-bit address field.
//! - **skips**: register and flag conditional skips with 6-bit displacements.
//! - **shifts**: shift and rotate on A or B, with shift-extend capture.
//! - **stack**: place/withdraw through the C and D word and byte pointers.
//! - **control**: NOP, RET, EXE, interrupt and DMA mode switches, block
//!   clear and transfer.
//! - **math**: the binary multiply and the BCD mantissa group.

pub(crate) mod control;
pub(crate) mod math;
pub(crate) mod memory_ref;
pub(crate) mod shifts;
pub(crate) mod skips;
pub(crate) mod stack;

use crate::cpu::{PcEffect, Simulator};
use crate::opcodes::{Op, OpcodePattern};

/// Result returned after a handler has called `Simulator::fail`. The value
/// is never applied; the tick loop checks the failed state first.
pub(crate) const FAILED: (u32, PcEffect) = (1, PcEffect::Delta(0));

/// Executes one decoded instruction and reports its cost and PC effect.
pub(crate) fn execute(
    sim: &mut Simulator,
    opcode: u16,
    pattern: &'static OpcodePattern,
) -> (u32, PcEffect) {
    match pattern.op {
        Op::Nop | Op::ByteNop => (1, PcEffect::Delta(1)),

        Op::Load
        | Op::Compare
        | Op::Add
        | Op::Store
        | Op::Jsm
        | Op::Isz
        | Op::And
        | Op::Dsz
        | Op::Ior
        | Op::Jmp => memory_ref::execute(sim, opcode, pattern.op),

        Op::SkipZero | Op::SkipNonzero | Op::SkipZeroInc | Op::SkipFlag(..) => {
            skips::execute(sim, opcode, pattern.op)
        }

        Op::Ret => control::ret(sim, opcode),
        Op::Exe => control::exe(sim, opcode),

        Op::ShiftArithRight | Op::ShiftRight | Op::ShiftLeft | Op::RotateRight => {
            shifts::execute(sim, opcode, pattern.op)
        }

        Op::ClearBlock => control::clear_block(sim, opcode),
        Op::TransferBlock => control::transfer_block(sim, opcode),

        Op::IntEnable => control::set_interrupt_enable(sim, true),
        Op::IntDisable => control::set_interrupt_enable(sim, false),
        Op::DmaEnable => control::dma_enable(sim),
        Op::DmaOut => control::dma_direction(sim, true),
        Op::DmaIn => control::dma_direction(sim, false),
        Op::DmaDisable => control::dma_disable(sim),

        Op::Place => stack::place(sim, opcode),
        Op::Withdraw => stack::withdraw(sim, opcode),

        Op::Mpy
        | Op::Fmp
        | Op::Fdv
        | Op::Fxa
        | Op::Mwa
        | Op::Cmx
        | Op::Cmy
        | Op::Nrm
        | Op::Mrx
        | Op::Mry
        | Op::Mly
        | Op::Drs => math::execute(sim, pattern.op),
    }
}
