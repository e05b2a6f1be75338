//! Conditional skip family.
//!
//! Every skip carries a 6-bit signed displacement measured from the
//! instruction itself; a not-taken skip falls through to the next word. The
//! register skips test A or B (bit 6 selects), the flag skips test one of the
//! six condition flags and can rewrite it after the test (bits 7-6).

use crate::addressing::sign_extend_6;
use crate::cpu::{PcEffect, Simulator};
use crate::opcodes::Op;
use crate::registers::Register;

pub(crate) fn execute(sim: &mut Simulator, opcode: u16, op: Op) -> (u32, PcEffect) {
    let taken = match op {
        Op::SkipZero | Op::SkipNonzero | Op::SkipZeroInc => {
            let reg = if opcode & 0x0040 != 0 {
                Register::B.index()
            } else {
                Register::A.index()
            };
            let value = sim.regs.get(reg);
            if op == Op::SkipZeroInc {
                sim.regs.set(reg, value.wrapping_add(1));
            }
            if op == Op::SkipNonzero {
                value != 0
            } else {
                value == 0
            }
        }
        Op::SkipFlag(flag, want) => {
            let taken = sim.flags.get(flag) == want;
            // Bit 7 arms the post-test write; bit 6 clear writes set (,S),
            // bit 6 set writes clear (,C).
            if opcode & 0x0080 != 0 {
                sim.flags.set(flag, opcode & 0x0040 == 0);
            }
            taken
        }
        _ => unreachable!("non-skip op {:?}", op),
    };

    let delta = if taken {
        i32::from(sign_extend_6(opcode & 0x003F))
    } else {
        1
    };
    (1, PcEffect::Delta(delta))
}

#[cfg(test)]
mod tests {
    use crate::cpu::Simulator;
    use crate::memory::MemoryManager;
    use crate::opcodes::CpuFlag;

    fn machine(program: &[u16], at: u16) -> Simulator {
        let mut memory = MemoryManager::new(0, 0x8000);
        memory.add_ram_range(0, 0x7FFF).unwrap();
        memory.load_words(at, program);
        let mut sim = Simulator::new(memory, false);
        sim.reset();
        sim.registers_mut().set_pc(at);
        sim
    }

    #[test]
    fn test_sza_taken_and_not() {
        // SZA *+3.
        let mut sim = machine(&[0x7000 | 3, 0x7000 | 3], 0x0300);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0303);
        sim.registers_mut().set(0, 7);
        sim.registers_mut().set_pc(0x0301);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0302);
    }

    #[test]
    fn test_rzb_tests_b() {
        // RZB *-2 with the register-select bit.
        let mut sim = machine(&[0x7080 | 0x0040 | 0x3E], 0x0300);
        sim.registers_mut().set(1, 1);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x02FE);
    }

    #[test]
    fn test_sia_increments_after_test() {
        // SIA *+2 twice: first skips on zero, second falls through on one.
        let mut sim = machine(&[0x7180 | 2, 0x0000, 0x7180 | 2], 0x0300);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0302);
        assert_eq!(sim.registers().get(0), 1);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0303);
        assert_eq!(sim.registers().get(0), 2);
    }

    #[test]
    fn test_flag_skip_with_writeback() {
        // SES *+2,C: skip while extend is set, clearing it in passing.
        let mut sim = machine(&[0x7C00 | 0x0080 | 0x0040 | 2], 0x0300);
        sim.set_flag(CpuFlag::Extend, true);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0302);
        assert!(!sim.flag(CpuFlag::Extend));
    }

    #[test]
    fn test_flag_skip_set_suffix() {
        // SFC *+4,S: flag clear, skip taken, flag left set afterwards.
        let mut sim = machine(&[0x7300 | 0x0080 | 4], 0x0300);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0304);
        assert!(sim.flag(CpuFlag::Flag));
    }

    #[test]
    fn test_flag_skip_without_writeback() {
        let mut sim = machine(&[0x7400 | 1], 0x0300);
        sim.set_flag(CpuFlag::Status, true);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0301);
        assert!(sim.flag(CpuFlag::Status));
    }
}
