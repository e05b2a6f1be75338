//! Memory-reference instruction family.
//!
//! All ten instructions carry an 11-bit address field in the opcode's low
//! bits. The field resolves through base-page / current-page decoding and,
//! on the 15-bit CPU, through indirect chains. A resolved target below 32 is
//! a register access, so `LDA B` and `STA R5` fall out of the same path as
//! ordinary memory operands.

use super::FAILED;
use crate::cpu::{PcEffect, Simulator};
use crate::opcodes::{CpuFlag, Op};
use crate::registers::Register;

pub(crate) fn execute(sim: &mut Simulator, opcode: u16, op: Op) -> (u32, PcEffect) {
    let target = match sim.resolve_operand(opcode & 0x07FF) {
        Some(target) => target,
        None => return FAILED,
    };
    // A/B select in bit 11; only the accumulator group uses it.
    let acc = if opcode & 0x0800 != 0 {
        Register::B.index()
    } else {
        Register::A.index()
    };

    match op {
        Op::Load => {
            let value = sim.read_word(target);
            sim.regs.set(acc, value);
            (2, PcEffect::Delta(1))
        }
        Op::Compare => {
            // Skips the next word when operand and accumulator differ.
            let value = sim.read_word(target);
            let delta = if value != sim.regs.get(acc) { 2 } else { 1 };
            (2, PcEffect::Delta(delta))
        }
        Op::Add => {
            let value = sim.read_word(target);
            let before = sim.regs.get(acc);
            let (sum, carry) = before.overflowing_add(value);
            sim.regs.set(acc, sum);
            // Extend and overflow are sticky; cleared only by testing skips.
            if carry {
                sim.flags.set(CpuFlag::Extend, true);
            }
            if (before ^ sum) & (value ^ sum) & 0x8000 != 0 {
                sim.flags.set(CpuFlag::Overflow, true);
            }
            (2, PcEffect::Delta(1))
        }
        Op::Store => {
            let value = sim.regs.get(acc);
            sim.write_word(target, value);
            (2, PcEffect::Delta(1))
        }
        Op::And => {
            let value = sim.read_word(target);
            let a = Register::A.index();
            let result = sim.regs.get(a) & value;
            sim.regs.set(a, result);
            (2, PcEffect::Delta(1))
        }
        Op::Ior => {
            let value = sim.read_word(target);
            let a = Register::A.index();
            let result = sim.regs.get(a) | value;
            sim.regs.set(a, result);
            (2, PcEffect::Delta(1))
        }
        Op::Isz | Op::Dsz => {
            let value = sim.read_word(target);
            let value = if op == Op::Isz {
                value.wrapping_add(1)
            } else {
                value.wrapping_sub(1)
            };
            sim.write_word(target, value);
            let delta = if value == 0 { 2 } else { 1 };
            (3, PcEffect::Delta(delta))
        }
        Op::Jsm => {
            let r = Register::R.index();
            let sp = sim.regs.get(r);
            if sp >= sim.address_mask() {
                sim.fail(format!("return stack overflow at {sp:#06X}"));
                return FAILED;
            }
            let sp = sp + 1;
            sim.regs.set(r, sp);
            // The stacked word is the JSM's own address; RET n lands at
            // that address plus n.
            let ret = sim.exec_address;
            sim.write_word(sp, ret);
            (3, PcEffect::Jump(target))
        }
        Op::Jmp => (2, PcEffect::Jump(target)),
        _ => unreachable!("non-memory-reference op {:?}", op),
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::{Simulator, SimulatorState};
    use crate::memory::MemoryManager;
    use crate::opcodes::CpuFlag;
    use crate::registers::Register;

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
    fn test_lda_from_base_page() {
        let mut sim = machine(&[0x0000 | 0o100], 0x0200);
        sim.memory_mut().load_words(0o100, &[0xBEEF]);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0xBEEF);
        assert_eq!(sim.registers().pc(), 0x0201);
    }

    #[test]
    fn test_ldb_register_operand() {
        // LDB A: field 0 resolves to register 0.
        let mut sim = machine(&[0x0800], 0x0200);
        sim.registers_mut().set(0, 0x1234);
        sim.tick();
        assert_eq!(sim.registers().get(1), 0x1234);
    }

    #[test]
    fn test_cpa_skips_on_mismatch() {
        let mut sim = machine(&[0x1000 | 0o100, 0x1000 | 0o100], 0x0200);
        sim.memory_mut().load_words(0o100, &[5]);
        sim.registers_mut().set(0, 5);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0201);
        sim.registers_mut().set(0, 6);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0203);
    }

    #[test]
    fn test_ada_sets_sticky_extend_and_overflow() {
        let mut sim = machine(&[0x2000 | 0o100, 0x2000 | 0o101], 0x0200);
        sim.memory_mut().load_words(0o100, &[0x0001]);
        sim.memory_mut().load_words(0o101, &[0x0000]);
        sim.registers_mut().set(0, 0xFFFF);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0);
        assert!(sim.flag(CpuFlag::Extend));
        assert!(!sim.flag(CpuFlag::Overflow));
        // A second add without carry leaves the flag set.
        sim.tick();
        assert!(sim.flag(CpuFlag::Extend));
    }

    #[test]
    fn test_ada_signed_overflow() {
        let mut sim = machine(&[0x2000 | 0o100], 0x0200);
        sim.memory_mut().load_words(0o100, &[0x7FFF]);
        sim.registers_mut().set(0, 0x0001);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0x8000);
        assert!(sim.flag(CpuFlag::Overflow));
        assert!(!sim.flag(CpuFlag::Extend));
    }

    #[test]
    fn test_sta_writes_memory() {
        let mut sim = machine(&[0x3000 | 0o150], 0x0200);
        sim.registers_mut().set(0, 0xA5A5);
        sim.tick();
        assert_eq!(sim.memory().read(0o150), 0xA5A5);
    }

    #[test]
    fn test_and_ior_target_a_only() {
        let mut sim = machine(&[0x5000 | 0o100, 0x6000 | 0o101], 0x0200);
        sim.memory_mut().load_words(0o100, &[0x0F0F]);
        sim.memory_mut().load_words(0o101, &[0x00F0]);
        sim.registers_mut().set(0, 0x3355);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0x0305);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0x03F5);
    }

    #[test]
    fn test_isz_skip_on_wrap() {
        let mut sim = machine(&[0x4800 | 0o100], 0x0200);
        sim.memory_mut().load_words(0o100, &[0xFFFF]);
        sim.tick();
        assert_eq!(sim.memory().read(0o100), 0);
        assert_eq!(sim.registers().pc(), 0x0202);
    }

    #[test]
    fn test_dsz_no_skip() {
        let mut sim = machine(&[0x5800 | 0o100], 0x0200);
        sim.memory_mut().load_words(0o100, &[2]);
        sim.tick();
        assert_eq!(sim.memory().read(0o100), 1);
        assert_eq!(sim.registers().pc(), 0x0201);
    }

    #[test]
    fn test_jsm_and_ret() {
        // JSM to a subroutine that returns with RET 1.
        let mut sim = machine(&[0x4000 | 0x0400 | (0x0205 ^ 0x0200)], 0x0200);
        sim.memory_mut().load_words(0x0205, &[0x7E01]);
        sim.registers_mut().set(Register::R.index(), 0o300);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0205);
        assert_eq!(sim.registers().get(Register::R.index()), 0o301);
        assert_eq!(sim.memory().read(0o301), 0x0200);
        sim.tick();
        // RET 1 resumes at the stacked address plus one.
        assert_eq!(sim.registers().pc(), 0x0201);
        assert_eq!(sim.registers().get(Register::R.index()), 0o300);
    }

    #[test]
    fn test_jsm_stack_overflow_fails() {
        let mut sim = machine(&[0x4000 | 0x0400 | (0x0205 ^ 0x0200)], 0x0200);
        sim.registers_mut().set(Register::R.index(), 0x7FFF);
        sim.tick();
        assert!(matches!(sim.state(), SimulatorState::Failed(_)));
    }

    #[test]
    fn test_jmp_current_page() {
        // JMP *+4 within the current 1024-word page.
        let target = 0x0204u16;
        let field = 0x0400 | ((target & 0x03FF) ^ 0x0200);
        let mut sim = machine(&[0x6800 | field], 0x0200);
        sim.tick();
        assert_eq!(sim.registers().pc(), target);
    }
}
