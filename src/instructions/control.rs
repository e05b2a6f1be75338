//! Control family: subroutine return, EXE, interrupt and DMA mode switches,
//! and the block clear/transfer pair.

use super::FAILED;
use crate::addressing::sign_extend_6;
use crate::cpu::{PcEffect, Simulator};
use crate::registers::Register;

/// RET n: resume at the stacked address plus `n`. Bit 6 (,P) additionally
/// pops one interrupt level, restoring the pre-interrupt PA.
pub(crate) fn ret(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let r = Register::R.index();
    let sp = sim.regs.get(r);
    if sp == 0 {
        sim.fail("return stack underflow");
        return FAILED;
    }
    let stacked = sim.read_word(sp);
    sim.regs.set(r, sp - 1);
    if opcode & 0x0040 != 0 {
        sim.pop_interrupt();
    }
    let n = sign_extend_6(opcode & 0x003F);
    let target = (i32::from(stacked) + i32::from(n)) as u16;
    (3, PcEffect::Jump(target))
}

/// EXE r: the word in register `r` executes in place of the next fetch, as
/// if it occupied the EXE's own address.
pub(crate) fn exe(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let word = sim.read_word(opcode & 0x001F);
    sim.schedule_pending(word);
    (1, PcEffect::Delta(0))
}

pub(crate) fn set_interrupt_enable(sim: &mut Simulator, enabled: bool) -> (u32, PcEffect) {
    sim.interrupt_enabled = enabled;
    (1, PcEffect::Delta(1))
}

pub(crate) fn dma_enable(sim: &mut Simulator) -> (u32, PcEffect) {
    sim.dma_enabled = true;
    (1, PcEffect::Delta(1))
}

/// SDO / SDI select the transfer direction without touching the enable.
pub(crate) fn dma_direction(sim: &mut Simulator, outbound: bool) -> (u32, PcEffect) {
    sim.dma_outbound = outbound;
    (1, PcEffect::Delta(1))
}

pub(crate) fn dma_disable(sim: &mut Simulator) -> (u32, PcEffect) {
    sim.dma_enabled = false;
    (1, PcEffect::Delta(1))
}

/// CRL n: clears `n` words starting at the address in A.
pub(crate) fn clear_block(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let count = (opcode & 0x000F) + 1;
    let base = sim.regs.get(Register::A.index());
    for i in 0..count {
        let addr = base.wrapping_add(i) & sim.address_mask();
        sim.write_word(addr, 0);
    }
    (1 + u32::from(count), PcEffect::Delta(1))
}

/// XFR n: copies `n` words from the address in A to the address in B.
pub(crate) fn transfer_block(sim: &mut Simulator, opcode: u16) -> (u32, PcEffect) {
    let count = (opcode & 0x000F) + 1;
    let src = sim.regs.get(Register::A.index());
    let dst = sim.regs.get(Register::B.index());
    for i in 0..count {
        let from = src.wrapping_add(i) & sim.address_mask();
        let to = dst.wrapping_add(i) & sim.address_mask();
        let word = sim.read_word(from);
        sim.write_word(to, word);
    }
    (1 + u32::from(count), PcEffect::Delta(1))
}

#[cfg(test)]
mod tests {
    use crate::cpu::{Simulator, SimulatorState};
    use crate::memory::MemoryManager;
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
    fn test_ret_underflow_fails() {
        let mut sim = machine(&[0x7E00], 0x0300);
        sim.tick();
        assert!(matches!(sim.state(), SimulatorState::Failed(_)));
    }

    #[test]
    fn test_ret_negative_offset() {
        // RET -1 backs up one word from the stacked address.
        let mut sim = machine(&[0x7E00 | 0x3F], 0x0300);
        sim.registers_mut().set(Register::R.index(), 0o300);
        sim.memory_mut().load_words(0o300, &[0x0500]);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x04FF);
        assert_eq!(sim.registers().get(Register::R.index()), 0o277);
    }

    #[test]
    fn test_ret_pop_restores_pa() {
        // RET 1,P with R=5 and mem[5]=100 lands at 101 and unwinds one
        // interrupt level.
        let mut sim = machine(&[0x7E41], 0x0300);
        sim.registers_mut().set(Register::R.index(), 5);
        sim.memory_mut().load_words(5, &[100]);
        sim.push_interrupt(7);
        assert_eq!(sim.registers().get(Register::Pa.index()), 7);
        sim.tick();
        assert_eq!(sim.registers().pc(), 101);
        assert_eq!(sim.registers().get(Register::R.index()), 4);
        assert_eq!(sim.registers().get(Register::Pa.index()), 0);
    }

    #[test]
    fn test_exe_runs_register_word() {
        // EXE W, where W holds SAL 4: the shift acts as if it sat at the
        // EXE's address, then execution falls through to the next word.
        let mut sim = machine(&[0x7F00 | Register::W.index(), 0x0000], 0x0300);
        sim.registers_mut().set(Register::W.index(), 0xF200 | 3);
        sim.registers_mut().set(0, 0x0101);
        sim.tick();
        assert_eq!(sim.registers().pc(), 0x0300);
        sim.tick();
        assert_eq!(sim.registers().get(0), 0x1010);
        assert_eq!(sim.registers().pc(), 0x0301);
    }

    #[test]
    fn test_eir_dir() {
        let mut sim = machine(&[0xF420, 0xF421], 0x0300);
        sim.tick();
        assert!(sim.interrupts_enabled());
        sim.tick();
        assert!(!sim.interrupts_enabled());
    }

    #[test]
    fn test_dma_mode_switches() {
        let mut sim = machine(&[0xF422, 0xF423, 0xF424, 0xF425], 0x0300);
        sim.tick();
        assert!(sim.dma_enabled());
        sim.tick();
        sim.tick();
        sim.tick();
        assert!(!sim.dma_enabled());
    }

    #[test]
    fn test_crl_clears_block() {
        let mut sim = machine(&[0xF400 | 3], 0x0300);
        sim.registers_mut().set(0, 0o400);
        sim.memory_mut().load_words(0o400, &[1, 2, 3, 4, 5]);
        sim.tick();
        for i in 0..4 {
            assert_eq!(sim.memory().read(0o400 + i), 0);
        }
        assert_eq!(sim.memory().read(0o404), 5);
        assert_eq!(sim.ticks(), 5);
    }

    #[test]
    fn test_xfr_copies_block() {
        let mut sim = machine(&[0xF410 | 1], 0x0300);
        sim.registers_mut().set(0, 0o400);
        sim.registers_mut().set(1, 0o500);
        sim.memory_mut().load_words(0o400, &[0xAA, 0xBB]);
        sim.tick();
        assert_eq!(sim.memory().read(0o500), 0xAA);
        assert_eq!(sim.memory().read(0o501), 0xBB);
    }
}
