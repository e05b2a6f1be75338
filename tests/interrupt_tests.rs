//! Interrupt delivery tests: vectoring through the IV table, two-level
//! priority, nesting limits, and the RET ,P unwind.

use lib9800::{MemoryManager, Register, Simulator};

const VECTOR_BASE: u16 = 0o1000;

/// Builds a machine with a main loop at `main`, an IV table, and a handler
/// for `select_code` that stores a tag and returns with RET 0,P.
fn machine() -> Simulator {
    let mut memory = MemoryManager::new(0, 0x8000);
    memory.add_ram_range(0, 0x7FFF).unwrap();
    // Main program: EIR, then spin on NOPs.
    memory.load_words(0o400, &[0xF420, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000]);
    let mut sim = Simulator::new(memory, false);
    sim.reset();
    sim.registers_mut().set_pc(0o400);
    sim.registers_mut().set(Register::Iv.index(), VECTOR_BASE);
    sim.registers_mut().set(Register::R.index(), 0o700);
    sim
}

/// Installs a handler for `select_code`: the vector word is a JSM to the
/// handler body, which loads a tag into B and returns popping the interrupt.
fn install_handler(sim: &mut Simulator, select_code: u8, body: u16, tag: u16) {
    let vector = VECTOR_BASE + u16::from(select_code);
    sim.memory_mut().load_words(vector, &[0x4000 | body]);
    sim.memory_mut().load_words(
        body,
        &[
            // LDB <tag word>, RET 0,P.
            0x0800 | (body + 2),
            0x7E40,
            tag,
        ],
    );
}

#[test]
fn test_vectored_interrupt_and_return() {
    let mut sim = machine();
    install_handler(&mut sim, 3, 0o500, 0o111);
    sim.tick(); // EIR
    let resume = sim.registers().pc();
    sim.devices_mut().request_interrupt(3);

    sim.tick(); // vector word: JSM into the handler
    assert_eq!(sim.interrupt_depth(), 1);
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);
    // The stacked return address is the interrupted instruction itself.
    assert_eq!(sim.memory().read(0o701), resume);

    sim.tick(); // LDB tag
    sim.tick(); // RET 0,P
    assert_eq!(sim.registers().get(1), 0o111);
    assert_eq!(sim.interrupt_depth(), 0);
    assert_eq!(sim.registers().get(Register::Pa.index()), 0);
    assert_eq!(sim.registers().pc(), resume);
}

#[test]
fn test_interrupts_ignored_until_enabled() {
    let mut sim = machine();
    install_handler(&mut sim, 3, 0o500, 0o111);
    sim.devices_mut().request_interrupt(3);
    // First tick executes EIR; arbitration ran before enable, so the
    // request is only honored on the following tick.
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 0);
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 1);
}

#[test]
fn test_high_level_beats_low() {
    let mut sim = machine();
    install_handler(&mut sim, 3, 0o500, 0o111);
    install_handler(&mut sim, 9, 0o520, 0o222);
    sim.tick(); // EIR
    sim.devices_mut().request_interrupt(3);
    sim.devices_mut().request_interrupt(9);

    sim.tick();
    // Select code 9 is on the high level and wins arbitration.
    assert_eq!(sim.registers().get(Register::Pa.index()), 9);
    sim.tick();
    sim.tick(); // RET 0,P
    assert_eq!(sim.registers().get(1), 0o222);
    assert_eq!(sim.interrupt_depth(), 0);

    // The low-level request was left pending and is served next.
    sim.tick();
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);
    sim.tick();
    sim.tick();
    assert_eq!(sim.registers().get(1), 0o111);
}

#[test]
fn test_low_cannot_preempt_high() {
    let mut sim = machine();
    install_handler(&mut sim, 9, 0o520, 0o222);
    sim.tick(); // EIR
    sim.devices_mut().request_interrupt(9);
    sim.tick(); // enter the high-level handler
    assert_eq!(sim.interrupt_depth(), 1);

    sim.devices_mut().request_interrupt(2);
    sim.tick(); // LDB inside the handler; level 2 must wait
    assert_eq!(sim.interrupt_depth(), 1);
    assert_eq!(sim.registers().get(Register::Pa.index()), 9);
}

#[test]
fn test_high_preempts_low() {
    let mut sim = machine();
    install_handler(&mut sim, 3, 0o500, 0o111);
    install_handler(&mut sim, 9, 0o520, 0o222);
    sim.tick(); // EIR
    sim.devices_mut().request_interrupt(3);
    sim.tick(); // enter the low-level handler
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);

    sim.devices_mut().request_interrupt(9);
    sim.tick(); // high level preempts inside the low handler
    assert_eq!(sim.interrupt_depth(), 2);
    assert_eq!(sim.registers().get(Register::Pa.index()), 9);

    sim.tick();
    sim.tick(); // RET 0,P pops back to the low-level handler
    assert_eq!(sim.interrupt_depth(), 1);
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);
}

#[test]
fn test_equal_level_interrupt_nesting() {
    let mut sim = machine();
    install_handler(&mut sim, 3, 0o500, 0o111);
    install_handler(&mut sim, 2, 0o520, 0o222);
    install_handler(&mut sim, 9, 0o540, 0o333);
    sim.tick(); // EIR
    sim.devices_mut().request_interrupt(3);
    sim.tick(); // enter the low-level handler
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);

    // An equal-level request preempts, taking the last nesting slot.
    sim.devices_mut().request_interrupt(2);
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 2);
    assert_eq!(sim.registers().get(Register::Pa.index()), 2);

    // With both slots occupied even the high level has to wait.
    sim.devices_mut().request_interrupt(9);
    sim.tick(); // LDB inside the second handler
    assert_eq!(sim.interrupt_depth(), 2);
    assert_eq!(sim.registers().get(Register::Pa.index()), 2);

    sim.tick(); // RET 0,P pops back to the first low-level handler
    assert_eq!(sim.interrupt_depth(), 1);
    assert_eq!(sim.registers().get(Register::Pa.index()), 3);

    // The freed slot lets the high level in.
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 2);
    assert_eq!(sim.registers().get(Register::Pa.index()), 9);
}

#[test]
fn test_third_request_stays_pending() {
    let mut sim = machine();
    install_handler(&mut sim, 8, 0o500, 0o111);
    install_handler(&mut sim, 9, 0o520, 0o222);
    sim.tick(); // EIR
    sim.devices_mut().request_interrupt(8);
    sim.tick();
    sim.devices_mut().request_interrupt(9);
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 2);

    // Two levels are active; another request cannot be confirmed.
    sim.devices_mut().request_interrupt(9);
    sim.tick();
    assert_eq!(sim.interrupt_depth(), 2);
    assert_ne!(sim.devices_mut().request_mask() & (1 << 9), 0);
}
