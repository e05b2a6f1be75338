//! # CPU simulator
//!
//! The [`Simulator`] owns the machine: register file, memory, device manager,
//! condition flags, interrupt state, and breakpoints. Execution is
//! step-driven through [`Simulator::tick`], with [`Simulator::run`] as a
//! cooperative loop over it.
//!
//! ## State machine
//!
//! `Created → Reset → Running ⇄ BreakpointHit`, plus a terminal
//! `Failed(message)` reachable from anywhere via [`Simulator::fail`]. Runtime
//! faults (unknown opcodes, return-stack overflow, indirect chains into
//! register space, BCD divide by zero) never panic or return errors; they
//! record a message and freeze the machine, so a host can show the final
//! state instead of unwinding.
//!
//! ## A tick
//!
//! 1. Reject the call in `Created` or `Failed`.
//! 2. Advance every device one tick, then arbitrate interrupts: a pending
//!    request is accepted when interrupts are enabled, its level is at least
//!    the active one, and fewer than two interrupts are already nested.
//!    Acceptance saves PA on the interrupt stack, loads PA with the select
//!    code, and redirects the next fetch to the vector table.
//! 3. Fetch: the interrupt-vector word, an operand left by EXE, or memory at
//!    the program counter.
//! 4. Decode against the instruction catalog and dispatch to the family
//!    handler, which returns a tick cost and a program-counter effect.
//! 5. Apply the effect, bump the tick counter, notify the event sink, and
//!    check code and memory breakpoints.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::addressing::decode_address;
use crate::devices::DeviceManager;
use crate::disassembler::Disassembler;
use crate::instructions;
use crate::memory::MemoryManager;
use crate::opcodes::{base_pattern, CpuFlag};
use crate::registers::{Register, RegisterFile, REGISTER_COUNT};

/// Power-on program counter.
pub const BOOT_ADDRESS: u16 = 0x0010;

/// Base address of AR1, the memory-resident four-word BCD accumulator.
pub const AR1_ADDRESS: u16 = 0x03E4;

/// Maximum indirect-addressing hops before the chain is declared a loop.
/// The hardware itself follows cycles forever; a chain deeper than this
/// fails instead of hanging the tick.
const MAX_INDIRECT_HOPS: u32 = 64;

/// Lifecycle state, observed by polling after each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatorState {
    Created,
    Reset,
    Running,
    BreakpointHit,
    /// Terminal; carries the fault message.
    Failed(String),
}

/// How an executed instruction moves the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcEffect {
    /// Signed displacement from the instruction's own address. Plain
    /// instructions use `Delta(1)`; taken skips use their operand value.
    Delta(i32),
    /// Absolute target (jumps, calls, returns).
    Jump(u16),
}

/// Condition flags tested by the skip group.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Flags {
    pub flag: bool,
    pub status: bool,
    pub halt: bool,
    pub decimal_carry: bool,
    pub overflow: bool,
    pub extend: bool,
}

impl Flags {
    pub fn get(&self, which: CpuFlag) -> bool {
        match which {
            CpuFlag::Flag => self.flag,
            CpuFlag::Status => self.status,
            CpuFlag::Halt => self.halt,
            CpuFlag::DecimalCarry => self.decimal_carry,
            CpuFlag::Overflow => self.overflow,
            CpuFlag::Extend => self.extend,
        }
    }

    pub fn set(&mut self, which: CpuFlag, value: bool) {
        match which {
            CpuFlag::Flag => self.flag = value,
            CpuFlag::Status => self.status = value,
            CpuFlag::Halt => self.halt = value,
            CpuFlag::DecimalCarry => self.decimal_carry = value,
            CpuFlag::Overflow => self.overflow = value,
            CpuFlag::Extend => self.extend = value,
        }
    }
}

/// Where the next opcode comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Memory,
    /// Operand scheduled by EXE.
    Pending(u16),
    /// Interrupt service: execute the vector-table word for this select code.
    Interrupt(u8),
}

/// A code breakpoint.
#[derive(Debug, Clone, Copy)]
struct CodeBreakpoint {
    enabled: bool,
}

/// A memory breakpoint with independent read/write arming.
#[derive(Debug, Clone, Copy)]
struct MemoryBreakpoint {
    on_read: bool,
    on_write: bool,
    enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Synchronous observer hooks, delivered on the caller's stack.
pub trait EventSink {
    fn on_tick(&mut self, _ticks: u64, _pc: u16) {}
    fn on_state_change(&mut self, _state: &SimulatorState) {}
}

/// Sink that ignores everything.
pub struct NullSink;

impl EventSink for NullSink {}

/// Options for [`Simulator::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many ticks.
    pub tick_limit: Option<u64>,
    /// Best-effort pacing toward the hardware's nominal tick rate.
    pub real_time: bool,
}

/// Nominal tick rate used for real-time pacing.
const TICKS_PER_SECOND: u64 = 1_000_000;
const PACE_BATCH: u64 = 4096;

/// The HP 9800 machine.
pub struct Simulator {
    pub(crate) regs: RegisterFile,
    pub(crate) memory: MemoryManager,
    pub(crate) devices: DeviceManager,
    pub(crate) flags: Flags,
    pub(crate) use_16bit: bool,
    state: SimulatorState,
    ticks: u64,

    /// Address of the instruction currently executing; skips and page
    /// addressing resolve against it.
    pub(crate) exec_address: u16,
    fetch: Fetch,
    pub(crate) interrupt_enabled: bool,
    /// PA values saved at interrupt entry, two levels deep.
    int_stack: [u16; 2],
    int_levels: [crate::devices::InterruptLevel; 2],
    int_depth: usize,
    pub(crate) dma_enabled: bool,
    pub(crate) dma_outbound: bool,
    /// 17th address bit of the C and D byte pointers.
    pub(crate) c_extend: bool,
    pub(crate) d_extend: bool,
    relative_mode: bool,

    code_breakpoints: HashMap<u16, CodeBreakpoint>,
    memory_breakpoints: HashMap<u16, MemoryBreakpoint>,
    accesses: Vec<(u16, Access)>,
}

impl Simulator {
    /// Builds a machine around a prepared memory image. `use_16bit` selects
    /// the 16-bit CPU variant (full 64K address space, no indirection bit).
    pub fn new(memory: MemoryManager, use_16bit: bool) -> Self {
        Self {
            regs: RegisterFile::new(),
            memory,
            devices: DeviceManager::new(),
            flags: Flags::default(),
            use_16bit,
            state: SimulatorState::Created,
            ticks: 0,
            exec_address: 0,
            fetch: Fetch::Memory,
            interrupt_enabled: false,
            int_stack: [0; 2],
            int_levels: [crate::devices::InterruptLevel::Low; 2],
            int_depth: 0,
            dma_enabled: false,
            dma_outbound: false,
            c_extend: false,
            d_extend: false,
            relative_mode: false,
            code_breakpoints: HashMap::new(),
            memory_breakpoints: HashMap::new(),
            accesses: Vec::new(),
        }
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.memory
    }

    pub fn devices_mut(&mut self) -> &mut DeviceManager {
        &mut self.devices
    }

    pub fn flag(&self, which: CpuFlag) -> bool {
        self.flags.get(which)
    }

    /// Drives a condition line from outside (front panel, peripheral).
    pub fn set_flag(&mut self, which: CpuFlag, value: bool) {
        self.flags.set(which, value);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_enabled
    }

    pub fn dma_enabled(&self) -> bool {
        self.dma_enabled
    }

    /// Relative addressing exists in the hardware but is not modeled;
    /// enabling it makes current-page operands fail.
    pub fn set_relative_mode(&mut self, enabled: bool) {
        self.relative_mode = enabled;
    }

    /// Zeroes registers and flags, clears DMA and interrupt state, resets
    /// every device, and positions the program counter at the boot address.
    pub fn reset(&mut self) {
        self.regs.clear();
        self.flags = Flags::default();
        self.interrupt_enabled = false;
        self.int_depth = 0;
        self.dma_enabled = false;
        self.dma_outbound = false;
        self.c_extend = false;
        self.d_extend = false;
        self.fetch = Fetch::Memory;
        self.regs.set_pc(BOOT_ADDRESS);
        self.devices.reset();
        self.set_state(SimulatorState::Reset, &mut NullSink);
    }

    /// Records a fault and freezes the machine.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("simulator failed: {message}");
        self.state = SimulatorState::Failed(message);
    }

    fn set_state(&mut self, state: SimulatorState, sink: &mut dyn EventSink) {
        if self.state != state {
            self.state = state;
            sink.on_state_change(&self.state);
        }
    }

    /// Executes one instruction. No-op in `Created` or `Failed`.
    pub fn tick(&mut self) {
        self.tick_with(&mut NullSink);
    }

    /// Executes one instruction, delivering events to `sink`.
    pub fn tick_with(&mut self, sink: &mut dyn EventSink) {
        match self.state {
            SimulatorState::Created | SimulatorState::Failed(_) => return,
            _ => {}
        }
        self.set_state(SimulatorState::Running, sink);
        self.accesses.clear();

        self.devices.tick();
        self.arbitrate_interrupt();

        let pc = self.regs.pc();
        if !self.use_16bit && pc > 0x7FFF && !matches!(self.fetch, Fetch::Pending(_)) {
            self.fail(format!("program counter {pc:#06X} out of range"));
            return;
        }

        let opcode = match self.fetch {
            Fetch::Memory => {
                self.exec_address = pc;
                self.read_word(pc)
            }
            Fetch::Pending(word) => {
                // The EXE'd word behaves as if it sat at the EXE itself.
                self.fetch = Fetch::Memory;
                self.exec_address = pc;
                word
            }
            Fetch::Interrupt(select_code) => {
                self.fetch = Fetch::Memory;
                self.exec_address = pc;
                let vector = self
                    .regs
                    .get(Register::Iv.index())
                    .wrapping_add(u16::from(select_code));
                self.read_word(vector)
            }
        };

        let pattern = match base_pattern(opcode) {
            Some(p) if !p.only_16bit || self.use_16bit => p,
            _ => {
                self.fail(format!(
                    "unrecognized opcode {opcode:#06X} at {:#06X}",
                    self.exec_address
                ));
                return;
            }
        };

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "{:06o}  {}",
                self.exec_address,
                Disassembler::new(self.use_16bit)
                    .disassemble(opcode, self.exec_address)
                    .text()
            );
        }

        let (cost, effect) = instructions::execute(self, opcode, pattern);
        if matches!(self.state, SimulatorState::Failed(_)) {
            return;
        }

        match effect {
            PcEffect::Delta(delta) => {
                let next = i64::from(self.exec_address) + i64::from(delta);
                self.regs.set_pc((next as u16) & self.address_mask());
            }
            PcEffect::Jump(target) => {
                self.regs.set_pc(target & self.address_mask());
            }
        }

        self.ticks += u64::from(cost.max(1));
        sink.on_tick(self.ticks, self.regs.pc());

        if self.breakpoint_tripped() {
            self.set_state(SimulatorState::BreakpointHit, sink);
        }
    }

    /// Cooperative run loop; returns the number of instructions stepped.
    pub fn run(&mut self, options: RunOptions) -> u64 {
        self.run_with(options, &mut NullSink)
    }

    pub fn run_with(&mut self, options: RunOptions, sink: &mut dyn EventSink) -> u64 {
        let started = Instant::now();
        let first_tick = self.ticks;
        let mut steps = 0u64;
        loop {
            if let Some(limit) = options.tick_limit {
                if self.ticks - first_tick >= limit {
                    break;
                }
            }
            self.tick_with(sink);
            steps += 1;
            match self.state {
                SimulatorState::Running => {}
                _ => break,
            }
            if options.real_time && (self.ticks - first_tick) % PACE_BATCH == 0 {
                let target = Duration::from_nanos(
                    (self.ticks - first_tick) * 1_000_000_000 / TICKS_PER_SECOND,
                );
                let elapsed = started.elapsed();
                if target > elapsed {
                    std::thread::sleep(target - elapsed);
                }
            }
        }
        steps
    }

    /// Disassembles the word at `address` for tracing.
    pub fn disassemble_at(&self, address: u16) -> String {
        let word = self.memory.read(address);
        Disassembler::new(self.use_16bit)
            .disassemble(word, address)
            .text()
    }

    // ------------------------------------------------------------------
    // Interrupts

    fn arbitrate_interrupt(&mut self) {
        if !self.interrupt_enabled || self.fetch != Fetch::Memory {
            return;
        }
        let pending = match self.devices.pending_level() {
            Some(level) => level,
            None => return,
        };
        if self.int_depth > 0 && pending < self.int_levels[self.int_depth - 1] {
            return;
        }
        if self.int_depth >= self.int_stack.len() {
            // The hardware nests two levels; a third request stays pending
            // until a RET ,P pops.
            return;
        }
        if let Some(select_code) = self.devices.select_code_for_interrupt_and_confirm(pending) {
            log::debug!("interrupt accepted: select code {select_code} ({pending:?})");
            let pa = Register::Pa.index();
            self.int_stack[self.int_depth] = self.regs.get(pa);
            self.int_levels[self.int_depth] = pending;
            self.int_depth += 1;
            self.regs.set(pa, u16::from(select_code));
            self.fetch = Fetch::Interrupt(select_code);
        }
    }

    /// Pops one interrupt level (RET ,P). Harmless when none is active.
    pub(crate) fn pop_interrupt(&mut self) {
        if self.int_depth > 0 {
            self.int_depth -= 1;
            self.regs
                .set(Register::Pa.index(), self.int_stack[self.int_depth]);
        }
    }

    pub fn interrupt_depth(&self) -> usize {
        self.int_depth
    }

    /// Enters an interrupt level directly, bypassing device arbitration.
    #[cfg(test)]
    pub(crate) fn push_interrupt(&mut self, select_code: u8) {
        let pa = Register::Pa.index();
        self.int_stack[self.int_depth] = self.regs.get(pa);
        self.int_levels[self.int_depth] = crate::devices::level_of_select_code(select_code);
        self.int_depth += 1;
        self.regs.set(pa, u16::from(select_code));
    }

    /// Schedules a word to execute next instead of a fetch (EXE).
    pub(crate) fn schedule_pending(&mut self, word: u16) {
        self.fetch = Fetch::Pending(word);
    }

    // ------------------------------------------------------------------
    // Address resolution

    pub(crate) fn address_mask(&self) -> u16 {
        if self.use_16bit {
            0xFFFF
        } else {
            0x7FFF
        }
    }

    /// Resolves an 11-bit address field to an effective target (register
    /// index or memory address), following indirect chains on the 15-bit
    /// CPU. `None` means the machine has already failed.
    pub(crate) fn resolve_operand(&mut self, field: u16) -> Option<u16> {
        if self.relative_mode && field & 0x0400 != 0 {
            self.fail("relative addressing mode is not supported");
            return None;
        }
        let mut target = decode_address(field, self.exec_address, self.use_16bit);
        if self.use_16bit {
            return Some(target);
        }
        let mut hops = 0u32;
        loop {
            let word = self.read_word(target);
            if word & 0x8000 == 0 || word == 0xFFFF {
                return Some(target);
            }
            let next = word & 0x7FFF;
            if next < REGISTER_COUNT {
                self.fail(format!(
                    "indirect chain at {target:#06X} points into register space"
                ));
                return None;
            }
            hops += 1;
            if hops > MAX_INDIRECT_HOPS {
                self.fail(format!("indirect chain at {target:#06X} does not terminate"));
                return None;
            }
            target = next;
        }
    }

    // ------------------------------------------------------------------
    // Word access with register routing

    /// Reads a word from a register (targets below 32, with 4-7 routed to
    /// the selected device) or from memory.
    pub(crate) fn read_word(&mut self, target: u16) -> u16 {
        if target < REGISTER_COUNT {
            match Register::from_index(target) {
                Some(Register::Io(n)) => {
                    let pa = self.regs.get(Register::Pa.index());
                    self.devices.read_register(pa, n as usize)
                }
                _ => self.regs.get(target),
            }
        } else {
            self.accesses.push((target, Access::Read));
            self.memory.read(target)
        }
    }

    pub(crate) fn write_word(&mut self, target: u16, value: u16) {
        if target < REGISTER_COUNT {
            match Register::from_index(target) {
                Some(Register::Io(n)) => {
                    let pa = self.regs.get(Register::Pa.index());
                    self.devices.write_register(pa, n as usize, value);
                }
                _ => self.regs.set(target, value),
            }
        } else {
            self.accesses.push((target, Access::Write));
            self.memory.write(target, value);
        }
    }

    // ------------------------------------------------------------------
    // Breakpoints

    pub fn add_code_breakpoint(&mut self, address: u16) {
        self.code_breakpoints
            .insert(address, CodeBreakpoint { enabled: true });
    }

    pub fn remove_code_breakpoint(&mut self, address: u16) {
        self.code_breakpoints.remove(&address);
    }

    /// Enables or disables a code breakpoint without removing it.
    pub fn set_code_breakpoint_enabled(&mut self, address: u16, enabled: bool) {
        if let Some(bp) = self.code_breakpoints.get_mut(&address) {
            bp.enabled = enabled;
        }
    }

    pub fn add_memory_breakpoint(&mut self, address: u16, on_read: bool, on_write: bool) {
        self.memory_breakpoints.insert(
            address,
            MemoryBreakpoint {
                on_read,
                on_write,
                enabled: true,
            },
        );
    }

    pub fn remove_memory_breakpoint(&mut self, address: u16) {
        self.memory_breakpoints.remove(&address);
    }

    pub fn set_memory_breakpoint_enabled(&mut self, address: u16, enabled: bool) {
        if let Some(bp) = self.memory_breakpoints.get_mut(&address) {
            bp.enabled = enabled;
        }
    }

    /// Resumes from a breakpoint without stepping.
    pub fn clear_breakpoint_hit(&mut self) {
        if self.state == SimulatorState::BreakpointHit {
            self.state = SimulatorState::Running;
        }
    }

    fn breakpoint_tripped(&self) -> bool {
        if let Some(bp) = self.code_breakpoints.get(&self.exec_address) {
            if bp.enabled {
                return true;
            }
        }
        for (address, access) in &self.accesses {
            if let Some(bp) = self.memory_breakpoints.get(address) {
                let armed = match access {
                    Access::Read => bp.on_read,
                    Access::Write => bp.on_write,
                };
                if bp.enabled && armed {
                    return true;
                }
            }
        }
        false
    }
}
