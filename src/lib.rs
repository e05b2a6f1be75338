//! # HP 9800-series CPU emulator
//!
//! A bit-exact simulator for the 16-bit word-oriented processor of the
//! HP 9800 desktop calculator family, together with an assembler and a
//! disassembler that share one instruction catalog. The crate models both
//! bus widths: the 15-bit machine with indirect addressing and the 16-bit
//! machine with byte-pointer instructions.
//!
//! ## Quick start
//!
//! ```rust
//! use lib9800::{Assembler, MemoryManager, RunOptions, Simulator};
//!
//! let source = concat!(
//!     "      ORG 400B\n",
//!     "START LDA COUNT\n",
//!     "      ADA COUNT\n",
//!     "      STA COUNT\n",
//!     "LOOP  JMP LOOP\n",
//!     "COUNT OCT 25\n",
//!     "      END START\n",
//! );
//! let mut asm = Assembler::new(false);
//! asm.parse_source("demo.asm", source).unwrap();
//! asm.finalize().unwrap();
//!
//! let mut memory = MemoryManager::new(0, 0x8000);
//! memory.add_ram_range(0, 0x7FFF).unwrap();
//! for (address, word) in asm.output() {
//!     memory.write(address, word);
//! }
//!
//! let mut sim = Simulator::new(memory, false);
//! sim.reset();
//! sim.registers_mut().set_pc(0o400);
//! sim.run(RunOptions {
//!     tick_limit: Some(100),
//!     real_time: false,
//! });
//! // COUNT was doubled in place.
//! assert_eq!(sim.memory().read(0o404), 0o52);
//! ```
//!
//! ## Modules
//!
//! - [`cpu`] - the step-driven simulator, breakpoints, and run loop
//! - [`assembler`] - single-pass assembler with deferred label relocation
//! - [`disassembler`] - one-word disassembly and listing formatting
//! - [`opcodes`] - the shared instruction catalog
//! - [`addressing`] - base-page / current-page address field codec
//! - [`registers`] - the 32-word register file and its named roles
//! - [`memory`] - RAM/ROM range map behind the 16-bit bus
//! - [`devices`] - select-code peripheral registry and interrupt lines
//! - [`float`] - four-word packed-BCD floating point values

pub mod addressing;
pub mod assembler;
pub mod cpu;
pub mod devices;
pub mod disassembler;
pub mod float;
pub mod memory;
pub mod opcodes;
pub mod registers;

// Instruction semantics are internal; the public surface is the simulator.
mod instructions;

pub use assembler::{AsmError, AsmErrorKind, Assembler, AssemblyRecord, RecordBody, SourceRef};
pub use cpu::{EventSink, PcEffect, RunOptions, Simulator, SimulatorState, BOOT_ADDRESS};
pub use devices::{Device, DeviceManager, InterruptLevel};
pub use disassembler::{Disassembler, Disassembly};
pub use float::{FloatError, FloatingPointNumber};
pub use memory::{MemoryError, MemoryManager};
pub use opcodes::{CpuFlag, Op, OpcodePattern, PATTERNS};
pub use registers::{Register, RegisterFile};
