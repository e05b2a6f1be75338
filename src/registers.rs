//! Register-file model for the HP 9800 CPU.
//!
//! The processor exposes 32 word registers at addresses 0-31. Most are plain
//! storage, but a few indices carry fixed hardware roles, and indices 4-7 are
//! not backed by storage at all: they are windows onto the I/O registers of
//! whichever peripheral the PA register currently selects. The [`Register`]
//! enum makes each role explicit so callers dispatch on meaning rather than on
//! raw index ranges.

/// Number of addressable registers. Address-mode operand fields below this
/// value always denote a register, never memory.
pub const REGISTER_COUNT: u16 = 32;

/// A register role, tagged by function.
///
/// `Io` and `Ar2` carry the sub-index within their group (0-3). `Reserved`
/// covers indices 21-31, which exist as plain storage with no assigned role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Accumulator A (index 0).
    A,
    /// Accumulator B (index 1).
    B,
    /// Program counter (index 2).
    P,
    /// Return-stack pointer (index 3).
    R,
    /// Peripheral I/O register window (indices 4-7). Reads and writes are
    /// routed to the currently selected device, not to local storage.
    Io(u8),
    /// Interrupt vector base (index 8).
    Iv,
    /// Peripheral address / select code (index 9).
    Pa,
    /// Working register (index 10).
    W,
    /// DMA peripheral address (index 11).
    DmaPa,
    /// DMA memory address (index 12).
    DmaMa,
    /// DMA word count (index 13).
    DmaC,
    /// Byte-stack pointer C (index 14).
    C,
    /// Byte-stack pointer D (index 15).
    D,
    /// Four-word BCD accumulator AR2 (indices 16-19).
    Ar2(u8),
    /// Shift-extend register (index 20).
    Se,
    /// Reserved storage slots (indices 21-31).
    Reserved(u8),
}

impl Register {
    /// Maps a register index (0-31) to its role. Returns `None` for indices
    /// outside the register file.
    pub fn from_index(index: u16) -> Option<Register> {
        match index {
            0 => Some(Register::A),
            1 => Some(Register::B),
            2 => Some(Register::P),
            3 => Some(Register::R),
            4..=7 => Some(Register::Io((index - 4) as u8)),
            8 => Some(Register::Iv),
            9 => Some(Register::Pa),
            10 => Some(Register::W),
            11 => Some(Register::DmaPa),
            12 => Some(Register::DmaMa),
            13 => Some(Register::DmaC),
            14 => Some(Register::C),
            15 => Some(Register::D),
            16..=19 => Some(Register::Ar2((index - 16) as u8)),
            20 => Some(Register::Se),
            21..=31 => Some(Register::Reserved(index as u8)),
            _ => None,
        }
    }

    /// The register's index in the file (0-31).
    pub fn index(self) -> u16 {
        match self {
            Register::A => 0,
            Register::B => 1,
            Register::P => 2,
            Register::R => 3,
            Register::Io(n) => 4 + n as u16,
            Register::Iv => 8,
            Register::Pa => 9,
            Register::W => 10,
            Register::DmaPa => 11,
            Register::DmaMa => 12,
            Register::DmaC => 13,
            Register::C => 14,
            Register::D => 15,
            Register::Ar2(n) => 16 + n as u16,
            Register::Se => 20,
            Register::Reserved(n) => n as u16,
        }
    }

    /// Resolves an assembler register name (case-insensitive) to its index.
    pub fn index_from_name(name: &str) -> Option<u16> {
        let upper = name.to_ascii_uppercase();
        let index = match upper.as_str() {
            "A" => 0,
            "B" => 1,
            "P" => 2,
            "R" => 3,
            "R4" => 4,
            "R5" => 5,
            "R6" => 6,
            "R7" => 7,
            "IV" => 8,
            "PA" => 9,
            "W" => 10,
            "DMAPA" => 11,
            "DMAMA" => 12,
            "DMAC" => 13,
            "C" => 14,
            "D" => 15,
            "AR2" => 16,
            "SE" => 20,
            _ => return None,
        };
        Some(index)
    }

    /// The assembler-visible name for an index, if one exists.
    pub fn name_of(index: u16) -> Option<&'static str> {
        let name = match index {
            0 => "A",
            1 => "B",
            2 => "P",
            3 => "R",
            4 => "R4",
            5 => "R5",
            6 => "R6",
            7 => "R7",
            8 => "IV",
            9 => "PA",
            10 => "W",
            11 => "DMAPA",
            12 => "DMAMA",
            13 => "DMAC",
            14 => "C",
            15 => "D",
            16 => "AR2",
            20 => "SE",
            _ => return None,
        };
        Some(name)
    }
}

/// Backing storage for the locally held registers.
///
/// Indices 4-7 have slots here but they are never read through this struct;
/// the simulator routes those accesses to the device manager.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    words: [u16; REGISTER_COUNT as usize],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            words: [0; REGISTER_COUNT as usize],
        }
    }

    /// Zeroes every register.
    pub fn clear(&mut self) {
        self.words = [0; REGISTER_COUNT as usize];
    }

    /// Reads a locally stored register. `index` must be < 32.
    pub fn get(&self, index: u16) -> u16 {
        self.words[index as usize]
    }

    /// Writes a locally stored register. `index` must be < 32.
    pub fn set(&mut self, index: u16, value: u16) {
        self.words[index as usize] = value;
    }

    pub fn pc(&self) -> u16 {
        self.words[Register::P.index() as usize]
    }

    pub fn set_pc(&mut self, value: u16) {
        self.words[Register::P.index() as usize] = value;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
