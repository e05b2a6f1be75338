//! # Memory model
//!
//! A fixed-size array of 16-bit words with RAM/ROM/unmapped classification by
//! address range. The model follows the bus behavior of the real machine:
//! there are no bus errors. Reads from unmapped addresses float high and
//! return 0xFFFF; writes to ROM or unmapped addresses are silently dropped.
//!
//! Ranges are registered at setup time. A RAM range and a ROM range must
//! never overlap (checked at registration); ranges of the same class may.
//!
//! Binary images load through [`MemoryManager::load_words`] or
//! [`MemoryManager::load_bytes_be`] (big-endian byte pairs), which bypass the
//! ROM write protection so ROM content can be populated at all.

use thiserror::Error;

/// Value returned by reads outside every registered range.
pub const UNMAPPED_VALUE: u16 = 0xFFFF;

/// Classification of a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    Ram,
    Rom,
    Unmapped,
}

/// Errors from memory range registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A RAM range and a ROM range overlap.
    #[error(
        "{new_class:?} range {new_start:#06X}-{new_end:#06X} overlaps \
         {existing_class:?} range {existing_start:#06X}-{existing_end:#06X}"
    )]
    RangeOverlap {
        new_class: MemoryClass,
        new_start: u16,
        new_end: u16,
        existing_class: MemoryClass,
        existing_start: u16,
        existing_end: u16,
    },

    /// Range start is above its end.
    #[error("invalid range {start:#06X}-{end:#06X}")]
    InvalidRange { start: u16, end: u16 },
}

/// Word-addressed memory with RAM/ROM range classification.
///
/// The backing array covers `base..base + size`; index arithmetic is always
/// `physical = address - base`.
pub struct MemoryManager {
    words: Vec<u16>,
    base: u16,
    ram_ranges: Vec<(u16, u16)>,
    rom_ranges: Vec<(u16, u16)>,
}

impl MemoryManager {
    /// Creates a memory covering `size` words starting at `base`, all zero,
    /// with no ranges registered (every address reads as unmapped).
    pub fn new(base: u16, size: usize) -> Self {
        Self {
            words: vec![0; size],
            base,
            ram_ranges: Vec::new(),
            rom_ranges: Vec::new(),
        }
    }

    /// Registers an inclusive RAM range. Fails if it overlaps any ROM range.
    pub fn add_ram_range(&mut self, start: u16, end: u16) -> Result<(), MemoryError> {
        Self::check_overlap(MemoryClass::Ram, start, end, &self.rom_ranges, MemoryClass::Rom)?;
        self.ram_ranges.push((start, end));
        Ok(())
    }

    /// Registers an inclusive ROM range. Fails if it overlaps any RAM range.
    pub fn add_rom_range(&mut self, start: u16, end: u16) -> Result<(), MemoryError> {
        Self::check_overlap(MemoryClass::Rom, start, end, &self.ram_ranges, MemoryClass::Ram)?;
        self.rom_ranges.push((start, end));
        Ok(())
    }

    fn check_overlap(
        new_class: MemoryClass,
        start: u16,
        end: u16,
        others: &[(u16, u16)],
        other_class: MemoryClass,
    ) -> Result<(), MemoryError> {
        if start > end {
            return Err(MemoryError::InvalidRange { start, end });
        }
        for &(s, e) in others {
            if start <= e && s <= end {
                return Err(MemoryError::RangeOverlap {
                    new_class,
                    new_start: start,
                    new_end: end,
                    existing_class: other_class,
                    existing_start: s,
                    existing_end: e,
                });
            }
        }
        Ok(())
    }

    /// Classifies an address against the registered ranges.
    pub fn classify(&self, address: u16) -> MemoryClass {
        if self.ram_ranges.iter().any(|&(s, e)| (s..=e).contains(&address)) {
            MemoryClass::Ram
        } else if self.rom_ranges.iter().any(|&(s, e)| (s..=e).contains(&address)) {
            MemoryClass::Rom
        } else {
            MemoryClass::Unmapped
        }
    }

    fn physical(&self, address: u16) -> Option<usize> {
        let index = address.checked_sub(self.base)? as usize;
        (index < self.words.len()).then_some(index)
    }

    /// Reads a word. Unmapped addresses return [`UNMAPPED_VALUE`].
    pub fn read(&self, address: u16) -> u16 {
        if self.classify(address) == MemoryClass::Unmapped {
            return UNMAPPED_VALUE;
        }
        match self.physical(address) {
            Some(index) => self.words[index],
            None => UNMAPPED_VALUE,
        }
    }

    /// Writes a word. Writes to ROM or unmapped addresses are dropped.
    pub fn write(&mut self, address: u16, value: u16) {
        if self.classify(address) != MemoryClass::Ram {
            return;
        }
        if let Some(index) = self.physical(address) {
            self.words[index] = value;
        }
    }

    /// Stores words directly into the backing array, ignoring classification.
    /// Words falling outside the array are dropped.
    pub fn load_words(&mut self, start: u16, words: &[u16]) {
        for (offset, &word) in words.iter().enumerate() {
            let address = start.wrapping_add(offset as u16);
            if let Some(index) = self.physical(address) {
                self.words[index] = word;
            }
        }
    }

    /// Loads a big-endian byte image: each byte pair becomes one word, high
    /// byte first. A trailing odd byte fills the high half of the last word.
    pub fn load_bytes_be(&mut self, start: u16, bytes: &[u8]) {
        let mut words = Vec::with_capacity(bytes.len().div_ceil(2));
        for pair in bytes.chunks(2) {
            let high = pair[0] as u16;
            let low = *pair.get(1).unwrap_or(&0) as u16;
            words.push((high << 8) | low);
        }
        self.load_words(start, &words);
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.words.len()
    }
}
