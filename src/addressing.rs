//! # Address-field encoding
//!
//! Memory-reference instructions carry an 11-bit address field rather than a
//! full 16-bit address. Bit 10 selects between two windows:
//!
//! - **Base page** (bit 10 clear): bits 9-0 name a fixed location. Bit 9
//!   clear reaches words 0-511 (where words 0-31 are the registers); bit 9
//!   set reaches the top 512 words of the address space, whose absolute
//!   position depends on whether the CPU runs with a 15-bit or 16-bit bus.
//! - **Current page** (bit 10 set): bits 9-0 place the target within the
//!   1024-word page holding the instruction itself. The hardware stores the
//!   in-page offset with its top bit inverted, so encode and decode both
//!   XOR bit 9.
//!
//! The same field layout is produced by the assembler, printed by the
//! disassembler, and resolved by the simulator, all through this module.

use crate::assembler::AsmErrorKind;

/// Address-field flag bits.
pub const CURRENT_PAGE_BIT: u16 = 0x0400;
const HIGH_BASE_BIT: u16 = 0x0200;
const IN_PAGE_MASK: u16 = 0x03FF;
const PAGE_MASK: u16 = !IN_PAGE_MASK;

/// First absolute address of the high half of the base page.
pub fn high_base_start(use_16bit: bool) -> u16 {
    if use_16bit {
        0xFE00
    } else {
        0x7E00
    }
}

/// Encodes absolute address `target` into an 11-bit field for an instruction
/// located at `at`. Fails when the target is on neither the base page nor the
/// instruction's own page.
pub fn encode_address(target: u16, at: u16, use_16bit: bool) -> Result<u16, AsmErrorKind> {
    if target < 0x0200 {
        return Ok(target);
    }
    if target >= high_base_start(use_16bit) {
        return Ok(HIGH_BASE_BIT | (target & 0x01FF));
    }
    if target & PAGE_MASK == at & PAGE_MASK {
        return Ok(CURRENT_PAGE_BIT | ((target & IN_PAGE_MASK) ^ HIGH_BASE_BIT));
    }
    Err(AsmErrorKind::AddressOutOfRange(target))
}

/// Decodes an 11-bit address field of an instruction located at `at` back to
/// an absolute address. Register targets come back as their index (< 32).
pub fn decode_address(field: u16, at: u16, use_16bit: bool) -> u16 {
    let field = field & 0x07FF;
    if field & CURRENT_PAGE_BIT != 0 {
        (at & PAGE_MASK) | ((field & IN_PAGE_MASK) ^ HIGH_BASE_BIT)
    } else if field & HIGH_BASE_BIT != 0 {
        high_base_start(use_16bit) | (field & 0x01FF)
    } else {
        field
    }
}

/// Sign-extends a 6-bit skip displacement field.
pub fn sign_extend_6(field: u16) -> i16 {
    let field = field & 0x003F;
    if field & 0x0020 != 0 {
        (field | 0xFFC0) as i16
    } else {
        field as i16
    }
}

/// Encodes a signed value into a 6-bit field, if it fits.
pub fn encode_signed_6(value: i64) -> Option<u16> {
    if (-32..=31).contains(&value) {
        Some((value as u16) & 0x003F)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_base_page_low() {
        assert_eq!(encode_address(0x0000, 0x0040, false).unwrap(), 0x0000);
        assert_eq!(encode_address(0x01FF, 0x4000, false).unwrap(), 0x01FF);
        assert_eq!(decode_address(0x01FF, 0x4000, false), 0x01FF);
    }

    #[test]
    fn test_base_page_high() {
        let field = encode_address(0x7E05, 0x0040, false).unwrap();
        assert_eq!(field, 0x0205);
        assert_eq!(decode_address(field, 0x0040, false), 0x7E05);

        let field = encode_address(0xFFFE, 0x0040, true).unwrap();
        assert_eq!(field, 0x03FE);
        assert_eq!(decode_address(field, 0x0040, true), 0xFFFE);
    }

    #[test]
    fn test_current_page_bit_inversion() {
        // Target 0x4321 from an instruction at 0x4000: in-page offset 0x321,
        // stored with bit 9 flipped.
        let field = encode_address(0x4321, 0x4000, false).unwrap();
        assert_eq!(field, CURRENT_PAGE_BIT | (0x0321 ^ 0x0200));
        assert_eq!(decode_address(field, 0x4000, false), 0x4321);
        // Any address on the same page decodes correctly.
        assert_eq!(decode_address(field, 0x43FF, false), 0x4321);
    }

    #[test]
    fn test_out_of_reach() {
        assert!(encode_address(0x2000, 0x5000, false).is_err());
    }

    #[test]
    fn test_round_trip_all_reachable() {
        let at = 0x1A40;
        for target in 0..0x8000u16 {
            if let Ok(field) = encode_address(target, at, false) {
                assert_eq!(decode_address(field, at, false), target, "target {target:04X}");
            }
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend_6(0x00), 0);
        assert_eq!(sign_extend_6(0x1F), 31);
        assert_eq!(sign_extend_6(0x20), -32);
        assert_eq!(sign_extend_6(0x3F), -1);
        assert_eq!(encode_signed_6(-1), Some(0x3F));
        assert_eq!(encode_signed_6(31), Some(0x1F));
        assert_eq!(encode_signed_6(32), None);
    }
}
