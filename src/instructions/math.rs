//! Binary multiply and the BCD mantissa group.
//!
//! The decimal instructions work on the mantissas of two four-word floating
//! point accumulators: AR1 lives in memory at a fixed address, AR2 occupies
//! registers 16-19. Word 0 of each (sign and exponent) is never touched
//! here; firmware handles exponents itself and uses these instructions for
//! the 12-digit mantissa arithmetic only.

use super::FAILED;
use crate::cpu::{PcEffect, Simulator, AR1_ADDRESS};
use crate::opcodes::{CpuFlag, Op};
use crate::registers::Register;

/// A 12-digit unpacked BCD mantissa, most significant digit first.
type Mantissa = [u8; 12];

fn read_ar1(sim: &mut Simulator) -> [u16; 4] {
    let mut words = [0u16; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = sim.read_word(AR1_ADDRESS + i as u16);
    }
    words
}

fn read_ar2(sim: &Simulator) -> [u16; 4] {
    let base = Register::Ar2(0).index();
    [
        sim.regs.get(base),
        sim.regs.get(base + 1),
        sim.regs.get(base + 2),
        sim.regs.get(base + 3),
    ]
}

fn unpack(words: &[u16; 4]) -> Mantissa {
    let mut digits = [0u8; 12];
    for (i, digit) in digits.iter_mut().enumerate() {
        let word = words[1 + i / 4];
        let shift = 12 - 4 * (i % 4);
        *digit = ((word >> shift) & 0xF) as u8;
    }
    digits
}

fn pack_into(words: &mut [u16; 4], digits: &Mantissa) {
    words[1] = 0;
    words[2] = 0;
    words[3] = 0;
    for (i, &digit) in digits.iter().enumerate() {
        let shift = 12 - 4 * (i % 4);
        words[1 + i / 4] |= u16::from(digit) << shift;
    }
}

fn write_ar1_mantissa(sim: &mut Simulator, digits: &Mantissa) {
    let mut words = read_ar1(sim);
    pack_into(&mut words, digits);
    for (i, word) in words.iter().enumerate().skip(1) {
        sim.write_word(AR1_ADDRESS + i as u16, *word);
    }
}

fn write_ar2_mantissa(sim: &mut Simulator, digits: &Mantissa) {
    let base = Register::Ar2(0).index();
    let mut words = read_ar2(sim);
    pack_into(&mut words, digits);
    for (i, word) in words.iter().enumerate().skip(1) {
        sim.regs.set(base + i as u16, *word);
    }
}

/// Adds `src` into `dst` digit-serially; returns the carry out of digit 1.
fn add_mantissa(dst: &mut Mantissa, src: &Mantissa) -> bool {
    let mut carry = 0u8;
    for i in (0..12).rev() {
        let sum = dst[i] + src[i] + carry;
        dst[i] = sum % 10;
        carry = sum / 10;
    }
    carry != 0
}

/// Ten's complement in place. Zero stays zero.
fn tens_complement(digits: &mut Mantissa) {
    for digit in digits.iter_mut() {
        *digit = 9 - *digit;
    }
    for digit in digits.iter_mut().rev() {
        if *digit == 9 {
            *digit = 0;
        } else {
            *digit += 1;
            break;
        }
    }
}

pub(crate) fn execute(sim: &mut Simulator, op: Op) -> (u32, PcEffect) {
    match op {
        Op::Mpy => {
            // Signed 16x16 multiply: high word to A, low word to B.
            let a = i64::from(sim.regs.get(Register::A.index()) as i16);
            let b = i64::from(sim.regs.get(Register::B.index()) as i16);
            let product = a * b;
            sim.regs
                .set(Register::A.index(), ((product >> 16) & 0xFFFF) as u16);
            sim.regs.set(Register::B.index(), (product & 0xFFFF) as u16);
            (14, PcEffect::Delta(1))
        }
        Op::Fxa => {
            let src = unpack(&read_ar1(sim));
            let mut dst = unpack(&read_ar2(sim));
            let carry = add_mantissa(&mut dst, &src);
            write_ar2_mantissa(sim, &dst);
            sim.flags.set(CpuFlag::DecimalCarry, carry);
            (8, PcEffect::Delta(1))
        }
        Op::Mwa => {
            // Adds the four BCD digits in B into the low end of AR2.
            let b = sim.regs.get(Register::B.index());
            let mut src = [0u8; 12];
            for i in 0..4 {
                src[8 + i] = ((b >> (12 - 4 * i)) & 0xF) as u8;
            }
            let mut dst = unpack(&read_ar2(sim));
            let carry = add_mantissa(&mut dst, &src);
            write_ar2_mantissa(sim, &dst);
            sim.flags.set(CpuFlag::DecimalCarry, carry);
            (8, PcEffect::Delta(1))
        }
        Op::Cmx => {
            let mut digits = unpack(&read_ar1(sim));
            tens_complement(&mut digits);
            write_ar1_mantissa(sim, &digits);
            (8, PcEffect::Delta(1))
        }
        Op::Cmy => {
            let mut digits = unpack(&read_ar2(sim));
            tens_complement(&mut digits);
            write_ar2_mantissa(sim, &digits);
            (8, PcEffect::Delta(1))
        }
        Op::Nrm => {
            // Left-shift AR2 until digit 1 is significant; count to B.
            let mut digits = unpack(&read_ar2(sim));
            if digits.iter().all(|&d| d == 0) {
                sim.regs.set(Register::B.index(), 12);
                sim.flags.set(CpuFlag::DecimalCarry, true);
                return (10, PcEffect::Delta(1));
            }
            let mut count = 0u16;
            while digits[0] == 0 {
                digits.rotate_left(1);
                digits[11] = 0;
                count += 1;
            }
            write_ar2_mantissa(sim, &digits);
            sim.regs.set(Register::B.index(), count);
            sim.flags.set(CpuFlag::DecimalCarry, false);
            (10, PcEffect::Delta(1))
        }
        Op::Mrx | Op::Mry => {
            // Right shift one digit, stuffing digit 1 from A's low nibble;
            // the digit shifted out lands in A.
            let stuff = (sim.regs.get(Register::A.index()) & 0xF) as u8;
            if stuff > 9 {
                sim.fail(format!("BCD stuff digit {stuff:#X} out of range"));
                return FAILED;
            }
            let mut digits = if op == Op::Mrx {
                unpack(&read_ar1(sim))
            } else {
                unpack(&read_ar2(sim))
            };
            let out = digits[11];
            digits.rotate_right(1);
            digits[0] = stuff;
            if op == Op::Mrx {
                write_ar1_mantissa(sim, &digits);
            } else {
                write_ar2_mantissa(sim, &digits);
            }
            sim.regs.set(Register::A.index(), u16::from(out));
            (9, PcEffect::Delta(1))
        }
        Op::Mly => {
            // Left shift AR2, stuffing digit 12 from A; digit 1 out to A.
            let stuff = (sim.regs.get(Register::A.index()) & 0xF) as u8;
            let mut digits = unpack(&read_ar2(sim));
            let out = digits[0];
            digits.rotate_left(1);
            digits[11] = stuff;
            write_ar2_mantissa(sim, &digits);
            sim.regs.set(Register::A.index(), u16::from(out));
            (9, PcEffect::Delta(1))
        }
        Op::Drs => {
            let mut digits = unpack(&read_ar2(sim));
            let out = digits[11];
            digits.rotate_right(1);
            digits[0] = 0;
            write_ar2_mantissa(sim, &digits);
            sim.regs.set(Register::A.index(), u16::from(out));
            (9, PcEffect::Delta(1))
        }
        Op::Fmp => {
            // Adds AR1 into AR2 `n` times, n from B's low nibble; the count
            // of carries becomes the overflow digit in A.
            let n = sim.regs.get(Register::B.index()) & 0xF;
            if n > 9 {
                sim.fail(format!("FMP multiplier digit {n:#X} out of range"));
                return FAILED;
            }
            let src = unpack(&read_ar1(sim));
            let mut dst = unpack(&read_ar2(sim));
            let mut carries = 0u16;
            for _ in 0..n {
                if add_mantissa(&mut dst, &src) {
                    carries += 1;
                }
            }
            write_ar2_mantissa(sim, &dst);
            sim.regs.set(Register::A.index(), carries);
            sim.flags.set(CpuFlag::DecimalCarry, false);
            (16, PcEffect::Delta(1))
        }
        Op::Fdv => {
            // Adds AR1 into AR2 until a carry; the add count becomes the
            // quotient digit in B.
            let src = unpack(&read_ar1(sim));
            if src.iter().all(|&d| d == 0) {
                sim.fail("FDV divide by zero");
                return FAILED;
            }
            let mut dst = unpack(&read_ar2(sim));
            let mut count = 0u16;
            while !add_mantissa(&mut dst, &src) {
                count += 1;
                // A normalized divisor carries within ten adds; a denormal
                // one could spin for 10^12 iterations, so bound the loop.
                if count > 15 {
                    sim.fail("FDV divisor too small to carry");
                    return FAILED;
                }
            }
            write_ar2_mantissa(sim, &dst);
            sim.regs.set(Register::B.index(), count);
            sim.flags.set(CpuFlag::DecimalCarry, true);
            (18, PcEffect::Delta(1))
        }
        _ => unreachable!("non-math op {:?}", op),
    }
}
