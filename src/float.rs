//! BCD floating-point value type.
//!
//! The HP 9800 math instructions operate on four-word packed-BCD floating
//! point numbers. Word 0 carries the sign in bit 0 and a 10-bit two's
//! complement exponent in bits 15-6 (bits 5-1 are reserved and must be zero).
//! Words 1-3 hold the 12-digit mantissa, one decimal digit per nibble, most
//! significant digit first. The value represented is
//! `±d1.d2d3...d12 × 10^exponent`.
//!
//! [`FloatingPointNumber`] is immutable: parse or construct one, read it out.
//! Conversion from host floating point is deliberately not provided; the only
//! ways in are the text grammar and explicit digit construction.

use thiserror::Error;

/// Number of mantissa digits.
pub const MANTISSA_DIGITS: u32 = 12;

/// Smallest representable exponent.
pub const EXPONENT_MIN: i32 = -512;

/// Largest representable exponent.
pub const EXPONENT_MAX: i32 = 511;

/// Errors from parsing or constructing a [`FloatingPointNumber`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FloatError {
    /// Input text does not match the numeric grammar.
    #[error("invalid floating-point literal: {0:?}")]
    InvalidFormat(String),

    /// Exponent outside the representable range -512..=511.
    #[error("exponent {0} out of range ({EXPONENT_MIN}..={EXPONENT_MAX})")]
    ExponentOutOfRange(i32),

    /// A mantissa digit outside 0-9 was supplied to `from_digits`.
    #[error("mantissa digit {0} out of range (0-9)")]
    InvalidDigit(u8),

    /// Digit 1 of a non-zero mantissa must be 1-9.
    #[error("leading mantissa digit must be non-zero for a non-zero value")]
    Denormalized,
}

/// An immutable four-word packed-BCD floating-point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatingPointNumber {
    words: [u16; 4],
}

impl FloatingPointNumber {
    /// Positive zero: all words clear.
    pub const ZERO: FloatingPointNumber = FloatingPointNumber { words: [0; 4] };

    /// Wraps four raw memory words without validation. Use [`is_valid`]
    /// (`FloatingPointNumber::is_valid`) to check reserved bits and nibbles.
    pub fn from_words(words: [u16; 4]) -> Self {
        Self { words }
    }

    /// Builds a value from 12 mantissa digits (most significant first), a
    /// sign, and an exponent. Digit 1 must be 1-9 unless every digit is zero.
    pub fn from_digits(
        digits: &[u8; 12],
        negative: bool,
        exponent: i32,
    ) -> Result<Self, FloatError> {
        for &d in digits.iter() {
            if d > 9 {
                return Err(FloatError::InvalidDigit(d));
            }
        }
        let all_zero = digits.iter().all(|&d| d == 0);
        if !all_zero && digits[0] == 0 {
            return Err(FloatError::Denormalized);
        }
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(FloatError::ExponentOutOfRange(exponent));
        }

        let mut words = [0u16; 4];
        words[0] = (((exponent as u16) & 0x03FF) << 6) | u16::from(negative);
        for (i, &d) in digits.iter().enumerate() {
            let word = 1 + i / 4;
            let shift = 12 - 4 * (i % 4);
            words[word] |= (d as u16) << shift;
        }
        Ok(Self { words })
    }

    /// Parses conventional scientific notation: optional sign, integer and/or
    /// fractional digits, optional `e`/`E` exponent. At most 12 significant
    /// digits are kept; extra digits are dropped (they still weigh in the
    /// implied exponent).
    pub fn parse(text: &str) -> Result<Self, FloatError> {
        let trimmed = text.trim();
        let invalid = || FloatError::InvalidFormat(text.to_string());
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut chars = trimmed.chars().peekable();
        let negative = match chars.peek() {
            Some('-') => {
                chars.next();
                true
            }
            Some('+') => {
                chars.next();
                false
            }
            _ => false,
        };

        // Mantissa: integer digits, optional point, fractional digits.
        let mut int_digits: Vec<u8> = Vec::new();
        let mut frac_digits: Vec<u8> = Vec::new();
        let mut seen_point = false;
        let mut seen_digit = false;
        let mut explicit_exp: i32 = 0;
        loop {
            match chars.peek().copied() {
                Some(c) if c.is_ascii_digit() => {
                    chars.next();
                    seen_digit = true;
                    let d = c as u8 - b'0';
                    if seen_point {
                        frac_digits.push(d);
                    } else {
                        int_digits.push(d);
                    }
                }
                Some('.') if !seen_point => {
                    chars.next();
                    seen_point = true;
                }
                Some('e') | Some('E') => {
                    chars.next();
                    let mut exp_text = String::new();
                    if let Some(&c) = chars.peek() {
                        if c == '+' || c == '-' {
                            exp_text.push(c);
                            chars.next();
                        }
                    }
                    let mut exp_digits = 0;
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_digit() {
                            exp_text.push(c);
                            exp_digits += 1;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if exp_digits == 0 {
                        return Err(invalid());
                    }
                    explicit_exp = exp_text.parse::<i32>().map_err(|_| invalid())?;
                    break;
                }
                _ => break,
            }
        }
        if chars.next().is_some() || !seen_digit {
            return Err(invalid());
        }

        // Locate the first significant digit and derive the implied exponent
        // from its distance to the decimal point.
        let all: Vec<u8> = int_digits
            .iter()
            .chain(frac_digits.iter())
            .copied()
            .collect();
        let first_sig = match all.iter().position(|&d| d != 0) {
            Some(pos) => pos,
            None => return Ok(Self::ZERO),
        };
        let exponent = explicit_exp + int_digits.len() as i32 - 1 - first_sig as i32;
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(FloatError::ExponentOutOfRange(exponent));
        }

        let mut digits = [0u8; 12];
        for (slot, &d) in digits
            .iter_mut()
            .zip(all[first_sig..].iter().take(MANTISSA_DIGITS as usize))
        {
            *slot = d;
        }
        Self::from_digits(&digits, negative, exponent)
    }

    /// The raw four-word image.
    pub fn words(&self) -> [u16; 4] {
        self.words
    }

    /// Mantissa digit `n` (1-12), most significant first.
    ///
    /// # Panics
    ///
    /// Panics if `n` is outside 1-12.
    pub fn digit(&self, n: u32) -> u8 {
        assert!((1..=MANTISSA_DIGITS).contains(&n), "digit index {n}");
        let i = (n - 1) as usize;
        let word = self.words[1 + i / 4];
        let shift = 12 - 4 * (i % 4);
        ((word >> shift) & 0xF) as u8
    }

    pub fn is_negative(&self) -> bool {
        self.words[0] & 1 != 0
    }

    /// Exponent as a signed value (-512..=511).
    pub fn exponent(&self) -> i32 {
        let raw = (self.words[0] >> 6) & 0x03FF;
        // Sign-extend the 10-bit field.
        if raw & 0x0200 != 0 {
            raw as i32 - 1024
        } else {
            raw as i32
        }
    }

    pub fn is_zero(&self) -> bool {
        self.words[1] == 0 && self.words[2] == 0 && self.words[3] == 0
    }

    /// True when no reserved bit of word 0 is set and every mantissa nibble
    /// is a decimal digit.
    pub fn is_valid(&self) -> bool {
        if self.words[0] & 0x003E != 0 {
            return false;
        }
        (1..=MANTISSA_DIGITS).all(|n| self.digit(n) <= 9)
    }

    /// True when digit 1 is non-zero, or the whole value is zero.
    pub fn is_normalized(&self) -> bool {
        self.is_zero() || self.digit(1) != 0
    }
}

impl std::fmt::Display for FloatingPointNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        if self.is_negative() {
            write!(f, "-")?;
        }
        let digits: Vec<u8> = (1..=MANTISSA_DIGITS).map(|n| self.digit(n)).collect();
        let last = digits.iter().rposition(|&d| d != 0).unwrap_or(0);
        write!(f, "{}", digits[0])?;
        if last > 0 {
            write!(f, ".")?;
            for &d in &digits[1..=last] {
                write!(f, "{}", d)?;
            }
        }
        let exponent = self.exponent();
        if exponent != 0 {
            write!(f, "e{}", exponent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let x = FloatingPointNumber::parse("3.14").unwrap();
        assert_eq!(x.digit(1), 3);
        assert_eq!(x.digit(2), 1);
        assert_eq!(x.digit(3), 4);
        for n in 4..=12 {
            assert_eq!(x.digit(n), 0);
        }
        assert_eq!(x.exponent(), 0);
        assert!(!x.is_negative());
        assert!(x.is_valid());
        assert!(x.is_normalized());
    }

    #[test]
    fn test_parse_implied_exponent() {
        assert_eq!(FloatingPointNumber::parse("120").unwrap().exponent(), 2);
        assert_eq!(FloatingPointNumber::parse("0.012").unwrap().exponent(), -2);
        assert_eq!(FloatingPointNumber::parse("1e10").unwrap().exponent(), 10);
        assert_eq!(
            FloatingPointNumber::parse("-2.5e-3").unwrap().exponent(),
            -3
        );
    }

    #[test]
    fn test_parse_zero() {
        let zero = FloatingPointNumber::parse("0.000").unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero, FloatingPointNumber::ZERO);
        assert_eq!(zero.to_string(), "0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", ".", "e5", "1.2.3", "3x", "--1", "1e", "1e+"] {
            assert!(
                matches!(
                    FloatingPointNumber::parse(bad),
                    Err(FloatError::InvalidFormat(_))
                ),
                "expected format error for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_exponent_range() {
        assert!(FloatingPointNumber::parse("1e511").is_ok());
        assert!(matches!(
            FloatingPointNumber::parse("1e512"),
            Err(FloatError::ExponentOutOfRange(512))
        ));
        assert!(FloatingPointNumber::parse("1e-512").is_ok());
        assert!(matches!(
            FloatingPointNumber::parse("1e-513"),
            Err(FloatError::ExponentOutOfRange(-513))
        ));
    }

    #[test]
    fn test_digit_cap() {
        // 13 significant digits: the 13th is dropped, the magnitude stays.
        let x = FloatingPointNumber::parse("1234567890123").unwrap();
        assert_eq!(x.exponent(), 12);
        assert_eq!(x.digit(12), 2);
    }

    #[test]
    fn test_from_digits_validation() {
        let mut digits = [0u8; 12];
        digits[0] = 10;
        assert!(matches!(
            FloatingPointNumber::from_digits(&digits, false, 0),
            Err(FloatError::InvalidDigit(10))
        ));
        digits[0] = 0;
        digits[1] = 5;
        assert!(matches!(
            FloatingPointNumber::from_digits(&digits, false, 0),
            Err(FloatError::Denormalized)
        ));
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["3.14", "-2.5e-3", "1e10", "9.99999999999e511", "7"] {
            let x = FloatingPointNumber::parse(text).unwrap();
            let back = FloatingPointNumber::parse(&x.to_string()).unwrap();
            assert_eq!(x, back, "round trip failed for {text}");
        }
    }

    #[test]
    fn test_word_layout() {
        let x = FloatingPointNumber::parse("-1").unwrap();
        // Sign in bit 0 of word 0, exponent field clear, digit 1 in the top
        // nibble of word 1.
        assert_eq!(x.words(), [0x0001, 0x1000, 0x0000, 0x0000]);

        let y = FloatingPointNumber::parse("1e-1").unwrap();
        assert_eq!(y.words()[0], 0x3FF << 6);
        assert_eq!(y.exponent(), -1);
    }

    #[test]
    fn test_validity_checks() {
        let reserved = FloatingPointNumber::from_words([0x0002, 0x1000, 0, 0]);
        assert!(!reserved.is_valid());
        let bad_nibble = FloatingPointNumber::from_words([0, 0xA000, 0, 0]);
        assert!(!bad_nibble.is_valid());
        let denorm = FloatingPointNumber::from_words([0, 0x0100, 0, 0]);
        assert!(denorm.is_valid());
        assert!(!denorm.is_normalized());
    }
}
