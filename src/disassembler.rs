//! HP 9800 disassembler.
//!
//! Converts opcode words back into assembly source lines that re-assemble to
//! the same words. Decode runs against the shared instruction catalog, so
//! anything the assembler can emit the disassembler can print; words matching
//! no catalog entry come back as `OCT` data lines, which also round-trip.
//!
//! Where one bit pattern carries several mnemonics (the byte-pointer group)
//! or several source spellings (opcode 0 as NOP or `LDA A`), the catalog's
//! declaration order decides what gets printed.

use crate::addressing::{decode_address, sign_extend_6};
use crate::opcodes::{base_pattern, OpcodePattern, OperandKind};
use crate::registers::{Register, REGISTER_COUNT};

/// A single disassembled word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub address: u16,
    pub opcode: u16,
    /// Concrete mnemonic with variant characters substituted, or "OCT" for
    /// words outside the catalog.
    pub mnemonic: String,
    /// Operand text, already in assembler syntax.
    pub operand: Option<String>,
    /// Whether the word decoded to a catalog instruction.
    pub known: bool,
}

impl Disassembly {
    /// The instruction field of a source line: mnemonic plus operand.
    pub fn text(&self) -> String {
        match &self.operand {
            Some(operand) => format!("{} {}", self.mnemonic, operand),
            None => self.mnemonic.clone(),
        }
    }
}

/// Catalog-driven disassembler.
///
/// # Examples
///
/// ```
/// use lib9800::disassembler::Disassembler;
///
/// let dis = Disassembler::new(false);
/// assert_eq!(dis.disassemble(0x0000, 0o100).text(), "NOP");
/// assert_eq!(dis.disassemble(0x7002, 0o100).text(), "SZA *+2");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Disassembler {
    use_16bit: bool,
    /// Print suffixes for zero-bit cases too (e.g. `,I` on place/withdraw).
    include_defaults: bool,
}

impl Disassembler {
    pub fn new(use_16bit: bool) -> Self {
        Self {
            use_16bit,
            include_defaults: false,
        }
    }

    /// Prints default suffixes explicitly instead of omitting them.
    pub fn with_default_suffixes(mut self) -> Self {
        self.include_defaults = true;
        self
    }

    /// Disassembles one word fetched from `address`.
    pub fn disassemble(&self, opcode: u16, address: u16) -> Disassembly {
        self.disassemble_with(opcode, address, |_| None)
    }

    /// Disassembles one word, substituting label names for addresses the
    /// lookup recognizes.
    pub fn disassemble_with(
        &self,
        opcode: u16,
        address: u16,
        lookup: impl Fn(u16) -> Option<String>,
    ) -> Disassembly {
        let pattern = match base_pattern(opcode) {
            Some(p) if !p.only_16bit || self.use_16bit => p,
            _ => {
                return Disassembly {
                    address,
                    opcode,
                    mnemonic: "OCT".to_string(),
                    operand: Some(format!("{opcode:o}")),
                    known: false,
                }
            }
        };
        let mnemonic = self.render_mnemonic(pattern, opcode);
        let mut operand = self.render_operand(pattern, opcode, address, lookup);
        if let Some(suffix) = self.render_suffixes(pattern, opcode) {
            // Suffixes attach to the operand field with a comma.
            operand = Some(match operand {
                Some(text) => format!("{text},{suffix}"),
                None => suffix,
            });
        }
        Disassembly {
            address,
            opcode,
            mnemonic,
            operand,
            known: true,
        }
    }

    /// Formats a full source line: optional label, instruction field, and a
    /// trailing comment.
    pub fn line(
        &self,
        opcode: u16,
        address: u16,
        label: Option<&str>,
        comment: Option<&str>,
    ) -> String {
        let dis = self.disassemble(opcode, address);
        let mut out = format!("{:<7}{}", label.unwrap_or(""), dis.text());
        if let Some(comment) = comment {
            out = format!("{out:<24}{comment}");
        }
        out
    }

    fn render_mnemonic(&self, pattern: &'static OpcodePattern, opcode: u16) -> String {
        let mut mnemonic = String::from(pattern.template);
        for rule in pattern.variants.iter().filter(|r| !r.suffix) {
            let ch = if opcode & rule.bit != 0 {
                rule.one_ch
            } else {
                rule.zero_ch
            };
            mnemonic = mnemonic.replace(rule.placeholder, &ch.to_string());
        }
        mnemonic
    }

    fn render_suffixes(&self, pattern: &'static OpcodePattern, opcode: u16) -> Option<String> {
        let mut parts = Vec::new();
        for rule in pattern.variants.iter().filter(|r| r.suffix) {
            if rule.condition != 0 && opcode & rule.condition == 0 {
                continue;
            }
            if opcode & rule.bit != 0 {
                parts.push(rule.one_ch.to_string());
            } else if rule.zero_ch != ' ' && (self.include_defaults || rule.condition != 0) {
                parts.push(rule.zero_ch.to_string());
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    fn render_operand(
        &self,
        pattern: &'static OpcodePattern,
        opcode: u16,
        address: u16,
        lookup: impl Fn(u16) -> Option<String>,
    ) -> Option<String> {
        let field = opcode & pattern.operand_mask;
        match pattern.operand {
            OperandKind::None => None,
            OperandKind::Count => Some(format!("{}", field + 1)),
            OperandKind::Register => Some(register_text(field)),
            OperandKind::Skip => {
                let delta = sign_extend_6(field);
                let target = address.wrapping_add(delta as u16);
                if let Some(label) = lookup(target) {
                    return Some(label);
                }
                Some(match delta {
                    0 => "*".to_string(),
                    d if d > 0 => format!("*+{d}"),
                    d => format!("*{d}"),
                })
            }
            OperandKind::SignedValue => Some(format!("{}", sign_extend_6(field))),
            OperandKind::Address => {
                let target = decode_address(field, address, self.use_16bit);
                if let Some(label) = lookup(target) {
                    return Some(label);
                }
                if target < REGISTER_COUNT {
                    Some(register_text(target))
                } else {
                    Some(format!("{target:o}B"))
                }
            }
        }
    }
}

fn register_text(index: u16) -> String {
    match Register::name_of(index) {
        Some(name) => name.to_string(),
        None => format!("{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dis() -> Disassembler {
        Disassembler::new(false)
    }

    #[test]
    fn test_nop_wins_opcode_zero() {
        assert_eq!(dis().disassemble(0x0000, 0).text(), "NOP");
    }

    #[test]
    fn test_memory_reference() {
        // LDB from base page 0o100.
        assert_eq!(dis().disassemble(0x0800 | 0o100, 0o2000).text(), "LDB 100B");
        // LDA register B.
        assert_eq!(dis().disassemble(0x0001, 0o2000).text(), "LDA B");
        // Current-page reference back to the page start.
        let d = dis().disassemble(0x3800 | 0x0400 | 0x0200, 0o2001);
        assert_eq!(d.text(), "STB 2000B");
    }

    #[test]
    fn test_high_base_page_widths() {
        let word = 0x0000 | 0x0200 | 0x05;
        assert_eq!(dis().disassemble(word, 0).text(), "LDA 77005B");
        let d16 = Disassembler::new(true);
        assert_eq!(d16.disassemble(word, 0).text(), "LDA 177005B");
    }

    #[test]
    fn test_skip_notation() {
        assert_eq!(dis().disassemble(0x7000, 0o100).text(), "SZA *");
        assert_eq!(dis().disassemble(0x7002, 0o100).text(), "SZA *+2");
        assert_eq!(dis().disassemble(0x703F, 0o100).text(), "SZA *-1");
        assert_eq!(dis().disassemble(0x7040 | 5, 0o100).text(), "SZB *+5");
    }

    #[test]
    fn test_skip_label_lookup() {
        let d = dis().disassemble_with(0x7002, 0o100, |target| {
            (target == 0o102).then(|| "DONE".to_string())
        });
        assert_eq!(d.text(), "SZA DONE");
    }

    #[test]
    fn test_flag_skip_suffixes() {
        assert_eq!(dis().disassemble(0x7201, 0o100).text(), "SFS *+1");
        assert_eq!(dis().disassemble(0x7281, 0o100).text(), "SFS *+1,S");
        assert_eq!(dis().disassemble(0x72C1, 0o100).text(), "SFS *+1,C");
    }

    #[test]
    fn test_ret_and_pop() {
        assert_eq!(dis().disassemble(0x7E01, 0o100).text(), "RET 1");
        assert_eq!(dis().disassemble(0x7E41, 0o100).text(), "RET 1,P");
    }

    #[test]
    fn test_place_withdraw_suffixes() {
        assert_eq!(dis().disassemble(0xF500, 0o100).text(), "PWC A");
        assert_eq!(dis().disassemble(0xF6E1, 0o100).text(), "WBD B,D");
        // Default increment shows only on request.
        let verbose = dis().with_default_suffixes();
        assert_eq!(verbose.disassemble(0xF500, 0o100).text(), "PWC A,I");
    }

    #[test]
    fn test_shift_counts() {
        assert_eq!(dis().disassemble(0xF000, 0o100).text(), "AAR 1");
        assert_eq!(dis().disassemble(0xF80F, 0o100).text(), "ABR 16");
        assert_eq!(dis().disassemble(0xF203, 0o100).text(), "SAL 4");
    }

    #[test]
    fn test_byte_pointer_prints_cbu_in_16bit_mode() {
        let d16 = Disassembler::new(true);
        assert_eq!(d16.disassemble(0x7140, 0o100).text(), "CBU");
        // The 15-bit CPU has no such instruction; it decodes as data.
        let d = dis().disassemble(0x7140, 0o100);
        assert!(!d.known);
        assert_eq!(d.text(), "OCT 70500");
    }

    #[test]
    fn test_unknown_word_becomes_oct() {
        let d = dis().disassemble(0x8123, 0o100);
        assert!(!d.known);
        assert_eq!(d.text(), "OCT 100443");
    }

    #[test]
    fn test_line_format() {
        let line = dis().line(0x7E01, 0o100, Some("DONE"), Some("return"));
        assert_eq!(line, "DONE   RET 1            return");
        let line = dis().line(0x0000, 0o100, None, None);
        assert_eq!(line, "       NOP");
    }

    #[test]
    fn test_math_group() {
        assert_eq!(dis().disassemble(0xF700, 0).text(), "MPY");
        assert_eq!(dis().disassemble(0xF70B, 0).text(), "DRS");
    }
}
