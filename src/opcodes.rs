//! # Instruction catalog
//!
//! The single source of truth for HP 9800 instruction encodings. The
//! assembler, disassembler, and simulator all decode against this table, so
//! the three agree bit-for-bit on instruction layout by construction.
//!
//! Each [`OpcodePattern`] matches opcodes where `(opcode & mask) == value`.
//! Decode is strictly first-match-wins in declaration order; the four
//! byte-pointer instructions CBU/DBU/CBL/DBL deliberately share one bit
//! pattern (an ambiguity in the hardware documentation), so CBU wins on
//! disassembly.
//!
//! Mnemonic templates carry single-character placeholders that variant rules
//! replace from opcode bits: `~` is the A-or-B accumulator select, `^` is
//! word-or-byte, `%` is the C-or-D stack pointer select. Suffix rules render
//! as `,X` after the operand instead (e.g. the `,C` on a flag skip or the
//! `,D` on a place/withdraw).

use std::sync::OnceLock;

/// How a pattern's operand field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand text.
    None,
    /// A count 1-16, stored in the field as `n - 1`.
    Count,
    /// A register index 0-31.
    Register,
    /// A 6-bit signed skip displacement; source may use `*+n` / `*-n`
    /// relative-to-here notation or a nearby label.
    Skip,
    /// A 6-bit signed value with no relative notation (RET).
    SignedValue,
    /// An 11-bit memory address field with base/current-page encoding.
    Address,
}

/// Semantic tag used by the simulator to dispatch a matched pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Load,
    Compare,
    Add,
    Store,
    Jsm,
    Isz,
    And,
    Dsz,
    Ior,
    Jmp,
    /// Skip if register zero (no increment).
    SkipZero,
    /// Skip if register non-zero.
    SkipNonzero,
    /// Skip if register zero, then increment it.
    SkipZeroInc,
    /// Skip on a condition flag; `true` = skip when set.
    SkipFlag(CpuFlag, bool),
    /// 16-bit-mode byte-pointer instruction; executes as a no-op.
    ByteNop,
    Ret,
    Exe,
    ShiftArithRight,
    ShiftRight,
    ShiftLeft,
    RotateRight,
    ClearBlock,
    TransferBlock,
    IntEnable,
    IntDisable,
    DmaEnable,
    DmaOut,
    DmaIn,
    DmaDisable,
    Place,
    Withdraw,
    Mpy,
    Fmp,
    Fdv,
    Fxa,
    Mwa,
    Cmx,
    Cmy,
    Nrm,
    Mrx,
    Mry,
    Mly,
    Drs,
}

/// Condition flags testable by the skip group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFlag {
    Flag,
    Status,
    Halt,
    DecimalCarry,
    Overflow,
    Extend,
}

/// A mnemonic/opcode variant rule.
///
/// Non-suffix rules replace `placeholder` in the template with `zero_ch` or
/// `one_ch` depending on `opcode & bit`. Suffix rules render as `,X` after
/// the operand. A non-zero `condition` gates the rule: it only applies when
/// `opcode & condition != 0`. A space `zero_ch` on a suffix rule means the
/// zero case carries no suffix text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantRule {
    pub bit: u16,
    pub zero_ch: char,
    pub one_ch: char,
    pub condition: u16,
    pub placeholder: char,
    pub suffix: bool,
}

impl VariantRule {
    const fn select(bit: u16, placeholder: char, zero_ch: char, one_ch: char) -> Self {
        Self {
            bit,
            zero_ch,
            one_ch,
            condition: 0,
            placeholder,
            suffix: false,
        }
    }

    const fn suffix(bit: u16, zero_ch: char, one_ch: char, condition: u16) -> Self {
        Self {
            bit,
            zero_ch,
            one_ch,
            condition,
            placeholder: ' ',
            suffix: true,
        }
    }
}

/// One entry of the instruction catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodePattern {
    /// Fixed bits identifying the pattern.
    pub value: u16,
    /// Decode mask: `(opcode & mask) == value` matches.
    pub mask: u16,
    /// Mnemonic template, possibly containing placeholder characters.
    pub template: &'static str,
    /// Operand interpretation.
    pub operand: OperandKind,
    /// Bits of the opcode holding the operand field.
    pub operand_mask: u16,
    /// Variant rules, applied in order.
    pub variants: &'static [VariantRule],
    /// Semantic dispatch tag.
    pub op: Op,
    /// Only legal when assembling for the 16-bit CPU.
    pub only_16bit: bool,
}

const AB: VariantRule = VariantRule::select(0x0800, '~', 'A', 'B');
const AB_SKIP: VariantRule = VariantRule::select(0x0040, '~', 'A', 'B');
const FLAG_HOLD: VariantRule = VariantRule::suffix(0x0040, 'S', 'C', 0x0080);
const RET_POP: VariantRule = VariantRule::suffix(0x0040, ' ', 'P', 0);
const STACK_WB: VariantRule = VariantRule::select(0x0080, '^', 'W', 'B');
const STACK_CD: VariantRule = VariantRule::select(0x0040, '%', 'C', 'D');
const STACK_DIR: VariantRule = VariantRule::suffix(0x0020, 'I', 'D', 0);

const fn pattern(
    value: u16,
    mask: u16,
    template: &'static str,
    operand: OperandKind,
    operand_mask: u16,
    variants: &'static [VariantRule],
    op: Op,
) -> OpcodePattern {
    OpcodePattern {
        value,
        mask,
        template,
        operand,
        operand_mask,
        variants,
        op,
        only_16bit: false,
    }
}

const fn pattern_16(value: u16, mask: u16, template: &'static str, op: Op) -> OpcodePattern {
    OpcodePattern {
        value,
        mask,
        template,
        operand: OperandKind::None,
        operand_mask: 0,
        variants: &[],
        op,
        only_16bit: true,
    }
}

/// The complete catalog, in decode priority order.
pub static PATTERNS: &[OpcodePattern] = &[
    // NOP is listed ahead of the memory-reference group so that opcode 0
    // (which is also "LDA A": load A from register A) disassembles as NOP.
    pattern(0x0000, 0xFFFF, "NOP", OperandKind::None, 0, &[], Op::Nop),
    // Memory-reference group: 4-bit opcode in bits 15-12, A/B select in
    // bit 11 where applicable, 11-bit address field in bits 10-0.
    pattern(0x0000, 0xF000, "LD~", OperandKind::Address, 0x07FF, &[AB], Op::Load),
    pattern(0x1000, 0xF000, "CP~", OperandKind::Address, 0x07FF, &[AB], Op::Compare),
    pattern(0x2000, 0xF000, "AD~", OperandKind::Address, 0x07FF, &[AB], Op::Add),
    pattern(0x3000, 0xF000, "ST~", OperandKind::Address, 0x07FF, &[AB], Op::Store),
    pattern(0x4000, 0xF800, "JSM", OperandKind::Address, 0x07FF, &[], Op::Jsm),
    pattern(0x4800, 0xF800, "ISZ", OperandKind::Address, 0x07FF, &[], Op::Isz),
    pattern(0x5000, 0xF800, "AND", OperandKind::Address, 0x07FF, &[], Op::And),
    pattern(0x5800, 0xF800, "DSZ", OperandKind::Address, 0x07FF, &[], Op::Dsz),
    pattern(0x6000, 0xF800, "IOR", OperandKind::Address, 0x07FF, &[], Op::Ior),
    pattern(0x6800, 0xF800, "JMP", OperandKind::Address, 0x07FF, &[], Op::Jmp),
    // Skip group: 6-bit signed displacement in bits 5-0.
    pattern(0x7000, 0xFF80, "SZ~", OperandKind::Skip, 0x003F, &[AB_SKIP], Op::SkipZero),
    pattern(0x7080, 0xFF80, "RZ~", OperandKind::Skip, 0x003F, &[AB_SKIP], Op::SkipNonzero),
    // The byte-pointer instructions share one bit pattern; declaration order
    // resolves the ambiguity in favor of CBU (see the module docs).
    pattern_16(0x7140, 0xFFFF, "CBU", Op::ByteNop),
    pattern_16(0x7140, 0xFFFF, "DBU", Op::ByteNop),
    pattern_16(0x7140, 0xFFFF, "CBL", Op::ByteNop),
    pattern_16(0x7140, 0xFFFF, "DBL", Op::ByteNop),
    pattern(0x7180, 0xFF80, "SI~", OperandKind::Skip, 0x003F, &[AB_SKIP], Op::SkipZeroInc),
    // Flag skips: bit 7 enables the post-test write-back, bit 6 selects the
    // written value (rendered as the ,S / ,C suffix).
    pattern(0x7200, 0xFF00, "SFS", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Flag, true)),
    pattern(0x7300, 0xFF00, "SFC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Flag, false)),
    pattern(0x7400, 0xFF00, "SSS", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Status, true)),
    pattern(0x7500, 0xFF00, "SSC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Status, false)),
    pattern(0x7600, 0xFF00, "SHS", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Halt, true)),
    pattern(0x7700, 0xFF00, "SHC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Halt, false)),
    pattern(0x7800, 0xFF00, "SDS", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::DecimalCarry, true)),
    pattern(0x7900, 0xFF00, "SDC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::DecimalCarry, false)),
    pattern(0x7A00, 0xFF00, "SOS", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Overflow, true)),
    pattern(0x7B00, 0xFF00, "SOC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Overflow, false)),
    pattern(0x7C00, 0xFF00, "SES", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Extend, true)),
    pattern(0x7D00, 0xFF00, "SEC", OperandKind::Skip, 0x003F, &[FLAG_HOLD], Op::SkipFlag(CpuFlag::Extend, false)),
    pattern(0x7E00, 0xFF80, "RET", OperandKind::SignedValue, 0x003F, &[RET_POP], Op::Ret),
    pattern(0x7F00, 0xFFE0, "EXE", OperandKind::Register, 0x001F, &[], Op::Exe),
    // Shift/rotate group: count-1 in bits 3-0, A/B select in bit 11.
    pattern(0xF000, 0xF7F0, "A~R", OperandKind::Count, 0x000F, &[AB], Op::ShiftArithRight),
    pattern(0xF100, 0xF7F0, "S~R", OperandKind::Count, 0x000F, &[AB], Op::ShiftRight),
    pattern(0xF200, 0xF7F0, "S~L", OperandKind::Count, 0x000F, &[AB], Op::ShiftLeft),
    pattern(0xF300, 0xF7F0, "R~R", OperandKind::Count, 0x000F, &[AB], Op::RotateRight),
    // Block transfer.
    pattern(0xF400, 0xFFF0, "CRL", OperandKind::Count, 0x000F, &[], Op::ClearBlock),
    pattern(0xF410, 0xFFF0, "XFR", OperandKind::Count, 0x000F, &[], Op::TransferBlock),
    // Interrupt / DMA control.
    pattern(0xF420, 0xFFFF, "EIR", OperandKind::None, 0, &[], Op::IntEnable),
    pattern(0xF421, 0xFFFF, "DIR", OperandKind::None, 0, &[], Op::IntDisable),
    pattern(0xF422, 0xFFFF, "DMA", OperandKind::None, 0, &[], Op::DmaEnable),
    pattern(0xF423, 0xFFFF, "SDO", OperandKind::None, 0, &[], Op::DmaOut),
    pattern(0xF424, 0xFFFF, "SDI", OperandKind::None, 0, &[], Op::DmaIn),
    pattern(0xF425, 0xFFFF, "DDR", OperandKind::None, 0, &[], Op::DmaDisable),
    // Place/withdraw stack operations: word/byte in bit 7, C/D pointer in
    // bit 6, increment/decrement suffix in bit 5, register in bits 4-0.
    pattern(0xF500, 0xFF00, "P^%", OperandKind::Register, 0x001F, &[STACK_WB, STACK_CD, STACK_DIR], Op::Place),
    pattern(0xF600, 0xFF00, "W^%", OperandKind::Register, 0x001F, &[STACK_WB, STACK_CD, STACK_DIR], Op::Withdraw),
    // Decimal math group.
    pattern(0xF700, 0xFFFF, "MPY", OperandKind::None, 0, &[], Op::Mpy),
    pattern(0xF701, 0xFFFF, "FMP", OperandKind::None, 0, &[], Op::Fmp),
    pattern(0xF702, 0xFFFF, "FDV", OperandKind::None, 0, &[], Op::Fdv),
    pattern(0xF703, 0xFFFF, "FXA", OperandKind::None, 0, &[], Op::Fxa),
    pattern(0xF704, 0xFFFF, "MWA", OperandKind::None, 0, &[], Op::Mwa),
    pattern(0xF705, 0xFFFF, "CMX", OperandKind::None, 0, &[], Op::Cmx),
    pattern(0xF706, 0xFFFF, "CMY", OperandKind::None, 0, &[], Op::Cmy),
    pattern(0xF707, 0xFFFF, "NRM", OperandKind::None, 0, &[], Op::Nrm),
    pattern(0xF708, 0xFFFF, "MRX", OperandKind::None, 0, &[], Op::Mrx),
    pattern(0xF709, 0xFFFF, "MRY", OperandKind::None, 0, &[], Op::Mry),
    pattern(0xF70A, 0xFFFF, "MLY", OperandKind::None, 0, &[], Op::Mly),
    pattern(0xF70B, 0xFFFF, "DRS", OperandKind::None, 0, &[], Op::Drs),
];

/// Finds the first pattern matching `opcode`, in declaration order.
pub fn base_pattern(opcode: u16) -> Option<&'static OpcodePattern> {
    PATTERNS.iter().find(|p| opcode & p.mask == p.value)
}

/// A concrete mnemonic produced by expanding a pattern's variant rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Fully substituted mnemonic (e.g. "LDB").
    pub mnemonic: String,
    /// Pattern value with this version's variant bits set.
    pub value: u16,
    /// The pattern this version came from.
    pub pattern: &'static OpcodePattern,
}

impl OpcodePattern {
    /// Expands the cross-product of the pattern's non-suffix variant rules
    /// into concrete `(mnemonic, opcode)` versions.
    pub fn versions(&'static self) -> Vec<Version> {
        let selects: Vec<&VariantRule> = self.variants.iter().filter(|r| !r.suffix).collect();
        let mut out = Vec::with_capacity(1 << selects.len());
        for combo in 0..(1u32 << selects.len()) {
            let mut mnemonic = String::from(self.template);
            let mut value = self.value;
            for (i, rule) in selects.iter().enumerate() {
                let set = combo & (1 << i) != 0;
                let ch = if set { rule.one_ch } else { rule.zero_ch };
                mnemonic = mnemonic.replace(rule.placeholder, &ch.to_string());
                if set {
                    value |= rule.bit;
                }
            }
            out.push(Version {
                mnemonic,
                value,
                pattern: self,
            });
        }
        out
    }
}

/// All versions of all patterns, in catalog order. Built once on first use.
pub fn all_versions() -> &'static [Version] {
    static VERSIONS: OnceLock<Vec<Version>> = OnceLock::new();
    VERSIONS.get_or_init(|| PATTERNS.iter().flat_map(|p| p.versions()).collect())
}

/// Looks up a typed mnemonic (already upper-cased) across every catalog
/// version. First match in catalog order wins.
pub fn version_for_mnemonic(mnemonic: &str) -> Option<&'static Version> {
    all_versions().iter().find(|v| v.mnemonic == mnemonic)
}
