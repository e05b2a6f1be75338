//! HP 9800 assembler.
//!
//! Converts assembly source into a sequence of [`AssemblyRecord`]s, each
//! tied to its source line and (where it emits code) to an absolute address.
//! Parsing is single-pass: forward label references leave the operand word
//! unencoded and queue a fixup with the [`labels::LabelManager`];
//! [`Assembler::finalize`] replays those fixups until everything settles.
//!
//! A source line is `[label] mnemonic [operand[,suffix]] [comment]`, or a
//! full-line comment starting with `*`. Labels are 1-5 characters drawn from
//! letters, digits, and the punctuation set `! / $ " ? % # @ & .`, must not
//! start with a digit, and may not shadow a register name.

pub mod expr;
pub mod labels;

use std::fmt;

use thiserror::Error;

use crate::addressing::{encode_address, encode_signed_6};
use crate::float::FloatingPointNumber;
use crate::opcodes::{version_for_mnemonic, OpcodePattern, OperandKind};
use crate::registers::Register;
use expr::Expression;
use labels::LabelManager;

/// Where a record or error came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRef {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmErrorKind {
    #[error("line contains only a label")]
    LabelOnly,
    #[error("invalid label `{0}`")]
    InvalidLabel(String),
    #[error("label `{0}` is a reserved register name")]
    LabelUsesReservedName(String),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
    #[error("value of `{0}` must be known here")]
    ValueUndefined(String),
    #[error("ORR without a preceding ORG")]
    OrrMissingOrg,
    #[error("data emitted before any ORG set the location counter")]
    DataWithoutLocation,
    #[error("`{0}` is not valid for the selected CPU")]
    InvalidPerCpuMode(String),
    #[error("invalid suffix `,{0}`")]
    InvalidSuffix(String),
    #[error("numeral `{0}` overflows 16 bits")]
    IntegerOverflow(String),
    #[error("missing arguments")]
    MissingArguments,
    #[error("value {0} out of range {1}..={2}")]
    ValueOutOfRange(i64, i64, i64),
    #[error("directive requires a label")]
    MissingLabel,
    #[error("instruction emitted before any ORG set the location counter")]
    InstructionWithoutLocation,
    #[error("address {0:#06X} is not reachable from this location")]
    AddressOutOfRange(u16),
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("{0} is not a register index")]
    InvalidRegister(i64),
    #[error("syntax error near `{0}`")]
    SyntaxError(String),
    #[error("invalid numeral `{0}`")]
    InvalidNumeral(String),
    #[error("labels cannot be resolved: {0}")]
    RelocationRecursion(String),
    #[error("input after END")]
    InputAfterEnd,
    #[error("source ended without END")]
    MissingEnd,
    #[error("REP must be followed by a repeatable line")]
    RepMalformed,
    #[error("conditional assembly blocks cannot nest")]
    InvalidConditionalNesting,
}

/// An assembly failure, tagged with the offending source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{at}: {kind}")]
pub struct AsmError {
    pub kind: AsmErrorKind,
    pub at: SourceRef,
}

/// Checks the label grammar: 1-5 characters, no leading digit, letters,
/// digits, and the permitted punctuation set. Expects upper-cased input.
pub fn is_valid_label(name: &str) -> bool {
    const SPECIALS: &str = "!/$\"?%#@&.";
    if name.is_empty() || name.len() > 5 {
        return false;
    }
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !(first.is_ascii_uppercase() || SPECIALS.contains(first)) {
        return false;
    }
    name.chars()
        .skip(1)
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || SPECIALS.contains(c))
}

/// Index of a record in the [`RecordStore`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHandle(usize);

/// Listing-control directives that emit no code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    /// LST: resume listing.
    ListOn,
    /// UNL: stop listing.
    ListOff,
    /// SUP: suppress expanded lines in the listing.
    SuppressOn,
    /// UNS: stop suppressing.
    SuppressOff,
    /// SKP: advance the listing to the next page.
    SkipPage,
    /// SPC n: insert n blank listing lines.
    Space(u16),
    /// IFN / IFZ: start of a conditional block (`true` = assembled).
    CondStart(bool),
    /// XIF: end of a conditional block.
    CondEnd,
    /// REP n: repeat the next line n times.
    Repeat(u16),
}

/// The coded part of an instruction record. `word` stays `None` while the
/// operand waits on an unresolved label.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionBody {
    pub pattern: &'static OpcodePattern,
    /// Version value with any suffix bits already set.
    pub base: u16,
    pub operand: Option<Expression>,
    pub word: Option<u16>,
}

/// What a source line assembled to.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    /// Blank line or full-line comment.
    Comment,
    /// ORG or ORR; the record's address is the new location counter.
    Org,
    /// EQU; `value` settles during relocation when deferred.
    Equ {
        expression: Expression,
        value: Option<u16>,
    },
    /// BSS: reserve `count` words without initializing them.
    Bss { count: u16 },
    /// OCT, DEC, or ASC data words.
    Data { words: Vec<u16> },
    /// DEF: one address word, bit 15 set when `,I` requested indirection.
    Def {
        expression: Expression,
        indirect: bool,
        word: Option<u16>,
    },
    /// ABS: one absolute value word.
    Abs {
        expression: Expression,
        word: Option<u16>,
    },
    Instruction(InstructionBody),
    Control(ControlKind),
    /// HED: listing page heading.
    Heading(String),
    End,
}

impl RecordBody {
    /// Words of memory the record occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            RecordBody::Bss { count } => *count,
            RecordBody::Data { words } => words.len() as u16,
            RecordBody::Def { .. } | RecordBody::Abs { .. } => 1,
            RecordBody::Instruction(_) => 1,
            _ => 0,
        }
    }

    /// Whether REP may repeat this record.
    fn repeatable(&self) -> bool {
        matches!(
            self,
            RecordBody::Data { .. }
                | RecordBody::Def { .. }
                | RecordBody::Abs { .. }
                | RecordBody::Instruction(_)
        )
    }
}

/// One assembled source line.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyRecord {
    pub source: SourceRef,
    /// Address of the record's first word, when it has one.
    pub address: Option<u16>,
    pub label: Option<String>,
    pub comment: Option<String>,
    /// Set on the extra copies a REP expansion appends.
    pub from_expansion: bool,
    pub body: RecordBody,
}

impl AssemblyRecord {
    /// The initialized words the record contributes to the memory image.
    /// BSS reserves space but emits nothing.
    pub fn words(&self) -> Vec<u16> {
        match &self.body {
            RecordBody::Data { words } => words.clone(),
            RecordBody::Def { word, .. } | RecordBody::Abs { word, .. } => {
                word.map(|w| vec![w]).unwrap_or_default()
            }
            RecordBody::Instruction(body) => body.word.map(|w| vec![w]).unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Arena of assembled records, addressed by [`RecordHandle`].
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<AssemblyRecord>,
}

impl RecordStore {
    pub fn push(&mut self, record: AssemblyRecord) -> RecordHandle {
        self.records.push(record);
        RecordHandle(self.records.len() - 1)
    }

    pub fn get(&self, handle: RecordHandle) -> &AssemblyRecord {
        &self.records[handle.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssemblyRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-encodes a queued record against the current label values. A record
    /// whose expression still has unresolved labels is left alone; another
    /// fixup in the queue covers it.
    pub(crate) fn patch(
        &mut self,
        handle: RecordHandle,
        labels: &LabelManager,
    ) -> Result<(), AsmError> {
        let record = &mut self.records[handle.0];
        let at = record.source.clone();
        let address = record.address;
        match &mut record.body {
            RecordBody::Instruction(body) => {
                let expression = match &body.operand {
                    Some(e) => e,
                    None => return Ok(()),
                };
                if let Some(value) = expression.evaluate(labels, address) {
                    let encoded = encode_operand(
                        body.pattern.operand,
                        body.pattern.operand_mask,
                        body.base,
                        value,
                        address,
                        labels.use_16bit(),
                    )
                    .map_err(|kind| AsmError { kind, at })?;
                    body.word = Some(encoded);
                }
            }
            RecordBody::Def {
                expression,
                indirect,
                word,
            } => {
                if let Some(value) = expression.evaluate(labels, address) {
                    let max = if labels.use_16bit() { 0xFFFF } else { 0x7FFF };
                    if !(0..=max).contains(&value) {
                        return Err(AsmError {
                            kind: AsmErrorKind::ValueOutOfRange(value, 0, max),
                            at,
                        });
                    }
                    let mut w = value as u16;
                    if *indirect {
                        w |= 0x8000;
                    }
                    *word = Some(w);
                }
            }
            RecordBody::Abs { expression, word } => {
                if let Some(value) = expression.evaluate(labels, address) {
                    if value.unsigned_abs() > 0xFFFF {
                        return Err(AsmError {
                            kind: AsmErrorKind::ValueOutOfRange(value, -0xFFFF, 0xFFFF),
                            at,
                        });
                    }
                    *word = Some(value as u16);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluates a deferred EQU's expression, if it can be now.
    pub(crate) fn equ_value(&self, handle: RecordHandle, labels: &LabelManager) -> Option<u16> {
        let record = &self.records[handle.0];
        match &record.body {
            RecordBody::Equ { expression, .. } => expression
                .evaluate(labels, record.address)
                .map(|v| v as u16),
            _ => None,
        }
    }

    pub(crate) fn set_equ_value(&mut self, handle: RecordHandle, value: u16) {
        if let RecordBody::Equ {
            value: stored_value,
            ..
        } = &mut self.records[handle.0].body
        {
            *stored_value = Some(value);
        }
    }

    /// Source line of the first handle, for error reporting.
    pub(crate) fn source_of_first(
        &self,
        mut handles: impl Iterator<Item = RecordHandle>,
    ) -> SourceRef {
        handles
            .next()
            .map(|h| self.records[h.0].source.clone())
            .unwrap_or_default()
    }
}

/// Encodes an evaluated operand into an opcode word.
fn encode_operand(
    kind: OperandKind,
    operand_mask: u16,
    base: u16,
    value: i64,
    address: Option<u16>,
    use_16bit: bool,
) -> Result<u16, AsmErrorKind> {
    match kind {
        OperandKind::None => Ok(base),
        OperandKind::Count => {
            if !(1..=16).contains(&value) {
                return Err(AsmErrorKind::ValueOutOfRange(value, 1, 16));
            }
            Ok(base | (((value - 1) as u16) & operand_mask))
        }
        OperandKind::Register => {
            if !(0..=31).contains(&value) {
                return Err(AsmErrorKind::InvalidRegister(value));
            }
            Ok(base | ((value as u16) & operand_mask))
        }
        OperandKind::Skip => {
            // The operand names an absolute target; the field stores the
            // displacement from this instruction.
            let at = address.ok_or(AsmErrorKind::InstructionWithoutLocation)?;
            let delta = value - i64::from(at);
            let field =
                encode_signed_6(delta).ok_or(AsmErrorKind::ValueOutOfRange(delta, -32, 31))?;
            Ok(base | field)
        }
        OperandKind::SignedValue => {
            let field =
                encode_signed_6(value).ok_or(AsmErrorKind::ValueOutOfRange(value, -32, 31))?;
            Ok(base | field)
        }
        OperandKind::Address => {
            let at = address.ok_or(AsmErrorKind::InstructionWithoutLocation)?;
            let max = if use_16bit { 0xFFFF } else { 0x7FFF };
            if !(0..=max).contains(&value) {
                return Err(AsmErrorKind::ValueOutOfRange(value, 0, max));
            }
            let field = encode_address(value as u16, at, use_16bit)?;
            Ok(base | field)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CondBlock {
    None,
    /// Inside an assembled IFN/IFZ block.
    Active,
    /// Inside a skipped IFN/IFZ block.
    Suppressing,
}

/// Single-pass assembler with deferred relocation.
///
/// # Examples
///
/// ```
/// use lib9800::assembler::Assembler;
///
/// let mut asm = Assembler::new(false);
/// asm.parse_source(
///     "demo.asm",
///     concat!(
///         "       ORG 100B\n",
///         "START  LDA COUNT\n",
///         "COUNT  OCT 17\n",
///         "       END\n",
///     ),
/// )
/// .unwrap();
/// asm.finalize().unwrap();
/// let out = asm.output();
/// assert_eq!(out[0].0, 0o100);
/// ```
#[derive(Debug)]
pub struct Assembler {
    labels: LabelManager,
    store: RecordStore,
    location: Option<u16>,
    /// Location saved by the most recent ORG, for ORR.
    org_return: Option<u16>,
    ended: bool,
    condition_flag: bool,
    cond: CondBlock,
    pending_rep: Option<u16>,
    use_16bit: bool,
}

impl Assembler {
    /// Creates an assembler. `use_16bit` selects the 16-bit CPU's address
    /// space and enables its byte-pointer instructions.
    pub fn new(use_16bit: bool) -> Self {
        Self {
            labels: LabelManager::new(use_16bit),
            store: RecordStore::default(),
            location: None,
            org_return: None,
            ended: false,
            condition_flag: false,
            cond: CondBlock::None,
            pending_rep: None,
            use_16bit,
        }
    }

    /// Sets the flag tested by IFN and IFZ. Must be called before the
    /// conditional block is parsed.
    pub fn set_condition_flag(&mut self, value: bool) {
        self.condition_flag = value;
    }

    pub fn labels(&self) -> &LabelManager {
        &self.labels
    }

    pub fn records(&self) -> &RecordStore {
        &self.store
    }

    /// Location counter after the last parsed line.
    pub fn location(&self) -> Option<u16> {
        self.location
    }

    /// Parses every line of `source` in order.
    pub fn parse_source(&mut self, file: &str, source: &str) -> Result<(), AsmError> {
        for (index, line) in source.lines().enumerate() {
            self.parse_line(file, index as u32 + 1, line)?;
        }
        Ok(())
    }

    /// Parses one source line, appending its record (and any REP expansion
    /// copies) to the store. Lines suppressed by a false conditional return
    /// `None`.
    pub fn parse_line(
        &mut self,
        file: &str,
        line: u32,
        text: &str,
    ) -> Result<Option<RecordHandle>, AsmError> {
        let at = SourceRef {
            file: file.to_string(),
            line,
        };
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };

        let text = text.trim_end();

        // Blank lines and full-line comments pass through everywhere, even
        // after END and inside suppressed conditional blocks.
        if text.is_empty() || text.starts_with('*') {
            if self.cond == CondBlock::Suppressing {
                return Ok(None);
            }
            let comment = text.strip_prefix('*').map(|c| c.trim().to_string());
            let handle = self.store.push(AssemblyRecord {
                source: at,
                address: None,
                label: None,
                comment,
                from_expansion: false,
                body: RecordBody::Comment,
            });
            return Ok(Some(handle));
        }

        // Field split: a label only when the line starts in column one.
        let mut rest = text;
        let mut label_token: Option<&str> = None;
        if !rest.starts_with(char::is_whitespace) {
            let (token, r) = split_token(rest);
            label_token = Some(token);
            rest = r;
        }
        let rest = rest.trim_start();
        if rest.is_empty() {
            return Err(err(AsmErrorKind::LabelOnly));
        }
        let (mnemonic_token, rest) = split_token(rest);
        let mnemonic = mnemonic_token.to_ascii_uppercase();
        let rest = rest.trim_start();

        // Conditional block state transitions come first so that suppressed
        // regions never define labels or advance the location counter.
        if self.cond == CondBlock::Suppressing {
            return match mnemonic.as_str() {
                "XIF" => {
                    self.cond = CondBlock::None;
                    let handle = self.push_control(at, None, ControlKind::CondEnd);
                    Ok(Some(handle))
                }
                "IFN" | "IFZ" => Err(err(AsmErrorKind::InvalidConditionalNesting)),
                _ => Ok(None),
            };
        }

        if self.ended {
            return Err(err(AsmErrorKind::InputAfterEnd));
        }

        match mnemonic.as_str() {
            "IFN" | "IFZ" => {
                if self.cond != CondBlock::None {
                    return Err(err(AsmErrorKind::InvalidConditionalNesting));
                }
                let wanted = mnemonic == "IFN";
                let assembled = self.condition_flag == wanted;
                self.cond = if assembled {
                    CondBlock::Active
                } else {
                    CondBlock::Suppressing
                };
                let handle = self.push_control(at, None, ControlKind::CondStart(assembled));
                return Ok(Some(handle));
            }
            "XIF" => {
                if self.cond == CondBlock::None {
                    return Err(err(AsmErrorKind::InvalidConditionalNesting));
                }
                self.cond = CondBlock::None;
                let handle = self.push_control(at, None, ControlKind::CondEnd);
                return Ok(Some(handle));
            }
            _ => {}
        }

        // Validate the label's shape now; binding happens per directive.
        let label = match label_token {
            Some(token) => {
                let folded = token.to_ascii_uppercase();
                if Register::index_from_name(&folded).is_some() {
                    return Err(err(AsmErrorKind::LabelUsesReservedName(folded)));
                }
                if !is_valid_label(&folded) {
                    return Err(err(AsmErrorKind::InvalidLabel(token.to_string())));
                }
                Some(folded)
            }
            None => None,
        };

        let handle = match mnemonic.as_str() {
            "ORG" => self.parse_org(at, label, rest)?,
            "ORR" => self.parse_orr(at, label)?,
            "EQU" => self.parse_equ(at, label, rest)?,
            "BSS" => self.parse_bss(at, label, rest)?,
            "OCT" => self.parse_oct(at, label, rest)?,
            "DEC" => self.parse_dec(at, label, rest)?,
            "ASC" => self.parse_asc(at, label, rest)?,
            "DEF" => self.parse_def(at, label, rest)?,
            "ABS" => self.parse_abs(at, label, rest)?,
            "REP" => self.parse_rep(at, label, rest)?,
            "END" => {
                self.bind_label(&at, &label, self.location)?;
                self.ended = true;
                self.store.push(AssemblyRecord {
                    source: at,
                    address: self.location,
                    label,
                    comment: non_empty(rest),
                    from_expansion: false,
                    body: RecordBody::End,
                })
            }
            "HED" => {
                self.reject_label(&at, &label)?;
                self.store.push(AssemblyRecord {
                    source: at,
                    address: None,
                    label: None,
                    comment: None,
                    from_expansion: false,
                    body: RecordBody::Heading(rest.to_string()),
                })
            }
            "SPC" => {
                self.reject_label(&at, &label)?;
                let count = self.immediate_value(&at, rest)?;
                if !(0..=64).contains(&count) {
                    return Err(err(AsmErrorKind::ValueOutOfRange(count, 0, 64)));
                }
                self.push_control(at, None, ControlKind::Space(count as u16))
            }
            "LST" => self.simple_control(at, label, ControlKind::ListOn)?,
            "UNL" => self.simple_control(at, label, ControlKind::ListOff)?,
            "SUP" => self.simple_control(at, label, ControlKind::SuppressOn)?,
            "UNS" => self.simple_control(at, label, ControlKind::SuppressOff)?,
            "SKP" => self.simple_control(at, label, ControlKind::SkipPage)?,
            _ => self.parse_instruction(at, label, &mnemonic, rest)?,
        };
        Ok(Some(handle))
    }

    /// Declares END seen and replays deferred relocations.
    pub fn finalize(&mut self) -> Result<(), AsmError> {
        if !self.ended {
            let at = self
                .store
                .records
                .last()
                .map(|r| r.source.clone())
                .unwrap_or_default();
            return Err(AsmError {
                kind: AsmErrorKind::MissingEnd,
                at,
            });
        }
        self.labels.relocate(&mut self.store)
    }

    /// The assembled image as `(address, word)` pairs, in record order.
    pub fn output(&self) -> Vec<(u16, u16)> {
        let mut out = Vec::new();
        for record in self.store.iter() {
            if let Some(address) = record.address {
                for (offset, word) in record.words().into_iter().enumerate() {
                    out.push((address.wrapping_add(offset as u16), word));
                }
            }
        }
        out
    }

    fn push_control(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        kind: ControlKind,
    ) -> RecordHandle {
        self.store.push(AssemblyRecord {
            source: at,
            address: None,
            label,
            comment: None,
            from_expansion: false,
            body: RecordBody::Control(kind),
        })
    }

    fn simple_control(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        kind: ControlKind,
    ) -> Result<RecordHandle, AsmError> {
        self.reject_label(&at, &label)?;
        Ok(self.push_control(at, None, kind))
    }

    fn reject_label(&self, at: &SourceRef, label: &Option<String>) -> Result<(), AsmError> {
        match label {
            Some(name) => Err(AsmError {
                kind: AsmErrorKind::InvalidLabel(name.clone()),
                at: at.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Binds a positional label to an address.
    fn bind_label(
        &mut self,
        at: &SourceRef,
        label: &Option<String>,
        address: Option<u16>,
    ) -> Result<(), AsmError> {
        if let Some(name) = label {
            let address = address.ok_or_else(|| AsmError {
                kind: AsmErrorKind::DataWithoutLocation,
                at: at.clone(),
            })?;
            self.labels.define(name, address).map_err(|kind| AsmError {
                kind,
                at: at.clone(),
            })?;
        }
        Ok(())
    }

    /// Evaluates an expression that must resolve immediately.
    fn immediate_value(&self, at: &SourceRef, text: &str) -> Result<i64, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let (field, _) = split_token(text);
        if field.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        let expression = Expression::parse(field).map_err(err)?;
        expression
            .evaluate(&self.labels, self.location)
            .ok_or_else(|| err(AsmErrorKind::ValueUndefined(field.to_string())))
    }

    fn address_max(&self) -> i64 {
        if self.use_16bit {
            0xFFFF
        } else {
            0x7FFF
        }
    }

    fn parse_org(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let value = self.immediate_value(&at, rest)?;
        if !(0..=self.address_max()).contains(&value) {
            return Err(AsmError {
                kind: AsmErrorKind::ValueOutOfRange(value, 0, self.address_max()),
                at,
            });
        }
        self.org_return = self.location;
        self.location = Some(value as u16);
        self.bind_label(&at, &label, self.location)?;
        Ok(self.store.push(AssemblyRecord {
            source: at,
            address: self.location,
            label,
            comment: None,
            from_expansion: false,
            body: RecordBody::Org,
        }))
    }

    fn parse_orr(&mut self, at: SourceRef, label: Option<String>) -> Result<RecordHandle, AsmError> {
        let restored = self.org_return.take().ok_or_else(|| AsmError {
            kind: AsmErrorKind::OrrMissingOrg,
            at: at.clone(),
        })?;
        self.location = Some(restored);
        self.bind_label(&at, &label, self.location)?;
        Ok(self.store.push(AssemblyRecord {
            source: at,
            address: self.location,
            label,
            comment: None,
            from_expansion: false,
            body: RecordBody::Org,
        }))
    }

    fn parse_equ(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let name = label.ok_or_else(|| err(AsmErrorKind::MissingLabel))?;
        let (field, comment) = split_token(rest);
        if field.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        let expression = Expression::parse(field).map_err(&err)?;
        let value = expression.evaluate(&self.labels, self.location);
        let handle = self.store.push(AssemblyRecord {
            source: at.clone(),
            address: self.location,
            label: Some(name.clone()),
            comment: non_empty(comment),
            from_expansion: false,
            body: RecordBody::Equ {
                expression,
                value: value.map(|v| v as u16),
            },
        });
        match value {
            Some(v) => {
                if v.unsigned_abs() > 0xFFFF {
                    return Err(err(AsmErrorKind::ValueOutOfRange(v, -0xFFFF, 0xFFFF)));
                }
                self.labels.define(&name, v as u16).map_err(err)?;
            }
            None => self.labels.declare_deferred(&name, handle).map_err(err)?,
        }
        Ok(handle)
    }

    fn parse_bss(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let address = self.require_location(&at, AsmErrorKind::DataWithoutLocation)?;
        self.bind_label(&at, &label, Some(address))?;
        let count = self.immediate_value(&at, rest)?;
        if !(0..=self.address_max() + 1).contains(&count) {
            return Err(AsmError {
                kind: AsmErrorKind::ValueOutOfRange(count, 0, self.address_max() + 1),
                at,
            });
        }
        let record = AssemblyRecord {
            source: at.clone(),
            address: Some(address),
            label,
            comment: None,
            from_expansion: false,
            body: RecordBody::Bss {
                count: count as u16,
            },
        };
        self.commit(at, record, Vec::new())
    }

    fn parse_oct(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let mut words = Vec::new();
        for token in split_list(rest) {
            let (negative, digits) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let digits = digits.strip_suffix(['B', 'b']).unwrap_or(digits);
            let magnitude = i64::from_str_radix(digits, 8)
                .map_err(|_| err(AsmErrorKind::InvalidNumeral(token.to_string())))?;
            if magnitude > 0xFFFF {
                return Err(err(AsmErrorKind::IntegerOverflow(token.to_string())));
            }
            let value = if negative { -magnitude } else { magnitude };
            words.push(value as u16);
        }
        if words.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        self.data_record(at, label, words)
    }

    fn parse_dec(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let tokens: Vec<&str> = split_list(rest);
        if tokens.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        // Any fractional or exponent form makes the whole line full-precision
        // BCD records, four words per value.
        let fractional = tokens
            .iter()
            .any(|t| t.contains('.') || t.contains(['e', 'E']));
        let mut words = Vec::new();
        if fractional {
            for token in tokens {
                let number = FloatingPointNumber::parse(token)
                    .map_err(|_| err(AsmErrorKind::InvalidNumeral(token.to_string())))?;
                words.extend_from_slice(&number.words());
            }
        } else {
            for token in tokens {
                let value: i64 = token
                    .parse()
                    .map_err(|_| err(AsmErrorKind::InvalidNumeral(token.to_string())))?;
                if value.unsigned_abs() > 0xFFFF {
                    return Err(err(AsmErrorKind::IntegerOverflow(token.to_string())));
                }
                words.push(value as u16);
            }
        }
        self.data_record(at, label, words)
    }

    fn parse_asc(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let (count_text, text) = match rest.split_once(',') {
            Some(pair) => pair,
            None => return Err(err(AsmErrorKind::MissingArguments)),
        };
        let expression = Expression::parse(count_text).map_err(&err)?;
        let count = expression
            .evaluate(&self.labels, self.location)
            .ok_or_else(|| err(AsmErrorKind::ValueUndefined(count_text.trim().to_string())))?;
        if !(1..=32).contains(&count) {
            return Err(err(AsmErrorKind::ValueOutOfRange(count, 1, 32)));
        }
        // Two characters per word, taken verbatim and space-padded.
        let mut chars = text.chars();
        let mut words = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let hi = chars.next().unwrap_or(' ');
            let lo = chars.next().unwrap_or(' ');
            if !hi.is_ascii() || !lo.is_ascii() {
                return Err(err(AsmErrorKind::SyntaxError(text.to_string())));
            }
            words.push(((hi as u16) << 8) | (lo as u16));
        }
        self.data_record(at, label, words)
    }

    fn data_record(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        words: Vec<u16>,
    ) -> Result<RecordHandle, AsmError> {
        let address = self.require_location(&at, AsmErrorKind::DataWithoutLocation)?;
        self.bind_label(&at, &label, Some(address))?;
        let record = AssemblyRecord {
            source: at.clone(),
            address: Some(address),
            label,
            comment: None,
            from_expansion: false,
            body: RecordBody::Data { words },
        };
        self.commit(at, record, Vec::new())
    }

    fn parse_def(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let address = self.require_location(&at, AsmErrorKind::DataWithoutLocation)?;
        self.bind_label(&at, &label, Some(address))?;
        let (operand, comment) = split_operand(rest);
        if operand.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        let (field, indirect) = match operand.split_once(',') {
            Some((field, option)) => {
                if !option.eq_ignore_ascii_case("I") {
                    return Err(err(AsmErrorKind::InvalidSuffix(option.to_string())));
                }
                (field, true)
            }
            None => (operand.as_str(), false),
        };
        let expression = Expression::parse(field).map_err(&err)?;
        let unresolved = unresolved_labels(&expression, &self.labels);
        let word = if unresolved.is_empty() {
            let value = expression
                .evaluate(&self.labels, Some(address))
                .ok_or_else(|| err(AsmErrorKind::ValueUndefined(field.to_string())))?;
            if !(0..=self.address_max()).contains(&value) {
                return Err(err(AsmErrorKind::ValueOutOfRange(value, 0, self.address_max())));
            }
            let mut w = value as u16;
            if indirect {
                w |= 0x8000;
            }
            Some(w)
        } else {
            None
        };
        let record = AssemblyRecord {
            source: at.clone(),
            address: Some(address),
            label,
            comment: non_empty(comment),
            from_expansion: false,
            body: RecordBody::Def {
                expression,
                indirect,
                word,
            },
        };
        self.commit(at, record, unresolved)
    }

    fn parse_abs(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let address = self.require_location(&at, AsmErrorKind::DataWithoutLocation)?;
        self.bind_label(&at, &label, Some(address))?;
        let (field, comment) = split_operand(rest);
        if field.is_empty() {
            return Err(err(AsmErrorKind::MissingArguments));
        }
        let expression = Expression::parse(&field).map_err(&err)?;
        let unresolved = unresolved_labels(&expression, &self.labels);
        let word = if unresolved.is_empty() {
            let value = expression
                .evaluate(&self.labels, Some(address))
                .ok_or_else(|| err(AsmErrorKind::ValueUndefined(field.to_string())))?;
            if value.unsigned_abs() > 0xFFFF {
                return Err(err(AsmErrorKind::ValueOutOfRange(value, -0xFFFF, 0xFFFF)));
            }
            Some(value as u16)
        } else {
            None
        };
        let record = AssemblyRecord {
            source: at.clone(),
            address: Some(address),
            label,
            comment: non_empty(comment),
            from_expansion: false,
            body: RecordBody::Abs { expression, word },
        };
        self.commit(at, record, unresolved)
    }

    fn parse_rep(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        self.reject_label(&at, &label)?;
        if self.pending_rep.is_some() {
            return Err(AsmError {
                kind: AsmErrorKind::RepMalformed,
                at,
            });
        }
        let count = self.immediate_value(&at, rest)?;
        if !(1..=256).contains(&count) {
            return Err(AsmError {
                kind: AsmErrorKind::RepMalformed,
                at,
            });
        }
        self.pending_rep = Some(count as u16);
        Ok(self.push_control(at, None, ControlKind::Repeat(count as u16)))
    }

    fn parse_instruction(
        &mut self,
        at: SourceRef,
        label: Option<String>,
        mnemonic: &str,
        rest: &str,
    ) -> Result<RecordHandle, AsmError> {
        let err = |kind: AsmErrorKind| AsmError {
            kind,
            at: at.clone(),
        };
        let version = version_for_mnemonic(mnemonic)
            .ok_or_else(|| err(AsmErrorKind::UnknownMnemonic(mnemonic.to_string())))?;
        let pattern = version.pattern;
        if pattern.only_16bit && !self.use_16bit {
            return Err(err(AsmErrorKind::InvalidPerCpuMode(mnemonic.to_string())));
        }
        let address = self.require_location(&at, AsmErrorKind::InstructionWithoutLocation)?;
        self.bind_label(&at, &label, Some(address))?;

        let mut base = version.value;
        let mut operand = None;
        let mut word = None;
        let mut unresolved = Vec::new();
        let comment;

        if pattern.operand == OperandKind::None {
            comment = non_empty(rest);
            word = Some(base);
        } else {
            let (operand_token, trailing) = split_operand(rest);
            if operand_token.is_empty() {
                return Err(err(AsmErrorKind::MissingArguments));
            }
            comment = non_empty(trailing);
            let mut parts = operand_token.split(',');
            let field = parts.next().unwrap_or("");
            for suffix in parts {
                base |= resolve_suffix(pattern, suffix).map_err(&err)?;
            }
            let expression = Expression::parse(field).map_err(&err)?;
            unresolved = unresolved_labels(&expression, &self.labels);
            if unresolved.is_empty() {
                let value = expression
                    .evaluate(&self.labels, Some(address))
                    .ok_or_else(|| err(AsmErrorKind::ValueUndefined(field.to_string())))?;
                word = Some(
                    encode_operand(
                        pattern.operand,
                        pattern.operand_mask,
                        base,
                        value,
                        Some(address),
                        self.use_16bit,
                    )
                    .map_err(&err)?,
                );
            }
            operand = Some(expression);
        }

        let record = AssemblyRecord {
            source: at.clone(),
            address: Some(address),
            label,
            comment,
            from_expansion: false,
            body: RecordBody::Instruction(InstructionBody {
                pattern,
                base,
                operand,
                word,
            }),
        };
        self.commit(at, record, unresolved)
    }

    fn require_location(&self, at: &SourceRef, kind: AsmErrorKind) -> Result<u16, AsmError> {
        self.location.ok_or_else(|| AsmError {
            kind,
            at: at.clone(),
        })
    }

    /// Pushes a record, advances the location counter, queues relocation
    /// fixups, and expands a pending REP.
    fn commit(
        &mut self,
        at: SourceRef,
        record: AssemblyRecord,
        unresolved: Vec<String>,
    ) -> Result<RecordHandle, AsmError> {
        let rep = self.pending_rep.take();
        if rep.is_some() && !record.body.repeatable() {
            return Err(AsmError {
                kind: AsmErrorKind::RepMalformed,
                at,
            });
        }

        let step = record.body.word_count();
        let template = record.clone();
        let handle = self.store.push(record);
        for name in &unresolved {
            self.labels.register_relocation(name, handle);
        }
        self.advance_location(&at, step)?;

        for _ in 1..rep.unwrap_or(1) {
            let address = self.require_location(&at, AsmErrorKind::DataWithoutLocation)?;
            let mut copy = template.clone();
            copy.address = Some(address);
            copy.label = None;
            copy.from_expansion = true;
            // Address operands re-encode per copy; the page window moves
            // with the instruction.
            if let RecordBody::Instruction(body) = &mut copy.body {
                if let Some(expression) = &body.operand {
                    if unresolved.is_empty() {
                        let value = expression
                            .evaluate(&self.labels, Some(address))
                            .ok_or_else(|| AsmError {
                                kind: AsmErrorKind::ValueUndefined(String::new()),
                                at: at.clone(),
                            })?;
                        body.word = Some(
                            encode_operand(
                                body.pattern.operand,
                                body.pattern.operand_mask,
                                body.base,
                                value,
                                Some(address),
                                self.use_16bit,
                            )
                            .map_err(|kind| AsmError {
                                kind,
                                at: at.clone(),
                            })?,
                        );
                    } else {
                        body.word = None;
                    }
                }
            }
            let copy_handle = self.store.push(copy);
            for name in &unresolved {
                self.labels.register_relocation(name, copy_handle);
            }
            self.advance_location(&at, step)?;
        }
        Ok(handle)
    }

    fn advance_location(&mut self, at: &SourceRef, step: u16) -> Result<(), AsmError> {
        if step == 0 {
            return Ok(());
        }
        let location = self.require_location(at, AsmErrorKind::DataWithoutLocation)?;
        let next = i64::from(location) + i64::from(step);
        if next > self.address_max() + 1 {
            return Err(AsmError {
                kind: AsmErrorKind::AddressOutOfRange(location),
                at: at.clone(),
            });
        }
        self.location = Some(next as u16);
        Ok(())
    }
}

/// Matches one comma suffix against a pattern's suffix rules, returning the
/// opcode bits it contributes.
fn resolve_suffix(pattern: &OpcodePattern, suffix: &str) -> Result<u16, AsmErrorKind> {
    let folded = suffix.trim().to_ascii_uppercase();
    let mut chars = folded.chars();
    let (ch, extra) = (chars.next(), chars.next());
    if let (Some(ch), None) = (ch, extra) {
        for rule in pattern.variants.iter().filter(|r| r.suffix) {
            if ch == rule.one_ch {
                return Ok(rule.condition | rule.bit);
            }
            if ch == rule.zero_ch {
                return Ok(rule.condition);
            }
        }
    }
    Err(AsmErrorKind::InvalidSuffix(suffix.to_string()))
}

fn unresolved_labels(expression: &Expression, labels: &LabelManager) -> Vec<String> {
    expression
        .label_names()
        .into_iter()
        .filter(|name| labels.lookup(name).is_none())
        .map(str::to_string)
        .collect()
}

fn split_token(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(index) => (&text[..index], &text[index..]),
        None => (text, ""),
    }
}

/// Cuts the operand field off `text`. The field normally ends at the first
/// whitespace, but an expression continues across spaces around `+`, `-`,
/// and `,`, so `LDA LOOP + 3` and `LDA LOOP+3` read the same.
fn split_operand(text: &str) -> (String, &str) {
    let (first, mut rest) = split_token(text);
    let mut field = first.to_string();
    loop {
        let (token, tail) = split_token(rest.trim_start());
        if token.is_empty() {
            break;
        }
        let continues = field.ends_with(['+', '-', ',']) || token.starts_with(['+', '-', ',']);
        if !continues {
            break;
        }
        field.push_str(token);
        rest = tail;
    }
    (field, rest)
}

fn split_list(text: &str) -> Vec<&str> {
    // The value list ends at the first whitespace; the rest is comment.
    let (list, _) = split_token(text.trim_start());
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
