//! Operand expression parsing and evaluation.
//!
//! An operand expression is a signed chain of terms split on `+`, `-`, and
//! whitespace. Each term is one of:
//!
//! * a numeral (decimal, or octal with a trailing `B`),
//! * `*`, the location counter at the start of the current line,
//! * a bare register name (`A`, `B`, `P`, `R`, ...), which contributes the
//!   register's index, or
//! * a label reference.
//!
//! Expressions referencing labels that have not resolved yet evaluate to
//! `None`; the assembler queues those records for relocation instead of
//! failing.

use crate::assembler::labels::LabelManager;
use crate::assembler::{is_valid_label, AsmErrorKind};
use crate::registers::Register;

/// One term of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Literal(i64),
    Register(u16),
    Location,
    Label(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprTerm {
    pub negate: bool,
    pub node: ExprNode,
}

/// A parsed operand expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    terms: Vec<ExprTerm>,
}

impl Expression {
    /// Parses the text of an operand field.
    pub fn parse(text: &str) -> Result<Self, AsmErrorKind> {
        let mut terms = Vec::new();
        let mut negate = false;
        let mut sign_seen = false;
        let mut current = String::new();

        let mut flush =
            |current: &mut String, negate: &mut bool, sign_seen: &mut bool, terms: &mut Vec<ExprTerm>| -> Result<(), AsmErrorKind> {
                if !current.is_empty() {
                    let node = classify(current)?;
                    terms.push(ExprTerm {
                        negate: *negate,
                        node,
                    });
                    current.clear();
                    *negate = false;
                    *sign_seen = false;
                }
                Ok(())
            };

        for ch in text.chars() {
            match ch {
                '+' | '-' => {
                    flush(&mut current, &mut negate, &mut sign_seen, &mut terms)?;
                    if sign_seen {
                        return Err(AsmErrorKind::SyntaxError(text.to_string()));
                    }
                    negate = ch == '-';
                    sign_seen = true;
                }
                c if c.is_whitespace() => {
                    flush(&mut current, &mut negate, &mut sign_seen, &mut terms)?;
                }
                _ => current.push(ch),
            }
        }
        flush(&mut current, &mut negate, &mut sign_seen, &mut terms)?;

        if sign_seen {
            // Trailing operator with no term after it.
            return Err(AsmErrorKind::SyntaxError(text.to_string()));
        }
        if terms.is_empty() {
            return Err(AsmErrorKind::MissingArguments);
        }
        Ok(Self { terms })
    }

    /// Evaluates the expression. `None` means a referenced label has no value
    /// yet, or the location counter was needed but unknown.
    pub fn evaluate(&self, labels: &LabelManager, location: Option<u16>) -> Option<i64> {
        let mut total = 0i64;
        for term in &self.terms {
            let value = match &term.node {
                ExprNode::Literal(v) => *v,
                ExprNode::Register(index) => i64::from(*index),
                ExprNode::Location => i64::from(location?),
                ExprNode::Label(name) => i64::from(labels.lookup(name)?),
            };
            if term.negate {
                total -= value;
            } else {
                total += value;
            }
        }
        Some(total)
    }

    /// The names of every label the expression references.
    pub fn label_names(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter_map(|t| match &t.node {
                ExprNode::Label(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the expression is a single bare register name.
    pub fn single_register(&self) -> Option<u16> {
        match self.terms.as_slice() {
            [ExprTerm {
                negate: false,
                node: ExprNode::Register(index),
            }] => Some(*index),
            _ => None,
        }
    }

    /// Whether any referenced label is still without a value.
    pub fn has_unresolved(&self, labels: &LabelManager) -> bool {
        self.label_names()
            .iter()
            .any(|name| labels.lookup(name).is_none())
    }
}

fn classify(token: &str) -> Result<ExprNode, AsmErrorKind> {
    if token == "*" {
        return Ok(ExprNode::Location);
    }
    let folded = token.to_ascii_uppercase();
    if let Some(index) = Register::index_from_name(&folded) {
        return Ok(ExprNode::Register(index));
    }
    if folded.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(ExprNode::Literal(parse_number(&folded)?));
    }
    if is_valid_label(&folded) {
        return Ok(ExprNode::Label(folded));
    }
    Err(AsmErrorKind::SyntaxError(token.to_string()))
}

/// Parses a numeral: decimal by default, octal with a trailing `B`.
pub fn parse_number(text: &str) -> Result<i64, AsmErrorKind> {
    let (digits, radix) = match text.strip_suffix(['B', 'b']) {
        Some(rest) => (rest, 8),
        None => (text, 10),
    };
    if digits.is_empty() {
        return Err(AsmErrorKind::InvalidNumeral(text.to_string()));
    }
    let value = i64::from_str_radix(digits, radix)
        .map_err(|_| AsmErrorKind::InvalidNumeral(text.to_string()))?;
    if value.unsigned_abs() > 0xFFFF {
        return Err(AsmErrorKind::IntegerOverflow(text.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelManager {
        let mut l = LabelManager::new(false);
        l.define("LOOP", 0x0040).unwrap();
        l
    }

    #[test]
    fn test_parse_literal() {
        let e = Expression::parse("40B").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(0o40));
    }

    #[test]
    fn test_parse_decimal() {
        let e = Expression::parse("100").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(100));
    }

    #[test]
    fn test_register_node() {
        let e = Expression::parse("A").unwrap();
        assert_eq!(e.single_register(), Some(0));
        assert_eq!(e.evaluate(&labels(), None), Some(0));
        let e = Expression::parse("B").unwrap();
        assert_eq!(e.single_register(), Some(1));
    }

    #[test]
    fn test_location_node() {
        let e = Expression::parse("*+2").unwrap();
        assert_eq!(e.evaluate(&labels(), Some(0x100)), Some(0x102));
        assert_eq!(e.evaluate(&labels(), None), None);
    }

    #[test]
    fn test_label_chain() {
        let e = Expression::parse("LOOP+3").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(0x43));
        let e = Expression::parse("LOOP-1").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(0x3F));
    }

    #[test]
    fn test_unresolved_label() {
        let e = Expression::parse("LATER+1").unwrap();
        assert_eq!(e.evaluate(&labels(), None), None);
        assert!(e.has_unresolved(&labels()));
        assert_eq!(e.label_names(), vec!["LATER"]);
    }

    #[test]
    fn test_leading_minus() {
        let e = Expression::parse("-5").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(-5));
    }

    #[test]
    fn test_double_sign_rejected() {
        assert!(Expression::parse("1--2").is_err());
        assert!(Expression::parse("1+").is_err());
    }

    #[test]
    fn test_empty_is_missing_arguments() {
        assert!(matches!(
            Expression::parse("   "),
            Err(AsmErrorKind::MissingArguments)
        ));
    }

    #[test]
    fn test_octal_numeral() {
        assert_eq!(parse_number("1744B").unwrap(), 0o1744);
        assert_eq!(parse_number("177777B").unwrap(), 0xFFFF);
        assert!(parse_number("8B").is_err());
        assert!(parse_number("200000B").is_err());
    }

    #[test]
    fn test_case_folding() {
        let e = Expression::parse("loop").unwrap();
        assert_eq!(e.evaluate(&labels(), None), Some(0x40));
    }
}
