//! Identifier scanning and normalization.

use super::cursor::Cursor;
use crate::token::{Keyword, TokenKind};

/// First code point of the Mathematical Alphanumeric Symbols letter styles.
pub const MATH_ALPHA_START: u32 = 0x1D400;
/// Last letter code point of the Mathematical Alphanumeric Symbols block.
pub const MATH_ALPHA_END: u32 = 0x1D6A3;
const MATH_DIGIT_START: u32 = 0x1D7CE;
const MATH_DIGIT_END: u32 = 0x1D7FF;

/// Whether `c` may start an identifier.
#[must_use]
pub fn is_id_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

/// Whether `c` may continue an identifier.
#[must_use]
pub fn is_id_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Fold a styled mathematical letter or digit to its ASCII base.
///
/// Python normalizes identifiers with NFKC; for the mathematical
/// alphanumeric block that folding is a fixed offset table.
#[must_use]
pub fn fold_math_alphanumeric(c: char) -> char {
    let cp = c as u32;
    if (MATH_ALPHA_START..=MATH_ALPHA_END).contains(&cp) {
        let letter = (cp - MATH_ALPHA_START) % 52;
        let base = if letter < 26 { b'A' as u32 + letter } else { b'a' as u32 + letter - 26 };
        return char::from_u32(base).unwrap_or(c);
    }
    if (MATH_DIGIT_START..=MATH_DIGIT_END).contains(&cp) {
        return char::from_u32(b'0' as u32 + (cp - MATH_DIGIT_START) % 10).unwrap_or(c);
    }
    c
}

/// Normalize an identifier the way the Python tokenizer does for the
/// characters shroud itself emits.
#[must_use]
pub fn normalize_identifier(name: &str) -> String {
    if name.is_ascii() {
        return name.to_string();
    }
    name.chars().map(fold_math_alphanumeric).collect()
}

/// Scan an identifier or keyword whose first character was consumed.
pub fn parse_identifier(cursor: &mut Cursor<'_>, first: char) -> TokenKind {
    let mut name = String::new();
    name.push(first);
    while is_id_continue(cursor.first()) && !cursor.is_eof() {
        if let Some(c) = cursor.bump() {
            name.push(c);
        }
    }
    match Keyword::from_str(&name) {
        Some(kw) => TokenKind::Keyword(kw),
        None => TokenKind::Ident(normalize_identifier(&name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_sans_serif_bold() {
        // MATHEMATICAL SANS-SERIF BOLD SMALL A
        assert_eq!(fold_math_alphanumeric('\u{1D5EE}'), 'a');
        // MATHEMATICAL SANS-SERIF BOLD ITALIC CAPITAL Z
        assert_eq!(fold_math_alphanumeric('\u{1D655}'), 'Z');
    }

    #[test]
    fn test_ascii_untouched() {
        assert_eq!(normalize_identifier("plain_name1"), "plain_name1");
    }

    #[test]
    fn test_keyword() {
        let mut c = Cursor::new("lse");
        assert_eq!(parse_identifier(&mut c, 'e'), TokenKind::Keyword(Keyword::Else));
    }
}
