//! Numeric literal scanning.

use super::cursor::Cursor;
use crate::token::TokenKind;

/// Scan a numeric literal whose first character has been consumed.
pub fn parse_number(cursor: &mut Cursor<'_>, first: char) -> TokenKind {
    if first == '0' {
        let radix = match cursor.first() {
            'x' | 'X' => Some(16),
            'o' | 'O' => Some(8),
            'b' | 'B' => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            cursor.bump();
            let mut digits = String::new();
            while cursor.first().is_digit(radix) || cursor.first() == '_' {
                if let Some(c) = cursor.bump() {
                    if c != '_' {
                        digits.push(c);
                    }
                }
            }
            if digits.is_empty() {
                return TokenKind::Error("invalid numeric literal".to_string());
            }
            return int_token(&digits, radix);
        }
    }

    let mut text = String::new();
    let mut is_float = false;
    if first == '.' {
        text.push_str("0.");
        is_float = true;
    } else {
        text.push(first);
    }
    scan_digits(cursor, &mut text);

    if !is_float && cursor.first() == '.' && cursor.second() != '.' {
        cursor.bump();
        text.push('.');
        is_float = true;
        scan_digits(cursor, &mut text);
    }

    if matches!(cursor.first(), 'e' | 'E')
        && (cursor.second().is_ascii_digit()
            || (matches!(cursor.second(), '+' | '-') && cursor.third().is_ascii_digit()))
    {
        cursor.bump();
        text.push('e');
        if matches!(cursor.first(), '+' | '-') {
            if let Some(sign) = cursor.bump() {
                text.push(sign);
            }
        }
        scan_digits(cursor, &mut text);
        is_float = true;
    }

    if matches!(cursor.first(), 'j' | 'J') {
        cursor.bump();
        return match text.parse::<f64>() {
            Ok(v) => TokenKind::Imaginary(v),
            Err(_) => TokenKind::Error(format!("invalid imaginary literal '{text}'")),
        };
    }

    if is_float {
        return match text.parse::<f64>() {
            Ok(v) => TokenKind::Float(v),
            Err(_) => TokenKind::Error(format!("invalid float literal '{text}'")),
        };
    }

    if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
        return TokenKind::Error("leading zeros in decimal integer literals are not permitted".into());
    }
    int_token(&text, 10)
}

fn scan_digits(cursor: &mut Cursor<'_>, out: &mut String) {
    while cursor.first().is_ascii_digit() || (cursor.first() == '_' && cursor.second().is_ascii_digit()) {
        if let Some(c) = cursor.bump() {
            if c != '_' {
                out.push(c);
            }
        }
    }
}

fn int_token(digits: &str, radix: u32) -> TokenKind {
    match i64::from_str_radix(digits, radix) {
        Ok(v) => TokenKind::Int(v),
        Err(_) => TokenKind::BigInt(digits_to_decimal(digits, radix)),
    }
}

/// Convert an unsigned digit string in `radix` to decimal digits.
#[must_use]
pub fn digits_to_decimal(digits: &str, radix: u32) -> String {
    // Little-endian base-10^9 limbs.
    const LIMB: u64 = 1_000_000_000;
    let mut limbs: Vec<u64> = vec![0];
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { continue };
        let mut carry = u64::from(d);
        for limb in &mut limbs {
            let v = *limb * u64::from(radix) + carry;
            *limb = v % LIMB;
            carry = v / LIMB;
        }
        while carry > 0 {
            limbs.push(carry % LIMB);
            carry /= LIMB;
        }
    }
    let mut out = String::new();
    for (i, limb) in limbs.iter().rev().enumerate() {
        if i == 0 {
            out.push_str(&limb.to_string());
        } else {
            out.push_str(&format!("{limb:09}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> TokenKind {
        let mut c = Cursor::new(s);
        let first = c.bump().unwrap();
        parse_number(&mut c, first)
    }

    #[test]
    fn test_decimal() {
        assert_eq!(num("1_000"), TokenKind::Int(1000));
    }

    #[test]
    fn test_radix_prefixes() {
        assert_eq!(num("0xff"), TokenKind::Int(255));
        assert_eq!(num("0o17"), TokenKind::Int(15));
        assert_eq!(num("0b101"), TokenKind::Int(5));
    }

    #[test]
    fn test_float_forms() {
        assert_eq!(num("1.5"), TokenKind::Float(1.5));
        assert_eq!(num(".25"), TokenKind::Float(0.25));
        assert_eq!(num("1e3"), TokenKind::Float(1000.0));
        assert_eq!(num("2."), TokenKind::Float(2.0));
    }

    #[test]
    fn test_imaginary() {
        assert_eq!(num("3j"), TokenKind::Imaginary(3.0));
    }

    #[test]
    fn test_big_int() {
        assert_eq!(
            num("123456789012345678901234567890"),
            TokenKind::BigInt("123456789012345678901234567890".into())
        );
        assert_eq!(
            num("0xffffffffffffffffff"),
            TokenKind::BigInt("4722366482869645213695".into())
        );
    }

    #[test]
    fn test_zero() {
        assert_eq!(num("0"), TokenKind::Int(0));
        assert_eq!(num("00"), TokenKind::Int(0));
    }
}
