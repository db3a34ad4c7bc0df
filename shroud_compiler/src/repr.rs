//! Python `repr` of constant values.
//!
//! The encrypted launcher derives its key from `repr()` of a code unit's
//! parts at run time, so the host-side rendering must agree with the
//! interpreter byte for byte for every value the key covers.

use crate::bytecode::Constant;
use std::fmt::Write;

/// `repr(value)` as Python 3.11 prints it.
#[must_use]
pub fn py_repr(value: &Constant) -> String {
    match value {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(v) => v.to_string(),
        Constant::BigInt(digits) => digits.clone(),
        Constant::Float(v) => float_repr(*v),
        Constant::Complex { real, imag } => complex_repr(*real, *imag),
        Constant::Str(s) => str_repr(s),
        Constant::Bytes(b) => shroud_parser::unparse::repr_bytes(b),
        Constant::Ellipsis => "Ellipsis".to_string(),
        Constant::Tuple(items) => {
            let mut out = String::from("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&py_repr(item));
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
            out
        }
        Constant::Code(code) => format!("<code object {}>", code.name),
    }
}

/// `repr(float)`: shortest round-tripping digits, fixed notation for
/// decimal exponents in `[-4, 16)`, scientific otherwise.
#[must_use]
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{v:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        let point = exp + 1;
        if point <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', (-point) as usize));
            out.push_str(&digits);
        } else {
            let point = point as usize;
            if digits.len() <= point {
                out.push_str(&digits);
                out.extend(std::iter::repeat_n('0', point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exp.abs());
    }
    out
}

fn complex_part(v: f64) -> String {
    let s = float_repr(v);
    match s.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}

fn complex_repr(real: f64, imag: f64) -> String {
    if real == 0.0 && real.is_sign_positive() {
        return format!("{}j", complex_part(imag));
    }
    let imag_part = complex_part(imag);
    let sign = if imag_part.starts_with('-') { "" } else { "+" };
    format!("({}{sign}{imag_part}j)", complex_part(real))
}

/// `repr(str)`.
#[must_use]
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            c if (c as u32) < 0x80 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if is_printable(c) => out.push(c),
            c => {
                let code = c as u32;
                let _ = match code {
                    0..=0xFF => write!(out, "\\x{code:02x}"),
                    0x100..=0xFFFF => write!(out, "\\u{code:04x}"),
                    _ => write!(out, "\\U{code:08x}"),
                };
            }
        }
    }
    out.push(quote);
    out
}

/// Approximation of `str.isprintable` for non-ASCII characters: separators,
/// controls, format characters and private-use code points are not
/// printable.
fn is_printable(c: char) -> bool {
    let code = c as u32;
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(
        code,
        0xAD | 0x600..=0x605
            | 0x61C
            | 0x6DD
            | 0x70F
            | 0x180E
            | 0x200B..=0x200F
            | 0x202A..=0x202E
            | 0x2060..=0x206F
            | 0xE000..=0xF8FF
            | 0xFEFF
            | 0xFFF9..=0xFFFB
            | 0xF0000..
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, "1.0")]
    #[case(-0.0, "-0.0")]
    #[case(0.1, "0.1")]
    #[case(123.456, "123.456")]
    #[case(1e16, "1e+16")]
    #[case(1.5e-5, "1.5e-05")]
    #[case(0.0001, "0.0001")]
    #[case(1e15, "1000000000000000.0")]
    #[case(f64::INFINITY, "inf")]
    fn test_float_repr(#[case] v: f64, #[case] expected: &str) {
        assert_eq!(float_repr(v), expected);
    }

    #[rstest]
    #[case("abc", "'abc'")]
    #[case("what'cha looking for?", "\"what'cha looking for?\"")]
    #[case("a'b\"c", "'a\\'b\"c'")]
    #[case("\t\n\x00\x7f", "'\\t\\n\\x00\\x7f'")]
    #[case("caf\u{e9}", "'caf\u{e9}'")]
    #[case("\u{a0}", "'\\xa0'")]
    #[case("\u{200b}", "'\\u200b'")]
    fn test_str_repr(#[case] s: &str, #[case] expected: &str) {
        assert_eq!(str_repr(s), expected);
    }

    #[test]
    fn test_container_reprs() {
        let one = Constant::Tuple(vec![Constant::Int(1)]);
        assert_eq!(py_repr(&one), "(1,)");
        let two = Constant::Tuple(vec![Constant::None, Constant::Str("x".into())]);
        assert_eq!(py_repr(&two), "(None, 'x')");
        assert_eq!(py_repr(&Constant::Tuple(vec![])), "()");
        assert_eq!(py_repr(&Constant::Bytes(b"\x00a".to_vec())), "b'\\x00a'");
    }

    #[test]
    fn test_complex_repr() {
        assert_eq!(complex_repr(0.0, 2.0), "2j");
        assert_eq!(complex_repr(1.0, -2.5), "(1-2.5j)");
        assert_eq!(complex_repr(1.5, 2.0), "(1.5+2j)");
    }
}
