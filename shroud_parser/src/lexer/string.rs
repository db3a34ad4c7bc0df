//! String, bytes and f-string literal scanning.

use super::cursor::Cursor;
use crate::token::TokenKind;

/// Prefix flags of a string literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringPrefix {
    /// `r` / `R`
    pub raw: bool,
    /// `b` / `B`
    pub bytes: bool,
    /// `f` / `F`
    pub fstring: bool,
    /// `u` / `U`
    pub unicode: bool,
}

impl StringPrefix {
    /// Build a prefix from its characters.
    #[must_use]
    pub fn from_chars(chars: &str) -> Self {
        let mut p = Self::default();
        for c in chars.chars() {
            match c.to_ascii_lowercase() {
                'r' => p.raw = true,
                'b' => p.bytes = true,
                'f' => p.fstring = true,
                'u' => p.unicode = true,
                _ => {}
            }
        }
        p
    }

    /// Whether the combination is legal Python.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !(self.bytes && self.fstring) && !(self.unicode && (self.raw || self.bytes || self.fstring))
    }
}

/// Whether `c` can start a string prefix.
#[must_use]
pub fn is_string_prefix(c: char) -> bool {
    matches!(c, 'r' | 'R' | 'b' | 'B' | 'f' | 'F' | 'u' | 'U')
}

/// Scan a string literal; the cursor sits on the opening quote.
pub fn parse_string(cursor: &mut Cursor<'_>, prefix: StringPrefix) -> TokenKind {
    let Some(quote) = cursor.bump() else {
        return TokenKind::Error("unterminated string literal".to_string());
    };
    let triple = cursor.first() == quote && cursor.second() == quote;
    if triple {
        cursor.bump();
        cursor.bump();
    }

    let mut body = String::new();
    loop {
        if cursor.is_eof() {
            return TokenKind::Error("unterminated string literal".to_string());
        }
        let c = cursor.first();
        if c == quote {
            if !triple {
                cursor.bump();
                break;
            }
            if cursor.second() == quote && cursor.third() == quote {
                cursor.bump();
                cursor.bump();
                cursor.bump();
                break;
            }
        }
        if (c == '\n' || c == '\r') && !triple {
            return TokenKind::Error("unterminated string literal".to_string());
        }
        cursor.bump();
        body.push(c);
        if c == '\\' && !cursor.is_eof() {
            if let Some(next) = cursor.bump() {
                body.push(next);
            }
        }
    }

    if prefix.fstring {
        return TokenKind::FString {
            body,
            raw: prefix.raw,
        };
    }
    if prefix.bytes {
        return match decode_bytes(&body, prefix.raw) {
            Ok(b) => TokenKind::Bytes(b),
            Err(msg) => TokenKind::Error(msg),
        };
    }
    if prefix.raw {
        return TokenKind::String(body);
    }
    match decode_escapes(&body) {
        Ok(s) => TokenKind::String(s),
        Err(msg) => TokenKind::Error(msg),
    }
}

/// Decode backslash escapes of a (non-raw) string body.
pub fn decode_escapes(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        match e {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut v = e.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            v = v * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(v).ok_or("invalid octal escape")?);
            }
            'x' | 'u' | 'U' => {
                let n = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..n).filter_map(|_| chars.next()).collect();
                let v = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == n)
                    .ok_or_else(|| format!("truncated \\{e} escape"))?;
                out.push(char::from_u32(v).ok_or_else(|| format!("invalid \\{e} escape"))?);
            }
            'N' => return Err("named unicode escapes are not supported".to_string()),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn decode_bytes(body: &str, raw: bool) -> Result<Vec<u8>, String> {
    if body.chars().any(|c| !c.is_ascii()) {
        return Err("bytes can only contain ASCII literal characters".to_string());
    }
    if raw {
        return Ok(body.as_bytes().to_vec());
    }
    let mut out = Vec::with_capacity(body.len());
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' || i >= bytes.len() {
            out.push(b);
            continue;
        }
        let e = bytes[i];
        i += 1;
        match e {
            b'\n' => {}
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut v = u32::from(e - b'0');
                for _ in 0..2 {
                    if i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                        v = v * 8 + u32::from(bytes[i] - b'0');
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push((v & 0xFF) as u8);
            }
            b'x' => {
                let hex = body.get(i..i + 2).ok_or("truncated \\x escape")?;
                let v = u8::from_str_radix(hex, 16).map_err(|_| "invalid \\x escape".to_string())?;
                out.push(v);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str, prefix: &str) -> TokenKind {
        let mut c = Cursor::new(s);
        parse_string(&mut c, StringPrefix::from_chars(prefix))
    }

    #[test]
    fn test_simple() {
        assert_eq!(lit("'abc'", ""), TokenKind::String("abc".into()));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            lit(r#""a\nb\x41é\101""#, ""),
            TokenKind::String("a\nbAéA".into())
        );
    }

    #[test]
    fn test_raw_keeps_backslashes() {
        assert_eq!(lit(r"'a\n'", "r"), TokenKind::String(r"a\n".into()));
    }

    #[test]
    fn test_triple_quoted() {
        assert_eq!(
            lit("'''x\n'y'\n'''", ""),
            TokenKind::String("x\n'y'\n".into())
        );
    }

    #[test]
    fn test_bytes() {
        assert_eq!(lit(r"b'\x00\xffa'", "b"), TokenKind::Bytes(vec![0, 255, b'a']));
    }

    #[test]
    fn test_fstring_body_is_raw_text() {
        assert_eq!(
            lit(r"f'a{x!r:>{w}}\n'", "f"),
            TokenKind::FString {
                body: r"a{x!r:>{w}}\n".into(),
                raw: false
            }
        );
    }

    #[test]
    fn test_unterminated() {
        assert!(matches!(lit("'abc", ""), TokenKind::Error(_)));
    }

    #[test]
    fn test_prefix_validity() {
        assert!(StringPrefix::from_chars("rb").is_valid());
        assert!(!StringPrefix::from_chars("bf").is_valid());
    }
}
