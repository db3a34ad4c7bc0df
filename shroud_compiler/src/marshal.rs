//! `marshal` serialization of code units (format version 4, 3.11 layout).

use crate::bytecode::{CodeUnit, Constant};
use shroud_core::{ShroudError, ShroudResult};

const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_ELLIPSIS: u8 = b'.';
const TYPE_INT: u8 = b'i';
const TYPE_LONG: u8 = b'l';
const TYPE_BINARY_FLOAT: u8 = b'g';
const TYPE_BINARY_COMPLEX: u8 = b'y';
const TYPE_STRING: u8 = b's';
const TYPE_TUPLE: u8 = b'(';
const TYPE_SMALL_TUPLE: u8 = b')';
const TYPE_CODE: u8 = b'c';
const TYPE_UNICODE: u8 = b'u';
const TYPE_ASCII: u8 = b'a';
const TYPE_SHORT_ASCII: u8 = b'z';

const LONG_SHIFT: u32 = 15;
const LONG_BASE: u32 = 1 << LONG_SHIFT;

/// Serialize a code unit as `marshal.dumps(code)` would.
pub fn dumps(code: &CodeUnit) -> ShroudResult<Vec<u8>> {
    let mut w = Writer::default();
    w.code(code)?;
    Ok(w.out)
}

#[derive(Default)]
struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn byte(&mut self, b: u8) {
        self.out.push(b);
    }

    fn long(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn size(&mut self, n: usize) -> ShroudResult<()> {
        let n = i32::try_from(n).map_err(|_| ShroudError::serialize("<code>", "object too large to marshal"))?;
        self.long(n);
        Ok(())
    }

    fn bytes(&mut self, data: &[u8]) -> ShroudResult<()> {
        self.byte(TYPE_STRING);
        self.size(data.len())?;
        self.out.extend_from_slice(data);
        Ok(())
    }

    fn str(&mut self, s: &str) -> ShroudResult<()> {
        if s.is_ascii() {
            if let Ok(n) = u8::try_from(s.len()) {
                self.byte(TYPE_SHORT_ASCII);
                self.byte(n);
            } else {
                self.byte(TYPE_ASCII);
                self.size(s.len())?;
            }
        } else {
            self.byte(TYPE_UNICODE);
            self.size(s.len())?;
        }
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn tuple_header(&mut self, n: usize) -> ShroudResult<()> {
        match u8::try_from(n) {
            Ok(n) => {
                self.byte(TYPE_SMALL_TUPLE);
                self.byte(n);
                Ok(())
            }
            Err(_) => {
                self.byte(TYPE_TUPLE);
                self.size(n)
            }
        }
    }

    fn str_tuple<'a>(&mut self, items: impl ExactSizeIterator<Item = &'a str>) -> ShroudResult<()> {
        self.tuple_header(items.len())?;
        for s in items {
            self.str(s)?;
        }
        Ok(())
    }

    fn int(&mut self, v: i64) {
        match i32::try_from(v) {
            Ok(small) => {
                self.byte(TYPE_INT);
                self.long(small);
            }
            Err(_) => {
                let digits = digits_of_u128(u128::from(v.unsigned_abs()));
                self.long_digits(v < 0, &digits);
            }
        }
    }

    fn long_digits(&mut self, negative: bool, digits: &[u16]) {
        self.byte(TYPE_LONG);
        let n = digits.len() as i32;
        self.long(if negative { -n } else { n });
        for d in digits {
            self.out.extend_from_slice(&d.to_le_bytes());
        }
    }

    fn constant(&mut self, value: &Constant) -> ShroudResult<()> {
        match value {
            Constant::None => self.byte(TYPE_NONE),
            Constant::Bool(true) => self.byte(TYPE_TRUE),
            Constant::Bool(false) => self.byte(TYPE_FALSE),
            Constant::Ellipsis => self.byte(TYPE_ELLIPSIS),
            Constant::Int(v) => self.int(*v),
            Constant::BigInt(text) => {
                let (negative, digits) = parse_decimal(text)?;
                self.long_digits(negative, &digits);
            }
            Constant::Float(v) => {
                self.byte(TYPE_BINARY_FLOAT);
                self.out.extend_from_slice(&v.to_le_bytes());
            }
            Constant::Complex { real, imag } => {
                self.byte(TYPE_BINARY_COMPLEX);
                self.out.extend_from_slice(&real.to_le_bytes());
                self.out.extend_from_slice(&imag.to_le_bytes());
            }
            Constant::Str(s) => self.str(s)?,
            Constant::Bytes(b) => self.bytes(b)?,
            Constant::Tuple(items) => {
                self.tuple_header(items.len())?;
                for item in items {
                    self.constant(item)?;
                }
            }
            Constant::Code(code) => self.code(code)?,
        }
        Ok(())
    }

    fn code(&mut self, code: &CodeUnit) -> ShroudResult<()> {
        self.byte(TYPE_CODE);
        for v in [
            code.argcount,
            code.posonlyargcount,
            code.kwonlyargcount,
            code.stacksize,
            code.flags.bits(),
        ] {
            self.long(v as i32);
        }
        self.bytes(&code.code)?;
        self.tuple_header(code.consts.len())?;
        for c in &code.consts {
            self.constant(c)?;
        }
        self.str_tuple(code.names.iter().map(String::as_str))?;
        let slots = code.localsplus();
        self.str_tuple(slots.iter().map(|(name, _)| *name))?;
        let kinds: Vec<u8> = slots.iter().map(|(_, kind)| *kind).collect();
        self.bytes(&kinds)?;
        self.str(&code.filename)?;
        self.str(&code.name)?;
        self.str(&code.qualname)?;
        self.long(code.firstlineno as i32);
        self.bytes(&code.linetable)?;
        self.bytes(&code.exceptiontable)
    }
}

/// Base-2**15 digits, least significant first.
fn digits_of_u128(mut v: u128) -> Vec<u16> {
    let mut digits = Vec::new();
    while v > 0 {
        digits.push((v % u128::from(LONG_BASE)) as u16);
        v /= u128::from(LONG_BASE);
    }
    digits
}

/// Convert signed decimal text into a sign and base-2**15 digits.
fn parse_decimal(text: &str) -> ShroudResult<(bool, Vec<u16>)> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut digits: Vec<u16> = Vec::new();
    for c in body.chars().filter(|c| *c != '_') {
        let d = c
            .to_digit(10)
            .ok_or_else(|| ShroudError::serialize("<code>", format!("invalid integer literal {text:?}")))?;
        let mut carry = d;
        for digit in &mut digits {
            let v = u32::from(*digit) * 10 + carry;
            *digit = (v % LONG_BASE) as u16;
            carry = v / LONG_BASE;
        }
        while carry > 0 {
            digits.push((carry % LONG_BASE) as u16);
            carry /= LONG_BASE;
        }
    }
    Ok((negative && !digits.is_empty(), digits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeFlags;

    fn dump_const(c: &Constant) -> Vec<u8> {
        let mut w = Writer::default();
        w.constant(c).unwrap();
        w.out
    }

    #[test]
    fn test_small_values() {
        assert_eq!(dump_const(&Constant::None), b"N");
        assert_eq!(dump_const(&Constant::Int(1)), b"i\x01\x00\x00\x00");
        assert_eq!(dump_const(&Constant::Str("ab".into())), b"z\x02ab");
        assert_eq!(dump_const(&Constant::Str("\u{e9}".into())), b"u\x02\x00\x00\x00\xc3\xa9");
        assert_eq!(dump_const(&Constant::Bytes(vec![7])), b"s\x01\x00\x00\x00\x07");
        assert_eq!(
            dump_const(&Constant::Tuple(vec![Constant::None, Constant::Bool(true)])),
            b")\x02NT"
        );
    }

    #[test]
    fn test_long_digits() {
        // 2**31 = 2 * 2**30: digits [0, 0, 2]
        assert_eq!(
            dump_const(&Constant::Int(1 << 31)),
            b"l\x03\x00\x00\x00\x00\x00\x00\x00\x02\x00"
        );
        assert_eq!(
            dump_const(&Constant::BigInt("-2147483648".into())),
            b"l\xfd\xff\xff\xff\x00\x00\x00\x00\x02\x00"
        );
    }

    #[test]
    fn test_parse_decimal_matches_native() {
        let (neg, digits) = parse_decimal("123456789012345678901234567890").unwrap();
        assert!(!neg);
        assert_eq!(digits, digits_of_u128(123_456_789_012_345_678_901_234_567_890));
        assert!(parse_decimal("12a").is_err());
    }

    #[test]
    fn test_code_layout_prefix() {
        let code = CodeUnit {
            argcount: 1,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 1,
            stacksize: 2,
            flags: CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS,
            code: vec![151, 0],
            consts: vec![Constant::None],
            names: vec![],
            varnames: vec!["x".into()],
            filename: "f".into(),
            name: "g".into(),
            qualname: "g".into(),
            firstlineno: 1,
            linetable: vec![],
            exceptiontable: vec![],
            freevars: vec![],
            cellvars: vec![],
        };
        let out = dumps(&code).unwrap();
        assert_eq!(out[0], b'c');
        assert_eq!(&out[1..5], &1i32.to_le_bytes());
        assert_eq!(&out[17..21], &3i32.to_le_bytes());
        assert_eq!(&out[21..28], b"s\x02\x00\x00\x00\x97\x00");
        // consts, names, localsplusnames, localspluskinds
        assert_eq!(&out[28..43], b")\x01N)\x00)\x01z\x01xs\x01\x00\x00\x00");
        assert_eq!(out[43], 0x20);
    }
}
