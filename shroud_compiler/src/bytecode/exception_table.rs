//! Exception table encoding.
//!
//! Each entry is four varints: start, length, handler target (all in code
//! units, i.e. byte offsets divided by two) and `depth << 1 | lasti`. A
//! varint carries six data bits per byte, most significant group first,
//! with `0x40` set on every byte but the last. The first byte of an entry
//! additionally carries `0x80`.

use shroud_core::{ShroudError, ShroudResult};

const CONTINUATION: u8 = 0x40;
const ENTRY_START: u8 = 0x80;
const DATA_MASK: u32 = 0x3F;

/// One exception table entry, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First protected byte.
    pub start: u32,
    /// Protected byte count.
    pub length: u32,
    /// Handler byte offset.
    pub target: u32,
    /// Stack depth to unwind to before entering the handler.
    pub depth: u32,
    /// Whether the handler expects the raising offset pushed first.
    pub lasti: bool,
}

impl ExceptionEntry {
    /// Create an entry covering `[start, end)`.
    pub fn new(start: u32, end: u32, target: u32, depth: u32, lasti: bool) -> ShroudResult<Self> {
        if end < start {
            return Err(ShroudError::internal(format!(
                "exception range ends before it starts ({start}..{end})"
            )));
        }
        for (what, value) in [("start", start), ("end", end), ("target", target)] {
            if value % 2 != 0 {
                return Err(ShroudError::internal(format!(
                    "exception table {what} offset {value} is not instruction aligned"
                )));
            }
        }
        Ok(Self {
            start,
            length: end - start,
            target,
            depth,
            lasti,
        })
    }

    /// Append the encoded entry to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let first = out.len();
        encode_varint(self.start / 2, out);
        out[first] |= ENTRY_START;
        encode_varint(self.length / 2, out);
        encode_varint(self.target / 2, out);
        encode_varint((self.depth << 1) | u32::from(self.lasti), out);
    }
}

/// Append a varint: six-bit groups, most significant first.
pub fn encode_varint(mut value: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 6];
    let mut n = 0;
    loop {
        groups[n] = (value & DATA_MASK) as u8;
        n += 1;
        value >>= 6;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let flag = if i > 0 { CONTINUATION } else { 0 };
        out.push(groups[i] | flag);
    }
}

/// Read a varint starting at `*pos`, ignoring the entry-start marker.
pub fn decode_varint(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value: u32 = 0;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        value = value.checked_shl(6)? | u32::from(byte) & DATA_MASK;
        if byte & CONTINUATION == 0 {
            return Some(value);
        }
    }
}

/// Encode a whole table.
#[must_use]
pub fn encode_table(entries: &[ExceptionEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 4);
    for entry in entries {
        entry.encode(&mut out);
    }
    out
}

/// Decode a whole table back into byte-offset entries.
pub fn decode_table(bytes: &[u8]) -> ShroudResult<Vec<ExceptionEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    let malformed = || ShroudError::internal("malformed exception table");
    while pos < bytes.len() {
        if bytes[pos] & ENTRY_START == 0 {
            return Err(malformed());
        }
        let start = decode_varint(bytes, &mut pos).ok_or_else(malformed)?;
        let length = decode_varint(bytes, &mut pos).ok_or_else(malformed)?;
        let target = decode_varint(bytes, &mut pos).ok_or_else(malformed)?;
        let depth_lasti = decode_varint(bytes, &mut pos).ok_or_else(malformed)?;
        entries.push(ExceptionEntry {
            start: start * 2,
            length: length * 2,
            target: target * 2,
            depth: depth_lasti >> 1,
            lasti: depth_lasti & 1 == 1,
        });
    }
    Ok(entries)
}
