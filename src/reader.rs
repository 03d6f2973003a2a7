//! Primitive byte readers.
//!
//! Bounds-checked fixed-width reads, string decoding in the two legacy
//! encodings found in PAC files, and the small numeric predicates used by
//! gap classification.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use encoding_rs::{Encoding, SHIFT_JIS, WINDOWS_1252};
use serde::{Deserialize, Serialize};

use crate::error::{PacError, Result};

/// Legacy text encodings used by PAC string data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    /// Double-byte Japanese encoding used by script strings.
    #[default]
    ShiftJis,
    /// Single-byte Western encoding used by some debug names.
    Windows1252,
}

impl TextEncoding {
    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::ShiftJis => SHIFT_JIS,
            TextEncoding::Windows1252 => WINDOWS_1252,
        }
    }

    /// Decode `bytes`, returning the text and whether malformed sequences
    /// were replaced.
    pub fn decode(self, bytes: &[u8]) -> (String, bool) {
        let (text, _, had_errors) = self.encoding().decode(bytes);
        (text.into_owned(), had_errors)
    }

    /// Decode `bytes` only if they are well-formed in this encoding.
    pub fn decode_strict(self, bytes: &[u8]) -> Option<String> {
        self.encoding()
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
    }
}

/// Read bytes with bounds checking.
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(&data[offset..end]),
        _ => Err(PacError::TruncatedData {
            offset,
            expected: len,
            actual: data.len().saturating_sub(offset),
        }),
    }
}

/// Read a single byte.
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    Ok(read_bytes(data, offset, 1)?[0])
}

/// Read a little-endian u16.
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    read_bytes(data, offset, 2).map(LittleEndian::read_u16)
}

/// Read a little-endian u32.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    read_bytes(data, offset, 4).map(LittleEndian::read_u32)
}

/// Read a big-endian u32 (instruction signatures are stored this way).
pub fn read_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    read_bytes(data, offset, 4).map(BigEndian::read_u32)
}

/// Read a little-endian IEEE-754 single.
pub fn read_f32_le(data: &[u8], offset: usize) -> Result<f32> {
    read_bytes(data, offset, 4).map(LittleEndian::read_f32)
}

/// Read a NUL-terminated string starting at `offset`.
///
/// Returns the decoded text (embedded NULs removed) and the number of bytes
/// consumed, terminator included. Fails with [`PacError::TruncatedData`]
/// when no terminator exists before the end of `data`.
pub fn read_cstring(data: &[u8], offset: usize, encoding: TextEncoding) -> Result<(String, usize)> {
    let tail = data.get(offset..).unwrap_or_default();
    let Some(nul) = memchr::memchr(0, tail) else {
        return Err(PacError::TruncatedData {
            offset,
            expected: tail.len() + 1,
            actual: tail.len(),
        });
    };
    let consumed = nul + 1;
    Ok((decode_stripped(&tail[..consumed], encoding), consumed))
}

/// Read a string of exactly `len` bytes, dropping NUL padding.
pub fn read_string(data: &[u8], offset: usize, len: usize, encoding: TextEncoding) -> Result<String> {
    let bytes = read_bytes(data, offset, len)?;
    Ok(decode_stripped(bytes, encoding))
}

fn decode_stripped(bytes: &[u8], encoding: TextEncoding) -> String {
    let (text, _) = encoding.decode(bytes);
    text.replace('\0', "")
}

/// True for non-zero powers of two.
pub fn is_power_of_two(value: u32) -> bool {
    value.is_power_of_two()
}

/// True when `bytes` is a non-empty sequence of little-endian words
/// `0, 1, 2, ..., n-1`.
pub fn is_sequential_table(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return false;
    }
    bytes
        .chunks_exact(4)
        .zip(0u32..)
        .all(|(word, expected)| LittleEndian::read_u32(word) == expected)
}

/// Iterate over the little-endian words of `bytes`, ignoring a short tail.
pub fn le_words(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks_exact(4).map(LittleEndian::read_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u32_le(&data, 0).unwrap(), 0x04030201);
        assert_eq!(read_u32_be(&data, 0).unwrap(), 0x01020304);
    }

    #[test]
    fn test_read_past_end() {
        let data = [0x25, 0x01, 0x02];
        match read_u32_be(&data, 0) {
            Err(PacError::TruncatedData {
                offset: 0,
                expected: 4,
                actual: 3,
            }) => {}
            other => panic!("Expected truncation, got {:?}", other),
        }
        assert!(read_u8(&data, 3).is_err());
        assert!(read_bytes(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_read_float() {
        let data = 1.5f32.to_le_bytes();
        assert_eq!(read_f32_le(&data, 0).unwrap(), 1.5);
        assert_eq!(read_u16_le(&[0x34, 0x12], 0).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_cstring_shift_jis() {
        // "テスト" in Shift-JIS followed by NUL and trailing data
        let data = [0x83, 0x65, 0x83, 0x58, 0x83, 0x67, 0x00, 0xFF];
        let (text, consumed) = read_cstring(&data, 0, TextEncoding::ShiftJis).unwrap();
        assert_eq!(text, "テスト");
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_read_cstring_unterminated() {
        let data = b"abc";
        assert!(read_cstring(data, 0, TextEncoding::ShiftJis).is_err());
        assert!(read_cstring(data, 10, TextEncoding::ShiftJis).is_err());
    }

    #[test]
    fn test_read_string_strips_padding() {
        let data = b"ab\0\0cd";
        let text = read_string(data, 0, 4, TextEncoding::Windows1252).unwrap();
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_decode_strict() {
        assert_eq!(
            TextEncoding::ShiftJis.decode_strict(b"abc").as_deref(),
            Some("abc")
        );
        // Lone lead byte is not valid Shift-JIS
        assert!(TextEncoding::ShiftJis.decode_strict(&[0x83]).is_none());
    }

    #[test]
    fn test_sequential_table() {
        let table = [0u8, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0];
        assert!(is_sequential_table(&table));
        assert!(!is_sequential_table(&table[..11]));
        assert!(!is_sequential_table(&[]));
        assert!(!is_sequential_table(&[1, 0, 0, 0]));
    }

    #[test]
    fn test_power_of_two() {
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(0x40));
        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(6));
    }

    #[test]
    fn test_le_words() {
        let words: Vec<u32> = le_words(&[1, 0, 0, 0, 2, 0, 0, 0, 9]).collect();
        assert_eq!(words, vec![1, 2]);
    }
}
