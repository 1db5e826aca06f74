//! Cookie-safe binary encoding.
//!
//! Session keys and XSRF tokens are binary blobs rendered in a base64 variant whose
//! alphabet avoids characters that need quoting in cookie values and URLs:
//! `-` and `.` replace `+` and `/`, and no padding is written.

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

const COOKIE_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-.") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("cookie alphabet must contain 64 distinct printable characters"),
    };

const COOKIE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &COOKIE_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// Encode `bytes` with the cookie alphabet.
pub fn encode(bytes: &[u8]) -> String {
    COOKIE_ENGINE.encode(bytes)
}

/// Decode a value produced by [`encode`].
///
/// Returns `None` if the value contains characters outside the alphabet or has an impossible length.
pub fn decode(value: &str) -> Option<Vec<u8>> {
    COOKIE_ENGINE.decode(value).ok()
}

/// Append `value` as an unsigned LEB128 varint.
pub fn write_var_u32(buffer: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buffer.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buffer.push(value as u8);
}

/// Read an unsigned LEB128 varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_var_u32(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut value = 0u32;
    for (index, byte) in bytes.iter().enumerate().take(5) {
        value |= u32::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Some((value, index + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_blobs() {
        let mut blob = Vec::new();
        for length in 0..=64u8 {
            assert_eq!(decode(&encode(&blob)).as_deref(), Some(blob.as_slice()));
            blob.push(length.wrapping_mul(37).wrapping_add(251));
        }
    }

    #[test]
    fn uses_cookie_safe_alphabet() {
        let encoded = encode(&[0xfb, 0xff, 0xbf]);
        assert_eq!(encoded, "-.-.");
        assert!(!encode(&[0xff; 7]).contains('='));
    }

    #[test]
    fn rejects_standard_alphabet() {
        assert_eq!(decode("+//+"), None);
    }

    #[test]
    fn varint_boundaries() {
        for value in [0, 1, 127, 128, 1_000_000, u32::MAX] {
            let mut buffer = Vec::new();
            write_var_u32(&mut buffer, value);
            assert_eq!(read_var_u32(&buffer), Some((value, buffer.len())));
        }
        let mut buffer = Vec::new();
        write_var_u32(&mut buffer, 300);
        assert_eq!(buffer, [0xac, 0x02]);
        assert_eq!(read_var_u32(&[0x80, 0x80]), None);
    }
}
