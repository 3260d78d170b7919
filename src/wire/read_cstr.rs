//! Read a NUL-terminated string from the front of a byte slice.

use memchr::memchr;
use std::str;

use super::FramingError;

// -----------------------------------------------------------------------------
// ----- read_cstr (mutates input) ---------------------------------------------

/// Read a NUL-terminated string from the front of `input_bytes`.
///
/// Returns the bytes before the NUL and advances `input_bytes` past it.
#[inline]
pub fn read_cstr_bytes<'a>(input_bytes: &mut &'a [u8]) -> Result<&'a [u8], FramingError> {
    let unread_bytes = *input_bytes;

    let nul_index = memchr(0, unread_bytes).ok_or(FramingError::Malformed("missing NUL"))?;

    let (bytes_before_nul, bytes_from_nul) = unread_bytes.split_at(nul_index);

    // advance past the NUL
    *input_bytes = &bytes_from_nul[1..];

    Ok(bytes_before_nul)
}

/// Like [`read_cstr_bytes`], decoding the value as UTF-8.
#[inline]
pub fn read_cstr<'a>(input_bytes: &mut &'a [u8]) -> Result<&'a str, FramingError> {
    let raw = read_cstr_bytes(input_bytes)?;
    str::from_utf8(raw).map_err(|_| FramingError::Malformed("invalid UTF-8 string"))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    #[test]
    fn reads_and_advances() {
        let buffer = b"root\0rest";
        let mut input: &[u8] = buffer;

        assert_eq!(read_cstr(&mut input).unwrap(), "root");
        assert_eq!(input, b"rest");
    }

    #[test]
    fn empty_string_is_fine() {
        let mut input: &[u8] = b"\0tail";
        assert_eq!(read_cstr(&mut input).unwrap(), "");
        assert_eq!(input, b"tail");
    }

    #[test]
    fn eof_without_nul() {
        let mut input: &[u8] = b"no-nul";
        let err = read_cstr(&mut input).unwrap_err();

        assert!(matches!(err, FramingError::Malformed(_)));
        assert_eq!(input, b"no-nul");
    }

    #[test]
    fn invalid_utf8_before_nul() {
        let mut input: &[u8] = &[0xFF, 0xFE, 0x00];
        assert!(read_cstr(&mut input).is_err());

        let mut input: &[u8] = &[0xFF, 0xFE, 0x00];
        assert_eq!(read_cstr_bytes(&mut input).unwrap(), &[0xFF, 0xFE]);
    }

    #[test]
    fn works_over_frozen_bytes() {
        let frozen = Bytes::from_static(b"caching_sha2_password\0");
        let mut input: &[u8] = frozen.as_ref();

        assert_eq!(read_cstr(&mut input).unwrap(), "caching_sha2_password");
        assert!(input.is_empty());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
