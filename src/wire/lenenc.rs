// Length-encoded integers and strings.

use bytes::{BufMut, BytesMut};

use super::FramingError;

// -----------------------------------------------------------------------------
// ----- Encoding --------------------------------------------------------------

pub fn put_lenenc_int(out: &mut BytesMut, value: u64) {
    match value {
        0..=0xFA => out.put_u8(value as u8),
        0xFB..=0xFFFF => {
            out.put_u8(0xFC);
            out.put_u16_le(value as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            out.put_u8(0xFD);
            out.put_uint_le(value, 3);
        }
        _ => {
            out.put_u8(0xFE);
            out.put_u64_le(value);
        }
    }
}

pub fn put_lenenc_bytes(out: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(out, value.len() as u64);
    out.extend_from_slice(value);
}

// -----------------------------------------------------------------------------
// ----- Decoding --------------------------------------------------------------

/// Read a length-encoded integer. `Ok(None)` is the SQL NULL marker (`0xFB`).
pub fn read_lenenc_int(input: &mut &[u8]) -> Result<Option<u64>, FramingError> {
    let (&first, rest) = input
        .split_first()
        .ok_or(FramingError::Malformed("missing length-encoded integer"))?;

    let width = match first {
        0xFB => {
            *input = rest;
            return Ok(None);
        }
        0xFC => 2,
        0xFD => 3,
        0xFE => 8,
        0xFF => return Err(FramingError::Malformed("0xFF is not a length-encoded integer")),
        small => {
            *input = rest;
            return Ok(Some(small as u64));
        }
    };

    if rest.len() < width {
        return Err(FramingError::Malformed("truncated length-encoded integer"));
    }

    let mut le = [0u8; 8];
    le[..width].copy_from_slice(&rest[..width]);
    *input = &rest[width..];

    Ok(Some(u64::from_le_bytes(le)))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut out = BytesMut::new();
        put_lenenc_int(&mut out, value);
        out.to_vec()
    }

    #[test]
    fn encodes_at_each_width_boundary() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(250), vec![0xFA]);
        assert_eq!(encoded(251), vec![0xFC, 0xFB, 0x00]);
        assert_eq!(encoded(0xFFFF), vec![0xFC, 0xFF, 0xFF]);
        assert_eq!(encoded(0x1_0000), vec![0xFD, 0x00, 0x00, 0x01]);
        assert_eq!(
            encoded(0x100_0000),
            vec![0xFE, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn decodes_and_advances() {
        let mut input: &[u8] = &[0xFD, 0x01, 0x02, 0x03, 0x99];
        assert_eq!(read_lenenc_int(&mut input).unwrap(), Some(0x030201));
        assert_eq!(input, &[0x99]);
    }

    #[test]
    fn null_marker_and_invalid_prefix() {
        let mut input: &[u8] = &[0xFB];
        assert_eq!(read_lenenc_int(&mut input).unwrap(), None);

        let mut input: &[u8] = &[0xFF];
        assert!(read_lenenc_int(&mut input).is_err());
    }

    #[test]
    fn truncated_wide_integer() {
        let mut input: &[u8] = &[0xFE, 0x01, 0x02];
        assert!(read_lenenc_int(&mut input).is_err());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
