use thiserror::Error;

/// Marker character every record line starts with.
pub const RECORD_MARKER: char = ':';

/// Errors raised while decoding a single record line. Every variant keeps
/// the offending line so the caller can print a precise diagnostic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex digit in record: {line:?}")]
    MalformedDigit { line: String },
    #[error("malformed record: {line:?}")]
    MalformedRecord { line: String },
    #[error("record shorter than its declared length: {line:?}")]
    TruncatedRecord { line: String },
    #[error("record checksum mismatch (expected {expected:#04X}, found {found:#04X}): {line:?}")]
    ChecksumMismatch { expected: u8, found: u8, line: String },
}

/// One decoded record line.
///
/// `kind` 0 carries data; any nonzero kind is a control record and must
/// have a zero length. The trailing checksum byte is kept verbatim: for
/// control records it is matched literally by the image decoder instead of
/// being recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub length: u8,
    pub address: u16,
    pub kind: u8,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

fn hex_nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

/// Reads one two-digit hex byte at `pos`, returning the value and the
/// position just past it.
fn read_byte(line: &str, pos: usize) -> Result<(u8, usize), ParseError> {
    let bytes = line.as_bytes();
    if pos + 2 > bytes.len() {
        return Err(ParseError::TruncatedRecord {
            line: line.to_string(),
        });
    }

    let high = hex_nibble(bytes[pos]);
    let low = hex_nibble(bytes[pos + 1]);
    match (high, low) {
        (Some(h), Some(l)) => Ok(((h << 4) | l, pos + 2)),
        _ => Err(ParseError::MalformedDigit {
            line: line.to_string(),
        }),
    }
}

/// Decodes one record line into a `HexRecord`.
///
/// The line must start with `:`; lines without the marker are the caller's
/// job to skip. Field order after the marker: length, address high, address
/// low, kind, `length` payload bytes, trailing checksum. Data records
/// (kind 0) have their checksum validated here; the kind byte itself is not
/// part of the sum.
pub fn parse_line(line: &str) -> Result<HexRecord, ParseError> {
    if !line.starts_with(RECORD_MARKER) {
        return Err(ParseError::MalformedRecord {
            line: line.to_string(),
        });
    }

    let (length, pos) = read_byte(line, 1)?;
    let (addr_hi, pos) = read_byte(line, pos)?;
    let (addr_lo, pos) = read_byte(line, pos)?;
    let (kind, mut pos) = read_byte(line, pos)?;

    if kind != 0 && length != 0 {
        return Err(ParseError::MalformedRecord {
            line: line.to_string(),
        });
    }

    let mut payload = Vec::with_capacity(length as usize);
    let mut sum = (length as u32) + (addr_hi as u32) + (addr_lo as u32);
    for _ in 0..length {
        let (byte, next) = read_byte(line, pos)?;
        payload.push(byte);
        sum += byte as u32;
        pos = next;
    }

    let (checksum, _) = read_byte(line, pos)?;

    if kind == 0 {
        let expected = (0x100 - (sum & 0xFF)) as u8;
        if expected != checksum {
            return Err(ParseError::ChecksumMismatch {
                expected,
                found: checksum,
                line: line.to_string(),
            });
        }
    }

    Ok(HexRecord {
        length,
        address: ((addr_hi as u16) << 8) | addr_lo as u16,
        kind,
        payload,
        checksum,
    })
}
