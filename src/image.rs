use thiserror::Error;

use crate::record::{ParseError, RECORD_MARKER, parse_line};

/// Flash capacity of the target drive: sixteen 64 KiB banks.
pub const FLASH_SIZE: usize = 0x10_0000;

/// One addressable bank window. The firmware format selects banks with an
/// explicit switch record instead of address bits above 16.
pub const BANK_SIZE: usize = 0x1_0000;

/// Bank-switch sentinel: a zero-length record whose trailing byte is the
/// literal marker 0xAA. Matched byte-for-byte, never re-checksummed.
pub const BANK_SWITCH_SENTINEL: &str = ":00000155AA";

/// End-of-file sentinel terminating the record stream.
pub const END_OF_FILE_SENTINEL: &str = ":00000001FF";

/// Errors raised while assembling a firmware image from its source bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line {line}: {source}")]
    Parse { line: usize, source: ParseError },
    #[error("firmware image larger than {capacity} bytes")]
    ImageTooLarge { capacity: usize },
    #[error("firmware file too small: ended in bank {bank}")]
    ImageIncomplete { bank: usize },
    #[error("input ended without an end-of-file record")]
    UnexpectedEof,
    #[error("short read: got {actual} bytes, expected {expected}")]
    ShortRead { actual: usize, expected: usize },
}

/// A flattened firmware image of exactly the capacity it was decoded for.
/// Bytes no record wrote hold 0xFF, the erased-flash value. Read-only once
/// produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Box<[u8]>,
}

impl FirmwareImage {
    fn filled(capacity: usize) -> Self {
        Self {
            data: vec![0xFF; capacity].into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Mutable decode state: the bank selected by switch records and the line
/// currently being consumed (for diagnostics). One per decode session.
struct BankContext {
    bank: usize,
    line: usize,
}

/// Reconstructs a flat image from the banked hex record format.
///
/// Lines that do not start with `:` are skipped. Data records land at
/// `(bank << 16) | address`; each bank-switch sentinel advances the bank by
/// exactly one. Decoding succeeds only when the end-of-file sentinel arrives
/// with the final bank selected, so a well-formed file covers the whole
/// capacity. Any malformed, truncated or mis-checksummed record aborts the
/// decode; nothing is ever patched over.
pub fn decode_hex(text: &str, capacity: usize) -> Result<FirmwareImage, DecodeError> {
    debug_assert!(capacity > 0 && capacity % BANK_SIZE == 0);
    let bank_count = capacity / BANK_SIZE;

    let mut image = FirmwareImage::filled(capacity);
    let mut ctx = BankContext { bank: 0, line: 0 };
    let mut terminated = false;

    for (index, line) in text.lines().enumerate() {
        ctx.line = index + 1;
        if !line.starts_with(RECORD_MARKER) {
            continue;
        }

        let record = parse_line(line).map_err(|source| DecodeError::Parse {
            line: ctx.line,
            source,
        })?;

        if record.length == 0 {
            if line.starts_with(BANK_SWITCH_SENTINEL) {
                ctx.bank += 1;
                if ctx.bank >= bank_count {
                    return Err(DecodeError::ImageTooLarge { capacity });
                }
                continue;
            } else if line.starts_with(END_OF_FILE_SENTINEL) {
                terminated = true;
                break;
            } else {
                return Err(DecodeError::Parse {
                    line: ctx.line,
                    source: ParseError::MalformedRecord {
                        line: line.to_string(),
                    },
                });
            }
        }

        let offset = (ctx.bank << 16) | record.address as usize;
        let end = offset + record.payload.len();
        if end > capacity {
            return Err(DecodeError::ImageTooLarge { capacity });
        }
        image.data[offset..end].copy_from_slice(&record.payload);
    }

    if !terminated {
        return Err(DecodeError::UnexpectedEof);
    }
    if ctx.bank != bank_count - 1 {
        return Err(DecodeError::ImageIncomplete { bank: ctx.bank });
    }

    Ok(image)
}

/// Loads a pre-flattened raw image. Only an exact-capacity source qualifies.
pub fn load_binary(bytes: &[u8], capacity: usize) -> Result<FirmwareImage, DecodeError> {
    if bytes.len() < capacity {
        return Err(DecodeError::ShortRead {
            actual: bytes.len(),
            expected: capacity,
        });
    }
    if bytes.len() > capacity {
        return Err(DecodeError::ImageTooLarge { capacity });
    }
    Ok(FirmwareImage {
        data: bytes.to_vec().into_boxed_slice(),
    })
}

/// Loads a firmware image from raw file contents. A source of exactly
/// `capacity` bytes is taken verbatim; anything else is decoded as hex
/// records.
pub fn load_image(raw: &[u8], capacity: usize) -> Result<FirmwareImage, DecodeError> {
    if raw.len() == capacity {
        return load_binary(raw, capacity);
    }
    decode_hex(&String::from_utf8_lossy(raw), capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sum16;

    // Two banks keep the fixtures small; the bank arithmetic is identical.
    const SMALL: usize = 2 * BANK_SIZE;

    fn data_line(addr: u16, data: &[u8]) -> String {
        let mut sum = data.len() as u32 + (addr >> 8) as u32 + (addr & 0xFF) as u32;
        let mut line = format!(":{:02X}{:04X}00", data.len(), addr);
        for &byte in data {
            sum += byte as u32;
            line.push_str(&format!("{byte:02X}"));
        }
        line.push_str(&format!("{:02X}", (0x100 - (sum & 0xFF)) & 0xFF));
        line
    }

    fn full_file(banks: usize, payload: &[(usize, u16, Vec<u8>)]) -> String {
        let mut text = String::new();
        for bank in 0..banks {
            for (_, addr, data) in payload.iter().filter(|(b, _, _)| *b == bank) {
                text.push_str(&data_line(*addr, data));
                text.push('\n');
            }
            if bank + 1 < banks {
                text.push_str(BANK_SWITCH_SENTINEL);
                text.push('\n');
            }
        }
        text.push_str(END_OF_FILE_SENTINEL);
        text.push('\n');
        text
    }

    #[test]
    fn decodes_a_full_sixteen_bank_file() {
        let mut text = String::from(":04000000DEADBEEFC4\n");
        for _ in 0..15 {
            text.push_str(":00000155AA\n");
        }
        text.push_str(":00000001FF\n");

        let image = decode_hex(&text, FLASH_SIZE).unwrap();
        assert_eq!(image.len(), FLASH_SIZE);
        assert_eq!(&image.as_bytes()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(image.as_bytes()[4..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn banks_are_selected_in_order() {
        let payload: Vec<(usize, u16, Vec<u8>)> =
            (0..2).map(|bank| (bank, 0, vec![bank as u8 + 1])).collect();
        let image = decode_hex(&full_file(2, &payload), SMALL).unwrap();

        assert_eq!(image.as_bytes()[0], 1);
        assert_eq!(image.as_bytes()[BANK_SIZE], 2);
    }

    #[test]
    fn data_lands_at_bank_relative_offsets() {
        let payload = vec![(1usize, 0x0010u16, vec![0x12, 0x34])];
        let image = decode_hex(&full_file(2, &payload), SMALL).unwrap();

        assert_eq!(image.as_bytes()[BANK_SIZE + 0x10], 0x12);
        assert_eq!(image.as_bytes()[BANK_SIZE + 0x11], 0x34);
        assert_eq!(image.as_bytes()[0x10], 0xFF);
    }

    #[test]
    fn skips_lines_without_the_record_marker() {
        let text = format!(
            "vendor header, not a record\n{}\n# comment\n{}\n{}\n",
            data_line(0, &[0xA5]),
            BANK_SWITCH_SENTINEL,
            END_OF_FILE_SENTINEL,
        );
        let image = decode_hex(&text, SMALL).unwrap();
        assert_eq!(image.as_bytes()[0], 0xA5);
    }

    #[test]
    fn stops_consuming_after_the_terminator() {
        // Garbage records after the end-of-file sentinel must not matter.
        let text = format!(
            "{}\n{}\n:ZZZZ\n",
            BANK_SWITCH_SENTINEL, END_OF_FILE_SENTINEL
        );
        assert!(decode_hex(&text, SMALL).is_ok());
    }

    #[test]
    fn rejects_too_many_banks() {
        let mut text = String::new();
        for _ in 0..2 {
            text.push_str(":00000155AA\n");
        }
        text.push_str(":00000001FF\n");
        assert_eq!(
            decode_hex(&text, SMALL),
            Err(DecodeError::ImageTooLarge { capacity: SMALL })
        );
    }

    #[test]
    fn rejects_missing_terminator() {
        let text = ":00000155AA\n";
        assert_eq!(decode_hex(text, SMALL), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn rejects_terminator_before_the_final_bank() {
        let text = ":00000001FF\n";
        assert_eq!(
            decode_hex(text, SMALL),
            Err(DecodeError::ImageIncomplete { bank: 0 })
        );
    }

    #[test]
    fn rejects_unrecognized_zero_length_records() {
        let err = decode_hex(":00000003FD\n", SMALL).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Parse {
                line: 1,
                source: ParseError::MalformedRecord {
                    line: ":00000003FD".to_string()
                },
            }
        );
    }

    #[test]
    fn sentinel_match_is_literal() {
        // Lowercase digits parse fine but do not match the sentinel bytes.
        let err = decode_hex(":00000155aa\n", SMALL).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Parse {
                source: ParseError::MalformedRecord { .. },
                ..
            }
        ));
    }

    #[test]
    fn a_corrupted_line_reports_its_line_number() {
        let text = format!(
            "{}\n{}\n:0100000055FF\n",
            data_line(0, &[0x11]),
            BANK_SWITCH_SENTINEL
        );
        let err = decode_hex(&text, SMALL).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Parse {
                line: 3,
                source: ParseError::ChecksumMismatch { .. },
            }
        ));
    }

    #[test]
    fn round_trips_the_additive_checksum() {
        // Pseudo-random payload spread across both banks.
        let mut state = 0x2545_F491u32;
        let mut bytes = vec![0u8; 64];
        for byte in bytes.iter_mut() {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            *byte = (state >> 16) as u8;
        }

        let payload = vec![
            (0usize, 0x0000u16, bytes[..32].to_vec()),
            (1usize, 0x4000u16, bytes[32..].to_vec()),
        ];
        let image = decode_hex(&full_file(2, &payload), SMALL).unwrap();

        let mut expected = vec![0xFFu8; SMALL];
        expected[..32].copy_from_slice(&bytes[..32]);
        expected[BANK_SIZE + 0x4000..BANK_SIZE + 0x4020].copy_from_slice(&bytes[32..]);

        assert_eq!(image.as_bytes(), &expected[..]);
        assert_eq!(sum16(image.as_bytes()), sum16(&expected));
    }

    #[test]
    fn binary_fast_path_loads_verbatim() {
        let mut raw = vec![0x5Au8; SMALL];
        raw[0] = 0x01;
        let image = load_binary(&raw, SMALL).unwrap();
        assert_eq!(image.as_bytes(), &raw[..]);
    }

    #[test]
    fn binary_loader_rejects_size_mismatches() {
        assert_eq!(
            load_binary(&vec![0u8; SMALL - 1], SMALL),
            Err(DecodeError::ShortRead {
                actual: SMALL - 1,
                expected: SMALL,
            })
        );
        assert_eq!(
            load_binary(&vec![0u8; SMALL + 1], SMALL),
            Err(DecodeError::ImageTooLarge { capacity: SMALL })
        );
    }

    #[test]
    fn load_image_dispatches_on_source_size() {
        // Exact capacity: verbatim, even if the content looks like hex.
        let raw = vec![b':'; SMALL];
        let image = load_image(&raw, SMALL).unwrap();
        assert_eq!(image.as_bytes(), &raw[..]);

        // One byte off: falls through to the hex decoder, which rejects it.
        assert!(load_image(&raw[..SMALL - 1], SMALL).is_err());
    }

    #[test]
    fn load_image_accepts_hex_text() {
        let text = full_file(2, &[(0usize, 0u16, vec![0xAB])]);
        let image = load_image(text.as_bytes(), SMALL).unwrap();
        assert_eq!(image.as_bytes()[0], 0xAB);
    }
}
