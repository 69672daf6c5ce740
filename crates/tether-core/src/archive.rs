//! # AGPS Archive Reader
//!
//! Read-only view over a ustar container holding per-constellation almanac
//! files. The archive is parsed once, entry data is never copied, and the
//! original bytes stay available for handing back to the device verbatim.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  offset 0     ┌──────────────┐                                          │
//! │               │ header (512) │  name, size (octal), chksum, typeflag    │
//! │               ├──────────────┤                                          │
//! │               │ data         │  padded up to a 512-byte boundary        │
//! │               ├──────────────┤                                          │
//! │               │ header (512) │                                          │
//! │               │ ...          │                                          │
//! │               ├──────────────┤                                          │
//! │               │ zero block   │  end of archive                          │
//! │               └──────────────┘                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only regular files are indexed. Directory, link and extension entries are
//! stepped over. A leading `./` on entry names is dropped so archives made
//! with `tar -C dir .` resolve the same as ones listing files directly.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::ArchiveError;

// =============================================================================
// Constants
// =============================================================================

/// Size of every header and of the data padding unit.
pub const BLOCK_SIZE: usize = 512;

const NAME: Range<usize> = 0..100;
const SIZE: Range<usize> = 124..136;
const CHECKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC: Range<usize> = 257..263;
const PREFIX: Range<usize> = 345..500;

const USTAR_MAGIC: &[u8] = b"ustar\0";

// =============================================================================
// Archive
// =============================================================================

/// A parsed archive: the raw bytes plus an index of regular-file entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Vec<u8>,
    entries: BTreeMap<String, Range<usize>>,
}

impl Archive {
    /// Parses `bytes` as a ustar archive.
    ///
    /// Parsing is strict: a bad checksum, a short read or a missing
    /// end-of-archive block all fail the whole archive. When a name repeats,
    /// the later entry wins.
    pub fn parse(bytes: Vec<u8>) -> Result<Archive, ArchiveError> {
        let mut entries = BTreeMap::new();
        let mut offset = 0;

        loop {
            if offset == bytes.len() {
                return Err(ArchiveError::MissingTerminator { offset });
            }

            let header = block_at(&bytes, offset)?;
            if header.iter().all(|b| *b == 0) {
                break;
            }

            verify_checksum(header, offset)?;

            let size = parse_numeric(&header[SIZE])
                .and_then(|n| usize::try_from(n).ok())
                .ok_or(ArchiveError::InvalidSize {
                    offset,
                    field: "size",
                })?;

            let data_start = offset + BLOCK_SIZE;
            let padded = padded_len(size).ok_or(ArchiveError::InvalidSize {
                offset,
                field: "size",
            })?;
            let available = bytes.len() - data_start;
            if padded > available {
                return Err(ArchiveError::Truncated {
                    offset,
                    needed: padded,
                    available,
                });
            }

            if is_regular_file(header[TYPEFLAG]) {
                let name = entry_name(header, offset)?;
                entries.insert(name, data_start..data_start + size);
            }

            offset = data_start + padded;
        }

        Ok(Archive { bytes, entries })
    }

    /// Returns true if a regular file with exactly this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Contents of the named file.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(|range| &self.bytes[range.clone()])
    }

    /// Names of all indexed files, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The archive exactly as it was read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// =============================================================================
// Header Parsing
// =============================================================================

fn block_at(bytes: &[u8], offset: usize) -> Result<&[u8], ArchiveError> {
    let available = bytes.len() - offset;
    if available < BLOCK_SIZE {
        return Err(ArchiveError::Truncated {
            offset,
            needed: BLOCK_SIZE,
            available,
        });
    }
    Ok(&bytes[offset..offset + BLOCK_SIZE])
}

fn padded_len(size: usize) -> Option<usize> {
    let blocks = size.checked_add(BLOCK_SIZE - 1)? / BLOCK_SIZE;
    blocks.checked_mul(BLOCK_SIZE)
}

/// `'0'` and the pre-POSIX NUL both mean a regular file.
fn is_regular_file(typeflag: u8) -> bool {
    typeflag == b'0' || typeflag == 0
}

/// Checksum is the unsigned byte sum of the header with the checksum field
/// read as eight spaces.
fn verify_checksum(header: &[u8], offset: usize) -> Result<(), ArchiveError> {
    let stored = parse_numeric(&header[CHECKSUM])
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(ArchiveError::InvalidSize {
            offset,
            field: "checksum",
        })?;

    let computed: u32 = header
        .iter()
        .enumerate()
        .map(|(i, b)| if CHECKSUM.contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum();

    if stored != computed {
        return Err(ArchiveError::BadChecksum {
            offset,
            stored,
            computed,
        });
    }
    Ok(())
}

/// Octal text padded with spaces/NULs, or GNU base-256 when the high bit of
/// the first byte is set.
fn parse_numeric(field: &[u8]) -> Option<u64> {
    if field.first().is_some_and(|b| b & 0x80 != 0) {
        let mut value: u64 = u64::from(field[0] & 0x7f);
        for b in &field[1..] {
            value = value.checked_mul(256)?.checked_add(u64::from(*b))?;
        }
        return Some(value);
    }

    let start = field.iter().position(|b| *b != b' ')?;
    let digits = &field[start..];
    let end = digits
        .iter()
        .position(|b| !(b'0'..=b'7').contains(b))
        .unwrap_or(digits.len());
    if end == 0 || !digits[end..].iter().all(|b| *b == 0 || *b == b' ') {
        return None;
    }

    digits[..end].iter().try_fold(0u64, |acc, b| {
        acc.checked_mul(8)?.checked_add(u64::from(b - b'0'))
    })
}

fn c_string(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    &field[..end]
}

fn entry_name(header: &[u8], offset: usize) -> Result<String, ArchiveError> {
    let invalid = || ArchiveError::InvalidName { offset };

    let name = std::str::from_utf8(c_string(&header[NAME])).map_err(|_| invalid())?;
    let prefix = if &header[MAGIC] == USTAR_MAGIC {
        std::str::from_utf8(c_string(&header[PREFIX])).map_err(|_| invalid())?
    } else {
        ""
    };

    let full = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };
    normalize(&full).ok_or_else(invalid)
}

/// Drops any leading `./`; `None` if nothing is left.
fn normalize(path: &str) -> Option<String> {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    (!path.is_empty()).then(|| path.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Hand-built ustar header for cases the tar writer refuses to produce.
    fn raw_header(name: &str, prefix: &str, size: usize, typeflag: u8) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(b"0000644");
        let size = format!("{size:011o}");
        block[124..135].copy_from_slice(size.as_bytes());
        block[136..147].copy_from_slice(b"00000000000");
        block[TYPEFLAG] = typeflag;
        block[MAGIC].copy_from_slice(USTAR_MAGIC);
        block[263..265].copy_from_slice(b"00");
        block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());

        block[CHECKSUM].copy_from_slice(b"        ");
        let sum: u32 = block.iter().map(|b| u32::from(*b)).sum();
        let sum = format!("{sum:06o}\0 ");
        block[CHECKSUM].copy_from_slice(sum.as_bytes());
        block
    }

    fn raw_entry(out: &mut Vec<u8>, name: &str, prefix: &str, data: &[u8]) {
        out.extend_from_slice(&raw_header(name, prefix, data.len(), b'0'));
        out.extend_from_slice(data);
        out.resize(padded_len(out.len()).unwrap(), 0);
    }

    fn terminate(out: &mut Vec<u8>) {
        out.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
    }

    #[test]
    fn test_reads_archive_from_tar_writer() {
        let gps = vec![0x47u8; 700];
        let bytes = tar_with(&[("CPE_GPS.BIN", gps.as_slice()), ("CPE_GLO.BIN", &b"glonass"[..])]);
        let archive = Archive::parse(bytes.clone()).unwrap();

        assert_eq!(archive.len(), 2);
        assert!(archive.contains("CPE_GPS.BIN"));
        assert!(archive.contains("CPE_GLO.BIN"));
        assert!(!archive.contains("CPE_GAL.BIN"));
        assert!(!archive.contains("cpe_gps.bin"));
        assert_eq!(archive.get("CPE_GPS.BIN"), Some(gps.as_slice()));
        assert_eq!(archive.get("CPE_GLO.BIN"), Some(&b"glonass"[..]));
        assert_eq!(archive.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn test_skips_directories_and_normalizes_dot_slash() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw_header("./", "", 0, b'5'));
        raw_entry(&mut bytes, "./CPE_QZSS.BIN", "", b"qzss");
        terminate(&mut bytes);

        let archive = Archive::parse(bytes).unwrap();
        assert_eq!(archive.names().collect::<Vec<_>>(), vec!["CPE_QZSS.BIN"]);
    }

    #[test]
    fn test_joins_ustar_prefix() {
        let mut bytes = Vec::new();
        raw_entry(&mut bytes, "CPE_GAL.BIN", "almanac", b"gal");
        terminate(&mut bytes);

        let archive = Archive::parse(bytes).unwrap();
        assert!(archive.contains("almanac/CPE_GAL.BIN"));
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let archive = Archive::parse(tar_with(&[])).unwrap();
        assert!(archive.is_empty());
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut bytes = tar_with(&[("CPE_GPS.BIN", &b"data"[..])]);
        bytes[0] = b'X';

        let err = Archive::parse(bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::BadChecksum { offset: 0, .. }));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw_header("CPE_GPS.BIN", "", 1000, b'0'));
        bytes.extend_from_slice(&[1u8; 600]);

        assert_eq!(
            Archive::parse(bytes).unwrap_err(),
            ArchiveError::Truncated {
                offset: 0,
                needed: 1024,
                available: 600
            }
        );
    }

    #[test]
    fn test_rejects_short_header_and_missing_terminator() {
        assert!(matches!(
            Archive::parse(vec![0u8; 100]).unwrap_err(),
            ArchiveError::Truncated { needed: BLOCK_SIZE, .. }
        ));

        let mut bytes = Vec::new();
        raw_entry(&mut bytes, "CPE_GPS.BIN", "", b"gps");
        assert_eq!(
            Archive::parse(bytes).unwrap_err(),
            ArchiveError::MissingTerminator { offset: 1024 }
        );

        assert!(matches!(
            Archive::parse(Vec::new()).unwrap_err(),
            ArchiveError::MissingTerminator { offset: 0 }
        ));
    }

    #[test]
    fn test_rejects_non_archive_bytes() {
        let bytes = b"this is not a tar file".repeat(64);
        assert!(Archive::parse(bytes).is_err());
    }

    #[test]
    fn test_numeric_fields() {
        assert_eq!(parse_numeric(b"00000001750\0"), Some(1000));
        assert_eq!(parse_numeric(b"  1750 \0"), Some(1000));
        assert_eq!(parse_numeric(b"\x80\0\0\0\0\0\0\0\0\0\x03\xe8"), Some(1000));
        assert_eq!(parse_numeric(b"0009\0"), None);
        assert_eq!(parse_numeric(b"\0\0\0\0"), None);
    }
}
