//! CRC framing shared by both wire codecs (spec §4.12, §4.13).

pub mod cbor;
pub mod model;
pub mod tlv;

use crate::error::{FsError, FsResult};

/// Frame a single payload (snapshot, mounts, versions, trash): a 4-byte
/// little-endian CRC32 of the payload followed by the payload itself.
pub fn frame_single(payload: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validate and strip a single-payload frame. A CRC mismatch or short
/// buffer is treated as corruption (callers degrade to an empty default).
pub fn unframe_single(bytes: &[u8]) -> FsResult<Vec<u8>> {
    if bytes.len() < 4 {
        return Err(FsError::Unknown);
    }
    let stored_crc = u32::from_le_bytes(bytes[0..4].try_into().expect("checked length"));
    let payload = &bytes[4..];
    if crc32fast::hash(payload) != stored_crc {
        return Err(FsError::Unknown);
    }
    Ok(payload.to_vec())
}

/// Frame one WAL record: `CRC32(payload) | length(4 LE) | payload`.
pub fn append_wal_record(payload: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Scan a WAL blob front-to-back, returning every payload whose CRC
/// validates. A bad-CRC record is skipped without aborting the scan
/// (spec §4.13); a truncated trailing record stops the scan.
pub fn scan_wal_records(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= bytes.len() {
        let crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("checked length"));
        let len = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().expect("checked length")) as usize;
        let payload_start = pos + 8;
        let payload_end = payload_start + len;
        if payload_end > bytes.len() {
            break;
        }
        let payload = &bytes[payload_start..payload_end];
        if crc32fast::hash(payload) == crc {
            out.push(payload.to_vec());
        }
        pos = payload_end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_round_trips() {
        let framed = frame_single(b"hello");
        assert_eq!(unframe_single(&framed).unwrap(), b"hello");
    }

    #[test]
    fn single_frame_detects_corruption() {
        let mut framed = frame_single(b"hello");
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        assert!(unframe_single(&framed).is_err());
    }

    #[test]
    fn wal_scan_skips_bad_record_but_keeps_going() {
        let mut wal = append_wal_record(b"one");
        let mut bad = append_wal_record(b"two");
        bad[0] ^= 0xFF; // corrupt its CRC
        wal.extend(bad);
        wal.extend(append_wal_record(b"three"));
        let records = scan_wal_records(&wal);
        assert_eq!(records, vec![b"one".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn wal_scan_stops_at_truncated_tail() {
        let mut wal = append_wal_record(b"one");
        wal.extend_from_slice(&[1, 2, 3]); // truncated trailing record
        assert_eq!(scan_wal_records(&wal), vec![b"one".to_vec()]);
    }
}
