//! USTAR TAR encode/decode (spec §4.11).

use super::{ArchiveEntry, ArchiveEntryMeta};
use crate::error::{FsError, FsResult};

const BLOCK_SIZE: usize = 512;
const MAGIC: &[u8; 6] = b"ustar\0";
const VERSION: &[u8; 2] = b"00";
const DEFAULT_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

fn write_octal(buf: &mut [u8], value: u64) {
    // Field holds (len - 1) octal digits followed by a NUL terminator.
    let digits = buf.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    buf[..digits].copy_from_slice(&text.as_bytes()[..digits]);
    buf[digits] = 0;
}

fn parse_octal(field: &[u8]) -> u64 {
    let text: String = field.iter().take_while(|&&b| b != 0).map(|&b| b as char).collect();
    u64::from_str_radix(text.trim(), 8).unwrap_or(0)
}

fn encode_header(name: &str, size: u64, mtime_secs: u64, typeflag: u8, mode: u32) -> [u8; BLOCK_SIZE] {
    let mut header = [0u8; BLOCK_SIZE];
    let name_bytes = name.as_bytes();
    let copy_len = name_bytes.len().min(100);
    header[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

    write_octal(&mut header[100..108], mode as u64);
    write_octal(&mut header[108..116], 0); // uid
    write_octal(&mut header[116..124], 0); // gid
    write_octal(&mut header[124..136], size);
    write_octal(&mut header[136..148], mtime_secs);
    header[148..156].fill(b' '); // checksum placeholder during computation
    header[156] = typeflag;
    header[257..263].copy_from_slice(MAGIC);
    header[263..265].copy_from_slice(VERSION);

    let checksum: u32 = header.iter().map(|&b| b as u32).sum();
    let text = format!("{:06o}", checksum);
    header[148..154].copy_from_slice(text.as_bytes());
    header[154] = 0;
    header[155] = b' ';
    header
}

/// Encode entries as a USTAR tar archive, content zero-padded to 512-byte
/// blocks and terminated by two zero blocks.
pub fn encode(entries: &[ArchiveEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let mtime_secs = (entry.modified_at_millis.max(0) / 1000) as u64;
        if entry.is_dir {
            let name = if entry.name.ends_with('/') { entry.name.clone() } else { format!("{}/", entry.name) };
            out.extend_from_slice(&encode_header(&name, 0, mtime_secs, b'5', DEFAULT_DIR_MODE));
        } else {
            out.extend_from_slice(&encode_header(&entry.name, entry.content.len() as u64, mtime_secs, b'0', DEFAULT_MODE));
            out.extend_from_slice(&entry.content);
            let padding = (BLOCK_SIZE - (entry.content.len() % BLOCK_SIZE)) % BLOCK_SIZE;
            out.extend(std::iter::repeat(0u8).take(padding));
        }
    }
    out.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));
    out
}

fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Decode a USTAR archive, stopping at the first pair of zero blocks or at
/// truncated input.
pub fn decode(bytes: &[u8]) -> FsResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + BLOCK_SIZE <= bytes.len() {
        let header = &bytes[pos..pos + BLOCK_SIZE];
        if is_zero_block(header) {
            break;
        }
        if &header[257..263] != MAGIC {
            return Err(FsError::Unknown);
        }
        let name_raw = &header[0..100];
        let name_len = name_raw.iter().position(|&b| b == 0).unwrap_or(100);
        let name = String::from_utf8_lossy(&name_raw[..name_len]).to_string();
        let size = parse_octal(&header[124..136]) as usize;
        let typeflag = header[156];
        pos += BLOCK_SIZE;

        if typeflag == b'5' {
            entries.push(ArchiveEntry { name, is_dir: true, content: Vec::new(), modified_at_millis: 0 });
            continue;
        }
        if pos + size > bytes.len() {
            return Err(FsError::Unknown);
        }
        let content = bytes[pos..pos + size].to_vec();
        let padded = size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        pos += padded;
        entries.push(ArchiveEntry { name, is_dir: false, content, modified_at_millis: 0 });
    }
    Ok(entries)
}

pub fn list(bytes: &[u8]) -> FsResult<Vec<ArchiveEntryMeta>> {
    Ok(decode(bytes)?
        .into_iter()
        .map(|e| ArchiveEntryMeta { name: e.name, is_dir: e.is_dir, size: e.content.len() as u64 })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_file_and_directory() {
        let entries = vec![
            ArchiveEntry { name: "d/".into(), is_dir: true, content: Vec::new(), modified_at_millis: 0 },
            ArchiveEntry { name: "d/a.txt".into(), is_dir: false, content: b"hello world".to_vec(), modified_at_millis: 0 },
        ];
        let bytes = encode(&entries);
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_dir);
        assert_eq!(decoded[1].content, b"hello world");
    }

    #[test]
    fn checksum_round_trips() {
        let entries = vec![ArchiveEntry { name: "f".into(), is_dir: false, content: vec![1, 2, 3], modified_at_millis: 0 }];
        let bytes = encode(&entries);
        let header = &bytes[0..BLOCK_SIZE];
        let stored = parse_octal(&header[148..154]);
        let mut recompute = header.to_vec();
        recompute[148..156].fill(b' ');
        let expected: u32 = recompute.iter().map(|&b| b as u32).sum();
        assert_eq!(stored as u32, expected);
    }

    #[test]
    fn terminates_with_two_zero_blocks() {
        let bytes = encode(&[]);
        assert_eq!(bytes.len(), BLOCK_SIZE * 2);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
