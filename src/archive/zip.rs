//! ZIP (STORE only) encode/decode (spec §4.11).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{FsError, FsResult};

use super::{ArchiveEntry, ArchiveEntryMeta};

const LOCAL_SIGNATURE: u32 = 0x0403_4B50;
const CENTRAL_SIGNATURE: u32 = 0x0201_4B50;
const EOCD_SIGNATURE: u32 = 0x0605_4B50;
const VERSION: u16 = 20;
const DIR_EXTERNAL_ATTR: u32 = 0x10;

/// Convert UTC millis to (DOS time, DOS date); pre-1980 or non-positive
/// input maps to `(0, 0x0021)` per spec §4.11.
fn dos_datetime(now_millis: i64) -> (u16, u16) {
    if now_millis <= 0 {
        return (0, 0x0021);
    }
    let days = now_millis.div_euclid(86_400_000);
    let ms_of_day = now_millis.rem_euclid(86_400_000);
    let (year, month, day) = civil_from_days(days);
    if year < 1980 {
        return (0, 0x0021);
    }
    let seconds_of_day = ms_of_day / 1000;
    let hour = (seconds_of_day / 3600) as u16;
    let minute = ((seconds_of_day % 3600) / 60) as u16;
    let second = (seconds_of_day % 60) as u16;
    let time = (hour << 11) | (minute << 5) | (second / 2);
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | (day as u16);
    (time, date)
}

/// Howard Hinnant's `civil_from_days`: days-since-epoch to (year, month, day).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

struct CentralRecord {
    name: Vec<u8>,
    crc32: u32,
    size: u32,
    time: u16,
    date: u16,
    is_dir: bool,
    local_header_offset: u32,
}

/// Encode `entries` as a STORE-only ZIP archive.
pub fn encode(entries: &[ArchiveEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::with_capacity(entries.len());

    for entry in entries {
        let local_offset = out.len() as u32;
        let name = entry_name_bytes(entry);
        let (time, date) = dos_datetime(entry.modified_at_millis);
        let content: &[u8] = if entry.is_dir { &[] } else { &entry.content };
        let crc = crc32fast::hash(content);

        out.write_u32::<LittleEndian>(LOCAL_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(VERSION).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // flags
        out.write_u16::<LittleEndian>(0).unwrap(); // method: STORE
        out.write_u16::<LittleEndian>(time).unwrap();
        out.write_u16::<LittleEndian>(date).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(content.len() as u32).unwrap(); // compressed size
        out.write_u32::<LittleEndian>(content.len() as u32).unwrap(); // uncompressed size
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // extra field length
        out.extend_from_slice(&name);
        out.extend_from_slice(content);

        central.push(CentralRecord {
            name,
            crc32: crc,
            size: content.len() as u32,
            time,
            date,
            is_dir: entry.is_dir,
            local_header_offset: local_offset,
        });
    }

    let central_start = out.len() as u32;
    for record in &central {
        out.write_u32::<LittleEndian>(CENTRAL_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(VERSION).unwrap(); // version made by
        out.write_u16::<LittleEndian>(VERSION).unwrap(); // version needed
        out.write_u16::<LittleEndian>(0).unwrap(); // flags
        out.write_u16::<LittleEndian>(0).unwrap(); // method
        out.write_u16::<LittleEndian>(record.time).unwrap();
        out.write_u16::<LittleEndian>(record.date).unwrap();
        out.write_u32::<LittleEndian>(record.crc32).unwrap();
        out.write_u32::<LittleEndian>(record.size).unwrap();
        out.write_u32::<LittleEndian>(record.size).unwrap();
        out.write_u16::<LittleEndian>(record.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // extra length
        out.write_u16::<LittleEndian>(0).unwrap(); // comment length
        out.write_u16::<LittleEndian>(0).unwrap(); // disk number start
        out.write_u16::<LittleEndian>(0).unwrap(); // internal attrs
        out.write_u32::<LittleEndian>(if record.is_dir { DIR_EXTERNAL_ATTR } else { 0 }).unwrap();
        out.write_u32::<LittleEndian>(record.local_header_offset).unwrap();
        out.extend_from_slice(&record.name);
    }
    let central_size = out.len() as u32 - central_start;

    out.write_u32::<LittleEndian>(EOCD_SIGNATURE).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap(); // disk number
    out.write_u16::<LittleEndian>(0).unwrap(); // disk with central dir
    out.write_u16::<LittleEndian>(central.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(central.len() as u16).unwrap();
    out.write_u32::<LittleEndian>(central_size).unwrap();
    out.write_u32::<LittleEndian>(central_start).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap(); // comment length
    out
}

fn entry_name_bytes(entry: &ArchiveEntry) -> Vec<u8> {
    if entry.is_dir && !entry.name.ends_with('/') {
        format!("{}/", entry.name).into_bytes()
    } else {
        entry.name.clone().into_bytes()
    }
}

/// Decode a STORE-only ZIP archive, rejecting any entry using a compression
/// method other than STORE.
pub fn decode(bytes: &[u8]) -> FsResult<Vec<ArchiveEntry>> {
    let mut cursor = Cursor::new(bytes);
    let mut entries = Vec::new();
    loop {
        let pos = cursor.position() as usize;
        if pos + 4 > bytes.len() {
            break;
        }
        let signature = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        if signature != LOCAL_SIGNATURE {
            break;
        }
        cursor.set_position(pos as u64 + 4);
        let _version = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let _flags = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let method = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        if method != 0 {
            return Err(FsError::Unknown);
        }
        let _time = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let _date = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let _crc = cursor.read_u32::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let compressed_size = cursor.read_u32::<LittleEndian>().map_err(|_| FsError::Unknown)? as usize;
        let _uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(|_| FsError::Unknown)?;
        let name_len = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>().map_err(|_| FsError::Unknown)? as usize;

        let name_start = cursor.position() as usize;
        let name_end = name_start + name_len;
        let data_start = name_end + extra_len;
        let data_end = data_start + compressed_size;
        if data_end > bytes.len() {
            return Err(FsError::Unknown);
        }
        let name = String::from_utf8_lossy(&bytes[name_start..name_end]).to_string();
        let content = bytes[data_start..data_end].to_vec();
        let is_dir = name.ends_with('/');
        entries.push(ArchiveEntry { name, is_dir, content, modified_at_millis: 0 });
        cursor.set_position(data_end as u64);
    }
    Ok(entries)
}

/// List entries without materialising file content.
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
            ArchiveEntry { name: "d/a.txt".into(), is_dir: false, content: b"hello".to_vec(), modified_at_millis: 0 },
        ];
        let bytes = encode(&entries);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].content, b"hello");
        assert!(decoded[0].is_dir);
    }

    #[test]
    fn list_matches_sizes_without_content() {
        let entries = vec![ArchiveEntry { name: "a.bin".into(), is_dir: false, content: vec![0u8; 42], modified_at_millis: 0 }];
        let bytes = encode(&entries);
        let listed = list(&bytes).unwrap();
        assert_eq!(listed[0].size, 42);
    }

    #[test]
    fn dos_date_before_1980_is_clamped() {
        assert_eq!(dos_datetime(0), (0, 0x0021));
        assert_eq!(dos_datetime(-1), (0, 0x0021));
    }
}
