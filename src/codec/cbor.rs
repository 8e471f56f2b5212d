//! Self-describing CBOR wire codec (spec §4.12), backed by `ciborium`.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{FsError, FsResult};

pub fn encode<T: Serialize>(value: &T) -> FsResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|_| FsError::Unknown)?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> FsResult<T> {
    ciborium::de::from_reader(bytes).map_err(|_| FsError::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::model::WalEntry;

    #[test]
    fn round_trips_wal_entry() {
        let entry = WalEntry::Write { path: "/f".into(), offset: 4, bytes: vec![1, 2, 3] };
        let bytes = encode(&entry).unwrap();
        let decoded: WalEntry = decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }
}
