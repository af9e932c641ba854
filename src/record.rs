//! On-disk record format: fixed-width header plus key and value bytes.
//!
//! A data record is `[i32 timestamp][i32 key_size][i32 value_size][key][value]`,
//! little-endian. A hint record is `[i32 timestamp][i32 key_size][i32
//! value_size][i32 value_position][key]`. `value_size == 0` marks a
//! tombstone. See the crate's SPEC_FULL.md §3/§4.1 for the full contract.

use crate::error::{Error, Result};

/// Size of the data record header: three little-endian i32 fields.
pub const DATA_HEADER_LEN: usize = 12;
/// Size of the hint record header: four little-endian i32 fields.
pub const HINT_HEADER_LEN: usize = 16;

/// A single key/value entry as it appears in a data file.
///
/// `value.is_empty()` denotes a tombstone: the spec reserves `value_size ==
/// 0` for "key deleted at timestamp", so there is no separate tombstone flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: i32,
    pub key: String,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(timestamp: i32, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self { timestamp, key: key.into(), value }
    }

    /// Builds a tombstone record: same framing, zero-length value.
    pub fn tombstone(timestamp: i32, key: impl Into<String>) -> Self {
        Self { timestamp, key: key.into(), value: Vec::new() }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    pub fn key_size(&self) -> usize {
        self.key.len()
    }

    pub fn value_size(&self) -> usize {
        self.value.len()
    }

    /// Total encoded length: header + key + value.
    pub fn encoded_len(&self) -> usize {
        DATA_HEADER_LEN + self.key_size() + self.value_size()
    }

    /// Offset of the value's first byte relative to the start of this
    /// record, i.e. `12 + key_size`.
    pub fn value_position_within_record(&self) -> usize {
        DATA_HEADER_LEN + self.key_size()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key_size() as i32).to_le_bytes());
        buf.extend_from_slice(&(self.value_size() as i32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decodes a record starting at the beginning of `bytes`, returning it
    /// along with the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Record, usize)> {
        if bytes.len() < DATA_HEADER_LEN {
            return Err(Error::MalformedRecord(format!(
                "truncated header: need {DATA_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let timestamp = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let key_size = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let value_size = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if key_size < 1 {
            return Err(Error::MalformedRecord(format!("invalid key_size {key_size}")));
        }
        if value_size < 0 {
            return Err(Error::MalformedRecord(format!("invalid value_size {value_size}")));
        }
        let (key_size, value_size) = (key_size as usize, value_size as usize);
        let total = DATA_HEADER_LEN + key_size + value_size;
        if bytes.len() < total {
            return Err(Error::MalformedRecord(format!(
                "truncated record: need {total} bytes, got {}",
                bytes.len()
            )));
        }
        let key = String::from_utf8(bytes[DATA_HEADER_LEN..DATA_HEADER_LEN + key_size].to_vec())
            .map_err(|e| Error::MalformedRecord(format!("key is not valid utf-8: {e}")))?;
        let value = bytes[DATA_HEADER_LEN + key_size..total].to_vec();
        Ok((Record { timestamp, key, value }, total))
    }
}

/// A hint entry: a record's index metadata without its value, pointing into
/// a merged data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRecord {
    pub timestamp: i32,
    pub key: String,
    pub value_size: u32,
    pub value_position: u64,
}

impl HintRecord {
    /// Derives a hint entry for `record`, which lives at `value_position` in
    /// its (merged) data file.
    pub fn from_record(record: &Record, value_position: u64) -> Self {
        Self {
            timestamp: record.timestamp,
            key: record.key.clone(),
            value_size: record.value_size() as u32,
            value_position,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key.len()
    }

    pub fn encoded_len(&self) -> usize {
        HINT_HEADER_LEN + self.key_size()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key_size() as i32).to_le_bytes());
        buf.extend_from_slice(&(self.value_size as i32).to_le_bytes());
        buf.extend_from_slice(&(self.value_position as i32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<(HintRecord, usize)> {
        if bytes.len() < HINT_HEADER_LEN {
            return Err(Error::MalformedRecord(format!(
                "truncated hint header: need {HINT_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let timestamp = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let key_size = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let value_size = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let value_position = i32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if key_size < 1 {
            return Err(Error::MalformedRecord(format!("invalid key_size {key_size}")));
        }
        if value_size < 0 {
            return Err(Error::MalformedRecord(format!("invalid value_size {value_size}")));
        }
        if value_position < 0 {
            return Err(Error::MalformedRecord(format!("invalid value_position {value_position}")));
        }
        let key_size = key_size as usize;
        let total = HINT_HEADER_LEN + key_size;
        if bytes.len() < total {
            return Err(Error::MalformedRecord(format!(
                "truncated hint record: need {total} bytes, got {}",
                bytes.len()
            )));
        }
        let key = String::from_utf8(bytes[HINT_HEADER_LEN..total].to_vec())
            .map_err(|e| Error::MalformedRecord(format!("key is not valid utf-8: {e}")))?;
        Ok((
            HintRecord { timestamp, key, value_size: value_size as u32, value_position: value_position as u64 },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn round_trip_record() {
        let r = Record::new(1_700_000_000, "key1", b"value1".to_vec());
        let encoded = r.encode();
        let (decoded, consumed) = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(consumed, r.encoded_len());
    }

    #[test]
    fn encoded_layout_matches_the_wire_format() {
        let r = Record::new(1, "k", b"v".to_vec());
        let encoded = r.encode();
        // timestamp=1, key_size=1, value_size=1, key=b'k', value=b'v', all little-endian.
        assert_eq!(
            hex::encode(&encoded),
            "01000000" /* timestamp */
                .to_string()
                + "01000000" // key_size
                + "01000000" // value_size
                + "6b" // 'k'
                + "76" // 'v'
        );
    }

    #[test]
    fn round_trip_tombstone() {
        let r = Record::tombstone(42, "deleted");
        let encoded = r.encode();
        let (decoded, consumed) = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, r);
        assert!(decoded.is_tombstone());
        assert_eq!(consumed, DATA_HEADER_LEN + "deleted".len());
    }

    #[test]
    fn round_trip_hint() {
        let record = Record::new(7, "hinted", b"abc".to_vec());
        let hint = HintRecord::from_record(&record, 99);
        let encoded = hint.encode();
        let (decoded, consumed) = HintRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, hint);
        assert_eq!(consumed, hint.encoded_len());
    }

    #[test]
    fn value_position_within_record_matches_offset() {
        let r = Record::new(1, "abc", vec![9, 9, 9, 9]);
        assert_eq!(r.value_position_within_record(), DATA_HEADER_LEN + 3);
    }

    #[test_case(&[] ; "empty slice")]
    #[test_case(&[0u8; 11] ; "short of header by one byte")]
    fn decode_rejects_truncated_header(bytes: &[u8]) {
        assert!(matches!(Record::decode(bytes), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn decode_rejects_negative_key_size() {
        let mut bytes = vec![0u8; DATA_HEADER_LEN];
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(Record::decode(&bytes), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn decode_rejects_truncated_value() {
        let r = Record::new(1, "key", b"a whole value".to_vec());
        let mut encoded = r.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(Record::decode(&encoded), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn decode_consumes_exact_prefix_leaving_trailer_untouched() {
        let a = Record::new(1, "a", b"1".to_vec());
        let b = Record::new(2, "b", b"22".to_vec());
        let mut bytes = a.encode();
        bytes.extend(b.encode());
        let (decoded_a, consumed) = Record::decode(&bytes).unwrap();
        assert_eq!(decoded_a, a);
        let (decoded_b, _) = Record::decode(&bytes[consumed..]).unwrap();
        assert_eq!(decoded_b, b);
    }
}
