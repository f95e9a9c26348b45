//! On-disk block record codec.
//!
//! Each shard log payload is one encoded entry:
//!
//! ```text
//! offset size field
//!   0     1   header_size (currently 18)
//!   1     1   flags (bits 0-2 data type, bit 3 compressed, bit 4 tombstone)
//!   2     2   key_len            u16 BE
//!   4     4   primary_len        u32 BE
//!   8     4   secondary_len      u32 BE
//!  12     2   keywords_block_len u16 BE
//!  14     4   crc32-ieee (over the whole record with this field zeroed)
//!  18     ... key | keywords block | primary | secondary
//! ```
//!
//! The keywords block is `[count: u16 BE][(len: u8)(utf8 bytes)] * count`.
//! Keywords are lowercased on encode and must match `[a-z0-9_-]+`.

use crate::config::{ENTRY_MAX_KEY_LEN, MAX_KEYWORDS_BLOCK_LEN, MAX_KEYWORD_LEN};
use crate::error::{Result, StoreError};

/// Total header size of the current format version.
pub const HEADER_SIZE: usize = 18;

/// Byte range of the CRC field inside the header.
const CRC_RANGE: std::ops::Range<usize> = 14..18;

/// Data type stored in the low three flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataType {
    /// Plain binary payload.
    #[default]
    Binary,
    /// Payload with an associated vector (secondary holds the vector id).
    Vector,
}

/// Decoded form of the entry header flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFlags {
    pub data_type: DataType,
    pub compressed: bool,
    pub tombstone: bool,
}

impl EntryFlags {
    pub fn encode(self) -> u8 {
        let mut flags = match self.data_type {
            DataType::Binary => 0b000,
            DataType::Vector => 0b001,
        };
        if self.compressed {
            flags |= 0b0000_1000;
        }
        if self.tombstone {
            flags |= 0b0001_0000;
        }
        flags
    }

    pub fn decode(flags: u8) -> Self {
        Self {
            data_type: if flags & 0b111 == 0b001 {
                DataType::Vector
            } else {
                DataType::Binary
            },
            compressed: flags & 0b0000_1000 != 0,
            tombstone: flags & 0b0001_0000 != 0,
        }
    }
}

/// A complete decoded entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub flags: EntryFlags,
    pub key: Vec<u8>,
    pub keywords: Vec<String>,
    pub primary: Vec<u8>,
    /// Vector id as 8 big-endian bytes for vector entries, empty otherwise.
    pub secondary: Vec<u8>,
}

/// Check a keyword against the accepted shape: lowercase alphanumerics,
/// underscore, dash, 1..=128 bytes.
pub fn validate_keyword(keyword: &str) -> Result<()> {
    if keyword.is_empty() {
        return Err(StoreError::InputRange("keyword cannot be empty".into()));
    }
    if keyword.len() > MAX_KEYWORD_LEN {
        return Err(StoreError::InputRange(format!(
            "keyword exceeds maximum length of {MAX_KEYWORD_LEN} bytes"
        )));
    }
    if !keyword
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InputRange(format!(
            "keyword {keyword:?} may only contain a-z, 0-9, underscore, and dash"
        )));
    }
    Ok(())
}

/// Lowercase a keyword for storage.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword.to_lowercase()
}

/// Serialize keywords into the binary keyword block.
pub fn encode_keywords(keywords: &[String]) -> Result<Vec<u8>> {
    if keywords.len() > u16::MAX as usize {
        return Err(StoreError::InputRange("too many keywords (max 65535)".into()));
    }

    let mut buf = Vec::with_capacity(2 + keywords.len() * 8);
    buf.extend_from_slice(&(keywords.len() as u16).to_be_bytes());

    for kw in keywords {
        let normalized = normalize_keyword(kw);
        validate_keyword(&normalized)?;
        buf.push(normalized.len() as u8);
        buf.extend_from_slice(normalized.as_bytes());
    }

    if buf.len() > MAX_KEYWORDS_BLOCK_LEN {
        return Err(StoreError::InputRange(format!(
            "keywords block exceeds maximum size of {MAX_KEYWORDS_BLOCK_LEN} bytes"
        )));
    }
    Ok(buf)
}

/// Deserialize a keyword block.
pub fn decode_keywords(data: &[u8]) -> Result<Vec<String>> {
    if data.len() < 2 {
        return Err(StoreError::Corruption("keywords block too short".into()));
    }
    let count = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut keywords = Vec::with_capacity(count);
    let mut pos = 2;
    for i in 0..count {
        let len = *data
            .get(pos)
            .ok_or_else(|| StoreError::Corruption(format!("truncated keyword length at index {i}")))?
            as usize;
        pos += 1;
        let bytes = data
            .get(pos..pos + len)
            .ok_or_else(|| StoreError::Corruption(format!("truncated keyword at index {i}")))?;
        let kw = std::str::from_utf8(bytes)
            .map_err(|_| StoreError::Corruption(format!("keyword at index {i} is not utf-8")))?;
        keywords.push(kw.to_string());
        pos += len;
    }
    Ok(keywords)
}

/// Serialize an entry to the on-disk binary format.
pub fn encode_entry(entry: &Entry) -> Result<Vec<u8>> {
    let kw_bytes = encode_keywords(&entry.keywords)?;

    if entry.key.len() > ENTRY_MAX_KEY_LEN {
        return Err(StoreError::InputRange(format!(
            "key exceeds maximum length of {ENTRY_MAX_KEY_LEN} bytes"
        )));
    }

    let total = HEADER_SIZE
        + entry.key.len()
        + kw_bytes.len()
        + entry.primary.len()
        + entry.secondary.len();
    let mut buf = Vec::with_capacity(total);

    buf.push(HEADER_SIZE as u8);
    buf.push(entry.flags.encode());
    buf.extend_from_slice(&(entry.key.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(entry.primary.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(entry.secondary.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(kw_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(&[0u8; 4]); // CRC placeholder

    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(&kw_bytes);
    buf.extend_from_slice(&entry.primary);
    buf.extend_from_slice(&entry.secondary);

    let crc = crc32fast::hash(&buf);
    buf[CRC_RANGE].copy_from_slice(&crc.to_be_bytes());

    Ok(buf)
}

/// Deserialize an entry, verifying the CRC and declared lengths.
pub fn decode_entry(data: &[u8]) -> Result<Entry> {
    if data.len() < HEADER_SIZE {
        return Err(StoreError::Corruption("record too short for header".into()));
    }
    let header_size = data[0] as usize;
    if header_size > data.len() {
        return Err(StoreError::Corruption(
            "header size exceeds record length".into(),
        ));
    }

    let flags = EntryFlags::decode(data[1]);
    let key_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let primary_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let secondary_len = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let kw_len = u16::from_be_bytes([data[12], data[13]]) as usize;
    let stored_crc = u32::from_be_bytes([data[14], data[15], data[16], data[17]]);

    let mut zeroed = data.to_vec();
    zeroed[CRC_RANGE].fill(0);
    let computed_crc = crc32fast::hash(&zeroed);
    if stored_crc != computed_crc {
        return Err(StoreError::Corruption(format!(
            "CRC mismatch: stored={stored_crc:08x} computed={computed_crc:08x}"
        )));
    }

    let key_start = header_size;
    let key_end = key_start + key_len;
    let kw_end = key_end + kw_len;
    let primary_end = kw_end + primary_len;
    let secondary_end = primary_end + secondary_len;
    if secondary_end > data.len() {
        return Err(StoreError::Corruption(
            "declared lengths exceed record length".into(),
        ));
    }

    let keywords = decode_keywords(&data[key_end..kw_end])?;

    Ok(Entry {
        flags,
        key: data[key_start..key_end].to_vec(),
        keywords,
        primary: data[kw_end..primary_end].to_vec(),
        secondary: data[primary_end..secondary_end].to_vec(),
    })
}

/// Encode a vector id for the secondary field (u64 big-endian).
pub fn vector_id_to_bytes(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Decode a vector id from the secondary field.
pub fn bytes_to_vector_id(data: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = data
        .try_into()
        .map_err(|_| StoreError::Corruption("vector id field is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(arr))
}
