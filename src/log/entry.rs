//! Log entries as returned by `get-entries` and a zero-copy decoder for the
//! RFC 6962 `MerkleTreeLeaf` structure carried in `leaf_input`.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use std::fmt;

const LEAF_VERSION_V1: u8 = 0;
const LEAF_TYPE_TIMESTAMPED_ENTRY: u8 = 0;
const ENTRY_TYPE_X509: u16 = 0;
const ENTRY_TYPE_PRECERT: u16 = 1;
const ISSUER_KEY_HASH_LEN: usize = 32;

/// One log record at a given index. Payloads stay opaque until the extractor
/// decodes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub leaf_input: Vec<u8>,
    pub extra_data: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: u64, leaf_input: Vec<u8>, extra_data: Vec<u8>) -> Self {
        Self {
            index,
            leaf_input,
            extra_data,
        }
    }

    /// Builds an entry from the base64 fields of a `get-entries` response.
    ///
    /// Invalid base64 yields an empty payload instead of an error so one bad
    /// record never fails the surrounding page.
    pub fn from_encoded(index: u64, leaf_input: &str, extra_data: &str) -> Self {
        let leaf_input = BASE64_STANDARD.decode(leaf_input).unwrap_or_else(|err| {
            tracing::trace!(index, error = %err, "leaf_input is not valid base64");
            Vec::new()
        });
        let extra_data = BASE64_STANDARD.decode(extra_data).unwrap_or_default();
        Self::new(index, leaf_input, extra_data)
    }

    pub fn decode_leaf(&self) -> Result<TimestampedEntry<'_>, LeafDecodeError> {
        decode_leaf(&self.leaf_input)
    }
}

/// Signed payload of a timestamped entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafEntry<'a> {
    X509 {
        certificate: &'a [u8],
    },
    Precert {
        issuer_key_hash: &'a [u8],
        tbs_certificate: &'a [u8],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedEntry<'a> {
    pub timestamp: u64,
    pub entry: LeafEntry<'a>,
    pub extensions: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafDecodeError {
    Truncated { needed: usize, remaining: usize },
    UnsupportedVersion(u8),
    UnsupportedLeafType(u8),
    UnsupportedEntryType(u16),
    TrailingBytes(usize),
}

impl fmt::Display for LeafDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafDecodeError::Truncated { needed, remaining } => {
                write!(f, "leaf truncated: needed {needed} bytes, {remaining} remaining")
            }
            LeafDecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported leaf version {version}")
            }
            LeafDecodeError::UnsupportedLeafType(leaf_type) => {
                write!(f, "unsupported leaf type {leaf_type}")
            }
            LeafDecodeError::UnsupportedEntryType(entry_type) => {
                write!(f, "unsupported entry type {entry_type}")
            }
            LeafDecodeError::TrailingBytes(count) => {
                write!(f, "{count} unexpected trailing bytes after leaf")
            }
        }
    }
}

impl std::error::Error for LeafDecodeError {}

/// Decodes a `MerkleTreeLeaf` (v1, `timestamped_entry`).
pub fn decode_leaf(input: &[u8]) -> Result<TimestampedEntry<'_>, LeafDecodeError> {
    let mut reader = Reader::new(input);

    let version = reader.u8()?;
    if version != LEAF_VERSION_V1 {
        return Err(LeafDecodeError::UnsupportedVersion(version));
    }
    let leaf_type = reader.u8()?;
    if leaf_type != LEAF_TYPE_TIMESTAMPED_ENTRY {
        return Err(LeafDecodeError::UnsupportedLeafType(leaf_type));
    }

    let timestamp = reader.u64()?;
    let entry = match reader.u16()? {
        ENTRY_TYPE_X509 => LeafEntry::X509 {
            certificate: reader.opaque24()?,
        },
        ENTRY_TYPE_PRECERT => LeafEntry::Precert {
            issuer_key_hash: reader.take(ISSUER_KEY_HASH_LEN)?,
            tbs_certificate: reader.opaque24()?,
        },
        other => return Err(LeafDecodeError::UnsupportedEntryType(other)),
    };
    let extensions = reader.opaque16()?;

    if reader.remaining() > 0 {
        return Err(LeafDecodeError::TrailingBytes(reader.remaining()));
    }

    Ok(TimestampedEntry {
        timestamp,
        entry,
        extensions,
    })
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], LeafDecodeError> {
        if self.data.len() < count {
            return Err(LeafDecodeError::Truncated {
                needed: count,
                remaining: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(count);
        self.data = tail;
        Ok(head)
    }

    fn uint(&mut self, width: usize) -> Result<u64, LeafDecodeError> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    fn u8(&mut self) -> Result<u8, LeafDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, LeafDecodeError> {
        Ok(self.uint(2)? as u16)
    }

    fn u64(&mut self) -> Result<u64, LeafDecodeError> {
        self.uint(8)
    }

    fn opaque24(&mut self) -> Result<&'a [u8], LeafDecodeError> {
        let len = self.uint(3)? as usize;
        self.take(len)
    }

    fn opaque16(&mut self) -> Result<&'a [u8], LeafDecodeError> {
        let len = self.uint(2)? as usize;
        self.take(len)
    }
}
