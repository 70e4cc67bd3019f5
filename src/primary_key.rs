use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One component of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl KeyValue {
    fn tag(&self) -> u8 {
        match self {
            KeyValue::Int(_) => 1,
            KeyValue::String(_) => 2,
            KeyValue::Bytes(_) => 3,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::String(value)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(value) => write!(f, "{value}"),
            KeyValue::String(value) => f.write_str(value),
            KeyValue::Bytes(bytes) => f.write_str(&to_hex(bytes)),
        }
    }
}

/// Ordered tuple of primary-key column values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<KeyValue>);

impl PrimaryKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Single-column key.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Canonical, unambiguous byte encoding (tag + length-prefixed payload per component).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 12);
        for value in &self.0 {
            out.push(value.tag());
            match value {
                KeyValue::Int(int) => out.extend_from_slice(&int.to_be_bytes()),
                KeyValue::String(text) => push_len_prefixed(&mut out, text.as_bytes()),
                KeyValue::Bytes(bytes) => push_len_prefixed(&mut out, bytes),
            }
        }
        out
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

/// Hashing applied to primary keys before they enter the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFunction {
    /// Store the full key.
    #[default]
    None,
    /// 64-bit FNV-1a over the canonical encoding.
    Fnv64,
    /// SHA-256 over the canonical encoding.
    Sha256,
}

impl HashFunction {
    pub fn hash(self, key: &PrimaryKey) -> HashedPrimaryKey {
        match self {
            HashFunction::None => HashedPrimaryKey::Raw(key.clone()),
            HashFunction::Fnv64 => HashedPrimaryKey::Fnv64(fnv1a(&key.to_bytes())),
            HashFunction::Sha256 => {
                let digest = Sha256::digest(key.to_bytes());
                HashedPrimaryKey::Sha256(digest.into())
            }
        }
    }
}

/// Index lookup key produced by a [`HashFunction`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashedPrimaryKey {
    Raw(PrimaryKey),
    Fnv64(u64),
    Sha256([u8; 32]),
}

impl fmt::Display for HashedPrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashedPrimaryKey::Raw(key) => write!(f, "{key}"),
            HashedPrimaryKey::Fnv64(hash) => write!(f, "{hash:016x}"),
            HashedPrimaryKey::Sha256(digest) => f.write_str(&to_hex(digest)),
        }
    }
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

fn to_hex(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}
