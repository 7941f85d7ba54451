//! Binary encoding of class files and class archives.
//!
//! A class file is `magic | version | body`:
//! - 4 bytes magic `SBXC`
//! - u16 little-endian format version
//! - BCS encoded [`ClassFile`]
//!
//! Archives (`.sar`) bundle many encoded class files keyed by their class
//! path, the same way framework bytecode is shipped as a single BCS blob.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::class_file::ClassFile;
use crate::names::class_file_path;

pub const CLASS_MAGIC: [u8; 4] = *b"SBXC";
pub const CURRENT_VERSION: u16 = 1;
const HEADER_LEN: usize = 6;

/// Why a byte sequence is not a valid class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort { len: usize },
    BadMagic { found: [u8; 4] },
    UnsupportedVersion { version: u16 },
    Body { reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len } => {
                write!(f, "class file too short ({} bytes)", len)
            }
            DecodeError::BadMagic { found } => {
                write!(f, "bad magic 0x{}", hex::encode(found))
            }
            DecodeError::UnsupportedVersion { version } => {
                write!(f, "unsupported class file version {}", version)
            }
            DecodeError::Body { reason } => write!(f, "malformed class body: {}", reason),
        }
    }
}

impl std::error::Error for DecodeError {}

// =============================================================================
// Class Files
// =============================================================================

/// Encode a class file with header.
pub fn encode_class(class: &ClassFile) -> Result<Vec<u8>> {
    let body = bcs::to_bytes(class)
        .with_context(|| format!("Failed to BCS-encode class {}", class.name))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&CLASS_MAGIC);
    bytes.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode a class file, rejecting bad headers and trailing bytes.
pub fn decode_class(bytes: &[u8]) -> Result<ClassFile, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TooShort { len: bytes.len() });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[..4]);
    if magic != CLASS_MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != CURRENT_VERSION {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    bcs::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| DecodeError::Body {
        reason: e.to_string(),
    })
}

/// SHA-256 of the raw class bytes; the key of every content-addressed cache.
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

// =============================================================================
// Archives
// =============================================================================

/// A bundle of encoded class files keyed by `name.class`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassArchive {
    pub entries: BTreeMap<String, Vec<u8>>,
}

impl ClassArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already encoded class under its class path.
    pub fn insert_bytes(&mut self, name: &str, bytes: Vec<u8>) {
        self.entries.insert(class_file_path(name), bytes);
    }

    /// Encode and add a class.
    pub fn insert_class(&mut self, class: &ClassFile) -> Result<()> {
        let bytes = encode_class(class)?;
        self.insert_bytes(&class.name, bytes);
        Ok(())
    }

    /// Raw bytes for a class name.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(&class_file_path(name)).map(Vec::as_slice)
    }

    /// Class names contained in the archive, sorted.
    pub fn class_names(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|path| path.strip_suffix(".class"))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).context("Failed to BCS-encode class archive")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bcs::from_bytes(bytes).context("Failed to decode class archive")
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write archive {}", path.display()))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read archive {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Archive {}", path.display()))
    }
}
