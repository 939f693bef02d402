//! Key Module
//!
//! Structured keys and their order-preserving byte encoding.
//!
//! A [`Key`] is a sequence of typed parts. Every routing and ordering decision
//! in the cluster is made on the encoded form, so two keys are equal exactly
//! when their encodings are byte-equal, and key order is the lexicographic
//! order of the encodings.
//!
//! ## Encoding
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ Tag (1) │ Body                                         │
//! ├─────────┼──────────────────────────────────────────────┤
//! │ 0x10    │ null    (empty)                              │
//! │ 0x20    │ false   (empty)                              │
//! │ 0x21    │ true    (empty)                              │
//! │ 0x40    │ number  (8 bytes, sign-folded IEEE-754 BE)   │
//! │ 0x60    │ bytes   (escaped, 0x00 0x00 terminated)      │
//! │ 0x70    │ string  (UTF-8, escaped, 0x00 0x00 term.)    │
//! └─────────┴──────────────────────────────────────────────┘
//! ```
//! Inside bytes/strings a literal 0x00 is written as 0x00 0xFF, so the
//! terminator always sorts before any continuation.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{ClusterError, Result};

const TAG_NULL: u8 = 0x10;
const TAG_FALSE: u8 = 0x20;
const TAG_TRUE: u8 = 0x21;
const TAG_NUMBER: u8 = 0x40;
const TAG_BYTES: u8 = 0x60;
const TAG_STRING: u8 = 0x70;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

const SIGN_BIT: u64 = 1 << 63;

// =============================================================================
// Key Types
// =============================================================================

/// One typed component of a key
#[derive(Debug, Clone)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Number(f64),
    Bytes(Vec<u8>),
    String(String),
}

/// A structured key: an ordered sequence of typed parts
#[derive(Debug, Clone, Default)]
pub struct Key {
    parts: Vec<KeyPart>,
}

impl Key {
    /// Build a key from its parts
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encode this key into its ordered byte form
    pub fn encode(&self) -> EncodedKey {
        encode(self)
    }
}

/// Build a [`Key`] from heterogeneous parts: `key!["user", 42]`
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::key::Key::new(vec![$($crate::key::KeyPart::from($part)),*])
    };
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        encode(self) == encode(other)
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        encode(self).cmp(&encode(other))
    }
}

impl From<Vec<KeyPart>> for Key {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self::new(parts)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(vec![KeyPart::from(s)])
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::new(vec![KeyPart::from(s)])
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::String(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::String(s)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl From<f64> for KeyPart {
    fn from(n: f64) -> Self {
        KeyPart::Number(n)
    }
}

impl From<i32> for KeyPart {
    fn from(n: i32) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<u64> for KeyPart {
    fn from(n: u64) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<usize> for KeyPart {
    fn from(n: usize) -> Self {
        KeyPart::Number(n as f64)
    }
}

impl From<Vec<u8>> for KeyPart {
    fn from(b: Vec<u8>) -> Self {
        KeyPart::Bytes(b)
    }
}

impl From<&[u8]> for KeyPart {
    fn from(b: &[u8]) -> Self {
        KeyPart::Bytes(b.to_vec())
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Null => write!(f, "null"),
            KeyPart::Bool(b) => write!(f, "{}", b),
            KeyPart::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            KeyPart::Number(n) => write!(f, "{}", n),
            KeyPart::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            KeyPart::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// Encoded Keys
// =============================================================================

/// The ordered byte form of a key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedKey(Vec<u8>);

impl EncodedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode back into a structured key
    pub fn decode(&self) -> Result<Key> {
        decode(&self.0)
    }
}

impl From<Vec<u8>> for EncodedKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EncodedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// =============================================================================
// Encoding / Decoding
// =============================================================================

/// Encode a key into its ordered byte form
pub fn encode(key: &Key) -> EncodedKey {
    let mut out = Vec::with_capacity(key.parts.len() * 9);
    for part in &key.parts {
        encode_part(part, &mut out);
    }
    EncodedKey(out)
}

/// Compare two encoded keys
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn encode_part(part: &KeyPart, out: &mut Vec<u8>) {
    match part {
        KeyPart::Null => out.push(TAG_NULL),
        KeyPart::Bool(false) => out.push(TAG_FALSE),
        KeyPart::Bool(true) => out.push(TAG_TRUE),
        KeyPart::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&fold_number(*n).to_be_bytes());
        }
        KeyPart::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_escaped(b, out);
        }
        KeyPart::String(s) => {
            out.push(TAG_STRING);
            encode_escaped(s.as_bytes(), out);
        }
    }
}

/// Map an f64 onto a u64 whose unsigned order matches numeric order
fn fold_number(n: f64) -> u64 {
    // -0.0 and 0.0 must encode identically
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    }
}

fn unfold_number(folded: u64) -> f64 {
    let bits = if folded & SIGN_BIT != 0 {
        folded & !SIGN_BIT
    } else {
        !folded
    };
    f64::from_bits(bits)
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &byte in bytes {
        if byte == ESCAPE {
            out.push(ESCAPE);
            out.push(ESCAPED_ZERO);
        } else {
            out.push(byte);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Decode an encoded key back into its parts
pub fn decode(bytes: &[u8]) -> Result<Key> {
    let mut parts = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let tag = bytes[pos];
        pos += 1;

        let part = match tag {
            TAG_NULL => KeyPart::Null,
            TAG_FALSE => KeyPart::Bool(false),
            TAG_TRUE => KeyPart::Bool(true),
            TAG_NUMBER => {
                let end = pos + 8;
                let raw: [u8; 8] = bytes
                    .get(pos..end)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| {
                        ClusterError::KeyEncoding(format!(
                            "truncated number at offset {}",
                            pos
                        ))
                    })?;
                pos = end;
                KeyPart::Number(unfold_number(u64::from_be_bytes(raw)))
            }
            TAG_BYTES => {
                let (raw, next) = decode_escaped(bytes, pos)?;
                pos = next;
                KeyPart::Bytes(raw)
            }
            TAG_STRING => {
                let (raw, next) = decode_escaped(bytes, pos)?;
                pos = next;
                let s = String::from_utf8(raw).map_err(|e| {
                    ClusterError::KeyEncoding(format!("invalid UTF-8 in string part: {}", e))
                })?;
                KeyPart::String(s)
            }
            other => {
                return Err(ClusterError::KeyEncoding(format!(
                    "unknown type tag 0x{:02x} at offset {}",
                    other,
                    pos - 1
                )))
            }
        };

        parts.push(part);
    }

    Ok(Key::new(parts))
}

/// Returns the unescaped body and the offset just past its terminator
fn decode_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut raw = Vec::new();

    loop {
        let byte = *bytes.get(pos).ok_or_else(|| {
            ClusterError::KeyEncoding("unterminated string or bytes part".to_string())
        })?;

        if byte != ESCAPE {
            raw.push(byte);
            pos += 1;
            continue;
        }

        match bytes.get(pos + 1) {
            Some(&TERMINATOR) => return Ok((raw, pos + 2)),
            Some(&ESCAPED_ZERO) => {
                raw.push(0x00);
                pos += 2;
            }
            Some(other) => {
                return Err(ClusterError::KeyEncoding(format!(
                    "invalid escape 0x00 0x{:02x} at offset {}",
                    other, pos
                )))
            }
            None => {
                return Err(ClusterError::KeyEncoding(
                    "dangling escape byte".to_string(),
                ))
            }
        }
    }
}
