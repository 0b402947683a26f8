// src/hash.rs

//! SHA-256 helpers for fingerprints, manifests and release artifacts
//!
//! Every digest in xyz is lowercase hex SHA-256. [`Fingerprinter`] builds
//! digests over structured inputs with length-prefixed fields so that
//! `("ab", "c")` and `("a", "bc")` never collide.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Compute the SHA-256 of a byte slice
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the SHA-256 of everything readable from `reader`
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    sha256_reader(&mut file)
}

/// Incremental digest over named fields
///
/// The domain string separates digests of different kinds of input.
#[derive(Clone)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    pub fn new(domain: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.field("domain", domain);
        fp
    }

    /// Mix a named field into the digest
    pub fn field(&mut self, name: &str, value: impl AsRef<[u8]>) -> &mut Self {
        let value = value.as_ref();
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Mix an ordered sequence of key/value pairs into the digest
    pub fn map<'a, I>(&mut self, name: &str, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut count = 0u64;
        for (key, value) in entries {
            self.field(&format!("{}.key", name), key);
            self.field(&format!("{}.value", name), value);
            count += 1;
        }
        self.field(&format!("{}.len", name), count.to_le_bytes())
    }

    pub fn finish(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}
