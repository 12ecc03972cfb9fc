// src/hash.rs

//! SHA-256 digests for extracted and synthesized content.
//!
//! Every path recorded in the report carries the hex digest of its content,
//! matching the digests advertised by Debian archives.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Compute the SHA-256 hex digest of a byte slice.
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of everything a reader yields.
///
/// Streams in 8 KiB chunks so package payloads are never buffered whole.
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
    Ok(format!("{:x}", hasher.finalize()))
}

/// A writer adaptor that hashes and counts bytes as they pass through.
///
/// Used when writing files so content is digested in the same pass that
/// puts it on disk.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: io::Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Consume the adaptor, returning the inner writer, the hex digest and
    /// the number of bytes written.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, format!("{:x}", self.hasher.finalize()), self.size)
    }
}

impl<W: io::Write> io::Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
