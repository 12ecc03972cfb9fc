// src/compression.rs

//! Unified decompression for deb archive members.
//!
//! The data and control members of a deb may be gzip, xz, zstd, or bzip2
//! compressed, or stored raw. Formats are recognized both by member name
//! extension and by magic bytes.

use std::io::{self, Read};

use crate::error::{Error, Result};

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (raw data)
    None,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    Xz,
    /// Zstandard compression (.zst)
    Zstd,
    /// Bzip2 compression (.bz2)
    Bzip2,
}

impl CompressionFormat {
    /// Detect compression format from a member or file name.
    pub fn from_extension(name: &str) -> Self {
        if name.ends_with(".gz") || name.ends_with(".tgz") {
            Self::Gzip
        } else if name.ends_with(".xz") {
            Self::Xz
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Self::Zstd
        } else if name.ends_with(".bz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    /// Detect compression format from magic bytes.
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00` (FD + "7zXZ" + NUL)
    /// - Zstd: `28 b5 2f fd`
    /// - Bzip2: `42 5a 68` ("BZh")
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Self::Gzip
        } else if data.len() >= 6 && data[..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
            Self::Xz
        } else if data.len() >= 4 && data[..4] == [0x28, 0xb5, 0x2f, 0xfd] {
            Self::Zstd
        } else if data.len() >= 3 && data[..3] == [0x42, 0x5a, 0x68] {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    /// Human-readable name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format.
///
/// Returns a boxed `Read` that decompresses on the fly. For
/// `CompressionFormat::None` the reader passes through unchanged.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| {
                Error::Extract(format!("cannot create zstd decoder: {}", e))
            })?;
            Ok(Box::new(decoder))
        }
        CompressionFormat::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
    }
}

/// Decompress a byte slice using the specified format.
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>> {
    let mut decoder = create_decoder(data, format)?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e: io::Error| Error::Extract(format!("cannot decompress {} data: {}", format.name(), e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CompressionFormat::from_extension("data.tar.gz"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_extension("data.tar.xz"), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::from_extension("data.tar.zst"), CompressionFormat::Zstd);
        assert_eq!(CompressionFormat::from_extension("data.tar.bz2"), CompressionFormat::Bzip2);
        assert_eq!(CompressionFormat::from_extension("data.tar"), CompressionFormat::None);
    }

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x1f, 0x8b, 0x08, 0x00]),
            CompressionFormat::Gzip
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
            CompressionFormat::Xz
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x28, 0xb5, 0x2f, 0xfd]),
            CompressionFormat::Zstd
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(b"BZh91AY"),
            CompressionFormat::Bzip2
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x00, 0x00, 0x00, 0x00]),
            CompressionFormat::None
        );
        assert_eq!(CompressionFormat::from_magic_bytes(&[0x1f]), CompressionFormat::None);
    }

    #[test]
    fn test_decompress_none() {
        let data = b"raw bytes";
        assert_eq!(decompress(data, CompressionFormat::None).unwrap(), data);
    }

    #[test]
    fn test_decompress_gzip_roundtrip() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(
            CompressionFormat::from_magic_bytes(&compressed),
            CompressionFormat::Gzip
        );
        assert_eq!(decompress(&compressed, CompressionFormat::Gzip).unwrap(), b"hello");
    }

    #[test]
    fn test_decompress_zstd_roundtrip() {
        let compressed = zstd::encode_all(&b"zstd payload"[..], 0).unwrap();
        assert_eq!(decompress(&compressed, CompressionFormat::Zstd).unwrap(), b"zstd payload");
    }
}
