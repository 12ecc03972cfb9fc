// src/deb/mod.rs

//! Debian binary package containers.
//!
//! A deb is an `ar` archive with three members: `debian-binary`,
//! `control.tar.*` and `data.tar.*`. The inner tars may be gzip, xz, zstd
//! or bzip2 compressed. Member readers are streaming; nothing is buffered
//! beyond the control section, which is small.

pub mod extract;

pub use extract::{extract, ExtractInfo, ExtractOptions};

use std::io::{self, Read};

use crate::compression::{create_decoder, CompressionFormat};
use crate::error::{Error, Result};

/// Architectures Debian archives publish packages for.
pub const KNOWN_ARCHES: &[&str] = &[
    "amd64", "arm64", "armhf", "i386", "ppc64el", "riscv64", "s390x",
];

/// True if `arch` is a known Debian architecture name.
pub fn valid_arch(arch: &str) -> bool {
    KNOWN_ARCHES.contains(&arch)
}

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_HEADER_SIZE: usize = 60;

/// Streaming reader over the members of an `ar` archive.
#[derive(Debug)]
pub struct ArReader<R: Read> {
    reader: R,
    /// Bytes of the current member not yet consumed, plus padding.
    remaining: u64,
}

/// Name and size of one `ar` member.
pub struct ArMemberInfo {
    pub name: String,
    pub size: u64,
}

impl<R: Read> ArReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|e| Error::Extract(format!("invalid deb file: {}", e)))?;
        if &magic != AR_MAGIC {
            return Err(Error::Extract("invalid deb file: bad ar header".to_string()));
        }
        Ok(Self { reader, remaining: 0 })
    }

    /// Advance to the next member header, skipping any unread data of the
    /// current member. Returns `None` at the end of the archive.
    pub fn next_member(&mut self) -> Result<Option<ArMemberInfo>> {
        if self.remaining > 0 {
            io::copy(&mut (&mut self.reader).take(self.remaining), &mut io::sink())?;
            self.remaining = 0;
        }

        let mut header = [0u8; AR_HEADER_SIZE];
        let mut read = 0;
        while read < AR_HEADER_SIZE {
            let n = self.reader.read(&mut header[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        if read == 0 {
            return Ok(None);
        }
        if read < AR_HEADER_SIZE {
            return Err(Error::Extract("invalid deb file: truncated ar member header".to_string()));
        }
        if &header[58..60] != b"`\n" {
            return Err(Error::Extract("invalid deb file: bad ar member magic".to_string()));
        }

        let name = String::from_utf8_lossy(&header[0..16])
            .trim_end()
            .trim_end_matches('/')
            .to_string();
        let size: u64 = String::from_utf8_lossy(&header[48..58])
            .trim_end()
            .parse()
            .map_err(|_| Error::Extract("invalid deb file: bad ar member size".to_string()))?;

        // Member data is aligned to two bytes.
        self.remaining = size + (size & 1);
        Ok(Some(ArMemberInfo { name, size }))
    }

    /// A reader limited to the current member's data.
    pub fn member_reader(&mut self, info: &ArMemberInfo) -> impl Read + '_ {
        self.remaining -= info.size;
        (&mut self.reader).take(info.size)
    }
}

/// Return a decompressing reader over the deb's data tar.
pub fn data_reader<'a, R: Read + 'a>(deb: R) -> Result<Box<dyn Read + 'a>> {
    let mut ar = ArReader::new(deb)?;
    while let Some(member) = ar.next_member()? {
        if member.name.starts_with("data.tar") {
            let format = CompressionFormat::from_extension(&member.name);
            let size = member.size;
            let reader = (ar.into_reader()).take(size);
            return create_decoder(reader, format);
        }
    }
    Err(Error::Extract("invalid deb file: no data.tar member".to_string()))
}

impl<R: Read> ArReader<R> {
    fn into_reader(self) -> R {
        self.reader
    }
}

/// Return the decompressed contents of the deb's control file.
pub fn control_content<R: Read>(deb: R) -> Result<String> {
    let mut ar = ArReader::new(deb)?;
    while let Some(member) = ar.next_member()? {
        if !member.name.starts_with("control.tar") {
            continue;
        }
        let format = CompressionFormat::from_extension(&member.name);
        let reader = ar.member_reader(&member);
        let decoder = create_decoder(reader, format)?;
        let mut archive = tar::Archive::new(decoder);
        for entry in archive
            .entries()
            .map_err(|e| Error::Extract(format!("cannot read control tar: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::Extract(format!("cannot read control tar: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| Error::Extract(format!("cannot read control tar: {}", e)))?
                .to_string_lossy()
                .into_owned();
            if path == "./control" || path == "control" {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|e| Error::Extract(format!("cannot read control file: {}", e)))?;
                return Ok(content);
            }
        }
        break;
    }
    Err(Error::Extract("invalid deb file: no control file".to_string()))
}

/// List the package paths found in the deb.
pub fn list<R: Read>(deb: R) -> Result<Vec<String>> {
    let inner = |deb: R| -> Result<Vec<String>> {
        let data = data_reader(deb)?;
        let mut archive = tar::Archive::new(data);
        let mut paths = Vec::new();
        for entry in archive.entries().map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let name = entry.path().map_err(Error::Io)?.to_string_lossy().into_owned();
            let Some(source) = tar_source_path(&name) else {
                continue;
            };
            paths.push(source);
        }
        Ok(paths)
    };
    inner(deb).map_err(|e| Error::Extract(format!("cannot list deb contents: {}", e)))
}

/// Convert a tar member name to an absolute package path.
///
/// Debian data tars name entries `./usr/bin/foo`; anything else is
/// metadata and is skipped.
pub(crate) fn tar_source_path(name: &str) -> Option<String> {
    if name.len() < 3 || !name.starts_with("./") {
        return None;
    }
    Some(name[1..].to_string())
}
