// src/jsonwall.rs

//! Line-oriented sorted JSON database writer.
//!
//! A jsonwall stream starts with a header line of the form
//! `{"jsonwall":"1.0","schema":"<schema>","count":N}` followed by one JSON
//! object per line, sorted in lexicographic byte order of the serialized
//! strings. `count` is the total number of lines, header included, so a
//! reader can preallocate and detect truncation. Sorting makes the output
//! a pure function of the added entries and keeps lookups bisectable.

use std::io::Write;

use serde::Serialize;

use crate::error::{Error, Result};

const FORMAT_VERSION: &str = "1.0";

#[derive(Serialize)]
struct Header<'a> {
    jsonwall: &'a str,
    schema: &'a str,
    count: usize,
}

/// Accumulates serialized rows and writes them out sorted.
pub struct DbWriter {
    schema: String,
    entries: Vec<String>,
}

impl DbWriter {
    pub fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            entries: Vec::new(),
        }
    }

    /// Serialize and queue one row.
    pub fn add<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        self.entries.push(line);
        Ok(())
    }

    /// Number of queued rows, header excluded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the header and all rows, sorted, to `w`.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> Result<()> {
        self.entries.sort_unstable();

        let header = Header {
            jsonwall: FORMAT_VERSION,
            schema: &self.schema,
            count: self.entries.len() + 1,
        };
        let header = serde_json::to_string(&header)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        w.write_all(header.as_bytes())?;
        w.write_all(b"\n")?;
        for entry in &self.entries {
            w.write_all(entry.as_bytes())?;
            w.write_all(b"\n")?;
        }
        Ok(())
    }
}
