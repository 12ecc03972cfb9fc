// tests/common/mod.rs

//! Shared fixture builders for integration tests: in-memory debs, release
//! directories, an in-memory archive and a scripted mutation interpreter.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use chisel::archive::{Archive, Options, PackageInfo};
use chisel::hash::sha256;
use chisel::scripts::{ContentView, MutationInterpreter};
use chisel::{Error, Result};
use tempfile::TempDir;

/// One entry of a test package's data tar.
pub enum DebEntry {
    Dir(&'static str, u32),
    File(&'static str, &'static [u8], u32),
    Symlink(&'static str, &'static str),
}

/// Build a complete deb: ar container, gzipped control and data tars.
pub fn make_deb(package: &str, version: &str, arch: &str, entries: &[DebEntry]) -> Vec<u8> {
    let control = format!(
        "Package: {}\nVersion: {}\nArchitecture: {}\n",
        package, version, arch
    );
    let control_tar = make_tar(&[TarInput::File("./control", control.as_bytes(), 0o644)]);

    let mut data_inputs = vec![TarInput::Dir("./", 0o755)];
    for entry in entries {
        data_inputs.push(match entry {
            DebEntry::Dir(path, mode) => TarInput::Dir(path, *mode),
            DebEntry::File(path, data, mode) => TarInput::File(path, data, *mode),
            DebEntry::Symlink(path, target) => TarInput::Symlink(path, target),
        });
    }
    let data_tar = make_tar(&data_inputs);

    make_ar(&[
        ("debian-binary", b"2.0\n".to_vec()),
        ("control.tar.gz", gzip(&control_tar)),
        ("data.tar.gz", gzip(&data_tar)),
    ])
}

enum TarInput<'a> {
    Dir(&'a str, u32),
    File(&'a str, &'a [u8], u32),
    Symlink(&'a str, &'a str),
}

fn make_tar(inputs: &[TarInput]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for input in inputs {
        let mut header = tar::Header::new_gnu();
        match input {
            TarInput::Dir(path, mode) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(*mode);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, *path, &b""[..]).unwrap();
            }
            TarInput::File(path, data, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, *path, *data).unwrap();
            }
            TarInput::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, *path, *target).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

fn make_ar(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"!<arch>\n");
    for (name, data) in members {
        out.extend_from_slice(format!("{:<16}", name).as_bytes());
        out.extend_from_slice(format!("{:<12}", 0).as_bytes());
        out.extend_from_slice(format!("{:<6}", 0).as_bytes());
        out.extend_from_slice(format!("{:<6}", 0).as_bytes());
        out.extend_from_slice(format!("{:<8}", "100644").as_bytes());
        out.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
        out.extend_from_slice(b"`\n");
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Archive over in-memory debs, as tests have no package pool on disk.
pub struct MemArchive {
    options: Options,
    packages: HashMap<String, (String, Vec<u8>)>,
}

impl MemArchive {
    pub fn new(arch: &str) -> Self {
        Self {
            options: Options {
                label: "ubuntu".to_string(),
                version: "24.04".to_string(),
                arch: arch.to_string(),
                ..Default::default()
            },
            packages: HashMap::new(),
        }
    }

    pub fn add(&mut self, name: &str, version: &str, deb: Vec<u8>) {
        self.packages.insert(name.to_string(), (version.to_string(), deb));
    }
}

impl Archive for MemArchive {
    fn options(&self) -> &Options {
        &self.options
    }

    fn exists(&self, pkg: &str) -> bool {
        self.packages.contains_key(pkg)
    }

    fn fetch(&self, pkg: &str) -> Result<Box<dyn Read + '_>> {
        let (_, deb) = self
            .packages
            .get(pkg)
            .ok_or_else(|| Error::Archive(format!("cannot find package {:?} in archive", pkg)))?;
        Ok(Box::new(Cursor::new(deb.clone())))
    }

    fn info(&self, pkg: &str) -> Result<PackageInfo> {
        let (version, deb) = self
            .packages
            .get(pkg)
            .ok_or_else(|| Error::Archive(format!("cannot find package {:?} in archive", pkg)))?;
        Ok(PackageInfo {
            name: pkg.to_string(),
            version: version.clone(),
            arch: self.options.arch.clone(),
            sha256: sha256(deb),
        })
    }
}

/// Interpreter over a line-oriented script language, standing in for the
/// real script engine: `write <path> <data>`, `read <path>`, `list <dir>`.
pub struct ScriptedInterpreter;

impl MutationInterpreter for ScriptedInterpreter {
    fn run(&self, script: &str, content: &mut ContentView) -> Result<()> {
        for line in script.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
            match cmd {
                "write" => {
                    let (path, data) = rest
                        .split_once(' ')
                        .ok_or_else(|| Error::Mutate(format!("bad script line: {:?}", line)))?;
                    content.write(path, data)?;
                }
                "read" => {
                    content.read(rest)?;
                }
                "list" => {
                    content.list(rest)?;
                }
                other => {
                    return Err(Error::Mutate(format!("unknown script command: {:?}", other)));
                }
            }
        }
        Ok(())
    }
}

/// Write a release tree from (relative path, contents) pairs.
pub fn write_release_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, data) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
    dir
}

/// The archive configuration used by most test releases.
pub const CHISEL_YAML: &str = "\
format: v1
archives:
    ubuntu:
        version: 24.04
        suites: [noble]
        components: [main]
        priority: 20
";

/// Decompress a written chisel.db back into its jsonwall text.
pub fn read_manifest(path: &Path) -> String {
    let file = fs::File::open(path).unwrap();
    let mut decoder = zstd::Decoder::new(file).unwrap();
    let mut text = String::new();
    decoder.read_to_string(&mut text).unwrap();
    text
}
