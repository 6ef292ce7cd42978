//! Versioned, module-chunked snapshot container.
//!
//! Layout:
//! - 19-byte magic, major and minor format version, 16-byte machine name
//! - optional tool version block: 13-byte magic, 4 version bytes, LE u32
//!   build revision (files written before the block existed omit it)
//! - modules: 16-byte name, major, minor, LE u32 size (header included),
//!   then the module content
//!
//! All multi-byte values are little-endian. Modules are located by a linear
//! scan, so the file needs no index.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

pub const SNAPSHOT_MAGIC: &[u8; 19] = b"VICE Snapshot File\x1a";
pub const SNAPSHOT_MAJOR: u8 = 2;
pub const SNAPSHOT_MINOR: u8 = 0;
pub const SNAPSHOT_MACHINE_NAME_LEN: usize = 16;

pub const VERSION_MAGIC: &[u8; 13] = b"VICE Version\x1a";

pub const MODULE_NAME_LEN: usize = 16;
pub const MODULE_HEADER_SIZE: usize = MODULE_NAME_LEN + 1 + 1 + 4;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a snapshot file")]
    BadMagic,
    #[error("snapshot is for machine '{found}', expected '{expected}'")]
    MachineMismatch { expected: String, found: String },
    #[error("snapshot module '{0}' not found")]
    ModuleNotFound(String),
    #[error("snapshot module '{name}' version {major}.{minor} is not supported")]
    ModuleVersion { name: String, major: u8, minor: u8 },
    #[error("snapshot truncated in {0}")]
    Truncated(String),
    #[error("snapshot module '{0}' does not fit in 4 GiB")]
    ModuleTooLarge(String),
    #[error("snapshot module '{module}' is corrupt: {reason}")]
    Corrupt { module: String, reason: String },
}

/// Version of the program that wrote a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToolVersion {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
    pub patch: u8,
    pub revision: u32,
}

impl ToolVersion {
    /// Version of this crate.
    pub fn current() -> Self {
        let parse = |s: &str| s.parse::<u8>().unwrap_or(0);
        Self {
            major: parse(env!("CARGO_PKG_VERSION_MAJOR")),
            minor: parse(env!("CARGO_PKG_VERSION_MINOR")),
            micro: parse(env!("CARGO_PKG_VERSION_PATCH")),
            patch: 0,
            revision: 0,
        }
    }
}

pub fn version_is_equal(major: u8, minor: u8, want_major: u8, want_minor: u8) -> bool {
    major == want_major && minor == want_minor
}

pub fn version_is_bigger(major: u8, minor: u8, than_major: u8, than_minor: u8) -> bool {
    (major, minor) > (than_major, than_minor)
}

pub fn version_is_smaller(major: u8, minor: u8, than_major: u8, than_minor: u8) -> bool {
    (major, minor) < (than_major, than_minor)
}

fn write_padded(buf: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width);
    buf.extend_from_slice(&bytes[..len]);
    buf.resize(buf.len() + (width - len), 0);
}

fn read_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Builds a snapshot in memory.
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new(major: u8, minor: u8, machine_name: &str) -> Self {
        Self::with_version(major, minor, machine_name, ToolVersion::current())
    }

    pub fn with_version(major: u8, minor: u8, machine_name: &str, version: ToolVersion) -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.push(major);
        buf.push(minor);
        write_padded(&mut buf, machine_name, SNAPSHOT_MACHINE_NAME_LEN);
        buf.extend_from_slice(VERSION_MAGIC);
        buf.extend_from_slice(&[version.major, version.minor, version.micro, version.patch]);
        buf.extend_from_slice(&version.revision.to_le_bytes());
        Self { buf }
    }

    /// Start a module. Its size field is backpatched when the returned
    /// writer is closed or dropped.
    pub fn create_module(&mut self, name: &str, major: u8, minor: u8) -> ModuleWriter<'_> {
        let start = self.buf.len();
        write_padded(&mut self.buf, name, MODULE_NAME_LEN);
        self.buf.push(major);
        self.buf.push(minor);
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        ModuleWriter {
            buf: &mut self.buf,
            name: name.to_string(),
            start,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        fs::write(path, &self.buf)?;
        debug!(
            "Snapshot: wrote {} bytes to {}",
            self.buf.len(),
            path.display()
        );
        Ok(())
    }
}

/// Appends one module's content to a [`SnapshotWriter`].
pub struct ModuleWriter<'a> {
    buf: &'a mut Vec<u8>,
    name: String,
    start: usize,
}

impl ModuleWriter<'_> {
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// NUL-terminated string.
    pub fn write_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.push(0);
    }

    fn content_size(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Finish the module, failing if it is too large for the size field.
    pub fn close(self) -> Result<(), SnapshotError> {
        if u32::try_from(self.content_size()).is_err() {
            return Err(SnapshotError::ModuleTooLarge(self.name.clone()));
        }
        Ok(())
    }
}

impl Drop for ModuleWriter<'_> {
    fn drop(&mut self) {
        let size = u32::try_from(self.content_size()).unwrap_or(u32::MAX);
        let at = self.start + MODULE_NAME_LEN + 2;
        self.buf[at..at + 4].copy_from_slice(&size.to_le_bytes());
    }
}

/// Location of one module inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub major: u8,
    pub minor: u8,
    pub size: u32,
    pub offset: usize,
}

/// A parsed snapshot held in memory.
#[derive(Debug, Clone)]
pub struct Snapshot {
    data: Vec<u8>,
    major: u8,
    minor: u8,
    machine_name: String,
    version: Option<ToolVersion>,
    first_module: usize,
}

impl Snapshot {
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, SnapshotError> {
        let header_len = SNAPSHOT_MAGIC.len() + 2 + SNAPSHOT_MACHINE_NAME_LEN;
        if data.len() < header_len {
            return Err(if data.starts_with(&SNAPSHOT_MAGIC[..data.len().min(19)]) {
                SnapshotError::Truncated("header".to_string())
            } else {
                SnapshotError::BadMagic
            });
        }
        if &data[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let mut pos = SNAPSHOT_MAGIC.len();
        let major = data[pos];
        let minor = data[pos + 1];
        pos += 2;
        let machine_name = read_padded(&data[pos..pos + SNAPSHOT_MACHINE_NAME_LEN]);
        pos += SNAPSHOT_MACHINE_NAME_LEN;

        let version_len = VERSION_MAGIC.len() + 4 + 4;
        let version = if data.len() >= pos + version_len
            && &data[pos..pos + VERSION_MAGIC.len()] == VERSION_MAGIC
        {
            let v = &data[pos + VERSION_MAGIC.len()..pos + version_len];
            pos += version_len;
            Some(ToolVersion {
                major: v[0],
                minor: v[1],
                micro: v[2],
                patch: v[3],
                revision: u32::from_le_bytes([v[4], v[5], v[6], v[7]]),
            })
        } else {
            warn!("Snapshot: no version block, file was written before 2.4.30");
            None
        };

        Ok(Self {
            data,
            major,
            minor,
            machine_name,
            version,
            first_module: pos,
        })
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    pub fn tool_version(&self) -> Option<ToolVersion> {
        self.version
    }

    pub fn check_machine(&self, expected: &str) -> Result<(), SnapshotError> {
        if self.machine_name != expected {
            return Err(SnapshotError::MachineMismatch {
                expected: expected.to_string(),
                found: self.machine_name.clone(),
            });
        }
        Ok(())
    }

    /// Walk the module headers in file order.
    pub fn modules(&self) -> Result<Vec<ModuleInfo>, SnapshotError> {
        let mut modules = Vec::new();
        let mut pos = self.first_module;
        while pos < self.data.len() {
            if self.data.len() - pos < MODULE_HEADER_SIZE {
                return Err(SnapshotError::Truncated("module header".to_string()));
            }
            let header = &self.data[pos..pos + MODULE_HEADER_SIZE];
            let name = read_padded(&header[..MODULE_NAME_LEN]);
            let size = u32::from_le_bytes([
                header[MODULE_NAME_LEN + 2],
                header[MODULE_NAME_LEN + 3],
                header[MODULE_NAME_LEN + 4],
                header[MODULE_NAME_LEN + 5],
            ]);
            let size_usize = size as usize;
            if size_usize < MODULE_HEADER_SIZE || pos + size_usize > self.data.len() {
                return Err(SnapshotError::Truncated(format!("module '{name}'")));
            }
            modules.push(ModuleInfo {
                name,
                major: header[MODULE_NAME_LEN],
                minor: header[MODULE_NAME_LEN + 1],
                size,
                offset: pos,
            });
            pos += size_usize;
        }
        Ok(modules)
    }

    /// Look a module up by name. `Ok(None)` means the file is intact but has
    /// no such module.
    pub fn find_module(&self, name: &str) -> Result<Option<ModuleReader<'_>>, SnapshotError> {
        let Some(info) = self.modules()?.into_iter().find(|m| m.name == name) else {
            return Ok(None);
        };
        let content = &self.data[info.offset + MODULE_HEADER_SIZE..info.offset + info.size as usize];
        Ok(Some(ModuleReader {
            name: info.name,
            major: info.major,
            minor: info.minor,
            data: content,
            pos: 0,
        }))
    }

    pub fn module(&self, name: &str) -> Result<ModuleReader<'_>, SnapshotError> {
        self.find_module(name)?
            .ok_or_else(|| SnapshotError::ModuleNotFound(name.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Sequential reader over one module's content.
#[derive(Debug, Clone)]
pub struct ModuleReader<'a> {
    name: String,
    major: u8,
    minor: u8,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ModuleReader<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// Fail unless the module was written with `major` and at most `minor`.
    pub fn require_version(&self, major: u8, minor: u8) -> Result<(), SnapshotError> {
        if self.major != major || version_is_bigger(self.major, self.minor, major, minor) {
            return Err(SnapshotError::ModuleVersion {
                name: self.name.clone(),
                major: self.major,
                minor: self.minor,
            });
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.remaining() < len {
            return Err(SnapshotError::Truncated(format!("module '{}'", self.name)));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, SnapshotError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SnapshotError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// NUL-terminated string.
    pub fn read_str(&mut self) -> Result<String, SnapshotError> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(SnapshotError::Truncated(format!("module '{}'", self.name)));
        };
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(text)
    }

    pub fn corrupt(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::Corrupt {
            module: self.name.clone(),
            reason: reason.into(),
        }
    }
}
