//! Snapshot modules.
//!
//! A snapshot is a sequence of modules, one per chip or subsystem. Each
//! module starts with a fixed header:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 16   | Name, ASCII, NUL padded                 |
//! | 16     | 1    | Major version                           |
//! | 17     | 1    | Minor version                           |
//! | 18     | 4    | Module length including header (LE)    |
//!
//! Fields follow in little-endian order. Absolute clocks are never stored;
//! pending alarms are written as a delay relative to the saving domain's
//! clock and re-armed relative to the restoring domain's clock.

use thiserror::Error;

use crate::Clock;

pub const MODULE_NAME_LEN: usize = 16;
pub const MODULE_HEADER_LEN: usize = MODULE_NAME_LEN + 2 + 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot module {module:?} is truncated")]
    Truncated { module: String },
    #[error("expected snapshot module {expected:?}, found {found:?}")]
    BadModuleName { expected: String, found: String },
    #[error("snapshot module {module:?} version {major}.{minor} is not supported")]
    UnsupportedVersion { module: String, major: u8, minor: u8 },
    #[error("snapshot module {module:?} has an invalid {field}")]
    BadValue { module: String, field: &'static str },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Builds one module.
#[derive(Debug, Clone)]
pub struct ModuleWriter {
    buf: Vec<u8>,
}

impl ModuleWriter {
    #[must_use]
    pub fn new(name: &str, major: u8, minor: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        let mut padded = [0u8; MODULE_NAME_LEN];
        for (dst, src) in padded.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        buf.extend_from_slice(&padded);
        buf.push(major);
        buf.push(minor);
        buf.extend_from_slice(&[0; 4]);
        Self { buf }
    }

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

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// A pending alarm as presence flag plus delay from `now`.
    pub fn write_alarm(&mut self, pending: Option<Clock>, now: Clock) {
        match pending {
            Some(trigger) => {
                self.write_bool(true);
                self.write_u32(trigger.saturating_sub(now));
            }
            None => {
                self.write_bool(false);
                self.write_u32(0);
            }
        }
    }

    /// A past clock as its age relative to `now`.
    pub fn write_age(&mut self, clk: Clock, now: Clock) {
        self.write_u32(now.saturating_sub(clk));
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[MODULE_NAME_LEN + 2..MODULE_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
        self.buf
    }
}

/// Reads one module, checking its name and version.
#[derive(Debug, Clone)]
pub struct ModuleReader<'a> {
    name: String,
    data: &'a [u8],
    pos: usize,
    major: u8,
    minor: u8,
}

impl<'a> ModuleReader<'a> {
    /// Open the module at the start of `bytes`.
    ///
    /// Fails if the name differs from `expected` or the major version
    /// differs from `major`. A minor version newer than `minor` is accepted;
    /// trailing fields are ignored.
    pub fn open(bytes: &'a [u8], expected: &str, major: u8, minor: u8) -> SnapshotResult<Self> {
        let (name, found_major, found_minor, len) = parse_header(bytes, expected)?;
        if name != expected {
            return Err(SnapshotError::BadModuleName {
                expected: expected.to_string(),
                found: name,
            });
        }
        if found_major != major {
            return Err(SnapshotError::UnsupportedVersion {
                module: name,
                major: found_major,
                minor: found_minor,
            });
        }
        if found_minor > minor {
            log::warn!("snapshot module {name} is version {found_major}.{found_minor}, reading as {major}.{minor}");
        }
        Ok(Self {
            name,
            data: &bytes[..len],
            pos: MODULE_HEADER_LEN,
            major: found_major,
            minor: found_minor,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, count: usize) -> SnapshotResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(SnapshotError::Truncated {
                module: self.name.clone(),
            });
        }
        let out = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> SnapshotResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> SnapshotResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(self.bad_value("boolean")),
        }
    }

    pub fn read_u16(&mut self) -> SnapshotResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> SnapshotResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Inverse of [`ModuleWriter::write_alarm`], relative to `now`.
    pub fn read_alarm(&mut self, now: Clock) -> SnapshotResult<Option<Clock>> {
        let present = self.read_bool()?;
        let delay = self.read_u32()?;
        Ok(present.then(|| now.wrapping_add(delay)))
    }

    /// Inverse of [`ModuleWriter::write_age`].
    pub fn read_age(&mut self, now: Clock) -> SnapshotResult<Clock> {
        Ok(now.saturating_sub(self.read_u32()?))
    }

    #[must_use]
    pub fn bad_value(&self, field: &'static str) -> SnapshotError {
        SnapshotError::BadValue {
            module: self.name.clone(),
            field,
        }
    }
}

/// Split a stream of concatenated modules into `(name, module bytes)`.
pub fn split_modules(mut bytes: &[u8]) -> SnapshotResult<Vec<(String, &[u8])>> {
    let mut modules = Vec::new();
    while !bytes.is_empty() {
        let (name, _, _, len) = parse_header(bytes, "")?;
        let (module, rest) = bytes.split_at(len);
        modules.push((name, module));
        bytes = rest;
    }
    Ok(modules)
}

fn parse_header(bytes: &[u8], context: &str) -> SnapshotResult<(String, u8, u8, usize)> {
    let truncated = |name: &str| SnapshotError::Truncated {
        module: name.to_string(),
    };
    if bytes.len() < MODULE_HEADER_LEN {
        return Err(truncated(context));
    }
    let raw_name = &bytes[..MODULE_NAME_LEN];
    let end = raw_name.iter().position(|&b| b == 0).unwrap_or(MODULE_NAME_LEN);
    let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
    let major = bytes[MODULE_NAME_LEN];
    let minor = bytes[MODULE_NAME_LEN + 1];
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[MODULE_NAME_LEN + 2..MODULE_HEADER_LEN]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len < MODULE_HEADER_LEN || len > bytes.len() {
        return Err(truncated(&name));
    }
    Ok((name, major, minor, len))
}
