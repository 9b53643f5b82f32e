//! Value types shared across the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{JitError, Result};

/// Physical device identifier (ordinal).
///
/// Always non-negative; construct from untrusted input with
/// [`DeviceId::try_from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Creates a device id from an ordinal.
    #[must_use]
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    /// Validates a raw, possibly negative identifier against the number of
    /// available devices.
    pub fn try_from_raw(id: i64, available: usize) -> Result<Self> {
        if id < 0 || id as u64 >= available as u64 || id > u32::MAX as i64 {
            return Err(JitError::InvalidDevice { id, available });
        }
        Ok(Self(id as u32))
    }

    /// Returns the ordinal.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self.0
    }

    /// Returns the ordinal as `usize` for driver APIs.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target instruction-set generation, `sm_<major><minor>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Architecture {
    major: u32,
    minor: u32,
}

impl Architecture {
    /// Creates an architecture from a compute capability.
    #[must_use]
    pub const fn from_compute_capability(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Major compute capability.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Minor compute capability.
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Virtual architecture tag (`compute_<major><minor>`).
    #[must_use]
    pub fn virtual_tag(self) -> String {
        format!("compute_{}{}", self.major, self.minor)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm_{}{}", self.major, self.minor)
    }
}

impl FromStr for Architecture {
    type Err = JitError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || JitError::InvalidArchitecture(s.to_string());
        let digits = s
            .strip_prefix("sm_")
            .or_else(|| s.strip_prefix("compute_"))
            .ok_or_else(invalid)?;
        if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // Minor version is always the last digit: sm_80 -> 8.0, sm_120 -> 12.0
        let (major, minor) = digits.split_at(digits.len() - 1);
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Architecture {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Architecture {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Language of a kernel source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Native kernel language (CUDA C++).
    #[default]
    Cuda,
    /// Intermediate portable assembly (PTX).
    Ptx,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Cuda => write!(f, "c++"),
            Dialect::Ptx => write!(f, "ptx"),
        }
    }
}

/// Compilation stage an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Portable assembly (PTX). Text.
    Assembly,
    /// Device-loadable binary (cubin). Opaque bytes.
    Binary,
}

impl Stage {
    /// Whether artifacts of this stage are text and must decode as UTF-8.
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(self, Stage::Assembly)
    }

    /// Conventional file extension.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Stage::Assembly => "ptx",
            Stage::Binary => "cubin",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Assembly => write!(f, "assembly"),
            Stage::Binary => write!(f, "binary"),
        }
    }
}

/// Default execution space for functions without an explicit qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSpace {
    /// Unqualified functions compile as `__device__`.
    Device,
    /// Unqualified functions compile as `__host__` (compiler default).
    Host,
}

/// Launch geometry in three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    /// X extent.
    pub x: u32,
    /// Y extent.
    pub y: u32,
    /// Z extent.
    pub z: u32,
}

impl Dim3 {
    /// Creates a 3D extent.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements (blocks or threads).
    #[must_use]
    pub fn volume(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// True when every component is positive.
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.x > 0 && self.y > 0 && self.z > 0
    }

    /// Returns the tuple form used by driver APIs.
    #[must_use]
    pub fn as_tuple(self) -> (u32, u32, u32) {
        (self.x, self.y, self.z)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
